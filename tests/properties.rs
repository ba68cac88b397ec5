//! Property suites: arithmetic façade laws, sparse matrix consistency
//! under random operation sequences, and soundness of `check()` on
//! small two-variable systems against brute force.

use num_bigint::BigInt;
use num_traits::{Signed, Zero};
use oxidio::matrix::SparseMatrix;
use oxidio::rational::{gcd, lcm, machine_div_rem};
use oxidio::testing::TestLra;
use oxidio::{BoundKind, CheckResult, DioEngine, DioSettings, Lra, Rational};
use proptest::prelude::*;

fn rat(n: i64) -> Rational {
    Rational::from_integer(BigInt::from(n))
}

proptest! {
    #[test]
    fn machine_div_rem_laws(a in -100i64..100, b in -50i64..50) {
        prop_assume!(b != 0);
        let (q, r) = machine_div_rem(&rat(a), &rat(b));
        // a = q*b + r
        prop_assert_eq!(&q * rat(b) + &r, rat(a));
        // |r| < |b|
        prop_assert!(r.abs() < rat(b).abs());
        // sign(r) follows a (or r = 0)
        if !r.is_zero() {
            prop_assert_eq!(r.is_negative(), a < 0);
        }
    }

    #[test]
    fn gcd_lcm_laws(a in -40i64..40, b in -40i64..40) {
        let g = gcd(&rat(a), &rat(b));
        prop_assert!(!g.is_negative());
        if a != 0 || b != 0 {
            prop_assert!(!g.is_zero());
            prop_assert!((rat(a) / &g).is_integer());
            prop_assert!((rat(b) / &g).is_integer());
        }
        if a != 0 && b != 0 {
            let l = lcm(&rat(a), &rat(b));
            prop_assert_eq!(&g * &l, (rat(a) * rat(b)).abs());
        }
    }
}

/// Dense mirror of a sparse matrix, for cross-checking operations.
#[derive(Clone)]
struct Dense {
    cells: Vec<Vec<Rational>>,
}

impl Dense {
    fn new(rows: usize, cols: usize) -> Self {
        Self {
            cells: vec![vec![Rational::zero(); cols]; rows],
        }
    }

    fn matches(&self, m: &SparseMatrix) -> bool {
        for (i, row) in self.cells.iter().enumerate() {
            for (j, v) in row.iter().enumerate() {
                let got = m.coeff(i, j).cloned().unwrap_or_else(Rational::zero);
                if got != *v {
                    return false;
                }
            }
        }
        true
    }
}

#[derive(Debug, Clone)]
enum MatrixOp {
    AddRows { alpha: i64, src: usize, dst: usize },
    Transpose { i: usize, k: usize },
    Multiply { i: usize, k: i64 },
    RemoveFirst { i: usize },
}

fn matrix_op_strategy() -> impl Strategy<Value = MatrixOp> {
    prop_oneof![
        (-3i64..4, 0usize..4, 0usize..4)
            .prop_map(|(alpha, src, dst)| MatrixOp::AddRows { alpha, src, dst }),
        (0usize..4, 0usize..4).prop_map(|(i, k)| MatrixOp::Transpose { i, k }),
        (0usize..4, 1i64..4).prop_map(|(i, k)| MatrixOp::Multiply { i, k }),
        (0usize..4).prop_map(|i| MatrixOp::RemoveFirst { i }),
    ]
}

proptest! {
    #[test]
    fn sparse_matrix_matches_dense_mirror(
        seed in proptest::collection::vec(-3i64..4, 12),
        ops in proptest::collection::vec(matrix_op_strategy(), 0..12),
    ) {
        const ROWS: usize = 3;
        const COLS: usize = 4;
        let mut m = SparseMatrix::new();
        let mut d = Dense::new(ROWS, COLS);
        for _ in 0..ROWS {
            m.add_row();
        }
        m.add_columns_up_to(COLS - 1);
        for (idx, &v) in seed.iter().enumerate() {
            if v != 0 {
                let (i, j) = (idx / COLS, idx % COLS);
                m.add_new_element(i, j, rat(v));
                d.cells[i][j] = rat(v);
            }
        }
        prop_assert!(m.back_indexing_ok());
        prop_assert!(d.matches(&m));

        for op in ops {
            match op {
                MatrixOp::AddRows { alpha, src, dst } => {
                    let (src, dst) = (src % ROWS, dst % ROWS);
                    if src == dst {
                        continue;
                    }
                    m.add_rows(&rat(alpha), src, dst);
                    for j in 0..COLS {
                        let delta = rat(alpha) * &d.cells[src][j];
                        d.cells[dst][j] += delta;
                    }
                }
                MatrixOp::Transpose { i, k } => {
                    let (i, k) = (i % ROWS, k % ROWS);
                    m.transpose_rows(i, k);
                    d.cells.swap(i, k);
                }
                MatrixOp::Multiply { i, k } => {
                    let i = i % ROWS;
                    m.multiply_row(i, &rat(k));
                    for j in 0..COLS {
                        d.cells[i][j] *= rat(k);
                    }
                }
                MatrixOp::RemoveFirst { i } => {
                    let i = i % ROWS;
                    if m.row(i).is_empty() {
                        continue;
                    }
                    let j = m.row(i)[0].col;
                    m.remove_element(i, 0);
                    d.cells[i][j] = Rational::zero();
                }
            }
            prop_assert!(m.back_indexing_ok());
            prop_assert!(d.matches(&m));
        }
    }
}

/// Brute-force check of `a*x + b*y = c` over the `[0, 4]` box.
fn has_integer_point(a: i64, b: i64, c: i64) -> bool {
    (0..=4).any(|x| (0..=4).any(|y| a * x + b * y == c))
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(128))]
    #[test]
    fn check_is_sound_on_two_variable_systems(
        a in -4i64..=4,
        b in -4i64..=4,
        c in -6i64..=6,
    ) {
        let mut lra = TestLra::new();
        let x = lra.add_column(true);
        let y = lra.add_column(true);
        for j in [x, y] {
            lra.add_bound(j, BoundKind::Ge, rat(0));
            lra.add_bound(j, BoundKind::Le, rat(4));
        }
        let t = lra.add_term(&[(a, x), (b, y)], true);
        lra.fix_column(t, rat(c));
        // the engine is entered only on a real-feasible LRA state
        prop_assume!(lra.find_feasible_solution().is_feasible());

        let mut engine = DioEngine::new(DioSettings::default());
        engine.term_added(&lra, t);
        match engine.check(&mut lra) {
            CheckResult::Conflict => {
                prop_assert!(
                    !has_integer_point(a, b, c),
                    "conflict reported for a solvable system {}x + {}y = {}",
                    a, b, c
                );
                let mut reason = Vec::new();
                engine.explain(&mut lra, &mut reason);
                prop_assert!(!reason.is_empty());
            }
            CheckResult::Sat => {
                prop_assert!(
                    has_integer_point(a, b, c),
                    "sat reported for an unsolvable system {}x + {}y = {}",
                    a, b, c
                );
            }
            CheckResult::Undef | CheckResult::Branch => {}
        }
        prop_assert_eq!(lra.scope_depth(), 0);
    }
}
