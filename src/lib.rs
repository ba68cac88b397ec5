//! Diophantine equation engine for mixed-integer linear arithmetic.
//!
//! `oxidio` decides systems of linear integer equations as a
//! subroutine of a branch-and-cut integer solver. Equalities arrive as
//! LRA *terms* (named linear forms); the engine eliminates variables
//! Griggio-style, detects gcd conflicts with explanations, tightens
//! bounds of term columns by exploiting integrality, and finishes with
//! a bounded branch-and-bound over the remaining integer-infeasible
//! columns.
//!
//! The surrounding LRA solver stays behind the [`Lra`] trait; the
//! engine holds no reference to it and is handed a `&mut dyn Lra` on
//! every call. [`testing::TestLra`] is a small reference
//! implementation used by the test suite.
//!
//! ```
//! use oxidio::testing::TestLra;
//! use oxidio::{CheckResult, DioEngine, DioSettings, Lra, Rational};
//!
//! // 2x - 4y = 5 has no integer solution: gcd(2, 4) does not divide 5.
//! let mut lra = TestLra::new();
//! let x = lra.add_column(true);
//! let y = lra.add_column(true);
//! let t = lra.add_term(&[(2, x), (-4, y)], true);
//! let (ci_lo, _ci_hi) = lra.fix_column(t, Rational::from_integer(5.into()));
//! lra.find_feasible_solution();
//!
//! let mut engine = DioEngine::new(DioSettings::default());
//! engine.term_added(&lra, t);
//! assert_eq!(engine.check(&mut lra), CheckResult::Conflict);
//!
//! let mut reason = Vec::new();
//! engine.explain(&mut lra, &mut reason);
//! assert!(reason.contains(&ci_lo));
//! ```

pub mod engine;
pub mod indexed_vector;
pub mod lra;
pub mod matrix;
pub mod rational;
pub mod settings;
pub mod testing;
pub mod var_register;

pub use engine::{CheckResult, DioEngine, DioStats, ProposedCut};
pub use lra::{BoundKind, ColIndex, ConstraintIndex, DepId, LpStatus, Lra, Term};
pub use rational::Rational;
pub use settings::DioSettings;
