//! Diophantine equation engine.
//!
//! Follows the elimination procedure of Griggio, "A Practical Approach
//! to Satisfiability Modulo Linear Integer Arithmetic" (JSAT 2012):
//! every registered integer term contributes one equation (an *entry*);
//! entries wait in the pending set F, are solved into the substitution
//! set S when a unit coefficient appears, and spawn fresh auxiliary
//! variables otherwise. A second matrix of certificates records, for
//! each entry, the linear combination of original term columns it was
//! derived from, so conflicts and tightened bounds can always be
//! explained in terms of asserted constraints.
//!
//! Submodules:
//! - [`elim`]: gcd normalization and the F-rewriting loop
//! - [`tighten`]: substitution-driven bound improvement
//! - [`maintain`]: incremental upkeep under term/bound changes
//! - [`branch`]: bounded branch-and-bound on integer-infeasible columns

mod branch;
mod elim;
mod maintain;
mod tighten;

use crate::indexed_vector::IndexedVector;
use crate::lra::{ColIndex, ConstraintIndex, Lra, Term};
use crate::matrix::SparseMatrix;
use crate::rational::Rational;
use crate::settings::DioSettings;
use crate::var_register::VarRegister;
use num_traits::Zero;
use rustc_hash::{FxHashMap, FxHashSet};

use branch::{Branch, ColumnBranchStats};

/// Outcome of [`DioEngine::check`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CheckResult {
    /// Nothing decided; the caller should continue with other means.
    Undef,
    /// The integer constraints are unsatisfiable; see [`DioEngine::explain`].
    Conflict,
    /// A cut is proposed; see [`DioEngine::proposed_cut`].
    Branch,
    /// An integer-feasible assignment was confirmed.
    Sat,
}

/// Cut proposed from a gcd conflict: `sum term <= rhs` when
/// `is_upper`, else `sum term >= rhs`.
#[derive(Debug, Clone)]
pub struct ProposedCut {
    pub term: Vec<(Rational, ColIndex)>,
    pub rhs: Rational,
    pub is_upper: bool,
}

/// Counters kept across `check()` calls.
#[derive(Debug, Clone, Default)]
pub struct DioStats {
    pub calls: u64,
    pub normalize_conflicts: u64,
    pub rewrite_conflicts: u64,
    pub tighten_conflicts: u64,
    pub tightened_bounds: u64,
    pub cuts_from_proof: u64,
    pub branch_iterations: u64,
    pub branching_depth: u64,
    pub branching_sats: u64,
    pub branching_infeasibles: u64,
}

/// Where an entry currently lives.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum EntryStatus {
    /// In F, still to be rewritten.
    Pending,
    /// In S, usable for substitution through its pivot variable.
    Solved,
    /// A fresh-variable definition row; in neither list, but reachable
    /// through the pivot map.
    Detached,
}

/// One equation `row_E(i) . x + c = 0`.
#[derive(Debug, Clone)]
pub(crate) struct Entry {
    pub c: Rational,
    pub status: EntryStatus,
}

/// Defining row of a fresh variable and the F-row that spawned it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct FreshDef {
    pub def_entry: usize,
    pub origin: usize,
}

/// Linear combination with a constant, keyed by column index (local or
/// external depending on context). Scratch algebra for certificates
/// and the debug checkers.
#[derive(Debug, Clone)]
pub(crate) struct LinTerm {
    coeffs: FxHashMap<usize, Rational>,
    pub c: Rational,
}

impl LinTerm {
    pub fn new() -> Self {
        Self {
            coeffs: FxHashMap::default(),
            c: Rational::zero(),
        }
    }

    pub fn add_monomial(&mut self, a: &Rational, j: usize) {
        if a.is_zero() {
            return;
        }
        let slot = self.coeffs.entry(j).or_insert_with(Rational::zero);
        *slot += a;
        if slot.is_zero() {
            self.coeffs.remove(&j);
        }
    }

    pub fn erase(&mut self, j: usize) -> Option<Rational> {
        self.coeffs.remove(&j)
    }

    pub fn iter(&self) -> impl Iterator<Item = (usize, &Rational)> + '_ {
        self.coeffs.iter().map(|(&j, a)| (j, a))
    }

    /// Keys in ascending order, for deterministic walks.
    pub fn sorted(&self) -> Vec<(usize, Rational)> {
        let mut v: Vec<(usize, Rational)> =
            self.coeffs.iter().map(|(&j, a)| (j, a.clone())).collect();
        v.sort_unstable_by_key(|&(j, _)| j);
        v
    }

    pub fn is_empty(&self) -> bool {
        self.coeffs.is_empty()
    }

    pub fn equal_modulo_zero(&self, other: &LinTerm) -> bool {
        if self.c != other.c {
            return false;
        }
        let mut d = self.clone();
        for (j, a) in other.iter() {
            d.add_monomial(&-a.clone(), j);
        }
        d.is_empty()
    }
}

/// The engine. One long-lived instance per integer solver; the LRA is
/// threaded through every call.
#[derive(Debug)]
pub struct DioEngine {
    pub(crate) var_register: VarRegister,
    pub(crate) entries: Vec<Entry>,
    /// Row i holds the coefficients of entry i over local columns.
    pub(crate) e_matrix: SparseMatrix,
    /// Row i certifies entry i as a combination of LRA term columns.
    pub(crate) l_matrix: SparseMatrix,
    /// The set F, in processing order.
    pub(crate) pending: Vec<usize>,
    /// The set S, in solve order.
    pub(crate) solved: Vec<usize>,
    /// Pivot map: local variable k to the entry that solves it.
    pub(crate) solved_by: Vec<Option<usize>>,
    pub(crate) fresh_defs: Vec<Option<FreshDef>>,

    pub(crate) work: IndexedVector,
    pub(crate) work_c: Rational,
    /// Certificate combination accumulated alongside `work`.
    pub(crate) work_l: LinTerm,

    pub(crate) conflict_index: Option<usize>,
    pub(crate) infeas_explanation: Vec<ConstraintIndex>,
    pub(crate) cut: Option<ProposedCut>,

    pub(crate) changed_columns: FxHashSet<ColIndex>,
    /// Reverse index: external column to the term columns mentioning it.
    pub(crate) columns_to_terms: FxHashMap<ColIndex, FxHashSet<ColIndex>>,
    pub(crate) added_terms: Vec<ColIndex>,
    pub(crate) active_terms: FxHashSet<ColIndex>,

    pub(crate) branch_stack: Vec<Branch>,
    pub(crate) column_branch_stats: Vec<ColumnBranchStats>,
    pub(crate) branch_explanations: Vec<ConstraintIndex>,
    pub(crate) lra_level: usize,
    pub(crate) max_iterations: u64,
    pub(crate) iterations: u64,

    pub(crate) settings: DioSettings,
    pub(crate) stats: DioStats,
}

impl Default for DioEngine {
    fn default() -> Self {
        Self::new(DioSettings::default())
    }
}

impl DioEngine {
    pub fn new(settings: DioSettings) -> Self {
        Self {
            var_register: VarRegister::new(),
            entries: Vec::new(),
            e_matrix: SparseMatrix::new(),
            l_matrix: SparseMatrix::new(),
            pending: Vec::new(),
            solved: Vec::new(),
            solved_by: Vec::new(),
            fresh_defs: Vec::new(),
            work: IndexedVector::new(),
            work_c: Rational::zero(),
            work_l: LinTerm::new(),
            conflict_index: None,
            infeas_explanation: Vec::new(),
            cut: None,
            changed_columns: FxHashSet::default(),
            columns_to_terms: FxHashMap::default(),
            added_terms: Vec::new(),
            active_terms: FxHashSet::default(),
            branch_stack: Vec::new(),
            column_branch_stats: Vec::new(),
            branch_explanations: Vec::new(),
            lra_level: 0,
            max_iterations: 100,
            iterations: 0,
            settings,
            stats: DioStats::default(),
        }
    }

    pub fn settings(&self) -> &DioSettings {
        &self.settings
    }

    pub fn settings_mut(&mut self) -> &mut DioSettings {
        &mut self.settings
    }

    pub fn stats(&self) -> &DioStats {
        &self.stats
    }

    /// Number of equations currently represented.
    pub fn entry_count(&self) -> usize {
        self.entries.len()
    }

    /// Number of terms materialized as entries.
    pub fn active_term_count(&self) -> usize {
        self.active_terms.len()
    }

    /// The cut behind a [`CheckResult::Branch`] outcome.
    pub fn proposed_cut(&self) -> Option<&ProposedCut> {
        self.cut.as_ref()
    }

    /// Main entry point. Replays pending maintenance, runs the
    /// rewriting loop, tightens term-column bounds through S, and
    /// falls back to bounded branch-and-bound. The LRA is expected to
    /// be feasible on entry.
    pub fn check(&mut self, lra: &mut dyn Lra) -> CheckResult {
        self.stats.calls += 1;
        tracing::debug!(call = self.stats.calls, entries = self.entries.len(), "check");
        self.init(lra);
        let ret = self.process_f_and_tighten_terms(lra);
        if matches!(ret, CheckResult::Branch | CheckResult::Conflict) {
            return ret;
        }
        debug_assert_eq!(ret, CheckResult::Undef);
        if self.settings.cancelled() {
            return CheckResult::Undef;
        }
        let ret = self.branching_on_undef(lra);
        if matches!(ret, CheckResult::Sat | CheckResult::Conflict) {
            return ret;
        }
        debug_assert_eq!(ret, CheckResult::Undef);
        self.max_iterations = std::cmp::max(5, self.max_iterations / 2);
        CheckResult::Undef
    }

    fn process_f_and_tighten_terms(&mut self, lra: &mut dyn Lra) -> CheckResult {
        let ret = self.process_f(&*lra);
        if ret != CheckResult::Undef {
            return ret;
        }
        if self.settings.cancelled() {
            return CheckResult::Undef;
        }
        let ret = self.tighten_terms_with_s(lra);
        if ret == CheckResult::Conflict {
            self.stats.tighten_conflicts += 1;
            return CheckResult::Conflict;
        }
        CheckResult::Undef
    }

    /// Fill `out` with the constraint indices witnessing the last
    /// `Conflict` or `Branch` outcome.
    pub fn explain(&self, lra: &mut dyn Lra, out: &mut Vec<ConstraintIndex>) {
        if let Some(ei) = self.conflict_index {
            let dep = self.explain_fixed_in_l_row(lra, ei);
            out.extend(lra.flatten(dep));
        } else {
            out.extend(self.infeas_explanation.iter().copied());
        }
    }

    // ----- entry store helpers -----

    fn remove_entry_index(list: &mut Vec<usize>, ei: usize) {
        if let Some(p) = list.iter().position(|&x| x == ei) {
            list.remove(p);
        }
    }

    pub(crate) fn remove_entry_from_lists(&mut self, ei: usize) {
        match self.entries[ei].status {
            EntryStatus::Pending => Self::remove_entry_index(&mut self.pending, ei),
            EntryStatus::Solved => Self::remove_entry_index(&mut self.solved, ei),
            EntryStatus::Detached => {}
        }
    }

    pub(crate) fn add_entry_to_lists(&mut self, ei: usize) {
        match self.entries[ei].status {
            EntryStatus::Pending => self.pending.push(ei),
            EntryStatus::Solved => self.solved.push(ei),
            EntryStatus::Detached => {}
        }
    }

    /// Move a rewritten entry `h` into S with pivot variable `k`.
    pub(crate) fn move_entry_from_f_to_s(&mut self, k: usize, h: usize) {
        debug_assert_eq!(self.entries[h].status, EntryStatus::Pending);
        self.entries[h].status = EntryStatus::Solved;
        if k >= self.solved_by.len() {
            self.solved_by.resize(k + 1, None);
        }
        self.solved_by[k] = Some(h);
        self.solved.push(h);
        Self::remove_entry_index(&mut self.pending, h);
    }

    /// Put a recomputed entry back into F, dropping any pivot links.
    pub(crate) fn move_entry_from_s_to_f(&mut self, ei: usize) {
        if self.entries[ei].status == EntryStatus::Pending {
            return;
        }
        let was = self.entries[ei].status;
        self.entries[ei].status = EntryStatus::Pending;
        for slot in self.solved_by.iter_mut() {
            if *slot == Some(ei) {
                *slot = None;
            }
        }
        if was == EntryStatus::Solved {
            Self::remove_entry_index(&mut self.solved, ei);
        }
        self.pending.push(ei);
    }

    /// Drop the tail entry; matrix rows are removed by the caller.
    pub(crate) fn remove_last_entry(&mut self) {
        let ei = self.entries.len() - 1;
        self.remove_entry_from_lists(ei);
        for slot in self.solved_by.iter_mut() {
            if *slot == Some(ei) {
                *slot = None;
            }
        }
        self.entries.pop();
    }

    pub(crate) fn can_substitute(&self, k: usize) -> bool {
        self.solved_by.get(k).copied().flatten().is_some()
    }

    pub(crate) fn entry_for_subs(&self, k: usize) -> usize {
        self.solved_by[k].expect("pivot map queried for an unsolved variable")
    }

    pub(crate) fn is_fresh_var(&self, l: usize) -> bool {
        self.var_register.is_fresh(l)
    }

    pub(crate) fn clear_e_row(&mut self, ei: usize) {
        while let Some(off) = self.e_matrix.row(ei).len().checked_sub(1) {
            self.e_matrix.remove_element(ei, off);
        }
    }

    /// Gcd of the E-row coefficients, zero for an empty row.
    pub(crate) fn gcd_of_e_row(&self, ei: usize) -> Rational {
        let mut g = Rational::zero();
        for cell in self.e_matrix.row(ei) {
            g = crate::rational::gcd(&g, &cell.coeff);
            if num_traits::One::is_one(&g) {
                break;
            }
        }
        g
    }

    // ----- debug invariant checkers -----

    /// Entry i as a constant plus local-column monomials.
    pub(crate) fn term_from_entry(&self, ei: usize) -> LinTerm {
        let mut t = LinTerm::new();
        for cell in self.e_matrix.row(ei) {
            t.add_monomial(&cell.coeff, cell.col);
        }
        t.c = self.entries[ei].c.clone();
        t
    }

    /// Unfold fresh variables through their definition rows.
    pub(crate) fn remove_fresh_vars(&self, term: &LinTerm) -> LinTerm {
        let mut t = term.clone();
        let mut queue: Vec<usize> = t
            .iter()
            .map(|(j, _)| j)
            .filter(|&j| self.is_fresh_var(j))
            .collect();
        while let Some(xt) = queue.pop() {
            let Some(a) = t.erase(xt) else { continue };
            let fd = self.fresh_defs[xt].expect("fresh variable without definition");
            // definition row: -xt + rest = 0, so xt = rest
            let mut rest = self.term_from_entry(fd.def_entry);
            let minus_one = rest.erase(xt);
            debug_assert_eq!(
                minus_one,
                Some(-Rational::from_integer(1.into())),
                "fresh definition row must carry -1 at its variable"
            );
            for (j, b) in rest.iter() {
                t.add_monomial(&(&a * b), j);
                if self.is_fresh_var(j) {
                    queue.push(j);
                }
            }
            t.c += &a * &rest.c;
        }
        t
    }

    /// Translate a local-keyed combination to external columns.
    pub(crate) fn term_to_external(&self, term: &LinTerm) -> LinTerm {
        let mut t = LinTerm::new();
        for (j, a) in term.iter() {
            let e = self
                .var_register
                .local_to_external(j)
                .expect("fresh variables must be unfolded before translation");
            t.add_monomial(a, e);
        }
        t.c = term.c.clone();
        t
    }

    /// Expand a certificate row over LRA term columns into external
    /// columns: each term column j contributes `get_term(j) - x_j`.
    pub(crate) fn open_l_row(&self, lra: &dyn Lra, ei: usize) -> LinTerm {
        let mut t = LinTerm::new();
        for cell in self.l_matrix.row(ei) {
            let term = lra.get_term(cell.col);
            for (b, x) in term.ext_coeffs() {
                t.add_monomial(&(&cell.coeff * &b), x);
            }
        }
        t
    }

    /// Replace fixed external columns by their bound values.
    pub(crate) fn fix_vars(&self, lra: &dyn Lra, term: &LinTerm) -> LinTerm {
        let mut t = LinTerm::new();
        t.c = term.c.clone();
        for (j, a) in term.iter() {
            if lra.column_is_fixed(j) {
                t.c += a * &lra.lower_bound(j);
            } else {
                t.add_monomial(a, j);
            }
        }
        t
    }

    /// The entry invariant: integral coefficients, and the E-row
    /// (fresh variables unfolded, mapped to external columns) equals
    /// the opened certificate row with fixed variables substituted.
    pub(crate) fn entry_invariant(&self, lra: &dyn Lra, ei: usize) -> bool {
        if self
            .e_matrix
            .row(ei)
            .iter()
            .any(|cell| !cell.coeff.is_integer())
        {
            return false;
        }
        let lhs = self.term_to_external(&self.remove_fresh_vars(&self.term_from_entry(ei)));
        let rhs = self.fix_vars(lra, &self.open_l_row(lra, ei));
        lhs.equal_modulo_zero(&rhs)
    }

    pub(crate) fn entries_are_ok(&self, lra: &dyn Lra) -> bool {
        (0..self.entries.len()).all(|ei| self.entry_invariant(lra, ei))
    }

    pub(crate) fn columns_to_terms_ok(&self, lra: &dyn Lra) -> bool {
        let mut expected: FxHashMap<ColIndex, FxHashSet<ColIndex>> = FxHashMap::default();
        for tid in lra.terms() {
            let term = lra.get_term(tid);
            if !lra.column_is_int(tid) || !self.all_vars_are_int(lra, term) {
                continue;
            }
            for (_, x) in term.ext_coeffs() {
                expected.entry(x).or_default().insert(tid);
            }
        }
        expected == self.columns_to_terms
    }

    pub(crate) fn is_in_sync(&self, lra: &dyn Lra) -> bool {
        for l in 0..self.var_register.len() {
            if let Some(e) = self.var_register.local_to_external(l) {
                if e >= lra.column_count() {
                    return false;
                }
            }
        }
        self.columns_to_terms_ok(lra)
    }

    pub(crate) fn all_vars_are_int(&self, lra: &dyn Lra, term: &Term) -> bool {
        term.coeffs.iter().all(|&(_, x)| lra.column_is_int(x))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lra::BoundKind;
    use crate::testing::TestLra;
    use num_bigint::BigInt;

    fn rat(n: i64) -> Rational {
        Rational::from_integer(BigInt::from(n))
    }

    fn ratio(n: i64, d: i64) -> Rational {
        Rational::new(BigInt::from(n), BigInt::from(d))
    }

    fn boxed(lra: &mut TestLra, j: usize, lo: i64, hi: i64) {
        lra.add_bound(j, BoundKind::Ge, rat(lo));
        lra.add_bound(j, BoundKind::Le, rat(hi));
    }

    #[test]
    fn gcd_conflict_with_explanation() {
        // 2x - 4y = 5: gcd 2 does not divide 5
        let mut lra = TestLra::new();
        let x = lra.add_column(true);
        let y = lra.add_column(true);
        boxed(&mut lra, x, 0, 10);
        boxed(&mut lra, y, 0, 10);
        let t = lra.add_term(&[(2, x), (-4, y)], true);
        let (ci_lo, ci_hi) = lra.fix_column(t, rat(5));
        lra.find_feasible_solution();

        let mut engine = DioEngine::new(DioSettings::default());
        engine.term_added(&lra, t);
        assert_eq!(engine.check(&mut lra), CheckResult::Conflict);
        assert_eq!(engine.stats().normalize_conflicts, 1);

        let mut reason = Vec::new();
        engine.explain(&mut lra, &mut reason);
        assert!(reason.contains(&ci_lo) && reason.contains(&ci_hi));
    }

    #[test]
    fn unit_pivot_moves_entry_to_s() {
        // x + 2y = 3: x becomes the pivot of the solved entry
        let mut lra = TestLra::new();
        let x = lra.add_column(true);
        let y = lra.add_column(true);
        boxed(&mut lra, x, 0, 10);
        boxed(&mut lra, y, 0, 10);
        let t = lra.add_term(&[(1, x), (2, y)], true);
        lra.fix_column(t, rat(3));
        lra.find_feasible_solution();

        let mut engine = DioEngine::new(DioSettings::default());
        engine.term_added(&lra, t);
        assert_eq!(engine.check(&mut lra), CheckResult::Sat);
        assert!(engine.pending.is_empty());
        assert_eq!(engine.solved, vec![0]);
        // local 0 is x, registered first
        assert_eq!(engine.var_register.local_to_external(0), Some(x));
        assert_eq!(engine.solved_by[0], Some(0));
    }

    #[test]
    fn fresh_variable_step_and_branch_exhaustion() {
        // 3x + 5y + 7z = 1 over x, y, z in [0, 10]: no solution in
        // non-negative integers, and no unit coefficient to pivot on.
        let mut lra = TestLra::new();
        let x = lra.add_column(true);
        let y = lra.add_column(true);
        let z = lra.add_column(true);
        for j in [x, y, z] {
            boxed(&mut lra, j, 0, 10);
        }
        let t = lra.add_term(&[(3, x), (5, y), (7, z)], true);
        lra.fix_column(t, rat(1));
        lra.find_feasible_solution();

        let mut engine = DioEngine::new(DioSettings::default());
        engine.term_added(&lra, t);
        assert_eq!(engine.check(&mut lra), CheckResult::Conflict);
        // a fresh definition row was created on the way
        assert_eq!(engine.fresh_defs.iter().flatten().count(), 1);
        assert_eq!(engine.entry_count(), 2);
        assert!(engine.stats().branching_infeasibles >= 1);
        // parity after the search
        assert_eq!(engine.lra_level, 0);
        assert!(engine.branch_stack.is_empty());
    }

    #[test]
    fn tighten_improves_term_bound() {
        // x + 2y = 3 solved as x = 3 - 2y; the column for the term
        // t2 = x then satisfies t2 = 3 - 2y, so t2 <= 10 rounds to
        // t2 <= 9.
        let mut lra = TestLra::new();
        let x = lra.add_column(true);
        let y = lra.add_column(true);
        boxed(&mut lra, y, -10, 10);
        let teq = lra.add_term(&[(1, x), (2, y)], true);
        lra.fix_column(teq, rat(3));
        let t2 = lra.add_term(&[(1, x)], true);
        lra.add_bound(t2, BoundKind::Le, rat(10));
        lra.find_feasible_solution();

        let mut engine = DioEngine::new(DioSettings::default());
        engine.term_added(&lra, teq);
        engine.term_added(&lra, t2);
        assert_eq!(engine.check(&mut lra), CheckResult::Sat);
        assert_eq!(engine.stats().tightened_bounds, 1);
        assert_eq!(lra.upper_bound(t2), rat(9));
    }

    #[test]
    fn tighten_conflict_reports_lra_explanation() {
        // As above, but t2 in [4, 9/2]: rounding the upper bound to 3
        // crosses the lower bound and the LRA reports infeasibility.
        let mut lra = TestLra::new();
        let x = lra.add_column(true);
        let y = lra.add_column(true);
        boxed(&mut lra, y, -10, 10);
        let teq = lra.add_term(&[(1, x), (2, y)], true);
        lra.fix_column(teq, rat(3));
        let t2 = lra.add_term(&[(1, x)], true);
        let ci_lo = lra.add_bound(t2, BoundKind::Ge, rat(4));
        lra.add_bound(t2, BoundKind::Le, ratio(9, 2));
        lra.find_feasible_solution();

        let mut engine = DioEngine::new(DioSettings::default());
        engine.term_added(&lra, teq);
        engine.term_added(&lra, t2);
        assert_eq!(engine.check(&mut lra), CheckResult::Conflict);
        assert_eq!(engine.stats().tighten_conflicts, 1);

        let mut reason = Vec::new();
        engine.explain(&mut lra, &mut reason);
        assert!(reason.contains(&ci_lo));
    }

    #[test]
    fn cut_proposed_on_period() {
        let mut lra = TestLra::new();
        let x = lra.add_column(true);
        let y = lra.add_column(true);
        boxed(&mut lra, x, 0, 10);
        boxed(&mut lra, y, 0, 10);
        let t = lra.add_term(&[(2, x), (-4, y)], true);
        lra.fix_column(t, rat(5));
        lra.find_feasible_solution();

        let mut settings = DioSettings::default();
        settings.cut_from_proof_period = 1;
        let mut engine = DioEngine::new(settings);
        engine.term_added(&lra, t);
        assert_eq!(engine.check(&mut lra), CheckResult::Branch);
        assert_eq!(engine.stats().cuts_from_proof, 1);

        // row (2x - 4y - 5)/2 yields x - 2y <= floor(5/2) = 2
        let cut = engine.proposed_cut().expect("branch outcome carries a cut");
        assert!(cut.is_upper);
        assert_eq!(cut.rhs, rat(2));
        assert_eq!(cut.term, vec![(rat(1), x), (rat(-2), y)]);

        // the cut is justified by the fixed term column
        let mut reason = Vec::new();
        engine.explain(&mut lra, &mut reason);
        assert!(!reason.is_empty());
    }

    #[test]
    fn cancel_collapses_to_undef_and_reenters() {
        let mut lra = TestLra::new();
        let x = lra.add_column(true);
        let y = lra.add_column(true);
        let t = lra.add_term(&[(2, x), (-4, y)], true);
        lra.fix_column(t, rat(5));
        lra.find_feasible_solution();

        let mut engine = DioEngine::new(DioSettings::default());
        let flag = engine.settings().cancel_flag();
        engine.term_added(&lra, t);

        flag.store(true, std::sync::atomic::Ordering::Relaxed);
        assert_eq!(engine.check(&mut lra), CheckResult::Undef);

        flag.store(false, std::sync::atomic::Ordering::Relaxed);
        assert_eq!(engine.check(&mut lra), CheckResult::Conflict);
    }

    #[test]
    fn branching_exhausts_fractional_fixed_term() {
        // x + y = 7/2 over x, y in [0, 3]: real-feasible, integer-
        // infeasible, and the gcd test is blind to it (gcd is 1).
        let mut lra = TestLra::new();
        let x = lra.add_column(true);
        let y = lra.add_column(true);
        boxed(&mut lra, x, 0, 3);
        boxed(&mut lra, y, 0, 3);
        let t = lra.add_term(&[(1, x), (1, y)], true);
        lra.fix_column(t, ratio(7, 2));
        lra.find_feasible_solution();

        let mut engine = DioEngine::new(DioSettings::default());
        engine.term_added(&lra, t);
        assert_eq!(engine.check(&mut lra), CheckResult::Conflict);
        assert_eq!(engine.lra_level, 0);
        assert!(engine.branch_stack.is_empty());

        // surviving witnesses are user constraints, not branch bounds
        let mut reason = Vec::new();
        engine.explain(&mut lra, &mut reason);
        assert!(!reason.is_empty());
        assert!(reason.iter().all(|&ci| lra.constraint_is_valid(ci)));
    }

    #[test]
    fn removal_of_queued_term_is_forgotten() {
        let mut lra = TestLra::new();
        let x = lra.add_column(true);
        let t = lra.add_term(&[(1, x)], true);
        let mut engine = DioEngine::new(DioSettings::default());
        engine.term_added(&lra, t);
        engine.term_removed(&lra, t);
        lra.remove_term(t);
        lra.find_feasible_solution();
        assert_eq!(engine.check(&mut lra), CheckResult::Sat);
        assert_eq!(engine.entry_count(), 0);
        assert_eq!(engine.active_term_count(), 0);
    }

    #[test]
    fn removal_of_active_term_shrinks_state() {
        let mut lra = TestLra::new();
        let x1 = lra.add_column(true);
        let y1 = lra.add_column(true);
        let ta = lra.add_term(&[(1, x1), (1, y1)], true);
        lra.find_feasible_solution();

        let mut engine = DioEngine::new(DioSettings::default());
        engine.term_added(&lra, ta);
        assert_eq!(engine.check(&mut lra), CheckResult::Sat);
        assert_eq!(engine.entry_count(), 1);

        engine.term_removed(&lra, ta);
        lra.remove_term(ta);
        assert_eq!(engine.entry_count(), 0);
        assert_eq!(engine.active_term_count(), 0);
        assert!(engine.solved.is_empty() && engine.pending.is_empty());
        assert!(engine.solved_by.iter().all(|s| s.is_none()));
        assert_eq!(engine.var_register.len(), 0);

        // a later term starts from a clean slate
        let x2 = lra.add_column(true);
        let y2 = lra.add_column(true);
        let tb = lra.add_term(&[(1, x2), (2, y2)], true);
        lra.find_feasible_solution();
        engine.term_added(&lra, tb);
        assert_eq!(engine.check(&mut lra), CheckResult::Sat);
        assert_eq!(engine.entry_count(), 1);
        assert_eq!(engine.var_register.local_to_external(0), Some(x2));
    }

    #[test]
    fn normalize_is_idempotent() {
        let mut lra = TestLra::new();
        let x = lra.add_column(true);
        let y = lra.add_column(true);
        let t = lra.add_term(&[(2, x), (4, y)], true);
        lra.fix_column(t, rat(6));

        let mut engine = DioEngine::new(DioSettings::default());
        engine.term_added(&lra, t);
        engine.init(&mut lra);
        assert!(engine.normalize_e_by_gcd(&lra, 0));
        let row_after: Vec<(usize, Rational)> = engine
            .e_matrix
            .row(0)
            .iter()
            .map(|c| (c.col, c.coeff.clone()))
            .collect();
        let c_after = engine.entries[0].c.clone();
        assert_eq!(c_after, rat(-3));

        assert!(engine.normalize_e_by_gcd(&lra, 0));
        let row_again: Vec<(usize, Rational)> = engine
            .e_matrix
            .row(0)
            .iter()
            .map(|c| (c.col, c.coeff.clone()))
            .collect();
        assert_eq!(row_after, row_again);
        assert_eq!(engine.entries[0].c, c_after);
    }

    #[test]
    fn contradictory_equations_conflict_via_empty_row() {
        // x + y = 3 and x + y = 4 cancel to an empty row with a
        // nonzero constant.
        let mut lra = TestLra::new();
        let x = lra.add_column(true);
        let y = lra.add_column(true);
        let t1 = lra.add_term(&[(1, x), (1, y)], true);
        let (c1, _) = lra.fix_column(t1, rat(3));
        let t2 = lra.add_term(&[(1, x), (1, y)], true);
        let (c2, _) = lra.fix_column(t2, rat(4));

        let mut engine = DioEngine::new(DioSettings::default());
        engine.term_added(&lra, t1);
        engine.term_added(&lra, t2);
        assert_eq!(engine.check(&mut lra), CheckResult::Conflict);
        assert_eq!(engine.stats().rewrite_conflicts, 1);

        let mut reason = Vec::new();
        engine.explain(&mut lra, &mut reason);
        assert!(reason.contains(&c1) && reason.contains(&c2));
    }

    #[test]
    fn fixed_column_change_triggers_recomputation() {
        // 2x + y = 5 is satisfiable while y is loose; once y is fixed
        // to 2 the recomputed entry reads 2x = 3, which the gcd test
        // rejects. The state stays real-feasible (x = 3/2), so the
        // conflict can only come from the recomputation path.
        let mut lra = TestLra::new();
        let x = lra.add_column(true);
        let y = lra.add_column(true);
        boxed(&mut lra, x, -10, 10);
        boxed(&mut lra, y, 0, 10);
        let t = lra.add_term(&[(2, x), (1, y)], true);
        let (t_lo, _) = lra.fix_column(t, rat(5));
        lra.find_feasible_solution();

        let mut engine = DioEngine::new(DioSettings::default());
        engine.term_added(&lra, t);
        assert_eq!(engine.check(&mut lra), CheckResult::Sat);

        let (y_lo, _) = lra.fix_column(y, rat(2));
        engine.column_bound_changed(&mut lra, y);
        lra.find_feasible_solution();
        assert_eq!(engine.check(&mut lra), CheckResult::Conflict);
        assert_eq!(engine.stats().normalize_conflicts, 1);

        let mut reason = Vec::new();
        engine.explain(&mut lra, &mut reason);
        assert!(reason.contains(&y_lo) && reason.contains(&t_lo));
    }
}
