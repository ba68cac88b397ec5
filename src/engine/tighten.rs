//! Bound tightening of LRA term columns through the solved set S.
//!
//! A term column j with value `sum a_i x_i` is rewritten by pushing
//! every substitutable variable through its solving row. If the gcd g
//! of the remaining coefficients exceeds one, `x_j = g*t + c` for an
//! integral t, which rounds any bound whose distance to c is not a
//! multiple of g.

use super::{CheckResult, DioEngine, LinTerm};
use crate::lra::{BoundKind, ColIndex, DepId, LpStatus, Lra};
use crate::rational::{gcd, Rational};
use num_traits::{One, Zero};
use std::collections::VecDeque;
use tracing::debug;

enum TightenOutcome {
    NoChange,
    Tightened,
    Conflict,
}

impl DioEngine {
    pub(crate) fn tighten_terms_with_s(&mut self, lra: &mut dyn Lra) -> CheckResult {
        for j in 0..lra.column_count() {
            if self.settings.cancelled() {
                return CheckResult::Undef;
            }
            if !lra.column_has_term(j)
                || lra.column_is_free(j)
                || lra.column_is_fixed(j)
                || !lra.column_is_int(j)
            {
                continue;
            }
            if self.tighten_bounds_for_term_column(lra, j) {
                return CheckResult::Conflict;
            }
        }
        CheckResult::Undef
    }

    /// Returns true if a conflict was found while working on `j`.
    fn tighten_bounds_for_term_column(&mut self, lra: &mut dyn Lra, j: ColIndex) -> bool {
        let term = lra.get_term(j).clone();
        if !self.all_vars_are_int(&*lra, &term) {
            return false;
        }
        let mut queue: VecDeque<usize> = VecDeque::new();
        for (_, x) in &term.coeffs {
            if lra.column_is_fixed(*x) {
                continue;
            }
            if let Some(lx) = self.var_register.external_to_local(*x) {
                if self.can_substitute(lx) {
                    queue.push_back(lx);
                }
            }
        }
        if queue.is_empty() {
            return false;
        }
        if !self.fill_work_vector_from_term(&*lra, &term) {
            return false;
        }
        self.subs_work_vector_with_s(&mut queue);
        debug_assert!(self.tighten_sync_ok(&*lra, &term));

        let g = self.gcd_of_work_vector();
        if g.is_one() {
            return false;
        }
        if g.is_zero() {
            self.handle_constant_term(lra, j);
            return !self.infeas_explanation.is_empty();
        }
        match self.tighten_for_bound_side(lra, &g, j, true) {
            TightenOutcome::Conflict => return true,
            TightenOutcome::Tightened => return false,
            TightenOutcome::NoChange => {}
        }
        matches!(
            self.tighten_for_bound_side(lra, &g, j, false),
            TightenOutcome::Conflict
        )
    }

    /// Load the term into the scratch vector in local coordinates,
    /// folding fixed variables into the running constant. Returns
    /// false when a non-fixed variable has no local column, which
    /// happens only for terms that were never materialized; such a
    /// term cannot be tightened.
    fn fill_work_vector_from_term(&mut self, lra: &dyn Lra, term: &crate::lra::Term) -> bool {
        self.work.clear();
        let size = std::cmp::max(self.e_matrix.column_count(), self.var_register.len());
        self.work.resize(size);
        self.work_c = Rational::zero();
        self.work_l = LinTerm::new();
        for (a, x) in &term.coeffs {
            debug_assert!(a.is_integer());
            if lra.column_is_fixed(*x) {
                self.work_c += a * &lra.lower_bound(*x);
            } else {
                match self.var_register.external_to_local(*x) {
                    Some(lx) => self.work.set_value(lx, a.clone()),
                    None => return false,
                }
            }
        }
        true
    }

    fn subs_work_vector_with_s(&mut self, queue: &mut VecDeque<usize>) {
        while let Some(k) = queue.pop_front() {
            self.subs_front(k, queue);
        }
    }

    /// Replace variable `k` in the scratch vector by the rest of its
    /// solving row, and fold the same combination into the certificate
    /// accumulator. Newly exposed substitutable non-fresh variables
    /// are re-enqueued; repeats are harmless because a zeroed slot is
    /// skipped at pop time.
    fn subs_front(&mut self, k: usize, queue: &mut VecDeque<usize>) {
        if self.work.get(k).is_zero() {
            return;
        }
        let ei = self.entry_for_subs(k);
        let mut coeff = self.work.get(k).clone();
        self.work.erase(k);

        let k_coeff = self
            .e_matrix
            .coeff(ei, k)
            .expect("solving row must mention its pivot")
            .clone();
        debug_assert!(k_coeff.is_one() || (-&k_coeff).is_one());
        if k_coeff.is_one() {
            coeff = -coeff;
        }

        let cells: Vec<(usize, Rational)> = self
            .e_matrix
            .row(ei)
            .iter()
            .map(|c| (c.col, c.coeff.clone()))
            .collect();
        for (jj, a) in cells {
            if jj == k {
                continue;
            }
            self.work.add_value(jj, &a * &coeff);
            if !self.is_fresh_var(jj) && !self.work.get(jj).is_zero() && self.can_substitute(jj) {
                queue.push_back(jj);
            }
        }
        self.work_c += &coeff * &self.entries[ei].c;

        let l_cells: Vec<(usize, Rational)> = self
            .l_matrix
            .row(ei)
            .iter()
            .map(|c| (c.col, c.coeff.clone()))
            .collect();
        for (tid, b) in l_cells {
            self.work_l.add_monomial(&(&coeff * &b), tid);
        }
    }

    fn gcd_of_work_vector(&self) -> Rational {
        let mut g = Rational::zero();
        for (_, a) in self.work.iter() {
            g = gcd(&g, a);
            if g.is_one() {
                break;
            }
        }
        g
    }

    /// The fully substituted term is the constant `work_c`; flag a
    /// violated bound of `j`, if any, with a full explanation.
    fn handle_constant_term(&mut self, lra: &mut dyn Lra, j: ColIndex) {
        let violated_upper = match lra.bound_of_type(j, true) {
            Some((rs, strict, _)) => self.work_c > rs || (strict && self.work_c == rs),
            None => false,
        };
        let violated_lower = match lra.bound_of_type(j, false) {
            Some((rs, strict, _)) => self.work_c < rs || (strict && self.work_c == rs),
            None => false,
        };
        if !violated_upper && !violated_lower {
            return;
        }
        let term = lra.get_term(j).clone();
        let dep = self.explain_fixed_in_coeffs(lra, &term.coeffs);
        let w = self.explain_fixed_in_work_l(lra);
        let dep = lra.mk_join(dep, w);
        let bw = lra.column_bound_witnesses(j);
        let dep = lra.mk_join(dep, bw);
        let flat = lra.flatten(dep);
        debug!(column = j, "constant term violates a bound");
        self.infeas_explanation.extend(flat);
    }

    fn tighten_for_bound_side(
        &mut self,
        lra: &mut dyn Lra,
        g: &Rational,
        j: ColIndex,
        is_upper: bool,
    ) -> TightenOutcome {
        if let Some((rs, _strict, b_dep)) = lra.bound_of_type(j, is_upper) {
            let rs = (rs - &self.work_c) / g;
            if !rs.is_integer() {
                return self.tighten_bound_kind(lra, g, j, &rs, is_upper, b_dep);
            }
        }
        TightenOutcome::NoChange
    }

    /// Install the rounded bound `g*floor(rs) + c` (or ceil for a
    /// lower bound) and run the LRA to absorb it.
    fn tighten_bound_kind(
        &mut self,
        lra: &mut dyn Lra,
        g: &Rational,
        j: ColIndex,
        rs: &Rational,
        upper: bool,
        prev_dep: Option<DepId>,
    ) -> TightenOutcome {
        let rounded = if upper { rs.floor() } else { rs.ceil() };
        let bound = g * rounded + &self.work_c;

        let mut dep = prev_dep;
        let w = self.explain_fixed_in_work_l(lra);
        dep = lra.mk_join(dep, w);
        let jw = if upper {
            lra.column_upper_bound_witness(j)
        } else {
            lra.column_lower_bound_witness(j)
        };
        dep = lra.mk_join(dep, jw);
        let term = lra.get_term(j).clone();
        let tw = self.explain_fixed_in_coeffs(lra, &term.coeffs);
        dep = lra.mk_join(dep, tw);
        let bw = lra.column_bound_witnesses(j);
        dep = lra.mk_join(dep, bw);

        let kind = if upper { BoundKind::Le } else { BoundKind::Ge };
        debug!(column = j, upper, "tightened bound");
        lra.update_column_type_and_bound(j, kind, bound, dep);
        self.stats.tightened_bounds += 1;
        self.column_bound_changed(lra, j);

        let st = lra.find_feasible_solution();
        if st == LpStatus::Cancelled || st.is_feasible() {
            return TightenOutcome::Tightened;
        }
        self.infeas_explanation = lra.get_infeasibility_explanation();
        TightenOutcome::Conflict
    }

    // ----- explanation helpers -----

    /// Join the bound witnesses of every fixed variable among `coeffs`.
    pub(crate) fn explain_fixed_in_coeffs(
        &self,
        lra: &mut dyn Lra,
        coeffs: &[(Rational, ColIndex)],
    ) -> Option<DepId> {
        let mut dep = None;
        for (_, x) in coeffs {
            if lra.column_is_fixed(*x) {
                let w = lra.column_bound_witnesses(*x);
                dep = lra.mk_join(dep, w);
            }
        }
        dep
    }

    /// Expand a combination of term columns into external columns:
    /// each term column j contributes `get_term(j) - x_j`.
    pub(crate) fn open_lin_comb(&self, lra: &dyn Lra, comb: &LinTerm) -> LinTerm {
        let mut r = LinTerm::new();
        for (tid, a) in comb.sorted() {
            let term = lra.get_term(tid);
            for (b, x) in term.ext_coeffs() {
                r.add_monomial(&(&a * &b), x);
            }
        }
        r
    }

    fn explain_fixed_external(&self, lra: &mut dyn Lra, t: &LinTerm) -> Option<DepId> {
        let mut dep = None;
        for (x, _) in t.sorted() {
            if lra.column_is_fixed(x) {
                let w = lra.column_bound_witnesses(x);
                dep = lra.mk_join(dep, w);
            }
        }
        dep
    }

    fn explain_fixed_in_work_l(&mut self, lra: &mut dyn Lra) -> Option<DepId> {
        let comb = self.work_l.clone();
        let opened = self.open_lin_comb(&*lra, &comb);
        self.explain_fixed_external(lra, &opened)
    }

    /// Witnesses of the fixed variables behind certificate row `ei`.
    pub(crate) fn explain_fixed_in_l_row(&self, lra: &mut dyn Lra, ei: usize) -> Option<DepId> {
        let mut comb = LinTerm::new();
        for cell in self.l_matrix.row(ei) {
            comb.add_monomial(&cell.coeff, cell.col);
        }
        let opened = self.open_lin_comb(&*lra, &comb);
        self.explain_fixed_external(lra, &opened)
    }

    /// Debug check: the substituted scratch state still describes the
    /// original term modulo the accumulated certificate combination.
    fn tighten_sync_ok(&self, lra: &dyn Lra, term: &crate::lra::Term) -> bool {
        let mut lhs = LinTerm::new();
        for (a, x) in &term.coeffs {
            lhs.add_monomial(a, *x);
        }
        let opened = self.open_lin_comb(lra, &self.work_l);
        for (x, a) in opened.iter() {
            lhs.add_monomial(a, x);
        }
        lhs.c += &opened.c;
        let lhs = self.fix_vars(lra, &lhs);

        let mut rhs_local = LinTerm::new();
        for (i, a) in self.work.iter() {
            rhs_local.add_monomial(a, i);
        }
        rhs_local.c = self.work_c.clone();
        let rhs = self.term_to_external(&self.remove_fresh_vars(&rhs_local));
        lhs.equal_modulo_zero(&rhs)
    }
}
