//! Gcd normalization and the F-rewriting loop.
//!
//! One round takes the first pending entry, finds its smallest
//! coefficient in absolute value, and either solves the entry into S
//! (unit coefficient) or absorbs the non-unit coefficient into a fresh
//! variable. Either way the chosen variable is then eliminated from
//! the rest of F.

use super::{CheckResult, DioEngine, Entry, EntryStatus, FreshDef, ProposedCut};
use crate::lra::Lra;
use crate::rational::{machine_div_rem, rational_sign, sign_of, Rational};
use num_traits::{One, Signed, Zero};
use tracing::{debug, trace};

impl DioEngine {
    /// True if the E-row of `ei` mentions a fresh variable.
    pub(crate) fn has_fresh_var(&self, ei: usize) -> bool {
        self.e_matrix
            .row(ei)
            .iter()
            .any(|cell| self.is_fresh_var(cell.col))
    }

    /// Divide the row by the gcd of its coefficients. Returns false on
    /// a conflict (the gcd does not divide the constant), possibly
    /// leaving a cut proposal behind.
    pub(crate) fn normalize_e_by_gcd(&mut self, lra: &dyn Lra, ei: usize) -> bool {
        let g = self.gcd_of_e_row(ei);
        if g.is_zero() || g.is_one() {
            return true;
        }
        let c_g = &self.entries[ei].c / &g;
        if c_g.is_integer() {
            self.e_matrix.divide_row(ei, &g);
            self.entries[ei].c = c_g;
            self.l_matrix.divide_row(ei, &g);
            debug_assert!(self.entry_invariant(lra, ei));
            return true;
        }
        // sum (a_i/g) x_i = -c/g with a fractional right-hand side has
        // no integer solution; every so often also propose the cut
        // sum (a_i/g) x_i <= floor(-c/g).
        let period = self.settings.cut_from_proof_period;
        if period > 0 && self.stats.calls % period == 0 && !self.has_fresh_var(ei) {
            self.prepare_cut_proposal(ei, &g, &c_g);
        }
        false
    }

    fn prepare_cut_proposal(&mut self, ei: usize, g: &Rational, c_g: &Rational) {
        let mut term: Vec<(Rational, usize)> = self
            .e_matrix
            .row(ei)
            .iter()
            .map(|cell| {
                let e = self
                    .var_register
                    .local_to_external(cell.col)
                    .expect("cut rows contain no fresh variables");
                (&cell.coeff / g, e)
            })
            .collect();
        term.sort_unstable_by_key(|&(_, x)| x);
        let rhs = (-c_g).floor();
        debug!(entry = ei, "proposing cut from gcd conflict");
        self.cut = Some(ProposedCut {
            term,
            rhs,
            is_upper: true,
        });
    }

    /// Normalize every pending entry; on conflict records the entry
    /// index and returns false.
    pub(crate) fn normalize_by_gcd(&mut self, lra: &dyn Lra) -> bool {
        for ei in self.pending.clone() {
            if !self.normalize_e_by_gcd(lra, ei) {
                debug_assert!(self.entry_invariant(lra, ei));
                self.conflict_index = Some(ei);
                return false;
            }
            debug_assert!(self.entry_invariant(lra, ei));
        }
        true
    }

    /// Smallest |coefficient| of the row with its variable and sign;
    /// ties broken towards the smaller variable index.
    fn find_minimal_abs_coeff(&self, ei: usize) -> (Rational, usize, i32) {
        let mut best: Option<(Rational, usize, i32)> = None;
        for cell in self.e_matrix.row(ei) {
            let a = cell.coeff.abs();
            let better = match &best {
                None => true,
                Some((b, k, _)) => a < *b || (a == *b && cell.col < *k),
            };
            if better {
                let one = a.is_one();
                best = Some((a, cell.col, sign_of(&cell.coeff)));
                if one {
                    break;
                }
            }
        }
        best.expect("pivot search on an empty row")
    }

    /// One rewriting step on the head of F.
    pub(crate) fn rewrite_eqs(&mut self, lra: &dyn Lra) {
        let h = loop {
            let Some(&ei) = self.pending.first() else {
                return;
            };
            if !self.e_matrix.row(ei).is_empty() {
                break ei;
            }
            if self.entries[ei].c.is_zero() {
                // 0 = 0, drop from F; the entry slot stays behind.
                self.pending.remove(0);
                continue;
            }
            // 0 = c with c != 0
            self.conflict_index = Some(ei);
            return;
        };
        let (ahk, k, k_sign) = self.find_minimal_abs_coeff(h);
        trace!(entry = h, var = k, "rewrite");
        if ahk.is_one() {
            self.move_entry_from_f_to_s(k, h);
            self.eliminate_var_in_f(lra, h, k, k_sign);
        } else {
            let signed = ahk * rational_sign(k_sign);
            self.fresh_var_step(lra, h, k, &signed);
        }
    }

    /// Use row `ei`, holding `j_sign` at column `j`, to remove `j`
    /// from every other pending row. Solved and detached rows keep
    /// their occurrences.
    pub(crate) fn eliminate_var_in_f(&mut self, lra: &dyn Lra, ei: usize, j: usize, j_sign: i32) {
        debug_assert_eq!(
            self.e_matrix.coeff(ei, j),
            Some(&rational_sign(j_sign))
        );
        loop {
            let cand = self
                .e_matrix
                .column(j)
                .iter()
                .rev()
                .find(|c| c.row != ei && self.entries[c.row].status == EntryStatus::Pending)
                .map(|c| (c.row, c.row_offset));
            let Some((i, row_off)) = cand else { break };
            let coeff = self.e_matrix.row(i)[row_off].coeff.clone();
            let base_c = self.entries[ei].c.clone();
            let delta = rational_sign(j_sign) * &coeff * base_c;
            let new_c = &self.entries[i].c - &delta;
            self.entries[i].c = new_c;
            self.e_matrix.pivot_row_to_row(ei, i, j, j_sign);
            let alpha = -(rational_sign(j_sign) * &coeff);
            self.l_matrix.add_rows(&alpha, ei, i);
            debug_assert!(self.entry_invariant(lra, i));
        }
    }

    /// Empty the E-row of `ei` into the scratch vector, keyed by local
    /// column.
    fn move_row_to_work_vector(&mut self, ei: usize) {
        self.work.clear();
        self.work.resize(self.e_matrix.column_count());
        let cells: Vec<(usize, Rational)> = self
            .e_matrix
            .row(ei)
            .iter()
            .map(|c| (c.col, c.coeff.clone()))
            .collect();
        self.clear_e_row(ei);
        for (j, a) in cells {
            self.work.set_value(j, a);
        }
    }

    /// Step 7 of the algorithm: introduce a fresh variable `xt` so the
    /// minimal coefficient `ahk` (passed with its sign) lands on `xt`,
    /// and append the defining row
    /// `-xt + x_k + sum q_i * x_i + q_c = 0`
    /// where `a_i = q_i * ahk + r_i` and the residues stay in row `h`.
    pub(crate) fn fresh_var_step(&mut self, lra: &dyn Lra, h: usize, k: usize, ahk: &Rational) {
        self.move_row_to_work_vector(h);
        let xt = self.var_register.add_var(None);
        let fresh_row = self.e_matrix.add_row();
        self.e_matrix.add_columns_up_to(xt);
        debug_assert_eq!(fresh_row, self.entries.len());

        let (q, r) = machine_div_rem(&self.entries[h].c, ahk);
        self.entries[h].c = r;
        self.e_matrix.add_new_element(h, xt, ahk.clone());

        self.entries.push(Entry {
            c: q,
            status: EntryStatus::Detached,
        });
        self.e_matrix
            .add_new_element(fresh_row, xt, -Rational::one());
        self.e_matrix.add_new_element(fresh_row, k, Rational::one());
        let items: Vec<(usize, Rational)> = self
            .work
            .iter()
            .map(|(i, a)| (i, a.clone()))
            .collect();
        for (i, ai) in items {
            if i == k {
                continue;
            }
            let (qi, ri) = machine_div_rem(&ai, ahk);
            if !ri.is_zero() {
                self.e_matrix.add_new_element(h, i, ri);
            }
            if !qi.is_zero() {
                self.e_matrix.add_new_element(fresh_row, i, qi);
            }
        }

        // The definition is engine-made, so its certificate is empty.
        self.l_matrix.add_row();

        if k >= self.solved_by.len() {
            self.solved_by.resize(k + 1, None);
        }
        self.solved_by[k] = Some(fresh_row);
        if xt >= self.fresh_defs.len() {
            self.fresh_defs.resize(xt + 1, None);
        }
        self.fresh_defs[xt] = Some(FreshDef {
            def_entry: fresh_row,
            origin: h,
        });
        trace!(origin = h, fresh = xt, "fresh variable step");
        debug_assert!(self.entry_invariant(lra, h));
        debug_assert!(self.entry_invariant(lra, fresh_row));
        self.eliminate_var_in_f(lra, fresh_row, k, 1);
    }

    /// Iterate normalize-then-rewrite until F drains or something
    /// reportable happens.
    pub(crate) fn process_f(&mut self, lra: &dyn Lra) -> CheckResult {
        loop {
            if self.settings.cancelled() {
                return CheckResult::Undef;
            }
            if self.pending.is_empty() {
                return CheckResult::Undef;
            }
            if !self.normalize_by_gcd(lra) {
                if self.cut.is_some() {
                    self.stats.cuts_from_proof += 1;
                    return CheckResult::Branch;
                }
                self.stats.normalize_conflicts += 1;
                debug!(entry = ?self.conflict_index, "gcd conflict");
                return CheckResult::Conflict;
            }
            self.rewrite_eqs(lra);
            if self.conflict_index.is_some() {
                self.stats.rewrite_conflicts += 1;
                return CheckResult::Conflict;
            }
        }
    }
}
