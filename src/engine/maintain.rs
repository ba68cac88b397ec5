//! Incremental upkeep: term registration and removal, changed-column
//! replay, entry recomputation, matrix shrinking.
//!
//! The driver forwards LRA events through the three public hooks in
//! arrival order. Work is queued and replayed at the start of the next
//! `check()`, except that removing an already-materialized term
//! shrinks the matrices eagerly, while the term is still queryable.

use super::{DioEngine, Entry, EntryStatus};
use crate::lra::{ColIndex, Lra, Term};
use crate::rational::{denominator, lcm, Rational};
use num_traits::{One, Zero};
use rustc_hash::FxHashSet;
use tracing::{debug, trace};

impl DioEngine {
    /// Hook: a term was registered with the LRA. Non-integer terms and
    /// terms over non-integer variables are not represented.
    pub fn term_added(&mut self, lra: &dyn Lra, j: ColIndex) {
        if !lra.column_is_int(j) {
            return;
        }
        let term = lra.get_term(j);
        if !self.all_vars_are_int(lra, term) {
            return;
        }
        self.added_terms.push(j);
    }

    /// Hook: a term is being removed from the LRA. The term must still
    /// answer `lra.get_term(j)` during this call.
    pub fn term_removed(&mut self, lra: &dyn Lra, j: ColIndex) {
        if !self.active_terms.contains(&j) {
            // never materialized; forget the queued registration
            if let Some(p) = self.added_terms.iter().position(|&t| t == j) {
                self.added_terms.swap_remove(p);
            }
            return;
        }
        debug!(term = j, "removing active term");
        let term = lra.get_term(j).clone();
        for (_, x) in term.ext_coeffs() {
            if let Some(set) = self.columns_to_terms.get_mut(&x) {
                set.remove(&j);
                if set.is_empty() {
                    self.columns_to_terms.remove(&x);
                }
            }
        }
        self.active_terms.remove(&j);
        self.shrink_after_term_removal(lra, j);
    }

    /// Hook: the bounds of column `j` changed. Only integer columns
    /// that became fixed require recomputation; the change is recorded
    /// in the LRA's trail so backtracking re-reports it.
    pub fn column_bound_changed(&mut self, lra: &mut dyn Lra, j: ColIndex) {
        if !lra.column_is_int(j) || !lra.column_is_fixed(j) {
            return;
        }
        self.changed_columns.insert(j);
        lra.push_bound_change_undo(j);
    }

    /// Start-of-check replay: pick up trail-replayed bound changes,
    /// recompute affected entries, then materialize queued terms.
    pub(crate) fn init(&mut self, lra: &mut dyn Lra) {
        self.cut = None;
        self.conflict_index = None;
        self.infeas_explanation.clear();
        self.iterations = 0;
        self.branch_stack.clear();
        self.lra_level = 0;
        for j in lra.take_replayed_bound_changes() {
            self.changed_columns.insert(j);
        }
        self.process_changed_columns(&*lra);
        let queued = std::mem::take(&mut self.added_terms);
        for tid in queued {
            self.active_terms.insert(tid);
            let term = lra.get_term(tid).clone();
            self.fill_entry(&*lra, &term);
            self.register_columns_to_term(&term);
        }
        debug_assert!(self.is_in_sync(&*lra));
        debug_assert!(self.entries_are_ok(&*lra));
    }

    /// Create the entry for term `t`: certificate row `(t.id, 1)`, and
    /// an E-row holding the non-fixed monomials of
    /// `sum a_i * x_i - x_id` with the fixed ones folded into the
    /// constant.
    pub(crate) fn fill_entry(&mut self, lra: &dyn Lra, term: &Term) {
        let ei = self.entries.len();
        self.pending.push(ei);
        self.entries.push(Entry {
            c: Rational::zero(),
            status: EntryStatus::Pending,
        });
        let lrow = self.l_matrix.add_row();
        debug_assert_eq!(lrow, ei);
        self.l_matrix.add_columns_up_to(term.id);
        self.l_matrix.add_new_element(ei, term.id, Rational::one());

        let erow = self.e_matrix.add_row();
        debug_assert_eq!(erow, ei);
        for (a, x) in term.ext_coeffs() {
            debug_assert!(a.is_integer());
            if lra.column_is_fixed(x) {
                self.entries[ei].c += &a * &lra.lower_bound(x);
            } else {
                let lj = self.var_register.add_var(Some(x));
                self.e_matrix.add_columns_up_to(lj);
                self.e_matrix.add_new_element(ei, lj, a);
            }
        }
        trace!(term = term.id, entry = ei, "entry created");
        debug_assert!(self.entry_invariant(lra, ei));
    }

    pub(crate) fn register_columns_to_term(&mut self, term: &Term) {
        for (_, x) in term.ext_coeffs() {
            self.columns_to_terms.entry(x).or_default().insert(term.id);
        }
    }

    /// Recompute the E-row and constant of `ei` from its certificate
    /// row, folding currently-fixed variables and rescaling so all
    /// coefficients are integral again.
    pub(crate) fn recalculate_entry(&mut self, lra: &dyn Lra, ei: usize) {
        trace!(entry = ei, "recalculating entry");
        let mut c = self.open_l_row_to_work_vector(lra, ei);
        self.clear_e_row(ei);
        let mut denom = Rational::one();
        let items: Vec<(usize, Rational)> = self
            .work
            .iter()
            .map(|(x, a)| (x, a.clone()))
            .collect();
        for (x, a) in items {
            let lj = self.var_register.add_var(Some(x));
            self.e_matrix.add_columns_up_to(lj);
            self.e_matrix.add_new_element(ei, lj, a.clone());
            let d = denominator(&a);
            if !d.is_one() {
                denom = lcm(&denom, &d);
            }
        }
        if !denom.is_one() {
            c *= &denom;
            self.l_matrix.multiply_row(ei, &denom);
            self.e_matrix.multiply_row(ei, &denom);
        }
        self.entries[ei].c = c;
        debug_assert!(self.entry_invariant(lra, ei));
    }

    /// Expand certificate row `ei` over the LRA terms into the scratch
    /// vector, keyed by external column; returns the folded constant.
    fn open_l_row_to_work_vector(&mut self, lra: &dyn Lra, ei: usize) -> Rational {
        self.work.clear();
        let mut c = Rational::zero();
        let l_cells: Vec<(usize, Rational)> = self
            .l_matrix
            .row(ei)
            .iter()
            .map(|cell| (cell.col, cell.coeff.clone()))
            .collect();
        for (tid, a) in l_cells {
            let term = lra.get_term(tid);
            for (b, x) in term.ext_coeffs() {
                if lra.column_is_fixed(x) {
                    c += &a * &b * lra.lower_bound(x);
                } else {
                    self.work.resize(x + 1);
                    self.work.add_value(x, &a * &b);
                }
            }
        }
        c
    }

    /// Replay `changed_columns`: entries touching a changed column
    /// (directly in E, or through a term mentioned by their
    /// certificate) are recomputed and demoted to F; fresh definitions
    /// invalidated by the recomputation are dismantled first.
    pub(crate) fn process_changed_columns(&mut self, lra: &dyn Lra) {
        if self.changed_columns.is_empty() {
            return;
        }
        let mut to_recalc: FxHashSet<usize> = FxHashSet::default();
        let mut changed_terms: FxHashSet<ColIndex> = FxHashSet::default();
        let mut cols: Vec<ColIndex> = self.changed_columns.iter().copied().collect();
        cols.sort_unstable();
        // A changed column past the LRA's width belongs to retracted
        // state; its links are already gone, so the lookups miss.
        for j in cols {
            if let Some(ts) = self.columns_to_terms.get(&j) {
                changed_terms.extend(ts.iter().copied());
            }
            if let Some(lj) = self.var_register.external_to_local(j) {
                for cell in self.e_matrix.column(lj) {
                    to_recalc.insert(cell.row);
                }
            }
        }
        let mut terms_sorted: Vec<ColIndex> = changed_terms.into_iter().collect();
        terms_sorted.sort_unstable();
        for tid in terms_sorted {
            if tid < self.l_matrix.column_count() {
                for cell in self.l_matrix.column(tid) {
                    to_recalc.insert(cell.row);
                }
            }
        }

        // Dismantle fresh definitions rooted in rows about to be
        // recomputed. Removals extend the recomputation set, so scan
        // until no candidate remains.
        loop {
            let mut fresh_to_remove: Vec<usize> = (0..self.fresh_defs.len())
                .filter(|&xt| {
                    self.fresh_defs[xt].is_some_and(|fd| {
                        to_recalc.contains(&fd.origin) || to_recalc.contains(&fd.def_entry)
                    })
                })
                .collect();
            if fresh_to_remove.is_empty() {
                break;
            }
            while let Some(xt) = fresh_to_remove.pop() {
                let Some(fd) = self.fresh_defs[xt] else { continue };
                let last = self.entries.len() - 1;
                if fd.def_entry != last {
                    self.transpose_entries(fd.def_entry, last);
                    if to_recalc.remove(&last) {
                        to_recalc.insert(fd.def_entry);
                    }
                }
                if xt < self.e_matrix.column_count() {
                    for cell in self.e_matrix.column(xt) {
                        to_recalc.insert(cell.row);
                    }
                }
                self.fresh_defs[xt] = None;
                self.remove_last_entry();
                self.l_matrix.remove_last_row();
                self.e_matrix.remove_last_row();
            }
        }

        let mut recalc: Vec<usize> = to_recalc
            .into_iter()
            .filter(|&k| k < self.entries.len())
            .collect();
        recalc.sort_unstable();
        for k in recalc {
            self.recalculate_entry(lra, k);
            self.move_entry_from_s_to_f(k);
        }
        self.e_matrix.trim_empty_tail_columns();
        self.var_register.shrink(self.e_matrix.column_count());
        self.l_matrix.trim_empty_tail_columns();
        self.changed_columns.clear();
    }

    /// Swap entries `i` and `k` in every indirection: both matrices,
    /// the F/S lists, the pivot map and the fresh definitions.
    pub(crate) fn transpose_entries(&mut self, i: usize, k: usize) {
        debug_assert_ne!(i, k);
        self.l_matrix.transpose_rows(i, k);
        self.e_matrix.transpose_rows(i, k);
        self.remove_entry_from_lists(i);
        self.remove_entry_from_lists(k);
        self.entries.swap(i, k);
        self.add_entry_to_lists(i);
        self.add_entry_to_lists(k);
        for slot in self.fresh_defs.iter_mut() {
            if let Some(fd) = slot {
                if fd.def_entry == i {
                    fd.def_entry = k;
                } else if fd.def_entry == k {
                    fd.def_entry = i;
                }
                if fd.origin == i {
                    fd.origin = k;
                } else if fd.origin == k {
                    fd.origin = i;
                }
            }
        }
        for slot in self.solved_by.iter_mut() {
            if *slot == Some(i) {
                *slot = Some(k);
            } else if *slot == Some(k) {
                *slot = Some(i);
            }
        }
    }

    /// Remove the entry backing term column `tid`: confine the column
    /// to the last certificate row, recompute the rows the pivoting
    /// touched, then drop the last row of both matrices and trim.
    fn shrink_after_term_removal(&mut self, lra: &dyn Lra, tid: ColIndex) {
        let removed = self.l_matrix.row_count() - 1;
        self.eliminate_last_term_column(lra, tid);
        self.l_matrix.remove_last_row();
        self.e_matrix.remove_last_row();
        self.l_matrix.trim_empty_tail_columns();
        self.e_matrix.trim_empty_tail_columns();
        self.var_register.shrink(self.e_matrix.column_count());
        for slot in self.fresh_defs.iter_mut() {
            if let Some(fd) = slot {
                if fd.origin == removed || fd.def_entry == removed {
                    *slot = None;
                }
            }
        }
        self.remove_last_entry();
    }

    /// Zero out column `tid` of L everywhere except the last row.
    /// Terms are retracted most-recent-first, so the dead term column
    /// is the tail column of L.
    fn eliminate_last_term_column(&mut self, lra: &dyn Lra, tid: ColIndex) {
        let j = self.l_matrix.column_count() - 1;
        debug_assert_eq!(j, tid);
        let last_row = self.l_matrix.row_count() - 1;
        if self.l_matrix.coeff(last_row, j).is_none() {
            let i = self
                .l_matrix
                .column(j)
                .first()
                .expect("a removed term column must appear in some certificate")
                .row;
            self.l_matrix.add_rows(&Rational::one(), i, last_row);
        }
        let alpha = self
            .l_matrix
            .coeff(last_row, j)
            .expect("column cell just ensured")
            .clone();
        self.l_matrix.divide_row(last_row, &alpha);

        let mut rows_to_change: Vec<usize> = Vec::new();
        loop {
            let cand = self
                .l_matrix
                .column(j)
                .iter()
                .rev()
                .find(|c| c.row != last_row)
                .map(|c| c.row);
            let Some(i) = cand else { break };
            self.l_matrix.pivot_row_to_row(last_row, i, j, 1);
            rows_to_change.push(i);
        }
        for i in rows_to_change {
            self.recalculate_entry(lra, i);
            self.move_entry_from_s_to_f(i);
        }
    }
}
