//! Bounded branch-and-bound over integer-infeasible columns.
//!
//! Branches are trial bounds `x_j <= rs` / `x_j >= rs + 1` pushed onto
//! the LRA behind a scope. Every exit path unwinds exactly the scopes
//! it pushed, so `lra_level` always mirrors the branch stack between
//! iterations.

use super::{CheckResult, DioEngine};
use crate::lra::{BoundKind, ColIndex, LpStatus, Lra};
use crate::rational::{gcd, Rational};
use num_traits::{One, Zero};
use tracing::{debug, trace};

/// One trial bound: `x_j <= rs` when `left`, else `x_j >= rs + 1`.
#[derive(Debug, Clone)]
pub(crate) struct Branch {
    pub j: ColIndex,
    pub rs: Rational,
    pub left: bool,
    pub fully_explored: bool,
}

impl Branch {
    fn flip(&mut self) {
        debug_assert!(!self.fully_explored);
        self.left = !self.left;
        self.fully_explored = true;
    }
}

/// Running record of how many integer-infeasible columns remained
/// after branching each way on a column. The score is the better of
/// the two averages; no data means infinity, so unexplored columns
/// are tried eagerly.
#[derive(Debug, Clone, Default)]
pub(crate) struct ColumnBranchStats {
    ii_after_left: Vec<u64>,
    ii_after_right: Vec<u64>,
}

impl ColumnBranchStats {
    fn score(&self) -> f64 {
        fn avg(v: &[u64]) -> f64 {
            if v.is_empty() {
                f64::INFINITY
            } else {
                v.iter().sum::<u64>() as f64 / v.len() as f64
            }
        }
        f64::min(avg(&self.ii_after_left), avg(&self.ii_after_right))
    }
}

impl DioEngine {
    fn get_number_of_int_inf(&self, lra: &dyn Lra) -> usize {
        lra.r_basis()
            .into_iter()
            .filter(|&j| lra.column_is_int_inf(j))
            .count()
    }

    fn get_branch_score(&mut self, j: ColIndex) -> f64 {
        if j >= self.column_branch_stats.len() {
            self.column_branch_stats
                .resize(j + 1, ColumnBranchStats::default());
        }
        self.column_branch_stats[j].score()
    }

    fn record_branch_stats(&mut self, j: ColIndex, left: bool, n_of_ii: u64) {
        if j >= self.column_branch_stats.len() {
            self.column_branch_stats
                .resize(j + 1, ColumnBranchStats::default());
        }
        let slot = &mut self.column_branch_stats[j];
        if left {
            slot.ii_after_left.push(n_of_ii);
        } else {
            slot.ii_after_right.push(n_of_ii);
        }
    }

    /// Pick the int-infeasible column with the best score, random on
    /// ties. `None` means no integer-infeasible column is left.
    fn create_branch(&mut self, lra: &mut dyn Lra) -> Option<Branch> {
        let mut bj: Option<ColIndex> = None;
        let mut score = f64::INFINITY;
        let mut ties: u64 = 0;
        for j in lra.r_basis() {
            if !lra.column_is_int_inf(j) {
                continue;
            }
            let sc = self.get_branch_score(j);
            let take = sc < score || (sc == score && {
                ties += 1;
                self.settings.random_next() % ties == 0
            });
            if take {
                score = sc;
                bj = Some(j);
            }
        }
        let bj = bj?;
        let br = Branch {
            j: bj,
            left: self.settings.random_next() % 2 == 0,
            rs: lra.column_value(bj).floor(),
            fully_explored: false,
        };
        trace!(column = br.j, left = br.left, "created branch");
        Some(br)
    }

    fn push_branch(&mut self, lra: &mut dyn Lra) -> bool {
        let Some(br) = self.create_branch(lra) else {
            return false;
        };
        self.branch_stack.push(br);
        self.stats.branching_depth =
            std::cmp::max(self.stats.branching_depth, self.branch_stack.len() as u64);
        true
    }

    fn lra_push(&mut self, lra: &mut dyn Lra) {
        self.lra_level += 1;
        lra.push();
        debug_assert_eq!(self.lra_level, self.branch_stack.len());
    }

    fn lra_pop(&mut self, lra: &mut dyn Lra) {
        debug_assert!(self.lra_level > 0);
        self.lra_level -= 1;
        lra.pop();
        lra.find_feasible_solution();
        debug_assert!(
            lra.get_status() == LpStatus::Cancelled || lra.get_status().is_feasible()
        );
    }

    /// Unwind everything pushed during this branching episode.
    fn undo_branching(&mut self, lra: &mut dyn Lra) {
        while self.lra_level > 0 {
            self.lra_level -= 1;
            lra.pop();
        }
        lra.find_feasible_solution();
        self.branch_stack.clear();
    }

    /// Pop branches that have had both directions tried.
    fn undo_explored_branches(&mut self, lra: &mut dyn Lra) {
        while self
            .branch_stack
            .last()
            .map_or(false, |b| b.fully_explored)
        {
            self.branch_stack.pop();
            self.lra_pop(lra);
        }
    }

    fn collect_evidence(&mut self, lra: &dyn Lra) {
        let expl = lra.get_infeasibility_explanation();
        self.infeas_explanation = expl.clone();
        self.branch_explanations.extend(expl);
    }

    /// Keep only the collected witnesses that still name live
    /// constraints; branch bounds die with their scopes.
    fn transfer_explanations_from_closed_branches(&mut self, lra: &dyn Lra) {
        self.infeas_explanation.clear();
        for &ci in &self.branch_explanations {
            if lra.constraint_is_valid(ci) {
                self.infeas_explanation.push(ci);
            }
        }
    }

    /// Fixing `j` can only break the entry that substitutes it: the
    /// gcd of the other coefficients must divide the folded constant.
    fn check_fixing(&self, lra: &dyn Lra, j: usize) -> bool {
        let ei = self.entry_for_subs(j);
        let mut g = Rational::zero();
        let mut c = self.entries[ei].c.clone();
        for cell in self.e_matrix.row(ei) {
            if cell.col == j {
                let e = self
                    .var_register
                    .local_to_external(j)
                    .expect("a branch fixes an external column");
                debug_assert!(cell.coeff.is_one() || (-&cell.coeff).is_one());
                c += &cell.coeff * &lra.lower_bound(e);
                continue;
            }
            g = gcd(&g, &cell.coeff);
            if g.is_one() {
                return false;
            }
        }
        if g.is_zero() {
            return !c.is_zero();
        }
        !(c / g).is_integer()
    }

    /// Local variable `j` just became fixed. Returns true on conflict,
    /// accumulating the solving row's fixed witnesses.
    pub(crate) fn fix_var(&mut self, lra: &mut dyn Lra, j: usize) -> bool {
        if !self.can_substitute(j) {
            return false;
        }
        if !self.check_fixing(&*lra, j) {
            return false;
        }
        let ei = self.entry_for_subs(j);
        let dep = self.explain_fixed_in_l_row(lra, ei);
        let flat = lra.flatten(dep);
        self.branch_explanations.extend(flat);
        true
    }

    /// Apply the top branch's bound. Returns true on conflict.
    fn add_var_bound_for_branch(&mut self, lra: &mut dyn Lra) -> bool {
        let (j, rs, left) = {
            let b = self.branch_stack.last().expect("a branch is on the stack");
            (b.j, b.rs.clone(), b.left)
        };
        if left {
            lra.add_var_bound(j, BoundKind::Le, rs);
        } else {
            lra.add_var_bound(j, BoundKind::Ge, rs + Rational::one());
        }
        self.column_bound_changed(lra, j);
        if lra.column_is_fixed(j) {
            if let Some(lj) = self.var_register.external_to_local(j) {
                if self.fix_var(lra, lj) {
                    debug!(column = j, "conflict while fixing branched column");
                    return true;
                }
            }
        }
        false
    }

    /// Depth-first search with direction flipping, bounded by the
    /// iteration budget.
    pub(crate) fn branching_on_undef(&mut self, lra: &mut dyn Lra) -> CheckResult {
        self.branch_explanations.clear();
        let mut need_create_branch = true;
        self.iterations = 0;
        loop {
            self.iterations += 1;
            if self.iterations >= self.max_iterations {
                break;
            }
            self.stats.branch_iterations += 1;
            if self.settings.cancelled() {
                self.undo_branching(lra);
                return CheckResult::Undef;
            }
            if need_create_branch {
                if !self.push_branch(lra) {
                    // no integer-infeasible column remains
                    self.undo_branching(lra);
                    self.stats.branching_sats += 1;
                    return CheckResult::Sat;
                }
                need_create_branch = false;
            }
            self.lra_push(lra);
            if self.add_var_bound_for_branch(lra) {
                self.undo_explored_branches(lra);
                if self.branch_stack.is_empty() {
                    self.stats.branching_infeasibles += 1;
                    self.transfer_explanations_from_closed_branches(&*lra);
                    return CheckResult::Conflict;
                }
                need_create_branch = false;
                self.branch_stack
                    .last_mut()
                    .expect("stack checked non-empty")
                    .flip();
                self.lra_pop(lra);
                continue;
            }
            let st = lra.find_feasible_solution();
            if st.is_feasible() {
                let n_of_ii = self.get_number_of_int_inf(&*lra);
                trace!(int_infeasible = n_of_ii, "feasible branch node");
                if n_of_ii == 0 {
                    self.undo_branching(lra);
                    self.stats.branching_sats += 1;
                    return CheckResult::Sat;
                }
                let (j, left) = {
                    let b = self.branch_stack.last().expect("a branch is on the stack");
                    (b.j, b.left)
                };
                self.record_branch_stats(j, left, n_of_ii as u64);
                need_create_branch = true;
            } else {
                if st == LpStatus::Cancelled {
                    self.undo_branching(lra);
                    return CheckResult::Undef;
                }
                self.collect_evidence(&*lra);
                self.undo_explored_branches(lra);
                if self.branch_stack.is_empty() {
                    self.stats.branching_infeasibles += 1;
                    self.transfer_explanations_from_closed_branches(&*lra);
                    return CheckResult::Conflict;
                }
                need_create_branch = false;
                self.lra_pop(lra);
                self.branch_stack
                    .last_mut()
                    .expect("stack checked non-empty")
                    .flip();
            }
        }
        self.undo_branching(lra);
        CheckResult::Undef
    }
}
