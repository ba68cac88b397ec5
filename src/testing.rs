//! A minimal [`Lra`] implementation backing the test suite.
//!
//! This is not a simplex solver. Real-relaxation feasibility over the
//! registered term equalities is decided by exact rational interval
//! propagation, and values are assigned greedily (integers preferred)
//! with re-propagation after each choice. For the box-plus-equalities
//! systems the tests use this is exact; it makes the engine's contract
//! executable without dragging in the out-of-scope LRA machinery.

use crate::lra::{
    BoundKind, ColIndex, ConstraintIndex, DepId, LpStatus, Lra, Term,
};
use crate::rational::Rational;
use num_traits::{One, Signed, Zero};
use rustc_hash::FxHashSet;

#[derive(Debug, Clone)]
struct BoundData {
    value: Rational,
    strict: bool,
    dep: Option<DepId>,
}

#[derive(Debug, Clone)]
struct Column {
    is_int: bool,
    lower: Option<BoundData>,
    upper: Option<BoundData>,
    value: Rational,
}

impl Column {
    fn new(is_int: bool) -> Self {
        Self {
            is_int,
            lower: None,
            upper: None,
            value: Rational::zero(),
        }
    }
}

#[derive(Debug, Clone)]
enum DepNode {
    Leaf(ConstraintIndex),
    Join(DepId, DepId),
}

#[derive(Debug)]
struct Scope {
    columns: Vec<Column>,
    next_constraint: ConstraintIndex,
    undo_mark: usize,
}

/// Scoped bound store with witness tracking and interval-propagation
/// feasibility, suitable for driving [`crate::DioEngine`] in tests.
#[derive(Debug, Default)]
pub struct TestLra {
    columns: Vec<Column>,
    terms: Vec<Term>,
    deps: Vec<DepNode>,
    scopes: Vec<Scope>,
    next_constraint: ConstraintIndex,
    retired: FxHashSet<ConstraintIndex>,
    status: Option<LpStatus>,
    infeas: Vec<ConstraintIndex>,
    undo_fixed: Vec<ColIndex>,
    replayed: Vec<ColIndex>,
}

impl TestLra {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a plain column.
    pub fn add_column(&mut self, is_int: bool) -> ColIndex {
        self.columns.push(Column::new(is_int));
        self.columns.len() - 1
    }

    /// Register a term `sum coeffs` and allocate its term column.
    pub fn add_term(&mut self, coeffs: &[(i64, ColIndex)], is_int: bool) -> ColIndex {
        let id = self.add_column(is_int);
        let mut term = Term::new(id);
        for &(a, x) in coeffs {
            term.add_monomial(Rational::from_integer(a.into()), x);
        }
        self.terms.push(term);
        id
    }

    /// Drop a registered term. The engine's removal hook must run
    /// before this, while the term is still queryable.
    pub fn remove_term(&mut self, tid: ColIndex) {
        self.terms.retain(|t| t.id != tid);
    }

    fn leaf(&mut self, ci: ConstraintIndex) -> DepId {
        self.deps.push(DepNode::Leaf(ci));
        self.deps.len() - 1
    }

    fn set_bound(&mut self, j: ColIndex, kind: BoundKind, value: Rational, dep: Option<DepId>) {
        let col = &mut self.columns[j];
        let slot = match kind {
            BoundKind::Le => &mut col.upper,
            BoundKind::Ge => &mut col.lower,
        };
        let improves = match (&kind, slot.as_ref()) {
            (_, None) => true,
            (BoundKind::Le, Some(b)) => value < b.value,
            (BoundKind::Ge, Some(b)) => value > b.value,
        };
        if improves {
            *slot = Some(BoundData {
                value,
                strict: false,
                dep,
            });
        }
    }

    /// Assert a bound as a user constraint and return its index.
    pub fn add_bound(&mut self, j: ColIndex, kind: BoundKind, value: Rational) -> ConstraintIndex {
        let ci = self.next_constraint;
        self.next_constraint += 1;
        let dep = Some(self.leaf(ci));
        self.set_bound(j, kind, value, dep);
        ci
    }

    /// Fix a column to `v` with two bound constraints.
    pub fn fix_column(&mut self, j: ColIndex, v: Rational) -> (ConstraintIndex, ConstraintIndex) {
        let lo = self.add_bound(j, BoundKind::Ge, v.clone());
        let hi = self.add_bound(j, BoundKind::Le, v);
        (lo, hi)
    }

    fn term_index(&self, j: ColIndex) -> Option<usize> {
        self.terms.iter().position(|t| t.id == j)
    }

    /// Number of open scopes; zero once every push was popped.
    pub fn scope_depth(&self) -> usize {
        self.scopes.len()
    }

    // ----- interval propagation -----

    fn initial_box(&self) -> (Vec<Option<Rational>>, Vec<Option<Rational>>) {
        let lo = self
            .columns
            .iter()
            .map(|c| c.lower.as_ref().map(|b| b.value.clone()))
            .collect();
        let hi = self
            .columns
            .iter()
            .map(|c| c.upper.as_ref().map(|b| b.value.clone()))
            .collect();
        (lo, hi)
    }

    fn box_is_empty(lo: &[Option<Rational>], hi: &[Option<Rational>]) -> bool {
        lo.iter()
            .zip(hi.iter())
            .any(|(l, h)| matches!((l, h), (Some(l), Some(h)) if l > h))
    }

    /// Interval of `c * x` for `x` in `[lo, hi]` (None is unbounded).
    fn scaled(
        c: &Rational,
        lo: &Option<Rational>,
        hi: &Option<Rational>,
    ) -> (Option<Rational>, Option<Rational>) {
        if c.is_positive() {
            (lo.as_ref().map(|v| c * v), hi.as_ref().map(|v| c * v))
        } else {
            (hi.as_ref().map(|v| c * v), lo.as_ref().map(|v| c * v))
        }
    }

    fn add_opt(a: Option<Rational>, b: Option<Rational>) -> Option<Rational> {
        match (a, b) {
            (Some(a), Some(b)) => Some(a + b),
            _ => None,
        }
    }

    /// Narrow the box by the term equalities until fixpoint (bounded
    /// round count). `Err` means the box emptied.
    fn propagate(
        &self,
        lo: &mut [Option<Rational>],
        hi: &mut [Option<Rational>],
    ) -> Result<(), ()> {
        if Self::box_is_empty(lo, hi) {
            return Err(());
        }
        for _ in 0..50 {
            let mut changed = false;
            for term in &self.terms {
                let parts: Vec<(Rational, ColIndex)> = term.ext_coeffs().collect();
                for idx in 0..parts.len() {
                    let (cv, v) = &parts[idx];
                    // solve  cv * x_v = -(sum of the others)
                    let mut sum_lo = Some(Rational::zero());
                    let mut sum_hi = Some(Rational::zero());
                    for (k, (cw, w)) in parts.iter().enumerate() {
                        if k == idx {
                            continue;
                        }
                        let (a, b) = Self::scaled(cw, &lo[*w], &hi[*w]);
                        sum_lo = Self::add_opt(sum_lo, a);
                        sum_hi = Self::add_opt(sum_hi, b);
                    }
                    let factor = -(Rational::one() / cv);
                    let (nl, nh) = if factor.is_positive() {
                        (
                            sum_lo.map(|v| &factor * v),
                            sum_hi.map(|v| &factor * v),
                        )
                    } else {
                        (
                            sum_hi.map(|v| &factor * v),
                            sum_lo.map(|v| &factor * v),
                        )
                    };
                    if let Some(nl) = nl {
                        if lo[*v].as_ref().map_or(true, |cur| nl > *cur) {
                            lo[*v] = Some(nl);
                            changed = true;
                        }
                    }
                    if let Some(nh) = nh {
                        if hi[*v].as_ref().map_or(true, |cur| nh < *cur) {
                            hi[*v] = Some(nh);
                            changed = true;
                        }
                    }
                    if let (Some(l), Some(h)) = (&lo[*v], &hi[*v]) {
                        if l > h {
                            return Err(());
                        }
                    }
                }
            }
            if !changed {
                break;
            }
        }
        Ok(())
    }

    /// Candidate values for column `j` within its narrowed interval,
    /// integers first for integer columns.
    fn candidates(&self, j: ColIndex, lo: &Option<Rational>, hi: &Option<Rational>) -> Vec<Rational> {
        let mut out: Vec<Rational> = Vec::new();
        if self.columns[j].is_int {
            let int_candidate = match (lo, hi) {
                (Some(l), Some(h)) => {
                    let c = l.ceil();
                    (c <= *h).then_some(c)
                }
                (Some(l), None) => Some(l.ceil()),
                (None, Some(h)) => Some(h.floor()),
                (None, None) => Some(Rational::zero()),
            };
            if let Some(c) = int_candidate {
                out.push(c);
            }
        }
        if let Some(l) = lo {
            if !out.contains(l) {
                out.push(l.clone());
            }
        }
        if let Some(h) = hi {
            if !out.contains(h) {
                out.push(h.clone());
            }
        }
        if out.is_empty() {
            out.push(Rational::zero());
        }
        out
    }

    fn mark_infeasible(&mut self) {
        self.status = Some(LpStatus::Infeasible);
        let mut out: Vec<ConstraintIndex> = Vec::new();
        for col in &self.columns {
            for b in [&col.lower, &col.upper].into_iter().flatten() {
                out.extend(self.flatten(b.dep));
            }
        }
        out.sort_unstable();
        out.dedup();
        self.infeas = out;
    }
}

impl Lra for TestLra {
    fn column_count(&self) -> usize {
        self.columns.len()
    }

    fn column_is_int(&self, j: ColIndex) -> bool {
        self.columns[j].is_int
    }

    fn column_is_fixed(&self, j: ColIndex) -> bool {
        match (&self.columns[j].lower, &self.columns[j].upper) {
            (Some(l), Some(h)) => !l.strict && !h.strict && l.value == h.value,
            _ => false,
        }
    }

    fn column_is_free(&self, j: ColIndex) -> bool {
        self.columns[j].lower.is_none() && self.columns[j].upper.is_none()
    }

    fn column_has_term(&self, j: ColIndex) -> bool {
        self.term_index(j).is_some()
    }

    fn lower_bound(&self, j: ColIndex) -> Rational {
        self.columns[j]
            .lower
            .as_ref()
            .expect("lower bound queried but absent")
            .value
            .clone()
    }

    fn upper_bound(&self, j: ColIndex) -> Rational {
        self.columns[j]
            .upper
            .as_ref()
            .expect("upper bound queried but absent")
            .value
            .clone()
    }

    fn bound_of_type(
        &self,
        j: ColIndex,
        upper: bool,
    ) -> Option<(Rational, bool, Option<DepId>)> {
        let b = if upper {
            self.columns[j].upper.as_ref()
        } else {
            self.columns[j].lower.as_ref()
        }?;
        Some((b.value.clone(), b.strict, b.dep))
    }

    fn column_lower_bound_witness(&self, j: ColIndex) -> Option<DepId> {
        self.columns[j].lower.as_ref().and_then(|b| b.dep)
    }

    fn column_upper_bound_witness(&self, j: ColIndex) -> Option<DepId> {
        self.columns[j].upper.as_ref().and_then(|b| b.dep)
    }

    fn column_bound_witnesses(&mut self, j: ColIndex) -> Option<DepId> {
        let lo = self.column_lower_bound_witness(j);
        let hi = self.column_upper_bound_witness(j);
        self.mk_join(lo, hi)
    }

    fn get_term(&self, j: ColIndex) -> &Term {
        let idx = self.term_index(j).expect("no term behind column");
        &self.terms[idx]
    }

    fn terms(&self) -> Vec<ColIndex> {
        self.terms.iter().map(|t| t.id).collect()
    }

    fn update_column_type_and_bound(
        &mut self,
        j: ColIndex,
        kind: BoundKind,
        value: Rational,
        dep: Option<DepId>,
    ) {
        self.set_bound(j, kind, value, dep);
    }

    fn add_var_bound(&mut self, j: ColIndex, kind: BoundKind, value: Rational) -> ConstraintIndex {
        self.add_bound(j, kind, value)
    }

    fn mk_join(&mut self, a: Option<DepId>, b: Option<DepId>) -> Option<DepId> {
        match (a, b) {
            (None, x) => x,
            (x, None) => x,
            (Some(a), Some(b)) => {
                self.deps.push(DepNode::Join(a, b));
                Some(self.deps.len() - 1)
            }
        }
    }

    fn flatten(&self, dep: Option<DepId>) -> Vec<ConstraintIndex> {
        let mut out = Vec::new();
        let mut stack: Vec<DepId> = dep.into_iter().collect();
        while let Some(d) = stack.pop() {
            match &self.deps[d] {
                DepNode::Leaf(ci) => out.push(*ci),
                DepNode::Join(a, b) => {
                    stack.push(*a);
                    stack.push(*b);
                }
            }
        }
        out.sort_unstable();
        out.dedup();
        out
    }

    fn push(&mut self) {
        self.scopes.push(Scope {
            columns: self.columns.clone(),
            next_constraint: self.next_constraint,
            undo_mark: self.undo_fixed.len(),
        });
    }

    fn pop(&mut self) {
        let scope = self.scopes.pop().expect("pop without matching push");
        for j in self.undo_fixed.split_off(scope.undo_mark) {
            self.replayed.push(j);
        }
        for ci in scope.next_constraint..self.next_constraint {
            self.retired.insert(ci);
        }
        self.columns = scope.columns;
    }

    fn find_feasible_solution(&mut self) -> LpStatus {
        let (mut lo, mut hi) = self.initial_box();
        if self.propagate(&mut lo, &mut hi).is_err() {
            self.mark_infeasible();
            return LpStatus::Infeasible;
        }
        for j in 0..self.columns.len() {
            let mut chosen: Option<Rational> = None;
            for v in self.candidates(j, &lo[j], &hi[j]) {
                let mut lo2 = lo.to_vec();
                let mut hi2 = hi.to_vec();
                lo2[j] = Some(v.clone());
                hi2[j] = Some(v.clone());
                if self.propagate(&mut lo2, &mut hi2).is_ok() {
                    lo = lo2;
                    hi = hi2;
                    chosen = Some(v);
                    break;
                }
            }
            match chosen {
                Some(v) => self.columns[j].value = v,
                None => {
                    self.mark_infeasible();
                    return LpStatus::Infeasible;
                }
            }
        }
        self.infeas.clear();
        self.status = Some(LpStatus::Feasible);
        LpStatus::Feasible
    }

    fn get_status(&self) -> LpStatus {
        self.status.unwrap_or(LpStatus::Feasible)
    }

    fn get_infeasibility_explanation(&self) -> Vec<ConstraintIndex> {
        self.infeas.clone()
    }

    fn column_value(&self, j: ColIndex) -> Rational {
        self.columns[j].value.clone()
    }

    fn r_basis(&self) -> Vec<ColIndex> {
        (0..self.columns.len()).collect()
    }

    fn column_is_int_inf(&self, j: ColIndex) -> bool {
        self.columns[j].is_int && !self.columns[j].value.is_integer()
    }

    fn constraint_is_valid(&self, ci: ConstraintIndex) -> bool {
        ci < self.next_constraint && !self.retired.contains(&ci)
    }

    fn push_bound_change_undo(&mut self, j: ColIndex) {
        self.undo_fixed.push(j);
    }

    fn take_replayed_bound_changes(&mut self) -> Vec<ColIndex> {
        std::mem::take(&mut self.replayed)
    }
}
