//! Port to the enclosing linear-real-arithmetic solver.
//!
//! The engine never owns the LRA; every entry point receives it as a
//! `&mut dyn Lra` parameter, the way the branch-and-cut layer receives
//! its relaxation solver. Terms and explanation dependencies are
//! addressed by plain handles, never by pointers into the LRA.

use crate::rational::Rational;
use num_bigint::BigInt;
use smallvec::SmallVec;

/// LRA column identifier. Term columns share this space.
pub type ColIndex = usize;

/// Identifier of an asserted constraint, the currency of explanations.
pub type ConstraintIndex = usize;

/// Handle into the LRA's dependency algebra.
pub type DepId = usize;

/// Direction of a bound update.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BoundKind {
    /// `x <= v`
    Le,
    /// `x >= v`
    Ge,
}

/// Result of an LRA feasibility run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LpStatus {
    Optimal,
    Feasible,
    Infeasible,
    Cancelled,
}

impl LpStatus {
    pub fn is_feasible(self) -> bool {
        matches!(self, LpStatus::Optimal | LpStatus::Feasible)
    }
}

/// A named linear form `x_id = sum a_i * x_i` exposed by the LRA.
///
/// The engine reads it as the equation `sum a_i * x_i - x_id = 0`.
#[derive(Debug, Clone)]
pub struct Term {
    /// The column standing for the term itself.
    pub id: ColIndex,
    /// Monomials of the defining sum; variables are distinct.
    pub coeffs: SmallVec<[(Rational, ColIndex); 4]>,
}

impl Term {
    pub fn new(id: ColIndex) -> Self {
        Self {
            id,
            coeffs: SmallVec::new(),
        }
    }

    /// Add `a * x`, merging with an existing monomial on `x`.
    pub fn add_monomial(&mut self, a: Rational, x: ColIndex) {
        use num_traits::Zero;
        if let Some(slot) = self.coeffs.iter_mut().find(|(_, v)| *v == x) {
            slot.0 += a;
            if slot.0.is_zero() {
                self.coeffs.retain(|(_, v)| *v != x);
            }
            return;
        }
        if !a.is_zero() {
            self.coeffs.push((a, x));
        }
    }

    /// The defining monomials followed by the implicit `(-1, id)`,
    /// i.e. the full coefficient list of `sum a_i * x_i - x_id`.
    pub fn ext_coeffs(&self) -> impl Iterator<Item = (Rational, ColIndex)> + '_ {
        self.coeffs
            .iter()
            .cloned()
            .chain(std::iter::once((
                Rational::from_integer(BigInt::from(-1)),
                self.id,
            )))
    }
}

/// Everything the engine needs from the LRA solver.
///
/// Hook ordering contract: the driver forwards term registration,
/// term removal and bound-change events to the engine in arrival
/// order, and a removed term must still be answerable through
/// [`Lra::get_term`] while the engine's removal hook runs.
pub trait Lra {
    fn column_count(&self) -> usize;
    fn column_is_int(&self, j: ColIndex) -> bool;
    fn column_is_fixed(&self, j: ColIndex) -> bool;
    fn column_is_free(&self, j: ColIndex) -> bool;
    fn column_has_term(&self, j: ColIndex) -> bool;

    /// Lower bound value; only meaningful when such a bound exists.
    /// For a fixed column this is the fixed value.
    fn lower_bound(&self, j: ColIndex) -> Rational;
    fn upper_bound(&self, j: ColIndex) -> Rational;

    /// The bound of the requested side, as `(value, strict, witness)`.
    fn bound_of_type(
        &self,
        j: ColIndex,
        upper: bool,
    ) -> Option<(Rational, bool, Option<DepId>)>;

    fn column_lower_bound_witness(&self, j: ColIndex) -> Option<DepId>;
    fn column_upper_bound_witness(&self, j: ColIndex) -> Option<DepId>;
    /// Join of both bound witnesses of `j`.
    fn column_bound_witnesses(&mut self, j: ColIndex) -> Option<DepId>;

    /// The term behind term column `j`. Panics if `j` has no term.
    fn get_term(&self, j: ColIndex) -> &Term;
    /// Term columns currently registered, in registration order.
    fn terms(&self) -> Vec<ColIndex>;

    /// Install a derived bound justified by `dep`.
    fn update_column_type_and_bound(
        &mut self,
        j: ColIndex,
        kind: BoundKind,
        value: Rational,
        dep: Option<DepId>,
    );

    /// Assert a trial bound as a constraint (used for branches) and
    /// return its constraint index.
    fn add_var_bound(&mut self, j: ColIndex, kind: BoundKind, value: Rational) -> ConstraintIndex;

    fn mk_join(&mut self, a: Option<DepId>, b: Option<DepId>) -> Option<DepId>;
    fn flatten(&self, dep: Option<DepId>) -> Vec<ConstraintIndex>;

    fn push(&mut self);
    fn pop(&mut self);

    fn find_feasible_solution(&mut self) -> LpStatus;
    fn get_status(&self) -> LpStatus;
    fn get_infeasibility_explanation(&self) -> Vec<ConstraintIndex>;

    /// Value of column `j` in the last feasible solution.
    fn column_value(&self, j: ColIndex) -> Rational;
    /// Columns eligible for branching inspection.
    fn r_basis(&self) -> Vec<ColIndex>;
    /// Integer column whose current value is not integral.
    fn column_is_int_inf(&self, j: ColIndex) -> bool;

    /// Whether a constraint index is still alive (not popped away).
    fn constraint_is_valid(&self, ci: ConstraintIndex) -> bool;

    /// Record `j` in the current scope so that popping the scope
    /// re-reports it through [`Lra::take_replayed_bound_changes`].
    fn push_bound_change_undo(&mut self, j: ColIndex);
    /// Columns whose recorded bound changes were unwound by pops since
    /// the last call.
    fn take_replayed_bound_changes(&mut self) -> Vec<ColIndex>;
}
