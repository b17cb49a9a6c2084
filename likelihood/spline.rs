//! Restricted cubic spline basis on the log-time scale.
//!
//! The basis is built in two steps. First the unrestricted truncated-power
//! terms are evaluated at a log time `x`:
//!
//! ```text
//! raw(x) = [x, (x - k_0)_+^3, (x - k_1)_+^3, ..., (x - k_{K-1})_+^3]
//! ```
//!
//! Then a boundary-constraint matrix `R` of shape `(K + 1) x m` combines the raw
//! terms into `m` basis functions, `basis(x) = raw(x) R`. With the natural
//! boundary matrix from [`natural_boundary_constraint`] the result is the usual
//! restricted cubic spline with `K - 1` columns, linear below the first knot and
//! above the last. Any `R` whose columns are combinations of the natural
//! columns (for example an orthogonalising rotation of them) keeps that
//! property.
//!
//! The basis depends only on data and knots, never on model parameters, which
//! is what makes the precomputed quadrature path possible.

use crate::error::LikelihoodError;
use ndarray::{Array1, Array2, ArrayView1, Zip};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RestrictedCubicSpline {
    knots: Array1<f64>,
    constraint: Array2<f64>,
}

impl RestrictedCubicSpline {
    /// Builds a spline from knots on the log-time scale and a caller-supplied
    /// boundary-constraint matrix.
    pub fn new(knots: Array1<f64>, constraint: Array2<f64>) -> Result<Self, LikelihoodError> {
        validate_knots(knots.view())?;
        let expected = knots.len() + 1;
        if constraint.nrows() != expected {
            return Err(LikelihoodError::InvalidConstraint {
                knots: knots.len(),
                expected,
                found: constraint.nrows(),
            });
        }
        if constraint.iter().any(|v| !v.is_finite()) {
            return Err(LikelihoodError::InvalidConstraint {
                knots: knots.len(),
                expected,
                found: constraint.nrows(),
            });
        }
        Ok(Self { knots, constraint })
    }

    /// Builds the standard restricted cubic spline for `knots`.
    pub fn natural(knots: Array1<f64>) -> Result<Self, LikelihoodError> {
        let constraint = natural_boundary_constraint(knots.view())?;
        Self::new(knots, constraint)
    }

    #[inline]
    pub fn knots(&self) -> &Array1<f64> {
        &self.knots
    }

    #[inline]
    pub fn constraint(&self) -> &Array2<f64> {
        &self.constraint
    }

    /// Number of basis columns after the constraint is applied.
    #[inline]
    pub fn num_basis(&self) -> usize {
        self.constraint.ncols()
    }

    fn raw_terms(&self, x: f64) -> Array1<f64> {
        let mut raw = Array1::<f64>::zeros(self.knots.len() + 1);
        raw[0] = x;
        for (slot, &knot) in raw.iter_mut().skip(1).zip(self.knots.iter()) {
            *slot = (x - knot).max(0.0).powi(3);
        }
        raw
    }

    fn raw_derivative(&self, x: f64) -> Array1<f64> {
        let mut raw = Array1::<f64>::zeros(self.knots.len() + 1);
        raw[0] = 1.0;
        for (slot, &knot) in raw.iter_mut().skip(1).zip(self.knots.iter()) {
            *slot = 3.0 * (x - knot).max(0.0).powi(2);
        }
        raw
    }

    /// Basis row at a single log time.
    pub fn basis_row(&self, x: f64) -> Array1<f64> {
        self.raw_terms(x).dot(&self.constraint)
    }

    /// Derivative of the basis row with respect to log time.
    pub fn basis_derivative_row(&self, x: f64) -> Array1<f64> {
        self.raw_derivative(x).dot(&self.constraint)
    }

    /// Basis rows for a batch of log times, one row per value.
    pub fn basis_matrix(&self, xs: ArrayView1<'_, f64>) -> Array2<f64> {
        let mut basis = Array2::<f64>::zeros((xs.len(), self.num_basis()));
        Zip::from(basis.rows_mut())
            .and(&xs)
            .par_for_each(|mut row, &x| row.assign(&self.basis_row(x)));
        basis
    }

    /// `basis(x) . coefficients + constant`: the spline part of a log hazard.
    pub fn linear_combination(
        &self,
        x: f64,
        coefficients: ArrayView1<'_, f64>,
        constant: f64,
    ) -> f64 {
        self.basis_row(x).dot(&coefficients) + constant
    }

    pub(crate) fn check_coefficients(
        &self,
        coefficients: ArrayView1<'_, f64>,
    ) -> Result<(), LikelihoodError> {
        if coefficients.len() != self.num_basis() {
            return Err(LikelihoodError::ShapeMismatch {
                context: "spline coefficients",
                expected: self.num_basis(),
                found: coefficients.len(),
            });
        }
        Ok(())
    }
}

fn validate_knots(knots: ArrayView1<'_, f64>) -> Result<(), LikelihoodError> {
    if knots.len() < 2 {
        return Err(LikelihoodError::InsufficientKnots(knots.len()));
    }
    if knots.iter().any(|k| !k.is_finite()) {
        return Err(LikelihoodError::InvalidKnotVector);
    }
    for window in knots.windows(2) {
        if window[0] >= window[1] {
            return Err(LikelihoodError::InvalidKnotVector);
        }
    }
    Ok(())
}

/// The `(K + 1) x (K - 1)` matrix that turns raw truncated-power terms into a
/// restricted cubic spline basis.
///
/// Column 0 keeps the linear term. Column `j` (for interior knot `k_j`) forms
/// `(x - k_j)_+^3 - l_j (x - k_0)_+^3 - (1 - l_j) (x - k_{K-1})_+^3` with
/// `l_j = (k_{K-1} - k_j) / (k_{K-1} - k_0)`, which cancels the cubic and
/// quadratic parts beyond the last knot.
pub fn natural_boundary_constraint(
    knots: ArrayView1<'_, f64>,
) -> Result<Array2<f64>, LikelihoodError> {
    validate_knots(knots)?;
    let k = knots.len();
    let k_min = knots[0];
    let k_max = knots[k - 1];
    let mut constraint = Array2::<f64>::zeros((k + 1, k - 1));
    constraint[[0, 0]] = 1.0;
    for j in 1..k - 1 {
        let lambda = (k_max - knots[j]) / (k_max - k_min);
        // Raw row 1 + i holds (x - k_i)_+^3.
        constraint[[1 + j, j]] = 1.0;
        constraint[[1, j]] = -lambda;
        constraint[[k, j]] = -(1.0 - lambda);
    }
    Ok(constraint)
}
