use crate::data::ObservationBatch;
use crate::error::LikelihoodError;
use crate::quadrature::{GaussLegendre, PrecomputedQuadratureBasis};
use crate::spline::RestrictedCubicSpline;
use ndarray::{Array2, ArrayView1};
use serde::{Deserialize, Serialize};

/// Spline and quadrature settings of a flexible-hazard model.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SplineSpec {
    pub spline: RestrictedCubicSpline,
    /// Gauss-Legendre order used for every observation.
    pub nodes: usize,
}

impl SplineSpec {
    pub fn new(spline: RestrictedCubicSpline, nodes: usize) -> Result<Self, LikelihoodError> {
        if nodes == 0 {
            return Err(LikelihoodError::InvalidQuadratureOrder);
        }
        Ok(Self { spline, nodes })
    }

    pub fn rule(&self) -> Result<GaussLegendre, LikelihoodError> {
        GaussLegendre::new(self.nodes)
    }

    /// Basis at `ln t` for every exit time: the design of the spline equation.
    pub fn exit_design(&self, t: ArrayView1<'_, f64>) -> Result<Array2<f64>, LikelihoodError> {
        if let Some(row) = t.iter().position(|&v| !(v.is_finite() && v > 0.0)) {
            return Err(LikelihoodError::NonFiniteValue {
                column: "t",
                row,
                value: t[row],
            });
        }
        let log_t = t.mapv(f64::ln);
        Ok(self.spline.basis_matrix(log_t.view()))
    }
}

/// Builds the cached quadrature basis for `batch`.
///
/// Call once per dataset; the result only depends on the entry and exit times,
/// the knots and the node count, so it stays valid for every parameter vector.
pub fn setup(
    batch: &ObservationBatch,
    spec: &SplineSpec,
) -> Result<PrecomputedQuadratureBasis, LikelihoodError> {
    batch.validate()?;
    let rule = spec.rule()?;
    log::info!(
        "Precomputing spline basis: {} observations, {} nodes, {} basis functions.",
        batch.len(),
        rule.order(),
        spec.spline.num_basis()
    );
    let basis = PrecomputedQuadratureBasis::build(&spec.spline, &rule, batch.t0.view(), batch.t.view())?;
    let degenerate = batch
        .t0
        .iter()
        .zip(batch.t.iter())
        .filter(|(entry, exit)| entry == exit)
        .count();
    if degenerate > 0 {
        log::debug!("{degenerate} observations have t0 == t and contribute no cumulative hazard.");
    }
    Ok(basis)
}
