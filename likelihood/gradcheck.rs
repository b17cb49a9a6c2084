//! Central finite differences against the analytic gradient.
//!
//! Each parameter is perturbed by `step * max(1, |theta_j|)` in both
//! directions, so large coefficients get a proportionally larger step.

use crate::error::LikelihoodError;
use crate::models::SurvivalLikelihood;
use crate::predictor::ParameterVector;
use ndarray::Array1;
use rayon::prelude::*;

pub const DEFAULT_STEP: f64 = 1e-6;

/// Numerical gradient of `model.log_likelihood` at `params`, flattened in
/// block order.
pub fn finite_difference_gradient<M: SurvivalLikelihood + ?Sized>(
    model: &M,
    params: &ParameterVector,
    step: f64,
) -> Result<Array1<f64>, LikelihoodError> {
    params.validate(model.design())?;
    let theta = params.flatten();
    let gradient: Result<Vec<f64>, LikelihoodError> = (0..theta.len())
        .into_par_iter()
        .map(|j| {
            let h = step * theta[j].abs().max(1.0);
            let mut forward = theta.clone();
            forward[j] += h;
            let mut backward = theta.clone();
            backward[j] -= h;
            let up = model.log_likelihood(&ParameterVector::from_flat(forward.view(), model.design())?)?;
            let down =
                model.log_likelihood(&ParameterVector::from_flat(backward.view(), model.design())?)?;
            Ok((up - down) / (2.0 * h))
        })
        .collect();
    Ok(Array1::from(gradient?))
}

/// Analytic and numerical gradients side by side.
#[derive(Debug, Clone)]
pub struct GradientReport {
    pub analytic: Array1<f64>,
    pub numeric: Array1<f64>,
}

impl GradientReport {
    /// Largest absolute entry-wise difference.
    pub fn max_abs_difference(&self) -> f64 {
        self.analytic
            .iter()
            .zip(self.numeric.iter())
            .map(|(a, n)| (a - n).abs())
            .fold(0.0, f64::max)
    }

    /// Largest difference relative to `max(1, |analytic_j|)`.
    pub fn max_relative_difference(&self) -> f64 {
        self.analytic
            .iter()
            .zip(self.numeric.iter())
            .map(|(a, n)| (a - n).abs() / a.abs().max(1.0))
            .fold(0.0, f64::max)
    }
}

pub fn max_gradient_discrepancy<M: SurvivalLikelihood + ?Sized>(
    model: &M,
    params: &ParameterVector,
    step: f64,
) -> Result<GradientReport, LikelihoodError> {
    let analytic = model.evaluate(params)?.gradient.flatten();
    let numeric = finite_difference_gradient(model, params, step)?;
    log::debug!(
        "Gradient check over {} parameters with step {step:e}.",
        analytic.len()
    );
    Ok(GradientReport { analytic, numeric })
}
