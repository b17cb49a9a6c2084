//! Gauss-Legendre quadrature for cumulative hazards.
//!
//! The cumulative hazard over `[t0, t]` is approximated as
//!
//! ```text
//! H = 0.5 (t - t0) * sum_k w_k h(0.5 (t - t0) z_k + 0.5 (t + t0))
//! ```
//!
//! where `(z_k, w_k)` is the Gauss-Legendre rule on `[-1, 1]`.
//!
//! Two evaluation paths exist for the spline hazard
//! `h(u) = exp(basis(ln u) . gamma + gamma_0 + xb)`:
//!
//! - [`cumulative_hazard_general`] rebuilds the basis at the mapped nodes on
//!   every call.
//! - [`PrecomputedQuadratureBasis`] evaluates the basis once, since it does not
//!   depend on parameters, and each later call is a contraction of the cached
//!   tensor with `gamma`.
//!
//! Both paths go through the same per-row kernel, so they agree to rounding.

use crate::error::LikelihoodError;
use crate::spline::RestrictedCubicSpline;
use ndarray::{Array1, Array2, Array3, ArrayView1, ArrayView2, Axis, Zip};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

const NEWTON_MAX_ITERATIONS: usize = 100;
const NEWTON_TOLERANCE: f64 = 1e-15;

/// Nodes and weights of a Gauss-Legendre rule on `[-1, 1]`, nodes ascending.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GaussLegendre {
    nodes: Array1<f64>,
    weights: Array1<f64>,
}

impl GaussLegendre {
    pub fn new(order: usize) -> Result<Self, LikelihoodError> {
        if order == 0 {
            return Err(LikelihoodError::InvalidQuadratureOrder);
        }
        let (nodes, weights) = legendre_roots(order);
        Ok(Self {
            nodes: Array1::from(nodes),
            weights: Array1::from(weights),
        })
    }

    #[inline]
    pub fn order(&self) -> usize {
        self.nodes.len()
    }

    #[inline]
    pub fn nodes(&self) -> &Array1<f64> {
        &self.nodes
    }

    #[inline]
    pub fn weights(&self) -> &Array1<f64> {
        &self.weights
    }

    /// Maps the standard nodes into `[t0, t]`.
    pub fn map_nodes(&self, t0: f64, t: f64) -> Array1<f64> {
        let half = 0.5 * (t - t0);
        let mid = 0.5 * (t + t0);
        self.nodes.mapv(|z| half * z + mid)
    }

    /// Integral of `hazard` over `[t0, t]`.
    ///
    /// A zero-length interval returns zero without evaluating `hazard`.
    pub fn integrate<F>(&self, t0: f64, t: f64, hazard: F) -> Result<f64, LikelihoodError>
    where
        F: Fn(f64) -> f64,
    {
        check_interval(0, t0, t)?;
        if t == t0 {
            return Ok(0.0);
        }
        let half = 0.5 * (t - t0);
        let sum: f64 = self
            .map_nodes(t0, t)
            .iter()
            .zip(self.weights.iter())
            .map(|(&u, &w)| w * hazard(u))
            .sum();
        Ok(half * sum)
    }

    /// Row-wise integrals over `[t0[i], t[i]]`.
    ///
    /// `hazard(i, nodes)` returns the hazard of observation `i` at each mapped
    /// node. Rows are independent and evaluated in parallel.
    pub fn integrate_batch<F>(
        &self,
        t0: ArrayView1<'_, f64>,
        t: ArrayView1<'_, f64>,
        hazard: F,
    ) -> Result<Array1<f64>, LikelihoodError>
    where
        F: Fn(usize, ArrayView1<'_, f64>) -> Array1<f64> + Sync,
    {
        check_intervals(t0, t)?;
        let values: Vec<f64> = (0..t.len())
            .into_par_iter()
            .map(|i| {
                if t[i] == t0[i] {
                    return 0.0;
                }
                let nodes = self.map_nodes(t0[i], t[i]);
                let h = hazard(i, nodes.view());
                0.5 * (t[i] - t0[i]) * self.weights.dot(&h)
            })
            .collect();
        Ok(Array1::from(values))
    }
}

/// Roots and weights of the Legendre polynomial of degree `n`, found by Newton
/// iteration on the three-term recurrence from a Chebyshev-style start.
fn legendre_roots(n: usize) -> (Vec<f64>, Vec<f64>) {
    let mut nodes = vec![0.0f64; n];
    let mut weights = vec![0.0f64; n];
    if n == 1 {
        weights[0] = 2.0;
        return (nodes, weights);
    }

    let nf = n as f64;
    for i in 0..n.div_ceil(2) {
        let mut x = (std::f64::consts::PI * (i as f64 + 0.75) / (nf + 0.5)).cos();
        for _ in 0..NEWTON_MAX_ITERATIONS {
            let (p_n, dp_n) = legendre_with_derivative(n, x);
            let dx = p_n / dp_n;
            x -= dx;
            if dx.abs() < NEWTON_TOLERANCE {
                break;
            }
        }
        let (_, dp_n) = legendre_with_derivative(n, x);
        let w = 2.0 / ((1.0 - x * x) * dp_n * dp_n);
        nodes[i] = -x;
        nodes[n - 1 - i] = x;
        weights[i] = w;
        weights[n - 1 - i] = w;
    }
    (nodes, weights)
}

fn legendre_with_derivative(n: usize, x: f64) -> (f64, f64) {
    let mut p_prev = 1.0f64;
    let mut p = x;
    for j in 2..=n {
        let jf = j as f64;
        let p_next = ((2.0 * jf - 1.0) * x * p - (jf - 1.0) * p_prev) / jf;
        p_prev = p;
        p = p_next;
    }
    let derivative = n as f64 * (x * p - p_prev) / (x * x - 1.0);
    (p, derivative)
}

fn check_interval(row: usize, t0: f64, t: f64) -> Result<(), LikelihoodError> {
    if !t0.is_finite() || !t.is_finite() || t0 > t {
        return Err(LikelihoodError::InvalidInterval {
            row,
            entry: t0,
            exit: t,
        });
    }
    Ok(())
}

pub(crate) fn check_intervals(
    t0: ArrayView1<'_, f64>,
    t: ArrayView1<'_, f64>,
) -> Result<(), LikelihoodError> {
    if t0.len() != t.len() {
        return Err(LikelihoodError::ShapeMismatch {
            context: "entry and exit times",
            expected: t.len(),
            found: t0.len(),
        });
    }
    for (row, (&entry, &exit)) in t0.iter().zip(t.iter()).enumerate() {
        check_interval(row, entry, exit)?;
    }
    Ok(())
}

/// Cumulative hazards and their derivatives with respect to the spline
/// coefficients.
///
/// The derivative with respect to the spline constant and to the covariate
/// predictor `xb` of a row both equal that row's cumulative hazard, so they
/// are not stored separately.
#[derive(Debug, Clone)]
pub struct CumulativeHazard {
    pub values: Array1<f64>,
    /// `coefficient_gradient[[i, j]] = dH_i / d gamma_j`.
    pub coefficient_gradient: Array2<f64>,
}

/// Shared kernel: one row's cumulative hazard from the basis at its nodes.
fn spline_row_cumulative_hazard(
    basis_at_nodes: ArrayView2<'_, f64>,
    weights: ArrayView1<'_, f64>,
    half_length: f64,
    coefficients: ArrayView1<'_, f64>,
    offset: f64,
) -> (f64, Array1<f64>) {
    if half_length == 0.0 {
        return (0.0, Array1::zeros(coefficients.len()));
    }
    let log_hazard = basis_at_nodes.dot(&coefficients) + offset;
    let weighted = Zip::from(&weights)
        .and(&log_hazard)
        .map_collect(|&w, &eta| half_length * w * eta.exp());
    let value = weighted.sum();
    let gradient = basis_at_nodes.t().dot(&weighted);
    (value, gradient)
}

fn collect_rows(rows: Vec<(f64, Array1<f64>)>, num_basis: usize) -> CumulativeHazard {
    let mut values = Array1::<f64>::zeros(rows.len());
    let mut coefficient_gradient = Array2::<f64>::zeros((rows.len(), num_basis));
    for (i, (value, gradient)) in rows.into_iter().enumerate() {
        values[i] = value;
        coefficient_gradient.row_mut(i).assign(&gradient);
    }
    CumulativeHazard {
        values,
        coefficient_gradient,
    }
}

fn check_row_count(
    context: &'static str,
    expected: usize,
    found: usize,
) -> Result<(), LikelihoodError> {
    if expected != found {
        return Err(LikelihoodError::ShapeMismatch {
            context,
            expected,
            found,
        });
    }
    Ok(())
}

/// Spline cumulative hazard with the basis regenerated at every call.
pub fn cumulative_hazard_general(
    spline: &RestrictedCubicSpline,
    rule: &GaussLegendre,
    t0: ArrayView1<'_, f64>,
    t: ArrayView1<'_, f64>,
    coefficients: ArrayView1<'_, f64>,
    constant: f64,
    xb: ArrayView1<'_, f64>,
) -> Result<CumulativeHazard, LikelihoodError> {
    check_intervals(t0, t)?;
    check_row_count("linear predictor rows", t.len(), xb.len())?;
    spline.check_coefficients(coefficients)?;

    let rows: Vec<(f64, Array1<f64>)> = (0..t.len())
        .into_par_iter()
        .map(|i| {
            let half_length = 0.5 * (t[i] - t0[i]);
            if half_length == 0.0 {
                return (0.0, Array1::zeros(coefficients.len()));
            }
            let log_nodes = rule.map_nodes(t0[i], t[i]).mapv(f64::ln);
            let basis = spline.basis_matrix(log_nodes.view());
            spline_row_cumulative_hazard(
                basis.view(),
                rule.weights().view(),
                half_length,
                coefficients,
                constant + xb[i],
            )
        })
        .collect();
    Ok(collect_rows(rows, spline.num_basis()))
}

/// The spline basis evaluated at every observation's mapped quadrature nodes.
///
/// Built once from data and knots. It is read-only afterwards and can be
/// shared across any number of likelihood evaluations on the same batch.
/// The only way to obtain one is [`PrecomputedQuadratureBasis::build`], which
/// keeps the node axis of `allnodes` and `weights` the same length.
#[derive(Debug, Clone)]
pub struct PrecomputedQuadratureBasis {
    /// Shape `(observations, nodes, basis)`.
    allnodes: Array3<f64>,
    weights: Array1<f64>,
    half_length: Array1<f64>,
    t0: Array1<f64>,
    t: Array1<f64>,
    /// Basis at `ln t`, one row per observation.
    exit_basis: Array2<f64>,
}

impl PrecomputedQuadratureBasis {
    pub fn build(
        spline: &RestrictedCubicSpline,
        rule: &GaussLegendre,
        t0: ArrayView1<'_, f64>,
        t: ArrayView1<'_, f64>,
    ) -> Result<Self, LikelihoodError> {
        check_intervals(t0, t)?;
        let n = t.len();
        let mut allnodes = Array3::<f64>::zeros((n, rule.order(), spline.num_basis()));
        allnodes
            .axis_iter_mut(Axis(0))
            .into_par_iter()
            .enumerate()
            .for_each(|(i, mut slab)| {
                // Degenerate rows keep a zero basis; their weight is zero.
                if t[i] > t0[i] {
                    let log_nodes = rule.map_nodes(t0[i], t[i]).mapv(f64::ln);
                    slab.assign(&spline.basis_matrix(log_nodes.view()));
                }
            });
        let half_length = Zip::from(&t0)
            .and(&t)
            .map_collect(|&entry, &exit| 0.5 * (exit - entry));
        let exit_basis = spline.basis_matrix(t.mapv(f64::ln).view());
        Ok(Self {
            allnodes,
            weights: rule.weights().clone(),
            half_length,
            t0: t0.to_owned(),
            t: t.to_owned(),
            exit_basis,
        })
    }

    /// Checks that `t0` and `t` are the times this basis was built from.
    pub fn check_batch(
        &self,
        t0: ArrayView1<'_, f64>,
        t: ArrayView1<'_, f64>,
    ) -> Result<(), LikelihoodError> {
        check_row_count("precomputed basis rows", t.len(), self.num_observations())?;
        check_row_count("entry and exit times", t.len(), t0.len())?;
        let stale = Zip::from(&self.t0)
            .and(&self.t)
            .and(&t0)
            .and(&t)
            .map_collect(|&a0, &a, &b0, &b| a0 != b0 || a != b);
        match stale.iter().position(|&differs| differs) {
            Some(row) => Err(LikelihoodError::StaleQuadratureBasis { row }),
            None => Ok(()),
        }
    }

    /// Spline basis at `ln t` for the batch this basis was built from.
    #[inline]
    pub fn exit_basis(&self) -> &Array2<f64> {
        &self.exit_basis
    }

    #[inline]
    pub fn allnodes(&self) -> &Array3<f64> {
        &self.allnodes
    }

    #[inline]
    pub fn weights(&self) -> &Array1<f64> {
        &self.weights
    }

    #[inline]
    pub fn num_observations(&self) -> usize {
        self.allnodes.len_of(Axis(0))
    }

    #[inline]
    pub fn num_basis(&self) -> usize {
        self.allnodes.len_of(Axis(2))
    }

    /// Spline cumulative hazard from the cached basis.
    pub fn cumulative_hazard(
        &self,
        coefficients: ArrayView1<'_, f64>,
        constant: f64,
        xb: ArrayView1<'_, f64>,
    ) -> Result<CumulativeHazard, LikelihoodError> {
        check_row_count("linear predictor rows", self.num_observations(), xb.len())?;
        check_row_count("spline coefficients", self.num_basis(), coefficients.len())?;

        let rows: Vec<(f64, Array1<f64>)> = self
            .allnodes
            .axis_iter(Axis(0))
            .into_par_iter()
            .enumerate()
            .map(|(i, slab)| {
                spline_row_cumulative_hazard(
                    slab,
                    self.weights.view(),
                    self.half_length[i],
                    coefficients,
                    constant + xb[i],
                )
            })
            .collect();
        Ok(collect_rows(rows, self.num_basis()))
    }
}
