//! Model variants built on the shared machinery.
//!
//! | variant                  | equations                                  |
//! |--------------------------|--------------------------------------------|
//! | [`WeibullModel`]         | 0: `ln lambda`, 1: `ln gamma`              |
//! | [`WeibullIntervalModel`] | 0: `ln lambda`, 1: `ln gamma`              |
//! | [`RcsHazardModel`]       | 0: covariates `xb`, 1: spline with constant |
//!
//! For the spline model the design of equation 1 is the restricted cubic
//! spline basis at `ln t` (see [`crate::setup::SplineSpec::exit_design`]),
//! so that `X_1 beta_1` is the spline part of the log hazard at exit.

use crate::censoring::{
    CensoringSelector, Contribution, PointTerms, censored_contribution, event_contribution,
    guarded, weighted_sum,
};
use crate::data::ObservationBatch;
use crate::error::LikelihoodError;
use crate::hazard::Weibull;
use crate::predictor::{
    ModelDesign, ParameterVector, accumulate_block_gradient, linear_predictor, split_block,
};
use crate::quadrature::{
    CumulativeHazard, GaussLegendre, PrecomputedQuadratureBasis, cumulative_hazard_general,
};
use crate::setup::SplineSpec;
use crate::spline::RestrictedCubicSpline;
use ndarray::{Array1, ArrayView1, ArrayView2, Zip, s};

const SPLINE_DESIGN_TOLERANCE: f64 = 1e-10;

/// Result of one likelihood evaluation.
#[derive(Debug, Clone)]
pub struct LikelihoodState {
    /// `sum_i wt_i l_i`.
    pub log_likelihood: f64,
    /// Unweighted per-observation contributions `l_i`.
    pub contributions: Array1<f64>,
    /// Gradient of `log_likelihood`, shaped like the parameters.
    pub gradient: ParameterVector,
}

/// A log-likelihood that can be evaluated, with its gradient, at any
/// parameter vector shaped for its design.
pub trait SurvivalLikelihood: Sync {
    fn design(&self) -> &ModelDesign;

    fn evaluate(&self, params: &ParameterVector) -> Result<LikelihoodState, LikelihoodError>;

    fn log_likelihood(&self, params: &ParameterVector) -> Result<f64, LikelihoodError> {
        Ok(self.evaluate(params)?.log_likelihood)
    }

    /// Evaluation on a flat parameter vector, as most optimizers see it.
    fn evaluate_flat(
        &self,
        flat: ArrayView1<'_, f64>,
    ) -> Result<(f64, Array1<f64>), LikelihoodError> {
        let params = ParameterVector::from_flat(flat, self.design())?;
        let state = self.evaluate(&params)?;
        Ok((state.log_likelihood, state.gradient.flatten()))
    }
}

fn require_positive_exit(batch: &ObservationBatch) -> Result<(), LikelihoodError> {
    for (row, &exit) in batch.t.iter().enumerate() {
        if exit <= 0.0 {
            return Err(LikelihoodError::InvalidInterval {
                row,
                entry: batch.t0[row],
                exit,
            });
        }
    }
    Ok(())
}

/// Splits per-row contributions into values and the two predictor scores,
/// weighting the scores by `wt`.
fn unzip_rows(
    rows: &Array1<Contribution>,
    wt: ArrayView1<'_, f64>,
) -> (Array1<f64>, Array1<f64>, Array1<f64>) {
    let values = rows.mapv(|c| c.value);
    let first = Zip::from(rows)
        .and(&wt)
        .map_collect(|c, &w| w * c.gradient[0]);
    let second = Zip::from(rows)
        .and(&wt)
        .map_collect(|c, &w| w * c.gradient[1]);
    (values, first, second)
}

fn two_equation_state(
    design: &ModelDesign,
    rows: Array1<Contribution>,
    wt: ArrayView1<'_, f64>,
) -> Result<LikelihoodState, LikelihoodError> {
    let (contributions, score_first, score_second) = unzip_rows(&rows, wt);
    let log_likelihood = weighted_sum(contributions.view(), wt)?;
    let gradient = ParameterVector::new(vec![
        accumulate_block_gradient(&design.equations[0], score_first.view()),
        accumulate_block_gradient(&design.equations[1], score_second.view()),
    ]);
    Ok(LikelihoodState {
        log_likelihood,
        contributions,
        gradient,
    })
}

/// Weibull proportional-hazards model with event indicator `d`:
/// `l_i = d_i (ln lambda + ln gamma + (gamma - 1) ln t_i) - lambda t_i^gamma`.
pub struct WeibullModel<'a> {
    design: &'a ModelDesign,
    data: &'a ObservationBatch,
}

impl<'a> WeibullModel<'a> {
    pub fn new(design: &'a ModelDesign, data: &'a ObservationBatch) -> Result<Self, LikelihoodError> {
        data.validate()?;
        design.validate(2, data.len())?;
        require_positive_exit(data)?;
        Ok(Self { design, data })
    }
}

impl SurvivalLikelihood for WeibullModel<'_> {
    fn design(&self) -> &ModelDesign {
        self.design
    }

    fn evaluate(&self, params: &ParameterVector) -> Result<LikelihoodState, LikelihoodError> {
        params.validate(self.design)?;
        let eta_scale = linear_predictor(params, self.design, 0)?;
        let eta_shape = linear_predictor(params, self.design, 1)?;

        let rows = Zip::from(&eta_scale)
            .and(&eta_shape)
            .and(&self.data.t)
            .and(&self.data.d)
            .par_map_collect(|&a, &b, &t, &d| {
                let w = Weibull::from_predictors(a, b);
                let (dh_scale, dh_shape) = w.cumulative_hazard_gradient(t);
                let (dl_scale, dl_shape) = w.log_hazard_gradient(t);
                Contribution {
                    value: event_contribution(d, w.log_hazard(t), w.cumulative_hazard(t)),
                    gradient: [d * dl_scale - dh_scale, d * dl_shape - dh_shape],
                }
            });

        two_equation_state(self.design, rows, self.data.wt.view())
    }
}

/// Weibull model with exact, right-, left- and interval-censored rows.
pub struct WeibullIntervalModel<'a> {
    design: &'a ModelDesign,
    data: &'a ObservationBatch,
}

impl<'a> WeibullIntervalModel<'a> {
    pub fn new(design: &'a ModelDesign, data: &'a ObservationBatch) -> Result<Self, LikelihoodError> {
        data.validate()?;
        data.interval()?;
        design.validate(2, data.len())?;
        Ok(Self { design, data })
    }
}

fn weibull_point(w: &Weibull, t: f64) -> PointTerms {
    let (dh_scale, dh_shape) = w.cumulative_hazard_gradient(t);
    let (dl_scale, dl_shape) = w.log_hazard_gradient(t);
    PointTerms {
        log_hazard: w.log_hazard(t),
        d_log_hazard: [dl_scale, dl_shape],
        cumulative: w.cumulative_hazard(t),
        d_cumulative: [dh_scale, dh_shape],
    }
}

impl SurvivalLikelihood for WeibullIntervalModel<'_> {
    fn design(&self) -> &ModelDesign {
        self.design
    }

    fn evaluate(&self, params: &ParameterVector) -> Result<LikelihoodState, LikelihoodError> {
        params.validate(self.design)?;
        let interval = self.data.interval()?;
        let eta_scale = linear_predictor(params, self.design, 0)?;
        let eta_shape = linear_predictor(params, self.design, 1)?;
        let ctype = ArrayView1::from(interval.ctype.as_slice());

        let rows = Zip::from(&eta_scale)
            .and(&eta_shape)
            .and(&ctype)
            .and(&interval.ltime)
            .and(&interval.rtime)
            .par_map_collect(|&a, &b, &kind, &ltime, &rtime| {
                let selector = CensoringSelector::new(kind);
                let w = Weibull::from_predictors(a, b);
                // Bounds an inactive regime would read are replaced by 1.
                let l = guarded(ltime, selector.uses_ltime(), 1.0);
                let r = guarded(rtime, selector.uses_rtime(), 1.0);
                censored_contribution(selector, &weibull_point(&w, l), &weibull_point(&w, r))
            });

        two_equation_state(self.design, rows, self.data.wt.view())
    }
}

enum HazardIntegrator<'a> {
    General {
        spline: &'a RestrictedCubicSpline,
        rule: GaussLegendre,
    },
    Precomputed(&'a PrecomputedQuadratureBasis),
}

// Equation 1 of the spline model must hold the basis at `ln t`.
fn check_spline_design(
    design: ArrayView2<'_, f64>,
    expected: ArrayView2<'_, f64>,
) -> Result<(), LikelihoodError> {
    if design.dim() != expected.dim() {
        return Err(LikelihoodError::ShapeMismatch {
            context: "spline design",
            expected: expected.nrows(),
            found: design.nrows(),
        });
    }
    let row = design
        .rows()
        .into_iter()
        .zip(expected.rows())
        .position(|(got, want)| {
            got.iter().zip(want.iter()).any(|(&g, &w)| {
                !((g - w).abs() <= SPLINE_DESIGN_TOLERANCE * w.abs().max(1.0))
            })
        });
    match row {
        Some(row) => Err(LikelihoodError::SplineDesignMismatch { row }),
        None => Ok(()),
    }
}

/// Flexible parametric model with log hazard
/// `ln h(t) = basis(ln t) . gamma + gamma_0 + xb`:
/// `l_i = d_i (xb_i + xbrcs_i) - H_i`, with `H_i` integrated over `[t0_i, t_i]`.
pub struct RcsHazardModel<'a> {
    design: &'a ModelDesign,
    data: &'a ObservationBatch,
    integrator: HazardIntegrator<'a>,
}

impl<'a> RcsHazardModel<'a> {
    /// Regenerates the spline basis at the quadrature nodes on every
    /// evaluation.
    pub fn general(
        design: &'a ModelDesign,
        data: &'a ObservationBatch,
        spec: &'a SplineSpec,
    ) -> Result<Self, LikelihoodError> {
        Self::check_inputs(design, data, spec.spline.num_basis())?;
        let expected = spec.exit_design(data.t.view())?;
        check_spline_design(design.equations[1].design.view(), expected.view())?;
        let rule = spec.rule()?;
        Ok(Self {
            design,
            data,
            integrator: HazardIntegrator::General {
                spline: &spec.spline,
                rule,
            },
        })
    }

    /// Uses a basis cached by [`crate::setup::setup`] for this batch.
    ///
    /// The basis must have been built from exactly `data.t0` and `data.t`;
    /// a basis from any other batch is rejected with
    /// [`LikelihoodError::StaleQuadratureBasis`].
    pub fn precomputed(
        design: &'a ModelDesign,
        data: &'a ObservationBatch,
        basis: &'a PrecomputedQuadratureBasis,
    ) -> Result<Self, LikelihoodError> {
        Self::check_inputs(design, data, basis.num_basis())?;
        basis.check_batch(data.t0.view(), data.t.view())?;
        check_spline_design(design.equations[1].design.view(), basis.exit_basis().view())?;
        Ok(Self {
            design,
            data,
            integrator: HazardIntegrator::Precomputed(basis),
        })
    }

    fn check_inputs(
        design: &ModelDesign,
        data: &ObservationBatch,
        num_basis: usize,
    ) -> Result<(), LikelihoodError> {
        data.validate()?;
        design.validate(2, data.len())?;
        require_positive_exit(data)?;
        let spline_eq = &design.equations[1];
        if spline_eq.design.ncols() != num_basis {
            return Err(LikelihoodError::ShapeMismatch {
                context: "spline design columns",
                expected: num_basis,
                found: spline_eq.design.ncols(),
            });
        }
        if !spline_eq.constant {
            return Err(LikelihoodError::BlockLength {
                equation: 1,
                expected: num_basis + 1,
                found: num_basis,
            });
        }
        Ok(())
    }

    fn cumulative_hazard(
        &self,
        coefficients: ArrayView1<'_, f64>,
        constant: f64,
        xb: ArrayView1<'_, f64>,
    ) -> Result<CumulativeHazard, LikelihoodError> {
        match &self.integrator {
            HazardIntegrator::General { spline, rule } => cumulative_hazard_general(
                spline,
                rule,
                self.data.t0.view(),
                self.data.t.view(),
                coefficients,
                constant,
                xb,
            ),
            HazardIntegrator::Precomputed(basis) => {
                basis.cumulative_hazard(coefficients, constant, xb)
            }
        }
    }
}

impl SurvivalLikelihood for RcsHazardModel<'_> {
    fn design(&self) -> &ModelDesign {
        self.design
    }

    fn evaluate(&self, params: &ParameterVector) -> Result<LikelihoodState, LikelihoodError> {
        params.validate(self.design)?;
        let xb = linear_predictor(params, self.design, 0)?;
        let xbrcs = linear_predictor(params, self.design, 1)?;
        let spline_eq = &self.design.equations[1];
        let (coefficients, constant) = split_block(&params.blocks[1], spline_eq);
        let hazard = self.cumulative_hazard(coefficients, constant, xb.view())?;

        let contributions = Zip::from(&xb)
            .and(&xbrcs)
            .and(&self.data.d)
            .and(&hazard.values)
            .map_collect(|&x, &r, &d, &h| event_contribution(d, x + r, h));
        let wt = self.data.wt.view();
        let log_likelihood = weighted_sum(contributions.view(), wt)?;

        // d l_i / d xb_i = d_i - H_i; the spline constant shares that score.
        let score = Zip::from(&wt)
            .and(&self.data.d)
            .and(&hazard.values)
            .map_collect(|&w, &d, &h| w * (d - h));
        let event_score = &wt * &self.data.d;

        let covariate_gradient = accumulate_block_gradient(&self.design.equations[0], score.view());
        let mut spline_gradient = accumulate_block_gradient(spline_eq, event_score.view());
        let p = spline_eq.design.ncols();
        spline_gradient
            .slice_mut(s![..p])
            .scaled_add(-1.0, &hazard.coefficient_gradient.t().dot(&wt));
        spline_gradient[p] = score.sum();

        Ok(LikelihoodState {
            log_likelihood,
            contributions,
            gradient: ParameterVector::new(vec![covariate_gradient, spline_gradient]),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::censoring::CensoringType;
    use crate::predictor::Equation;
    use approx::{assert_abs_diff_eq, assert_relative_eq};
    use ndarray::{Array2, array};

    fn weibull_design(n: usize) -> ModelDesign {
        ModelDesign::new(vec![
            Equation::constant_only("ln_lambda", n),
            Equation::constant_only("ln_gamma", n),
        ])
    }

    #[test]
    fn three_observation_weibull_matches_closed_form() {
        let data = ObservationBatch::from_exit_times(array![1.0, 2.0, 3.0], array![1.0, 0.0, 1.0])
            .unwrap();
        let design = weibull_design(3);
        let model = WeibullModel::new(&design, &data).unwrap();
        let (lambda, gamma) = (0.1f64, 1.5f64);
        let params = ParameterVector::new(vec![array![lambda.ln()], array![gamma.ln()]]);

        let expected: f64 = data
            .t
            .iter()
            .zip(data.d.iter())
            .map(|(&t, &d)| {
                d * (lambda.ln() + gamma.ln() + (gamma - 1.0) * t.ln()) - lambda * t.powf(gamma)
            })
            .sum();
        let value = model.log_likelihood(&params).unwrap();
        assert_relative_eq!(value, expected, max_relative = 1e-13);
    }

    #[test]
    fn weibull_weights_scale_contributions() {
        let mut data =
            ObservationBatch::from_exit_times(array![1.0, 2.0], array![1.0, 1.0]).unwrap();
        data.wt = array![2.0, 0.5];
        let design = weibull_design(2);
        let model = WeibullModel::new(&design, &data).unwrap();
        let params = ParameterVector::new(vec![array![-1.0], array![0.3]]);
        let state = model.evaluate(&params).unwrap();
        assert_relative_eq!(
            state.log_likelihood,
            2.0 * state.contributions[0] + 0.5 * state.contributions[1],
            max_relative = 1e-14
        );
    }

    #[test]
    fn interval_censored_row_matches_survival_difference() {
        let data = ObservationBatch::from_exit_times(array![2.0], array![0.0])
            .unwrap()
            .with_interval_censoring(vec![CensoringType::Interval], array![1.0], array![2.0])
            .unwrap();
        let design = weibull_design(1);
        let model = WeibullIntervalModel::new(&design, &data).unwrap();
        let w = Weibull {
            lambda: 0.1,
            gamma: 1.5,
        };
        let params = ParameterVector::new(vec![array![w.lambda.ln()], array![w.gamma.ln()]]);
        let value = model.log_likelihood(&params).unwrap();
        assert_relative_eq!(
            value,
            (w.survival(1.0) - w.survival(2.0)).ln(),
            max_relative = 1e-12
        );
    }

    #[test]
    fn exact_rows_ignore_rtime() {
        let design = weibull_design(1);
        let params = ParameterVector::new(vec![array![-0.4], array![0.2]]);
        let mut results = Vec::new();
        for rtime in [f64::NAN, 0.0, 7.5] {
            let data = ObservationBatch::from_exit_times(array![1.0], array![1.0])
                .unwrap()
                .with_interval_censoring(vec![CensoringType::Exact], array![1.3], array![rtime])
                .unwrap();
            let model = WeibullIntervalModel::new(&design, &data).unwrap();
            let state = model.evaluate(&params).unwrap();
            assert!(state.log_likelihood.is_finite());
            results.push((state.contributions[0], state.gradient.flatten()));
        }
        for pair in results.windows(2) {
            assert_eq!(pair[0].0, pair[1].0);
            assert_eq!(pair[0].1, pair[1].1);
        }
    }

    #[test]
    fn interval_model_requires_censoring_columns() {
        let data = ObservationBatch::from_exit_times(array![1.0], array![1.0]).unwrap();
        let design = weibull_design(1);
        assert!(matches!(
            WeibullIntervalModel::new(&design, &data),
            Err(LikelihoodError::MissingIntervalCensoring)
        ));
    }

    fn rcs_fixture() -> (ObservationBatch, SplineSpec) {
        let data = ObservationBatch::new(
            array![0.0, 0.5, 0.0, 1.0],
            array![1.5, 2.5, 0.7, 4.0],
            array![1.0, 0.0, 1.0, 1.0],
            array![1.0, 2.0, 1.0, 0.5],
        )
        .unwrap();
        let spline = RestrictedCubicSpline::natural(array![-0.4, 0.3, 0.9, 1.4]).unwrap();
        (data, SplineSpec::new(spline, 25).unwrap())
    }

    fn rcs_design(data: &ObservationBatch, spec: &SplineSpec) -> ModelDesign {
        let covariate = array![[0.5], [-1.0], [0.2], [1.5]];
        ModelDesign::new(vec![
            Equation::new("xb", covariate, false),
            Equation::new("rcs", spec.exit_design(data.t.view()).unwrap(), true),
        ])
    }

    #[test]
    fn rcs_general_and_precomputed_agree() {
        let (data, spec) = rcs_fixture();
        let design = rcs_design(&data, &spec);
        let cached = crate::setup::setup(&data, &spec).unwrap();
        let general = RcsHazardModel::general(&design, &data, &spec).unwrap();
        let precomputed = RcsHazardModel::precomputed(&design, &data, &cached).unwrap();
        let params = ParameterVector::new(vec![array![0.3], array![0.9, -0.05, 0.08, -1.2]]);
        let a = general.evaluate(&params).unwrap();
        let b = precomputed.evaluate(&params).unwrap();
        assert_relative_eq!(a.log_likelihood, b.log_likelihood, max_relative = 1e-10);
        for (x, y) in a.gradient.flatten().iter().zip(b.gradient.flatten().iter()) {
            assert_relative_eq!(*x, *y, max_relative = 1e-10, epsilon = 1e-12);
        }
    }

    #[test]
    fn precomputed_basis_from_another_batch_is_rejected() {
        let (data, spec) = rcs_fixture();
        let stale = crate::setup::setup(&data, &spec).unwrap();
        let other = ObservationBatch::new(
            array![0.0, 0.5, 0.2, 1.0],
            array![4.0, 6.0, 0.7, 4.0],
            array![1.0, 0.0, 1.0, 1.0],
            array![1.0, 2.0, 1.0, 0.5],
        )
        .unwrap();
        let design = rcs_design(&other, &spec);
        assert_eq!(
            RcsHazardModel::precomputed(&design, &other, &stale).err(),
            Some(LikelihoodError::StaleQuadratureBasis { row: 0 })
        );

        let fresh = crate::setup::setup(&other, &spec).unwrap();
        let cached = RcsHazardModel::precomputed(&design, &other, &fresh).unwrap();
        let general = RcsHazardModel::general(&design, &other, &spec).unwrap();
        let params = ParameterVector::new(vec![array![0.3], array![0.9, -0.05, 0.08, -1.2]]);
        assert_relative_eq!(
            cached.log_likelihood(&params).unwrap(),
            general.log_likelihood(&params).unwrap(),
            max_relative = 1e-10
        );
    }

    #[test]
    fn spline_design_must_be_basis_at_exit_time() {
        let (data, spec) = rcs_fixture();
        let cached = crate::setup::setup(&data, &spec).unwrap();
        let mut design = rcs_design(&data, &spec);
        design.equations[1].design[[2, 1]] += 0.25;
        let expected = Some(LikelihoodError::SplineDesignMismatch { row: 2 });
        assert_eq!(RcsHazardModel::general(&design, &data, &spec).err(), expected);
        assert_eq!(
            RcsHazardModel::precomputed(&design, &data, &cached).err(),
            expected
        );
    }

    #[test]
    fn two_knot_rcs_matches_weibull() {
        let data = ObservationBatch::new(
            array![0.0, 0.0, 0.0],
            array![1.0, 2.0, 3.0],
            array![1.0, 0.0, 1.0],
            array![1.0, 1.0, 1.0],
        )
        .unwrap();
        let spec = SplineSpec::new(RestrictedCubicSpline::natural(array![0.0, 1.1]).unwrap(), 60)
            .unwrap();
        let design = ModelDesign::new(vec![
            Equation::new("xb", Array2::zeros((3, 0)), false),
            Equation::new("rcs", spec.exit_design(data.t.view()).unwrap(), true),
        ]);
        let model = RcsHazardModel::general(&design, &data, &spec).unwrap();

        let w = Weibull {
            lambda: 0.1,
            gamma: 3.0,
        };
        let params = ParameterVector::new(vec![
            Array1::zeros(0),
            array![w.gamma - 1.0, (w.lambda * w.gamma).ln()],
        ]);
        let weibull_design = weibull_design(3);
        let weibull = WeibullModel::new(&weibull_design, &data).unwrap();
        let weibull_params = ParameterVector::new(vec![array![w.lambda.ln()], array![w.gamma.ln()]]);

        let rcs_value = model.log_likelihood(&params).unwrap();
        let weibull_value = weibull.log_likelihood(&weibull_params).unwrap();
        assert_relative_eq!(rcs_value, weibull_value, max_relative = 1e-10);
    }

    #[test]
    fn spline_design_must_carry_constant() {
        let (data, spec) = rcs_fixture();
        let mut design = rcs_design(&data, &spec);
        design.equations[1].constant = false;
        assert!(RcsHazardModel::general(&design, &data, &spec).is_err());
    }

    #[test]
    fn flat_evaluation_matches_block_evaluation() {
        let (data, spec) = rcs_fixture();
        let design = rcs_design(&data, &spec);
        let model = RcsHazardModel::general(&design, &data, &spec).unwrap();
        let params = ParameterVector::new(vec![array![-0.2], array![0.5, 0.0, 0.1, -0.7]]);
        let state = model.evaluate(&params).unwrap();
        let (value, gradient) = model.evaluate_flat(params.flatten().view()).unwrap();
        assert_abs_diff_eq!(value, state.log_likelihood, epsilon = 1e-14);
        assert_eq!(gradient, state.gradient.flatten());
    }
}
