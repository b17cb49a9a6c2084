use hazardlik::{
    Equation, ModelDesign, ObservationBatch, ParameterVector, RcsHazardModel,
    RestrictedCubicSpline, SplineSpec, SurvivalLikelihood, WeibullModel, setup,
};
use ndarray::{Array1, array};
use rand::rngs::StdRng;
use rand::SeedableRng;
use rand_distr::{Distribution, Exp, Uniform};
use wolfe_bfgs::{Bfgs, BfgsSolution};

const LAMBDA: f64 = 0.2;
const GAMMA: f64 = 1.5;

/// Weibull event times by inversion of `H(t) = lambda t^gamma`, censored
/// administratively at a uniform follow-up time.
fn simulate_weibull(n: usize, seed: u64) -> ObservationBatch {
    let mut rng = StdRng::seed_from_u64(seed);
    let unit = Exp::new(1.0).unwrap();
    let follow_up = Uniform::new(1.0, 6.0);
    let mut t = Array1::zeros(n);
    let mut d = Array1::zeros(n);
    for i in 0..n {
        let event = (unit.sample(&mut rng) / LAMBDA).powf(1.0 / GAMMA);
        let censor = follow_up.sample(&mut rng);
        if event <= censor {
            t[i] = event;
            d[i] = 1.0;
        } else {
            t[i] = censor;
        }
    }
    ObservationBatch::from_exit_times(t, d).unwrap()
}

fn maximize<M: SurvivalLikelihood>(model: &M, start: Array1<f64>) -> BfgsSolution {
    let n = model.design().num_parameters();
    assert_eq!(start.len(), n);
    let objective = |theta: &Array1<f64>| -> (f64, Array1<f64>) {
        let (value, gradient) = model.evaluate_flat(theta.view()).unwrap();
        (-value, -gradient)
    };
    Bfgs::new(start, objective)
        .with_tolerance(1e-6)
        .with_max_iterations(500)
        .run()
        .unwrap()
}

#[test]
fn bfgs_recovers_weibull_parameters() {
    let batch = simulate_weibull(3000, 7);
    let design = ModelDesign::new(vec![
        Equation::constant_only("ln_lambda", batch.len()),
        Equation::constant_only("ln_gamma", batch.len()),
    ]);
    let model = WeibullModel::new(&design, &batch).unwrap();
    let solution = maximize(&model, Array1::zeros(2));
    let fitted = ParameterVector::from_flat(solution.final_point.view(), &design).unwrap();
    assert!((fitted.blocks[0][0] - LAMBDA.ln()).abs() < 0.15, "{fitted:?}");
    assert!((fitted.blocks[1][0] - GAMMA.ln()).abs() < 0.1, "{fitted:?}");

    let truth = ParameterVector::new(vec![array![LAMBDA.ln()], array![GAMMA.ln()]]);
    let at_optimum = model.log_likelihood(&fitted).unwrap();
    assert!(at_optimum >= model.log_likelihood(&truth).unwrap() - 1e-6);
}

#[test]
fn two_knot_spline_fit_matches_weibull_fit() {
    let batch = simulate_weibull(1500, 19);
    let spec = SplineSpec::new(RestrictedCubicSpline::natural(array![-1.0, 1.5]).unwrap(), 40)
        .unwrap();
    let design = ModelDesign::new(vec![
        Equation::new("xb", ndarray::Array2::zeros((batch.len(), 0)), false),
        Equation::new("rcs", spec.exit_design(batch.t.view()).unwrap(), true),
    ]);
    let basis = setup(&batch, &spec).unwrap();
    let model = RcsHazardModel::precomputed(&design, &batch, &basis).unwrap();
    let solution = maximize(&model, array![0.0, -1.0]);

    // log h = (gamma - 1) ln t + ln(lambda gamma).
    let slope = solution.final_point[0];
    let intercept = solution.final_point[1];
    assert!((slope - (GAMMA - 1.0)).abs() < 0.15, "slope {slope}");
    assert!((intercept - (LAMBDA * GAMMA).ln()).abs() < 0.2, "intercept {intercept}");
}
