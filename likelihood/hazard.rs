//! Closed-form Weibull functions and the spline hazard.
//!
//! The Weibull model uses `lambda = exp(eta_scale)` and
//! `gamma = exp(eta_shape)`, with cumulative hazard `lambda t^gamma`. The
//! spline hazard has no closed-form integral; its cumulative hazard always
//! goes through [`crate::quadrature`].

use crate::spline::RestrictedCubicSpline;
use ndarray::ArrayView1;

/// Weibull scale/shape pair on the natural scale.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Weibull {
    pub lambda: f64,
    pub gamma: f64,
}

impl Weibull {
    /// Builds the distribution from its two linear predictors.
    #[inline]
    pub fn from_predictors(eta_scale: f64, eta_shape: f64) -> Self {
        Self {
            lambda: eta_scale.exp(),
            gamma: eta_shape.exp(),
        }
    }

    #[inline]
    pub fn hazard(&self, t: f64) -> f64 {
        self.lambda * self.gamma * t.powf(self.gamma - 1.0)
    }

    #[inline]
    pub fn log_hazard(&self, t: f64) -> f64 {
        self.lambda.ln() + self.gamma.ln() + (self.gamma - 1.0) * t.ln()
    }

    #[inline]
    pub fn cumulative_hazard(&self, t: f64) -> f64 {
        self.lambda * t.powf(self.gamma)
    }

    #[inline]
    pub fn survival(&self, t: f64) -> f64 {
        (-self.cumulative_hazard(t)).exp()
    }

    #[inline]
    pub fn density(&self, t: f64) -> f64 {
        self.hazard(t) * self.survival(t)
    }

    #[inline]
    pub fn log_density(&self, t: f64) -> f64 {
        self.log_hazard(t) - self.cumulative_hazard(t)
    }

    /// Derivatives of the cumulative hazard at `t` with respect to
    /// `(eta_scale, eta_shape)`.
    #[inline]
    pub fn cumulative_hazard_gradient(&self, t: f64) -> (f64, f64) {
        let cumulative = self.cumulative_hazard(t);
        (cumulative, cumulative * self.gamma * t.ln())
    }

    /// Derivatives of the log hazard at `t` with respect to
    /// `(eta_scale, eta_shape)`.
    #[inline]
    pub fn log_hazard_gradient(&self, t: f64) -> (f64, f64) {
        (1.0, 1.0 + self.gamma * t.ln())
    }
}

/// `h(t) = exp(basis(ln t) . coefficients + constant + xb)`.
pub fn spline_hazard(
    spline: &RestrictedCubicSpline,
    t: f64,
    coefficients: ArrayView1<'_, f64>,
    constant: f64,
    xb: f64,
) -> f64 {
    spline_log_hazard(spline, t, coefficients, constant, xb).exp()
}

pub fn spline_log_hazard(
    spline: &RestrictedCubicSpline,
    t: f64,
    coefficients: ArrayView1<'_, f64>,
    constant: f64,
    xb: f64,
) -> f64 {
    spline.linear_combination(t.ln(), coefficients, constant) + xb
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::quadrature::GaussLegendre;
    use approx::{assert_abs_diff_eq, assert_relative_eq};
    use ndarray::array;

    #[test]
    fn weibull_identities_hold() {
        let w = Weibull::from_predictors(0.1f64.ln(), 1.5f64.ln());
        assert_relative_eq!(w.lambda, 0.1, max_relative = 1e-14);
        assert_relative_eq!(w.gamma, 1.5, max_relative = 1e-14);
        let t = 2.3;
        assert_relative_eq!(w.hazard(t), 0.1 * 1.5 * t.powf(0.5), max_relative = 1e-14);
        assert_relative_eq!(w.cumulative_hazard(t), 0.1 * t.powf(1.5), max_relative = 1e-14);
        assert_relative_eq!(w.density(t), w.hazard(t) * w.survival(t), max_relative = 1e-14);
        assert_relative_eq!(w.log_density(t), w.density(t).ln(), max_relative = 1e-13);
        assert_relative_eq!(w.log_hazard(t), w.hazard(t).ln(), max_relative = 1e-13);
    }

    #[test]
    fn cumulative_hazard_is_integral_of_hazard() {
        let w = Weibull::from_predictors(0.4f64.ln(), 1.3f64.ln());
        let rule = GaussLegendre::new(40).unwrap();
        let integral = rule.integrate(0.5, 3.0, |u| w.hazard(u)).unwrap();
        assert_relative_eq!(
            integral,
            w.cumulative_hazard(3.0) - w.cumulative_hazard(0.5),
            max_relative = 1e-10
        );
    }

    #[test]
    fn gradients_match_finite_differences() {
        let (a, b) = (-0.7, 0.2);
        let t = 1.7;
        let h = 1e-6;
        let w = Weibull::from_predictors(a, b);
        let (dh_a, dh_b) = w.cumulative_hazard_gradient(t);
        let numeric_a = (Weibull::from_predictors(a + h, b).cumulative_hazard(t)
            - Weibull::from_predictors(a - h, b).cumulative_hazard(t))
            / (2.0 * h);
        let numeric_b = (Weibull::from_predictors(a, b + h).cumulative_hazard(t)
            - Weibull::from_predictors(a, b - h).cumulative_hazard(t))
            / (2.0 * h);
        assert_abs_diff_eq!(dh_a, numeric_a, epsilon = 1e-7);
        assert_abs_diff_eq!(dh_b, numeric_b, epsilon = 1e-7);

        let (dl_a, dl_b) = w.log_hazard_gradient(t);
        let numeric_b = (Weibull::from_predictors(a, b + h).log_hazard(t)
            - Weibull::from_predictors(a, b - h).log_hazard(t))
            / (2.0 * h);
        assert_abs_diff_eq!(dl_a, 1.0, epsilon = 1e-12);
        assert_abs_diff_eq!(dl_b, numeric_b, epsilon = 1e-7);
    }

    #[test]
    fn two_knot_spline_hazard_is_weibull() {
        // log h = (gamma - 1) ln t + ln(lambda gamma) is a straight line in ln t.
        let spline = RestrictedCubicSpline::natural(array![-1.0, 2.0]).unwrap();
        let w = Weibull {
            lambda: 0.3,
            gamma: 1.8,
        };
        let coefficients = array![w.gamma - 1.0];
        let constant = (w.lambda * w.gamma).ln();
        for &t in &[0.2, 1.0, 4.5, 20.0] {
            assert_relative_eq!(
                spline_hazard(&spline, t, coefficients.view(), constant, 0.0),
                w.hazard(t),
                max_relative = 1e-12
            );
        }
    }
}
