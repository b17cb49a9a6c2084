//! Per-observation log-likelihood assembly under four censoring regimes.
//!
//! Every regime is evaluated for every row and the active one is selected,
//! so a batch with mixed censoring stays a single pass with no data-dependent
//! control flow around the arithmetic. Inputs to inactive regimes are swapped
//! for neutral values before any transcendental function sees them, and their
//! outputs are replaced rather than multiplied by zero, so a NaN or infinity
//! produced by an inactive regime cannot leak into the value or the gradient.

use crate::error::LikelihoodError;
use ndarray::ArrayView1;
use serde::{Deserialize, Serialize};

/// How an observation's event time relates to the recorded times.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum CensoringType {
    /// Event observed at `ltime`.
    Exact = 1,
    /// Event after `ltime`.
    Right = 2,
    /// Event before `rtime`.
    Left = 3,
    /// Event in `(ltime, rtime]`.
    Interval = 4,
}

impl CensoringType {
    pub const ALL: [CensoringType; 4] = [
        CensoringType::Exact,
        CensoringType::Right,
        CensoringType::Left,
        CensoringType::Interval,
    ];

    #[inline]
    pub fn code(self) -> u8 {
        self as u8
    }

    #[inline]
    fn slot(self) -> usize {
        self as usize - 1
    }
}

impl TryFrom<i64> for CensoringType {
    type Error = LikelihoodError;

    fn try_from(code: i64) -> Result<Self, Self::Error> {
        match code {
            1 => Ok(CensoringType::Exact),
            2 => Ok(CensoringType::Right),
            3 => Ok(CensoringType::Left),
            4 => Ok(CensoringType::Interval),
            other => Err(LikelihoodError::InvalidCensoringCode(other)),
        }
    }
}

/// One-hot selector over the four regimes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CensoringSelector {
    active: [bool; 4],
}

impl CensoringSelector {
    pub fn new(ctype: CensoringType) -> Self {
        let mut active = [false; 4];
        active[ctype.slot()] = true;
        Self { active }
    }

    #[inline]
    pub fn is_active(&self, ctype: CensoringType) -> bool {
        self.active[ctype.slot()]
    }

    /// Whether any active regime reads the left time.
    #[inline]
    pub fn uses_ltime(&self) -> bool {
        self.is_active(CensoringType::Exact)
            || self.is_active(CensoringType::Right)
            || self.is_active(CensoringType::Interval)
    }

    /// Whether any active regime reads the right time.
    #[inline]
    pub fn uses_rtime(&self) -> bool {
        self.is_active(CensoringType::Left) || self.is_active(CensoringType::Interval)
    }

    /// Sums the active entries of `terms`, ignoring inactive ones entirely.
    #[inline]
    pub fn select(&self, terms: [f64; 4]) -> f64 {
        terms
            .iter()
            .zip(self.active.iter())
            .map(|(&term, &on)| masked(term, on))
            .sum()
    }
}

/// `value` when the branch is active, otherwise `neutral`.
#[inline]
pub fn guarded(value: f64, active: bool, neutral: f64) -> f64 {
    if active { value } else { neutral }
}

#[inline]
fn masked(value: f64, active: bool) -> f64 {
    guarded(value, active, 0.0)
}

/// `ln(x)` for an active branch; zero for an inactive one.
#[inline]
pub fn safe_ln(x: f64, active: bool) -> f64 {
    guarded(x, active, 1.0).ln()
}

/// `a / b` for an active branch; zero for an inactive one.
#[inline]
pub fn safe_div(a: f64, b: f64, active: bool) -> f64 {
    masked(a, active) / guarded(b, active, 1.0)
}

/// Log hazard and cumulative hazard at one time point, with derivatives
/// with respect to the two model predictors.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PointTerms {
    pub log_hazard: f64,
    pub d_log_hazard: [f64; 2],
    pub cumulative: f64,
    pub d_cumulative: [f64; 2],
}

/// A row's log-likelihood contribution and its derivatives with respect to
/// the two predictors.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Contribution {
    pub value: f64,
    pub gradient: [f64; 2],
}

/// Assembles one row of the interval-censored likelihood.
///
/// `left` holds the terms at `ltime` and `right` those at `rtime`. The four
/// regimes are
///
/// 1. exact: `ln f(ltime) = ln h(ltime) - H(ltime)`
/// 2. right: `ln S(ltime) = -H(ltime)`
/// 3. left: `ln(1 - S(rtime))`
/// 4. interval: `ln(S(ltime) - S(rtime))`
///
/// `1 - S` and `S_l - S_r` are formed with `expm1` so that short intervals and
/// small cumulative hazards keep their precision.
pub fn censored_contribution(
    selector: CensoringSelector,
    left: &PointTerms,
    right: &PointTerms,
) -> Contribution {
    let on_left = selector.is_active(CensoringType::Left);
    let on_interval = selector.is_active(CensoringType::Interval);

    let h_l = left.cumulative;
    let h_r = right.cumulative;

    // ln(1 - exp(-H_r)) and ln(1 - exp(-(H_r - H_l))).
    let left_log = safe_ln(-(-h_r).exp_m1(), on_left);
    let gap_log = safe_ln(-(h_l - h_r).exp_m1(), on_interval);

    let value = selector.select([
        left.log_hazard - h_l,
        -h_l,
        left_log,
        -h_l + gap_log,
    ]);

    let mut gradient = [0.0; 2];
    for (k, slot) in gradient.iter_mut().enumerate() {
        let dl = left.d_cumulative[k];
        let dr = right.d_cumulative[k];
        let exact = left.d_log_hazard[k] - dl;
        let right_censored = -dl;
        let left_censored = safe_div(dr, h_r.exp_m1(), on_left);
        let interval = -dl + safe_div(dr - dl, (h_r - h_l).exp_m1(), on_interval);
        *slot = selector.select([
            exact,
            right_censored,
            left_censored,
            interval,
        ]);
    }

    Contribution { value, gradient }
}

/// `d ln h(t) - H(t)`: the event/right-censoring contribution used by models
/// without interval censoring.
#[inline]
pub fn event_contribution(event: f64, log_hazard: f64, cumulative: f64) -> f64 {
    event * log_hazard - cumulative
}

/// `sum_i wt_i c_i`.
pub fn weighted_sum(
    contributions: ArrayView1<'_, f64>,
    weights: ArrayView1<'_, f64>,
) -> Result<f64, LikelihoodError> {
    if contributions.len() != weights.len() {
        return Err(LikelihoodError::ShapeMismatch {
            context: "importance weights",
            expected: contributions.len(),
            found: weights.len(),
        });
    }
    Ok(contributions.dot(&weights))
}
