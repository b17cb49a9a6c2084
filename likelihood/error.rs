use thiserror::Error;

/// Errors raised while validating inputs or evaluating a likelihood.
///
/// Every variant describes a violated precondition. None of them is recovered
/// inside the crate; they are reported to the caller as soon as they are seen.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum LikelihoodError {
    #[error("shape mismatch in {context}: expected {expected}, found {found}")]
    ShapeMismatch {
        context: &'static str,
        expected: usize,
        found: usize,
    },

    #[error(
        "parameter block for equation {equation} has length {found}, but its design implies {expected}"
    )]
    BlockLength {
        equation: usize,
        expected: usize,
        found: usize,
    },

    #[error("equation index {index} is out of range for a model with {available} equations")]
    UnknownEquation { index: usize, available: usize },

    #[error("interval for observation {row} is invalid: entry={entry}, exit={exit}")]
    InvalidInterval { row: usize, entry: f64, exit: f64 },

    #[error("censoring code {0} is not one of 1 (exact), 2 (right), 3 (left), 4 (interval)")]
    InvalidCensoringCode(i64),

    #[error("event indicator at observation {row} must be 0 or 1, found {value}")]
    InvalidEventIndicator { row: usize, value: f64 },

    #[error("column {column} contains non-finite value {value} at observation {row}")]
    NonFiniteValue {
        column: &'static str,
        row: usize,
        value: f64,
    },

    #[error("spline needs at least two knots, found {0}")]
    InsufficientKnots(usize),

    #[error("knot vector must be finite and strictly increasing")]
    InvalidKnotVector,

    #[error("boundary-constraint matrix has {found} rows, but {knots} knots produce {expected} raw terms")]
    InvalidConstraint {
        knots: usize,
        expected: usize,
        found: usize,
    },

    #[error("quadrature order must be at least 1")]
    InvalidQuadratureOrder,

    #[error("the interval-censored likelihood needs ctype, ltime and rtime columns")]
    MissingIntervalCensoring,

    #[error("precomputed quadrature basis was built for different times (first differing observation {row})")]
    StaleQuadratureBasis { row: usize },

    #[error("spline equation design is not the spline basis at ln t (first differing observation {row})")]
    SplineDesignMismatch { row: usize },
}
