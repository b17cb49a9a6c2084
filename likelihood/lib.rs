#![deny(unused_variables)]
#![deny(dead_code)]
#![deny(unused_imports)]
#![deny(clippy::no_effect_underscore_binding)]
pub mod censoring;
pub mod config;
pub mod data;
pub mod error;
pub mod gradcheck;
pub mod hazard;
pub mod models;
pub mod predictor;
pub mod quadrature;
pub mod setup;
pub mod spline;
pub mod table;

pub use censoring::CensoringType;
pub use data::ObservationBatch;
pub use error::LikelihoodError;
pub use models::{
    LikelihoodState, RcsHazardModel, SurvivalLikelihood, WeibullIntervalModel, WeibullModel,
};
pub use predictor::{Equation, ModelDesign, ParameterVector};
pub use quadrature::{GaussLegendre, PrecomputedQuadratureBasis};
pub use setup::{SplineSpec, setup};
pub use spline::RestrictedCubicSpline;
