//! TOML model descriptions.
//!
//! A config names the model variant, its equations (covariate columns,
//! constant, optional starting parameters) and, for the spline hazard, the
//! knots and quadrature order. [`ModelConfig::build`] turns it into the design,
//! parameters and spline settings for a loaded [`SurvivalTable`].

use crate::data::ObservationBatch;
use crate::error::LikelihoodError;
use crate::models::{RcsHazardModel, SurvivalLikelihood, WeibullIntervalModel, WeibullModel};
use crate::predictor::{Equation, ModelDesign, ParameterVector};
use crate::quadrature::PrecomputedQuadratureBasis;
use crate::setup::{SplineSpec, setup};
use crate::spline::RestrictedCubicSpline;
use crate::table::SurvivalTable;
use itertools::Itertools;
use ndarray::{Array1, Array2};
use serde::{Deserialize, Serialize};
use std::fs;
use std::io::{BufWriter, Write};
use std::path::Path;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read or write config file: {0}")]
    IoError(#[from] std::io::Error),
    #[error("Failed to parse TOML config file: {0}")]
    TomlParseError(#[from] toml::de::Error),
    #[error("Failed to serialize config to TOML format: {0}")]
    TomlSerializeError(#[from] toml::ser::Error),
    #[error("Model '{model}' needs {expected} equations, but the config lists {found}.")]
    EquationCount {
        model: &'static str,
        expected: usize,
        found: usize,
    },
    #[error("Equation names must be unique; repeated: {0}")]
    DuplicateEquations(String),
    #[error("Equation '{equation}' uses covariate '{covariate}', which was not loaded.")]
    UnknownCovariate { equation: String, covariate: String },
    #[error("The rcs-hazard model needs a [spline] section.")]
    MissingSpline,
    #[error(
        "The spline equation '{0}' takes its design from the spline basis and cannot list covariates."
    )]
    SplineEquationCovariates(String),
    #[error(
        "Equation '{0}' of the rcs-hazard model cannot carry a constant; the spline equation already holds the baseline intercept. Set `constant = false`."
    )]
    CovariateEquationConstant(String),
    #[error("Boundary-constraint rows must all have the same length.")]
    RaggedConstraint,
    #[error(transparent)]
    Likelihood(#[from] LikelihoodError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ModelKind {
    Weibull,
    WeibullInterval,
    RcsHazard,
}

impl ModelKind {
    pub fn name(self) -> &'static str {
        match self {
            ModelKind::Weibull => "weibull",
            ModelKind::WeibullInterval => "weibull-interval",
            ModelKind::RcsHazard => "rcs-hazard",
        }
    }

    pub fn needs_interval_columns(self) -> bool {
        self == ModelKind::WeibullInterval
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SplineConfig {
    /// Knots on the log-time scale.
    pub knots: Vec<f64>,
    pub nodes: usize,
    /// Row-major `(K + 1) x m` boundary constraint; the natural-boundary
    /// matrix when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub constraint: Option<Vec<Vec<f64>>>,
}

impl SplineConfig {
    pub fn to_spec(&self) -> Result<SplineSpec, ConfigError> {
        let knots = Array1::from_vec(self.knots.clone());
        let spline = match &self.constraint {
            None => RestrictedCubicSpline::natural(knots)?,
            Some(rows) => {
                let ncols = rows.first().map_or(0, Vec::len);
                if rows.iter().any(|r| r.len() != ncols) {
                    return Err(ConfigError::RaggedConstraint);
                }
                let flat: Vec<f64> = rows.iter().flatten().copied().collect();
                let constraint = Array2::from_shape_vec((rows.len(), ncols), flat)
                    .map_err(|_| ConfigError::RaggedConstraint)?;
                RestrictedCubicSpline::new(knots, constraint)?
            }
        };
        Ok(SplineSpec::new(spline, self.nodes)?)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EquationConfig {
    pub name: String,
    #[serde(default)]
    pub covariates: Vec<String>,
    #[serde(default = "default_constant")]
    pub constant: bool,
    /// Starting values `[coefficients..., constant]`; zeros when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parameters: Option<Vec<f64>>,
}

fn default_constant() -> bool {
    true
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelConfig {
    pub model: ModelKind,
    #[serde(default)]
    pub precompute: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub spline: Option<SplineConfig>,
    pub equations: Vec<EquationConfig>,
}

/// Everything needed to evaluate a configured model on one table.
#[derive(Debug, Clone)]
pub struct ConfiguredModel {
    pub kind: ModelKind,
    pub design: ModelDesign,
    pub params: ParameterVector,
    pub spline: Option<SplineSpec>,
    pub precomputed: Option<PrecomputedQuadratureBasis>,
}

impl ConfiguredModel {
    /// Borrows the configured design and spline settings as a likelihood.
    pub fn likelihood<'a>(
        &'a self,
        batch: &'a ObservationBatch,
    ) -> Result<Box<dyn SurvivalLikelihood + 'a>, ConfigError> {
        let model: Box<dyn SurvivalLikelihood + 'a> = match self.kind {
            ModelKind::Weibull => Box::new(WeibullModel::new(&self.design, batch)?),
            ModelKind::WeibullInterval => {
                Box::new(WeibullIntervalModel::new(&self.design, batch)?)
            }
            ModelKind::RcsHazard => match (&self.precomputed, &self.spline) {
                (Some(basis), _) => Box::new(RcsHazardModel::precomputed(&self.design, batch, basis)?),
                (None, Some(spec)) => Box::new(RcsHazardModel::general(&self.design, batch, spec)?),
                (None, None) => return Err(ConfigError::MissingSpline),
            },
        };
        Ok(model)
    }
}

impl ModelConfig {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let toml_string = fs::read_to_string(path)?;
        let config = toml::from_str(&toml_string)?;
        Ok(config)
    }

    pub fn save(&self, path: &Path) -> Result<(), ConfigError> {
        let toml_string = toml::to_string_pretty(self)?;
        let mut file = BufWriter::new(fs::File::create(path)?);
        file.write_all(toml_string.as_bytes())?;
        Ok(())
    }

    /// Covariate columns the table must provide, in first-use order.
    pub fn covariate_columns(&self) -> Vec<String> {
        self.equations
            .iter()
            .flat_map(|eq| eq.covariates.iter().cloned())
            .unique()
            .collect()
    }

    pub fn build(&self, table: &SurvivalTable) -> Result<ConfiguredModel, ConfigError> {
        if self.equations.len() != 2 {
            return Err(ConfigError::EquationCount {
                model: self.model.name(),
                expected: 2,
                found: self.equations.len(),
            });
        }
        let repeated = self.equations.iter().map(|eq| &eq.name).duplicates().join(", ");
        if !repeated.is_empty() {
            return Err(ConfigError::DuplicateEquations(repeated));
        }

        let n = table.batch.len();
        let spline = match (&self.model, &self.spline) {
            (ModelKind::RcsHazard, None) => return Err(ConfigError::MissingSpline),
            (ModelKind::RcsHazard, Some(cfg)) => Some(cfg.to_spec()?),
            (_, Some(_)) => {
                log::warn!("Ignoring [spline] section for model '{}'.", self.model.name());
                None
            }
            (_, None) => None,
        };

        let mut equations = Vec::with_capacity(self.equations.len());
        for (index, eq) in self.equations.iter().enumerate() {
            let design = match (&spline, index) {
                (Some(spec), 1) => {
                    if !eq.covariates.is_empty() {
                        return Err(ConfigError::SplineEquationCovariates(eq.name.clone()));
                    }
                    spec.exit_design(table.batch.t.view())?
                }
                (Some(_), 0) if eq.constant => {
                    return Err(ConfigError::CovariateEquationConstant(eq.name.clone()));
                }
                _ => covariate_design(eq, table, n)?,
            };
            equations.push(Equation::new(eq.name.clone(), design, eq.constant));
        }
        let design = ModelDesign::new(equations);

        let blocks = self
            .equations
            .iter()
            .zip(&design.equations)
            .map(|(cfg, eq)| match &cfg.parameters {
                Some(values) => Array1::from_vec(values.clone()),
                None => Array1::zeros(eq.block_len()),
            })
            .collect();
        let params = ParameterVector::new(blocks);
        params.validate(&design)?;

        let precomputed = match (&spline, self.precompute) {
            (Some(spec), true) => Some(setup(&table.batch, spec)?),
            _ => None,
        };
        log::info!(
            "Configured '{}' model with {} parameters.",
            self.model.name(),
            design.num_parameters()
        );
        Ok(ConfiguredModel {
            kind: self.model,
            design,
            params,
            spline,
            precomputed,
        })
    }
}

fn covariate_design(
    eq: &EquationConfig,
    table: &SurvivalTable,
    n: usize,
) -> Result<Array2<f64>, ConfigError> {
    let mut design = Array2::<f64>::zeros((n, eq.covariates.len()));
    for (j, name) in eq.covariates.iter().enumerate() {
        let column = table
            .covariate(name)
            .ok_or_else(|| ConfigError::UnknownCovariate {
                equation: eq.name.clone(),
                covariate: name.clone(),
            })?;
        if column.len() != n {
            return Err(LikelihoodError::ShapeMismatch {
                context: "covariate column",
                expected: n,
                found: column.len(),
            }
            .into());
        }
        design.column_mut(j).assign(column);
    }
    Ok(design)
}
