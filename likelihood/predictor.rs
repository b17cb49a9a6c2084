//! Linear predictors for the model equations.
//!
//! A model is a list of equations. Equation `k` owns a design matrix `X_k`
//! whose rows are the observations, and optionally a constant. Its parameter
//! block is laid out as `[beta_1, ..., beta_p, constant]`, with the constant
//! present only when the equation carries one. For the spline equation of the
//! flexible-hazard models the constant is the baseline spline intercept.

use crate::error::LikelihoodError;
use ndarray::{Array1, Array2, ArrayView1, s};
use serde::{Deserialize, Serialize};

/// One model equation: a design matrix and whether a trailing constant is
/// appended to its parameter block.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Equation {
    pub name: String,
    pub design: Array2<f64>,
    pub constant: bool,
}

impl Equation {
    pub fn new(name: impl Into<String>, design: Array2<f64>, constant: bool) -> Self {
        Self {
            name: name.into(),
            design,
            constant,
        }
    }

    /// An equation with no covariates: only the constant.
    pub fn constant_only(name: impl Into<String>, num_observations: usize) -> Self {
        Self::new(name, Array2::zeros((num_observations, 0)), true)
    }

    #[inline]
    pub fn block_len(&self) -> usize {
        self.design.ncols() + usize::from(self.constant)
    }
}

/// All equations of a model, row-aligned with the observation batch.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelDesign {
    pub equations: Vec<Equation>,
}

impl ModelDesign {
    pub fn new(equations: Vec<Equation>) -> Self {
        Self { equations }
    }

    #[inline]
    pub fn num_equations(&self) -> usize {
        self.equations.len()
    }

    pub fn equation(&self, index: usize) -> Result<&Equation, LikelihoodError> {
        self.equations
            .get(index)
            .ok_or(LikelihoodError::UnknownEquation {
                index,
                available: self.equations.len(),
            })
    }

    /// Checks that the design has exactly `expected` equations and that every
    /// design matrix has `num_observations` rows.
    pub fn validate(
        &self,
        expected: usize,
        num_observations: usize,
    ) -> Result<(), LikelihoodError> {
        if self.equations.len() != expected {
            return Err(LikelihoodError::ShapeMismatch {
                context: "number of equations",
                expected,
                found: self.equations.len(),
            });
        }
        for equation in &self.equations {
            if equation.design.nrows() != num_observations {
                return Err(LikelihoodError::ShapeMismatch {
                    context: "design matrix rows",
                    expected: num_observations,
                    found: equation.design.nrows(),
                });
            }
        }
        Ok(())
    }

    /// Total number of parameters across all blocks.
    pub fn num_parameters(&self) -> usize {
        self.equations.iter().map(Equation::block_len).sum()
    }
}

/// Parameters of a model, one block per equation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParameterVector {
    pub blocks: Vec<Array1<f64>>,
}

impl ParameterVector {
    pub fn new(blocks: Vec<Array1<f64>>) -> Self {
        Self { blocks }
    }

    /// A zero-filled parameter vector shaped for `design`.
    pub fn zeros_like(design: &ModelDesign) -> Self {
        Self {
            blocks: design
                .equations
                .iter()
                .map(|eq| Array1::zeros(eq.block_len()))
                .collect(),
        }
    }

    #[inline]
    pub fn block(&self, index: usize) -> Option<&Array1<f64>> {
        self.blocks.get(index)
    }

    /// Concatenates every block into a single vector, equation by equation.
    pub fn flatten(&self) -> Array1<f64> {
        self.blocks
            .iter()
            .flat_map(|block| block.iter().copied())
            .collect()
    }

    /// Splits a flat vector back into blocks sized by `design`.
    pub fn from_flat(
        flat: ArrayView1<'_, f64>,
        design: &ModelDesign,
    ) -> Result<Self, LikelihoodError> {
        let total = design.num_parameters();
        if flat.len() != total {
            return Err(LikelihoodError::ShapeMismatch {
                context: "flattened parameter vector",
                expected: total,
                found: flat.len(),
            });
        }
        let mut offset = 0usize;
        let mut blocks = Vec::with_capacity(design.num_equations());
        for equation in &design.equations {
            let len = equation.block_len();
            blocks.push(flat.slice(s![offset..offset + len]).to_owned());
            offset += len;
        }
        Ok(Self { blocks })
    }

    /// Checks block count and block lengths against `design`.
    pub fn validate(&self, design: &ModelDesign) -> Result<(), LikelihoodError> {
        if self.blocks.len() != design.num_equations() {
            return Err(LikelihoodError::ShapeMismatch {
                context: "number of parameter blocks",
                expected: design.num_equations(),
                found: self.blocks.len(),
            });
        }
        for (equation, (block, eq)) in self.blocks.iter().zip(&design.equations).enumerate() {
            if block.len() != eq.block_len() {
                return Err(LikelihoodError::BlockLength {
                    equation,
                    expected: eq.block_len(),
                    found: block.len(),
                });
            }
        }
        Ok(())
    }
}

/// Splits a block into its covariate coefficients and its constant (zero when
/// the equation has none).
pub fn split_block<'a>(block: &'a Array1<f64>, equation: &Equation) -> (ArrayView1<'a, f64>, f64) {
    let p = equation.design.ncols();
    let constant = if equation.constant { block[p] } else { 0.0 };
    (block.slice(s![..p]), constant)
}

/// Per-observation linear predictor of equation `index`.
pub fn linear_predictor(
    params: &ParameterVector,
    design: &ModelDesign,
    index: usize,
) -> Result<Array1<f64>, LikelihoodError> {
    let equation = design.equation(index)?;
    let block = params
        .block(index)
        .ok_or(LikelihoodError::UnknownEquation {
            index,
            available: params.blocks.len(),
        })?;
    if block.len() != equation.block_len() {
        return Err(LikelihoodError::BlockLength {
            equation: index,
            expected: equation.block_len(),
            found: block.len(),
        });
    }
    let (coefficients, constant) = split_block(block, equation);
    let mut eta = equation.design.dot(&coefficients);
    if equation.constant {
        eta += constant;
    }
    Ok(eta)
}

/// Back-propagates a per-observation score `dL/d eta` through equation
/// `equation`, giving `dL/d beta` for its block.
pub fn accumulate_block_gradient(
    equation: &Equation,
    score: ArrayView1<'_, f64>,
) -> Array1<f64> {
    let p = equation.design.ncols();
    let mut gradient = Array1::<f64>::zeros(equation.block_len());
    gradient
        .slice_mut(s![..p])
        .assign(&equation.design.t().dot(&score));
    if equation.constant {
        gradient[p] = score.sum();
    }
    gradient
}
