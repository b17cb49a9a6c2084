//! Reading observation tables from TSV files.
//!
//! Column names are fixed: `t` and `d` are required, `t0` defaults to zero and
//! `wt` to one. The interval-censored model also reads `ctype`, `ltime` and
//! `rtime`; empty cells in the two bound columns are read as NaN because a row
//! only needs the bound its censoring type uses. Covariates are any other
//! numeric columns, requested by name.

use crate::censoring::CensoringType;
use crate::data::ObservationBatch;
use crate::error::LikelihoodError;
use ndarray::Array1;
use polars::prelude::*;
use std::collections::{HashMap, HashSet};
use std::fs::File;
use std::path::Path;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum DataError {
    #[error("Error from the underlying Polars DataFrame library: {0}")]
    PolarsError(#[from] PolarsError),
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
    #[error("The required column '{0}' was not found in the input file.")]
    ColumnNotFound(String),
    #[error(
        "The column '{column_name}' could not be converted to f64. It contains non-numeric data. (Found type: {found_type})"
    )]
    ColumnWrongType {
        column_name: String,
        found_type: String,
    },
    #[error("Missing or null values were found in the column '{0}'.")]
    MissingValuesFound(String),
    #[error("Censoring code {value} in row {row} is not an integer.")]
    NonIntegerCensoringCode { row: usize, value: f64 },
    #[error("Input file contains no data rows.")]
    Empty,
    #[error(transparent)]
    Likelihood(#[from] LikelihoodError),
}

/// A validated observation batch plus the covariate columns that were asked for.
#[derive(Debug, Clone)]
pub struct SurvivalTable {
    pub batch: ObservationBatch,
    pub covariates: HashMap<String, Array1<f64>>,
}

impl SurvivalTable {
    pub fn covariate(&self, name: &str) -> Option<&Array1<f64>> {
        self.covariates.get(name)
    }
}

/// Loads `path` into a [`SurvivalTable`].
pub fn load_survival_table(
    path: &Path,
    covariates: &[String],
    interval: bool,
) -> Result<SurvivalTable, DataError> {
    log::info!("Loading observations from '{}'", path.display());
    let df = CsvReader::new(File::open(path)?)
        .with_options(
            CsvReadOptions::default()
                .with_has_header(true)
                .with_parse_options(CsvParseOptions::default().with_separator(b'\t')),
        )
        .finish()?;
    if df.height() == 0 {
        return Err(DataError::Empty);
    }
    let present: HashSet<String> = df
        .get_column_names()
        .into_iter()
        .map(|s| s.to_string())
        .collect();

    let mut required = vec!["t", "d"];
    if interval {
        required.extend(["ctype", "ltime", "rtime"]);
    }
    required.extend(covariates.iter().map(String::as_str));
    for name in &required {
        if !present.contains(*name) {
            return Err(DataError::ColumnNotFound((*name).to_string()));
        }
    }

    let n = df.height();
    let t = Array1::from_vec(numeric_column(&df, "t")?);
    let d = Array1::from_vec(numeric_column(&df, "d")?);
    let t0 = if present.contains("t0") {
        Array1::from_vec(numeric_column(&df, "t0")?)
    } else {
        Array1::zeros(n)
    };
    let wt = if present.contains("wt") {
        Array1::from_vec(numeric_column(&df, "wt")?)
    } else {
        log::debug!("No 'wt' column; using unit weights.");
        Array1::ones(n)
    };

    let mut batch = ObservationBatch::new(t0, t, d, wt)?;
    if interval {
        let ctype = numeric_column(&df, "ctype")?
            .into_iter()
            .enumerate()
            .map(|(row, value)| censoring_code(row, value))
            .collect::<Result<Vec<_>, _>>()?;
        let ltime = Array1::from_vec(nullable_column(&df, "ltime")?);
        let rtime = Array1::from_vec(nullable_column(&df, "rtime")?);
        batch = batch.with_interval_censoring(ctype, ltime, rtime)?;
    }

    let covariates = covariates
        .iter()
        .map(|name| Ok((name.clone(), Array1::from_vec(numeric_column(&df, name)?))))
        .collect::<Result<HashMap<_, _>, DataError>>()?;

    log::info!("Loaded {n} observations.");
    Ok(SurvivalTable { batch, covariates })
}

fn censoring_code(row: usize, value: f64) -> Result<CensoringType, DataError> {
    if value.fract() != 0.0 || !value.is_finite() {
        return Err(DataError::NonIntegerCensoringCode { row, value });
    }
    Ok(CensoringType::try_from(value as i64)?)
}

fn cast_f64(df: &DataFrame, column_name: &str) -> Result<Column, DataError> {
    let series = df.column(column_name)?;
    let casted = series
        .cast(&DataType::Float64)
        .map_err(|_| DataError::ColumnWrongType {
            column_name: column_name.to_string(),
            found_type: format!("{:?}", series.dtype()),
        })?;
    if casted.null_count() > series.null_count() {
        return Err(DataError::ColumnWrongType {
            column_name: column_name.to_string(),
            found_type: format!("{:?}", series.dtype()),
        });
    }
    Ok(casted)
}

fn numeric_column(df: &DataFrame, column_name: &str) -> Result<Vec<f64>, DataError> {
    let casted = cast_f64(df, column_name)?;
    if casted.null_count() > 0 {
        return Err(DataError::MissingValuesFound(column_name.to_string()));
    }
    Ok(casted.f64()?.rechunk().into_no_null_iter().collect())
}

fn nullable_column(df: &DataFrame, column_name: &str) -> Result<Vec<f64>, DataError> {
    let casted = cast_f64(df, column_name)?;
    Ok(casted
        .f64()?
        .into_iter()
        .map(|v| v.unwrap_or(f64::NAN))
        .collect())
}
