//! # Data Loading and Validation Module
//!
//! Reads a comma-separated table with a header row. One named column is the
//! response; every other column becomes a feature, in file order. All cells must
//! parse as finite numbers.

use crate::family::Distribution;
use crate::types::Response;
use ndarray::{Array1, Array2};
use std::path::Path;
use thiserror::Error;

/// Validated data ready for path fitting.
#[derive(Debug)]
pub struct TrainingData {
    /// Raw response values from the response column.
    pub y: Array1<f64>,
    /// Feature matrix with one column per non-response column.
    pub x: Array2<f64>,
    pub feature_names: Vec<String>,
}

#[derive(Error, Debug)]
pub enum DataError {
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
    #[error("Failed to read CSV input: {0}")]
    CsvError(#[from] csv::Error),
    #[error(
        "The response column '{0}' was not found in the input file. Please check spelling and case."
    )]
    ColumnNotFound(String),
    #[error("Row {row}, column '{column}': could not parse '{value}' as a finite number.")]
    NotANumber {
        row: usize,
        column: String,
        value: String,
    },
    #[error("Row {row} has {found} fields but the header has {expected}.")]
    RaggedRow {
        row: usize,
        expected: usize,
        found: usize,
    },
    #[error("The input file has no data rows.")]
    NoRows,
    #[error("The input file has no feature columns besides the response '{0}'.")]
    NoFeatures(String),
    #[error("Row {row}: class label {value} is not an integer in [0, {limit}).")]
    InvalidLabel { row: usize, value: f64, limit: usize },
}

/// Loads `path`, using the column named `response` as the response.
pub fn load_training_data(path: impl AsRef<Path>, response: &str) -> Result<TrainingData, DataError> {
    let file = std::fs::File::open(path)?;
    read_training_data(file, response)
}

/// Same as [`load_training_data`] for any reader.
pub fn read_training_data<R: std::io::Read>(
    reader: R,
    response: &str,
) -> Result<TrainingData, DataError> {
    let mut csv_reader = csv::ReaderBuilder::new()
        .has_headers(true)
        .flexible(true)
        .trim(csv::Trim::All)
        .from_reader(reader);

    let headers: Vec<String> = csv_reader.headers()?.iter().map(str::to_string).collect();
    let response_index = headers
        .iter()
        .position(|h| h == response)
        .ok_or_else(|| DataError::ColumnNotFound(response.to_string()))?;
    let feature_names: Vec<String> = headers
        .iter()
        .enumerate()
        .filter(|&(i, _)| i != response_index)
        .map(|(_, name)| name.clone())
        .collect();
    if feature_names.is_empty() {
        return Err(DataError::NoFeatures(response.to_string()));
    }

    let mut y = Vec::new();
    let mut features = Vec::new();
    for (row, record) in csv_reader.records().enumerate() {
        let record = record?;
        if record.len() != headers.len() {
            return Err(DataError::RaggedRow {
                row: row + 1,
                expected: headers.len(),
                found: record.len(),
            });
        }
        for (col, field) in record.iter().enumerate() {
            let value = parse_cell(field, row + 1, &headers[col])?;
            if col == response_index {
                y.push(value);
            } else {
                features.push(value);
            }
        }
    }

    let n_rows = y.len();
    if n_rows == 0 {
        return Err(DataError::NoRows);
    }
    let x = Array2::from_shape_vec((n_rows, feature_names.len()), features).map_err(|_| {
        DataError::RaggedRow {
            row: n_rows,
            expected: headers.len(),
            found: 0,
        }
    })?;
    log::info!(
        "Loaded {} rows with {} features; response column '{}'.",
        n_rows,
        feature_names.len(),
        response
    );
    Ok(TrainingData {
        y: Array1::from(y),
        x,
        feature_names,
    })
}

/// Shapes raw response values for a distribution: one column for scalar families and
/// one indicator column per class for the multinomial family.
///
/// Class labels must be integers below the number of rows, which bounds the indicator
/// matrix at `n x n`.
pub fn response_for(distribution: Distribution, y: &Array1<f64>) -> Result<Response, DataError> {
    if !distribution.is_multinomial() {
        return Ok(Response::from_values(y.clone()));
    }
    let limit = y.len();
    let mut labels = Vec::with_capacity(limit);
    for (row, &value) in y.iter().enumerate() {
        if !(value >= 0.0 && value < limit as f64 && value.fract() == 0.0) {
            return Err(DataError::InvalidLabel {
                row: row + 1,
                value,
                limit,
            });
        }
        labels.push(value as usize);
    }
    let n_classes = labels
        .iter()
        .max()
        .and_then(|m| m.checked_add(1))
        .unwrap_or(0);
    Ok(Response::from_labels(&labels, n_classes))
}

fn parse_cell(field: &str, row: usize, column: &str) -> Result<f64, DataError> {
    field
        .parse::<f64>()
        .ok()
        .filter(|v| v.is_finite())
        .ok_or_else(|| DataError::NotANumber {
            row,
            column: column.to_string(),
            value: field.to_string(),
        })
}
