use crate::family::{Distribution, Family};
use crate::matrix::DesignMatrix;
use crate::score::{ScoreMetric, score};
use crate::estimate::EstimationError;
use crate::types::{Coefficients, LinearPredictor, Response};
use ndarray::{Array1, Array2, Axis};
use rayon::prelude::*;
use std::ops::Range;
use std::sync::Arc;
use thiserror::Error;

/// Outcome of one solver run for a single regularization strength.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FitStatus {
    /// Met the convergence tolerance.
    Converged,
    /// Used every allowed iteration without meeting the tolerance.
    MaxIterationsReached,
    /// Stopped early because the linear predictor, objective or gradient became non-finite.
    Unstable,
}

impl FitStatus {
    pub fn is_converged(self) -> bool {
        matches!(self, FitStatus::Converged)
    }
}

/// What a solver hands back to the path builder.
#[derive(Clone, Debug)]
pub struct SolverOutcome {
    pub beta: Coefficients,
    /// `z = beta0 + X beta` for the returned coefficients.
    pub linear_predictor: LinearPredictor,
    pub status: FitStatus,
    pub iterations: usize,
    /// Penalized objective at the returned coefficients.
    pub objective: f64,
}

/// One entry of a regularization path.
#[derive(Clone, Debug)]
pub struct FittedModel {
    pub family: Family,
    pub beta: Coefficients,
    pub reg_lambda: f64,
    pub status: FitStatus,
    pub iterations: usize,
}

impl FittedModel {
    pub fn converged(&self) -> bool {
        self.status.is_converged()
    }

    /// Number of non-zero feature weights.
    pub fn n_nonzero(&self) -> usize {
        self.beta.weights().len() - self.beta.count_zero_weights()
    }

    pub fn linear_predictor(&self, x: &DesignMatrix) -> Result<Array2<f64>, EstimationError> {
        if x.ncols() != self.beta.n_features() {
            return Err(EstimationError::DimensionMismatch {
                context: "prediction design matrix columns",
                expected: self.beta.n_features(),
                found: x.ncols(),
            });
        }
        Ok(x.linear_predictor(&self.beta))
    }

    /// Means for every sample, shape `[n_samples, n_outputs]`. Class probabilities for the
    /// multinomial family.
    pub fn predict_mean(&self, x: &DesignMatrix) -> Result<Array2<f64>, EstimationError> {
        let z = self.linear_predictor(x)?;
        Ok(self.family.mu(z.view()))
    }

    /// Point predictions: the mean for scalar families, the most probable class index for
    /// the multinomial family.
    pub fn predict(&self, x: &DesignMatrix) -> Result<Array1<f64>, EstimationError> {
        let mu = self.predict_mean(x)?;
        Ok(match self.family.distribution {
            Distribution::Multinomial => mu.map_axis(Axis(1), |row| {
                row.iter()
                    .enumerate()
                    .fold((0usize, f64::NEG_INFINITY), |best, (class, &p)| {
                        if p > best.1 { (class, p) } else { best }
                    })
                    .0 as f64
            }),
            _ => mu.column(0).to_owned(),
        })
    }

    pub fn score(
        &self,
        x: &DesignMatrix,
        y: &Response,
        metric: ScoreMetric,
    ) -> Result<f64, EstimationError> {
        let mu = self.predict_mean(x)?;
        score(self.family, y, mu.view(), metric)
    }
}

/// Errors raised when selecting entries from a fitted path.
#[derive(Error, Debug, PartialEq, Eq)]
pub enum PathError {
    #[error("Index {index} is out of bounds for a path of {len} models.")]
    OutOfBounds { index: isize, len: usize },
    #[error("Range {start}..{end} is not a valid sub-path of a path of {len} models.")]
    InvalidRange { start: usize, end: usize, len: usize },
    #[error(
        "Paths can only be indexed by a single position or a contiguous range, not by a list of {0} positions."
    )]
    UnsupportedIndex(usize),
}

/// Ways of selecting from a [`RegularizationPath`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum PathIndex {
    /// A single position. Negative positions count from the end.
    At(isize),
    /// A contiguous half-open range of positions.
    Range { start: usize, end: usize },
    /// An arbitrary list of positions. Always rejected.
    List(Vec<usize>),
}

impl From<Range<usize>> for PathIndex {
    fn from(range: Range<usize>) -> Self {
        PathIndex::Range {
            start: range.start,
            end: range.end,
        }
    }
}

/// Result of [`RegularizationPath::select`].
#[derive(Clone, Debug)]
pub enum PathSelection {
    Model(Arc<FittedModel>),
    Path(RegularizationPath),
}

/// Ordered fitted models, one per regularization strength, in the order the strengths
/// were given.
///
/// Entries are reference counted: sub-paths share the same fitted models and never refit.
#[derive(Clone, Debug, Default)]
pub struct RegularizationPath {
    entries: Vec<Arc<FittedModel>>,
}

impl RegularizationPath {
    pub fn new(entries: Vec<FittedModel>) -> Self {
        Self {
            entries: entries.into_iter().map(Arc::new).collect(),
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &FittedModel> {
        self.entries.iter().map(|entry| entry.as_ref())
    }

    pub fn get(&self, position: usize) -> Option<&Arc<FittedModel>> {
        self.entries.get(position)
    }

    pub fn last(&self) -> Option<&Arc<FittedModel>> {
        self.entries.last()
    }

    pub fn reg_lambdas(&self) -> Vec<f64> {
        self.iter().map(|model| model.reg_lambda).collect()
    }

    /// Number of entries that met their convergence tolerance.
    pub fn n_converged(&self) -> usize {
        self.iter().filter(|model| model.converged()).count()
    }

    /// Contiguous sub-path sharing the same fitted models.
    pub fn slice(&self, range: Range<usize>) -> Result<RegularizationPath, PathError> {
        if range.start > range.end || range.end > self.len() {
            return Err(PathError::InvalidRange {
                start: range.start,
                end: range.end,
                len: self.len(),
            });
        }
        Ok(Self {
            entries: self.entries[range].to_vec(),
        })
    }

    pub fn select(&self, index: PathIndex) -> Result<PathSelection, PathError> {
        match index {
            PathIndex::At(position) => {
                let len = self.len() as isize;
                let resolved = if position < 0 { len + position } else { position };
                if resolved < 0 || resolved >= len {
                    return Err(PathError::OutOfBounds {
                        index: position,
                        len: self.len(),
                    });
                }
                Ok(PathSelection::Model(Arc::clone(
                    &self.entries[resolved as usize],
                )))
            }
            PathIndex::Range { start, end } => self.slice(start..end).map(PathSelection::Path),
            PathIndex::List(positions) => Err(PathError::UnsupportedIndex(positions.len())),
        }
    }

    /// Point predictions of every entry, in path order.
    pub fn predict(&self, x: &DesignMatrix) -> Result<Vec<Array1<f64>>, EstimationError> {
        self.entries
            .par_iter()
            .map(|model| model.predict(x))
            .collect()
    }

    /// Means of every entry, in path order.
    pub fn predict_mean(&self, x: &DesignMatrix) -> Result<Vec<Array2<f64>>, EstimationError> {
        self.entries
            .par_iter()
            .map(|model| model.predict_mean(x))
            .collect()
    }

    /// One score per entry, in path order.
    pub fn score(
        &self,
        x: &DesignMatrix,
        y: &Response,
        metric: ScoreMetric,
    ) -> Result<Vec<f64>, EstimationError> {
        self.entries
            .par_iter()
            .map(|model| model.score(x, y, metric))
            .collect()
    }
}
