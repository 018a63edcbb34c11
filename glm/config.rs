use crate::family::{DEFAULT_POISSON_LINEARIZATION, Distribution};
use serde::{Deserialize, Serialize};
use std::fmt;
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
}

/// Which optimizer fits each path entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SolverKind {
    /// Proximal batch gradient descent with a fixed learning rate.
    BatchGradient,
    /// Coordinate descent with active-set pruning.
    #[default]
    Cdfast,
}

impl fmt::Display for SolverKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SolverKind::BatchGradient => f.write_str("batch-gradient"),
            SolverKind::Cdfast => f.write_str("cdfast"),
        }
    }
}

/// Regularization strengths, fitted in the order they are produced.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum RegLambda {
    Explicit(Vec<f64>),
    /// `count` values spaced evenly on a log scale from `start` to `end`, both included.
    Geometric { start: f64, end: f64, count: usize },
}

impl Default for RegLambda {
    fn default() -> Self {
        RegLambda::Geometric {
            start: 0.5,
            end: 0.01,
            count: 10,
        }
    }
}

impl RegLambda {
    pub fn values(&self) -> Vec<f64> {
        match *self {
            RegLambda::Explicit(ref values) => values.clone(),
            RegLambda::Geometric { start, end, count } => match count {
                0 => Vec::new(),
                1 => vec![start],
                _ => {
                    let ratio = end / start;
                    (0..count)
                        .map(|i| start * ratio.powf(i as f64 / (count - 1) as f64))
                        .collect()
                }
            },
        }
    }
}

/// Everything `fit_path` needs besides the data and the optional Tikhonov matrix.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct GlmConfig {
    pub distr: Distribution,
    /// Elastic-net mix: 1 is pure L1 or group lasso, 0 is pure ridge.
    pub alpha: f64,
    /// Group id per feature for the group lasso. Group 0 is unpenalized.
    pub group: Option<Vec<usize>>,
    pub solver: SolverKind,
    pub learning_rate: f64,
    pub max_iter: usize,
    pub tol: f64,
    /// Point beyond which the Poisson mean grows linearly.
    pub poisson_linearization: f64,
    /// Seed for the random initial coefficients.
    pub random_state: u64,
    /// Kept last so it serializes as a trailing table.
    pub reg_lambda: RegLambda,
}

impl Default for GlmConfig {
    fn default() -> Self {
        Self {
            distr: Distribution::Poisson,
            alpha: 0.5,
            group: None,
            solver: SolverKind::default(),
            learning_rate: 0.2,
            max_iter: 1000,
            tol: 1e-6,
            poisson_linearization: DEFAULT_POISSON_LINEARIZATION,
            random_state: 0,
            reg_lambda: RegLambda::default(),
        }
    }
}

impl GlmConfig {
    pub fn from_toml_str(text: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(text)?)
    }

    pub fn to_toml_string(&self) -> Result<String, ConfigError> {
        Ok(toml::to_string_pretty(self)?)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let text = fs::read_to_string(path)?;
        Self::from_toml_str(&text)
    }

    pub fn save(&self, path: impl AsRef<Path>) -> Result<(), ConfigError> {
        let text = self.to_toml_string()?;
        let mut file = BufWriter::new(fs::File::create(path)?);
        file.write_all(text.as_bytes())?;
        file.flush()?;
        Ok(())
    }
}
