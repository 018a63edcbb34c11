#![deny(unused_variables)]
#![deny(dead_code)]
#![deny(unused_imports)]
#![deny(clippy::no_effect_underscore_binding)]
pub mod batch;
pub mod cdfast;
pub mod config;
pub mod data;
pub mod estimate;
pub mod family;
pub mod matrix;
pub mod model;
pub mod objective;
pub mod penalty;
pub mod score;
pub mod types;

pub use config::{GlmConfig, RegLambda, SolverKind};
pub use estimate::{EstimationError, fit_path, fit_path_from};
pub use family::{Distribution, Family};
pub use matrix::DesignMatrix;
pub use model::{FitStatus, FittedModel, PathError, PathIndex, PathSelection, RegularizationPath};
pub use score::ScoreMetric;
pub use types::{Coefficients, Response};
