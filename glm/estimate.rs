//! Regularization path estimation.
//!
//! `fit_path` validates the whole problem up front, then fits one model per
//! regularization strength in the given order. Each entry is warm-started from the
//! previous entry's coefficients (and linear predictor, for coordinate descent).
//! Shape and configuration errors abort before any iteration; non-convergence and
//! numerical trouble are recorded on the affected entry and the path continues.

use crate::batch::BatchGradientSolver;
use crate::cdfast::CoordinateDescentSolver;
use crate::config::{GlmConfig, SolverKind};
use crate::family::{Distribution, Family};
use crate::matrix::DesignMatrix;
use crate::model::{FitStatus, FittedModel, RegularizationPath, SolverOutcome};
use crate::objective::FitContext;
use crate::penalty::{GroupIndex, Penalty};
use crate::types::{Coefficients, LinearPredictor, Response};
use ndarray::{Array2, ArrayView2};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rand_distr::StandardNormal;
use std::time::Instant;
use thiserror::Error;

/// Largest linearization point whose `exp` is still comfortably finite.
const MAX_POISSON_LINEARIZATION: f64 = 700.0;

/// A comprehensive error type for path estimation.
#[derive(Error, Debug)]
pub enum EstimationError {
    #[error(
        "Unknown distribution '{0}'. Expected one of gaussian, binomial, poisson, softplus or multinomial."
    )]
    InvalidDistribution(String),

    #[error("Dimension mismatch for {context}: expected {expected}, found {found}.")]
    DimensionMismatch {
        context: &'static str,
        expected: usize,
        found: usize,
    },

    #[error("Invalid parameter: {0}")]
    InvalidParameter(String),

    #[error("Numerical instability during {context}: a non-finite value could not be recovered.")]
    NumericalInstability { context: String },
}

/// Fits a full regularization path from a seeded random start.
///
/// `tau` replaces the identity in the quadratic penalty when given and must have one
/// column per feature.
pub fn fit_path(
    x: &DesignMatrix,
    y: &Response,
    config: &GlmConfig,
    tau: Option<ArrayView2<f64>>,
) -> Result<RegularizationPath, EstimationError> {
    let beta_init = random_initial_coefficients(x.ncols(), y.n_outputs(), config.random_state);
    fit_path_from(x, y, config, tau, beta_init)
}

/// Fits a full regularization path starting the first entry at `beta_init`.
pub fn fit_path_from(
    x: &DesignMatrix,
    y: &Response,
    config: &GlmConfig,
    tau: Option<ArrayView2<f64>>,
    beta_init: Coefficients,
) -> Result<RegularizationPath, EstimationError> {
    let problem = validate(x, y, config, tau)?;
    if beta_init.dim() != (x.ncols() + 1, y.n_outputs()) {
        let (rows, cols) = beta_init.dim();
        return Err(if rows != x.ncols() + 1 {
            EstimationError::DimensionMismatch {
                context: "initial coefficient rows",
                expected: x.ncols() + 1,
                found: rows,
            }
        } else {
            EstimationError::DimensionMismatch {
                context: "initial coefficient columns",
                expected: y.n_outputs(),
                found: cols,
            }
        });
    }

    log::info!(
        "Fitting a {} path with {} regularization strengths using {} ({} samples, {} features, alpha={}).",
        problem.family.distribution,
        problem.lambdas.len(),
        config.solver,
        x.nrows(),
        x.ncols(),
        config.alpha
    );

    let ctx = FitContext::new(x, y.as_view(), problem.family, &problem.penalty);
    let mut entries = Vec::with_capacity(problem.lambdas.len());
    let mut warm_beta = beta_init;
    let mut warm_z: Option<LinearPredictor> = None;

    for (index, &lambda) in problem.lambdas.iter().enumerate() {
        let started = Instant::now();
        let result = solve_entry(&ctx, config, lambda, warm_beta.clone(), warm_z.take());
        let (beta, status, iterations) = match result {
            Ok(SolverOutcome {
                beta,
                linear_predictor,
                status,
                iterations,
                ..
            }) => {
                warm_z = Some(linear_predictor);
                (beta, status, iterations)
            }
            Err(EstimationError::NumericalInstability { context }) => {
                log::warn!(
                    "Path entry {index} (lambda={lambda:.4e}) is unstable: {context}. Keeping the warm start."
                );
                (warm_beta.clone(), FitStatus::Unstable, 0)
            }
            Err(other) => return Err(other),
        };

        match status {
            FitStatus::Converged => log::debug!(
                "Path entry {index} (lambda={lambda:.4e}) converged in {iterations} iterations ({:.2?}).",
                started.elapsed()
            ),
            FitStatus::MaxIterationsReached => log::warn!(
                "Path entry {index} (lambda={lambda:.4e}) did not converge within {} iterations.",
                config.max_iter
            ),
            FitStatus::Unstable => {}
        }

        warm_beta = beta.clone();
        entries.push(FittedModel {
            family: problem.family,
            beta,
            reg_lambda: lambda,
            status,
            iterations,
        });
    }

    let path = RegularizationPath::new(entries);
    log::info!(
        "Path complete: {} of {} entries converged.",
        path.n_converged(),
        path.len()
    );
    Ok(path)
}

fn solve_entry(
    ctx: &FitContext,
    config: &GlmConfig,
    lambda: f64,
    beta: Coefficients,
    z: Option<LinearPredictor>,
) -> Result<SolverOutcome, EstimationError> {
    match config.solver {
        SolverKind::BatchGradient => {
            BatchGradientSolver::new(config.learning_rate, config.max_iter, config.tol)
                .solve(ctx, lambda, beta)
        }
        SolverKind::Cdfast => {
            CoordinateDescentSolver::new(config.max_iter, config.tol).solve(ctx, lambda, beta, z)
        }
    }
}

/// `N(0, 1) / (n_features + 1)` draws for every coefficient, intercept included.
pub fn random_initial_coefficients(n_features: usize, n_outputs: usize, seed: u64) -> Coefficients {
    let mut rng = StdRng::seed_from_u64(seed);
    let scale = 1.0 / (n_features + 1) as f64;
    Coefficients::new(Array2::from_shape_fn((n_features + 1, n_outputs), |_| {
        rng.sample::<f64, _>(StandardNormal) * scale
    }))
}

struct Problem {
    family: Family,
    penalty: Penalty,
    lambdas: Vec<f64>,
}

fn validate(
    x: &DesignMatrix,
    y: &Response,
    config: &GlmConfig,
    tau: Option<ArrayView2<f64>>,
) -> Result<Problem, EstimationError> {
    if y.n_samples() != x.nrows() {
        return Err(EstimationError::DimensionMismatch {
            context: "response rows",
            expected: x.nrows(),
            found: y.n_samples(),
        });
    }
    if x.nrows() == 0 {
        return Err(EstimationError::InvalidParameter(
            "the design matrix has no rows".to_string(),
        ));
    }

    let distribution = config.distr;
    if distribution.is_multinomial() {
        if y.n_outputs() < 2 {
            return Err(EstimationError::InvalidParameter(format!(
                "the multinomial distribution needs at least 2 class columns, found {}",
                y.n_outputs()
            )));
        }
    } else if y.n_outputs() != 1 {
        return Err(EstimationError::DimensionMismatch {
            context: "response columns",
            expected: 1,
            found: y.n_outputs(),
        });
    }

    if !x.is_finite() {
        return Err(EstimationError::InvalidParameter(
            "the design matrix contains non-finite values".to_string(),
        ));
    }
    validate_response(distribution, y)?;

    if !(0.0..=1.0).contains(&config.alpha) {
        return Err(EstimationError::InvalidParameter(format!(
            "alpha must lie in [0, 1], got {}",
            config.alpha
        )));
    }
    if !(config.learning_rate.is_finite() && config.learning_rate > 0.0) {
        return Err(EstimationError::InvalidParameter(format!(
            "learning_rate must be positive, got {}",
            config.learning_rate
        )));
    }
    if !(config.tol.is_finite() && config.tol > 0.0) {
        return Err(EstimationError::InvalidParameter(format!(
            "tol must be positive, got {}",
            config.tol
        )));
    }
    if !(config.poisson_linearization.is_finite()
        && config.poisson_linearization <= MAX_POISSON_LINEARIZATION)
    {
        return Err(EstimationError::InvalidParameter(format!(
            "poisson_linearization must be finite and at most {MAX_POISSON_LINEARIZATION}, got {}",
            config.poisson_linearization
        )));
    }

    let lambdas = config.reg_lambda.values();
    if lambdas.is_empty() {
        return Err(EstimationError::InvalidParameter(
            "reg_lambda must contain at least one value".to_string(),
        ));
    }
    if let Some(bad) = lambdas.iter().find(|l| !(l.is_finite() && **l >= 0.0)) {
        return Err(EstimationError::InvalidParameter(format!(
            "every reg_lambda must be finite and non-negative, got {bad}"
        )));
    }

    let mut penalty = Penalty::new(config.alpha);
    if let Some(group) = &config.group {
        if group.len() != x.ncols() {
            return Err(EstimationError::DimensionMismatch {
                context: "group assignment length",
                expected: x.ncols(),
                found: group.len(),
            });
        }
        penalty = penalty.with_groups(GroupIndex::new(group));
    }
    if let Some(tau) = tau {
        if tau.ncols() != x.ncols() {
            return Err(EstimationError::DimensionMismatch {
                context: "Tau columns",
                expected: x.ncols(),
                found: tau.ncols(),
            });
        }
        if !tau.iter().all(|v| v.is_finite()) {
            return Err(EstimationError::InvalidParameter(
                "Tau contains non-finite values".to_string(),
            ));
        }
        penalty = penalty.with_tikhonov(tau);
    }

    let family = Family::new(distribution).with_poisson_linearization(config.poisson_linearization);
    Ok(Problem {
        family,
        penalty,
        lambdas,
    })
}

fn validate_response(distribution: Distribution, y: &Response) -> Result<(), EstimationError> {
    if !y.iter().all(|v| v.is_finite()) {
        return Err(EstimationError::InvalidParameter(
            "the response contains non-finite values".to_string(),
        ));
    }
    let in_range = match distribution {
        Distribution::Gaussian => true,
        Distribution::Binomial | Distribution::Multinomial => {
            y.iter().all(|&v| (0.0..=1.0).contains(&v))
        }
        Distribution::Poisson | Distribution::Softplus => y.iter().all(|&v| v >= 0.0),
    };
    if in_range {
        Ok(())
    } else {
        Err(EstimationError::InvalidParameter(format!(
            "the response has values outside the support of the {distribution} distribution"
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RegLambda;
    use ndarray::array;

    fn small_problem() -> (DesignMatrix, Response) {
        let x = array![[0.1, 1.0], [0.5, -0.3], [-0.7, 0.2], [1.2, 0.4], [0.0, -1.0]];
        let y = Response::from_values(array![1.0, 0.0, 2.0, 3.0, 0.0]);
        (DesignMatrix::Dense(x), y)
    }

    #[test]
    fn seeded_start_is_reproducible_and_scaled() {
        let a = random_initial_coefficients(9, 1, 7);
        let b = random_initial_coefficients(9, 1, 7);
        let c = random_initial_coefficients(9, 1, 8);
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_eq!(a.dim(), (10, 1));
        assert!(a.iter().all(|v| v.abs() < 1.0));
    }

    #[test]
    fn every_strength_gets_an_entry_even_without_convergence() {
        let (x, y) = small_problem();
        let config = GlmConfig {
            max_iter: 1,
            tol: 1e-14,
            reg_lambda: RegLambda::Explicit(vec![0.5, 0.2, 0.1, 0.05]),
            ..GlmConfig::default()
        };
        for solver in [SolverKind::BatchGradient, SolverKind::Cdfast] {
            let config = GlmConfig {
                solver,
                ..config.clone()
            };
            let path = fit_path(&x, &y, &config, None).unwrap();
            assert_eq!(path.len(), 4);
            assert_eq!(path.reg_lambdas(), vec![0.5, 0.2, 0.1, 0.05]);
            assert!(path.iter().all(|m| m.status == FitStatus::MaxIterationsReached));
            assert!(path.iter().all(|m| m.iterations == 1));
        }
    }

    #[test]
    fn shape_errors_abort_before_fitting() {
        let (x, y) = small_problem();
        let short = Response::from_values(array![1.0, 0.0]);
        assert!(matches!(
            fit_path(&x, &short, &GlmConfig::default(), None),
            Err(EstimationError::DimensionMismatch {
                context: "response rows",
                ..
            })
        ));

        let grouped = GlmConfig {
            group: Some(vec![1, 1, 2]),
            ..GlmConfig::default()
        };
        assert!(matches!(
            fit_path(&x, &y, &grouped, None),
            Err(EstimationError::DimensionMismatch {
                context: "group assignment length",
                ..
            })
        ));

        let tau = Array2::<f64>::eye(3);
        assert!(matches!(
            fit_path(&x, &y, &GlmConfig::default(), Some(tau.view())),
            Err(EstimationError::DimensionMismatch {
                context: "Tau columns",
                ..
            })
        ));

        assert!(matches!(
            fit_path_from(&x, &y, &GlmConfig::default(), None, Coefficients::zeros(4, 1)),
            Err(EstimationError::DimensionMismatch {
                context: "initial coefficient rows",
                ..
            })
        ));
    }

    #[test]
    fn invalid_parameters_are_rejected() {
        let (x, y) = small_problem();
        let bad_alpha = GlmConfig {
            alpha: 1.5,
            ..GlmConfig::default()
        };
        assert!(matches!(
            fit_path(&x, &y, &bad_alpha, None),
            Err(EstimationError::InvalidParameter(_))
        ));

        let negative_lambda = GlmConfig {
            reg_lambda: RegLambda::Explicit(vec![0.1, -0.1]),
            ..GlmConfig::default()
        };
        assert!(fit_path(&x, &y, &negative_lambda, None).is_err());

        let binomial = GlmConfig {
            distr: Distribution::Binomial,
            ..GlmConfig::default()
        };
        assert!(fit_path(&x, &y, &binomial, None).is_err());

        let multinomial = GlmConfig {
            distr: Distribution::Multinomial,
            ..GlmConfig::default()
        };
        assert!(fit_path(&x, &y, &multinomial, None).is_err());
    }

    #[test]
    fn warm_start_carries_along_the_path() {
        let (x, y) = small_problem();
        let config = GlmConfig {
            reg_lambda: RegLambda::Explicit(vec![0.3, 0.3]),
            tol: 1e-10,
            ..GlmConfig::default()
        };
        let path = fit_path(&x, &y, &config, None).unwrap();
        let first = path.get(0).unwrap();
        let second = path.get(1).unwrap();
        assert!(first.converged());
        assert!(second.converged());
        // The second fit starts at the first optimum, so it has nothing left to do.
        assert!(second.iterations <= 2);
        for (a, b) in first.beta.iter().zip(second.beta.iter()) {
            assert!((a - b).abs() < 1e-8);
        }
    }
}
