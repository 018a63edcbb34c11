//! Proximal batch gradient descent.
//!
//! Each iteration takes a full gradient step on the smooth part of the objective
//! (mean loss plus the quadratic penalty) and then applies the proximal operator of
//! the non-smooth part with threshold `learning_rate * lambda * alpha`.

use crate::estimate::EstimationError;
use crate::model::{FitStatus, SolverOutcome};
use crate::objective::FitContext;
use crate::types::{Coefficients, LinearPredictor};

/// Relative step below which the iteration is considered converged is measured
/// against at least this coefficient norm.
const MIN_RELATIVE_SCALE: f64 = 1e-12;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BatchGradientSolver {
    pub learning_rate: f64,
    pub max_iterations: usize,
    pub tolerance: f64,
}

impl BatchGradientSolver {
    pub fn new(learning_rate: f64, max_iterations: usize, tolerance: f64) -> Self {
        Self {
            learning_rate,
            max_iterations,
            tolerance,
        }
    }

    /// Runs the proximal iteration for one regularization strength starting at `beta`.
    ///
    /// Returns the iterate with the lowest penalized objective seen. If the iteration
    /// produces a non-finite linear predictor, gradient or objective, the run stops and the
    /// best finite iterate so far is returned with [`FitStatus::Unstable`].
    pub fn solve(
        &self,
        ctx: &FitContext,
        lambda: f64,
        beta: Coefficients,
    ) -> Result<SolverOutcome, EstimationError> {
        let mut beta = beta;
        let mut z = ctx.linear_predictor(&beta);
        let mut objective = ctx.penalized_objective_at(&beta, z.view(), lambda);
        if !z.is_finite() || !objective.is_finite() {
            return Err(EstimationError::NumericalInstability {
                context: format!(
                    "batch gradient start at lambda={lambda:.4e} has a non-finite objective"
                ),
            });
        }

        let threshold = self.learning_rate * ctx.penalty.sparsity_scale(lambda);
        let mut best: (Coefficients, LinearPredictor, f64) = (beta.clone(), z.clone(), objective);
        let mut status = FitStatus::MaxIterationsReached;
        let mut iterations = 0;

        for iteration in 1..=self.max_iterations {
            iterations = iteration;
            let gradient = ctx.smooth_gradient_at(&beta, z.view(), lambda);
            if !gradient.iter().all(|g| g.is_finite()) {
                log::warn!(
                    "batch gradient at lambda={lambda:.4e}: non-finite gradient at iteration {iteration}"
                );
                status = FitStatus::Unstable;
                break;
            }

            let mut next = Coefficients::new(&*beta - &(gradient * self.learning_rate));
            ctx.penalty.prox(&mut next, threshold);

            let step = (&*next - &*beta).mapv(|d| d * d).sum().sqrt();
            let scale = beta
                .mapv(|b| b * b)
                .sum()
                .sqrt()
                .max(MIN_RELATIVE_SCALE);

            beta = next;
            z = ctx.linear_predictor(&beta);
            objective = ctx.penalized_objective_at(&beta, z.view(), lambda);
            if !z.is_finite() || !objective.is_finite() {
                log::warn!(
                    "batch gradient at lambda={lambda:.4e}: non-finite objective at iteration {iteration}"
                );
                status = FitStatus::Unstable;
                break;
            }
            if objective < best.2 {
                best = (beta.clone(), z.clone(), objective);
            }

            log::trace!(
                "batch iteration {iteration}: objective={objective:.6e} relative step={:.3e}",
                step / scale
            );
            if step / scale < self.tolerance {
                status = FitStatus::Converged;
                break;
            }
        }

        let (beta, linear_predictor, objective) = best;
        Ok(SolverOutcome {
            beta,
            linear_predictor,
            status,
            iterations,
            objective,
        })
    }
}
