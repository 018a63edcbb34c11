//! Coordinate descent with an active set and an incrementally maintained
//! linear predictor.
//!
//! One sweep visits every active (coordinate, output) pair and takes a
//! one-dimensional Newton step on the penalized objective. The quadratic penalty
//! is folded into the Newton ratio; the L1 part is applied by soft-thresholding at
//! `lambda * alpha / h`. In group mode every penalized group takes a single block
//! step with a shared curvature so the group can be zeroed as a unit. After each
//! accepted move only the affected column of `z` is touched.
//!
//! The derivatives of a coordinate are computed once per visit. For the multinomial
//! family that single pass yields every class, and all classes then step from it.

use crate::estimate::EstimationError;
use crate::family::CoordinateDerivatives;
use crate::model::{FitStatus, SolverOutcome};
use crate::objective::FitContext;
use crate::penalty::{GroupIndex, group_shrinkage, soft_threshold};
use crate::types::{ActiveSet, Coefficients, LinearPredictor};
use std::iter;

/// `diag(m (1 - m))` times two bounds the softmax Hessian `diag(m) - m m^T` from above,
/// which keeps a simultaneous step over all classes a descent step.
const CLASS_BLOCK_CURVATURE: f64 = 2.0;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CoordinateDescentSolver {
    /// Maximum number of full sweeps.
    pub max_iterations: usize,
    /// Sweeps stop once the largest coordinate move falls below this.
    pub tolerance: f64,
}

impl CoordinateDescentSolver {
    pub fn new(max_iterations: usize, tolerance: f64) -> Self {
        Self {
            max_iterations,
            tolerance,
        }
    }

    /// Runs sweeps for one regularization strength starting at `beta`.
    ///
    /// `z` may carry the linear predictor of `beta` from the previous path entry; when it
    /// is absent or has the wrong shape it is recomputed. The active set always starts
    /// fully active.
    pub fn solve(
        &self,
        ctx: &FitContext,
        lambda: f64,
        beta: Coefficients,
        z: Option<LinearPredictor>,
    ) -> Result<SolverOutcome, EstimationError> {
        let mut beta = beta;
        let mut z = match z {
            Some(z) if z.dim() == (ctx.n_samples(), ctx.n_outputs()) => z,
            _ => ctx.linear_predictor(&beta),
        };
        if !z.is_finite() {
            return Err(EstimationError::NumericalInstability {
                context: format!("coordinate descent start at lambda={lambda:.4e}"),
            });
        }

        let mut active = ActiveSet::all_active(ctx.n_features(), ctx.n_outputs());
        let mut status = FitStatus::MaxIterationsReached;
        let mut iterations = 0;

        for sweep in 1..=self.max_iterations {
            iterations = sweep;
            let max_change = self.sweep(ctx, lambda, &mut beta, &mut z, &mut active);
            if !max_change.is_finite() || !z.is_finite() {
                return Err(EstimationError::NumericalInstability {
                    context: format!(
                        "coordinate descent at lambda={lambda:.4e}, sweep {sweep}"
                    ),
                });
            }
            log::trace!(
                "cdfast sweep {sweep}: max change={max_change:.3e}, active={}",
                active.count_active()
            );
            if max_change < self.tolerance {
                status = FitStatus::Converged;
                break;
            }
        }

        let objective = ctx.penalized_objective_at(&beta, z.view(), lambda);
        Ok(SolverOutcome {
            beta,
            linear_predictor: z,
            status,
            iterations,
            objective,
        })
    }

    /// One pass over every active (coordinate, output) pair.
    ///
    /// Updates `beta` and `z` in place, deactivates coordinates that are held at zero by
    /// the penalty, and returns the largest absolute coordinate move. Returns NaN if a
    /// one-dimensional derivative is not finite.
    pub fn sweep(
        &self,
        ctx: &FitContext,
        lambda: f64,
        beta: &mut Coefficients,
        z: &mut LinearPredictor,
        active: &mut ActiveSet,
    ) -> f64 {
        match ctx.penalty.groups() {
            Some(groups) => group_sweep(ctx, lambda, groups, beta, z, active),
            None => lasso_sweep(ctx, lambda, beta, z, active),
        }
    }
}

fn lasso_sweep(
    ctx: &FitContext,
    lambda: f64,
    beta: &mut Coefficients,
    z: &mut LinearPredictor,
    active: &mut ActiveSet,
) -> f64 {
    let sparsity = ctx.penalty.sparsity_scale(lambda);
    let mut max_change: f64 = 0.0;
    for k in 0..=ctx.n_features() {
        if !(0..ctx.n_outputs()).any(|c| active.is_active(k, c)) {
            continue;
        }
        let derivatives = ctx.family.coordinate_derivatives(ctx.x, k, z.view(), ctx.y);
        for c in 0..ctx.n_outputs() {
            if !active.is_active(k, c) {
                continue;
            }
            let (g, h) = newton_terms(ctx, lambda, beta, &derivatives, k, c);
            if !(g.is_finite() && h.is_finite()) {
                return f64::NAN;
            }
            let candidate = beta[[k, c]] - g / h;
            let updated = if k == 0 {
                candidate
            } else {
                soft_threshold(candidate, sparsity / h)
            };
            max_change = max_change.max(move_coordinate(ctx, beta, z, k, c, updated));
            if k != 0 && updated == 0.0 {
                active.deactivate(k, c);
            }
        }
    }
    max_change
}

fn group_sweep(
    ctx: &FitContext,
    lambda: f64,
    groups: &GroupIndex,
    beta: &mut Coefficients,
    z: &mut LinearPredictor,
    active: &mut ActiveSet,
) -> f64 {
    let sparsity = ctx.penalty.sparsity_scale(lambda);
    let n_outputs = ctx.n_outputs();
    let mut max_change: f64 = 0.0;

    for &k in iter::once(&0).chain(groups.unpenalized()) {
        let derivatives = ctx.family.coordinate_derivatives(ctx.x, k, z.view(), ctx.y);
        for c in 0..n_outputs {
            let (g, h) = newton_terms(ctx, lambda, beta, &derivatives, k, c);
            if !(g.is_finite() && h.is_finite()) {
                return f64::NAN;
            }
            let updated = beta[[k, c]] - g / h;
            max_change = max_change.max(move_coordinate(ctx, beta, z, k, c, updated));
        }
    }

    for (_, members) in groups.groups() {
        let live: Vec<usize> = (0..n_outputs)
            .filter(|&c| members.iter().any(|&k| active.is_active(k, c)))
            .collect();
        if live.is_empty() {
            continue;
        }
        let derivatives: Vec<CoordinateDerivatives> = members
            .iter()
            .map(|&k| ctx.family.coordinate_derivatives(ctx.x, k, z.view(), ctx.y))
            .collect();
        for c in live {
            let mut gradients = Vec::with_capacity(members.len());
            let mut curvature = 0.0;
            for (&k, member) in members.iter().zip(&derivatives) {
                let (g, h) = newton_terms(ctx, lambda, beta, member, k, c);
                if !(g.is_finite() && h.is_finite()) {
                    return f64::NAN;
                }
                gradients.push(g);
                curvature += h;
            }
            let proposal: Vec<f64> = members
                .iter()
                .zip(&gradients)
                .map(|(&k, g)| beta[[k, c]] - g / curvature)
                .collect();
            let norm = proposal.iter().map(|v| v * v).sum::<f64>().sqrt();
            let scale = group_shrinkage(norm, sparsity / curvature);
            for (&k, value) in members.iter().zip(&proposal) {
                max_change = max_change.max(move_coordinate(ctx, beta, z, k, c, value * scale));
            }
            if scale == 0.0 {
                for &k in members {
                    active.deactivate(k, c);
                }
            }
        }
    }
    max_change
}

/// Gradient and curvature of the smooth objective along coordinate `k` of output `c`.
///
/// All classes of a multinomial coordinate step from the same derivatives, so their
/// diagonal curvature is scaled by [`CLASS_BLOCK_CURVATURE`].
fn newton_terms(
    ctx: &FitContext,
    lambda: f64,
    beta: &Coefficients,
    derivatives: &CoordinateDerivatives,
    k: usize,
    c: usize,
) -> (f64, f64) {
    let loss_curvature = match derivatives {
        CoordinateDerivatives::Scalar { hessian, .. } => *hessian,
        CoordinateDerivatives::PerClass { hessian, .. } => CLASS_BLOCK_CURVATURE * hessian[c],
    };
    let ridge = ctx.penalty.ridge_scale(lambda);
    let (tikhonov_gradient, tikhonov_curvature) =
        ctx.penalty.tikhonov_coordinate(k, beta.column(c));
    (
        derivatives.gradient(c) + ridge * tikhonov_gradient,
        loss_curvature + ridge * tikhonov_curvature,
    )
}

/// Sets `beta[k, c]` to `value`, shifts column `c` of `z` by the move and returns its size.
fn move_coordinate(
    ctx: &FitContext,
    beta: &mut Coefficients,
    z: &mut LinearPredictor,
    k: usize,
    c: usize,
    value: f64,
) -> f64 {
    let delta = value - beta[[k, c]];
    if delta == 0.0 {
        return 0.0;
    }
    beta[[k, c]] = value;
    let mut column = z.column_mut(c);
    if k == 0 {
        column += delta;
    } else {
        ctx.x.add_scaled_column(k - 1, delta, column);
    }
    delta.abs()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::batch::BatchGradientSolver;
    use crate::family::{Distribution, Family};
    use crate::matrix::DesignMatrix;
    use crate::penalty::Penalty;
    use approx::assert_abs_diff_eq;
    use ndarray::{Array2, array};

    fn orthogonal_design() -> (DesignMatrix, Array2<f64>) {
        let x = array![[1.0, 0.0], [0.0, 1.0], [-1.0, 0.0], [0.0, -1.0]];
        let y = array![[5.0], [1.0], [-1.0], [3.0]];
        (DesignMatrix::Dense(x), y)
    }

    #[test]
    fn unpenalized_gaussian_recovers_exact_fit() {
        let (x, y) = orthogonal_design();
        let penalty = Penalty::new(0.5);
        let ctx = FitContext::new(&x, y.view(), Family::new(Distribution::Gaussian), &penalty);
        let solver = CoordinateDescentSolver::new(100, 1e-10);

        let outcome = solver.solve(&ctx, 0.0, Coefficients::zeros(2, 1), None).unwrap();
        assert_eq!(outcome.status, FitStatus::Converged);
        assert_abs_diff_eq!(outcome.beta[[0, 0]], 2.0, epsilon = 1e-8);
        assert_abs_diff_eq!(outcome.beta[[1, 0]], 3.0, epsilon = 1e-8);
        assert_abs_diff_eq!(outcome.beta[[2, 0]], -1.0, epsilon = 1e-8);
        let z = x.linear_predictor(&outcome.beta);
        for (a, b) in z.iter().zip(outcome.linear_predictor.iter()) {
            assert_abs_diff_eq!(*a, *b, epsilon = 1e-10);
        }
    }

    #[test]
    fn lasso_agrees_with_batch_gradient() {
        // Orthogonal columns with mean square 0.5: beta_j = S(x_j'y / n, lambda) / 0.5
        let (x, y) = orthogonal_design();
        let penalty = Penalty::new(1.0);
        let ctx = FitContext::new(&x, y.view(), Family::new(Distribution::Gaussian), &penalty);

        let cd = CoordinateDescentSolver::new(200, 1e-12)
            .solve(&ctx, 0.5, Coefficients::zeros(2, 1), None)
            .unwrap();
        let batch = BatchGradientSolver::new(0.5, 5000, 1e-12)
            .solve(&ctx, 0.5, Coefficients::zeros(2, 1))
            .unwrap();

        let expected = [2.0, 2.0, 0.0];
        for (k, &value) in expected.iter().enumerate() {
            assert_abs_diff_eq!(cd.beta[[k, 0]], value, epsilon = 1e-6);
            assert_abs_diff_eq!(batch.beta[[k, 0]], value, epsilon = 1e-6);
        }
        assert_eq!(cd.beta[[2, 0]], 0.0);
    }

    #[test]
    fn zeroed_coordinates_leave_the_active_set() {
        let (x, y) = orthogonal_design();
        let penalty = Penalty::new(1.0);
        let ctx = FitContext::new(&x, y.view(), Family::new(Distribution::Gaussian), &penalty);
        let solver = CoordinateDescentSolver::new(1, 1e-8);

        let mut beta = Coefficients::new(array![[0.0], [0.1], [-0.1]]);
        let mut z = ctx.linear_predictor(&beta);
        let mut active = ActiveSet::all_active(2, 1);
        solver.sweep(&ctx, 50.0, &mut beta, &mut z, &mut active);

        assert_eq!(beta[[1, 0]], 0.0);
        assert_eq!(beta[[2, 0]], 0.0);
        assert!(active.is_active(0, 0));
        assert_eq!(active.count_active(), 1);
    }

    #[test]
    fn weak_group_is_zeroed_as_a_unit() {
        let x = array![
            [1.0, 0.5, 0.1, -0.2],
            [-1.0, 0.2, -0.1, 0.3],
            [0.5, -1.0, 0.2, 0.1],
            [-0.5, 0.3, -0.2, -0.2],
            [1.5, -0.1, 0.0, 0.1],
            [-1.5, 0.1, 0.0, -0.1],
        ];
        let y = x.column(0).mapv(|v| 2.0 * v) + &x.column(1).mapv(|v| -v);
        let y = y.insert_axis(ndarray::Axis(1));
        let x = DesignMatrix::Dense(x);
        let penalty = Penalty::new(1.0).with_groups(GroupIndex::new(&[1, 1, 2, 2]));
        let ctx = FitContext::new(&x, y.view(), Family::new(Distribution::Gaussian), &penalty);

        let outcome = CoordinateDescentSolver::new(500, 1e-10)
            .solve(&ctx, 0.2, Coefficients::zeros(4, 1), None)
            .unwrap();
        assert_eq!(outcome.beta[[3, 0]], 0.0);
        assert_eq!(outcome.beta[[4, 0]], 0.0);
        assert!(outcome.beta[[1, 0]] > 0.5);
        assert!(outcome.beta[[2, 0]] < 0.0);
    }

    #[test]
    fn multinomial_sweeps_preserve_shapes() {
        let x = DesignMatrix::Dense(array![[-1.0, -2.0, -3.0], [4.0, 5.0, 6.0], [0.5, 0.0, 1.0]]);
        let y = array![[0.0, 1.0, 0.0], [1.0, 0.0, 0.0], [0.0, 0.0, 1.0]];
        let penalty = Penalty::new(0.5);
        let ctx = FitContext::new(&x, y.view(), Family::new(Distribution::Multinomial), &penalty);
        let solver = CoordinateDescentSolver::new(1, 1e-8);

        let mut beta = Coefficients::zeros(3, 3);
        let mut z = ctx.linear_predictor(&beta);
        let mut active = ActiveSet::all_active(3, 3);
        for _ in 0..5 {
            solver.sweep(&ctx, 0.01, &mut beta, &mut z, &mut active);
            assert_eq!(beta.dim(), (4, 3));
            assert_eq!(z.dim(), (3, 3));
            assert_eq!(active.shape(), (4, 3));
        }
        let recomputed = ctx.linear_predictor(&beta);
        for (a, b) in recomputed.iter().zip(z.iter()) {
            assert_abs_diff_eq!(*a, *b, epsilon = 1e-10);
        }
    }

    #[test]
    fn joint_class_steps_converge_to_the_batch_optimum() {
        let x = DesignMatrix::Dense(array![
            [0.5, -1.0],
            [1.0, 0.2],
            [-0.3, 0.8],
            [0.9, -0.5],
            [-1.0, 0.1],
            [0.2, 0.6],
            [-0.6, -0.9],
            [0.4, 1.0]
        ]);
        let labels = [1.0, 1.0, 0.0, 1.0, 0.0, 0.0, 0.0, 1.0];
        let y = Array2::from_shape_fn((8, 2), |(i, c)| if labels[i] == c as f64 { 1.0 } else { 0.0 });
        let penalty = Penalty::new(0.5);
        let ctx = FitContext::new(&x, y.view(), Family::new(Distribution::Multinomial), &penalty);

        let cd = CoordinateDescentSolver::new(5000, 1e-10)
            .solve(&ctx, 0.05, Coefficients::zeros(2, 2), None)
            .unwrap();
        let batch = BatchGradientSolver::new(0.5, 20000, 1e-12)
            .solve(&ctx, 0.05, Coefficients::zeros(2, 2))
            .unwrap();

        assert_eq!(cd.status, FitStatus::Converged);
        assert_abs_diff_eq!(cd.objective, batch.objective, epsilon = 1e-6);
        // Both classes of a feature move in opposite directions from a symmetric start.
        assert_abs_diff_eq!(cd.beta[[1, 0]], -cd.beta[[1, 1]], epsilon = 1e-6);
    }
}
