use crate::family::Family;
use crate::matrix::DesignMatrix;
use crate::penalty::Penalty;
use crate::types::{Coefficients, LinearPredictor};
use ndarray::{Array2, ArrayView2, Axis, s};

/// Read-only inputs shared by every solver call along a path.
///
/// Nothing in here is mutated by a solver; coefficients, linear predictors and active
/// sets are owned by the fit in progress.
#[derive(Clone, Copy)]
pub struct FitContext<'a> {
    pub x: &'a DesignMatrix,
    pub y: ArrayView2<'a, f64>,
    pub family: Family,
    pub penalty: &'a Penalty,
}

impl<'a> FitContext<'a> {
    pub fn new(
        x: &'a DesignMatrix,
        y: ArrayView2<'a, f64>,
        family: Family,
        penalty: &'a Penalty,
    ) -> Self {
        Self {
            x,
            y,
            family,
            penalty,
        }
    }

    pub fn n_samples(&self) -> usize {
        self.x.nrows()
    }

    pub fn n_features(&self) -> usize {
        self.x.ncols()
    }

    pub fn n_outputs(&self) -> usize {
        self.y.ncols()
    }

    pub fn linear_predictor(&self, beta: &Coefficients) -> LinearPredictor {
        LinearPredictor::new(self.x.linear_predictor(beta))
    }

    /// Negative log-likelihood averaged over samples.
    pub fn mean_loss(&self, z: ArrayView2<f64>) -> f64 {
        self.family.negative_log_likelihood(z, self.y) / self.n_samples().max(1) as f64
    }

    /// Mean loss plus the quadratic part of the penalty.
    pub fn smooth_objective(&self, beta: &Coefficients, lambda: f64) -> f64 {
        let z = self.linear_predictor(beta);
        self.smooth_objective_at(beta, z.view(), lambda)
    }

    /// Gradient of [`FitContext::smooth_objective`], shape of `beta`.
    pub fn smooth_gradient(&self, beta: &Coefficients, lambda: f64) -> Array2<f64> {
        let z = self.linear_predictor(beta);
        self.smooth_gradient_at(beta, z.view(), lambda)
    }

    pub(crate) fn smooth_objective_at(
        &self,
        beta: &Coefficients,
        z: ArrayView2<f64>,
        lambda: f64,
    ) -> f64 {
        self.mean_loss(z) + self.penalty.ridge_scale(lambda) * self.penalty.tikhonov_value(beta)
    }

    /// Smooth objective plus the non-smooth part of the penalty, at a known `z`.
    pub(crate) fn penalized_objective_at(
        &self,
        beta: &Coefficients,
        z: ArrayView2<f64>,
        lambda: f64,
    ) -> f64 {
        self.smooth_objective_at(beta, z, lambda)
            + self.penalty.sparsity_scale(lambda) * self.penalty.sparsity_value(beta)
    }

    pub(crate) fn smooth_gradient_at(
        &self,
        beta: &Coefficients,
        z: ArrayView2<f64>,
        lambda: f64,
    ) -> Array2<f64> {
        let n = self.n_samples().max(1) as f64;
        let per_sample = self.family.gradient(z, self.y);
        let mut gradient = self.penalty.smooth_gradient(beta, lambda);

        let intercept = per_sample.sum_axis(Axis(0)) / n;
        let features = self.x.transpose_multiply(per_sample.view()) / n;
        {
            let mut intercept_row = gradient.row_mut(0);
            intercept_row += &intercept;
        }
        {
            let mut feature_rows = gradient.slice_mut(s![1.., ..]);
            feature_rows += &features;
        }
        gradient
    }
}
