//! Elastic-net penalties and their proximal operators.
//!
//! The penalty on the feature weights of one output column is
//!
//! `lambda * (alpha * P1(beta) + 0.5 * (1 - alpha) * ||Tau beta||^2)`
//!
//! where `P1` is either the L1 norm or the sum of group L2 norms. The quadratic
//! part is smooth and enters the solvers through its gradient; the non-smooth part
//! is applied in closed form through a proximal operator. The intercept is never
//! penalized, so every operator here skips coefficient row 0.

use crate::types::Coefficients;
use ndarray::{Array2, ArrayView1, ArrayView2, ArrayViewMut1};
use std::collections::BTreeMap;

/// Group id that marks features as unpenalized.
pub const UNPENALIZED_GROUP: usize = 0;

/// `sign(v) * max(|v| - threshold, 0)`.
pub fn soft_threshold(value: f64, threshold: f64) -> f64 {
    let shrunk = value.abs() - threshold;
    if shrunk > 0.0 {
        value.signum() * shrunk
    } else {
        0.0
    }
}

/// Soft-thresholds every feature weight of one coefficient column, leaving the intercept.
pub fn prox_l1(mut column: ArrayViewMut1<f64>, threshold: f64) {
    for value in column.iter_mut().skip(1) {
        *value = soft_threshold(*value, threshold);
    }
}

/// Block soft-thresholding of one coefficient column.
///
/// A group whose L2 norm does not exceed `threshold` is zeroed as a whole, otherwise the
/// group is scaled by `1 - threshold / norm`. Unpenalized features pass through.
pub fn prox_group(mut column: ArrayViewMut1<f64>, groups: &GroupIndex, threshold: f64) {
    for (_, members) in groups.groups() {
        let norm = members
            .iter()
            .map(|&k| column[k] * column[k])
            .sum::<f64>()
            .sqrt();
        let scale = group_shrinkage(norm, threshold);
        for &k in members {
            column[k] *= scale;
        }
    }
}

/// Factor applied to a group of L2 norm `norm` by block soft-thresholding.
pub fn group_shrinkage(norm: f64, threshold: f64) -> f64 {
    if norm > threshold {
        1.0 - threshold / norm
    } else {
        0.0
    }
}

/// `Tau^T Tau beta` for a block of feature weights, one column per output, given the
/// Gram matrix `Tau^T Tau`. Without a Gram matrix this is `beta` itself (plain ridge).
pub fn tikhonov_gradient_term(weights: ArrayView2<f64>, gram: Option<ArrayView2<f64>>) -> Array2<f64> {
    match gram {
        Some(gram) => gram.dot(&weights),
        None => weights.to_owned(),
    }
}

/// Feature-to-group assignment for the group lasso, indexed by coefficient row.
///
/// Feature `j` of the design matrix lives in coefficient row `j + 1`.
#[derive(Debug, Clone, PartialEq)]
pub struct GroupIndex {
    assignment: Vec<usize>,
    groups: Vec<(usize, Vec<usize>)>,
    unpenalized: Vec<usize>,
}

impl GroupIndex {
    pub fn new(assignment: &[usize]) -> Self {
        let mut by_group: BTreeMap<usize, Vec<usize>> = BTreeMap::new();
        let mut unpenalized = Vec::new();
        for (feature, &group) in assignment.iter().enumerate() {
            if group == UNPENALIZED_GROUP {
                unpenalized.push(feature + 1);
            } else {
                by_group.entry(group).or_default().push(feature + 1);
            }
        }
        Self {
            assignment: assignment.to_vec(),
            groups: by_group.into_iter().collect(),
            unpenalized,
        }
    }

    /// Number of features covered by the assignment.
    pub fn n_features(&self) -> usize {
        self.assignment.len()
    }

    /// Penalized groups in ascending id order, with their coefficient rows.
    pub fn groups(&self) -> impl Iterator<Item = (usize, &[usize])> {
        self.groups.iter().map(|(id, rows)| (*id, rows.as_slice()))
    }

    /// Coefficient rows that belong to the unpenalized group.
    pub fn unpenalized(&self) -> &[usize] {
        &self.unpenalized
    }
}

/// Elastic-net penalty with optional group structure and Tikhonov prior.
#[derive(Debug, Clone)]
pub struct Penalty {
    alpha: f64,
    groups: Option<GroupIndex>,
    tikhonov_gram: Option<Array2<f64>>,
}

impl Penalty {
    pub fn new(alpha: f64) -> Self {
        Self {
            alpha,
            groups: None,
            tikhonov_gram: None,
        }
    }

    pub fn with_groups(mut self, groups: GroupIndex) -> Self {
        self.groups = Some(groups);
        self
    }

    /// Replaces the plain ridge term with `||Tau beta||^2`. Stores `Tau^T Tau`.
    pub fn with_tikhonov(mut self, tau: ArrayView2<f64>) -> Self {
        self.tikhonov_gram = Some(tau.t().dot(&tau));
        self
    }

    pub fn alpha(&self) -> f64 {
        self.alpha
    }

    pub fn groups(&self) -> Option<&GroupIndex> {
        self.groups.as_ref()
    }

    /// Strength of the smooth quadratic part at `lambda`.
    pub fn ridge_scale(&self, lambda: f64) -> f64 {
        (1.0 - self.alpha) * lambda
    }

    /// Strength of the non-smooth part at `lambda`.
    pub fn sparsity_scale(&self, lambda: f64) -> f64 {
        self.alpha * lambda
    }

    /// Unscaled non-smooth penalty `P1`, summed over output columns.
    pub fn sparsity_value(&self, beta: &Coefficients) -> f64 {
        beta.columns()
            .into_iter()
            .map(|column| match &self.groups {
                Some(groups) => groups
                    .groups()
                    .map(|(_, rows)| rows.iter().map(|&k| column[k] * column[k]).sum::<f64>().sqrt())
                    .sum::<f64>(),
                None => column.iter().skip(1).map(|v| v.abs()).sum::<f64>(),
            })
            .sum()
    }

    /// Unscaled quadratic penalty `0.5 * ||Tau beta||^2`, summed over output columns.
    pub fn tikhonov_value(&self, beta: &Coefficients) -> f64 {
        let weights = beta.weights();
        weights
            .columns()
            .into_iter()
            .map(|w| match &self.tikhonov_gram {
                Some(gram) => 0.5 * w.dot(&gram.dot(&w)),
                None => 0.5 * w.dot(&w),
            })
            .sum()
    }

    /// Full penalty value at `lambda`.
    pub fn value(&self, beta: &Coefficients, lambda: f64) -> f64 {
        self.sparsity_scale(lambda) * self.sparsity_value(beta)
            + self.ridge_scale(lambda) * self.tikhonov_value(beta)
    }

    /// Gradient of the quadratic part, shape of `beta`, zero on the intercept row.
    pub fn smooth_gradient(&self, beta: &Coefficients, lambda: f64) -> Array2<f64> {
        let scale = self.ridge_scale(lambda);
        let mut gradient = Array2::zeros(beta.raw_dim());
        if scale == 0.0 {
            return gradient;
        }
        let gram = self.tikhonov_gram.as_ref().map(|g| g.view());
        let term = tikhonov_gradient_term(beta.weights(), gram);
        gradient
            .slice_mut(ndarray::s![1.., ..])
            .assign(&(term * scale));
        gradient
    }

    /// Unscaled quadratic gradient and curvature along coefficient row `coordinate`
    /// for one output column. The intercept row has neither.
    pub fn tikhonov_coordinate(&self, coordinate: usize, column: ArrayView1<f64>) -> (f64, f64) {
        if coordinate == 0 {
            return (0.0, 0.0);
        }
        let feature = coordinate - 1;
        match &self.tikhonov_gram {
            Some(gram) => {
                let row = gram.row(feature);
                let gradient = row
                    .iter()
                    .zip(column.iter().skip(1))
                    .map(|(g, b)| g * b)
                    .sum::<f64>();
                (gradient, gram[[feature, feature]])
            }
            None => (column[coordinate], 1.0),
        }
    }

    /// Applies the non-smooth proximal operator with the given threshold to every column.
    pub fn prox(&self, beta: &mut Coefficients, threshold: f64) {
        if threshold <= 0.0 {
            return;
        }
        for column in beta.columns_mut() {
            match &self.groups {
                Some(groups) => prox_group(column, groups, threshold),
                None => prox_l1(column, threshold),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use ndarray::array;

    #[test]
    fn soft_threshold_shrinks_towards_zero() {
        assert_eq!(soft_threshold(3.0, 1.0), 2.0);
        assert_eq!(soft_threshold(-3.0, 1.0), -2.0);
        assert_eq!(soft_threshold(0.5, 1.0), 0.0);
        assert_eq!(soft_threshold(-1.0, 1.0), 0.0);
    }

    #[test]
    fn l1_prox_leaves_intercept_alone() {
        let mut column = array![5.0, 0.3, -2.0, 1.0];
        prox_l1(column.view_mut(), 1.0);
        assert_eq!(column, array![5.0, 0.0, -1.0, 0.0]);
    }

    #[test]
    fn group_prox_zeroes_weak_groups_and_shrinks_strong_ones() {
        let groups = GroupIndex::new(&[1, 1, 2, 2, 0]);
        let mut column = array![7.0, 3.0, 4.0, 0.1, -0.1, 0.05];
        prox_group(column.view_mut(), &groups, 1.0);

        assert_eq!(column[0], 7.0);
        assert_abs_diff_eq!(column[1], 3.0 * 0.8, epsilon = 1e-12);
        assert_abs_diff_eq!(column[2], 4.0 * 0.8, epsilon = 1e-12);
        assert_eq!(column[3], 0.0);
        assert_eq!(column[4], 0.0);
        assert_eq!(column[5], 0.05);
    }

    #[test]
    fn group_index_maps_features_to_coefficient_rows() {
        let groups = GroupIndex::new(&[2, 0, 1, 2]);
        let collected: Vec<(usize, Vec<usize>)> =
            groups.groups().map(|(id, rows)| (id, rows.to_vec())).collect();
        assert_eq!(collected, vec![(1, vec![3]), (2, vec![1, 4])]);
        assert_eq!(groups.unpenalized(), &[2]);
        assert_eq!(groups.n_features(), 4);
    }

    #[test]
    fn tikhonov_term_defaults_to_ridge() {
        let weights = array![[1.0], [-2.0]];
        assert_eq!(tikhonov_gradient_term(weights.view(), None), weights);

        let tau = array![[2.0, 0.0], [1.0, 1.0]];
        let gram = tau.t().dot(&tau);
        assert_eq!(gram, array![[5.0, 1.0], [1.0, 1.0]]);
        let term = tikhonov_gradient_term(weights.view(), Some(gram.view()));
        assert_eq!(term, array![[3.0], [-1.0]]);
    }

    #[test]
    fn penalty_value_blends_both_parts() {
        let beta = Coefficients::new(array![[10.0], [1.0], [-2.0]]);
        let penalty = Penalty::new(0.25);
        let lambda = 2.0;
        let expected = 0.25 * 2.0 * 3.0 + 0.75 * 2.0 * 0.5 * 5.0;
        assert_abs_diff_eq!(penalty.value(&beta, lambda), expected, epsilon = 1e-12);

        let gradient = penalty.smooth_gradient(&beta, lambda);
        assert_eq!(gradient.column(0).to_owned(), array![0.0, 1.5, -3.0]);
    }

    #[test]
    fn coordinate_tikhonov_matches_full_gradient() {
        let tau = array![[1.0, 0.5, 0.0], [0.0, 1.0, -1.0]];
        let penalty = Penalty::new(0.0).with_tikhonov(tau.view());
        let beta = Coefficients::new(array![[0.3], [1.0], [2.0], [-1.0]]);
        let full = penalty.smooth_gradient(&beta, 1.0);
        for k in 1..4 {
            let (gradient, curvature) = penalty.tikhonov_coordinate(k, beta.column(0));
            assert_abs_diff_eq!(gradient, full[[k, 0]], epsilon = 1e-12);
            assert!(curvature >= 0.0);
        }
        assert_eq!(penalty.tikhonov_coordinate(0, beta.column(0)), (0.0, 0.0));
        let gram = tau.t().dot(&tau);
        let direct = tikhonov_gradient_term(array![[1.0], [2.0], [-1.0]].view(), Some(gram.view()));
        assert_abs_diff_eq!(direct[[1, 0]], full[[2, 0]], epsilon = 1e-12);
    }
}
