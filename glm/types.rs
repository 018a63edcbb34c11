use ndarray::{Array1, Array2, ArrayView1, ArrayView2, Axis};
use std::ops::{Deref, DerefMut};

/// Coefficient matrix of shape `[n_features + 1, n_outputs]`.
///
/// Row 0 holds the intercept of each output column, rows `1..=n_features` hold the
/// feature weights. Scalar families use a single output column; the multinomial
/// family uses one column per class.
#[repr(transparent)]
#[derive(Clone, Debug, PartialEq)]
pub struct Coefficients(pub Array2<f64>);

impl Coefficients {
    pub fn new(values: Array2<f64>) -> Self {
        Self(values)
    }

    pub fn zeros(n_features: usize, n_outputs: usize) -> Self {
        Self(Array2::zeros((n_features + 1, n_outputs)))
    }

    /// Builds a single-output coefficient matrix from an intercept and a weight vector.
    pub fn from_parts(intercept: f64, weights: ArrayView1<f64>) -> Self {
        let mut values = Array2::zeros((weights.len() + 1, 1));
        values[[0, 0]] = intercept;
        for (j, &w) in weights.iter().enumerate() {
            values[[j + 1, 0]] = w;
        }
        Self(values)
    }

    pub fn n_features(&self) -> usize {
        self.0.nrows().saturating_sub(1)
    }

    pub fn n_outputs(&self) -> usize {
        self.0.ncols()
    }

    pub fn intercept(&self) -> ArrayView1<'_, f64> {
        self.0.row(0)
    }

    /// Feature weights without the intercept row, shape `[n_features, n_outputs]`.
    pub fn weights(&self) -> ArrayView2<'_, f64> {
        self.0.slice(ndarray::s![1.., ..])
    }

    /// Number of feature weights that are exactly zero.
    pub fn count_zero_weights(&self) -> usize {
        self.weights().iter().filter(|&&w| w == 0.0).count()
    }
}

impl Deref for Coefficients {
    type Target = Array2<f64>;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl DerefMut for Coefficients {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.0
    }
}

/// Linear predictor `z = beta0 + X beta`, shape `[n_samples, n_outputs]`.
#[repr(transparent)]
#[derive(Clone, Debug, PartialEq)]
pub struct LinearPredictor(pub Array2<f64>);

impl LinearPredictor {
    pub fn new(values: Array2<f64>) -> Self {
        Self(values)
    }

    pub fn is_finite(&self) -> bool {
        self.0.iter().all(|v| v.is_finite())
    }
}

impl Deref for LinearPredictor {
    type Target = Array2<f64>;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl DerefMut for LinearPredictor {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.0
    }
}

/// Response matrix of shape `[n_samples, n_outputs]`.
///
/// Scalar families carry one column of observed values. The multinomial family carries
/// a one-hot indicator matrix with one column per class.
#[repr(transparent)]
#[derive(Clone, Debug, PartialEq)]
pub struct Response(pub Array2<f64>);

impl Response {
    pub fn from_values(values: Array1<f64>) -> Self {
        Self(values.insert_axis(Axis(1)))
    }

    /// One-hot encodes integer class labels into `n_classes` columns.
    pub fn from_labels(labels: &[usize], n_classes: usize) -> Self {
        let mut indicators = Array2::zeros((labels.len(), n_classes));
        for (i, &label) in labels.iter().enumerate() {
            if label < n_classes {
                indicators[[i, label]] = 1.0;
            }
        }
        Self(indicators)
    }

    pub fn n_samples(&self) -> usize {
        self.0.nrows()
    }

    pub fn n_outputs(&self) -> usize {
        self.0.ncols()
    }

    pub fn as_view(&self) -> ArrayView2<'_, f64> {
        self.0.view()
    }
}

impl Deref for Response {
    type Target = Array2<f64>;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

/// Coordinates still allowed to move during coordinate descent.
///
/// Same shape as the coefficient matrix. The intercept row is always active.
#[derive(Clone, Debug, PartialEq)]
pub struct ActiveSet(Array2<bool>);

impl ActiveSet {
    pub fn all_active(n_features: usize, n_outputs: usize) -> Self {
        Self(Array2::from_elem((n_features + 1, n_outputs), true))
    }

    pub fn is_active(&self, coordinate: usize, output: usize) -> bool {
        self.0[[coordinate, output]]
    }

    /// Deactivates a feature coordinate. The intercept row cannot be deactivated.
    pub fn deactivate(&mut self, coordinate: usize, output: usize) {
        if coordinate > 0 {
            self.0[[coordinate, output]] = false;
        }
    }

    pub fn shape(&self) -> (usize, usize) {
        self.0.dim()
    }

    pub fn count_active(&self) -> usize {
        self.0.iter().filter(|&&a| a).count()
    }
}
