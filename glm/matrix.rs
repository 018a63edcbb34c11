use crate::estimate::EstimationError;
use crate::types::Coefficients;
use faer::sparse::{SparseColMat, Triplet};
use ndarray::{Array2, ArrayView2, ArrayViewMut1, Axis};

/// Design matrix `X` for dense and sparse workflows, shape `[n_samples, n_features]`.
///
/// The intercept column is implicit and never stored.
#[derive(Clone)]
pub enum DesignMatrix {
    Dense(Array2<f64>),
    Sparse(SparseColMat<usize, f64>),
}

impl DesignMatrix {
    /// Builds a compressed sparse column matrix from `(row, col, value)` entries.
    /// Duplicate entries are summed.
    pub fn sparse_from_triplets(
        nrows: usize,
        ncols: usize,
        entries: &[(usize, usize, f64)],
    ) -> Result<Self, EstimationError> {
        let triplets: Vec<Triplet<usize, usize, f64>> = entries
            .iter()
            .map(|&(row, col, value)| Triplet::new(row, col, value))
            .collect();
        SparseColMat::try_new_from_triplets(nrows, ncols, &triplets)
            .map(Self::Sparse)
            .map_err(|_| {
                EstimationError::InvalidParameter(format!(
                    "sparse design entries do not fit a {nrows} x {ncols} matrix"
                ))
            })
    }

    pub fn nrows(&self) -> usize {
        match self {
            Self::Dense(matrix) => matrix.nrows(),
            Self::Sparse(matrix) => matrix.nrows(),
        }
    }

    pub fn ncols(&self) -> usize {
        match self {
            Self::Dense(matrix) => matrix.ncols(),
            Self::Sparse(matrix) => matrix.ncols(),
        }
    }

    pub fn is_finite(&self) -> bool {
        match self {
            Self::Dense(matrix) => matrix.iter().all(|v| v.is_finite()),
            Self::Sparse(matrix) => {
                let (_, values) = matrix.parts();
                values.iter().all(|v| v.is_finite())
            }
        }
    }

    /// Computes `z = beta0 + X beta` for every output column.
    pub fn linear_predictor(&self, beta: &Coefficients) -> Array2<f64> {
        let weights = beta.weights();
        let intercept = beta.intercept();
        let mut z = match self {
            Self::Dense(matrix) => matrix.dot(&weights),
            Self::Sparse(matrix) => {
                let mut output = Array2::<f64>::zeros((matrix.nrows(), weights.ncols()));
                let (symbolic, values) = matrix.parts();
                let col_ptr = symbolic.col_ptr();
                let row_idx = symbolic.row_idx();
                for col in 0..matrix.ncols() {
                    let coefficient_row = weights.row(col);
                    for idx in col_ptr[col]..col_ptr[col + 1] {
                        let row = row_idx[idx];
                        let x = values[idx];
                        for (out, &w) in output.row_mut(row).iter_mut().zip(coefficient_row) {
                            *out += x * w;
                        }
                    }
                }
                output
            }
        };
        for mut row in z.axis_iter_mut(Axis(0)) {
            row += &intercept;
        }
        z
    }

    /// Computes `X^T g`, shape `[n_features, n_outputs]`.
    pub fn transpose_multiply(&self, g: ArrayView2<f64>) -> Array2<f64> {
        match self {
            Self::Dense(matrix) => matrix.t().dot(&g),
            Self::Sparse(matrix) => {
                let mut output = Array2::<f64>::zeros((matrix.ncols(), g.ncols()));
                let (symbolic, values) = matrix.parts();
                let col_ptr = symbolic.col_ptr();
                let row_idx = symbolic.row_idx();
                for col in 0..matrix.ncols() {
                    let mut acc = output.row_mut(col);
                    for idx in col_ptr[col]..col_ptr[col + 1] {
                        let x = values[idx];
                        for (a, &gv) in acc.iter_mut().zip(g.row(row_idx[idx])) {
                            *a += x * gv;
                        }
                    }
                }
                output
            }
        }
    }

    /// Visits the stored entries of one feature column as `(row, value)`.
    ///
    /// Dense columns visit every row; sparse columns visit only stored rows.
    pub fn for_each_in_column<F>(&self, col: usize, mut f: F)
    where
        F: FnMut(usize, f64),
    {
        match self {
            Self::Dense(matrix) => {
                for (row, &value) in matrix.column(col).iter().enumerate() {
                    f(row, value);
                }
            }
            Self::Sparse(matrix) => {
                let (symbolic, values) = matrix.parts();
                let col_ptr = symbolic.col_ptr();
                let row_idx = symbolic.row_idx();
                for idx in col_ptr[col]..col_ptr[col + 1] {
                    f(row_idx[idx], values[idx]);
                }
            }
        }
    }

    /// `target += scale * X[:, col]`.
    pub fn add_scaled_column(&self, col: usize, scale: f64, mut target: ArrayViewMut1<f64>) {
        if scale == 0.0 {
            return;
        }
        self.for_each_in_column(col, |row, value| target[row] += scale * value);
    }
}

impl From<Array2<f64>> for DesignMatrix {
    fn from(matrix: Array2<f64>) -> Self {
        Self::Dense(matrix)
    }
}

impl From<ArrayView2<'_, f64>> for DesignMatrix {
    fn from(matrix: ArrayView2<'_, f64>) -> Self {
        Self::Dense(matrix.to_owned())
    }
}
