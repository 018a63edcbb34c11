//! Synthetic data builders shared by the integration tests.
//!
//! Every builder is seeded, so a given configuration always produces the same
//! design, coefficients and response.

use glmpath::{Coefficients, DesignMatrix, Distribution, Family, Response};
use ndarray::{Array1, Array2, Axis, s};
use rand::Rng;
use rand::SeedableRng;
use rand::rngs::StdRng;
use rand_distr::{Bernoulli, Poisson, StandardNormal};

/// A simulated problem together with the coefficients that generated it.
#[derive(Clone)]
pub struct SyntheticData {
    pub x: Array2<f64>,
    pub y: Response,
    pub beta: Coefficients,
}

impl SyntheticData {
    pub fn design(&self) -> DesignMatrix {
        DesignMatrix::Dense(self.x.clone())
    }

    /// Splits the rows into `[0, n_train)` and `[n_train, n)`.
    pub fn split_at(&self, n_train: usize) -> (SyntheticData, SyntheticData) {
        let head = SyntheticData {
            x: self.x.slice(s![..n_train, ..]).to_owned(),
            y: Response(self.y.slice(s![..n_train, ..]).to_owned()),
            beta: self.beta.clone(),
        };
        let tail = SyntheticData {
            x: self.x.slice(s![n_train.., ..]).to_owned(),
            y: Response(self.y.slice(s![n_train.., ..]).to_owned()),
            beta: self.beta.clone(),
        };
        (head, tail)
    }
}

/// Builder for GLM data with standard normal features.
pub struct SyntheticDataBuilder {
    n_samples: usize,
    n_features: usize,
    density: f64,
    coefficient_scale: f64,
    noise: f64,
    n_classes: usize,
    coefficients: Option<Coefficients>,
    seed: u64,
}

impl SyntheticDataBuilder {
    pub fn new(n_samples: usize, n_features: usize) -> Self {
        Self {
            n_samples,
            n_features,
            density: 1.0,
            coefficient_scale: 1.0,
            noise: 1.0,
            n_classes: 3,
            coefficients: None,
            seed: 42,
        }
    }

    /// Probability that a feature weight is nonzero.
    pub fn with_density(mut self, density: f64) -> Self {
        self.density = density.clamp(0.0, 1.0);
        self
    }

    /// Standard deviation of the drawn intercept and nonzero weights.
    pub fn with_coefficient_scale(mut self, scale: f64) -> Self {
        self.coefficient_scale = scale;
        self
    }

    /// Standard deviation of the Gaussian response noise.
    pub fn with_noise(mut self, noise: f64) -> Self {
        self.noise = noise;
        self
    }

    pub fn with_classes(mut self, n_classes: usize) -> Self {
        self.n_classes = n_classes;
        self
    }

    /// Uses fixed coefficients instead of drawing them.
    pub fn with_coefficients(mut self, beta: Coefficients) -> Self {
        self.coefficients = Some(beta);
        self
    }

    pub fn seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }

    pub fn build(self, distribution: Distribution) -> SyntheticData {
        let mut rng = StdRng::seed_from_u64(self.seed);
        let x = Array2::from_shape_fn((self.n_samples, self.n_features), |_| {
            rng.sample::<f64, _>(StandardNormal)
        });

        let n_outputs = if distribution.is_multinomial() {
            self.n_classes
        } else {
            1
        };
        let beta = match self.coefficients.clone() {
            Some(beta) => beta,
            None => self.draw_coefficients(&mut rng, n_outputs),
        };
        assert_eq!(beta.dim(), (self.n_features + 1, n_outputs));

        let z = DesignMatrix::Dense(x.clone()).linear_predictor(&beta);
        let mu = Family::new(distribution).mu(z.view());
        let y = match distribution {
            Distribution::Gaussian => Response::from_values(
                mu.column(0)
                    .mapv(|m| m + self.noise * rng.sample::<f64, _>(StandardNormal)),
            ),
            Distribution::Binomial => Response::from_values(mu.column(0).mapv(|m| {
                let draw = Bernoulli::new(m.clamp(0.0, 1.0)).unwrap();
                if rng.sample(draw) { 1.0 } else { 0.0 }
            })),
            Distribution::Poisson | Distribution::Softplus => {
                Response::from_values(mu.column(0).mapv(|m| {
                    let draw = Poisson::new(m.max(1e-12)).unwrap();
                    rng.sample(draw)
                }))
            }
            Distribution::Multinomial => {
                let labels: Vec<usize> = mu
                    .axis_iter(Axis(0))
                    .map(|row| {
                        let u = rng.gen_range(0.0..1.0);
                        let mut cumulative = 0.0;
                        row.iter()
                            .position(|&p| {
                                cumulative += p;
                                u < cumulative
                            })
                            .unwrap_or(row.len() - 1)
                    })
                    .collect();
                Response::from_labels(&labels, self.n_classes)
            }
        };

        SyntheticData { x, y, beta }
    }

    fn draw_coefficients(&self, rng: &mut StdRng, n_outputs: usize) -> Coefficients {
        let mut beta = Coefficients::zeros(self.n_features, n_outputs);
        for output in 0..n_outputs {
            beta[[0, output]] = self.coefficient_scale * rng.sample::<f64, _>(StandardNormal);
            for j in 1..=self.n_features {
                if rng.gen_range(0.0..1.0) < self.density {
                    beta[[j, output]] =
                        self.coefficient_scale * rng.sample::<f64, _>(StandardNormal);
                }
            }
        }
        beta
    }
}

/// Smooth prior covariance over neighbouring features, normalized to a unit maximum.
pub fn prior_covariance(n_features: usize) -> Array2<f64> {
    let p = n_features as f64;
    let mut cov = Array2::from_shape_fn((n_features, n_features), |(i, j)| {
        let d = i as f64 - j as f64;
        (-15.0 / (p * p) * d * d).exp()
    });
    cov.diag_mut().mapv_inplace(|v| v + 0.01);
    let max = cov.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    cov / max
}

/// Lower-triangular `L` with `L L^T = a` for a symmetric positive definite `a`.
pub fn cholesky(a: &Array2<f64>) -> Array2<f64> {
    let n = a.nrows();
    let mut l = Array2::zeros((n, n));
    for i in 0..n {
        for j in 0..=i {
            let partial: f64 = (0..j).map(|k| l[[i, k]] * l[[j, k]]).sum();
            if i == j {
                let pivot = a[[i, i]] - partial;
                assert!(pivot > 0.0, "matrix is not positive definite");
                l[[i, j]] = pivot.sqrt();
            } else {
                l[[i, j]] = (a[[i, j]] - partial) / l[[j, j]];
            }
        }
    }
    l
}

/// Inverse of a nonsingular lower-triangular matrix by forward substitution.
pub fn lower_triangular_inverse(l: &Array2<f64>) -> Array2<f64> {
    let n = l.nrows();
    let mut inv = Array2::zeros((n, n));
    for col in 0..n {
        for i in col..n {
            let rhs = if i == col { 1.0 } else { 0.0 };
            let partial: f64 = (col..i).map(|k| l[[i, k]] * inv[[k, col]]).sum();
            inv[[i, col]] = (rhs - partial) / l[[i, i]];
        }
    }
    inv
}

/// Tikhonov matrix whose Gram matrix is proportional to the inverse of `cov`.
///
/// Scaled by `1 / (sqrt(n_samples) * max |entry|)` so the quadratic penalty stays on the
/// same footing as the mean loss.
pub fn tikhonov_from_prior(cov: &Array2<f64>, n_samples: usize) -> Array2<f64> {
    let tau = lower_triangular_inverse(&cholesky(cov));
    let max = tau.iter().map(|v| v.abs()).fold(0.0, f64::max);
    tau / ((n_samples as f64).sqrt() * max)
}

/// Feature weights drawn from `N(0, cov)`.
pub fn correlated_weights(cov: &Array2<f64>, seed: u64) -> Array1<f64> {
    let mut rng = StdRng::seed_from_u64(seed);
    let draws = Array1::from_shape_fn(cov.nrows(), |_| rng.sample::<f64, _>(StandardNormal));
    cholesky(cov).dot(&draws)
}
