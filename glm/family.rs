//! Response distributions and their link-level maps.
//!
//! Every distribution is described by four elementwise maps of the linear
//! predictor `z`: the inverse link `mu(z)`, the negative log-likelihood, and its
//! first and second derivatives with respect to `z`. The solvers only ever talk to
//! these maps, so the distribution is dispatched once per call rather than inside
//! the optimizer loops.

use crate::estimate::EstimationError;
use crate::matrix::DesignMatrix;
use ndarray::{Array1, Array2, ArrayView1, ArrayView2, Zip};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Lower bound applied to every per-sample and per-coordinate curvature.
pub const HESSIAN_FLOOR: f64 = 1e-6;

/// Guard used when dividing by the softplus mean.
pub const SOFTPLUS_MEAN_FLOOR: f64 = 1e-6;

/// Default point beyond which the Poisson mean continues linearly instead of exponentially.
pub const DEFAULT_POISSON_LINEARIZATION: f64 = 2.0;

const LOGIT_CLIP: f64 = 35.0;
const LOG_FLOOR: f64 = 1e-10;

/// Closed set of supported response distributions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Distribution {
    /// Identity link, squared-error loss.
    Gaussian,
    /// Logit link for binary outcomes.
    Binomial,
    /// Log link for counts, linearized above the configured threshold.
    Poisson,
    /// Softplus link for counts.
    Softplus,
    /// Softmax over one-hot encoded classes.
    Multinomial,
}

impl Distribution {
    pub const ALL: [Distribution; 5] = [
        Distribution::Gaussian,
        Distribution::Binomial,
        Distribution::Poisson,
        Distribution::Softplus,
        Distribution::Multinomial,
    ];

    pub fn name(self) -> &'static str {
        match self {
            Distribution::Gaussian => "gaussian",
            Distribution::Binomial => "binomial",
            Distribution::Poisson => "poisson",
            Distribution::Softplus => "softplus",
            Distribution::Multinomial => "multinomial",
        }
    }

    pub fn is_multinomial(self) -> bool {
        matches!(self, Distribution::Multinomial)
    }
}

impl fmt::Display for Distribution {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Distribution {
    type Err = EstimationError;

    fn from_str(tag: &str) -> Result<Self, Self::Err> {
        Distribution::ALL
            .into_iter()
            .find(|d| d.name().eq_ignore_ascii_case(tag.trim()))
            .ok_or_else(|| EstimationError::InvalidDistribution(tag.to_string()))
    }
}

/// One-dimensional derivatives of the mean loss with respect to a single coefficient.
///
/// Scalar families produce one gradient and one curvature; the multinomial family
/// produces one of each per class.
#[derive(Debug, Clone, PartialEq)]
pub enum CoordinateDerivatives {
    Scalar { gradient: f64, hessian: f64 },
    PerClass { gradient: Array1<f64>, hessian: Array1<f64> },
}

impl CoordinateDerivatives {
    pub fn gradient(&self, output: usize) -> f64 {
        match self {
            Self::Scalar { gradient, .. } => *gradient,
            Self::PerClass { gradient, .. } => gradient[output],
        }
    }

    pub fn hessian(&self, output: usize) -> f64 {
        match self {
            Self::Scalar { hessian, .. } => *hessian,
            Self::PerClass { hessian, .. } => hessian[output],
        }
    }
}

/// A distribution together with its numerical settings.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Family {
    pub distribution: Distribution,
    /// Threshold `eta` of the linearized Poisson mean. Ignored by other distributions.
    pub poisson_linearization: f64,
}

impl Family {
    pub fn new(distribution: Distribution) -> Self {
        Self {
            distribution,
            poisson_linearization: DEFAULT_POISSON_LINEARIZATION,
        }
    }

    pub fn with_poisson_linearization(mut self, eta: f64) -> Self {
        self.poisson_linearization = eta;
        self
    }

    fn link(&self) -> Link {
        match self.distribution {
            Distribution::Gaussian => Link::Scalar(ScalarLink::Identity),
            Distribution::Binomial => Link::Scalar(ScalarLink::Logit),
            Distribution::Poisson => Link::Scalar(ScalarLink::LinearizedLog {
                eta: self.poisson_linearization,
            }),
            Distribution::Softplus => Link::Scalar(ScalarLink::Softplus),
            Distribution::Multinomial => Link::Softmax,
        }
    }

    /// Inverse link applied to every sample. Row-wise softmax for the multinomial family.
    pub fn mu(&self, z: ArrayView2<f64>) -> Array2<f64> {
        match self.link() {
            Link::Softmax => {
                let mut mu = Array2::zeros(z.raw_dim());
                let mut probabilities = vec![0.0; z.ncols()];
                for (z_row, mut mu_row) in z.rows().into_iter().zip(mu.rows_mut()) {
                    softmax_into(z_row, &mut probabilities);
                    for (out, &p) in mu_row.iter_mut().zip(&probabilities) {
                        *out = p;
                    }
                }
                mu
            }
            Link::Scalar(link) => z.mapv(|zi| link.mean(zi)),
        }
    }

    /// Per-sample derivative of the negative log-likelihood with respect to `z`.
    pub fn gradient(&self, z: ArrayView2<f64>, y: ArrayView2<f64>) -> Array2<f64> {
        match self.link() {
            Link::Softmax => &self.mu(z) - &y,
            Link::Scalar(link) => Zip::from(&z)
                .and(&y)
                .map_collect(|&zi, &yi| link.gradient(zi, yi)),
        }
    }

    /// Per-sample diagonal curvature of the negative log-likelihood, floored at [`HESSIAN_FLOOR`].
    pub fn hessian_diag(&self, z: ArrayView2<f64>, y: ArrayView2<f64>) -> Array2<f64> {
        match self.link() {
            Link::Softmax => self.mu(z).mapv(softmax_curvature),
            Link::Scalar(link) => Zip::from(&z)
                .and(&y)
                .map_collect(|&zi, &yi| link.hessian(zi, yi)),
        }
    }

    /// Summed negative log-likelihood, up to terms that do not depend on `z`.
    pub fn negative_log_likelihood(&self, z: ArrayView2<f64>, y: ArrayView2<f64>) -> f64 {
        match self.link() {
            Link::Softmax => z
                .rows()
                .into_iter()
                .zip(y.rows())
                .map(|(z_row, y_row)| log_sum_exp(z_row) - z_row.dot(&y_row))
                .sum(),
            Link::Scalar(link) => Zip::from(&z)
                .and(&y)
                .fold(0.0, |acc, &zi, &yi| acc + link.nll(zi, yi)),
        }
    }

    /// Log-likelihood evaluated on means rather than on the linear predictor.
    ///
    /// Used for scoring against saturated and null models, where the mean is known but
    /// has no finite linear predictor.
    pub fn log_likelihood(&self, y: ArrayView2<f64>, mu: ArrayView2<f64>) -> f64 {
        match self.distribution {
            Distribution::Gaussian => Zip::from(&y)
                .and(&mu)
                .fold(0.0, |acc, &yi, &mi| acc - 0.5 * (yi - mi) * (yi - mi)),
            Distribution::Binomial => Zip::from(&y).and(&mu).fold(0.0, |acc, &yi, &mi| {
                let m = mi.clamp(LOG_FLOOR, 1.0 - LOG_FLOOR);
                acc + yi * m.ln() + (1.0 - yi) * (1.0 - m).ln()
            }),
            Distribution::Poisson | Distribution::Softplus => {
                Zip::from(&y).and(&mu).fold(0.0, |acc, &yi, &mi| {
                    acc + yi * mi.max(LOG_FLOOR).ln() - mi
                })
            }
            Distribution::Multinomial => Zip::from(&y)
                .and(&mu)
                .fold(0.0, |acc, &yi, &mi| acc + yi * mi.max(LOG_FLOOR).ln()),
        }
    }

    /// Gradient and curvature of the mean loss along one coefficient row.
    ///
    /// Coordinate 0 is the implicit all-ones intercept column; coordinate `k >= 1` is
    /// feature column `k - 1` of `x`. Sparse columns only visit their stored rows. The
    /// multinomial family returns one value per class from a single pass over the rows.
    pub fn coordinate_derivatives(
        &self,
        x: &DesignMatrix,
        coordinate: usize,
        z: ArrayView2<f64>,
        y: ArrayView2<f64>,
    ) -> CoordinateDerivatives {
        let n = z.nrows().max(1) as f64;
        match self.link() {
            Link::Softmax => {
                let n_classes = z.ncols();
                let mut gradient = Array1::<f64>::zeros(n_classes);
                let mut hessian = Array1::<f64>::zeros(n_classes);
                let mut probabilities = vec![0.0; n_classes];
                let mut visit = |row: usize, xv: f64| {
                    softmax_into(z.row(row), &mut probabilities);
                    for (c, &m) in probabilities.iter().enumerate() {
                        gradient[c] += xv * (m - y[[row, c]]);
                        hessian[c] += xv * xv * softmax_curvature(m);
                    }
                };
                visit_coordinate(x, coordinate, z.nrows(), &mut visit);
                gradient /= n;
                hessian.mapv_inplace(|h: f64| (h / n).max(HESSIAN_FLOOR));
                CoordinateDerivatives::PerClass { gradient, hessian }
            }
            Link::Scalar(link) => {
                let mut gradient = 0.0;
                let mut hessian = 0.0;
                let mut visit = |row: usize, xv: f64| {
                    let zi = z[[row, 0]];
                    let yi = y[[row, 0]];
                    gradient += xv * link.gradient(zi, yi);
                    hessian += xv * xv * link.hessian(zi, yi);
                };
                visit_coordinate(x, coordinate, z.nrows(), &mut visit);
                CoordinateDerivatives::Scalar {
                    gradient: gradient / n,
                    hessian: (hessian / n).max(HESSIAN_FLOOR),
                }
            }
        }
    }
}

/// How the linear predictor enters the likelihood.
#[derive(Debug, Clone, Copy, PartialEq)]
enum Link {
    /// One output column, every sample independent.
    Scalar(ScalarLink),
    /// Softmax across the class columns of each row.
    Softmax,
}

/// Elementwise maps of a single-output family.
#[derive(Debug, Clone, Copy, PartialEq)]
enum ScalarLink {
    Identity,
    Logit,
    /// `exp(z)` up to `eta`, then the tangent line at `eta`.
    LinearizedLog { eta: f64 },
    Softplus,
}

impl ScalarLink {
    fn mean(self, z: f64) -> f64 {
        match self {
            ScalarLink::Identity => z,
            ScalarLink::Logit => logistic(z.clamp(-LOGIT_CLIP, LOGIT_CLIP)),
            ScalarLink::LinearizedLog { eta } => {
                if z <= eta {
                    z.exp()
                } else {
                    eta.exp() * (z - eta + 1.0)
                }
            }
            ScalarLink::Softplus => softplus(z),
        }
    }

    fn nll(self, z: f64, y: f64) -> f64 {
        match self {
            ScalarLink::Identity => 0.5 * (y - z) * (y - z),
            ScalarLink::Logit => {
                let zc = z.clamp(-LOGIT_CLIP, LOGIT_CLIP);
                softplus(zc) - y * zc
            }
            ScalarLink::LinearizedLog { .. } | ScalarLink::Softplus => {
                let mu = self.mean(z);
                mu - y * mu.max(LOG_FLOOR).ln()
            }
        }
    }

    fn gradient(self, z: f64, y: f64) -> f64 {
        match self {
            ScalarLink::Identity => z - y,
            ScalarLink::Logit => self.mean(z) - y,
            ScalarLink::LinearizedLog { eta } => {
                let mu = self.mean(z);
                if z <= eta {
                    mu - y
                } else {
                    eta.exp() * (1.0 - y / mu)
                }
            }
            ScalarLink::Softplus => {
                let s = logistic(z);
                let mu = softplus(z).max(SOFTPLUS_MEAN_FLOOR);
                s * (1.0 - y / mu)
            }
        }
    }

    fn hessian(self, z: f64, y: f64) -> f64 {
        let curvature = match self {
            ScalarLink::Identity => 1.0,
            ScalarLink::Logit => {
                let mu = self.mean(z);
                mu * (1.0 - mu)
            }
            ScalarLink::LinearizedLog { eta } => {
                let mu = self.mean(z);
                if z <= eta {
                    mu
                } else {
                    (2.0 * eta).exp() * y / (mu * mu)
                }
            }
            ScalarLink::Softplus => {
                let s = logistic(z);
                let mu = softplus(z).max(SOFTPLUS_MEAN_FLOOR);
                let ds = s * (1.0 - s);
                ds - y * (ds / mu - s * s / (mu * mu))
            }
        };
        if curvature.is_finite() {
            curvature.max(HESSIAN_FLOOR)
        } else {
            HESSIAN_FLOOR
        }
    }
}

/// Diagonal softmax curvature `m (1 - m)` of one class probability.
fn softmax_curvature(m: f64) -> f64 {
    (m * (1.0 - m)).max(HESSIAN_FLOOR)
}

fn visit_coordinate<F>(x: &DesignMatrix, coordinate: usize, n_samples: usize, visit: &mut F)
where
    F: FnMut(usize, f64),
{
    if coordinate == 0 {
        for row in 0..n_samples {
            visit(row, 1.0);
        }
    } else {
        x.for_each_in_column(coordinate - 1, |row, value| visit(row, value));
    }
}

/// Logistic sigmoid, evaluated without overflow for either sign of `z`.
pub fn logistic(z: f64) -> f64 {
    if z >= 0.0 {
        1.0 / (1.0 + (-z).exp())
    } else {
        let e = z.exp();
        e / (1.0 + e)
    }
}

/// `ln(1 + e^z)`, asymptotically `max(z, 0)` for large `|z|`.
pub fn softplus(z: f64) -> f64 {
    z.max(0.0) + (-z.abs()).exp().ln_1p()
}

fn log_sum_exp(z: ArrayView1<f64>) -> f64 {
    let max = z.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    if !max.is_finite() {
        return max;
    }
    max + z.iter().map(|&v| (v - max).exp()).sum::<f64>().ln()
}

fn softmax_into(z: ArrayView1<f64>, out: &mut [f64]) {
    let max = z.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    let mut total = 0.0;
    for (o, &v) in out.iter_mut().zip(z.iter()) {
        *o = (v - max).exp();
        total += *o;
    }
    for o in out.iter_mut() {
        *o /= total;
    }
}
