use crate::estimate::EstimationError;
use crate::family::{Distribution, Family};
use crate::types::Response;
use ndarray::{Array2, ArrayView1, ArrayView2, Axis};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Goodness-of-fit measures reported for fitted models.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ScoreMetric {
    /// `2 * (LL_saturated - LL_model)`. Lower is better.
    Deviance,
    /// `1 - (LL_saturated - LL_model) / (LL_saturated - LL_null)`. Higher is better.
    PseudoR2,
    /// Fraction of correctly classified samples. Binomial and multinomial only.
    Accuracy,
}

impl fmt::Display for ScoreMetric {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ScoreMetric::Deviance => "deviance",
            ScoreMetric::PseudoR2 => "pseudo-r2",
            ScoreMetric::Accuracy => "accuracy",
        };
        f.write_str(name)
    }
}

impl FromStr for ScoreMetric {
    type Err = EstimationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().replace('_', "-").as_str() {
            "deviance" => Ok(ScoreMetric::Deviance),
            "pseudo-r2" => Ok(ScoreMetric::PseudoR2),
            "accuracy" => Ok(ScoreMetric::Accuracy),
            other => Err(EstimationError::InvalidParameter(format!(
                "unknown score metric '{other}'"
            ))),
        }
    }
}

/// Scores predicted means `mu` against observed responses.
pub fn score(
    family: Family,
    y: &Response,
    mu: ArrayView2<f64>,
    metric: ScoreMetric,
) -> Result<f64, EstimationError> {
    if y.dim() != mu.dim() {
        return Err(EstimationError::DimensionMismatch {
            context: "score response rows",
            expected: mu.nrows(),
            found: y.nrows(),
        });
    }
    match metric {
        ScoreMetric::Deviance => Ok(deviance(family, y.as_view(), mu)),
        ScoreMetric::PseudoR2 => pseudo_r2(family, y.as_view(), mu),
        ScoreMetric::Accuracy => accuracy(family, y.as_view(), mu),
    }
}

pub fn deviance(family: Family, y: ArrayView2<f64>, mu: ArrayView2<f64>) -> f64 {
    let saturated = family.log_likelihood(y, y);
    let model = family.log_likelihood(y, mu);
    2.0 * (saturated - model)
}

pub fn pseudo_r2(
    family: Family,
    y: ArrayView2<f64>,
    mu: ArrayView2<f64>,
) -> Result<f64, EstimationError> {
    let saturated = family.log_likelihood(y, y);
    let model = family.log_likelihood(y, mu);
    let null = family.log_likelihood(y, null_mean(y).view());
    let denominator = saturated - null;
    if denominator.abs() <= f64::EPSILON {
        return Err(EstimationError::InvalidParameter(
            "pseudo-R2 is undefined for a constant response".to_string(),
        ));
    }
    Ok(1.0 - (saturated - model) / denominator)
}

pub fn accuracy(
    family: Family,
    y: ArrayView2<f64>,
    mu: ArrayView2<f64>,
) -> Result<f64, EstimationError> {
    let n = y.nrows();
    if n == 0 {
        return Err(EstimationError::InvalidParameter(
            "accuracy needs at least one sample".to_string(),
        ));
    }
    let correct = match family.distribution {
        Distribution::Binomial => y
            .column(0)
            .iter()
            .zip(mu.column(0))
            .filter(|&(&yi, &mi)| (mi > 0.5) == (yi > 0.5))
            .count(),
        Distribution::Multinomial => y
            .rows()
            .into_iter()
            .zip(mu.rows())
            .filter(|(y_row, mu_row)| argmax(*y_row) == argmax(*mu_row))
            .count(),
        other => {
            return Err(EstimationError::InvalidParameter(format!(
                "accuracy is only defined for classification, not for the {other} distribution"
            )));
        }
    };
    Ok(correct as f64 / n as f64)
}

fn null_mean(y: ArrayView2<f64>) -> Array2<f64> {
    let mean = y.mean_axis(Axis(0)).unwrap_or_else(|| ndarray::Array1::zeros(y.ncols()));
    let mut null = Array2::zeros(y.raw_dim());
    for mut row in null.rows_mut() {
        row.assign(&mean);
    }
    null
}

fn argmax(row: ArrayView1<f64>) -> usize {
    row.iter()
        .enumerate()
        .fold((0, f64::NEG_INFINITY), |best, (i, &v)| {
            if v > best.1 { (i, v) } else { best }
        })
        .0
}
