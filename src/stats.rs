//! Descriptive statistics, rank correlation and AUROC.
//!
//! Every function is total: empty or degenerate input returns a neutral value
//! (0, or 0.5 for AUROC) instead of NaN.

use serde::{Deserialize, Serialize};
use statrs::statistics::{Data, OrderStatistics, RankTieBreaker, Statistics};

pub fn mean(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    values.mean()
}

/// Population variance (denominator `n`).
pub fn population_variance(values: &[f64]) -> f64 {
    if values.len() < 2 {
        return 0.0;
    }
    values.population_variance().max(0.0)
}

pub fn population_std(values: &[f64]) -> f64 {
    population_variance(values).sqrt()
}

/// Median that picks the lower of the two central values for even lengths.
pub fn lower_median<T: Ord + Copy>(values: &[T]) -> Option<T> {
    if values.is_empty() {
        return None;
    }
    let mut sorted = values.to_vec();
    sorted.sort_unstable();
    Some(sorted[(sorted.len() - 1) / 2])
}

/// 1-based ranks, ties get the average of the ranks they span.
///
/// A NaN makes every value tie, so rank statistics over it stay neutral.
pub fn average_ranks(values: &[f64]) -> Vec<f64> {
    if values.iter().any(|v| v.is_nan()) {
        return vec![(values.len() + 1) as f64 / 2.0; values.len()];
    }
    Data::new(values.to_vec()).ranks(RankTieBreaker::Average)
}

/// Pearson correlation; 0 when either side has no variance.
///
/// The variance test is relative to the magnitude of the input, so signals
/// on a tiny scale still correlate.
pub fn pearson(x: &[f64], y: &[f64]) -> f64 {
    let n = x.len().min(y.len());
    if n < 2 {
        return 0.0;
    }
    let (x, y) = (&x[..n], &y[..n]);
    let (mx, my) = (mean(x), mean(y));
    let (mut cov, mut vx, mut vy) = (0.0, 0.0, 0.0);
    for (a, b) in x.iter().zip(y) {
        let (dx, dy) = (a - mx, b - my);
        cov += dx * dy;
        vx += dx * dx;
        vy += dy * dy;
    }
    if is_flat(vx, x) || is_flat(vy, y) {
        return 0.0;
    }
    (cov / (vx.sqrt() * vy.sqrt())).clamp(-1.0, 1.0)
}

/// Centred sum of squares indistinguishable from rounding noise.
fn is_flat(centred_sum_sq: f64, values: &[f64]) -> bool {
    let raw_sum_sq: f64 = values.iter().map(|v| v * v).sum();
    !(centred_sum_sq > f64::EPSILON * raw_sum_sq)
}

/// Spearman rank correlation; 0 when either side is constant.
pub fn spearman(x: &[f64], y: &[f64]) -> f64 {
    let n = x.len().min(y.len());
    pearson(&average_ranks(&x[..n]), &average_ranks(&y[..n]))
}

/// Area under the ROC curve of `scores` ranking `positives` above negatives.
///
/// Computed through the Mann-Whitney U statistic with averaged ranks, so tied
/// scores count one half. Returns 0.5 when only one class is present.
pub fn auroc(scores: &[f64], positives: &[bool]) -> f64 {
    let n = scores.len().min(positives.len());
    let n_pos = positives[..n].iter().filter(|&&p| p).count();
    let n_neg = n - n_pos;
    if n_pos == 0 || n_neg == 0 {
        return 0.5;
    }
    let ranks = average_ranks(&scores[..n]);
    let pos_rank_sum: f64 = ranks.iter().zip(&positives[..n]).filter(|(_, &p)| p).map(|(r, _)| r).sum();
    let u = pos_rank_sum - (n_pos * (n_pos + 1)) as f64 / 2.0;
    (u / (n_pos as f64 * n_neg as f64)).clamp(0.0, 1.0)
}

/// Mean, population std and range of a sample.
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Summary {
    pub count: usize,
    pub mean: f64,
    pub std: f64,
    pub min: f64,
    pub max: f64,
}
impl Summary {
    pub fn of(values: &[f64]) -> Self {
        if values.is_empty() {
            return Self::default();
        }
        Self {
            count: values.len(),
            mean: mean(values),
            std: population_std(values),
            min: Statistics::min(values),
            max: Statistics::max(values),
        }
    }
}
