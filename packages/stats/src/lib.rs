#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(
    clippy::multiple_crate_versions,
    clippy::cargo_common_metadata,
    clippy::cast_precision_loss
)]

//! Descriptive statistics over numeric arrays.
//!
//! Used for residual summaries and color-scale domains. Every function
//! ignores `NaN` and infinite inputs and is total: empty input (and, where
//! the statistic needs spread, fewer than two finite values) yields `0.0`
//! instead of `NaN` or a panic. Callers must check the input length before
//! trusting a result computed from fewer than two values.

use serde::{Deserialize, Serialize};

fn finite(values: &[f64]) -> Vec<f64> {
    values.iter().copied().filter(|v| v.is_finite()).collect()
}

/// Arithmetic mean.
#[must_use]
pub fn mean(values: &[f64]) -> f64 {
    let (sum, count) = values
        .iter()
        .filter(|v| v.is_finite())
        .fold((0.0, 0_usize), |(sum, count), v| (sum + v, count + 1));
    if count == 0 {
        return 0.0;
    }
    sum / count as f64
}

/// Sample variance (`n - 1` denominator).
#[must_use]
pub fn variance(values: &[f64]) -> f64 {
    let values = finite(values);
    if values.len() < 2 {
        return 0.0;
    }
    let m = mean(&values);
    values.iter().map(|v| (v - m).powi(2)).sum::<f64>() / (values.len() - 1) as f64
}

/// Sample standard deviation.
#[must_use]
pub fn std_dev(values: &[f64]) -> f64 {
    variance(values).sqrt()
}

/// Smallest value, or `0.0` for empty input.
#[must_use]
pub fn min(values: &[f64]) -> f64 {
    values
        .iter()
        .copied()
        .filter(|v| v.is_finite())
        .reduce(f64::min)
        .unwrap_or(0.0)
}

/// Largest value, or `0.0` for empty input.
#[must_use]
pub fn max(values: &[f64]) -> f64 {
    values
        .iter()
        .copied()
        .filter(|v| v.is_finite())
        .reduce(f64::max)
        .unwrap_or(0.0)
}

/// Quantile with linear interpolation between closest ranks.
///
/// Sorts a copy of the finite input values. `p` is clamped to `[0, 1]`.
#[must_use]
pub fn quantile(values: &[f64], p: f64) -> f64 {
    let mut sorted = finite(values);
    if sorted.is_empty() {
        return 0.0;
    }
    sorted.sort_by(f64::total_cmp);
    quantile_sorted(&sorted, p)
}

#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
fn quantile_sorted(sorted: &[f64], p: f64) -> f64 {
    let p = if p.is_nan() { 0.5 } else { p.clamp(0.0, 1.0) };
    let position = (sorted.len() - 1) as f64 * p;
    let lower = position.floor() as usize;
    let upper = position.ceil() as usize;
    let fraction = position - lower as f64;
    sorted[lower] + (sorted[upper] - sorted[lower]) * fraction
}

/// Central moments `(m2, m3, m4)` with an `n` denominator.
fn central_moments(values: &[f64]) -> (f64, f64, f64) {
    let m = mean(values);
    let n = values.len() as f64;
    let (m2, m3, m4) = values.iter().fold((0.0, 0.0, 0.0), |(a, b, c), v| {
        let d = v - m;
        (d.mul_add(d, a), d.powi(3) + b, d.powi(4) + c)
    });
    (m2 / n, m3 / n, m4 / n)
}

/// Skewness (population moment coefficient `m3 / m2^1.5`).
#[must_use]
pub fn skewness(values: &[f64]) -> f64 {
    let values = finite(values);
    if values.len() < 2 {
        return 0.0;
    }
    let (m2, m3, _) = central_moments(&values);
    if m2 <= 0.0 {
        return 0.0;
    }
    m3 / m2.powf(1.5)
}

/// Excess kurtosis (`m4 / m2^2 - 3`).
#[must_use]
pub fn kurtosis(values: &[f64]) -> f64 {
    let values = finite(values);
    if values.len() < 2 {
        return 0.0;
    }
    let (m2, _, m4) = central_moments(&values);
    if m2 <= 0.0 {
        return 0.0;
    }
    m4 / (m2 * m2) - 3.0
}

/// Summary of a residual distribution.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResidualStatistics {
    /// Number of finite values summarized.
    pub count: usize,
    /// Smallest value.
    pub min: f64,
    /// Largest value.
    pub max: f64,
    /// Mean.
    pub mean: f64,
    /// Sample standard deviation.
    pub std_dev: f64,
    /// Skewness.
    pub skewness: f64,
    /// Excess kurtosis.
    pub kurtosis: f64,
    /// 25th percentile.
    pub q1: f64,
    /// 50th percentile.
    pub median: f64,
    /// 75th percentile.
    pub q3: f64,
}

impl ResidualStatistics {
    /// Summarizes the finite values in `values`.
    #[must_use]
    pub fn from_values(values: &[f64]) -> Self {
        let mut sorted = finite(values);
        if sorted.is_empty() {
            return Self::default();
        }
        sorted.sort_by(f64::total_cmp);

        Self {
            count: sorted.len(),
            min: sorted[0],
            max: sorted[sorted.len() - 1],
            mean: mean(&sorted),
            std_dev: std_dev(&sorted),
            skewness: skewness(&sorted),
            kurtosis: kurtosis(&sorted),
            q1: quantile_sorted(&sorted, 0.25),
            median: quantile_sorted(&sorted, 0.5),
            q3: quantile_sorted(&sorted, 0.75),
        }
    }

    /// Interquartile range.
    #[must_use]
    pub fn iqr(&self) -> f64 {
        self.q3 - self.q1
    }
}

/// Value range for a color scale.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct ColorDomain {
    /// Lower bound.
    pub min: f64,
    /// Upper bound.
    pub max: f64,
}

impl ColorDomain {
    /// Domain clipped to the `[lower_p, upper_p]` quantiles so outliers do
    /// not wash out the scale.
    #[must_use]
    pub fn from_values(values: &[f64], lower_p: f64, upper_p: f64) -> Self {
        let (lower_p, upper_p) = if lower_p <= upper_p {
            (lower_p, upper_p)
        } else {
            (upper_p, lower_p)
        };
        Self {
            min: quantile(values, lower_p),
            max: quantile(values, upper_p),
        }
    }

    /// Domain centered on zero, for diverging residual scales.
    #[must_use]
    pub fn symmetric(self) -> Self {
        let bound = self.min.abs().max(self.max.abs());
        Self {
            min: -bound,
            max: bound,
        }
    }

    /// Position of `value` within the domain, clamped to `[0, 1]`.
    /// A zero-width domain maps everything to `0.5`.
    #[must_use]
    pub fn normalize(&self, value: f64) -> f64 {
        let span = self.max - self.min;
        if span <= 0.0 || !span.is_finite() {
            return 0.5;
        }
        ((value - self.min) / span).clamp(0.0, 1.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn approx(a: f64, b: f64) -> bool {
        (a - b).abs() < 1e-9
    }

    #[test]
    fn mean_of_values() {
        assert!(approx(mean(&[1.0, 2.0, 3.0, 4.0]), 2.5));
        assert!(approx(mean(&[]), 0.0));
    }

    #[test]
    fn sample_variance() {
        assert!(approx(variance(&[2.0, 4.0, 4.0, 4.0, 5.0, 5.0, 7.0, 9.0]), 32.0 / 7.0));
        assert!(approx(std_dev(&[1.0, 3.0]), 2.0_f64.sqrt()));
        assert!(approx(variance(&[5.0]), 0.0));
        assert!(approx(variance(&[]), 0.0));
    }

    #[test]
    fn quantile_interpolates() {
        assert!(approx(quantile(&[1.0, 2.0, 3.0, 4.0], 0.5), 2.5));
        assert!(approx(quantile(&[4.0, 1.0, 3.0, 2.0], 0.25), 1.75));
        assert!(approx(quantile(&[1.0, 2.0, 3.0, 4.0], 0.0), 1.0));
        assert!(approx(quantile(&[1.0, 2.0, 3.0, 4.0], 1.0), 4.0));
        assert!(approx(quantile(&[7.0], 0.9), 7.0));
    }

    #[test]
    fn quantile_edge_cases() {
        assert!(approx(quantile(&[], 0.5), 0.0));
        assert!(approx(quantile(&[1.0, 2.0], 2.0), 2.0));
        assert!(approx(quantile(&[1.0, 2.0], -1.0), 1.0));
        assert!(approx(quantile(&[f64::NAN, 1.0, 3.0], 0.5), 2.0));
    }

    #[test]
    fn non_finite_values_are_ignored() {
        let values = [1.0, f64::NAN, 3.0, f64::INFINITY, f64::NEG_INFINITY];
        assert!(approx(mean(&values), 2.0));
        assert!(approx(variance(&values), 2.0));
        assert!(approx(std_dev(&values), 2.0_f64.sqrt()));
        assert!(approx(min(&values), 1.0));
        assert!(approx(max(&values), 3.0));
        assert!(approx(skewness(&values), 0.0));
        assert!(approx(kurtosis(&values), -2.0));
        assert!(approx(quantile(&values, 1.0), 3.0));
        assert!(approx(mean(&[f64::NAN]), 0.0));
        assert!(approx(variance(&[f64::NAN, 4.0]), 0.0));
    }

    #[test]
    fn quantile_does_not_reorder_input() {
        let values = [3.0, 1.0, 2.0];
        let _ = quantile(&values, 0.5);
        assert_eq!(values, [3.0, 1.0, 2.0]);
    }

    #[test]
    fn skewness_sign() {
        assert!(approx(skewness(&[1.0, 2.0, 3.0]), 0.0));
        assert!(skewness(&[1.0, 1.0, 1.0, 10.0]) > 0.0);
        assert!(skewness(&[-10.0, 1.0, 1.0, 1.0]) < 0.0);
        assert!(approx(skewness(&[2.0, 2.0, 2.0]), 0.0));
    }

    #[test]
    fn excess_kurtosis() {
        // Two-point distribution has kurtosis 1, excess -2.
        assert!(approx(kurtosis(&[-1.0, 1.0, -1.0, 1.0]), -2.0));
        assert!(approx(kurtosis(&[3.0]), 0.0));
        assert!(approx(kurtosis(&[]), 0.0));
    }

    #[test]
    fn min_and_max() {
        assert!(approx(min(&[3.0, -1.0, 2.0]), -1.0));
        assert!(approx(max(&[3.0, -1.0, 2.0]), 3.0));
        assert!(approx(min(&[]), 0.0));
    }

    #[test]
    fn residual_statistics_summary() {
        let stats = ResidualStatistics::from_values(&[4.0, 1.0, f64::NAN, 3.0, 2.0, f64::INFINITY]);
        assert_eq!(stats.count, 4);
        assert!(approx(stats.min, 1.0));
        assert!(approx(stats.max, 4.0));
        assert!(approx(stats.mean, 2.5));
        assert!(approx(stats.median, 2.5));
        assert!(approx(stats.q1, 1.75));
        assert!(approx(stats.q3, 3.25));
        assert!(approx(stats.iqr(), 1.5));
    }

    #[test]
    fn residual_statistics_empty() {
        assert_eq!(ResidualStatistics::from_values(&[]), ResidualStatistics::default());
    }

    #[test]
    fn residual_statistics_serialize_camel_case() {
        let json = serde_json::to_value(ResidualStatistics::from_values(&[1.0, 2.0])).unwrap();
        assert!(json.get("stdDev").is_some());
        assert_eq!(json["count"], 2);
    }

    #[test]
    fn color_domain_clips_outliers() {
        let values: Vec<f64> = (0..=100).map(f64::from).collect();
        let domain = ColorDomain::from_values(&values, 0.05, 0.95);
        assert!(approx(domain.min, 5.0));
        assert!(approx(domain.max, 95.0));

        let swapped = ColorDomain::from_values(&values, 0.95, 0.05);
        assert_eq!(domain, swapped);
    }

    #[test]
    fn color_domain_symmetric_and_normalize() {
        let domain = ColorDomain { min: -2.0, max: 5.0 }.symmetric();
        assert!(approx(domain.min, -5.0));
        assert!(approx(domain.max, 5.0));
        assert!(approx(domain.normalize(0.0), 0.5));
        assert!(approx(domain.normalize(10.0), 1.0));
        assert!(approx(ColorDomain::default().normalize(3.0), 0.5));
    }
}
