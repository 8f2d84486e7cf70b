//! Closed-form descriptive statistics over one parameter's samples.

use std::collections::BTreeMap;

use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Summary {
    pub count: usize,
    pub min: f64,
    pub max: f64,
    pub mean: f64,
    pub mode: f64,
    /// Population standard deviation.
    pub std_dev: f64,
    pub outlier_min: f64,
    pub outlier_max: f64,
}

/// Summarises `values`. Returns `None` for fewer than two samples, where a
/// standard deviation is meaningless.
pub fn summarize(values: &[f64], outlier_k: f64, mode_bin_width: f64) -> Option<Summary> {
    if values.len() < 2 {
        return None;
    }

    let count = values.len();
    let n = count as f64;
    let mean = values.iter().sum::<f64>() / n;
    let variance = values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / n;
    let std_dev = variance.sqrt();

    let min = values.iter().copied().fold(f64::INFINITY, f64::min);
    let max = values.iter().copied().fold(f64::NEG_INFINITY, f64::max);

    Some(Summary {
        count,
        min,
        max,
        mean,
        mode: binned_mode(values, mode_bin_width),
        std_dev,
        outlier_min: mean - outlier_k * std_dev,
        outlier_max: mean + outlier_k * std_dev,
    })
}

/// Most frequent value after rounding to the nearest multiple of
/// `bin_width`. Ties go to the smallest bin.
pub fn binned_mode(values: &[f64], bin_width: f64) -> f64 {
    let mut bins: BTreeMap<i64, usize> = BTreeMap::new();
    for value in values {
        *bins.entry((value / bin_width).round() as i64).or_default() += 1;
    }

    let mut best: Option<(i64, usize)> = None;
    for (bin, count) in bins {
        if best.map_or(true, |(_, best_count)| count > best_count) {
            best = Some((bin, count));
        }
    }

    best.map(|(bin, _)| bin as f64 * bin_width).unwrap_or(f64::NAN)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn population_standard_deviation() {
        let summary = summarize(&[2.0, 4.0, 4.0, 4.0, 5.0, 5.0, 7.0, 9.0], 2.0, 1.0).unwrap();
        assert_eq!(summary.mean, 5.0);
        assert_eq!(summary.std_dev, 2.0);
        assert_eq!(summary.mode, 4.0);
        assert_eq!(summary.min, 2.0);
        assert_eq!(summary.max, 9.0);
    }

    #[test]
    fn outlier_bounds_follow_k() {
        let values = [10.0, 12.0, 15.0, 90.0, 11.0];
        for k in [1.0, 2.0, 3.5] {
            let summary = summarize(&values, k, 1.0).unwrap();
            assert_eq!(summary.outlier_min, summary.mean - k * summary.std_dev);
            assert_eq!(summary.outlier_max, summary.mean + k * summary.std_dev);
        }
    }

    #[test]
    fn fewer_than_two_samples_yield_nothing() {
        assert!(summarize(&[], 2.0, 1.0).is_none());
        assert!(summarize(&[42.0], 2.0, 1.0).is_none());
    }

    #[test]
    fn mode_bins_continuous_values() {
        assert_eq!(binned_mode(&[90.2, 89.9, 90.4, 75.1], 1.0), 90.0);
        assert_eq!(binned_mode(&[1012.0, 1047.0, 2210.0], 50.0), 1000.0);
    }

    #[test]
    fn mode_ties_pick_smallest_bin() {
        assert_eq!(binned_mode(&[3.0, 3.0, 1.0, 1.0, 2.0], 1.0), 1.0);
    }

    #[test]
    fn constant_series_has_zero_spread() {
        let summary = summarize(&[800.0; 6], 2.0, 1.0).unwrap();
        assert_eq!(summary.std_dev, 0.0);
        assert_eq!(summary.outlier_min, 800.0);
        assert_eq!(summary.outlier_max, 800.0);
    }
}
