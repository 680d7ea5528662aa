//! Small order-statistics helpers over `f64` samples.
//!
//! All functions ignore NaN values so a single broken measurement cannot
//! poison a sort or a sum.

use std::cmp::Ordering;

fn finite(samples: &[f64]) -> Vec<f64> {
    samples.iter().copied().filter(|v| v.is_finite()).collect()
}

/// Median of the samples, or `None` when there are no finite values.
///
/// For an even number of samples the two middle values are averaged.
pub fn median_f64(samples: &[f64]) -> Option<f64> {
    let mut values = finite(samples);
    if values.is_empty() {
        return None;
    }

    values.sort_by(|a, b| a.partial_cmp(b).unwrap_or(Ordering::Equal));

    let mid = values.len() / 2;

    if values.len() % 2 == 0 {
        Some((values[mid - 1] + values[mid]) / 2.0)
    } else {
        Some(values[mid])
    }
}

/// Arithmetic mean, or `None` for an empty slice.
pub fn mean_f64(samples: &[f64]) -> Option<f64> {
    let values = finite(samples);
    if values.is_empty() {
        return None;
    }

    Some(values.iter().sum::<f64>() / values.len() as f64)
}

/// Mean absolute difference between consecutive samples.
///
/// Requires at least two samples.
pub fn jitter_f64(samples: &[f64]) -> Option<f64> {
    let values = finite(samples);
    if values.len() < 2 {
        return None;
    }

    let jitters: Vec<f64> =
        values.windows(2).map(|pair| (pair[0] - pair[1]).abs()).collect();

    Some(jitters.iter().sum::<f64>() / jitters.len() as f64)
}

/// Smallest and largest finite sample.
pub fn range_f64(samples: &[f64]) -> Option<(f64, f64)> {
    let values = finite(samples);
    let first = *values.first()?;

    Some(values.iter().fold((first, first), |(lo, hi), &v| (lo.min(v), hi.max(v))))
}
