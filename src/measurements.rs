//! Speed sample arithmetic and robust aggregation.
//!
//! Throughput is expressed in binary megabits per second:
//! `bytes * 8 / (1024 * 1024) / seconds`. Individual samples are checked
//! against a plausibility bound before they are allowed to contribute, and
//! the surviving samples are reduced with a median-anchored trimmed mean.

use crate::stats::{mean_f64, median_f64, range_f64};
use serde::Serialize;
use std::time::Duration;

/// Bytes in one binary megabyte.
pub const BYTES_PER_MIB: f64 = 1024.0 * 1024.0;

/// Value returned by [`reduce_samples`] for an empty sample set.
pub const EMPTY_AGGREGATE: f64 = 0.0;

/// Samples below `median * INLIER_LOWER` are treated as outliers.
pub const INLIER_LOWER: f64 = 0.5;

/// Samples above `median * INLIER_UPPER` are treated as outliers.
pub const INLIER_UPPER: f64 = 2.0;

/// Share of progress points dropped at each end of an upload before
/// per-interval speeds are computed.
pub const PROGRESS_TRIM_RATIO: f64 = 0.1;

/// Convert bytes moved in `elapsed` to megabits per second.
///
/// Returns `None` when no time has elapsed, since the rate is undefined.
pub fn calculate_speed_mbps(bytes: u64, elapsed: Duration) -> Option<f64> {
    let seconds = elapsed.as_secs_f64();
    if seconds <= 0.0 {
        return None;
    }

    Some((bytes as f64 * 8.0) / BYTES_PER_MIB / seconds)
}

/// One throughput observation.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SpeedSample {
    /// Measured speed in Mbps.
    pub megabits_per_second: f64,
    /// Which target produced this sample.
    pub source_label: String,
}

impl SpeedSample {
    pub fn new(megabits_per_second: f64, source_label: impl Into<String>) -> Self {
        Self { megabits_per_second, source_label: source_label.into() }
    }

    /// Build a sample from a completed transfer.
    pub fn from_transfer(
        bytes: u64,
        elapsed: Duration,
        source_label: impl Into<String>,
    ) -> Option<Self> {
        calculate_speed_mbps(bytes, elapsed)
            .map(|mbps| Self::new(mbps, source_label))
    }

    /// A sample is usable only if it is strictly between zero and the
    /// plausibility bound for its context.
    pub fn is_valid(&self, upper_bound_mbps: f64) -> bool {
        self.megabits_per_second.is_finite()
            && self.megabits_per_second > 0.0
            && self.megabits_per_second < upper_bound_mbps
    }
}

/// A point on an upload's progress curve.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProgressPoint {
    /// Time since the request was issued.
    pub elapsed: Duration,
    /// Bytes confirmed sent so far.
    pub bytes: u64,
}

impl ProgressPoint {
    pub const fn new(elapsed: Duration, bytes: u64) -> Self {
        Self { elapsed, bytes }
    }
}

/// Reduce raw samples into one robust figure.
///
/// The median anchors the set; samples within
/// `[INLIER_LOWER * median, INLIER_UPPER * median]` are averaged and rounded
/// to one decimal place. If nothing falls inside that window the median is
/// returned as is. The result is clamped into the range of the input so
/// rounding can never push it past the smallest or largest sample.
pub fn reduce_samples(samples: &[f64]) -> f64 {
    let Some(median) = median_f64(samples) else {
        return EMPTY_AGGREGATE;
    };

    let lower = median * INLIER_LOWER;
    let upper = median * INLIER_UPPER;

    let inliers: Vec<f64> = samples
        .iter()
        .copied()
        .filter(|v| v.is_finite() && *v >= lower && *v <= upper)
        .collect();

    let value = match mean_f64(&inliers) {
        Some(mean) => (mean * 10.0).round() / 10.0,
        None => median,
    };

    match range_f64(samples) {
        Some((lo, hi)) => value.clamp(lo, hi),
        None => value,
    }
}

/// Reduce a set of speed samples with [`reduce_samples`].
pub fn aggregate_speed(samples: &[SpeedSample]) -> f64 {
    let values: Vec<f64> =
        samples.iter().map(|s| s.megabits_per_second).collect();

    reduce_samples(&values)
}

/// Derive an upload speed from its progress curve.
///
/// The first and last [`PROGRESS_TRIM_RATIO`] of the points are discarded to
/// skip connection setup and the final flush. Each remaining pair of
/// consecutive points yields an instantaneous speed; those are reduced with
/// [`reduce_samples`]. Returns `None` when fewer than two points survive the
/// trim or no interval moved any data.
pub fn progressive_speed_mbps(points: &[ProgressPoint]) -> Option<f64> {
    let mut points = points.to_vec();
    points.sort_by_key(|p| p.elapsed);

    let trim = (points.len() as f64 * PROGRESS_TRIM_RATIO).floor() as usize;
    if points.len() < trim * 2 + 2 {
        return None;
    }
    let middle = &points[trim..points.len() - trim];

    let speeds: Vec<f64> = middle
        .windows(2)
        .filter_map(|pair| {
            let bytes = pair[1].bytes.checked_sub(pair[0].bytes)?;
            let elapsed = pair[1].elapsed.checked_sub(pair[0].elapsed)?;
            calculate_speed_mbps(bytes, elapsed)
        })
        .filter(|mbps| *mbps > 0.0)
        .collect();

    if speeds.is_empty() {
        return None;
    }

    Some(reduce_samples(&speeds))
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_one_mib_in_one_second_is_eight_mbps() {
        let mbps =
            calculate_speed_mbps(1_048_576, Duration::from_secs(1)).unwrap();
        assert!((mbps - 8.0).abs() < 1e-9);
    }

    #[test]
    fn test_zero_elapsed_has_no_speed() {
        assert_eq!(calculate_speed_mbps(1_048_576, Duration::ZERO), None);
    }

    #[test]
    fn test_sample_validity_bounds() {
        assert!(SpeedSample::new(50.0, "a").is_valid(1000.0));
        assert!(!SpeedSample::new(0.0, "a").is_valid(1000.0));
        assert!(!SpeedSample::new(1000.0, "a").is_valid(1000.0));
        assert!(!SpeedSample::new(f64::INFINITY, "a").is_valid(1000.0));
    }

    #[test]
    fn test_reduce_empty_returns_constant() {
        let value = reduce_samples(&[]);
        assert_eq!(value, EMPTY_AGGREGATE);
        assert!(!value.is_nan());
    }

    #[test]
    fn test_reduce_discards_outliers() {
        // median 10; 100 and 1 fall outside [5, 20]
        let value = reduce_samples(&[1.0, 9.0, 10.0, 11.0, 100.0]);
        assert_eq!(value, 10.0);
    }

    #[test]
    fn test_reduce_rounds_to_one_decimal() {
        let value = reduce_samples(&[10.0, 10.1, 10.3]);
        assert_eq!(value, 10.1);
    }

    #[test]
    fn test_reduce_single_sample_is_not_rounded_out_of_range() {
        assert_eq!(reduce_samples(&[1.04]), 1.04);
    }

    #[test]
    fn test_aggregate_speed_uses_sample_values() {
        let samples = vec![
            SpeedSample::new(40.0, "a"),
            SpeedSample::new(42.0, "b"),
            SpeedSample::new(44.0, "c"),
        ];
        assert_eq!(aggregate_speed(&samples), 42.0);
    }

    #[test]
    fn test_progressive_trims_ramp_up_and_tail() {
        // 12 points: 1 dropped at each end. The ramp interval (0 -> 1) and
        // tail interval (10 -> 11) are far slower than the steady state.
        let mut points = vec![ProgressPoint::new(Duration::ZERO, 0)];
        points.push(ProgressPoint::new(Duration::from_millis(1000), 1024));
        for i in 1..=9u64 {
            points.push(ProgressPoint::new(
                Duration::from_millis(1000 + i * 100),
                1024 + i * 131_072,
            ));
        }
        let last = points.last().copied().unwrap();
        points.push(ProgressPoint::new(
            last.elapsed + Duration::from_secs(5),
            last.bytes + 1024,
        ));

        // steady state: 128 KiB per 100 ms = 10 Mbps
        let mbps = progressive_speed_mbps(&points).unwrap();
        assert!((mbps - 10.0).abs() < 0.05, "got {mbps}");
    }

    #[test]
    fn test_progressive_needs_two_points() {
        let points = vec![ProgressPoint::new(Duration::from_millis(5), 100)];
        assert_eq!(progressive_speed_mbps(&points), None);
    }

    #[test]
    fn test_progressive_ignores_stalled_intervals() {
        let points = vec![
            ProgressPoint::new(Duration::from_millis(0), 0),
            ProgressPoint::new(Duration::from_millis(100), 0),
        ];
        assert_eq!(progressive_speed_mbps(&points), None);
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(200))]

        /// Property: the aggregate of positive finite samples always lies
        /// within the range of those samples.
        #[test]
        fn reduce_stays_within_sample_range(
            samples in prop::collection::vec(0.001f64..5000.0, 1..40)
        ) {
            let value = reduce_samples(&samples);
            let lo = samples.iter().copied().fold(f64::INFINITY, f64::min);
            let hi = samples.iter().copied().fold(f64::NEG_INFINITY, f64::max);
            prop_assert!(value >= lo && value <= hi,
                "{} not in [{}, {}]", value, lo, hi);
        }

        /// Property: speed is linear in bytes and inverse in time.
        #[test]
        fn speed_formula_matches_definition(
            bytes in 1u64..1_000_000_000,
            millis in 1u64..120_000
        ) {
            let elapsed = Duration::from_millis(millis);
            let mbps = calculate_speed_mbps(bytes, elapsed).unwrap();
            let expected = bytes as f64 * 8.0 / BYTES_PER_MIB / elapsed.as_secs_f64();
            prop_assert!((mbps - expected).abs() <= expected * 1e-12);
        }
    }
}
