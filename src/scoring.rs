//! Qualitative grades derived from measured figures.
//!
//! Latency is graded for the summary view, and the single-probe media fetch
//! is graded by its speed in megabytes per second.

use serde::Serialize;

/// Latency thresholds in milliseconds.
mod latency_thresholds {
    /// Maximum latency for Excellent
    pub const EXCELLENT: u64 = 50;
    /// Maximum latency for Good
    pub const GOOD: u64 = 100;
}

/// Media probe thresholds in MB/s.
mod probe_thresholds {
    /// Minimum speed for Good; anything slower is Poor
    pub const GOOD: f64 = 1.0;
    /// Minimum speed for Excellent
    pub const EXCELLENT: f64 = 20.0;
}

/// Grade of a latency figure.
///
/// Variants are ordered from worst to best; `Unmeasured` sorts lowest.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum LatencyGrade {
    /// No reference host answered; the figure is a sentinel.
    Unmeasured,
    Slow,
    Good,
    Excellent,
}

impl LatencyGrade {
    pub fn description(&self) -> &'static str {
        match self {
            LatencyGrade::Unmeasured => "Unmeasured",
            LatencyGrade::Slow => "Slow",
            LatencyGrade::Good => "Good",
            LatencyGrade::Excellent => "Excellent",
        }
    }
}

/// Grade a latency figure. A sentinel value is never graded as a
/// measurement, however small it is.
pub fn grade_latency(milliseconds: u64, measured: bool) -> LatencyGrade {
    use latency_thresholds::*;

    if !measured {
        LatencyGrade::Unmeasured
    } else if milliseconds <= EXCELLENT {
        LatencyGrade::Excellent
    } else if milliseconds <= GOOD {
        LatencyGrade::Good
    } else {
        LatencyGrade::Slow
    }
}

/// Status of a single media probe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ProbeStatus {
    Poor,
    Good,
    Excellent,
}

impl ProbeStatus {
    pub fn description(&self) -> &'static str {
        match self {
            ProbeStatus::Poor => "Poor",
            ProbeStatus::Good => "Good",
            ProbeStatus::Excellent => "Excellent",
        }
    }
}

/// Grade a media fetch by its speed in MB/s.
pub fn grade_probe(megabytes_per_second: f64) -> ProbeStatus {
    use probe_thresholds::*;

    if !megabytes_per_second.is_finite() || megabytes_per_second < GOOD {
        ProbeStatus::Poor
    } else if megabytes_per_second >= EXCELLENT {
        ProbeStatus::Excellent
    } else {
        ProbeStatus::Good
    }
}
