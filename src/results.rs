//! Serializable report of a diagnostics run.
//!
//! The engine's own types carry everything measured; the structures here
//! flatten that into what is shown to the user or printed as JSON.

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::api::trace::Trace;
use crate::engine::{FallbackReason, LatencyEstimate, SessionResults, ThroughputEstimate};
use crate::scoring::{grade_latency, LatencyGrade};
use crate::services::{ServiceRegistry, ServiceStatus, Tier};

/// Complete report of a run.
///
/// Sections that were not part of the run are omitted from JSON.
#[derive(Debug, Clone, Serialize)]
pub struct DiagnosticsReport {
    /// When the report was assembled
    pub timestamp: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub connection: Option<ConnectionInfo>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub latency: Option<LatencyReport>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub download: Option<BandwidthReport>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub upload: Option<BandwidthReport>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub services: Vec<ServiceReport>,
}

impl DiagnosticsReport {
    pub fn new() -> Self {
        Self {
            timestamp: Utc::now(),
            connection: None,
            latency: None,
            download: None,
            upload: None,
            services: Vec::new(),
        }
    }

    pub fn with_connection(mut self, connection: Option<ConnectionInfo>) -> Self {
        self.connection = connection;
        self
    }

    pub fn with_session(mut self, session: &SessionResults) -> Self {
        self.latency = Some(LatencyReport::from_estimate(&session.latency));
        self.download = Some(BandwidthReport::from_estimate(&session.download));
        self.upload = Some(BandwidthReport::from_estimate(&session.upload));
        self
    }

    pub fn with_services(
        mut self,
        registry: &ServiceRegistry,
        statuses: &[ServiceStatus],
    ) -> Self {
        self.services = statuses
            .iter()
            .map(|status| ServiceReport::new(registry, status))
            .collect();
        self
    }

    /// Number of services in each final tier: (ok, slow, error).
    pub fn service_counts(&self) -> (usize, usize, usize) {
        let count = |tier| self.services.iter().filter(|s| s.tier == tier).count();
        (count(Tier::Ok), count(Tier::Slow), count(Tier::Error))
    }
}

impl Default for DiagnosticsReport {
    fn default() -> Self {
        Self::new()
    }
}

/// Where the client appears to connect from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ConnectionInfo {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ip: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub country: Option<String>,
    /// Edge location that served the trace
    #[serde(skip_serializing_if = "Option::is_none")]
    pub colo: Option<String>,
}

impl From<&Trace> for ConnectionInfo {
    fn from(trace: &Trace) -> Self {
        Self {
            ip: trace.ip().map(str::to_string),
            country: trace.loc().map(str::to_string),
            colo: trace.colo().map(str::to_string),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct LatencyReport {
    pub latency_ms: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub jitter_ms: Option<f64>,
    pub grade: LatencyGrade,
    /// `false` when no reference host answered
    pub measured: bool,
}

impl LatencyReport {
    pub fn from_estimate(estimate: &LatencyEstimate) -> Self {
        Self {
            latency_ms: estimate.milliseconds,
            jitter_ms: estimate.jitter_ms.map(|j| (j * 10.0).round() / 10.0),
            grade: grade_latency(estimate.milliseconds, estimate.measured),
            measured: estimate.measured,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct BandwidthReport {
    pub speed_mbps: f64,
    /// Valid samples behind the figure
    pub samples: usize,
    pub attempts: usize,
    pub early_terminated: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fallback: Option<FallbackReason>,
    /// The figure is the configured default, not a measurement
    pub degraded: bool,
}

impl BandwidthReport {
    pub fn from_estimate(estimate: &ThroughputEstimate) -> Self {
        Self {
            speed_mbps: estimate.mbps,
            samples: estimate.samples.len(),
            attempts: estimate.attempts,
            early_terminated: estimate.early_terminated,
            fallback: estimate.fallback,
            degraded: estimate.degraded,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ServiceReport {
    pub id: String,
    pub name: String,
    pub tier: Tier,
    pub detail: String,
}

impl ServiceReport {
    fn new(registry: &ServiceRegistry, status: &ServiceStatus) -> Self {
        let name = registry
            .get(&status.service_id)
            .map(|s| s.name.clone())
            .unwrap_or_else(|| status.service_id.clone());

        Self {
            id: status.service_id.clone(),
            name,
            tier: status.tier,
            detail: status.detail.clone(),
        }
    }
}
