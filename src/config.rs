//! Run configuration.
//!
//! Every policy constant lives here with its default. A JSON file passed on
//! the command line is merged over the defaults key by key, so it only has
//! to name what it changes; arrays are replaced as a whole.

use crate::api::trace::DEFAULT_TRACE_URL;
use crate::errors::DiagnosticError;
use crate::measurements::BYTES_PER_MIB;
use crate::services::ServiceRegistry;
use crate::transport::Direction;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::path::Path;
use std::time::Duration;
use url::Url;

const MIB: u64 = 1024 * 1024;
const KIB: u64 = 1024;

fn url(s: &str) -> Url {
    Url::parse(s).unwrap_or_else(|e| panic!("invalid built-in url {}: {}", s, e))
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DiagnosticsConfig {
    pub latency: LatencyConfig,
    pub download: ThroughputConfig,
    pub upload: ThroughputConfig,
    /// Destinations checked by the reachability cycle.
    pub services: ServiceRegistry,
    /// CDN trace endpoint used to show the client's IP and country.
    pub trace_url: Url,
}

impl Default for DiagnosticsConfig {
    fn default() -> Self {
        Self {
            latency: LatencyConfig::default(),
            download: ThroughputConfig::download(),
            upload: ThroughputConfig::upload(),
            services: ServiceRegistry::default(),
            trace_url: url(DEFAULT_TRACE_URL),
        }
    }
}

impl DiagnosticsConfig {
    /// Load a config file and merge it over the defaults.
    pub fn load(path: &Path) -> Result<Self, DiagnosticError> {
        let text = std::fs::read_to_string(path).map_err(|e| {
            DiagnosticError::config(format!(
                "cannot read config file {}: {}",
                path.display(),
                e
            ))
            .with_source(e)
        })?;

        Self::from_json(&text)
    }

    pub fn from_json(text: &str) -> Result<Self, DiagnosticError> {
        let overrides: Value = serde_json::from_str(text).map_err(|e| {
            DiagnosticError::config(format!("config is not valid JSON: {}", e))
                .with_source(e)
        })?;

        let mut merged = serde_json::to_value(Self::default())
            .map_err(|e| DiagnosticError::config(e.to_string()))?;
        merge(&mut merged, overrides);

        let config: Self = serde_json::from_value(merged).map_err(|e| {
            DiagnosticError::config(format!("invalid config: {}", e)).with_source(e)
        })?;
        config.validate()?;

        Ok(config)
    }

    pub fn validate(&self) -> Result<(), DiagnosticError> {
        self.latency.validate()?;
        self.download.validate()?;
        self.upload.validate()?;
        self.services.validate()
    }
}

/// Recursively merge `overlay` into `base`. Objects merge by key, anything
/// else replaces.
fn merge(base: &mut Value, overlay: Value) {
    match (base, overlay) {
        (Value::Object(base), Value::Object(overlay)) => {
            for (key, value) in overlay {
                match base.get_mut(&key) {
                    Some(existing) => merge(existing, value),
                    None => {
                        base.insert(key, value);
                    }
                }
            }
        }
        (base, overlay) => *base = overlay,
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LatencyConfig {
    /// Reference hosts probed with a HEAD request each.
    pub hosts: Vec<Url>,

    /// Per-host timeout in ms.
    /// Default: 2000ms
    pub timeout_ms: u64,

    /// Reported when no host answered in time.
    /// Default: 999ms
    pub unreachable_sentinel_ms: u64,

    /// Probe hosts opaquely, observing only the absence of a network error.
    /// Default: true
    pub opaque: bool,
}

impl Default for LatencyConfig {
    fn default() -> Self {
        Self {
            hosts: vec![
                url("https://www.google.com/generate_204"),
                url("https://www.cloudflare.com/cdn-cgi/trace"),
                url("https://httpbin.org/status/204"),
                url("https://www.gstatic.com/generate_204"),
            ],
            timeout_ms: 2000,
            unreachable_sentinel_ms: 999,
            opaque: true,
        }
    }
}

impl LatencyConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    fn validate(&self) -> Result<(), DiagnosticError> {
        if self.timeout_ms == 0 {
            return Err(DiagnosticError::config("latency timeout must be positive"));
        }
        Ok(())
    }
}

/// One endpoint in a throughput probe list.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TargetSpec {
    pub url: Url,
    /// Nominal transfer size. Required for uploads, where it is the size of
    /// the generated body.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bytes: Option<u64>,
}

impl TargetSpec {
    pub fn new(url: Url, bytes: Option<u64>) -> Self {
        Self { url, bytes }
    }
}

/// Probe lists and policy for one throughput direction.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ThroughputConfig {
    pub direction: Direction,

    /// Tried in order, once each.
    pub primary: Vec<TargetSpec>,

    /// Smaller targets, each tried `fallback_iterations` times.
    pub fallback: Vec<TargetSpec>,

    /// A valid sample from a target at least this large ends the primary
    /// list early.
    /// Default: 50 MiB (download), 5 MiB (upload)
    pub large_threshold_bytes: u64,

    /// Outright primary failures in a row, before any success, that switch
    /// to the fallback list.
    /// Default: 2
    pub max_consecutive_failures: usize,

    /// Primary samples at or above this are implausible.
    /// Default: 1000 Mbps
    pub upper_bound_mbps: f64,

    /// Fallback samples at or above this are implausible.
    /// Default: 500 Mbps
    pub fallback_upper_bound_mbps: f64,

    /// Default: 3 (download), 2 (upload)
    pub fallback_iterations: usize,

    /// Delay between fallback requests in ms.
    /// Default: 100ms (download), 200ms (upload)
    pub fallback_pacing_ms: u64,

    /// Default: 10000ms
    pub fallback_deadline_ms: u64,

    /// Primary deadline is `base_deadline_ms + deadline_ms_per_mib * MiB`.
    /// Default: 20000ms
    pub base_deadline_ms: u64,

    /// Default: 100ms
    pub deadline_ms_per_mib: u64,

    /// Reported when neither list produced a valid sample.
    /// Default: 5.0 Mbps (download), 2.0 Mbps (upload)
    pub default_mbps: f64,
}

impl ThroughputConfig {
    pub fn download() -> Self {
        let primary = [10 * MIB, 50 * MIB, 100 * MIB]
            .into_iter()
            .map(|bytes| {
                TargetSpec::new(
                    url(&format!("https://httpbin.org/bytes/{}", bytes)),
                    Some(bytes),
                )
            })
            .collect();

        let fallback = [
            "https://via.placeholder.com/2048x2048.jpg",
            "https://picsum.photos/2048/2048.jpg",
            "https://httpbin.org/image/jpeg",
        ]
        .into_iter()
        .map(|u| TargetSpec::new(url(u), None))
        .collect();

        Self {
            direction: Direction::Download,
            primary,
            fallback,
            large_threshold_bytes: 50 * MIB,
            max_consecutive_failures: 2,
            upper_bound_mbps: 1000.0,
            fallback_upper_bound_mbps: 500.0,
            fallback_iterations: 3,
            fallback_pacing_ms: 100,
            fallback_deadline_ms: 10_000,
            base_deadline_ms: 20_000,
            deadline_ms_per_mib: 100,
            default_mbps: 5.0,
        }
    }

    pub fn upload() -> Self {
        let post = url("https://httpbin.org/post");
        let primary = [MIB, 5 * MIB, 10 * MIB]
            .into_iter()
            .map(|bytes| TargetSpec::new(post.clone(), Some(bytes)))
            .collect();
        let fallback = [100 * KIB, 250 * KIB, 500 * KIB]
            .into_iter()
            .map(|bytes| TargetSpec::new(post.clone(), Some(bytes)))
            .collect();

        Self {
            direction: Direction::Upload,
            primary,
            fallback,
            large_threshold_bytes: 5 * MIB,
            max_consecutive_failures: 2,
            upper_bound_mbps: 1000.0,
            fallback_upper_bound_mbps: 500.0,
            fallback_iterations: 2,
            fallback_pacing_ms: 200,
            fallback_deadline_ms: 10_000,
            base_deadline_ms: 20_000,
            deadline_ms_per_mib: 100,
            default_mbps: 2.0,
        }
    }

    /// Deadline for a primary target, scaled to its nominal size.
    pub fn deadline_for(&self, bytes: Option<u64>) -> Duration {
        let mib = bytes.map(|b| b as f64 / BYTES_PER_MIB).unwrap_or(0.0);
        let scaled = (self.deadline_ms_per_mib as f64 * mib).round() as u64;
        Duration::from_millis(self.base_deadline_ms + scaled)
    }

    pub fn fallback_deadline(&self) -> Duration {
        Duration::from_millis(self.fallback_deadline_ms)
    }

    pub fn fallback_pacing(&self) -> Duration {
        Duration::from_millis(self.fallback_pacing_ms)
    }

    fn validate(&self) -> Result<(), DiagnosticError> {
        let name = self.direction.as_str();

        if self.direction == Direction::Upload {
            let sizeless = self
                .primary
                .iter()
                .chain(&self.fallback)
                .find(|t| t.bytes.is_none_or(|b| b == 0));
            if let Some(target) = sizeless {
                return Err(DiagnosticError::config(format!(
                    "upload target {} needs a positive size",
                    target.url
                )));
            }
        }

        if !(self.upper_bound_mbps > 0.0 && self.fallback_upper_bound_mbps > 0.0) {
            return Err(DiagnosticError::config(format!(
                "{} plausibility bounds must be positive",
                name
            )));
        }

        if !(self.default_mbps.is_finite() && self.default_mbps >= 0.0) {
            return Err(DiagnosticError::config(format!(
                "{} default speed must be a non-negative number",
                name
            )));
        }

        if self.max_consecutive_failures == 0 {
            return Err(DiagnosticError::config(format!(
                "{} max_consecutive_failures must be at least 1",
                name
            )));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::ErrorKind;

    #[test]
    fn test_defaults_validate() {
        let config = DiagnosticsConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.download.primary.len(), 3);
        assert_eq!(config.upload.primary[0].bytes, Some(MIB));
        assert_eq!(config.latency.hosts.len(), 4);
    }

    #[test]
    fn test_partial_override_keeps_other_defaults() {
        let config = DiagnosticsConfig::from_json(
            r#"{"upload": {"default_mbps": 0.5}, "latency": {"timeout_ms": 1500}}"#,
        )
        .unwrap();

        assert_eq!(config.upload.default_mbps, 0.5);
        // untouched upload knobs keep upload defaults, not download ones
        assert_eq!(config.upload.large_threshold_bytes, 5 * MIB);
        assert_eq!(config.upload.fallback_iterations, 2);
        assert_eq!(config.latency.timeout_ms, 1500);
        assert_eq!(config.latency.unreachable_sentinel_ms, 999);
        assert_eq!(config.download.default_mbps, 5.0);
    }

    #[test]
    fn test_arrays_replace_whole_list() {
        let config = DiagnosticsConfig::from_json(
            r#"{"latency": {"hosts": ["https://one.example/"]}}"#,
        )
        .unwrap();
        assert_eq!(config.latency.hosts.len(), 1);
    }

    #[test]
    fn test_invalid_json_is_config_error() {
        let err = DiagnosticsConfig::from_json("{nope").unwrap_err();
        assert_eq!(err.kind, ErrorKind::Config);
    }

    #[test]
    fn test_sizeless_upload_target_is_rejected() {
        let err = DiagnosticsConfig::from_json(
            r#"{"upload": {"fallback": [{"url": "https://up.example/post"}]}}"#,
        )
        .unwrap_err();
        assert_eq!(err.kind, ErrorKind::Config);
        assert!(err.message.contains("needs a positive size"));
    }

    #[test]
    fn test_unknown_service_kind_is_rejected() {
        let err = DiagnosticsConfig::from_json(
            r#"{"services": [{"id": "x", "name": "X", "strategy": {"kind": "telepathy"}}]}"#,
        )
        .unwrap_err();
        assert_eq!(err.kind, ErrorKind::Config);
    }

    #[test]
    fn test_deadline_scales_with_size() {
        let config = ThroughputConfig::download();
        assert_eq!(config.deadline_for(None), Duration::from_secs(20));
        assert_eq!(config.deadline_for(Some(100 * MIB)), Duration::from_secs(30));
    }

    #[test]
    fn test_missing_file_is_config_error() {
        let err = DiagnosticsConfig::load(Path::new("/nonexistent/vpn-diag.json"))
            .unwrap_err();
        assert_eq!(err.kind, ErrorKind::Config);
    }
}
