use crate::config::LatencyConfig;
use crate::stats::{jitter_f64, mean_f64};
use crate::transport::{timed_transfer, FailureReason, Transport, TransferTarget};
use log::{debug, info, warn};
use serde::Serialize;
use url::Url;

/// Round-trip latency across the reference hosts.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LatencyEstimate {
    /// Rounded mean of valid samples, or the sentinel.
    pub milliseconds: u64,
    /// Mean absolute difference between consecutive valid samples.
    pub jitter_ms: Option<f64>,
    /// Individual round-trip times that counted.
    pub samples: Vec<f64>,
    /// `false` when no host answered in time and `milliseconds` is the
    /// sentinel.
    pub measured: bool,
}

/// Measures latency with one short request per reference host.
pub struct LatencyProbe<'a, T> {
    transport: &'a T,
    config: &'a LatencyConfig,
}

impl<'a, T: Transport> LatencyProbe<'a, T> {
    pub fn new(transport: &'a T, config: &'a LatencyConfig) -> Self {
        Self { transport, config }
    }

    /// Probe each host in turn.
    ///
    /// A host counts if it produced any response within the timeout, even an
    /// HTTP error: the round trip happened. Timeouts and network errors are
    /// left out of the mean rather than penalizing it.
    pub async fn measure(&self, hosts: &[Url]) -> LatencyEstimate {
        let mut samples = Vec::with_capacity(hosts.len());

        for host in hosts {
            let target = TransferTarget::head(host.clone()).opaque(self.config.opaque);
            let result =
                timed_transfer(self.transport, &target, self.config.timeout()).await;

            match result.failure() {
                Some(FailureReason::Timeout) | Some(FailureReason::Network(_)) => {
                    debug!("Latency probe to {} failed: {:?}", host, result.outcome);
                }
                _ if result.elapsed >= self.config.timeout() => {
                    debug!("Latency probe to {} hit the timeout", host);
                }
                _ => {
                    debug!("Latency to {}: {:.1} ms", host, result.elapsed_ms());
                    samples.push(result.elapsed_ms());
                }
            }
        }

        let Some(mean) = mean_f64(&samples) else {
            warn!(
                "No reference host answered within {} ms",
                self.config.timeout_ms
            );
            return LatencyEstimate {
                milliseconds: self.config.unreachable_sentinel_ms,
                jitter_ms: None,
                samples,
                measured: false,
            };
        };

        let milliseconds = mean.round() as u64;
        let jitter_ms = jitter_f64(&samples);
        info!("Latency: {} ms, jitter: {:?}", milliseconds, jitter_ms);

        LatencyEstimate { milliseconds, jitter_ms, samples, measured: true }
    }

    /// Probe the configured hosts.
    pub async fn run(&self) -> LatencyEstimate {
        self.measure(&self.config.hosts).await
    }
}
