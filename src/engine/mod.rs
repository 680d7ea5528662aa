//! Session orchestration.
//!
//! A throughput session runs latency, then download, then upload, strictly
//! one after the other so the directions never compete for the link. The
//! reachability cycle is independent and checks every service concurrently.

pub mod latency;
pub mod single_probe;
pub mod throughput;

pub use latency::{LatencyEstimate, LatencyProbe};
pub use throughput::{
    FallbackReason, ProbeTarget, ProgressSpan, ThroughputEstimate, ThroughputEstimator,
};

use crate::api::trace::TraceRequest;
use crate::api::Client;
use crate::config::DiagnosticsConfig;
use crate::errors::DiagnosticError;
use crate::progress::{ProgressEmitter, SessionPhase};
use crate::results::ConnectionInfo;
use crate::services::{ReachabilityChecker, ServiceStatus};
use crate::transport::Transport;
use log::{info, warn};

/// Progress bar layout of a throughput session.
const LATENCY_START: u8 = 5;
const LATENCY_DONE: u8 = 25;
const DOWNLOAD_SPAN: ProgressSpan = ProgressSpan::new(30, 70);
const UPLOAD_SPAN: ProgressSpan = ProgressSpan::new(75, 95);

/// Everything a throughput session measured.
#[derive(Debug, Clone)]
pub struct SessionResults {
    pub latency: LatencyEstimate,
    pub download: ThroughputEstimate,
    pub upload: ThroughputEstimate,
}

/// Drives measurements against a transport and reports progress.
///
/// # Example
/// ```no_run
/// use vpn_diag::config::DiagnosticsConfig;
/// use vpn_diag::engine::DiagnosticsEngine;
/// use vpn_diag::transport::http::HttpTransport;
///
/// #[tokio::main]
/// async fn main() {
///     let transport = HttpTransport::new().unwrap();
///     let engine = DiagnosticsEngine::new(transport, DiagnosticsConfig::default());
///     let results = engine.run_throughput_session().await.unwrap();
///     println!("Download: {:.1} Mbps", results.download.mbps);
/// }
/// ```
pub struct DiagnosticsEngine<T> {
    transport: T,
    config: DiagnosticsConfig,
    progress: ProgressEmitter,
    checker: ReachabilityChecker,
}

impl<T: Transport> DiagnosticsEngine<T> {
    pub fn new(transport: T, config: DiagnosticsConfig) -> Self {
        Self::with_progress(transport, config, ProgressEmitter::silent())
    }

    pub fn with_progress(
        transport: T,
        config: DiagnosticsConfig,
        progress: ProgressEmitter,
    ) -> Self {
        let checker =
            ReachabilityChecker::new(config.services.clone(), progress.clone());
        Self { transport, config, progress, checker }
    }

    pub fn config(&self) -> &DiagnosticsConfig {
        &self.config
    }

    pub fn checker(&self) -> &ReachabilityChecker {
        &self.checker
    }

    /// Latency, download and upload, in that order.
    ///
    /// Network trouble never fails the session: each stage falls back to
    /// its sentinel or default. Only an invalid configuration does, and
    /// listeners get an error event before the call returns.
    pub async fn run_throughput_session(&self) -> Result<SessionResults, DiagnosticError> {
        if let Err(e) = self.config.validate() {
            self.progress.error(&e);
            return Err(e);
        }
        info!("Starting throughput session");

        self.progress.phase(SessionPhase::Latency);
        self.progress.progress(LATENCY_START, "Checking latency...");
        let latency = LatencyProbe::new(&self.transport, &self.config.latency).run().await;
        self.progress.progress(LATENCY_DONE, "Latency check complete");

        self.progress.phase(SessionPhase::Download);
        let download = ThroughputEstimator::new(&self.transport, &self.config.download)
            .with_progress(self.progress.clone(), DOWNLOAD_SPAN)
            .run()
            .await;

        self.progress.phase(SessionPhase::Upload);
        let upload = ThroughputEstimator::new(&self.transport, &self.config.upload)
            .with_progress(self.progress.clone(), UPLOAD_SPAN)
            .run()
            .await;

        self.progress.progress(100, "All tests complete");
        info!(
            "Session complete: latency={} ms, download={:.2} Mbps, upload={:.2} Mbps",
            latency.milliseconds, download.mbps, upload.mbps
        );

        Ok(SessionResults { latency, download, upload })
    }

    /// Check every configured service concurrently.
    pub async fn run_reachability_cycle(&self) -> Vec<ServiceStatus> {
        self.progress.phase(SessionPhase::Services);
        self.checker.run_cycle(&self.transport).await
    }

    /// Check one service again, superseding any check still in flight.
    pub async fn recheck(&self, service_id: &str) -> Option<ServiceStatus> {
        self.checker.recheck(&self.transport, service_id).await
    }

    /// Mark the run as finished for any listener.
    pub fn finish(&self) {
        self.progress.phase(SessionPhase::Complete);
    }
}

/// Read the client's public address and country from the CDN trace.
/// Failures are logged and yield `None`.
pub async fn fetch_connection_info(
    client: &Client,
    config: &DiagnosticsConfig,
) -> Option<ConnectionInfo> {
    match client.send(TraceRequest::new(config.trace_url.clone())).await {
        Ok(trace) => Some(ConnectionInfo::from(&trace)),
        Err(e) => {
            warn!("Could not read connection metadata: {}", e.message);
            None
        }
    }
}
