use crate::config::{TargetSpec, ThroughputConfig};
use crate::measurements::{aggregate_speed, progressive_speed_mbps, SpeedSample};
use crate::progress::ProgressEmitter;
use crate::transport::{
    timed_transfer, Direction, FailureReason, Transport, TransferResult, TransferTarget,
};
use log::{debug, info, warn};
use serde::Serialize;
use std::time::Duration;

/// A transfer target paired with the deadline it runs under.
#[derive(Debug, Clone)]
pub struct ProbeTarget {
    pub target: TransferTarget,
    pub deadline: Duration,
}

impl ProbeTarget {
    fn is_large(&self, threshold: u64) -> bool {
        self.target.nominal_bytes().is_some_and(|b| b >= threshold)
    }
}

/// Why the primary list was abandoned for the fallback list.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FallbackReason {
    /// Every primary target ran without producing a valid sample.
    Exhausted,
    /// Too many primary targets in a row produced nothing at all.
    ConsecutiveFailures,
    /// A large primary target hit its deadline.
    LargeTargetTimeout,
}

/// Final figure for one direction.
#[derive(Debug, Clone, Serialize)]
pub struct ThroughputEstimate {
    pub direction: Direction,
    pub mbps: f64,
    /// Valid samples that contributed, primary first.
    pub samples: Vec<SpeedSample>,
    pub attempts: usize,
    pub early_terminated: bool,
    pub fallback: Option<FallbackReason>,
    /// No valid sample at all; `mbps` is the configured default.
    pub degraded: bool,
}

/// Percent range of the session's progress bar owned by one estimator.
#[derive(Debug, Clone, Copy)]
pub struct ProgressSpan {
    pub start: u8,
    pub end: u8,
}

impl ProgressSpan {
    pub const fn new(start: u8, end: u8) -> Self {
        Self { start, end }
    }

    fn at(&self, done: usize, total: usize) -> u8 {
        if total == 0 {
            return self.end;
        }
        let width = self.end.saturating_sub(self.start) as usize;
        self.start + (width * done.min(total) / total) as u8
    }
}

impl Default for ProgressSpan {
    fn default() -> Self {
        Self::new(0, 100)
    }
}

/// Estimates throughput in one direction from a primary and a fallback list.
pub struct ThroughputEstimator<'a, T> {
    transport: &'a T,
    config: &'a ThroughputConfig,
    progress: ProgressEmitter,
    span: ProgressSpan,
}

impl<'a, T: Transport> ThroughputEstimator<'a, T> {
    pub fn new(transport: &'a T, config: &'a ThroughputConfig) -> Self {
        Self {
            transport,
            config,
            progress: ProgressEmitter::silent(),
            span: ProgressSpan::default(),
        }
    }

    pub fn with_progress(mut self, progress: ProgressEmitter, span: ProgressSpan) -> Self {
        self.progress = progress;
        self.span = span;
        self
    }

    fn direction(&self) -> Direction {
        self.config.direction
    }

    fn build(&self, spec: &TargetSpec, deadline: Option<Duration>) -> ProbeTarget {
        let target = match (self.direction(), spec.bytes) {
            (Direction::Upload, Some(bytes)) => {
                TransferTarget::post(spec.url.clone(), bytes)
            }
            (Direction::Upload, None) | (Direction::Download, None) => {
                TransferTarget::get(spec.url.clone())
            }
            (Direction::Download, Some(bytes)) => {
                TransferTarget::get(spec.url.clone()).with_expected_bytes(bytes)
            }
        };
        let label = match spec.bytes {
            Some(bytes) => format!("{} {}", self.direction().as_str(), human_size(bytes)),
            None => format!("{} {}", self.direction().as_str(), spec.url.path()),
        };

        ProbeTarget {
            target: target.with_label(label),
            deadline: deadline.unwrap_or_else(|| self.config.deadline_for(spec.bytes)),
        }
    }

    pub fn primary_targets(&self) -> Vec<ProbeTarget> {
        self.config.primary.iter().map(|spec| self.build(spec, None)).collect()
    }

    pub fn fallback_targets(&self) -> Vec<ProbeTarget> {
        let deadline = self.config.fallback_deadline();
        self.config
            .fallback
            .iter()
            .map(|spec| self.build(spec, Some(deadline)))
            .collect()
    }

    /// Run the configured lists.
    pub async fn run(&self) -> ThroughputEstimate {
        self.estimate(&self.primary_targets(), &self.fallback_targets()).await
    }

    /// Turn a finished transfer into a sample, if it moved any data.
    ///
    /// An upload's progress curve is used only while it stays under
    /// `upper_bound_mbps`; otherwise the whole body over the whole transfer
    /// time is the sample.
    fn sample_from(
        &self,
        probe: &ProbeTarget,
        result: &TransferResult,
        upper_bound_mbps: f64,
    ) -> Option<SpeedSample> {
        match self.direction() {
            Direction::Download => {
                SpeedSample::from_transfer(result.bytes, result.elapsed, &result.label)
            }
            Direction::Upload => {
                if let Some(mbps) = progressive_speed_mbps(&result.progress) {
                    let sample = SpeedSample::new(mbps, &result.label);
                    if sample.is_valid(upper_bound_mbps) {
                        return Some(sample);
                    }
                    debug!(
                        "Ignoring progress curve from {} ({:.2} Mbps), using total time",
                        result.label, mbps
                    );
                }
                let sent = probe.target.upload_bytes.unwrap_or_default();
                SpeedSample::from_transfer(sent, result.elapsed, &result.label)
            }
        }
    }

    /// Measure with `primary`, switching to `fallback` when the primary list
    /// yields nothing usable.
    pub async fn estimate(
        &self,
        primary: &[ProbeTarget],
        fallback: &[ProbeTarget],
    ) -> ThroughputEstimate {
        let direction = self.direction();
        let mut samples = Vec::new();
        let mut attempts = 0;
        let mut consecutive_failures = 0;
        let mut any_success = false;
        let mut early_terminated = false;
        let mut switch = None;

        info!("Starting {} test ({} primary targets)", direction.as_str(), primary.len());

        for (index, probe) in primary.iter().enumerate() {
            self.progress.progress(
                self.span.at(index, primary.len()),
                format!("Testing {}...", probe.target.label),
            );

            let result = timed_transfer(self.transport, &probe.target, probe.deadline).await;
            attempts += 1;

            if let Some(reason) = result.failure() {
                warn!("{} failed: {}", probe.target.label, reason);

                if *reason == FailureReason::Timeout
                    && probe.is_large(self.config.large_threshold_bytes)
                {
                    switch = Some(FallbackReason::LargeTargetTimeout);
                    break;
                }

                if result.failed_outright() && !any_success {
                    consecutive_failures += 1;
                    if consecutive_failures >= self.config.max_consecutive_failures {
                        switch = Some(FallbackReason::ConsecutiveFailures);
                        break;
                    }
                }
                continue;
            }

            any_success = true;
            consecutive_failures = 0;

            let upper_bound = self.config.upper_bound_mbps;
            match self.sample_from(probe, &result, upper_bound) {
                Some(sample) if sample.is_valid(upper_bound) => {
                    info!("{}: {:.2} Mbps", probe.target.label, sample.megabits_per_second);
                    samples.push(sample);

                    if probe.is_large(self.config.large_threshold_bytes) {
                        info!(
                            "Early termination triggered for {} at {}",
                            direction.as_str(),
                            probe.target.label
                        );
                        early_terminated = true;
                        break;
                    }
                }
                Some(sample) => debug!(
                    "Discarding implausible sample from {}: {:.2} Mbps",
                    probe.target.label, sample.megabits_per_second
                ),
                None => debug!("{} moved no measurable data", probe.target.label),
            }
        }

        if switch.is_none() && samples.is_empty() {
            switch = Some(FallbackReason::Exhausted);
        }

        if let Some(reason) = switch {
            info!("Switching {} test to fallback targets ({:?})", direction.as_str(), reason);
            let span = ProgressSpan::new(self.span.at(attempts, primary.len()), self.span.end);
            let (fallback_samples, fallback_attempts) = self.run_fallback(fallback, span).await;
            samples.extend(fallback_samples);
            attempts += fallback_attempts;
        }

        self.progress.progress(self.span.end, format!("{} test complete", direction.as_str()));

        if samples.is_empty() {
            warn!(
                "No valid {} samples, reporting default {:.1} Mbps",
                direction.as_str(),
                self.config.default_mbps
            );
            return ThroughputEstimate {
                direction,
                mbps: self.config.default_mbps,
                samples,
                attempts,
                early_terminated,
                fallback: switch,
                degraded: true,
            };
        }

        let mbps = aggregate_speed(&samples);
        info!("{} speed: {:.2} Mbps from {} samples", direction.as_str(), mbps, samples.len());

        ThroughputEstimate {
            direction,
            mbps,
            samples,
            attempts,
            early_terminated,
            fallback: switch,
            degraded: false,
        }
    }

    /// Try every fallback target several times with paced, cache-busted
    /// requests.
    async fn run_fallback(
        &self,
        fallback: &[ProbeTarget],
        span: ProgressSpan,
    ) -> (Vec<SpeedSample>, usize) {
        let iterations = self.config.fallback_iterations.max(1);
        let total = fallback.len() * iterations;
        let mut samples = Vec::new();
        let mut attempts = 0;

        for probe in fallback {
            for iteration in 0..iterations {
                if attempts > 0 {
                    tokio::time::sleep(self.config.fallback_pacing()).await;
                }

                self.progress.progress(
                    span.at(attempts, total),
                    format!("Fallback: {}", probe.target.label),
                );

                let target = probe.target.cache_busted(iteration);
                let result = timed_transfer(self.transport, &target, probe.deadline).await;
                attempts += 1;

                if let Some(reason) = result.failure() {
                    debug!("Fallback {} failed: {}", probe.target.label, reason);
                    continue;
                }

                let upper_bound = self.config.fallback_upper_bound_mbps;
                match self.sample_from(probe, &result, upper_bound) {
                    Some(sample) if sample.is_valid(upper_bound) => {
                        debug!(
                            "Fallback {}: {:.2} Mbps",
                            probe.target.label, sample.megabits_per_second
                        );
                        samples.push(sample);
                    }
                    _ => debug!("Fallback {} gave no usable sample", probe.target.label),
                }
            }
        }

        (samples, attempts)
    }
}

fn human_size(bytes: u64) -> String {
    const KIB: u64 = 1024;
    const MIB: u64 = 1024 * 1024;

    if bytes >= MIB && bytes % MIB == 0 {
        format!("{}MB", bytes / MIB)
    } else if bytes >= KIB && bytes % KIB == 0 {
        format!("{}KB", bytes / KIB)
    } else {
        format!("{}B", bytes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::ErrorKind;
    use crate::measurements::ProgressPoint;
    use crate::progress::ProgressEvent;
    use crate::transport::mock::{MockTransport, Reply};
    use url::Url;

    const MIB: u64 = 1024 * 1024;

    fn spec(url: &str, bytes: Option<u64>) -> TargetSpec {
        TargetSpec::new(Url::parse(url).unwrap(), bytes)
    }

    fn download_config() -> ThroughputConfig {
        ThroughputConfig {
            primary: vec![
                spec("https://dl.test/10", Some(10 * MIB)),
                spec("https://dl.test/50", Some(50 * MIB)),
                spec("https://dl.test/100", Some(100 * MIB)),
            ],
            fallback: vec![
                spec("https://fb.test/a.jpg", None),
                spec("https://fb.test/b.jpg", None),
            ],
            ..ThroughputConfig::download()
        }
    }

    fn upload_config() -> ThroughputConfig {
        ThroughputConfig {
            primary: vec![spec("https://up.test/post", Some(MIB))],
            fallback: vec![spec("https://up.test/small", Some(100 * 1024))],
            ..ThroughputConfig::upload()
        }
    }

    /// Reply that moves `bytes` at `mbps`.
    fn at_speed(bytes: u64, mbps: f64) -> Reply {
        let secs = bytes as f64 * 8.0 / (1024.0 * 1024.0) / mbps;
        Reply::ok(Duration::from_secs_f64(secs), bytes)
    }

    #[tokio::test(start_paused = true)]
    async fn test_large_valid_sample_stops_primary_list() {
        let mock = MockTransport::new()
            .route("https://dl.test/10", at_speed(10 * MIB, 80.0))
            .route("https://dl.test/50", at_speed(50 * MIB, 80.0))
            .route("https://dl.test/100", at_speed(100 * MIB, 80.0));
        let config = download_config();

        let estimate = ThroughputEstimator::new(&mock, &config).run().await;

        assert_eq!(mock.calls().len(), 2);
        assert_eq!(mock.calls_to("https://dl.test/100"), 0);
        assert!(estimate.early_terminated);
        assert_eq!(estimate.fallback, None);
        assert!((estimate.mbps - 80.0).abs() < 0.1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_network_errors_switch_to_fallback() {
        let mock = MockTransport::new()
            .route("https://dl.test/10", Reply::error(Duration::from_millis(30), ErrorKind::Network))
            .route("https://dl.test/50", Reply::error(Duration::from_millis(30), ErrorKind::Network))
            .route("https://dl.test/100", Reply::error(Duration::from_millis(30), ErrorKind::Network))
            .route("https://fb.test/a.jpg", at_speed(MIB, 20.0))
            .route("https://fb.test/b.jpg", at_speed(MIB, 22.0));
        let config = download_config();

        let estimate = ThroughputEstimator::new(&mock, &config).run().await;

        assert_eq!(estimate.fallback, Some(FallbackReason::ConsecutiveFailures));
        // two failures in a row are enough; the third primary is skipped
        assert_eq!(mock.calls_to("https://dl.test/"), 2);
        assert_eq!(mock.calls_to("https://fb.test/"), 6);
        assert!(!estimate.degraded);
        assert_ne!(estimate.mbps, config.default_mbps);
        assert!(estimate.mbps >= 20.0 && estimate.mbps <= 22.0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_fallback_requests_are_cache_busted_and_paced() {
        let mock = MockTransport::new()
            .route("https://fb.test/a.jpg", at_speed(MIB, 20.0))
            .route("https://fb.test/b.jpg", at_speed(MIB, 20.0));
        let config = ThroughputConfig { primary: Vec::new(), ..download_config() };

        let started = tokio::time::Instant::now();
        let estimate = ThroughputEstimator::new(&mock, &config).run().await;

        assert_eq!(estimate.fallback, Some(FallbackReason::Exhausted));
        let calls = mock.calls();
        assert_eq!(calls.len(), 6);
        assert!(calls.iter().all(|c| c.contains("t=") && c.contains("&i=")));
        assert!(calls[2].ends_with("i=2"));

        // six 400 ms transfers plus five 100 ms gaps
        assert_eq!(started.elapsed(), Duration::from_millis(6 * 400 + 5 * 100));
    }

    #[tokio::test(start_paused = true)]
    async fn test_large_target_timeout_triggers_fallback() {
        let mock = MockTransport::new()
            .route("https://dl.test/10", Reply::status(Duration::from_millis(50), 429))
            .route("https://dl.test/50", Reply::ok(Duration::from_secs(120), 50 * MIB))
            .route("https://fb.test/a.jpg", at_speed(MIB, 10.0))
            .route("https://fb.test/b.jpg", at_speed(MIB, 10.0));
        let config = download_config();

        let estimate = ThroughputEstimator::new(&mock, &config).run().await;

        assert_eq!(estimate.fallback, Some(FallbackReason::LargeTargetTimeout));
        assert_eq!(mock.calls_to("https://dl.test/100"), 0);
        assert_eq!(estimate.mbps, 10.0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_http_errors_are_failed_samples_not_zero() {
        let mock = MockTransport::new()
            .route("https://dl.test/10", Reply::status(Duration::from_millis(50), 503))
            .route("https://dl.test/50", at_speed(10 * MIB, 40.0))
            .route("https://dl.test/100", at_speed(10 * MIB, 40.0));
        let config = ThroughputConfig {
            primary: vec![
                spec("https://dl.test/10", Some(10 * MIB)),
                spec("https://dl.test/50", Some(10 * MIB)),
                spec("https://dl.test/100", Some(10 * MIB)),
            ],
            ..download_config()
        };

        let estimate = ThroughputEstimator::new(&mock, &config).run().await;

        assert_eq!(estimate.samples.len(), 2);
        assert_eq!(estimate.fallback, None);
        assert!((estimate.mbps - 40.0).abs() < 0.1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_implausible_samples_are_discarded() {
        let mock = MockTransport::new()
            .route("https://dl.test/10", at_speed(10 * MIB, 5000.0))
            .route("https://dl.test/50", at_speed(50 * MIB, 90.0));
        let config = download_config();

        let estimate = ThroughputEstimator::new(&mock, &config).run().await;

        assert_eq!(estimate.samples.len(), 1);
        assert!((estimate.mbps - 90.0).abs() < 0.1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_nothing_valid_reports_degraded_default() {
        let mock = MockTransport::new();
        let config = download_config();

        let estimate = ThroughputEstimator::new(&mock, &config).run().await;

        assert!(estimate.degraded);
        assert_eq!(estimate.mbps, 5.0);
        assert!(estimate.samples.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_upload_prefers_progress_curve() {
        // 12 progress points, steady 128 KiB per 100 ms (10 Mbps) after a
        // one second stall that the trim drops.
        let mut points = vec![ProgressPoint::new(Duration::ZERO, 0)];
        for i in 0..=10u64 {
            points.push(ProgressPoint::new(
                Duration::from_millis(1000 + i * 100),
                i * 131_072,
            ));
        }
        let mock = MockTransport::new().route(
            "https://up.test/post",
            Reply::ok(Duration::from_secs(3), 32).with_progress(points),
        );
        let config = upload_config();

        let estimate = ThroughputEstimator::new(&mock, &config).run().await;

        assert_eq!(estimate.direction, Direction::Upload);
        assert!((estimate.mbps - 10.0).abs() < 0.1, "got {}", estimate.mbps);
    }

    #[tokio::test(start_paused = true)]
    async fn test_upload_without_progress_uses_total_time() {
        let mock = MockTransport::new()
            .route("https://up.test/post", Reply::ok(Duration::from_secs(1), 32));
        let config = upload_config();

        let estimate = ThroughputEstimator::new(&mock, &config).run().await;

        // 1 MiB body in one second
        assert_eq!(estimate.mbps, 8.0);
        assert_eq!(mock.calls_to("https://up.test/small"), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_implausible_progress_curve_falls_back_to_total_time() {
        // Every chunk "sent" a microsecond apart: local buffering, not the wire.
        let points: Vec<ProgressPoint> = (0..=16u64)
            .map(|i| ProgressPoint::new(Duration::from_micros(i), i * 65_536))
            .collect();
        let mock = MockTransport::new().route(
            "https://up.test/post",
            Reply::ok(Duration::from_secs(1), 32).with_progress(points),
        );
        let config = upload_config();

        let estimate = ThroughputEstimator::new(&mock, &config).run().await;

        assert!(!estimate.degraded);
        assert_eq!(estimate.samples.len(), 1);
        assert_eq!(estimate.mbps, 8.0);
        assert_eq!(mock.calls_to("https://up.test/small"), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_progress_stays_within_span() {
        let (emitter, mut rx) = ProgressEmitter::channel();
        let mock = MockTransport::new()
            .route("https://dl.test/10", at_speed(10 * MIB, 80.0))
            .route("https://dl.test/50", at_speed(50 * MIB, 80.0));
        let config = download_config();

        ThroughputEstimator::new(&mock, &config)
            .with_progress(emitter, ProgressSpan::new(25, 70))
            .run()
            .await;

        let mut percents = Vec::new();
        while let Ok(ProgressEvent::Progress { percent, .. }) = rx.try_recv() {
            percents.push(percent);
        }
        assert_eq!(percents.first(), Some(&25));
        assert_eq!(percents.last(), Some(&70));
        assert!(percents.windows(2).all(|w| w[0] <= w[1]));
    }

    #[tokio::test(start_paused = true)]
    async fn test_fallback_progress_continues_forward() {
        let (emitter, mut rx) = ProgressEmitter::channel();
        let mock = MockTransport::new()
            .route("https://fb.test/a.jpg", at_speed(MIB, 20.0))
            .route("https://fb.test/b.jpg", at_speed(MIB, 20.0));
        let config = download_config();

        ThroughputEstimator::new(&mock, &config)
            .with_progress(emitter, ProgressSpan::new(30, 70))
            .run()
            .await;

        let mut percents = Vec::new();
        while let Ok(event) = rx.try_recv() {
            if let ProgressEvent::Progress { percent, .. } = event {
                percents.push(percent);
            }
        }
        assert!(percents.windows(2).all(|w| w[0] <= w[1]), "{:?}", percents);
        assert_eq!(percents.last(), Some(&70));
    }

    #[test]
    fn test_human_size() {
        assert_eq!(human_size(10 * MIB), "10MB");
        assert_eq!(human_size(250 * 1024), "250KB");
        assert_eq!(human_size(1000), "1000B");
    }
}
