use super::{Transport, TransferTarget};
use crate::errors::ErrorKind;
use crate::measurements::ProgressPoint;
use log::debug;
use std::fmt;
use std::time::Duration;
use tokio::time::Instant;

/// Why a transfer did not succeed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FailureReason {
    /// The deadline passed before the response completed.
    Timeout,
    /// The request never produced a response.
    Network(ErrorKind),
    /// A response arrived with a non-success status code.
    Http(u16),
}

impl fmt::Display for FailureReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FailureReason::Timeout => write!(f, "timeout"),
            FailureReason::Network(kind) => {
                write!(f, "{}", kind.description().to_lowercase())
            }
            FailureReason::Http(status) => write!(f, "HTTP {}", status),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransferOutcome {
    /// A 2xx response was fully consumed.
    Success,
    /// The request completed without a network error but the response was
    /// not observable.
    Opaque,
    Failed(FailureReason),
}

/// Outcome of one [`timed_transfer`].
#[derive(Debug, Clone)]
pub struct TransferResult {
    pub label: String,
    /// Wall-clock time from issuing the request to the outcome. Never
    /// exceeds the deadline.
    pub elapsed: Duration,
    /// Response body bytes consumed; zero for opaque and failed transfers.
    pub bytes: u64,
    pub outcome: TransferOutcome,
    pub body: Option<String>,
    pub progress: Vec<ProgressPoint>,
}

impl TransferResult {
    fn failed(
        target: &TransferTarget,
        elapsed: Duration,
        reason: FailureReason,
    ) -> Self {
        Self {
            label: target.label.clone(),
            elapsed,
            bytes: 0,
            outcome: TransferOutcome::Failed(reason),
            body: None,
            progress: Vec::new(),
        }
    }

    /// Success or opaque success.
    pub fn succeeded(&self) -> bool {
        matches!(self.outcome, TransferOutcome::Success | TransferOutcome::Opaque)
    }

    pub fn is_opaque(&self) -> bool {
        self.outcome == TransferOutcome::Opaque
    }

    pub fn failure(&self) -> Option<&FailureReason> {
        match &self.outcome {
            TransferOutcome::Failed(reason) => Some(reason),
            _ => None,
        }
    }

    /// The destination produced nothing at all: a timeout or a network
    /// error, as opposed to an HTTP error status.
    pub fn failed_outright(&self) -> bool {
        matches!(
            self.failure(),
            Some(FailureReason::Timeout | FailureReason::Network(_))
        )
    }

    pub fn elapsed_ms(&self) -> f64 {
        self.elapsed.as_secs_f64() * 1000.0
    }
}

/// Execute `target` once and time it.
///
/// The clock starts immediately before the request is handed to the
/// transport and stops when the response body has been fully consumed, an
/// error is reported, or `deadline` passes, whichever comes first. When the
/// deadline passes the in-flight request is dropped; whatever it would have
/// produced later can never reach the caller.
pub async fn timed_transfer<T: Transport>(
    transport: &T,
    target: &TransferTarget,
    deadline: Duration,
) -> TransferResult {
    let started = Instant::now();
    let response = tokio::time::timeout(deadline, transport.execute(target)).await;
    let elapsed = started.elapsed().min(deadline);

    let response = match response {
        Err(_) => {
            debug!("{} timed out after {:?}", target.label, deadline);
            return TransferResult::failed(target, elapsed, FailureReason::Timeout);
        }
        Ok(Err(error)) => {
            debug!("{} failed: {}", target.label, error.message);
            return TransferResult::failed(
                target,
                elapsed,
                FailureReason::Network(error.kind),
            );
        }
        Ok(Ok(response)) => response,
    };

    let (outcome, bytes) = match response.status {
        None => (TransferOutcome::Opaque, 0),
        Some(status) if status.is_success() => {
            (TransferOutcome::Success, response.bytes)
        }
        Some(status) => {
            debug!("{} returned {}", target.label, status);
            (TransferOutcome::Failed(FailureReason::Http(status.as_u16())), 0)
        }
    };

    debug!(
        "{} finished in {:.0}ms ({} bytes, {:?})",
        target.label,
        elapsed.as_secs_f64() * 1000.0,
        bytes,
        outcome
    );

    TransferResult {
        label: target.label.clone(),
        elapsed,
        bytes,
        outcome,
        body: response.body,
        progress: response.progress,
    }
}
