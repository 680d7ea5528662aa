//! Progress events emitted by the core for any presentation layer.

use crate::errors::{error_headline, DiagnosticError};
use crate::services::ServiceStatus;
use tokio::sync::mpsc::{unbounded_channel, UnboundedReceiver, UnboundedSender};

/// Coarse stage of a diagnostics run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionPhase {
    Idle,
    Latency,
    Download,
    Upload,
    Services,
    Complete,
}

impl SessionPhase {
    pub fn label(&self) -> &'static str {
        match self {
            SessionPhase::Idle => "Idle",
            SessionPhase::Latency => "Latency",
            SessionPhase::Download => "Download",
            SessionPhase::Upload => "Upload",
            SessionPhase::Services => "Services",
            SessionPhase::Complete => "Complete",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum ProgressEvent {
    PhaseChange(SessionPhase),
    /// Throughput session progress, 0 to 100.
    Progress { percent: u8, label: String },
    Service(ServiceStatus),
    /// The run failed and is about to stop.
    Error { message: String, suggestion: Option<String> },
}

/// Sending half of the progress channel.
///
/// A disconnected or absent receiver is not an error: the core never depends
/// on anyone listening.
#[derive(Debug, Clone, Default)]
pub struct ProgressEmitter {
    tx: Option<UnboundedSender<ProgressEvent>>,
}

impl ProgressEmitter {
    pub fn new(tx: UnboundedSender<ProgressEvent>) -> Self {
        Self { tx: Some(tx) }
    }

    pub fn channel() -> (Self, UnboundedReceiver<ProgressEvent>) {
        let (tx, rx) = unbounded_channel();
        (Self::new(tx), rx)
    }

    /// An emitter that drops every event.
    pub fn silent() -> Self {
        Self::default()
    }

    pub fn emit(&self, event: ProgressEvent) {
        if let Some(tx) = &self.tx {
            let _ = tx.send(event);
        }
    }

    pub fn progress(&self, percent: u8, label: impl Into<String>) {
        self.emit(ProgressEvent::Progress {
            percent: percent.min(100),
            label: label.into(),
        });
    }

    pub fn phase(&self, phase: SessionPhase) {
        self.emit(ProgressEvent::PhaseChange(phase));
    }

    pub fn service(&self, status: ServiceStatus) {
        self.emit(ProgressEvent::Service(status));
    }

    pub fn error(&self, error: &DiagnosticError) {
        self.emit(ProgressEvent::Error {
            message: error_headline(error),
            suggestion: error.suggestion.clone(),
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_events_arrive_in_order() {
        let (emitter, mut rx) = ProgressEmitter::channel();
        emitter.phase(SessionPhase::Latency);
        emitter.progress(150, "done");

        assert_eq!(rx.try_recv().unwrap(), ProgressEvent::PhaseChange(SessionPhase::Latency));
        assert_eq!(
            rx.try_recv().unwrap(),
            ProgressEvent::Progress { percent: 100, label: "done".to_string() }
        );
    }

    #[test]
    fn test_network_error_event_asks_to_check_connection() {
        let (emitter, mut rx) = ProgressEmitter::channel();
        emitter.error(&DiagnosticError::timeout("trace"));

        match rx.try_recv().unwrap() {
            ProgressEvent::Error { message, suggestion } => {
                assert_eq!(message, "test failed, check your connection (trace)");
                assert!(suggestion.is_some());
            }
            other => panic!("unexpected event {:?}", other),
        }
    }

    #[test]
    fn test_closed_receiver_is_ignored() {
        let (emitter, rx) = ProgressEmitter::channel();
        drop(rx);
        emitter.progress(10, "nobody listening");
        ProgressEmitter::silent().progress(10, "nobody at all");
    }
}
