//! State behind the live view.
//!
//! Built purely from progress events, so it can be tested without a
//! terminal.

use crate::progress::{ProgressEvent, SessionPhase};
use crate::results::ConnectionInfo;
use crate::services::{ServiceRegistry, ServiceStatus, Tier};

/// Error information for display.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ErrorInfo {
    pub message: String,
    pub suggestion: Option<String>,
}

/// One line of the service list.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceRow {
    pub id: String,
    pub name: String,
    /// `None` until the first check of this service starts
    pub status: Option<ServiceStatus>,
}

impl ServiceRow {
    pub fn tier(&self) -> Option<Tier> {
        self.status.as_ref().map(|s| s.tier)
    }

    pub fn detail(&self) -> &str {
        self.status.as_ref().map(|s| s.detail.as_str()).unwrap_or("pending")
    }
}

#[derive(Debug, Clone)]
pub struct TuiState {
    pub phase: SessionPhase,
    /// Throughput session progress, 0 to 100
    pub percent: u8,
    /// Text shown with the progress bar
    pub label: String,
    pub connection: Option<ConnectionInfo>,
    /// Services in registry order
    pub services: Vec<ServiceRow>,
    pub error: Option<ErrorInfo>,
}

impl Default for TuiState {
    fn default() -> Self {
        Self {
            phase: SessionPhase::Idle,
            percent: 0,
            label: String::new(),
            connection: None,
            services: Vec::new(),
            error: None,
        }
    }
}

impl TuiState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start with one pending row per configured service.
    pub fn with_services(registry: &ServiceRegistry) -> Self {
        let services = registry
            .services
            .iter()
            .map(|def| ServiceRow {
                id: def.id.clone(),
                name: def.name.clone(),
                status: None,
            })
            .collect();
        Self { services, ..Self::default() }
    }

    pub fn set_connection(&mut self, connection: Option<ConnectionInfo>) {
        self.connection = connection;
    }

    /// Set an error state. Whatever was shown before stays.
    pub fn set_error(&mut self, message: String, suggestion: Option<String>) {
        self.error = Some(ErrorInfo { message, suggestion });
    }

    /// Services whose latest status is final, out of all listed.
    pub fn services_settled(&self) -> (usize, usize) {
        let settled = self
            .services
            .iter()
            .filter(|row| row.tier().is_some_and(|t| t.is_final()))
            .count();
        (settled, self.services.len())
    }

    pub fn update_from_event(&mut self, event: &ProgressEvent) {
        match event {
            ProgressEvent::PhaseChange(phase) => {
                self.phase = *phase;
            }
            ProgressEvent::Progress { percent, label } => {
                self.percent = (*percent).min(100);
                self.label = label.clone();
            }
            ProgressEvent::Service(status) => {
                match self.services.iter_mut().find(|row| row.id == status.service_id) {
                    Some(row) => row.status = Some(status.clone()),
                    None => self.services.push(ServiceRow {
                        id: status.service_id.clone(),
                        name: status.service_id.clone(),
                        status: Some(status.clone()),
                    }),
                }
            }
            ProgressEvent::Error { message, suggestion } => {
                self.set_error(message.clone(), suggestion.clone());
            }
        }
    }
}
