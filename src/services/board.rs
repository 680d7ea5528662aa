use super::{ServiceStatus, Tier};
use std::collections::HashMap;
use std::sync::Mutex;

/// Proof that a caller started the newest check of a service.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CheckTicket {
    service_id: String,
    generation: u64,
}

impl CheckTicket {
    pub fn service_id(&self) -> &str {
        &self.service_id
    }
}

#[derive(Debug)]
struct Slot {
    generation: u64,
    status: ServiceStatus,
}

/// Latest known status of every service.
///
/// Starting a check hands out a ticket and resets the service to
/// `checking`. Only the holder of the newest ticket may finalize the
/// service, and only once; anything older is a superseded check whose
/// result is dropped.
#[derive(Debug, Default)]
pub struct StatusBoard {
    slots: Mutex<HashMap<String, Slot>>,
}

impl StatusBoard {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reset `service_id` to `checking` and return the ticket for the check.
    pub fn begin(&self, service_id: &str) -> (CheckTicket, ServiceStatus) {
        let status = ServiceStatus::checking(service_id);
        let mut slots = self.slots.lock().unwrap_or_else(|e| e.into_inner());

        let slot = slots.entry(service_id.to_string()).or_insert(Slot {
            generation: 0,
            status: status.clone(),
        });
        slot.generation += 1;
        slot.status = status.clone();

        let ticket = CheckTicket {
            service_id: service_id.to_string(),
            generation: slot.generation,
        };
        (ticket, status)
    }

    /// Record the final status for a check. Returns `false` if the ticket
    /// was superseded or the check was already settled.
    pub fn settle(&self, ticket: &CheckTicket, status: ServiceStatus) -> bool {
        let mut slots = self.slots.lock().unwrap_or_else(|e| e.into_inner());

        match slots.get_mut(&ticket.service_id) {
            Some(slot)
                if slot.generation == ticket.generation
                    && slot.status.tier == Tier::Checking
                    && status.tier.is_final() =>
            {
                slot.status = status;
                true
            }
            _ => false,
        }
    }

    pub fn get(&self, service_id: &str) -> Option<ServiceStatus> {
        let slots = self.slots.lock().unwrap_or_else(|e| e.into_inner());
        slots.get(service_id).map(|slot| slot.status.clone())
    }
}
