use super::{ServiceDefinition, ServiceRegistry, ServiceStatus, StatusBoard};
use crate::progress::ProgressEmitter;
use crate::transport::Transport;
use futures::future::join_all;
use log::{debug, info};

/// Runs reachability checks against every registered service.
#[derive(Debug)]
pub struct ReachabilityChecker {
    registry: ServiceRegistry,
    board: StatusBoard,
    progress: ProgressEmitter,
}

impl ReachabilityChecker {
    pub fn new(registry: ServiceRegistry, progress: ProgressEmitter) -> Self {
        Self { registry, board: StatusBoard::new(), progress }
    }

    pub fn registry(&self) -> &ServiceRegistry {
        &self.registry
    }

    pub fn status(&self, service_id: &str) -> Option<ServiceStatus> {
        self.board.get(service_id)
    }

    /// Check every service concurrently. Returns once all of them have
    /// settled, in registry order.
    pub async fn run_cycle<T: Transport>(&self, transport: &T) -> Vec<ServiceStatus> {
        info!("Checking {} services", self.registry.services.len());

        let checks = self.registry.services.iter().map(|service| {
            let (ticket, checking) = self.board.begin(&service.id);
            self.progress.service(checking);
            self.check(service, ticket, transport)
        });
        join_all(checks.collect::<Vec<_>>()).await;

        self.registry
            .services
            .iter()
            .filter_map(|service| self.board.get(&service.id))
            .collect()
    }

    /// Check one service again and return its status afterwards.
    ///
    /// Any check of the same service still in flight is superseded and its
    /// result is dropped. If this call is itself superseded before it
    /// finishes, it returns whatever the board holds at that moment, which
    /// is `checking` while the newer check is still running.
    pub async fn recheck<T: Transport>(
        &self,
        transport: &T,
        service_id: &str,
    ) -> Option<ServiceStatus> {
        let service = self.registry.get(service_id)?;
        let (ticket, checking) = self.board.begin(&service.id);
        self.progress.service(checking);

        self.check(service, ticket, transport).await;
        self.board.get(service_id)
    }

    async fn check<T: Transport>(
        &self,
        service: &ServiceDefinition,
        ticket: super::CheckTicket,
        transport: &T,
    ) {
        let status = service.strategy.classify(&service.id, transport).await;

        if self.board.settle(&ticket, status.clone()) {
            info!("{}: {} ({})", service.name, status.tier, status.detail);
            self.progress.service(status);
        } else {
            debug!(
                "{}: discarding superseded result {} ({})",
                ticket.service_id(),
                status.tier,
                status.detail
            );
        }
    }
}
