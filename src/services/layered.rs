use super::ServiceStatus;
use crate::api::oembed::OEmbed;
use crate::transport::{timed_transfer, Transport, TransferTarget};
use log::debug;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use url::Url;

fn default_metadata_timeout_ms() -> u64 {
    8000
}

fn default_player_timeout_ms() -> u64 {
    6000
}

fn default_status_timeout_ms() -> u64 {
    5000
}

/// Availability combined from three independent signals.
///
/// No single signal is trusted on its own: metadata can be served from a
/// different edge than playback, and the status probe is opaque.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LayeredAvailability {
    /// Structured metadata for a known reference item (oEmbed JSON).
    pub metadata_url: Url,
    /// Embeddable player page for the same item.
    pub player_url: Url,
    /// Any small resource, probed opaquely.
    pub status_url: Url,
    #[serde(default = "default_metadata_timeout_ms")]
    pub metadata_timeout_ms: u64,
    #[serde(default = "default_player_timeout_ms")]
    pub player_timeout_ms: u64,
    #[serde(default = "default_status_timeout_ms")]
    pub status_timeout_ms: u64,
}

/// Which of the three signals came back favorable.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct LayeredSignals {
    pub metadata: bool,
    pub player: bool,
    pub status: bool,
}

impl LayeredSignals {
    pub fn favorable(&self) -> usize {
        [self.metadata, self.player, self.status]
            .iter()
            .filter(|s| **s)
            .count()
    }

    /// All favorable is `ok`, some is `slow`, none is `error`.
    pub fn into_status(self, service_id: &str) -> ServiceStatus {
        match self.favorable() {
            3 => ServiceStatus::ok(service_id, "available"),
            0 => ServiceStatus::error(service_id, "unavailable"),
            n => ServiceStatus::slow(
                service_id,
                format!("partially available ({}/3)", n),
            ),
        }
    }
}

impl LayeredAvailability {
    pub fn new(metadata_url: Url, player_url: Url, status_url: Url) -> Self {
        Self {
            metadata_url,
            player_url,
            status_url,
            metadata_timeout_ms: default_metadata_timeout_ms(),
            player_timeout_ms: default_player_timeout_ms(),
            status_timeout_ms: default_status_timeout_ms(),
        }
    }

    async fn metadata_signal<T: Transport>(&self, transport: &T) -> bool {
        let target = TransferTarget::get(self.metadata_url.clone()).capturing_body();
        let result = timed_transfer(
            transport,
            &target,
            Duration::from_millis(self.metadata_timeout_ms),
        )
        .await;

        if !result.succeeded() {
            return false;
        }

        result
            .body
            .as_deref()
            .and_then(|body| serde_json::from_str::<OEmbed>(body).ok())
            .is_some_and(|doc| doc.has_title())
    }

    async fn player_signal<T: Transport>(&self, transport: &T) -> bool {
        let target = TransferTarget::get(self.player_url.clone());
        timed_transfer(
            transport,
            &target,
            Duration::from_millis(self.player_timeout_ms),
        )
        .await
        .succeeded()
    }

    async fn status_signal<T: Transport>(&self, transport: &T) -> bool {
        let target = TransferTarget::head(self.status_url.clone()).opaque(true);
        timed_transfer(
            transport,
            &target,
            Duration::from_millis(self.status_timeout_ms),
        )
        .await
        .succeeded()
    }

    /// Gather all three signals concurrently.
    pub async fn signals<T: Transport>(&self, transport: &T) -> LayeredSignals {
        let (metadata, player, status) = tokio::join!(
            self.metadata_signal(transport),
            self.player_signal(transport),
            self.status_signal(transport),
        );

        LayeredSignals { metadata, player, status }
    }

    pub(crate) async fn classify<T: Transport>(
        &self,
        service_id: &str,
        transport: &T,
    ) -> ServiceStatus {
        let signals = self.signals(transport).await;
        debug!("{}: signals {:?}", service_id, signals);
        signals.into_status(service_id)
    }
}
