//! Per-destination reachability classification.
//!
//! Every destination is described by a [`ServiceDefinition`] whose
//! [`ProbeStrategy`] knows how to turn network responses into a
//! [`ServiceStatus`]. The [`ReachabilityChecker`] runs all of them
//! concurrently and records results on a [`StatusBoard`].

mod board;
mod checker;
mod generic;
mod layered;
mod region;

pub use board::{CheckTicket, StatusBoard};
pub use checker::ReachabilityChecker;
pub use generic::{ApiCheck, GenericAvailability};
pub use layered::{LayeredAvailability, LayeredSignals};
pub use region::{parse_region, RegionGated, REGION_UNDETERMINED};

use crate::api::oembed::OEmbedRequest;
use crate::api::Request;
use crate::errors::DiagnosticError;
use crate::transport::{FailureReason, Transport};
use http::header::{HeaderMap, HeaderName, HeaderValue};
use http::Method;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::fmt;
use url::Url;

/// Quality tier of a destination.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Tier {
    /// A check is in flight.
    Checking,
    Ok,
    Slow,
    Error,
}

impl Tier {
    pub fn is_final(&self) -> bool {
        !matches!(self, Tier::Checking)
    }
}

impl fmt::Display for Tier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Tier::Checking => "checking",
            Tier::Ok => "ok",
            Tier::Slow => "slow",
            Tier::Error => "error",
        };
        write!(f, "{}", s)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ServiceStatus {
    pub service_id: String,
    pub tier: Tier,
    /// Region code, HTTP status or a short qualitative note.
    pub detail: String,
}

impl ServiceStatus {
    pub fn new(
        service_id: impl Into<String>,
        tier: Tier,
        detail: impl Into<String>,
    ) -> Self {
        Self { service_id: service_id.into(), tier, detail: detail.into() }
    }

    pub fn checking(service_id: impl Into<String>) -> Self {
        Self::new(service_id, Tier::Checking, "checking")
    }

    pub fn ok(service_id: impl Into<String>, detail: impl Into<String>) -> Self {
        Self::new(service_id, Tier::Ok, detail)
    }

    pub fn slow(service_id: impl Into<String>, detail: impl Into<String>) -> Self {
        Self::new(service_id, Tier::Slow, detail)
    }

    pub fn error(service_id: impl Into<String>, detail: impl Into<String>) -> Self {
        Self::new(service_id, Tier::Error, detail)
    }

    /// Error status describing why a probe produced no usable response.
    pub(crate) fn failed(service_id: &str, reason: &FailureReason) -> Self {
        let detail = match reason {
            FailureReason::Timeout => "timeout".to_string(),
            FailureReason::Http(code) => format!("HTTP {}", code),
            FailureReason::Network(_) => "unreachable".to_string(),
        };
        Self::error(service_id, detail)
    }
}

/// HTTP method used by a probe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ProbeMethod {
    Get,
    #[default]
    Head,
}

impl From<ProbeMethod> for Method {
    fn from(method: ProbeMethod) -> Self {
        match method {
            ProbeMethod::Get => Method::GET,
            ProbeMethod::Head => Method::HEAD,
        }
    }
}

/// How a destination is probed and its responses interpreted.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ProbeStrategy {
    GenericAvailability(GenericAvailability),
    RegionGated(RegionGated),
    LayeredAvailability(LayeredAvailability),
}

impl ProbeStrategy {
    /// Probe the destination once and reduce the outcome to a final status.
    pub async fn classify<T: Transport>(
        &self,
        service_id: &str,
        transport: &T,
    ) -> ServiceStatus {
        match self {
            ProbeStrategy::GenericAvailability(p) => {
                p.classify(service_id, transport).await
            }
            ProbeStrategy::RegionGated(p) => p.classify(service_id, transport).await,
            ProbeStrategy::LayeredAvailability(p) => {
                p.classify(service_id, transport).await
            }
        }
    }

    pub fn validate(&self) -> Result<(), DiagnosticError> {
        match self {
            ProbeStrategy::GenericAvailability(p) => p.validate(),
            ProbeStrategy::RegionGated(_) | ProbeStrategy::LayeredAvailability(_) => Ok(()),
        }
    }
}

/// Parse configured extra request headers.
pub(crate) fn header_map(
    headers: &BTreeMap<String, String>,
) -> Result<HeaderMap, DiagnosticError> {
    let mut map = HeaderMap::new();
    for (name, value) in headers {
        let name = HeaderName::from_bytes(name.as_bytes()).map_err(|e| {
            DiagnosticError::config(format!("invalid header name '{}': {}", name, e))
        })?;
        let value = HeaderValue::from_str(value).map_err(|e| {
            DiagnosticError::config(format!("invalid value for header '{}': {}", name, e))
        })?;
        map.insert(name, value);
    }
    Ok(map)
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceDefinition {
    pub id: String,
    /// Display name.
    pub name: String,
    pub strategy: ProbeStrategy,
}

/// The set of destinations to check, in display order.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ServiceRegistry {
    pub services: Vec<ServiceDefinition>,
}

impl ServiceRegistry {
    pub fn new(services: Vec<ServiceDefinition>) -> Self {
        Self { services }
    }

    pub fn get(&self, id: &str) -> Option<&ServiceDefinition> {
        self.services.iter().find(|s| s.id == id)
    }

    pub fn ids(&self) -> impl Iterator<Item = &str> {
        self.services.iter().map(|s| s.id.as_str())
    }

    /// Keep only the services whose ids are listed.
    pub fn retain_ids(&mut self, ids: &[String]) -> Result<(), DiagnosticError> {
        if let Some(unknown) = ids.iter().find(|id| self.get(id).is_none()) {
            return Err(DiagnosticError::config(format!(
                "unknown service '{}' (known: {})",
                unknown,
                self.ids().collect::<Vec<_>>().join(", ")
            )));
        }
        self.services.retain(|s| ids.contains(&s.id));
        Ok(())
    }

    pub fn validate(&self) -> Result<(), DiagnosticError> {
        let mut seen = HashSet::new();
        for service in &self.services {
            if !seen.insert(service.id.as_str()) {
                return Err(DiagnosticError::config(format!(
                    "service '{}' is defined more than once",
                    service.id
                )));
            }
            service.strategy.validate().map_err(|e| {
                DiagnosticError::config(format!("service '{}': {}", service.id, e.message))
            })?;
        }
        Ok(())
    }
}

fn url(s: &str) -> Url {
    // only called with the literals below
    Url::parse(s).unwrap_or_else(|e| panic!("invalid built-in url {}: {}", s, e))
}

/// Reference video used by the layered video-platform check.
const REFERENCE_VIDEO_ID: &str = "vjJkdBXVgsk";

/// Some destinations answer tool user agents differently from browsers.
const BROWSER_USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) \
    AppleWebKit/537.36 (KHTML, like Gecko) Chrome/80.0.3987.87 Safari/537.36";

impl Default for ServiceRegistry {
    fn default() -> Self {
        let watch_url =
            url(&format!("https://www.youtube.com/watch?v={}", REFERENCE_VIDEO_ID));
        let oembed = OEmbedRequest::new(watch_url).url();

        Self::new(vec![
            ServiceDefinition {
                id: "youtube".to_string(),
                name: "YouTube".to_string(),
                strategy: ProbeStrategy::LayeredAvailability(
                    LayeredAvailability::new(
                        oembed,
                        url(&format!(
                            "https://www.youtube.com/embed/{}",
                            REFERENCE_VIDEO_ID
                        )),
                        url("https://www.youtube.com/favicon.ico"),
                    ),
                ),
            },
            ServiceDefinition {
                id: "telegram".to_string(),
                name: "Telegram".to_string(),
                strategy: ProbeStrategy::GenericAvailability(
                    GenericAvailability::new(url("https://web.telegram.org/z/"))
                        .with_fallback(url("https://api.telegram.org/"))
                        .with_header("User-Agent", BROWSER_USER_AGENT),
                ),
            },
            ServiceDefinition {
                id: "whatsapp".to_string(),
                name: "WhatsApp".to_string(),
                strategy: ProbeStrategy::GenericAvailability(
                    GenericAvailability::new(url("https://web.whatsapp.com/"))
                        .with_header("User-Agent", BROWSER_USER_AGENT),
                ),
            },
            ServiceDefinition {
                id: "instagram".to_string(),
                name: "Instagram".to_string(),
                strategy: ProbeStrategy::GenericAvailability(
                    GenericAvailability::new(url("https://www.instagram.com/"))
                        .with_header("User-Agent", BROWSER_USER_AGENT)
                        .with_api_check(
                            ApiCheck::new(url(
                                "https://www.instagram.com/api/v1/web/data/shared_data/",
                            ))
                            .with_header("X-Requested-With", "XMLHttpRequest"),
                        ),
                ),
            },
            ServiceDefinition {
                id: "chatgpt".to_string(),
                name: "ChatGPT".to_string(),
                strategy: ProbeStrategy::RegionGated(RegionGated::new(url(
                    "https://chat.openai.com/cdn-cgi/trace",
                ))),
            },
        ])
    }
}
