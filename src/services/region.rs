use super::ServiceStatus;
use crate::api::trace::Trace;
use crate::transport::{timed_transfer, Transport, TransferTarget};
use log::debug;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::time::Duration;
use url::Url;

/// Detail reported when the diagnostic endpoint does not reveal a country.
pub const REGION_UNDETERMINED: &str = "region undetermined";

/// Countries where the AI chat destination is offered.
const SUPPORTED_COUNTRIES: &[&str] = &[
    "AL", "DZ", "AD", "AO", "AG", "AR", "AM", "AU", "AT", "AZ", "BS", "BD", "BB",
    "BE", "BZ", "BJ", "BT", "BO", "BA", "BW", "BR", "BN", "BG", "BF", "CV", "CA",
    "CL", "CO", "KM", "CG", "CR", "CI", "HR", "CY", "CZ", "DK", "DJ", "DM", "DO",
    "EC", "SV", "EE", "FJ", "FI", "FR", "GA", "GM", "GE", "DE", "GH", "GR", "GD",
    "GT", "GN", "GW", "GY", "HT", "VA", "HN", "HU", "IS", "IN", "ID", "IQ", "IE",
    "IL", "IT", "JM", "JP", "JO", "KZ", "KE", "KI", "KW", "KG", "LV", "LB", "LS",
    "LR", "LI", "LT", "LU", "MG", "MW", "MY", "MV", "ML", "MT", "MH", "MR", "MU",
    "MX", "FM", "MD", "MC", "MN", "ME", "MA", "MZ", "MM", "NA", "NR", "NP", "NL",
    "NZ", "NI", "NE", "NG", "MK", "NO", "OM", "PK", "PW", "PS", "PA", "PG", "PY",
    "PE", "PH", "PL", "PT", "QA", "RO", "RW", "KN", "LC", "VC", "WS", "SM", "ST",
    "SN", "RS", "SC", "SL", "SG", "SK", "SI", "SB", "ZA", "KR", "ES", "LK", "SR",
    "SE", "CH", "TW", "TZ", "TH", "TL", "TG", "TO", "TT", "TN", "TR", "TV", "UG",
    "UA", "AE", "GB", "US", "UY", "VU", "ZM",
];

fn default_timeout_ms() -> u64 {
    5000
}

fn default_supported_countries() -> BTreeSet<String> {
    SUPPORTED_COUNTRIES.iter().map(|c| c.to_string()).collect()
}

/// Extract the two-letter country code from a CDN trace body.
pub fn parse_region(body: &str) -> Option<String> {
    serde_plain::from_str::<Trace>(body)
        .ok()?
        .loc()
        .map(str::to_string)
}

/// Availability decided by the country the request appears to come from.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegionGated {
    /// Endpoint whose body carries a `loc=XX` line.
    pub url: Url,
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
    #[serde(default = "default_supported_countries")]
    pub supported_countries: BTreeSet<String>,
}

impl RegionGated {
    pub fn new(url: Url) -> Self {
        Self {
            url,
            timeout_ms: default_timeout_ms(),
            supported_countries: default_supported_countries(),
        }
    }

    pub fn with_supported_countries<I, S>(mut self, countries: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.supported_countries = countries.into_iter().map(Into::into).collect();
        self
    }

    pub(crate) async fn classify<T: Transport>(
        &self,
        service_id: &str,
        transport: &T,
    ) -> ServiceStatus {
        let target = TransferTarget::get(self.url.clone()).capturing_body();
        let result = timed_transfer(
            transport,
            &target,
            Duration::from_millis(self.timeout_ms),
        )
        .await;

        if let Some(reason) = result.failure() {
            return ServiceStatus::failed(service_id, reason);
        }

        let region = result.body.as_deref().and_then(parse_region);
        debug!("{}: resolved region {:?}", service_id, region);

        match region {
            None => ServiceStatus::error(service_id, REGION_UNDETERMINED),
            Some(code) if self.supported_countries.contains(&code) => {
                ServiceStatus::ok(service_id, format!("OK ({})", code))
            }
            Some(code) => {
                ServiceStatus::error(service_id, format!("unsupported region ({})", code))
            }
        }
    }
}
