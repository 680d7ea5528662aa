use super::{header_map, ProbeMethod, ServiceStatus};
use crate::errors::DiagnosticError;
use crate::transport::{timed_transfer, FailureReason, Transport, TransferTarget};
use http::header::{HeaderValue, ACCEPT};
use log::{debug, warn};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::Duration;
use url::Url;

fn default_timeout_ms() -> u64 {
    5000
}

fn default_fallback_timeout_ms() -> u64 {
    3000
}

fn default_ok_below_ms() -> u64 {
    2000
}

fn default_slow_below_ms() -> u64 {
    5000
}

fn default_partial_below_ms() -> u64 {
    3000
}

/// Availability judged on the response time of one request, optionally
/// refined by a JSON API request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenericAvailability {
    pub url: Url,
    #[serde(default)]
    pub method: ProbeMethod,
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
    /// Responses faster than this are `ok`.
    #[serde(default = "default_ok_below_ms")]
    pub ok_below_ms: u64,
    /// Responses faster than this (but not `ok`) are `slow`.
    #[serde(default = "default_slow_below_ms")]
    pub slow_below_ms: u64,
    /// Only the absence of a network error is observable.
    #[serde(default)]
    pub opaque: bool,
    /// Secondary endpoint tried when the primary answers with an HTTP error.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fallback_url: Option<Url>,
    #[serde(default = "default_fallback_timeout_ms")]
    pub fallback_timeout_ms: u64,
    /// Extra request headers, sent to every endpoint of this check.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub headers: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_check: Option<ApiCheck>,
}

/// JSON API request made once the site itself has answered.
///
/// A parsed JSON answer keeps the time-based tier. An HTTP error means the
/// site loads but its API is restricted. No answer at all means the site is
/// only partially usable, or unusable if the site itself was already slow.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiCheck {
    pub url: Url,
    #[serde(default = "default_fallback_timeout_ms")]
    pub timeout_ms: u64,
    /// Site response time below which an unreachable API still leaves the
    /// destination `slow` rather than `error`.
    #[serde(default = "default_partial_below_ms")]
    pub partial_below_ms: u64,
    /// Sent on top of the check's own headers.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub headers: BTreeMap<String, String>,
}

impl ApiCheck {
    pub fn new(url: Url) -> Self {
        Self {
            url,
            timeout_ms: default_fallback_timeout_ms(),
            partial_below_ms: default_partial_below_ms(),
            headers: BTreeMap::new(),
        }
    }

    pub fn with_header(mut self, name: &str, value: &str) -> Self {
        self.headers.insert(name.to_string(), value.to_string());
        self
    }
}

impl GenericAvailability {
    pub fn new(url: Url) -> Self {
        Self {
            url,
            method: ProbeMethod::default(),
            timeout_ms: default_timeout_ms(),
            ok_below_ms: default_ok_below_ms(),
            slow_below_ms: default_slow_below_ms(),
            opaque: false,
            fallback_url: None,
            fallback_timeout_ms: default_fallback_timeout_ms(),
            headers: BTreeMap::new(),
            api_check: None,
        }
    }

    pub fn with_fallback(mut self, url: Url) -> Self {
        self.fallback_url = Some(url);
        self
    }

    pub fn with_header(mut self, name: &str, value: &str) -> Self {
        self.headers.insert(name.to_string(), value.to_string());
        self
    }

    pub fn with_api_check(mut self, check: ApiCheck) -> Self {
        self.api_check = Some(check);
        self
    }

    pub fn opaque(mut self, opaque: bool) -> Self {
        self.opaque = opaque;
        self
    }

    /// Reject header names or values that cannot be sent.
    pub fn validate(&self) -> Result<(), DiagnosticError> {
        header_map(&self.headers)?;
        if let Some(ref check) = self.api_check {
            header_map(&check.headers)?;
        }
        Ok(())
    }

    fn target(&self, url: &Url) -> TransferTarget {
        let mut target =
            TransferTarget::new(self.method.into(), url.clone()).opaque(self.opaque);
        extend_headers(&mut target, &self.headers);
        target
    }

    fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    pub(crate) async fn classify<T: Transport>(
        &self,
        service_id: &str,
        transport: &T,
    ) -> ServiceStatus {
        let result =
            timed_transfer(transport, &self.target(&self.url), self.timeout()).await;

        match result.failure() {
            None => {
                let elapsed = result.elapsed.as_millis() as u64;
                match self.api_check {
                    Some(ref check) => {
                        self.classify_api(service_id, check, elapsed, transport).await
                    }
                    None => self.by_time(service_id, elapsed, result.is_opaque()),
                }
            }
            Some(FailureReason::Http(code)) => match &self.fallback_url {
                Some(fallback) => {
                    debug!("{}: primary returned {}, trying {}", service_id, code, fallback);
                    let retry = timed_transfer(
                        transport,
                        &self.target(fallback),
                        Duration::from_millis(self.fallback_timeout_ms),
                    )
                    .await;
                    if retry.succeeded() {
                        ServiceStatus::slow(service_id, "fallback endpoint reachable")
                    } else {
                        ServiceStatus::error(service_id, format!("HTTP {}", code))
                    }
                }
                None => ServiceStatus::failed(service_id, &FailureReason::Http(*code)),
            },
            Some(reason) => ServiceStatus::failed(service_id, reason),
        }
    }

    fn by_time(&self, service_id: &str, elapsed: u64, opaque: bool) -> ServiceStatus {
        let suffix = if opaque { ", opaque" } else { "" };

        if elapsed < self.ok_below_ms {
            ServiceStatus::ok(service_id, format!("OK ({} ms{})", elapsed, suffix))
        } else if elapsed < self.slow_below_ms {
            ServiceStatus::slow(service_id, format!("slow ({} ms{})", elapsed, suffix))
        } else {
            ServiceStatus::error(service_id, format!("too slow ({} ms{})", elapsed, suffix))
        }
    }

    /// `elapsed` is the site's own response time; the API call only decides
    /// how much of the site works.
    async fn classify_api<T: Transport>(
        &self,
        service_id: &str,
        check: &ApiCheck,
        elapsed: u64,
        transport: &T,
    ) -> ServiceStatus {
        let mut target = TransferTarget::get(check.url.clone())
            .with_header(ACCEPT, HeaderValue::from_static("application/json"))
            .capturing_body();
        extend_headers(&mut target, &self.headers);
        extend_headers(&mut target, &check.headers);

        let result =
            timed_transfer(transport, &target, Duration::from_millis(check.timeout_ms)).await;

        let answered = match result.failure() {
            Some(FailureReason::Http(code)) => {
                return ServiceStatus::slow(service_id, format!("restricted (HTTP {})", code));
            }
            Some(reason) => {
                debug!("{}: API check failed: {}", service_id, reason);
                false
            }
            None => {
                let body = result.body.as_deref().unwrap_or_default();
                let parsed = serde_json::from_str::<serde_json::Value>(body).is_ok();
                if !parsed {
                    debug!("{}: API answered without JSON", service_id);
                }
                parsed
            }
        };

        if answered {
            self.by_time(service_id, elapsed, false)
        } else if elapsed < check.partial_below_ms {
            ServiceStatus::slow(service_id, format!("partial ({} ms)", elapsed))
        } else {
            ServiceStatus::error(service_id, format!("too slow ({} ms)", elapsed))
        }
    }
}

fn extend_headers(target: &mut TransferTarget, headers: &BTreeMap<String, String>) {
    match header_map(headers) {
        Ok(map) => target.headers.extend(map),
        Err(e) => warn!("Not sending extra headers to {}: {}", target.url, e.message),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::ErrorKind;
    use crate::services::Tier;
    use crate::transport::mock::{MockTransport, Reply};
    use http::header::USER_AGENT;

    const PRIMARY: &str = "https://web.example.test/";
    const FALLBACK: &str = "https://api.example.test/";
    const API: &str = "https://web.example.test/api/shared_data/";

    fn check() -> GenericAvailability {
        GenericAvailability::new(Url::parse(PRIMARY).unwrap())
    }

    fn with_api() -> GenericAvailability {
        check().with_api_check(
            ApiCheck::new(Url::parse(API).unwrap())
                .with_header("X-Requested-With", "XMLHttpRequest"),
        )
    }

    async fn classify_with(reply: Reply) -> ServiceStatus {
        let mock = MockTransport::new().route(PRIMARY, reply);
        check().classify("svc", &mock).await
    }

    #[tokio::test(start_paused = true)]
    async fn test_fast_response_is_ok() {
        let status = classify_with(Reply::ok(Duration::from_millis(300), 0)).await;
        assert_eq!(status.tier, Tier::Ok);
        assert_eq!(status.detail, "OK (300 ms)");
    }

    #[tokio::test(start_paused = true)]
    async fn test_medium_response_is_slow() {
        let status = classify_with(Reply::ok(Duration::from_millis(3000), 0)).await;
        assert_eq!(status.tier, Tier::Slow);
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_is_error() {
        let status = classify_with(Reply::ok(Duration::from_millis(9000), 0)).await;
        assert_eq!(status.tier, Tier::Error);
        assert_eq!(status.detail, "timeout");
    }

    #[tokio::test(start_paused = true)]
    async fn test_http_error_without_fallback() {
        let status = classify_with(Reply::status(Duration::from_millis(100), 503)).await;
        assert_eq!(status.tier, Tier::Error);
        assert_eq!(status.detail, "HTTP 503");
    }

    #[tokio::test(start_paused = true)]
    async fn test_network_error_is_unreachable() {
        let status = classify_with(Reply::error(
            Duration::from_millis(10),
            ErrorKind::Network,
        ))
        .await;
        assert_eq!(status.tier, Tier::Error);
        assert_eq!(status.detail, "unreachable");
    }

    #[tokio::test(start_paused = true)]
    async fn test_http_error_with_reachable_fallback_is_slow() {
        let mock = MockTransport::new()
            .route(PRIMARY, Reply::status(Duration::from_millis(100), 403))
            .route(FALLBACK, Reply::ok(Duration::from_millis(100), 0));
        let check = check().with_fallback(Url::parse(FALLBACK).unwrap());

        let status = check.classify("svc", &mock).await;
        assert_eq!(status.tier, Tier::Slow);
        assert_eq!(status.detail, "fallback endpoint reachable");
        assert_eq!(mock.calls_to(FALLBACK), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_fallback_has_its_own_shorter_deadline() {
        // 4 s is inside the primary's 5 s but past the fallback's 3 s.
        let mock = MockTransport::new()
            .route(PRIMARY, Reply::status(Duration::from_millis(100), 403))
            .route(FALLBACK, Reply::ok(Duration::from_millis(4000), 0));
        let check = check().with_fallback(Url::parse(FALLBACK).unwrap());

        let started = tokio::time::Instant::now();
        let status = check.classify("svc", &mock).await;

        assert_eq!(status.tier, Tier::Error);
        assert_eq!(status.detail, "HTTP 403");
        assert_eq!(started.elapsed(), Duration::from_millis(3100));
    }

    #[tokio::test(start_paused = true)]
    async fn test_opaque_check_marks_detail() {
        let mock = MockTransport::new()
            .route(PRIMARY, Reply::ok(Duration::from_millis(250), 100));
        let status = check().opaque(true).classify("svc", &mock).await;
        assert_eq!(status.tier, Tier::Ok);
        assert_eq!(status.detail, "OK (250 ms, opaque)");
    }

    #[tokio::test(start_paused = true)]
    async fn test_extra_headers_reach_every_endpoint() {
        let mock = MockTransport::new()
            .route(PRIMARY, Reply::ok(Duration::from_millis(100), 0))
            .route(API, Reply::body(Duration::from_millis(100), "{}"));
        let check = with_api().with_header("User-Agent", "Mozilla/5.0 test");

        check.classify("svc", &mock).await;

        let sent = mock.headers_sent_to("https://web.example.test/");
        assert_eq!(sent.len(), 2);
        assert!(sent.iter().all(|h| h[USER_AGENT] == "Mozilla/5.0 test"));
        assert_eq!(sent[1]["x-requested-with"], "XMLHttpRequest");
        assert_eq!(sent[1][ACCEPT], "application/json");
    }

    #[test]
    fn test_invalid_header_is_rejected() {
        let check = check().with_header("bad header", "x");
        assert!(check.validate().is_err());
        assert!(with_api().validate().is_ok());
    }

    #[tokio::test(start_paused = true)]
    async fn test_api_json_keeps_time_tier() {
        let mock = MockTransport::new()
            .route(PRIMARY, Reply::ok(Duration::from_millis(400), 0))
            .route(API, Reply::body(Duration::from_millis(200), r#"{"config":{}}"#));
        let status = with_api().classify("svc", &mock).await;
        assert_eq!(status.tier, Tier::Ok);
        assert_eq!(status.detail, "OK (400 ms)");

        let mock = MockTransport::new()
            .route(PRIMARY, Reply::ok(Duration::from_millis(2500), 0))
            .route(API, Reply::body(Duration::from_millis(200), "{}"));
        let status = with_api().classify("svc", &mock).await;
        assert_eq!(status.tier, Tier::Slow);
    }

    #[tokio::test(start_paused = true)]
    async fn test_api_http_error_is_restricted() {
        let mock = MockTransport::new()
            .route(PRIMARY, Reply::ok(Duration::from_millis(400), 0))
            .route(API, Reply::status(Duration::from_millis(200), 429));
        let status = with_api().classify("svc", &mock).await;
        assert_eq!(status.tier, Tier::Slow);
        assert_eq!(status.detail, "restricted (HTTP 429)");
    }

    #[tokio::test(start_paused = true)]
    async fn test_unreachable_api_depends_on_site_time() {
        // API never answers within its 3 s deadline
        let mock = MockTransport::new()
            .route(PRIMARY, Reply::ok(Duration::from_millis(1200), 0))
            .route(API, Reply::ok(Duration::from_millis(8000), 0));
        let status = with_api().classify("svc", &mock).await;
        assert_eq!(status.tier, Tier::Slow);
        assert_eq!(status.detail, "partial (1200 ms)");

        let mock = MockTransport::new()
            .route(PRIMARY, Reply::ok(Duration::from_millis(3500), 0))
            .route(API, Reply::error(Duration::from_millis(50), ErrorKind::Network));
        let status = with_api().classify("svc", &mock).await;
        assert_eq!(status.tier, Tier::Error);
        assert_eq!(status.detail, "too slow (3500 ms)");
    }

    #[tokio::test(start_paused = true)]
    async fn test_api_answer_without_json_counts_as_unreachable() {
        let mock = MockTransport::new()
            .route(PRIMARY, Reply::ok(Duration::from_millis(300), 0))
            .route(API, Reply::body(Duration::from_millis(100), "<html>login</html>"));
        let status = with_api().classify("svc", &mock).await;
        assert_eq!(status.tier, Tier::Slow);
        assert_eq!(status.detail, "partial (300 ms)");
    }

    #[tokio::test(start_paused = true)]
    async fn test_site_failure_skips_api() {
        let mock = MockTransport::new()
            .route(PRIMARY, Reply::status(Duration::from_millis(100), 500))
            .route(API, Reply::body(Duration::from_millis(100), "{}"));
        let status = with_api().classify("svc", &mock).await;
        assert_eq!(status.detail, "HTTP 500");
        assert_eq!(mock.calls_to(API), 0);
    }
}
