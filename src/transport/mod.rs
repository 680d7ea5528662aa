//! Timed HTTP transfers.
//!
//! A [`TransferTarget`] describes one request. A [`Transport`] executes it
//! and reports what it could observe; [`timed_transfer`] wraps that in a
//! wall-clock timer and a hard deadline and turns the outcome into a
//! [`TransferResult`].

pub mod http;
#[cfg(test)]
pub(crate) mod mock;
mod timed;

pub use timed::{timed_transfer, FailureReason, TransferOutcome, TransferResult};

use crate::errors::DiagnosticError;
use crate::measurements::ProgressPoint;
use ::http::header::{HeaderMap, HeaderName, HeaderValue};
use ::http::{Method, StatusCode};
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::time::{SystemTime, UNIX_EPOCH};
use url::Url;

const UA: &str = concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION"));

/// Direction of a throughput measurement.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    Download,
    Upload,
}

impl Direction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Direction::Download => "download",
            Direction::Upload => "upload",
        }
    }
}

/// One HTTP request to be timed.
///
/// Targets are immutable once built; the builder methods consume and return
/// the target so probe lists can be declared inline.
#[derive(Debug, Clone)]
pub struct TransferTarget {
    /// Where the request goes.
    pub url: Url,
    /// Short human-readable name used in logs and samples.
    pub label: String,
    pub method: Method,
    pub headers: HeaderMap,
    /// Nominal size of the response, if known in advance.
    pub expected_bytes: Option<u64>,
    /// Size of the generated request body (uploads only).
    pub upload_bytes: Option<u64>,
    /// Treat the response as opaque: only the absence of a network error
    /// is observable, never the status or body.
    pub opaque: bool,
    /// Keep the response body as text instead of only counting it.
    pub capture_body: bool,
}

impl TransferTarget {
    pub fn new(method: Method, url: Url) -> Self {
        Self {
            label: url.to_string(),
            url,
            method,
            headers: HeaderMap::new(),
            expected_bytes: None,
            upload_bytes: None,
            opaque: false,
            capture_body: false,
        }
    }

    pub fn get(url: Url) -> Self {
        Self::new(Method::GET, url)
    }

    pub fn head(url: Url) -> Self {
        Self::new(Method::HEAD, url)
    }

    /// A POST carrying a generated body of `bytes` bytes.
    pub fn post(url: Url, bytes: u64) -> Self {
        let mut target = Self::new(Method::POST, url);
        target.upload_bytes = Some(bytes);
        target.expected_bytes = Some(bytes);
        target
    }

    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = label.into();
        self
    }

    pub fn with_expected_bytes(mut self, bytes: u64) -> Self {
        self.expected_bytes = Some(bytes);
        self
    }

    pub fn with_header(mut self, name: HeaderName, value: HeaderValue) -> Self {
        self.headers.insert(name, value);
        self
    }

    pub fn opaque(mut self, opaque: bool) -> Self {
        self.opaque = opaque;
        self
    }

    pub fn capturing_body(mut self) -> Self {
        self.capture_body = true;
        self
    }

    /// Copy of this target with a query string that defeats HTTP caches.
    pub fn cache_busted(&self, iteration: usize) -> Self {
        let millis = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis())
            .unwrap_or_default();

        let mut target = self.clone();
        target
            .url
            .query_pairs_mut()
            .append_pair("t", &millis.to_string())
            .append_pair("i", &iteration.to_string());
        target
    }

    /// Nominal size of the transfer in bytes, whichever direction it goes.
    pub fn nominal_bytes(&self) -> Option<u64> {
        self.upload_bytes.or(self.expected_bytes)
    }
}

/// What a transport observed for one request.
#[derive(Debug, Clone, Default)]
pub struct TransportResponse {
    /// `None` when the response is opaque.
    pub status: Option<StatusCode>,
    /// Response body bytes consumed.
    pub bytes: u64,
    /// Response text, when the target asked for it.
    pub body: Option<String>,
    /// Upload progress, when the transport could observe it.
    pub progress: Vec<ProgressPoint>,
}

impl TransportResponse {
    pub fn opaque() -> Self {
        Self::default()
    }

    pub fn with_status(status: StatusCode, bytes: u64) -> Self {
        Self { status: Some(status), bytes, ..Self::default() }
    }
}

/// Something that can execute a [`TransferTarget`].
///
/// Implementations perform exactly one attempt with no internal retries and
/// no deadline of their own; [`timed_transfer`] owns both timing and the
/// deadline.
pub trait Transport: Send + Sync {
    fn execute(
        &self,
        target: &TransferTarget,
    ) -> impl Future<Output = Result<TransportResponse, DiagnosticError>> + Send;
}

impl<T: Transport> Transport for &T {
    fn execute(
        &self,
        target: &TransferTarget,
    ) -> impl Future<Output = Result<TransportResponse, DiagnosticError>> + Send
    {
        (**self).execute(target)
    }
}

/// User agent sent with every request, including the build hash if present.
pub fn user_agent() -> String {
    match option_env!("VPNDIAG_BUILD_GIT_HASH") {
        Some(hash) => format!("{} ({})", UA, hash),
        None => UA.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn url(s: &str) -> Url {
        Url::parse(s).unwrap()
    }

    #[test]
    fn test_post_sets_body_size_and_nominal_bytes() {
        let target = TransferTarget::post(url("https://example.com/post"), 1024);
        assert_eq!(target.method, Method::POST);
        assert_eq!(target.upload_bytes, Some(1024));
        assert_eq!(target.nominal_bytes(), Some(1024));
    }

    #[test]
    fn test_label_defaults_to_url() {
        let target = TransferTarget::head(url("https://example.com/a"));
        assert_eq!(target.label, "https://example.com/a");
        let target = target.with_label("a");
        assert_eq!(target.label, "a");
    }

    #[test]
    fn test_cache_busted_appends_query() {
        let target = TransferTarget::get(url("https://example.com/img.jpg"));
        let busted = target.cache_busted(2);
        let pairs: Vec<(String, String)> = busted
            .url
            .query_pairs()
            .map(|(k, v)| (k.into_owned(), v.into_owned()))
            .collect();
        assert_eq!(pairs.len(), 2);
        assert_eq!(pairs[0].0, "t");
        assert_eq!(pairs[1], ("i".to_string(), "2".to_string()));
        assert_eq!(busted.url.path(), "/img.jpg");
        // the original is untouched
        assert!(target.url.query().is_none());
    }
}
