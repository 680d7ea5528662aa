//! Scripted transport for tests.
//!
//! Each route maps a URL (query string ignored) to a fixed reply and a
//! simulated delay. Pair with `#[tokio::test(start_paused = true)]` so delays
//! resolve instantly and elapsed times are exact.

use super::{Transport, TransferTarget, TransportResponse};
use crate::errors::{DiagnosticError, ErrorKind};
use crate::measurements::ProgressPoint;
use http::{HeaderMap, StatusCode};
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;
use url::Url;

#[derive(Debug, Clone)]
pub(crate) enum Scripted {
    Status { code: u16, bytes: u64, body: Option<String> },
    Opaque,
    Error(ErrorKind),
}

#[derive(Debug, Clone)]
pub(crate) struct Reply {
    pub delay: Duration,
    pub result: Scripted,
    pub progress: Vec<ProgressPoint>,
}

impl Reply {
    fn new(delay: Duration, result: Scripted) -> Self {
        Self { delay, result, progress: Vec::new() }
    }

    pub fn ok(delay: Duration, bytes: u64) -> Self {
        Self::new(delay, Scripted::Status { code: 200, bytes, body: None })
    }

    pub fn status(delay: Duration, code: u16) -> Self {
        Self::new(delay, Scripted::Status { code, bytes: 0, body: None })
    }

    pub fn body(delay: Duration, body: &str) -> Self {
        Self::new(
            delay,
            Scripted::Status {
                code: 200,
                bytes: body.len() as u64,
                body: Some(body.to_string()),
            },
        )
    }

    pub fn opaque(delay: Duration) -> Self {
        Self::new(delay, Scripted::Opaque)
    }

    pub fn error(delay: Duration, kind: ErrorKind) -> Self {
        Self::new(delay, Scripted::Error(kind))
    }

    pub fn with_progress(mut self, progress: Vec<ProgressPoint>) -> Self {
        self.progress = progress;
        self
    }
}

fn route_key(url: &Url) -> String {
    let mut url = url.clone();
    url.set_query(None);
    url.to_string()
}

#[derive(Debug, Default)]
pub(crate) struct MockTransport {
    routes: HashMap<String, Reply>,
    calls: Mutex<Vec<String>>,
    headers: Mutex<Vec<(String, HeaderMap)>>,
    completed: AtomicUsize,
}

impl MockTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn route(mut self, url: &str, reply: Reply) -> Self {
        let url = Url::parse(url).expect("valid mock url");
        self.routes.insert(route_key(&url), reply);
        self
    }

    /// Every URL requested so far, query included, in order.
    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    /// Number of requests whose URL starts with `prefix`.
    pub fn calls_to(&self, prefix: &str) -> usize {
        self.calls().iter().filter(|c| c.starts_with(prefix)).count()
    }

    /// Headers of every request whose URL starts with `prefix`, in order.
    pub fn headers_sent_to(&self, prefix: &str) -> Vec<HeaderMap> {
        self.headers
            .lock()
            .unwrap()
            .iter()
            .filter(|(url, _)| url.starts_with(prefix))
            .map(|(_, headers)| headers.clone())
            .collect()
    }

    /// Number of requests that ran to completion.
    pub fn completed(&self) -> usize {
        self.completed.load(Ordering::SeqCst)
    }
}

impl Transport for MockTransport {
    async fn execute(
        &self,
        target: &TransferTarget,
    ) -> Result<TransportResponse, DiagnosticError> {
        self.calls.lock().unwrap().push(target.url.to_string());
        self.headers
            .lock()
            .unwrap()
            .push((target.url.to_string(), target.headers.clone()));

        let reply = self.routes.get(&route_key(&target.url)).cloned().unwrap_or_else(
            || Reply::error(Duration::ZERO, ErrorKind::Network),
        );

        tokio::time::sleep(reply.delay).await;
        self.completed.fetch_add(1, Ordering::SeqCst);

        match reply.result {
            Scripted::Error(kind) => {
                Err(DiagnosticError::new(kind, format!("{} unreachable", target.url)))
            }
            Scripted::Opaque => Ok(TransportResponse::opaque()),
            Scripted::Status { .. } if target.opaque => Ok(TransportResponse::opaque()),
            Scripted::Status { code, bytes, body } => {
                let status = StatusCode::from_u16(code).expect("valid status");
                Ok(TransportResponse {
                    status: Some(status),
                    bytes,
                    body: if target.capture_body { body } else { None },
                    progress: reply.progress,
                })
            }
        }
    }
}
