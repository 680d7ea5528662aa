use super::{user_agent, Transport, TransferTarget, TransportResponse};
use crate::errors::DiagnosticError;
use futures::StreamExt;
use log::trace;
use rand::rngs::StdRng;
use rand::{RngCore, SeedableRng};
use reqwest::header::{CACHE_CONTROL, CONTENT_TYPE};
use reqwest::Client;
use std::time::Duration;

const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// [`Transport`] backed by a shared `reqwest` client.
///
/// Uploads report no progress curve: the client only shows when a chunk
/// was pulled into its buffers, not when it left the machine, so the
/// estimator times the whole request instead.
#[derive(Debug, Clone)]
pub struct HttpTransport {
    client: Client,
}

impl HttpTransport {
    pub fn new() -> Result<Self, DiagnosticError> {
        let client = Client::builder()
            .user_agent(user_agent())
            .connect_timeout(CONNECT_TIMEOUT)
            .build()?;

        Ok(Self { client })
    }
}

impl Transport for HttpTransport {
    async fn execute(
        &self,
        target: &TransferTarget,
    ) -> Result<TransportResponse, DiagnosticError> {
        let mut request = self
            .client
            .request(target.method.clone(), target.url.clone())
            .headers(target.headers.clone())
            .header(CACHE_CONTROL, "no-cache");

        if let Some(size) = target.upload_bytes {
            trace!("uploading {} random bytes to {}", size, target.url);
            request = request
                .header(CONTENT_TYPE, "application/octet-stream")
                .body(upload_payload(size));
        }

        let response = request.send().await?;

        if target.opaque {
            return Ok(TransportResponse::opaque());
        }

        let status = response.status();
        let mut bytes = 0u64;
        let mut body = None;

        if target.capture_body {
            let text = response.text().await?;
            bytes = text.len() as u64;
            body = Some(text);
        } else {
            // Count what actually arrives; the declared length is not trusted.
            let mut stream = response.bytes_stream();
            while let Some(chunk) = stream.next().await {
                bytes += chunk?.len() as u64;
            }
        }

        Ok(TransportResponse {
            status: Some(status),
            bytes,
            body,
            progress: Vec::new(),
        })
    }
}

/// Random bytes, so compression along the path cannot inflate the figure.
fn upload_payload(size: u64) -> Vec<u8> {
    let mut rng = StdRng::from_entropy();
    let mut data = vec![0u8; size as usize];
    rng.fill_bytes(&mut data);
    data
}
