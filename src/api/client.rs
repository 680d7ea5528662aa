use super::Request;
use crate::errors::DiagnosticError;
use log::debug;
use reqwest::Client as ReqwestClient;
use std::time::Duration;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Clone)]
pub struct Client {
    client: ReqwestClient,
}

impl Client {
    pub fn new() -> Result<Self, DiagnosticError> {
        let client = ReqwestClient::builder().timeout(REQUEST_TIMEOUT).build()?;
        Ok(Client { client })
    }

    pub async fn send<R: Request>(
        &self,
        request: R,
    ) -> Result<R::Response, DiagnosticError> {
        let url = request.url();
        debug!("{} {}", R::METHOD, url);

        let response = self
            .client
            .request(R::METHOD, url)
            .headers(request.headers())
            .send()
            .await?
            .error_for_status()?;

        let text = response.text().await?;

        decode(&text)
    }
}

/// Decode a response body: JSON first, then plain `key=value` text.
pub(crate) fn decode<T>(text: &str) -> Result<T, DiagnosticError>
where
    T: for<'de> serde::Deserialize<'de>,
{
    match serde_json::from_str::<T>(text) {
        Ok(parsed) => Ok(parsed),
        Err(json_error) => serde_plain::from_str(text).map_err(|plain_error| {
            debug!("plain decoding failed too: {}", plain_error);
            DiagnosticError::from(json_error)
        }),
    }
}
