use super::Request;
use serde::de::{Error, Visitor};
use serde::{Deserialize, Deserializer, Serialize};
use std::collections::HashMap;
use std::fmt::Formatter;
use url::Url;

/// Default CDN trace endpoint used for connection metadata.
pub const DEFAULT_TRACE_URL: &str = "https://www.cloudflare.com/cdn-cgi/trace";

/// Key/value pairs served by a CDN `cdn-cgi/trace` endpoint.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct Trace {
    properties: HashMap<String, String>,
}

impl Trace {
    pub fn get(&self, key: &str) -> Option<&str> {
        self.properties
            .get(key)
            .map(String::as_str)
            .filter(|v| !v.is_empty())
    }

    pub fn ip(&self) -> Option<&str> {
        self.get("ip")
    }

    /// Data center that served the request.
    pub fn colo(&self) -> Option<&str> {
        self.get("colo")
    }

    /// Two-letter country code, only if it is well formed.
    pub fn loc(&self) -> Option<&str> {
        self.get("loc")
            .filter(|code| code.len() == 2 && code.bytes().all(|b| b.is_ascii_uppercase()))
    }

    pub fn is_empty(&self) -> bool {
        self.properties.is_empty()
    }
}

pub struct TraceRequest {
    url: Url,
}

impl TraceRequest {
    pub fn new(url: Url) -> Self {
        Self { url }
    }
}

impl Request for TraceRequest {
    type Response = Trace;

    fn url(&self) -> Url {
        self.url.clone()
    }
}

impl<'de> Deserialize<'de> for Trace {
    fn deserialize<D>(deserializer: D) -> Result<Trace, D::Error>
    where
        D: Deserializer<'de>,
    {
        deserializer.deserialize_str(TraceVisitor)
    }
}

struct TraceVisitor;

impl<'de> Visitor<'de> for TraceVisitor {
    type Value = Trace;

    fn expecting(&self, formatter: &mut Formatter) -> std::fmt::Result {
        formatter.write_str("a newline-separated list of key=value pairs")
    }

    fn visit_str<E>(self, v: &str) -> Result<Self::Value, E>
    where
        E: Error,
    {
        let properties = v
            .lines()
            .filter_map(|line| {
                let (key, value) = line.split_once('=')?;
                let key = key.trim();
                if key.is_empty() {
                    return None;
                }
                Some((key.to_string(), value.trim().to_string()))
            })
            .collect();

        Ok(Trace { properties })
    }
}
