//! Typed requests against structured HTTP endpoints.
//!
//! Timing-sensitive transfers go through [`crate::transport`]; this module
//! is for endpoints whose response body has to be decoded into a type.

pub mod client;
pub mod oembed;
pub mod trace;

pub use client::Client;

use crate::transport::user_agent;
use reqwest::header::{HeaderMap, HeaderValue, ACCEPT, USER_AGENT};
use reqwest::Method;
use serde::Deserialize;
use url::Url;

pub trait Request {
    type Response: for<'de> Deserialize<'de>;

    const METHOD: Method = Method::GET;

    fn url(&self) -> Url;

    fn headers(&self) -> HeaderMap {
        let mut headers = HeaderMap::new();

        if let Ok(value) = HeaderValue::from_str(&user_agent()) {
            headers.insert(USER_AGENT, value);
        }
        headers.insert(ACCEPT, HeaderValue::from_static("*/*"));

        headers
    }
}

impl<R: Request> Request for &R {
    type Response = R::Response;

    const METHOD: Method = R::METHOD;

    fn url(&self) -> Url {
        (**self).url()
    }

    fn headers(&self) -> HeaderMap {
        (**self).headers()
    }
}
