use super::Request;
use serde::{Deserialize, Serialize};
use url::Url;

/// Endpoint that describes embeddable media by page URL.
pub const OEMBED_ENDPOINT: &str = "https://www.youtube.com/oembed";

/// Subset of an oEmbed document.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct OEmbed {
    pub title: Option<String>,
    pub author_name: Option<String>,
    pub provider_name: Option<String>,
    #[serde(rename = "type")]
    pub kind: Option<String>,
}

impl OEmbed {
    /// The document names the media item it describes.
    pub fn has_title(&self) -> bool {
        self.title.as_deref().is_some_and(|t| !t.trim().is_empty())
    }
}

pub struct OEmbedRequest {
    page_url: Url,
}

impl OEmbedRequest {
    pub fn new(page_url: Url) -> Self {
        Self { page_url }
    }
}

impl Request for OEmbedRequest {
    type Response = OEmbed;

    fn url(&self) -> Url {
        let mut url = Url::parse(OEMBED_ENDPOINT).expect("static endpoint is valid");
        url.query_pairs_mut()
            .append_pair("url", self.page_url.as_str())
            .append_pair("format", "json");
        url
    }
}
