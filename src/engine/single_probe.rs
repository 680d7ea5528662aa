//! One timed partial-range fetch of a media file.

use crate::api::oembed::OEmbedRequest;
use crate::api::Client;
use crate::measurements::BYTES_PER_MIB;
use crate::scoring::{grade_probe, ProbeStatus};
use crate::transport::{timed_transfer, Transport, TransferTarget};
use chrono::{DateTime, Utc};
use http::header::{HeaderValue, RANGE};
use log::{info, warn};
use serde::Serialize;
use std::time::Duration;
use url::Url;

/// First mebibyte of the file.
const PROBE_RANGE: &str = "bytes=0-1048575";

pub const PROBE_DEADLINE: Duration = Duration::from_secs(30);

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SingleProbeReport {
    /// MB/s, with 1 MB = 1024 * 1024 bytes.
    pub speed: f64,
    pub status: ProbeStatus,
    /// Seconds.
    pub download_time: f64,
    /// Bytes received.
    pub file_size: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub video_title: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub timestamp: DateTime<Utc>,
}

/// Fetch the first mebibyte of `media_url` and grade the speed.
pub async fn run_single_probe<T: Transport>(
    transport: &T,
    media_url: &Url,
) -> SingleProbeReport {
    let target = TransferTarget::get(media_url.clone())
        .with_label("media probe")
        .with_header(RANGE, HeaderValue::from_static(PROBE_RANGE));

    let result = timed_transfer(transport, &target, PROBE_DEADLINE).await;
    let seconds = result.elapsed.as_secs_f64();

    if let Some(reason) = result.failure() {
        warn!("Media probe failed: {}", reason);
        return SingleProbeReport {
            speed: 0.0,
            status: ProbeStatus::Poor,
            download_time: seconds,
            file_size: 0,
            video_title: None,
            error: Some(format!("download failed: {}", reason)),
            timestamp: Utc::now(),
        };
    }

    let speed = if seconds > 0.0 {
        result.bytes as f64 / BYTES_PER_MIB / seconds
    } else {
        0.0
    };
    let status = grade_probe(speed);
    info!("Media probe: {:.2} MB/s over {} bytes ({:?})", speed, result.bytes, status);

    SingleProbeReport {
        speed,
        status,
        download_time: seconds,
        file_size: result.bytes,
        video_title: None,
        error: None,
        timestamp: Utc::now(),
    }
}

/// Attach the title of the video page, or the reason it could not be read.
pub async fn attach_title(
    mut report: SingleProbeReport,
    client: &Client,
    page_url: &Url,
) -> SingleProbeReport {
    match client.send(OEmbedRequest::new(page_url.clone())).await {
        Ok(doc) if doc.has_title() => report.video_title = doc.title,
        Ok(_) => warn!("No title in oEmbed document for {}", page_url),
        Err(e) => {
            warn!("Title lookup failed: {}", e.message);
            if report.error.is_none() {
                report.error = Some(format!("title lookup failed: {}", e.message));
            }
        }
    }
    report
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::mock::{MockTransport, Reply};

    const MEDIA: &str = "https://media.example.test/video.mp4";

    #[tokio::test(start_paused = true)]
    async fn test_fast_fetch_is_excellent() {
        let mock = MockTransport::new()
            .route(MEDIA, Reply::ok(Duration::from_millis(40), 1_048_576));

        let report = run_single_probe(&mock, &Url::parse(MEDIA).unwrap()).await;

        assert_eq!(report.status, ProbeStatus::Excellent);
        assert!((report.speed - 25.0).abs() < 1e-6);
        assert_eq!(report.file_size, 1_048_576);
        assert!(report.error.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_slow_fetch_is_poor() {
        let mock = MockTransport::new()
            .route(MEDIA, Reply::ok(Duration::from_secs(2), 1_048_576));

        let report = run_single_probe(&mock, &Url::parse(MEDIA).unwrap()).await;

        assert_eq!(report.status, ProbeStatus::Poor);
        assert!((report.speed - 0.5).abs() < 1e-9);
        assert!((report.download_time - 2.0).abs() < 1e-9);
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_reports_error() {
        let mock = MockTransport::new()
            .route(MEDIA, Reply::ok(Duration::from_secs(45), 1_048_576));

        let report = run_single_probe(&mock, &Url::parse(MEDIA).unwrap()).await;

        assert_eq!(report.status, ProbeStatus::Poor);
        assert_eq!(report.error.as_deref(), Some("download failed: timeout"));
        assert!((report.download_time - 30.0).abs() < 1e-9);
    }

    #[tokio::test(start_paused = true)]
    async fn test_report_json_shape() {
        let mock = MockTransport::new()
            .route(MEDIA, Reply::ok(Duration::from_millis(200), 1_048_576));

        let report = run_single_probe(&mock, &Url::parse(MEDIA).unwrap()).await;
        let json = serde_json::to_value(&report).unwrap();

        assert_eq!(json["status"], "good");
        assert_eq!(json["fileSize"], 1_048_576);
        assert!(json.get("downloadTime").is_some());
        assert!(json.get("timestamp").is_some());
        assert!(json.get("error").is_none());
        assert!(json.get("videoTitle").is_none());
    }
}
