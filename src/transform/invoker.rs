//! Module J — Transform Invoker.
//!
//! Synthesizes the backend transformation URL from canonical options and
//! calls it. Grounded on the teacher's `fetch::fetch_source` for the
//! actual HTTP call (streaming `reqwest` GET with a size cap), replacing
//! its image-decode validation with response-header classification
//! handed off to the error classifier (§4.K).

use crate::cache::coalesce::OriginResponse;
use crate::classify::{classify_error_text, TextClassification};
use crate::error::ProcessingError;
use crate::options::TransformOptions;
use bytes::BytesMut;
use futures::StreamExt;
use reqwest::Client;

/// Categorical client-side network quality (glossary), modulating the
/// bitrate estimate when the caller does not specify one.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NetworkQuality {
    Slow,
    Medium,
    Fast,
    Ultrafast,
}

/// A fixed bitrate table (kbps) keyed by pixel count tier and network
/// quality, used only when `options` carries no explicit bitrate.
fn estimate_bitrate(width: u32, height: u32, quality: NetworkQuality) -> u32 {
    let pixels = width as u64 * height as u64;
    let tier = if pixels <= 640 * 360 {
        0
    } else if pixels <= 1280 * 720 {
        1
    } else if pixels <= 1920 * 1080 {
        2
    } else {
        3
    };
    const TABLE: [[u32; 4]; 4] = [
        [400, 600, 800, 1000],
        [800, 1200, 1600, 2000],
        [1500, 2500, 3500, 4500],
        [3000, 5000, 7000, 9000],
    ];
    let col = match quality {
        NetworkQuality::Slow => 0,
        NetworkQuality::Medium => 1,
        NetworkQuality::Fast => 2,
        NetworkQuality::Ultrafast => 3,
    };
    TABLE[tier][col]
}

/// Inspect `Accept` to choose between `mp4`/`webm` when `format` is
/// unspecified.
fn negotiate_format(accept_header: Option<&str>) -> &'static str {
    match accept_header {
        Some(accept) if accept.contains("video/webm") && !accept.contains("video/mp4") => "webm",
        _ => "mp4",
    }
}

/// Build `/cdn-cgi/media/<k=v,...>/<sourceUrl>`.
pub fn build_backend_url(
    backend_base: &str,
    options: &TransformOptions,
    source_url: &str,
    accept_header: Option<&str>,
    network_quality: NetworkQuality,
) -> String {
    let mut params = options.as_param_map();

    if !params.contains_key("format") {
        params.insert("format", negotiate_format(accept_header).to_string());
    }
    if !params.contains_key("bitrate") {
        if let (Some(w), Some(h)) = (options.width, options.height) {
            params.insert("bitrate", estimate_bitrate(w, h, network_quality).to_string());
        }
    }

    let pairs: Vec<String> = params.iter().map(|(k, v)| format!("{}={}", k, v)).collect();
    format!(
        "{}/cdn-cgi/media/{}/{}",
        backend_base.trim_end_matches('/'),
        pairs.join(","),
        source_url
    )
}

const MAX_BACKEND_RESPONSE_SIZE: usize = 256 * 1024 * 1024;
const MAX_ERROR_BODY_SIZE: usize = 4096;

/// Everything a failed backend call can tell the classifier (§4.K):
/// the numeric `Cf-Resized` code and, when the body was readable text,
/// the text-pattern classification of the error message.
pub struct BackendFailure {
    pub error: ProcessingError,
    pub backend_code_header: Option<String>,
    pub classification: Option<TextClassification>,
}

/// Best-effort read of up to `cap` bytes of a response body as text,
/// for error-message classification only — never used on the success
/// path, which streams the body as opaque bytes instead.
async fn read_capped_text(resp: reqwest::Response, cap: usize) -> Option<String> {
    let mut buf = BytesMut::with_capacity(cap.min(4096));
    let mut stream = resp.bytes_stream();
    while buf.len() < cap {
        let chunk = match stream.next().await {
            Some(Ok(chunk)) => chunk,
            _ => break,
        };
        let remaining = cap - buf.len();
        if chunk.len() > remaining {
            buf.extend_from_slice(&chunk[..remaining]);
            break;
        }
        buf.extend_from_slice(&chunk);
    }
    if buf.is_empty() {
        None
    } else {
        Some(String::from_utf8_lossy(&buf).into_owned())
    }
}

pub struct TransformInvoker {
    client: Client,
}

impl Default for TransformInvoker {
    fn default() -> Self {
        Self::new()
    }
}

impl TransformInvoker {
    pub fn new() -> Self {
        Self { client: Client::new() }
    }

    /// Issue the GET and buffer the body, enforcing a size cap the way
    /// the teacher's `fetch_source` streams with a size cap rather than
    /// trusting `Content-Length` alone.
    ///
    /// On failure, carries the `Cf-Resized` header alongside the backend's
    /// response body, text-classified (§4.K.1), since the classifier needs
    /// both the numeric code and the message even when the call itself
    /// failed.
    pub async fn invoke(&self, url: &str) -> Result<(OriginResponse, Option<String>), BackendFailure> {
        let resp = self.client.get(url).send().await.map_err(|e| BackendFailure {
            error: ProcessingError::TransformationFailed(e.to_string()),
            backend_code_header: None,
            classification: None,
        })?;

        let status = resp.status();
        let error_code_header = resp
            .headers()
            .get("Cf-Resized")
            .and_then(|v| v.to_str().ok())
            .map(|s| s.to_string());

        if !status.is_success() {
            let status_code = status.as_u16();
            let body_text = read_capped_text(resp, MAX_ERROR_BODY_SIZE).await;
            let classification = body_text.as_deref().and_then(classify_error_text);
            return Err(BackendFailure {
                error: ProcessingError::FetchFailed(status_code),
                backend_code_header: error_code_header,
                classification,
            });
        }

        let content_type = resp
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or("video/mp4")
            .to_string();

        let mut buf = BytesMut::with_capacity(8192);
        let mut stream = resp.bytes_stream();
        while let Some(chunk) = stream.next().await.transpose().map_err(|e| BackendFailure {
            error: ProcessingError::TransformationFailed(e.to_string()),
            backend_code_header: error_code_header.clone(),
            classification: None,
        })? {
            if buf.len() + chunk.len() > MAX_BACKEND_RESPONSE_SIZE {
                return Err(BackendFailure {
                    error: ProcessingError::TransformationFailed("backend response exceeds maximum size".to_string()),
                    backend_code_header: error_code_header.clone(),
                    classification: None,
                });
            }
            buf.extend_from_slice(&chunk);
        }

        Ok((
            OriginResponse {
                status: status.as_u16(),
                content_type,
                headers: vec![],
                body: buf.freeze(),
            },
            error_code_header,
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn url_has_expected_shape() {
        let mut opts = TransformOptions::new();
        opts.width = Some(640);
        opts.height = Some(360);
        let url = build_backend_url("https://backend.example", &opts, "videos/a.mp4", None, NetworkQuality::Fast);
        assert!(url.starts_with("https://backend.example/cdn-cgi/media/"));
        assert!(url.ends_with("/videos/a.mp4"));
        assert!(url.contains("width=640"));
        assert!(url.contains("format=mp4"));
    }

    #[test]
    fn accept_header_selects_webm() {
        assert_eq!(negotiate_format(Some("video/webm")), "webm");
        assert_eq!(negotiate_format(Some("video/mp4")), "mp4");
        assert_eq!(negotiate_format(None), "mp4");
    }

    #[test]
    fn explicit_bitrate_is_not_overridden() {
        let mut opts = TransformOptions::new();
        opts.width = Some(1920);
        opts.height = Some(1080);
        opts.bitrate = Some(12345);
        let url = build_backend_url("https://b", &opts, "s.mp4", None, NetworkQuality::Slow);
        assert!(url.contains("bitrate=12345"));
        assert!(!url.contains("bitrate=3000"));
    }

    #[test]
    fn bitrate_is_estimated_when_caller_omits_it() {
        let mut opts = TransformOptions::new();
        opts.width = Some(1920);
        opts.height = Some(1080);
        let url = build_backend_url("https://b", &opts, "s.mp4", None, NetworkQuality::Slow);
        assert!(url.contains("bitrate=3000"));
    }

    #[tokio::test]
    async fn failed_backend_call_classifies_response_body() {
        use axum::routing::get;
        use axum::Router;

        let app = Router::new().route(
            "/fail",
            get(|| async {
                (
                    axum::http::StatusCode::BAD_REQUEST,
                    [("Cf-Resized", "err=9401")],
                    "invalid parameter: width must be positive",
                )
            }),
        );
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        let invoker = TransformInvoker::new();
        let failure = invoker
            .invoke(&format!("http://{}/fail", addr))
            .await
            .unwrap_err();

        assert!(matches!(failure.error, ProcessingError::FetchFailed(400)));
        assert_eq!(failure.backend_code_header.as_deref(), Some("err=9401"));
        let classification = failure.classification.expect("body should classify");
        assert_eq!(classification.category, crate::classify::BackendErrorCategory::InvalidParameterError);
        assert_eq!(classification.parameter.as_deref(), Some("width"));
    }
}
