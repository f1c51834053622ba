//! Plain source fetch, used by the fallback path (§4.K) to retrieve the
//! resolved source URL directly, bypassing the transformation backend.
//! Grounded on the teacher's `fetch_source`: streaming `reqwest` GET with
//! a size cap to avoid trusting `Content-Length` alone.

use crate::cache::coalesce::OriginResponse;
use crate::error::GatewayError;
use bytes::BytesMut;
use futures::StreamExt;
use reqwest::Client;

const MAX_FALLBACK_SIZE: usize = 256 * 1024 * 1024;

pub async fn fetch_source(client: &Client, url: &str) -> Result<OriginResponse, GatewayError> {
    let resp = client
        .get(url)
        .send()
        .await
        .map_err(|e| GatewayError::Network(e.to_string()))?;

    if !resp.status().is_success() {
        return Err(GatewayError::Network(format!("upstream status: {}", resp.status())));
    }

    let content_type = resp
        .headers()
        .get(reqwest::header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("application/octet-stream")
        .to_string();
    let status = resp.status().as_u16();
    let headers: Vec<(String, String)> = resp
        .headers()
        .iter()
        .filter_map(|(name, value)| value.to_str().ok().map(|v| (name.as_str().to_string(), v.to_string())))
        .collect();

    let mut buf = BytesMut::with_capacity(8192);
    let mut stream = resp.bytes_stream();
    while let Some(chunk) = stream
        .next()
        .await
        .transpose()
        .map_err(|e| GatewayError::Network(e.to_string()))?
    {
        if buf.len() + chunk.len() > MAX_FALLBACK_SIZE {
            return Err(GatewayError::Network("source exceeds size limit".to_string()));
        }
        buf.extend_from_slice(&chunk);
    }

    Ok(OriginResponse { status, content_type, headers, body: buf.freeze() })
}
