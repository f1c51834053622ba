//! Module H — Range Handler.
//!
//! Turns a full 200 response into a 206 Partial Content given a client
//! `Range` header, degrading gracefully (never failing the request) on
//! any parse or slicing problem.

use bytes::Bytes;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RangeFallbackReason {
    InvalidRangeHeader,
    MissingContentLength,
    BufferProcessingError,
    GeneralProcessingFailure,
}

impl RangeFallbackReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            RangeFallbackReason::InvalidRangeHeader => "invalid-range-header",
            RangeFallbackReason::MissingContentLength => "missing-content-length",
            RangeFallbackReason::BufferProcessingError => "buffer-processing-error",
            RangeFallbackReason::GeneralProcessingFailure => "general-processing-failure",
        }
    }
}

pub struct RangedResponse {
    pub status: u16,
    pub body: Bytes,
    pub content_range: Option<String>,
    pub fallback_reason: Option<RangeFallbackReason>,
}

/// Apply `range_header` (the raw `Range` header value, if any) to `body`.
/// `content_length` is `body.len()` passed explicitly because a full
/// integration may have it from an upstream header rather than a local
/// buffer length.
pub fn apply_range(range_header: Option<&str>, content_length: Option<usize>, body: &Bytes) -> RangedResponse {
    let Some(range_header) = range_header else {
        return full_response(body.clone());
    };

    let Some(total) = content_length else {
        return fallback(body.clone(), RangeFallbackReason::MissingContentLength);
    };

    let Some((start, end)) = parse_range(range_header, total) else {
        return fallback(body.clone(), RangeFallbackReason::InvalidRangeHeader);
    };

    if start > end || end >= total || start >= body.len() {
        return fallback(body.clone(), RangeFallbackReason::InvalidRangeHeader);
    }

    let slice_end = (end + 1).min(body.len());
    if start >= slice_end {
        return fallback(body.clone(), RangeFallbackReason::BufferProcessingError);
    }

    let sliced = body.slice(start..slice_end);
    RangedResponse {
        status: 206,
        body: sliced,
        content_range: Some(format!("bytes {}-{}/{}", start, end, total)),
        fallback_reason: None,
    }
}

fn full_response(body: Bytes) -> RangedResponse {
    RangedResponse { status: 200, body, content_range: None, fallback_reason: None }
}

fn fallback(body: Bytes, reason: RangeFallbackReason) -> RangedResponse {
    RangedResponse { status: 200, body, content_range: None, fallback_reason: Some(reason) }
}

/// Parse `bytes=start-end` (end optional, meaning "to EOF").
fn parse_range(header: &str, total: usize) -> Option<(usize, usize)> {
    let spec = header.strip_prefix("bytes=")?;
    // Only a single range is supported; multi-range requests fall back.
    if spec.contains(',') {
        return None;
    }
    let (start_str, end_str) = spec.split_once('-')?;
    if start_str.is_empty() {
        // Suffix range `bytes=-N`: last N bytes.
        let suffix_len: usize = end_str.parse().ok()?;
        if suffix_len == 0 || suffix_len > total {
            return None;
        }
        return Some((total - suffix_len, total - 1));
    }
    let start: usize = start_str.parse().ok()?;
    let end: usize = if end_str.is_empty() {
        total.checked_sub(1)?
    } else {
        end_str.parse().ok()?
    };
    Some((start, end))
}
