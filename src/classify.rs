//! Module K — Error Classifier & Fallback.
//!
//! Two independent classifiers (backend error text, backend numeric
//! error code) feed one fallback decision: whether the orchestrator
//! should re-fetch the resolved source URL directly instead of
//! surfacing the backend's failure to the client.

use crate::config::FallbackConfig;
use crate::error::GatewayError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackendErrorCategory {
    SeekTimeError,
    InvalidModeError,
    VideoNotReadable,
    InvalidParameterError,
    CodecError,
    TimeFormatError,
    ResourceLimitError,
    DurationLimit,
    FileSizeLimit,
}

pub struct TextClassification {
    pub category: BackendErrorCategory,
    pub message: &'static str,
    pub parameter: Option<String>,
}

/// String-match the backend's error-text patterns (spec §4.K.1).
pub fn classify_error_text(text: &str) -> Option<TextClassification> {
    let lower = text.to_lowercase();
    let (category, message) = if lower.contains("seek") && lower.contains("time") {
        (BackendErrorCategory::SeekTimeError, "the requested seek time is out of range")
    } else if lower.contains("invalid mode") {
        (BackendErrorCategory::InvalidModeError, "the requested mode is not supported")
    } else if lower.contains("not readable") || lower.contains("unreadable") {
        (BackendErrorCategory::VideoNotReadable, "the source video could not be read")
    } else if lower.contains("invalid parameter") || lower.contains("invalid option") {
        (BackendErrorCategory::InvalidParameterError, "one or more parameters were rejected")
    } else if lower.contains("codec") {
        (BackendErrorCategory::CodecError, "the source video uses an unsupported codec")
    } else if lower.contains("time format") || lower.contains("invalid duration") {
        (BackendErrorCategory::TimeFormatError, "a time or duration value was malformed")
    } else if lower.contains("resource limit") || lower.contains("rate limit") {
        (BackendErrorCategory::ResourceLimitError, "the backend is over its resource limit")
    } else if lower.contains("duration limit") {
        (BackendErrorCategory::DurationLimit, "the requested duration exceeds the allowed limit")
    } else if lower.contains("file size") || lower.contains("too large") {
        (BackendErrorCategory::FileSizeLimit, "the source file exceeds the allowed size")
    } else {
        return None;
    };

    let parameter = extract_parameter_name(&lower);
    Some(TextClassification { category, message, parameter })
}

fn extract_parameter_name(lower: &str) -> Option<String> {
    const KNOWN: &[&str] = &["width", "height", "time", "duration", "format", "fit", "quality"];
    KNOWN.iter().find(|p| lower.contains(*p)).map(|p| p.to_string())
}

#[derive(Debug, Clone, Copy)]
pub struct CodeVerdict {
    pub retryable: bool,
    pub should_fallback: bool,
    pub status: u16,
}

/// The fixed 12-entry table of backend numeric error codes from the
/// `Cf-Resized: err=<code>` header (spec §6).
pub fn classify_error_code(code: u16) -> CodeVerdict {
    match code {
        9401 => CodeVerdict { retryable: false, should_fallback: true, status: 400 }, // invalid options
        9402 => CodeVerdict { retryable: true, should_fallback: true, status: 502 },  // origin too large/no response
        9404 => CodeVerdict { retryable: false, should_fallback: false, status: 404 }, // resource not found
        9406 => CodeVerdict { retryable: false, should_fallback: true, status: 400 }, // malformed URL
        9407 => CodeVerdict { retryable: true, should_fallback: true, status: 502 },  // DNS error
        9408 => CodeVerdict { retryable: false, should_fallback: true, status: 400 }, // origin client error
        9412 => CodeVerdict { retryable: false, should_fallback: true, status: 415 }, // origin not media
        9419 => CodeVerdict { retryable: false, should_fallback: true, status: 400 }, // URL format error
        9504 => CodeVerdict { retryable: true, should_fallback: true, status: 504 },  // origin unreachable
        9509 => CodeVerdict { retryable: true, should_fallback: true, status: 502 },  // origin server error
        9517 | 9523 => CodeVerdict { retryable: true, should_fallback: false, status: 500 }, // internal errors
        _ => CodeVerdict { retryable: true, should_fallback: true, status: 502 }, // unknown: fail-safe
    }
}

/// Parse `Cf-Resized: err=<code>` into a numeric code.
pub fn parse_backend_error_header(value: &str) -> Option<u16> {
    value.strip_prefix("err=")?.trim().parse().ok()
}

/// Decide whether a failed request should fall back to fetching the
/// resolved source URL directly (spec §4.K, testable property 10).
///
/// `backend_code` is `Some` only for processing errors carrying a
/// backend numeric code; our own `ValidationError`s (always 400-class)
/// are eligible for fallback without consulting the code table.
pub fn should_fallback(error: &GatewayError, backend_code: Option<u16>, fallback: &FallbackConfig) -> bool {
    if !fallback.enabled {
        return false;
    }
    let status = error.status_code().as_u16();
    let is_400_class = (400..500).contains(&status);

    if fallback.bad_request_only && !is_400_class {
        return false;
    }

    match backend_code {
        Some(code) => classify_error_code(code).should_fallback,
        None => matches!(error, GatewayError::Validation(_)) || is_400_class,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{GatewayError, ValidationError};

    #[test]
    fn s5_400_with_known_code_triggers_fallback_when_enabled() {
        let fallback = FallbackConfig { enabled: true, bad_request_only: true, preserve_headers: vec![] };
        let error = GatewayError::Validation(ValidationError::InvalidDimension { field: "width", value: 3000 });
        assert!(should_fallback(&error, Some(9401), &fallback));
    }

    #[test]
    fn bad_request_only_excludes_500_class() {
        let fallback = FallbackConfig { enabled: true, bad_request_only: true, preserve_headers: vec![] };
        let error = GatewayError::Processing(crate::error::ProcessingError::FetchFailed(502));
        assert!(!should_fallback(&error, Some(9509), &fallback));
    }

    #[test]
    fn disabled_fallback_never_triggers() {
        let fallback = FallbackConfig { enabled: false, bad_request_only: false, preserve_headers: vec![] };
        let error = GatewayError::Validation(ValidationError::InvalidMode("x".to_string()));
        assert!(!should_fallback(&error, Some(9401), &fallback));
    }

    #[test]
    fn unknown_code_is_fail_safe_retryable_and_fallback() {
        let verdict = classify_error_code(1234);
        assert!(verdict.retryable);
        assert!(verdict.should_fallback);
    }

    #[test]
    fn text_classifier_extracts_offending_parameter() {
        let c = classify_error_text("invalid parameter: width must be positive").unwrap();
        assert_eq!(c.category, BackendErrorCategory::InvalidParameterError);
        assert_eq!(c.parameter.as_deref(), Some("width"));
    }

    #[test]
    fn not_found_code_never_falls_back() {
        let verdict = classify_error_code(9404);
        assert!(!verdict.should_fallback);
    }
}
