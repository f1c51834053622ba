//! Top-level error taxonomy for the gateway.
//!
//! Every error that can reach the edge of the request pipeline is a
//! variant here (or wraps one), so `handler` (§4.M) has exactly one type
//! to turn into an HTTP response.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;
use thiserror::Error;

/// Client-facing validation failures (HTTP 400).
#[derive(Error, Debug, Clone)]
pub enum ValidationError {
    #[error("invalid mode: {0}")]
    InvalidMode(String),
    #[error("invalid dimension: {field}={value}")]
    InvalidDimension { field: &'static str, value: i64 },
    #[error("invalid time value: {0}")]
    InvalidTimeValue(String),
    #[error("missing required parameter: {0}")]
    MissingRequiredParameter(&'static str),
    #[error("invalid option combination: {0}")]
    InvalidOptionCombination(String),
}

/// Failures while resolving an origin/source for a request path.
#[derive(Error, Debug, Clone)]
pub enum OriginError {
    #[error("no origin matched path: {path}")]
    OriginNotFound { path: String },
    #[error("failed to resolve a usable source for origin {origin}")]
    SourceResolutionFailed { origin: String },
    #[error("source type not supported: {source_type} (origin {origin})")]
    SourceTypeNotSupported { origin: String, source_type: String },
    #[error("failed to resolve path template for origin {origin}: {reason}")]
    PathResolutionFailed { origin: String, reason: String },
    #[error("auth configuration error for origin {origin}: {reason}")]
    AuthConfigurationError { origin: String, reason: String },
    #[error("origin {origin} failed validation: {reason}")]
    OriginValidationFailed { origin: String, reason: String },
}

/// Failures while invoking the transformation backend.
#[derive(Error, Debug, Clone)]
pub enum ProcessingError {
    #[error("fetch failed with status {0}")]
    FetchFailed(u16),
    #[error("transformation failed: {0}")]
    TransformationFailed(String),
}

#[derive(Error, Debug, Clone)]
pub enum NotFoundError {
    #[error("no pattern matched path: {0}")]
    PatternNotFound(String),
    #[error("resource not found")]
    ResourceNotFound,
}

#[derive(Error, Debug, Clone)]
pub enum ConfigurationError {
    #[error("missing configuration property: {0}")]
    MissingProperty(String),
    #[error("invalid configuration: {0}")]
    Invalid(String),
}

/// Internal cache-layer failures. These must never surface to the
/// client: the orchestrator (§4.G) catches them and falls through to
/// origin, or logs and continues.
#[derive(Error, Debug, Clone)]
pub enum CacheError {
    #[error("chunk size mismatch at index {index}: expected {expected}, got {actual}")]
    ChunkSizeMismatch {
        index: usize,
        expected: usize,
        actual: usize,
    },
    #[error("manifest parse error: {0}")]
    ManifestParseError(String),
    #[error("versioning failure: {0}")]
    VersioningFailure(String),
    #[error("backend error: {0}")]
    Backend(String),
}

#[derive(Error, Debug, Clone)]
pub enum GatewayError {
    #[error(transparent)]
    Validation(#[from] ValidationError),
    #[error(transparent)]
    Origin(#[from] OriginError),
    #[error(transparent)]
    Processing(#[from] ProcessingError),
    #[error(transparent)]
    NotFound(#[from] NotFoundError),
    #[error(transparent)]
    Configuration(#[from] ConfigurationError),
    #[error(transparent)]
    Cache(#[from] CacheError),
    #[error("network error: {0}")]
    Network(String),
}

impl GatewayError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            GatewayError::Validation(_) => StatusCode::BAD_REQUEST,
            GatewayError::Origin(e) => match e {
                OriginError::OriginNotFound { .. } => StatusCode::NOT_FOUND,
                _ => StatusCode::INTERNAL_SERVER_ERROR,
            },
            GatewayError::Processing(e) => match e {
                ProcessingError::FetchFailed(status) => {
                    StatusCode::from_u16(*status).unwrap_or(StatusCode::BAD_GATEWAY)
                }
                ProcessingError::TransformationFailed(_) => StatusCode::INTERNAL_SERVER_ERROR,
            },
            GatewayError::NotFound(_) => StatusCode::NOT_FOUND,
            GatewayError::Configuration(_) => StatusCode::INTERNAL_SERVER_ERROR,
            GatewayError::Cache(_) => StatusCode::INTERNAL_SERVER_ERROR,
            GatewayError::Network(_) => StatusCode::BAD_GATEWAY,
        }
    }

    /// A short machine-readable discriminant for `X-Error-Type` and
    /// the classifier's `X-Original-Error-Type` header.
    pub fn error_type(&self) -> &'static str {
        match self {
            GatewayError::Validation(e) => match e {
                ValidationError::InvalidMode(_) => "INVALID_MODE",
                ValidationError::InvalidDimension { .. } => "INVALID_DIMENSION",
                ValidationError::InvalidTimeValue(_) => "INVALID_TIME_VALUE",
                ValidationError::MissingRequiredParameter(_) => "MISSING_REQUIRED_PARAMETER",
                ValidationError::InvalidOptionCombination(_) => "INVALID_OPTION_COMBINATION",
            },
            GatewayError::Origin(e) => match e {
                OriginError::OriginNotFound { .. } => "ORIGIN_NOT_FOUND",
                OriginError::SourceResolutionFailed { .. } => "SOURCE_RESOLUTION_FAILED",
                OriginError::SourceTypeNotSupported { .. } => "SOURCE_TYPE_NOT_SUPPORTED",
                OriginError::PathResolutionFailed { .. } => "PATH_RESOLUTION_FAILED",
                OriginError::AuthConfigurationError { .. } => "AUTH_CONFIGURATION_ERROR",
                OriginError::OriginValidationFailed { .. } => "ORIGIN_VALIDATION_FAILED",
            },
            GatewayError::Processing(e) => match e {
                ProcessingError::FetchFailed(_) => "FETCH_FAILED",
                ProcessingError::TransformationFailed(_) => "TRANSFORMATION_FAILED",
            },
            GatewayError::NotFound(e) => match e {
                NotFoundError::PatternNotFound(_) => "PATTERN_NOT_FOUND",
                NotFoundError::ResourceNotFound => "RESOURCE_NOT_FOUND",
            },
            GatewayError::Configuration(_) => "CONFIGURATION_ERROR",
            GatewayError::Cache(_) => "CACHE_ERROR",
            GatewayError::Network(_) => "NETWORK_ERROR",
        }
    }
}

#[derive(Serialize)]
struct ErrorBody<'a> {
    error: &'a str,
    message: String,
    #[serde(rename = "statusCode")]
    status_code: u16,
}

impl IntoResponse for GatewayError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let error_type = self.error_type();
        let body = ErrorBody {
            error: error_type,
            message: self.to_string(),
            status_code: status.as_u16(),
        };
        let mut response = (status, Json(body)).into_response();
        if let Ok(v) = axum::http::HeaderValue::from_str(error_type) {
            response.headers_mut().insert("X-Error-Type", v);
        }
        response
    }
}

pub type Result<T> = std::result::Result<T, GatewayError>;
