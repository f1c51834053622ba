pub mod cache;
pub mod classify;
pub mod config;
pub mod diagnostics;
pub mod error;
pub mod fetch;
pub mod metrics;
pub mod options;
pub mod origin;
pub mod range;
pub mod transform;

use crate::cache::coalesce::{Coalescer, OriginResponse};
use crate::cache::kv::KvChunkedStore;
use crate::cache::orchestrator::{CacheOrchestrator, CacheStatus};
use crate::cache::version::VersionService;
use crate::config::GatewayConfig;
use crate::diagnostics::DiagnosticsRecord;
use crate::error::GatewayError;
use crate::metrics::Metrics;
use crate::options::resolver::{self, ResolveInput};
use crate::options::translator;
use crate::range::apply_range;
use crate::transform::invoker::{build_backend_url, NetworkQuality, TransformInvoker};

use axum::{
    body::Body,
    extract::{Path, Query, RawQuery, State},
    http::{HeaderMap, HeaderValue, StatusCode},
    response::{Html, IntoResponse, Response},
    routing::get,
    Json, Router,
};
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};
use std::time::Instant;
use tower_governor::{governor::GovernorConfigBuilder, GovernorLayer};
use uuid::Uuid;

/// Shared, read-only-after-load application state. `config` would swap
/// atomically behind an `Arc` on a reload (the admin upload endpoint
/// that would trigger it is an external collaborator, out of scope).
pub struct GatewayState {
    pub config: Arc<GatewayConfig>,
    pub orchestrator: Arc<CacheOrchestrator>,
    pub transform_invoker: Arc<TransformInvoker>,
    pub fetch_client: reqwest::Client,
    pub metrics: Arc<Metrics>,
    pub backend_base: String,
}

impl GatewayState {
    pub fn new(config: GatewayConfig, kv_path: impl AsRef<std::path::Path>, version_path: impl AsRef<std::path::Path>, backend_base: String) -> Result<Self, error::ConfigurationError> {
        config.validate()?;
        let kv = Arc::new(
            KvChunkedStore::open(kv_path).map_err(|e| error::ConfigurationError::Invalid(e.to_string()))?,
        );
        let version_service = Arc::new(
            VersionService::open(version_path).map_err(|e| error::ConfigurationError::Invalid(e.to_string()))?,
        );
        let coalescer = Arc::new(Coalescer::new());
        Ok(Self {
            config: Arc::new(config),
            orchestrator: Arc::new(CacheOrchestrator::new(kv, coalescer, version_service)),
            transform_invoker: Arc::new(TransformInvoker::new()),
            fetch_client: reqwest::Client::new(),
            metrics: Arc::new(Metrics::new()),
            backend_base,
        })
    }
}

/// Holds the numeric backend error code and text-classified message (if
/// any) observed by the coalesced handler closure, so the caller can
/// classify/fall back after `with_caching` returns its error — the
/// closure's return type only carries a `GatewayError`, not arbitrary
/// side channels.
#[derive(Clone, Default)]
struct BackendErrorCapture(Arc<Mutex<(Option<String>, Option<String>)>>);

impl BackendErrorCapture {
    fn set(&self, code: Option<String>, message: Option<String>) {
        *self.0.lock().unwrap() = (code, message);
    }
    fn take(&self) -> (Option<String>, Option<String>) {
        std::mem::take(&mut *self.0.lock().unwrap())
    }
}

fn client_hints_from_headers(headers: &HeaderMap) -> BTreeMap<String, String> {
    let mut hints = BTreeMap::new();
    if let Some(v) = headers.get("Viewport-Width").and_then(|v| v.to_str().ok()) {
        hints.insert("x-viewwidth".to_string(), v.to_string());
    }
    if let Some(v) = headers.get("DPR").and_then(|v| v.to_str().ok()) {
        hints.insert("x-dpr".to_string(), v.to_string());
    }
    hints
}

fn network_quality_from_headers(headers: &HeaderMap) -> NetworkQuality {
    match headers.get("X-Network-Quality").and_then(|v| v.to_str().ok()) {
        Some("slow") => NetworkQuality::Slow,
        Some("fast") => NetworkQuality::Fast,
        Some("ultrafast") => NetworkQuality::Ultrafast,
        _ => NetworkQuality::Medium,
    }
}

/// Module M — Handler Entry. Dispatches a single transformation
/// request through translation, resolution, caching, range handling,
/// and diagnostics, in that order.
async fn handler(
    State(state): State<Arc<GatewayState>>,
    Path(path): Path<String>,
    Query(query): Query<BTreeMap<String, String>>,
    RawQuery(raw_query): RawQuery,
    headers: HeaderMap,
) -> Response {
    let request_start = Instant::now();
    let request_id = Uuid::new_v4().to_string();
    let full_path = format!("/{}", path);
    let mut diagnostics = DiagnosticsRecord::new(format!(
        "{}{}",
        full_path,
        raw_query.map(|q| format!("?{}", q)).unwrap_or_default()
    ));

    let translation = translator::translate(&query);
    diagnostics.original_params = translation.original.clone();
    diagnostics.translated_params = translation.translated.clone();
    diagnostics.warnings = translation.warnings.clone();
    diagnostics.used_im_query = translation.used_im_query;

    let mut client_hints = translation.client_hints.clone();
    client_hints.extend(client_hints_from_headers(&headers));

    let origin_match = match origin::match_origin_strict(&state.config, &full_path) {
        Ok(m) => m,
        Err(e) => return finalize_error(e.into(), diagnostics, &state),
    };
    diagnostics.origin_name = Some(origin_match.origin_name.clone());
    diagnostics.matcher = Some(origin_match.matcher.clone());
    diagnostics.captures = origin_match.captures.clone();

    let resolved = match origin::resolve_source(
        &state.config,
        &origin_match.origin_name,
        &origin_match.captures,
        &full_path,
        None,
    ) {
        Ok(r) => r,
        Err(e) => return finalize_error(e.into(), diagnostics, &state),
    };
    diagnostics.source_type = Some(resolved.source_type.to_string());
    diagnostics.resolved_path = Some(resolved.resolved_path.clone());

    let origin_config = state
        .config
        .origins
        .iter()
        .find(|o| o.name == origin_match.origin_name)
        .expect("origin matched above");

    let derivatives = state.config.video.derivatives_as_strings();
    let resolve_input = ResolveInput {
        origin: origin_config,
        canonical_params: &translation.translated,
        client_hints: &client_hints,
        derivatives: &derivatives,
    };
    let ttl_seconds = origin_config.ttl.ok;
    let source_reference = resolved.url.clone().unwrap_or_else(|| {
        format!(
            "{}/{}",
            resolved.bucket_binding.as_deref().unwrap_or("bucket"),
            resolved.resolved_path.trim_start_matches('/')
        )
    });

    let options = match resolver::resolve(&resolve_input) {
        Ok(o) => o,
        Err(e) => {
            let error = GatewayError::Validation(e);
            // An option that fails validation (e.g. width outside the
            // allowed range) is still fallback-eligible: build a best-
            // effort cache key from the raw translated params so the
            // fallback write-back lands at a reasonable key.
            let raw_options = crate::options::TransformOptions::from_str_map(&translation.translated);
            let key = cache::key::build(&full_path, &raw_options, &query);
            if classify::should_fallback(&error, None, &state.config.cache.fallback) {
                return fallback_response(&state, &source_reference, &key, ttl_seconds, &error, None, None, diagnostics, vec![]).await;
            }
            return finalize_error(error, diagnostics, &state);
        }
    };

    let key = cache::key::build(&full_path, &options, &query);
    let cache_tags = if state.config.cache.enable_cache_tags {
        KvChunkedStore::tags_for(&state.config.cache.cache_tag_prefix, &full_path, options.derivative.as_deref())
    } else {
        vec![]
    };
    diagnostics.backend_url = Some(build_backend_url(
        &state.backend_base,
        &options,
        &source_reference,
        headers.get(axum::http::header::ACCEPT).and_then(|v| v.to_str().ok()),
        network_quality_from_headers(&headers),
    ));

    let backend_error_capture = BackendErrorCapture::default();
    let is_range_request = headers.get(axum::http::header::RANGE).is_some();
    let bypass_query_keys = state.config.cache.bypass_query_keys.clone();
    let outcome = {
        let orchestrator = state.orchestrator.clone();
        let fetch_state = state.clone();
        let options = options.clone();
        let source_reference = source_reference.clone();
        let accept = headers
            .get(axum::http::header::ACCEPT)
            .and_then(|v| v.to_str().ok())
            .map(|s| s.to_string());
        let quality = network_quality_from_headers(&headers);
        let capture = backend_error_capture.clone();
        orchestrator
            .with_caching(
                &key,
                "GET",
                &query,
                &bypass_query_keys,
                ttl_seconds,
                cache_tags.clone(),
                &request_id,
                is_range_request,
                0,
                move || async move {
                    let url = build_backend_url(
                        &fetch_state.backend_base,
                        &options,
                        &source_reference,
                        accept.as_deref(),
                        quality,
                    );
                    match fetch_state.transform_invoker.invoke(&url).await {
                        Ok((resp, _code)) => Ok(resp),
                        Err(failure) => {
                            let message = failure.classification.map(|c| c.message.to_string());
                            capture.set(failure.backend_code_header, message);
                            Err(GatewayError::Processing(failure.error))
                        }
                    }
                },
            )
            .await
    };

    let outcome = match outcome {
        Ok(o) => o,
        Err(e) => {
            let (backend_code, backend_message) = backend_error_capture.take();
            let backend_code = backend_code.and_then(|c| classify::parse_backend_error_header(&c));
            if classify::should_fallback(&e, backend_code, &state.config.cache.fallback) {
                return fallback_response(
                    &state,
                    &source_reference,
                    &key,
                    ttl_seconds,
                    &e,
                    backend_code,
                    backend_message,
                    diagnostics,
                    cache_tags,
                )
                .await;
            }
            return finalize_error(e, diagnostics, &state);
        }
    };

    diagnostics.cache_status = Some(match outcome.status {
        CacheStatus::Hit => "KV-HIT",
        CacheStatus::Miss => "KV-MISS",
        CacheStatus::Bypass => "BYPASS",
    }.to_string());
    diagnostics.version = Some(outcome.version);
    diagnostics.is_first_request = outcome.is_first_request;
    state.metrics.cache_status.with_label_values(&[diagnostics.cache_status.as_deref().unwrap_or("unknown")]).inc();

    diagnostics.record_timing("total", request_start.elapsed());
    finalize_success(outcome.response, outcome.version, ttl_seconds, &headers, diagnostics, query.get("debug").map(|s| s.as_str()).unwrap_or(""))
}

async fn fallback_response(
    state: &Arc<GatewayState>,
    source_reference: &str,
    key: &str,
    ttl_seconds: u64,
    original_error: &GatewayError,
    backend_code: Option<u16>,
    backend_message: Option<String>,
    mut diagnostics: DiagnosticsRecord,
    cache_tags: Vec<String>,
) -> Response {
    let fetched = match fetch::fetch_source(&state.fetch_client, source_reference).await {
        Ok(r) => r,
        Err(_) => return finalize_error(original_error.clone(), diagnostics, state),
    };

    diagnostics.fallback_applied = true;
    diagnostics.push_error(original_error.to_string());
    if let Some(msg) = &backend_message {
        diagnostics.push_error(format!("backend: {}", msg));
    }
    state.metrics.fallbacks_total.with_label_values(&["backend_error"]).inc();

    // "The fallback fetch is itself streamed into KV for future reuse" (spec 4.K).
    {
        let kv = state.orchestrator.kv_store();
        let version_service = state.orchestrator.version_service();
        let key = key.to_string();
        let body = fetched.body.clone();
        let content_type = fetched.content_type.clone();
        tokio::spawn(async move {
            let version = version_service.get_next_version(&key, false).unwrap_or(1);
            if let Err(e) = kv.write(&key, body, &content_type, ttl_seconds, version, cache_tags, 0).await {
                tracing::warn!(error = %e, key, "fallback KV persistence failed");
            }
        });
    }

    let preserve = &state.config.cache.fallback.preserve_headers;
    let mut builder = Response::builder()
        .status(StatusCode::OK)
        .header(axum::http::header::CONTENT_TYPE, fetched.content_type.clone())
        .header(axum::http::header::CONTENT_LENGTH, fetched.body.len());
    for (name, value) in &fetched.headers {
        if preserve.iter().any(|h| h.eq_ignore_ascii_case(name)) {
            if let Ok(v) = HeaderValue::from_str(value) {
                builder = builder.header(name.as_str(), v);
            }
        }
    }
    builder = builder
        .header("X-Fallback-Applied", "true")
        .header("X-Original-Error-Type", original_error.error_type());
    let reason = backend_message.clone().unwrap_or_else(|| original_error.to_string());
    if let Ok(v) = HeaderValue::from_str(&reason) {
        builder = builder.header("X-Fallback-Reason", v);
    }
    if let Some(code) = backend_code {
        builder = builder.header("X-Backend-Error-Code", code.to_string());
    }

    builder.body(Body::from(fetched.body)).unwrap()
}

fn finalize_success(
    origin_response: OriginResponse,
    version: u32,
    ttl_seconds: u64,
    headers: &HeaderMap,
    mut diagnostics: DiagnosticsRecord,
    debug_mode: &str,
) -> Response {
    let body_len = origin_response.body.len();
    let range_result = apply_range(
        headers.get(axum::http::header::RANGE).and_then(|v| v.to_str().ok()),
        Some(body_len),
        &origin_response.body,
    );

    let status = StatusCode::from_u16(range_result.status).unwrap_or(StatusCode::OK);
    let mut builder = Response::builder()
        .status(status)
        .header(axum::http::header::CONTENT_TYPE, origin_response.content_type.clone())
        .header(axum::http::header::CONTENT_LENGTH, range_result.body.len())
        .header("Accept-Ranges", "bytes")
        .header("X-Cache", diagnostics.cache_status.clone().unwrap_or_default())
        .header("X-Cache-Version", format!("v{}", version))
        .header("X-Cache-TTL", ttl_seconds.to_string());

    if let Some(range) = &range_result.content_range {
        builder = builder.header(axum::http::header::CONTENT_RANGE, range.clone());
    }
    if let Some(reason) = range_result.fallback_reason {
        builder = builder.header("X-Range-Fallback", reason.as_str());
    }

    for (name, value) in diagnostics::diagnostic_headers(&diagnostics, debug_mode) {
        if let Ok(v) = HeaderValue::from_str(&value) {
            builder = builder.header(name, v);
        }
    }

    if debug_mode == "view" {
        return Html(diagnostics::render_debug_view(&diagnostics)).into_response();
    }

    diagnostics.record_timing("response", Instant::now().elapsed());
    builder.body(Body::from(range_result.body)).unwrap()
}

fn finalize_error(error: GatewayError, mut diagnostics: DiagnosticsRecord, state: &Arc<GatewayState>) -> Response {
    diagnostics.push_error(error.to_string());
    state.metrics.errors_total.with_label_values(&[error.error_type()]).inc();
    error.into_response()
}

async fn health_handler() -> impl IntoResponse {
    Json(serde_json::json!({ "status": "healthy", "version": env!("CARGO_PKG_VERSION") }))
}

async fn cache_stats_handler(State(state): State<Arc<GatewayState>>) -> impl IntoResponse {
    let in_flight = state.orchestrator.coalescer_len();
    let kv_stats = state.orchestrator.kv_stats();
    Json(serde_json::json!({
        "inFlight": in_flight,
        "kvEntries": kv_stats.entry_count,
        "kvApproxBytes": kv_stats.approx_bytes,
    }))
}

async fn metrics_handler(State(state): State<Arc<GatewayState>>) -> impl IntoResponse {
    (
        StatusCode::OK,
        [("Content-Type", "text/plain; version=0.0.4")],
        state.metrics.encode(),
    )
}

pub fn router(state: Arc<GatewayState>) -> Router {
    let observability = Router::new()
        .route("/health", get(health_handler))
        .route("/stats/cache", get(cache_stats_handler))
        .route("/metrics", get(metrics_handler))
        .with_state(state.clone());

    let mut transform_routes = Router::new()
        .route("/*path", get(handler))
        .with_state(state);

    if std::env::var("DISABLE_RATE_LIMIT").is_err() {
        let governor_conf = Box::new(
            GovernorConfigBuilder::default()
                .per_second(10)
                .burst_size(30)
                .finish()
                .unwrap(),
        );
        transform_routes = transform_routes.layer(GovernorLayer { config: Box::leak(governor_conf) });
    } else {
        tracing::info!("rate limiting disabled");
    }

    Router::new().merge(observability).merge(transform_routes)
}
