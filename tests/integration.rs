use axum::body::Body;
use axum::http::{Request, StatusCode};
use axum::routing::get;
use axum::Router;
use std::sync::Arc;
use tower::util::ServiceExt; // for `oneshot`
use vtgateway::config::{
    CacheConfig, DebugConfig, FallbackConfig, GatewayConfig, OriginConfig, SourceConfig, TtlConfig,
    VideoConfig,
};
use vtgateway::{router, GatewayState};

fn disable_rate_limit() {
    std::env::set_var("DISABLE_RATE_LIMIT", "1");
}

fn bucket_origin() -> GatewayConfig {
    GatewayConfig {
        origins: vec![OriginConfig {
            name: "videos".to_string(),
            matcher: r"^/videos/(.+)$".to_string(),
            capture_groups: vec![Some("id".to_string())],
            sources: vec![SourceConfig::Bucket {
                priority: 0,
                path_template: None,
                bucket_binding: "VIDEOS".to_string(),
            }],
            ttl: TtlConfig::default(),
            transform_defaults: None,
        }],
        cache: CacheConfig::default(),
        video: VideoConfig::default(),
        debug: DebugConfig::default(),
    }
}

fn remote_origin(url: &str) -> GatewayConfig {
    GatewayConfig {
        origins: vec![OriginConfig {
            name: "videos".to_string(),
            matcher: r"^/videos/(.+)$".to_string(),
            capture_groups: vec![Some("id".to_string())],
            sources: vec![SourceConfig::Remote {
                priority: 0,
                path_template: None,
                url: url.to_string(),
                auth: None,
            }],
            ttl: TtlConfig::default(),
            transform_defaults: None,
        }],
        cache: CacheConfig {
            fallback: FallbackConfig {
                enabled: true,
                bad_request_only: true,
                preserve_headers: vec!["Content-Type".to_string(), "Content-Length".to_string()],
            },
            ..CacheConfig::default()
        },
        video: VideoConfig::default(),
        debug: DebugConfig::default(),
    }
}

/// Spins up a minimal local "transformation backend" standing in for the
/// real `/cdn-cgi/media/...` service, so the gateway's fetch path has
/// something real to call without a mocking crate.
async fn spawn_backend(status: StatusCode, content_type: &'static str, body: Vec<u8>, cf_resized: Option<&'static str>) -> String {
    let app = Router::new().route(
        "/cdn-cgi/media/*rest",
        get(move || {
            let body = body.clone();
            async move {
                let mut builder = axum::response::Response::builder()
                    .status(status)
                    .header("content-type", content_type);
                if let Some(code) = cf_resized {
                    builder = builder.header("Cf-Resized", code);
                }
                builder.body(Body::from(body)).unwrap()
            }
        }),
    );
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    format!("http://{}", addr)
}

fn build_state(
    config: GatewayConfig,
    backend_base: String,
) -> (Arc<GatewayState>, tempfile::TempDir, tempfile::TempDir) {
    let kv_dir = tempfile::tempdir().unwrap();
    let version_dir = tempfile::tempdir().unwrap();
    let state = Arc::new(
        GatewayState::new(config, kv_dir.path(), version_dir.path(), backend_base).unwrap(),
    );
    (state, kv_dir, version_dir)
}

#[tokio::test]
async fn health_endpoint_returns_ok() {
    disable_rate_limit();
    let (state, _kv, _ver) = build_state(bucket_origin(), "http://127.0.0.1:1".to_string());
    let app = router(state);

    let response = app
        .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn unmatched_path_returns_404() {
    disable_rate_limit();
    let (state, _kv, _ver) = build_state(bucket_origin(), "http://127.0.0.1:1".to_string());
    let app = router(state);

    let response = app
        .oneshot(Request::builder().uri("/images/a.jpg").body(Body::empty()).unwrap())
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

/// S1 — first request misses the KV cache and is served from the
/// backend; an identical second request is served from KV.
#[tokio::test]
async fn miss_then_hit_reports_cache_status() {
    disable_rate_limit();
    let body = vec![9u8; 1024 * 1024];
    let backend = spawn_backend(StatusCode::OK, "video/mp4", body.clone(), None).await;
    let (state, _kv, _ver) = build_state(bucket_origin(), backend);
    let app = router(state);

    let first = app
        .clone()
        .oneshot(
            Request::builder()
                .uri("/videos/a.mp4?width=640&height=360")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(first.status(), StatusCode::OK);
    assert_eq!(first.headers().get("x-cache").unwrap(), "KV-MISS");
    assert_eq!(first.headers().get("x-cache-version").unwrap(), "v1");
    let first_body = axum::body::to_bytes(first.into_body(), usize::MAX).await.unwrap();
    assert_eq!(first_body.len(), body.len());

    // The write-back runs in a spawned task; give it a tick before the
    // second request goes looking for it in KV.
    tokio::time::sleep(std::time::Duration::from_millis(100)).await;

    let second = app
        .oneshot(
            Request::builder()
                .uri("/videos/a.mp4?width=640&height=360")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(second.status(), StatusCode::OK);
    assert_eq!(second.headers().get("x-cache").unwrap(), "KV-HIT");
    let second_body = axum::body::to_bytes(second.into_body(), usize::MAX).await.unwrap();
    assert_eq!(second_body.as_ref(), first_body.as_ref());
}

/// S4 — a range request against a cached body returns 206 with the
/// requested byte window.
#[tokio::test]
async fn range_request_serves_partial_content() {
    disable_rate_limit();
    let body = vec![3u8; 2 * 1024 * 1024];
    let backend = spawn_backend(StatusCode::OK, "video/mp4", body, None).await;
    let (state, _kv, _ver) = build_state(bucket_origin(), backend);
    let app = router(state);

    // Warm the cache first.
    let warm = app
        .clone()
        .oneshot(
            Request::builder()
                .uri("/videos/b.mp4")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(warm.status(), StatusCode::OK);

    let ranged = app
        .oneshot(
            Request::builder()
                .uri("/videos/b.mp4")
                .header("Range", "bytes=0-1023")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(ranged.status(), StatusCode::PARTIAL_CONTENT);
    assert_eq!(ranged.headers().get("content-length").unwrap(), "1024");
    assert_eq!(
        ranged.headers().get("content-range").unwrap(),
        "bytes 0-1023/2097152"
    );
    let ranged_body = axum::body::to_bytes(ranged.into_body(), usize::MAX).await.unwrap();
    assert_eq!(ranged_body.len(), 1024);
}

/// S5 — a request rejected by local validation (width over the allowed
/// maximum) serves the resolved source directly instead of surfacing a
/// 400 to the client, since `badRequestOnly` fallback is enabled.
#[tokio::test]
async fn fallback_serves_source_directly_on_validation_rejection() {
    disable_rate_limit();
    let origin_body = b"raw source bytes".to_vec();
    // The fallback fetch hits the resolved source URL directly (origin
    // base + matched path); the transform backend is never called, since
    // validation rejects the request before `with_caching` runs.
    let origin_app = Router::new().route(
        "/videos/a.mp4",
        get(move || {
            let body = origin_body.clone();
            async move { (StatusCode::OK, [("content-type", "video/mp4")], body) }
        }),
    );
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let origin_addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, origin_app).await.unwrap();
    });
    let origin_url = format!("http://{}", origin_addr);

    let (state, _kv, _ver) = build_state(remote_origin(&origin_url), "http://127.0.0.1:1".to_string());
    let app = router(state);

    let response = app
        .oneshot(
            Request::builder()
                .uri("/videos/a.mp4?width=3000")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(response.headers().get("x-fallback-applied").unwrap(), "true");
    assert_eq!(
        response.headers().get("x-original-error-type").unwrap(),
        "INVALID_DIMENSION"
    );
    assert!(response.headers().contains_key("x-fallback-reason"));
}

#[tokio::test]
async fn cache_stats_endpoint_reports_counts() {
    disable_rate_limit();
    let (state, _kv, _ver) = build_state(bucket_origin(), "http://127.0.0.1:1".to_string());
    let app = router(state);

    let response = app
        .oneshot(Request::builder().uri("/stats/cache").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let body = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
    assert!(json["inFlight"].is_number());
    assert!(json["kvEntries"].is_number());
}

#[tokio::test]
async fn metrics_endpoint_emits_prometheus_text() {
    disable_rate_limit();
    let (state, _kv, _ver) = build_state(bucket_origin(), "http://127.0.0.1:1".to_string());
    let app = router(state);

    let response = app
        .oneshot(Request::builder().uri("/metrics").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        response.headers().get("content-type").unwrap(),
        "text/plain; version=0.0.4"
    );
}
