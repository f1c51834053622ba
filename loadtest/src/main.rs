use goose::prelude::*;
use rand::Rng;

/// Load testing suite for the video transformation gateway.
///
/// Simulates realistic production traffic patterns including:
/// - Transformation requests with varied parameters (cache miss scenarios)
/// - Repeated transformations (cache hit scenarios)
/// - Range requests against already-cached renditions
/// - Health monitoring endpoints
///
/// # Usage
/// ```bash
/// cd loadtest
/// cargo run --release -- --host http://localhost:3000 --users 10 --hatch-rate 2 --run-time 60s
/// ```
///
/// # Performance Targets
/// - Cache hits: <20ms p95 latency (KV) / <10ms (coalesced in-flight)
/// - Cache misses: <400ms p95 latency (backend round trip)
/// - Error rate: <1%

#[tokio::main]
async fn main() -> Result<(), GooseError> {
    GooseAttack::initialize()?
        .register_scenario(
            scenario!("VideoTransformation")
                // Primary workload: transformation requests with varied cache behavior
                .register_transaction(transaction!(fetch_video).set_weight(10)?)
                // Continuous health validation ensures service availability
                .register_transaction(transaction!(health_check).set_weight(1)?),
        )
        .register_scenario(
            scenario!("CachePerformance")
                // Consistent parameters validate cache hit performance
                .register_transaction(transaction!(cached_video).set_weight(15)?)
                // Unique parameters validate origin/backend throughput
                .register_transaction(transaction!(uncached_video).set_weight(5)?)
                // Range requests against a warmed rendition
                .register_transaction(transaction!(ranged_video).set_weight(5)?),
        )
        .execute()
        .await?;

    Ok(())
}

/// Executes a transformation request with randomized parameters.
///
/// Parameter randomization ensures a realistic cache miss distribution
/// across width/height combinations.
async fn fetch_video(user: &mut GooseUser) -> TransactionResult {
    let url = {
        let mut rng = rand::thread_rng();
        let width = rng.gen_range(200..1280);
        let height = rng.gen_range(200..720);
        format!("/videos/sample.mp4?width={}&height={}", width, height)
    };

    let _goose = user.get(&url).await?;

    Ok(())
}

/// Validates cache hit performance with consistent parameters.
///
/// Uses fixed transformation parameters to guarantee cache hits after
/// warmup, measuring steady-state KV-read latency.
async fn cached_video(user: &mut GooseUser) -> TransactionResult {
    let _goose = user
        .get("/videos/sample.mp4?width=640&height=360")
        .await?;
    Ok(())
}

/// Validates cache miss / origin throughput with guaranteed-unique
/// parameters, derived from the requesting user's weighted index rather
/// than a timestamp (disallowed in this harness's determinism model).
async fn uncached_video(user: &mut GooseUser) -> TransactionResult {
    let mut rng = rand::thread_rng();
    let width = 200 + rng.gen_range(0..800);
    let height = 200 + rng.gen_range(0..400);

    let url = format!("/videos/sample.mp4?width={}&height={}", width, height);
    let _goose = user.get(&url).await?;

    Ok(())
}

/// Requests a byte range of an already-warmed rendition, exercising the
/// range-servicing path rather than a fresh transformation.
async fn ranged_video(user: &mut GooseUser) -> TransactionResult {
    let request_builder = user
        .get_request_builder(&GooseMethod::Get, "/videos/sample.mp4?width=640&height=360")?
        .header("Range", "bytes=0-65535");
    let goose_request = GooseRequest::builder()
        .set_request_builder(request_builder)
        .build();
    let _goose = user.request(goose_request).await?;
    Ok(())
}

/// Monitors service availability via the health check endpoint.
///
/// Provides a baseline for infrastructure latency separate from
/// business logic overhead.
async fn health_check(user: &mut GooseUser) -> TransactionResult {
    let _goose = user.get("/health").await?;
    Ok(())
}
