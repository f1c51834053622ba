use axum::Router;
use std::net::SocketAddr;
use vtgateway::{config::GatewayConfig, router, GatewayState};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize tracing for observability
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "vtgateway=debug,tower_http=debug".into()),
        )
        .init();

    tracing::info!("Starting video transformation gateway");

    let config_path = std::env::var("GATEWAY_CONFIG").unwrap_or_else(|_| "./gateway.json".to_string());
    let raw_config = std::fs::read_to_string(&config_path).unwrap_or_else(|_| {
        tracing::warn!(path = %config_path, "no config file found, starting with an empty document");
        "{}".to_string()
    });
    let config = GatewayConfig::from_json(&raw_config)?;

    let kv_dir = std::env::var("GATEWAY_KV_DIR").unwrap_or_else(|_| "./data/kv".to_string());
    let version_dir = std::env::var("GATEWAY_VERSION_DIR").unwrap_or_else(|_| "./data/version".to_string());
    let backend_base =
        std::env::var("GATEWAY_BACKEND_BASE").unwrap_or_else(|_| "https://transform.internal".to_string());

    let state = GatewayState::new(config, kv_dir, version_dir, backend_base)?;
    let app = Router::new().merge(router(std::sync::Arc::new(state)));

    // Read port from environment (for Render, Railway, etc.) or default to 8080
    let port = std::env::var("PORT")
        .unwrap_or_else(|_| "8080".to_string())
        .parse::<u16>()
        .unwrap_or(8080);

    // Bind to 0.0.0.0 to accept external connections (required for cloud deployment)
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    tracing::info!("Server listening on {}", addr);
    println!("Server listening on {}", addr);
    axum::serve(tokio::net::TcpListener::bind(addr).await?, app).await?;
    Ok(())
}
