use axum::{middleware::from_fn_with_state, routing::get, Router};
use kv_store::{InMemoryKv, KvStore, RedisKv};
use std::net::SocketAddr;
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tracing_subscriber::EnvFilter;

use gateway_rs::config::{Config, KvBackend};
use gateway_rs::routes::{health, router, GatewayState};

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    tracing::info!("Starting gateway service...");

    let config = Config::from_env().expect("Failed to load configuration from environment");

    let kv: Arc<dyn KvStore> = match config.kv_backend {
        KvBackend::InMemory => {
            tracing::info!("Using InMemory KV store");
            Arc::new(InMemoryKv::new())
        }
        KvBackend::Redis => {
            tracing::info!(redis_url = %config.redis_url, "Connecting to Redis");
            Arc::new(
                RedisKv::connect(&config.redis_url)
                    .await
                    .expect("Failed to connect to Redis"),
            )
        }
    };

    let state = GatewayState::new(
        kv,
        config.api_key.clone(),
        config.orchestrator_url.clone(),
        config.rate_limit_per_minute,
        config.idempotency_ttl_seconds,
        config.service_name.clone(),
    );

    let metrics_ctx = telemetry::middleware::HttpMetricsCtx::new(config.service_name.clone());
    let app = Router::new()
        .route("/health", get(health))
        .route("/metrics", get(telemetry::metrics_handler))
        .merge(router(state))
        .layer(from_fn_with_state(
            metrics_ctx,
            telemetry::middleware::track_http,
        ))
        .layer(CorsLayer::permissive());

    let addr = SocketAddr::from(([0, 0, 0, 0], config.port));
    tracing::info!("Gateway listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .expect("Failed to bind address");

    axum::serve(listener, app)
        .await
        .expect("Server failed to start");
}
