use axum::{middleware::from_fn_with_state, routing::get, Json, Router};
use event_bus::{EventBus, InMemoryBus, NatsBus};
use std::net::SocketAddr;
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tracing_subscriber::EnvFilter;

use provider_rs::config::{BusType, Config};
use provider_rs::{db, start_authorize_consumer, ProviderAdapterService, SimulatedProvider};

async fn health() -> Json<serde_json::Value> {
    Json(serde_json::json!({ "ok": true }))
}

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    tracing::info!("Starting provider adapter service...");

    let config = Config::from_env().expect("Failed to load configuration from environment");

    let pool = db::create_pool(&config.database_url)
        .await
        .expect("Failed to connect to database");

    db::run_migrations(&pool)
        .await
        .expect("Failed to run migrations");

    let bus: Arc<dyn EventBus> = match config.bus_type {
        BusType::InMemory => {
            tracing::info!("Using InMemory event bus");
            Arc::new(InMemoryBus::new())
        }
        BusType::Nats => {
            tracing::info!(nats_url = %config.nats_url, "Connecting to NATS");
            let client = async_nats::connect(&config.nats_url)
                .await
                .expect("Failed to connect to NATS");
            Arc::new(NatsBus::new(client))
        }
    };

    let service = Arc::new(ProviderAdapterService::new(
        pool.clone(),
        config.service_name.clone(),
        Arc::new(SimulatedProvider::new()),
    ));

    tokio::spawn(outbox::run_outbox_publisher(
        pool.clone(),
        bus.clone(),
        config.service_name.clone(),
        outbox::PublisherConfig::default(),
    ));
    start_authorize_consumer(bus.clone(), service).await;

    let metrics_ctx = telemetry::middleware::HttpMetricsCtx::new(config.service_name.clone());
    let app = Router::new()
        .route("/health", get(health))
        .route("/metrics", get(telemetry::metrics_handler))
        .layer(from_fn_with_state(
            metrics_ctx,
            telemetry::middleware::track_http,
        ))
        .layer(CorsLayer::permissive());

    let addr = SocketAddr::from(([0, 0, 0, 0], config.port));
    tracing::info!("Provider adapter listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .expect("Failed to bind address");

    axum::serve(listener, app)
        .await
        .expect("Server failed to start");
}
