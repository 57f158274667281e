//! Flowserver - Realtime River Flow Monitoring
//!
//! Main entry point for the flow monitoring service.

use flowserver::{
    ai_client::AiClient,
    alert_engine::AlertEngine,
    flow_buffer::FlowBuffer,
    flow_store::{FlowStore, MySqlFlowStore},
    ingest_service::IngestService,
    realtime_hub::{HubMessage, RealtimeHub},
    state::{AppConfig, AppState},
    web_api,
};
use sqlx::mysql::MySqlPoolOptions;
use std::sync::Arc;
use std::time::Duration;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env if present
    dotenvy::dotenv().ok();

    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "flowserver=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("Starting Flowserver v{}", env!("CARGO_PKG_VERSION"));

    // Load configuration
    let config = AppConfig::default();
    tracing::info!(
        database_url = %config.database_url,
        ai_host = %config.ai_host,
        ai_port = config.ai_port,
        window_secs = config.window_secs,
        flow_uid = config.flow_uid,
        "Configuration loaded"
    );

    // Create database pool
    let pool = MySqlPoolOptions::new()
        .max_connections(10)
        .acquire_timeout(Duration::from_secs(10))
        .connect(&config.database_url)
        .await?;

    tracing::info!("Database connected");

    // Initialize components
    let store: Arc<dyn FlowStore> = Arc::new(MySqlFlowStore::new(pool.clone(), config.flow_uid));
    let hub = Arc::new(RealtimeHub::new());

    let buffer = Arc::new(FlowBuffer::new(store.clone(), config.window_secs));
    let alerts = Arc::new(AlertEngine::new(store.clone(), hub.clone()));
    let ingest = Arc::new(IngestService::new(buffer, alerts, hub.clone()));
    tracing::info!("Pipeline components initialized (FlowBuffer, AlertEngine, IngestService)");

    let ai_client = Arc::new(AiClient::new(
        config.ai_host.clone(),
        config.ai_port,
        config.client_id.clone(),
        ingest.clone(),
    ));

    // Create application state
    let state = AppState {
        pool,
        config,
        hub,
        ingest,
        ai_client: ai_client.clone(),
    };

    // Start the appliance client (reconnects until stopped)
    ai_client.start().await;
    tracing::info!("AI client started - appliance ingest active");

    // Periodic system status broadcast for dashboards
    let status_hub = state.hub.clone();
    let status_ingest = state.ingest.clone();
    let status_client = state.ai_client.clone();
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(Duration::from_secs(30));
        loop {
            interval.tick().await;
            let status = status_ingest.status().await;
            status_hub
                .broadcast(HubMessage::system_status(serde_json::json!({
                    "appliance_connected": status_client.is_connected().await,
                    "connection_state": status_client.connection_state().await,
                    "buffer_count": status.buffer_status.buffer_count,
                    "connected_websockets": status.connected_subscribers,
                })))
                .await;
        }
    });

    // Create router
    let app = web_api::create_router(state.clone())
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .layer(TraceLayer::new_for_http());

    // Start server
    let addr = format!("{}:{}", state.config.host, state.config.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!("Listening on {}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            tracing::info!("Shutdown signal received");
        })
        .await?;

    // Un-flushed window data is dropped here; at most one partial
    // window is lost on shutdown.
    ai_client.stop().await;

    Ok(())
}
