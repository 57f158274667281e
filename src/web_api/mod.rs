//! WebAPI - HTTP & WebSocket Endpoints
//!
//! ## Responsibilities
//!
//! - Health and service status
//! - Manual reading injection (out-of-band ingest)
//! - WebSocket subscription endpoint feeding the RealtimeHub

mod routes;

pub use routes::create_router;

use axum::extract::State;
use axum::response::IntoResponse;
use axum::Json;

use crate::models::HealthResponse;
use crate::state::AppState;

/// Health check endpoint
pub async fn health_check(State(state): State<AppState>) -> impl IntoResponse {
    let response = HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        appliance_connected: state.ai_client.is_connected().await,
        db_connected: true, // If we got here, DB is connected
    };

    Json(response)
}
