//! API Routes

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        State,
    },
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use chrono::Utc;
use futures::{SinkExt, StreamExt};
use serde::Deserialize;
use serde_json::json;

use crate::error::{Error, Result};
use crate::models::ApiResponse;
use crate::state::AppState;

/// Create API router
pub fn create_router(state: AppState) -> Router {
    Router::new()
        // Health & Status
        .route("/healthz", get(super::health_check))
        .route("/api/ai/status", get(ai_service_status))
        // Ingest (out-of-band / manual injection)
        .route("/api/ai/data/receive", post(receive_reading))
        .route("/api/ai/data/latest", get(latest_reading))
        // WebSocket
        .route("/api/ws", get(websocket_handler))
        .with_state(state)
}

// ========================================
// Status Handlers
// ========================================

async fn ai_service_status(State(state): State<AppState>) -> impl IntoResponse {
    let status = state.ingest.status().await;

    Json(json!({
        "service_status": {
            "connection_state": state.ai_client.connection_state().await,
            "buffer_status": status.buffer_status,
            "connected_websockets": status.connected_subscribers,
            "last_update": status.last_update,
        },
        "timestamp": Utc::now().to_rfc3339(),
    }))
}

// ========================================
// Ingest Handlers
// ========================================

/// Reading payload accepted from external callers; processed
/// identically to a decoded appliance frame.
#[derive(Debug, Deserialize)]
struct ReceiveReadingRequest {
    water_level_m: Option<f64>,
    velocity_mps: Option<f64>,
    flow_rate_m3ps: Option<f64>,
}

async fn receive_reading(
    State(state): State<AppState>,
    Json(req): Json<ReceiveReadingRequest>,
) -> Result<impl IntoResponse> {
    let water_level_m = req
        .water_level_m
        .ok_or_else(|| Error::Validation("missing field: water_level_m".to_string()))?;
    let velocity_mps = req
        .velocity_mps
        .ok_or_else(|| Error::Validation("missing field: velocity_mps".to_string()))?;
    let flow_rate_m3ps = req
        .flow_rate_m3ps
        .ok_or_else(|| Error::Validation("missing field: flow_rate_m3ps".to_string()))?;

    state
        .ingest
        .manual_add(water_level_m, velocity_mps, flow_rate_m3ps)
        .await;

    Ok(Json(ApiResponse::success(json!({
        "water_level_m": water_level_m,
        "velocity_mps": velocity_mps,
        "flow_rate_m3ps": flow_rate_m3ps,
    }))))
}

async fn latest_reading(State(state): State<AppState>) -> impl IntoResponse {
    match state.ingest.latest_kpi().await {
        Some(kpi) => Json(ApiResponse::success(kpi)).into_response(),
        None => Json(ApiResponse::<()>::error("no data available yet")).into_response(),
    }
}

// ========================================
// WebSocket Handler
// ========================================

/// WebSocket upgrade handler
async fn websocket_handler(
    ws: WebSocketUpgrade,
    State(state): State<AppState>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_websocket(socket, state))
}

/// Handle WebSocket connection
async fn handle_websocket(socket: WebSocket, state: AppState) {
    let (mut sender, mut receiver) = socket.split();

    // Register with RealtimeHub
    let (conn_id, mut rx) = state.hub.register().await;

    tracing::info!(connection_id = %conn_id, "WebSocket client connected");

    // Forward hub messages to the socket
    let send_task = tokio::spawn(async move {
        while let Some(msg) = rx.recv().await {
            if sender.send(Message::Text(msg)).await.is_err() {
                break;
            }
        }
    });

    // Handle incoming messages (application-level keep-alive)
    let hub = state.hub.clone();
    let recv_task = tokio::spawn(async move {
        while let Some(result) = receiver.next().await {
            match result {
                Ok(Message::Text(text)) => {
                    if text == "ping" {
                        hub.send_to(&conn_id, "pong").await;
                    }
                }
                Ok(Message::Ping(_)) => {
                    // Pong is handled automatically by axum
                }
                Ok(Message::Close(_)) => {
                    tracing::info!(connection_id = %conn_id, "WebSocket client disconnected");
                    break;
                }
                Err(e) => {
                    tracing::warn!(connection_id = %conn_id, error = %e, "WebSocket error");
                    break;
                }
                _ => {}
            }
        }
        conn_id
    });

    // Wait for either task to complete
    let conn_id = tokio::select! {
        _ = send_task => conn_id,
        result = recv_task => result.unwrap_or(conn_id),
    };

    // Unregister from hub
    state.hub.unregister(&conn_id).await;
}
