//! IngestService - Reading Pipeline Glue
//!
//! ## Responsibilities
//!
//! - Accept decoded readings from the protocol client (and the manual
//!   injection endpoint) in arrival order
//! - Drive the window buffer, the alert engine, and the realtime
//!   KPI broadcast for every reading
//! - Expose the service status snapshot
//!
//! All downstream failures are logged and absorbed; nothing here may
//! terminate the client's read loop.

use crate::alert_engine::AlertEngine;
use crate::flow_buffer::{BufferStatus, FlowBuffer};
use crate::models::SensorReading;
use crate::realtime_hub::{HubMessage, RealtimeHub};
use chrono::Utc;
use serde::Serialize;
use std::sync::Arc;

/// Service status snapshot for the ops surface
#[derive(Debug, Clone, Serialize)]
pub struct IngestStatus {
    pub buffer_status: BufferStatus,
    pub connected_subscribers: u64,
    pub last_update: String,
}

/// IngestService instance
pub struct IngestService {
    buffer: Arc<FlowBuffer>,
    alerts: Arc<AlertEngine>,
    hub: Arc<RealtimeHub>,
}

impl IngestService {
    /// Create new IngestService
    pub fn new(buffer: Arc<FlowBuffer>, alerts: Arc<AlertEngine>, hub: Arc<RealtimeHub>) -> Self {
        Self {
            buffer,
            alerts,
            hub,
        }
    }

    /// Process one reading through the full pipeline.
    ///
    /// The observation timestamp is stamped here, at ingest time.
    pub async fn process_reading(
        &self,
        water_level_m: f64,
        velocity_mps: f64,
        flow_rate_m3ps: f64,
    ) {
        let reading = SensorReading {
            water_level_m,
            velocity_mps,
            flow_rate_m3ps,
            observed_at: Utc::now(),
        };
        let water_level_cm = reading.water_level_cm();

        self.buffer.add(reading).await;

        // Alert evaluation never bubbles failures into the read loop;
        // persist errors are already absorbed inside the engine.
        self.alerts.evaluate(water_level_cm).await;

        if let Some(kpi) = self.buffer.latest_kpi().await {
            self.hub.broadcast(HubMessage::kpi_update(kpi)).await;
        }
    }

    /// Manual out-of-band injection; identical to a decoded frame.
    pub async fn manual_add(&self, water_level_m: f64, velocity_mps: f64, flow_rate_m3ps: f64) {
        self.process_reading(water_level_m, velocity_mps, flow_rate_m3ps)
            .await;
        tracing::info!(
            water_level_m = water_level_m,
            velocity_mps = velocity_mps,
            flow_rate_m3ps = flow_rate_m3ps,
            "Manual reading injected"
        );
    }

    /// Latest KPI slot (None before the first reading)
    pub async fn latest_kpi(&self) -> Option<crate::realtime_hub::KpiUpdate> {
        self.buffer.latest_kpi().await
    }

    /// Service status snapshot
    pub async fn status(&self) -> IngestStatus {
        IngestStatus {
            buffer_status: self.buffer.status().await,
            connected_subscribers: self.hub.connection_count(),
            last_update: Utc::now().to_rfc3339(),
        }
    }
}
