//! RealtimeHub - WebSocket Fan-out
//!
//! ## Responsibilities
//!
//! - Subscriber registry (registration/unregistration from transport
//!   callbacks while broadcasts are in flight)
//! - Message broadcasting to all subscribers
//! - Lazy eviction: a dead subscriber is discovered on its next
//!   delivery attempt and removed after the pass, never mid-pass
//!
//! The hub owns registry entries only; channel receiving halves live
//! with the transport tasks (WebSocket layer).

use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::mpsc;
use tokio::sync::RwLock;
use uuid::Uuid;

/// Realtime KPI snapshot sent to dashboards
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KpiUpdate {
    /// Water level in cm
    pub water_level: f64,
    /// Flow velocity in m/s
    pub flow_velocity: f64,
    /// Discharge in m³/s
    pub discharge: f64,
    /// Observation time (ISO 8601)
    pub timestamp: String,
    pub status: String,
}

/// Hub message types
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
#[serde(rename_all = "snake_case")]
pub enum HubMessage {
    RealtimeKpiUpdate {
        data: KpiUpdate,
        timestamp: String,
    },
    AlertUpdate {
        alert_type: String,
        data: serde_json::Value,
        timestamp: String,
    },
    SystemStatus {
        data: serde_json::Value,
        timestamp: String,
    },
}

impl HubMessage {
    pub fn kpi_update(data: KpiUpdate) -> Self {
        Self::RealtimeKpiUpdate {
            data,
            timestamp: Utc::now().to_rfc3339(),
        }
    }

    pub fn alert_update(alert_type: impl Into<String>, data: serde_json::Value) -> Self {
        Self::AlertUpdate {
            alert_type: alert_type.into(),
            data,
            timestamp: Utc::now().to_rfc3339(),
        }
    }

    pub fn system_status(data: serde_json::Value) -> Self {
        Self::SystemStatus {
            data,
            timestamp: Utc::now().to_rfc3339(),
        }
    }

    fn type_name(&self) -> &'static str {
        match self {
            HubMessage::RealtimeKpiUpdate { .. } => "realtime_kpi_update",
            HubMessage::AlertUpdate { .. } => "alert_update",
            HubMessage::SystemStatus { .. } => "system_status",
        }
    }
}

/// Client connection
struct ClientConnection {
    id: Uuid,
    tx: mpsc::UnboundedSender<String>,
}

/// RealtimeHub instance
pub struct RealtimeHub {
    connections: RwLock<HashMap<Uuid, ClientConnection>>,
    connection_count: AtomicU64,
}

impl RealtimeHub {
    /// Create new RealtimeHub
    pub fn new() -> Self {
        Self {
            connections: RwLock::new(HashMap::new()),
            connection_count: AtomicU64::new(0),
        }
    }

    /// Register a new subscriber
    pub async fn register(&self) -> (Uuid, mpsc::UnboundedReceiver<String>) {
        let id = Uuid::new_v4();
        let (tx, rx) = mpsc::unbounded_channel();

        {
            let mut connections = self.connections.write().await;
            connections.insert(id, ClientConnection { id, tx });
        }

        self.connection_count.fetch_add(1, Ordering::Relaxed);

        tracing::info!(connection_id = %id, "Subscriber registered");

        (id, rx)
    }

    /// Unregister a subscriber (no-op when absent)
    pub async fn unregister(&self, id: &Uuid) {
        let mut connections = self.connections.write().await;
        if connections.remove(id).is_some() {
            self.connection_count.fetch_sub(1, Ordering::Relaxed);
            tracing::info!(connection_id = %id, "Subscriber unregistered");
        }
    }

    /// Send raw text to one subscriber (keep-alive replies)
    pub async fn send_to(&self, id: &Uuid, text: impl Into<String>) -> bool {
        let connections = self.connections.read().await;
        match connections.get(id) {
            Some(conn) => conn.tx.send(text.into()).is_ok(),
            None => false,
        }
    }

    /// Broadcast a message to all subscribers.
    ///
    /// The registry is snapshotted before delivery so transport
    /// callbacks may register/unregister concurrently. A failed send
    /// marks that subscriber for removal but never blocks delivery to
    /// the rest; all failed subscribers are evicted after the pass.
    pub async fn broadcast(&self, message: HubMessage) {
        let json = match serde_json::to_string(&message) {
            Ok(j) => j,
            Err(e) => {
                tracing::error!(error = %e, "Failed to serialize message");
                return;
            }
        };

        let targets: Vec<(Uuid, mpsc::UnboundedSender<String>)> = {
            let connections = self.connections.read().await;
            connections
                .values()
                .map(|c| (c.id, c.tx.clone()))
                .collect()
        };

        tracing::debug!(
            message_type = %message.type_name(),
            client_count = targets.len(),
            "Broadcasting to subscribers"
        );

        let mut failed: Vec<Uuid> = Vec::new();
        for (id, tx) in targets {
            if tx.send(json.clone()).is_err() {
                tracing::warn!(connection_id = %id, "Delivery failed, marking for removal");
                failed.push(id);
            }
        }

        if !failed.is_empty() {
            let mut connections = self.connections.write().await;
            for id in failed {
                if connections.remove(&id).is_some() {
                    self.connection_count.fetch_sub(1, Ordering::Relaxed);
                    tracing::info!(connection_id = %id, "Dead subscriber evicted");
                }
            }
        }
    }

    /// Current subscriber count
    pub fn connection_count(&self) -> u64 {
        self.connection_count.load(Ordering::Relaxed)
    }
}

impl Default for RealtimeHub {
    fn default() -> Self {
        Self::new()
    }
}
