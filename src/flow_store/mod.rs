//! FlowStore - Persistence & Settings Collaborator
//!
//! ## Responsibilities
//!
//! - Persist window aggregates (flow_detail_info)
//! - Persist alerts (alert_info)
//! - Read alert thresholds from admin settings
//!
//! The pipeline consumes the `FlowStore` trait; the MySQL
//! implementation lives in `repository`. Tests substitute in-memory
//! stores so the aggregator and alert engine run without a database.

mod repository;
mod types;

pub use repository::MySqlFlowStore;
pub use types::Thresholds;

use crate::error::Result;
use crate::models::WindowAggregate;
use async_trait::async_trait;

/// Persistence sink and settings source consumed by the pipeline
#[async_trait]
pub trait FlowStore: Send + Sync {
    /// Persist one completed window aggregate
    async fn save_window_aggregate(&self, aggregate: &WindowAggregate) -> Result<()>;

    /// Persist one alert; returns the stored alert uid
    async fn save_alert(&self, message: &str, alert_type: &str) -> Result<u64>;

    /// Read current alert thresholds
    async fn load_thresholds(&self) -> Result<Thresholds>;
}
