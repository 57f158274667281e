//! FlowStore MySQL repository
//!
//! Database access layer for flow aggregates, alerts and settings.

use super::types::Thresholds;
use super::FlowStore;
use crate::error::Result;
use crate::models::WindowAggregate;
use async_trait::async_trait;
use chrono::Utc;
use sqlx::MySqlPool;
use sqlx::Row;

/// MySQL-backed FlowStore
#[derive(Clone)]
pub struct MySqlFlowStore {
    pool: MySqlPool,
    /// Monitoring point this service instance writes under
    flow_uid: i32,
}

impl MySqlFlowStore {
    /// Create new repository
    pub fn new(pool: MySqlPool, flow_uid: i32) -> Self {
        Self { pool, flow_uid }
    }
}

#[async_trait]
impl FlowStore for MySqlFlowStore {
    /// Insert one window aggregate into flow_detail_info.
    ///
    /// Storage units differ from the canonical SI reading:
    /// water level m -> cm, velocity m/s -> stored rate (x10),
    /// flux stays m³/s.
    async fn save_window_aggregate(&self, aggregate: &WindowAggregate) -> Result<()> {
        let flow_waterlevel = aggregate.avg_water_level_m * 100.0;
        let flow_rate = aggregate.avg_velocity_mps * 10.0;
        let flow_flux = aggregate.avg_flow_rate_m3ps;

        sqlx::query(
            r#"
            INSERT INTO flow_detail_info (
                flow_uid, flow_rate, flow_flux, flow_waterlevel, flow_time
            ) VALUES (?, ?, ?, ?, ?)
            "#,
        )
        .bind(self.flow_uid)
        .bind(flow_rate)
        .bind(flow_flux)
        .bind(flow_waterlevel)
        .bind(aggregate.window_end)
        .execute(&self.pool)
        .await?;

        tracing::info!(
            flow_uid = self.flow_uid,
            water_level_cm = flow_waterlevel,
            velocity_mps = aggregate.avg_velocity_mps,
            flux_m3ps = flow_flux,
            sample_count = aggregate.sample_count,
            "Window aggregate saved"
        );

        Ok(())
    }

    /// Insert one alert into alert_info; returns the new alert uid.
    async fn save_alert(&self, message: &str, alert_type: &str) -> Result<u64> {
        let result = sqlx::query(
            r#"
            INSERT INTO alert_info (flow_uid, alert_date, alert_message, alert_type)
            VALUES (?, ?, ?, ?)
            "#,
        )
        .bind(self.flow_uid)
        .bind(Utc::now())
        .bind(message)
        .bind(alert_type)
        .execute(&self.pool)
        .await?;

        Ok(result.last_insert_id())
    }

    /// Read the admin user's warning/danger levels.
    ///
    /// Missing row or NULL columns fall back to the defaults; lookup
    /// errors propagate so the caller can apply its own fallback.
    async fn load_thresholds(&self) -> Result<Thresholds> {
        let row = sqlx::query(
            r#"
            SELECT
                CAST(s.warning_level AS DOUBLE) as warning_level,
                CAST(s.danger_level AS DOUBLE) as danger_level
            FROM settings s
            JOIN users u ON s.user_uid = u.user_uid
            WHERE u.user_level = 0
            LIMIT 1
            "#,
        )
        .fetch_optional(&self.pool)
        .await?;

        let defaults = Thresholds::default();
        match row {
            Some(row) => {
                let warning: Option<f64> = row.try_get("warning_level").ok();
                let danger: Option<f64> = row.try_get("danger_level").ok();
                Ok(Thresholds {
                    warning_level_cm: warning.unwrap_or(defaults.warning_level_cm),
                    danger_level_cm: danger.unwrap_or(defaults.danger_level_cm),
                })
            }
            None => Ok(defaults),
        }
    }
}
