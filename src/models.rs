//! Shared models and types for Flowserver
//!
//! This module contains types shared across multiple modules
//! to avoid circular dependencies.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Standard API response wrapper
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiResponse<T> {
    pub ok: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl<T> ApiResponse<T> {
    pub fn success(data: T) -> Self {
        Self {
            ok: true,
            data: Some(data),
            error: None,
        }
    }

    pub fn error(msg: impl Into<String>) -> Self {
        Self {
            ok: false,
            data: None,
            error: Some(msg.into()),
        }
    }
}

/// Health check response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    pub appliance_connected: bool,
    pub db_connected: bool,
}

/// One decoded sensor reading from the inference appliance.
///
/// Immutable once created; all units are SI (meters, m/s, m³/s).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SensorReading {
    pub water_level_m: f64,
    pub velocity_mps: f64,
    pub flow_rate_m3ps: f64,
    pub observed_at: DateTime<Utc>,
}

impl SensorReading {
    /// Water level in centimeters (alert thresholds are in cm)
    pub fn water_level_cm(&self) -> f64 {
        self.water_level_m * 100.0
    }
}

/// Averages over one completed aggregation window.
///
/// Created once per window boundary, handed to the persistence
/// collaborator, never mutated afterwards.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WindowAggregate {
    pub avg_water_level_m: f64,
    pub avg_velocity_mps: f64,
    pub avg_flow_rate_m3ps: f64,
    pub sample_count: usize,
    pub window_start: DateTime<Utc>,
    pub window_end: DateTime<Utc>,
}
