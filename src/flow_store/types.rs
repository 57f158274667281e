//! FlowStore data types

use serde::{Deserialize, Serialize};

/// Alert thresholds in centimeters
///
/// Defaults are the hardcoded fallback used when the settings lookup
/// fails or no admin row exists.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Thresholds {
    pub warning_level_cm: f64,
    pub danger_level_cm: f64,
}

impl Default for Thresholds {
    fn default() -> Self {
        Self {
            warning_level_cm: 10.0,
            danger_level_cm: 15.0,
        }
    }
}
