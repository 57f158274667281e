//! AlertEngine - Water Level Alerting
//!
//! ## Responsibilities
//!
//! - Classify each reading into safe/warning/danger against the
//!   configured thresholds (read per evaluation, fallback on failure)
//! - Hysteresis: alert on level transitions, not threshold crossings
//! - Cooldown: danger re-alerts every 2 minutes while sustained,
//!   5 minutes per level otherwise
//! - Rapid-change detection over a 60-second history window
//! - Persist emitted alerts and broadcast them to subscribers
//!
//! Rapid-change alerting and the consecutive-duration gate exist in
//! the upstream protocol but ship disabled; both are independent
//! policy flags here, defaulting to off.

use crate::flow_store::{FlowStore, Thresholds};
use crate::realtime_hub::{HubMessage, RealtimeHub};
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use tokio::sync::Mutex;

/// Rapid-change detection threshold (cm rise within the history window)
pub const RAPID_CHANGE_THRESHOLD_CM: f64 = 5.0;

/// History retention for rapid-change detection
const HISTORY_WINDOW_SECS: i64 = 60;

/// Water level severity
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertLevel {
    Safe,
    Warning,
    Danger,
}

impl AlertLevel {
    /// Classify a water level in cm against the thresholds
    pub fn classify(water_level_cm: f64, thresholds: &Thresholds) -> Self {
        if water_level_cm > thresholds.danger_level_cm {
            AlertLevel::Danger
        } else if water_level_cm > thresholds.warning_level_cm {
            AlertLevel::Warning
        } else {
            AlertLevel::Safe
        }
    }

    /// Minimum time between repeated alerts of this level
    fn cooldown(self) -> Duration {
        match self {
            AlertLevel::Danger => Duration::minutes(2),
            _ => Duration::minutes(5),
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            AlertLevel::Safe => "safe",
            AlertLevel::Warning => "warning",
            AlertLevel::Danger => "danger",
        }
    }
}

/// Alert emission policy flags
///
/// Both mechanisms default to the disabled reference behavior; the
/// detection bookkeeping runs regardless so enabling a flag needs no
/// warm-up.
#[derive(Debug, Clone)]
pub struct AlertPolicy {
    /// Emit an immediate alert on rapid water level rise
    pub rapid_change_alerts: bool,
    /// Require N consecutive over-threshold readings before alerting
    pub consecutive_gate: bool,
    /// Consecutive readings required for a warning alert
    pub warning_consecutive: u32,
    /// Consecutive readings required for a danger alert
    pub danger_consecutive: u32,
}

impl Default for AlertPolicy {
    fn default() -> Self {
        Self {
            rapid_change_alerts: false,
            consecutive_gate: false,
            warning_consecutive: 10,
            danger_consecutive: 5,
        }
    }
}

/// An alert that was persisted and broadcast
#[derive(Debug, Clone)]
pub struct EmittedAlert {
    pub alert_uid: u64,
    pub level: AlertLevel,
    pub alert_type: String,
    pub message: String,
}

/// Mutable engine state, initialized at construction
struct AlertState {
    current_level: AlertLevel,
    last_alert_time: HashMap<AlertLevel, DateTime<Utc>>,
    /// (water_level_cm, observed) pairs, pruned to the last 60 seconds
    history: VecDeque<(f64, DateTime<Utc>)>,
    warning_streak: u32,
    danger_streak: u32,
}

impl AlertState {
    fn new() -> Self {
        Self {
            current_level: AlertLevel::Safe,
            last_alert_time: HashMap::new(),
            history: VecDeque::new(),
            warning_streak: 0,
            danger_streak: 0,
        }
    }
}

/// AlertEngine instance
pub struct AlertEngine {
    store: Arc<dyn FlowStore>,
    hub: Arc<RealtimeHub>,
    policy: AlertPolicy,
    state: Mutex<AlertState>,
}

impl AlertEngine {
    /// Create new AlertEngine with the default policy
    pub fn new(store: Arc<dyn FlowStore>, hub: Arc<RealtimeHub>) -> Self {
        Self::with_policy(store, hub, AlertPolicy::default())
    }

    /// Create new AlertEngine with an explicit policy
    pub fn with_policy(
        store: Arc<dyn FlowStore>,
        hub: Arc<RealtimeHub>,
        policy: AlertPolicy,
    ) -> Self {
        Self {
            store,
            hub,
            policy,
            state: Mutex::new(AlertState::new()),
        }
    }

    /// Current severity level
    pub async fn current_level(&self) -> AlertLevel {
        self.state.lock().await.current_level
    }

    /// Evaluate one reading (cm); may persist and broadcast an alert.
    pub async fn evaluate(&self, water_level_cm: f64) -> Option<EmittedAlert> {
        self.evaluate_at(water_level_cm, Utc::now()).await
    }

    /// Time-explicit variant of [`evaluate`](Self::evaluate)
    pub async fn evaluate_at(
        &self,
        water_level_cm: f64,
        now: DateTime<Utc>,
    ) -> Option<EmittedAlert> {
        let thresholds = match self.store.load_thresholds().await {
            Ok(t) => t,
            Err(e) => {
                tracing::error!(error = %e, "Threshold lookup failed, using defaults");
                Thresholds::default()
            }
        };

        let mut state = self.state.lock().await;

        // History update for rapid-change detection
        state.history.push_back((water_level_cm, now));
        let horizon = now - Duration::seconds(HISTORY_WINDOW_SECS);
        while let Some(&(_, ts)) = state.history.front() {
            if ts < horizon {
                state.history.pop_front();
            } else {
                break;
            }
        }

        let rapid_increase = if state.history.len() >= 2 {
            let oldest = state.history.front().map(|(level, _)| *level).unwrap_or(0.0);
            let increase = water_level_cm - oldest;
            if increase >= RAPID_CHANGE_THRESHOLD_CM {
                tracing::warn!(
                    increase_cm = increase,
                    from_cm = oldest,
                    to_cm = water_level_cm,
                    "Rapid water level rise detected within 60s"
                );
                Some(increase)
            } else {
                None
            }
        } else {
            None
        };

        let level = AlertLevel::classify(water_level_cm, &thresholds);

        // Streak counters update on every reading, gated or not
        match level {
            AlertLevel::Warning => {
                state.warning_streak += 1;
                state.danger_streak = 0;
            }
            AlertLevel::Danger => {
                state.danger_streak += 1;
                state.warning_streak = 0;
            }
            AlertLevel::Safe => {
                state.warning_streak = 0;
                state.danger_streak = 0;
            }
        }

        // Rapid-change alert bypasses the cooldown entirely (policy-gated)
        if self.policy.rapid_change_alerts {
            if let Some(increase) = rapid_increase {
                let message = format!(
                    "급격한 수위 상승! 1분내 {:.1}cm 증가: {:.1}cm",
                    increase, water_level_cm
                );
                return self.emit(&mut state, level, message, "긴급", now).await;
            }
        }

        let level_changed = state.current_level != level;
        let can_send = match state.last_alert_time.get(&level) {
            Some(last) => now - *last >= level.cooldown(),
            None => true,
        };
        let danger_sustained = level == AlertLevel::Danger && can_send;

        if !(level_changed && can_send) && !danger_sustained {
            return None;
        }

        if self.policy.consecutive_gate {
            let gate_met = match level {
                AlertLevel::Warning => state.warning_streak >= self.policy.warning_consecutive,
                AlertLevel::Danger => state.danger_streak >= self.policy.danger_consecutive,
                AlertLevel::Safe => true,
            };
            if !gate_met {
                return None;
            }
        }

        let (message, alert_type) = match level {
            AlertLevel::Danger => (
                format!(
                    "위험 수위 달성! 현재 수위: {:.1}cm (기준: {}cm)",
                    water_level_cm, thresholds.danger_level_cm
                ),
                "긴급",
            ),
            AlertLevel::Warning => (
                format!(
                    "주의 수위 달성! 현재 수위: {:.1}cm (기준: {}cm)",
                    water_level_cm, thresholds.warning_level_cm
                ),
                "주의",
            ),
            AlertLevel::Safe => (
                format!("수위 정상화됨! 현재 수위: {:.1}cm", water_level_cm),
                "정상",
            ),
        };

        self.emit(&mut state, level, message, alert_type, now).await
    }

    /// Persist, broadcast, and record an alert.
    ///
    /// A failed persist skips the broadcast and the state update, so
    /// the next qualifying reading re-attempts the alert.
    async fn emit(
        &self,
        state: &mut AlertState,
        level: AlertLevel,
        message: String,
        alert_type: &str,
        now: DateTime<Utc>,
    ) -> Option<EmittedAlert> {
        let alert_uid = match self.store.save_alert(&message, alert_type).await {
            Ok(uid) => uid,
            Err(e) => {
                tracing::error!(error = %e, alert_type = %alert_type, "Alert persist failed");
                return None;
            }
        };

        let record = json!({
            "id": format!("AL-{:03}", alert_uid),
            "ts": now.format("%H:%M").to_string(),
            "level": map_alert_level(alert_type),
            "message": message,
            "location": "중앙",
        });
        self.hub
            .broadcast(HubMessage::alert_update("alert_added", record))
            .await;

        state.current_level = level;
        state.last_alert_time.insert(level, now);

        tracing::info!(
            level = %level.as_str(),
            alert_type = %alert_type,
            message = %message,
            "Alert emitted"
        );

        Some(EmittedAlert {
            alert_uid,
            level,
            alert_type: alert_type.to_string(),
            message,
        })
    }
}

/// Map the stored alert type onto the dashboard severity label
fn map_alert_level(alert_type: &str) -> &'static str {
    match alert_type {
        "긴급" | "대피" => "CRITICAL",
        "주의" | "경계" => "WARNING",
        "정상" => "INFO",
        _ => "INFO",
    }
}
