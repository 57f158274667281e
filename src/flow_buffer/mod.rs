//! FlowBuffer - Windowed Aggregation
//!
//! ## Responsibilities
//!
//! - Buffer the high-frequency reading stream per time window
//! - Keep the most recent reading for low-latency KPI consumers
//! - Flush window averages to the persistence collaborator
//!
//! `add` and the flush capture-and-clear run as one serialized region
//! under a single mutex, so readings arriving during a flush are never
//! lost nor double-counted. Only the persistence write itself runs on
//! a spawned task.
//!
//! Persistence failure during flush is logged and the aggregate is
//! discarded - an accepted data-loss trade-off (no retry, no buffering
//! of failed aggregates).

use crate::flow_store::FlowStore;
use crate::models::{SensorReading, WindowAggregate};
use crate::realtime_hub::KpiUpdate;
use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use std::sync::Arc;
use tokio::sync::Mutex;

/// Default window length in seconds
pub const DEFAULT_WINDOW_SECS: i64 = 300;

/// Buffer state snapshot for the status surface
#[derive(Debug, Clone, Serialize)]
pub struct BufferStatus {
    pub buffer_count: usize,
    /// Window progress in percent, capped at 100
    pub interval_progress: f64,
    /// Seconds until the next flush boundary
    pub next_save_in: f64,
    pub interval_start: String,
    pub has_latest_data: bool,
}

struct WindowState {
    latest: Option<SensorReading>,
    buffer: Vec<SensorReading>,
    window_start: DateTime<Utc>,
}

/// FlowBuffer instance
pub struct FlowBuffer {
    window: Duration,
    store: Arc<dyn FlowStore>,
    state: Mutex<WindowState>,
}

impl FlowBuffer {
    /// Create new buffer with the given window length
    pub fn new(store: Arc<dyn FlowStore>, window_secs: i64) -> Self {
        Self {
            window: Duration::seconds(window_secs),
            store,
            state: Mutex::new(WindowState {
                latest: None,
                buffer: Vec::new(),
                window_start: Utc::now(),
            }),
        }
    }

    /// Add a reading; flushes the window when its boundary has passed.
    ///
    /// Returns the flushed aggregate when this call closed a window.
    pub async fn add(&self, reading: SensorReading) -> Option<WindowAggregate> {
        self.add_at(reading, Utc::now()).await
    }

    /// Time-explicit variant of [`add`](Self::add)
    pub async fn add_at(
        &self,
        reading: SensorReading,
        now: DateTime<Utc>,
    ) -> Option<WindowAggregate> {
        let aggregate = {
            let mut state = self.state.lock().await;
            state.latest = Some(reading.clone());
            state.buffer.push(reading);

            let elapsed = now - state.window_start;
            if elapsed >= self.window {
                Self::capture_window(&mut state, now)
            } else {
                None
            }
        };

        if let Some(ref aggregate) = aggregate {
            let store = self.store.clone();
            let aggregate = aggregate.clone();
            tokio::spawn(async move {
                if let Err(e) = store.save_window_aggregate(&aggregate).await {
                    tracing::error!(
                        error = %e,
                        sample_count = aggregate.sample_count,
                        "Window aggregate persist failed, aggregate discarded"
                    );
                }
            });
        }

        aggregate
    }

    /// Capture and clear the buffer, compute the window averages.
    ///
    /// An empty buffer skips silently: no aggregate and no reset of
    /// window_start, so the next add re-triggers the boundary check.
    fn capture_window(state: &mut WindowState, now: DateTime<Utc>) -> Option<WindowAggregate> {
        if state.buffer.is_empty() {
            tracing::warn!("Window boundary reached with no samples, skipping flush");
            return None;
        }

        let samples = std::mem::take(&mut state.buffer);
        let count = samples.len();

        let aggregate = WindowAggregate {
            avg_water_level_m: samples.iter().map(|r| r.water_level_m).sum::<f64>()
                / count as f64,
            avg_velocity_mps: samples.iter().map(|r| r.velocity_mps).sum::<f64>()
                / count as f64,
            avg_flow_rate_m3ps: samples.iter().map(|r| r.flow_rate_m3ps).sum::<f64>()
                / count as f64,
            sample_count: count,
            window_start: state.window_start,
            window_end: now,
        };

        state.window_start = now;

        tracing::debug!(
            sample_count = count,
            window_start = %aggregate.window_start,
            window_end = %aggregate.window_end,
            "Window captured"
        );

        Some(aggregate)
    }

    /// Latest reading converted to KPI units (cm, m/s, m³/s)
    pub async fn latest_kpi(&self) -> Option<KpiUpdate> {
        let state = self.state.lock().await;
        state.latest.as_ref().map(|reading| KpiUpdate {
            water_level: reading.water_level_cm(),
            flow_velocity: reading.velocity_mps,
            discharge: reading.flow_rate_m3ps,
            timestamp: reading.observed_at.to_rfc3339(),
            status: "success".to_string(),
        })
    }

    /// Buffer state for the status surface
    pub async fn status(&self) -> BufferStatus {
        let state = self.state.lock().await;
        let elapsed = (Utc::now() - state.window_start).num_milliseconds() as f64 / 1000.0;
        let window_secs = self.window.num_seconds() as f64;

        BufferStatus {
            buffer_count: state.buffer.len(),
            interval_progress: (elapsed / window_secs * 100.0).min(100.0),
            next_save_in: (window_secs - elapsed).max(0.0),
            interval_start: state.window_start.to_rfc3339(),
            has_latest_data: state.latest.is_some(),
        }
    }
}
