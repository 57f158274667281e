//! Flowserver Library
//!
//! Realtime river flow monitoring pipeline
//!
//! ## Architecture (7 Components)
//!
//! 1. Wire - framed JSON-over-binary-header protocol codec
//! 2. AiClient - inference appliance TCP adapter (reconnecting)
//! 3. IngestService - ordered reading pipeline glue
//! 4. FlowBuffer - windowed aggregation + latest-reading slot
//! 5. AlertEngine - threshold/hysteresis/cooldown alerting
//! 6. RealtimeHub - WebSocket fan-out with lazy eviction
//! 7. FlowStore - persistence & settings collaborator seam
//!
//! ## Design Principles
//!
//! - No ambient globals: every component is an explicitly constructed
//!   object wired through AppState
//! - All pipeline failures degrade to skip-and-continue with logging

pub mod ai_client;
pub mod alert_engine;
pub mod error;
pub mod flow_buffer;
pub mod flow_store;
pub mod ingest_service;
pub mod models;
pub mod realtime_hub;
pub mod state;
pub mod web_api;
pub mod wire;

pub use error::{Error, Result};
pub use state::AppState;
