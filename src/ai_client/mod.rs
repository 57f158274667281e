//! AiClient - Inference Appliance Adapter
//!
//! ## Responsibilities
//!
//! - Maintain one outbound TCP connection to the inference appliance
//! - Speak the framed JSON-over-binary-header protocol
//! - Handshake (INFERENCE_REQ, all channels) on every connect
//! - Deliver decoded readings to the ingest pipeline in arrival order
//!
//! Connection state machine: Disconnected -> Connecting -> Connected
//! -> Disconnected, with a fixed 5-second reconnect delay and no
//! backoff; retries indefinitely until `stop` is called.

use crate::error::{Error, Result};
use crate::ingest_service::IngestService;
use crate::wire::{
    self, FrameHeader, InboundFrame, Payload, INFERENCE_REQ, LEN_PREFIX,
};
use chrono::Utc;
use serde::Serialize;
use serde_json::json;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::sync::{Mutex, RwLock};
use tokio::task::JoinHandle;

/// Delay between reconnect attempts
const RECONNECT_INTERVAL: Duration = Duration::from_secs(5);

/// Connection state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
}

/// AiClient instance
pub struct AiClient {
    host: String,
    port: u16,
    client_id: String,
    ingest: Arc<IngestService>,
    running: Arc<RwLock<bool>>,
    state: Arc<RwLock<ConnectionState>>,
    /// Monotonic per-outgoing-message transaction id, starts at 1
    tx_id: Arc<AtomicU32>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl AiClient {
    /// Create new AiClient
    pub fn new(host: String, port: u16, client_id: String, ingest: Arc<IngestService>) -> Self {
        Self {
            host,
            port,
            client_id,
            ingest,
            running: Arc::new(RwLock::new(false)),
            state: Arc::new(RwLock::new(ConnectionState::Disconnected)),
            tx_id: Arc::new(AtomicU32::new(1)),
            task: Mutex::new(None),
        }
    }

    /// Start the connect/read loop. Idempotent: a second start while
    /// running is a no-op.
    pub async fn start(&self) {
        {
            let mut running = self.running.write().await;
            if *running {
                tracing::warn!("AI client already running");
                return;
            }
            *running = true;
        }

        tracing::info!(host = %self.host, port = self.port, "Starting AI client");

        let worker = ClientWorker {
            host: self.host.clone(),
            port: self.port,
            client_id: self.client_id.clone(),
            ingest: self.ingest.clone(),
            running: self.running.clone(),
            state: self.state.clone(),
            tx_id: self.tx_id.clone(),
        };

        let handle = tokio::spawn(async move {
            worker.run().await;
        });
        *self.task.lock().await = Some(handle);
    }

    /// Stop the client: cancels the read loop, closes the socket,
    /// does not retry.
    pub async fn stop(&self) {
        {
            let mut running = self.running.write().await;
            *running = false;
        }

        if let Some(handle) = self.task.lock().await.take() {
            handle.abort();
        }

        *self.state.write().await = ConnectionState::Disconnected;
        tracing::info!("AI client stopped");
    }

    /// Current connection state
    pub async fn connection_state(&self) -> ConnectionState {
        *self.state.read().await
    }

    /// True while a connection is established
    pub async fn is_connected(&self) -> bool {
        *self.state.read().await == ConnectionState::Connected
    }
}

/// The connect/read loop, owning clones of the shared handles
struct ClientWorker {
    host: String,
    port: u16,
    client_id: String,
    ingest: Arc<IngestService>,
    running: Arc<RwLock<bool>>,
    state: Arc<RwLock<ConnectionState>>,
    tx_id: Arc<AtomicU32>,
}

impl ClientWorker {
    fn next_tx_id(&self) -> u32 {
        self.tx_id.fetch_add(1, Ordering::Relaxed)
    }

    /// Connect/read loop with fixed-delay reconnect
    async fn run(&self) {
        loop {
            if !*self.running.read().await {
                break;
            }

            *self.state.write().await = ConnectionState::Connecting;

            match TcpStream::connect((self.host.as_str(), self.port)).await {
                Ok(stream) => {
                    *self.state.write().await = ConnectionState::Connected;
                    tracing::info!(host = %self.host, port = self.port, "Connected to AI appliance");

                    if let Err(e) = self.run_connection(stream).await {
                        tracing::warn!(error = %e, "Connection ended");
                    }

                    *self.state.write().await = ConnectionState::Disconnected;
                }
                Err(e) => {
                    tracing::error!(
                        host = %self.host,
                        port = self.port,
                        error = %e,
                        "Connect failed, retrying in {}s",
                        RECONNECT_INTERVAL.as_secs()
                    );
                }
            }

            if !*self.running.read().await {
                break;
            }
            tokio::time::sleep(RECONNECT_INTERVAL).await;
        }

        *self.state.write().await = ConnectionState::Disconnected;
        tracing::info!("AI client loop exited");
    }

    /// Handshake then read frames until the connection drops
    async fn run_connection(&self, mut stream: TcpStream) -> Result<()> {
        self.send_handshake(&mut stream).await?;

        loop {
            if !*self.running.read().await {
                return Ok(());
            }

            let frame = read_frame(&mut stream).await?;
            self.dispatch(frame).await;
        }
    }

    /// Send the INFERENCE_REQ handshake requesting all channels
    async fn send_handshake(&self, stream: &mut TcpStream) -> Result<()> {
        let tx_id = self.next_tx_id();
        let body = handshake_body(&self.client_id, Utc::now().timestamp());
        let frame = wire::encode_frame(&FrameHeader::new(INFERENCE_REQ, tx_id), &body)?;

        stream
            .write_all(&frame)
            .await
            .map_err(|e| Error::Transport(format!("handshake write failed: {e}")))?;

        tracing::debug!(tx_id = tx_id, bytes = frame.len(), "Handshake sent");
        Ok(())
    }

    /// Dispatch one decoded frame by message type
    async fn dispatch(&self, frame: InboundFrame) {
        let msg_type = frame.header.msg_type;
        tracing::debug!(
            msg_type = msg_type,
            tx_id = frame.header.tx_id,
            status = frame.header.status,
            "Frame received"
        );

        match frame.payload {
            Payload::Inference(body) => match body.first_metadata() {
                Some(metadata) => {
                    self.ingest
                        .process_reading(
                            metadata.surface_depth_m,
                            metadata.velocity,
                            metadata.volume,
                        )
                        .await;
                }
                None => {
                    tracing::debug!(msg_type = msg_type, "No metadata in response, frame dropped");
                }
            },
            Payload::AlarmAck(body) => {
                tracing::info!(msg_type = msg_type, body = %body, "Alarm set response");
            }
            Payload::Unrecognized(body) => {
                tracing::warn!(msg_type = msg_type, body = %body, "Unrecognized message type");
            }
            Payload::Invalid => {
                tracing::debug!(msg_type = msg_type, "Invalid payload skipped");
            }
        }
    }
}

/// Handshake body: all channels (channel = 0)
fn handshake_body(client_id: &str, timestamp: i64) -> serde_json::Value {
    json!({
        "type": "inference",
        "client-id": client_id,
        "channel": 0,
        "timestamp": timestamp,
    })
}

/// Read exactly one length-prefixed frame off the stream.
///
/// Short reads and EOF surface as Transport errors, which tear the
/// connection down; body-level decode problems are handled inside the
/// typed payload and never reach here.
async fn read_frame(stream: &mut TcpStream) -> Result<InboundFrame> {
    let mut len_buf = [0u8; LEN_PREFIX];
    stream
        .read_exact(&mut len_buf)
        .await
        .map_err(|e| Error::Transport(format!("length read failed: {e}")))?;

    let total_len = u32::from_be_bytes(len_buf) as usize;
    wire::check_frame_len(total_len)?;

    let mut payload = vec![0u8; total_len];
    stream
        .read_exact(&mut payload)
        .await
        .map_err(|e| Error::Transport(format!("payload read failed: {e}")))?;

    InboundFrame::decode(&payload)
}
