//! End-to-end pipeline test against an in-process fake appliance.
//!
//! A loopback TCP server plays the inference appliance: it accepts the
//! client's handshake and pushes framed responses, including a
//! deliberately malformed one, while a registered hub subscriber
//! observes the resulting broadcasts.

use async_trait::async_trait;
use flowserver::ai_client::AiClient;
use flowserver::alert_engine::AlertEngine;
use flowserver::error::Result;
use flowserver::flow_buffer::FlowBuffer;
use flowserver::flow_store::{FlowStore, Thresholds};
use flowserver::ingest_service::IngestService;
use flowserver::models::WindowAggregate;
use flowserver::realtime_hub::RealtimeHub;
use flowserver::wire::{
    encode_frame, FrameHeader, HEADER_LEN, INFERENCE_REQ, INFERENCE_RESP, LEN_PREFIX,
};
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio::time::timeout;

struct RecordingStore {
    aggregates: mpsc::UnboundedSender<WindowAggregate>,
}

#[async_trait]
impl FlowStore for RecordingStore {
    async fn save_window_aggregate(&self, aggregate: &WindowAggregate) -> Result<()> {
        let _ = self.aggregates.send(aggregate.clone());
        Ok(())
    }

    async fn save_alert(&self, _message: &str, _alert_type: &str) -> Result<u64> {
        Ok(1)
    }

    async fn load_thresholds(&self) -> Result<Thresholds> {
        Ok(Thresholds::default())
    }
}

struct TestStack {
    client: Arc<AiClient>,
    hub: Arc<RealtimeHub>,
    _aggregates: mpsc::UnboundedReceiver<WindowAggregate>,
}

fn build_stack(port: u16) -> TestStack {
    let (tx, rx) = mpsc::unbounded_channel();
    let store: Arc<dyn FlowStore> = Arc::new(RecordingStore { aggregates: tx });
    let hub = Arc::new(RealtimeHub::new());
    let buffer = Arc::new(FlowBuffer::new(store.clone(), 300));
    let alerts = Arc::new(AlertEngine::new(store, hub.clone()));
    let ingest = Arc::new(IngestService::new(buffer, alerts, hub.clone()));
    let client = Arc::new(AiClient::new(
        "127.0.0.1".to_string(),
        port,
        "pipeline-test".to_string(),
        ingest,
    ));

    TestStack {
        client,
        hub,
        _aggregates: rx,
    }
}

/// Read one length-prefixed frame off the appliance side.
async fn read_client_frame(stream: &mut TcpStream) -> (FrameHeader, serde_json::Value) {
    let mut len_buf = [0u8; LEN_PREFIX];
    stream.read_exact(&mut len_buf).await.unwrap();
    let total_len = u32::from_be_bytes(len_buf) as usize;

    let mut payload = vec![0u8; total_len];
    stream.read_exact(&mut payload).await.unwrap();

    let header = FrameHeader::unpack(&payload).unwrap();
    let body = serde_json::from_slice(&payload[HEADER_LEN..]).unwrap();
    (header, body)
}

fn inference_frame(tx_id: u32, depth_m: f64, velocity: f64, volume: f64) -> Vec<u8> {
    encode_frame(
        &FrameHeader::new(INFERENCE_RESP, tx_id),
        &json!({
            "metadata": [{
                "channel": 1,
                "surface_depth_m": depth_m,
                "velocity": velocity,
                "volume": volume,
            }]
        }),
    )
    .unwrap()
}

/// A frame whose body is not valid JSON (total_len still correct).
fn malformed_frame(tx_id: u32) -> Vec<u8> {
    let body = b"{definitely not json";
    let header = FrameHeader::new(INFERENCE_RESP, tx_id);
    let total_len = (HEADER_LEN + body.len()) as u32;

    let mut frame = Vec::new();
    frame.extend_from_slice(&total_len.to_be_bytes());
    frame.extend_from_slice(&header.pack());
    frame.extend_from_slice(body);
    frame
}

async fn next_broadcast(rx: &mut mpsc::UnboundedReceiver<String>) -> serde_json::Value {
    let text = timeout(Duration::from_secs(5), rx.recv())
        .await
        .expect("timed out waiting for broadcast")
        .expect("hub channel closed");
    serde_json::from_str(&text).unwrap()
}

#[tokio::test]
async fn pipeline_end_to_end_with_malformed_frame() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();

    let stack = build_stack(port);
    let (_sub_id, mut sub_rx) = stack.hub.register().await;

    stack.client.start().await;

    let (mut appliance, _) = timeout(Duration::from_secs(5), listener.accept())
        .await
        .expect("client never connected")
        .unwrap();

    // Handshake: INFERENCE_REQ for all channels, first tx id
    let (header, body) = read_client_frame(&mut appliance).await;
    assert_eq!(header.msg_type, INFERENCE_REQ);
    assert_eq!(header.tx_id, 1);
    assert_eq!(body["type"], "inference");
    assert_eq!(body["client-id"], "pipeline-test");
    assert_eq!(body["channel"], 0);

    // Well-formed reading (safe level, so only a KPI broadcast)
    appliance
        .write_all(&inference_frame(1, 0.05, 1.2, 2.4))
        .await
        .unwrap();

    let msg = next_broadcast(&mut sub_rx).await;
    assert_eq!(msg["type"], "realtime_kpi_update");
    assert_eq!(msg["data"]["water_level"], 5.0);
    assert_eq!(msg["data"]["flow_velocity"], 1.2);
    assert_eq!(msg["data"]["discharge"], 2.4);
    assert_eq!(msg["data"]["status"], "success");

    // Malformed JSON body must not kill the read loop
    appliance.write_all(&malformed_frame(2)).await.unwrap();

    // The next well-formed frame is processed normally
    appliance
        .write_all(&inference_frame(3, 0.07, 1.0, 2.0))
        .await
        .unwrap();

    let msg = next_broadcast(&mut sub_rx).await;
    assert_eq!(msg["type"], "realtime_kpi_update");
    assert_eq!(msg["data"]["water_level"], 7.000000000000001);

    assert!(stack.client.is_connected().await);
    stack.client.stop().await;
    assert!(!stack.client.is_connected().await);
}

#[tokio::test]
async fn warning_reading_broadcasts_alert_and_kpi() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();

    let stack = build_stack(port);
    let (_sub_id, mut sub_rx) = stack.hub.register().await;

    stack.client.start().await;
    let (mut appliance, _) = timeout(Duration::from_secs(5), listener.accept())
        .await
        .unwrap()
        .unwrap();
    let _ = read_client_frame(&mut appliance).await;

    // 12 cm: above the default 10 cm warning threshold
    appliance
        .write_all(&inference_frame(1, 0.12, 1.0, 2.0))
        .await
        .unwrap();

    let alert = next_broadcast(&mut sub_rx).await;
    assert_eq!(alert["type"], "alert_update");
    assert_eq!(alert["alert_type"], "alert_added");
    assert!(alert["data"]["message"]
        .as_str()
        .unwrap()
        .contains("주의 수위 달성"));
    assert_eq!(alert["data"]["level"], "WARNING");

    let kpi = next_broadcast(&mut sub_rx).await;
    assert_eq!(kpi["type"], "realtime_kpi_update");

    stack.client.stop().await;
}

#[tokio::test]
async fn missing_metadata_forwards_no_reading() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();

    let stack = build_stack(port);
    let (_sub_id, mut sub_rx) = stack.hub.register().await;

    stack.client.start().await;
    let (mut appliance, _) = timeout(Duration::from_secs(5), listener.accept())
        .await
        .unwrap()
        .unwrap();
    let _ = read_client_frame(&mut appliance).await;

    // Response without metadata is dropped silently
    appliance
        .write_all(
            &encode_frame(&FrameHeader::new(INFERENCE_RESP, 1), &json!({"metadata": []})).unwrap(),
        )
        .await
        .unwrap();

    // A real reading afterwards is the first broadcast seen
    appliance
        .write_all(&inference_frame(2, 0.04, 0.5, 1.0))
        .await
        .unwrap();

    let msg = next_broadcast(&mut sub_rx).await;
    assert_eq!(msg["data"]["water_level"], 4.0);

    stack.client.stop().await;
}

#[tokio::test]
async fn start_is_idempotent() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();

    let stack = build_stack(port);
    stack.client.start().await;
    stack.client.start().await;

    let (mut appliance, _) = timeout(Duration::from_secs(5), listener.accept())
        .await
        .unwrap()
        .unwrap();
    let _ = read_client_frame(&mut appliance).await;

    // No second connection shows up: start while running was a no-op
    assert!(timeout(Duration::from_secs(1), listener.accept())
        .await
        .is_err());

    stack.client.stop().await;
}

#[tokio::test]
async fn reconnects_after_connection_drop() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();

    let stack = build_stack(port);
    stack.client.start().await;

    let (mut appliance, _) = timeout(Duration::from_secs(5), listener.accept())
        .await
        .unwrap()
        .unwrap();
    let (header, _) = read_client_frame(&mut appliance).await;
    assert_eq!(header.tx_id, 1);

    // Appliance closes the connection; client retries after 5s
    drop(appliance);

    let (mut appliance, _) = timeout(Duration::from_secs(10), listener.accept())
        .await
        .expect("client never reconnected")
        .unwrap();

    // Fresh handshake with the next transaction id, never reused
    let (header, body) = read_client_frame(&mut appliance).await;
    assert_eq!(header.msg_type, INFERENCE_REQ);
    assert_eq!(header.tx_id, 2);
    assert_eq!(body["channel"], 0);

    stack.client.stop().await;
}
