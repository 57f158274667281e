//! Wire codec for the inference appliance protocol
//!
//! ## Responsibilities
//!
//! - Frame layout: `[u32 total_len BE][9-byte header][UTF-8 JSON body]`
//! - Header pack/unpack (u16 type, u32 tx, u8 flags, i16 status, all BE)
//! - Typed payload decode keyed by message type
//!
//! Invariant: `total_len == HEADER_LEN + body.len()`.

use crate::error::{Error, Result};
use crate::models::SensorReading;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Header length in bytes (u16 + u32 + u8 + i16)
pub const HEADER_LEN: usize = 9;

/// Length-prefix size in bytes
pub const LEN_PREFIX: usize = 4;

/// Sanity cap for `total_len`; the appliance sends small JSON bodies,
/// anything beyond this is a corrupt or hostile frame.
pub const MAX_FRAME_LEN: usize = 1024 * 1024;

/// Message type constants
pub const SET_ALARM_REQ: u16 = 1001;
pub const SET_ALARM_RESP: u16 = 2001;
pub const INFERENCE_REQ: u16 = 1002;
pub const INFERENCE_RESP: u16 = 2002;
pub const ALARM_OCCUR_RESP: u16 = 2003;
pub const ALARM_RELEASE_RESP: u16 = 2004;

/// Fixed 9-byte frame header
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameHeader {
    pub msg_type: u16,
    pub tx_id: u32,
    pub flags: u8,
    pub status: i16,
}

impl FrameHeader {
    pub fn new(msg_type: u16, tx_id: u32) -> Self {
        Self {
            msg_type,
            tx_id,
            flags: 0,
            status: 0,
        }
    }

    /// Pack into the 9-byte big-endian wire layout
    pub fn pack(&self) -> [u8; HEADER_LEN] {
        let mut buf = [0u8; HEADER_LEN];
        buf[0..2].copy_from_slice(&self.msg_type.to_be_bytes());
        buf[2..6].copy_from_slice(&self.tx_id.to_be_bytes());
        buf[6] = self.flags;
        buf[7..9].copy_from_slice(&self.status.to_be_bytes());
        buf
    }

    /// Unpack from a 9-byte big-endian header
    pub fn unpack(bytes: &[u8]) -> Result<Self> {
        if bytes.len() < HEADER_LEN {
            return Err(Error::Frame(format!(
                "header too short: {} bytes",
                bytes.len()
            )));
        }
        Ok(Self {
            msg_type: u16::from_be_bytes([bytes[0], bytes[1]]),
            tx_id: u32::from_be_bytes([bytes[2], bytes[3], bytes[4], bytes[5]]),
            flags: bytes[6],
            status: i16::from_be_bytes([bytes[7], bytes[8]]),
        })
    }
}

/// Per-channel measurement block inside an inference response body
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ChannelMetadata {
    #[serde(default)]
    pub channel: i64,
    #[serde(default)]
    pub surface_depth_m: f64,
    #[serde(default)]
    pub velocity: f64,
    #[serde(default)]
    pub volume: f64,
}

/// Inference-class response body (INFERENCE_RESP / ALARM_*_RESP)
#[derive(Debug, Clone, Default, Deserialize)]
pub struct InferenceBody {
    #[serde(default)]
    pub metadata: Vec<ChannelMetadata>,
}

impl InferenceBody {
    /// First metadata block, or None when the appliance sent no
    /// measurements (the frame is then dropped, not an error).
    pub fn first_metadata(&self) -> Option<&ChannelMetadata> {
        self.metadata.first()
    }

    /// Map the first metadata block into a canonical reading.
    pub fn to_reading(&self, observed_at: DateTime<Utc>) -> Option<SensorReading> {
        self.first_metadata().map(|m| SensorReading {
            water_level_m: m.surface_depth_m,
            velocity_mps: m.velocity,
            flow_rate_m3ps: m.volume,
            observed_at,
        })
    }
}

/// Typed inbound payload, keyed by the header's message type.
///
/// Decode failures land in `Invalid` rather than an implicit empty
/// object; unknown message types in `Unrecognized`. Neither is fatal
/// to the read loop.
#[derive(Debug, Clone)]
pub enum Payload {
    /// INFERENCE_RESP, ALARM_OCCUR_RESP, ALARM_RELEASE_RESP
    Inference(InferenceBody),
    /// SET_ALARM_RESP (logged only)
    AlarmAck(serde_json::Value),
    /// Any other message type
    Unrecognized(serde_json::Value),
    /// Body was not valid JSON
    Invalid,
}

impl Payload {
    /// Decode a body for the given message type. An empty body decodes
    /// as an empty object, matching the appliance's idle responses.
    pub fn decode(msg_type: u16, body: &[u8]) -> Self {
        let value: serde_json::Value = if body.is_empty() {
            serde_json::Value::Object(Default::default())
        } else {
            match serde_json::from_slice(body) {
                Ok(v) => v,
                Err(e) => {
                    tracing::warn!(msg_type = msg_type, error = %e, "Invalid JSON body");
                    return Payload::Invalid;
                }
            }
        };

        match msg_type {
            INFERENCE_RESP | ALARM_OCCUR_RESP | ALARM_RELEASE_RESP => {
                match serde_json::from_value::<InferenceBody>(value) {
                    Ok(body) => Payload::Inference(body),
                    Err(_) => Payload::Invalid,
                }
            }
            SET_ALARM_RESP => Payload::AlarmAck(value),
            _ => Payload::Unrecognized(value),
        }
    }
}

/// One decoded inbound frame
#[derive(Debug, Clone)]
pub struct InboundFrame {
    pub header: FrameHeader,
    pub payload: Payload,
}

impl InboundFrame {
    /// Split a length-delimited frame payload (header + body) into a
    /// typed frame. `payload` is the `total_len` bytes after the
    /// length prefix.
    pub fn decode(payload: &[u8]) -> Result<Self> {
        let header = FrameHeader::unpack(payload)?;
        let body = &payload[HEADER_LEN..];
        Ok(Self {
            header,
            payload: Payload::decode(header.msg_type, body),
        })
    }
}

/// Validate a received `total_len` before allocating for it.
pub fn check_frame_len(total_len: usize) -> Result<()> {
    if total_len < HEADER_LEN {
        return Err(Error::Frame(format!(
            "total_len {} shorter than header",
            total_len
        )));
    }
    if total_len > MAX_FRAME_LEN {
        return Err(Error::Frame(format!(
            "total_len {} exceeds cap {}",
            total_len, MAX_FRAME_LEN
        )));
    }
    Ok(())
}

/// Encode an outbound frame: length prefix, header, serialized body.
pub fn encode_frame(header: &FrameHeader, body: &serde_json::Value) -> Result<Vec<u8>> {
    let body_bytes = serde_json::to_vec(body)?;
    let total_len = (HEADER_LEN + body_bytes.len()) as u32;

    let mut frame = Vec::with_capacity(LEN_PREFIX + total_len as usize);
    frame.extend_from_slice(&total_len.to_be_bytes());
    frame.extend_from_slice(&header.pack());
    frame.extend_from_slice(&body_bytes);
    Ok(frame)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn header_pack_unpack_roundtrip() {
        let header = FrameHeader {
            msg_type: INFERENCE_RESP,
            tx_id: 42,
            flags: 3,
            status: -7,
        };
        let packed = header.pack();
        assert_eq!(packed.len(), HEADER_LEN);
        assert_eq!(FrameHeader::unpack(&packed).unwrap(), header);
    }

    #[test]
    fn header_is_big_endian() {
        let header = FrameHeader::new(0x0102, 0x03040506);
        let packed = header.pack();
        assert_eq!(&packed[0..2], &[0x01, 0x02]);
        assert_eq!(&packed[2..6], &[0x03, 0x04, 0x05, 0x06]);
    }

    #[test]
    fn rejects_short_header() {
        assert!(FrameHeader::unpack(&[0u8; 4]).is_err());
    }

    #[test]
    fn encode_frame_length_invariant() {
        let header = FrameHeader::new(INFERENCE_REQ, 1);
        let body = json!({"type": "inference", "channel": 0});
        let frame = encode_frame(&header, &body).unwrap();

        let total_len = u32::from_be_bytes(frame[0..4].try_into().unwrap()) as usize;
        assert_eq!(total_len, frame.len() - LEN_PREFIX);
        assert_eq!(total_len, HEADER_LEN + serde_json::to_vec(&body).unwrap().len());
    }

    #[test]
    fn decode_inference_metadata() {
        let body = json!({
            "metadata": [
                {"channel": 1, "surface_depth_m": 0.12, "velocity": 1.5, "volume": 3.2},
                {"channel": 2, "surface_depth_m": 0.50, "velocity": 0.1, "volume": 0.4}
            ]
        });
        let payload = Payload::decode(INFERENCE_RESP, &serde_json::to_vec(&body).unwrap());
        let Payload::Inference(inference) = payload else {
            panic!("expected inference payload");
        };

        let reading = inference.to_reading(Utc::now()).unwrap();
        assert_eq!(reading.water_level_m, 0.12);
        assert_eq!(reading.velocity_mps, 1.5);
        assert_eq!(reading.flow_rate_m3ps, 3.2);
    }

    #[test]
    fn missing_metadata_yields_no_reading() {
        let payload = Payload::decode(INFERENCE_RESP, b"{\"metadata\":[]}");
        let Payload::Inference(inference) = payload else {
            panic!("expected inference payload");
        };
        assert!(inference.to_reading(Utc::now()).is_none());

        let payload = Payload::decode(ALARM_OCCUR_RESP, b"{}");
        let Payload::Inference(inference) = payload else {
            panic!("expected inference payload");
        };
        assert!(inference.first_metadata().is_none());
    }

    #[test]
    fn invalid_json_is_explicit_variant() {
        let payload = Payload::decode(INFERENCE_RESP, b"{not json");
        assert!(matches!(payload, Payload::Invalid));
    }

    #[test]
    fn unknown_message_type_is_unrecognized() {
        let payload = Payload::decode(9999, b"{\"hello\":1}");
        assert!(matches!(payload, Payload::Unrecognized(_)));
    }

    #[test]
    fn alarm_ack_is_logged_variant() {
        let payload = Payload::decode(SET_ALARM_RESP, b"{\"result\":\"ok\"}");
        assert!(matches!(payload, Payload::AlarmAck(_)));
    }

    #[test]
    fn empty_body_decodes_as_empty_object() {
        let payload = Payload::decode(SET_ALARM_RESP, b"");
        assert!(matches!(payload, Payload::AlarmAck(_)));
    }

    #[test]
    fn frame_len_bounds() {
        assert!(check_frame_len(HEADER_LEN).is_ok());
        assert!(check_frame_len(HEADER_LEN - 1).is_err());
        assert!(check_frame_len(MAX_FRAME_LEN + 1).is_err());
    }

    #[test]
    fn inbound_frame_decode() {
        let body = json!({"metadata": [{"surface_depth_m": 0.08, "velocity": 0.9, "volume": 1.1}]});
        let header = FrameHeader::new(INFERENCE_RESP, 7);
        let frame = encode_frame(&header, &body).unwrap();

        let decoded = InboundFrame::decode(&frame[LEN_PREFIX..]).unwrap();
        assert_eq!(decoded.header.msg_type, INFERENCE_RESP);
        assert_eq!(decoded.header.tx_id, 7);
        assert!(matches!(decoded.payload, Payload::Inference(_)));
    }
}
