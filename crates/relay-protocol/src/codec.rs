//! Codec for Relay packets.
//!
//! Packets travel as JSON text inside WebSocket frames. Decoding enforces
//! the inbound frame-size ceiling; encoding is unbounded because outbound
//! delivered-message payloads may legitimately exceed the client limit.

use thiserror::Error;

use crate::packet::{CommandEnvelope, Packet};

/// Maximum inbound frame size (4 KiB).
pub const MAX_FRAME_SIZE: usize = 4 * 1024;

/// Protocol errors that can occur during encoding/decoding.
#[derive(Debug, Error)]
pub enum ProtocolError {
    /// Frame exceeds the inbound size ceiling.
    #[error("frame size {0} exceeds maximum {MAX_FRAME_SIZE}")]
    FrameTooLarge(usize),

    /// Malformed JSON envelope.
    #[error("malformed envelope: {0}")]
    Malformed(#[from] serde_json::Error),
}

/// Encode an outbound packet to JSON text.
///
/// # Errors
///
/// Returns an error if serialization fails.
pub fn encode(packet: &Packet) -> Result<String, ProtocolError> {
    Ok(serde_json::to_string(packet)?)
}

/// Decode an inbound frame into a command envelope.
///
/// # Errors
///
/// Returns an error if the frame exceeds [`MAX_FRAME_SIZE`] or is not a
/// valid envelope.
pub fn decode(data: &[u8]) -> Result<CommandEnvelope, ProtocolError> {
    if data.len() > MAX_FRAME_SIZE {
        return Err(ProtocolError::FrameTooLarge(data.len()));
    }
    Ok(serde_json::from_slice(data)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::packet::{Command, Packet, CODE_OK};
    use serde_json::json;

    #[test]
    fn test_encode_decode_roundtrip() {
        let envelopes = vec![
            CommandEnvelope::new(Command::Heartbeat),
            CommandEnvelope::new(Command::Chat)
                .with_msg_id("m-1")
                .with_payload(json!({"conversation_id": "c1", "content": "hello"})),
            CommandEnvelope::new(Command::Ack).with_payload(json!({"ack_seq": 12})),
        ];

        for envelope in envelopes {
            let encoded = serde_json::to_vec(&envelope).unwrap();
            let decoded = decode(&encoded).unwrap();
            assert_eq!(envelope, decoded);
        }
    }

    #[test]
    fn test_decode_rejects_oversized_frame() {
        let padding = "x".repeat(MAX_FRAME_SIZE);
        let frame = format!("{{\"cmd\":1,\"payload\":\"{padding}\"}}");
        match decode(frame.as_bytes()) {
            Err(ProtocolError::FrameTooLarge(_)) => {}
            other => panic!("expected FrameTooLarge, got {other:?}"),
        }
    }

    #[test]
    fn test_decode_rejects_malformed() {
        match decode(b"{\"cmd\": ") {
            Err(ProtocolError::Malformed(_)) => {}
            other => panic!("expected Malformed, got {other:?}"),
        }
        // A JSON object without a cmd field is malformed too.
        assert!(decode(b"{\"msg_id\":\"m1\"}").is_err());
    }

    #[test]
    fn test_encode_packet_is_compact() {
        let packet = Packet::heartbeat_ack();
        let text = encode(&packet).unwrap();
        assert_eq!(text, format!("{{\"cmd\":1,\"code\":{CODE_OK}}}"));
    }

    #[test]
    fn test_encode_allows_large_outbound() {
        let packet =
            Packet::new(Command::Chat).with_payload(json!({"content": "y".repeat(MAX_FRAME_SIZE)}));
        assert!(encode(&packet).is_ok());
    }
}
