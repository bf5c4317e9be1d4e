//! Wire encoding for [`ControlMessage`].
//!
//! A single frame is a JSON object, capped at [`MAX_FRAME_SIZE`] bytes once
//! encoded. Decoding never fails on an unrecognized `type` (see
//! [`ControlMessage::Unknown`]) — only on malformed JSON or a missing
//! required field does `decode` return an error.

use crate::error::ProtocolError;
use crate::message::ControlMessage;

/// Maximum size, in bytes, of a single encoded control frame (1 MiB).
pub const MAX_FRAME_SIZE: usize = 1024 * 1024;

/// Serializes a message to its wire form, rejecting frames over
/// [`MAX_FRAME_SIZE`] before they are ever written to a socket.
pub fn encode(message: &ControlMessage) -> Result<String, ProtocolError> {
    let text =
        serde_json::to_string(message).map_err(|e| ProtocolError::Malformed(e.to_string()))?;
    if text.len() > MAX_FRAME_SIZE {
        return Err(ProtocolError::TooLarge(text.len()));
    }
    Ok(text)
}

/// Parses a wire frame into a [`ControlMessage`].
///
/// Returns [`ProtocolError::TooLarge`] if the frame itself exceeds the
/// cap (the receiver should close the channel), and
/// [`ProtocolError::Malformed`] for invalid JSON or a missing required
/// field. An unrecognized `type` value is not an error — see
/// [`ControlMessage::Unknown`].
pub fn decode(frame: &str) -> Result<ControlMessage, ProtocolError> {
    if frame.len() > MAX_FRAME_SIZE {
        return Err(ProtocolError::TooLarge(frame.len()));
    }
    serde_json::from_str(frame).map_err(|e| ProtocolError::Malformed(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::HeaderMap;

    #[test]
    fn round_trips_request() {
        let msg = ControlMessage::Request {
            request_id: "abc123".into(),
            method: "GET".into(),
            path: "/ping".into(),
            headers: HeaderMap::new(),
            body: None,
        };
        let text = encode(&msg).unwrap();
        assert!(text.contains("\"type\":\"request\""));
        let back = decode(&text).unwrap();
        match back {
            ControlMessage::Request { request_id, .. } => assert_eq!(request_id, "abc123"),
            other => panic!("unexpected variant: {other:?}"),
        }
    }

    #[test]
    fn unknown_type_does_not_error() {
        let frame = r#"{"type":"ping-v2","foo":"bar"}"#;
        let msg = decode(frame).unwrap();
        assert!(matches!(msg, ControlMessage::Unknown));
    }

    #[test]
    fn missing_required_field_is_malformed() {
        let frame = r#"{"type":"registered","subdomain":"app"}"#; // missing url
        let err = decode(frame).unwrap_err();
        assert!(matches!(err, ProtocolError::Malformed(_)));
    }

    #[test]
    fn invalid_json_is_malformed() {
        let err = decode("not json").unwrap_err();
        assert!(matches!(err, ProtocolError::Malformed(_)));
    }

    #[test]
    fn oversize_frame_is_rejected() {
        let huge = "a".repeat(MAX_FRAME_SIZE + 1);
        let err = decode(&huge).unwrap_err();
        assert!(matches!(err, ProtocolError::TooLarge(_)));
    }
}
