//! Serialization and deserialization for the relay wire protocol.
//!
//! Frames are UTF-8 JSON text. Clients that can only send binary WebSocket
//! frames may send the same JSON bytes; [`decode_bytes`] accepts those.

use serde::Serialize;
use serde::de::DeserializeOwned;

/// Error type for codec encode/decode operations.
#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    /// Serialization failed.
    #[error("encode error: {0}")]
    Encode(#[source] serde_json::Error),
    /// The frame is not valid JSON or does not match a known event.
    #[error("decode error: {0}")]
    Decode(#[source] serde_json::Error),
}

/// Encodes an event into a JSON text frame.
///
/// # Errors
///
/// Returns `CodecError::Encode` if the event cannot be serialized.
pub fn encode<T: Serialize>(event: &T) -> Result<String, CodecError> {
    serde_json::to_string(event).map_err(CodecError::Encode)
}

/// Decodes an event from a JSON text frame.
///
/// # Errors
///
/// Returns `CodecError::Decode` if the text is not a well-formed event.
pub fn decode<T: DeserializeOwned>(text: &str) -> Result<T, CodecError> {
    serde_json::from_str(text).map_err(CodecError::Decode)
}

/// Decodes an event from the raw bytes of a binary frame holding JSON.
///
/// # Errors
///
/// Returns `CodecError::Decode` if the bytes are not a well-formed event.
pub fn decode_bytes<T: DeserializeOwned>(bytes: &[u8]) -> Result<T, CodecError> {
    serde_json::from_slice(bytes).map_err(CodecError::Decode)
}
