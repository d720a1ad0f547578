//! JSON codec for chat messages.
//!
//! Inbound payloads are size-checked before parsing so an oversized frame
//! never reaches serde.

use bytes::Bytes;
use thiserror::Error;

use crate::message::{ChatMessage, InboundMessage};

/// Maximum inbound payload size (64 KiB).
pub const MAX_PAYLOAD_SIZE: usize = 64 * 1024;

/// Errors raised while decoding or encoding payloads.
#[derive(Debug, Error)]
pub enum ProtocolError {
    /// Payload exceeds [`MAX_PAYLOAD_SIZE`].
    #[error("Payload size {0} exceeds maximum {MAX_PAYLOAD_SIZE}")]
    PayloadTooLarge(usize),

    /// Malformed JSON or mistyped fields.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Decode a client payload.
///
/// # Errors
///
/// Returns an error if the payload is too large or is not a valid message.
pub fn decode_inbound(data: &[u8]) -> Result<InboundMessage, ProtocolError> {
    if data.len() > MAX_PAYLOAD_SIZE {
        return Err(ProtocolError::PayloadTooLarge(data.len()));
    }
    Ok(serde_json::from_slice(data)?)
}

/// Encode a canonical message for the wire.
///
/// # Errors
///
/// Returns an error if serialization fails.
pub fn encode(message: &ChatMessage) -> Result<Bytes, ProtocolError> {
    Ok(Bytes::from(serde_json::to_vec(message)?))
}

/// Decode a canonical message, as produced by [`encode`].
///
/// # Errors
///
/// Returns an error if the payload is not a complete message.
pub fn decode(data: &[u8]) -> Result<ChatMessage, ProtocolError> {
    Ok(serde_json::from_slice(data)?)
}
