//! Transport abstraction traits for the relay.
//!
//! Pumps only ever see these traits, so the hub logic is independent of the
//! wire protocol that carries the frames.

use async_trait::async_trait;
use bytes::Bytes;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};
use thiserror::Error;

static CONNECTION_COUNTER: AtomicU64 = AtomicU64::new(0);

/// Unique identifier for a connection.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ConnectionId(pub String);

impl ConnectionId {
    /// Create a new connection ID.
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Generate a connection ID that is unique within this process.
    #[must_use]
    pub fn generate() -> Self {
        let timestamp = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_nanos())
            .unwrap_or_default();
        let seq = CONNECTION_COUNTER.fetch_add(1, Ordering::Relaxed);
        Self(format!("conn_{:x}_{}", timestamp, seq))
    }

    /// Get the ID as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<String> for ConnectionId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for ConnectionId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// Transport errors.
#[derive(Debug, Error)]
pub enum TransportError {
    /// Connection was closed.
    #[error("Connection closed")]
    ConnectionClosed,

    /// Failed to send data.
    #[error("Send failed: {0}")]
    SendFailed(String),

    /// Failed to receive data.
    #[error("Receive failed: {0}")]
    ReceiveFailed(String),
}

/// The inbound half of a connection.
#[async_trait]
pub trait FrameSource: Send {
    /// Receive the next payload from the peer.
    ///
    /// Returns `Ok(None)` when the peer closes the connection cleanly.
    async fn recv(&mut self) -> Result<Option<Bytes>, TransportError>;
}

/// The outbound half of a connection.
#[async_trait]
pub trait FrameSink: Send {
    /// Send a payload as a text frame.
    async fn send_text(&mut self, data: Bytes) -> Result<(), TransportError>;

    /// Send a close frame and shut the outbound half down.
    ///
    /// Closing an already closed sink is not an error.
    async fn close(&mut self) -> Result<(), TransportError>;
}
