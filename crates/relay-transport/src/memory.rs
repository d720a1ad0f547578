//! In-memory connection adapter.
//!
//! [`pair`] returns the server-side halves of a connection together with a
//! [`Peer`] that plays the remote client. Used by tests to
//! drive pumps without a network.

use async_trait::async_trait;
use bytes::Bytes;
use tokio::sync::mpsc;

use crate::traits::{FrameSink, FrameSource, TransportError};

/// Something the server sent to the peer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PeerEvent {
    /// A text frame.
    Text(Bytes),
    /// The close frame.
    Close,
}

enum Inbound {
    Frame(Bytes),
    Fail(String),
}

/// Inbound half backed by a channel.
pub struct MemorySource {
    rx: mpsc::UnboundedReceiver<Inbound>,
}

/// Outbound half backed by a channel.
pub struct MemorySink {
    tx: mpsc::UnboundedSender<PeerEvent>,
    closed: bool,
}

/// The remote end of an in-memory connection.
pub struct Peer {
    inbound: Option<mpsc::UnboundedSender<Inbound>>,
    outbound: mpsc::UnboundedReceiver<PeerEvent>,
}

/// Create a connected source/sink pair and its peer.
#[must_use]
pub fn pair() -> (MemorySource, MemorySink, Peer) {
    let (in_tx, in_rx) = mpsc::unbounded_channel();
    let (out_tx, out_rx) = mpsc::unbounded_channel();
    (
        MemorySource { rx: in_rx },
        MemorySink {
            tx: out_tx,
            closed: false,
        },
        Peer {
            inbound: Some(in_tx),
            outbound: out_rx,
        },
    )
}

#[async_trait]
impl FrameSource for MemorySource {
    async fn recv(&mut self) -> Result<Option<Bytes>, TransportError> {
        match self.rx.recv().await {
            Some(Inbound::Frame(data)) => Ok(Some(data)),
            Some(Inbound::Fail(reason)) => Err(TransportError::ReceiveFailed(reason)),
            None => Ok(None),
        }
    }
}

#[async_trait]
impl FrameSink for MemorySink {
    async fn send_text(&mut self, data: Bytes) -> Result<(), TransportError> {
        if self.closed {
            return Err(TransportError::ConnectionClosed);
        }
        self.tx
            .send(PeerEvent::Text(data))
            .map_err(|_| TransportError::ConnectionClosed)
    }

    async fn close(&mut self) -> Result<(), TransportError> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;
        // Peer may have been dropped already
        let _ = self.tx.send(PeerEvent::Close);
        Ok(())
    }
}

impl Peer {
    /// Send a frame to the server.
    ///
    /// Returns `false` if the connection was already disconnected.
    pub fn send(&self, data: impl Into<Bytes>) -> bool {
        self.inbound
            .as_ref()
            .map(|tx| tx.send(Inbound::Frame(data.into())).is_ok())
            .unwrap_or(false)
    }

    /// Make the server's next read fail, as a broken socket would.
    pub fn fail(&self, reason: impl Into<String>) {
        if let Some(tx) = &self.inbound {
            let _ = tx.send(Inbound::Fail(reason.into()));
        }
    }

    /// Close the peer's sending side; the server reads a clean close.
    pub fn disconnect(&mut self) {
        self.inbound = None;
    }

    /// Wait for the next thing the server sends.
    ///
    /// Returns `None` once the server dropped its sink.
    pub async fn recv(&mut self) -> Option<PeerEvent> {
        self.outbound.recv().await
    }

    /// Take an already delivered event without waiting.
    pub fn try_recv(&mut self) -> Option<PeerEvent> {
        self.outbound.try_recv().ok()
    }

    /// Wait until the server sends its close frame, discarding text frames.
    ///
    /// Returns the text frames received before the close.
    pub async fn until_closed(&mut self) -> Vec<Bytes> {
        let mut frames = Vec::new();
        while let Some(event) = self.outbound.recv().await {
            match event {
                PeerEvent::Text(data) => frames.push(data),
                PeerEvent::Close => break,
            }
        }
        frames
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_frames_flow_both_ways() {
        let (mut source, mut sink, mut peer) = pair();

        assert!(peer.send("hello"));
        assert_eq!(source.recv().await.unwrap(), Some(Bytes::from("hello")));

        sink.send_text(Bytes::from("world")).await.unwrap();
        assert_eq!(peer.recv().await, Some(PeerEvent::Text(Bytes::from("world"))));
    }

    #[tokio::test]
    async fn test_close_is_idempotent() {
        let (_source, mut sink, mut peer) = pair();

        sink.close().await.unwrap();
        sink.close().await.unwrap();
        assert!(sink.send_text(Bytes::from("late")).await.is_err());

        assert_eq!(peer.recv().await, Some(PeerEvent::Close));
        assert!(peer.try_recv().is_none());
    }

    #[tokio::test]
    async fn test_fail_and_disconnect() {
        let (mut source, _sink, mut peer) = pair();

        peer.fail("reset by peer");
        assert!(matches!(
            source.recv().await,
            Err(TransportError::ReceiveFailed(_))
        ));

        peer.disconnect();
        assert!(source.recv().await.unwrap().is_none());
        assert!(!peer.send("ignored"));
    }
}
