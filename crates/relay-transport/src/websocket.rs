//! WebSocket adapter.
//!
//! Wraps an upgraded axum [`WebSocket`] and splits it into a
//! [`FrameSource`]/[`FrameSink`] pair.

use async_trait::async_trait;
use axum::extract::ws::{Message, WebSocket};
use bytes::Bytes;
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use tracing::{debug, trace, warn};

use crate::traits::{ConnectionId, FrameSink, FrameSource, TransportError};

/// Inbound half of a WebSocket connection.
pub struct WebSocketSource {
    id: ConnectionId,
    stream: SplitStream<WebSocket>,
    max_message_size: usize,
}

/// Outbound half of a WebSocket connection.
pub struct WebSocketSink {
    id: ConnectionId,
    sink: SplitSink<WebSocket, Message>,
    closed: bool,
}

/// Split an upgraded socket into its two halves.
#[must_use]
pub fn split_websocket(
    socket: WebSocket,
    id: ConnectionId,
    max_message_size: usize,
) -> (WebSocketSource, WebSocketSink) {
    let (sink, stream) = socket.split();
    (
        WebSocketSource {
            id: id.clone(),
            stream,
            max_message_size,
        },
        WebSocketSink {
            id,
            sink,
            closed: false,
        },
    )
}

#[async_trait]
impl FrameSource for WebSocketSource {
    async fn recv(&mut self) -> Result<Option<Bytes>, TransportError> {
        loop {
            let data = match self.stream.next().await {
                Some(Ok(Message::Text(text))) => Bytes::from(text),
                Some(Ok(Message::Binary(data))) => Bytes::from(data),
                Some(Ok(Message::Ping(_))) | Some(Ok(Message::Pong(_))) => {
                    // Pong replies are queued by the socket and flushed on the next write
                    continue;
                }
                Some(Ok(Message::Close(_))) => {
                    debug!(connection = %self.id, "Received close frame");
                    return Ok(None);
                }
                Some(Err(e)) => {
                    warn!(connection = %self.id, error = %e, "WebSocket error");
                    return Err(TransportError::ReceiveFailed(e.to_string()));
                }
                None => {
                    debug!(connection = %self.id, "WebSocket stream ended");
                    return Ok(None);
                }
            };

            if data.len() > self.max_message_size {
                warn!(
                    connection = %self.id,
                    size = data.len(),
                    max = self.max_message_size,
                    "Message too large"
                );
                return Err(TransportError::ReceiveFailed(format!(
                    "message of {} bytes exceeds limit of {}",
                    data.len(),
                    self.max_message_size
                )));
            }

            trace!(connection = %self.id, size = data.len(), "Frame received");
            return Ok(Some(data));
        }
    }
}

#[async_trait]
impl FrameSink for WebSocketSink {
    async fn send_text(&mut self, data: Bytes) -> Result<(), TransportError> {
        if self.closed {
            return Err(TransportError::ConnectionClosed);
        }

        let text =
            String::from_utf8(data.to_vec()).map_err(|e| TransportError::SendFailed(e.to_string()))?;
        self.sink
            .send(Message::Text(text))
            .await
            .map_err(|e| TransportError::SendFailed(e.to_string()))
    }

    async fn close(&mut self) -> Result<(), TransportError> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;

        // The peer may already be gone; a failed close frame is still a close.
        if let Err(e) = self.sink.send(Message::Close(None)).await {
            debug!(connection = %self.id, error = %e, "Close frame not delivered");
        }
        self.sink
            .close()
            .await
            .map_err(|e| TransportError::SendFailed(format!("Failed to close: {}", e)))
    }
}
