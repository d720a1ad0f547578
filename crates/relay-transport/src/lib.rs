//! # relay-transport
//!
//! Connection adapters for the chat relay.
//!
//! A connection is split into two halves so that the read and write pumps
//! can run as independent tasks:
//!
//! - [`FrameSource`] - inbound payloads from the peer
//! - [`FrameSink`] - outbound text frames and the final close frame
//!
//! Two adapters are provided:
//!
//! - **WebSocket** - wraps an axum `WebSocket` (feature `websocket`)
//! - **Memory** - an in-process pair used by tests
//!
//! ```rust,ignore
//! use relay_transport::{FrameSink, FrameSource};
//!
//! async fn echo(mut source: impl FrameSource, mut sink: impl FrameSink) {
//!     while let Ok(Some(frame)) = source.recv().await {
//!         let _ = sink.send_text(frame).await;
//!     }
//!     let _ = sink.close().await;
//! }
//! ```

pub mod memory;
pub mod traits;

#[cfg(feature = "websocket")]
pub mod websocket;

pub use traits::{ConnectionId, FrameSink, FrameSource, TransportError};

#[cfg(feature = "websocket")]
pub use websocket::split_websocket;
