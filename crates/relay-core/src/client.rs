//! Client handles.
//!
//! A client is split in two when it is created: the [`ClientHandle`] is moved
//! into the hub and owns the sending side of the outbound queue, while the
//! receiving side stays with the connection's write pump. Dropping the
//! handle is the only way the queue gets closed, which makes closing it
//! twice impossible.

use bytes::Bytes;
use relay_transport::ConnectionId;
use tokio::sync::mpsc::{self, error::TrySendError};

/// Identifies a client for the lifetime of its connection.
pub type ClientId = ConnectionId;

/// Default display name for clients that did not provide one.
pub const ANONYMOUS: &str = "Anonymous";

/// Result of offering a payload to a client's queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    /// The payload was queued.
    Queued,
    /// The queue is full.
    Full,
    /// The write pump has gone away.
    Disconnected,
}

/// Hub-side half of a client.
#[derive(Debug)]
pub struct ClientHandle {
    id: ClientId,
    username: String,
    outbound: mpsc::Sender<Bytes>,
}

/// Constructor namespace for client halves.
pub struct Client;

impl Client {
    /// Create a client with an outbound queue of `queue_capacity` payloads.
    ///
    /// Returns the handle to register with a hub and the receiver the write
    /// pump drains.
    #[must_use]
    pub fn new(
        id: ClientId,
        username: impl Into<String>,
        queue_capacity: usize,
    ) -> (ClientHandle, mpsc::Receiver<Bytes>) {
        let (outbound, rx) = mpsc::channel(queue_capacity.max(1));
        let handle = ClientHandle {
            id,
            username: username.into(),
            outbound,
        };
        (handle, rx)
    }
}

impl ClientHandle {
    /// Client identifier.
    #[must_use]
    pub fn id(&self) -> &ClientId {
        &self.id
    }

    /// Display name.
    #[must_use]
    pub fn username(&self) -> &str {
        &self.username
    }

    /// A sender that does not keep the queue open.
    ///
    /// History replay uses this so it can never outlive the hub's decision
    /// to close the queue.
    #[must_use]
    pub fn weak_sender(&self) -> mpsc::WeakSender<Bytes> {
        self.outbound.downgrade()
    }

    /// Offer a payload without waiting.
    pub fn offer(&self, payload: Bytes) -> Delivery {
        match self.outbound.try_send(payload) {
            Ok(()) => Delivery::Queued,
            Err(TrySendError::Full(_)) => Delivery::Full,
            Err(TrySendError::Closed(_)) => Delivery::Disconnected,
        }
    }
}
