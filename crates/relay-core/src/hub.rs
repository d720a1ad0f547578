//! Per-room broadcast hub.
//!
//! A hub is an actor: one task owns the room's membership and processes a
//! single queue of commands in order. Registration, unregistration,
//! broadcasts and teardown are therefore never interleaved, and the
//! membership map needs no lock.
//!
//! ```text
//!  read pumps ──▶ ┌──────────────┐ ──▶ client queues ──▶ write pumps
//!                 │   Hub loop   │
//!  manager ─────▶ └──────┬───────┘
//!                        └──▶ store (detached)
//! ```

use crate::client::{ClientHandle, ClientId, Delivery};
use crate::store::{insert_with_timeout, MessageStore};
use bytes::Bytes;
use chrono::Utc;
use relay_protocol::{codec, ChatMessage, RoomId};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info, trace, warn};

/// Hub errors.
#[derive(Debug, Error)]
pub enum HubError {
    /// The hub loop has stopped.
    #[error("Hub for room '{0}' is closed")]
    Closed(RoomId),
}

/// Hub configuration.
#[derive(Debug, Clone)]
pub struct HubConfig {
    /// Capacity of each client's outbound queue.
    pub queue_capacity: usize,
    /// Number of messages replayed to a new client.
    pub history_limit: usize,
    /// Upper bound for any single store call.
    pub store_timeout: Duration,
    /// Capacity of the hub's command queue.
    pub intake_capacity: usize,
}

impl Default for HubConfig {
    fn default() -> Self {
        Self {
            queue_capacity: 256,
            history_limit: 50,
            store_timeout: Duration::from_secs(5),
            intake_capacity: 1024,
        }
    }
}

/// Hub counters.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HubStats {
    /// Current members.
    pub members: usize,
    /// Messages accepted and fanned out.
    pub relayed: u64,
    /// Payloads that failed to parse.
    pub malformed: u64,
    /// Members removed because their queue was full or gone.
    pub evicted: u64,
}

enum Command {
    Register(ClientHandle),
    Unregister(ClientId),
    Broadcast(Bytes),
    Members(oneshot::Sender<Vec<ClientId>>),
    Stats(oneshot::Sender<HubStats>),
    Shutdown(oneshot::Sender<usize>),
}

/// The hub actor state.
pub struct Hub {
    room: RoomId,
    members: HashMap<ClientId, ClientHandle>,
    store: Arc<dyn MessageStore>,
    store_timeout: Duration,
    stats: HubStats,
}

impl Hub {
    /// Start a hub for `room` and return a handle to it.
    ///
    /// The loop task is running by the time this returns.
    #[must_use]
    pub fn spawn(
        room: impl Into<RoomId>,
        store: Arc<dyn MessageStore>,
        config: &HubConfig,
    ) -> HubHandle {
        let room = room.into();
        let (tx, rx) = mpsc::channel(config.intake_capacity.max(1));

        let hub = Hub {
            room: room.clone(),
            members: HashMap::new(),
            store,
            store_timeout: config.store_timeout,
            stats: HubStats::default(),
        };
        tokio::spawn(hub.run(rx));

        HubHandle {
            room: Arc::from(room),
            tx,
        }
    }

    async fn run(mut self, mut rx: mpsc::Receiver<Command>) {
        debug!(room = %self.room, "Hub started");

        while let Some(command) = rx.recv().await {
            match command {
                Command::Register(client) => self.register(client),
                Command::Unregister(id) => self.unregister(&id),
                Command::Broadcast(raw) => self.broadcast(&raw),
                Command::Members(reply) => {
                    let _ = reply.send(self.members.keys().cloned().collect());
                }
                Command::Stats(reply) => {
                    let _ = reply.send(self.stats());
                }
                Command::Shutdown(reply) => {
                    let closed = self.close_all();
                    info!(room = %self.room, clients = closed, "Hub shut down");
                    let _ = reply.send(closed);
                    return;
                }
            }
        }

        // Every handle is gone; nobody can reach this hub any more.
        self.close_all();
        debug!(room = %self.room, "Hub stopped");
    }

    fn register(&mut self, client: ClientHandle) {
        debug!(room = %self.room, client = %client.id(), user = %client.username(), "Client registered");
        // Same id twice replaces the old handle, closing its queue.
        if let Some(previous) = self.members.insert(client.id().clone(), client) {
            warn!(room = %self.room, client = %previous.id(), "Replaced existing registration");
        }
    }

    fn unregister(&mut self, id: &ClientId) {
        if self.members.remove(id).is_some() {
            debug!(room = %self.room, client = %id, "Client unregistered");
        }
    }

    fn broadcast(&mut self, raw: &[u8]) {
        let inbound = match codec::decode_inbound(raw) {
            Ok(inbound) => inbound,
            Err(e) => {
                self.stats.malformed += 1;
                warn!(room = %self.room, error = %e, "Dropping malformed message");
                return;
            }
        };

        let message = inbound.canonicalize(&self.room, Utc::now());
        let payload = match codec::encode(&message) {
            Ok(payload) => payload,
            Err(e) => {
                warn!(room = %self.room, error = %e, "Failed to encode message");
                return;
            }
        };

        self.persist(message);
        self.fan_out(payload);
        self.stats.relayed += 1;
    }

    /// Write the message to the store without waiting for the outcome.
    fn persist(&self, message: ChatMessage) {
        let store = Arc::clone(&self.store);
        let timeout = self.store_timeout;
        tokio::spawn(async move {
            if let Err(e) = insert_with_timeout(store.as_ref(), &message, timeout).await {
                warn!(room = %message.room_id, error = %e, "Failed to persist message");
            }
        });
    }

    fn fan_out(&mut self, payload: Bytes) {
        let mut evicted = Vec::new();

        for (id, client) in &self.members {
            match client.offer(payload.clone()) {
                Delivery::Queued => {}
                Delivery::Full => {
                    warn!(room = %self.room, client = %id, "Evicting slow consumer");
                    evicted.push(id.clone());
                }
                Delivery::Disconnected => {
                    debug!(room = %self.room, client = %id, "Dropping disconnected client");
                    evicted.push(id.clone());
                }
            }
        }

        // Removing the handle closes the queue.
        for id in &evicted {
            self.members.remove(id);
        }
        self.stats.evicted += evicted.len() as u64;

        trace!(
            room = %self.room,
            recipients = self.members.len(),
            evicted = evicted.len(),
            "Broadcast delivered"
        );
    }

    fn close_all(&mut self) -> usize {
        let count = self.members.len();
        self.members.clear();
        count
    }

    fn stats(&self) -> HubStats {
        HubStats {
            members: self.members.len(),
            ..self.stats.clone()
        }
    }
}

/// A cheap, cloneable reference to a running hub.
#[derive(Clone)]
pub struct HubHandle {
    room: Arc<str>,
    tx: mpsc::Sender<Command>,
}

impl std::fmt::Debug for HubHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HubHandle")
            .field("room", &self.room)
            .field("closed", &self.is_closed())
            .finish()
    }
}

impl HubHandle {
    /// The room this hub serves.
    #[must_use]
    pub fn room(&self) -> &str {
        &self.room
    }

    /// Whether the hub loop has stopped.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }

    /// Whether both handles point at the same hub.
    #[must_use]
    pub fn same_hub(&self, other: &HubHandle) -> bool {
        self.tx.same_channel(&other.tx)
    }

    /// Add a client to the room.
    ///
    /// # Errors
    ///
    /// Returns [`HubError::Closed`] if the hub has stopped; the client's
    /// queue is closed in that case.
    pub async fn register(&self, client: ClientHandle) -> Result<(), HubError> {
        self.send(Command::Register(client)).await
    }

    /// Remove a client from the room. Unknown clients are ignored.
    ///
    /// # Errors
    ///
    /// Returns [`HubError::Closed`] if the hub has stopped.
    pub async fn unregister(&self, id: &ClientId) -> Result<(), HubError> {
        self.send(Command::Unregister(id.clone())).await
    }

    /// Submit a raw client payload for broadcast.
    ///
    /// # Errors
    ///
    /// Returns [`HubError::Closed`] if the hub has stopped.
    pub async fn broadcast(&self, payload: impl Into<Bytes>) -> Result<(), HubError> {
        self.send(Command::Broadcast(payload.into())).await
    }

    /// Current member ids.
    ///
    /// # Errors
    ///
    /// Returns [`HubError::Closed`] if the hub has stopped.
    pub async fn members(&self) -> Result<Vec<ClientId>, HubError> {
        let (reply, rx) = oneshot::channel();
        self.send(Command::Members(reply)).await?;
        rx.await.map_err(|_| self.closed())
    }

    /// Current member count.
    ///
    /// # Errors
    ///
    /// Returns [`HubError::Closed`] if the hub has stopped.
    pub async fn member_count(&self) -> Result<usize, HubError> {
        Ok(self.stats().await?.members)
    }

    /// Snapshot of the hub's counters.
    ///
    /// # Errors
    ///
    /// Returns [`HubError::Closed`] if the hub has stopped.
    pub async fn stats(&self) -> Result<HubStats, HubError> {
        let (reply, rx) = oneshot::channel();
        self.send(Command::Stats(reply)).await?;
        rx.await.map_err(|_| self.closed())
    }

    /// Close every member's queue and stop the hub loop.
    ///
    /// Returns the number of members that were disconnected.
    ///
    /// # Errors
    ///
    /// Returns [`HubError::Closed`] if the hub had already stopped.
    pub async fn shutdown(&self) -> Result<usize, HubError> {
        let (reply, rx) = oneshot::channel();
        self.send(Command::Shutdown(reply)).await?;
        rx.await.map_err(|_| self.closed())
    }

    async fn send(&self, command: Command) -> Result<(), HubError> {
        self.tx.send(command).await.map_err(|_| self.closed())
    }

    fn closed(&self) -> HubError {
        HubError::Closed(self.room.to_string())
    }
}
