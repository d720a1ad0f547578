//! Hub registry.
//!
//! The manager maps room ids to running hubs. Lookups and listings share a
//! read lock; creation and teardown take the write lock, and creation
//! re-checks under it so two racing connections never start two hubs for
//! the same room.

use crate::hub::{Hub, HubConfig, HubHandle};
use crate::store::MessageStore;
use relay_protocol::RoomId;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

/// Registry of per-room hubs.
pub struct HubManager {
    hubs: RwLock<HashMap<RoomId, HubHandle>>,
    store: Arc<dyn MessageStore>,
    config: HubConfig,
    spawned: AtomicUsize,
}

impl HubManager {
    /// Create a manager whose hubs persist to `store`.
    #[must_use]
    pub fn new(store: Arc<dyn MessageStore>, config: HubConfig) -> Self {
        info!("Creating hub manager with config: {:?}", config);
        Self {
            hubs: RwLock::new(HashMap::new()),
            store,
            config,
            spawned: AtomicUsize::new(0),
        }
    }

    /// The message store shared by all hubs.
    #[must_use]
    pub fn store(&self) -> &Arc<dyn MessageStore> {
        &self.store
    }

    /// Hub configuration.
    #[must_use]
    pub fn config(&self) -> &HubConfig {
        &self.config
    }

    /// Get the hub for `room`, starting it if needed.
    pub async fn get_or_create(&self, room: &str) -> HubHandle {
        if let Some(hub) = self.hubs.read().await.get(room) {
            return hub.clone();
        }

        let mut hubs = self.hubs.write().await;
        if let Some(hub) = hubs.get(room) {
            debug!(room = %room, "Hub created concurrently");
            return hub.clone();
        }

        let hub = Hub::spawn(room, Arc::clone(&self.store), &self.config);
        hubs.insert(room.to_string(), hub.clone());
        self.spawned.fetch_add(1, Ordering::Relaxed);

        info!(room = %room, rooms = hubs.len(), "Hub created");
        hub
    }

    /// Get the hub for `room` if one is running.
    pub async fn get(&self, room: &str) -> Option<HubHandle> {
        self.hubs.read().await.get(room).cloned()
    }

    /// Snapshot of rooms with a live hub.
    pub async fn list_rooms(&self) -> Vec<RoomId> {
        self.hubs.read().await.keys().cloned().collect()
    }

    /// Number of live hubs.
    pub async fn room_count(&self) -> usize {
        self.hubs.read().await.len()
    }

    /// Total number of hubs started over the manager's lifetime.
    #[must_use]
    pub fn hubs_spawned(&self) -> usize {
        self.spawned.load(Ordering::Relaxed)
    }

    /// Tear down the hub for `room`.
    ///
    /// Every member's queue is closed, which makes its write pump send a
    /// close frame and disconnect. The hub loop then exits and the room is
    /// removed from the registry.
    ///
    /// Returns the number of disconnected clients, or `None` if no hub was
    /// running for `room`.
    pub async fn force_close(&self, room: &str) -> Option<usize> {
        let mut hubs = self.hubs.write().await;
        let hub = hubs.remove(room)?;

        let disconnected = match hub.shutdown().await {
            Ok(count) => count,
            Err(e) => {
                warn!(room = %room, error = %e, "Hub already stopped");
                0
            }
        };

        info!(room = %room, clients = disconnected, "Hub closed");
        Some(disconnected)
    }

    /// Tear down every hub.
    ///
    /// Returns the total number of disconnected clients.
    pub async fn close_all(&self) -> usize {
        let drained: Vec<(RoomId, HubHandle)> = self.hubs.write().await.drain().collect();

        let mut total = 0;
        for (room, hub) in drained {
            match hub.shutdown().await {
                Ok(count) => total += count,
                Err(e) => debug!(room = %room, error = %e, "Hub already stopped"),
            }
        }
        total
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::{Client, ClientId};
    use crate::store::MemoryStore;

    fn manager() -> HubManager {
        HubManager::new(Arc::new(MemoryStore::new()), HubConfig::default())
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_get_or_create_returns_one_hub() {
        let manager = Arc::new(manager());

        let tasks: Vec<_> = (0..32)
            .map(|_| {
                let manager = Arc::clone(&manager);
                tokio::spawn(async move { manager.get_or_create("general").await })
            })
            .collect();

        let mut hubs = Vec::new();
        for task in tasks {
            hubs.push(task.await.unwrap());
        }

        assert!(hubs.iter().all(|h| h.same_hub(&hubs[0])));
        assert_eq!(manager.hubs_spawned(), 1);
        assert_eq!(manager.room_count().await, 1);
    }

    #[tokio::test]
    async fn test_hub_is_running_when_returned() {
        let manager = manager();
        let hub = manager.get_or_create("general").await;

        assert_eq!(hub.room(), "general");
        assert!(!hub.is_closed());
        assert_eq!(hub.member_count().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_list_rooms() {
        let manager = manager();
        manager.get_or_create("a").await;
        manager.get_or_create("b").await;
        manager.get_or_create("a").await;

        let mut rooms = manager.list_rooms().await;
        rooms.sort();
        assert_eq!(rooms, ["a", "b"]);
        assert_eq!(manager.hubs_spawned(), 2);
        assert!(manager.get("c").await.is_none());
    }

    #[tokio::test]
    async fn test_force_close_disconnects_members() {
        let manager = manager();
        let hub = manager.get_or_create("doomed").await;

        let mut queues = Vec::new();
        for i in 0..3 {
            let (handle, rx) = Client::new(ClientId::new(format!("c{}", i)), "u", 8);
            hub.register(handle).await.unwrap();
            queues.push(rx);
        }

        assert_eq!(manager.force_close("doomed").await, Some(3));
        for rx in &mut queues {
            assert!(rx.recv().await.is_none());
        }
        assert!(manager.list_rooms().await.is_empty());
        assert!(hub.is_closed());

        // A later connection gets a fresh hub.
        let fresh = manager.get_or_create("doomed").await;
        assert!(!fresh.same_hub(&hub));
        assert_eq!(manager.hubs_spawned(), 2);
    }

    #[tokio::test]
    async fn test_force_close_unknown_room() {
        let manager = manager();
        assert_eq!(manager.force_close("missing").await, None);
    }

    #[tokio::test]
    async fn test_close_all() {
        let manager = manager();
        for room in ["a", "b"] {
            let hub = manager.get_or_create(room).await;
            let (handle, _rx) = Client::new(ClientId::new(room), "u", 8);
            hub.register(handle).await.unwrap();
        }

        assert_eq!(manager.close_all().await, 2);
        assert_eq!(manager.room_count().await, 0);
    }
}
