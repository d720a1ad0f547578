//! Message persistence.
//!
//! The hub writes every canonical message through a [`MessageStore`] without
//! waiting for the result, and clients read recent history from it once when
//! they connect. Both paths are bounded by a timeout so a slow store cannot
//! stall delivery.

use async_trait::async_trait;
use dashmap::DashMap;
use relay_protocol::{ChatMessage, RoomId};
use std::time::Duration;
use thiserror::Error;
use tracing::trace;

/// Store errors.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The operation did not finish in time.
    #[error("Store operation timed out after {0:?}")]
    Timeout(Duration),

    /// The backend rejected the operation.
    #[error("Store backend error: {0}")]
    Backend(String),
}

/// An asynchronous message store.
#[async_trait]
pub trait MessageStore: Send + Sync {
    /// Persist a canonical message.
    async fn insert(&self, message: &ChatMessage) -> Result<(), StoreError>;

    /// Fetch up to `limit` of the most recent messages in `room`,
    /// oldest first.
    async fn recent(&self, room: &str, limit: usize) -> Result<Vec<ChatMessage>, StoreError>;
}

/// [`MessageStore::insert`] bounded by `timeout`.
///
/// # Errors
///
/// Returns the store's error, or [`StoreError::Timeout`].
pub async fn insert_with_timeout(
    store: &dyn MessageStore,
    message: &ChatMessage,
    timeout: Duration,
) -> Result<(), StoreError> {
    tokio::time::timeout(timeout, store.insert(message))
        .await
        .map_err(|_| StoreError::Timeout(timeout))?
}

/// [`MessageStore::recent`] bounded by `timeout`.
///
/// # Errors
///
/// Returns the store's error, or [`StoreError::Timeout`].
pub async fn recent_with_timeout(
    store: &dyn MessageStore,
    room: &str,
    limit: usize,
    timeout: Duration,
) -> Result<Vec<ChatMessage>, StoreError> {
    tokio::time::timeout(timeout, store.recent(room, limit))
        .await
        .map_err(|_| StoreError::Timeout(timeout))?
}

/// In-process message store.
#[derive(Debug, Default)]
pub struct MemoryStore {
    rooms: DashMap<RoomId, Vec<ChatMessage>>,
    max_per_room: Option<usize>,
}

impl MemoryStore {
    /// Create an unbounded store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a store that keeps at most `max` messages per room,
    /// discarding the oldest inserted first.
    #[must_use]
    pub fn with_capacity_per_room(max: usize) -> Self {
        Self {
            rooms: DashMap::new(),
            max_per_room: Some(max),
        }
    }

    /// Number of stored messages in `room`.
    #[must_use]
    pub fn len(&self, room: &str) -> usize {
        self.rooms.get(room).map(|m| m.len()).unwrap_or(0)
    }

    /// Whether no message at all is stored.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.rooms.iter().all(|entry| entry.value().is_empty())
    }
}

#[async_trait]
impl MessageStore for MemoryStore {
    async fn insert(&self, message: &ChatMessage) -> Result<(), StoreError> {
        let mut messages = self.rooms.entry(message.room_id.clone()).or_default();
        messages.push(message.clone());

        if let Some(max) = self.max_per_room {
            if messages.len() > max {
                let excess = messages.len() - max;
                messages.drain(..excess);
            }
        }

        trace!(room = %message.room_id, stored = messages.len(), "Message stored");
        Ok(())
    }

    async fn recent(&self, room: &str, limit: usize) -> Result<Vec<ChatMessage>, StoreError> {
        let mut messages = self
            .rooms
            .get(room)
            .map(|m| m.value().clone())
            .unwrap_or_default();

        messages.sort_by_key(|m| m.timestamp);
        let skip = messages.len().saturating_sub(limit);
        Ok(messages.split_off(skip))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration as ChronoDuration, Utc};

    fn message_at(room: &str, content: &str, offset_secs: i64) -> ChatMessage {
        ChatMessage::new(room, "alice", content)
            .with_timestamp(Utc::now() + ChronoDuration::seconds(offset_secs))
    }

    #[tokio::test]
    async fn test_recent_is_latest_oldest_first() {
        let store = MemoryStore::new();
        for i in 0..60 {
            store
                .insert(&message_at("general", &i.to_string(), i))
                .await
                .unwrap();
        }
        store.insert(&message_at("random", "x", 0)).await.unwrap();

        let history = store.recent("general", 50).await.unwrap();
        assert_eq!(history.len(), 50);
        assert_eq!(history.first().unwrap().content, "10");
        assert_eq!(history.last().unwrap().content, "59");
        assert!(history.windows(2).all(|w| w[0].timestamp <= w[1].timestamp));
        assert!(history.iter().all(|m| m.room_id == "general"));
    }

    #[tokio::test]
    async fn test_recent_orders_by_timestamp_not_insertion() {
        let store = MemoryStore::new();
        store.insert(&message_at("r", "late", 10)).await.unwrap();
        store.insert(&message_at("r", "early", -10)).await.unwrap();

        let history = store.recent("r", 50).await.unwrap();
        let contents: Vec<_> = history.iter().map(|m| m.content.as_str()).collect();
        assert_eq!(contents, ["early", "late"]);
    }

    #[tokio::test]
    async fn test_unknown_room_is_empty() {
        let store = MemoryStore::new();
        assert!(store.recent("nowhere", 50).await.unwrap().is_empty());
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn test_capacity_per_room() {
        let store = MemoryStore::with_capacity_per_room(3);
        for i in 0..5 {
            store.insert(&message_at("r", &i.to_string(), i)).await.unwrap();
        }
        assert_eq!(store.len("r"), 3);
        assert_eq!(store.recent("r", 50).await.unwrap()[0].content, "2");
    }

    struct StalledStore;

    #[async_trait]
    impl MessageStore for StalledStore {
        async fn insert(&self, _message: &ChatMessage) -> Result<(), StoreError> {
            std::future::pending().await
        }

        async fn recent(&self, _room: &str, _limit: usize) -> Result<Vec<ChatMessage>, StoreError> {
            std::future::pending().await
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeouts() {
        let timeout = Duration::from_secs(5);
        let msg = ChatMessage::new("r", "a", "b");

        assert!(matches!(
            insert_with_timeout(&StalledStore, &msg, timeout).await,
            Err(StoreError::Timeout(_))
        ));
        assert!(matches!(
            recent_with_timeout(&StalledStore, "r", 50, timeout).await,
            Err(StoreError::Timeout(_))
        ));
    }
}
