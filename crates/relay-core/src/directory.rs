//! Room directory.
//!
//! Keeps track of which rooms exist and who created them. The directory is
//! consulted once per new connection and when a room is deleted; it never
//! sits on the broadcast path.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::store::StoreError;

/// A known room.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Room {
    /// Room name, also its identifier.
    pub name: String,
    /// Display name of the first user to join.
    pub creator: String,
    /// When the room was first seen.
    pub created_at: DateTime<Utc>,
}

/// Directory of known rooms.
#[async_trait]
pub trait RoomDirectory: Send + Sync {
    /// Record `room` as created by `creator` unless it already exists.
    ///
    /// Returns `true` if the room was created by this call.
    async fn ensure_exists(&self, room: &str, creator: &str) -> Result<bool, StoreError>;

    /// Look up a room.
    async fn get(&self, room: &str) -> Result<Option<Room>, StoreError>;

    /// All known rooms.
    async fn rooms(&self) -> Result<Vec<Room>, StoreError>;

    /// Remove a room, returning it if it existed.
    async fn remove(&self, room: &str) -> Result<Option<Room>, StoreError>;
}

/// In-process room directory.
#[derive(Debug, Default)]
pub struct MemoryDirectory {
    rooms: DashMap<String, Room>,
}

impl MemoryDirectory {
    /// Create an empty directory.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl RoomDirectory for MemoryDirectory {
    async fn ensure_exists(&self, room: &str, creator: &str) -> Result<bool, StoreError> {
        let mut created = false;
        self.rooms.entry(room.to_string()).or_insert_with(|| {
            created = true;
            Room {
                name: room.to_string(),
                creator: creator.to_string(),
                created_at: Utc::now(),
            }
        });

        if created {
            info!(room = %room, creator = %creator, "Room created");
        }
        Ok(created)
    }

    async fn get(&self, room: &str) -> Result<Option<Room>, StoreError> {
        Ok(self.rooms.get(room).map(|r| r.value().clone()))
    }

    async fn rooms(&self) -> Result<Vec<Room>, StoreError> {
        let mut rooms: Vec<Room> = self.rooms.iter().map(|r| r.value().clone()).collect();
        rooms.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.name.cmp(&b.name)));
        Ok(rooms)
    }

    async fn remove(&self, room: &str) -> Result<Option<Room>, StoreError> {
        Ok(self.rooms.remove(room).map(|(_, r)| r))
    }
}
