//! Chat message types.
//!
//! [`ChatMessage`] is the canonical, server-stamped form that is fanned out
//! and persisted. [`InboundMessage`] is the looser shape accepted from clients.

use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Deserializer, Serialize};

/// A room identifier.
pub type RoomId = String;

/// A canonical chat message.
///
/// Once produced by a hub this value is never mutated; the same encoding is
/// used on the wire and in the message store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    /// Room the message belongs to.
    pub room_id: RoomId,
    /// Display name of the sender.
    pub username: String,
    /// Message body.
    pub content: String,
    /// When the message was accepted (RFC 3339 on the wire).
    pub timestamp: DateTime<Utc>,
}

impl ChatMessage {
    /// Create a message stamped with the current time.
    #[must_use]
    pub fn new(
        room_id: impl Into<RoomId>,
        username: impl Into<String>,
        content: impl Into<String>,
    ) -> Self {
        Self {
            room_id: room_id.into(),
            username: username.into(),
            content: content.into(),
            timestamp: Utc::now(),
        }
    }

    /// Replace the timestamp.
    #[must_use]
    pub fn with_timestamp(mut self, timestamp: DateTime<Utc>) -> Self {
        self.timestamp = timestamp;
        self
    }
}

/// A message as received from a client.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InboundMessage {
    /// Room claimed by the client. Ignored in favour of the hub's room.
    #[serde(default)]
    pub room_id: Option<RoomId>,
    /// Display name of the sender.
    #[serde(default, deserialize_with = "null_as_empty")]
    pub username: String,
    /// Message body.
    #[serde(default, deserialize_with = "null_as_empty")]
    pub content: String,
    /// Client-side timestamp, if any.
    #[serde(default)]
    pub timestamp: Option<DateTime<Utc>>,
}

impl InboundMessage {
    /// Produce the canonical message for `room`.
    ///
    /// The room id is always overwritten with `room`; the client never gets
    /// to pick which room a message lands in. A missing or zero timestamp
    /// (`0001-01-01T00:00:00Z`) is filled with `now`.
    #[must_use]
    pub fn canonicalize(self, room: &str, now: DateTime<Utc>) -> ChatMessage {
        ChatMessage {
            room_id: room.to_string(),
            username: self.username,
            content: self.content,
            timestamp: self.timestamp.filter(|ts| !is_zero(ts)).unwrap_or(now),
        }
    }
}

fn null_as_empty<'de, D: Deserializer<'de>>(deserializer: D) -> Result<String, D::Error> {
    Ok(Option::<String>::deserialize(deserializer)?.unwrap_or_default())
}

fn is_zero(ts: &DateTime<Utc>) -> bool {
    Utc.with_ymd_and_hms(1, 1, 1, 0, 0, 0).single() == Some(*ts)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_canonicalize_overwrites_room() {
        let inbound = InboundMessage {
            room_id: Some("elsewhere".to_string()),
            username: "bob".to_string(),
            content: "hey".to_string(),
            timestamp: None,
        };

        let msg = inbound.canonicalize("general", Utc::now());
        assert_eq!(msg.room_id, "general");
        assert_eq!(msg.username, "bob");
    }

    #[test]
    fn test_canonicalize_keeps_client_timestamp() {
        let sent = Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap();
        let inbound = InboundMessage {
            room_id: None,
            username: "bob".to_string(),
            content: "hey".to_string(),
            timestamp: Some(sent),
        };

        let msg = inbound.canonicalize("general", Utc::now());
        assert_eq!(msg.timestamp, sent);
    }

    #[test]
    fn test_canonicalize_fills_missing_timestamp() {
        let now = Utc.with_ymd_and_hms(2025, 1, 2, 3, 4, 5).unwrap();
        let inbound = InboundMessage {
            room_id: None,
            username: String::new(),
            content: "x".to_string(),
            timestamp: None,
        };

        assert_eq!(inbound.canonicalize("r", now).timestamp, now);
    }

    #[test]
    fn test_zero_timestamp_is_restamped() {
        let now = Utc.with_ymd_and_hms(2025, 1, 2, 3, 4, 5).unwrap();
        let inbound = InboundMessage {
            room_id: None,
            username: "bob".to_string(),
            content: "x".to_string(),
            timestamp: Utc.with_ymd_and_hms(1, 1, 1, 0, 0, 0).single(),
        };

        assert_eq!(inbound.canonicalize("r", now).timestamp, now);
    }
}
