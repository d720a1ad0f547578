//! # relay-protocol
//!
//! Wire message definitions for the chat relay.
//!
//! Every payload exchanged with a client is a JSON object describing a
//! single chat message. Clients may omit the room and timestamp; the
//! server fills both in before the message is fanned out or stored.
//!
//! ## Example
//!
//! ```rust
//! use chrono::Utc;
//! use relay_protocol::codec;
//!
//! let inbound = codec::decode_inbound(br#"{"username":"alice","content":"hi"}"#).unwrap();
//! let message = inbound.canonicalize("general", Utc::now());
//! assert_eq!(message.room_id, "general");
//!
//! let wire = codec::encode(&message).unwrap();
//! assert!(!wire.is_empty());
//! ```

pub mod codec;
pub mod message;

pub use codec::{decode_inbound, encode, ProtocolError, MAX_PAYLOAD_SIZE};
pub use message::{ChatMessage, InboundMessage, RoomId};
