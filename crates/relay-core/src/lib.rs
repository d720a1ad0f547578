//! # relay-core
//!
//! The broadcast engine of the chat relay.
//!
//! This crate provides:
//!
//! - **Hub** - per-room actor that owns membership and fans messages out
//! - **HubManager** - registry that creates, finds and tears down hubs
//! - **Client** - the hub-side handle and outbound queue of a connection
//! - **Pumps** - read/write tasks bridging a connection and its hub
//! - **Store** / **Directory** - persistence and room bookkeeping contracts
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────┐  frames   ┌─────────────┐  queue   ┌─────────────┐
//! │  read pump  │──────────▶│     Hub     │─────────▶│ write pump  │
//! └─────────────┘           └──────┬──────┘          └─────────────┘
//!        ▲                         │ detached
//!        │ get_or_create           ▼
//! ┌─────────────┐           ┌─────────────┐
//! │ HubManager  │           │ MessageStore│
//! └─────────────┘           └─────────────┘
//! ```

pub mod client;
pub mod directory;
pub mod hub;
pub mod manager;
pub mod pump;
pub mod store;

pub use client::{Client, ClientHandle, ClientId, Delivery, ANONYMOUS};
pub use directory::{MemoryDirectory, Room, RoomDirectory};
pub use hub::{Hub, HubConfig, HubError, HubHandle, HubStats};
pub use manager::HubManager;
pub use pump::{fetch_history, read_pump, run_session, write_pump};
pub use store::{MemoryStore, MessageStore, StoreError};
