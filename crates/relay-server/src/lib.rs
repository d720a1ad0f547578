//! # relay-server
//!
//! HTTP/WebSocket front end for the chat relay.
//!
//! The binary wires these modules together; they are exposed as a library
//! so integration tests can run a server on an ephemeral port.

pub mod config;
pub mod handlers;
pub mod metrics;

pub use config::Config;
pub use handlers::{app, run_server, serve, AppState};
