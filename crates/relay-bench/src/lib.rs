//! Shared helpers for relay benchmarks.

use bytes::Bytes;

/// A minimal inbound payload carrying `size` bytes of content.
#[must_use]
pub fn inbound_payload(size: usize) -> Bytes {
    Bytes::from(format!(
        r#"{{"username":"bench","content":"{}"}}"#,
        "x".repeat(size)
    ))
}
