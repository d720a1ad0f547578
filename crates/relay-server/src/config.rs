//! Server configuration.
//!
//! Configuration can be loaded from:
//! - Environment variables (RELAY_HOST, RELAY_PORT)
//! - TOML configuration file
//! - The `--config <path>` command line flag

use anyhow::{Context, Result};
use relay_core::HubConfig;
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::Path;
use std::time::Duration;

/// Server configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Host to bind to.
    #[serde(default = "default_host")]
    pub host: String,

    /// Port to listen on.
    #[serde(default = "default_port")]
    pub port: u16,

    /// Hub behaviour.
    #[serde(default)]
    pub hub: HubSettings,

    /// Message store configuration.
    #[serde(default)]
    pub store: StoreConfig,

    /// Resource limits.
    #[serde(default)]
    pub limits: LimitsConfig,

    /// Metrics configuration.
    #[serde(default)]
    pub metrics: MetricsConfig,
}

/// Hub configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HubSettings {
    /// Outbound queue capacity per client.
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,

    /// Messages replayed to a client when it joins.
    #[serde(default = "default_history_limit")]
    pub history_limit: usize,

    /// Timeout for store reads and writes, in milliseconds.
    #[serde(default = "default_store_timeout")]
    pub store_timeout_ms: u64,

    /// Capacity of each hub's command queue.
    #[serde(default = "default_intake_capacity")]
    pub intake_capacity: usize,
}

/// Message store configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    /// Messages retained per room by the in-memory store.
    #[serde(default = "default_max_messages_per_room")]
    pub max_messages_per_room: usize,
}

/// Resource limits configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LimitsConfig {
    /// Maximum inbound message size in bytes.
    #[serde(default = "default_max_message_size")]
    pub max_message_size: usize,
}

/// Metrics configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricsConfig {
    /// Enable metrics export.
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Metrics port.
    #[serde(default = "default_metrics_port")]
    pub port: u16,
}

// Default value functions
fn default_host() -> String {
    std::env::var("RELAY_HOST").unwrap_or_else(|_| "127.0.0.1".to_string())
}

fn default_port() -> u16 {
    std::env::var("RELAY_PORT")
        .ok()
        .and_then(|p| p.parse().ok())
        .unwrap_or(8000)
}

fn default_true() -> bool {
    true
}

fn default_queue_capacity() -> usize {
    256
}

fn default_history_limit() -> usize {
    50
}

fn default_store_timeout() -> u64 {
    5_000 // 5 seconds
}

fn default_intake_capacity() -> usize {
    1024
}

fn default_max_messages_per_room() -> usize {
    10_000
}

fn default_max_message_size() -> usize {
    relay_protocol::MAX_PAYLOAD_SIZE
}

fn default_metrics_port() -> u16 {
    9090
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            hub: HubSettings::default(),
            store: StoreConfig::default(),
            limits: LimitsConfig::default(),
            metrics: MetricsConfig::default(),
        }
    }
}

impl Default for HubSettings {
    fn default() -> Self {
        Self {
            queue_capacity: default_queue_capacity(),
            history_limit: default_history_limit(),
            store_timeout_ms: default_store_timeout(),
            intake_capacity: default_intake_capacity(),
        }
    }
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            max_messages_per_room: default_max_messages_per_room(),
        }
    }
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            max_message_size: default_max_message_size(),
        }
    }
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            port: default_metrics_port(),
        }
    }
}

impl HubSettings {
    /// Convert into the hub's runtime configuration.
    #[must_use]
    pub fn to_hub_config(&self) -> HubConfig {
        HubConfig {
            queue_capacity: self.queue_capacity,
            history_limit: self.history_limit,
            store_timeout: Duration::from_millis(self.store_timeout_ms),
            intake_capacity: self.intake_capacity,
        }
    }
}

impl Config {
    /// Load configuration from file or defaults.
    ///
    /// # Errors
    ///
    /// Returns an error if the config file exists but cannot be parsed.
    pub fn load() -> Result<Self> {
        // Try to load from default paths
        let config_paths = [
            "relay.toml",
            "/etc/relay/relay.toml",
            "~/.config/relay/relay.toml",
        ];

        for path in &config_paths {
            let expanded = shellexpand::tilde(path);
            if Path::new(expanded.as_ref()).exists() {
                return Self::from_file(expanded.as_ref());
            }
        }

        // Fall back to defaults with environment overrides
        Ok(Self::default())
    }

    /// Load configuration from a specific file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        let config: Config = toml::from_str(&contents)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))?;

        Ok(config)
    }

    /// Get the socket address to bind to.
    ///
    /// # Errors
    ///
    /// Returns an error if host and port do not form a valid address.
    pub fn bind_addr(&self) -> Result<SocketAddr> {
        format!("{}:{}", self.host, self.port)
            .parse()
            .with_context(|| format!("Invalid bind address {}:{}", self.host, self.port))
    }
}
