//! Directory configuration types and defaults.

use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::time::Duration;

/// Configuration of the directory core and its host link runtime.
///
/// The context TTL is the only thing that decides when a broken host is
/// evicted; the retry interval merely paces reconnection attempts.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DirectoryConfig {
    /// Address the host link listener binds to; `None` disables inbound links
    pub listen_address: Option<SocketAddr>,

    /// Host link URLs dialled at startup
    pub seed_hosts: Vec<String>,

    /// How long a broken host context survives without a reconnect, in milliseconds
    pub context_ttl_ms: u64,

    /// Delay between reconnection attempts to a broken host, in milliseconds
    pub connect_retry_interval_ms: u64,

    /// Upper bound for a single connection attempt, in milliseconds
    pub connect_timeout_ms: u64,

    /// Period of the background expiry sweep, in milliseconds
    pub expiry_sweep_interval_ms: u64,

    /// Buffer size of the replication event channel
    pub event_channel_capacity: usize,

    /// Buffer size of each lobby feed
    pub lobby_channel_capacity: usize,

    /// Default for sessions created through the directory
    pub default_delete_null_properties: bool,
}

impl DirectoryConfig {
    /// Context TTL as a duration.
    pub fn context_ttl(&self) -> Duration {
        Duration::from_millis(self.context_ttl_ms)
    }

    /// Reconnect pacing as a duration.
    pub fn connect_retry_interval(&self) -> Duration {
        Duration::from_millis(self.connect_retry_interval_ms)
    }

    /// Connect timeout as a duration.
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    /// Sweep period as a duration.
    pub fn expiry_sweep_interval(&self) -> Duration {
        Duration::from_millis(self.expiry_sweep_interval_ms)
    }
}

impl Default for DirectoryConfig {
    fn default() -> Self {
        Self {
            listen_address: None,
            seed_hosts: Vec::new(),
            context_ttl_ms: 30_000,
            connect_retry_interval_ms: 1_000,
            connect_timeout_ms: 5_000,
            expiry_sweep_interval_ms: 1_000,
            event_channel_capacity: 1024,
            lobby_channel_capacity: 256,
            default_delete_null_properties: true,
        }
    }
}
