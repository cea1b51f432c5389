//! Directory-wide statistics snapshot.

use crate::host::ConnectionState;
use crate::replication::{HostSummary, ReplicationCounters};
use serde::{Deserialize, Serialize};

/// Point-in-time view of the whole directory.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DirectoryStats {
    /// Hosts with a live link
    pub hosts_connected: usize,
    /// Hosts whose link is lost but whose context is kept
    pub hosts_broken: usize,
    /// Hosts whose context was evicted
    pub hosts_expired: usize,
    /// Routable sessions
    pub sessions: usize,
    /// Players with a known location
    pub players: usize,
    /// Lobbies ever named
    pub lobbies: usize,
    /// Replication activity
    pub replication: ReplicationCounters,
    /// Lobby changes delivered
    pub lobby_updates_emitted: u64,
    /// Property changes that left every lobby view unchanged
    pub lobby_updates_suppressed: u64,
}

impl DirectoryStats {
    /// Tallies host states from per-host summaries.
    pub fn count_hosts(&mut self, hosts: &[HostSummary]) {
        for host in hosts {
            match host.state {
                ConnectionState::Connected => self.hosts_connected += 1,
                ConnectionState::Broken => self.hosts_broken += 1,
                ConnectionState::Expired => self.hosts_expired += 1,
            }
        }
    }
}
