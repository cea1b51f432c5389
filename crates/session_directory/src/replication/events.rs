//! Signals published to replication observers.

use crate::host::HostMode;
use crate::types::HostId;
use serde::{Deserialize, Serialize};

/// A host lifecycle signal.
///
/// Every handshake produces exactly one `ReplicationStarted` / `ReplicationFinished`
/// pair. `HostWentOffline` fires once per eviction, never per failed retry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum ReplicationEvent {
    /// A handshake is being applied
    ReplicationStarted {
        /// Host being replicated
        host_id: HostId,
        /// `true` for a first registration or one after expiry, `false` for a resync
        fresh: bool,
    },
    /// A handshake has been fully applied
    ReplicationFinished {
        /// Host that was replicated
        host_id: HostId,
        /// Sessions now owned by the host
        sessions: usize,
        /// Players now attributed to the host
        players: usize,
    },
    /// The host context expired and its sessions and players were dropped
    HostWentOffline {
        /// Evicted host
        host_id: HostId,
    },
    /// The operating mode of a host changed
    ModeChanged {
        /// Affected host
        host_id: HostId,
        /// New mode
        mode: HostMode,
    },
}

impl ReplicationEvent {
    /// The host the event is about.
    pub fn host_id(&self) -> &HostId {
        match self {
            ReplicationEvent::ReplicationStarted { host_id, .. }
            | ReplicationEvent::ReplicationFinished { host_id, .. }
            | ReplicationEvent::HostWentOffline { host_id }
            | ReplicationEvent::ModeChanged { host_id, .. } => host_id,
        }
    }
}
