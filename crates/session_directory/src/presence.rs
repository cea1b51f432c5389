//! Player presence cache.
//!
//! Maps each player to the session (and host) they are currently in, as far as
//! the directory knows. Entries only exist for players of sessions owned by a
//! live host context: expiring a host removes all of its players, and a later
//! resynchronizing snapshot re-adds them.
//!
//! All updates for one host snapshot go through [`PresenceCache::replace_host`]
//! under a single write guard, so a concurrent [`PresenceCache::lookup`] sees
//! either the old or the new attribution, never a mix.

use crate::types::{HostId, PlayerId, SessionId};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use tokio::sync::RwLock;

/// Where a player currently is.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PresenceEntry {
    /// Host owning the session
    pub host_id: HostId,
    /// Session the player is joined to
    pub session_id: SessionId,
}

/// Result of a presence lookup, index-aligned with the requested player ids.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PresenceLookup {
    /// Whether each requested player is present in some session
    pub present: Vec<bool>,
    /// Session of each requested player, `None` when not present
    pub session_ids: Vec<Option<SessionId>>,
}

impl PresenceLookup {
    /// Presence of the player at `index` in the original request.
    pub fn get(&self, index: usize) -> Option<(bool, Option<&SessionId>)> {
        let present = *self.present.get(index)?;
        let session = self.session_ids.get(index)?.as_ref();
        Some((present, session))
    }
}

#[derive(Debug, Default)]
struct PresenceTable {
    location: HashMap<PlayerId, PresenceEntry>,
    by_host: HashMap<HostId, HashSet<PlayerId>>,
}

impl PresenceTable {
    fn detach(&mut self, player_id: &PlayerId) -> Option<PresenceEntry> {
        let entry = self.location.remove(player_id)?;
        if let Some(players) = self.by_host.get_mut(&entry.host_id) {
            players.remove(player_id);
            if players.is_empty() {
                self.by_host.remove(&entry.host_id);
            }
        }
        Some(entry)
    }

    fn attach(&mut self, host_id: HostId, player_id: PlayerId, session_id: SessionId) {
        self.detach(&player_id);
        self.by_host
            .entry(host_id.clone())
            .or_default()
            .insert(player_id.clone());
        self.location.insert(
            player_id,
            PresenceEntry {
                host_id,
                session_id,
            },
        );
    }

    fn clear_host(&mut self, host_id: &HostId) -> usize {
        let Some(players) = self.by_host.remove(host_id) else {
            return 0;
        };
        // by_host and location are kept in step by attach/detach.
        for player in &players {
            self.location.remove(player);
        }
        players.len()
    }
}

/// Player id to session mapping built from host snapshots.
#[derive(Debug, Default)]
pub struct PresenceCache {
    table: RwLock<PresenceTable>,
}

impl PresenceCache {
    /// Creates an empty cache.
    pub fn new() -> Self {
        Self::default()
    }

    /// Records that `player_id` is in `session_id` on `host_id`, replacing any previous location.
    pub async fn upsert(&self, host_id: HostId, player_id: PlayerId, session_id: SessionId) {
        self.table.write().await.attach(host_id, player_id, session_id);
    }

    /// Forgets a player. Returns the removed location, if any.
    pub async fn remove(&self, player_id: &PlayerId) -> Option<PresenceEntry> {
        self.table.write().await.detach(player_id)
    }

    /// Forgets a player only if they are still attributed to `session_id`.
    pub async fn remove_from_session(&self, player_id: &PlayerId, session_id: &SessionId) -> bool {
        let mut table = self.table.write().await;
        let owned = table
            .location
            .get(player_id)
            .is_some_and(|entry| &entry.session_id == session_id);
        if owned {
            table.detach(player_id);
        }
        owned
    }

    /// Forgets the given players of a session, as long as `host_id` still holds them there.
    pub async fn remove_session(
        &self,
        host_id: &HostId,
        session_id: &SessionId,
        players: &HashSet<PlayerId>,
    ) {
        let mut table = self.table.write().await;
        for player in players {
            let owned = table
                .location
                .get(player)
                .is_some_and(|entry| &entry.host_id == host_id && &entry.session_id == session_id);
            if owned {
                table.detach(player);
            }
        }
    }

    /// Forgets every player attributed to `host_id`. Returns how many were removed.
    pub async fn remove_all_for_host(&self, host_id: &HostId) -> usize {
        self.table.write().await.clear_host(host_id)
    }

    /// Atomically replaces everything attributed to `host_id` with `entries`.
    pub async fn replace_host(
        &self,
        host_id: &HostId,
        entries: impl IntoIterator<Item = (PlayerId, SessionId)>,
    ) {
        let mut table = self.table.write().await;
        table.clear_host(host_id);
        for (player_id, session_id) in entries {
            table.attach(host_id.clone(), player_id, session_id);
        }
    }

    /// Looks up many players at once; unknown players are reported as not present.
    pub async fn lookup(&self, player_ids: &[PlayerId]) -> PresenceLookup {
        let table = self.table.read().await;
        let mut result = PresenceLookup {
            present: Vec::with_capacity(player_ids.len()),
            session_ids: Vec::with_capacity(player_ids.len()),
        };
        for player_id in player_ids {
            let entry = table.location.get(player_id);
            result.present.push(entry.is_some());
            result
                .session_ids
                .push(entry.map(|entry| entry.session_id.clone()));
        }
        result
    }

    /// Location of a single player.
    pub async fn locate(&self, player_id: &PlayerId) -> Option<PresenceEntry> {
        self.table.read().await.location.get(player_id).cloned()
    }

    /// Number of players currently known.
    pub async fn len(&self) -> usize {
        self.table.read().await.location.len()
    }

    /// Number of players attributed to a host.
    pub async fn count_for_host(&self, host_id: &HostId) -> usize {
        self.table
            .read()
            .await
            .by_host
            .get(host_id)
            .map_or(0, HashSet::len)
    }
}
