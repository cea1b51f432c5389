//! Per-host replicated state.
//!
//! A [`SessionHostContext`] is created from the first handshake of a host and
//! owns that host's sessions by value. Presence and lobby structures refer back
//! to it by id only.

use super::HostMode;
use crate::property_store::{well_known, PropertyStore};
use crate::replication::protocol::{FullSnapshot, SessionSnapshot};
use crate::types::{HostId, LobbyKey, PlayerId, SessionId};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeSet, HashMap};
use std::time::Duration;
use tokio::time::Instant;

/// Link state of a host as seen by the directory.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionState {
    /// Control link is up and the context is current
    Connected,
    /// Link lost; retrying until the TTL deadline
    Broken,
    /// Context evicted; only a fresh handshake brings the host back
    Expired,
}

/// One replicated session.
#[derive(Debug, Clone, PartialEq)]
pub struct SessionRecord {
    /// Session identity
    pub session_id: SessionId,
    /// Lobby the session is listed in
    pub lobby: LobbyKey,
    /// Lobby filter requested when the session was created
    pub lobby_filter: Option<Vec<String>>,
    /// Session properties
    pub properties: PropertyStore,
    /// Players currently joined
    pub players: BTreeSet<PlayerId>,
}

impl SessionRecord {
    /// Creates an empty record; well-known defaults are filled in.
    pub fn new(
        session_id: SessionId,
        lobby: LobbyKey,
        lobby_filter: Option<Vec<String>>,
        properties: PropertyStore,
    ) -> Self {
        let mut record = Self {
            session_id,
            lobby,
            lobby_filter,
            properties,
            players: BTreeSet::new(),
        };
        record.properties.fill_well_known_defaults();
        record.sync_player_count();
        record
    }

    /// Builds a record from a host-reported snapshot.
    pub fn from_snapshot(snapshot: SessionSnapshot) -> Self {
        let properties = PropertyStore::new(snapshot.properties, snapshot.delete_null_properties);
        let mut record = Self::new(
            snapshot.session_id,
            snapshot.lobby,
            snapshot.lobby_filter,
            properties,
        );
        record.players = snapshot.players.into_iter().collect();
        record.sync_player_count();
        record
    }

    /// Adds a player. Returns `false` if they were already joined.
    pub fn add_player(&mut self, player_id: PlayerId) -> bool {
        let added = self.players.insert(player_id);
        if added {
            self.sync_player_count();
        }
        added
    }

    /// Removes a player. Returns `false` if they were not joined.
    pub fn remove_player(&mut self, player_id: &PlayerId) -> bool {
        let removed = self.players.remove(player_id);
        if removed {
            self.sync_player_count();
        }
        removed
    }

    fn sync_player_count(&mut self) {
        self.properties.set_internal(
            well_known::PLAYER_COUNT,
            Value::from(self.players.len() as u64),
        );
    }

    /// Lobby filter as a slice, for the projection.
    pub fn filter(&self) -> Option<&[String]> {
        self.lobby_filter.as_deref()
    }
}

/// Everything the directory knows about one session host.
#[derive(Debug, Clone)]
pub struct SessionHostContext {
    /// Host identity
    pub host_id: HostId,
    /// Address clients are routed to
    pub address: String,
    /// Operating mode
    pub mode: HostMode,
    /// Link state
    pub connection_state: ConnectionState,
    /// Last successful contact
    pub last_seen: Instant,
    /// Eviction deadline while not connected
    pub ttl_deadline: Instant,
    /// Sessions owned by the host
    pub sessions: HashMap<SessionId, SessionRecord>,
}

impl SessionHostContext {
    /// Builds a connected context from a handshake.
    pub fn from_snapshot(snapshot: FullSnapshot, now: Instant, ttl: Duration) -> Self {
        let sessions = snapshot
            .sessions
            .into_iter()
            .map(|session| {
                let record = SessionRecord::from_snapshot(session);
                (record.session_id.clone(), record)
            })
            .collect();
        Self {
            host_id: snapshot.host_id,
            address: snapshot.address,
            mode: snapshot.mode,
            connection_state: ConnectionState::Connected,
            last_seen: now,
            ttl_deadline: now + ttl,
            sessions,
        }
    }

    /// Records successful contact and pushes the deadline out.
    pub fn touch(&mut self, now: Instant, ttl: Duration) {
        self.last_seen = now;
        self.ttl_deadline = now + ttl;
    }

    /// Whether the context should be evicted at `now`.
    pub fn is_expired(&self, now: Instant) -> bool {
        self.connection_state != ConnectionState::Connected && now >= self.ttl_deadline
    }

    /// Every (player, session) pair owned by the host.
    pub fn player_entries(&self) -> Vec<(PlayerId, SessionId)> {
        self.sessions
            .values()
            .flat_map(|session| {
                session
                    .players
                    .iter()
                    .map(|player| (player.clone(), session.session_id.clone()))
            })
            .collect()
    }

    /// Total players across sessions.
    pub fn player_count(&self) -> usize {
        self.sessions.values().map(|session| session.players.len()).sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn snapshot() -> FullSnapshot {
        let mut room = SessionSnapshot::new("room-1");
        room.players = vec![PlayerId::from("alice"), PlayerId::from("bob")];
        room.properties.insert("player_count".into(), json!(99));
        FullSnapshot {
            host_id: HostId::from("gs-1"),
            address: "10.0.0.1:5056".into(),
            mode: HostMode::Active,
            sessions: vec![room, SessionSnapshot::new("room-2")],
        }
    }

    #[test]
    fn test_player_count_follows_player_set() {
        let now = Instant::now();
        let context = SessionHostContext::from_snapshot(snapshot(), now, Duration::from_secs(5));
        let room = &context.sessions[&SessionId::from("room-1")];
        assert_eq!(room.properties.player_count(), 2);
        assert_eq!(context.player_count(), 2);
        assert_eq!(context.player_entries().len(), 2);
    }

    #[test]
    fn test_join_and_leave_update_count() {
        let mut record = SessionRecord::from_snapshot(SessionSnapshot::new("s"));
        assert!(record.add_player(PlayerId::from("p")));
        assert!(!record.add_player(PlayerId::from("p")));
        assert_eq!(record.properties.player_count(), 1);
        assert!(record.remove_player(&PlayerId::from("p")));
        assert_eq!(record.properties.player_count(), 0);
    }

    #[test]
    fn test_expiry_requires_lost_link_and_deadline() {
        let now = Instant::now();
        let ttl = Duration::from_secs(5);
        let mut context = SessionHostContext::from_snapshot(snapshot(), now, ttl);
        assert!(!context.is_expired(now + ttl));

        context.connection_state = ConnectionState::Broken;
        assert!(!context.is_expired(now + Duration::from_secs(4)));
        assert!(context.is_expired(now + ttl));
    }
}
