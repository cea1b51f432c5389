//! Per-lobby filtered views with change suppression.
//!
//! For every lobby the projection remembers the last view it published for
//! each session. A property change only reaches subscribers when the filtered
//! view (tracked keys plus the always-published well-known keys) differs from
//! that last view, so rewriting a value with itself never produces an event.

use super::{LobbyChange, LobbyChangeKind, LobbyStats, LobbySubscription};
use crate::property_store::{well_known, PropertyMap};
use crate::types::{LobbyKey, SessionId};
use dashmap::DashMap;
use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::{broadcast, Mutex};
use tracing::{debug, trace};

/// Which custom keys a lobby publishes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TrackedKeys {
    /// Publish every property
    All,
    /// Publish only these custom keys (plus the well-known keys)
    Only(BTreeSet<String>),
}

impl TrackedKeys {
    /// Builds the tracked set from a lobby filter: no filter tracks everything,
    /// an empty filter tracks only the well-known keys.
    pub fn from_filter(filter: Option<&[String]>) -> Self {
        match filter {
            None => TrackedKeys::All,
            Some(keys) => TrackedKeys::Only(keys.iter().cloned().collect()),
        }
    }

    /// Whether `key` belongs to the published view.
    pub fn tracks(&self, key: &str) -> bool {
        match self {
            TrackedKeys::All => true,
            TrackedKeys::Only(keys) => keys.contains(key) || well_known::contains(key),
        }
    }

    /// Restricts `properties` to the published view.
    pub fn project(&self, properties: &PropertyMap) -> PropertyMap {
        properties
            .iter()
            .filter(|(key, _)| self.tracks(key))
            .map(|(key, value)| (key.clone(), value.clone()))
            .collect()
    }
}

#[derive(Debug)]
struct LobbyState {
    key: LobbyKey,
    /// Fixed by the first session naming the lobby
    tracked: Option<TrackedKeys>,
    last_published: HashMap<SessionId, PropertyMap>,
    sender: broadcast::Sender<LobbyChange>,
}

impl LobbyState {
    fn new(key: LobbyKey, capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self {
            key,
            tracked: None,
            last_published: HashMap::new(),
            sender,
        }
    }

    fn tracked(&mut self, filter: Option<&[String]>) -> &TrackedKeys {
        self.tracked
            .get_or_insert_with(|| TrackedKeys::from_filter(filter))
    }

    fn emit(&self, kind: LobbyChangeKind, session_id: &SessionId, properties: PropertyMap) -> LobbyChange {
        let change = LobbyChange {
            kind,
            lobby: self.key.clone(),
            session_id: session_id.clone(),
            properties,
        };
        // No subscribers is not an error; the listing is still kept.
        let _ = self.sender.send(change.clone());
        change
    }

    fn peer_count(&self) -> u64 {
        self.last_published
            .values()
            .filter_map(|view| view.get(well_known::PLAYER_COUNT).and_then(Value::as_u64))
            .sum()
    }
}

/// Counters describing projection activity.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ProjectionCounters {
    /// Changes delivered to lobby feeds
    pub emitted: u64,
    /// Property changes that left the filtered view unchanged
    pub suppressed: u64,
}

/// Filtered lobby views for every lobby known to the directory.
#[derive(Debug)]
pub struct LobbyProjection {
    lobbies: DashMap<LobbyKey, Arc<Mutex<LobbyState>>>,
    /// Back-reference from a published session to its lobby
    session_lobby: DashMap<SessionId, LobbyKey>,
    channel_capacity: usize,
    emitted: AtomicU64,
    suppressed: AtomicU64,
}

impl LobbyProjection {
    /// Creates an empty projection whose lobby feeds buffer `channel_capacity` changes.
    pub fn new(channel_capacity: usize) -> Self {
        Self {
            lobbies: DashMap::new(),
            session_lobby: DashMap::new(),
            channel_capacity,
            emitted: AtomicU64::new(0),
            suppressed: AtomicU64::new(0),
        }
    }

    fn lobby(&self, key: &LobbyKey) -> Arc<Mutex<LobbyState>> {
        self.lobbies
            .entry(key.clone())
            .or_insert_with(|| Arc::new(Mutex::new(LobbyState::new(key.clone(), self.channel_capacity))))
            .clone()
    }

    /// Publishes a newly created session. Always emits a `Created` change.
    pub async fn on_session_created(
        &self,
        session_id: &SessionId,
        lobby: &LobbyKey,
        filter: Option<&[String]>,
        properties: &PropertyMap,
    ) -> LobbyChange {
        self.leave_previous_lobby(session_id, lobby).await;

        let state = self.lobby(lobby);
        let mut state = state.lock().await;
        let view = state.tracked(filter).project(properties);
        state.last_published.insert(session_id.clone(), view.clone());
        self.session_lobby.insert(session_id.clone(), lobby.clone());
        self.emitted.fetch_add(1, Ordering::Relaxed);
        debug!(session = %session_id, lobby = %lobby, "📣 Session listed");
        state.emit(LobbyChangeKind::Created, session_id, view)
    }

    /// Re-evaluates a session after a property change.
    ///
    /// Emits `Changed` when the filtered view differs from the last published
    /// one, nothing when it is identical. A session that has no published view
    /// in this lobby (new, moved, or forgotten after its host expired) is
    /// published as `Created`.
    pub async fn on_property_change(
        &self,
        session_id: &SessionId,
        lobby: &LobbyKey,
        filter: Option<&[String]>,
        properties: &PropertyMap,
    ) -> Option<LobbyChange> {
        self.leave_previous_lobby(session_id, lobby).await;

        let state = self.lobby(lobby);
        let mut state = state.lock().await;
        let view = state.tracked(filter).project(properties);

        let kind = match state.last_published.get(session_id) {
            Some(previous) if *previous == view => {
                self.suppressed.fetch_add(1, Ordering::Relaxed);
                trace!(session = %session_id, lobby = %lobby, "Lobby update suppressed");
                return None;
            }
            Some(_) => LobbyChangeKind::Changed,
            None => LobbyChangeKind::Created,
        };

        state.last_published.insert(session_id.clone(), view.clone());
        self.session_lobby.insert(session_id.clone(), lobby.clone());
        self.emitted.fetch_add(1, Ordering::Relaxed);
        Some(state.emit(kind, session_id, view))
    }

    /// Unlists a session, emitting a `Removed` marker if it was listed.
    pub async fn on_session_removed(&self, session_id: &SessionId) -> Option<LobbyChange> {
        let lobby = self.session_lobby.get(session_id)?.value().clone();
        let state = self.lobby(&lobby);
        let mut state = state.lock().await;
        // Listing and back-reference change together under the lobby guard.
        self.session_lobby
            .remove_if(session_id, |_, current| current == &lobby)?;
        state.last_published.remove(session_id)?;
        self.emitted.fetch_add(1, Ordering::Relaxed);
        debug!(session = %session_id, lobby = %lobby, "🗑️ Session unlisted");
        Some(state.emit(LobbyChangeKind::Removed, session_id, PropertyMap::new()))
    }

    async fn leave_previous_lobby(&self, session_id: &SessionId, lobby: &LobbyKey) {
        let previous = self
            .session_lobby
            .get(session_id)
            .map(|entry| entry.value().clone());
        if let Some(previous) = previous {
            if &previous != lobby {
                self.on_session_removed(session_id).await;
            }
        }
    }

    /// Subscribes to a lobby feed, creating the lobby if needed.
    pub async fn subscribe(&self, lobby: &LobbyKey) -> LobbySubscription {
        let state = self.lobby(lobby);
        let state = state.lock().await;
        let mut initial: Vec<LobbyChange> = state
            .last_published
            .iter()
            .map(|(session_id, view)| LobbyChange {
                kind: LobbyChangeKind::Created,
                lobby: lobby.clone(),
                session_id: session_id.clone(),
                properties: view.clone(),
            })
            .collect();
        initial.sort_by(|a, b| a.session_id.cmp(&b.session_id));
        LobbySubscription {
            initial,
            receiver: state.sender.subscribe(),
        }
    }

    /// Last view published for a session.
    pub async fn published(&self, session_id: &SessionId) -> Option<PropertyMap> {
        let lobby = self.session_lobby.get(session_id)?.value().clone();
        let state = self.lobby(&lobby);
        let state = state.lock().await;
        state.last_published.get(session_id).cloned()
    }

    /// Population per lobby. `None` reports every known lobby; unknown lobbies report zero.
    pub async fn stats(&self, lobbies: Option<&[LobbyKey]>) -> BTreeMap<LobbyKey, LobbyStats> {
        let keys: Vec<LobbyKey> = match lobbies {
            Some(keys) => keys.to_vec(),
            None => self.lobbies.iter().map(|entry| entry.key().clone()).collect(),
        };

        let mut result = BTreeMap::new();
        for key in keys {
            let state = self.lobbies.get(&key).map(|entry| entry.value().clone());
            let stats = match state {
                Some(state) => {
                    let state = state.lock().await;
                    LobbyStats {
                        peer_count: state.peer_count(),
                        session_count: state.last_published.len(),
                    }
                }
                None => LobbyStats::default(),
            };
            result.insert(key, stats);
        }
        result
    }

    /// Number of lobbies created so far.
    pub fn lobby_count(&self) -> usize {
        self.lobbies.len()
    }

    /// Emission and suppression counters.
    pub fn counters(&self) -> ProjectionCounters {
        ProjectionCounters {
            emitted: self.emitted.load(Ordering::Relaxed),
            suppressed: self.suppressed.load(Ordering::Relaxed),
        }
    }
}
