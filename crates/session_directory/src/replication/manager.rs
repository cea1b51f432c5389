//! Host replication state machine.
//!
//! The [`ReplicationManager`] owns one [`HostSlot`] per host that ever
//! completed a handshake. Each slot sits behind its own mutex, so transitions
//! for different hosts never wait on each other, while everything that happens
//! to one host (snapshot application, pushes, link loss, expiry) is serialized.
//!
//! ```text
//!              handshake (fresh)                link lost
//!   (none) ─────────────────────▶ Connected ─────────────────▶ Broken
//!                                    ▲   ▲                       │  │
//!                 handshake (resync) │   └───────────────────────┘  │ ttl deadline
//!                                    │                              ▼
//!                                    └────── handshake (fresh) ── Expired
//! ```
//!
//! Every handshake is a full resync: the previous session set of the host is
//! replaced wholesale and presence/lobby state is rebuilt from the snapshot.

use super::events::ReplicationEvent;
use super::protocol::{FullSnapshot, SessionSnapshot};
use crate::config::DirectoryConfig;
use crate::error::DirectoryError;
use crate::host::{ConnectionState, HostMode, SessionHostContext, SessionRecord};
use crate::lobby::LobbyProjection;
use crate::presence::PresenceCache;
use crate::property_store::{AppliedWrite, ExpectedValues, PropertyWrites};
use crate::types::{HostId, PlayerId, SessionId};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::{broadcast, Mutex, OwnedMutexGuard};
use tokio::task::AbortHandle;
use tokio::time::Instant;
use tracing::{debug, info, warn};

/// Replication bookkeeping for one host.
#[derive(Debug)]
pub struct HostSlot {
    host_id: HostId,
    /// Live context; `None` once the host expired
    pub(crate) context: Option<SessionHostContext>,
    /// Generation of the link the context was last replicated over
    epoch: u64,
    retry_attempts: u32,
    supervisor: Option<AbortHandle>,
}

impl HostSlot {
    fn new(host_id: HostId) -> Self {
        Self {
            host_id,
            context: None,
            epoch: 0,
            retry_attempts: 0,
            supervisor: None,
        }
    }

    /// Link state of the host.
    pub fn state(&self) -> ConnectionState {
        self.context
            .as_ref()
            .map_or(ConnectionState::Expired, |context| context.connection_state)
    }

    /// Context if the host is currently connected.
    pub(crate) fn connected(&mut self) -> Option<&mut SessionHostContext> {
        self.context
            .as_mut()
            .filter(|context| context.connection_state == ConnectionState::Connected)
    }

    /// Host this slot belongs to.
    pub fn host_id(&self) -> &HostId {
        &self.host_id
    }
}

/// Cancels the reconnect task of a host, if one is registered.
fn stop_supervisor(slot: &mut HostSlot) {
    if let Some(supervisor) = slot.supervisor.take() {
        supervisor.abort();
    }
}

/// Result of applying a handshake.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HandshakeOutcome {
    /// Generation assigned to the link the handshake arrived on
    pub epoch: u64,
    /// Whether a brand-new context was created
    pub fresh: bool,
}

/// What a retry supervisor should do after a failed attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryVerdict {
    /// Host is still broken under this epoch
    KeepRetrying,
    /// Host reconnected through another link or expired
    Stop,
}

/// Point-in-time view of one host.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HostSummary {
    /// Host identity
    pub host_id: HostId,
    /// Client-facing address; empty once expired
    pub address: String,
    /// Operating mode; `None` once expired
    pub mode: Option<HostMode>,
    /// Link state
    pub state: ConnectionState,
    /// Sessions owned
    pub sessions: usize,
    /// Players attributed
    pub players: usize,
    /// Failed reconnection attempts since the link broke
    pub retry_attempts: u32,
}

/// Counters describing replication activity.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReplicationCounters {
    /// Handshakes applied
    pub replications: u64,
    /// Host contexts evicted
    pub expiries: u64,
    /// Connected links lost
    pub link_losses: u64,
    /// Failed reconnection attempts
    pub retry_failures: u64,
}

#[derive(Debug, Default)]
struct AtomicCounters {
    replications: AtomicU64,
    expiries: AtomicU64,
    link_losses: AtomicU64,
    retry_failures: AtomicU64,
}

/// Owner of all host contexts and driver of their state machines.
#[derive(Debug)]
pub struct ReplicationManager {
    config: DirectoryConfig,
    hosts: DashMap<HostId, Arc<Mutex<HostSlot>>>,
    /// Back-reference from a session to the host owning it
    session_index: DashMap<SessionId, HostId>,
    presence: Arc<PresenceCache>,
    lobbies: Arc<LobbyProjection>,
    events: broadcast::Sender<ReplicationEvent>,
    next_epoch: AtomicU64,
    counters: AtomicCounters,
}

impl ReplicationManager {
    /// Creates a manager feeding the given presence cache and lobby projection.
    pub fn new(
        config: DirectoryConfig,
        presence: Arc<PresenceCache>,
        lobbies: Arc<LobbyProjection>,
    ) -> Self {
        let (events, _) = broadcast::channel(config.event_channel_capacity.max(1));
        Self {
            config,
            hosts: DashMap::new(),
            session_index: DashMap::new(),
            presence,
            lobbies,
            events,
            next_epoch: AtomicU64::new(0),
            counters: AtomicCounters::default(),
        }
    }

    /// Configuration in use.
    pub fn config(&self) -> &DirectoryConfig {
        &self.config
    }

    /// Subscribes to host lifecycle signals.
    pub fn subscribe(&self) -> broadcast::Receiver<ReplicationEvent> {
        self.events.subscribe()
    }

    fn publish(&self, event: ReplicationEvent) {
        // Nobody listening is fine.
        let _ = self.events.send(event);
    }

    fn slot(&self, host_id: &HostId) -> Arc<Mutex<HostSlot>> {
        self.hosts
            .entry(host_id.clone())
            .or_insert_with(|| Arc::new(Mutex::new(HostSlot::new(host_id.clone()))))
            .clone()
    }

    fn existing_slot(&self, host_id: &HostId) -> Option<Arc<Mutex<HostSlot>>> {
        self.hosts.get(host_id).map(|entry| entry.value().clone())
    }

    /// Locks a host slot for a multi-step operation.
    pub(crate) async fn lock_host(&self, host_id: &HostId) -> Option<OwnedMutexGuard<HostSlot>> {
        Some(self.existing_slot(host_id)?.lock_owned().await)
    }

    /// Host currently owning `session_id`.
    pub fn route(&self, session_id: &SessionId) -> Option<HostId> {
        self.session_index
            .get(session_id)
            .map(|entry| entry.value().clone())
    }

    fn index_session(&self, session_id: &SessionId, host_id: &HostId) {
        if let Some(previous) = self
            .session_index
            .insert(session_id.clone(), host_id.clone())
        {
            if &previous != host_id {
                warn!(
                    session = %session_id,
                    previous = %previous,
                    host = %host_id,
                    "⚠️ Session reported by a second host; routing to the latest reporter"
                );
            }
        }
    }

    /// Reserves `session_id` for `host_id`. Returns `false` if any host already owns it.
    pub(crate) fn claim_session(&self, session_id: &SessionId, host_id: &HostId) -> bool {
        match self.session_index.entry(session_id.clone()) {
            Entry::Occupied(_) => false,
            Entry::Vacant(entry) => {
                entry.insert(host_id.clone());
                true
            }
        }
    }

    /// Drops `session_id` from routing if `host_id` owns it.
    ///
    /// Returns `false` when another host owns the id; its listing is then left alone.
    fn unindex_session(&self, session_id: &SessionId, host_id: &HostId) -> bool {
        self.session_index
            .remove_if(session_id, |_, owner| owner == host_id);
        !self.session_index.contains_key(session_id)
    }

    // ------------------------------------------------------------------
    // State transitions
    // ------------------------------------------------------------------

    /// Applies a full snapshot received at the start of a link.
    ///
    /// Always treated as a re-replication: fires one started/finished pair,
    /// replaces the host's sessions wholesale, and rebuilds presence and lobby
    /// state for the host. A host without a live context is registered afresh.
    pub async fn apply_handshake(&self, snapshot: FullSnapshot, now: Instant) -> HandshakeOutcome {
        let host_id = snapshot.host_id.clone();
        let slot = self.slot(&host_id);
        let mut slot = slot.lock().await;

        let fresh = slot.context.is_none();
        let epoch = self.next_epoch.fetch_add(1, Ordering::Relaxed) + 1;
        self.publish(ReplicationEvent::ReplicationStarted {
            host_id: host_id.clone(),
            fresh,
        });
        info!(
            host = %host_id,
            fresh,
            sessions = snapshot.sessions.len(),
            "🔄 Replicating host state"
        );

        // This link restored the host; any reconnect loop is done.
        stop_supervisor(&mut slot);

        let context = SessionHostContext::from_snapshot(snapshot, now, self.config.context_ttl());
        let previous: HashMap<SessionId, SessionRecord> = slot
            .context
            .take()
            .map(|context| context.sessions)
            .unwrap_or_default();

        for session_id in previous.keys() {
            if !context.sessions.contains_key(session_id) && self.unindex_session(session_id, &host_id) {
                self.lobbies.on_session_removed(session_id).await;
            }
        }

        self.presence
            .replace_host(&host_id, context.player_entries())
            .await;

        for record in context.sessions.values() {
            self.index_session(&record.session_id, &host_id);
            if fresh || !previous.contains_key(&record.session_id) {
                self.lobbies
                    .on_session_created(
                        &record.session_id,
                        &record.lobby,
                        record.filter(),
                        record.properties.values(),
                    )
                    .await;
            } else {
                self.lobbies
                    .on_property_change(
                        &record.session_id,
                        &record.lobby,
                        record.filter(),
                        record.properties.values(),
                    )
                    .await;
            }
        }

        let sessions = context.sessions.len();
        let players = context.player_count();
        slot.context = Some(context);
        slot.epoch = epoch;
        slot.retry_attempts = 0;
        self.counters.replications.fetch_add(1, Ordering::Relaxed);

        self.publish(ReplicationEvent::ReplicationFinished {
            host_id: host_id.clone(),
            sessions,
            players,
        });
        info!(host = %host_id, sessions, players, epoch, "✅ Host replicated");

        HandshakeOutcome { epoch, fresh }
    }

    /// Marks the link of `epoch` as lost. Returns `true` if the host moved to `Broken`.
    ///
    /// A stale epoch (the host already reconnected over a newer link) is ignored.
    pub async fn link_lost(&self, host_id: &HostId, epoch: u64, now: Instant) -> bool {
        let Some(slot) = self.existing_slot(host_id) else {
            return false;
        };
        let mut slot = slot.lock().await;
        if slot.epoch != epoch {
            return false;
        }
        let ttl = self.config.context_ttl();
        let Some(context) = slot.connected() else {
            return false;
        };
        // The link was healthy until now, however quiet the host has been.
        context.touch(now, ttl);
        context.connection_state = ConnectionState::Broken;
        let remaining = context.ttl_deadline.saturating_duration_since(now);
        slot.retry_attempts = 0;
        self.counters.link_losses.fetch_add(1, Ordering::Relaxed);
        warn!(host = %host_id, ?remaining, "🔌 Host link lost; context kept until deadline");
        true
    }

    /// Registers the task retrying a broken host so expiry can cancel it.
    ///
    /// Returns `false` (and aborts the task) if the host is no longer broken under `epoch`.
    pub async fn attach_supervisor(&self, host_id: &HostId, epoch: u64, handle: AbortHandle) -> bool {
        let Some(slot) = self.existing_slot(host_id) else {
            handle.abort();
            return false;
        };
        let mut slot = slot.lock().await;
        if slot.epoch != epoch || slot.state() != ConnectionState::Broken {
            handle.abort();
            return false;
        }
        if let Some(previous) = slot.supervisor.replace(handle) {
            previous.abort();
        }
        true
    }

    /// Unregisters the supervisor of `epoch` without cancelling it.
    ///
    /// A supervisor calls this before it resyncs or evicts the host itself.
    pub async fn release_supervisor(&self, host_id: &HostId, epoch: u64) {
        let Some(slot) = self.existing_slot(host_id) else {
            return;
        };
        let mut slot = slot.lock().await;
        if slot.epoch == epoch {
            slot.supervisor = None;
        }
    }

    /// Records a failed reconnection attempt. Never produces a signal.
    pub async fn record_retry_failure(&self, host_id: &HostId, epoch: u64) -> RetryVerdict {
        let Some(slot) = self.existing_slot(host_id) else {
            return RetryVerdict::Stop;
        };
        let mut slot = slot.lock().await;
        if slot.epoch != epoch || slot.state() != ConnectionState::Broken {
            return RetryVerdict::Stop;
        }
        slot.retry_attempts += 1;
        self.counters.retry_failures.fetch_add(1, Ordering::Relaxed);
        debug!(host = %host_id, attempts = slot.retry_attempts, "Reconnect attempt failed");
        RetryVerdict::KeepRetrying
    }

    /// Eviction deadline of a broken host, if it is broken under `epoch`.
    pub async fn broken_deadline(&self, host_id: &HostId, epoch: u64) -> Option<Instant> {
        let slot = self.existing_slot(host_id)?;
        let slot = slot.lock().await;
        if slot.epoch != epoch {
            return None;
        }
        slot.context
            .as_ref()
            .filter(|context| context.connection_state == ConnectionState::Broken)
            .map(|context| context.ttl_deadline)
    }

    /// Evicts a host whose deadline passed while not connected.
    ///
    /// Drops its sessions and players, unlists its sessions, cancels any retry
    /// task and fires `HostWentOffline` once. Returns `true` if the host was evicted.
    pub async fn expire_host(&self, host_id: &HostId, now: Instant) -> bool {
        let Some(slot) = self.existing_slot(host_id) else {
            return false;
        };
        let mut slot = slot.lock().await;
        let due = slot
            .context
            .as_ref()
            .is_some_and(|context| context.is_expired(now));
        if !due {
            return false;
        }
        let Some(context) = slot.context.take() else {
            return false;
        };

        for session_id in context.sessions.keys() {
            if self.unindex_session(session_id, host_id) {
                self.lobbies.on_session_removed(session_id).await;
            }
        }
        let players = self.presence.remove_all_for_host(host_id).await;

        stop_supervisor(&mut slot);
        slot.retry_attempts = 0;
        self.counters.expiries.fetch_add(1, Ordering::Relaxed);
        self.publish(ReplicationEvent::HostWentOffline {
            host_id: host_id.clone(),
        });
        info!(
            host = %host_id,
            sessions = context.sessions.len(),
            players,
            "💀 Host context expired"
        );
        true
    }

    /// Evicts every host past its deadline. Returns the evicted hosts.
    pub async fn expire_due(&self, now: Instant) -> Vec<HostId> {
        let host_ids: Vec<HostId> = self.hosts.iter().map(|entry| entry.key().clone()).collect();
        let mut expired = Vec::new();
        for host_id in host_ids {
            if self.expire_host(&host_id, now).await {
                expired.push(host_id);
            }
        }
        expired
    }

    // ------------------------------------------------------------------
    // Incremental pushes from a connected host
    // ------------------------------------------------------------------

    async fn connected_slot(
        &self,
        host_id: &HostId,
        epoch: u64,
        now: Instant,
    ) -> Result<OwnedMutexGuard<HostSlot>, DirectoryError> {
        let mut slot = self
            .lock_host(host_id)
            .await
            .ok_or_else(|| DirectoryError::UnknownHost(host_id.clone()))?;
        if slot.epoch != epoch {
            return Err(DirectoryError::HostUnreachable(host_id.clone()));
        }
        let ttl = self.config.context_ttl();
        let context = slot
            .connected()
            .ok_or_else(|| DirectoryError::HostUnreachable(host_id.clone()))?;
        context.touch(now, ttl);
        Ok(slot)
    }

    /// A host reported a new session (or a full replacement of an existing one).
    pub async fn session_opened(
        &self,
        host_id: &HostId,
        epoch: u64,
        snapshot: SessionSnapshot,
        now: Instant,
    ) -> Result<(), DirectoryError> {
        let mut slot = self.connected_slot(host_id, epoch, now).await?;
        let context = slot
            .connected()
            .ok_or_else(|| DirectoryError::HostUnreachable(host_id.clone()))?;
        let record = SessionRecord::from_snapshot(snapshot);
        self.insert_session(context, record).await;
        Ok(())
    }

    /// A host closed a session.
    pub async fn session_closed(
        &self,
        host_id: &HostId,
        epoch: u64,
        session_id: &SessionId,
        now: Instant,
    ) -> Result<(), DirectoryError> {
        let mut slot = self.connected_slot(host_id, epoch, now).await?;
        let context = slot
            .connected()
            .ok_or_else(|| DirectoryError::HostUnreachable(host_id.clone()))?;
        self.remove_session(context, session_id)
            .await
            .map(|_| ())
            .ok_or_else(|| DirectoryError::SessionDoesNotExist(session_id.clone()))
    }

    /// A host wrote session properties.
    pub async fn property_changed(
        &self,
        host_id: &HostId,
        epoch: u64,
        session_id: &SessionId,
        writes: &PropertyWrites,
        expected: &ExpectedValues,
        now: Instant,
    ) -> Result<AppliedWrite, DirectoryError> {
        let mut slot = self.connected_slot(host_id, epoch, now).await?;
        let context = slot
            .connected()
            .ok_or_else(|| DirectoryError::HostUnreachable(host_id.clone()))?;
        self.write_properties(context, session_id, writes, expected)
            .await
    }

    /// A player joined a session on the host.
    pub async fn player_joined(
        &self,
        host_id: &HostId,
        epoch: u64,
        session_id: &SessionId,
        player_id: PlayerId,
        now: Instant,
    ) -> Result<(), DirectoryError> {
        let mut slot = self.connected_slot(host_id, epoch, now).await?;
        let context = slot
            .connected()
            .ok_or_else(|| DirectoryError::HostUnreachable(host_id.clone()))?;
        self.join_player(context, session_id, player_id).await
    }

    /// A player left a session on the host.
    pub async fn player_left(
        &self,
        host_id: &HostId,
        epoch: u64,
        session_id: &SessionId,
        player_id: &PlayerId,
        now: Instant,
    ) -> Result<(), DirectoryError> {
        let mut slot = self.connected_slot(host_id, epoch, now).await?;
        let context = slot
            .connected()
            .ok_or_else(|| DirectoryError::HostUnreachable(host_id.clone()))?;
        let record = context
            .sessions
            .get_mut(session_id)
            .ok_or_else(|| DirectoryError::SessionDoesNotExist(session_id.clone()))?;
        if record.remove_player(player_id) {
            self.presence.remove_from_session(player_id, session_id).await;
            self.lobbies
                .on_property_change(
                    session_id,
                    &record.lobby,
                    record.filter(),
                    record.properties.values(),
                )
                .await;
        }
        Ok(())
    }

    /// A host reported a new operating mode.
    pub async fn host_mode_changed(
        &self,
        host_id: &HostId,
        epoch: u64,
        mode: HostMode,
        now: Instant,
    ) -> Result<(), DirectoryError> {
        let mut slot = self.connected_slot(host_id, epoch, now).await?;
        let context = slot
            .connected()
            .ok_or_else(|| DirectoryError::HostUnreachable(host_id.clone()))?;
        self.change_mode(context, mode);
        Ok(())
    }

    /// Sets the operating mode of a host from a control signal.
    ///
    /// Applies to connected and broken hosts alike; an expired host has no mode.
    pub async fn set_mode(&self, host_id: &HostId, mode: HostMode) -> Result<(), DirectoryError> {
        let mut slot = self
            .lock_host(host_id)
            .await
            .ok_or_else(|| DirectoryError::UnknownHost(host_id.clone()))?;
        let context = slot
            .context
            .as_mut()
            .ok_or_else(|| DirectoryError::UnknownHost(host_id.clone()))?;
        self.change_mode(context, mode);
        Ok(())
    }

    fn change_mode(&self, context: &mut SessionHostContext, mode: HostMode) {
        if context.mode == mode {
            return;
        }
        info!(host = %context.host_id, from = %context.mode, to = %mode, "🚦 Host mode changed");
        context.mode = mode;
        self.publish(ReplicationEvent::ModeChanged {
            host_id: context.host_id.clone(),
            mode,
        });
    }

    // ------------------------------------------------------------------
    // Session mutations shared by host pushes and gateway commands
    // ------------------------------------------------------------------

    /// Adds or replaces a session in `context` and publishes it.
    pub(crate) async fn insert_session(&self, context: &mut SessionHostContext, record: SessionRecord) {
        let host_id = context.host_id.clone();
        let session_id = record.session_id.clone();

        let replaced = context.sessions.remove(&session_id);
        if let Some(previous) = &replaced {
            let stale: HashSet<PlayerId> = previous
                .players
                .difference(&record.players)
                .cloned()
                .collect();
            self.presence.remove_session(&host_id, &session_id, &stale).await;
        }

        self.index_session(&session_id, &host_id);
        for player in &record.players {
            self.presence
                .upsert(host_id.clone(), player.clone(), session_id.clone())
                .await;
        }
        if replaced.is_some() {
            self.lobbies
                .on_property_change(&session_id, &record.lobby, record.filter(), record.properties.values())
                .await;
        } else {
            self.lobbies
                .on_session_created(&session_id, &record.lobby, record.filter(), record.properties.values())
                .await;
        }
        debug!(host = %host_id, session = %session_id, "Session registered");
        context.sessions.insert(session_id, record);
    }

    /// Removes a session from `context`, its players from presence and its listing.
    pub(crate) async fn remove_session(
        &self,
        context: &mut SessionHostContext,
        session_id: &SessionId,
    ) -> Option<SessionRecord> {
        let record = context.sessions.remove(session_id)?;
        let players = record.players.iter().cloned().collect();
        self.presence
            .remove_session(&context.host_id, session_id, &players)
            .await;
        if self.unindex_session(session_id, &context.host_id) {
            self.lobbies.on_session_removed(session_id).await;
        }
        info!(host = %context.host_id, session = %session_id, "🚪 Session closed");
        Some(record)
    }

    /// Conditionally writes properties of a session and re-evaluates its listing.
    pub(crate) async fn write_properties(
        &self,
        context: &mut SessionHostContext,
        session_id: &SessionId,
        writes: &PropertyWrites,
        expected: &ExpectedValues,
    ) -> Result<AppliedWrite, DirectoryError> {
        let record = context
            .sessions
            .get_mut(session_id)
            .ok_or_else(|| DirectoryError::SessionDoesNotExist(session_id.clone()))?;
        let applied = record.properties.apply(writes, expected)?;
        self.lobbies
            .on_property_change(
                session_id,
                &record.lobby,
                record.filter(),
                record.properties.values(),
            )
            .await;
        Ok(applied)
    }

    /// Adds a player to a session, updating presence and the listing.
    pub(crate) async fn join_player(
        &self,
        context: &mut SessionHostContext,
        session_id: &SessionId,
        player_id: PlayerId,
    ) -> Result<(), DirectoryError> {
        let host_id = context.host_id.clone();
        let record = context
            .sessions
            .get_mut(session_id)
            .ok_or_else(|| DirectoryError::SessionDoesNotExist(session_id.clone()))?;
        if record.add_player(player_id.clone()) {
            self.presence
                .upsert(host_id, player_id, session_id.clone())
                .await;
            self.lobbies
                .on_property_change(
                    session_id,
                    &record.lobby,
                    record.filter(),
                    record.properties.values(),
                )
                .await;
        }
        Ok(())
    }

    // ------------------------------------------------------------------
    // Introspection
    // ------------------------------------------------------------------

    /// Link state of a host; `None` if it never completed a handshake.
    pub async fn connection_state(&self, host_id: &HostId) -> Option<ConnectionState> {
        let slot = self.existing_slot(host_id)?;
        let state = slot.lock().await.state();
        Some(state)
    }

    /// Summary of every host, each taken under that host's guard.
    pub async fn host_summaries(&self) -> Vec<HostSummary> {
        let slots: Vec<Arc<Mutex<HostSlot>>> =
            self.hosts.iter().map(|entry| entry.value().clone()).collect();
        let mut summaries = Vec::with_capacity(slots.len());
        for slot in slots {
            let slot = slot.lock().await;
            let summary = match &slot.context {
                Some(context) => HostSummary {
                    host_id: slot.host_id.clone(),
                    address: context.address.clone(),
                    mode: Some(context.mode),
                    state: context.connection_state,
                    sessions: context.sessions.len(),
                    players: context.player_count(),
                    retry_attempts: slot.retry_attempts,
                },
                None => HostSummary {
                    host_id: slot.host_id.clone(),
                    address: String::new(),
                    mode: None,
                    state: ConnectionState::Expired,
                    sessions: 0,
                    players: 0,
                    retry_attempts: 0,
                },
            };
            summaries.push(summary);
        }
        summaries.sort_by(|a, b| a.host_id.cmp(&b.host_id));
        summaries
    }

    /// Number of sessions routable through the index.
    pub fn session_count(&self) -> usize {
        self.session_index.len()
    }

    /// Activity counters.
    pub fn counters(&self) -> ReplicationCounters {
        ReplicationCounters {
            replications: self.counters.replications.load(Ordering::Relaxed),
            expiries: self.counters.expiries.load(Ordering::Relaxed),
            link_losses: self.counters.link_losses.load(Ordering::Relaxed),
            retry_failures: self.counters.retry_failures.load(Ordering::Relaxed),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lobby::LobbyChangeKind;
    use crate::property_store::PropertyWrite;
    use crate::types::LobbyKey;
    use serde_json::json;
    use std::time::Duration;

    const TTL: Duration = Duration::from_secs(30);

    fn manager() -> (ReplicationManager, Arc<PresenceCache>, Arc<LobbyProjection>) {
        let presence = Arc::new(PresenceCache::new());
        let lobbies = Arc::new(LobbyProjection::new(64));
        let config = DirectoryConfig {
            context_ttl_ms: TTL.as_millis() as u64,
            ..DirectoryConfig::default()
        };
        (
            ReplicationManager::new(config, presence.clone(), lobbies.clone()),
            presence,
            lobbies,
        )
    }

    fn session(id: &str, players: &[&str]) -> SessionSnapshot {
        let mut snapshot = SessionSnapshot::new(id);
        snapshot.players = players.iter().map(|p| PlayerId::from(*p)).collect();
        snapshot
    }

    fn snapshot(host: &str, sessions: Vec<SessionSnapshot>) -> FullSnapshot {
        FullSnapshot {
            host_id: HostId::from(host),
            address: format!("{host}.local:5056"),
            mode: HostMode::Active,
            sessions,
        }
    }

    fn drain(rx: &mut broadcast::Receiver<ReplicationEvent>) -> Vec<ReplicationEvent> {
        let mut events = Vec::new();
        while let Ok(event) = rx.try_recv() {
            events.push(event);
        }
        events
    }

    #[tokio::test]
    async fn test_first_handshake_registers_fresh_host() {
        let (manager, presence, _) = manager();
        let mut events = manager.subscribe();
        let now = Instant::now();

        let outcome = manager
            .apply_handshake(snapshot("h1", vec![session("s1", &["alice"])]), now)
            .await;

        assert!(outcome.fresh);
        assert_eq!(manager.route(&SessionId::from("s1")), Some(HostId::from("h1")));
        assert!(presence.locate(&PlayerId::from("alice")).await.is_some());
        assert_eq!(
            drain(&mut events),
            vec![
                ReplicationEvent::ReplicationStarted { host_id: HostId::from("h1"), fresh: true },
                ReplicationEvent::ReplicationFinished { host_id: HostId::from("h1"), sessions: 1, players: 1 },
            ]
        );
    }

    #[tokio::test]
    async fn test_reconnect_before_deadline_resyncs_without_offline_signal() {
        let (manager, presence, _) = manager();
        let now = Instant::now();
        let first = manager
            .apply_handshake(snapshot("h1", vec![session("s1", &["alice"]), session("s2", &["bob"])]), now)
            .await;
        let mut events = manager.subscribe();

        assert!(manager.link_lost(&HostId::from("h1"), first.epoch, now).await);
        assert_eq!(
            manager.connection_state(&HostId::from("h1")).await,
            Some(ConnectionState::Broken)
        );

        // Identical content still counts as a full re-replication.
        let later = now + Duration::from_secs(10);
        let second = manager
            .apply_handshake(snapshot("h1", vec![session("s1", &["alice", "carol"])]), later)
            .await;
        assert!(!second.fresh);
        assert!(manager.expire_due(later + Duration::from_secs(25)).await.is_empty());

        let events = drain(&mut events);
        assert_eq!(events.len(), 2);
        assert!(!events
            .iter()
            .any(|event| matches!(event, ReplicationEvent::HostWentOffline { .. })));

        let lookup = presence
            .lookup(&[PlayerId::from("alice"), PlayerId::from("bob"), PlayerId::from("carol")])
            .await;
        assert_eq!(lookup.present, vec![true, false, true]);
        assert_eq!(manager.route(&SessionId::from("s2")), None);
    }

    #[tokio::test]
    async fn test_deadline_without_reconnect_expires_once() {
        let (manager, presence, lobbies) = manager();
        let now = Instant::now();
        let outcome = manager
            .apply_handshake(snapshot("h1", vec![session("s1", &["alice"])]), now)
            .await;
        let mut events = manager.subscribe();
        let mut feed = lobbies.subscribe(&LobbyKey::default()).await;

        manager.link_lost(&HostId::from("h1"), outcome.epoch, now).await;
        assert!(manager.expire_due(now + Duration::from_secs(29)).await.is_empty());
        assert_eq!(
            manager.record_retry_failure(&HostId::from("h1"), outcome.epoch).await,
            RetryVerdict::KeepRetrying
        );
        assert_eq!(manager.expire_due(now + TTL).await, vec![HostId::from("h1")]);
        assert!(manager.expire_due(now + TTL * 2).await.is_empty());

        assert_eq!(
            drain(&mut events),
            vec![ReplicationEvent::HostWentOffline { host_id: HostId::from("h1") }]
        );
        assert_eq!(presence.len().await, 0);
        assert_eq!(manager.route(&SessionId::from("s1")), None);
        assert_eq!(feed.receiver.try_recv().unwrap().kind, LobbyChangeKind::Removed);
        assert_eq!(
            manager.connection_state(&HostId::from("h1")).await,
            Some(ConnectionState::Expired)
        );
        assert_eq!(
            manager.record_retry_failure(&HostId::from("h1"), outcome.epoch).await,
            RetryVerdict::Stop
        );
    }

    #[tokio::test]
    async fn test_connected_host_never_expires() {
        let (manager, _, _) = manager();
        let now = Instant::now();
        manager.apply_handshake(snapshot("h1", vec![]), now).await;
        assert!(manager.expire_due(now + TTL * 10).await.is_empty());
    }

    #[tokio::test]
    async fn test_handshake_after_expiry_is_fresh_and_relists() {
        let (manager, presence, lobbies) = manager();
        let now = Instant::now();
        let outcome = manager
            .apply_handshake(snapshot("h1", vec![session("s1", &["alice"])]), now)
            .await;
        manager.link_lost(&HostId::from("h1"), outcome.epoch, now).await;
        manager.expire_due(now + TTL).await;

        let mut feed = lobbies.subscribe(&LobbyKey::default()).await;
        let again = manager
            .apply_handshake(snapshot("h1", vec![session("s1", &["alice"])]), now + TTL * 2)
            .await;
        assert!(again.fresh);
        assert_eq!(feed.receiver.try_recv().unwrap().kind, LobbyChangeKind::Created);
        assert!(presence.locate(&PlayerId::from("alice")).await.is_some());
    }

    #[tokio::test]
    async fn test_stale_link_loss_is_ignored() {
        let (manager, _, _) = manager();
        let now = Instant::now();
        let old = manager.apply_handshake(snapshot("h1", vec![]), now).await;
        let new = manager.apply_handshake(snapshot("h1", vec![]), now).await;
        assert_ne!(old.epoch, new.epoch);
        assert!(!manager.link_lost(&HostId::from("h1"), old.epoch, now).await);
        assert_eq!(
            manager.connection_state(&HostId::from("h1")).await,
            Some(ConnectionState::Connected)
        );
    }

    #[tokio::test]
    async fn test_session_closed_is_reflected_immediately() {
        let (manager, presence, lobbies) = manager();
        let now = Instant::now();
        let outcome = manager
            .apply_handshake(snapshot("h1", vec![session("s1", &["alice"])]), now)
            .await;
        let host = HostId::from("h1");
        let sid = SessionId::from("s1");

        manager.session_closed(&host, outcome.epoch, &sid, now).await.unwrap();
        assert_eq!(manager.route(&sid), None);
        assert!(presence.locate(&PlayerId::from("alice")).await.is_none());
        assert!(lobbies.published(&sid).await.is_none());
        assert_eq!(
            manager.session_closed(&host, outcome.epoch, &sid, now).await,
            Err(DirectoryError::SessionDoesNotExist(sid))
        );
    }

    #[tokio::test]
    async fn test_deadline_counts_from_link_loss() {
        let (manager, _, _) = manager();
        let now = Instant::now();
        let outcome = manager.apply_handshake(snapshot("h1", vec![]), now).await;

        let lost_at = now + TTL * 2;
        assert!(manager.link_lost(&HostId::from("h1"), outcome.epoch, lost_at).await);
        assert_eq!(
            manager.broken_deadline(&HostId::from("h1"), outcome.epoch).await,
            Some(lost_at + TTL)
        );
        assert!(manager.expire_due(lost_at + Duration::from_secs(29)).await.is_empty());
        assert_eq!(manager.expire_due(lost_at + TTL).await, vec![HostId::from("h1")]);
    }

    #[tokio::test]
    async fn test_superseded_host_leaves_current_owner_listed() {
        let (manager, presence, lobbies) = manager();
        let now = Instant::now();
        let a = manager
            .apply_handshake(snapshot("a", vec![session("s1", &["alice"])]), now)
            .await;
        manager
            .apply_handshake(snapshot("b", vec![session("s1", &["bob"])]), now)
            .await;
        let sid = SessionId::from("s1");
        assert_eq!(manager.route(&sid), Some(HostId::from("b")));

        manager.session_closed(&HostId::from("a"), a.epoch, &sid, now).await.unwrap();
        assert_eq!(manager.route(&sid), Some(HostId::from("b")));
        assert!(lobbies.published(&sid).await.is_some());
        assert!(presence.locate(&PlayerId::from("bob")).await.is_some());

        // A reopens it, B takes it back, then A's context expires.
        manager
            .session_opened(&HostId::from("a"), a.epoch, session("s1", &[]), now)
            .await
            .unwrap();
        manager
            .apply_handshake(snapshot("b", vec![session("s1", &["bob"])]), now)
            .await;
        manager.link_lost(&HostId::from("a"), a.epoch, now).await;
        assert_eq!(manager.expire_due(now + TTL).await, vec![HostId::from("a")]);

        assert_eq!(manager.route(&sid), Some(HostId::from("b")));
        assert!(lobbies.published(&sid).await.is_some());
        assert!(presence.locate(&PlayerId::from("bob")).await.is_some());
    }

    #[tokio::test]
    async fn test_pushes_rejected_while_broken() {
        let (manager, _, _) = manager();
        let now = Instant::now();
        let outcome = manager
            .apply_handshake(snapshot("h1", vec![session("s1", &[])]), now)
            .await;
        let host = HostId::from("h1");
        manager.link_lost(&host, outcome.epoch, now).await;

        let result = manager
            .player_joined(&host, outcome.epoch, &SessionId::from("s1"), PlayerId::from("p"), now)
            .await;
        assert_eq!(result, Err(DirectoryError::HostUnreachable(host)));
    }

    #[tokio::test]
    async fn test_pushes_update_presence_and_listing() {
        let (manager, presence, lobbies) = manager();
        let now = Instant::now();
        let outcome = manager.apply_handshake(snapshot("h1", vec![]), now).await;
        let host = HostId::from("h1");
        let sid = SessionId::from("s1");

        manager
            .session_opened(&host, outcome.epoch, session("s1", &[]), now)
            .await
            .unwrap();
        manager
            .player_joined(&host, outcome.epoch, &sid, PlayerId::from("p1"), now)
            .await
            .unwrap();
        assert_eq!(
            lobbies.published(&sid).await.unwrap().get("player_count"),
            Some(&json!(1))
        );
        assert!(presence.locate(&PlayerId::from("p1")).await.is_some());

        let mut writes = PropertyWrites::new();
        writes.insert("map".into(), PropertyWrite::Set(json!("dust")));
        manager
            .property_changed(&host, outcome.epoch, &sid, &writes, &ExpectedValues::new(), now)
            .await
            .unwrap();
        assert_eq!(lobbies.published(&sid).await.unwrap().get("map"), Some(&json!("dust")));

        manager
            .player_left(&host, outcome.epoch, &sid, &PlayerId::from("p1"), now)
            .await
            .unwrap();
        assert!(presence.locate(&PlayerId::from("p1")).await.is_none());
    }

    #[tokio::test]
    async fn test_mode_change_signals_once() {
        let (manager, _, _) = manager();
        let now = Instant::now();
        let outcome = manager.apply_handshake(snapshot("h1", vec![]), now).await;
        let mut events = manager.subscribe();
        let host = HostId::from("h1");

        manager
            .host_mode_changed(&host, outcome.epoch, HostMode::OutOfRotation, now)
            .await
            .unwrap();
        manager.set_mode(&host, HostMode::OutOfRotation).await.unwrap();

        assert_eq!(
            drain(&mut events),
            vec![ReplicationEvent::ModeChanged { host_id: host, mode: HostMode::OutOfRotation }]
        );
    }
}
