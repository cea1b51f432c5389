//! Client-facing directory operations.
//!
//! The [`DirectoryGateway`] answers discovery clients: it creates and joins
//! sessions on a host, applies client property writes, resolves players to
//! sessions and hands out lobby feeds. Every create/join is gated on the
//! executing host's mode while that host's guard is held, so a mode change
//! racing the request is either fully before or fully after it.

use crate::error::DirectoryError;
use crate::host::{check, check_joinable, ConnectionState, HostMode, OperationKind, SessionRecord};
use crate::lobby::{LobbyProjection, LobbyStats, LobbySubscription};
use crate::presence::{PresenceCache, PresenceLookup};
use crate::property_store::{AppliedWrite, ExpectedValues, PropertyMap, PropertyStore, PropertyWrites};
use crate::replication::{HostSlot, ReplicationManager};
use crate::stats::DirectoryStats;
use crate::types::{HostId, LobbyKey, PlayerId, SessionId};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::sync::OwnedMutexGuard;
use tracing::{debug, info};

/// How a new session is listed and what it starts with.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SessionOptions {
    /// Lobby to list the session in
    #[serde(default)]
    pub lobby: LobbyKey,
    /// Custom keys published in the lobby; `None` publishes every key
    #[serde(default)]
    pub lobby_filter: Option<Vec<String>>,
    /// Initial properties
    #[serde(default)]
    pub properties: PropertyMap,
    /// Whether writing `null` deletes a key; the directory default when absent
    #[serde(default)]
    pub delete_null_properties: Option<bool>,
}

/// A request to create a session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CreateSessionRequest {
    /// Session identity chosen by the client
    pub session_id: SessionId,
    /// Preferred host; the least loaded active host otherwise
    #[serde(default)]
    pub host_hint: Option<HostId>,
    /// Listing and initial properties
    #[serde(default)]
    pub options: SessionOptions,
}

impl CreateSessionRequest {
    /// A request with default options and no host preference.
    pub fn new(session_id: impl Into<SessionId>) -> Self {
        Self {
            session_id: session_id.into(),
            host_hint: None,
            options: SessionOptions::default(),
        }
    }
}

/// What to do when a joined session does not exist.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JoinMode {
    /// Fail with `SessionDoesNotExist`
    #[default]
    JoinOnly,
    /// Create it
    CreateIfNotExists,
}

/// A request to join a session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JoinSessionRequest {
    /// Target session
    pub session_id: SessionId,
    /// Behaviour for a missing session
    #[serde(default)]
    pub mode: JoinMode,
    /// Host to create on, for [`JoinMode::CreateIfNotExists`]
    #[serde(default)]
    pub host_hint: Option<HostId>,
    /// Options for the create path
    #[serde(default)]
    pub options: SessionOptions,
}

impl JoinSessionRequest {
    /// Joins an existing session.
    pub fn join(session_id: impl Into<SessionId>) -> Self {
        Self {
            session_id: session_id.into(),
            mode: JoinMode::JoinOnly,
            host_hint: None,
            options: SessionOptions::default(),
        }
    }

    /// Joins, creating the session with `options` when missing.
    pub fn join_or_create(session_id: impl Into<SessionId>, options: SessionOptions) -> Self {
        Self {
            session_id: session_id.into(),
            mode: JoinMode::CreateIfNotExists,
            host_hint: None,
            options,
        }
    }
}

/// Where a client should go.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionPlacement {
    /// Session the client was placed in
    pub session_id: SessionId,
    /// Host executing the session
    pub host_id: HostId,
    /// Address clients connect to
    pub host_address: String,
    /// Whether this request created the session
    pub created: bool,
}

/// Client-facing surface of the directory.
#[derive(Debug, Clone)]
pub struct DirectoryGateway {
    manager: Arc<ReplicationManager>,
    presence: Arc<PresenceCache>,
    lobbies: Arc<LobbyProjection>,
}

impl DirectoryGateway {
    /// Creates a gateway over shared directory state.
    pub fn new(
        manager: Arc<ReplicationManager>,
        presence: Arc<PresenceCache>,
        lobbies: Arc<LobbyProjection>,
    ) -> Self {
        Self {
            manager,
            presence,
            lobbies,
        }
    }

    /// Creates a session on the hinted or least loaded host.
    ///
    /// # Returns
    ///
    /// The placement, or `SessionAlreadyExists`, `OperationNotAllowedInCurrentState`
    /// when the host's mode forbids creation, `HostUnreachable` when the hinted
    /// host is down, `NoHostAvailable` when no host is connected.
    pub async fn create_session(
        &self,
        request: CreateSessionRequest,
    ) -> Result<SessionPlacement, DirectoryError> {
        if self.manager.route(&request.session_id).is_some() {
            return Err(DirectoryError::SessionAlreadyExists(request.session_id));
        }
        let host_id = self.select_host(request.host_hint.as_ref()).await?;
        self.create_on_host(&host_id, request.session_id, request.options, OperationKind::Create)
            .await
    }

    /// Resolves a join, creating the session first when asked to.
    pub async fn join_session(
        &self,
        request: JoinSessionRequest,
    ) -> Result<SessionPlacement, DirectoryError> {
        let operation = match request.mode {
            JoinMode::JoinOnly => OperationKind::Join,
            JoinMode::CreateIfNotExists => OperationKind::JoinOrCreate,
        };

        if let Some(host_id) = self.manager.route(&request.session_id) {
            let mut slot = self.connected_host(&host_id).await?;
            let context = slot
                .connected()
                .ok_or_else(|| DirectoryError::HostUnreachable(host_id.clone()))?;
            if let Some(record) = context.sessions.get(&request.session_id) {
                check(context.mode, operation, true)?;
                check_joinable(&record.properties)?;
                debug!(session = %request.session_id, host = %host_id, "Join resolved");
                return Ok(SessionPlacement {
                    session_id: request.session_id,
                    host_id,
                    host_address: context.address.clone(),
                    created: false,
                });
            }
        }

        match request.mode {
            JoinMode::JoinOnly => Err(DirectoryError::SessionDoesNotExist(request.session_id)),
            JoinMode::CreateIfNotExists => {
                let host_id = self.select_host(request.host_hint.as_ref()).await?;
                self.create_on_host(&host_id, request.session_id, request.options, operation)
                    .await
            }
        }
    }

    async fn create_on_host(
        &self,
        host_id: &HostId,
        session_id: SessionId,
        options: SessionOptions,
        operation: OperationKind,
    ) -> Result<SessionPlacement, DirectoryError> {
        let mut slot = self.connected_host(host_id).await?;
        let delete_null = options
            .delete_null_properties
            .unwrap_or(self.manager.config().default_delete_null_properties);
        let context = slot
            .connected()
            .ok_or_else(|| DirectoryError::HostUnreachable(host_id.clone()))?;

        check(context.mode, operation, false)?;
        if !self.manager.claim_session(&session_id, host_id) {
            return Err(DirectoryError::SessionAlreadyExists(session_id));
        }

        let record = SessionRecord::new(
            session_id.clone(),
            options.lobby,
            options.lobby_filter,
            PropertyStore::with_defaults(options.properties, delete_null),
        );
        let host_address = context.address.clone();
        self.manager.insert_session(context, record).await;
        info!(session = %session_id, host = %host_id, "🎮 Session created");

        Ok(SessionPlacement {
            session_id,
            host_id: host_id.clone(),
            host_address,
            created: true,
        })
    }

    /// Conditionally writes session properties on behalf of a client.
    pub async fn set_properties(
        &self,
        session_id: &SessionId,
        writes: &PropertyWrites,
        expected: &ExpectedValues,
    ) -> Result<AppliedWrite, DirectoryError> {
        let host_id = self
            .manager
            .route(session_id)
            .ok_or_else(|| DirectoryError::SessionDoesNotExist(session_id.clone()))?;
        let mut slot = self.connected_host(&host_id).await?;
        let context = slot
            .connected()
            .ok_or_else(|| DirectoryError::HostUnreachable(host_id.clone()))?;
        self.manager
            .write_properties(context, session_id, writes, expected)
            .await
    }

    /// Where each player is; index-aligned with `player_ids`.
    pub async fn lookup_presence(&self, player_ids: &[PlayerId]) -> PresenceLookup {
        self.presence.lookup(player_ids).await
    }

    /// Current listing of a lobby plus its change feed.
    pub async fn subscribe_lobby(&self, lobby: &LobbyKey) -> LobbySubscription {
        self.lobbies.subscribe(lobby).await
    }

    /// Population per lobby; `None` reports every lobby.
    pub async fn lobby_stats(&self, lobbies: Option<&[LobbyKey]>) -> BTreeMap<LobbyKey, LobbyStats> {
        self.lobbies.stats(lobbies).await
    }

    /// Applies an operating-mode control signal to a host.
    pub async fn set_host_mode(&self, host_id: &HostId, mode: HostMode) -> Result<(), DirectoryError> {
        self.manager.set_mode(host_id, mode).await
    }

    /// Directory-wide statistics.
    pub async fn stats(&self) -> DirectoryStats {
        let hosts = self.manager.host_summaries().await;
        let projection = self.lobbies.counters();
        let mut stats = DirectoryStats {
            sessions: self.manager.session_count(),
            players: self.presence.len().await,
            lobbies: self.lobbies.lobby_count(),
            replication: self.manager.counters(),
            lobby_updates_emitted: projection.emitted,
            lobby_updates_suppressed: projection.suppressed,
            ..DirectoryStats::default()
        };
        stats.count_hosts(&hosts);
        stats
    }

    /// Picks the host a new session goes to.
    ///
    /// A hint is taken as is. Otherwise the connected active host with the
    /// fewest players wins; with no active host any connected one is returned
    /// so that its gate produces the rejection.
    async fn select_host(&self, hint: Option<&HostId>) -> Result<HostId, DirectoryError> {
        if let Some(host_id) = hint {
            return Ok(host_id.clone());
        }
        let connected: Vec<_> = self
            .manager
            .host_summaries()
            .await
            .into_iter()
            .filter(|host| host.state == ConnectionState::Connected)
            .collect();

        connected
            .iter()
            .filter(|host| host.mode == Some(HostMode::Active))
            .min_by(|a, b| a.players.cmp(&b.players).then_with(|| a.host_id.cmp(&b.host_id)))
            .or_else(|| connected.first())
            .map(|host| host.host_id.clone())
            .ok_or(DirectoryError::NoHostAvailable)
    }

    /// Locks a host that can execute a client request.
    ///
    /// A host the directory never heard of is as unreachable to a client as a broken one.
    async fn connected_host(&self, host_id: &HostId) -> Result<OwnedMutexGuard<HostSlot>, DirectoryError> {
        let slot = self
            .manager
            .lock_host(host_id)
            .await
            .ok_or_else(|| DirectoryError::HostUnreachable(host_id.clone()))?;
        if slot.state() != ConnectionState::Connected {
            return Err(DirectoryError::HostUnreachable(host_id.clone()));
        }
        Ok(slot)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DirectoryConfig;
    use crate::property_store::PropertyWrite;
    use crate::replication::{FullSnapshot, SessionSnapshot};
    use serde_json::json;
    use tokio::time::Instant;

    fn gateway() -> DirectoryGateway {
        let presence = Arc::new(PresenceCache::new());
        let lobbies = Arc::new(LobbyProjection::new(64));
        let manager = Arc::new(ReplicationManager::new(
            DirectoryConfig::default(),
            presence.clone(),
            lobbies.clone(),
        ));
        DirectoryGateway::new(manager, presence, lobbies)
    }

    async fn connect(gateway: &DirectoryGateway, host: &str, players: &[&str]) -> u64 {
        let mut room = SessionSnapshot::new(format!("{host}-room"));
        room.players = players.iter().map(|p| PlayerId::from(*p)).collect();
        let snapshot = FullSnapshot::new(host, format!("{host}.local:5056")).with_session(room);
        gateway.manager.apply_handshake(snapshot, Instant::now()).await.epoch
    }

    #[tokio::test]
    async fn test_create_picks_least_loaded_active_host() {
        let gateway = gateway();
        connect(&gateway, "busy", &["a", "b"]).await;
        connect(&gateway, "idle", &[]).await;

        let placement = gateway
            .create_session(CreateSessionRequest::new("new-room"))
            .await
            .unwrap();
        assert_eq!(placement.host_id, HostId::from("idle"));
        assert_eq!(placement.host_address, "idle.local:5056");
        assert!(placement.created);
    }

    #[tokio::test]
    async fn test_create_skips_draining_hosts() {
        let gateway = gateway();
        connect(&gateway, "draining", &[]).await;
        connect(&gateway, "busy", &["a", "b", "c"]).await;
        gateway
            .set_host_mode(&HostId::from("draining"), HostMode::OutOfRotation)
            .await
            .unwrap();

        let placement = gateway
            .create_session(CreateSessionRequest::new("new-room"))
            .await
            .unwrap();
        assert_eq!(placement.host_id, HostId::from("busy"));
    }

    #[tokio::test]
    async fn test_create_without_hosts_is_retryable() {
        let gateway = gateway();
        let err = gateway
            .create_session(CreateSessionRequest::new("room"))
            .await
            .unwrap_err();
        assert_eq!(err, DirectoryError::NoHostAvailable);
        assert!(err.is_retryable());
    }

    #[tokio::test]
    async fn test_hint_naming_unseen_host_is_unreachable() {
        let gateway = gateway();
        connect(&gateway, "h1", &[]).await;

        let mut create = CreateSessionRequest::new("room");
        create.host_hint = Some(HostId::from("never-seen"));
        let err = gateway.create_session(create).await.unwrap_err();
        assert_eq!(err, DirectoryError::HostUnreachable(HostId::from("never-seen")));
        assert!(err.is_retryable());

        let mut join = JoinSessionRequest::join_or_create("room", SessionOptions::default());
        join.host_hint = Some(HostId::from("never-seen"));
        let err = gateway.join_session(join).await.unwrap_err();
        assert_eq!(err, DirectoryError::HostUnreachable(HostId::from("never-seen")));
        assert_eq!(gateway.manager.route(&SessionId::from("room")), None);
    }

    #[tokio::test]
    async fn test_duplicate_create_is_rejected() {
        let gateway = gateway();
        connect(&gateway, "h1", &[]).await;
        let err = gateway
            .create_session(CreateSessionRequest::new("h1-room"))
            .await
            .unwrap_err();
        assert_eq!(err, DirectoryError::SessionAlreadyExists(SessionId::from("h1-room")));
    }

    #[tokio::test]
    async fn test_join_missing_session() {
        let gateway = gateway();
        connect(&gateway, "h1", &[]).await;
        let err = gateway
            .join_session(JoinSessionRequest::join("ghost"))
            .await
            .unwrap_err();
        assert_eq!(err, DirectoryError::SessionDoesNotExist(SessionId::from("ghost")));

        let placement = gateway
            .join_session(JoinSessionRequest::join_or_create("ghost", SessionOptions::default()))
            .await
            .unwrap();
        assert!(placement.created);
        assert_eq!(gateway.manager.route(&SessionId::from("ghost")), Some(HostId::from("h1")));
    }

    #[tokio::test]
    async fn test_full_and_closed_sessions_reject_joins() {
        let gateway = gateway();
        connect(&gateway, "h1", &[]).await;
        let mut options = SessionOptions::default();
        options.properties.insert("max_players".into(), json!(1));
        gateway
            .create_session(CreateSessionRequest {
                session_id: SessionId::from("duel"),
                host_hint: None,
                options,
            })
            .await
            .unwrap();

        gateway
            .join_session(JoinSessionRequest::join("duel"))
            .await
            .unwrap();

        let mut slot = gateway.manager.lock_host(&HostId::from("h1")).await.unwrap();
        let context = slot.connected().unwrap();
        gateway
            .manager
            .join_player(context, &SessionId::from("duel"), PlayerId::from("p1"))
            .await
            .unwrap();
        drop(slot);

        let err = gateway
            .join_session(JoinSessionRequest::join("duel"))
            .await
            .unwrap_err();
        assert!(matches!(err, DirectoryError::OperationNotAllowedInCurrentState(_)));

        let mut close = PropertyWrites::new();
        close.insert("open".into(), PropertyWrite::Set(json!(false)));
        close.insert("max_players".into(), PropertyWrite::Set(json!(0)));
        gateway
            .set_properties(&SessionId::from("duel"), &close, &ExpectedValues::new())
            .await
            .unwrap();
        let err = gateway
            .join_session(JoinSessionRequest::join("duel"))
            .await
            .unwrap_err();
        assert_eq!(
            err,
            DirectoryError::OperationNotAllowedInCurrentState("session is closed".to_string())
        );
    }

    #[tokio::test]
    async fn test_writes_to_broken_host_are_unreachable() {
        let gateway = gateway();
        let epoch = connect(&gateway, "h1", &[]).await;
        let host = HostId::from("h1");
        gateway.manager.link_lost(&host, epoch, Instant::now()).await;

        let mut writes = PropertyWrites::new();
        writes.insert("a".into(), PropertyWrite::Set(json!(1)));
        let err = gateway
            .set_properties(&SessionId::from("h1-room"), &writes, &ExpectedValues::new())
            .await
            .unwrap_err();
        assert_eq!(err, DirectoryError::HostUnreachable(host.clone()));

        let err = gateway
            .join_session(JoinSessionRequest::join("h1-room"))
            .await
            .unwrap_err();
        assert_eq!(err, DirectoryError::HostUnreachable(host));
    }

    #[tokio::test]
    async fn test_stats_count_hosts_and_sessions() {
        let gateway = gateway();
        let epoch = connect(&gateway, "h1", &["a"]).await;
        connect(&gateway, "h2", &["b", "c"]).await;
        gateway
            .manager
            .link_lost(&HostId::from("h1"), epoch, Instant::now())
            .await;

        let stats = gateway.stats().await;
        assert_eq!(stats.hosts_connected, 1);
        assert_eq!(stats.hosts_broken, 1);
        assert_eq!(stats.sessions, 2);
        assert_eq!(stats.players, 3);
        assert_eq!(stats.replication.replications, 2);
    }
}
