//! Messages a session host sends over its control link.
//!
//! Every link starts with a [`HostMessage::Handshake`] carrying the host's full
//! state; after that the host pushes incremental changes until the link drops.
//! On the wire each message is one JSON document, internally tagged by `type`.

use crate::host::HostMode;
use crate::property_store::{ExpectedValues, PropertyMap, PropertyWrites};
use crate::types::{HostId, LobbyKey, PlayerId, SessionId};
use serde::{Deserialize, Serialize};

fn default_true() -> bool {
    true
}

/// Full state of one session as reported by its host.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionSnapshot {
    /// Session identity
    pub session_id: SessionId,
    /// Lobby the session is listed in
    #[serde(default)]
    pub lobby: LobbyKey,
    /// Custom and well-known properties
    #[serde(default)]
    pub properties: PropertyMap,
    /// Players currently joined
    #[serde(default)]
    pub players: Vec<PlayerId>,
    /// Custom keys listed in the lobby; absent lists every key
    #[serde(default)]
    pub lobby_filter: Option<Vec<String>>,
    /// Whether writing `null` deletes a property
    #[serde(default = "default_true")]
    pub delete_null_properties: bool,
}

impl SessionSnapshot {
    /// A snapshot of an empty session in the default lobby.
    pub fn new(session_id: impl Into<SessionId>) -> Self {
        Self {
            session_id: session_id.into(),
            lobby: LobbyKey::default(),
            properties: PropertyMap::new(),
            players: Vec::new(),
            lobby_filter: None,
            delete_null_properties: true,
        }
    }
}

/// Everything a host owns, sent on every (re)connect.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FullSnapshot {
    /// Host identity
    pub host_id: HostId,
    /// Address clients use to reach the host
    pub address: String,
    /// Operating mode the host currently reports
    #[serde(default)]
    pub mode: HostMode,
    /// Sessions owned by the host
    #[serde(default)]
    pub sessions: Vec<SessionSnapshot>,
}

impl FullSnapshot {
    /// An active host with no sessions.
    pub fn new(host_id: impl Into<HostId>, address: impl Into<String>) -> Self {
        Self {
            host_id: host_id.into(),
            address: address.into(),
            mode: HostMode::Active,
            sessions: Vec::new(),
        }
    }

    /// Adds a session to the snapshot.
    pub fn with_session(mut self, session: SessionSnapshot) -> Self {
        self.sessions.push(session);
        self
    }
}

/// A message on a host control link.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum HostMessage {
    /// Full state; always the first message of a link
    Handshake(FullSnapshot),
    /// A session was created on the host
    SessionOpened(SessionSnapshot),
    /// A session was closed on the host
    SessionClosed {
        /// Closed session
        session_id: SessionId,
    },
    /// Properties of a session were written
    PropertyChanged {
        /// Target session
        session_id: SessionId,
        /// Requested writes
        writes: PropertyWrites,
        /// Expected current values; empty for unconditional writes
        #[serde(default)]
        expected: ExpectedValues,
    },
    /// A player joined a session
    PlayerJoined {
        /// Target session
        session_id: SessionId,
        /// Joining player
        player_id: PlayerId,
    },
    /// A player left a session
    PlayerLeft {
        /// Target session
        session_id: SessionId,
        /// Leaving player
        player_id: PlayerId,
    },
    /// The host changed its operating mode
    ModeChanged {
        /// New mode
        mode: HostMode,
    },
}

impl HostMessage {
    /// Short name for logging.
    pub fn kind(&self) -> &'static str {
        match self {
            HostMessage::Handshake(_) => "handshake",
            HostMessage::SessionOpened(_) => "session_opened",
            HostMessage::SessionClosed { .. } => "session_closed",
            HostMessage::PropertyChanged { .. } => "property_changed",
            HostMessage::PlayerJoined { .. } => "player_joined",
            HostMessage::PlayerLeft { .. } => "player_left",
            HostMessage::ModeChanged { .. } => "mode_changed",
        }
    }
}
