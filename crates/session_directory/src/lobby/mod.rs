//! Lobby listings derived from session properties.
//!
//! Discovery clients never talk to session hosts; they subscribe to a lobby and
//! receive a filtered, de-duplicated feed of session property changes produced
//! by the [`LobbyProjection`].

pub mod projection;

pub use projection::{LobbyProjection, TrackedKeys};

use crate::property_store::PropertyMap;
use crate::types::{LobbyKey, SessionId};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

/// What happened to a listed session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LobbyChangeKind {
    /// First publication of the session in this lobby
    Created,
    /// The filtered view of the session changed
    Changed,
    /// The session is no longer listed
    Removed,
}

/// One entry of a lobby feed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LobbyChange {
    /// Kind of change
    pub kind: LobbyChangeKind,
    /// Lobby the change belongs to
    pub lobby: LobbyKey,
    /// Affected session
    pub session_id: SessionId,
    /// Filtered properties after the change; empty for removals
    pub properties: PropertyMap,
}

/// A lobby subscription: the current listing plus every later change.
///
/// `initial` and `receiver` are taken under the same lobby guard, so no change
/// falls between the two and none is delivered twice.
#[derive(Debug)]
pub struct LobbySubscription {
    /// Every session currently listed, as `Created` entries
    pub initial: Vec<LobbyChange>,
    /// Changes published after the listing was taken
    pub receiver: broadcast::Receiver<LobbyChange>,
}

/// Population of one lobby.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LobbyStats {
    /// Players across all listed sessions
    pub peer_count: u64,
    /// Number of listed sessions
    pub session_count: usize,
}
