//! # Core Type Definitions
//!
//! Identifier newtypes and small value types shared by every part of the
//! directory: hosts, sessions, players and lobbies.
//!
//! ## Key Types
//!
//! - [`HostId`] - Identity a session host reports in its handshake
//! - [`SessionId`] - Unique name of a live game session
//! - [`PlayerId`] - Identity of a connected player
//! - [`LobbyKey`] - A lobby name together with its [`LobbyType`]
//!
//! Identifiers are string wrappers rather than bare `String`s so that a
//! session id can never be passed where a player id is expected.

use serde::{Deserialize, Serialize};
use std::fmt;

macro_rules! string_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(pub String);

        impl $name {
            /// Creates an identifier from anything string-like.
            pub fn new(value: impl Into<String>) -> Self {
                Self(value.into())
            }

            /// Borrows the identifier as a string slice.
            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl From<&str> for $name {
            fn from(value: &str) -> Self {
                Self(value.to_string())
            }
        }

        impl From<String> for $name {
            fn from(value: String) -> Self {
                Self(value)
            }
        }
    };
}

string_id!(
    /// Identity of a session host, stable across reconnects of the same process.
    HostId
);

string_id!(
    /// Unique name of a game session across the whole fleet.
    SessionId
);

string_id!(
    /// Identity of a player as reported by session hosts.
    PlayerId
);

/// Kind of lobby a session is listed in.
///
/// The kind only affects which sessions a subscriber sees; two lobbies with
/// the same name but different kinds are distinct lobbies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum LobbyType {
    /// Plain listing lobby
    #[default]
    Default,
    /// Lobby whose listings are queried with SQL-like filters by clients
    SqlLobby,
    /// Lobby for asynchronous sessions that outlive their players
    AsyncRandomLobby,
}

/// Fully qualified lobby identity.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct LobbyKey {
    /// Lobby name; the empty name is the default lobby
    pub name: String,
    /// Lobby kind
    #[serde(default)]
    pub kind: LobbyType,
}

impl LobbyKey {
    /// Creates a lobby key.
    pub fn new(name: impl Into<String>, kind: LobbyType) -> Self {
        Self {
            name: name.into(),
            kind,
        }
    }

    /// The unnamed default lobby.
    pub fn default_lobby() -> Self {
        Self::new("", LobbyType::Default)
    }
}

impl Default for LobbyKey {
    fn default() -> Self {
        Self::default_lobby()
    }
}

impl fmt::Display for LobbyKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.name.is_empty() {
            write!(f, "<default>/{:?}", self.kind)
        } else {
            write!(f, "{}/{:?}", self.name, self.kind)
        }
    }
}
