//! Session host operating modes and the create/join gate.
//!
//! The gate is a pure function of the executing host's mode, the kind of
//! operation and whether the target session already exists. It is evaluated
//! under the executing host's guard, not at routing time, because a mode
//! change may land between the two.

use crate::error::DirectoryError;
use crate::property_store::PropertyStore;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Operating mode of a session host, owned by the directory.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum HostMode {
    /// Accepts new sessions and joins
    #[default]
    Active,
    /// Drains: joins to existing sessions only
    OutOfRotation,
    /// Accepts nothing
    Offline,
}

impl fmt::Display for HostMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            HostMode::Active => "active",
            HostMode::OutOfRotation => "out_of_rotation",
            HostMode::Offline => "offline",
        };
        f.write_str(name)
    }
}

/// Kind of client operation that needs a host.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OperationKind {
    /// Create a new session
    Create,
    /// Join an existing session
    Join,
    /// Join, creating the session when it does not exist
    JoinOrCreate,
}

/// Outcome of the gate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GateDecision {
    /// The host may execute the operation
    Allow,
    /// The host must reject the operation
    Deny,
}

/// Decides whether a host in `mode` may execute `operation`.
pub fn evaluate(mode: HostMode, operation: OperationKind, session_exists: bool) -> GateDecision {
    let allowed = match (mode, operation) {
        (HostMode::Active, _) => true,
        (HostMode::OutOfRotation, OperationKind::Join) => true,
        (HostMode::OutOfRotation, OperationKind::JoinOrCreate) => session_exists,
        (HostMode::OutOfRotation, OperationKind::Create) => false,
        (HostMode::Offline, _) => false,
    };
    if allowed {
        GateDecision::Allow
    } else {
        GateDecision::Deny
    }
}

/// [`evaluate`] expressed as a `Result` for use with `?`.
pub fn check(
    mode: HostMode,
    operation: OperationKind,
    session_exists: bool,
) -> Result<(), DirectoryError> {
    match evaluate(mode, operation, session_exists) {
        GateDecision::Allow => Ok(()),
        GateDecision::Deny => Err(DirectoryError::OperationNotAllowedInCurrentState(format!(
            "host is {mode}; {operation:?} not permitted"
        ))),
    }
}

/// Session-level part of the join gate: the session must be open and not full.
pub fn check_joinable(properties: &PropertyStore) -> Result<(), DirectoryError> {
    if !properties.is_open() {
        return Err(DirectoryError::OperationNotAllowedInCurrentState(
            "session is closed".to_string(),
        ));
    }
    let max = properties.max_players();
    if max > 0 && properties.player_count() >= max {
        return Err(DirectoryError::OperationNotAllowedInCurrentState(
            "session is full".to_string(),
        ));
    }
    Ok(())
}
