//! Host state replication.
//!
//! * [`protocol`] - messages hosts send over their control link
//! * [`manager`] - per-host Connected/Broken/Expired state machine
//! * [`runtime`] - link serving, reconnect supervision and expiry sweeps
//! * [`link`] / [`websocket`] - transports

pub mod events;
pub mod link;
pub mod manager;
pub mod protocol;
pub mod runtime;
pub mod websocket;

pub use events::ReplicationEvent;
pub use link::{HostConnector, HostLink};
pub use manager::{
    HandshakeOutcome, HostSlot, HostSummary, ReplicationCounters, ReplicationManager, RetryVerdict,
};
pub use protocol::{FullSnapshot, HostMessage, SessionSnapshot};
pub use runtime::ReplicationRuntime;
pub use websocket::{WebSocketConnector, WebSocketLink};
