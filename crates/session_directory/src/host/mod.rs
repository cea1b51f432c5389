//! Session host records and the operating-mode gate.

pub mod context;
pub mod mode;

pub use context::{ConnectionState, SessionHostContext, SessionRecord};
pub use mode::{check, check_joinable, evaluate, GateDecision, HostMode, OperationKind};
