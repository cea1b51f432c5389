//! # Session Directory
//!
//! Directory and replication core for a fleet of multiplayer session hosts.
//!
//! Session hosts keep a persistent control link to the directory. On every
//! (re)connect a host sends its full state; afterwards it pushes incremental
//! changes. From that stream the directory maintains:
//!
//! * which hosts are live, through a Connected / Broken / Expired state machine
//!   per host with reconnect retries and a TTL ([`replication`])
//! * the sessions each host owns and their properties, with compare-and-swap
//!   writes ([`property_store`], [`host`])
//! * where every player currently is ([`presence`])
//! * filtered, de-duplicated lobby listings for discovery clients ([`lobby`])
//!
//! Clients talk to the [`DirectoryGateway`], which routes create/join requests
//! to a host and enforces that host's operating mode.
//!
//! Nothing is persisted: all state is rebuilt from host handshakes.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use session_directory::{CreateSessionRequest, DirectoryConfig, DirectoryNode};
//!
//! # async fn run() -> Result<(), Box<dyn std::error::Error>> {
//! let config = DirectoryConfig {
//!     listen_address: Some("0.0.0.0:7400".parse()?),
//!     ..DirectoryConfig::default()
//! };
//! let node = DirectoryNode::new(config);
//! node.start().await?;
//!
//! let placement = node
//!     .gateway()
//!     .create_session(CreateSessionRequest::new("room-1"))
//!     .await?;
//! println!("connect to {}", placement.host_address);
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod error;
pub mod gateway;
pub mod host;
pub mod lobby;
pub mod node;
pub mod presence;
pub mod property_store;
pub mod replication;
pub mod shutdown;
pub mod stats;
pub mod types;

pub use config::DirectoryConfig;
pub use error::{DirectoryError, LinkError};
pub use gateway::{
    CreateSessionRequest, DirectoryGateway, JoinMode, JoinSessionRequest, SessionOptions,
    SessionPlacement,
};
pub use host::{ConnectionState, HostMode, OperationKind, SessionHostContext, SessionRecord};
pub use lobby::{LobbyChange, LobbyChangeKind, LobbyProjection, LobbyStats, LobbySubscription};
pub use node::DirectoryNode;
pub use presence::{PresenceCache, PresenceEntry, PresenceLookup};
pub use property_store::{
    AppliedWrite, ExpectedValues, PropertyMap, PropertyStore, PropertyWrite, PropertyWrites,
};
pub use replication::{
    FullSnapshot, HostMessage, ReplicationEvent, ReplicationManager, ReplicationRuntime,
    SessionSnapshot,
};
pub use shutdown::ShutdownState;
pub use stats::DirectoryStats;
pub use types::{HostId, LobbyKey, LobbyType, PlayerId, SessionId};
