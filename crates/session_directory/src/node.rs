//! A complete directory node.
//!
//! [`DirectoryNode`] wires the presence cache, lobby projection, replication
//! manager, host link runtime and gateway together and owns the background
//! tasks: the host link listener, the expiry sweeper and one dialler per seed
//! host.

use crate::config::DirectoryConfig;
use crate::error::LinkError;
use crate::gateway::DirectoryGateway;
use crate::lobby::LobbyProjection;
use crate::presence::PresenceCache;
use crate::replication::{HostConnector, ReplicationManager, ReplicationRuntime, WebSocketConnector};
use crate::shutdown::ShutdownState;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{info, warn};

/// The directory with all of its moving parts.
pub struct DirectoryNode {
    config: DirectoryConfig,
    manager: Arc<ReplicationManager>,
    runtime: Arc<ReplicationRuntime>,
    gateway: DirectoryGateway,
    shutdown: ShutdownState,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl DirectoryNode {
    /// Creates a node that dials hosts over WebSocket.
    pub fn new(config: DirectoryConfig) -> Self {
        Self::with_connector(config, Arc::new(WebSocketConnector), ShutdownState::new())
    }

    /// Creates a node with a custom connector and a shared shutdown state.
    pub fn with_connector(
        config: DirectoryConfig,
        connector: Arc<dyn HostConnector>,
        shutdown: ShutdownState,
    ) -> Self {
        let presence = Arc::new(PresenceCache::new());
        let lobbies = Arc::new(LobbyProjection::new(config.lobby_channel_capacity));
        let manager = Arc::new(ReplicationManager::new(
            config.clone(),
            presence.clone(),
            lobbies.clone(),
        ));
        let runtime = ReplicationRuntime::new(manager.clone(), connector, shutdown.clone());
        let gateway = DirectoryGateway::new(manager.clone(), presence, lobbies);

        Self {
            config,
            manager,
            runtime,
            gateway,
            shutdown,
            tasks: Mutex::new(Vec::new()),
        }
    }

    /// Client-facing operations.
    pub fn gateway(&self) -> &DirectoryGateway {
        &self.gateway
    }

    /// Host replication state.
    pub fn manager(&self) -> &Arc<ReplicationManager> {
        &self.manager
    }

    /// Host link runtime, for serving links accepted elsewhere.
    pub fn runtime(&self) -> &Arc<ReplicationRuntime> {
        &self.runtime
    }

    /// Shutdown flags shared with every background loop.
    pub fn shutdown_state(&self) -> &ShutdownState {
        &self.shutdown
    }

    /// Starts the listener (when configured), the expiry sweeper and seed diallers.
    ///
    /// # Returns
    ///
    /// The address the host link listener is bound to, if any.
    pub async fn start(&self) -> Result<Option<SocketAddr>, LinkError> {
        let mut tasks = self.tasks.lock().await;

        let local_addr = match self.config.listen_address {
            Some(addr) => {
                let listener = TcpListener::bind(addr)
                    .await
                    .map_err(|e| LinkError::Listen(format!("failed to bind {addr}: {e}")))?;
                let local = listener
                    .local_addr()
                    .map_err(|e| LinkError::Listen(e.to_string()))?;
                tasks.push(self.runtime.spawn_listener(listener));
                Some(local)
            }
            None => None,
        };

        tasks.push(self.runtime.spawn_expiry_sweeper());
        for url in &self.config.seed_hosts {
            info!("📞 Dialling session host {}", url);
            tasks.push(self.runtime.dial(url.clone()));
        }

        info!(
            ttl = ?self.config.context_ttl(),
            retry = ?self.config.connect_retry_interval(),
            seeds = self.config.seed_hosts.len(),
            "🚀 Directory node started"
        );
        Ok(local_addr)
    }

    /// Waits for background tasks to stop after shutdown was initiated.
    ///
    /// Tasks still running after `grace` are aborted.
    pub async fn join(&self, grace: Duration) {
        let tasks: Vec<JoinHandle<()>> = self.tasks.lock().await.drain(..).collect();
        for task in tasks {
            let abort = task.abort_handle();
            if tokio::time::timeout(grace, task).await.is_err() {
                warn!("⏰ Background task did not stop within {:?}; aborting", grace);
                abort.abort();
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::host::ConnectionState;
    use crate::replication::link::memory::MemoryConnector;
    use crate::replication::{FullSnapshot, HostMessage};
    use crate::types::HostId;

    #[tokio::test(start_paused = true)]
    async fn test_seed_hosts_are_dialled_on_start() {
        let connector = Arc::new(MemoryConnector::new());
        let host = connector.offer("mem://gs-1").await;
        host.send(HostMessage::Handshake(FullSnapshot::new("gs-1", "10.0.0.1:5056")));

        let config = DirectoryConfig {
            seed_hosts: vec!["mem://gs-1".to_string()],
            ..DirectoryConfig::default()
        };
        let shutdown = ShutdownState::new();
        let node = DirectoryNode::with_connector(config, connector, shutdown.clone());
        assert_eq!(node.start().await.unwrap(), None);
        tokio::time::sleep(Duration::from_millis(10)).await;

        assert_eq!(
            node.manager().connection_state(&HostId::from("gs-1")).await,
            Some(ConnectionState::Connected)
        );

        shutdown.initiate_shutdown();
        node.join(Duration::from_secs(1)).await;
        assert_eq!(node.gateway().stats().await.hosts_connected, 1);
    }

    #[tokio::test]
    async fn test_listener_binds_ephemeral_port() {
        let config = DirectoryConfig {
            listen_address: Some("127.0.0.1:0".parse().unwrap()),
            ..DirectoryConfig::default()
        };
        let shutdown = ShutdownState::new();
        let node = DirectoryNode::with_connector(config, Arc::new(MemoryConnector::new()), shutdown.clone());
        let addr = node.start().await.unwrap().unwrap();
        assert_ne!(addr.port(), 0);

        shutdown.initiate_shutdown();
        node.join(Duration::from_secs(1)).await;
    }
}
