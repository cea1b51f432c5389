//! Host link runtime.
//!
//! Drives [`HostLink`]s into the [`ReplicationManager`]: reads the opening
//! handshake, forwards pushes, reports link loss, and runs one reconnect
//! supervisor per broken host. A supervisor races its reconnect attempts
//! against the host's TTL deadline; whichever comes first decides between a
//! resync and an eviction. Failed attempts are only logged.

use super::link::{HostConnector, HostLink};
use super::manager::{ReplicationManager, RetryVerdict};
use super::protocol::{FullSnapshot, HostMessage};
use super::websocket::accept_link;
use crate::error::{DirectoryError, LinkError};
use crate::shutdown::ShutdownState;
use crate::types::HostId;
use futures::future::BoxFuture;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio::time::{interval, sleep, sleep_until, timeout, Instant, MissedTickBehavior};
use tracing::{debug, error, info, trace, warn};

/// Reads the first message of a link, which must be a handshake.
async fn read_handshake(link: &mut dyn HostLink) -> Result<FullSnapshot, LinkError> {
    match link.recv().await {
        Some(Ok(HostMessage::Handshake(snapshot))) => Ok(snapshot),
        Some(Ok(other)) => Err(LinkError::Protocol(format!(
            "expected handshake, got {}",
            other.kind()
        ))),
        Some(Err(e)) => Err(e),
        None => Err(LinkError::Protocol(
            "link closed before handshake".to_string(),
        )),
    }
}

/// Background machinery connecting hosts to the replication manager.
pub struct ReplicationRuntime {
    manager: Arc<ReplicationManager>,
    connector: Arc<dyn HostConnector>,
    shutdown: ShutdownState,
}

impl ReplicationRuntime {
    /// Creates a runtime dialling hosts through `connector`.
    pub fn new(
        manager: Arc<ReplicationManager>,
        connector: Arc<dyn HostConnector>,
        shutdown: ShutdownState,
    ) -> Arc<Self> {
        Arc::new(Self {
            manager,
            connector,
            shutdown,
        })
    }

    /// The manager this runtime feeds.
    pub fn manager(&self) -> &Arc<ReplicationManager> {
        &self.manager
    }

    /// Serves one link from handshake until it closes.
    ///
    /// `dial` is the URL the link was opened on, if the directory dialled it;
    /// a broken host is only redialled when it is known. Returns the host the
    /// link belonged to, or the error that prevented the handshake.
    pub async fn serve_link(
        self: Arc<Self>,
        mut link: Box<dyn HostLink>,
        dial: Option<String>,
    ) -> Result<HostId, LinkError> {
        let handshake_timeout = self.manager.config().connect_timeout();
        let snapshot = timeout(handshake_timeout, read_handshake(link.as_mut()))
            .await
            .map_err(|_| LinkError::Timeout(handshake_timeout))??;

        let host_id = snapshot.host_id.clone();
        let outcome = self.manager.apply_handshake(snapshot, Instant::now()).await;
        self.pump(link, host_id.clone(), outcome.epoch, dial).await;
        Ok(host_id)
    }

    async fn pump(
        self: Arc<Self>,
        mut link: Box<dyn HostLink>,
        host_id: HostId,
        mut epoch: u64,
        dial: Option<String>,
    ) {
        let peer = link.peer();
        info!(host = %host_id, peer = %peer, "🔗 Host link established");

        loop {
            let message = tokio::select! {
                message = link.recv() => message,
                _ = self.shutdown.initiated() => {
                    debug!(host = %host_id, "Host link closing - shutdown initiated");
                    return;
                }
            };

            match message {
                None => {
                    info!(host = %host_id, peer = %peer, "🔌 Host link closed");
                    break;
                }
                Some(Err(e)) => {
                    warn!(host = %host_id, peer = %peer, error = %e, "Host link failed");
                    break;
                }
                Some(Ok(HostMessage::Handshake(snapshot))) if snapshot.host_id != host_id => {
                    warn!(
                        host = %host_id,
                        claimed = %snapshot.host_id,
                        "Host changed identity mid-link; dropping link"
                    );
                    break;
                }
                Some(Ok(message)) => {
                    let kind = message.kind();
                    match self.dispatch(&host_id, epoch, message).await {
                        Ok(current) => {
                            trace!(host = %host_id, kind, "Host push applied");
                            epoch = current;
                        }
                        Err(DirectoryError::HostUnreachable(_) | DirectoryError::UnknownHost(_)) => {
                            debug!(host = %host_id, epoch, "Host link superseded by a newer one");
                            return;
                        }
                        Err(e) => {
                            warn!(host = %host_id, kind, error = %e, "Host push rejected");
                        }
                    }
                }
            }
        }

        if self
            .manager
            .link_lost(&host_id, epoch, Instant::now())
            .await
        {
            self.start_supervisor(host_id, epoch, dial).await;
        }
    }

    /// Applies one message; returns the epoch the link continues under.
    async fn dispatch(
        &self,
        host_id: &HostId,
        epoch: u64,
        message: HostMessage,
    ) -> Result<u64, DirectoryError> {
        let now = Instant::now();
        let manager = &self.manager;
        match message {
            HostMessage::Handshake(snapshot) => {
                Ok(manager.apply_handshake(snapshot, now).await.epoch)
            }
            HostMessage::SessionOpened(snapshot) => manager
                .session_opened(host_id, epoch, snapshot, now)
                .await
                .map(|()| epoch),
            HostMessage::SessionClosed { session_id } => manager
                .session_closed(host_id, epoch, &session_id, now)
                .await
                .map(|()| epoch),
            HostMessage::PropertyChanged {
                session_id,
                writes,
                expected,
            } => manager
                .property_changed(host_id, epoch, &session_id, &writes, &expected, now)
                .await
                .map(|_| epoch),
            HostMessage::PlayerJoined {
                session_id,
                player_id,
            } => manager
                .player_joined(host_id, epoch, &session_id, player_id, now)
                .await
                .map(|()| epoch),
            HostMessage::PlayerLeft {
                session_id,
                player_id,
            } => manager
                .player_left(host_id, epoch, &session_id, &player_id, now)
                .await
                .map(|()| epoch),
            HostMessage::ModeChanged { mode } => manager
                .host_mode_changed(host_id, epoch, mode, now)
                .await
                .map(|()| epoch),
        }
    }

    async fn start_supervisor(self: Arc<Self>, host_id: HostId, epoch: u64, dial: Option<String>) {
        let (attached_tx, attached_rx) = oneshot::channel();
        let task = tokio::spawn(self.clone().supervise(host_id.clone(), epoch, dial, attached_rx));
        if self
            .manager
            .attach_supervisor(&host_id, epoch, task.abort_handle())
            .await
        {
            let _ = attached_tx.send(());
        }
    }

    /// Reconnect loop for one broken host.
    ///
    /// Waits until it is registered with the manager, then retries every
    /// `connect_retry_interval` until a handshake succeeds or the TTL deadline
    /// passes. Only the deadline evicts the host.
    fn supervise(
        self: Arc<Self>,
        host_id: HostId,
        epoch: u64,
        dial: Option<String>,
        attached: oneshot::Receiver<()>,
    ) -> BoxFuture<'static, ()> {
        Box::pin(async move {
            if attached.await.is_err() {
                return;
            }
            let Some(deadline) = self.manager.broken_deadline(&host_id, epoch).await else {
                return;
            };
            let retry_interval = self.manager.config().connect_retry_interval();
            let connect_timeout = self.manager.config().connect_timeout();

            loop {
                let attempt = async {
                    let Some(url) = dial.as_deref() else {
                        return std::future::pending::<Result<(Box<dyn HostLink>, FullSnapshot), LinkError>>()
                            .await;
                    };
                    sleep(retry_interval).await;
                    debug!(host = %host_id, url, "🔁 Reconnecting to host");
                    timeout(connect_timeout, async {
                        let mut link = self.connector.connect(url).await?;
                        let snapshot = read_handshake(link.as_mut()).await?;
                        Ok::<_, LinkError>((link, snapshot))
                    })
                    .await
                    .unwrap_or(Err(LinkError::Timeout(connect_timeout)))
                };

                tokio::select! {
                    _ = sleep_until(deadline) => {
                        self.manager.release_supervisor(&host_id, epoch).await;
                        self.manager.expire_host(&host_id, Instant::now()).await;
                        return;
                    }
                    _ = self.shutdown.initiated() => return,
                    result = attempt => match result {
                        Ok((link, snapshot)) if snapshot.host_id == host_id => {
                            self.manager.release_supervisor(&host_id, epoch).await;
                            let outcome = self.manager.apply_handshake(snapshot, Instant::now()).await;
                            info!(host = %host_id, "🔗 Host reconnected before its deadline");
                            tokio::spawn(self.clone().pump(link, host_id.clone(), outcome.epoch, dial.clone()));
                            return;
                        }
                        Ok((_, snapshot)) => {
                            warn!(
                                host = %host_id,
                                answered = %snapshot.host_id,
                                "Reconnect reached a different host"
                            );
                        }
                        Err(e) => {
                            debug!(host = %host_id, error = %e, "Reconnect attempt failed");
                        }
                    }
                }

                if self.manager.record_retry_failure(&host_id, epoch).await == RetryVerdict::Stop {
                    return;
                }
            }
        })
    }

    /// Dials a configured host until its first handshake succeeds.
    ///
    /// After that the link is served in this task; once it breaks, the host's
    /// supervisor takes over and this task ends.
    pub fn dial(self: &Arc<Self>, url: String) -> JoinHandle<()> {
        let runtime = self.clone();
        tokio::spawn(async move {
            let retry_interval = runtime.manager.config().connect_retry_interval();
            let connect_timeout = runtime.manager.config().connect_timeout();
            loop {
                if runtime.shutdown.is_shutdown_initiated() {
                    return;
                }
                let attempt = timeout(connect_timeout, runtime.connector.connect(&url))
                    .await
                    .unwrap_or(Err(LinkError::Timeout(connect_timeout)));
                match attempt {
                    Ok(link) => match runtime.clone().serve_link(link, Some(url.clone())).await {
                        Ok(host_id) => {
                            debug!(host = %host_id, url = %url, "Seed link handed over");
                            return;
                        }
                        Err(e) => warn!(url = %url, error = %e, "Host rejected during handshake"),
                    },
                    Err(e) => debug!(url = %url, error = %e, "Host not reachable yet"),
                }
                tokio::select! {
                    _ = sleep(retry_interval) => {}
                    _ = runtime.shutdown.initiated() => return,
                }
            }
        })
    }

    /// Accepts inbound host links until shutdown.
    pub fn spawn_listener(self: &Arc<Self>, listener: TcpListener) -> JoinHandle<()> {
        let runtime = self.clone();
        tokio::spawn(async move {
            if let Ok(addr) = listener.local_addr() {
                info!("🌐 Host link listener on ws://{}", addr);
            }
            loop {
                let accepted = tokio::select! {
                    accepted = listener.accept() => accepted,
                    _ = runtime.shutdown.initiated() => {
                        info!("🛑 Host link listener stopping - shutdown initiated");
                        break;
                    }
                };
                match accepted {
                    Ok((stream, addr)) => {
                        let runtime = runtime.clone();
                        tokio::spawn(async move {
                            let link = match accept_link(stream, addr).await {
                                Ok(link) => link,
                                Err(e) => {
                                    warn!(peer = %addr, error = %e, "Inbound host link failed");
                                    return;
                                }
                            };
                            if let Err(e) = runtime.serve_link(Box::new(link), None).await {
                                warn!(peer = %addr, error = %e, "Inbound host link rejected");
                            }
                        });
                    }
                    Err(e) => error!("Failed to accept host link: {}", e),
                }
            }
        })
    }

    /// Periodically evicts hosts whose deadline passed without a supervisor doing it.
    pub fn spawn_expiry_sweeper(self: &Arc<Self>) -> JoinHandle<()> {
        let runtime = self.clone();
        tokio::spawn(async move {
            let period = runtime
                .manager
                .config()
                .expiry_sweep_interval()
                .max(Duration::from_millis(1));
            let mut ticker = interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = ticker.tick() => {}
                    _ = runtime.shutdown.initiated() => {
                        info!("🧹 Expiry sweeper stopping - shutdown initiated");
                        break;
                    }
                }
                let expired = runtime.manager.expire_due(Instant::now()).await;
                if !expired.is_empty() {
                    debug!(count = expired.len(), "Expiry sweep evicted hosts");
                }
            }
        })
    }
}
