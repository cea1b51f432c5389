//! Host control link abstraction.
//!
//! A link carries [`HostMessage`]s from one session host to the directory. The
//! WebSocket transport lives in [`super::websocket`]; the in-memory pair in
//! [`memory`] drives the same runtime without sockets.

use super::protocol::HostMessage;
use crate::error::LinkError;
use async_trait::async_trait;

/// Receiving end of one host control link.
#[async_trait]
pub trait HostLink: Send {
    /// Next message from the host. `None` once the link is closed.
    async fn recv(&mut self) -> Option<Result<HostMessage, LinkError>>;

    /// Human readable peer description for logs.
    fn peer(&self) -> String;
}

/// Dials host control links.
#[async_trait]
pub trait HostConnector: Send + Sync {
    /// Opens a link to the host listening at `url`.
    async fn connect(&self, url: &str) -> Result<Box<dyn HostLink>, LinkError>;
}

/// Channel-backed links, used by tests and embedders that host sessions in-process.
pub mod memory {
    use super::{HostConnector, HostLink};
    use crate::error::LinkError;
    use crate::replication::protocol::HostMessage;
    use async_trait::async_trait;
    use std::collections::{HashMap, VecDeque};
    use std::sync::atomic::{AtomicU64, Ordering};
    use tokio::sync::{mpsc, Mutex};

    /// Directory side of an in-memory link.
    #[derive(Debug)]
    pub struct MemoryLink {
        receiver: mpsc::UnboundedReceiver<Result<HostMessage, LinkError>>,
        peer: String,
    }

    /// Host side of an in-memory link. Dropping it closes the link.
    #[derive(Debug, Clone)]
    pub struct MemoryHost {
        sender: mpsc::UnboundedSender<Result<HostMessage, LinkError>>,
    }

    impl MemoryHost {
        /// Sends a message. Returns `false` if the directory side is gone.
        pub fn send(&self, message: HostMessage) -> bool {
            self.sender.send(Ok(message)).is_ok()
        }

        /// Injects a transport failure.
        pub fn fail(&self, error: LinkError) -> bool {
            self.sender.send(Err(error)).is_ok()
        }
    }

    /// Creates a connected host/directory pair.
    pub fn pair(peer: impl Into<String>) -> (MemoryHost, MemoryLink) {
        let (sender, receiver) = mpsc::unbounded_channel();
        (
            MemoryHost { sender },
            MemoryLink {
                receiver,
                peer: peer.into(),
            },
        )
    }

    #[async_trait]
    impl HostLink for MemoryLink {
        async fn recv(&mut self) -> Option<Result<HostMessage, LinkError>> {
            self.receiver.recv().await
        }

        fn peer(&self) -> String {
            self.peer.clone()
        }
    }

    /// Connector handing out links previously offered for a URL.
    #[derive(Debug, Default)]
    pub struct MemoryConnector {
        offered: Mutex<HashMap<String, VecDeque<MemoryLink>>>,
        attempts: AtomicU64,
    }

    impl MemoryConnector {
        /// Creates a connector with nothing listening.
        pub fn new() -> Self {
            Self::default()
        }

        /// Makes one link available to the next dial of `url`; returns the host side.
        pub async fn offer(&self, url: &str) -> MemoryHost {
            let (host, link) = pair(url);
            self.offered
                .lock()
                .await
                .entry(url.to_string())
                .or_default()
                .push_back(link);
            host
        }

        /// Number of dial attempts so far.
        pub fn attempts(&self) -> u64 {
            self.attempts.load(Ordering::Relaxed)
        }
    }

    #[async_trait]
    impl HostConnector for MemoryConnector {
        async fn connect(&self, url: &str) -> Result<Box<dyn HostLink>, LinkError> {
            self.attempts.fetch_add(1, Ordering::Relaxed);
            let link = self
                .offered
                .lock()
                .await
                .get_mut(url)
                .and_then(VecDeque::pop_front)
                .ok_or_else(|| LinkError::Connect(format!("nothing listening at {url}")))?;
            Ok(Box::new(link))
        }
    }
}
