//! WebSocket transport for host control links.
//!
//! Each [`HostMessage`] travels as one JSON text frame. Pings are answered
//! in place; binary frames are a protocol violation.

use super::link::{HostConnector, HostLink};
use super::protocol::HostMessage;
use crate::error::LinkError;
use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use std::net::SocketAddr;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;
use tokio_tungstenite::{accept_async, connect_async, tungstenite::Message, WebSocketStream};
use tracing::trace;

/// A host control link over a WebSocket stream.
pub struct WebSocketLink<S> {
    stream: WebSocketStream<S>,
    peer: String,
}

impl<S> WebSocketLink<S> {
    /// Wraps an established WebSocket stream.
    pub fn new(stream: WebSocketStream<S>, peer: impl Into<String>) -> Self {
        Self {
            stream,
            peer: peer.into(),
        }
    }
}

#[async_trait]
impl<S> HostLink for WebSocketLink<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    async fn recv(&mut self) -> Option<Result<HostMessage, LinkError>> {
        loop {
            match self.stream.next().await? {
                Ok(Message::Text(text)) => {
                    trace!(peer = %self.peer, bytes = text.len(), "📨 Host frame");
                    return Some(serde_json::from_str(text.as_str()).map_err(LinkError::from));
                }
                Ok(Message::Ping(data)) => {
                    if let Err(e) = self.stream.send(Message::Pong(data)).await {
                        return Some(Err(LinkError::Transport(e.to_string())));
                    }
                }
                Ok(Message::Close(_)) => return None,
                Ok(Message::Binary(_)) => {
                    return Some(Err(LinkError::Protocol(
                        "binary frames are not part of the host protocol".to_string(),
                    )));
                }
                Ok(_) => {}
                Err(e) => return Some(Err(LinkError::Transport(e.to_string()))),
            }
        }
    }

    fn peer(&self) -> String {
        self.peer.clone()
    }
}

/// Accepts a host that dialled the directory.
pub async fn accept_link(
    stream: TcpStream,
    addr: SocketAddr,
) -> Result<WebSocketLink<TcpStream>, LinkError> {
    let stream = accept_async(stream)
        .await
        .map_err(|e| LinkError::Connect(format!("WebSocket handshake failed: {e}")))?;
    Ok(WebSocketLink::new(stream, addr.to_string()))
}

/// Dials hosts over `ws://` URLs.
#[derive(Debug, Clone, Copy, Default)]
pub struct WebSocketConnector;

#[async_trait]
impl HostConnector for WebSocketConnector {
    async fn connect(&self, url: &str) -> Result<Box<dyn HostLink>, LinkError> {
        let (stream, _) = connect_async(url)
            .await
            .map_err(|e| LinkError::Connect(format!("{url}: {e}")))?;
        Ok(Box::new(WebSocketLink::new(stream, url)))
    }
}
