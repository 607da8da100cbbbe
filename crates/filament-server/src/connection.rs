//! Frame-level connection abstraction and the WebSocket binding.
//!
//! The dispatcher works against [`FrameSink`] / [`FrameSource`] — the write
//! and read half of one connection, split so that server-pushed frames
//! (subscription events) never contend with a blocked read. The production
//! implementation wraps a `tokio-tungstenite` stream; tests drive the
//! dispatcher with channel-backed halves instead.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use tokio::net::{TcpListener, TcpStream};
use tokio_tungstenite::WebSocketStream;
use tokio_tungstenite::tungstenite::Message;

use crate::TransportError;

/// Counter for generating unique client IDs.
static NEXT_CLIENT_ID: AtomicU64 = AtomicU64::new(1);

type WsStream = WebSocketStream<TcpStream>;

/// Opaque identifier for one connected client, unique for the lifetime of
/// the process. Handlers receive it so they can attribute writes and
/// per-client state to a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ClientId(u64);

impl ClientId {
    pub(crate) fn next() -> Self {
        Self(NEXT_CLIENT_ID.fetch_add(1, Ordering::Relaxed))
    }

    /// Returns the underlying `u64` value.
    pub fn into_inner(self) -> u64 {
        self.0
    }
}

impl fmt::Display for ClientId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "client-{}", self.0)
    }
}

/// The write half of one connection.
pub trait FrameSink: Send + 'static {
    /// Sends one text frame to the remote peer.
    fn send(
        &mut self,
        frame: String,
    ) -> impl std::future::Future<Output = Result<(), TransportError>> + Send;

    /// Closes the connection.
    fn close(
        &mut self,
    ) -> impl std::future::Future<Output = Result<(), TransportError>> + Send;
}

/// The read half of one connection.
pub trait FrameSource: Send + 'static {
    /// Receives the next text frame from the remote peer.
    ///
    /// Returns `Ok(None)` when the connection is cleanly closed. Must be
    /// cancel safe: the dispatcher polls it inside a `select!` loop.
    ///
    /// An `Err` means the transport can no longer deliver frames; the
    /// dispatcher treats it as a close (recoverable mid-stream errors,
    /// like non-text frames, are the implementation's to absorb).
    fn recv(
        &mut self,
    ) -> impl std::future::Future<Output = Result<Option<String>, TransportError>> + Send;
}

/// A WebSocket listener that accepts incoming connections.
pub struct WsTransport {
    listener: TcpListener,
}

impl WsTransport {
    /// Binds a new WebSocket listener to the given address.
    pub async fn bind(addr: &str) -> Result<Self, TransportError> {
        let listener = TcpListener::bind(addr)
            .await
            .map_err(TransportError::AcceptFailed)?;
        tracing::info!(addr, "WebSocket listener bound");
        Ok(Self { listener })
    }

    /// Returns the local address the listener is bound to.
    pub fn local_addr(&self) -> std::io::Result<std::net::SocketAddr> {
        self.listener.local_addr()
    }

    /// Waits for and accepts the next incoming connection, returning its
    /// two halves and the peer's address.
    pub async fn accept(
        &mut self,
    ) -> Result<(WsFrameSink, WsFrameSource, std::net::SocketAddr), TransportError>
    {
        let (stream, addr) = self
            .listener
            .accept()
            .await
            .map_err(TransportError::AcceptFailed)?;

        let ws = tokio_tungstenite::accept_async(stream).await.map_err(|e| {
            TransportError::AcceptFailed(std::io::Error::new(
                std::io::ErrorKind::ConnectionRefused,
                e,
            ))
        })?;
        tracing::debug!(%addr, "accepted WebSocket connection");

        let (sink, stream) = ws.split();
        Ok((WsFrameSink { sink }, WsFrameSource { stream }, addr))
    }
}

/// The write half of an accepted WebSocket connection.
pub struct WsFrameSink {
    sink: SplitSink<WsStream, Message>,
}

impl FrameSink for WsFrameSink {
    async fn send(&mut self, frame: String) -> Result<(), TransportError> {
        self.sink.send(Message::text(frame)).await.map_err(|e| {
            TransportError::SendFailed(std::io::Error::new(
                std::io::ErrorKind::BrokenPipe,
                e,
            ))
        })
    }

    async fn close(&mut self) -> Result<(), TransportError> {
        self.sink.close().await.map_err(|e| {
            TransportError::SendFailed(std::io::Error::new(
                std::io::ErrorKind::BrokenPipe,
                e,
            ))
        })
    }
}

/// The read half of an accepted WebSocket connection.
pub struct WsFrameSource {
    stream: SplitStream<WsStream>,
}

impl FrameSource for WsFrameSource {
    async fn recv(&mut self) -> Result<Option<String>, TransportError> {
        loop {
            match self.stream.next().await {
                Some(Ok(Message::Text(text))) => {
                    return Ok(Some(text.as_str().to_owned()));
                }
                Some(Ok(Message::Binary(_))) => {
                    // Only text frames carry protocol envelopes.
                    tracing::debug!("ignoring binary frame");
                    continue;
                }
                Some(Ok(Message::Close(_))) | None => return Ok(None),
                Some(Ok(_)) => continue, // ping/pong/raw frame
                Some(Err(e)) => {
                    return Err(TransportError::ReceiveFailed(
                        std::io::Error::new(
                            std::io::ErrorKind::ConnectionReset,
                            e,
                        ),
                    ));
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_client_id_next_is_unique() {
        let a = ClientId::next();
        let b = ClientId::next();
        assert_ne!(a, b);
    }

    #[test]
    fn test_client_id_display() {
        let id = ClientId(7);
        assert_eq!(id.to_string(), "client-7");
    }

    #[test]
    fn test_client_id_hash_works_as_map_key() {
        use std::collections::HashMap;
        let mut map = HashMap::new();
        map.insert(ClientId(1), "a");
        map.insert(ClientId(2), "b");
        assert_eq!(map[&ClientId(1)], "a");
    }
}
