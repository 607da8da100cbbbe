//! Transport factory and the WebSocket implementation.
//!
//! A [`Connector`] turns a URL into a frame-level duplex: an unbounded
//! sender the client writes frames into, and an event stream the client
//! reads frames and lifecycle events from. The production [`WsConnector`]
//! wraps `tokio-tungstenite` with one pump task per direction; tests
//! substitute channel-backed connectors.

use std::time::Duration;

use futures_util::future::BoxFuture;
use futures_util::{SinkExt, StreamExt};
use rand::Rng;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message;

use crate::ClientError;

/// Something the transport produced.
#[derive(Debug)]
pub enum SocketEvent {
    /// One inbound text frame.
    Frame(String),
    /// The transport failed; a `Closed` event follows.
    Error(String),
    /// The transport is gone. Terminal.
    Closed,
}

/// One live transport, reduced to frames.
pub struct SocketDuplex {
    /// Frames to send. Dropping every sender closes the transport.
    pub outbound: mpsc::UnboundedSender<String>,
    /// Frames and lifecycle events from the transport.
    pub events: mpsc::UnboundedReceiver<SocketEvent>,
}

/// Factory for transports. Called once per connection attempt.
pub trait Connector: Send + Sync + 'static {
    fn connect(
        &self,
        url: &str,
    ) -> BoxFuture<'static, Result<SocketDuplex, ClientError>>;
}

/// The production connector: `tokio_tungstenite::connect_async` plus a
/// writer task and a reader task.
pub struct WsConnector;

impl Connector for WsConnector {
    fn connect(
        &self,
        url: &str,
    ) -> BoxFuture<'static, Result<SocketDuplex, ClientError>> {
        let url = url.to_string();
        Box::pin(async move {
            let (ws, _response) = tokio_tungstenite::connect_async(&url)
                .await
                .map_err(|e| ClientError::Connect(e.to_string()))?;
            tracing::debug!(%url, "WebSocket connected");

            let (mut sink, mut stream) = ws.split();
            let (out_tx, mut out_rx) = mpsc::unbounded_channel::<String>();
            let (event_tx, event_rx) = mpsc::unbounded_channel();

            tokio::spawn(async move {
                while let Some(frame) = out_rx.recv().await {
                    if sink.send(Message::text(frame)).await.is_err() {
                        break;
                    }
                }
                // All senders dropped or the sink broke: close the socket.
                let _ = sink.close().await;
            });

            tokio::spawn(async move {
                loop {
                    match stream.next().await {
                        Some(Ok(Message::Text(text))) => {
                            let frame =
                                SocketEvent::Frame(text.as_str().to_owned());
                            if event_tx.send(frame).is_err() {
                                break;
                            }
                        }
                        Some(Ok(Message::Close(_))) | None => {
                            let _ = event_tx.send(SocketEvent::Closed);
                            break;
                        }
                        Some(Ok(_)) => continue, // binary/ping/pong
                        Some(Err(e)) => {
                            let _ = event_tx
                                .send(SocketEvent::Error(e.to_string()));
                            let _ = event_tx.send(SocketEvent::Closed);
                            break;
                        }
                    }
                }
            });

            Ok(SocketDuplex {
                outbound: out_tx,
                events: event_rx,
            })
        })
    }
}

/// Picks the backoff delay for a retry attempt: the schedule entry at
/// `attempt`, clamped to the last entry, with uniform `±jitter` applied.
pub(crate) fn backoff_delay(
    delays: &[Duration],
    attempt: usize,
    jitter: f64,
) -> Duration {
    let base = match delays.last() {
        Some(_) => delays[attempt.min(delays.len() - 1)],
        None => Duration::from_secs(1),
    };
    jittered(base, jitter)
}

fn jittered(delay: Duration, jitter: f64) -> Duration {
    if jitter <= 0.0 {
        return delay;
    }
    let factor = 1.0 + rand::rng().random_range(-jitter..=jitter);
    delay.mul_f64(factor.max(0.0))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backoff_delay_follows_schedule() {
        let delays = [
            Duration::from_secs(1),
            Duration::from_secs(2),
            Duration::from_secs(5),
        ];
        assert_eq!(backoff_delay(&delays, 0, 0.0), Duration::from_secs(1));
        assert_eq!(backoff_delay(&delays, 1, 0.0), Duration::from_secs(2));
        assert_eq!(backoff_delay(&delays, 2, 0.0), Duration::from_secs(5));
    }

    #[test]
    fn test_backoff_delay_clamps_to_last_entry() {
        let delays = [Duration::from_secs(1), Duration::from_secs(10)];
        assert_eq!(backoff_delay(&delays, 50, 0.0), Duration::from_secs(10));
    }

    #[test]
    fn test_backoff_delay_empty_schedule_falls_back() {
        assert_eq!(backoff_delay(&[], 3, 0.0), Duration::from_secs(1));
    }

    #[test]
    fn test_jittered_stays_within_bounds() {
        let base = Duration::from_millis(1000);
        for _ in 0..100 {
            let delay = jittered(base, 0.2);
            assert!(delay >= Duration::from_millis(800), "{delay:?}");
            assert!(delay <= Duration::from_millis(1200), "{delay:?}");
        }
    }

    #[test]
    fn test_jittered_zero_jitter_is_exact() {
        let base = Duration::from_millis(250);
        assert_eq!(jittered(base, 0.0), base);
    }
}
