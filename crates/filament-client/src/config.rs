//! Client configuration, lifecycle callbacks, and policies.

use std::sync::Arc;
use std::time::Duration;

use crate::socket::{Connector, WsConnector};

/// What to do with a `get`/`set` issued while the connection is down.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum QueuePolicy {
    /// Hold the call in the offline queue and send it (with a fresh id)
    /// once the connection opens.
    #[default]
    Buffer,
    /// Fail the call immediately with
    /// [`NotOpen`](crate::ClientError::NotOpen).
    Fail,
}

/// Coarse connection lifecycle, reported through
/// [`Callbacks::connection_state`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// No transport and no attempt in progress.
    Offline,
    /// First connection attempt in progress.
    Connecting,
    /// A previously open connection dropped; waiting out the backoff or
    /// attempting to reconnect.
    Reconnecting,
    /// Transport open, traffic flowing.
    Online,
}

/// Optional lifecycle hooks. All run on the client's own task; keep them
/// short and non-blocking.
#[derive(Default)]
pub struct Callbacks {
    pub(crate) on_open: Option<Box<dyn Fn() + Send + Sync>>,
    pub(crate) on_close: Option<Box<dyn Fn() + Send + Sync>>,
    pub(crate) on_error: Option<Box<dyn Fn(&str) + Send + Sync>>,
    pub(crate) on_reconnect: Option<Box<dyn Fn() + Send + Sync>>,
    pub(crate) on_send: Option<Box<dyn Fn(&str) + Send + Sync>>,
    pub(crate) on_message: Option<Box<dyn Fn(&str) + Send + Sync>>,
    pub(crate) connection_state: Option<Box<dyn Fn(ConnectionState) + Send + Sync>>,
}

impl Callbacks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fires every time a transport opens (first connect and reconnects).
    pub fn on_open(mut self, f: impl Fn() + Send + Sync + 'static) -> Self {
        self.on_open = Some(Box::new(f));
        self
    }

    /// Fires every time an open transport closes.
    pub fn on_close(mut self, f: impl Fn() + Send + Sync + 'static) -> Self {
        self.on_close = Some(Box::new(f));
        self
    }

    pub fn on_error(
        mut self,
        f: impl Fn(&str) + Send + Sync + 'static,
    ) -> Self {
        self.on_error = Some(Box::new(f));
        self
    }

    /// Fires when a transport opens again after a drop (after `on_open`
    /// has fired at least once before).
    pub fn on_reconnect(
        mut self,
        f: impl Fn() + Send + Sync + 'static,
    ) -> Self {
        self.on_reconnect = Some(Box::new(f));
        self
    }

    /// Observes every outbound frame, after serialization.
    pub fn on_send(mut self, f: impl Fn(&str) + Send + Sync + 'static) -> Self {
        self.on_send = Some(Box::new(f));
        self
    }

    /// Observes every inbound frame, before parsing.
    pub fn on_message(
        mut self,
        f: impl Fn(&str) + Send + Sync + 'static,
    ) -> Self {
        self.on_message = Some(Box::new(f));
        self
    }

    pub fn connection_state(
        mut self,
        f: impl Fn(ConnectionState) + Send + Sync + 'static,
    ) -> Self {
        self.connection_state = Some(Box::new(f));
        self
    }
}

/// Configuration for a [`Client`](crate::Client).
pub struct ClientConfig {
    pub(crate) url: String,
    pub(crate) reconnect_delays: Vec<Duration>,
    pub(crate) jitter: f64,
    pub(crate) queue_policy: QueuePolicy,
    pub(crate) request_timeout: Option<Duration>,
    pub(crate) callbacks: Callbacks,
    pub(crate) connector: Arc<dyn Connector>,
}

impl ClientConfig {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            reconnect_delays: vec![
                Duration::from_secs(1),
                Duration::from_secs(2),
                Duration::from_secs(5),
                Duration::from_secs(10),
            ],
            jitter: 0.2,
            queue_policy: QueuePolicy::default(),
            request_timeout: None,
            callbacks: Callbacks::default(),
            connector: Arc::new(WsConnector),
        }
    }

    /// Replaces the backoff schedule. Attempts past the end reuse the
    /// last entry.
    pub fn reconnect_delays(mut self, delays: Vec<Duration>) -> Self {
        self.reconnect_delays = delays;
        self
    }

    /// Fractional jitter applied to every backoff delay, uniform in
    /// `±jitter`. Defaults to `0.2`.
    pub fn jitter(mut self, jitter: f64) -> Self {
        self.jitter = jitter;
        self
    }

    pub fn queue_policy(mut self, policy: QueuePolicy) -> Self {
        self.queue_policy = policy;
        self
    }

    /// Fails `get`/`set` calls that receive no response within `timeout`.
    /// Off by default.
    pub fn request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = Some(timeout);
        self
    }

    pub fn callbacks(mut self, callbacks: Callbacks) -> Self {
        self.callbacks = callbacks;
        self
    }

    /// Replaces the transport factory. Tests use this to drive the
    /// client over in-memory channels.
    pub fn connector(mut self, connector: Arc<dyn Connector>) -> Self {
        self.connector = connector;
        self
    }
}
