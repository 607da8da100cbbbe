//! The client: one actor task owning the connection, the pending-call
//! table, the subscription cache, and the offline queue.
//!
//! Every public call is a command sent into the actor, so the whole
//! client shares a single logical timeline: a response frame, a
//! reconnect, and a new call can never interleave mid-operation. The
//! reopen sequence (reset ids → flush queue → resubscribe) runs as one
//! command and is therefore atomic with respect to every other call.
//!
//! Stale-socket hygiene: every connect attempt bumps a generation
//! counter, and every event a spawned task can send back (connect
//! results, socket frames, reconnect timers, request timeouts) carries
//! the generation it was created under. The actor drops anything from an
//! older generation, so a late frame from a dead socket can never match
//! a pending entry of the current one.

use std::collections::HashMap;

use filament_protocol::{
    Observer, Params, Request, ServerMessage, decode_frame, encode_frame,
};
use serde_json::Value;
use tokio::sync::{mpsc, oneshot};

use crate::config::{ClientConfig, ConnectionState, QueuePolicy};
use crate::socket::{SocketDuplex, SocketEvent, backoff_delay};
use crate::subscription::{SubscribeOptions, Subscription};
use crate::ClientError;

/// Everything the actor reacts to.
pub(crate) enum Command {
    Open {
        notify: Option<oneshot::Sender<()>>,
    },
    Close,
    Shutdown,
    Get {
        resource: String,
        params: Option<Params>,
        data: Option<Value>,
        respond: oneshot::Sender<Result<Value, ClientError>>,
    },
    Set {
        resource: String,
        params: Option<Params>,
        data: Value,
        respond: oneshot::Sender<Result<Value, ClientError>>,
    },
    Attach {
        options: SubscribeOptions,
        observer_id: u64,
        observer: Observer<Value>,
    },
    Detach {
        observer_id: u64,
    },
    Connected {
        generation: u64,
        result: Result<SocketDuplex, ClientError>,
    },
    Socket {
        generation: u64,
        event: SocketEvent,
    },
    ReconnectTimer {
        generation: u64,
    },
    RequestTimeout {
        generation: u64,
        id: u64,
    },
}

enum LinkState {
    Closed,
    Connecting,
    Open {
        outbound: mpsc::UnboundedSender<String>,
    },
    Closing,
}

struct PendingCall {
    respond: oneshot::Sender<Result<Value, ClientError>>,
}

enum QueuedCall {
    Get {
        resource: String,
        params: Option<Params>,
        data: Option<Value>,
        respond: oneshot::Sender<Result<Value, ClientError>>,
    },
    Set {
        resource: String,
        params: Option<Params>,
        data: Value,
        respond: oneshot::Sender<Result<Value, ClientError>>,
    },
}

/// One entry in the subscription cache.
struct SubEntry {
    options: SubscribeOptions,
    /// The request id of the live wire subscription, `None` while the
    /// connection is down.
    wire_id: Option<u64>,
    observers: Vec<(u64, Observer<Value>)>,
    last_value: Option<Value>,
}

struct ClientActor {
    config: ClientConfig,
    commands: mpsc::UnboundedSender<Command>,
    link: LinkState,
    generation: u64,
    explicitly_closed: bool,
    ever_opened: bool,
    attempt: usize,
    next_id: u64,
    pending: HashMap<u64, PendingCall>,
    queue: Vec<QueuedCall>,
    subs: HashMap<String, SubEntry>,
    observer_index: HashMap<u64, String>,
    open_waiters: Vec<oneshot::Sender<()>>,
}

impl ClientActor {
    fn new(
        config: ClientConfig,
        commands: mpsc::UnboundedSender<Command>,
    ) -> Self {
        Self {
            config,
            commands,
            link: LinkState::Closed,
            generation: 0,
            explicitly_closed: false,
            ever_opened: false,
            attempt: 0,
            next_id: 0,
            pending: HashMap::new(),
            queue: Vec::new(),
            subs: HashMap::new(),
            observer_index: HashMap::new(),
            open_waiters: Vec::new(),
        }
    }

    async fn run(mut self, mut rx: mpsc::UnboundedReceiver<Command>) {
        while let Some(command) = rx.recv().await {
            if matches!(command, Command::Shutdown) {
                break;
            }
            self.handle(command);
        }
        // Dropping the link drops the outbound sender, which closes the
        // socket via the connector's writer task.
        self.link = LinkState::Closed;
        tracing::debug!("client actor stopped");
    }

    fn handle(&mut self, command: Command) {
        match command {
            Command::Open { notify } => self.handle_open(notify),
            Command::Close => self.handle_close(),
            Command::Shutdown => unreachable!("handled in run()"),
            Command::Get {
                resource,
                params,
                data,
                respond,
            } => self.handle_call(QueuedCall::Get {
                resource,
                params,
                data,
                respond,
            }),
            Command::Set {
                resource,
                params,
                data,
                respond,
            } => self.handle_call(QueuedCall::Set {
                resource,
                params,
                data,
                respond,
            }),
            Command::Attach {
                options,
                observer_id,
                observer,
            } => self.handle_attach(options, observer_id, observer),
            Command::Detach { observer_id } => self.handle_detach(observer_id),
            Command::Connected { generation, result } => {
                self.handle_connected(generation, result);
            }
            Command::Socket { generation, event } => {
                self.handle_socket(generation, event);
            }
            Command::ReconnectTimer { generation } => {
                self.handle_reconnect_timer(generation);
            }
            Command::RequestTimeout { generation, id } => {
                self.handle_request_timeout(generation, id);
            }
        }
    }

    // ---- lifecycle -------------------------------------------------------

    fn handle_open(&mut self, notify: Option<oneshot::Sender<()>>) {
        match self.link {
            LinkState::Open { .. } => {
                tracing::warn!("open() called on an open connection");
                if let Some(notify) = notify {
                    let _ = notify.send(());
                }
            }
            LinkState::Connecting => {
                tracing::warn!("open() called while already connecting");
                if let Some(notify) = notify {
                    self.open_waiters.push(notify);
                }
            }
            LinkState::Closed | LinkState::Closing => {
                self.explicitly_closed = false;
                self.attempt = 0;
                if let Some(notify) = notify {
                    self.open_waiters.push(notify);
                }
                self.begin_connect(ConnectionState::Connecting);
            }
        }
    }

    fn handle_close(&mut self) {
        self.explicitly_closed = true;
        // Invalidate in-flight connects, timers, and socket events.
        self.generation += 1;

        let was_up = !matches!(self.link, LinkState::Closed);
        self.link = LinkState::Closed;
        self.reject_pending(|| ClientError::ConnectionClosed);
        for entry in self.subs.values_mut() {
            entry.wire_id = None;
        }
        if was_up {
            if let Some(cb) = &self.config.callbacks.on_close {
                cb();
            }
        }
        self.notify_state(ConnectionState::Offline);
    }

    fn begin_connect(&mut self, state: ConnectionState) {
        self.generation += 1;
        let generation = self.generation;
        self.link = LinkState::Connecting;
        self.notify_state(state);

        let connector = std::sync::Arc::clone(&self.config.connector);
        let url = self.config.url.clone();
        let commands = self.commands.clone();
        tokio::spawn(async move {
            let result = connector.connect(&url).await;
            let _ = commands.send(Command::Connected { generation, result });
        });
    }

    fn handle_connected(
        &mut self,
        generation: u64,
        result: Result<SocketDuplex, ClientError>,
    ) {
        if generation != self.generation {
            tracing::debug!("dropping stale connect result");
            return;
        }
        let duplex = match result {
            Ok(duplex) => duplex,
            Err(e) => {
                tracing::warn!(error = %e, "connect failed");
                if let Some(cb) = &self.config.callbacks.on_error {
                    cb(&e.to_string());
                }
                self.link = LinkState::Closed;
                self.schedule_reconnect();
                return;
            }
        };

        // Pump socket events into the command stream, tagged with the
        // generation they belong to.
        let commands = self.commands.clone();
        let mut events = duplex.events;
        tokio::spawn(async move {
            while let Some(event) = events.recv().await {
                let send =
                    commands.send(Command::Socket { generation, event });
                if send.is_err() {
                    break;
                }
            }
        });

        self.link = LinkState::Open {
            outbound: duplex.outbound,
        };
        let reconnected = self.ever_opened;
        self.ever_opened = true;
        self.attempt = 0;

        if reconnected {
            tracing::info!("reconnected");
            if let Some(cb) = &self.config.callbacks.on_reconnect {
                cb();
            }
        }
        if let Some(cb) = &self.config.callbacks.on_open {
            cb();
        }
        self.notify_state(ConnectionState::Online);
        for waiter in self.open_waiters.drain(..) {
            let _ = waiter.send(());
        }

        // The reopen sequence: ids restart, queued calls flush with
        // fresh ids, live cache entries resubscribe. Runs to completion
        // before any other command is handled.
        self.next_id = 0;
        self.flush_queue();
        self.resubscribe_all();
    }

    fn handle_socket(&mut self, generation: u64, event: SocketEvent) {
        if generation != self.generation {
            tracing::debug!("dropping stale socket event");
            return;
        }
        match event {
            SocketEvent::Frame(frame) => self.handle_frame(&frame),
            SocketEvent::Error(message) => {
                tracing::warn!(%message, "socket error");
                if let Some(cb) = &self.config.callbacks.on_error {
                    cb(&message);
                }
                if matches!(self.link, LinkState::Open { .. }) {
                    self.link = LinkState::Closing;
                }
            }
            SocketEvent::Closed => {
                tracing::info!("connection closed, will reconnect");
                self.link = LinkState::Closed;
                self.reject_pending(|| ClientError::ConnectionClosed);
                for entry in self.subs.values_mut() {
                    entry.wire_id = None;
                }
                if let Some(cb) = &self.config.callbacks.on_close {
                    cb();
                }
                self.notify_state(ConnectionState::Reconnecting);
                self.schedule_reconnect();
            }
        }
    }

    fn schedule_reconnect(&mut self) {
        if self.explicitly_closed {
            return;
        }
        let delay = backoff_delay(
            &self.config.reconnect_delays,
            self.attempt,
            self.config.jitter,
        );
        self.attempt += 1;
        tracing::debug!(attempt = self.attempt, ?delay, "reconnect scheduled");

        let generation = self.generation;
        let commands = self.commands.clone();
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let _ = commands.send(Command::ReconnectTimer { generation });
        });
    }

    fn handle_reconnect_timer(&mut self, generation: u64) {
        if generation != self.generation
            || self.explicitly_closed
            || !matches!(self.link, LinkState::Closed)
        {
            tracing::debug!("dropping stale reconnect timer");
            return;
        }
        self.begin_connect(ConnectionState::Reconnecting);
    }

    // ---- calls -----------------------------------------------------------

    fn handle_call(&mut self, call: QueuedCall) {
        if !matches!(self.link, LinkState::Open { .. }) {
            match self.config.queue_policy {
                QueuePolicy::Buffer => self.queue.push(call),
                QueuePolicy::Fail => {
                    let respond = match call {
                        QueuedCall::Get { respond, .. } => respond,
                        QueuedCall::Set { respond, .. } => respond,
                    };
                    let _ = respond.send(Err(ClientError::NotOpen));
                }
            }
            return;
        }
        self.send_call(call);
    }

    fn send_call(&mut self, call: QueuedCall) {
        let id = self.alloc_id();
        let (request, respond) = match call {
            QueuedCall::Get {
                resource,
                params,
                data,
                respond,
            } => (
                Request::GetRequest {
                    id,
                    resource,
                    params,
                    data,
                },
                respond,
            ),
            QueuedCall::Set {
                resource,
                params,
                data,
                respond,
            } => (
                Request::SetRequest {
                    id,
                    resource,
                    params,
                    data,
                },
                respond,
            ),
        };
        self.pending.insert(id, PendingCall { respond });
        self.transmit(&request);

        if let Some(timeout) = self.config.request_timeout {
            let generation = self.generation;
            let commands = self.commands.clone();
            tokio::spawn(async move {
                tokio::time::sleep(timeout).await;
                let _ = commands
                    .send(Command::RequestTimeout { generation, id });
            });
        }
    }

    fn handle_request_timeout(&mut self, generation: u64, id: u64) {
        if generation != self.generation {
            return;
        }
        if let Some(call) = self.pending.remove(&id) {
            tracing::warn!(id, "request timed out");
            let _ = call.respond.send(Err(ClientError::Timeout));
        }
    }

    fn flush_queue(&mut self) {
        for call in std::mem::take(&mut self.queue) {
            self.send_call(call);
        }
    }

    // ---- subscriptions ---------------------------------------------------

    fn handle_attach(
        &mut self,
        options: SubscribeOptions,
        observer_id: u64,
        observer: Observer<Value>,
    ) {
        let key = if options.cache {
            options.cache_key()
        } else {
            // Unshared entries get a unique key so they never merge.
            format!("{}#{observer_id}", options.cache_key())
        };
        self.observer_index.insert(observer_id, key.clone());

        if let Some(entry) = self.subs.get_mut(&key) {
            // Joining a live shared stream: replay the last value, no
            // wire traffic.
            if let Some(value) = &entry.last_value {
                observer.next(value.clone());
            }
            entry.observers.push((observer_id, observer));
            return;
        }

        let mut entry = SubEntry {
            options,
            wire_id: None,
            observers: vec![(observer_id, observer)],
            last_value: None,
        };
        if matches!(self.link, LinkState::Open { .. }) {
            let id = self.alloc_id();
            entry.wire_id = Some(id);
            let request = Request::SubscribeRequest {
                id,
                resource: entry.options.resource.clone(),
                params: entry.options.params.clone(),
                data: entry.options.data.clone(),
            };
            self.subs.insert(key, entry);
            self.transmit(&request);
        } else {
            // The reopen sequence will subscribe it.
            self.subs.insert(key, entry);
        }
    }

    fn handle_detach(&mut self, observer_id: u64) {
        let Some(key) = self.observer_index.remove(&observer_id) else {
            return;
        };
        let Some(entry) = self.subs.get_mut(&key) else {
            return;
        };
        entry.observers.retain(|(id, _)| *id != observer_id);
        if !entry.observers.is_empty() {
            return;
        }

        let Some(entry) = self.subs.remove(&key) else {
            return;
        };
        // Only tear down on the wire if this generation's subscription
        // is actually live; after a drop there is nothing to unwind.
        if let Some(wire_id) = entry.wire_id {
            if matches!(self.link, LinkState::Open { .. }) {
                self.transmit(&Request::UnsubscribeRequest {
                    id: wire_id,
                    resource: entry.options.resource.clone(),
                    params: entry.options.params.clone(),
                });
            }
        }
    }

    fn resubscribe_all(&mut self) {
        let keys: Vec<String> = self.subs.keys().cloned().collect();
        for key in keys {
            let id = self.alloc_id();
            let request = {
                let Some(entry) = self.subs.get_mut(&key) else {
                    continue;
                };
                entry.wire_id = Some(id);
                Request::SubscribeRequest {
                    id,
                    resource: entry.options.resource.clone(),
                    params: entry.options.params.clone(),
                    data: entry.options.data.clone(),
                }
            };
            self.transmit(&request);
        }
    }

    // ---- inbound frames --------------------------------------------------

    fn handle_frame(&mut self, frame: &str) {
        if let Some(cb) = &self.config.callbacks.on_message {
            cb(frame);
        }
        let message: ServerMessage = match decode_frame(frame) {
            Ok(message) => message,
            Err(e) => {
                tracing::warn!(error = %e, "unparseable frame");
                if let Some(cb) = &self.config.callbacks.on_error {
                    cb(&e.to_string());
                }
                return;
            }
        };

        match message {
            ServerMessage::GetResponse { id, data, .. }
            | ServerMessage::SetSuccess { id, data, .. } => {
                self.resolve_pending(id, Ok(data));
            }
            ServerMessage::SubscribeAccept { id, resource } => {
                tracing::debug!(id, %resource, "subscription accepted");
            }
            ServerMessage::SubscribeEvent { id, data, .. } => {
                match self.sub_by_wire_id(id) {
                    Some(entry) => {
                        entry.last_value = Some(data.clone());
                        for (_, observer) in &entry.observers {
                            observer.next(data.clone());
                        }
                    }
                    None => {
                        tracing::warn!(id, "event for unknown subscription");
                    }
                }
            }
            ServerMessage::UnsubscribeAccept { id, resource } => {
                tracing::debug!(id, %resource, "unsubscribe accepted");
            }
            ServerMessage::RequestReject { error, request } => {
                self.handle_reject(error, &request);
            }
            ServerMessage::Reject { error } => {
                tracing::error!(%error, "server rejected unidentifiable frame");
                if let Some(cb) = &self.config.callbacks.on_error {
                    cb(&error);
                }
            }
        }
    }

    fn handle_reject(&mut self, error: String, request: &Value) {
        let Some(id) = request.get("id").and_then(Value::as_u64) else {
            tracing::error!(%error, "reject without correlatable id");
            if let Some(cb) = &self.config.callbacks.on_error {
                cb(&error);
            }
            return;
        };
        if let Some(call) = self.pending.remove(&id) {
            let _ = call.respond.send(Err(ClientError::Rejected(error)));
            return;
        }
        // A rejected subscription is dead: tell every observer and drop
        // the entry so a later subscribe starts fresh.
        let key = self.subs.iter().find_map(|(key, entry)| {
            (entry.wire_id == Some(id)).then(|| key.clone())
        });
        match key {
            Some(key) => {
                if let Some(entry) = self.subs.remove(&key) {
                    for (observer_id, observer) in entry.observers {
                        self.observer_index.remove(&observer_id);
                        observer.error(error.clone());
                    }
                }
            }
            None => {
                tracing::warn!(id, %error, "reject with no matching call");
            }
        }
    }

    fn resolve_pending(&mut self, id: u64, result: Result<Value, ClientError>) {
        match self.pending.remove(&id) {
            Some(call) => {
                let _ = call.respond.send(result);
            }
            None => {
                tracing::warn!(id, "no pending listener for id");
            }
        }
    }

    fn sub_by_wire_id(&mut self, id: u64) -> Option<&mut SubEntry> {
        self.subs
            .values_mut()
            .find(|entry| entry.wire_id == Some(id))
    }

    // ---- plumbing --------------------------------------------------------

    fn alloc_id(&mut self) -> u64 {
        let id = self.next_id;
        self.next_id += 1;
        id
    }

    fn transmit(&mut self, request: &Request) {
        let LinkState::Open { outbound } = &self.link else {
            tracing::warn!("transmit while not open");
            return;
        };
        match encode_frame(request) {
            Ok(frame) => {
                if let Some(cb) = &self.config.callbacks.on_send {
                    cb(&frame);
                }
                if outbound.send(frame).is_err() {
                    // Writer already gone; the Closed event will clean up.
                    tracing::debug!("socket writer gone");
                }
            }
            Err(e) => {
                tracing::error!(error = %e, "failed to encode request");
            }
        }
    }

    fn reject_pending(&mut self, error: impl Fn() -> ClientError) {
        for (_, call) in self.pending.drain() {
            let _ = call.respond.send(Err(error()));
        }
    }

    fn notify_state(&self, state: ConnectionState) {
        if let Some(cb) = &self.config.callbacks.connection_state {
            cb(state);
        }
    }
}

/// Handle to one RPC connection.
///
/// Cheap to clone; all clones share the connection. Dropping the last
/// clone closes the connection and stops the client task.
///
/// # Example
///
/// ```rust,ignore
/// let client = Client::connect(ClientConfig::new("ws://localhost:9200")).await?;
/// let posts = client.get("/posts", None, None).await?;
/// ```
#[derive(Clone)]
pub struct Client {
    inner: std::sync::Arc<ClientInner>,
}

struct ClientInner {
    commands: mpsc::UnboundedSender<Command>,
}

impl Drop for ClientInner {
    fn drop(&mut self) {
        let _ = self.commands.send(Command::Shutdown);
    }
}

impl Client {
    /// Creates a client with default configuration. The connection is
    /// not opened until [`open()`](Self::open) is called.
    pub fn new(url: impl Into<String>) -> Self {
        Self::with_config(ClientConfig::new(url))
    }

    /// Creates a client from an explicit configuration, unopened.
    pub fn with_config(config: ClientConfig) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        let actor = ClientActor::new(config, tx.clone());
        tokio::spawn(actor.run(rx));
        Self {
            inner: std::sync::Arc::new(ClientInner { commands: tx }),
        }
    }

    /// Creates a client, opens the connection, and resolves once it is
    /// online. Retries with the configured backoff until it succeeds.
    pub async fn connect(config: ClientConfig) -> Result<Self, ClientError> {
        let client = Self::with_config(config);
        let (tx, rx) = oneshot::channel();
        client
            .send_command(Command::Open { notify: Some(tx) })
            .ok_or(ClientError::Closed)?;
        rx.await.map_err(|_| ClientError::Closed)?;
        Ok(client)
    }

    /// Opens the connection. A no-op (with a warning) if it is already
    /// open or opening.
    pub fn open(&self) {
        let _ = self.send_command(Command::Open { notify: None });
    }

    /// Closes the connection and disables auto-reconnect until the next
    /// [`open()`](Self::open). Pending calls fail with
    /// [`ClientError::ConnectionClosed`]; subscriptions stay cached and
    /// resubscribe on the next open.
    pub fn close(&self) {
        let _ = self.send_command(Command::Close);
    }

    /// Reads the current value of a resource.
    pub async fn get(
        &self,
        resource: impl Into<String>,
        params: Option<Params>,
        data: Option<Value>,
    ) -> Result<Value, ClientError> {
        let (tx, rx) = oneshot::channel();
        self.send_command(Command::Get {
            resource: resource.into(),
            params,
            data,
            respond: tx,
        })
        .ok_or(ClientError::Closed)?;
        rx.await.map_err(|_| ClientError::Closed)?
    }

    /// Writes a value; resolves with the server's resulting state.
    pub async fn set(
        &self,
        resource: impl Into<String>,
        data: Value,
        params: Option<Params>,
    ) -> Result<Value, ClientError> {
        let (tx, rx) = oneshot::channel();
        self.send_command(Command::Set {
            resource: resource.into(),
            params,
            data,
            respond: tx,
        })
        .ok_or(ClientError::Closed)?;
        rx.await.map_err(|_| ClientError::Closed)?
    }

    /// Creates a lazy subscription to a resource. The wire subscription
    /// starts when the first observer attaches; shared entries (the
    /// default) reuse one wire stream and replay the last value to late
    /// observers.
    pub fn subscribe(&self, options: SubscribeOptions) -> Subscription {
        Subscription::new(self.inner.commands.clone(), options)
    }

    fn send_command(&self, command: Command) -> Option<()> {
        self.inner.commands.send(command).ok()
    }
}
