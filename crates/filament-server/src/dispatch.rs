//! Per-connection dispatch: the pipeline between inbound frames and
//! handler invocations.
//!
//! Each connection is served by one task running [`Dispatcher::serve_connection`].
//! Inbound frames are processed strictly in arrival order, one at a time;
//! outbound frames (responses, rejects, subscription events) go through a
//! single unbounded queue per connection, drained into the sink by the
//! same task. Subscription observers hold a clone of the queue's sender,
//! so a data source can push events from any task without touching the
//! socket directly.
//!
//! The reject discipline: every identifiable request gets exactly one
//! terminal frame (subscriptions additionally get recurring events). The
//! single exception is a handler result that fails response-schema
//! validation — that is logged and dropped, never sent.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;

use filament_protocol::{
    Observer, Request, Schema, SchemaIssues, SchemaMap, ServerMessage,
    Unsubscribable, encode_frame, resource_with_params, validate_params,
};
use serde_json::Value;
use tokio::sync::{Mutex, mpsc};

use crate::router::{HandlerArgs, Router};
use crate::{ClientId, FrameSink, FrameSource, TransportError};

/// One client's live subscription, keyed in the registry by the request
/// id that established it.
struct ActiveSubscription {
    /// Resolved resource key, composite with the request payload when one
    /// was supplied. Two subscriptions with the same key are the same
    /// logical stream, and only one may be active per connection.
    key: String,
    handle: Box<dyn Unsubscribable>,
}

/// One connection's record: where it came from and what it watches.
struct ConnectionState {
    remote_addr: Option<SocketAddr>,
    subscriptions: HashMap<u64, ActiveSubscription>,
}

/// Routes inbound frames to handlers and queues the replies.
///
/// One dispatcher serves every connection of a server; per-connection
/// state lives in an internal registry keyed by [`ClientId`].
pub struct Dispatcher {
    router: Router,
    schemas: SchemaMap,
    connections: Mutex<HashMap<ClientId, ConnectionState>>,
}

impl Dispatcher {
    pub fn new(router: Router, schemas: SchemaMap) -> Self {
        Self {
            router,
            schemas,
            connections: Mutex::new(HashMap::new()),
        }
    }

    /// Registers a connection and spawns a task serving it, returning the
    /// assigned [`ClientId`] so the caller can attribute later activity
    /// (and query [`remote_addr`](Self::remote_addr)) to it.
    pub async fn add_connection<Si, So>(
        self: Arc<Self>,
        sink: Si,
        source: So,
        remote_addr: Option<SocketAddr>,
    ) -> ClientId
    where
        Si: FrameSink,
        So: FrameSource,
    {
        let client_id = self.register(remote_addr).await;
        tokio::spawn(async move {
            if let Err(e) = self.serve(client_id, sink, source).await {
                tracing::debug!(%client_id, error = %e, "connection ended with error");
            }
        });
        client_id
    }

    /// Serves one connection inline until it closes or fails. Like
    /// [`add_connection`](Self::add_connection) but without spawning;
    /// embedders that run their own accept loop use this.
    pub async fn serve_connection<Si, So>(
        &self,
        sink: Si,
        source: So,
    ) -> Result<(), TransportError>
    where
        Si: FrameSink,
        So: FrameSource,
    {
        let client_id = self.register(None).await;
        self.serve(client_id, sink, source).await
    }

    /// Returns the remote address the connection was registered with,
    /// `None` once it has closed (or if none was recorded).
    pub async fn remote_addr(&self, client_id: ClientId) -> Option<SocketAddr> {
        self.connections
            .lock()
            .await
            .get(&client_id)
            .and_then(|state| state.remote_addr)
    }

    async fn register(&self, remote_addr: Option<SocketAddr>) -> ClientId {
        let client_id = ClientId::next();
        self.connections.lock().await.insert(
            client_id,
            ConnectionState {
                remote_addr,
                subscriptions: HashMap::new(),
            },
        );
        tracing::debug!(%client_id, ?remote_addr, "connection registered");
        client_id
    }

    /// The per-connection loop: alternates between reading inbound frames
    /// (dispatched in arrival order) and draining the outbound queue into
    /// the sink. A receive error is terminal: the socket is unusable at
    /// that point, so it is logged and the loop exits through the same
    /// teardown as a clean close. On exit every live subscription is torn
    /// down, so a subscription can never outlive its connection.
    async fn serve<Si, So>(
        &self,
        client_id: ClientId,
        mut sink: Si,
        mut source: So,
    ) -> Result<(), TransportError>
    where
        Si: FrameSink,
        So: FrameSource,
    {
        let (outbound, mut queued) = mpsc::unbounded_channel::<String>();

        let result = loop {
            tokio::select! {
                inbound = source.recv() => match inbound {
                    Ok(Some(frame)) => {
                        self.dispatch(client_id, &frame, &outbound).await;
                    }
                    Ok(None) => {
                        tracing::debug!(%client_id, "connection closed");
                        break Ok(());
                    }
                    Err(e) => {
                        tracing::debug!(%client_id, error = %e, "recv error");
                        break Err(e);
                    }
                },
                // `outbound` is alive in this scope, so recv() never
                // yields None here.
                Some(frame) = queued.recv() => {
                    if let Err(e) = sink.send(frame).await {
                        tracing::debug!(%client_id, error = %e, "send error");
                        break Err(e);
                    }
                }
            }
        };

        // Drain anything queued before the close won the race.
        while let Ok(frame) = queued.try_recv() {
            if sink.send(frame).await.is_err() {
                break;
            }
        }
        let _ = sink.close().await;

        if let Some(state) = self.connections.lock().await.remove(&client_id) {
            for (_, sub) in state.subscriptions {
                sub.handle.unsubscribe();
            }
        }
        tracing::debug!(%client_id, "connection removed");

        result
    }

    /// Dispatches one inbound frame, queueing whatever it produces.
    async fn dispatch(
        &self,
        client_id: ClientId,
        frame: &str,
        outbound: &mpsc::UnboundedSender<String>,
    ) {
        let raw: Value = match serde_json::from_str(frame) {
            Ok(raw) => raw,
            Err(e) => {
                tracing::warn!(%client_id, error = %e, "malformed frame");
                queue(
                    outbound,
                    &ServerMessage::Reject {
                        error: "malformed frame".to_string(),
                    },
                );
                return;
            }
        };
        if raw.get("id").and_then(Value::as_u64).is_none() {
            tracing::warn!(%client_id, "no id number on message");
            queue(
                outbound,
                &ServerMessage::Reject {
                    error: "no id number on message".to_string(),
                },
            );
            return;
        }
        if !raw.get("resource").is_some_and(Value::is_string) {
            tracing::warn!(%client_id, "no resource string on message");
            queue_reject(outbound, "no resource string on message", &raw);
            return;
        }

        let request: Request = match serde_json::from_value(raw.clone()) {
            Ok(request) => request,
            Err(e) => {
                tracing::warn!(%client_id, error = %e, "invalid request");
                queue_reject(outbound, "Invalid request type", &raw);
                return;
            }
        };

        let pattern = request.resource().to_string();
        let Some(handlers) = self.router.resource(&pattern).cloned() else {
            queue_reject(outbound, "resource not found", &raw);
            return;
        };
        let Some(schemas) = self.schemas.get(&pattern).cloned() else {
            queue_reject(outbound, "resource not found", &raw);
            return;
        };
        if !validate_params(&pattern, request.params()) {
            queue_reject(outbound, "invalid params", &raw);
            return;
        }
        let resolved = resource_with_params(&pattern, request.params());

        match request {
            Request::GetRequest {
                id, params, data, ..
            } => {
                let Some(handler) = handlers.get else {
                    queue_reject(outbound, "resource not found", &raw);
                    return;
                };
                let data = match validate_payload(&schemas.request, data) {
                    Ok(data) => data,
                    Err(issues) => {
                        tracing::warn!(%client_id, resource = %pattern, %issues, "invalid get payload");
                        queue_reject(outbound, "invalid request", &raw);
                        return;
                    }
                };
                let args = HandlerArgs {
                    client_id,
                    resource: pattern.clone(),
                    params,
                    resource_with_params: resolved,
                    data,
                };
                match handler(args).await {
                    Ok(result) => match schemas.response.validate(&result) {
                        Ok(data) => queue(
                            outbound,
                            &ServerMessage::GetResponse {
                                id,
                                resource: pattern,
                                data,
                            },
                        ),
                        Err(issues) => {
                            tracing::error!(%client_id, resource = %pattern, %issues, "get result failed validation");
                        }
                    },
                    Err(e) => {
                        tracing::error!(%client_id, resource = %pattern, error = %e, "get handler failed");
                        queue_reject(outbound, "500", &raw);
                    }
                }
            }

            Request::SetRequest {
                id, params, data, ..
            } => {
                let Some(handler) = handlers.set else {
                    queue_reject(outbound, "resource not found", &raw);
                    return;
                };
                let data = match validate_payload(&schemas.request, Some(data))
                {
                    Ok(data) => data,
                    Err(issues) => {
                        tracing::warn!(%client_id, resource = %pattern, %issues, "invalid set payload");
                        queue_reject(outbound, "invalid request", &raw);
                        return;
                    }
                };
                let args = HandlerArgs {
                    client_id,
                    resource: pattern.clone(),
                    params,
                    resource_with_params: resolved,
                    data,
                };
                match handler(args).await {
                    Ok(result) => match schemas.response.validate(&result) {
                        Ok(data) => queue(
                            outbound,
                            &ServerMessage::SetSuccess {
                                id,
                                resource: pattern,
                                data,
                            },
                        ),
                        Err(issues) => {
                            tracing::error!(%client_id, resource = %pattern, %issues, "set result failed validation");
                        }
                    },
                    Err(e) => {
                        tracing::error!(%client_id, resource = %pattern, error = %e, "set handler failed");
                        queue_reject(outbound, "500", &raw);
                    }
                }
            }

            Request::SubscribeRequest {
                id, params, data, ..
            } => {
                let Some(handler) = handlers.subscribe else {
                    queue_reject(outbound, "resource not found", &raw);
                    return;
                };
                let data = match validate_payload(&schemas.request, data) {
                    Ok(data) => data,
                    Err(issues) => {
                        tracing::warn!(%client_id, resource = %pattern, %issues, "invalid subscribe payload");
                        queue_reject(outbound, "invalid request", &raw);
                        return;
                    }
                };
                let key = match &data {
                    Some(data) => format!("{resolved}?{data}"),
                    None => resolved.clone(),
                };

                // Frames of one connection are dispatched serially, so
                // this check/insert pair cannot race with itself.
                {
                    let connections = self.connections.lock().await;
                    if let Some(state) = connections.get(&client_id) {
                        let duplicate = state.subscriptions.contains_key(&id)
                            || state
                                .subscriptions
                                .values()
                                .any(|sub| sub.key == key);
                        if duplicate {
                            queue_reject(outbound, "Already subscribed", &raw);
                            return;
                        }
                    }
                }

                let args = HandlerArgs {
                    client_id,
                    resource: pattern.clone(),
                    params,
                    resource_with_params: resolved,
                    data,
                };
                let source = match handler(args) {
                    Ok(source) => source,
                    Err(e) => {
                        tracing::error!(%client_id, resource = %pattern, error = %e, "subscribe handler failed");
                        queue_reject(outbound, "500", &raw);
                        return;
                    }
                };

                // Accept is queued before the observer attaches, so it can
                // never trail the first event.
                queue(
                    outbound,
                    &ServerMessage::SubscribeAccept {
                        id,
                        resource: pattern.clone(),
                    },
                );

                let observer = {
                    let outbound = outbound.clone();
                    let response = Arc::clone(&schemas.response);
                    let resource = pattern.clone();
                    Observer::new().on_next(move |value: Value| {
                        match response.validate(&value) {
                            Ok(data) => queue(
                                &outbound,
                                &ServerMessage::SubscribeEvent {
                                    id,
                                    resource: resource.clone(),
                                    data,
                                },
                            ),
                            Err(issues) => {
                                tracing::error!(resource = %resource, %issues, "subscription event failed validation");
                            }
                        }
                    })
                };
                let handle = source.subscribe(observer);

                let mut connections = self.connections.lock().await;
                match connections.get_mut(&client_id) {
                    Some(state) => {
                        state
                            .subscriptions
                            .insert(id, ActiveSubscription { key, handle });
                    }
                    // Connection vanished between dispatch and
                    // registration; release immediately.
                    None => handle.unsubscribe(),
                }
            }

            Request::UnsubscribeRequest { id, .. } => {
                let removed = self
                    .connections
                    .lock()
                    .await
                    .get_mut(&client_id)
                    .and_then(|state| state.subscriptions.remove(&id));
                match removed {
                    Some(sub) => {
                        sub.handle.unsubscribe();
                        queue(
                            outbound,
                            &ServerMessage::UnsubscribeAccept {
                                id,
                                resource: pattern,
                            },
                        );
                    }
                    None => queue_reject(outbound, "Not subscribed", &raw),
                }
            }
        }
    }
}

/// Runs an optional payload through the resource's request schema.
///
/// A missing schema or a missing payload both pass through; only a
/// declared schema rejecting a present payload fails.
fn validate_payload(
    schema: &Option<Arc<dyn Schema>>,
    data: Option<Value>,
) -> Result<Option<Value>, SchemaIssues> {
    match (schema, data) {
        (Some(schema), Some(data)) => schema.validate(&data).map(Some),
        (_, data) => Ok(data),
    }
}

fn queue(outbound: &mpsc::UnboundedSender<String>, message: &ServerMessage) {
    match encode_frame(message) {
        // A send error means the connection task already exited; the
        // frame has nowhere to go.
        Ok(frame) => {
            let _ = outbound.send(frame);
        }
        Err(e) => {
            tracing::error!(error = %e, "failed to encode outbound frame");
        }
    }
}

fn queue_reject(
    outbound: &mpsc::UnboundedSender<String>,
    error: &str,
    request: &Value,
) {
    queue(
        outbound,
        &ServerMessage::RequestReject {
            error: error.to_string(),
            request: request.clone(),
        },
    );
}
