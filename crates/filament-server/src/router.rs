//! The resource table: patterns mapped to their handlers.
//!
//! A router is built once, up front, with an explicit builder — every
//! pattern and every capability is visible at construction time, and the
//! built table is immutable while the server runs.
//!
//! Each pattern may expose up to three capabilities:
//!
//! - `get` — read the current value
//! - `set` — write a value (the handler returns the new state)
//! - `subscribe` — hand back a [`Subscribable`] the dispatcher attaches
//!   an observer to, pushing every emitted value to the client
//!
//! Requests against a capability the pattern does not declare are rejected
//! the same way as requests against an unknown pattern.

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use filament_protocol::{Params, Subscribable};
use serde_json::Value;

use crate::ClientId;

/// What a `get`/`set` handler resolves to.
pub type HandlerFuture =
    Pin<Box<dyn Future<Output = Result<Value, HandlerError>> + Send>>;

type CallHandler = Arc<dyn Fn(HandlerArgs) -> HandlerFuture + Send + Sync>;
type SubscribeHandler = Arc<
    dyn Fn(HandlerArgs) -> Result<Box<dyn Subscribable<Value>>, HandlerError>
        + Send
        + Sync,
>;

/// A handler failure.
///
/// The message is logged server-side; the client only ever sees the
/// opaque `"500"` reject, so handlers can put diagnostics here without
/// leaking internals over the wire.
#[derive(Debug, thiserror::Error)]
#[error("{0}")]
pub struct HandlerError(String);

impl HandlerError {
    pub fn new(message: impl Into<String>) -> Self {
        Self(message.into())
    }
}

impl From<&str> for HandlerError {
    fn from(message: &str) -> Self {
        Self(message.to_string())
    }
}

impl From<String> for HandlerError {
    fn from(message: String) -> Self {
        Self(message)
    }
}

/// Everything a handler learns about the request it is serving.
#[derive(Debug, Clone)]
pub struct HandlerArgs {
    /// The connection the request arrived on.
    pub client_id: ClientId,
    /// The resource pattern as registered, e.g. `/posts/:postId`.
    pub resource: String,
    /// The request's param values, if the pattern has any.
    pub params: Option<Params>,
    /// The resolved resource key: every `:name` substituted. Equals
    /// `resource` for patterns without params.
    pub resource_with_params: String,
    /// The request payload, already validated against the pattern's
    /// request schema when one is declared.
    pub data: Option<Value>,
}

/// The handlers one pattern declares. All three capabilities are optional.
#[derive(Clone, Default)]
pub struct ResourceHandlers {
    pub(crate) get: Option<CallHandler>,
    pub(crate) set: Option<CallHandler>,
    pub(crate) subscribe: Option<SubscribeHandler>,
}

impl ResourceHandlers {
    pub fn new() -> Self {
        Self::default()
    }

    /// Declares the `get` capability.
    pub fn on_get<F, Fut>(mut self, handler: F) -> Self
    where
        F: Fn(HandlerArgs) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Value, HandlerError>> + Send + 'static,
    {
        self.get = Some(Arc::new(move |args| Box::pin(handler(args))));
        self
    }

    /// Declares the `set` capability. The handler's return value is the
    /// new state of the resource and is echoed to the caller.
    pub fn on_set<F, Fut>(mut self, handler: F) -> Self
    where
        F: Fn(HandlerArgs) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Value, HandlerError>> + Send + 'static,
    {
        self.set = Some(Arc::new(move |args| Box::pin(handler(args))));
        self
    }

    /// Declares the `subscribe` capability.
    ///
    /// Attaching an observer is registration, not I/O, so this handler is
    /// synchronous.
    pub fn on_subscribe<F>(mut self, handler: F) -> Self
    where
        F: Fn(HandlerArgs) -> Result<Box<dyn Subscribable<Value>>, HandlerError>
            + Send
            + Sync
            + 'static,
    {
        self.subscribe = Some(Arc::new(handler));
        self
    }
}

/// Immutable pattern → handlers table.
#[derive(Clone, Default)]
pub struct Router {
    resources: HashMap<String, ResourceHandlers>,
}

impl Router {
    /// Creates a new builder.
    pub fn builder() -> RouterBuilder {
        RouterBuilder::new()
    }

    /// Looks up the handlers registered for a pattern.
    pub fn resource(&self, pattern: &str) -> Option<&ResourceHandlers> {
        self.resources.get(pattern)
    }
}

/// Builder for a [`Router`].
///
/// # Example
///
/// ```rust,ignore
/// let router = Router::builder()
///     .resource(
///         "/posts/:postId",
///         ResourceHandlers::new()
///             .on_get(|args| async move { store.read(&args.resource_with_params) }),
///     )
///     .build();
/// ```
#[derive(Default)]
pub struct RouterBuilder {
    resources: HashMap<String, ResourceHandlers>,
}

impl RouterBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a pattern with its handlers. Registering the same
    /// pattern twice replaces the earlier entry.
    pub fn resource(
        mut self,
        pattern: impl Into<String>,
        handlers: ResourceHandlers,
    ) -> Self {
        self.resources.insert(pattern.into(), handlers);
        self
    }

    pub fn build(self) -> Router {
        Router {
            resources: self.resources,
        }
    }
}
