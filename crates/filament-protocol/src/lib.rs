//! Wire protocol for filament.
//!
//! This crate defines the "language" that clients and servers speak:
//!
//! - **Messages** ([`Request`], [`ServerMessage`]) — the envelopes that
//!   travel on the wire as JSON text frames, correlated by numeric ids.
//! - **Resources** ([`param_names`], [`resource_with_params`],
//!   [`validate_params`]) — URL-like patterns with `:name` segments and
//!   their resolved keys.
//! - **Schemas** ([`Schema`], [`ResourceSchemas`]) — the synchronous
//!   validation contract the dispatcher consumes.
//! - **Observers** ([`Observer`], [`Subscribable`], [`Unsubscribable`]) —
//!   the subscription surface shared by both endpoints.
//!
//! # Architecture
//!
//! The protocol layer sits below both endpoints. It knows nothing about
//! sockets, routers, or caches — only envelope shapes and the rules that
//! make them correlate:
//!
//! ```text
//! client multiplexer ──┐                  ┌── server dispatcher
//!                      ├── this crate ────┤
//! connection manager ──┘                  └── router
//! ```

mod error;
mod message;
mod observer;
mod resource;
mod schema;

pub use error::ProtocolError;
pub use message::{Params, Request, ServerMessage, decode_frame, encode_frame};
pub use observer::{Observer, Subscribable, UnsubscribeFn, Unsubscribable};
pub use resource::{param_names, resource_with_params, validate_params};
pub use schema::{AnySchema, ResourceSchemas, Schema, SchemaIssues, SchemaMap};
