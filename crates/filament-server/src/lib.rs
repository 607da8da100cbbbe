//! Server side of filament: resource router, per-connection dispatcher,
//! and the WebSocket listener that serves them.
//!
//! # Layers
//!
//! - [`Router`] — immutable pattern → handlers table, built up front.
//! - [`Dispatcher`] — per-frame pipeline: parse, route, validate params
//!   and payloads, invoke the handler, queue the reply. Owns the
//!   subscription registry, so a subscription never outlives its
//!   connection.
//! - [`RpcServer`] — the accept loop; one task per connection.
//!
//! The dispatcher is transport-agnostic: it serves any [`FrameSink`] /
//! [`FrameSource`] pair, with [`WsTransport`] producing the production
//! WebSocket halves.

#![allow(async_fn_in_trait)]

mod connection;
mod dispatch;
mod error;
mod router;
mod server;

pub use connection::{
    ClientId, FrameSink, FrameSource, WsFrameSink, WsFrameSource, WsTransport,
};
pub use dispatch::Dispatcher;
pub use error::{ServerError, TransportError};
pub use router::{
    HandlerArgs, HandlerError, HandlerFuture, ResourceHandlers, Router,
    RouterBuilder,
};
pub use server::{RpcServer, RpcServerBuilder};
