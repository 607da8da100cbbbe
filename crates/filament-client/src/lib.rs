//! Client side of filament: a reconnecting WebSocket connection and the
//! multiplexer that correlates every request with its response over it.
//!
//! # Architecture
//!
//! One actor task per [`Client`] owns all mutable state — the link, the
//! id counter, the pending-call table, the subscription cache, and the
//! offline queue. Public methods are thin command senders; see
//! [`client`](self) internals for the generation-counter discipline that
//! keeps stale socket events from touching fresh state.
//!
//! # Example
//!
//! ```rust,ignore
//! use filament_client::{Client, ClientConfig, SubscribeOptions};
//! use filament_protocol::Observer;
//!
//! let client = Client::connect(ClientConfig::new("ws://localhost:9200")).await?;
//! let posts = client.get("/posts", None, None).await?;
//!
//! let sub = client.subscribe(SubscribeOptions::new("/posts"));
//! let handle = sub.subscribe(Observer::new().on_next(|posts| {
//!     println!("posts changed: {posts}");
//! }));
//! ```

mod client;
mod config;
mod error;
mod socket;
mod subscription;

pub use client::Client;
pub use config::{Callbacks, ClientConfig, ConnectionState, QueuePolicy};
pub use error::ClientError;
pub use socket::{Connector, SocketDuplex, SocketEvent, WsConnector};
pub use subscription::{SubscribeOptions, Subscription};
