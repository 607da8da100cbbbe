//! # filament
//!
//! Minimal resource RPC over a single persistent WebSocket.
//!
//! Resources are URL-like patterns (`/posts`, `/posts/:postId`) exposing
//! up to three capabilities — `get`, `set`, and `subscribe` — multiplexed
//! over one connection with numeric correlation ids. The client
//! reconnects with jittered backoff, queues offline calls, and shares
//! subscription streams between observers; the server validates params
//! and payloads before any handler runs.
//!
//! ## Quick start
//!
//! ```rust,no_run
//! use filament::{
//!     Client, ClientConfig, ResourceHandlers, Router, RpcServer,
//! };
//!
//! # async fn run() -> Result<(), filament::FilamentError> {
//! let router = Router::builder()
//!     .resource(
//!         "/greeting",
//!         ResourceHandlers::new()
//!             .on_get(|_args| async move { Ok("hello".into()) }),
//!     )
//!     .build();
//! let mut schemas = filament::SchemaMap::new();
//! schemas.insert(
//!     "/greeting".into(),
//!     filament::ResourceSchemas::new(filament::AnySchema),
//! );
//!
//! let server = RpcServer::builder()
//!     .bind("127.0.0.1:9200")
//!     .build(router, schemas)
//!     .await?;
//! tokio::spawn(server.run());
//!
//! let client =
//!     Client::connect(ClientConfig::new("ws://127.0.0.1:9200")).await?;
//! let greeting = client.get("/greeting", None, None).await?;
//! # Ok(())
//! # }
//! ```

mod error;

pub use error::FilamentError;
pub use filament_client::{
    Callbacks, Client, ClientConfig, ClientError, ConnectionState, Connector,
    QueuePolicy, SocketDuplex, SocketEvent, SubscribeOptions, Subscription,
    WsConnector,
};
pub use filament_protocol::{
    AnySchema, Observer, Params, ProtocolError, Request, ResourceSchemas,
    Schema, SchemaIssues, SchemaMap, ServerMessage, Subscribable,
    UnsubscribeFn, Unsubscribable, decode_frame, encode_frame, param_names,
    resource_with_params, validate_params,
};
pub use filament_server::{
    ClientId, Dispatcher, FrameSink, FrameSource, HandlerArgs, HandlerError,
    ResourceHandlers, Router, RouterBuilder, RpcServer, RpcServerBuilder,
    ServerError, TransportError, WsTransport,
};
