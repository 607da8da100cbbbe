//! `RpcServer` builder and accept loop.
//!
//! Ties the layers together: WebSocket listener → dispatcher → router.
//! Each accepted connection gets its own task serving it until close.

use std::sync::Arc;

use filament_protocol::SchemaMap;

use crate::connection::WsTransport;
use crate::dispatch::Dispatcher;
use crate::router::Router;
use crate::ServerError;

/// Builder for configuring and starting an RPC server.
///
/// # Example
///
/// ```rust,ignore
/// let server = RpcServer::builder()
///     .bind("0.0.0.0:9200")
///     .build(router, schemas)
///     .await?;
/// server.run().await
/// ```
pub struct RpcServerBuilder {
    bind_addr: String,
}

impl RpcServerBuilder {
    /// Creates a new builder with default settings.
    pub fn new() -> Self {
        Self {
            bind_addr: "127.0.0.1:9200".to_string(),
        }
    }

    /// Sets the address to bind the server to.
    pub fn bind(mut self, addr: &str) -> Self {
        self.bind_addr = addr.to_string();
        self
    }

    /// Binds the listener and builds the server.
    pub async fn build(
        self,
        router: Router,
        schemas: SchemaMap,
    ) -> Result<RpcServer, ServerError> {
        let transport = WsTransport::bind(&self.bind_addr).await?;
        let dispatcher = Arc::new(Dispatcher::new(router, schemas));
        Ok(RpcServer {
            transport,
            dispatcher,
        })
    }
}

impl Default for RpcServerBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// A running RPC server.
///
/// Call [`run()`](Self::run) to start accepting connections.
pub struct RpcServer {
    transport: WsTransport,
    dispatcher: Arc<Dispatcher>,
}

impl RpcServer {
    /// Creates a new builder.
    pub fn builder() -> RpcServerBuilder {
        RpcServerBuilder::new()
    }

    /// Returns the local address the server is bound to.
    pub fn local_addr(&self) -> std::io::Result<std::net::SocketAddr> {
        self.transport.local_addr()
    }

    /// Runs the server accept loop.
    ///
    /// Accepts incoming connections and spawns a serving task for each.
    /// Runs until the process is terminated.
    pub async fn run(mut self) -> Result<(), ServerError> {
        tracing::info!("RPC server running");

        loop {
            match self.transport.accept().await {
                Ok((sink, source, addr)) => {
                    let client_id = Arc::clone(&self.dispatcher)
                        .add_connection(sink, source, Some(addr))
                        .await;
                    tracing::debug!(%client_id, %addr, "connection accepted");
                }
                Err(e) => {
                    tracing::error!(error = %e, "accept failed");
                }
            }
        }
    }
}
