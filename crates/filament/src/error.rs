//! One error type spanning every filament layer.

use filament_client::ClientError;
use filament_protocol::ProtocolError;
use filament_server::{ServerError, TransportError};

/// Roll-up of the sub-crate error enums.
///
/// Embedders that pull in the meta crate can keep this single type in
/// their `Result`s rather than naming `ProtocolError`, `ServerError`,
/// and friends individually. Every variant is a transparent `#[from]`
/// wrapper, so `?` lifts a sub-crate error without explicit mapping.
#[derive(Debug, thiserror::Error)]
pub enum FilamentError {
    /// A wire-format error (encode, decode, invalid message).
    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    /// A server transport error (bind, accept, send, recv).
    #[error(transparent)]
    Transport(#[from] TransportError),

    /// A server-side error.
    #[error(transparent)]
    Server(#[from] ServerError),

    /// A client-side error (rejects, timeouts, closed connections).
    #[error(transparent)]
    Client(#[from] ClientError),
}
