use filament_protocol::ProtocolError;

/// Errors surfaced by client calls.
#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    /// The connection is not open and the queue policy is
    /// [`Fail`](crate::QueuePolicy::Fail).
    #[error("connection is not open")]
    NotOpen,

    /// The connection closed while the call was in flight.
    #[error("connection closed")]
    ConnectionClosed,

    /// The server rejected the request; the payload is the server's
    /// error string, verbatim.
    #[error("request rejected: {0}")]
    Rejected(String),

    /// The configured request timeout elapsed before a response.
    #[error("request timed out")]
    Timeout,

    /// Establishing the transport failed.
    #[error("connect failed: {0}")]
    Connect(String),

    /// The client has been dropped and its task is gone.
    #[error("client is closed")]
    Closed,

    #[error(transparent)]
    Protocol(#[from] ProtocolError),
}
