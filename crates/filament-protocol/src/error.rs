//! Error types for the protocol layer.

/// Errors that can occur while encoding or decoding frames.
#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    /// Serialization failed (turning an envelope into a JSON frame).
    #[error("encode failed: {0}")]
    Encode(#[source] serde_json::Error),

    /// Deserialization failed: malformed JSON, missing required fields,
    /// or an unknown envelope type.
    #[error("decode failed: {0}")]
    Decode(#[source] serde_json::Error),

    /// The frame parsed but violates a protocol rule — e.g. a request
    /// without a numeric id.
    #[error("invalid message: {0}")]
    InvalidMessage(String),
}
