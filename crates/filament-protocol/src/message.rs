//! Core protocol types for filament's wire format.
//!
//! This module defines every envelope that travels on the wire — the
//! structures that get serialized to JSON text frames, sent over the
//! WebSocket, and deserialized on the other side.
//!
//! The correlation scheme is deliberately small: every request carries a
//! numeric `id` chosen by the issuer, unique within the current connection
//! generation, and the server echoes that id on the terminal response (or on
//! every recurring event for subscriptions). Ids restart at 0 whenever a
//! connection is (re-)established; frames from an old generation must never
//! be matched against entries of a new one.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::ProtocolError;

/// Concrete values for the `:name` segments of a resource pattern.
///
/// `BTreeMap` rather than `HashMap` so the serialized form (and anything
/// derived from it, like the client's composite cache keys) is
/// deterministic for a given set of params.
pub type Params = BTreeMap<String, String>;

/// A client → server request envelope.
///
/// `#[serde(tag = "type")]` produces internally tagged JSON, e.g.:
///
/// ```json
/// { "type": "GetRequest", "id": 1, "resource": "/posts/:postId",
///   "params": { "postId": "42" } }
/// ```
///
/// For `UnsubscribeRequest` the `id` is not a fresh id: it references the
/// original subscription's request id, which is how the server finds the
/// registry entry to tear down.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum Request {
    /// Read the current value of a resource.
    GetRequest {
        id: u64,
        resource: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        params: Option<Params>,
        /// Optional request payload (e.g. a query refinement), validated
        /// against the resource's request schema when one is declared.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        data: Option<Value>,
    },

    /// Write a new value. `data` is the payload and is always validated
    /// against the resource's request schema before dispatch.
    SetRequest {
        id: u64,
        resource: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        params: Option<Params>,
        data: Value,
    },

    /// Open a server-push stream of values for a resource.
    SubscribeRequest {
        id: u64,
        resource: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        params: Option<Params>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        data: Option<Value>,
    },

    /// Tear down the subscription whose request id was `id`.
    UnsubscribeRequest {
        id: u64,
        resource: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        params: Option<Params>,
    },
}

impl Request {
    /// The issuer-chosen correlation id.
    pub fn id(&self) -> u64 {
        match self {
            Request::GetRequest { id, .. }
            | Request::SetRequest { id, .. }
            | Request::SubscribeRequest { id, .. }
            | Request::UnsubscribeRequest { id, .. } => *id,
        }
    }

    /// The resource pattern this request targets.
    pub fn resource(&self) -> &str {
        match self {
            Request::GetRequest { resource, .. }
            | Request::SetRequest { resource, .. }
            | Request::SubscribeRequest { resource, .. }
            | Request::UnsubscribeRequest { resource, .. } => resource,
        }
    }

    /// The params map, if any.
    pub fn params(&self) -> Option<&Params> {
        match self {
            Request::GetRequest { params, .. }
            | Request::SetRequest { params, .. }
            | Request::SubscribeRequest { params, .. }
            | Request::UnsubscribeRequest { params, .. } => params.as_ref(),
        }
    }
}

/// A server → client envelope: responses, subscription events, and rejects.
///
/// Two reject variants exist on purpose. `RequestReject` echoes the
/// offending request (as raw JSON, since an unknown `type` cannot be parsed
/// into [`Request`]) so the client can correlate it back to a pending call.
/// `Reject` carries no echo and is reserved for frames that failed to parse
/// or lacked a numeric id — there is nothing meaningful to echo.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ServerMessage {
    /// Terminal response to a `GetRequest`.
    GetResponse {
        id: u64,
        resource: String,
        data: Value,
    },

    /// Terminal response to a `SetRequest`. `data` echoes the handler's
    /// return value — the new state of the resource.
    SetSuccess {
        id: u64,
        resource: String,
        data: Value,
    },

    /// The subscription was established. Always sent before the first
    /// `SubscribeEvent` sharing its id.
    SubscribeAccept { id: u64, resource: String },

    /// One pushed value on an active subscription. Recurs until the
    /// subscription is torn down.
    SubscribeEvent {
        id: u64,
        resource: String,
        data: Value,
    },

    /// Terminal response to an `UnsubscribeRequest`.
    UnsubscribeAccept { id: u64, resource: String },

    /// Negative acknowledgement for an identifiable request.
    RequestReject { error: String, request: Value },

    /// Negative acknowledgement for a frame that could not be parsed or
    /// carried no numeric id.
    Reject { error: String },
}

impl ServerMessage {
    /// The correlation id this message answers, when there is one.
    ///
    /// For `RequestReject` the id lives inside the echoed request frame;
    /// `Reject` has no id at all.
    pub fn correlation_id(&self) -> Option<u64> {
        match self {
            ServerMessage::GetResponse { id, .. }
            | ServerMessage::SetSuccess { id, .. }
            | ServerMessage::SubscribeAccept { id, .. }
            | ServerMessage::SubscribeEvent { id, .. }
            | ServerMessage::UnsubscribeAccept { id, .. } => Some(*id),
            ServerMessage::RequestReject { request, .. } => {
                request.get("id").and_then(Value::as_u64)
            }
            ServerMessage::Reject { .. } => None,
        }
    }
}

/// Serializes an envelope into a JSON text frame.
pub fn encode_frame<T: Serialize>(value: &T) -> Result<String, ProtocolError> {
    serde_json::to_string(value).map_err(ProtocolError::Encode)
}

/// Parses a JSON text frame into an envelope.
pub fn decode_frame<T: for<'de> Deserialize<'de>>(
    frame: &str,
) -> Result<T, ProtocolError> {
    serde_json::from_str(frame).map_err(ProtocolError::Decode)
}
