//! Encoding and decoding of wire frames.
//!
//! `decode` is strict: a frame that does not classify cleanly as a request,
//! response, or notification is rejected rather than guessed at, because a
//! bad frame means the stream can no longer be trusted.

use crate::message::{Message, Notification, Request, Response, RpcError};
use serde_json::{Value, json};
use thiserror::Error;

/// A frame that violates the expected message shape.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum MalformedMessage {
    #[error("frame is not valid JSON: {0}")]
    Json(String),

    #[error("frame is not a JSON object")]
    NotAnObject,

    #[error("unsupported jsonrpc version {0}")]
    Version(String),

    #[error("correlation id {0} is not an unsigned integer")]
    InvalidId(String),

    #[error("response {id} carries both result and error")]
    AmbiguousResponse { id: u64 },

    #[error("response {id} carries neither result nor error")]
    EmptyResponse { id: u64 },

    #[error("frame has no method and no result or error")]
    UnknownShape,
}

/// Serialize a message as one compact JSON frame (no trailing newline).
pub fn encode(message: &Message) -> String {
    let value = match message {
        Message::Request(req) => {
            let mut obj = json!({
                "jsonrpc": "2.0",
                "id": req.id,
                "method": req.method,
            });
            if let Some(params) = &req.params {
                obj["params"] = params.clone();
            }
            obj
        }
        Message::Response(resp) => match &resp.result {
            Ok(result) => json!({
                "jsonrpc": "2.0",
                "id": resp.id,
                "result": result,
            }),
            Err(error) => json!({
                "jsonrpc": "2.0",
                "id": resp.id,
                "error": error,
            }),
        },
        Message::Notification(note) => {
            let mut obj = json!({
                "jsonrpc": "2.0",
                "method": note.method,
            });
            if let Some(params) = &note.params {
                obj["params"] = params.clone();
            }
            obj
        }
    };
    value.to_string()
}

/// Parse one frame back into a [`Message`].
pub fn decode(frame: &str) -> Result<Message, MalformedMessage> {
    let value: Value =
        serde_json::from_str(frame).map_err(|e| MalformedMessage::Json(e.to_string()))?;
    let obj = value.as_object().ok_or(MalformedMessage::NotAnObject)?;

    if let Some(version) = obj.get("jsonrpc") {
        if version != "2.0" {
            return Err(MalformedMessage::Version(version.to_string()));
        }
    }

    let id = match obj.get("id") {
        None => None,
        Some(raw) => Some(
            raw.as_u64()
                .ok_or_else(|| MalformedMessage::InvalidId(raw.to_string()))?,
        ),
    };
    let method = obj.get("method").and_then(Value::as_str);
    let params = obj.get("params").cloned();

    match (method, id) {
        (Some(method), Some(id)) => Ok(Message::Request(Request {
            id,
            method: method.to_string(),
            params,
        })),
        (Some(method), None) => Ok(Message::Notification(Notification {
            method: method.to_string(),
            params,
        })),
        (None, Some(id)) => {
            let result = obj.get("result").cloned();
            let error = obj.get("error").cloned();
            let result = match (result, error) {
                (Some(_), Some(_)) => return Err(MalformedMessage::AmbiguousResponse { id }),
                (None, None) => return Err(MalformedMessage::EmptyResponse { id }),
                (Some(result), None) => Ok(result),
                (None, Some(error)) => Err(serde_json::from_value::<RpcError>(error)
                    .map_err(|e| MalformedMessage::Json(e.to_string()))?),
            };
            Ok(Message::Response(Response { id, result }))
        }
        (None, None) => Err(MalformedMessage::UnknownShape),
    }
}
