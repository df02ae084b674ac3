//! Error taxonomy for client operations.
//!
//! Transport- and framing-level failures ([`ClientError::Spawn`],
//! [`ClientError::Malformed`], [`ClientError::ConnectionClosed`]) terminate
//! the session. Tool-level failures ([`ClientError::UnknownTool`],
//! [`ClientError::ToolInvocation`]) are ordinary results the caller may
//! recover from. The client never retries on its own.

use crate::session::SessionState;
use std::time::Duration;
use tether_proto::MalformedMessage;
use thiserror::Error;

/// Errors from talking to a stdio tool server.
#[derive(Debug, Error)]
pub enum ClientError {
    #[error("failed to spawn '{command}': {source}")]
    Spawn {
        command: String,
        #[source]
        source: std::io::Error,
    },

    #[error("malformed frame from peer: {0}")]
    Malformed(#[from] MalformedMessage),

    #[error("connection closed")]
    ConnectionClosed,

    #[error("handshake failed: {message}")]
    Handshake { message: String },

    #[error("{operation} is not legal while the session is {state}")]
    InvalidState {
        operation: &'static str,
        state: SessionState,
    },

    #[error("no such tool: {name}")]
    UnknownTool { name: String },

    #[error("tool call failed (code {code}): {message}")]
    ToolInvocation { code: i64, message: String },

    #[error("peer error for '{method}' (code {code}): {message}")]
    Rpc {
        method: String,
        code: i64,
        message: String,
    },

    #[error("'{method}' timed out after {}ms", elapsed.as_millis())]
    Timeout { method: String, elapsed: Duration },

    #[error("config error at {path}: {message}")]
    Config { path: String, message: String },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}
