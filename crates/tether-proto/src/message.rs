//! JSON-RPC 2.0 message types exchanged with a tool server.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// One wire message: exactly one frame on the stream.
#[derive(Debug, Clone, PartialEq)]
pub enum Message {
    Request(Request),
    Response(Response),
    Notification(Notification),
}

/// A request carrying a correlation id. The peer must answer it with a
/// [`Response`] bearing the same id.
#[derive(Debug, Clone, PartialEq)]
pub struct Request {
    pub id: u64,
    pub method: String,
    pub params: Option<Value>,
}

/// The peer's answer to a [`Request`], correlated by id.
#[derive(Debug, Clone, PartialEq)]
pub struct Response {
    pub id: u64,
    /// The peer reports either a result or an error, never both.
    pub result: Result<Value, RpcError>,
}

/// A one-way message. No id, no response expected.
#[derive(Debug, Clone, PartialEq)]
pub struct Notification {
    pub method: String,
    pub params: Option<Value>,
}

/// A JSON-RPC 2.0 error object.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RpcError {
    pub code: i64,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

impl Request {
    pub fn new(id: u64, method: impl Into<String>, params: Option<Value>) -> Self {
        Self {
            id,
            method: method.into(),
            params,
        }
    }
}

impl Notification {
    pub fn new(method: impl Into<String>, params: Option<Value>) -> Self {
        Self {
            method: method.into(),
            params,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_constructor() {
        let req = Request::new(7, "tools/list", None);
        assert_eq!(req.id, 7);
        assert_eq!(req.method, "tools/list");
        assert!(req.params.is_none());
    }

    #[test]
    fn rpc_error_deserializes_without_data() {
        let err: RpcError =
            serde_json::from_str(r#"{"code":-32601,"message":"Method not found"}"#).unwrap();
        assert_eq!(err.code, -32601);
        assert_eq!(err.message, "Method not found");
        assert!(err.data.is_none());
    }

    #[test]
    fn rpc_error_keeps_data() {
        let err: RpcError =
            serde_json::from_str(r#"{"code":-32600,"message":"Invalid","data":"extra"}"#).unwrap();
        assert_eq!(err.data.unwrap(), "extra");
    }
}
