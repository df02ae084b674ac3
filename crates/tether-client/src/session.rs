//! A session with one tool server: handshake, discovery, invocation.
//!
//! The session is a resource. Acquisition is `spawn` + `initialize`; release
//! is [`Session::close`], which the caller owes on every exit path. If a
//! session is dropped without closing, the subprocess is still reclaimed
//! (the transport kills it on drop), but outstanding calls are only failed
//! promptly by an explicit close.

use crate::config::ServerConfig;
use crate::dispatcher::Dispatcher;
use crate::error::ClientError;
use crate::transport::Transport;
use serde::Deserialize;
use serde_json::{Value, json};
use std::fmt;
use std::sync::{Mutex, OnceLock};
use std::time::Duration;
use tether_proto::{Notification, RpcError};
use tokio::sync::mpsc;

/// Protocol revision sent in the handshake.
const PROTOCOL_VERSION: &str = "2024-11-05";

/// JSON-RPC method-not-found, which some servers use for unknown tools.
const METHOD_NOT_FOUND: i64 = -32601;

/// Where the session is in its lifecycle. Discovery and invocation are only
/// legal in `Ready`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Uninitialized,
    Initializing,
    Ready,
    Closed,
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SessionState::Uninitialized => "uninitialized",
            SessionState::Initializing => "initializing",
            SessionState::Ready => "ready",
            SessionState::Closed => "closed",
        };
        f.write_str(name)
    }
}

/// A tool advertised by the peer. Plain data; copy what you need.
#[derive(Debug, Clone, PartialEq)]
pub struct ToolDescriptor {
    pub name: String,
    pub description: String,
    pub input_schema: Value,
}

/// Peer identity reported in the initialize response.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ServerInfo {
    pub name: String,
    #[serde(default)]
    pub version: String,
}

/// One item of tool output, tagged by `type` on the wire.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum ContentBlock {
    Text {
        text: String,
    },
    Image {
        data: String,
        #[serde(rename = "mimeType")]
        mime_type: String,
    },
}

/// What a tool call produced.
#[derive(Debug, Clone, PartialEq)]
pub struct ToolOutcome {
    pub content: Vec<ContentBlock>,
    /// Machine-readable payload, when the tool reports one.
    pub structured: Option<Value>,
    /// The tool ran and reported failure. Distinct from protocol errors.
    pub is_error: bool,
}

#[derive(Deserialize)]
struct InitializeResult {
    #[serde(rename = "serverInfo")]
    server_info: Option<ServerInfo>,
}

#[derive(Deserialize)]
struct ToolsListResult {
    tools: Vec<ToolEntry>,
}

#[derive(Deserialize)]
struct ToolEntry {
    name: String,
    #[serde(default)]
    description: Option<String>,
    #[serde(default = "default_schema", rename = "inputSchema")]
    input_schema: Value,
}

fn default_schema() -> Value {
    json!({"type": "object", "properties": {}})
}

#[derive(Deserialize)]
struct ToolCallResult {
    #[serde(default)]
    content: Vec<ContentBlock>,
    #[serde(default, rename = "structuredContent")]
    structured_content: Option<Value>,
    #[serde(default, rename = "isError")]
    is_error: bool,
}

/// A live conversation with one spawned tool server.
pub struct Session {
    dispatcher: Dispatcher,
    state: Mutex<SessionState>,
    timeout: Option<Duration>,
    server_info: OnceLock<ServerInfo>,
}

impl Session {
    /// Spawn the server process and wire up the dispatcher. The session
    /// starts `Uninitialized`; call [`Session::initialize`] next.
    pub fn spawn(config: &ServerConfig) -> Result<Self, ClientError> {
        Self::spawn_with(config, None)
    }

    /// Like [`Session::spawn`], forwarding peer notifications to a channel.
    pub fn spawn_with(
        config: &ServerConfig,
        notifications: Option<mpsc::UnboundedSender<Notification>>,
    ) -> Result<Self, ClientError> {
        let (transport, reader) = Transport::spawn(&config.command, &config.args, &config.env)?;
        let dispatcher = Dispatcher::new(transport, reader, notifications);
        Ok(Self {
            dispatcher,
            state: Mutex::new(SessionState::Uninitialized),
            timeout: config.timeout_ms.map(Duration::from_millis),
            server_info: OnceLock::new(),
        })
    }

    pub fn state(&self) -> SessionState {
        *self.state.lock().unwrap()
    }

    /// Peer identity, available once `initialize` has succeeded.
    pub fn server_info(&self) -> Option<&ServerInfo> {
        self.server_info.get()
    }

    /// Perform the handshake. Legal exactly once, from `Uninitialized`.
    ///
    /// On failure the session is `Closed` and the subprocess is reaped; a
    /// session never retries its own handshake.
    pub async fn initialize(&self) -> Result<(), ClientError> {
        {
            let mut state = self.state.lock().unwrap();
            if *state != SessionState::Uninitialized {
                return Err(ClientError::InvalidState {
                    operation: "initialize",
                    state: *state,
                });
            }
            *state = SessionState::Initializing;
        }

        match self.handshake().await {
            Ok(info) => {
                if let Some(info) = info {
                    tracing::debug!(server = %info.name, version = %info.version, "handshake complete");
                    let _ = self.server_info.set(info);
                }
                *self.state.lock().unwrap() = SessionState::Ready;
                Ok(())
            }
            Err(e) => {
                *self.state.lock().unwrap() = SessionState::Closed;
                self.dispatcher.close().await;
                Err(e)
            }
        }
    }

    async fn handshake(&self) -> Result<Option<ServerInfo>, ClientError> {
        let params = json!({
            "protocolVersion": PROTOCOL_VERSION,
            "capabilities": {},
            "clientInfo": {
                "name": "tether",
                "version": env!("CARGO_PKG_VERSION"),
            },
        });

        let outcome = self
            .request("initialize", Some(params))
            .await
            .map_err(|e| ClientError::Handshake {
                message: e.to_string(),
            })?;
        let result = outcome.map_err(|e| ClientError::Handshake {
            message: format!("peer rejected initialize (code {}): {}", e.code, e.message),
        })?;

        let parsed: InitializeResult =
            serde_json::from_value(result).map_err(|e| ClientError::Handshake {
                message: format!("unparseable initialize result: {e}"),
            })?;

        // Acknowledge before issuing any further requests.
        self.dispatcher
            .notify("notifications/initialized", None)
            .await
            .map_err(|e| ClientError::Handshake {
                message: e.to_string(),
            })?;

        Ok(parsed.server_info)
    }

    /// Ask the peer what tools it exposes. Legal only in `Ready`.
    pub async fn list_tools(&self) -> Result<Vec<ToolDescriptor>, ClientError> {
        self.ensure_ready("list_tools")?;

        let outcome = self.request("tools/list", None).await?;
        let result = outcome.map_err(|e| ClientError::Rpc {
            method: "tools/list".to_string(),
            code: e.code,
            message: e.message,
        })?;

        let list: ToolsListResult = serde_json::from_value(result)?;
        Ok(list
            .tools
            .into_iter()
            .map(|t| ToolDescriptor {
                name: t.name,
                description: t.description.unwrap_or_default(),
                input_schema: t.input_schema,
            })
            .collect())
    }

    /// Invoke one tool by name. Legal only in `Ready`.
    ///
    /// `arguments` is a JSON object mapping argument names to values; the
    /// schema is the peer's business. A tool that runs and fails comes back
    /// as an outcome with `is_error` set, not as an `Err`.
    pub async fn call_tool(&self, name: &str, arguments: Value) -> Result<ToolOutcome, ClientError> {
        self.ensure_ready("call_tool")?;

        let params = json!({
            "name": name,
            "arguments": arguments,
        });
        let outcome = self.request("tools/call", Some(params)).await?;
        let result = match outcome {
            Ok(result) => result,
            Err(e) if is_unknown_tool(&e) => {
                return Err(ClientError::UnknownTool {
                    name: name.to_string(),
                });
            }
            Err(e) => {
                return Err(ClientError::ToolInvocation {
                    code: e.code,
                    message: e.message,
                });
            }
        };

        let parsed: ToolCallResult = serde_json::from_value(result)?;
        Ok(ToolOutcome {
            content: parsed.content,
            structured: parsed.structured_content,
            is_error: parsed.is_error,
        })
    }

    /// Close from any state: fail outstanding calls, terminate the
    /// subprocess. Safe to call more than once.
    pub async fn close(&self) {
        {
            let mut state = self.state.lock().unwrap();
            if *state == SessionState::Closed {
                return;
            }
            *state = SessionState::Closed;
        }
        self.dispatcher.close().await;
    }

    /// Issue one request, racing the configured timeout when there is one.
    /// Timeout expiry drops the pending call, which deregisters it.
    async fn request(
        &self,
        method: &str,
        params: Option<Value>,
    ) -> Result<Result<Value, RpcError>, ClientError> {
        let call = self.dispatcher.send(method, params).await?;
        match self.timeout {
            None => call.wait().await,
            Some(limit) => match tokio::time::timeout(limit, call.wait()).await {
                Ok(outcome) => outcome,
                Err(_) => Err(ClientError::Timeout {
                    method: method.to_string(),
                    elapsed: limit,
                }),
            },
        }
    }

    fn ensure_ready(&self, operation: &'static str) -> Result<(), ClientError> {
        let state = *self.state.lock().unwrap();
        if state == SessionState::Ready {
            Ok(())
        } else {
            Err(ClientError::InvalidState { operation, state })
        }
    }
}

/// Servers disagree on how to report a missing tool: some use the JSON-RPC
/// method-not-found code, others an invalid-params error with a "not found"
/// message. Both mean the same thing to a caller.
fn is_unknown_tool(error: &RpcError) -> bool {
    if error.code == METHOD_NOT_FOUND {
        return true;
    }
    let message = error.message.to_lowercase();
    message.contains("unknown tool") || message.contains("not found")
}
