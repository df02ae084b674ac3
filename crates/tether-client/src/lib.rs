//! Client for stdio tool servers.
//!
//! A tool server is a subprocess speaking newline-delimited JSON-RPC 2.0
//! over its stdin/stdout. The client spawns it, performs the initialization
//! handshake, and then supports concurrent, correlated request/response
//! exchanges: tool discovery and tool invocation.
//!
//! Layering, bottom up: [`transport`] owns the subprocess and the framed
//! byte streams; `tether_proto` encodes and decodes messages; [`dispatcher`]
//! correlates responses to requests; [`session`] holds the state machine and
//! the semantic operations.
//!
//! ```no_run
//! use tether_client::{ServerConfig, Session};
//!
//! # async fn example() -> Result<(), tether_client::ClientError> {
//! let config = ServerConfig {
//!     command: "./mcp-nats".to_string(),
//!     args: vec!["--transport".to_string(), "stdio".to_string()],
//!     env: [("NATS_URL".to_string(), "nats://localhost:4222".to_string())].into(),
//!     timeout_ms: None,
//! };
//!
//! let session = Session::spawn(&config)?;
//! session.initialize().await?;
//! let tools = session.list_tools().await?;
//! println!("{} tools", tools.len());
//! let outcome = session
//!     .call_tool("publish", serde_json::json!({
//!         "account_name": "A",
//!         "subject": "test.message",
//!         "body": "Hello from test message!",
//!     }))
//!     .await?;
//! println!("{:?}", outcome.content);
//! session.close().await;
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod dispatcher;
pub mod error;
pub mod session;
pub mod transport;

pub use config::{ClientConfig, ServerConfig};
pub use error::ClientError;
pub use session::{
    ContentBlock, ServerInfo, Session, SessionState, ToolDescriptor, ToolOutcome,
};
pub use tether_proto::{Notification, RpcError};
