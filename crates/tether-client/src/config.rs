//! TOML configuration for tool servers.

use crate::error::ClientError;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;

/// Top-level client configuration: named servers.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ClientConfig {
    #[serde(default)]
    pub servers: HashMap<String, ServerConfig>,
}

/// How to launch and talk to one tool server.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Executable to run (e.g. "./mcp-nats", "npx").
    pub command: String,
    /// Arguments to pass to the command.
    #[serde(default)]
    pub args: Vec<String>,
    /// Environment variables for the server process. Connection URLs and
    /// credentials for the server's backend travel here, opaque to us.
    #[serde(default)]
    pub env: HashMap<String, String>,
    /// Per-request timeout in milliseconds. Absent means requests wait
    /// until the response arrives or the connection closes.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_ms: Option<u64>,
}

impl ClientConfig {
    /// Read and parse a config file.
    pub fn load(path: &Path) -> Result<Self, ClientError> {
        let text = std::fs::read_to_string(path)?;
        toml::from_str(&text).map_err(|e| ClientError::Config {
            path: path.display().to_string(),
            message: e.to_string(),
        })
    }

    pub fn server(&self, name: &str) -> Option<&ServerConfig> {
        self.servers.get(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_single_server() {
        let toml_str = r#"
[servers.nats]
command = "./mcp-nats"
args = ["--transport", "stdio"]
"#;
        let config: ClientConfig = toml::from_str(toml_str).unwrap();
        assert_eq!(config.servers.len(), 1);
        let nats = config.server("nats").unwrap();
        assert_eq!(nats.command, "./mcp-nats");
        assert_eq!(nats.args, vec!["--transport", "stdio"]);
        assert!(nats.timeout_ms.is_none());
    }

    #[test]
    fn parse_env_vars() {
        let toml_str = r#"
[servers.nats]
command = "./mcp-nats"
args = ["--transport", "stdio"]
env = { NATS_URL = "nats://localhost:4222", NATS_A_CREDS = "base64creds" }
"#;
        let config: ClientConfig = toml::from_str(toml_str).unwrap();
        let nats = config.server("nats").unwrap();
        assert_eq!(nats.env["NATS_URL"], "nats://localhost:4222");
        assert_eq!(nats.env["NATS_A_CREDS"], "base64creds");
    }

    #[test]
    fn parse_timeout() {
        let toml_str = r#"
[servers.slow]
command = "slow-server"
timeout_ms = 60000
"#;
        let config: ClientConfig = toml::from_str(toml_str).unwrap();
        assert_eq!(config.server("slow").unwrap().timeout_ms, Some(60000));
    }

    #[test]
    fn parse_multiple_servers() {
        let toml_str = r#"
[servers.a]
command = "a"

[servers.b]
command = "b"
timeout_ms = 1000
"#;
        let config: ClientConfig = toml::from_str(toml_str).unwrap();
        assert_eq!(config.servers.len(), 2);
    }

    #[test]
    fn default_config_is_empty() {
        let config = ClientConfig::default();
        assert!(config.servers.is_empty());
        assert!(config.server("anything").is_none());
    }
}
