//! tether — talk to a stdio tool server from the command line.

use std::path::PathBuf;

use anyhow::{Context, Result, anyhow, bail};
use clap::{Parser, Subcommand};
use tether_client::{ClientConfig, ContentBlock, ServerConfig, Session, ToolOutcome};

#[derive(Parser)]
#[command(name = "tether", version, about = "Invoke tools on stdio tool servers")]
struct Cli {
    /// Path to the config file
    #[arg(long, default_value = "tether.toml")]
    config: PathBuf,

    /// Enable verbose/debug logging
    #[arg(long)]
    verbose: bool,

    #[command(subcommand)]
    command: Cmd,
}

#[derive(Subcommand)]
enum Cmd {
    /// List the tools a configured server exposes
    Tools {
        /// Server name from the config file
        server: String,
    },
    /// Call a tool on a configured server and print its output
    Call {
        /// Server name from the config file
        server: String,
        /// Tool name as reported by `tether tools`
        tool: String,
        /// Tool arguments as a JSON object
        #[arg(long, default_value = "{}")]
        args: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let log_level = if cli.verbose { "debug" } else { "warn" };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(log_level)),
        )
        .with_writer(std::io::stderr)
        .init();

    let config = ClientConfig::load(&cli.config)
        .with_context(|| format!("failed to load {}", cli.config.display()))?;

    match cli.command {
        Cmd::Tools { server } => {
            let session = open_session(&config, &server)?;
            let result = list_tools(&session).await;
            session.close().await;
            for tool in result? {
                if tool.description.is_empty() {
                    println!("{}", tool.name);
                } else {
                    println!("{}  {}", tool.name, tool.description);
                }
            }
        }
        Cmd::Call { server, tool, args } => {
            let arguments: serde_json::Value =
                serde_json::from_str(&args).context("--args is not valid JSON")?;
            if !arguments.is_object() {
                bail!("--args must be a JSON object");
            }

            let session = open_session(&config, &server)?;
            let result = call_tool(&session, &tool, arguments).await;
            session.close().await;

            let outcome = result?;
            print_outcome(&outcome);
            if outcome.is_error {
                bail!("tool '{tool}' reported an error");
            }
        }
    }

    Ok(())
}

fn open_session(config: &ClientConfig, server: &str) -> Result<Session> {
    let server_config: &ServerConfig = config.server(server).ok_or_else(|| {
        anyhow!("no server named '{server}' in the config (available: {})", {
            let mut names: Vec<_> = config.servers.keys().cloned().collect();
            names.sort();
            if names.is_empty() {
                "none".to_string()
            } else {
                names.join(", ")
            }
        })
    })?;
    Ok(Session::spawn(server_config)?)
}

async fn list_tools(session: &Session) -> Result<Vec<tether_client::ToolDescriptor>> {
    session.initialize().await?;
    Ok(session.list_tools().await?)
}

async fn call_tool(session: &Session, tool: &str, arguments: serde_json::Value) -> Result<ToolOutcome> {
    session.initialize().await?;
    Ok(session.call_tool(tool, arguments).await?)
}

fn print_outcome(outcome: &ToolOutcome) {
    for block in &outcome.content {
        match block {
            ContentBlock::Text { text } => println!("{text}"),
            ContentBlock::Image { mime_type, data } => {
                println!("[image {mime_type}, {} bytes base64]", data.len());
            }
        }
    }
    if let Some(structured) = &outcome.structured {
        match serde_json::to_string_pretty(structured) {
            Ok(pretty) => println!("{pretty}"),
            Err(_) => println!("{structured}"),
        }
    }
}
