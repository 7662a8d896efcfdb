//! Conductor - connection and invocation manager for MCP tool servers
//!
//! Conductor keeps a table of named MCP server connections, establishes them
//! on demand with bounded exponential backoff, and routes tool calls to the
//! right server. Calls to tools a server does not offer fail with ranked
//! "did you mean" suggestions.
//!
//! # Architecture
//!
//! - `mcp`: protocol client, transports, connection manager and dispatcher
//! - `config`: configuration loading and validation
//! - `error`: error types and result aliases
//! - `cli` and `commands`: the command-line surface
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use conductor::{Config, ConnectionManager, InvocationDispatcher, StdioConnector};
//! use conductor::mcp::types::Implementation;
//! use tokio_util::sync::CancellationToken;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = Config::load("config/conductor.yaml")?;
//!     config.validate()?;
//!
//!     let connector = StdioConnector::new(Implementation {
//!         name: "conductor".to_string(),
//!         version: "0.1.0".to_string(),
//!         description: None,
//!     });
//!     let manager = ConnectionManager::new(config.servers.clone(), Arc::new(connector));
//!     let dispatcher = InvocationDispatcher::new(Arc::new(manager));
//!
//!     let cancel = CancellationToken::new();
//!     let result = dispatcher
//!         .call_tool("calc", "Add", Some(serde_json::json!({"a": 1, "b": 2})), &cancel)
//!         .await?;
//!     println!("{:?}", result.content);
//!
//!     dispatcher.manager().disconnect_all().await;
//!     Ok(())
//! }
//! ```

pub mod cli;
pub mod commands;
pub mod config;
pub mod error;
pub mod mcp;

// Re-export commonly used types
pub use config::Config;
pub use error::{ConductorError, Result};
pub use mcp::{
    suggest_tools, CallToolResponse, Connection, ConnectionManager, ConnectionState, Connector,
    InvocationDispatcher, McpTool, RetryPolicy, ServerDescriptor, ServerStatus, Session,
    StdioConnector, ToolResponseContent, TransportKind,
};

#[cfg(test)]
pub mod test_utils;
