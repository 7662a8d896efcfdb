//! MCP (Model Context Protocol) connection and invocation management
//!
//! The implementation targets protocol revision **2025-11-25** with
//! **2025-03-26** as a backwards-compatibility fallback.
//!
//! # Module Layout
//!
//! - `types`      -- JSON-RPC primitives and the MCP tool types
//! - `client`     -- Transport-agnostic async JSON-RPC 2.0 client
//! - `protocol`   -- Typed MCP lifecycle wrapper over `JsonRpcClient`
//! - `transport`  -- `Transport` trait, stdio implementation, transport factory
//! - `session`    -- `Session` / `Connector` seams and the stdio connector
//! - `config`     -- Server descriptors and retry settings
//! - `retry`      -- Exponential backoff with cancellation
//! - `manager`    -- Connection table and connect/disconnect lifecycle
//! - `dispatcher` -- Tool listing and invocation with unknown-tool suggestions
//! - `metrics`    -- Connection and call counters

pub mod client;
pub mod config;
pub mod dispatcher;
pub mod manager;
pub mod metrics;
pub mod protocol;
pub mod retry;
pub mod session;
pub mod transport;
pub mod types;

pub use config::{RetryConfig, ServerDescriptor, TransportKind};
pub use dispatcher::{suggest_tools, InvocationDispatcher};
pub use manager::{Connection, ConnectionManager, ConnectionState, ServerStatus};
pub use retry::RetryPolicy;
pub use session::{Connector, Session, StdioConnector};
pub use types::{CallToolResponse, McpTool, ToolResponseContent};
