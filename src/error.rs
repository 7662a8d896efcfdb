//! Error types for Conductor
//!
//! This module defines all error types used throughout the crate, using
//! `thiserror` for ergonomic error handling. Library functions return the
//! [`Result`] alias (backed by `anyhow`); callers that need to branch on a
//! failure kind use `err.downcast_ref::<ConductorError>()`.

use thiserror::Error;

/// Main error type for Conductor operations
///
/// Covers descriptor validation, connection establishment, tool invocation,
/// and the protocol/transport failures passed through from the MCP layer.
#[derive(Error, Debug)]
pub enum ConductorError {
    /// No descriptor exists for the requested server id
    #[error("Unknown server: {0}")]
    UnknownServer(String),

    /// The descriptor exists but is disabled
    #[error("Server is disabled: {0}")]
    ServerDisabled(String),

    /// The descriptor requests a transport that is not implemented
    #[error("Unsupported transport `{transport}` for server {server}")]
    UnsupportedTransport {
        /// Server id
        server: String,
        /// Transport kind named by the descriptor
        transport: String,
    },

    /// The descriptor is missing fields required by its transport kind
    #[error("Invalid descriptor for server {server}: {message}")]
    InvalidDescriptor {
        /// Server id
        server: String,
        /// What is wrong with it
        message: String,
    },

    /// A single connection attempt did not finish within its timeout
    #[error("Connection to server {server} timed out after {timeout_secs}s")]
    ConnectTimeout {
        /// Server id
        server: String,
        /// Per-attempt timeout in seconds
        timeout_secs: u64,
    },

    /// Every connection attempt failed; the source chain holds the last error
    #[error("Failed to connect to server {server} after {attempts} attempt(s)")]
    ConnectExhausted {
        /// Server id
        server: String,
        /// Number of attempts made
        attempts: u32,
    },

    /// The operation was cancelled by the caller
    #[error("Operation cancelled")]
    Cancelled,

    /// The server has no tool with the requested name
    #[error("Unknown tool `{name}` on server {server}{}", format_suggestions(.suggestions))]
    UnknownTool {
        /// Server id
        server: String,
        /// Requested tool name
        name: String,
        /// Similarly named tools, best match first
        suggestions: Vec<String>,
    },

    /// The server rejected a `tools/call` because it does not know the tool
    #[error("Tool not found: {name} ({message})")]
    ToolNotFound {
        /// Requested tool name
        name: String,
        /// Message reported by the server
        message: String,
    },

    /// Transport-level failure (process spawn, closed pipes)
    #[error("MCP transport error: {0}")]
    McpTransport(String),

    /// JSON-RPC error response returned by the server
    #[error("MCP server error {code}: {message}")]
    Rpc {
        /// JSON-RPC error code
        code: i64,
        /// Error message from the server
        message: String,
    },

    /// The server negotiated a protocol version we do not speak
    #[error("MCP protocol version mismatch: expected one of {expected:?}, got {got}")]
    McpProtocolVersion {
        /// Versions this client accepts
        expected: Vec<String>,
        /// Version selected by the server
        got: String,
    },

    /// A request received no response within its deadline
    #[error("MCP request `{method}` timed out")]
    RequestTimeout {
        /// JSON-RPC method name
        method: String,
    },

    /// Configuration-related errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// IO errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization errors
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// YAML parsing errors
    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),
}

fn format_suggestions(suggestions: &[String]) -> String {
    if suggestions.is_empty() {
        "; use `tools` to see available tools".to_string()
    } else {
        format!("; did you mean: {}?", suggestions.join(", "))
    }
}

impl ConductorError {
    /// Find the first `ConductorError` in an error chain.
    ///
    /// `ConnectExhausted` is attached as context on top of the last attempt's
    /// error, so the outermost typed error is what callers usually want.
    pub fn find(err: &anyhow::Error) -> Option<&ConductorError> {
        err.downcast_ref::<ConductorError>()
            .or_else(|| err.chain().find_map(|e| e.downcast_ref::<ConductorError>()))
    }
}

/// Result type alias for Conductor operations
pub type Result<T> = anyhow::Result<T>;
