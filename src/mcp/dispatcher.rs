//! Invocation dispatcher
//!
//! Routes tool listing and tool calls to the right live connection,
//! connecting lazily on first use. A call the server rejects as an unknown
//! tool is re-checked against a fresh tool list and reported as
//! [`ConductorError::UnknownTool`] with near-match suggestions. A transport
//! failure evicts the connection so the next operation reconnects.

use std::future::Future;
use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use crate::error::{ConductorError, Result};
use crate::mcp::manager::ConnectionManager;
use crate::mcp::metrics::{self, CallStatus};
use crate::mcp::types::{CallToolResponse, McpTool};

/// Maximum number of suggestions attached to an unknown-tool error.
pub const MAX_SUGGESTIONS: usize = 3;

/// Front door for tool operations.
///
/// # Examples
///
/// ```no_run
/// use std::sync::Arc;
/// use tokio_util::sync::CancellationToken;
/// use conductor::mcp::dispatcher::InvocationDispatcher;
/// use conductor::mcp::manager::ConnectionManager;
///
/// # async fn demo(manager: Arc<ConnectionManager>) -> anyhow::Result<()> {
/// let dispatcher = InvocationDispatcher::new(manager);
/// let cancel = CancellationToken::new();
/// let result = dispatcher
///     .call_tool("calc", "Add", Some(serde_json::json!({"a": 1, "b": 2})), &cancel)
///     .await?;
/// println!("{}", result.text());
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone)]
pub struct InvocationDispatcher {
    manager: Arc<ConnectionManager>,
}

impl InvocationDispatcher {
    /// Dispatcher over `manager`.
    pub fn new(manager: Arc<ConnectionManager>) -> Self {
        Self { manager }
    }

    /// Underlying connection manager.
    pub fn manager(&self) -> &Arc<ConnectionManager> {
        &self.manager
    }

    /// Tools currently offered by `server`, fetched fresh.
    ///
    /// # Errors
    ///
    /// Connect errors from [`ConnectionManager::connect`], protocol errors,
    /// or [`ConductorError::Cancelled`]. None of them are masked.
    pub async fn list_tools(&self, server: &str, cancel: &CancellationToken) -> Result<Vec<McpTool>> {
        let span = self.manager.span();
        let result = self.fetch_tools(server, cancel).await;
        match &result {
            Ok(tools) => {
                tracing::debug!(parent: span, server = %server, tools = tools.len(), "Listed tools")
            }
            Err(err) => {
                tracing::warn!(parent: span, server = %server, error = %err, "Failed to list tools")
            }
        }
        result
    }

    async fn fetch_tools(&self, server: &str, cancel: &CancellationToken) -> Result<Vec<McpTool>> {
        let conn = self.manager.connection(server, cancel).await?;
        let result = cancellable(cancel, conn.session().list_tools()).await;
        if let Err(err) = &result {
            if is_connection_lost(err) {
                self.manager.evict(&conn, err).await;
            }
        }
        result
    }

    /// Invoke `tool` on `server` with `params`.
    ///
    /// # Errors
    ///
    /// - [`ConductorError::UnknownTool`] when the server does not know
    ///   `tool`. Its suggestions come from a fresh tool list; if that list
    ///   cannot be fetched they are empty. The server's own rejection stays
    ///   in the error chain.
    /// - Anything else (connect, transport, server errors,
    ///   [`ConductorError::Cancelled`]) passes through unchanged.
    pub async fn call_tool(
        &self,
        server: &str,
        tool: &str,
        params: Option<serde_json::Value>,
        cancel: &CancellationToken,
    ) -> Result<CallToolResponse> {
        let span = self.manager.span();
        let conn = match self.manager.connection(server, cancel).await {
            Ok(conn) => conn,
            Err(err) => {
                tracing::warn!(parent: span, server = %server, tool = %tool, error = %err, "Cannot reach server for tool call");
                metrics::record_tool_call(server, CallStatus::Error);
                return Err(err);
            }
        };

        let err = match cancellable(cancel, conn.session().call_tool(tool, params)).await {
            Ok(response) => {
                tracing::debug!(
                    parent: span,
                    server = %server,
                    tool = %tool,
                    is_error = response.is_error(),
                    blocks = response.content.len(),
                    "Tool call completed"
                );
                metrics::record_tool_call(server, CallStatus::Ok);
                return Ok(response);
            }
            Err(err) => err,
        };

        if is_connection_lost(&err) {
            self.manager.evict(&conn, &err).await;
        }

        if !matches!(
            ConductorError::find(&err),
            Some(ConductorError::ToolNotFound { .. })
        ) {
            tracing::warn!(parent: span, server = %server, tool = %tool, error = %err, "Tool call failed");
            metrics::record_tool_call(server, CallStatus::Error);
            return Err(err);
        }

        let suggestions = match cancellable(cancel, conn.session().list_tools()).await {
            Ok(tools) => {
                if tools.iter().any(|t| t.name == tool) {
                    // The tool exists; the rejection was about its arguments.
                    tracing::warn!(parent: span, server = %server, tool = %tool, error = %err, "Tool call rejected");
                    metrics::record_tool_call(server, CallStatus::Error);
                    return Err(err);
                }
                suggest_tools(tool, tools.iter().map(|t| t.name.as_str()))
            }
            Err(list_err) => {
                if is_connection_lost(&list_err) {
                    self.manager.evict(&conn, &list_err).await;
                }
                tracing::warn!(
                    parent: span,
                    server = %server,
                    error = %list_err,
                    "Could not fetch tools for suggestions"
                );
                Vec::new()
            }
        };

        tracing::warn!(
            parent: span,
            server = %server,
            tool = %tool,
            suggestions = ?suggestions,
            "Unknown tool"
        );
        metrics::record_tool_call(server, CallStatus::UnknownTool);
        Err(err.context(ConductorError::UnknownTool {
            server: server.to_string(),
            name: tool.to_string(),
            suggestions,
        }))
    }
}

/// Whether `err` means the session's transport is gone.
fn is_connection_lost(err: &anyhow::Error) -> bool {
    matches!(
        ConductorError::find(err),
        Some(ConductorError::McpTransport(_))
    )
}

async fn cancellable<T>(
    cancel: &CancellationToken,
    fut: impl Future<Output = Result<T>>,
) -> Result<T> {
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(ConductorError::Cancelled.into()),
        result = fut => result,
    }
}

/// Rank `candidates` by similarity to `name`, case-insensitively.
///
/// In priority order: an exact case-insensitive match, then up to
/// [`MAX_SUGGESTIONS`] names starting with `name`, then names containing it.
/// At most [`MAX_SUGGESTIONS`] results, de-duplicated, in candidate order
/// within each tier. `name` itself is never suggested.
///
/// # Examples
///
/// ```
/// use conductor::mcp::dispatcher::suggest_tools;
///
/// let tools = ["Add", "Subtract", "AddMany"];
/// assert_eq!(suggest_tools("add", tools), vec!["Add", "AddMany"]);
/// ```
pub fn suggest_tools<'a>(name: &str, candidates: impl IntoIterator<Item = &'a str>) -> Vec<String> {
    let needle = name.to_lowercase();
    let candidates: Vec<(&str, String)> = candidates
        .into_iter()
        .filter(|c| *c != name)
        .map(|c| (c, c.to_lowercase()))
        .collect();

    fn push(out: &mut Vec<String>, candidate: &str) {
        if out.len() < MAX_SUGGESTIONS && !out.iter().any(|o| o == candidate) {
            out.push(candidate.to_string());
        }
    }

    let mut out: Vec<String> = Vec::new();

    for (candidate, lower) in &candidates {
        if *lower == needle {
            push(&mut out, candidate);
        }
    }

    let mut prefixed = 0;
    for (candidate, lower) in &candidates {
        if prefixed == MAX_SUGGESTIONS {
            break;
        }
        if lower.starts_with(&needle) {
            push(&mut out, candidate);
            prefixed += 1;
        }
    }

    for (candidate, lower) in &candidates {
        if lower.contains(&needle) {
            push(&mut out, candidate);
        }
    }

    out
}
