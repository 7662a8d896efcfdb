//! `tools` and `call` subcommands

use tokio_util::sync::CancellationToken;

use crate::commands::{print_tool_result, print_tools_table};
use crate::error::Result;
use crate::mcp::InvocationDispatcher;

/// List the tools of `server`, connecting first if needed.
pub async fn list_tools(
    dispatcher: &InvocationDispatcher,
    server: &str,
    cancel: &CancellationToken,
) -> Result<()> {
    let tools = dispatcher.list_tools(server, cancel).await?;
    print_tools_table(server, &tools);
    Ok(())
}

/// Call `tool` on `server` and print its content blocks.
pub async fn call_tool(
    dispatcher: &InvocationDispatcher,
    server: &str,
    tool: &str,
    params: Option<serde_json::Value>,
    cancel: &CancellationToken,
) -> Result<()> {
    tracing::debug!(server = %server, tool = %tool, params = ?params, "Calling tool");
    let response = dispatcher.call_tool(server, tool, params, cancel).await?;
    print_tool_result(&response);
    Ok(())
}
