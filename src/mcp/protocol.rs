//! Typed MCP lifecycle wrapper over [`JsonRpcClient`]
//!
//! - [`McpProtocol`] is an uninitialized client; [`McpProtocol::initialize`]
//!   performs the `initialize` / `notifications/initialized` handshake.
//! - [`InitializedMcpProtocol`] is a negotiated session exposing the tool
//!   methods this crate needs.
//!
//! Neither type owns a transport; [`crate::mcp::session`] wires one up.

use std::time::Duration;

use crate::error::{ConductorError, Result};
use crate::mcp::client::JsonRpcClient;
use crate::mcp::types::{
    CallToolParams, CallToolResponse, ClientCapabilities, Implementation, InitializeParams,
    InitializeResponse, ListToolsResponse, McpTool, PaginatedParams, INVALID_PARAMS,
    LATEST_PROTOCOL_VERSION, METHOD_INITIALIZE, METHOD_INITIALIZED, METHOD_TOOLS_CALL,
    METHOD_TOOLS_LIST, SUPPORTED_PROTOCOL_VERSIONS,
};

/// An MCP client that has not yet completed the handshake.
#[derive(Debug)]
pub struct McpProtocol {
    client: JsonRpcClient,
}

impl McpProtocol {
    /// Wrap a channel-wired client whose read loop is already running.
    pub fn new(client: JsonRpcClient) -> Self {
        Self { client }
    }

    /// Perform the MCP handshake.
    ///
    /// Sends `initialize`, checks the negotiated version against
    /// [`SUPPORTED_PROTOCOL_VERSIONS`], then sends `notifications/initialized`.
    ///
    /// # Errors
    ///
    /// Returns [`ConductorError::McpProtocolVersion`] for an unsupported
    /// version, or any error from [`JsonRpcClient::request`].
    pub async fn initialize(
        self,
        client_info: Implementation,
        capabilities: ClientCapabilities,
        timeout: Option<Duration>,
    ) -> Result<InitializedMcpProtocol> {
        let response: InitializeResponse = self
            .client
            .request(
                METHOD_INITIALIZE,
                InitializeParams {
                    protocol_version: LATEST_PROTOCOL_VERSION.to_string(),
                    capabilities,
                    client_info,
                },
                timeout,
            )
            .await?;

        if !SUPPORTED_PROTOCOL_VERSIONS.contains(&response.protocol_version.as_str()) {
            return Err(ConductorError::McpProtocolVersion {
                expected: SUPPORTED_PROTOCOL_VERSIONS
                    .iter()
                    .map(|s| s.to_string())
                    .collect(),
                got: response.protocol_version,
            }
            .into());
        }

        self.client
            .notify(METHOD_INITIALIZED, serde_json::json!({}))?;

        Ok(InitializedMcpProtocol {
            client: self.client,
            initialize_response: response,
        })
    }
}

/// A negotiated MCP session.
#[derive(Debug)]
pub struct InitializedMcpProtocol {
    client: JsonRpcClient,
    initialize_response: InitializeResponse,
}

impl InitializedMcpProtocol {
    /// Build a session from an already negotiated handshake.
    #[cfg(test)]
    pub(crate) fn from_parts(client: JsonRpcClient, initialize_response: InitializeResponse) -> Self {
        Self {
            client,
            initialize_response,
        }
    }

    /// Server identity reported during the handshake.
    pub fn server_info(&self) -> &Implementation {
        &self.initialize_response.server_info
    }

    /// Protocol version negotiated during the handshake.
    pub fn protocol_version(&self) -> &str {
        &self.initialize_response.protocol_version
    }

    /// List every tool, following `nextCursor` until the last page.
    pub async fn list_tools(&self) -> Result<Vec<McpTool>> {
        let mut tools = Vec::new();
        let mut cursor: Option<String> = None;

        loop {
            let resp: ListToolsResponse = self
                .client
                .request(METHOD_TOOLS_LIST, PaginatedParams { cursor }, None)
                .await?;

            tools.extend(resp.tools);

            match resp.next_cursor {
                Some(c) if !c.is_empty() => cursor = Some(c),
                _ => break,
            }
        }

        Ok(tools)
    }

    /// Invoke a tool.
    ///
    /// # Errors
    ///
    /// An `Invalid params` (`-32602`) response, which MCP servers use for
    /// unknown tool names, is reported as [`ConductorError::ToolNotFound`];
    /// other server errors pass through as [`ConductorError::Rpc`].
    pub async fn call_tool(
        &self,
        name: &str,
        arguments: Option<serde_json::Value>,
    ) -> Result<CallToolResponse> {
        let result = self
            .client
            .request(
                METHOD_TOOLS_CALL,
                CallToolParams {
                    name: name.to_string(),
                    arguments,
                },
                None,
            )
            .await;

        result.map_err(|err| match err.downcast::<ConductorError>() {
            Ok(ConductorError::Rpc { code, message }) if code == INVALID_PARAMS => {
                ConductorError::ToolNotFound {
                    name: name.to_string(),
                    message,
                }
                .into()
            }
            Ok(other) => other.into(),
            Err(err) => err,
        })
    }
}
