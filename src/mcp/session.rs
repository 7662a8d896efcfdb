//! Live MCP sessions and the connector that establishes them
//!
//! The connection manager only sees two narrow seams:
//!
//! - [`Connector::handshake`] turns an unstarted [`PendingTransport`] into a
//!   negotiated [`Session`].
//! - [`Session`] lists tools, calls tools and closes.
//!
//! [`StdioConnector`] is the production connector. [`McpSession`] wires any
//! [`Transport`] to a [`JsonRpcClient`] through two bridge tasks and a read
//! loop, all stopped by one [`CancellationToken`].

use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::error::Result;
use crate::mcp::client::{start_read_loop, JsonRpcClient};
use crate::mcp::protocol::{InitializedMcpProtocol, McpProtocol};
use crate::mcp::transport::factory::PendingTransport;
use crate::mcp::transport::stdio::StdioTransport;
use crate::mcp::transport::Transport;
use crate::mcp::types::{
    CallToolResponse, ClientCapabilities, Implementation, McpTool, NOTIF_TOOLS_LIST_CHANGED,
};

/// A negotiated session with one server.
#[cfg_attr(test, mockall::automock)]
#[async_trait::async_trait]
pub trait Session: Send + Sync {
    /// Server identity reported during the handshake.
    fn server_info(&self) -> Implementation;

    /// Current tool set, fetched fresh from the server.
    async fn list_tools(&self) -> Result<Vec<McpTool>>;

    /// Invoke `name` with `arguments`.
    ///
    /// An unknown tool is reported as
    /// [`crate::error::ConductorError::ToolNotFound`].
    async fn call_tool(
        &self,
        name: &str,
        arguments: Option<serde_json::Value>,
    ) -> Result<CallToolResponse>;

    /// Release the transport. Safe to call more than once.
    async fn close(&self) -> Result<()>;
}

/// Starts a transport and performs the protocol handshake over it.
#[async_trait::async_trait]
pub trait Connector: Send + Sync {
    /// Start `transport` and negotiate a session, bounding the handshake
    /// request by `timeout`.
    async fn handshake(
        &self,
        transport: PendingTransport,
        timeout: Duration,
    ) -> Result<Box<dyn Session>>;
}

/// [`Session`] over any [`Transport`].
pub struct McpSession {
    protocol: InitializedMcpProtocol,
    transport: Arc<dyn Transport>,
    cancel: CancellationToken,
}

impl std::fmt::Debug for McpSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("McpSession")
            .field("server", &self.protocol.server_info().name)
            .field("protocol_version", &self.protocol.protocol_version())
            .finish_non_exhaustive()
    }
}

impl McpSession {
    /// Bridge `transport` to a JSON-RPC client and run the handshake.
    ///
    /// If the handshake fails, or this future is dropped before it
    /// completes, the bridge tasks stop and the transport is released.
    pub async fn establish(
        transport: Arc<dyn Transport>,
        client_info: Implementation,
        timeout: Duration,
    ) -> Result<Self> {
        let cancel = CancellationToken::new();
        let guard = cancel.clone().drop_guard();

        let (out_tx, mut out_rx) = mpsc::unbounded_channel::<String>();
        let (in_tx, in_rx) = mpsc::unbounded_channel::<String>();

        let writer = Arc::clone(&transport);
        let token = cancel.clone();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    biased;
                    _ = token.cancelled() => break,
                    msg = out_rx.recv() => match msg {
                        Some(msg) => {
                            if let Err(e) = writer.send(msg).await {
                                tracing::debug!("MCP outbound bridge stopped: {e}");
                                break;
                            }
                        }
                        None => break,
                    },
                }
            }
        });

        let reader = Arc::clone(&transport);
        let token = cancel.clone();
        tokio::spawn(async move {
            let mut inbound = reader.receive();
            let mut diagnostics = reader.receive_err();
            loop {
                tokio::select! {
                    biased;
                    _ = token.cancelled() => break,
                    msg = inbound.next() => match msg {
                        Some(msg) => {
                            if in_tx.send(msg).is_err() {
                                break;
                            }
                        }
                        None => break,
                    },
                    // Drained so the diagnostic channel never backs up.
                    Some(_) = diagnostics.next() => {}
                }
            }
        });

        let client = JsonRpcClient::new(out_tx);
        client.on_notification(NOTIF_TOOLS_LIST_CHANGED, |_| {
            tracing::debug!("MCP server reported a tool list change");
        });
        start_read_loop(in_rx, cancel.clone(), client.clone());

        let protocol = match McpProtocol::new(client)
            .initialize(client_info, ClientCapabilities::default(), Some(timeout))
            .await
        {
            Ok(protocol) => protocol,
            Err(e) => {
                drop(guard);
                if let Err(close_err) = transport.close().await {
                    tracing::debug!("Failed to release transport after handshake error: {close_err}");
                }
                return Err(e);
            }
        };

        let _ = guard.disarm();
        tracing::debug!(
            server = %protocol.server_info().name,
            protocol_version = %protocol.protocol_version(),
            "MCP handshake complete"
        );

        Ok(Self {
            protocol,
            transport,
            cancel,
        })
    }

    /// Negotiated protocol version.
    pub fn protocol_version(&self) -> &str {
        self.protocol.protocol_version()
    }
}

impl Drop for McpSession {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

#[async_trait::async_trait]
impl Session for McpSession {
    fn server_info(&self) -> Implementation {
        self.protocol.server_info().clone()
    }

    async fn list_tools(&self) -> Result<Vec<McpTool>> {
        self.protocol.list_tools().await
    }

    async fn call_tool(
        &self,
        name: &str,
        arguments: Option<serde_json::Value>,
    ) -> Result<CallToolResponse> {
        self.protocol.call_tool(name, arguments).await
    }

    async fn close(&self) -> Result<()> {
        self.cancel.cancel();
        self.transport.close().await
    }
}

/// Connector that launches stdio child processes.
#[derive(Debug, Clone)]
pub struct StdioConnector {
    client_info: Implementation,
}

impl StdioConnector {
    /// Connector announcing itself to servers as `client_info`.
    pub fn new(client_info: Implementation) -> Self {
        Self { client_info }
    }
}

#[async_trait::async_trait]
impl Connector for StdioConnector {
    async fn handshake(
        &self,
        transport: PendingTransport,
        timeout: Duration,
    ) -> Result<Box<dyn Session>> {
        let transport: Arc<dyn Transport> = match transport {
            PendingTransport::Stdio(command) => {
                tracing::debug!(
                    program = %command.program.display(),
                    args = ?command.args,
                    "Spawning MCP server"
                );
                Arc::new(StdioTransport::spawn(&command)?)
            }
        };
        let session = McpSession::establish(transport, self.client_info.clone(), timeout).await?;
        Ok(Box::new(session))
    }
}
