//! Test utilities for Conductor
//!
//! In-memory stand-ins for the protocol layer: [`FakeConnector`] hands out
//! [`FakeSession`]s whose tool set, failure pattern and close behaviour are
//! scripted per server through [`FakeServer`].

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use crate::error::{ConductorError, Result};
use crate::mcp::config::ServerDescriptor;
use crate::mcp::session::{Connector, Session};
use crate::mcp::transport::factory::PendingTransport;
use crate::mcp::types::{CallToolResponse, Implementation, McpTool, ToolResponseContent};

/// Build a tool with an empty object schema.
pub fn tool(name: &str) -> McpTool {
    McpTool {
        name: name.to_string(),
        title: None,
        description: Some(format!("{name} tool")),
        input_schema: serde_json::json!({ "type": "object" }),
    }
}

/// Stdio descriptor whose command is the server id, so a [`FakeConnector`]
/// can recognise it.
pub fn descriptor(id: &str, max_retries: u32) -> ServerDescriptor {
    let mut d = ServerDescriptor::stdio(id, id, vec![]);
    d.max_retries = max_retries;
    d
}

/// Assert that `err` carries a [`ConductorError`] matching `pred`.
pub fn assert_conductor_error(err: &anyhow::Error, pred: impl Fn(&ConductorError) -> bool) {
    match ConductorError::find(err) {
        Some(e) if pred(e) => {}
        Some(e) => panic!("unexpected conductor error: {e}"),
        None => panic!("not a conductor error: {err:#}"),
    }
}

/// Scripted behaviour of one fake server.
#[derive(Debug, Clone, Default)]
pub struct FakeServer {
    /// Tools reported by `tools/list`; mutate to simulate server-side change.
    pub tools: Arc<Mutex<Vec<McpTool>>>,
    /// Handshakes that fail before one succeeds; `u32::MAX` always fails.
    pub failures_before_success: u32,
    /// Time each handshake takes.
    pub handshake_delay: Duration,
    /// When set, `tools/list` fails.
    pub list_fails: Arc<AtomicBool>,
    /// When set, `close` fails.
    pub close_fails: bool,
    /// Handshakes attempted.
    pub handshakes: Arc<AtomicUsize>,
    /// Sessions closed.
    pub closes: Arc<AtomicUsize>,
    /// Bumped by [`FakeServer::crash`]; sessions from an older generation
    /// fail with a transport error.
    pub generation: Arc<AtomicUsize>,
}

impl FakeServer {
    /// Server exposing `names`.
    pub fn with_tools(names: &[&str]) -> Self {
        Self {
            tools: Arc::new(Mutex::new(names.iter().map(|n| tool(n)).collect())),
            ..Self::default()
        }
    }

    /// Server whose handshake never succeeds.
    pub fn unreachable() -> Self {
        Self {
            failures_before_success: u32::MAX,
            ..Self::default()
        }
    }

    /// Replace the advertised tool set.
    pub fn set_tools(&self, names: &[&str]) {
        *self.tools.lock().unwrap() = names.iter().map(|n| tool(n)).collect();
    }

    /// Simulate the server process dying: every existing session now fails
    /// at the transport level, new handshakes succeed.
    pub fn crash(&self) {
        self.generation.fetch_add(1, Ordering::SeqCst);
    }

    /// Handshakes attempted so far.
    pub fn handshake_count(&self) -> usize {
        self.handshakes.load(Ordering::SeqCst)
    }

    /// Sessions closed so far.
    pub fn close_count(&self) -> usize {
        self.closes.load(Ordering::SeqCst)
    }
}

/// [`Connector`] resolving each pending transport's program name to a
/// [`FakeServer`].
#[derive(Debug, Default)]
pub struct FakeConnector {
    servers: Mutex<HashMap<String, FakeServer>>,
}

impl FakeConnector {
    /// Connector with no servers.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `server` under `id`; returns a handle sharing its counters.
    pub fn add(&self, id: &str, server: FakeServer) -> FakeServer {
        self.servers
            .lock()
            .unwrap()
            .insert(id.to_string(), server.clone());
        server
    }
}

#[async_trait::async_trait]
impl Connector for FakeConnector {
    async fn handshake(
        &self,
        transport: PendingTransport,
        _timeout: Duration,
    ) -> Result<Box<dyn Session>> {
        let PendingTransport::Stdio(command) = transport;
        let id = command.program.to_string_lossy().into_owned();
        let server = self
            .servers
            .lock()
            .unwrap()
            .get(&id)
            .cloned()
            .ok_or_else(|| ConductorError::McpTransport(format!("no fake server `{id}`")))?;

        let attempt = server.handshakes.fetch_add(1, Ordering::SeqCst) as u64;
        if !server.handshake_delay.is_zero() {
            tokio::time::sleep(server.handshake_delay).await;
        }
        if attempt < u64::from(server.failures_before_success) {
            return Err(ConductorError::McpTransport(format!("{id}: connection refused")).into());
        }

        let generation = server.generation.load(Ordering::SeqCst);
        Ok(Box::new(FakeSession {
            id,
            server,
            generation,
            closed: AtomicBool::new(false),
        }))
    }
}

/// Session backed by a [`FakeServer`].
#[derive(Debug)]
pub struct FakeSession {
    id: String,
    server: FakeServer,
    generation: usize,
    closed: AtomicBool,
}

impl FakeSession {
    fn check_alive(&self) -> Result<()> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(ConductorError::McpTransport("session closed".to_string()).into());
        }
        if self.server.generation.load(Ordering::SeqCst) != self.generation {
            return Err(ConductorError::McpTransport("read loop exited".to_string()).into());
        }
        Ok(())
    }
}

#[async_trait::async_trait]
impl Session for FakeSession {
    fn server_info(&self) -> Implementation {
        Implementation {
            name: self.id.clone(),
            version: "0.0.0".to_string(),
            description: None,
        }
    }

    async fn list_tools(&self) -> Result<Vec<McpTool>> {
        self.check_alive()?;
        if self.server.list_fails.load(Ordering::SeqCst) {
            return Err(ConductorError::Rpc {
                code: -32603,
                message: "tools/list unavailable".to_string(),
            }
            .into());
        }
        Ok(self.server.tools.lock().unwrap().clone())
    }

    async fn call_tool(
        &self,
        name: &str,
        arguments: Option<serde_json::Value>,
    ) -> Result<CallToolResponse> {
        self.check_alive()?;
        let known = self
            .server
            .tools
            .lock()
            .unwrap()
            .iter()
            .any(|t| t.name == name);
        if !known {
            return Err(ConductorError::ToolNotFound {
                name: name.to_string(),
                message: format!("Unknown tool: {name}"),
            }
            .into());
        }
        let args = arguments.map(|a| a.to_string()).unwrap_or_default();
        Ok(CallToolResponse {
            content: vec![ToolResponseContent::Text {
                text: format!("{name}({args})"),
            }],
            is_error: None,
            structured_content: None,
        })
    }

    async fn close(&self) -> Result<()> {
        self.closed.store(true, Ordering::SeqCst);
        self.server.closes.fetch_add(1, Ordering::SeqCst);
        if self.server.close_fails {
            return Err(ConductorError::McpTransport(format!("{}: close failed", self.id)).into());
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mcp::transport::factory::StdioCommand;

    fn pending(id: &str) -> PendingTransport {
        PendingTransport::Stdio(StdioCommand::new(id, vec![]))
    }

    #[tokio::test]
    async fn test_fake_connector_scripts_failures() {
        let connector = FakeConnector::new();
        let server = connector.add(
            "calc",
            FakeServer {
                failures_before_success: 1,
                ..FakeServer::with_tools(&["Add"])
            },
        );

        assert!(connector
            .handshake(pending("calc"), Duration::from_secs(1))
            .await
            .is_err());
        let session = connector
            .handshake(pending("calc"), Duration::from_secs(1))
            .await
            .unwrap_or_else(|e| panic!("handshake failed: {e}"));
        assert_eq!(server.handshake_count(), 2);
        assert_eq!(session.list_tools().await.unwrap()[0].name, "Add");
    }

    #[tokio::test]
    async fn test_fake_session_unknown_tool() {
        let connector = FakeConnector::new();
        connector.add("calc", FakeServer::with_tools(&["Add"]));
        let session = connector
            .handshake(pending("calc"), Duration::from_secs(1))
            .await
            .unwrap_or_else(|e| panic!("handshake failed: {e}"));

        let err = session.call_tool("Mul", None).await.unwrap_err();
        assert_conductor_error(&err, |e| matches!(e, ConductorError::ToolNotFound { .. }));
    }

    #[test]
    fn test_descriptor_helper() {
        let d = descriptor("calc", 2);
        assert_eq!(d.command.as_deref(), Some("calc"));
        assert_eq!(d.max_retries, 2);
    }
}
