//! Stdio transport for MCP child-process servers
//!
//! Outbound messages are written to the child's stdin followed by `\n`;
//! inbound messages are read from its stdout one line at a time. Stderr is
//! forwarded to a diagnostic stream and logged at `DEBUG`.
//!
//! The child is spawned with `kill_on_drop`, receives SIGTERM when the
//! transport is dropped, and is killed and reaped by [`Transport::close`].

use std::pin::Pin;
use std::process::Stdio;
use std::sync::Arc;

use futures::Stream;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, Command};
use tokio::sync::{mpsc, Mutex};

use crate::error::{ConductorError, Result};
use crate::mcp::transport::factory::StdioCommand;
use crate::mcp::transport::Transport;

/// Stdio-based MCP transport that drives a child process.
///
/// # Examples
///
/// ```no_run
/// use conductor::mcp::transport::factory::StdioCommand;
/// use conductor::mcp::transport::stdio::StdioTransport;
///
/// # #[tokio::main]
/// # async fn main() -> anyhow::Result<()> {
/// let transport = StdioTransport::spawn(&StdioCommand::new("cat", vec![]))?;
/// # Ok(())
/// # }
/// ```
#[derive(Debug)]
pub struct StdioTransport {
    stdin_tx: mpsc::UnboundedSender<String>,
    stdout_rx: Arc<Mutex<mpsc::UnboundedReceiver<String>>>,
    stderr_rx: Arc<Mutex<mpsc::UnboundedReceiver<String>>>,
    child: Arc<Mutex<Child>>,
}

impl StdioTransport {
    /// Spawn the child described by `command` and wire up its pipes.
    ///
    /// The child inherits the parent environment with `command.env` applied
    /// on top. Three background tasks are started: a stdin writer, a stdout
    /// reader and a stderr reader.
    ///
    /// # Errors
    ///
    /// Returns [`ConductorError::McpTransport`] if the process cannot be
    /// spawned or its pipes are unavailable.
    pub fn spawn(command: &StdioCommand) -> Result<Self> {
        let mut cmd = Command::new(&command.program);
        cmd.args(&command.args)
            .envs(&command.env)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(dir) = &command.working_dir {
            cmd.current_dir(dir);
        }

        let mut child = cmd.spawn().map_err(|e| {
            ConductorError::McpTransport(format!(
                "failed to spawn MCP server `{}`: {}",
                command.program.display(),
                e
            ))
        })?;

        let stdin = child.stdin.take().ok_or_else(|| {
            ConductorError::McpTransport("child stdin unavailable after spawn".into())
        })?;
        let stdout = child.stdout.take().ok_or_else(|| {
            ConductorError::McpTransport("child stdout unavailable after spawn".into())
        })?;
        let stderr = child.stderr.take().ok_or_else(|| {
            ConductorError::McpTransport("child stderr unavailable after spawn".into())
        })?;

        let (stdin_tx, mut stdin_rx) = mpsc::unbounded_channel::<String>();
        let (stdout_tx, stdout_rx) = mpsc::unbounded_channel::<String>();
        let (stderr_tx, stderr_rx) = mpsc::unbounded_channel::<String>();

        tokio::spawn(async move {
            let mut stdin = stdin;
            while let Some(msg) = stdin_rx.recv().await {
                let line = format!("{}\n", msg);
                if stdin.write_all(line.as_bytes()).await.is_err() {
                    break;
                }
                if stdin.flush().await.is_err() {
                    break;
                }
            }
        });

        tokio::spawn(async move {
            let mut lines = BufReader::new(stdout).lines();
            while let Ok(Some(line)) = lines.next_line().await {
                let line = line.trim();
                if line.is_empty() {
                    continue;
                }
                if stdout_tx.send(line.to_string()).is_err() {
                    break;
                }
            }
        });

        let program = command.program.display().to_string();
        tokio::spawn(async move {
            let mut lines = BufReader::new(stderr).lines();
            while let Ok(Some(line)) = lines.next_line().await {
                tracing::debug!(
                    target: "conductor::mcp::transport::stdio",
                    program = %program,
                    "mcp server stderr: {}",
                    line
                );
                if stderr_tx.send(line).is_err() {
                    break;
                }
            }
        });

        Ok(Self {
            stdin_tx,
            stdout_rx: Arc::new(Mutex::new(stdout_rx)),
            stderr_rx: Arc::new(Mutex::new(stderr_rx)),
            child: Arc::new(Mutex::new(child)),
        })
    }

    /// OS process id of the child, if it is still running.
    #[cfg(test)]
    pub(crate) async fn pid(&self) -> Option<u32> {
        self.child.lock().await.id()
    }
}

fn drain(
    rx: Arc<Mutex<mpsc::UnboundedReceiver<String>>>,
) -> Pin<Box<dyn Stream<Item = String> + Send + 'static>> {
    Box::pin(futures::stream::unfold(rx, |rx| async move {
        let mut guard = rx.lock().await;
        let item = guard.recv().await?;
        drop(guard);
        Some((item, rx))
    }))
}

#[async_trait::async_trait]
impl Transport for StdioTransport {
    async fn send(&self, message: String) -> Result<()> {
        self.stdin_tx.send(message).map_err(|e| {
            ConductorError::McpTransport(format!("stdin channel closed: {}", e)).into()
        })
    }

    fn receive(&self) -> Pin<Box<dyn Stream<Item = String> + Send + '_>> {
        drain(Arc::clone(&self.stdout_rx))
    }

    fn receive_err(&self) -> Pin<Box<dyn Stream<Item = String> + Send + '_>> {
        drain(Arc::clone(&self.stderr_rx))
    }

    async fn close(&self) -> Result<()> {
        let mut child = self.child.lock().await;
        if child.try_wait()?.is_some() {
            return Ok(());
        }
        child.kill().await.map_err(|e| {
            ConductorError::McpTransport(format!("failed to terminate MCP server: {}", e))
        })?;
        Ok(())
    }
}

impl Drop for StdioTransport {
    /// Best-effort, non-blocking termination of the child.
    fn drop(&mut self) {
        // If another task holds the lock, `kill_on_drop` still reaps the child.
        if let Ok(child) = self.child.try_lock() {
            #[cfg(unix)]
            {
                if let Some(pid) = child.id() {
                    // SAFETY: pid was obtained from a live tokio::process::Child.
                    unsafe {
                        libc::kill(pid as libc::pid_t, libc::SIGTERM);
                    }
                }
            }
            #[cfg(not(unix))]
            {
                let mut child = child;
                let _ = child.start_kill();
            }
        }
    }
}
