//! Transport factory
//!
//! Turns a [`ServerDescriptor`] into a [`PendingTransport`]: a description of
//! how to reach the server that has not been started yet. Nothing is spawned
//! here; the connector launches the process when it runs the handshake.
//!
//! Relative paths in a stdio command line are resolved against the workspace
//! root, found by walking up from the running executable until one of
//! [`WORKSPACE_MARKERS`] is present.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use crate::error::{ConductorError, Result};
use crate::mcp::config::{ServerDescriptor, TransportKind};

/// Entries whose presence marks a directory as the workspace root.
pub const WORKSPACE_MARKERS: &[&str] = &[".git", "Cargo.lock", "conductor.yaml"];

/// File extensions that identify a bare argument as a path to a script or
/// project file.
const PATH_EXTENSIONS: &[&str] = &[
    "py", "js", "mjs", "ts", "sh", "dll", "csproj", "jar", "rb", "yaml", "yml", "json",
];

/// A fully resolved child-process command line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StdioCommand {
    /// Executable to run.
    pub program: PathBuf,
    /// Arguments, with relative paths already resolved.
    pub args: Vec<String>,
    /// Working directory for the child.
    pub working_dir: Option<PathBuf>,
    /// Environment applied on top of the inherited one.
    pub env: HashMap<String, String>,
}

impl StdioCommand {
    /// Command with no working directory and no extra environment.
    pub fn new(program: impl Into<PathBuf>, args: Vec<String>) -> Self {
        Self {
            program: program.into(),
            args,
            working_dir: None,
            env: HashMap::new(),
        }
    }
}

/// An unstarted transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PendingTransport {
    /// Child process over stdin/stdout.
    Stdio(StdioCommand),
}

/// Builds [`PendingTransport`]s relative to a workspace root.
#[derive(Debug, Clone)]
pub struct TransportFactory {
    root: PathBuf,
}

impl TransportFactory {
    /// Factory resolving relative paths against `root`.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Factory rooted at the discovered workspace root, or the current
    /// directory when no marker is found.
    pub fn discover() -> Self {
        let root = std::env::current_exe()
            .ok()
            .and_then(|exe| exe.parent().and_then(find_workspace_root))
            .or_else(|| std::env::current_dir().ok())
            .unwrap_or_else(|| PathBuf::from("."));
        tracing::debug!(root = %root.display(), "Resolved workspace root");
        Self::new(root)
    }

    /// Describe how to reach the server in `descriptor`.
    ///
    /// # Errors
    ///
    /// - [`ConductorError::UnsupportedTransport`] for `http` and `sse`.
    /// - [`ConductorError::InvalidDescriptor`] when a stdio descriptor has no
    ///   command.
    pub fn create(&self, descriptor: &ServerDescriptor) -> Result<PendingTransport> {
        match descriptor.transport {
            TransportKind::Stdio => {
                let command = descriptor
                    .command
                    .as_deref()
                    .filter(|c| !c.trim().is_empty())
                    .ok_or_else(|| ConductorError::InvalidDescriptor {
                        server: descriptor.id.clone(),
                        message: "stdio transport requires `command`".to_string(),
                    })?;

                let program = if looks_like_relative_path(command) {
                    self.root.join(command)
                } else {
                    PathBuf::from(command)
                };

                let args = descriptor
                    .args
                    .iter()
                    .map(|arg| {
                        if looks_like_relative_path(arg) {
                            self.root.join(arg).to_string_lossy().into_owned()
                        } else {
                            arg.clone()
                        }
                    })
                    .collect();

                let working_dir = match &descriptor.working_dir {
                    Some(dir) if dir.is_absolute() => dir.clone(),
                    Some(dir) => self.root.join(dir),
                    None => self.root.clone(),
                };

                Ok(PendingTransport::Stdio(StdioCommand {
                    program,
                    args,
                    working_dir: Some(working_dir),
                    env: descriptor.env.clone(),
                }))
            }
            TransportKind::Http | TransportKind::Sse => Err(ConductorError::UnsupportedTransport {
                server: descriptor.id.clone(),
                transport: descriptor.transport.to_string(),
            }
            .into()),
        }
    }
}

/// Walk upward from `start` until a directory containing one of
/// [`WORKSPACE_MARKERS`] is found.
pub fn find_workspace_root(start: &Path) -> Option<PathBuf> {
    start
        .ancestors()
        .find(|dir| WORKSPACE_MARKERS.iter().any(|m| dir.join(m).exists()))
        .map(Path::to_path_buf)
}

/// Whether a command-line token names a relative filesystem path.
///
/// Flags, absolute paths and URLs are left alone. A token counts as a path
/// when it contains a separator or ends in a known script/project extension.
fn looks_like_relative_path(token: &str) -> bool {
    if token.is_empty() || token.starts_with('-') || token.contains("://") {
        return false;
    }
    let path = Path::new(token);
    if path.is_absolute() {
        return false;
    }
    if token.contains('/') || token.contains('\\') {
        return true;
    }
    path.extension()
        .and_then(|e| e.to_str())
        .map(|e| PATH_EXTENSIONS.contains(&e.to_ascii_lowercase().as_str()))
        .unwrap_or(false)
}
