//! MCP server descriptors
//!
//! A [`ServerDescriptor`] names one tool-provider process and how to reach
//! it. Descriptors are loaded once at startup (see [`crate::config::Config`])
//! and are immutable afterwards.

use std::collections::HashMap;
use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{ConductorError, Result};

/// Transport used to reach an MCP server.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransportKind {
    /// Child process speaking newline-delimited JSON on stdin/stdout.
    #[default]
    Stdio,
    /// Streamable HTTP (reserved).
    Http,
    /// Server-sent events (reserved).
    Sse,
}

impl fmt::Display for TransportKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransportKind::Stdio => write!(f, "stdio"),
            TransportKind::Http => write!(f, "http"),
            TransportKind::Sse => write!(f, "sse"),
        }
    }
}

/// Connection settings for a single MCP server.
///
/// # Examples
///
/// ```
/// use conductor::mcp::config::ServerDescriptor;
///
/// let yaml = r#"
/// id: calc
/// command: ./target/debug/calc-server
/// "#;
/// let desc: ServerDescriptor = serde_yaml::from_str(yaml).unwrap();
/// assert_eq!(desc.max_retries, 3);
/// assert!(desc.enabled);
/// desc.validate().unwrap();
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServerDescriptor {
    /// Unique key used to address the server.
    pub id: String,

    /// Display name; falls back to `id` when empty.
    #[serde(default)]
    pub name: String,

    /// Transport kind.
    #[serde(default)]
    pub transport: TransportKind,

    /// Executable to launch (stdio only).
    #[serde(default)]
    pub command: Option<String>,

    /// Arguments passed to `command` (stdio only).
    #[serde(default)]
    pub args: Vec<String>,

    /// Working directory for the child (stdio only).
    #[serde(default)]
    pub working_dir: Option<PathBuf>,

    /// Extra environment variables for the child (stdio only).
    #[serde(default)]
    pub env: HashMap<String, String>,

    /// Remote endpoint (http/sse only).
    #[serde(default)]
    pub url: Option<String>,

    /// Per-attempt connection timeout in seconds.
    #[serde(default = "default_timeout_seconds")]
    pub timeout_seconds: u64,

    /// Retries after the first failed connection attempt.
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    /// Disabled servers are never connected.
    #[serde(default = "default_enabled")]
    pub enabled: bool,
}

fn default_timeout_seconds() -> u64 {
    30
}

fn default_max_retries() -> u32 {
    3
}

fn default_enabled() -> bool {
    true
}

impl ServerDescriptor {
    /// Build an enabled stdio descriptor with default timeout and retries.
    pub fn stdio(id: impl Into<String>, command: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            id: id.into(),
            name: String::new(),
            transport: TransportKind::Stdio,
            command: Some(command.into()),
            args,
            working_dir: None,
            env: HashMap::new(),
            url: None,
            timeout_seconds: default_timeout_seconds(),
            max_retries: default_max_retries(),
            enabled: true,
        }
    }

    /// Name to show to operators.
    pub fn display_name(&self) -> &str {
        if self.name.is_empty() {
            &self.id
        } else {
            &self.name
        }
    }

    /// Per-attempt connection timeout.
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_seconds)
    }

    /// Check that exactly the fields required by the transport kind are set.
    ///
    /// # Errors
    ///
    /// Returns [`ConductorError::InvalidDescriptor`] describing the first
    /// problem found.
    pub fn validate(&self) -> Result<()> {
        let invalid = |message: &str| -> anyhow::Error {
            ConductorError::InvalidDescriptor {
                server: self.id.clone(),
                message: message.to_string(),
            }
            .into()
        };

        if self.id.trim().is_empty() {
            return Err(invalid("id cannot be empty"));
        }
        if self.timeout_seconds == 0 {
            return Err(invalid("timeout_seconds must be greater than 0"));
        }

        match self.transport {
            TransportKind::Stdio => {
                match self.command.as_deref() {
                    Some(cmd) if !cmd.trim().is_empty() => {}
                    _ => return Err(invalid("stdio transport requires `command`")),
                }
                if self.url.is_some() {
                    return Err(invalid("stdio transport does not accept `url`"));
                }
            }
            TransportKind::Http | TransportKind::Sse => {
                let Some(raw) = self.url.as_deref() else {
                    return Err(invalid(&format!(
                        "{} transport requires `url`",
                        self.transport
                    )));
                };
                let parsed = url::Url::parse(raw)
                    .map_err(|e| invalid(&format!("invalid url `{}`: {}", raw, e)))?;
                if !matches!(parsed.scheme(), "http" | "https") {
                    return Err(invalid(&format!(
                        "url scheme must be http or https, got `{}`",
                        parsed.scheme()
                    )));
                }
                if self.command.is_some() || !self.args.is_empty() || self.working_dir.is_some()
                {
                    return Err(invalid(&format!(
                        "{} transport does not accept `command`, `args` or `working_dir`",
                        self.transport
                    )));
                }
            }
        }

        Ok(())
    }
}

/// Backoff settings shared by all servers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Delay before the first retry, in milliseconds; doubles each attempt.
    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,
}

fn default_base_delay_ms() -> u64 {
    1000
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            base_delay_ms: default_base_delay_ms(),
        }
    }
}

impl RetryConfig {
    /// Base delay as a [`Duration`].
    pub fn base_delay(&self) -> Duration {
        Duration::from_millis(self.base_delay_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn http(url: Option<&str>) -> ServerDescriptor {
        ServerDescriptor {
            transport: TransportKind::Http,
            command: None,
            url: url.map(str::to_string),
            ..ServerDescriptor::stdio("remote", "unused", vec![])
        }
    }

    fn assert_invalid(desc: &ServerDescriptor, needle: &str) {
        let err = desc.validate().unwrap_err();
        match err.downcast_ref::<ConductorError>() {
            Some(ConductorError::InvalidDescriptor { message, .. }) => {
                assert!(message.contains(needle), "unexpected message: {message}")
            }
            other => panic!("expected InvalidDescriptor, got {other:?}"),
        }
    }

    #[test]
    fn test_yaml_defaults() {
        let desc: ServerDescriptor = serde_yaml::from_str("id: calc\ncommand: calc\n").unwrap();
        assert_eq!(desc.transport, TransportKind::Stdio);
        assert_eq!(desc.timeout_seconds, 30);
        assert_eq!(desc.max_retries, 3);
        assert!(desc.enabled);
        assert!(desc.args.is_empty());
        assert_eq!(desc.display_name(), "calc");
    }

    #[test]
    fn test_transport_kind_lowercase_on_the_wire() {
        let desc: ServerDescriptor =
            serde_yaml::from_str("id: r\ntransport: sse\nurl: http://localhost/sse\n").unwrap();
        assert_eq!(desc.transport, TransportKind::Sse);
        assert_eq!(TransportKind::Sse.to_string(), "sse");
    }

    #[test]
    fn test_stdio_requires_command() {
        let mut desc = ServerDescriptor::stdio("calc", "", vec![]);
        assert_invalid(&desc, "requires `command`");
        desc.command = None;
        assert_invalid(&desc, "requires `command`");
    }

    #[test]
    fn test_stdio_rejects_url() {
        let mut desc = ServerDescriptor::stdio("calc", "calc", vec![]);
        desc.url = Some("http://localhost".to_string());
        assert_invalid(&desc, "does not accept `url`");
    }

    #[test]
    fn test_http_requires_valid_url() {
        assert_invalid(&http(None), "requires `url`");
        assert_invalid(&http(Some("not a url")), "invalid url");
        assert_invalid(&http(Some("ftp://host/x")), "scheme");
        http(Some("https://tools.example.com/mcp")).validate().unwrap();
    }

    #[test]
    fn test_http_rejects_stdio_fields() {
        let mut desc = http(Some("http://localhost:8080"));
        desc.args = vec!["x".to_string()];
        assert_invalid(&desc, "does not accept");
    }

    #[test]
    fn test_zero_timeout_rejected() {
        let mut desc = ServerDescriptor::stdio("calc", "calc", vec![]);
        desc.timeout_seconds = 0;
        assert_invalid(&desc, "timeout_seconds");
    }

    #[test]
    fn test_empty_id_rejected() {
        let desc = ServerDescriptor::stdio(" ", "calc", vec![]);
        assert_invalid(&desc, "id cannot be empty");
    }

    #[test]
    fn test_retry_config_default_is_one_second() {
        assert_eq!(RetryConfig::default().base_delay(), Duration::from_secs(1));
    }
}
