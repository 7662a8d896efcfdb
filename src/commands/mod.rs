//! Command handlers for the Conductor CLI
//!
//! Each subcommand builds on one [`InvocationDispatcher`] assembled from the
//! loaded [`Config`]. Whatever the outcome, every connection is released
//! before [`run`] returns.

use std::sync::Arc;

use colored::Colorize;
use prettytable::{format, row, Table};
use serde_json::{Map, Value};
use tokio_util::sync::CancellationToken;

use crate::cli::Commands;
use crate::config::Config;
use crate::error::{ConductorError, Result};
use crate::mcp::manager::{ConnectionManager, ConnectionState, ServerStatus};
use crate::mcp::retry::RetryPolicy;
use crate::mcp::session::StdioConnector;
use crate::mcp::types::{CallToolResponse, Implementation, McpTool, ToolResponseContent};
use crate::mcp::InvocationDispatcher;

pub mod servers;
pub mod shell;
pub mod tools;

/// Build the dispatcher, manager and stdio connector described by `config`.
pub fn build_dispatcher(config: &Config) -> InvocationDispatcher {
    let connector = StdioConnector::new(Implementation {
        name: config.client.name.clone(),
        version: config.client.version.clone(),
        description: None,
    });
    let manager = ConnectionManager::new(config.servers.clone(), Arc::new(connector))
        .with_retry(RetryPolicy::from(&config.retry))
        .with_span(tracing::info_span!("conductor"));
    InvocationDispatcher::new(Arc::new(manager))
}

/// Execute one CLI command.
///
/// Ctrl-C cancels the in-flight operation. All connections are closed
/// before returning.
pub async fn run(command: Commands, config: Config) -> Result<()> {
    let dispatcher = build_dispatcher(&config);
    let cancel = CancellationToken::new();

    // The shell handles Ctrl-C per command.
    if command != Commands::Shell {
        let on_interrupt = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                tracing::info!("Interrupt received; cancelling");
                on_interrupt.cancel();
            }
        });
    }

    let result = match command {
        Commands::Servers => {
            servers::list_servers(&dispatcher);
            Ok(())
        }
        Commands::Check => servers::check_servers(&dispatcher, &cancel).await,
        Commands::Tools { server } => tools::list_tools(&dispatcher, &server, &cancel).await,
        Commands::Call {
            server,
            tool,
            args,
            json,
        } => {
            match build_params(&args, json.as_deref()) {
                Ok(params) => tools::call_tool(&dispatcher, &server, &tool, params, &cancel).await,
                Err(e) => Err(e),
            }
        }
        Commands::Shell => shell::run_shell(&dispatcher).await,
    };

    dispatcher.manager().disconnect_all().await;
    result
}

/// Parse `key=value` pairs into a JSON object.
///
/// Values that parse as JSON (numbers, booleans, `null`, quoted strings,
/// arrays, objects) keep their type; anything else is a string.
///
/// # Errors
///
/// Returns [`ConductorError::Config`] for a pair without `=` or with an
/// empty key.
///
/// # Examples
///
/// ```
/// use conductor::commands::parse_key_value_args;
///
/// let args = vec!["a=1".to_string(), "name=Ada".to_string()];
/// let map = parse_key_value_args(&args).unwrap();
/// assert_eq!(map["a"], serde_json::json!(1));
/// assert_eq!(map["name"], serde_json::json!("Ada"));
/// ```
pub fn parse_key_value_args(args: &[String]) -> Result<Map<String, Value>> {
    let mut map = Map::new();
    for arg in args {
        let (key, raw) = arg.split_once('=').ok_or_else(|| {
            ConductorError::Config(format!("Invalid argument `{}`: expected key=value", arg))
        })?;
        let key = key.trim();
        if key.is_empty() {
            return Err(
                ConductorError::Config(format!("Invalid argument `{}`: empty key", arg)).into(),
            );
        }
        let value = serde_json::from_str(raw).unwrap_or_else(|_| Value::String(raw.to_string()));
        map.insert(key.to_string(), value);
    }
    Ok(map)
}

/// Combine `--json` and `--arg` values into tool parameters.
///
/// `--arg` entries override keys from `--json`. Returns `None` when neither
/// is given.
pub fn build_params(args: &[String], json: Option<&str>) -> Result<Option<Value>> {
    let mut params = match json {
        Some(raw) => match serde_json::from_str::<Value>(raw).map_err(ConductorError::from)? {
            Value::Object(map) => map,
            _ => {
                return Err(
                    ConductorError::Config("--json must be a JSON object".to_string()).into(),
                )
            }
        },
        None => Map::new(),
    };
    params.extend(parse_key_value_args(args)?);

    if params.is_empty() && json.is_none() {
        Ok(None)
    } else {
        Ok(Some(Value::Object(params)))
    }
}

/// Print a tool result, one content block per line.
pub fn print_tool_result(response: &CallToolResponse) {
    if response.is_error() {
        println!("{}", "Tool reported an error:".red().bold());
    }
    if response.content.is_empty() {
        println!("{}", "(no content)".dimmed());
    }
    for block in &response.content {
        match block {
            ToolResponseContent::Text { text } => println!("{}", text),
            other => println!("{}", format!("[{} content]", other.kind()).dimmed()),
        }
    }
    if let Some(structured) = &response.structured_content {
        println!("{}", structured);
    }
}

/// Print a table of tools with their declared parameters.
pub fn print_tools_table(server: &str, tools: &[McpTool]) {
    if tools.is_empty() {
        println!("{}", format!("Server {} offers no tools.", server).yellow());
        return;
    }

    let mut table = Table::new();
    table.set_format(*format::consts::FORMAT_BORDERS_ONLY);
    table.add_row(row!["Tool".bold(), "Parameters".bold(), "Description".bold()]);
    for tool in tools {
        let params = tool
            .parameters()
            .iter()
            .map(|(name, kind)| format!("{}: {}", name, kind))
            .collect::<Vec<_>>()
            .join(", ");
        table.add_row(row![
            tool.name.cyan(),
            params,
            tool.description.as_deref().unwrap_or("-")
        ]);
    }

    println!("\nTools on {}:", server);
    table.printstd();
    println!();
}

/// Print a table of server states.
pub fn print_status_table(status: &[ServerStatus]) {
    if status.is_empty() {
        println!("{}", "No servers configured.".yellow());
        return;
    }

    let mut table = Table::new();
    table.set_format(*format::consts::FORMAT_BORDERS_ONLY);
    table.add_row(row![
        "ID".bold(),
        "Name".bold(),
        "Transport".bold(),
        "Enabled".bold(),
        "State".bold()
    ]);
    for s in status {
        let state = match &s.state {
            ConnectionState::Disconnected => "disconnected".dimmed(),
            ConnectionState::Connecting => "connecting".yellow(),
            ConnectionState::Connected { since, server_name } => format!(
                "connected to {} since {}",
                server_name,
                since.format("%H:%M:%S")
            )
            .green(),
        };
        let enabled = if s.enabled { "yes".normal() } else { "no".red() };
        table.add_row(row![s.id.cyan(), s.name, s.transport, enabled, state]);
    }

    table.printstd();
    println!();
}

/// Print an error for the operator, rendering unknown-tool suggestions.
pub fn print_error(err: &anyhow::Error) {
    match ConductorError::find(err) {
        Some(ConductorError::UnknownTool {
            name, suggestions, ..
        }) => {
            println!("{} {}", "Unknown tool:".red().bold(), name);
            if suggestions.is_empty() {
                println!("Use {} to see available tools.", "tools <server>".cyan());
            } else {
                println!("Did you mean: {}?", suggestions.join(", ").cyan());
            }
        }
        _ => println!("{} {:#}", "Error:".red().bold(), err),
    }
}
