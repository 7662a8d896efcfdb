//! Command-line interface definition for Conductor
//!
//! This module defines the CLI structure using clap's derive API. Every
//! subcommand is a thin consumer of the connection manager and dispatcher.

use clap::{Parser, Subcommand};

use crate::config::DEFAULT_CONFIG_PATH;

/// Conductor - connect to MCP tool servers and invoke their tools
#[derive(Parser, Debug, Clone)]
#[command(name = "conductor")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Path to configuration file
    #[arg(short, long, env = "CONDUCTOR_CONFIG", default_value = DEFAULT_CONFIG_PATH)]
    pub config: String,

    /// Enable verbose (debug) logging
    #[arg(short, long)]
    pub verbose: bool,

    /// Emit logs as JSON lines
    #[arg(long)]
    pub json_logs: bool,

    /// Command to execute
    #[command(subcommand)]
    pub command: Commands,
}

/// Available commands for Conductor
#[derive(Subcommand, Debug, Clone, PartialEq, Eq)]
pub enum Commands {
    /// List configured MCP servers
    Servers,

    /// Connect to every enabled server and report the outcome
    Check,

    /// List the tools offered by a server
    Tools {
        /// Server id
        server: String,
    },

    /// Invoke a tool
    Call {
        /// Server id
        server: String,

        /// Tool name (case-sensitive)
        tool: String,

        /// Tool argument as key=value; repeatable
        #[arg(short, long = "arg", value_name = "KEY=VALUE")]
        args: Vec<String>,

        /// Tool arguments as a JSON object; merged under any --arg values
        #[arg(long, value_name = "JSON")]
        json: Option<String>,
    },

    /// Start an interactive shell
    Shell,
}

impl Cli {
    /// Parse command line arguments
    pub fn parse_args() -> Self {
        Self::parse()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_parse_servers() {
        let cli = Cli::try_parse_from(["conductor", "servers"]).unwrap();
        assert_eq!(cli.command, Commands::Servers);
        assert!(!cli.verbose);
        assert!(!cli.json_logs);
    }

    #[test]
    fn test_cli_parse_global_flags() {
        let cli = Cli::try_parse_from([
            "conductor",
            "--config",
            "other.yaml",
            "-v",
            "--json-logs",
            "check",
        ])
        .unwrap();
        assert_eq!(cli.config, "other.yaml");
        assert!(cli.verbose);
        assert!(cli.json_logs);
        assert_eq!(cli.command, Commands::Check);
    }

    #[test]
    fn test_cli_parse_tools_requires_server() {
        assert!(Cli::try_parse_from(["conductor", "tools"]).is_err());
        let cli = Cli::try_parse_from(["conductor", "tools", "calc"]).unwrap();
        assert_eq!(
            cli.command,
            Commands::Tools {
                server: "calc".to_string()
            }
        );
    }

    #[test]
    fn test_cli_parse_call_with_args() {
        let cli = Cli::try_parse_from([
            "conductor",
            "call",
            "calc",
            "Add",
            "--arg",
            "a=1",
            "-a",
            "b=2",
            "--json",
            r#"{"c":3}"#,
        ])
        .unwrap();
        match cli.command {
            Commands::Call {
                server,
                tool,
                args,
                json,
            } => {
                assert_eq!(server, "calc");
                assert_eq!(tool, "Add");
                assert_eq!(args, vec!["a=1".to_string(), "b=2".to_string()]);
                assert_eq!(json.as_deref(), Some(r#"{"c":3}"#));
            }
            other => panic!("Expected Call command, got {other:?}"),
        }
    }

    #[test]
    fn test_cli_parse_shell() {
        let cli = Cli::try_parse_from(["conductor", "shell"]).unwrap();
        assert_eq!(cli.command, Commands::Shell);
    }

    #[test]
    fn test_cli_rejects_unknown_command() {
        assert!(Cli::try_parse_from(["conductor", "chat"]).is_err());
    }
}
