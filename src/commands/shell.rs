//! Interactive shell
//!
//! A readline loop over the dispatcher. Each line is parsed into a
//! [`ShellCommand`]; Ctrl-C while a command runs cancels just that command,
//! Ctrl-C at the prompt clears the line, and Ctrl-D or `exit` leaves the
//! shell. Every connection is released on exit.

use colored::Colorize;
use rustyline::error::ReadlineError;
use rustyline::DefaultEditor;
use thiserror::Error;
use tokio_util::sync::CancellationToken;

use crate::commands::{
    parse_key_value_args, print_error, print_status_table, print_tool_result, print_tools_table,
};
use crate::error::Result;
use crate::mcp::InvocationDispatcher;

/// Errors produced while parsing a shell line
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ShellError {
    /// Unknown command was entered
    #[error("Unknown command: {0}\n\nType 'help' to see available commands")]
    UnknownCommand(String),

    /// Command requires an argument but none was provided
    #[error("Command {command} requires an argument\n\nUsage: {usage}")]
    MissingArgument {
        /// Command name as typed, lowercased
        command: String,
        /// Usage line shown back to the user
        usage: String,
    },

    /// A quoted argument was never closed
    #[error("Unterminated quote in input")]
    UnterminatedQuote,
}

/// A parsed shell command
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ShellCommand {
    /// Connect one server, or every enabled server when `None`
    Connect(Option<String>),
    /// Disconnect one server, or every server when `None`
    Disconnect(Option<String>),
    /// Show the connection state of every server
    Status,
    /// List the tools of a server
    Tools(String),
    /// Call a tool with `key=value` arguments
    Call {
        server: String,
        tool: String,
        args: Vec<String>,
    },
    /// Show help
    Help,
    /// Leave the shell
    Exit,
    /// Blank line
    Empty,
}

const HELP: &[(&str, &str)] = &[
    ("connect [server]", "Connect a server (all enabled servers if omitted)"),
    ("disconnect [server]", "Disconnect a server (all servers if omitted)"),
    ("status", "Show connection state of every server"),
    ("tools <server>", "List the tools a server offers"),
    ("call <server> <tool> [key=value...]", "Invoke a tool"),
    ("help", "Show this help"),
    ("exit", "Disconnect everything and leave"),
];

/// Split a line into words, honouring double quotes.
fn tokenize(line: &str) -> std::result::Result<Vec<String>, ShellError> {
    let mut words = Vec::new();
    let mut current = String::new();
    let mut in_quotes = false;
    let mut has_word = false;

    for ch in line.chars() {
        match ch {
            '"' => {
                in_quotes = !in_quotes;
                has_word = true;
            }
            c if c.is_whitespace() && !in_quotes => {
                if has_word {
                    words.push(std::mem::take(&mut current));
                    has_word = false;
                }
            }
            c => {
                current.push(c);
                has_word = true;
            }
        }
    }
    if in_quotes {
        return Err(ShellError::UnterminatedQuote);
    }
    if has_word {
        words.push(current);
    }
    Ok(words)
}

/// Parse one line of shell input. Command names are case-insensitive.
///
/// # Examples
///
/// ```
/// use conductor::commands::shell::{parse_shell_command, ShellCommand};
///
/// assert_eq!(
///     parse_shell_command("tools calc").unwrap(),
///     ShellCommand::Tools("calc".to_string())
/// );
/// ```
pub fn parse_shell_command(line: &str) -> std::result::Result<ShellCommand, ShellError> {
    let words = tokenize(line)?;
    let mut words = words.into_iter();
    let Some(command) = words.next() else {
        return Ok(ShellCommand::Empty);
    };

    let missing = |usage: &str| ShellError::MissingArgument {
        command: command.to_lowercase(),
        usage: usage.to_string(),
    };

    match command.to_lowercase().as_str() {
        "connect" => Ok(ShellCommand::Connect(words.next())),
        "disconnect" => Ok(ShellCommand::Disconnect(words.next())),
        "status" | "servers" => Ok(ShellCommand::Status),
        "tools" | "list" => words
            .next()
            .map(ShellCommand::Tools)
            .ok_or_else(|| missing("tools <server>")),
        "call" => {
            let usage = "call <server> <tool> [key=value...]";
            let server = words.next().ok_or_else(|| missing(usage))?;
            let tool = words.next().ok_or_else(|| missing(usage))?;
            Ok(ShellCommand::Call {
                server,
                tool,
                args: words.collect(),
            })
        }
        "help" | "?" => Ok(ShellCommand::Help),
        "exit" | "quit" => Ok(ShellCommand::Exit),
        _ => Err(ShellError::UnknownCommand(command.clone())),
    }
}

fn print_help() {
    println!("\n{}", "Commands:".bold());
    for (usage, description) in HELP {
        println!("  {:<38} {}", usage.cyan(), description);
    }
    println!();
}

/// Run one parsed command. Returns `false` when the shell should exit.
async fn execute(
    dispatcher: &InvocationDispatcher,
    command: ShellCommand,
    cancel: &CancellationToken,
) -> Result<bool> {
    let manager = dispatcher.manager();
    match command {
        ShellCommand::Empty => {}
        ShellCommand::Help => print_help(),
        ShellCommand::Exit => return Ok(false),
        ShellCommand::Status => print_status_table(&manager.status()),
        ShellCommand::Connect(Some(server)) => {
            manager.connect(&server, cancel).await?;
            println!("{} {}", "Connected:".green(), server);
        }
        ShellCommand::Connect(None) => {
            for (server, result) in manager.connect_all(cancel).await {
                match result {
                    Ok(()) => println!("{} {}", "Connected:".green(), server),
                    Err(err) => {
                        print!("{}: ", server);
                        print_error(&err);
                    }
                }
            }
        }
        ShellCommand::Disconnect(Some(server)) => {
            if manager.disconnect(&server).await {
                println!("{} {}", "Disconnected:".yellow(), server);
            } else {
                println!("{} is not connected", server);
            }
        }
        ShellCommand::Disconnect(None) => {
            manager.disconnect_all().await;
            println!("{}", "Disconnected all servers".yellow());
        }
        ShellCommand::Tools(server) => {
            let tools = dispatcher.list_tools(&server, cancel).await?;
            print_tools_table(&server, &tools);
        }
        ShellCommand::Call { server, tool, args } => {
            let params = parse_key_value_args(&args)?;
            let params = (!params.is_empty()).then(|| serde_json::Value::Object(params));
            let response = dispatcher.call_tool(&server, &tool, params, cancel).await?;
            print_tool_result(&response);
        }
    }
    Ok(true)
}

/// Run the interactive shell until `exit` or end of input.
pub async fn run_shell(dispatcher: &InvocationDispatcher) -> Result<()> {
    let mut rl = DefaultEditor::new()?;

    println!("{}", "Conductor interactive shell".bold());
    println!("Type {} for commands, {} to leave.\n", "help".cyan(), "exit".cyan());

    loop {
        let line = match rl.readline(&format!("{} ", "conductor>".green())) {
            Ok(line) => line,
            Err(ReadlineError::Interrupted) => continue,
            Err(ReadlineError::Eof) => break,
            Err(e) => return Err(e.into()),
        };
        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }
        rl.add_history_entry(trimmed)?;

        let command = match parse_shell_command(trimmed) {
            Ok(command) => command,
            Err(e) => {
                println!("{}", e.to_string().red());
                continue;
            }
        };

        let cancel = CancellationToken::new();
        let outcome = tokio::select! {
            outcome = execute(dispatcher, command, &cancel) => outcome,
            _ = tokio::signal::ctrl_c() => {
                cancel.cancel();
                println!("{}", "Cancelled".yellow());
                Ok(true)
            }
        };

        match outcome {
            Ok(true) => {}
            Ok(false) => break,
            Err(err) => print_error(&err),
        }
    }

    dispatcher.manager().disconnect_all().await;
    println!("Goodbye.");
    Ok(())
}
