//! `servers` and `check` subcommands

use colored::Colorize;
use tokio_util::sync::CancellationToken;

use crate::commands::{print_error, print_status_table};
use crate::error::Result;
use crate::mcp::InvocationDispatcher;

/// Print every configured server and its connection state.
pub fn list_servers(dispatcher: &InvocationDispatcher) {
    println!("\nConfigured MCP servers:");
    print_status_table(&dispatcher.manager().status());
}

/// Connect to every enabled server concurrently and report each outcome.
///
/// # Errors
///
/// Fails when at least one server could not be connected.
pub async fn check_servers(dispatcher: &InvocationDispatcher, cancel: &CancellationToken) -> Result<()> {
    let results = dispatcher.manager().connect_all(cancel).await;
    if results.is_empty() {
        println!("{}", "No enabled servers to check.".yellow());
        return Ok(());
    }

    let mut failed = 0usize;
    for (id, result) in &results {
        match result {
            Ok(()) => println!("{} {}", "✓".green(), id),
            Err(err) => {
                failed += 1;
                print!("{} {}: ", "✗".red(), id);
                print_error(err);
            }
        }
    }
    println!();
    print_status_table(&dispatcher.manager().status());

    if failed > 0 {
        anyhow::bail!("{} of {} servers failed to connect", failed, results.len());
    }
    Ok(())
}
