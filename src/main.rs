//! Conductor - MCP connection and invocation manager CLI
//!
//! Main entry point for the conductor binary.

use anyhow::Result;

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use conductor::cli::Cli;
use conductor::commands;
use conductor::config::Config;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse_args();

    init_tracing(cli.verbose, cli.json_logs);

    tracing::debug!("Loading configuration from {}", cli.config);
    let config = Config::load(&cli.config)?;
    config.validate()?;

    commands::run(cli.command, config).await
}

/// Initialize tracing subscriber with environment filter.
///
/// `RUST_LOG` wins when set. Logs go to stderr so tool output on stdout
/// stays clean.
fn init_tracing(verbose: bool, json: bool) {
    let default_level = if verbose {
        "conductor=debug"
    } else {
        "conductor=info"
    };
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    let registry = tracing_subscriber::registry().with(env_filter);
    if json {
        registry
            .with(
                tracing_subscriber::fmt::layer()
                    .json()
                    .with_writer(std::io::stderr),
            )
            .init();
    } else {
        registry
            .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
            .init();
    }
}
