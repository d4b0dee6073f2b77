//! KQSP CLI - interactive group chat entry point

use std::path::Path;

use anyhow::Context;
use clap::Parser;
use tracing::info;
use tracing_subscriber::EnvFilter;

use kqsp_cli::{app::ChatApp, cli::Cli, config::AppConfig};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Parse command line arguments
    let cli = Cli::parse();

    if cli.print_config {
        println!("{}", AppConfig::example_config());
        return Ok(());
    }

    // Load configuration and apply command line overrides
    let mut config = AppConfig::load(cli.config.as_deref().map(Path::new))
        .context("Failed to load configuration")?;
    config
        .apply_overrides(&cli)
        .context("Invalid command line options")?;

    setup_logging(config.cli.verbose);
    info!(
        host = %config.mesh.listen.host,
        port = config.mesh.listen.port,
        "Starting KQSP"
    );

    let mut app = ChatApp::new(config).context("Failed to create mesh node")?;
    app.run(&cli.connect).await.context("Chat session failed")?;

    info!("KQSP exited successfully");
    Ok(())
}

/// Setup logging based on verbosity level, honouring `RUST_LOG` when set
fn setup_logging(verbose: bool) {
    let default_level = if verbose { "debug" } else { "info" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
        .init();
}
