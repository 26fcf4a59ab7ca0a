//! Hephaestus CLI entry point.

use anyhow::{Context, Result};
use clap::Parser;
use std::sync::Arc;
use tokio::sync::watch;

use hephaestus::app::App;
use hephaestus::cli::{commands, Cli, Commands};
use hephaestus::infrastructure::{logging, ConfigLoader};

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = match &cli.config {
        Some(path) => ConfigLoader::load_from_file(path)?,
        None => ConfigLoader::load().context("Failed to load configuration")?,
    };
    let _log_guard = logging::init(&config.logging)?;

    let app = Arc::new(App::build(config).await?);

    match cli.command {
        Commands::Serve => {
            let (shutdown_tx, shutdown_rx) = watch::channel(false);

            tokio::spawn(async move {
                if let Err(e) = tokio::signal::ctrl_c().await {
                    tracing::error!(error = %e, "Failed to listen for shutdown signal");
                    return;
                }
                tracing::info!("Shutdown signal received; draining");
                let _ = shutdown_tx.send(true);
            });

            app.serve(shutdown_rx).await?;
        }
        Commands::Task(command) => commands::handle_task(&app, command).await?,
        Commands::Queue(command) => commands::handle_queue(&app, command).await?,
        Commands::Ticket(command) => commands::handle_ticket(&app, command).await?,
        Commands::Workflow(command) => commands::handle_workflow(&app, command).await?,
    }

    Ok(())
}
