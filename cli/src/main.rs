// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! # Launchpad Control Plane
//!
//! The `launchpad` binary runs the deployment control plane and offers a few
//! offline operator commands.
//!
//! ## Commands
//!
//! - `launchpad serve` - Run the daemon (hub endpoint, sweeps, operation pool)
//! - `launchpad config show|validate` - Configuration management
//! - `launchpad manifest validate|plan` - Inspect a service manifest

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing::info;

use launchpad_core::domain::config::OrchestratorConfigManifest;
use launchpad_orchestrator::commands::{self, ConfigCommand, ManifestCommand};
use launchpad_orchestrator::daemon;

/// Launchpad - deployment control plane
#[derive(Parser)]
#[command(name = "launchpad")]
#[command(version, about, long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    /// Path to configuration file (overrides discovery)
    #[arg(
        short,
        long,
        global = true,
        env = "LAUNCHPAD_CONFIG_PATH",
        value_name = "FILE"
    )]
    config: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error); defaults to the configured level
    #[arg(long, global = true, env = "LAUNCHPAD_LOG_LEVEL")]
    log_level: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the control plane daemon
    #[command(name = "serve")]
    Serve {
        /// Bind address (default: server.bind_address)
        #[arg(long, env = "LAUNCHPAD_HOST")]
        host: Option<String>,

        /// HTTP port (default: server.port)
        #[arg(long, env = "LAUNCHPAD_PORT")]
        port: Option<u16>,
    },

    /// Configuration management
    #[command(name = "config")]
    Config {
        #[command(subcommand)]
        command: ConfigCommand,
    },

    /// Service manifest tools
    #[command(name = "manifest")]
    Manifest {
        #[command(subcommand)]
        command: ManifestCommand,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    match cli.command {
        Commands::Serve { host, port } => {
            let config = OrchestratorConfigManifest::load_or_default(cli.config)
                .context("Failed to load configuration")?;
            config.validate().context("Configuration validation failed")?;

            let logging = &config.spec.observability.logging;
            init_logging(cli.log_level.as_deref().unwrap_or(&logging.level), &logging.format)?;
            info!("Configuration loaded: {}", config.metadata.name);

            daemon::start_server(config, host, port).await
        }
        Commands::Config { command } => {
            init_logging(cli.log_level.as_deref().unwrap_or("warn"), "text")?;
            commands::config::handle_command(command, cli.config).await
        }
        Commands::Manifest { command } => {
            init_logging(cli.log_level.as_deref().unwrap_or("warn"), "text")?;
            commands::manifest::handle_command(command, cli.config).await
        }
    }
}

/// Initialize tracing subscriber for logging
fn init_logging(level: &str, format: &str) -> Result<()> {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .or_else(|_| tracing_subscriber::EnvFilter::try_new(level))
        .context("Failed to create log filter")?;

    if format == "json" {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .json()
            .with_current_span(false)
            .init();
        return Ok(());
    }

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
        .compact()
        .init();

    Ok(())
}
