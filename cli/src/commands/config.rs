// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Configuration management commands
//!
//! Commands: show, validate

use anyhow::{Context, Result};
use clap::Subcommand;
use colored::Colorize;
use std::path::PathBuf;

use launchpad_core::domain::config::OrchestratorConfigManifest;

#[derive(Subcommand)]
pub enum ConfigCommand {
    /// Show current configuration
    Show {
        /// Show config file paths checked
        #[arg(long)]
        paths: bool,

        /// Print the effective configuration as YAML
        #[arg(long)]
        yaml: bool,
    },

    /// Validate configuration file
    Validate {
        /// Path to config file (default: discover)
        #[arg(value_name = "FILE")]
        file: Option<PathBuf>,
    },
}

pub async fn handle_command(command: ConfigCommand, config_override: Option<PathBuf>) -> Result<()> {
    match command {
        ConfigCommand::Show { paths, yaml } => show(config_override, paths, yaml),
        ConfigCommand::Validate { file } => validate(file.or(config_override)),
    }
}

fn show(config_override: Option<PathBuf>, show_paths: bool, as_yaml: bool) -> Result<()> {
    let config =
        OrchestratorConfigManifest::load_or_default(config_override.clone()).context("Failed to load configuration")?;

    if show_paths {
        println!("{}", "Configuration discovery paths:".bold());
        if let Some(path) = &config_override {
            println!("  1. --config flag: {}", path.display());
        } else {
            println!("  1. --config flag: {}", "(not set)".dimmed());
        }
        println!(
            "  2. LAUNCHPAD_CONFIG_PATH: {}",
            std::env::var("LAUNCHPAD_CONFIG_PATH")
                .unwrap_or_else(|_| "(not set)".to_string())
                .dimmed()
        );
        println!("  3. ./launchpad-config.yaml");
        println!("  4. ~/.launchpad/config.yaml");
        println!("  5. /etc/launchpad/config.yaml");
        println!();
    }

    if as_yaml {
        print!("{}", config.to_yaml()?);
        return Ok(());
    }

    let spec = &config.spec;
    println!("{}", "Current configuration:".bold());
    println!("  Name: {}", config.metadata.name);
    println!();

    println!("{}", "Server:".bold());
    println!("  Listen: {}:{}", spec.server.bind_address, spec.server.port);
    println!();

    println!("{}", "Persistence:".bold());
    match &spec.database.url {
        Some(_) => println!("  PostgreSQL (max {} connections)", spec.database.max_connections),
        None => println!("  In-memory {}", "(state is lost on restart)".yellow()),
    }
    println!();

    println!("{}", "Providers:".bold());
    match &spec.sandbox {
        Some(sandbox) => println!("  Demo services: shared cluster at {}", sandbox.endpoint),
        None => println!("  Demo services: in-process sandbox"),
    }
    match &spec.dns {
        Some(dns) if dns.is_configured() => {
            println!("  DNS: hosted zone {} ({})", dns.hosted_zone, dns.region)
        }
        _ => println!("  DNS: {}", "(disabled)".dimmed()),
    }
    println!();

    println!("{}", "Operations:".bold());
    println!("  Max concurrent: {}", spec.operations.max_concurrent);
    println!("  Shutdown ceiling: {}s", spec.operations.shutdown_timeout_secs);
    println!(
        "  Self-healing: every {}s, stale after {}s",
        spec.reconciler.sweep_interval_secs, spec.reconciler.stale_after_secs
    );
    println!(
        "  Demo expiry: every {}s, ttl {}s, actor '{}'",
        spec.reconciler.expiry_interval_secs, spec.reconciler.demo_ttl_secs, spec.reconciler.system_actor
    );
    println!();

    println!("{}", "Notification hub:".bold());
    let secret = if spec.hub.jwt_secret.is_empty() {
        "(not set)".red().to_string()
    } else {
        "(set)".green().to_string()
    };
    println!("  JWT secret: {}", secret);
    println!("  Send buffer: {}", spec.hub.send_buffer);
    println!();

    println!("{}", "Observability:".bold());
    println!(
        "  Logging: {} ({})",
        spec.observability.logging.level, spec.observability.logging.format
    );
    if spec.observability.metrics.enabled {
        println!("  Metrics: port {}", spec.observability.metrics.port);
    } else {
        println!("  Metrics: {}", "(disabled)".dimmed());
    }

    Ok(())
}

fn validate(config_path: Option<PathBuf>) -> Result<()> {
    println!("Validating configuration...");

    let config = OrchestratorConfigManifest::load_or_default(config_path).context("Failed to load configuration")?;

    config.validate().context("Configuration validation failed")?;

    println!("{}", "✓ Configuration is valid".green());

    Ok(())
}
