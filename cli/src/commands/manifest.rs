// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Service manifest commands
//!
//! Commands: validate, plan

use anyhow::{Context, Result};
use clap::Subcommand;
use colored::Colorize;
use std::path::{Path, PathBuf};

use launchpad_core::application::reconciler::{ReconcileOperation, ReconcilePlan};
use launchpad_core::domain::config::OrchestratorConfigManifest;
use launchpad_core::domain::environment::{
    Environment, IngressSettings, Project, ProjectId, ProjectSettings, ProviderKind, ProviderSettings,
};
use launchpad_core::domain::manifest::{is_alphanumeric_dash, Manifest};

#[derive(Subcommand)]
pub enum ManifestCommand {
    /// Parse and validate a service manifest
    Validate {
        /// Manifest YAML file
        #[arg(value_name = "FILE")]
        file: PathBuf,
    },

    /// Print the ordered reconcile steps for a manifest
    Plan {
        /// Manifest YAML file
        #[arg(value_name = "FILE")]
        file: PathBuf,

        /// Plan development mode instead of a regular deploy
        #[arg(long, conflicts_with = "destroy")]
        dev: bool,

        /// Plan the teardown
        #[arg(long)]
        destroy: bool,

        /// Target namespace
        #[arg(long, default_value = "launchpad")]
        namespace: String,

        /// Plan for a cluster with ingress on this domain
        #[arg(long, value_name = "DOMAIN")]
        ingress_domain: Option<String>,
    },
}

pub async fn handle_command(command: ManifestCommand, config_override: Option<PathBuf>) -> Result<()> {
    match command {
        ManifestCommand::Validate { file } => {
            let manifest = load(&file)?;
            println!(
                "{}",
                format!(
                    "✓ Manifest '{}' is valid ({} container(s), {} volume(s))",
                    manifest.name,
                    manifest.containers.len(),
                    manifest.volumes.len()
                )
                .green()
            );
            Ok(())
        }
        ManifestCommand::Plan {
            file,
            dev,
            destroy,
            namespace,
            ingress_domain,
        } => {
            let operation = match (dev, destroy) {
                (_, true) => ReconcileOperation::Destroy,
                (true, false) => ReconcileOperation::DevDeploy,
                (false, false) => ReconcileOperation::Deploy,
            };
            let manifest = load(&file)?;
            let config = OrchestratorConfigManifest::load_or_default(config_override)
                .context("Failed to load configuration")?;
            let env = plan_environment(&namespace, ingress_domain, &config)?;
            let plan = ReconcilePlan::build(operation, &manifest, &env, &[])
                .with_context(|| format!("Cannot plan {} for '{}'", operation, manifest.name))?;
            print!("{}", plan);
            Ok(())
        }
    }
}

fn load(path: &Path) -> Result<Manifest> {
    let yaml = std::fs::read_to_string(path).with_context(|| format!("Failed to read manifest {:?}", path))?;
    let manifest = Manifest::parse(&yaml).with_context(|| format!("Invalid manifest {:?}", path))?;
    manifest
        .validate()
        .with_context(|| format!("Invalid manifest {:?}", path))?;
    Ok(manifest)
}

/// Environment used for offline planning: a cluster target when an ingress
/// domain is given, the demo sandbox otherwise.
fn plan_environment(
    namespace: &str,
    ingress_domain: Option<String>,
    config: &OrchestratorConfigManifest,
) -> Result<Environment> {
    let provider = match ingress_domain {
        Some(domain) => ProviderSettings {
            kind: ProviderKind::K8,
            ingress: Some(IngressSettings {
                domain,
                ..Default::default()
            }),
            ..Default::default()
        },
        None => ProviderSettings::demo(),
    };
    let project = Project {
        id: ProjectId::from(namespace),
        name: namespace.to_string(),
        dns_name: namespace.to_string(),
        settings: ProjectSettings {
            provider,
            ..Default::default()
        },
    };
    let env = Environment::for_project(&project, config.spec.dns.as_ref(), None);
    if env.name.is_empty() || !is_alphanumeric_dash(&env.name) {
        anyhow::bail!("Invalid namespace '{}'", namespace);
    }
    Ok(env)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_plan_environment() {
        let config = OrchestratorConfigManifest::default();
        let env = plan_environment("shop", None, &config).unwrap();
        assert!(env.is_demo());
        assert!(!env.is_ingress());

        let env = plan_environment("shop", Some("apps.example.com".into()), &config).unwrap();
        assert!(env.is_ingress());

        assert!(plan_environment("bad_ns", None, &config).is_err());
    }

    #[tokio::test]
    async fn test_plan_rejects_ingress_without_domain() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("web.yaml");
        std::fs::write(
            &file,
            "name: web\ncontainers:\n  web:\n    image: x\n    ingress:\n      - host: www\n        path: /\n        port: \"80\"\n",
        )
        .unwrap();

        let command = ManifestCommand::Plan {
            file: file.clone(),
            dev: false,
            destroy: false,
            namespace: "shop".into(),
            ingress_domain: None,
        };
        assert!(handle_command(command, None).await.is_err());

        let command = ManifestCommand::Plan {
            file,
            dev: false,
            destroy: false,
            namespace: "shop".into(),
            ingress_domain: Some("apps.example.com".into()),
        };
        handle_command(command, None).await.unwrap();
    }

    #[tokio::test]
    async fn test_validate_reports_invalid_manifest() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("bad.yaml");
        std::fs::write(&file, "name: web\ncontainers: {}\n").unwrap();
        let command = ManifestCommand::Validate { file };
        assert!(handle_command(command, None).await.is_err());
    }
}
