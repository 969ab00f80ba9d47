// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

// Orchestrator Configuration
//
// Kubernetes-style manifest (apiVersion/kind/metadata/spec) describing one
// control plane process:
// - HTTP bind address for the hub endpoint
// - Persistence (Postgres URL, or in-memory when absent)
// - DNS hosted zone and the shared sandbox cluster
// - Hub, operation pool and self-healing cadence
// - Logging and metrics

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::domain::environment::{DnsSettings, IngressSettings, ProviderKind, ProviderSettings};

pub const API_VERSION: &str = "launchpad.dev/v1";
pub const KIND: &str = "OrchestratorConfig";

/// Top-level configuration manifest
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrchestratorConfigManifest {
    /// API version (must be "launchpad.dev/v1")
    #[serde(rename = "apiVersion")]
    pub api_version: String,

    /// Resource kind (must be "OrchestratorConfig")
    pub kind: String,

    pub metadata: ManifestMetadata,

    #[serde(default)]
    pub spec: OrchestratorConfigSpec,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ManifestMetadata {
    pub name: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub labels: Option<HashMap<String, String>>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct OrchestratorConfigSpec {
    #[serde(default)]
    pub server: ServerConfig,

    #[serde(default)]
    pub database: DatabaseConfig,

    /// External DNS hosted zone. Absent disables DNS records.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dns: Option<DnsSettings>,

    /// Shared cluster hosting demo services. Absent keeps demo services on
    /// the in-process sandbox.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sandbox: Option<SandboxClusterConfig>,

    #[serde(default)]
    pub hub: HubConfig,

    #[serde(default)]
    pub operations: OperationsConfig,

    #[serde(default)]
    pub reconciler: ReconcilerConfig,

    #[serde(default)]
    pub observability: ObservabilityConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_bind_address")]
    pub bind_address: String,

    #[serde(default = "default_api_port")]
    pub port: u16,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    /// Postgres connection string; in-memory repositories when absent
    #[serde(skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,

    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SandboxClusterConfig {
    pub endpoint: String,
    pub username: String,
    pub password: String,
    pub ca_cert: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ingress: Option<IngressSettings>,
}

impl SandboxClusterConfig {
    pub fn provider_settings(&self) -> ProviderSettings {
        ProviderSettings {
            kind: ProviderKind::Demo,
            username: self.username.clone(),
            password: self.password.clone(),
            endpoint: self.endpoint.clone(),
            ca_cert: self.ca_cert.clone(),
            ingress: self.ingress.clone(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HubConfig {
    /// HS256 secret used to verify connection tokens
    #[serde(default)]
    pub jwt_secret: String,

    #[serde(default = "default_send_buffer")]
    pub send_buffer: usize,

    #[serde(default = "default_auth_timeout")]
    pub auth_timeout_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OperationsConfig {
    #[serde(default = "default_max_concurrent")]
    pub max_concurrent: usize,

    /// Ceiling on waiting for in-flight operations at shutdown
    #[serde(default = "default_shutdown_timeout")]
    pub shutdown_timeout_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReconcilerConfig {
    #[serde(default = "default_sweep_interval")]
    pub sweep_interval_secs: u64,

    #[serde(default = "default_stale_after")]
    pub stale_after_secs: u64,

    #[serde(default = "default_recent_activity")]
    pub recent_activity_secs: u64,

    #[serde(default = "default_expiry_interval")]
    pub expiry_interval_secs: u64,

    #[serde(default = "default_demo_ttl")]
    pub demo_ttl_secs: u64,

    /// Actor recorded on activities started by the expiry sweep
    #[serde(default = "default_system_actor")]
    pub system_actor: String,
}

impl ReconcilerConfig {
    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs)
    }

    pub fn stale_after(&self) -> Duration {
        Duration::from_secs(self.stale_after_secs)
    }

    pub fn recent_activity(&self) -> Duration {
        Duration::from_secs(self.recent_activity_secs)
    }

    pub fn expiry_interval(&self) -> Duration {
        Duration::from_secs(self.expiry_interval_secs)
    }

    pub fn demo_ttl(&self) -> Duration {
        Duration::from_secs(self.demo_ttl_secs)
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ObservabilityConfig {
    #[serde(default)]
    pub logging: LoggingConfig,

    #[serde(default)]
    pub metrics: MetricsConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level (e.g., "info", "debug", "trace")
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Output format ("json" or "text")
    #[serde(default = "default_log_format")]
    pub format: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricsConfig {
    #[serde(default)]
    pub enabled: bool,

    #[serde(default = "default_metrics_port")]
    pub port: u16,
}

// Default value functions
fn default_bind_address() -> String {
    "0.0.0.0".to_string()
}

fn default_api_port() -> u16 {
    8080
}

fn default_max_connections() -> u32 {
    5
}

fn default_send_buffer() -> usize {
    256
}

fn default_auth_timeout() -> u64 {
    30
}

fn default_max_concurrent() -> usize {
    32
}

fn default_shutdown_timeout() -> u64 {
    900
}

fn default_sweep_interval() -> u64 {
    60
}

fn default_stale_after() -> u64 {
    900
}

fn default_recent_activity() -> u64 {
    300
}

fn default_expiry_interval() -> u64 {
    600
}

fn default_demo_ttl() -> u64 {
    3600
}

fn default_system_actor() -> String {
    "bot".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "text".to_string()
}

fn default_metrics_port() -> u16 {
    9090
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_address: default_bind_address(),
            port: default_api_port(),
        }
    }
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: None,
            max_connections: default_max_connections(),
        }
    }
}

impl Default for HubConfig {
    fn default() -> Self {
        Self {
            jwt_secret: String::new(),
            send_buffer: default_send_buffer(),
            auth_timeout_secs: default_auth_timeout(),
        }
    }
}

impl Default for OperationsConfig {
    fn default() -> Self {
        Self {
            max_concurrent: default_max_concurrent(),
            shutdown_timeout_secs: default_shutdown_timeout(),
        }
    }
}

impl Default for ReconcilerConfig {
    fn default() -> Self {
        Self {
            sweep_interval_secs: default_sweep_interval(),
            stale_after_secs: default_stale_after(),
            recent_activity_secs: default_recent_activity(),
            expiry_interval_secs: default_expiry_interval(),
            demo_ttl_secs: default_demo_ttl(),
            system_actor: default_system_actor(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
        }
    }
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            port: default_metrics_port(),
        }
    }
}

impl Default for OrchestratorConfigManifest {
    fn default() -> Self {
        let hostname = hostname::get()
            .ok()
            .and_then(|h| h.into_string().ok())
            .unwrap_or_else(|| "launchpad".to_string());

        Self {
            api_version: API_VERSION.to_string(),
            kind: KIND.to_string(),
            metadata: ManifestMetadata {
                name: hostname,
                labels: None,
            },
            spec: OrchestratorConfigSpec::default(),
        }
    }
}

impl OrchestratorConfigManifest {
    /// Load configuration from YAML file
    pub fn from_yaml_file(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config = serde_yaml::from_str(&content)?;
        Ok(config)
    }

    pub fn from_yaml_str(yaml: &str) -> anyhow::Result<Self> {
        let config = serde_yaml::from_str(yaml)?;
        Ok(config)
    }

    pub fn to_yaml(&self) -> anyhow::Result<String> {
        Ok(serde_yaml::to_string(self)?)
    }

    /// Discover configuration file using precedence order
    /// 1. LAUNCHPAD_CONFIG_PATH environment variable
    /// 2. ./launchpad-config.yaml (working directory)
    /// 3. ~/.launchpad/config.yaml (user home)
    /// 4. /etc/launchpad/config.yaml
    pub fn discover_config() -> Option<PathBuf> {
        if let Ok(path) = std::env::var("LAUNCHPAD_CONFIG_PATH") {
            let path = PathBuf::from(path);
            if path.exists() {
                return Some(path);
            }
        }

        let cwd = PathBuf::from("./launchpad-config.yaml");
        if cwd.exists() {
            return Some(cwd);
        }

        if let Some(home) = dirs::home_dir() {
            let user_config = home.join(".launchpad").join("config.yaml");
            if user_config.exists() {
                return Some(user_config);
            }
        }

        let system_config = PathBuf::from("/etc/launchpad/config.yaml");
        if system_config.exists() {
            return Some(system_config);
        }

        None
    }

    /// Load configuration with discovery, fallback to default
    pub fn load_or_default(cli_path: Option<PathBuf>) -> anyhow::Result<Self> {
        // Explicit CLI path fails if missing or invalid
        if let Some(path) = cli_path {
            tracing::info!("Loading configuration from explicit path: {:?}", path);
            let mut config = Self::from_yaml_file(&path)
                .map_err(|e| anyhow::anyhow!("Failed to load config at {:?}: {}", path, e))?;
            config.apply_env_overrides();
            return Ok(config);
        }

        let mut config = if let Some(config_path) = Self::discover_config() {
            tracing::info!("Loading configuration from discovered path: {:?}", config_path);
            Self::from_yaml_file(config_path)?
        } else {
            tracing::warn!("No configuration file found in standard locations. Using defaults.");
            Self::default()
        };
        config.apply_env_overrides();
        Ok(config)
    }

    /// Apply environment variable overrides to configuration
    pub fn apply_env_overrides(&mut self) {
        self.apply_overrides(|key| std::env::var(key).ok());
    }

    fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(url) = lookup("LAUNCHPAD_DATABASE_URL") {
            tracing::info!("Environment override: LAUNCHPAD_DATABASE_URL");
            self.spec.database.url = Some(url);
        }
        if let Some(secret) = lookup("LAUNCHPAD_HUB_JWT_SECRET") {
            self.spec.hub.jwt_secret = secret;
        }

        let dns_keys = [
            "LAUNCHPAD_DNS_ACCESS_KEY",
            "LAUNCHPAD_DNS_SECRET_KEY",
            "LAUNCHPAD_DNS_HOSTED_ZONE",
            "LAUNCHPAD_DNS_HOSTED_ZONE_ID",
        ];
        if dns_keys.iter().any(|k| lookup(k).is_some()) {
            let dns = self.spec.dns.get_or_insert_with(|| DnsSettings {
                region: "us-east-1".to_string(),
                ..Default::default()
            });
            if let Some(v) = lookup("LAUNCHPAD_DNS_ACCESS_KEY") {
                dns.access_key = v;
            }
            if let Some(v) = lookup("LAUNCHPAD_DNS_SECRET_KEY") {
                dns.secret_key = v;
            }
            if let Some(v) = lookup("LAUNCHPAD_DNS_HOSTED_ZONE") {
                dns.hosted_zone = v;
            }
            if let Some(v) = lookup("LAUNCHPAD_DNS_HOSTED_ZONE_ID") {
                dns.hosted_zone_id = v;
            }
        }
    }

    /// Validate configuration
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.api_version != API_VERSION {
            anyhow::bail!("Invalid apiVersion: '{}'. Must be '{}'", self.api_version, API_VERSION);
        }
        if self.kind != KIND {
            anyhow::bail!("Invalid kind: '{}'. Must be '{}'", self.kind, KIND);
        }
        if self.metadata.name.is_empty() {
            anyhow::bail!("metadata.name cannot be empty");
        }

        let spec = &self.spec;
        if spec.hub.send_buffer == 0 {
            anyhow::bail!("spec.hub.send_buffer must be greater than zero");
        }
        if spec.operations.max_concurrent == 0 {
            anyhow::bail!("spec.operations.max_concurrent must be greater than zero");
        }
        if spec.reconciler.sweep_interval_secs == 0 || spec.reconciler.expiry_interval_secs == 0 {
            anyhow::bail!("spec.reconciler intervals must be greater than zero");
        }
        if spec.reconciler.recent_activity_secs >= spec.reconciler.stale_after_secs {
            anyhow::bail!("spec.reconciler.recent_activity_secs must be shorter than stale_after_secs");
        }
        if spec.reconciler.system_actor.is_empty() {
            anyhow::bail!("spec.reconciler.system_actor cannot be empty");
        }
        if let Some(dns) = &spec.dns {
            if !dns.is_configured() {
                anyhow::bail!("spec.dns requires access_key, secret_key, hosted_zone and hosted_zone_id");
            }
        }
        if let Some(sandbox) = &spec.sandbox {
            let mut provider = sandbox.provider_settings();
            provider.kind = ProviderKind::K8;
            provider
                .validate()
                .map_err(|e| anyhow::anyhow!("spec.sandbox: {}", e.message))?;
        }
        match spec.observability.logging.format.as_str() {
            "json" | "text" => {}
            other => anyhow::bail!("Invalid logging format '{}'. Expected json or text", other),
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_manifest() {
        let manifest = OrchestratorConfigManifest::default();
        assert_eq!(manifest.api_version, API_VERSION);
        assert_eq!(manifest.kind, KIND);
        assert!(!manifest.metadata.name.is_empty());
        assert_eq!(manifest.spec.server.port, 8080);
        assert_eq!(manifest.spec.hub.send_buffer, 256);
        assert_eq!(manifest.spec.reconciler.stale_after_secs, 900);
        assert!(manifest.validate().is_ok());
    }

    #[test]
    fn test_parse_partial_spec() {
        let yaml = r#"
apiVersion: launchpad.dev/v1
kind: OrchestratorConfig
metadata:
  name: cp-1
spec:
  database:
    url: postgres://localhost/launchpad
  reconciler:
    demo_ttl_secs: 120
  sandbox:
    endpoint: https://sandbox.example.com
    username: admin
    password: secret
    ca_cert: CERT
"#;
        let config = OrchestratorConfigManifest::from_yaml_str(yaml).expect("config should parse");
        assert_eq!(config.spec.database.url.as_deref(), Some("postgres://localhost/launchpad"));
        assert_eq!(config.spec.database.max_connections, 5);
        assert_eq!(config.spec.reconciler.demo_ttl_secs, 120);
        assert_eq!(config.spec.reconciler.sweep_interval_secs, 60);
        assert_eq!(
            config.spec.sandbox.as_ref().map(|s| s.provider_settings().kind),
            Some(ProviderKind::Demo)
        );
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validation() {
        let mut manifest = OrchestratorConfigManifest::default();

        manifest.api_version = "wrong/v1".to_string();
        assert!(manifest.validate().is_err());
        manifest.api_version = API_VERSION.to_string();

        manifest.kind = "WrongKind".to_string();
        assert!(manifest.validate().is_err());
        manifest.kind = KIND.to_string();

        manifest.spec.reconciler.recent_activity_secs = 900;
        assert!(manifest.validate().is_err());
        manifest.spec.reconciler.recent_activity_secs = 300;

        manifest.spec.dns = Some(DnsSettings::default());
        assert!(manifest.validate().is_err());
        manifest.spec.dns = None;

        manifest.spec.observability.logging.format = "xml".to_string();
        assert!(manifest.validate().is_err());
    }

    #[test]
    fn test_env_overrides() {
        let mut manifest = OrchestratorConfigManifest::default();
        let vars: HashMap<&str, &str> = HashMap::from([
            ("LAUNCHPAD_DATABASE_URL", "postgres://db"),
            ("LAUNCHPAD_DNS_HOSTED_ZONE", "example.net."),
            ("LAUNCHPAD_HUB_JWT_SECRET", "s3cret"),
        ]);
        manifest.apply_overrides(|k| vars.get(k).map(|v| v.to_string()));

        assert_eq!(manifest.spec.database.url.as_deref(), Some("postgres://db"));
        assert_eq!(manifest.spec.hub.jwt_secret, "s3cret");
        let dns = manifest.spec.dns.expect("dns section created");
        assert_eq!(dns.hosted_zone, "example.net.");
        assert_eq!(dns.region, "us-east-1");
    }
}
