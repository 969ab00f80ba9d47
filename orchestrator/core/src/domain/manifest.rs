// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # Service Manifest
//!
//! The YAML document a user submits to describe a service: containers keyed
//! by name, named volumes and labels. Manifests travel base64-encoded and are
//! normalized on parse (port shorthand, ingress defaults, volume names and
//! sizes) so every later stage sees a single canonical shape.
//!
//! ```yaml
//! name: web
//! replicas: 1
//! containers:
//!   web:
//!     image: nginx:alpine
//!     ports: ["80"]
//!     environment:
//!       - DATABASE_URL=$database
//! volumes:
//!   data:
//!     persistent: true
//! ```
//!
//! # Architecture
//!
//! - **Layer:** Domain Layer
//! - **Purpose:** Manifest grammar, validation and derived port/ingress sets

use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use regex::Regex;
use serde::{Deserialize, Deserializer, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::fmt;
use std::sync::LazyLock;

use crate::domain::environment::{Environment, Secret, TlsKind};
use crate::domain::errors::{ErrorCode, ValidationError};

/// Placeholder resolved to the project name in ingress hosts.
pub const PROJECT_NAME_PLACEHOLDER: &str = "$PROJECT_NAME";
/// Prefix marking an environment value as a reference to a project secret.
pub const SECRET_PREFIX: char = '$';

const DEFAULT_REPLICAS: i32 = 1;
const DEFAULT_GRACE_PERIOD: i64 = 30;
const DEFAULT_VOLUME_SIZE: &str = "20Gi";

static NAME_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[a-zA-Z0-9][-a-zA-Z0-9]*$").expect("name pattern is valid"));

pub fn is_alphanumeric_dash(value: &str) -> bool {
    NAME_PATTERN.is_match(value)
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Manifest {
    #[serde(default)]
    pub name: String,
    #[serde(default = "default_replicas")]
    pub replicas: i32,
    #[serde(default = "default_grace_period")]
    pub grace_period: i64,
    #[serde(default, deserialize_with = "nullable_map")]
    pub containers: BTreeMap<String, Container>,
    #[serde(default, deserialize_with = "nullable_map", skip_serializing_if = "BTreeMap::is_empty")]
    pub volumes: BTreeMap<String, Volume>,
    #[serde(default, deserialize_with = "nullable_map", skip_serializing_if = "BTreeMap::is_empty")]
    pub labels: BTreeMap<String, String>,
}

fn default_replicas() -> i32 {
    DEFAULT_REPLICAS
}

fn default_grace_period() -> i64 {
    DEFAULT_GRACE_PERIOD
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Container {
    #[serde(default)]
    pub image: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub working_dir: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub command: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub args: Vec<String>,
    /// Volume name to mount point.
    #[serde(default, deserialize_with = "nullable_map", skip_serializing_if = "BTreeMap::is_empty")]
    pub mounts: BTreeMap<String, Mount>,
    #[serde(default, deserialize_with = "port_list", skip_serializing_if = "Vec::is_empty")]
    pub ports: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub ingress: Vec<IngressRule>,
    #[serde(default, deserialize_with = "port_list", skip_serializing_if = "Vec::is_empty")]
    pub expose: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub environment: Vec<EnvVar>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resources: Option<Resources>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dev: Option<DevSettings>,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Volume {
    /// Always the key the volume is declared under.
    #[serde(default, skip_serializing)]
    pub name: String,
    #[serde(default)]
    pub persistent: bool,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub size: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Mount {
    #[serde(default)]
    pub path: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct IngressRule {
    #[serde(default)]
    pub host: String,
    #[serde(default)]
    pub path: String,
    #[serde(default, deserialize_with = "port_scalar")]
    pub port: String,
}

impl IngressRule {
    fn key(&self) -> (String, String, String) {
        (self.host.clone(), self.path.clone(), self.port.clone())
    }

    /// Public hostname of this rule in the given environment.
    pub fn hostname(&self, env: &Environment) -> String {
        let mut host = if self.host == PROJECT_NAME_PLACEHOLDER {
            env.project_name.clone()
        } else {
            self.host.clone()
        };
        let Some(ingress) = env.provider.ingress.as_ref() else {
            return host;
        };
        if ingress.append_project {
            host = format!("{}-dot-{}", host, env.name);
        }
        format!("{}.{}", host, ingress.domain)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Resources {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub limits: Option<ResourceQuantities>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub requests: Option<ResourceQuantities>,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ResourceQuantities {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub memory: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub cpu: String,
}

/// Development override of a container.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct DevSettings {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub image: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub command: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub args: Vec<String>,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub path: String,
    #[serde(default)]
    pub persistent: bool,
}

/// `NAME=value` container environment entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct EnvVar {
    pub name: String,
    pub value: String,
}

impl EnvVar {
    pub fn new(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
        }
    }
}

impl TryFrom<String> for EnvVar {
    type Error = String;

    fn try_from(raw: String) -> Result<Self, Self::Error> {
        let trimmed = raw.strip_prefix('=').unwrap_or(&raw);
        match trimmed.split_once('=') {
            Some((name, value)) => Ok(EnvVar::new(name, value)),
            None => Err("Invalid environment variable syntax".to_string()),
        }
    }
}

impl From<EnvVar> for String {
    fn from(env: EnvVar) -> Self {
        format!("{}={}", env.name, env.value)
    }
}

impl fmt::Display for EnvVar {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}={}", self.name, self.value)
    }
}

/// Map whose entries (or the map itself) may be written as YAML `null`.
fn nullable_map<'de, D, T>(deserializer: D) -> Result<BTreeMap<String, T>, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de> + Default,
{
    let raw: Option<BTreeMap<String, Option<T>>> = Option::deserialize(deserializer)?;
    Ok(raw
        .unwrap_or_default()
        .into_iter()
        .map(|(k, v)| (k, v.unwrap_or_default()))
        .collect())
}

#[derive(Deserialize)]
#[serde(untagged)]
enum Scalar {
    Text(String),
    Int(i64),
}

impl From<Scalar> for String {
    fn from(value: Scalar) -> Self {
        match value {
            Scalar::Text(s) => s,
            Scalar::Int(i) => i.to_string(),
        }
    }
}

fn port_scalar<'de, D: Deserializer<'de>>(deserializer: D) -> Result<String, D::Error> {
    let raw: Option<Scalar> = Option::deserialize(deserializer)?;
    Ok(raw.map(String::from).unwrap_or_default())
}

fn port_list<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<String>, D::Error> {
    let raw: Option<Vec<Scalar>> = Option::deserialize(deserializer)?;
    Ok(raw.unwrap_or_default().into_iter().map(String::from).collect())
}

/// Pushes `value` unless already seen.
fn push_unique<T: Clone + Eq + std::hash::Hash>(out: &mut Vec<T>, seen: &mut HashSet<T>, value: T) {
    if seen.insert(value.clone()) {
        out.push(value);
    }
}

impl Manifest {
    /// Parses a YAML manifest and normalizes it. Does not validate.
    pub fn parse(yaml: &str) -> Result<Self, ValidationError> {
        let mut manifest: Manifest = serde_yaml::from_str(yaml)
            .map_err(|e| ValidationError::new(ErrorCode::InvalidYaml, e.to_string()))?;
        manifest.normalize();
        Ok(manifest)
    }

    /// Decodes a base64 manifest, parses and validates it.
    pub fn from_encoded(encoded: &str) -> Result<Self, ValidationError> {
        let bytes = BASE64
            .decode(encoded.trim())
            .map_err(|e| ValidationError::new(ErrorCode::InvalidBase64, e.to_string()))?;
        let yaml = String::from_utf8(bytes)
            .map_err(|e| ValidationError::new(ErrorCode::InvalidBase64, e.to_string()))?;
        let manifest = Self::parse(&yaml)?;
        manifest.validate()?;
        Ok(manifest)
    }

    pub fn encode(yaml: &str) -> String {
        BASE64.encode(yaml)
    }

    fn normalize(&mut self) {
        for container in self.containers.values_mut() {
            container.ports = container
                .ports
                .iter()
                .map(|p| {
                    let parts: Vec<&str> = p.splitn(4, ':').collect();
                    if parts.len() == 4 {
                        parts[3].to_string()
                    } else {
                        p.clone()
                    }
                })
                .collect();
            for rule in &mut container.ingress {
                if rule.host.is_empty() {
                    rule.host = self.name.clone();
                }
                if rule.path.is_empty() {
                    rule.path = "/".to_string();
                }
            }
        }
        for (name, volume) in self.volumes.iter_mut() {
            volume.name = name.clone();
            if volume.persistent && volume.size.is_empty() {
                volume.size = DEFAULT_VOLUME_SIZE.to_string();
            }
        }
    }

    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.name.is_empty() {
            return Err(ValidationError::new(ErrorCode::MissingName, "'service.name' is mandatory"));
        }
        if !is_alphanumeric_dash(&self.name) {
            return Err(ValidationError::new(
                ErrorCode::InvalidName,
                "'service.name' only allows alphanumeric characters or dashes",
            ));
        }
        if self.grace_period < 0 {
            return Err(ValidationError::new(
                ErrorCode::InvalidGracePeriod,
                "'service.grace_period' must be greater than zero or zero for no grace period",
            ));
        }
        if self.replicas < 1 {
            return Err(ValidationError::new(
                ErrorCode::InvalidReplicaCount,
                "'service.replicas' must be greater than zero",
            ));
        }
        if self.is_persistent() && self.replicas > 1 {
            return Err(ValidationError::new(
                ErrorCode::InvalidPersistentReplica,
                "persistent volumes can only be used with a single replica",
            ));
        }
        if self.containers.is_empty() {
            return Err(ValidationError::new(
                ErrorCode::InvalidContainerCount,
                "'service.containers' must define at least one container",
            ));
        }
        for (name, container) in &self.containers {
            if container.image.is_empty() {
                return Err(ValidationError::new(
                    ErrorCode::MissingContainerImage,
                    format!("{} must have an image defined", name),
                )
                .with("container", name.clone()));
            }
        }

        let mut dev_containers = 0;
        for (container_name, container) in &self.containers {
            if container.dev.is_some() {
                dev_containers += 1;
            }
            for volume_name in container.mounts.keys() {
                if !self.volumes.contains_key(volume_name) {
                    return Err(ValidationError::new(
                        ErrorCode::VolumeNotDefined,
                        format!("Volume '{}' in container '{}' not defined", volume_name, container_name),
                    )
                    .with("volume", volume_name.clone())
                    .with("container", container_name.clone()));
                }
            }
        }
        if dev_containers > 1 {
            return Err(ValidationError::new(
                ErrorCode::InvalidDevContainerCount,
                "Services can only have one container configured for development",
            ));
        }
        Ok(())
    }

    pub fn is_persistent(&self) -> bool {
        self.volumes.values().any(|v| v.persistent)
    }

    pub fn persistent_volumes(&self) -> impl Iterator<Item = &Volume> {
        self.volumes.values().filter(|v| v.persistent)
    }

    /// Unique container ports, exposed through a load balancer when no
    /// ingress is available.
    pub fn load_balancer_ports(&self) -> Vec<String> {
        let mut seen = HashSet::new();
        let mut out = Vec::new();
        for container in self.containers.values() {
            for port in &container.ports {
                push_unique(&mut out, &mut seen, port.clone());
            }
        }
        out
    }

    /// Explicit ingress rules, plus (when `all`) one root rule per container
    /// port. Deduplicated by host, path and port.
    pub fn ingress_rules(&self, all: bool) -> Vec<IngressRule> {
        let mut seen = HashSet::new();
        let mut out = Vec::new();
        for container in self.containers.values() {
            if all {
                for port in &container.ports {
                    let rule = IngressRule {
                        host: self.name.clone(),
                        path: "/".to_string(),
                        port: port.clone(),
                    };
                    if seen.insert(rule.key()) {
                        out.push(rule);
                    }
                }
            }
            for rule in &container.ingress {
                if seen.insert(rule.key()) {
                    out.push(rule.clone());
                }
            }
        }
        out
    }

    /// Ports reachable inside the cluster: ports, ingress ports and expose.
    pub fn private_ports(&self) -> Vec<String> {
        let mut seen = HashSet::new();
        let mut out = Vec::new();
        for container in self.containers.values() {
            for port in &container.ports {
                push_unique(&mut out, &mut seen, port.clone());
            }
            for rule in &container.ingress {
                push_unique(&mut out, &mut seen, rule.port.clone());
            }
            for port in &container.expose {
                push_unique(&mut out, &mut seen, port.clone());
            }
        }
        out
    }

    pub fn has_explicit_ingress(&self) -> bool {
        !self.ingress_rules(false).is_empty()
    }

    pub fn ingress_hostnames(&self, env: &Environment) -> Vec<String> {
        let mut seen = HashSet::new();
        let mut out = Vec::new();
        for rule in self.ingress_rules(true) {
            push_unique(&mut out, &mut seen, rule.hostname(env));
        }
        out
    }

    /// Name of the TLS secret backing the ingress, if TLS is configured.
    pub fn certificate_name(&self, env: &Environment) -> Option<String> {
        let tls = env.provider.tls()?;
        match tls.kind {
            TlsKind::FixCertificate => tls.certificate.as_ref().map(|c| c.secret.clone()),
            TlsKind::LetsEncrypt => Some(format!("{}-letsencrypt", self.name)),
        }
    }

    /// Claim name of a volume: `<volume>.<service>.<namespace>`.
    pub fn volume_claim_name(&self, volume: &Volume, env: &Environment) -> String {
        format!("{}.{}.{}", volume.name, self.name, env.name)
    }

    /// Resolves container environment values against project secrets.
    ///
    /// Empty values take the same-named secret. Values starting with `$`
    /// name a secret and are replaced by its value, or cleared if absent.
    pub fn inject_secrets(&mut self, secrets: &[Secret]) {
        let lookup: BTreeMap<&str, &str> = secrets
            .iter()
            .map(|s| (s.name.as_str(), s.value.as_str()))
            .collect();
        for container in self.containers.values_mut() {
            for env in &mut container.environment {
                if env.value.is_empty() {
                    if let Some(value) = lookup.get(env.name.as_str()) {
                        env.value = (*value).to_string();
                    }
                } else if let Some(reference) = env.value.strip_prefix(SECRET_PREFIX) {
                    env.value = lookup.get(reference).map(|v| (*v).to_string()).unwrap_or_default();
                }
            }
        }
    }
}
