// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # Deployment Environment
//!
//! Project settings (provider, registry, secrets) as stored by the project
//! collaborator, and the [`Environment`]: the resolved, per-operation target a
//! reconciliation runs against. An environment is built fresh for every
//! operation and never cached, since provider credentials may rotate.
//!
//! # Architecture
//!
//! - **Layer:** Domain Layer
//! - **Purpose:** Target configuration and naming rules derived from it

use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

use crate::domain::errors::{ErrorCode, ValidationError};
use crate::domain::manifest::is_alphanumeric_dash;

pub const DEFAULT_REGISTRY_SERVER: &str = "https://index.docker.io/v1/";
const FALLBACK_HOSTED_ZONE: &str = "example.com";

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ProjectId(pub String);

impl fmt::Display for ProjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ProjectId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum ProviderKind {
    #[default]
    #[serde(rename = "demo")]
    Demo,
    #[serde(rename = "k8")]
    K8,
}

impl fmt::Display for ProviderKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProviderKind::Demo => f.write_str("demo"),
            ProviderKind::K8 => f.write_str("k8"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TlsKind {
    #[serde(rename = "fix-certificate")]
    FixCertificate,
    #[serde(rename = "letsencrypt")]
    LetsEncrypt,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct CertificateRef {
    #[serde(default)]
    pub secret: String,
    #[serde(default)]
    pub namespace: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TlsSettings {
    #[serde(rename = "type")]
    pub kind: TlsKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub certificate: Option<CertificateRef>,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct IngressSettings {
    #[serde(default)]
    pub append_project: bool,
    #[serde(default)]
    pub domain: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tls: Option<TlsSettings>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub annotations: BTreeMap<String, String>,
}

/// Cloud provider a project deploys to.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ProviderSettings {
    #[serde(rename = "type", default)]
    pub kind: ProviderKind,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub username: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub password: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub endpoint: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub ca_cert: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ingress: Option<IngressSettings>,
}

impl ProviderSettings {
    pub fn demo() -> Self {
        Self::default()
    }

    /// Ingress is usable only when a domain is configured.
    pub fn is_ingress(&self) -> bool {
        self.ingress.as_ref().is_some_and(|i| !i.domain.is_empty())
    }

    pub fn tls(&self) -> Option<&TlsSettings> {
        self.ingress.as_ref().and_then(|i| i.tls.as_ref())
    }

    pub fn validate(&self) -> Result<(), ValidationError> {
        let invalid = |msg: &str| Err(ValidationError::new(ErrorCode::InvalidProvider, msg));
        match self.kind {
            ProviderKind::Demo => Ok(()),
            ProviderKind::K8 => {
                if self.username.is_empty() {
                    return invalid("'provider.username' cannot be empty");
                }
                if self.password.is_empty() {
                    return invalid("'provider.password' cannot be empty");
                }
                if self.endpoint.is_empty() {
                    return invalid("'provider.endpoint' cannot be empty");
                }
                if self.ca_cert.is_empty() {
                    return invalid("'provider.ca_cert' cannot be empty");
                }
                let Some(ingress) = &self.ingress else {
                    return Ok(());
                };
                if ingress.domain.is_empty() {
                    return invalid("'provider.ingress.domain' cannot be empty");
                }
                let Some(tls) = &ingress.tls else {
                    return Ok(());
                };
                if tls.kind == TlsKind::FixCertificate {
                    let Some(cert) = &tls.certificate else {
                        return invalid("'provider.ingress.tls.certificate' cannot be empty");
                    };
                    if cert.secret.is_empty() {
                        return invalid("'provider.ingress.tls.certificate.secret' cannot be empty");
                    }
                    if cert.namespace.is_empty() {
                        return invalid("'provider.ingress.tls.certificate.namespace' cannot be empty");
                    }
                }
                Ok(())
            }
        }
    }
}

/// Docker registry credentials used for image pulls.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct RegistrySettings {
    #[serde(default)]
    pub server: String,
    #[serde(default)]
    pub username: String,
    #[serde(default)]
    pub password: String,
}

/// Route53-style hosted zone credentials.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct DnsSettings {
    #[serde(default)]
    pub access_key: String,
    #[serde(default)]
    pub secret_key: String,
    #[serde(default)]
    pub hosted_zone: String,
    #[serde(default)]
    pub hosted_zone_id: String,
    #[serde(default = "default_dns_region")]
    pub region: String,
}

fn default_dns_region() -> String {
    "us-east-1".to_string()
}

impl DnsSettings {
    pub fn is_configured(&self) -> bool {
        !self.access_key.is_empty()
            && !self.secret_key.is_empty()
            && !self.hosted_zone.is_empty()
            && !self.hosted_zone_id.is_empty()
    }

    pub fn zone(&self) -> &str {
        self.hosted_zone.trim_end_matches('.')
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Secret {
    pub name: String,
    #[serde(default)]
    pub value: String,
}

impl Secret {
    pub fn new(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ProjectSettings {
    #[serde(default)]
    pub provider: ProviderSettings,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub registry: Option<RegistrySettings>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub secrets: Vec<Secret>,
}

/// Read-only view of a project as supplied by the project collaborator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Project {
    pub id: ProjectId,
    pub name: String,
    /// Namespace-safe name; becomes the environment (and cluster namespace) name.
    pub dns_name: String,
    #[serde(default)]
    pub settings: ProjectSettings,
}

/// Resolved target for a single operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Environment {
    pub id: ProjectId,
    pub name: String,
    pub project_name: String,
    pub provider: ProviderSettings,
    pub registry: Option<RegistrySettings>,
    pub dns: Option<DnsSettings>,
}

impl Environment {
    /// Builds the environment for one operation.
    ///
    /// Demo projects are redirected to the shared sandbox cluster when one is
    /// configured; otherwise they stay on the in-process sandbox.
    pub fn for_project(
        project: &Project,
        dns: Option<&DnsSettings>,
        sandbox_cluster: Option<&ProviderSettings>,
    ) -> Self {
        let mut provider = project.settings.provider.clone();
        if provider.kind == ProviderKind::Demo {
            if let Some(cluster) = sandbox_cluster {
                provider = ProviderSettings {
                    kind: ProviderKind::Demo,
                    ..cluster.clone()
                };
            }
        }

        Self {
            id: project.id.clone(),
            name: project.dns_name.clone(),
            project_name: project.name.clone(),
            provider,
            registry: project.settings.registry.clone(),
            dns: dns.filter(|d| d.is_configured()).cloned(),
        }
    }

    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.name.is_empty() {
            return Err(ValidationError::new(
                ErrorCode::InvalidEnvironment,
                "'environment.name' is mandatory",
            ));
        }
        if !is_alphanumeric_dash(&self.name) {
            return Err(ValidationError::new(
                ErrorCode::InvalidEnvironment,
                "'environment.name' only allows alphanumeric characters or dashes",
            ));
        }
        self.provider.validate()
    }

    /// Whether this environment talks to a real cluster API.
    pub fn is_cluster_backed(&self) -> bool {
        self.provider.kind == ProviderKind::K8 || !self.provider.endpoint.is_empty()
    }

    pub fn is_demo(&self) -> bool {
        self.provider.kind == ProviderKind::Demo
    }

    pub fn is_ingress(&self) -> bool {
        self.provider.is_ingress()
    }

    pub fn is_dns_configured(&self) -> bool {
        self.dns.is_some()
    }

    /// Name of the dev service account, role and role binding.
    pub fn dev_name(&self) -> String {
        format!("{}-dev", self.name)
    }

    /// Registry credentials, only when both username and password are set.
    pub fn registry_credentials(&self) -> Option<&RegistrySettings> {
        self.registry
            .as_ref()
            .filter(|r| !r.username.is_empty() && !r.password.is_empty())
    }

    /// `.dockerconfigjson` payload for the registry pull secret.
    pub fn docker_config_json(&self) -> Option<String> {
        let registry = self.registry_credentials()?;
        let server = if registry.server.is_empty() {
            DEFAULT_REGISTRY_SERVER
        } else {
            registry.server.as_str()
        };
        let auth = BASE64.encode(format!("{}:{}", registry.username, registry.password));
        let config = serde_json::json!({
            "auths": {
                server: { "auth": auth }
            }
        });
        Some(config.to_string())
    }

    /// External DNS record name of a service, when DNS is configured.
    pub fn service_dns(&self, service_name: &str) -> Option<String> {
        self.dns
            .as_ref()
            .map(|dns| format!("{}.{}.{}", service_name, self.name, dns.zone()))
    }

    /// DNS suffix recorded on services once deployed.
    pub fn project_dns(&self) -> String {
        let zone = self.dns.as_ref().map(|d| d.zone()).unwrap_or(FALLBACK_HOSTED_ZONE);
        format!("{}.{}", self.name, zone)
    }
}
