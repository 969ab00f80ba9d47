// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # Resource Provider Contracts
//!
//! A [`ResourceProvider`] creates, updates, inspects and deletes one kind of
//! infrastructure object at a time inside a namespace. Providers never
//! block waiting for readiness: the reconciliation engine owns polling so
//! that every wait is bounded in one place.
//!
//! Two implementations exist: the cluster adapter (REST API of a real
//! cluster) and the in-process sandbox. A [`ProviderFactory`] selects one
//! per [`Environment`]. External DNS is a separate [`DnsRegistrar`].
//!
//! # Architecture
//!
//! - **Layer:** Domain Layer
//! - **Purpose:** Ports for infrastructure adapters (anti-corruption boundary)

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::net::IpAddr;
use std::sync::Arc;

use crate::domain::environment::Environment;
use crate::domain::manifest::Manifest;

/// Kinds of namespaced objects a provider manages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResourceKind {
    Namespace,
    ServiceAccount,
    Role,
    RoleBinding,
    Secret,
    VolumeClaim,
    Workload,
    NetworkService,
    Ingress,
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ResourceKind::Namespace => "namespace",
            ResourceKind::ServiceAccount => "service account",
            ResourceKind::Role => "role",
            ResourceKind::RoleBinding => "role binding",
            ResourceKind::Secret => "secret",
            ResourceKind::VolumeClaim => "volume claim",
            ResourceKind::Workload => "deployment",
            ResourceKind::NetworkService => "service",
            ResourceKind::Ingress => "ingress",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApplyOutcome {
    Created,
    Updated,
    /// Create-if-absent found the object already there.
    Existing,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeleteOutcome {
    Deleted,
    Absent,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VolumeClaimSpec {
    pub name: String,
    pub size: String,
}

/// Desired workload: the (already secret-injected) manifest plus the
/// environment-derived bits the object shape needs.
#[derive(Debug, Clone, PartialEq)]
pub struct WorkloadSpec {
    pub manifest: Manifest,
    /// Volume name to claim name, for persistent volumes.
    pub claims: BTreeMap<String, String>,
    pub pull_secret: Option<String>,
}

impl WorkloadSpec {
    pub fn name(&self) -> &str {
        &self.manifest.name
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct WorkloadStatus {
    pub replicas: i32,
    pub ready: i32,
    pub updated: i32,
    pub unavailable: i32,
    /// The counts describe the latest spec. Right after a replace they still
    /// describe the previous rollout until the controller catches up.
    pub observed: bool,
}

impl WorkloadStatus {
    pub fn is_ready(&self, desired: i32) -> bool {
        self.observed
            && self.ready == desired
            && self.replicas == desired
            && self.updated == desired
            && self.unavailable == 0
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NetworkServiceSpec {
    pub name: String,
    /// Workload the service selects.
    pub app: String,
    pub ports: Vec<String>,
    pub load_balancer: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IngressPath {
    pub host: String,
    pub path: String,
    pub port: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IngressTls {
    pub secret: String,
    pub hosts: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IngressSpec {
    pub name: String,
    pub service: String,
    pub annotations: BTreeMap<String, String>,
    pub paths: Vec<IngressPath>,
    pub tls: Option<IngressTls>,
}

/// External address of a load-balanced service.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LoadBalancerState {
    Missing,
    Pending,
    Ready(String),
}

/// Errors raised by provider and DNS adapters.
#[derive(Debug, thiserror::Error)]
pub enum ProviderError {
    #[error("{kind} '{name}' request failed ({status}): {message}")]
    Api {
        kind: ResourceKind,
        name: String,
        status: u16,
        message: String,
    },

    #[error("{0}")]
    Timeout(String),

    #[error("invalid provider configuration: {0}")]
    InvalidConfig(String),

    #[error("{0}")]
    Precondition(String),

    #[error("dns error: {0}")]
    Dns(String),

    #[error("transport error: {0}")]
    Transport(String),
}

impl From<reqwest::Error> for ProviderError {
    fn from(err: reqwest::Error) -> Self {
        ProviderError::Transport(err.to_string())
    }
}

#[async_trait]
pub trait ResourceProvider: Send + Sync {
    /// Short name used in logs.
    fn name(&self) -> &'static str;

    async fn exists(&self, namespace: &str, kind: ResourceKind, name: &str) -> Result<bool, ProviderError>;

    async fn delete(&self, namespace: &str, kind: ResourceKind, name: &str) -> Result<DeleteOutcome, ProviderError>;

    async fn ensure_namespace(&self, namespace: &str) -> Result<ApplyOutcome, ProviderError>;

    /// Service account, role and role binding named `name`, each created if
    /// absent.
    async fn ensure_dev_access(&self, namespace: &str, name: &str) -> Result<ApplyOutcome, ProviderError>;

    async fn dev_token(&self, namespace: &str, service_account: &str) -> Result<Option<String>, ProviderError>;

    async fn apply_registry_secret(
        &self,
        namespace: &str,
        name: &str,
        docker_config_json: &str,
    ) -> Result<ApplyOutcome, ProviderError>;

    /// Copies a TLS secret from `source_namespace` into `namespace`.
    async fn copy_tls_secret(
        &self,
        source_namespace: &str,
        name: &str,
        namespace: &str,
    ) -> Result<ApplyOutcome, ProviderError>;

    async fn ensure_volume_claim(&self, namespace: &str, claim: &VolumeClaimSpec) -> Result<ApplyOutcome, ProviderError>;

    async fn volume_claim_bound(&self, namespace: &str, name: &str) -> Result<bool, ProviderError>;

    async fn apply_workload(&self, namespace: &str, workload: &WorkloadSpec) -> Result<ApplyOutcome, ProviderError>;

    async fn workload_status(&self, namespace: &str, name: &str) -> Result<Option<WorkloadStatus>, ProviderError>;

    /// Creates the service, or replaces the ports of an existing one.
    async fn apply_network_service(
        &self,
        namespace: &str,
        service: &NetworkServiceSpec,
    ) -> Result<ApplyOutcome, ProviderError>;

    async fn load_balancer_state(&self, namespace: &str, name: &str) -> Result<LoadBalancerState, ProviderError>;

    async fn apply_ingress(&self, namespace: &str, ingress: &IngressSpec) -> Result<ApplyOutcome, ProviderError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DnsRecordType {
    A,
    #[serde(rename = "CNAME")]
    Cname,
}

impl DnsRecordType {
    pub fn as_str(&self) -> &'static str {
        match self {
            DnsRecordType::A => "A",
            DnsRecordType::Cname => "CNAME",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DnsRecord {
    /// Fully qualified, with trailing dot.
    pub name: String,
    pub target: String,
    pub record_type: DnsRecordType,
    pub ttl: u32,
}

impl DnsRecord {
    pub const TTL: u32 = 60;

    /// Record pointing `name` at a load balancer address: `A` for IPs,
    /// `CNAME` for hostnames.
    pub fn for_target(name: &str, target: &str) -> Self {
        let record_type = if target.parse::<IpAddr>().is_ok() {
            DnsRecordType::A
        } else {
            DnsRecordType::Cname
        };
        Self {
            name: format!("{}.", name.trim_end_matches('.')),
            target: target.to_string(),
            record_type,
            ttl: Self::TTL,
        }
    }
}

#[async_trait]
pub trait DnsRegistrar: Send + Sync {
    async fn upsert(&self, record: &DnsRecord) -> Result<(), ProviderError>;

    async fn delete(&self, record: &DnsRecord) -> Result<DeleteOutcome, ProviderError>;

    /// Whether `name` currently resolves.
    async fn resolves(&self, name: &str) -> Result<bool, ProviderError>;
}

/// Selects adapters for one environment. Called once per operation.
pub trait ProviderFactory: Send + Sync {
    fn provider_for(&self, env: &Environment) -> Result<Arc<dyn ResourceProvider>, ProviderError>;

    fn dns_for(&self, env: &Environment) -> Option<Arc<dyn DnsRegistrar>>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dns_record_type_follows_target() {
        let ip = DnsRecord::for_target("web.ns.example.com", "203.0.113.7");
        assert_eq!(ip.record_type, DnsRecordType::A);
        assert_eq!(ip.name, "web.ns.example.com.");
        assert_eq!(ip.ttl, 60);

        let host = DnsRecord::for_target("web.ns.example.com.", "lb-123.elb.amazonaws.com");
        assert_eq!(host.record_type, DnsRecordType::Cname);
        assert_eq!(host.name, "web.ns.example.com.");
    }

    #[test]
    fn test_workload_status_readiness() {
        let ready = WorkloadStatus { replicas: 2, ready: 2, updated: 2, unavailable: 0, observed: true };
        assert!(ready.is_ready(2));
        assert!(!ready.is_ready(3));
        let rolling = WorkloadStatus { unavailable: 1, ..ready };
        assert!(!rolling.is_ready(2));
        let previous_rollout = WorkloadStatus { observed: false, ..ready };
        assert!(!previous_rollout.is_ready(2));
    }
}
