// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # In-Process Sandbox Provider
//!
//! [`ResourceProvider`] used for demo projects when no shared sandbox cluster
//! is configured. Objects live in a concurrent map and converge instantly:
//! claims are bound on creation, workloads report every replica ready and
//! load balancers get a synthetic address.
//!
//! Individual resource kinds can be made to fail, or held so they never
//! converge, to exercise failure and timeout paths end to end.

use async_trait::async_trait;
use dashmap::DashMap;
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};

use crate::domain::provider::{
    ApplyOutcome, DeleteOutcome, IngressSpec, LoadBalancerState, NetworkServiceSpec, ProviderError,
    ResourceKind, ResourceProvider, VolumeClaimSpec, WorkloadSpec, WorkloadStatus,
};

pub const SANDBOX_ADDRESS_SUFFIX: &str = "sandbox.local";

#[derive(Debug, Clone, PartialEq)]
pub enum SandboxObject {
    Namespace,
    Access,
    Secret(String),
    VolumeClaim(VolumeClaimSpec),
    Workload(WorkloadSpec),
    NetworkService(NetworkServiceSpec),
    Ingress(IngressSpec),
}

type ObjectKey = (String, ResourceKind, String);

#[derive(Default)]
pub struct SandboxProvider {
    objects: DashMap<ObjectKey, SandboxObject>,
    failures: Mutex<HashMap<ResourceKind, String>>,
    held: Mutex<HashSet<ResourceKind>>,
}

impl SandboxProvider {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every subsequent write of `kind` fails with `message` until cleared.
    pub fn fail_on(&self, kind: ResourceKind, message: impl Into<String>) {
        self.failures.lock().insert(kind, message.into());
    }

    pub fn clear_failures(&self) {
        self.failures.lock().clear();
    }

    /// Objects of `kind` stop converging: claims stay unbound, workloads
    /// report no ready replica, load balancers stay pending and deletions
    /// leave the object in place.
    pub fn hold(&self, kind: ResourceKind) {
        self.held.lock().insert(kind);
    }

    pub fn release(&self, kind: ResourceKind) {
        self.held.lock().remove(&kind);
    }

    fn is_held(&self, kind: ResourceKind) -> bool {
        self.held.lock().contains(&kind)
    }

    pub fn get(&self, namespace: &str, kind: ResourceKind, name: &str) -> Option<SandboxObject> {
        self.objects
            .get(&(namespace.to_string(), kind, name.to_string()))
            .map(|entry| entry.value().clone())
    }

    pub fn workload(&self, namespace: &str, name: &str) -> Option<WorkloadSpec> {
        match self.get(namespace, ResourceKind::Workload, name) {
            Some(SandboxObject::Workload(spec)) => Some(spec),
            _ => None,
        }
    }

    /// Objects of a namespace, sorted by kind then name.
    pub fn list(&self, namespace: &str) -> Vec<(ResourceKind, String)> {
        let mut out: Vec<(ResourceKind, String)> = self
            .objects
            .iter()
            .filter(|entry| entry.key().0 == namespace)
            .map(|entry| (entry.key().1, entry.key().2.clone()))
            .collect();
        out.sort();
        out
    }

    fn check(&self, kind: ResourceKind, name: &str) -> Result<(), ProviderError> {
        match self.failures.lock().get(&kind) {
            Some(message) => Err(ProviderError::Api {
                kind,
                name: name.to_string(),
                status: 500,
                message: message.clone(),
            }),
            None => Ok(()),
        }
    }

    fn key(namespace: &str, kind: ResourceKind, name: &str) -> ObjectKey {
        (namespace.to_string(), kind, name.to_string())
    }

    fn put_if_absent(
        &self,
        namespace: &str,
        kind: ResourceKind,
        name: &str,
        object: SandboxObject,
    ) -> Result<ApplyOutcome, ProviderError> {
        self.check(kind, name)?;
        let key = Self::key(namespace, kind, name);
        if self.objects.contains_key(&key) {
            return Ok(ApplyOutcome::Existing);
        }
        self.objects.insert(key, object);
        Ok(ApplyOutcome::Created)
    }

    fn put(
        &self,
        namespace: &str,
        kind: ResourceKind,
        name: &str,
        object: SandboxObject,
    ) -> Result<ApplyOutcome, ProviderError> {
        self.check(kind, name)?;
        Ok(match self.objects.insert(Self::key(namespace, kind, name), object) {
            Some(_) => ApplyOutcome::Updated,
            None => ApplyOutcome::Created,
        })
    }
}

#[async_trait]
impl ResourceProvider for SandboxProvider {
    fn name(&self) -> &'static str {
        "sandbox"
    }

    async fn exists(&self, namespace: &str, kind: ResourceKind, name: &str) -> Result<bool, ProviderError> {
        Ok(self.objects.contains_key(&Self::key(namespace, kind, name)))
    }

    async fn delete(&self, namespace: &str, kind: ResourceKind, name: &str) -> Result<DeleteOutcome, ProviderError> {
        self.check(kind, name)?;
        let key = Self::key(namespace, kind, name);
        if self.is_held(kind) {
            return Ok(if self.objects.contains_key(&key) {
                DeleteOutcome::Deleted
            } else {
                DeleteOutcome::Absent
            });
        }
        Ok(match self.objects.remove(&key) {
            Some(_) => DeleteOutcome::Deleted,
            None => DeleteOutcome::Absent,
        })
    }

    async fn ensure_namespace(&self, namespace: &str) -> Result<ApplyOutcome, ProviderError> {
        self.put_if_absent("", ResourceKind::Namespace, namespace, SandboxObject::Namespace)
    }

    async fn ensure_dev_access(&self, namespace: &str, name: &str) -> Result<ApplyOutcome, ProviderError> {
        let mut outcome = ApplyOutcome::Existing;
        for kind in [ResourceKind::ServiceAccount, ResourceKind::Role, ResourceKind::RoleBinding] {
            if self.put_if_absent(namespace, kind, name, SandboxObject::Access)? == ApplyOutcome::Created {
                outcome = ApplyOutcome::Created;
            }
        }
        Ok(outcome)
    }

    async fn dev_token(&self, namespace: &str, service_account: &str) -> Result<Option<String>, ProviderError> {
        let present = self
            .objects
            .contains_key(&Self::key(namespace, ResourceKind::ServiceAccount, service_account));
        Ok(present.then(|| format!("sandbox-token-{}", service_account)))
    }

    async fn apply_registry_secret(
        &self,
        namespace: &str,
        name: &str,
        docker_config_json: &str,
    ) -> Result<ApplyOutcome, ProviderError> {
        self.put(
            namespace,
            ResourceKind::Secret,
            name,
            SandboxObject::Secret(docker_config_json.to_string()),
        )
    }

    async fn copy_tls_secret(
        &self,
        source_namespace: &str,
        name: &str,
        namespace: &str,
    ) -> Result<ApplyOutcome, ProviderError> {
        let source = self.get(source_namespace, ResourceKind::Secret, name).ok_or_else(|| {
            ProviderError::Precondition(format!(
                "TLS secret '{}' not found in namespace '{}'",
                name, source_namespace
            ))
        })?;
        self.put(namespace, ResourceKind::Secret, name, source)
    }

    async fn ensure_volume_claim(&self, namespace: &str, claim: &VolumeClaimSpec) -> Result<ApplyOutcome, ProviderError> {
        self.put_if_absent(
            namespace,
            ResourceKind::VolumeClaim,
            &claim.name,
            SandboxObject::VolumeClaim(claim.clone()),
        )
    }

    async fn volume_claim_bound(&self, namespace: &str, name: &str) -> Result<bool, ProviderError> {
        if self.is_held(ResourceKind::VolumeClaim) {
            return Ok(false);
        }
        self.exists(namespace, ResourceKind::VolumeClaim, name).await
    }

    async fn apply_workload(&self, namespace: &str, workload: &WorkloadSpec) -> Result<ApplyOutcome, ProviderError> {
        self.put(
            namespace,
            ResourceKind::Workload,
            workload.name(),
            SandboxObject::Workload(workload.clone()),
        )
    }

    async fn workload_status(&self, namespace: &str, name: &str) -> Result<Option<WorkloadStatus>, ProviderError> {
        let held = self.is_held(ResourceKind::Workload);
        Ok(self.workload(namespace, name).map(|spec| {
            let replicas = spec.manifest.replicas;
            if held {
                return WorkloadStatus {
                    replicas,
                    ready: 0,
                    updated: replicas,
                    unavailable: replicas,
                    observed: true,
                };
            }
            WorkloadStatus {
                replicas,
                ready: replicas,
                updated: replicas,
                unavailable: 0,
                observed: true,
            }
        }))
    }

    async fn apply_network_service(
        &self,
        namespace: &str,
        service: &NetworkServiceSpec,
    ) -> Result<ApplyOutcome, ProviderError> {
        self.put(
            namespace,
            ResourceKind::NetworkService,
            &service.name,
            SandboxObject::NetworkService(service.clone()),
        )
    }

    async fn load_balancer_state(&self, namespace: &str, name: &str) -> Result<LoadBalancerState, ProviderError> {
        Ok(match self.get(namespace, ResourceKind::NetworkService, name) {
            Some(SandboxObject::NetworkService(spec)) if spec.load_balancer && !self.is_held(ResourceKind::NetworkService) => {
                LoadBalancerState::Ready(format!("{}.{}.{}", name, namespace, SANDBOX_ADDRESS_SUFFIX))
            }
            Some(_) => LoadBalancerState::Pending,
            None => LoadBalancerState::Missing,
        })
    }

    async fn apply_ingress(&self, namespace: &str, ingress: &IngressSpec) -> Result<ApplyOutcome, ProviderError> {
        self.put(
            namespace,
            ResourceKind::Ingress,
            &ingress.name,
            SandboxObject::Ingress(ingress.clone()),
        )
    }
}
