// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # Reconciliation Engine
//!
//! Turns a service manifest and an [`Environment`] into an ordered
//! [`ReconcilePlan`] and executes it against the environment's
//! [`ResourceProvider`] (and [`DnsRegistrar`], when one is configured).
//!
//! Planning is pure: the CLI prints plans without touching any provider.
//! Execution applies one step at a time, owning every readiness wait so that
//! each one is bounded by a [`PollPolicy`]. Progress goes to the operation's
//! [`LogSink`]; the first failing step aborts the run, its error text is
//! appended to the transcript and returned unchanged.
//!
//! ## Deploy order
//!
//! ```text
//! namespace → dev access → registry / TLS secrets → volume claims
//!   → deployment → services → ingress → external address + DNS
//! ```
//!
//! Destroy walks the reverse direction: DNS record, ingress, services,
//! deployment, then every volume claim including the dev sync volume.
//!
//! # Architecture
//!
//! - **Layer:** Application Layer
//! - **Purpose:** Ordered, bounded, idempotent multi-resource reconciliation

use std::collections::BTreeMap;
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

use crate::application::log_capture::LogSink;
use crate::domain::activity::ActivityType;
use crate::domain::dev::{derive_dev_manifest, sync_volume};
use crate::domain::environment::{Environment, Secret, TlsKind};
use crate::domain::manifest::Manifest;
use crate::domain::provider::{
    ApplyOutcome, DeleteOutcome, DnsRecord, DnsRegistrar, IngressPath, IngressSpec, IngressTls, LoadBalancerState,
    NetworkServiceSpec, ProviderError, ProviderFactory, ResourceKind, ResourceProvider, VolumeClaimSpec,
    WorkloadSpec,
};

pub const LOAD_BALANCER_SUFFIX: &str = "-load-balancer";
pub const INGRESS_CLASS_ANNOTATION: &str = "kubernetes.io/ingress.class";
pub const TLS_ACME_ANNOTATION: &str = "kubernetes.io/tls-acme";
const DEFAULT_INGRESS_CLASS: &str = "nginx";

const INGRESS_REQUIRED: &str = "Support for ingress ports requires ingress configuration in your project";

/// Name of the load-balanced companion service of `service`.
pub fn load_balancer_name(service: &str) -> String {
    format!("{}{}", service, LOAD_BALANCER_SUFFIX)
}

/// Fixed-interval, bounded readiness wait.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollPolicy {
    pub interval: Duration,
    pub attempts: u32,
}

impl PollPolicy {
    /// Volume claims and deployments.
    pub const READY: PollPolicy = PollPolicy::new(6, 50);
    pub const LOAD_BALANCER: PollPolicy = PollPolicy::new(6, 30);
    pub const DNS: PollPolicy = PollPolicy::new(10, 20);
    pub const INGRESS_DELETE: PollPolicy = PollPolicy::new(3, 30);
    pub const DELETE: PollPolicy = PollPolicy::new(6, 30);

    const fn new(interval_secs: u64, attempts: u32) -> Self {
        Self {
            interval: Duration::from_secs(interval_secs),
            attempts,
        }
    }

    pub fn budget(&self) -> Duration {
        self.interval * self.attempts
    }

    fn describe_budget(&self) -> String {
        let secs = self.budget().as_secs();
        if secs % 60 == 0 {
            format!("{} minutes", secs / 60)
        } else {
            format!("{} seconds", secs)
        }
    }

    /// Runs `check` until it reports `true` or the attempts run out.
    /// Returns whether the condition was reached.
    pub async fn wait<F, Fut>(&self, mut check: F) -> Result<bool, ProviderError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<bool, ProviderError>>,
    {
        for attempt in 0..self.attempts {
            if check().await? {
                return Ok(true);
            }
            if attempt + 1 < self.attempts {
                tokio::time::sleep(self.interval).await;
            }
        }
        Ok(false)
    }
}

/// The three infrastructure-touching operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReconcileOperation {
    Deploy,
    DevDeploy,
    Destroy,
}

impl ReconcileOperation {
    pub fn for_activity(activity_type: ActivityType) -> Option<Self> {
        match activity_type {
            ActivityType::Deployed => Some(ReconcileOperation::Deploy),
            ActivityType::DevDeployed => Some(ReconcileOperation::DevDeploy),
            ActivityType::Destroyed => Some(ReconcileOperation::Destroy),
            ActivityType::Created | ActivityType::Updated => None,
        }
    }

    fn opening(&self, service: &str) -> String {
        match self {
            ReconcileOperation::Deploy => format!("Deploying the service '{}'...", service),
            ReconcileOperation::DevDeploy => format!("Enabling development mode for service '{}'...", service),
            ReconcileOperation::Destroy => format!("Destroying the service '{}'...", service),
        }
    }

    fn closing(&self, service: &str) -> String {
        match self {
            ReconcileOperation::Deploy => format!("Service '{}' successfully deployed.", service),
            ReconcileOperation::DevDeploy => format!("Enabled development mode for service '{}'.", service),
            ReconcileOperation::Destroy => format!("Service '{}' successfully destroyed.", service),
        }
    }
}

impl fmt::Display for ReconcileOperation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ReconcileOperation::Deploy => f.write_str("deploy"),
            ReconcileOperation::DevDeploy => f.write_str("dev deploy"),
            ReconcileOperation::Destroy => f.write_str("destroy"),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum ReconcileStep {
    Namespace {
        name: String,
    },
    DevAccess {
        name: String,
    },
    RegistrySecret {
        name: String,
        docker_config_json: String,
    },
    TlsSecretCopy {
        name: String,
        source_namespace: String,
    },
    VolumeClaim(VolumeClaimSpec),
    Workload(WorkloadSpec),
    NetworkService(NetworkServiceSpec),
    Ingress(IngressSpec),
    /// Wait for the external address of a load-balanced service, then point
    /// `dns_name` at it when DNS is managed.
    ExternalAddress {
        service: String,
        dns_name: Option<String>,
    },
    RemoveDnsRecord {
        service: String,
        dns_name: String,
    },
    Delete {
        kind: ResourceKind,
        name: String,
        poll: PollPolicy,
    },
}

impl fmt::Display for ReconcileStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ReconcileStep::Namespace { name } => write!(f, "create namespace '{}' if absent", name),
            ReconcileStep::DevAccess { name } => write!(
                f,
                "create service account, role and role binding '{}' if absent",
                name
            ),
            ReconcileStep::RegistrySecret { name, .. } => write!(f, "apply docker registry secret '{}'", name),
            ReconcileStep::TlsSecretCopy { name, source_namespace } => {
                write!(f, "copy TLS secret '{}' from namespace '{}'", name, source_namespace)
            }
            ReconcileStep::VolumeClaim(claim) => write!(
                f,
                "create volume claim '{}' ({}) if absent and wait until bound",
                claim.name, claim.size
            ),
            ReconcileStep::Workload(workload) => write!(
                f,
                "apply deployment '{}' ({} replica(s), containers: {}) and wait until ready",
                workload.name(),
                workload.manifest.replicas,
                workload.manifest.containers.keys().cloned().collect::<Vec<_>>().join(", ")
            ),
            ReconcileStep::NetworkService(service) => write!(
                f,
                "apply {}service '{}' (ports: {})",
                if service.load_balancer { "load balancer " } else { "" },
                service.name,
                service.ports.join(", ")
            ),
            ReconcileStep::Ingress(ingress) => {
                let mut hosts: Vec<&str> = ingress.paths.iter().map(|p| p.host.as_str()).collect();
                hosts.dedup();
                write!(f, "apply ingress '{}' (hosts: {})", ingress.name, hosts.join(", "))
            }
            ReconcileStep::ExternalAddress { service, dns_name } => {
                write!(f, "wait for the external address of '{}'", service)?;
                if let Some(dns_name) = dns_name {
                    write!(f, " and point '{}' at it", dns_name)?;
                }
                Ok(())
            }
            ReconcileStep::RemoveDnsRecord { dns_name, .. } => write!(f, "delete DNS record '{}'", dns_name),
            ReconcileStep::Delete { kind, name, .. } => write!(f, "delete {} '{}'", kind, name),
        }
    }
}

/// Ordered steps of one operation on one service.
#[derive(Debug, Clone, PartialEq)]
pub struct ReconcilePlan {
    pub operation: ReconcileOperation,
    pub service: String,
    pub namespace: String,
    pub steps: Vec<ReconcileStep>,
}

impl fmt::Display for ReconcilePlan {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "{} of service '{}' in namespace '{}':",
            self.operation, self.service, self.namespace
        )?;
        for (index, step) in self.steps.iter().enumerate() {
            writeln!(f, "  {:>2}. {}", index + 1, step)?;
        }
        Ok(())
    }
}

/// Manifest actually applied by `operation`: secrets resolved and, for dev
/// deploys, the development overrides in place. The input is left untouched.
pub fn prepare_manifest(operation: ReconcileOperation, manifest: &Manifest, secrets: &[Secret]) -> Manifest {
    let mut prepared = match operation {
        ReconcileOperation::DevDeploy => derive_dev_manifest(manifest),
        ReconcileOperation::Deploy | ReconcileOperation::Destroy => manifest.clone(),
    };
    if operation != ReconcileOperation::Destroy {
        prepared.inject_secrets(secrets);
    }
    prepared
}

impl ReconcilePlan {
    pub fn build(
        operation: ReconcileOperation,
        manifest: &Manifest,
        env: &Environment,
        secrets: &[Secret],
    ) -> Result<Self, ProviderError> {
        let prepared = prepare_manifest(operation, manifest, secrets);
        match operation {
            ReconcileOperation::Deploy | ReconcileOperation::DevDeploy => {
                let mut plan = Self::deploy(&prepared, env)?;
                plan.operation = operation;
                Ok(plan)
            }
            ReconcileOperation::Destroy => Ok(Self::destroy(&prepared, env)),
        }
    }

    /// Deploy plan of an already prepared manifest.
    pub fn deploy(manifest: &Manifest, env: &Environment) -> Result<Self, ProviderError> {
        if manifest.has_explicit_ingress() && !env.is_ingress() {
            return Err(ProviderError::Precondition(INGRESS_REQUIRED.to_string()));
        }

        let mut steps = vec![
            ReconcileStep::Namespace { name: env.name.clone() },
            ReconcileStep::DevAccess { name: env.dev_name() },
        ];

        if let Some(docker_config_json) = env.docker_config_json() {
            steps.push(ReconcileStep::RegistrySecret {
                name: env.name.clone(),
                docker_config_json,
            });
        }
        if let Some(tls) = env.provider.tls().filter(|t| t.kind == TlsKind::FixCertificate) {
            if let Some(certificate) = &tls.certificate {
                steps.push(ReconcileStep::TlsSecretCopy {
                    name: certificate.secret.clone(),
                    source_namespace: certificate.namespace.clone(),
                });
            }
        }

        let mut claims = BTreeMap::new();
        for volume in manifest.persistent_volumes() {
            let claim = VolumeClaimSpec {
                name: manifest.volume_claim_name(volume, env),
                size: volume.size.clone(),
            };
            claims.insert(volume.name.clone(), claim.name.clone());
            steps.push(ReconcileStep::VolumeClaim(claim));
        }

        steps.push(ReconcileStep::Workload(WorkloadSpec {
            manifest: manifest.clone(),
            claims,
            pull_secret: env.registry_credentials().map(|_| env.name.clone()),
        }));

        let load_balancer_ports = manifest.load_balancer_ports();
        let exposes_load_balancer = !env.is_ingress() && !load_balancer_ports.is_empty();
        let private_ports = manifest.private_ports();
        if !private_ports.is_empty() {
            steps.push(ReconcileStep::NetworkService(NetworkServiceSpec {
                name: manifest.name.clone(),
                app: manifest.name.clone(),
                ports: private_ports,
                load_balancer: false,
            }));
            if exposes_load_balancer {
                steps.push(ReconcileStep::NetworkService(NetworkServiceSpec {
                    name: load_balancer_name(&manifest.name),
                    app: manifest.name.clone(),
                    ports: load_balancer_ports,
                    load_balancer: true,
                }));
            }
            if env.is_ingress() && !manifest.ingress_rules(true).is_empty() {
                steps.push(ReconcileStep::Ingress(ingress_spec(manifest, env)));
            }
        }

        if exposes_load_balancer {
            steps.push(ReconcileStep::ExternalAddress {
                service: load_balancer_name(&manifest.name),
                dns_name: env.service_dns(&manifest.name),
            });
        }

        Ok(Self {
            operation: ReconcileOperation::Deploy,
            service: manifest.name.clone(),
            namespace: env.name.clone(),
            steps,
        })
    }

    pub fn destroy(manifest: &Manifest, env: &Environment) -> Self {
        let name = manifest.name.clone();
        let mut steps = Vec::new();

        if !env.is_ingress() && !manifest.load_balancer_ports().is_empty() {
            if let Some(dns_name) = env.service_dns(&name) {
                steps.push(ReconcileStep::RemoveDnsRecord {
                    service: load_balancer_name(&name),
                    dns_name,
                });
            }
        }

        let delete = |kind, name: String, poll| ReconcileStep::Delete { kind, name, poll };
        steps.push(delete(ResourceKind::Ingress, name.clone(), PollPolicy::INGRESS_DELETE));
        steps.push(delete(ResourceKind::NetworkService, name.clone(), PollPolicy::DELETE));
        steps.push(delete(ResourceKind::NetworkService, load_balancer_name(&name), PollPolicy::DELETE));
        steps.push(delete(ResourceKind::Workload, name.clone(), PollPolicy::DELETE));

        let sync = sync_volume(true);
        let mut claim_names: Vec<String> = Vec::new();
        for volume in manifest.persistent_volumes().chain(std::iter::once(&sync)) {
            let claim = manifest.volume_claim_name(volume, env);
            if !claim_names.contains(&claim) {
                claim_names.push(claim);
            }
        }
        for claim in claim_names {
            steps.push(delete(ResourceKind::VolumeClaim, claim, PollPolicy::DELETE));
        }

        Self {
            operation: ReconcileOperation::Destroy,
            service: name,
            namespace: env.name.clone(),
            steps,
        }
    }
}

fn ingress_spec(manifest: &Manifest, env: &Environment) -> IngressSpec {
    let settings = env.provider.ingress.as_ref();
    let mut annotations = settings.map(|i| i.annotations.clone()).unwrap_or_default();
    if annotations.is_empty() {
        annotations.insert(INGRESS_CLASS_ANNOTATION.to_string(), DEFAULT_INGRESS_CLASS.to_string());
    }
    if env.provider.tls().is_some_and(|t| t.kind == TlsKind::LetsEncrypt) {
        annotations.insert(TLS_ACME_ANNOTATION.to_string(), "true".to_string());
    }

    let rules = manifest.ingress_rules(true);
    let hostnames = manifest.ingress_hostnames(env);
    let paths = hostnames
        .iter()
        .flat_map(|host| {
            rules
                .iter()
                .filter(move |rule| rule.hostname(env) == *host)
                .map(move |rule| IngressPath {
                    host: host.clone(),
                    path: rule.path.clone(),
                    port: rule.port.clone(),
                })
        })
        .collect();

    IngressSpec {
        name: manifest.name.clone(),
        service: manifest.name.clone(),
        annotations,
        paths,
        tls: manifest
            .certificate_name(env)
            .map(|secret| IngressTls { secret, hosts: hostnames.clone() }),
    }
}

fn capitalize(text: &str) -> String {
    let mut chars = text.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}

/// Executes plans against the adapters selected per environment.
pub struct ReconcileEngine {
    factory: Arc<dyn ProviderFactory>,
}

impl ReconcileEngine {
    pub fn new(factory: Arc<dyn ProviderFactory>) -> Self {
        Self { factory }
    }

    /// Runs `operation` for `manifest`. Any error is appended to `log` before
    /// being returned.
    pub async fn run(
        &self,
        operation: ReconcileOperation,
        manifest: &Manifest,
        env: &Environment,
        secrets: &[Secret],
        log: &LogSink,
    ) -> Result<(), ProviderError> {
        let result = self.execute(operation, manifest, env, secrets, log).await;
        if let Err(e) = &result {
            log.line(e.to_string());
        }
        result
    }

    async fn execute(
        &self,
        operation: ReconcileOperation,
        manifest: &Manifest,
        env: &Environment,
        secrets: &[Secret],
        log: &LogSink,
    ) -> Result<(), ProviderError> {
        log.line(operation.opening(&manifest.name));
        let plan = ReconcilePlan::build(operation, manifest, env, secrets)?;
        let provider = self.factory.provider_for(env)?;
        let dns = self.factory.dns_for(env);

        info!(
            service = %plan.service,
            namespace = %plan.namespace,
            provider = provider.name(),
            operation = %operation,
            steps = plan.steps.len(),
            "reconciliation started"
        );

        let runner = StepRunner {
            provider: provider.as_ref(),
            dns: dns.as_deref(),
            namespace: &plan.namespace,
            log,
        };
        for step in &plan.steps {
            debug!(service = %plan.service, step = %step, "applying step");
            runner.apply(step).await?;
        }

        log.line(operation.closing(&manifest.name));
        Ok(())
    }

    /// Token of the environment's dev service account, if it exists.
    pub async fn dev_credentials(&self, env: &Environment) -> Result<Option<String>, ProviderError> {
        let provider = self.factory.provider_for(env)?;
        provider.dev_token(&env.name, &env.dev_name()).await
    }
}

struct StepRunner<'a> {
    provider: &'a dyn ResourceProvider,
    dns: Option<&'a dyn DnsRegistrar>,
    namespace: &'a str,
    log: &'a LogSink,
}

impl StepRunner<'_> {
    async fn apply(&self, step: &ReconcileStep) -> Result<(), ProviderError> {
        match step {
            ReconcileStep::Namespace { name } => {
                match self.provider.ensure_namespace(name).await? {
                    ApplyOutcome::Existing => self.log.line(format!("Namespace '{}' was already created.", name)),
                    _ => self.log.line(format!("Created namespace '{}'.", name)),
                }
                Ok(())
            }
            ReconcileStep::DevAccess { name } => {
                if self.provider.ensure_dev_access(self.namespace, name).await? == ApplyOutcome::Created {
                    self.log.line(format!("Created development access '{}'.", name));
                }
                Ok(())
            }
            ReconcileStep::RegistrySecret {
                name,
                docker_config_json,
            } => {
                let outcome = self
                    .provider
                    .apply_registry_secret(self.namespace, name, docker_config_json)
                    .await?;
                self.log_applied("docker registry secret", name, outcome);
                Ok(())
            }
            ReconcileStep::TlsSecretCopy { name, source_namespace } => {
                self.log.line(format!(
                    "Copying TLS certificate '{}' from namespace '{}'...",
                    name, source_namespace
                ));
                self.provider
                    .copy_tls_secret(source_namespace, name, self.namespace)
                    .await?;
                Ok(())
            }
            ReconcileStep::VolumeClaim(claim) => self.volume_claim(claim).await,
            ReconcileStep::Workload(workload) => self.workload(workload).await,
            ReconcileStep::NetworkService(service) => {
                let outcome = self.provider.apply_network_service(self.namespace, service).await?;
                self.log_applied("service", &service.name, outcome);
                Ok(())
            }
            ReconcileStep::Ingress(ingress) => {
                let outcome = self.provider.apply_ingress(self.namespace, ingress).await?;
                self.log_applied("ingress", &ingress.name, outcome);
                Ok(())
            }
            ReconcileStep::ExternalAddress { service, dns_name } => {
                let Some(address) = self.wait_for_address(service).await? else {
                    return Ok(());
                };
                self.log.line(format!("External address of '{}' is '{}'.", service, address));
                if let Some(dns_name) = dns_name {
                    self.register_dns(dns_name, &address).await?;
                }
                Ok(())
            }
            ReconcileStep::RemoveDnsRecord { service, dns_name } => self.remove_dns(service, dns_name).await,
            ReconcileStep::Delete { kind, name, poll } => self.delete(*kind, name, *poll).await,
        }
    }

    fn log_applied(&self, what: &str, name: &str, outcome: ApplyOutcome) {
        match outcome {
            ApplyOutcome::Created => self.log.line(format!("Created {} '{}'.", what, name)),
            ApplyOutcome::Updated => self.log.line(format!("Updated {} '{}'.", what, name)),
            ApplyOutcome::Existing => self.log.line(format!("{} '{}' was already created.", capitalize(what), name)),
        }
    }

    async fn volume_claim(&self, claim: &VolumeClaimSpec) -> Result<(), ProviderError> {
        let outcome = self.provider.ensure_volume_claim(self.namespace, claim).await?;
        self.log_applied("volume claim", &claim.name, outcome);
        self.log
            .line(format!("Waiting for the volume claim '{}' to be ready...", claim.name));

        let (provider, namespace, name) = (self.provider, self.namespace, claim.name.as_str());
        let bound = PollPolicy::READY
            .wait(move || provider.volume_claim_bound(namespace, name))
            .await?;
        if !bound {
            return Err(ProviderError::Timeout(
                "kubernetes volume claim not ready after 5 minutes".to_string(),
            ));
        }
        self.log.line(format!("kubernetes volume claim '{}' is bound.", claim.name));
        Ok(())
    }

    async fn workload(&self, workload: &WorkloadSpec) -> Result<(), ProviderError> {
        let outcome = self.provider.apply_workload(self.namespace, workload).await?;
        self.log_applied("deployment", workload.name(), outcome);
        self.log.line(format!(
            "Waiting for the deployment '{}' to be ready...",
            workload.name()
        ));

        let (provider, namespace, name) = (self.provider, self.namespace, workload.name());
        let desired = workload.manifest.replicas;
        let ready = PollPolicy::READY
            .wait(move || async move {
                Ok::<_, ProviderError>(provider
                    .workload_status(namespace, name)
                    .await?
                    .is_some_and(|status| status.is_ready(desired)))
            })
            .await?;
        if !ready {
            return Err(ProviderError::Timeout(
                "kubernetes deployment not ready after 5 minutes".to_string(),
            ));
        }
        self.log.line(format!("kubernetes deployment '{}' is ready.", workload.name()));
        Ok(())
    }

    /// External address of a load-balanced service; `None` if the service
    /// does not exist.
    async fn wait_for_address(&self, service: &str) -> Result<Option<String>, ProviderError> {
        self.log.line("Waiting for load balancer to be created...");
        let policy = PollPolicy::LOAD_BALANCER;
        for attempt in 0..policy.attempts {
            match self.provider.load_balancer_state(self.namespace, service).await? {
                LoadBalancerState::Ready(address) => return Ok(Some(address)),
                LoadBalancerState::Missing => return Ok(None),
                LoadBalancerState::Pending => {}
            }
            if attempt + 1 < policy.attempts {
                tokio::time::sleep(policy.interval).await;
            }
        }
        Err(ProviderError::Timeout(
            "External load balancer not created after 3 minutes".to_string(),
        ))
    }

    async fn register_dns(&self, dns_name: &str, address: &str) -> Result<(), ProviderError> {
        let Some(dns) = self.dns else {
            debug!(dns_name, "no dns registrar for this environment");
            return Ok(());
        };
        let record = DnsRecord::for_target(dns_name, address);
        dns.upsert(&record).await?;
        self.log
            .line(format!("Waiting for {} to resolve to {}...", record.name, address));

        let name = record.name.as_str();
        let resolved = PollPolicy::DNS.wait(move || dns.resolves(name)).await?;
        if !resolved {
            return Err(ProviderError::Timeout("DNS not working after 3 minutes".to_string()));
        }
        self.log.line(format!("DNS record '{}' is ready.", record.name));
        Ok(())
    }

    async fn remove_dns(&self, service: &str, dns_name: &str) -> Result<(), ProviderError> {
        let Some(dns) = self.dns else {
            return Ok(());
        };
        let LoadBalancerState::Ready(address) = self.provider.load_balancer_state(self.namespace, service).await?
        else {
            debug!(service, "no external address, skipping dns cleanup");
            return Ok(());
        };

        let record = DnsRecord::for_target(dns_name, &address);
        self.log.line(format!("Deleting DNS record '{}'...", record.name));
        match dns.delete(&record).await {
            Ok(DeleteOutcome::Deleted) => self.log.line(format!("DNS record '{}' successfully deleted.", record.name)),
            Ok(DeleteOutcome::Absent) => self.log.line(format!("DNS record '{}' was already deleted.", record.name)),
            // best effort, teardown continues
            Err(e) => self.log.line(format!("Failed to delete DNS record '{}': {}", record.name, e)),
        }
        Ok(())
    }

    async fn delete(&self, kind: ResourceKind, name: &str, poll: PollPolicy) -> Result<(), ProviderError> {
        self.log.line(format!("Deleting {} '{}'...", kind, name));
        if self.provider.delete(self.namespace, kind, name).await? == DeleteOutcome::Absent {
            self.log
                .line(format!("{} '{}' was already deleted.", capitalize(&kind.to_string()), name));
            return Ok(());
        }

        self.log
            .line(format!("Waiting for the {} '{}' to be deleted...", kind, name));
        let (provider, namespace) = (self.provider, self.namespace);
        let gone = poll
            .wait(move || async move { Ok::<_, ProviderError>(!provider.exists(namespace, kind, name).await?) })
            .await?;
        if !gone {
            return Err(ProviderError::Timeout(format!(
                "kubernetes {} not deleted after {}",
                kind,
                poll.describe_budget()
            )));
        }
        self.log
            .line(format!("{} '{}' successfully deleted.", capitalize(&kind.to_string()), name));
        Ok(())
    }
}
