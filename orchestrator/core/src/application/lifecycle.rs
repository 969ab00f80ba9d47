// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # Service Lifecycle Application Service
//!
//! Entry point for every state change of a service. A request runs in two
//! phases:
//!
//! 1. **Synchronous**, under a per-service lock: load the service, check the
//!    guard, resolve the environment, then persist the in-progress activity
//!    together with the derived service status in one transition.
//! 2. **Asynchronous**, in the [`OperationPool`]: run the reconciliation with
//!    a log drain next to it, wait for the drain, then finalize the activity
//!    (again under the service lock) and publish the state change.
//!
//! Guard violations, validation and environment errors surface in phase 1
//! and never leave an activity behind. Failures in phase 2 end up recorded
//! as a `Failed` activity with the error text as the last transcript line.

use async_trait::async_trait;
use chrono::{Duration as ChronoDuration, Utc};
use dashmap::DashMap;
use metrics::counter;
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{error, info, warn};

use crate::application::log_capture;
use crate::application::operations::OperationPool;
use crate::application::reconciler::{ReconcileEngine, ReconcileOperation};
use crate::domain::activity::{latest, Activity, ActivityId, ActivityStatus, ActivityType, LogLine};
use crate::domain::environment::{DnsSettings, Environment, ProjectId, ProviderSettings, Secret};
use crate::domain::errors::ValidationError;
use crate::domain::events::{ActivityEvent, ServiceEvent};
use crate::domain::manifest::Manifest;
use crate::domain::provider::ProviderError;
use crate::domain::repository::{
    ActivityRepository, LogRepository, ProjectRepository, RepositoryError, ServiceRepository,
};
use crate::domain::service::{ActorId, Service, ServiceId, ServiceStatus};
use crate::infrastructure::event_bus::EventBus;

/// Maximum number of demo services a single actor may create.
pub const DEMO_SERVICE_LIMIT: usize = 5;

/// Destroyed services stay listed for this long.
const DESTROYED_VISIBILITY_HOURS: i64 = 1;

#[derive(Debug, thiserror::Error)]
pub enum LifecycleError {
    #[error("operation not allowed while the service is {0}")]
    InvalidServiceStatus(ServiceStatus),

    #[error("service has no manifest")]
    MissingManifest,

    #[error("{0} not found")]
    NotFound(String),

    #[error("a service named '{0}' already exists in this project")]
    UniqueName(String),

    #[error("demo services are limited to {0} per user")]
    DemoServiceLimit(usize),

    #[error("invalid manifest: {0}")]
    Validation(#[from] ValidationError),

    #[error("invalid environment: {0}")]
    Environment(ValidationError),

    #[error(transparent)]
    Provider(#[from] ProviderError),

    #[error("the orchestrator is shutting down")]
    ShuttingDown,

    #[error(transparent)]
    Repository(#[from] RepositoryError),
}

#[async_trait]
pub trait LifecycleService: Send + Sync {
    /// Parses and validates the manifest and records the service as
    /// `Created`.
    async fn create_service(
        &self,
        project_id: &ProjectId,
        manifest: &str,
        actor: &ActorId,
        demo: bool,
    ) -> Result<Service, LifecycleError>;

    /// Replaces the manifest (and name) of a service. `note` becomes the
    /// transcript of the recorded `Updated` activity.
    async fn update_manifest(
        &self,
        project_id: &ProjectId,
        service_id: ServiceId,
        manifest: &str,
        actor: &ActorId,
        note: &str,
    ) -> Result<Service, LifecycleError>;

    async fn request_deploy(&self, service_id: ServiceId, actor: &ActorId) -> Result<Activity, LifecycleError>;

    async fn request_destroy(&self, service_id: ServiceId, actor: &ActorId) -> Result<Activity, LifecycleError>;

    /// Enables development mode. Already in dev mode returns the activity
    /// that enabled it.
    async fn request_dev_deploy(&self, service_id: ServiceId, actor: &ActorId) -> Result<Activity, LifecycleError>;

    async fn get_service(&self, service_id: ServiceId) -> Result<Service, LifecycleError>;

    async fn list_services(&self, project_id: &ProjectId, include_destroyed: bool) -> Result<Vec<Service>, LifecycleError>;

    async fn list_activities(&self, service_id: ServiceId) -> Result<Vec<Activity>, LifecycleError>;

    async fn get_activity_logs(
        &self,
        service_id: ServiceId,
        activity_id: ActivityId,
    ) -> Result<Vec<LogLine>, LifecycleError>;

    /// Reachable URLs of a service in its current environment.
    async fn endpoints(&self, service_id: ServiceId) -> Result<Vec<String>, LifecycleError>;

    /// Token of the project's development service account.
    async fn dev_credentials(&self, service_id: ServiceId) -> Result<Option<String>, LifecycleError>;
}

/// Everything an operation needs once it leaves the request path.
struct LifecycleCore {
    services: Arc<dyn ServiceRepository>,
    activities: Arc<dyn ActivityRepository>,
    logs: Arc<dyn LogRepository>,
    projects: Arc<dyn ProjectRepository>,
    engine: Arc<ReconcileEngine>,
    event_bus: Arc<EventBus>,
    dns: Option<DnsSettings>,
    sandbox_cluster: Option<ProviderSettings>,
    locks: DashMap<ServiceId, Arc<Mutex<()>>>,
}

pub struct StandardLifecycleService {
    core: Arc<LifecycleCore>,
    pool: Arc<OperationPool>,
}

impl StandardLifecycleService {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        services: Arc<dyn ServiceRepository>,
        activities: Arc<dyn ActivityRepository>,
        logs: Arc<dyn LogRepository>,
        projects: Arc<dyn ProjectRepository>,
        engine: Arc<ReconcileEngine>,
        event_bus: Arc<EventBus>,
        pool: Arc<OperationPool>,
        dns: Option<DnsSettings>,
        sandbox_cluster: Option<ProviderSettings>,
    ) -> Self {
        Self {
            core: Arc::new(LifecycleCore {
                services,
                activities,
                logs,
                projects,
                engine,
                event_bus,
                dns,
                sandbox_cluster,
                locks: DashMap::new(),
            }),
            pool,
        }
    }

    async fn request(
        &self,
        operation: ReconcileOperation,
        service_id: ServiceId,
        actor: &ActorId,
    ) -> Result<Activity, LifecycleError> {
        let lock = self.core.lock_for(service_id);
        let result = {
            let _guard = lock.lock().await;
            self.request_locked(operation, service_id, actor).await
        };
        drop(lock);
        self.core.release_lock(service_id);
        result
    }

    async fn request_locked(
        &self,
        operation: ReconcileOperation,
        service_id: ServiceId,
        actor: &ActorId,
    ) -> Result<Activity, LifecycleError> {
        let mut service = self.core.find_service(service_id).await?;

        let manifest = match operation {
            ReconcileOperation::Deploy | ReconcileOperation::DevDeploy => {
                if operation == ReconcileOperation::DevDeploy && service.status == ServiceStatus::DevDeployed {
                    return self.core.latest_activity(&service, ActivityType::DevDeployed).await;
                }
                let allowed = match operation {
                    ReconcileOperation::Deploy => service.status.can_deploy(),
                    _ => service.status.can_enable_dev(),
                };
                if !allowed {
                    return Err(LifecycleError::InvalidServiceStatus(service.status));
                }
                if service.manifest.trim().is_empty() {
                    return Err(LifecycleError::MissingManifest);
                }
                Manifest::from_encoded(&service.manifest)?
            }
            ReconcileOperation::Destroy => {
                if !service.status.can_destroy() {
                    return Err(LifecycleError::InvalidServiceStatus(service.status));
                }
                teardown_manifest(&service)
            }
        };

        let (env, secrets) = self.core.environment(&service.project_id).await?;
        if !self.pool.is_open() {
            return Err(LifecycleError::ShuttingDown);
        }

        let activity_type = match operation {
            ReconcileOperation::Deploy => ActivityType::Deployed,
            ReconcileOperation::DevDeploy => ActivityType::DevDeployed,
            ReconcileOperation::Destroy => ActivityType::Destroyed,
        };
        let activity = Activity::in_progress(service.id, actor.clone(), activity_type);
        match operation {
            ReconcileOperation::Deploy => service.dev = false,
            ReconcileOperation::DevDeploy => service.dev = true,
            ReconcileOperation::Destroy => service.dns = None,
        }
        service.apply(&activity);
        self.core.activities.record_transition(&activity, &service).await?;

        counter!("launchpad_operations_started_total", "type" => activity_type.as_str()).increment(1);
        info!(
            service_id = %service.id,
            activity_id = %activity.id,
            actor = %actor,
            operation = %operation,
            "operation started"
        );
        self.core.event_bus.publish_activity_event(ActivityEvent::Started {
            activity_id: activity.id,
            service_id: service.id,
            activity_type,
            started_at: activity.created_at,
        });
        self.core.publish_state(&service);

        let core = self.core.clone();
        let run = OperationRun {
            operation,
            activity: activity.clone(),
            service_id: service.id,
            manifest,
            env,
            secrets,
        };
        if self.pool.submit(async move { core.execute(run).await }).is_err() {
            // closed between the check above and now; the self-healing sweep
            // fails the orphaned activity
            warn!(activity_id = %activity.id, "operation pool closed, activity left in progress");
        }
        Ok(activity)
    }

    async fn update_locked(
        &self,
        project_id: &ProjectId,
        service_id: ServiceId,
        parsed: Manifest,
        manifest: &str,
        actor: &ActorId,
        note: &str,
    ) -> Result<Service, LifecycleError> {
        let mut service = self.core.find_service(service_id).await?;
        if &service.project_id != project_id {
            return Err(LifecycleError::NotFound(format!("service {}", service_id)));
        }

        service.name = parsed.name.clone();
        service.manifest = manifest.trim().to_string();
        let activity = Activity::completed(service.id, actor.clone(), ActivityType::Updated);
        service.apply(&activity);
        self.core
            .activities
            .record_transition(&activity, &service)
            .await
            .map_err(|e| match e {
                RepositoryError::Conflict(_) => LifecycleError::UniqueName(parsed.name.clone()),
                other => LifecycleError::Repository(other),
            })?;

        let note = if note.trim().is_empty() { "Manifest updated." } else { note.trim() };
        self.core.logs.append(&LogLine::new(activity.id, note)).await?;

        info!(service_id = %service.id, name = %service.name, "manifest updated");
        self.core.publish_state(&service);
        Ok(service)
    }
}

/// Manifest used to tear a service down, even when the stored one is empty
/// or no longer parses.
fn teardown_manifest(service: &Service) -> Manifest {
    service.parsed_manifest().unwrap_or_else(|| Manifest {
        name: service.name.clone(),
        replicas: 1,
        grace_period: 0,
        containers: BTreeMap::new(),
        volumes: BTreeMap::new(),
        labels: BTreeMap::new(),
    })
}

struct OperationRun {
    operation: ReconcileOperation,
    activity: Activity,
    service_id: ServiceId,
    manifest: Manifest,
    env: Environment,
    secrets: Vec<Secret>,
}

impl LifecycleCore {
    fn lock_for(&self, service_id: ServiceId) -> Arc<Mutex<()>> {
        self.locks.entry(service_id).or_default().clone()
    }

    /// Drops the lock of a service once nobody holds or waits for it. Must be
    /// called after the caller released its own handle.
    fn release_lock(&self, service_id: ServiceId) {
        self.locks.remove_if(&service_id, |_, lock| Arc::strong_count(lock) == 1);
    }

    async fn find_service(&self, service_id: ServiceId) -> Result<Service, LifecycleError> {
        self.services
            .find_by_id(service_id)
            .await?
            .ok_or_else(|| LifecycleError::NotFound(format!("service {}", service_id)))
    }

    async fn latest_activity(&self, service: &Service, activity_type: ActivityType) -> Result<Activity, LifecycleError> {
        let activities = self.activities.list_by_service(service.id).await?;
        latest(activities.iter().filter(|a| a.activity_type == activity_type))
            .cloned()
            .ok_or_else(|| LifecycleError::NotFound(format!("{} activity of service {}", activity_type, service.id)))
    }

    /// Fresh environment and secrets of a project.
    async fn environment(&self, project_id: &ProjectId) -> Result<(Environment, Vec<Secret>), LifecycleError> {
        let project = self
            .projects
            .find_by_id(project_id)
            .await?
            .ok_or_else(|| LifecycleError::NotFound(format!("project {}", project_id)))?;
        let env = Environment::for_project(&project, self.dns.as_ref(), self.sandbox_cluster.as_ref());
        env.validate().map_err(LifecycleError::Environment)?;
        Ok((env, project.settings.secrets))
    }

    fn publish_state(&self, service: &Service) {
        self.event_bus.publish_service_event(ServiceEvent::StateChanged {
            service: Box::new(service.clone()),
            changed_at: Utc::now(),
        });
    }

    async fn execute(&self, run: OperationRun) {
        let (sink, drain) = log_capture::channel(run.activity.id, self.logs.clone());
        let drain = tokio::spawn(drain.run());

        let result = self
            .engine
            .run(run.operation, &run.manifest, &run.env, &run.secrets, &sink)
            .await;
        sink.finish();
        drop(sink);
        if let Err(e) = drain.await {
            error!(activity_id = %run.activity.id, error = %e, "log drain task failed");
        }

        let outcome = match &result {
            Ok(()) => ActivityStatus::Completed,
            Err(e) => {
                warn!(
                    service_id = %run.service_id,
                    activity_id = %run.activity.id,
                    error = %e,
                    "operation failed"
                );
                ActivityStatus::Failed
            }
        };
        if let Err(e) = self.finalize(&run, outcome).await {
            error!(
                service_id = %run.service_id,
                activity_id = %run.activity.id,
                error = %e,
                "failed to finalize activity"
            );
        }
    }

    async fn finalize(&self, run: &OperationRun, outcome: ActivityStatus) -> Result<(), LifecycleError> {
        let lock = self.lock_for(run.service_id);
        let result = {
            let _guard = lock.lock().await;
            self.finalize_locked(run, outcome).await
        };
        drop(lock);
        self.release_lock(run.service_id);
        result
    }

    async fn finalize_locked(&self, run: &OperationRun, outcome: ActivityStatus) -> Result<(), LifecycleError> {
        let Some(mut activity) = self.activities.find_by_id(run.activity.id).await? else {
            return Err(LifecycleError::NotFound(format!("activity {}", run.activity.id)));
        };
        if !activity.finish(outcome) {
            warn!(
                activity_id = %activity.id,
                status = %activity.status,
                "activity already finalized, keeping recorded outcome"
            );
            return Ok(());
        }

        let mut service = self.find_service(run.service_id).await?;
        if outcome == ActivityStatus::Completed && run.operation != ReconcileOperation::Destroy {
            service.dns = Some(run.env.project_dns());
        }
        service.apply(&activity);
        if !self.activities.record_transition(&activity, &service).await? {
            // failed by the self-healing sweep between the read and the write
            warn!(activity_id = %activity.id, "activity finalized concurrently, keeping recorded outcome");
            return Ok(());
        }

        counter!(
            "launchpad_operations_finished_total",
            "type" => activity.activity_type.as_str(),
            "outcome" => outcome.as_str()
        )
        .increment(1);
        info!(
            service_id = %service.id,
            activity_id = %activity.id,
            status = %service.status,
            "operation finished"
        );
        self.event_bus.publish_activity_event(ActivityEvent::Finished {
            activity_id: activity.id,
            service_id: service.id,
            activity_type: activity.activity_type,
            outcome,
            finished_at: activity.updated_at,
        });
        self.publish_state(&service);
        Ok(())
    }
}

#[async_trait]
impl LifecycleService for StandardLifecycleService {
    async fn create_service(
        &self,
        project_id: &ProjectId,
        manifest: &str,
        actor: &ActorId,
        demo: bool,
    ) -> Result<Service, LifecycleError> {
        let parsed = Manifest::from_encoded(manifest)?;
        if self.core.projects.find_by_id(project_id).await?.is_none() {
            return Err(LifecycleError::NotFound(format!("project {}", project_id)));
        }
        if demo && self.core.services.count_demo_by_creator(actor).await? >= DEMO_SERVICE_LIMIT {
            return Err(LifecycleError::DemoServiceLimit(DEMO_SERVICE_LIMIT));
        }

        let mut service = Service::new(project_id.clone(), parsed.name.clone(), manifest.trim(), actor.clone(), demo);
        self.core.services.insert(&service).await.map_err(|e| match e {
            RepositoryError::Conflict(_) => LifecycleError::UniqueName(parsed.name.clone()),
            other => LifecycleError::Repository(other),
        })?;

        let activity = Activity::completed(service.id, actor.clone(), ActivityType::Created);
        service.apply(&activity);
        self.core.activities.record_transition(&activity, &service).await?;

        info!(service_id = %service.id, name = %service.name, project_id = %project_id, demo, "service created");
        self.core.event_bus.publish_activity_event(ActivityEvent::Finished {
            activity_id: activity.id,
            service_id: service.id,
            activity_type: ActivityType::Created,
            outcome: ActivityStatus::Completed,
            finished_at: activity.updated_at,
        });
        self.core.publish_state(&service);
        Ok(service)
    }

    async fn update_manifest(
        &self,
        project_id: &ProjectId,
        service_id: ServiceId,
        manifest: &str,
        actor: &ActorId,
        note: &str,
    ) -> Result<Service, LifecycleError> {
        let parsed = Manifest::from_encoded(manifest)?;

        let lock = self.core.lock_for(service_id);
        let result = {
            let _guard = lock.lock().await;
            self.update_locked(project_id, service_id, parsed, manifest, actor, note).await
        };
        drop(lock);
        self.core.release_lock(service_id);
        result
    }

    async fn request_deploy(&self, service_id: ServiceId, actor: &ActorId) -> Result<Activity, LifecycleError> {
        self.request(ReconcileOperation::Deploy, service_id, actor).await
    }

    async fn request_destroy(&self, service_id: ServiceId, actor: &ActorId) -> Result<Activity, LifecycleError> {
        self.request(ReconcileOperation::Destroy, service_id, actor).await
    }

    async fn request_dev_deploy(&self, service_id: ServiceId, actor: &ActorId) -> Result<Activity, LifecycleError> {
        self.request(ReconcileOperation::DevDeploy, service_id, actor).await
    }

    async fn get_service(&self, service_id: ServiceId) -> Result<Service, LifecycleError> {
        self.core.find_service(service_id).await
    }

    async fn list_services(&self, project_id: &ProjectId, include_destroyed: bool) -> Result<Vec<Service>, LifecycleError> {
        let services = self.core.services.list_by_project(project_id).await?;
        if include_destroyed {
            return Ok(services);
        }
        let cutoff = Utc::now() - ChronoDuration::hours(DESTROYED_VISIBILITY_HOURS);
        Ok(services
            .into_iter()
            .filter(|s| s.status != ServiceStatus::Destroyed || s.updated_at > cutoff)
            .collect())
    }

    async fn list_activities(&self, service_id: ServiceId) -> Result<Vec<Activity>, LifecycleError> {
        self.core.find_service(service_id).await?;
        Ok(self.core.activities.list_by_service(service_id).await?)
    }

    async fn get_activity_logs(
        &self,
        service_id: ServiceId,
        activity_id: ActivityId,
    ) -> Result<Vec<LogLine>, LifecycleError> {
        let activity = self
            .core
            .activities
            .find_by_id(activity_id)
            .await?
            .filter(|a| a.service_id == service_id)
            .ok_or_else(|| LifecycleError::NotFound(format!("activity {}", activity_id)))?;
        Ok(self.core.logs.list_by_activity(activity.id).await?)
    }

    async fn endpoints(&self, service_id: ServiceId) -> Result<Vec<String>, LifecycleError> {
        let service = self.core.find_service(service_id).await?;
        let Some(manifest) = service.parsed_manifest() else {
            return Ok(Vec::new());
        };
        let (env, _) = self.core.environment(&service.project_id).await?;
        Ok(service.endpoints(&manifest, &env))
    }

    async fn dev_credentials(&self, service_id: ServiceId) -> Result<Option<String>, LifecycleError> {
        let service = self.core.find_service(service_id).await?;
        let (env, _) = self.core.environment(&service.project_id).await?;
        Ok(self.core.engine.dev_credentials(&env).await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::environment::{Project, ProjectSettings};
    use crate::domain::provider::ResourceKind;
    use crate::infrastructure::repositories::{InMemoryLifecycleStore, InMemoryLogRepository, InMemoryProjectRepository};
    use crate::infrastructure::event_bus::DomainEvent;
    use crate::infrastructure::sandbox::SandboxProvider;
    use crate::infrastructure::StandardProviderFactory;
    use std::time::Duration;

    const WEB: &str = "name: web\ncontainers:\n  web:\n    image: x\n    ports: [\"80\"]\n";

    struct Fixture {
        service: StandardLifecycleService,
        store: InMemoryLifecycleStore,
        logs: InMemoryLogRepository,
        sandbox: Arc<SandboxProvider>,
        pool: Arc<OperationPool>,
        bus: Arc<EventBus>,
    }

    async fn fixture() -> Fixture {
        let store = InMemoryLifecycleStore::new();
        let logs = InMemoryLogRepository::new();
        let projects = InMemoryProjectRepository::new();
        projects
            .save(&Project {
                id: ProjectId::from("p1"),
                name: "shop".into(),
                dns_name: "shop".into(),
                settings: ProjectSettings {
                    secrets: vec![Secret::new("TOKEN", "t0k")],
                    ..Default::default()
                },
            })
            .await
            .unwrap();
        let sandbox = Arc::new(SandboxProvider::new());
        let engine = Arc::new(ReconcileEngine::new(Arc::new(StandardProviderFactory::new(sandbox.clone()))));
        let pool = Arc::new(OperationPool::new(4));
        let bus = Arc::new(EventBus::with_default_capacity());
        let service = StandardLifecycleService::new(
            Arc::new(store.clone()),
            Arc::new(store.clone()),
            Arc::new(logs.clone()),
            Arc::new(projects),
            engine,
            bus.clone(),
            pool.clone(),
            None,
            None,
        );
        Fixture {
            service,
            store,
            logs,
            sandbox,
            pool,
            bus,
        }
    }

    fn actor() -> ActorId {
        ActorId::from("alice")
    }

    impl Fixture {
        async fn create(&self, yaml: &str) -> Service {
            self.service
                .create_service(&ProjectId::from("p1"), &Manifest::encode(yaml), &actor(), false)
                .await
                .expect("create")
        }

        async fn settle(&self) {
            // closing the pool also waits for everything in flight
            assert!(self.pool.shutdown(Duration::from_secs(30)).await);
        }

        async fn status(&self, id: ServiceId) -> ServiceStatus {
            self.service.get_service(id).await.unwrap().status
        }
    }

    #[tokio::test]
    async fn test_create_service() {
        let f = fixture().await;
        let svc = f.create(WEB).await;
        assert_eq!(svc.status, ServiceStatus::Created);
        assert_eq!(svc.name, "web");

        let activities = f.service.list_activities(svc.id).await.unwrap();
        assert_eq!(activities.len(), 1);
        assert_eq!(activities[0].activity_type, ActivityType::Created);
        assert_eq!(activities[0].status, ActivityStatus::Completed);

        let err = f
            .service
            .create_service(&ProjectId::from("p1"), &Manifest::encode(WEB), &actor(), false)
            .await
            .unwrap_err();
        assert!(matches!(err, LifecycleError::UniqueName(name) if name == "web"));

        let err = f
            .service
            .create_service(&ProjectId::from("p1"), &Manifest::encode("name: bad_name\n"), &actor(), false)
            .await
            .unwrap_err();
        assert!(matches!(err, LifecycleError::Validation(_)));
    }

    #[tokio::test]
    async fn test_demo_service_limit() {
        let f = fixture().await;
        for i in 0..DEMO_SERVICE_LIMIT {
            let yaml = format!("name: demo{}\ncontainers:\n  a:\n    image: x\n", i);
            f.service
                .create_service(&ProjectId::from("p1"), &Manifest::encode(&yaml), &actor(), true)
                .await
                .expect("within limit");
        }
        let err = f
            .service
            .create_service(
                &ProjectId::from("p1"),
                &Manifest::encode("name: one-more\ncontainers:\n  a:\n    image: x\n"),
                &actor(),
                true,
            )
            .await
            .unwrap_err();
        assert!(matches!(err, LifecycleError::DemoServiceLimit(5)));
    }

    #[tokio::test]
    async fn test_deploy_completes_and_records_transcript() {
        let f = fixture().await;
        let mut events = f.bus.subscribe();
        let svc = f.create(WEB).await;

        let activity = f.service.request_deploy(svc.id, &actor()).await.unwrap();
        assert_eq!(activity.status, ActivityStatus::InProgress);
        f.settle().await;

        let stored = f.service.get_service(svc.id).await.unwrap();
        assert_eq!(stored.status, ServiceStatus::Deployed);
        assert_eq!(stored.dns.as_deref(), Some("shop.example.com"));
        assert!(!stored.dev);

        let activities = f.service.list_activities(svc.id).await.unwrap();
        assert_eq!(activities.len(), 2);
        assert!(activities.iter().all(|a| a.status == ActivityStatus::Completed));

        let lines = f.service.get_activity_logs(svc.id, activity.id).await.unwrap();
        assert_eq!(lines.first().unwrap().log, "Deploying the service 'web'...");
        assert_eq!(lines.last().unwrap().log, "Service 'web' successfully deployed.");

        // Created, Deploying, Deployed
        let mut statuses = Vec::new();
        while let Ok(Ok(event)) = tokio::time::timeout(Duration::from_millis(100), events.recv()).await {
            if let DomainEvent::Service(ServiceEvent::StateChanged { service, .. }) = event {
                statuses.push(service.status);
            }
        }
        assert_eq!(
            statuses,
            vec![ServiceStatus::Created, ServiceStatus::Deploying, ServiceStatus::Deployed]
        );
    }

    #[tokio::test]
    async fn test_guards_reject_overlapping_operations() {
        let f = fixture().await;
        let svc = f.create(WEB).await;
        f.sandbox.hold(ResourceKind::Workload);

        f.service.request_deploy(svc.id, &actor()).await.unwrap();
        assert_eq!(f.status(svc.id).await, ServiceStatus::Deploying);

        for result in [
            f.service.request_deploy(svc.id, &actor()).await,
            f.service.request_destroy(svc.id, &actor()).await,
            f.service.request_dev_deploy(svc.id, &actor()).await,
        ] {
            assert!(matches!(
                result,
                Err(LifecycleError::InvalidServiceStatus(ServiceStatus::Deploying))
            ));
        }
        // only the deploy activity is in progress
        let in_progress = f
            .service
            .list_activities(svc.id)
            .await
            .unwrap()
            .into_iter()
            .filter(|a| a.status == ActivityStatus::InProgress)
            .count();
        assert_eq!(in_progress, 1);
    }

    #[tokio::test]
    async fn test_concurrent_requests_start_one_operation() {
        let f = fixture().await;
        let svc = f.create(WEB).await;
        f.sandbox.hold(ResourceKind::Workload);

        let (actor_a, actor_b) = (actor(), actor());
        let (a, b) = tokio::join!(
            f.service.request_deploy(svc.id, &actor_a),
            f.service.request_deploy(svc.id, &actor_b)
        );
        assert_eq!(a.is_ok() as u8 + b.is_ok() as u8, 1);
    }

    #[tokio::test]
    async fn test_failed_operation_is_recorded() {
        let f = fixture().await;
        let svc = f.create(WEB).await;
        f.sandbox.fail_on(ResourceKind::Namespace, "forbidden");

        let activity = f.service.request_deploy(svc.id, &actor()).await.unwrap();
        f.settle().await;

        assert_eq!(f.status(svc.id).await, ServiceStatus::Failed);
        let stored = ActivityRepository::find_by_id(&f.store, activity.id).await.unwrap().unwrap();
        assert_eq!(stored.status, ActivityStatus::Failed);
        let lines = f.logs.list_by_activity(activity.id).await.unwrap();
        assert!(lines.last().unwrap().log.contains("forbidden"));
    }

    #[tokio::test]
    async fn test_dev_deploy_on_created_service() {
        let f = fixture().await;
        let svc = f.create("name: web\nreplicas: 2\ncontainers:\n  web:\n    image: x\n    ports: [\"80\"]\n").await;

        f.service.request_dev_deploy(svc.id, &actor()).await.unwrap();
        f.settle().await;

        let stored = f.service.get_service(svc.id).await.unwrap();
        assert_eq!(stored.status, ServiceStatus::DevDeployed);
        assert!(stored.dev);
        let workload = f.sandbox.workload("shop", "web").expect("workload");
        assert_eq!(workload.manifest.replicas, 1);
        assert_eq!(workload.manifest.containers["web"].command, "tail");
        // stored manifest unchanged
        assert_eq!(stored.parsed_manifest().unwrap().replicas, 2);
    }

    #[tokio::test]
    async fn test_dev_deploy_when_already_in_dev_mode_is_noop() {
        let f = fixture().await;
        let svc = f.create(WEB).await;
        let first = f.service.request_dev_deploy(svc.id, &actor()).await.unwrap();
        tokio::time::timeout(Duration::from_secs(5), async {
            while f.status(svc.id).await != ServiceStatus::DevDeployed {
                tokio::task::yield_now().await;
            }
        })
        .await
        .expect("dev deploy finished");

        let again = f.service.request_dev_deploy(svc.id, &actor()).await.unwrap();
        assert_eq!(again.id, first.id);
        assert_eq!(f.service.list_activities(svc.id).await.unwrap().len(), 2);

        // a manifest edit is newer but is not the dev deployment
        f.service
            .update_manifest(&ProjectId::from("p1"), svc.id, &Manifest::encode(WEB), &actor(), "")
            .await
            .unwrap();
        assert_eq!(f.status(svc.id).await, ServiceStatus::DevDeployed);
        let again = f.service.request_dev_deploy(svc.id, &actor()).await.unwrap();
        assert_eq!(again.id, first.id);
        assert_eq!(again.activity_type, ActivityType::DevDeployed);
    }

    #[tokio::test(start_paused = true)]
    async fn test_late_finish_keeps_swept_failure() {
        let f = fixture().await;
        let mut events = f.bus.subscribe();
        let svc = f.create(WEB).await;
        f.sandbox.hold(ResourceKind::Workload);

        let activity = f.service.request_deploy(svc.id, &actor()).await.unwrap();
        assert!(f.store.fail_abandoned(activity.id).await.unwrap());
        f.sandbox.release(ResourceKind::Workload);
        f.settle().await;

        assert_eq!(f.status(svc.id).await, ServiceStatus::Failed);
        let stored = ActivityRepository::find_by_id(&f.store, activity.id).await.unwrap().unwrap();
        assert_eq!(stored.status, ActivityStatus::Failed);

        while let Ok(Ok(event)) = tokio::time::timeout(Duration::from_millis(100), events.recv()).await {
            assert!(!matches!(
                event,
                DomainEvent::Activity(ActivityEvent::Finished { activity_id, .. }) if activity_id == activity.id
            ));
        }
    }

    #[tokio::test]
    async fn test_service_locks_are_released() {
        let f = fixture().await;
        let svc = f.create(WEB).await;
        let other = f.create("name: api\ncontainers:\n  api:\n    image: y\n").await;

        f.service.request_deploy(svc.id, &actor()).await.unwrap();
        f.service.request_dev_deploy(other.id, &actor()).await.unwrap();
        assert!(f.service.request_destroy(ServiceId::new(), &actor()).await.is_err());
        f.service
            .update_manifest(&ProjectId::from("p1"), svc.id, &Manifest::encode(WEB), &actor(), "")
            .await
            .unwrap();
        f.settle().await;

        assert_eq!(f.status(svc.id).await, ServiceStatus::Deployed);
        assert!(f.service.core.locks.is_empty());
    }

    #[tokio::test]
    async fn test_destroy_clears_dns_and_hides_later() {
        let f = fixture().await;
        let svc = f.create(WEB).await;
        f.service.request_deploy(svc.id, &actor()).await.unwrap();
        tokio::time::timeout(Duration::from_secs(5), async {
            while f.status(svc.id).await != ServiceStatus::Deployed {
                tokio::task::yield_now().await;
            }
        })
        .await
        .expect("deploy finished");

        f.service.request_destroy(svc.id, &actor()).await.unwrap();
        f.settle().await;

        let stored = f.service.get_service(svc.id).await.unwrap();
        assert_eq!(stored.status, ServiceStatus::Destroyed);
        assert!(stored.dns.is_none());
        assert!(f.sandbox.workload("shop", "web").is_none());
        assert!(matches!(
            f.service.request_deploy(svc.id, &actor()).await,
            Err(LifecycleError::InvalidServiceStatus(ServiceStatus::Destroyed))
        ));

        // recently destroyed services stay listed
        assert_eq!(f.service.list_services(&ProjectId::from("p1"), false).await.unwrap().len(), 1);

        let mut old = stored.clone();
        old.updated_at = Utc::now() - ChronoDuration::hours(2);
        f.store.save(&old).await.unwrap();
        assert!(f.service.list_services(&ProjectId::from("p1"), false).await.unwrap().is_empty());
        assert_eq!(f.service.list_services(&ProjectId::from("p1"), true).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_update_manifest_keeps_status() {
        let f = fixture().await;
        let svc = f.create(WEB).await;
        let renamed = Manifest::encode("name: api\ncontainers:\n  api:\n    image: y\n");
        let updated = f
            .service
            .update_manifest(&ProjectId::from("p1"), svc.id, &renamed, &actor(), "switch to api image")
            .await
            .unwrap();
        assert_eq!(updated.name, "api");
        assert_eq!(updated.status, ServiceStatus::Created);

        let activities = f.service.list_activities(svc.id).await.unwrap();
        let update = activities
            .iter()
            .find(|a| a.activity_type == ActivityType::Updated)
            .expect("update activity");
        let lines = f.service.get_activity_logs(svc.id, update.id).await.unwrap();
        assert_eq!(lines[0].log, "switch to api image");

        let err = f
            .service
            .update_manifest(&ProjectId::from("other"), svc.id, &renamed, &actor(), "")
            .await
            .unwrap_err();
        assert!(matches!(err, LifecycleError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_missing_manifest_and_unknown_service() {
        let f = fixture().await;
        let svc = f.create(WEB).await;
        let mut stored = f.service.get_service(svc.id).await.unwrap();
        stored.manifest = String::new();
        f.store.save(&stored).await.unwrap();

        assert!(matches!(
            f.service.request_deploy(svc.id, &actor()).await,
            Err(LifecycleError::MissingManifest)
        ));
        assert!(matches!(
            f.service.request_deploy(ServiceId::new(), &actor()).await,
            Err(LifecycleError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_endpoints_and_dev_credentials() {
        let f = fixture().await;
        let svc = f.create(WEB).await;
        assert!(f.service.endpoints(svc.id).await.unwrap().is_empty());

        f.service.request_deploy(svc.id, &actor()).await.unwrap();
        f.settle().await;

        assert_eq!(
            f.service.endpoints(svc.id).await.unwrap(),
            vec!["http://web.shop.example.com"]
        );
        assert_eq!(
            f.service.dev_credentials(svc.id).await.unwrap().as_deref(),
            Some("sandbox-token-shop-dev")
        );
    }

    #[tokio::test]
    async fn test_shutdown_rejects_new_requests() {
        let f = fixture().await;
        let svc = f.create(WEB).await;
        f.settle().await;
        assert!(matches!(
            f.service.request_deploy(svc.id, &actor()).await,
            Err(LifecycleError::ShuttingDown)
        ));
        assert_eq!(f.status(svc.id).await, ServiceStatus::Created);
    }
}
