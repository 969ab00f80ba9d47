// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

use launchpad_core::application::lifecycle::{LifecycleService, StandardLifecycleService};
use launchpad_core::application::notification_hub::{NotificationHub, DEFAULT_SEND_BUFFER};
use launchpad_core::application::operations::OperationPool;
use launchpad_core::application::reconciler::ReconcileEngine;
use launchpad_core::application::self_healing::{SelfHealingConfig, SelfHealingSweep, ACTIVITY_TIMED_OUT};
use launchpad_core::domain::activity::{Activity, ActivityStatus, ActivityType};
use launchpad_core::domain::dev::{SYNC_CONTAINER, SYNC_VOLUME};
use launchpad_core::domain::environment::{Project, ProjectId, ProjectSettings};
use launchpad_core::domain::manifest::Manifest;
use launchpad_core::domain::provider::ResourceKind;
use launchpad_core::domain::repository::{ActivityRepository, LogRepository, ProjectRepository, ServiceRepository};
use launchpad_core::domain::service::{ActorId, Service, ServiceStatus};
use launchpad_core::infrastructure::event_bus::EventBus;
use launchpad_core::infrastructure::repositories::{
    InMemoryLifecycleStore, InMemoryLogRepository, InMemoryProjectRepository,
};
use launchpad_core::infrastructure::sandbox::SandboxProvider;
use launchpad_core::infrastructure::StandardProviderFactory;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::timeout;

const WEB: &str = "containers:\n  web:\n    image: x\n    ports: [\"80\"]\n";

struct ControlPlane {
    lifecycle: StandardLifecycleService,
    store: InMemoryLifecycleStore,
    logs: InMemoryLogRepository,
    sandbox: Arc<SandboxProvider>,
    pool: Arc<OperationPool>,
    bus: Arc<EventBus>,
}

async fn control_plane() -> ControlPlane {
    let store = InMemoryLifecycleStore::new();
    let logs = InMemoryLogRepository::new();
    let projects = InMemoryProjectRepository::new();
    projects
        .save(&Project {
            id: ProjectId::from("acme"),
            name: "Acme".into(),
            dns_name: "acme".into(),
            settings: ProjectSettings::default(),
        })
        .await
        .unwrap();

    let sandbox = Arc::new(SandboxProvider::new());
    let engine = Arc::new(ReconcileEngine::new(Arc::new(StandardProviderFactory::new(sandbox.clone()))));
    let pool = Arc::new(OperationPool::new(8));
    let bus = Arc::new(EventBus::with_default_capacity());
    let lifecycle = StandardLifecycleService::new(
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
    ControlPlane {
        lifecycle,
        store,
        logs,
        sandbox,
        pool,
        bus,
    }
}

impl ControlPlane {
    async fn create(&self, name: &str, yaml: &str) -> Service {
        let manifest = Manifest::encode(&format!("name: {}\n{}", name, yaml));
        self.lifecycle
            .create_service(&ProjectId::from("acme"), &manifest, &ActorId::from("ada"), false)
            .await
            .expect("service created")
    }

    async fn wait_for(&self, service: &Service, status: ServiceStatus) {
        timeout(Duration::from_secs(10), async {
            loop {
                if self.lifecycle.get_service(service.id).await.unwrap().status == status {
                    return;
                }
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .unwrap_or_else(|_| panic!("service never reached {}", status));
    }
}

#[tokio::test]
async fn test_create_then_deploy() {
    let cp = control_plane().await;
    let service = cp.create("web", WEB).await;
    assert_eq!(service.status, ServiceStatus::Created);

    let activity = cp.lifecycle.request_deploy(service.id, &ActorId::from("ada")).await.unwrap();
    assert_eq!(activity.activity_type, ActivityType::Deployed);
    assert_eq!(
        cp.lifecycle.get_service(service.id).await.unwrap().status,
        ServiceStatus::Deploying
    );

    cp.wait_for(&service, ServiceStatus::Deployed).await;

    let activities = cp.lifecycle.list_activities(service.id).await.unwrap();
    let summary: Vec<(ActivityType, ActivityStatus)> =
        activities.iter().map(|a| (a.activity_type, a.status)).collect();
    assert_eq!(
        summary,
        vec![
            (ActivityType::Created, ActivityStatus::Completed),
            (ActivityType::Deployed, ActivityStatus::Completed),
        ]
    );

    // transcript is complete once the activity is terminal
    let lines = cp.logs.list_by_activity(activity.id).await.unwrap();
    assert!(lines.len() >= 3);
    assert_eq!(lines.last().unwrap().log, "Service 'web' successfully deployed.");

    let workload = cp.sandbox.workload("acme", "web").unwrap();
    assert_eq!(workload.manifest.replicas, 1);
    assert!(cp.sandbox.get("acme", ResourceKind::NetworkService, "web").is_some());
    assert!(cp
        .sandbox
        .get("acme", ResourceKind::NetworkService, "web-load-balancer")
        .is_some());
}

#[tokio::test]
async fn test_dev_deploy_on_created_service() {
    let cp = control_plane().await;
    let service = cp.create("api", WEB).await;

    cp.lifecycle
        .request_dev_deploy(service.id, &ActorId::from("ada"))
        .await
        .unwrap();
    cp.wait_for(&service, ServiceStatus::DevDeployed).await;

    let workload = cp.sandbox.workload("acme", "api").unwrap();
    let manifest = workload.manifest;
    assert_eq!(manifest.replicas, 1);
    assert_eq!(manifest.containers["web"].command, "tail");
    assert!(manifest.containers.contains_key(SYNC_CONTAINER));
    assert!(manifest.volumes.contains_key(SYNC_VOLUME));
    assert!(manifest.containers["web"].mounts.contains_key(SYNC_VOLUME));

    let stored = cp.lifecycle.get_service(service.id).await.unwrap();
    assert!(stored.dev);
}

#[tokio::test]
async fn test_deploy_destroy_redeploy_is_rejected() {
    let cp = control_plane().await;
    let service = cp.create("web", WEB).await;
    let actor = ActorId::from("ada");

    cp.lifecycle.request_deploy(service.id, &actor).await.unwrap();
    cp.wait_for(&service, ServiceStatus::Deployed).await;
    // deploy is idempotent
    cp.lifecycle.request_deploy(service.id, &actor).await.unwrap();
    cp.wait_for(&service, ServiceStatus::Deployed).await;

    cp.lifecycle.request_destroy(service.id, &actor).await.unwrap();
    cp.wait_for(&service, ServiceStatus::Destroyed).await;
    assert!(cp.sandbox.list("acme").iter().all(|(_, name)| name != "web"));

    assert!(cp.lifecycle.request_deploy(service.id, &actor).await.is_err());
    assert!(cp.lifecycle.request_destroy(service.id, &actor).await.is_err());
}

#[tokio::test]
async fn test_hub_client_sees_state_changes() {
    let cp = control_plane().await;
    let (hub, _task) = NotificationHub::spawn(DEFAULT_SEND_BUFFER);
    let _forwarder = hub.forward_events(&cp.bus);
    let mut client = hub.register().unwrap();
    hub.authenticate(client.id, ProjectId::from("acme")).unwrap();
    assert_eq!(hub.connection_count().await.unwrap(), 1);

    let service = cp.create("web", WEB).await;
    cp.lifecycle.request_deploy(service.id, &ActorId::from("ada")).await.unwrap();
    assert!(cp.pool.shutdown(Duration::from_secs(10)).await);

    let mut statuses = Vec::new();
    while let Ok(Some(frame)) = timeout(Duration::from_millis(200), client.outbound.recv()).await {
        let value: serde_json::Value = serde_json::from_str(&frame).unwrap();
        assert_eq!(value["type"], "service");
        statuses.push(value["service"]["status"].as_str().unwrap().to_string());
    }
    assert_eq!(statuses, vec!["created", "deploying", "deployed"]);
}

#[tokio::test]
async fn test_sweep_fails_operation_lost_in_a_restart() {
    let cp = control_plane().await;
    let service = cp.create("web", WEB).await;

    // an operation whose process died: in progress, untouched for 20 minutes
    let mut stored = cp.lifecycle.get_service(service.id).await.unwrap();
    let mut activity = Activity::in_progress(service.id, ActorId::from("ada"), ActivityType::Deployed);
    activity.updated_at = chrono::Utc::now() - chrono::Duration::minutes(20);
    stored.apply(&activity);
    cp.store.record_transition(&activity, &stored).await.unwrap();

    let sweep = SelfHealingSweep::new(
        Arc::new(cp.store.clone()),
        Arc::new(cp.store.clone()),
        Arc::new(cp.logs.clone()),
        cp.bus.clone(),
        SelfHealingConfig::default(),
    );
    let report = sweep.sweep().await.unwrap();
    assert_eq!(report.activities_failed, 1);

    let recovered = cp.lifecycle.get_service(service.id).await.unwrap();
    assert_eq!(recovered.status, ServiceStatus::Failed);
    let lines = cp.logs.list_by_activity(activity.id).await.unwrap();
    assert_eq!(lines.last().unwrap().log, ACTIVITY_TIMED_OUT);
    let failed = ActivityRepository::find_by_id(&cp.store, activity.id).await.unwrap().unwrap();
    assert_eq!(failed.status, ActivityStatus::Failed);

    // a failed service can be deployed again
    cp.lifecycle.request_deploy(service.id, &ActorId::from("ada")).await.unwrap();
    cp.wait_for(&service, ServiceStatus::Deployed).await;
    assert!(ServiceRepository::find_by_id(&cp.store, service.id).await.unwrap().unwrap().dns.is_some());
}
