// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Self-Healing Sweep - Background task failing abandoned work
//!
//! Operations can be lost when the process dies mid-reconciliation. Two passes
//! run on every tick:
//!
//! - **Activities**: in progress and untouched past the stale threshold. One
//!   that still wrote transcript lines recently is only touched; otherwise it
//!   gets a final error line and is failed together with its service.
//! - **Services**: stuck in a transitional status past the stale threshold
//!   with no recent in-progress activity are forced to `Failed`.
//!
//! # Architecture
//!
//! - **Layer:** Application Layer
//! - **Purpose:** Recovery of activities and services nobody will finish

use anyhow::Result;
use chrono::{Duration as ChronoDuration, Utc};
use metrics::counter;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::domain::activity::LogLine;
use crate::domain::config::ReconcilerConfig;
use crate::domain::events::ServiceEvent;
use crate::domain::repository::{ActivityRepository, LogRepository, ServiceRepository};
use crate::domain::service::ServiceStatus;
use crate::infrastructure::event_bus::EventBus;

/// Last transcript line of an activity failed by the sweep.
pub const ACTIVITY_TIMED_OUT: &str = "Internal Server Error: activity timed out";

#[derive(Debug, Clone)]
pub struct SelfHealingConfig {
    pub interval: Duration,
    /// Age past which in-progress work counts as abandoned
    pub stale_after: Duration,
    /// Transcript or activity updates within this window count as alive
    pub recent_activity: Duration,
}

impl From<&ReconcilerConfig> for SelfHealingConfig {
    fn from(config: &ReconcilerConfig) -> Self {
        Self {
            interval: config.sweep_interval(),
            stale_after: config.stale_after(),
            recent_activity: config.recent_activity(),
        }
    }
}

impl Default for SelfHealingConfig {
    fn default() -> Self {
        Self::from(&ReconcilerConfig::default())
    }
}

/// Outcome of one sweep cycle.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct SweepReport {
    pub activities_failed: usize,
    pub activities_touched: usize,
    pub services_failed: usize,
}

pub struct SelfHealingSweep {
    services: Arc<dyn ServiceRepository>,
    activities: Arc<dyn ActivityRepository>,
    logs: Arc<dyn LogRepository>,
    event_bus: Arc<EventBus>,
    config: SelfHealingConfig,
    shutdown_token: CancellationToken,
}

impl SelfHealingSweep {
    pub fn new(
        services: Arc<dyn ServiceRepository>,
        activities: Arc<dyn ActivityRepository>,
        logs: Arc<dyn LogRepository>,
        event_bus: Arc<EventBus>,
        config: SelfHealingConfig,
    ) -> Self {
        Self {
            services,
            activities,
            logs,
            event_bus,
            config,
            shutdown_token: CancellationToken::new(),
        }
    }

    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown_token.clone()
    }

    pub fn start(self: Arc<Self>) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            self.run().await;
        })
    }

    async fn run(&self) {
        info!(
            interval_secs = self.config.interval.as_secs(),
            stale_after_secs = self.config.stale_after.as_secs(),
            "Starting self-healing sweep"
        );

        let mut tick = interval(self.config.interval);
        tick.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = tick.tick() => {
                    match self.sweep().await {
                        Ok(report) if report != SweepReport::default() => {
                            info!(?report, "self-healing sweep recovered abandoned work");
                        }
                        Ok(_) => debug!("self-healing sweep found nothing to do"),
                        Err(e) => warn!("Self-healing sweep failed: {}", e),
                    }
                }
                _ = self.shutdown_token.cancelled() => {
                    info!("Shutdown signal received, stopping self-healing sweep");
                    break;
                }
            }
        }
    }

    /// Runs both passes once.
    pub async fn sweep(&self) -> Result<SweepReport> {
        let mut report = SweepReport::default();
        self.sweep_activities(&mut report).await?;
        self.sweep_services(&mut report).await?;
        Ok(report)
    }

    async fn sweep_activities(&self, report: &mut SweepReport) -> Result<()> {
        let now = Utc::now();
        let stale_before = now - to_chrono(self.config.stale_after);
        let recent_since = now - to_chrono(self.config.recent_activity);

        for activity in self.activities.find_stale_in_progress(stale_before).await? {
            if self.logs.has_lines_since(activity.id, recent_since).await? {
                self.activities.touch(activity.id, now).await?;
                report.activities_touched += 1;
                continue;
            }

            if !self.activities.fail_abandoned(activity.id).await? {
                // finished in the meantime
                continue;
            }
            if let Err(e) = self.logs.append(&LogLine::new(activity.id, ACTIVITY_TIMED_OUT)).await {
                warn!(activity_id = %activity.id, error = %e, "failed to write timeout line");
            }
            report.activities_failed += 1;
            counter!("launchpad_selfheal_failed_total", "kind" => "activity").increment(1);
            warn!(
                activity_id = %activity.id,
                service_id = %activity.service_id,
                activity_type = %activity.activity_type,
                "failed abandoned activity"
            );

            self.event_bus.publish_service_event(ServiceEvent::ForcedFailed {
                service_id: activity.service_id,
                reason: ACTIVITY_TIMED_OUT.to_string(),
                failed_at: Utc::now(),
            });
            if let Some(service) = self.services.find_by_id(activity.service_id).await? {
                self.event_bus.publish_service_event(ServiceEvent::StateChanged {
                    service: Box::new(service),
                    changed_at: Utc::now(),
                });
            }
        }
        Ok(())
    }

    async fn sweep_services(&self, report: &mut SweepReport) -> Result<()> {
        let now = Utc::now();
        let stale_before = now - to_chrono(self.config.stale_after);
        let recent_since = now - to_chrono(self.config.recent_activity);

        for service in self.services.find_stale(&ServiceStatus::TRANSITIONAL, stale_before).await? {
            if self.activities.has_recent_in_progress(service.id, recent_since).await? {
                continue;
            }
            self.services.force_status(service.id, ServiceStatus::Failed).await?;
            report.services_failed += 1;
            counter!("launchpad_selfheal_failed_total", "kind" => "service").increment(1);
            warn!(
                service_id = %service.id,
                status = %service.status,
                "forced stuck service to failed"
            );

            let reason = format!("stuck in status {}", service.status);
            self.event_bus.publish_service_event(ServiceEvent::ForcedFailed {
                service_id: service.id,
                reason,
                failed_at: Utc::now(),
            });
            if let Some(service) = self.services.find_by_id(service.id).await? {
                self.event_bus.publish_service_event(ServiceEvent::StateChanged {
                    service: Box::new(service),
                    changed_at: Utc::now(),
                });
            }
        }
        Ok(())
    }
}

fn to_chrono(duration: Duration) -> ChronoDuration {
    ChronoDuration::from_std(duration).unwrap_or_else(|_| ChronoDuration::days(365))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::activity::{Activity, ActivityId, ActivityStatus, ActivityType};
    use crate::domain::environment::ProjectId;
    use crate::domain::repository::RepositoryError;
    use crate::domain::service::{ActorId, Service, ServiceId};
    use crate::infrastructure::repositories::{InMemoryLifecycleStore, InMemoryLogRepository};
    use async_trait::async_trait;
    use chrono::DateTime;

    /// Store whose stale query answers from an earlier snapshot, as when an
    /// operation finishes between the query and the sweep's write.
    struct SnapshotActivities {
        inner: InMemoryLifecycleStore,
        stale: Vec<Activity>,
    }

    #[async_trait]
    impl ActivityRepository for SnapshotActivities {
        async fn record_transition(&self, activity: &Activity, service: &Service) -> Result<bool, RepositoryError> {
            self.inner.record_transition(activity, service).await
        }

        async fn find_by_id(&self, id: ActivityId) -> Result<Option<Activity>, RepositoryError> {
            ActivityRepository::find_by_id(&self.inner, id).await
        }

        async fn list_by_service(&self, service_id: ServiceId) -> Result<Vec<Activity>, RepositoryError> {
            self.inner.list_by_service(service_id).await
        }

        async fn find_stale_in_progress(&self, _: DateTime<Utc>) -> Result<Vec<Activity>, RepositoryError> {
            Ok(self.stale.clone())
        }

        async fn has_recent_in_progress(&self, service_id: ServiceId, since: DateTime<Utc>) -> Result<bool, RepositoryError> {
            self.inner.has_recent_in_progress(service_id, since).await
        }

        async fn touch(&self, id: ActivityId, at: DateTime<Utc>) -> Result<(), RepositoryError> {
            self.inner.touch(id, at).await
        }

        async fn fail_abandoned(&self, id: ActivityId) -> Result<bool, RepositoryError> {
            self.inner.fail_abandoned(id).await
        }
    }

    struct Fixture {
        sweep: SelfHealingSweep,
        store: InMemoryLifecycleStore,
        logs: InMemoryLogRepository,
    }

    fn fixture() -> Fixture {
        let store = InMemoryLifecycleStore::new();
        let logs = InMemoryLogRepository::new();
        let sweep = SelfHealingSweep::new(
            Arc::new(store.clone()),
            Arc::new(store.clone()),
            Arc::new(logs.clone()),
            Arc::new(EventBus::with_default_capacity()),
            SelfHealingConfig::default(),
        );
        Fixture { sweep, store, logs }
    }

    /// Service with an in-progress deploy last updated `minutes_ago`.
    async fn deploying(store: &InMemoryLifecycleStore, name: &str, minutes_ago: i64) -> (Service, Activity) {
        let mut service = Service::new(ProjectId::from("p"), name, "", ActorId::from("a"), false);
        store.insert(&service).await.unwrap();
        let mut activity = Activity::in_progress(service.id, ActorId::from("a"), ActivityType::Deployed);
        activity.updated_at = Utc::now() - ChronoDuration::minutes(minutes_ago);
        service.apply(&activity);
        store.record_transition(&activity, &service).await.unwrap();
        (service, activity)
    }

    #[tokio::test]
    async fn test_abandoned_activity_is_failed() {
        let f = fixture();
        let (service, activity) = deploying(&f.store, "web", 20).await;

        let report = f.sweep.sweep().await.unwrap();
        assert_eq!(report.activities_failed, 1);

        let stored = ActivityRepository::find_by_id(&f.store, activity.id).await.unwrap().unwrap();
        assert_eq!(stored.status, ActivityStatus::Failed);
        let svc = ServiceRepository::find_by_id(&f.store, service.id).await.unwrap().unwrap();
        assert_eq!(svc.status, ServiceStatus::Failed);
        let lines = f.logs.list_by_activity(activity.id).await.unwrap();
        assert_eq!(lines.last().unwrap().log, ACTIVITY_TIMED_OUT);

        // second pass is a no-op
        assert_eq!(f.sweep.sweep().await.unwrap(), SweepReport::default());
    }

    #[tokio::test]
    async fn test_activity_finished_during_sweep_gets_no_timeout_line() {
        let store = InMemoryLifecycleStore::new();
        let logs = InMemoryLogRepository::new();
        let (mut service, mut activity) = deploying(&store, "web", 20).await;
        let stale = vec![activity.clone()];

        assert!(activity.finish(ActivityStatus::Completed));
        service.apply(&activity);
        assert!(store.record_transition(&activity, &service).await.unwrap());
        let mut last = LogLine::new(activity.id, "Service 'web' successfully deployed.");
        last.created_at = Utc::now() - ChronoDuration::minutes(20);
        logs.append(&last).await.unwrap();

        let sweep = SelfHealingSweep::new(
            Arc::new(store.clone()),
            Arc::new(SnapshotActivities { inner: store.clone(), stale }),
            Arc::new(logs.clone()),
            Arc::new(EventBus::with_default_capacity()),
            SelfHealingConfig::default(),
        );
        let report = sweep.sweep().await.unwrap();
        assert_eq!(report.activities_failed, 0);

        let lines = logs.list_by_activity(activity.id).await.unwrap();
        assert_eq!(lines.len(), 1);
        assert_eq!(lines[0].log, "Service 'web' successfully deployed.");
        let stored = ActivityRepository::find_by_id(&store, activity.id).await.unwrap().unwrap();
        assert_eq!(stored.status, ActivityStatus::Completed);
        let svc = ServiceRepository::find_by_id(&store, service.id).await.unwrap().unwrap();
        assert_eq!(svc.status, ServiceStatus::Deployed);
    }

    #[tokio::test]
    async fn test_activity_with_recent_lines_is_touched() {
        let f = fixture();
        let (service, activity) = deploying(&f.store, "web", 20).await;
        f.logs.append(&LogLine::new(activity.id, "still working")).await.unwrap();

        let report = f.sweep.sweep().await.unwrap();
        assert_eq!(report.activities_touched, 1);
        assert_eq!(report.activities_failed, 0);

        let stored = ActivityRepository::find_by_id(&f.store, activity.id).await.unwrap().unwrap();
        assert_eq!(stored.status, ActivityStatus::InProgress);
        assert!(stored.updated_at > Utc::now() - ChronoDuration::minutes(1));
        let svc = ServiceRepository::find_by_id(&f.store, service.id).await.unwrap().unwrap();
        assert_eq!(svc.status, ServiceStatus::Deploying);
    }

    #[tokio::test]
    async fn test_fresh_activity_is_left_alone() {
        let f = fixture();
        deploying(&f.store, "web", 2).await;
        assert_eq!(f.sweep.sweep().await.unwrap(), SweepReport::default());
    }

    #[tokio::test]
    async fn test_stuck_service_without_activity_is_failed() {
        let f = fixture();
        let mut service = Service::new(ProjectId::from("p"), "web", "", ActorId::from("a"), false);
        service.status = ServiceStatus::Destroying;
        service.updated_at = Utc::now() - ChronoDuration::minutes(30);
        f.store.insert(&service).await.unwrap();

        let report = f.sweep.sweep().await.unwrap();
        assert_eq!(report.services_failed, 1);
        let svc = ServiceRepository::find_by_id(&f.store, service.id).await.unwrap().unwrap();
        assert_eq!(svc.status, ServiceStatus::Failed);
    }

    #[tokio::test(start_paused = true)]
    async fn test_loop_stops_on_shutdown() {
        let f = fixture();
        let sweep = Arc::new(f.sweep);
        let token = sweep.shutdown_token();
        let handle = sweep.start();
        tokio::time::sleep(Duration::from_secs(180)).await;
        token.cancel();
        handle.await.unwrap();
    }
}
