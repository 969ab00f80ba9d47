// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Repository Implementations
//!
//! Infrastructure implementations of the repository abstractions defined in
//! the domain layer.
//!
//! # Architecture
//!
//! - **Layer:** Infrastructure
//! - **Purpose:** Persist and retrieve lifecycle aggregates
//! - **Pattern:** Repository (DDD), Adapter (Hexagonal Architecture)
//!
//! # Available Implementations
//!
//! ## PostgreSQL Repositories
//!
//! - **PostgresServiceRepository** - Service rows
//! - **PostgresActivityRepository** - Activities, with transactional status updates
//! - **PostgresLogRepository** - Activity transcripts
//! - **PostgresProjectRepository** - Project settings (JSONB)
//!
//! ## In-Memory Repositories
//!
//! - **InMemoryLifecycleStore** - Services and activities behind one lock, so
//!   a transition is atomic exactly as in the database
//! - **InMemoryLogRepository** - Transcript lines
//! - **InMemoryProjectRepository** - Project settings

pub mod postgres_activity;
pub mod postgres_log;
pub mod postgres_project;
pub mod postgres_service;

pub use postgres_activity::PostgresActivityRepository;
pub use postgres_log::PostgresLogRepository;
pub use postgres_project::PostgresProjectRepository;
pub use postgres_service::PostgresServiceRepository;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;

use crate::domain::activity::{Activity, ActivityId, ActivityStatus, LogLine};
use crate::domain::environment::{Project, ProjectId};
use crate::domain::repository::{
    ActivityRepository, LogRepository, ProjectRepository, RepositoryError, ServiceRepository,
};
use crate::domain::service::{ActorId, Service, ServiceId, ServiceStatus};

#[derive(Default)]
struct LifecycleState {
    services: HashMap<ServiceId, Service>,
    activities: HashMap<ActivityId, Activity>,
}

impl LifecycleState {
    fn check_unique(&self, service: &Service) -> Result<(), RepositoryError> {
        let taken = self.services.values().any(|s| {
            s.id != service.id
                && s.project_id == service.project_id
                && s.name == service.name
                && s.status != ServiceStatus::Destroyed
        });
        if taken {
            return Err(RepositoryError::Conflict(format!(
                "service '{}' already exists in project {}",
                service.name, service.project_id
            )));
        }
        Ok(())
    }
}

/// Services and activities sharing one lock.
#[derive(Clone, Default)]
pub struct InMemoryLifecycleStore {
    state: Arc<RwLock<LifecycleState>>,
}

impl InMemoryLifecycleStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ServiceRepository for InMemoryLifecycleStore {
    async fn insert(&self, service: &Service) -> Result<(), RepositoryError> {
        let mut state = self.state.write();
        if state.services.contains_key(&service.id) {
            return Err(RepositoryError::Conflict(format!("service {} already exists", service.id)));
        }
        state.check_unique(service)?;
        state.services.insert(service.id, service.clone());
        Ok(())
    }

    async fn save(&self, service: &Service) -> Result<(), RepositoryError> {
        let mut state = self.state.write();
        if !state.services.contains_key(&service.id) {
            return Err(RepositoryError::NotFound(format!("Service {} not found", service.id)));
        }
        state.check_unique(service)?;
        state.services.insert(service.id, service.clone());
        Ok(())
    }

    async fn find_by_id(&self, id: ServiceId) -> Result<Option<Service>, RepositoryError> {
        Ok(self.state.read().services.get(&id).cloned())
    }

    async fn list_by_project(&self, project_id: &ProjectId) -> Result<Vec<Service>, RepositoryError> {
        let state = self.state.read();
        let mut services: Vec<Service> = state
            .services
            .values()
            .filter(|s| &s.project_id == project_id)
            .cloned()
            .collect();
        services.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        Ok(services)
    }

    async fn count_demo_by_creator(&self, actor: &ActorId) -> Result<usize, RepositoryError> {
        let state = self.state.read();
        Ok(state
            .services
            .values()
            .filter(|s| s.demo && &s.created_by == actor)
            .count())
    }

    async fn find_stale(
        &self,
        statuses: &[ServiceStatus],
        updated_before: DateTime<Utc>,
    ) -> Result<Vec<Service>, RepositoryError> {
        let state = self.state.read();
        Ok(state
            .services
            .values()
            .filter(|s| statuses.contains(&s.status) && s.updated_at < updated_before)
            .cloned()
            .collect())
    }

    async fn find_expired_demos(
        &self,
        statuses: &[ServiceStatus],
        created_before: DateTime<Utc>,
    ) -> Result<Vec<Service>, RepositoryError> {
        let state = self.state.read();
        Ok(state
            .services
            .values()
            .filter(|s| s.demo && statuses.contains(&s.status) && s.created_at < created_before)
            .cloned()
            .collect())
    }

    async fn force_status(&self, id: ServiceId, status: ServiceStatus) -> Result<(), RepositoryError> {
        let mut state = self.state.write();
        let service = state
            .services
            .get_mut(&id)
            .ok_or_else(|| RepositoryError::NotFound(format!("Service {} not found", id)))?;
        service.status = status;
        service.updated_at = Utc::now();
        Ok(())
    }

    async fn set_demo(&self, id: ServiceId, demo: bool) -> Result<(), RepositoryError> {
        let mut state = self.state.write();
        let service = state
            .services
            .get_mut(&id)
            .ok_or_else(|| RepositoryError::NotFound(format!("Service {} not found", id)))?;
        service.demo = demo;
        Ok(())
    }
}

#[async_trait]
impl ActivityRepository for InMemoryLifecycleStore {
    async fn record_transition(&self, activity: &Activity, service: &Service) -> Result<bool, RepositoryError> {
        let mut state = self.state.write();
        if !state.services.contains_key(&service.id) {
            return Err(RepositoryError::NotFound(format!("Service {} not found", service.id)));
        }
        if state
            .activities
            .get(&activity.id)
            .is_some_and(|stored| stored.status.is_terminal())
        {
            return Ok(false);
        }
        state.check_unique(service)?;
        state.activities.insert(activity.id, activity.clone());
        state.services.insert(service.id, service.clone());
        Ok(true)
    }

    async fn find_by_id(&self, id: ActivityId) -> Result<Option<Activity>, RepositoryError> {
        Ok(self.state.read().activities.get(&id).cloned())
    }

    async fn list_by_service(&self, service_id: ServiceId) -> Result<Vec<Activity>, RepositoryError> {
        let state = self.state.read();
        let mut activities: Vec<Activity> = state
            .activities
            .values()
            .filter(|a| a.service_id == service_id)
            .cloned()
            .collect();
        activities.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.0.cmp(&b.id.0)));
        Ok(activities)
    }

    async fn find_stale_in_progress(&self, updated_before: DateTime<Utc>) -> Result<Vec<Activity>, RepositoryError> {
        let state = self.state.read();
        Ok(state
            .activities
            .values()
            .filter(|a| a.status == ActivityStatus::InProgress && a.updated_at < updated_before)
            .cloned()
            .collect())
    }

    async fn has_recent_in_progress(&self, service_id: ServiceId, since: DateTime<Utc>) -> Result<bool, RepositoryError> {
        let state = self.state.read();
        Ok(state.activities.values().any(|a| {
            a.service_id == service_id && a.status == ActivityStatus::InProgress && a.updated_at > since
        }))
    }

    async fn touch(&self, id: ActivityId, at: DateTime<Utc>) -> Result<(), RepositoryError> {
        let mut state = self.state.write();
        let activity = state
            .activities
            .get_mut(&id)
            .ok_or_else(|| RepositoryError::NotFound(format!("Activity {} not found", id)))?;
        if activity.status == ActivityStatus::InProgress {
            activity.updated_at = at;
        }
        Ok(())
    }

    async fn fail_abandoned(&self, id: ActivityId) -> Result<bool, RepositoryError> {
        let mut state = self.state.write();
        let activity = state
            .activities
            .get_mut(&id)
            .ok_or_else(|| RepositoryError::NotFound(format!("Activity {} not found", id)))?;
        if !activity.finish(ActivityStatus::Failed) {
            return Ok(false);
        }
        let service_id = activity.service_id;
        let failed_at = activity.updated_at;
        if let Some(service) = state.services.get_mut(&service_id) {
            service.status = ServiceStatus::Failed;
            service.updated_at = failed_at;
        }
        Ok(true)
    }
}

#[derive(Clone, Default)]
pub struct InMemoryLogRepository {
    lines: Arc<RwLock<HashMap<ActivityId, Vec<LogLine>>>>,
}

impl InMemoryLogRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl LogRepository for InMemoryLogRepository {
    async fn append(&self, line: &LogLine) -> Result<(), RepositoryError> {
        self.lines
            .write()
            .entry(line.activity_id)
            .or_default()
            .push(line.clone());
        Ok(())
    }

    async fn list_by_activity(&self, activity_id: ActivityId) -> Result<Vec<LogLine>, RepositoryError> {
        let mut lines = self.lines.read().get(&activity_id).cloned().unwrap_or_default();
        // stable: equal timestamps keep arrival order
        lines.sort_by_key(|l| l.created_at);
        Ok(lines)
    }

    async fn has_lines_since(&self, activity_id: ActivityId, since: DateTime<Utc>) -> Result<bool, RepositoryError> {
        Ok(self
            .lines
            .read()
            .get(&activity_id)
            .is_some_and(|lines| lines.iter().any(|l| l.created_at > since)))
    }
}

#[derive(Clone, Default)]
pub struct InMemoryProjectRepository {
    projects: Arc<RwLock<HashMap<ProjectId, Project>>>,
}

impl InMemoryProjectRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ProjectRepository for InMemoryProjectRepository {
    async fn find_by_id(&self, id: &ProjectId) -> Result<Option<Project>, RepositoryError> {
        Ok(self.projects.read().get(id).cloned())
    }

    async fn save(&self, project: &Project) -> Result<(), RepositoryError> {
        self.projects.write().insert(project.id.clone(), project.clone());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::activity::ActivityType;
    use chrono::Duration;

    fn service(name: &str) -> Service {
        Service::new(ProjectId::from("p1"), name, "", ActorId::from("alice"), false)
    }

    #[tokio::test]
    async fn test_unique_name_per_project() {
        let store = InMemoryLifecycleStore::new();
        store.insert(&service("web")).await.expect("first insert");
        let err = store.insert(&service("web")).await.unwrap_err();
        assert!(matches!(err, RepositoryError::Conflict(_)));

        let mut other = service("web");
        other.project_id = ProjectId::from("p2");
        store.insert(&other).await.expect("other project");
    }

    #[tokio::test]
    async fn test_record_transition_updates_both() {
        let store = InMemoryLifecycleStore::new();
        let mut svc = service("web");
        store.insert(&svc).await.expect("insert");

        let activity = Activity::in_progress(svc.id, ActorId::from("alice"), ActivityType::Deployed);
        svc.apply(&activity);
        store.record_transition(&activity, &svc).await.expect("transition");

        let stored = ServiceRepository::find_by_id(&store, svc.id).await.expect("find").expect("exists");
        assert_eq!(stored.status, ServiceStatus::Deploying);
        assert_eq!(store.list_by_service(svc.id).await.expect("list").len(), 1);
    }

    #[tokio::test]
    async fn test_fail_abandoned_only_once() {
        let store = InMemoryLifecycleStore::new();
        let mut svc = service("web");
        store.insert(&svc).await.expect("insert");
        let activity = Activity::in_progress(svc.id, ActorId::from("alice"), ActivityType::Deployed);
        svc.apply(&activity);
        store.record_transition(&activity, &svc).await.expect("transition");

        assert!(store.fail_abandoned(activity.id).await.expect("fail"));
        assert!(!store.fail_abandoned(activity.id).await.expect("fail again"));
        let stored = ServiceRepository::find_by_id(&store, svc.id).await.expect("find").expect("exists");
        assert_eq!(stored.status, ServiceStatus::Failed);
    }

    #[tokio::test]
    async fn test_record_transition_keeps_finished_activity() {
        let store = InMemoryLifecycleStore::new();
        let mut svc = service("web");
        store.insert(&svc).await.expect("insert");
        let mut activity = Activity::in_progress(svc.id, ActorId::from("alice"), ActivityType::Deployed);
        svc.apply(&activity);
        store.record_transition(&activity, &svc).await.expect("transition");

        // swept while the operation was still running
        assert!(store.fail_abandoned(activity.id).await.expect("fail"));

        assert!(activity.finish(ActivityStatus::Completed));
        svc.apply(&activity);
        assert!(!store.record_transition(&activity, &svc).await.expect("late finish"));

        let stored = ActivityRepository::find_by_id(&store, activity.id).await.expect("find").expect("exists");
        assert_eq!(stored.status, ActivityStatus::Failed);
        let stored = ServiceRepository::find_by_id(&store, svc.id).await.expect("find").expect("exists");
        assert_eq!(stored.status, ServiceStatus::Failed);
    }

    #[tokio::test]
    async fn test_history_in_creation_order() {
        let store = InMemoryLifecycleStore::new();
        let mut svc = service("web");
        store.insert(&svc).await.expect("insert");

        let mut deploy = Activity::in_progress(svc.id, ActorId::from("alice"), ActivityType::Deployed);
        deploy.created_at = Utc::now() - Duration::minutes(10);
        svc.apply(&deploy);
        store.record_transition(&deploy, &svc).await.expect("deploy");
        let update = Activity::completed(svc.id, ActorId::from("alice"), ActivityType::Updated);
        svc.apply(&update);
        store.record_transition(&update, &svc).await.expect("update");

        // the deploy finishes after the update was recorded
        deploy.finish(ActivityStatus::Completed);
        svc.apply(&deploy);
        assert!(store.record_transition(&deploy, &svc).await.expect("finish"));

        let ids: Vec<_> = store.list_by_service(svc.id).await.expect("list").iter().map(|a| a.id).collect();
        assert_eq!(ids, vec![deploy.id, update.id]);
    }

    #[tokio::test]
    async fn test_log_lines_since() {
        let logs = InMemoryLogRepository::new();
        let activity_id = ActivityId::new();
        let mut old = LogLine::new(activity_id, "old");
        old.created_at = Utc::now() - Duration::minutes(10);
        logs.append(&old).await.expect("append");

        let since = Utc::now() - Duration::minutes(5);
        assert!(!logs.has_lines_since(activity_id, since).await.expect("query"));
        logs.append(&LogLine::new(activity_id, "new")).await.expect("append");
        assert!(logs.has_lines_since(activity_id, since).await.expect("query"));
        assert_eq!(logs.list_by_activity(activity_id).await.expect("list").len(), 2);
    }

    #[tokio::test]
    async fn test_log_lines_with_equal_timestamps_keep_arrival_order() {
        let logs = InMemoryLogRepository::new();
        let activity_id = ActivityId::new();
        let at = Utc::now();
        for text in ["first", "second", "third"] {
            let mut line = LogLine::new(activity_id, text);
            line.created_at = at;
            logs.append(&line).await.expect("append");
        }
        let mut earlier = LogLine::new(activity_id, "earlier");
        earlier.created_at = at - Duration::seconds(1);
        logs.append(&earlier).await.expect("append");

        let texts: Vec<_> = logs
            .list_by_activity(activity_id)
            .await
            .expect("list")
            .into_iter()
            .map(|l| l.log)
            .collect();
        assert_eq!(texts, vec!["earlier", "first", "second", "third"]);
    }
}
