// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # Domain Repository Interfaces
//!
//! Persistence contracts for the lifecycle aggregates. Interfaces live in the
//! domain layer and are implemented in `crate::infrastructure::repositories`.
//!
//! | Trait | Aggregate | Implementations |
//! |-------|-----------|----------------|
//! | `ServiceRepository` | `Service` | `InMemoryLifecycleStore`, `PostgresServiceRepository` |
//! | `ActivityRepository` | `Activity` | `InMemoryLifecycleStore`, `PostgresActivityRepository` |
//! | `LogRepository` | `LogLine` | `InMemoryLogRepository`, `PostgresLogRepository` |
//! | `ProjectRepository` | `Project` | `InMemoryProjectRepository`, `PostgresProjectRepository` |
//!
//! Services and activities share one store in memory because a lifecycle
//! transition writes both atomically.

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::domain::activity::{Activity, ActivityId, LogLine};
use crate::domain::environment::{Project, ProjectId};
use crate::domain::service::{ActorId, Service, ServiceId, ServiceStatus};

#[async_trait]
pub trait ServiceRepository: Send + Sync {
    /// Insert a new service. Fails with `Conflict` when a live service with
    /// the same name exists in the project.
    async fn insert(&self, service: &Service) -> Result<(), RepositoryError>;

    /// Update an existing service (same uniqueness rule as `insert`).
    async fn save(&self, service: &Service) -> Result<(), RepositoryError>;

    async fn find_by_id(&self, id: ServiceId) -> Result<Option<Service>, RepositoryError>;

    async fn list_by_project(&self, project_id: &ProjectId) -> Result<Vec<Service>, RepositoryError>;

    async fn count_demo_by_creator(&self, actor: &ActorId) -> Result<usize, RepositoryError>;

    /// Services in one of `statuses` last updated before `updated_before`.
    async fn find_stale(
        &self,
        statuses: &[ServiceStatus],
        updated_before: DateTime<Utc>,
    ) -> Result<Vec<Service>, RepositoryError>;

    /// Demo services in one of `statuses` created before `created_before`.
    async fn find_expired_demos(
        &self,
        statuses: &[ServiceStatus],
        created_before: DateTime<Utc>,
    ) -> Result<Vec<Service>, RepositoryError>;

    /// Forces a status without recording an event. Reserved for the
    /// self-healing sweeps.
    async fn force_status(&self, id: ServiceId, status: ServiceStatus) -> Result<(), RepositoryError>;

    async fn set_demo(&self, id: ServiceId, demo: bool) -> Result<(), RepositoryError>;
}

#[async_trait]
pub trait ActivityRepository: Send + Sync {
    /// Persists an activity together with the service state derived from it,
    /// atomically. Returns `false` and writes nothing when the stored activity
    /// is already finished.
    async fn record_transition(&self, activity: &Activity, service: &Service) -> Result<bool, RepositoryError>;

    async fn find_by_id(&self, id: ActivityId) -> Result<Option<Activity>, RepositoryError>;

    /// All activities of a service in creation order.
    async fn list_by_service(&self, service_id: ServiceId) -> Result<Vec<Activity>, RepositoryError>;

    /// In-progress activities last updated before `updated_before`.
    async fn find_stale_in_progress(&self, updated_before: DateTime<Utc>) -> Result<Vec<Activity>, RepositoryError>;

    /// Whether the service has an in-progress activity updated after `since`.
    async fn has_recent_in_progress(&self, service_id: ServiceId, since: DateTime<Utc>) -> Result<bool, RepositoryError>;

    /// Refreshes `updated_at` of an in-progress activity.
    async fn touch(&self, id: ActivityId, at: DateTime<Utc>) -> Result<(), RepositoryError>;

    /// Marks an in-progress activity Failed and forces its service to Failed.
    ///
    /// Returns `false` if the activity already reached a terminal outcome.
    async fn fail_abandoned(&self, id: ActivityId) -> Result<bool, RepositoryError>;
}

#[async_trait]
pub trait LogRepository: Send + Sync {
    async fn append(&self, line: &LogLine) -> Result<(), RepositoryError>;

    /// Transcript of an activity, in creation order.
    async fn list_by_activity(&self, activity_id: ActivityId) -> Result<Vec<LogLine>, RepositoryError>;

    async fn has_lines_since(&self, activity_id: ActivityId, since: DateTime<Utc>) -> Result<bool, RepositoryError>;
}

/// Read access to project settings, owned by an external collaborator.
#[async_trait]
pub trait ProjectRepository: Send + Sync {
    async fn find_by_id(&self, id: &ProjectId) -> Result<Option<Project>, RepositoryError>;

    async fn save(&self, project: &Project) -> Result<(), RepositoryError>;
}

/// Repository errors
#[derive(Debug, thiserror::Error)]
pub enum RepositoryError {
    #[error("Entity not found: {0}")]
    NotFound(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Database error: {0}")]
    Database(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Unknown error: {0}")]
    Unknown(String),
}

impl From<sqlx::Error> for RepositoryError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::RowNotFound => RepositoryError::NotFound("Row not found".to_string()),
            sqlx::Error::Database(ref db) if db.is_unique_violation() => {
                RepositoryError::Conflict(db.message().to_string())
            }
            _ => RepositoryError::Database(err.to_string()),
        }
    }
}

impl From<serde_json::Error> for RepositoryError {
    fn from(err: serde_json::Error) -> Self {
        RepositoryError::Serialization(err.to_string())
    }
}
