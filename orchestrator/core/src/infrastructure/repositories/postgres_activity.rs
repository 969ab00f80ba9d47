// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # PostgreSQL Activity Repository
//!
//! `ActivityRepository` backed by the `activities` table. Transitions write
//! the activity and its service row inside one transaction so the displayed
//! status can never disagree with the latest event. A finished activity is
//! never rewritten.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::PgPool;
use sqlx::Row;

use crate::domain::activity::{Activity, ActivityId, ActivityStatus, ActivityType};
use crate::domain::repository::{ActivityRepository, RepositoryError};
use crate::domain::service::{ActorId, Service, ServiceId, ServiceStatus};
use crate::infrastructure::repositories::postgres_service::upsert_service;

const ACTIVITY_COLUMNS: &str = "id, service_id, actor_id, type, status, created_at, updated_at";

pub struct PostgresActivityRepository {
    pool: PgPool,
}

impl PostgresActivityRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl ActivityRepository for PostgresActivityRepository {
    async fn record_transition(&self, activity: &Activity, service: &Service) -> Result<bool, RepositoryError> {
        let mut tx = self.pool.begin().await?;

        // The service row must exist before the activity references it.
        upsert_service(&mut *tx, service).await?;

        let written: Option<uuid::Uuid> = sqlx::query_scalar(
            r#"
            INSERT INTO activities (id, service_id, actor_id, type, status, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            ON CONFLICT (id) DO UPDATE SET
                status = EXCLUDED.status,
                updated_at = EXCLUDED.updated_at
            WHERE activities.status = $8
            RETURNING id
            "#,
        )
        .bind(activity.id.0)
        .bind(activity.service_id.0)
        .bind(&activity.actor_id.0)
        .bind(activity.activity_type.as_str())
        .bind(activity.status.as_str())
        .bind(activity.created_at)
        .bind(activity.updated_at)
        .bind(ActivityStatus::InProgress.as_str())
        .fetch_optional(&mut *tx)
        .await?;

        if written.is_none() {
            tx.rollback().await?;
            return Ok(false);
        }
        tx.commit().await?;
        Ok(true)
    }

    async fn find_by_id(&self, id: ActivityId) -> Result<Option<Activity>, RepositoryError> {
        let row = sqlx::query(&format!("SELECT {} FROM activities WHERE id = $1", ACTIVITY_COLUMNS))
            .bind(id.0)
            .fetch_optional(&self.pool)
            .await?;
        row.map(parse_activity_row).transpose()
    }

    async fn list_by_service(&self, service_id: ServiceId) -> Result<Vec<Activity>, RepositoryError> {
        let rows = sqlx::query(&format!(
            "SELECT {} FROM activities WHERE service_id = $1 ORDER BY created_at ASC, id ASC",
            ACTIVITY_COLUMNS
        ))
        .bind(service_id.0)
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(parse_activity_row).collect()
    }

    async fn find_stale_in_progress(&self, updated_before: DateTime<Utc>) -> Result<Vec<Activity>, RepositoryError> {
        let rows = sqlx::query(&format!(
            "SELECT {} FROM activities WHERE status = $1 AND updated_at < $2",
            ACTIVITY_COLUMNS
        ))
        .bind(ActivityStatus::InProgress.as_str())
        .bind(updated_before)
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(parse_activity_row).collect()
    }

    async fn has_recent_in_progress(&self, service_id: ServiceId, since: DateTime<Utc>) -> Result<bool, RepositoryError> {
        let found: bool = sqlx::query_scalar(
            "SELECT EXISTS (SELECT 1 FROM activities WHERE service_id = $1 AND status = $2 AND updated_at > $3)",
        )
        .bind(service_id.0)
        .bind(ActivityStatus::InProgress.as_str())
        .bind(since)
        .fetch_one(&self.pool)
        .await?;
        Ok(found)
    }

    async fn touch(&self, id: ActivityId, at: DateTime<Utc>) -> Result<(), RepositoryError> {
        sqlx::query("UPDATE activities SET updated_at = $2 WHERE id = $1 AND status = $3")
            .bind(id.0)
            .bind(at)
            .bind(ActivityStatus::InProgress.as_str())
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn fail_abandoned(&self, id: ActivityId) -> Result<bool, RepositoryError> {
        let mut tx = self.pool.begin().await?;

        // Compare-and-set: only an activity still in progress may be failed here.
        let service_id: Option<uuid::Uuid> = sqlx::query_scalar(
            r#"
            UPDATE activities SET status = $2, updated_at = NOW()
            WHERE id = $1 AND status = $3
            RETURNING service_id
            "#,
        )
        .bind(id.0)
        .bind(ActivityStatus::Failed.as_str())
        .bind(ActivityStatus::InProgress.as_str())
        .fetch_optional(&mut *tx)
        .await?;

        let Some(service_id) = service_id else {
            tx.rollback().await?;
            return Ok(false);
        };

        sqlx::query("UPDATE services SET status = $2, updated_at = NOW() WHERE id = $1")
            .bind(service_id)
            .bind(ServiceStatus::Failed.as_str())
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        Ok(true)
    }
}

fn parse_activity_row(row: sqlx::postgres::PgRow) -> Result<Activity, RepositoryError> {
    let activity_type: String = row.try_get("type")?;
    let status: String = row.try_get("status")?;

    Ok(Activity {
        id: ActivityId(row.try_get("id")?),
        service_id: ServiceId(row.try_get("service_id")?),
        actor_id: ActorId(row.try_get("actor_id")?),
        activity_type: activity_type
            .parse::<ActivityType>()
            .map_err(RepositoryError::Serialization)?,
        status: status
            .parse::<ActivityStatus>()
            .map_err(RepositoryError::Serialization)?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}
