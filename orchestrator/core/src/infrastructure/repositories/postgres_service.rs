// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # PostgreSQL Service Repository
//!
//! `ServiceRepository` backed by the `services` table. Name uniqueness within
//! a project is enforced by the partial unique index on live services; the
//! violation surfaces as `RepositoryError::Conflict`.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::PgPool;
use sqlx::Row;

use crate::domain::environment::ProjectId;
use crate::domain::repository::{RepositoryError, ServiceRepository};
use crate::domain::service::{ActorId, Service, ServiceId, ServiceStatus};

pub(crate) const SERVICE_COLUMNS: &str =
    "id, name, project_id, manifest, status, dev, demo, repo_link, dns, created_by, created_at, updated_at";

pub struct PostgresServiceRepository {
    pool: PgPool,
}

impl PostgresServiceRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

fn status_names(statuses: &[ServiceStatus]) -> Vec<String> {
    statuses.iter().map(|s| s.as_str().to_string()).collect()
}

/// Upsert used by both the service repository and activity transitions.
pub(crate) async fn upsert_service<'e, E>(executor: E, service: &Service) -> Result<(), RepositoryError>
where
    E: sqlx::Executor<'e, Database = sqlx::Postgres>,
{
    sqlx::query(
        r#"
        INSERT INTO services (
            id, name, project_id, manifest, status, dev, demo,
            repo_link, dns, created_by, created_at, updated_at
        )
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)
        ON CONFLICT (id) DO UPDATE SET
            name = EXCLUDED.name,
            manifest = EXCLUDED.manifest,
            status = EXCLUDED.status,
            dev = EXCLUDED.dev,
            demo = EXCLUDED.demo,
            repo_link = EXCLUDED.repo_link,
            dns = EXCLUDED.dns,
            updated_at = EXCLUDED.updated_at
        "#,
    )
    .bind(service.id.0)
    .bind(&service.name)
    .bind(&service.project_id.0)
    .bind(&service.manifest)
    .bind(service.status.as_str())
    .bind(service.dev)
    .bind(service.demo)
    .bind(&service.repo_link)
    .bind(&service.dns)
    .bind(&service.created_by.0)
    .bind(service.created_at)
    .bind(service.updated_at)
    .execute(executor)
    .await?;
    Ok(())
}

#[async_trait]
impl ServiceRepository for PostgresServiceRepository {
    async fn insert(&self, service: &Service) -> Result<(), RepositoryError> {
        upsert_service(&self.pool, service).await
    }

    async fn save(&self, service: &Service) -> Result<(), RepositoryError> {
        upsert_service(&self.pool, service).await
    }

    async fn find_by_id(&self, id: ServiceId) -> Result<Option<Service>, RepositoryError> {
        let row = sqlx::query(&format!("SELECT {} FROM services WHERE id = $1", SERVICE_COLUMNS))
            .bind(id.0)
            .fetch_optional(&self.pool)
            .await?;

        row.map(parse_service_row).transpose()
    }

    async fn list_by_project(&self, project_id: &ProjectId) -> Result<Vec<Service>, RepositoryError> {
        let rows = sqlx::query(&format!(
            "SELECT {} FROM services WHERE project_id = $1 ORDER BY created_at ASC",
            SERVICE_COLUMNS
        ))
        .bind(&project_id.0)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(parse_service_row).collect()
    }

    async fn count_demo_by_creator(&self, actor: &ActorId) -> Result<usize, RepositoryError> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM services WHERE demo AND created_by = $1")
            .bind(&actor.0)
            .fetch_one(&self.pool)
            .await?;
        Ok(count as usize)
    }

    async fn find_stale(
        &self,
        statuses: &[ServiceStatus],
        updated_before: DateTime<Utc>,
    ) -> Result<Vec<Service>, RepositoryError> {
        let rows = sqlx::query(&format!(
            "SELECT {} FROM services WHERE status = ANY($1) AND updated_at < $2",
            SERVICE_COLUMNS
        ))
        .bind(status_names(statuses))
        .bind(updated_before)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(parse_service_row).collect()
    }

    async fn find_expired_demos(
        &self,
        statuses: &[ServiceStatus],
        created_before: DateTime<Utc>,
    ) -> Result<Vec<Service>, RepositoryError> {
        let rows = sqlx::query(&format!(
            "SELECT {} FROM services WHERE demo AND status = ANY($1) AND created_at < $2",
            SERVICE_COLUMNS
        ))
        .bind(status_names(statuses))
        .bind(created_before)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(parse_service_row).collect()
    }

    async fn force_status(&self, id: ServiceId, status: ServiceStatus) -> Result<(), RepositoryError> {
        let result = sqlx::query("UPDATE services SET status = $2, updated_at = NOW() WHERE id = $1")
            .bind(id.0)
            .bind(status.as_str())
            .execute(&self.pool)
            .await?;
        if result.rows_affected() == 0 {
            return Err(RepositoryError::NotFound(format!("Service {} not found", id)));
        }
        Ok(())
    }

    async fn set_demo(&self, id: ServiceId, demo: bool) -> Result<(), RepositoryError> {
        sqlx::query("UPDATE services SET demo = $2 WHERE id = $1")
            .bind(id.0)
            .bind(demo)
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}

/// Parse a service from a database row
pub(crate) fn parse_service_row(row: sqlx::postgres::PgRow) -> Result<Service, RepositoryError> {
    let id: uuid::Uuid = row.try_get("id")?;
    let status: String = row.try_get("status")?;
    let status = status
        .parse::<ServiceStatus>()
        .map_err(RepositoryError::Serialization)?;

    Ok(Service {
        id: ServiceId(id),
        name: row.try_get("name")?,
        project_id: ProjectId(row.try_get("project_id")?),
        manifest: row.try_get("manifest")?,
        status,
        dev: row.try_get("dev")?,
        demo: row.try_get("demo")?,
        repo_link: row.try_get("repo_link")?,
        dns: row.try_get("dns")?,
        created_by: ActorId(row.try_get("created_by")?),
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}
