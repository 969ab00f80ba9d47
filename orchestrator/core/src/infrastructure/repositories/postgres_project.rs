// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! PostgreSQL project settings, stored as JSONB.

use async_trait::async_trait;
use sqlx::postgres::PgPool;
use sqlx::Row;

use crate::domain::environment::{Project, ProjectId, ProjectSettings};
use crate::domain::repository::{ProjectRepository, RepositoryError};

pub struct PostgresProjectRepository {
    pool: PgPool,
}

impl PostgresProjectRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl ProjectRepository for PostgresProjectRepository {
    async fn find_by_id(&self, id: &ProjectId) -> Result<Option<Project>, RepositoryError> {
        let row = sqlx::query("SELECT id, name, dns_name, settings FROM projects WHERE id = $1")
            .bind(&id.0)
            .fetch_optional(&self.pool)
            .await?;

        let Some(row) = row else {
            return Ok(None);
        };
        let settings: serde_json::Value = row.try_get("settings")?;
        let settings: ProjectSettings = serde_json::from_value(settings)?;

        Ok(Some(Project {
            id: ProjectId(row.try_get("id")?),
            name: row.try_get("name")?,
            dns_name: row.try_get("dns_name")?,
            settings,
        }))
    }

    async fn save(&self, project: &Project) -> Result<(), RepositoryError> {
        let settings = serde_json::to_value(&project.settings)?;
        sqlx::query(
            r#"
            INSERT INTO projects (id, name, dns_name, settings)
            VALUES ($1, $2, $3, $4)
            ON CONFLICT (id) DO UPDATE SET
                name = EXCLUDED.name,
                dns_name = EXCLUDED.dns_name,
                settings = EXCLUDED.settings
            "#,
        )
        .bind(&project.id.0)
        .bind(&project.name)
        .bind(&project.dns_name)
        .bind(settings)
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}
