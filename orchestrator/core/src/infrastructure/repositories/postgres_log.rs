// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! PostgreSQL transcript storage (`activity_logs`). Lines sharing a
//! timestamp come back in insertion order (`seq`).

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::PgPool;
use sqlx::Row;

use crate::domain::activity::{ActivityId, LogLine, LogLineId};
use crate::domain::repository::{LogRepository, RepositoryError};

pub struct PostgresLogRepository {
    pool: PgPool,
}

impl PostgresLogRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl LogRepository for PostgresLogRepository {
    async fn append(&self, line: &LogLine) -> Result<(), RepositoryError> {
        sqlx::query("INSERT INTO activity_logs (id, activity_id, log, created_at) VALUES ($1, $2, $3, $4)")
            .bind(line.id.0)
            .bind(line.activity_id.0)
            .bind(&line.log)
            .bind(line.created_at)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn list_by_activity(&self, activity_id: ActivityId) -> Result<Vec<LogLine>, RepositoryError> {
        let rows = sqlx::query(
            "SELECT id, activity_id, log, created_at FROM activity_logs WHERE activity_id = $1 ORDER BY created_at ASC, seq ASC",
        )
        .bind(activity_id.0)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter()
            .map(|row| {
                Ok(LogLine {
                    id: LogLineId(row.try_get("id")?),
                    activity_id: ActivityId(row.try_get("activity_id")?),
                    log: row.try_get("log")?,
                    created_at: row.try_get("created_at")?,
                })
            })
            .collect()
    }

    async fn has_lines_since(&self, activity_id: ActivityId, since: DateTime<Utc>) -> Result<bool, RepositoryError> {
        let found: bool = sqlx::query_scalar(
            "SELECT EXISTS (SELECT 1 FROM activity_logs WHERE activity_id = $1 AND created_at > $2)",
        )
        .bind(activity_id.0)
        .bind(since)
        .fetch_one(&self.pool)
        .await?;
        Ok(found)
    }
}
