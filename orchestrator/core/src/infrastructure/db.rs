// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # PostgreSQL Connection Pool
//!
//! Wraps `sqlx::postgres::PgPool` in a thin `Database` newtype that can be
//! injected into all PostgreSQL repository implementations, and bootstraps
//! the lifecycle schema on startup.

use anyhow::{Context, Result};
use sqlx::postgres::{PgPool, PgPoolOptions};

const SCHEMA: &[&str] = &[
    r#"
    CREATE TABLE IF NOT EXISTS projects (
        id TEXT PRIMARY KEY,
        name TEXT NOT NULL,
        dns_name TEXT NOT NULL,
        settings JSONB NOT NULL DEFAULT '{}'::jsonb
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS services (
        id UUID PRIMARY KEY,
        name TEXT NOT NULL,
        project_id TEXT NOT NULL,
        manifest TEXT NOT NULL DEFAULT '',
        status TEXT NOT NULL,
        dev BOOLEAN NOT NULL DEFAULT FALSE,
        demo BOOLEAN NOT NULL DEFAULT FALSE,
        repo_link TEXT,
        dns TEXT,
        created_by TEXT NOT NULL,
        created_at TIMESTAMPTZ NOT NULL,
        updated_at TIMESTAMPTZ NOT NULL
    )
    "#,
    r#"
    CREATE UNIQUE INDEX IF NOT EXISTS services_live_name
        ON services (project_id, name) WHERE status <> 'destroyed'
    "#,
    "CREATE INDEX IF NOT EXISTS services_status_updated ON services (status, updated_at)",
    "CREATE INDEX IF NOT EXISTS services_created_by ON services (created_by) WHERE demo",
    r#"
    CREATE TABLE IF NOT EXISTS activities (
        id UUID PRIMARY KEY,
        service_id UUID NOT NULL REFERENCES services (id),
        actor_id TEXT NOT NULL,
        type TEXT NOT NULL,
        status TEXT NOT NULL,
        created_at TIMESTAMPTZ NOT NULL,
        updated_at TIMESTAMPTZ NOT NULL
    )
    "#,
    "CREATE INDEX IF NOT EXISTS activities_service_created ON activities (service_id, created_at)",
    "CREATE INDEX IF NOT EXISTS activities_status_updated ON activities (status, updated_at)",
    r#"
    CREATE TABLE IF NOT EXISTS activity_logs (
        id UUID PRIMARY KEY,
        activity_id UUID NOT NULL REFERENCES activities (id),
        log TEXT NOT NULL,
        created_at TIMESTAMPTZ NOT NULL,
        seq BIGSERIAL
    )
    "#,
    // tables created before the insertion counter existed
    "ALTER TABLE activity_logs ADD COLUMN IF NOT EXISTS seq BIGSERIAL",
    "CREATE INDEX IF NOT EXISTS activity_logs_order ON activity_logs (activity_id, created_at, seq)",
];

#[derive(Clone)]
pub struct Database {
    pool: PgPool,
}

impl Database {
    pub async fn new(connection_string: &str, max_connections: u32) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .connect(connection_string)
            .await
            .context("Failed to connect to PostgreSQL")?;

        Ok(Self { pool })
    }

    /// Creates the lifecycle tables and indexes if missing.
    pub async fn bootstrap_schema(&self) -> Result<()> {
        for statement in SCHEMA {
            sqlx::query(statement)
                .execute(&self.pool)
                .await
                .with_context(|| format!("Failed to apply schema statement: {}", statement.trim()))?;
        }
        Ok(())
    }

    pub fn get_pool(&self) -> &PgPool {
        &self.pool
    }
}
