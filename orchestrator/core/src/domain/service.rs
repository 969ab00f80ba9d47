// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # Service Aggregate and Lifecycle State Machine
//!
//! A [`Service`] is a user-declared workload. Its displayed status is never
//! written directly: it is derived from the latest [`Activity`] through
//! [`derive_status`], and the guard predicates on [`ServiceStatus`] decide
//! which operations are currently legal.
//!
//! ```text
//! Created ──deploy──▶ Deploying ──▶ Deployed ──destroy──▶ Destroying ──▶ Destroyed
//!    │                    │             │
//!    └────enable dev──────┼─────────────┴──▶ DevDeploying ──▶ DevDeployed
//!                         └──(any Failed outcome)──▶ Failed
//! ```
//!
//! # Architecture
//!
//! - **Layer:** Domain Layer
//! - **Purpose:** Service aggregate, status derivation, guards, endpoints

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

use crate::domain::activity::{Activity, ActivityStatus, ActivityType};
use crate::domain::environment::{Environment, ProjectId};
use crate::domain::manifest::Manifest;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ServiceId(pub Uuid);

impl ServiceId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for ServiceId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ServiceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Opaque identity of whoever triggered an activity.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ActorId(pub String);

impl From<&str> for ActorId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl fmt::Display for ActorId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ServiceStatus {
    Creating,
    Created,
    Deploying,
    Deployed,
    DevDeploying,
    DevDeployed,
    Destroying,
    Destroyed,
    Failed,
    Unknown,
}

impl ServiceStatus {
    pub const TRANSITIONAL: [ServiceStatus; 4] = [
        ServiceStatus::Creating,
        ServiceStatus::Deploying,
        ServiceStatus::DevDeploying,
        ServiceStatus::Destroying,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ServiceStatus::Creating => "creating",
            ServiceStatus::Created => "created",
            ServiceStatus::Deploying => "deploying",
            ServiceStatus::Deployed => "deployed",
            ServiceStatus::DevDeploying => "devdeploying",
            ServiceStatus::DevDeployed => "devdeployed",
            ServiceStatus::Destroying => "destroying",
            ServiceStatus::Destroyed => "destroyed",
            ServiceStatus::Failed => "failed",
            ServiceStatus::Unknown => "unknown",
        }
    }

    pub fn is_transitional(&self) -> bool {
        Self::TRANSITIONAL.contains(self)
    }

    pub fn can_deploy(&self) -> bool {
        !self.is_transitional() && *self != ServiceStatus::Destroyed
    }

    pub fn can_destroy(&self) -> bool {
        !self.is_transitional() && *self != ServiceStatus::Destroyed
    }

    pub fn can_enable_dev(&self) -> bool {
        matches!(
            self,
            ServiceStatus::Created | ServiceStatus::Deployed | ServiceStatus::Failed
        )
    }

    pub fn is_destroyed(&self) -> bool {
        matches!(self, ServiceStatus::Destroying | ServiceStatus::Destroyed)
    }
}

impl fmt::Display for ServiceStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for ServiceStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "creating" => Ok(ServiceStatus::Creating),
            "created" => Ok(ServiceStatus::Created),
            "deploying" => Ok(ServiceStatus::Deploying),
            "deployed" => Ok(ServiceStatus::Deployed),
            "devdeploying" => Ok(ServiceStatus::DevDeploying),
            "devdeployed" => Ok(ServiceStatus::DevDeployed),
            "destroying" => Ok(ServiceStatus::Destroying),
            "destroyed" => Ok(ServiceStatus::Destroyed),
            "failed" => Ok(ServiceStatus::Failed),
            "unknown" => Ok(ServiceStatus::Unknown),
            other => Err(format!("unknown service status '{}'", other)),
        }
    }
}

/// Status shown for a service whose latest event is `activity`.
///
/// `Updated` events carry no lifecycle meaning and map to `Unknown`.
pub fn derive_status(activity: &Activity) -> ServiceStatus {
    let in_progress = activity.status == ActivityStatus::InProgress;
    match (activity.status, activity.activity_type) {
        (ActivityStatus::Failed, _) => ServiceStatus::Failed,
        (_, ActivityType::Created) if in_progress => ServiceStatus::Creating,
        (_, ActivityType::Created) => ServiceStatus::Created,
        (_, ActivityType::Deployed) if in_progress => ServiceStatus::Deploying,
        (_, ActivityType::Deployed) => ServiceStatus::Deployed,
        (_, ActivityType::DevDeployed) if in_progress => ServiceStatus::DevDeploying,
        (_, ActivityType::DevDeployed) => ServiceStatus::DevDeployed,
        (_, ActivityType::Destroyed) if in_progress => ServiceStatus::Destroying,
        (_, ActivityType::Destroyed) => ServiceStatus::Destroyed,
        (_, ActivityType::Updated) => ServiceStatus::Unknown,
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Service {
    pub id: ServiceId,
    pub name: String,
    pub project_id: ProjectId,
    /// Base64-encoded YAML manifest as submitted.
    pub manifest: String,
    pub status: ServiceStatus,
    pub dev: bool,
    pub demo: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub repo_link: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dns: Option<String>,
    pub created_by: ActorId,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Service {
    pub fn new(
        project_id: ProjectId,
        name: impl Into<String>,
        manifest: impl Into<String>,
        created_by: ActorId,
        demo: bool,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: ServiceId::new(),
            name: name.into(),
            project_id,
            manifest: manifest.into(),
            status: ServiceStatus::Creating,
            dev: false,
            demo,
            repo_link: None,
            dns: None,
            created_by,
            created_at: now,
            updated_at: now,
        }
    }

    /// Applies the status derived from a newly recorded event.
    ///
    /// Manifest updates leave the status alone.
    pub fn apply(&mut self, activity: &Activity) {
        if activity.activity_type != ActivityType::Updated {
            self.status = derive_status(activity);
        }
        self.updated_at = activity.updated_at;
    }

    pub fn parsed_manifest(&self) -> Option<Manifest> {
        if self.manifest.is_empty() {
            return None;
        }
        Manifest::from_encoded(&self.manifest).ok()
    }

    /// Reachable URLs of the service.
    pub fn endpoints(&self, manifest: &Manifest, env: &Environment) -> Vec<String> {
        let Some(dns) = self.dns.as_deref().filter(|d| !d.is_empty()) else {
            return Vec::new();
        };

        if env.is_ingress() {
            let scheme = if env.provider.tls().is_some() { "https" } else { "http" };
            return manifest
                .ingress_hostnames(env)
                .into_iter()
                .map(|host| format!("{}://{}", scheme, host))
                .collect();
        }

        let host = format!("{}.{}", self.name, dns);
        manifest
            .load_balancer_ports()
            .into_iter()
            .map(|port| match port.as_str() {
                "443" => format!("https://{}", host),
                "80" => format!("http://{}", host),
                other => format!("{}:{}", host, other),
            })
            .collect()
    }
}
