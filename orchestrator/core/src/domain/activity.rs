// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # Lifecycle Events (Activities)
//!
//! An [`Activity`] is one recorded attempt to change a service's deployment
//! state. Activities are append-only: they are created `InProgress` (or
//! `Completed` for synchronous operations) and transition exactly once to a
//! terminal outcome. [`LogLine`]s form the ordered transcript of an activity.
//!
//! # Architecture
//!
//! - **Layer:** Domain Layer
//! - **Purpose:** Lifecycle event aggregate and its transcript

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

use crate::domain::service::{ActorId, ServiceId};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ActivityId(pub Uuid);

impl ActivityId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for ActivityId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ActivityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Kind of state change an activity records.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ActivityType {
    Created,
    Deployed,
    Destroyed,
    DevDeployed,
    Updated,
}

impl ActivityType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ActivityType::Created => "created",
            ActivityType::Deployed => "deployed",
            ActivityType::Destroyed => "destroyed",
            ActivityType::DevDeployed => "devdeployed",
            ActivityType::Updated => "updated",
        }
    }

    /// Lifecycle rank used to break update-time ties: a later stage of the
    /// lifecycle wins over an earlier one recorded in the same instant.
    fn rank(&self) -> u8 {
        match self {
            ActivityType::Created => 0,
            ActivityType::Updated => 1,
            ActivityType::Deployed => 2,
            ActivityType::DevDeployed => 3,
            ActivityType::Destroyed => 4,
        }
    }
}

impl fmt::Display for ActivityType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for ActivityType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "created" => Ok(ActivityType::Created),
            "deployed" => Ok(ActivityType::Deployed),
            "destroyed" => Ok(ActivityType::Destroyed),
            "devdeployed" => Ok(ActivityType::DevDeployed),
            "updated" => Ok(ActivityType::Updated),
            other => Err(format!("unknown activity type '{}'", other)),
        }
    }
}

/// Outcome of an activity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActivityStatus {
    InProgress,
    Completed,
    Failed,
}

impl ActivityStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ActivityStatus::InProgress => "in_progress",
            ActivityStatus::Completed => "completed",
            ActivityStatus::Failed => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, ActivityStatus::InProgress)
    }
}

impl fmt::Display for ActivityStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for ActivityStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "in_progress" => Ok(ActivityStatus::InProgress),
            "completed" => Ok(ActivityStatus::Completed),
            "failed" => Ok(ActivityStatus::Failed),
            other => Err(format!("unknown activity status '{}'", other)),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Activity {
    pub id: ActivityId,
    pub actor_id: ActorId,
    pub service_id: ServiceId,
    #[serde(rename = "type")]
    pub activity_type: ActivityType,
    pub status: ActivityStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Activity {
    pub fn new(
        service_id: ServiceId,
        actor_id: ActorId,
        activity_type: ActivityType,
        status: ActivityStatus,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: ActivityId::new(),
            actor_id,
            service_id,
            activity_type,
            status,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn in_progress(service_id: ServiceId, actor_id: ActorId, activity_type: ActivityType) -> Self {
        Self::new(service_id, actor_id, activity_type, ActivityStatus::InProgress)
    }

    pub fn completed(service_id: ServiceId, actor_id: ActorId, activity_type: ActivityType) -> Self {
        Self::new(service_id, actor_id, activity_type, ActivityStatus::Completed)
    }

    /// Move an in-progress activity to a terminal outcome.
    ///
    /// Returns `false` (and leaves the activity untouched) if it already
    /// reached a terminal outcome.
    pub fn finish(&mut self, outcome: ActivityStatus) -> bool {
        if self.status.is_terminal() || !outcome.is_terminal() {
            return false;
        }
        self.status = outcome;
        self.updated_at = Utc::now();
        true
    }

    /// Whether `self` precedes `other` in the service's event ordering.
    pub fn is_older(&self, other: &Activity) -> bool {
        if self.updated_at != other.updated_at {
            return self.updated_at < other.updated_at;
        }
        self.activity_type.rank() < other.activity_type.rank()
    }
}

/// Returns the most recent activity by update time.
pub fn latest<'a, I>(activities: I) -> Option<&'a Activity>
where
    I: IntoIterator<Item = &'a Activity>,
{
    activities
        .into_iter()
        .fold(None, |current: Option<&'a Activity>, candidate| match current {
            Some(c) if !c.is_older(candidate) => Some(c),
            _ => Some(candidate),
        })
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct LogLineId(pub Uuid);

impl LogLineId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for LogLineId {
    fn default() -> Self {
        Self::new()
    }
}

/// One persisted line of an activity transcript.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LogLine {
    pub id: LogLineId,
    pub activity_id: ActivityId,
    pub log: String,
    pub created_at: DateTime<Utc>,
}

impl LogLine {
    pub fn new(activity_id: ActivityId, log: impl Into<String>) -> Self {
        Self {
            id: LogLineId::new(),
            activity_id,
            log: log.into(),
            created_at: Utc::now(),
        }
    }
}
