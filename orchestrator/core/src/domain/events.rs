// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::activity::{ActivityId, ActivityStatus, ActivityType};
use crate::domain::service::{Service, ServiceId};

/// Service-level events. `StateChanged` feeds the notification hub.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum ServiceEvent {
    StateChanged {
        service: Box<Service>,
        changed_at: DateTime<Utc>,
    },
    ForcedFailed {
        service_id: ServiceId,
        reason: String,
        failed_at: DateTime<Utc>,
    },
}

/// Activity lifecycle events
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum ActivityEvent {
    Started {
        activity_id: ActivityId,
        service_id: ServiceId,
        activity_type: ActivityType,
        started_at: DateTime<Utc>,
    },
    Finished {
        activity_id: ActivityId,
        service_id: ServiceId,
        activity_type: ActivityType,
        outcome: ActivityStatus,
        finished_at: DateTime<Utc>,
    },
}
