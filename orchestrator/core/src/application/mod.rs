// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

pub mod expiry;
pub mod lifecycle;
pub mod log_capture;
pub mod notification_hub;
pub mod operations;
pub mod reconciler;
pub mod self_healing;

pub use lifecycle::{LifecycleError, LifecycleService, StandardLifecycleService};
pub use notification_hub::NotificationHub;
pub use operations::OperationPool;
pub use reconciler::{ReconcileEngine, ReconcileOperation, ReconcilePlan};
