// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Launchpad control plane core.
//!
//! # Architecture
//!
//! - **Layer:** Core System
//! - **Purpose:** Service lifecycle, infrastructure reconciliation, log
//!   capture, self-healing sweeps and project-scoped notifications

pub mod domain;
pub mod application;
pub mod infrastructure;
pub mod presentation;

pub use domain::*;
