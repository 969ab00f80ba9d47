// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # Presentation Layer (`launchpad-orchestrator-core`)
//!
//! Transport surface of the control plane. No business logic lives here.
//!
//! | Module | Transport | Description |
//! |--------|-----------|-------------|
//! | [`api`] | HTTP (Axum) | Health endpoint and hub upgrade route |
//! | [`ws`] | WebSocket | Notification hub client protocol |

pub mod api;
pub mod ws;
