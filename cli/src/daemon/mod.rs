// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Daemon mode implementation
//!
//! Handles:
//! - Repository selection (PostgreSQL or in-memory)
//! - Background sweeps and the notification hub
//! - HTTP health checks and the hub WebSocket endpoint
//! - Graceful shutdown waiting for in-flight operations

pub mod server;

pub use server::start_server;
