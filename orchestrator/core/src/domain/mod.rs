// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Domain layer: lifecycle aggregates, manifest model, environment and the
//! ports implemented by infrastructure.
//!
//! # Architecture
//!
//! - **Layer:** Domain Layer
//! - **Purpose:** Pure model and contracts, no I/O

pub mod activity;
pub mod config;
pub mod dev;
pub mod environment;
pub mod errors;
pub mod events;
pub mod manifest;
pub mod provider;
pub mod repository;
pub mod service;
