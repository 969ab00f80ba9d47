// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

pub mod auth;
pub mod cluster;
pub mod db;
pub mod dns;
pub mod event_bus;
pub mod providers;
pub mod repositories;
pub mod sandbox;

pub use providers::StandardProviderFactory;
