// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Validation errors shared by the manifest and environment models.
//!
//! Every rejection carries a stable machine-readable [`ErrorCode`] plus
//! optional structured data (offending container, volume, line...) so the
//! outer API can render it without string matching.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ErrorCode {
    MissingName,
    InvalidName,
    InvalidGracePeriod,
    InvalidReplicaCount,
    InvalidPersistentReplica,
    InvalidContainerCount,
    MissingContainerImage,
    VolumeNotDefined,
    InvalidDevContainerCount,
    InvalidYaml,
    InvalidBase64,
    InvalidEnvironment,
    InvalidProvider,
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self)
    }
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
#[error("{code}: {message}")]
pub struct ValidationError {
    pub code: ErrorCode,
    pub message: String,
    pub data: BTreeMap<String, String>,
}

impl ValidationError {
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            data: BTreeMap::new(),
        }
    }

    pub fn with(mut self, key: &str, value: impl Into<String>) -> Self {
        self.data.insert(key.to_string(), value.into());
        self
    }
}
