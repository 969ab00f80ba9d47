// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Development-mode manifest derivation.
//!
//! Dev mode swaps one container for its development override, mounts a
//! synchronization volume into it and runs a sync sidecar next to it. The
//! derived manifest only lives for the duration of one deploy; the stored
//! manifest is never touched.

use std::collections::BTreeMap;

use crate::domain::manifest::{Container, DevSettings, Manifest, Mount, Volume};

pub const SYNC_VOLUME: &str = "okteto-sync";
pub const SYNC_CONTAINER: &str = "okteto-syncthing";
pub const SYNC_IMAGE: &str = "okteto/syncthing:latest";
pub const SYNC_VOLUME_SIZE: &str = "10Gi";
pub const DEV_LABEL: &str = "okteto-cnd";

const SYNC_MOUNT_PATH: &str = "/var/cnd-sync";
const DEFAULT_DEV_PATH: &str = "/src";

impl DevSettings {
    /// Fills unset values: image from the container, an idle `tail` command,
    /// and `/src` as the source path.
    pub fn with_defaults(mut self, container_image: &str) -> Self {
        if self.image.is_empty() {
            self.image = container_image.to_string();
        }
        if self.command.is_empty() {
            self.command = "tail".to_string();
            self.args = vec!["-f".to_string(), "/dev/null".to_string()];
        }
        if self.path.is_empty() {
            self.path = DEFAULT_DEV_PATH.to_string();
        }
        self
    }
}

/// The sync volume as it appears in a dev manifest and during teardown.
pub fn sync_volume(persistent: bool) -> Volume {
    Volume {
        name: SYNC_VOLUME.to_string(),
        persistent,
        size: if persistent {
            SYNC_VOLUME_SIZE.to_string()
        } else {
            String::new()
        },
    }
}

fn sync_container() -> Container {
    Container {
        image: SYNC_IMAGE.to_string(),
        expose: vec!["8384".to_string(), "22000".to_string()],
        mounts: BTreeMap::from([(
            SYNC_VOLUME.to_string(),
            Mount {
                path: SYNC_MOUNT_PATH.to_string(),
            },
        )]),
        ..Default::default()
    }
}

/// Name of the container to develop on: the one carrying dev settings, else
/// the lexicographically first.
pub fn dev_container_name(manifest: &Manifest) -> Option<&str> {
    manifest
        .containers
        .iter()
        .find(|(_, c)| c.dev.is_some())
        .or_else(|| manifest.containers.iter().next())
        .map(|(name, _)| name.as_str())
}

/// Derives the development manifest from a stored one.
pub fn derive_dev_manifest(manifest: &Manifest) -> Manifest {
    let mut dev = manifest.clone();
    let Some(name) = dev_container_name(manifest).map(str::to_string) else {
        return dev;
    };

    let mut persistent = false;
    if let Some(container) = dev.containers.get_mut(&name) {
        let settings = container
            .dev
            .clone()
            .unwrap_or_default()
            .with_defaults(&container.image);
        persistent = settings.persistent;

        container.image = settings.image.clone();
        container.working_dir = settings.path.clone();
        container.command = settings.command.clone();
        container.args = settings.args.clone();
        container.mounts.insert(
            SYNC_VOLUME.to_string(),
            Mount {
                path: settings.path.clone(),
            },
        );
        container.dev = Some(settings);
    }

    dev.containers.insert(SYNC_CONTAINER.to_string(), sync_container());
    dev.volumes.insert(SYNC_VOLUME.to_string(), sync_volume(persistent));
    dev.replicas = 1;
    dev.labels.insert(DEV_LABEL.to_string(), dev.name.clone());
    dev
}
