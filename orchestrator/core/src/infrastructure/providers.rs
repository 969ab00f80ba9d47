// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Adapter selection per environment.

use std::sync::Arc;
use tracing::warn;

use crate::domain::environment::Environment;
use crate::domain::provider::{DnsRegistrar, ProviderError, ProviderFactory, ResourceProvider};
use crate::infrastructure::cluster::ClusterProvider;
use crate::infrastructure::dns::Route53Registrar;
use crate::infrastructure::sandbox::SandboxProvider;

/// Cluster-backed environments get a fresh [`ClusterProvider`]; everything
/// else shares the in-process sandbox. DNS is only managed for clusters.
pub struct StandardProviderFactory {
    sandbox: Arc<SandboxProvider>,
}

impl StandardProviderFactory {
    pub fn new(sandbox: Arc<SandboxProvider>) -> Self {
        Self { sandbox }
    }

    pub fn sandbox(&self) -> &Arc<SandboxProvider> {
        &self.sandbox
    }
}

impl ProviderFactory for StandardProviderFactory {
    fn provider_for(&self, env: &Environment) -> Result<Arc<dyn ResourceProvider>, ProviderError> {
        if env.is_cluster_backed() {
            return Ok(Arc::new(ClusterProvider::new(&env.provider)?));
        }
        Ok(self.sandbox.clone())
    }

    fn dns_for(&self, env: &Environment) -> Option<Arc<dyn DnsRegistrar>> {
        if !env.is_cluster_backed() {
            return None;
        }
        let settings = env.dns.clone()?;
        match Route53Registrar::new(settings) {
            Ok(registrar) => Some(Arc::new(registrar)),
            Err(e) => {
                warn!(environment = %env.name, error = %e, "dns configured but unusable");
                None
            }
        }
    }
}
