// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Demo Expiry Sweep - Background task destroying expired demo services
//!
//! Demo services live for a fixed time after creation. Each tick requests a
//! destroy for every expired demo service still in a settled status, using
//! the configured system actor. A service flagged demo whose project no
//! longer targets the demo provider is unflagged instead.

use anyhow::Result;
use chrono::{Duration as ChronoDuration, Utc};
use metrics::counter;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::application::lifecycle::{LifecycleError, LifecycleService};
use crate::domain::config::ReconcilerConfig;
use crate::domain::environment::ProviderKind;
use crate::domain::repository::{ProjectRepository, ServiceRepository};
use crate::domain::service::{ActorId, ServiceStatus};

/// Statuses a demo service may expire from.
const EXPIRABLE: [ServiceStatus; 3] = [ServiceStatus::Created, ServiceStatus::Failed, ServiceStatus::Deployed];

#[derive(Debug, Clone)]
pub struct ExpiryConfig {
    pub interval: Duration,
    pub ttl: Duration,
    pub system_actor: ActorId,
}

impl From<&ReconcilerConfig> for ExpiryConfig {
    fn from(config: &ReconcilerConfig) -> Self {
        Self {
            interval: config.expiry_interval(),
            ttl: config.demo_ttl(),
            system_actor: ActorId(config.system_actor.clone()),
        }
    }
}

pub struct DemoExpirySweep {
    services: Arc<dyn ServiceRepository>,
    projects: Arc<dyn ProjectRepository>,
    lifecycle: Arc<dyn LifecycleService>,
    config: ExpiryConfig,
    shutdown_token: CancellationToken,
}

impl DemoExpirySweep {
    pub fn new(
        services: Arc<dyn ServiceRepository>,
        projects: Arc<dyn ProjectRepository>,
        lifecycle: Arc<dyn LifecycleService>,
        config: ExpiryConfig,
    ) -> Self {
        Self {
            services,
            projects,
            lifecycle,
            config,
            shutdown_token: CancellationToken::new(),
        }
    }

    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown_token.clone()
    }

    pub fn start(self: Arc<Self>) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            self.run().await;
        })
    }

    async fn run(&self) {
        info!(
            interval_secs = self.config.interval.as_secs(),
            ttl_secs = self.config.ttl.as_secs(),
            "Starting demo expiry sweep"
        );
        let mut tick = interval(self.config.interval);
        tick.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = tick.tick() => {
                    match self.sweep().await {
                        Ok(0) => debug!("no expired demo services"),
                        Ok(destroyed) => info!(destroyed, "expired demo services scheduled for destroy"),
                        Err(e) => warn!("Demo expiry sweep failed: {}", e),
                    }
                }
                _ = self.shutdown_token.cancelled() => {
                    info!("Shutdown signal received, stopping demo expiry sweep");
                    break;
                }
            }
        }
    }

    /// One pass. Returns the number of destroys requested.
    pub async fn sweep(&self) -> Result<usize> {
        let ttl = ChronoDuration::from_std(self.config.ttl)?;
        let expired = self.services.find_expired_demos(&EXPIRABLE, Utc::now() - ttl).await?;

        let mut destroyed = 0;
        for service in expired {
            let project = self.projects.find_by_id(&service.project_id).await?;
            let still_demo = project.is_some_and(|p| p.settings.provider.kind == ProviderKind::Demo);
            if !still_demo {
                warn!(
                    service_id = %service.id,
                    project_id = %service.project_id,
                    "demo service no longer on the demo provider, clearing demo flag"
                );
                self.services.set_demo(service.id, false).await?;
                continue;
            }

            match self.lifecycle.request_destroy(service.id, &self.config.system_actor).await {
                Ok(activity) => {
                    destroyed += 1;
                    counter!("launchpad_demo_expired_total").increment(1);
                    info!(service_id = %service.id, activity_id = %activity.id, "expired demo service");
                }
                // changed status since the query, picked up next tick if needed
                Err(LifecycleError::InvalidServiceStatus(status)) => {
                    debug!(service_id = %service.id, %status, "skipping expired demo service");
                }
                Err(e) => {
                    warn!(service_id = %service.id, error = %e, "failed to destroy expired demo service");
                }
            }
        }
        Ok(destroyed)
    }
}
