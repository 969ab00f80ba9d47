// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Daemon HTTP server implementation

use anyhow::{Context, Result};
use metrics_exporter_prometheus::PrometheusBuilder;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::net::TcpListener;
use tokio::signal;
use tracing::{error, info, warn};

use launchpad_core::{
    application::{
        expiry::{DemoExpirySweep, ExpiryConfig},
        self_healing::{SelfHealingConfig, SelfHealingSweep},
        LifecycleService, NotificationHub, OperationPool, ReconcileEngine, StandardLifecycleService,
    },
    domain::{
        config::OrchestratorConfigManifest,
        repository::{ActivityRepository, LogRepository, ProjectRepository, ServiceRepository},
    },
    infrastructure::{
        auth::HubTokenVerifier,
        db::Database,
        event_bus::EventBus,
        repositories::{
            InMemoryLifecycleStore, InMemoryLogRepository, InMemoryProjectRepository, PostgresActivityRepository,
            PostgresLogRepository, PostgresProjectRepository, PostgresServiceRepository,
        },
        sandbox::SandboxProvider,
        StandardProviderFactory,
    },
    presentation::{
        api::{app, AppState},
        ws::ConnectionLimits,
    },
};

struct Repositories {
    services: Arc<dyn ServiceRepository>,
    activities: Arc<dyn ActivityRepository>,
    logs: Arc<dyn LogRepository>,
    projects: Arc<dyn ProjectRepository>,
}

async fn repositories(config: &OrchestratorConfigManifest) -> Result<Repositories> {
    let Some(url) = &config.spec.database.url else {
        warn!("No database configured, using in-memory repositories (state is lost on restart)");
        let store = InMemoryLifecycleStore::new();
        return Ok(Repositories {
            services: Arc::new(store.clone()),
            activities: Arc::new(store),
            logs: Arc::new(InMemoryLogRepository::new()),
            projects: Arc::new(InMemoryProjectRepository::new()),
        });
    };

    let db = Database::new(url, config.spec.database.max_connections)
        .await
        .context("Failed to initialize database")?;
    db.bootstrap_schema().await?;
    info!("Connected to PostgreSQL");

    let pool = db.get_pool().clone();
    Ok(Repositories {
        services: Arc::new(PostgresServiceRepository::new(pool.clone())),
        activities: Arc::new(PostgresActivityRepository::new(pool.clone())),
        logs: Arc::new(PostgresLogRepository::new(pool.clone())),
        projects: Arc::new(PostgresProjectRepository::new(pool)),
    })
}

pub async fn start_server(config: OrchestratorConfigManifest, host: Option<String>, port: Option<u16>) -> Result<()> {
    let spec = &config.spec;
    info!("Launchpad control plane starting (PID: {})", std::process::id());

    if spec.observability.metrics.enabled {
        PrometheusBuilder::new()
            .with_http_listener(([0, 0, 0, 0], spec.observability.metrics.port))
            .install()
            .context("Failed to install Prometheus exporter")?;
        info!("Metrics exporter listening on port {}", spec.observability.metrics.port);
    }

    let repos = repositories(&config).await?;

    let sandbox = Arc::new(SandboxProvider::new());
    let engine = Arc::new(ReconcileEngine::new(Arc::new(StandardProviderFactory::new(sandbox))));
    let event_bus = Arc::new(EventBus::with_default_capacity());
    let pool = Arc::new(OperationPool::new(spec.operations.max_concurrent));

    let lifecycle: Arc<dyn LifecycleService> = Arc::new(StandardLifecycleService::new(
        repos.services.clone(),
        repos.activities.clone(),
        repos.logs.clone(),
        repos.projects.clone(),
        engine,
        event_bus.clone(),
        pool.clone(),
        spec.dns.clone(),
        spec.sandbox.as_ref().map(|s| s.provider_settings()),
    ));

    let self_healing = Arc::new(SelfHealingSweep::new(
        repos.services.clone(),
        repos.activities.clone(),
        repos.logs.clone(),
        event_bus.clone(),
        SelfHealingConfig::from(&spec.reconciler),
    ));
    let self_healing_token = self_healing.shutdown_token();
    let self_healing_handle = self_healing.start();

    let expiry = Arc::new(DemoExpirySweep::new(
        repos.services.clone(),
        repos.projects.clone(),
        lifecycle,
        ExpiryConfig::from(&spec.reconciler),
    ));
    let expiry_token = expiry.shutdown_token();
    let expiry_handle = expiry.start();

    let (hub, hub_handle) = NotificationHub::spawn(spec.hub.send_buffer);
    let forwarder = hub.forward_events(&event_bus);

    let state = Arc::new(AppState {
        hub,
        verifier: Arc::new(HubTokenVerifier::new(&spec.hub.jwt_secret)),
        limits: ConnectionLimits {
            auth_timeout: Duration::from_secs(spec.hub.auth_timeout_secs),
            ..Default::default()
        },
        start_time: Instant::now(),
    });

    let addr = format!(
        "{}:{}",
        host.as_deref().unwrap_or(&spec.server.bind_address),
        port.unwrap_or(spec.server.port)
    );
    let listener = TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind to {}", addr))?;

    info!("Control plane listening on {}", addr);

    axum::serve(listener, app(state))
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("HTTP server failed")?;

    info!("Control plane shutting down");

    self_healing_token.cancel();
    expiry_token.cancel();
    let _ = tokio::join!(self_healing_handle, expiry_handle);

    let ceiling = Duration::from_secs(spec.operations.shutdown_timeout_secs);
    info!(in_flight = pool.in_flight(), "Waiting for in-flight operations");
    if pool.shutdown(ceiling).await {
        info!("All operations finished");
    } else {
        warn!(
            in_flight = pool.in_flight(),
            "Shutdown ceiling reached, remaining operations are left to self-healing"
        );
    }

    forwarder.abort();
    hub_handle.abort();

    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C signal");
        },
        _ = terminate => {
            info!("Received SIGTERM signal");
        },
    }
}
