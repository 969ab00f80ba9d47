// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

use axum::{
    extract::{ws::WebSocketUpgrade, Path, State},
    response::Response,
    routing::get,
    Json, Router,
};
use serde_json::json;
use std::sync::Arc;
use std::time::Instant;
use tower_http::trace::TraceLayer;

use crate::application::notification_hub::NotificationHub;
use crate::domain::environment::ProjectId;
use crate::infrastructure::auth::HubTokenVerifier;
use crate::presentation::ws::{run_session, ConnectionLimits};

pub struct AppState {
    pub hub: NotificationHub,
    pub verifier: Arc<HubTokenVerifier>,
    pub limits: ConnectionLimits,
    pub start_time: Instant,
}

pub fn app(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(health_handler))
        .route("/ws/projects/{project_id}", get(hub_handler))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn health_handler(State(state): State<Arc<AppState>>) -> Json<serde_json::Value> {
    Json(json!({
        "status": "healthy",
        "uptime_seconds": state.start_time.elapsed().as_secs(),
    }))
}

async fn hub_handler(
    ws: WebSocketUpgrade,
    Path(project_id): Path<String>,
    State(state): State<Arc<AppState>>,
) -> Response {
    let limits = state.limits;
    ws.max_message_size(limits.max_message_size)
        .on_upgrade(move |socket| async move {
            run_session(
                socket,
                ProjectId(project_id),
                state.hub.clone(),
                &state.verifier,
                limits,
            )
            .await
        })
}
