// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! WebSocket transport for the notification hub.
//!
//! A connection is registered with the hub unauthenticated and immediately
//! challenged with `{"type":"auth"}`. It must answer with
//! `{"type":"auth","token":...}` before the auth deadline; a token that does
//! not cover the project in the URL closes the connection. Afterwards the
//! session only forwards hub frames and keeps the peer alive with pings.

use axum::extract::ws::{Message, WebSocket};
use bytes::Bytes;
use futures::{SinkExt, StreamExt};
use std::time::Duration;
use tokio::time::{interval_at, sleep, Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

use crate::application::notification_hub::{ClientMessage, HubMessage, NotificationHub};
use crate::domain::environment::ProjectId;
use crate::infrastructure::auth::HubTokenVerifier;

/// Timing and size limits of a hub connection.
#[derive(Debug, Clone, Copy)]
pub struct ConnectionLimits {
    pub ping_interval: Duration,
    pub read_timeout: Duration,
    pub write_timeout: Duration,
    pub auth_timeout: Duration,
    pub max_message_size: usize,
}

impl Default for ConnectionLimits {
    fn default() -> Self {
        Self {
            ping_interval: Duration::from_secs(54),
            read_timeout: Duration::from_secs(60),
            write_timeout: Duration::from_secs(10),
            auth_timeout: Duration::from_secs(30),
            max_message_size: 512,
        }
    }
}

#[derive(Debug, thiserror::Error)]
enum SessionEnd {
    #[error("peer closed the connection")]
    PeerClosed,
    #[error("no authentication before the deadline")]
    AuthTimeout,
    #[error("authentication rejected: {0}")]
    Unauthorized(String),
    #[error("peer read timeout")]
    ReadTimeout,
    #[error("write failed: {0}")]
    Write(String),
    #[error("dropped by the hub")]
    Dropped,
    #[error("protocol error: {0}")]
    Protocol(String),
}

pub async fn run_session(
    socket: WebSocket,
    project: ProjectId,
    hub: NotificationHub,
    verifier: &HubTokenVerifier,
    limits: ConnectionLimits,
) {
    let mut client = match hub.register() {
        Ok(client) => client,
        Err(e) => {
            warn!(project_id = %project, error = %e, "rejecting hub connection");
            return;
        }
    };
    let id = client.id;
    info!(client = %id, project_id = %project, "hub connection opened");

    let (mut sender, mut receiver) = socket.split();

    let result: Result<(), SessionEnd> = async {
        let challenge = HubMessage::Auth
            .to_frame()
            .map_err(|e| SessionEnd::Protocol(e.to_string()))?;
        write(&mut sender, Message::Text(challenge.as_ref().into()), limits.write_timeout).await?;

        let mut authenticated = false;
        let auth_deadline = sleep(limits.auth_timeout);
        tokio::pin!(auth_deadline);
        let read_deadline = sleep(limits.read_timeout);
        tokio::pin!(read_deadline);
        let mut ping = interval_at(Instant::now() + limits.ping_interval, limits.ping_interval);
        ping.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = &mut auth_deadline, if !authenticated => return Err(SessionEnd::AuthTimeout),
                _ = &mut read_deadline => return Err(SessionEnd::ReadTimeout),
                _ = ping.tick() => {
                    write(&mut sender, Message::Ping(Bytes::new()), limits.write_timeout).await?;
                }
                frame = client.outbound.recv() => {
                    let Some(frame) = frame else {
                        return Err(SessionEnd::Dropped);
                    };
                    write(&mut sender, Message::Text(frame.as_ref().into()), limits.write_timeout).await?;
                }
                inbound = receiver.next() => {
                    let message = match inbound {
                        None => return Err(SessionEnd::PeerClosed),
                        Some(Err(e)) => return Err(SessionEnd::Protocol(e.to_string())),
                        Some(Ok(message)) => message,
                    };
                    read_deadline.as_mut().reset(Instant::now() + limits.read_timeout);
                    match message {
                        Message::Text(text) => {
                            if authenticated {
                                debug!(client = %id, "ignoring message from authenticated client");
                                continue;
                            }
                            let ClientMessage::Auth { token } = serde_json::from_str(text.as_str())
                                .map_err(|e| SessionEnd::Protocol(e.to_string()))?;
                            verifier
                                .authorize(&token, &project)
                                .map_err(|e| SessionEnd::Unauthorized(e.to_string()))?;
                            hub.authenticate(id, project.clone())
                                .map_err(|e| SessionEnd::Protocol(e.to_string()))?;
                            authenticated = true;
                            debug!(client = %id, project_id = %project, "hub connection authenticated");
                        }
                        Message::Close(_) => return Err(SessionEnd::PeerClosed),
                        // pongs only refresh the read deadline; axum answers pings
                        Message::Ping(_) | Message::Pong(_) => {}
                        Message::Binary(_) => {
                            return Err(SessionEnd::Protocol("binary frames are not supported".into()));
                        }
                    }
                }
            }
        }
    }
    .await;

    hub.unregister(id);
    match result {
        Err(SessionEnd::PeerClosed) | Ok(()) => info!(client = %id, "hub connection closed"),
        Err(reason) => {
            info!(client = %id, %reason, "hub connection terminated");
            let _ = tokio::time::timeout(limits.write_timeout, sender.send(Message::Close(None))).await;
        }
    }
}

async fn write<S>(sender: &mut S, message: Message, timeout: Duration) -> Result<(), SessionEnd>
where
    S: futures::Sink<Message, Error = axum::Error> + Unpin,
{
    match tokio::time::timeout(timeout, sender.send(message)).await {
        Ok(Ok(())) => Ok(()),
        Ok(Err(e)) => Err(SessionEnd::Write(e.to_string())),
        Err(_) => Err(SessionEnd::Write("write timed out".into())),
    }
}
