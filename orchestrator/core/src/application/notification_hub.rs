// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # Notification Hub
//!
//! Pushes service state changes to real-time connections scoped by project.
//!
//! The connection registry is owned by a single task; registration,
//! authentication, removal and publishing are commands on its queue, so no
//! lock guards the client set. Every client has a bounded outbound buffer.
//! Delivery uses `try_send`: a client whose buffer is full is dropped rather
//! than slowing the hub down. Dropping the client's sender closes its
//! outbound stream, which the transport treats as a disconnect.

use metrics::gauge;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::domain::environment::ProjectId;
use crate::domain::events::ServiceEvent;
use crate::domain::service::Service;
use crate::infrastructure::event_bus::{DomainEvent, EventBus, EventBusError};

pub const DEFAULT_SEND_BUFFER: usize = 256;

/// Serialized outbound frame, shared between all recipients.
pub type Frame = Arc<str>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ClientId(u64);

impl std::fmt::Display for ClientId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "client-{}", self.0)
    }
}

/// Messages sent by the hub to a connection.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum HubMessage {
    /// Authentication challenge, sent on connect.
    Auth,
    Service { service: Box<Service> },
}

impl HubMessage {
    pub fn to_frame(&self) -> Result<Frame, HubError> {
        let json = serde_json::to_string(self).map_err(|e| HubError::Serialization(e.to_string()))?;
        Ok(Arc::from(json))
    }
}

/// Messages accepted from a connection.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ClientMessage {
    Auth { token: String },
}

#[derive(Debug, thiserror::Error)]
pub enum HubError {
    #[error("notification hub is not running")]
    Closed,

    #[error("failed to serialize message: {0}")]
    Serialization(String),
}

/// A registered connection as seen by the transport.
pub struct ClientHandle {
    pub id: ClientId,
    pub outbound: mpsc::Receiver<Frame>,
}

enum HubCommand {
    Register {
        id: ClientId,
        tx: mpsc::Sender<Frame>,
    },
    Authenticate {
        id: ClientId,
        project: ProjectId,
    },
    Unregister {
        id: ClientId,
    },
    Publish {
        project: ProjectId,
        frame: Frame,
    },
    Count {
        reply: oneshot::Sender<usize>,
    },
}

struct Client {
    project: Option<ProjectId>,
    tx: mpsc::Sender<Frame>,
}

/// Cloneable handle to the hub task.
#[derive(Clone)]
pub struct NotificationHub {
    commands: mpsc::UnboundedSender<HubCommand>,
    next_id: Arc<AtomicU64>,
    send_buffer: usize,
}

impl NotificationHub {
    /// Starts the registry task. It stops once every handle is dropped.
    pub fn spawn(send_buffer: usize) -> (Self, JoinHandle<()>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let handle = tokio::spawn(run_registry(rx));
        (
            Self {
                commands: tx,
                next_id: Arc::new(AtomicU64::new(1)),
                send_buffer: send_buffer.max(1),
            },
            handle,
        )
    }

    pub fn register(&self) -> Result<ClientHandle, HubError> {
        let id = ClientId(self.next_id.fetch_add(1, Ordering::Relaxed));
        let (tx, outbound) = mpsc::channel(self.send_buffer);
        self.send(HubCommand::Register { id, tx })?;
        Ok(ClientHandle { id, outbound })
    }

    /// Binds an authenticated client to one project.
    pub fn authenticate(&self, id: ClientId, project: ProjectId) -> Result<(), HubError> {
        self.send(HubCommand::Authenticate { id, project })
    }

    pub fn unregister(&self, id: ClientId) {
        let _ = self.send(HubCommand::Unregister { id });
    }

    /// Queues a state change for every authenticated client of the service's
    /// project.
    pub fn publish(&self, service: &Service) -> Result<(), HubError> {
        let frame = HubMessage::Service {
            service: Box::new(service.clone()),
        }
        .to_frame()?;
        self.send(HubCommand::Publish {
            project: service.project_id.clone(),
            frame,
        })
    }

    /// Number of registered connections, authenticated or not.
    pub async fn connection_count(&self) -> Result<usize, HubError> {
        let (reply, rx) = oneshot::channel();
        self.send(HubCommand::Count { reply })?;
        rx.await.map_err(|_| HubError::Closed)
    }

    /// Forwards every service state change published on `bus` to the hub.
    pub fn forward_events(&self, bus: &EventBus) -> JoinHandle<()> {
        let hub = self.clone();
        let mut events = bus.subscribe();
        tokio::spawn(async move {
            loop {
                match events.recv().await {
                    Ok(DomainEvent::Service(ServiceEvent::StateChanged { service, .. })) => {
                        if let Err(e) = hub.publish(&service) {
                            warn!(service_id = %service.id, error = %e, "failed to publish state change");
                            if matches!(e, HubError::Closed) {
                                break;
                            }
                        }
                    }
                    Ok(_) => {}
                    Err(EventBusError::Lagged(_)) => continue,
                    Err(EventBusError::Closed) => break,
                }
            }
            debug!("Hub event forwarder stopped");
        })
    }

    fn send(&self, command: HubCommand) -> Result<(), HubError> {
        self.commands.send(command).map_err(|_| HubError::Closed)
    }
}

async fn run_registry(mut commands: mpsc::UnboundedReceiver<HubCommand>) {
    let mut clients: HashMap<ClientId, Client> = HashMap::new();

    while let Some(command) = commands.recv().await {
        match command {
            HubCommand::Register { id, tx } => {
                clients.insert(id, Client { project: None, tx });
                debug!(client = %id, "hub client registered");
            }
            HubCommand::Authenticate { id, project } => {
                if let Some(client) = clients.get_mut(&id) {
                    debug!(client = %id, project_id = %project, "hub client authenticated");
                    client.project = Some(project);
                }
            }
            HubCommand::Unregister { id } => {
                if clients.remove(&id).is_some() {
                    debug!(client = %id, "hub client unregistered");
                }
            }
            HubCommand::Publish { project, frame } => {
                clients.retain(|id, client| {
                    if client.project.as_ref() != Some(&project) {
                        return true;
                    }
                    match client.tx.try_send(frame.clone()) {
                        Ok(()) => true,
                        Err(mpsc::error::TrySendError::Full(_)) => {
                            warn!(client = %id, project_id = %project, "hub client too slow, disconnecting");
                            false
                        }
                        Err(mpsc::error::TrySendError::Closed(_)) => false,
                    }
                });
            }
            HubCommand::Count { reply } => {
                let _ = reply.send(clients.len());
            }
        }
        gauge!("launchpad_hub_connections").set(clients.len() as f64);
    }

    info!("Notification hub stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::service::{ActorId, ServiceStatus};

    fn service(project: &str) -> Service {
        let mut service = Service::new(ProjectId::from(project), "web", "", ActorId::from("a"), false);
        service.status = ServiceStatus::Deployed;
        service
    }

    #[test]
    fn test_message_grammar() {
        assert_eq!(&*HubMessage::Auth.to_frame().unwrap(), r#"{"type":"auth"}"#);

        let frame = HubMessage::Service {
            service: Box::new(service("p1")),
        }
        .to_frame()
        .unwrap();
        let value: serde_json::Value = serde_json::from_str(&frame).unwrap();
        assert_eq!(value["type"], "service");
        assert_eq!(value["service"]["status"], "deployed");

        let inbound: ClientMessage = serde_json::from_str(r#"{"type":"auth","token":"abc"}"#).unwrap();
        assert!(matches!(inbound, ClientMessage::Auth { token } if token == "abc"));
        assert!(serde_json::from_str::<ClientMessage>(r#"{"type":"subscribe"}"#).is_err());
    }

    #[tokio::test]
    async fn test_delivery_is_scoped_to_authenticated_project() {
        let (hub, _task) = NotificationHub::spawn(DEFAULT_SEND_BUFFER);
        let mut p1 = hub.register().unwrap();
        let mut p2 = hub.register().unwrap();
        let mut anonymous = hub.register().unwrap();
        hub.authenticate(p1.id, ProjectId::from("p1")).unwrap();
        hub.authenticate(p2.id, ProjectId::from("p2")).unwrap();

        hub.publish(&service("p1")).unwrap();
        assert_eq!(hub.connection_count().await.unwrap(), 3);

        let frame = p1.outbound.recv().await.unwrap();
        assert!(frame.contains(r#""type":"service""#));
        assert!(p2.outbound.try_recv().is_err());
        assert!(anonymous.outbound.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_full_buffer_drops_client() {
        let (hub, _task) = NotificationHub::spawn(1);
        let mut slow = hub.register().unwrap();
        hub.authenticate(slow.id, ProjectId::from("p1")).unwrap();

        hub.publish(&service("p1")).unwrap();
        hub.publish(&service("p1")).unwrap();
        assert_eq!(hub.connection_count().await.unwrap(), 0);

        // buffered frame is still readable, then the stream ends
        assert!(slow.outbound.recv().await.is_some());
        assert!(slow.outbound.recv().await.is_none());
    }

    #[tokio::test]
    async fn test_unregister_and_forwarding() {
        let bus = EventBus::with_default_capacity();
        let (hub, _task) = NotificationHub::spawn(DEFAULT_SEND_BUFFER);
        let _forwarder = hub.forward_events(&bus);
        let mut client = hub.register().unwrap();
        hub.authenticate(client.id, ProjectId::from("p1")).unwrap();
        // make sure registration is processed before publishing
        assert_eq!(hub.connection_count().await.unwrap(), 1);

        bus.publish_service_event(ServiceEvent::StateChanged {
            service: Box::new(service("p1")),
            changed_at: chrono::Utc::now(),
        });
        let frame = tokio::time::timeout(std::time::Duration::from_secs(1), client.outbound.recv())
            .await
            .unwrap()
            .unwrap();
        assert!(frame.contains("\"deployed\""));

        hub.unregister(client.id);
        assert_eq!(hub.connection_count().await.unwrap(), 0);
    }
}
