use dashmap::DashMap;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use uuid::Uuid;

use crate::error::AppError;
use crate::models::event::ServerEvent;
use crate::models::participant::Role;

/// Sending half of one client connection. Cloning it does not open a new connection;
/// clones compare equal by `id`.
#[derive(Debug, Clone)]
pub struct ConnectionHandle {
    id: Uuid,
    tx: mpsc::Sender<ServerEvent>,
}

impl ConnectionHandle {
    pub fn new(tx: mpsc::Sender<ServerEvent>) -> Self {
        Self {
            id: Uuid::new_v4(),
            tx,
        }
    }

    /// Opens a bounded outbound buffer and returns the handle plus the receiving end the
    /// socket writer drains.
    pub fn channel(buffer: usize) -> (Self, mpsc::Receiver<ServerEvent>) {
        let (tx, rx) = mpsc::channel(buffer.max(1));
        (Self::new(tx), rx)
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }

    /// Non-blocking enqueue onto the outbound buffer.
    pub fn deliver(&self, event: ServerEvent) -> Result<(), AppError> {
        self.tx.try_send(event).map_err(|err| match err {
            TrySendError::Full(event) => AppError::Delivery(format!(
                "outbound buffer of connection {} is full, dropped {}",
                self.id,
                event.name()
            )),
            TrySendError::Closed(event) => AppError::Delivery(format!(
                "connection {} is closed, dropped {}",
                self.id,
                event.name()
            )),
        })
    }
}

#[derive(Debug, Clone)]
pub struct Binding {
    pub participant_id: String,
    pub role: Role,
    pub display_name: Option<String>,
    pub handle: ConnectionHandle,
}

#[derive(Debug, Default)]
pub struct ConnectionRegistry {
    bindings: DashMap<String, Binding>,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Binds `participant_id` to `handle`, replacing any earlier binding. Returns the
    /// replaced binding, if there was one.
    pub fn register(
        &self,
        participant_id: &str,
        role: Role,
        display_name: Option<String>,
        handle: ConnectionHandle,
    ) -> Option<Binding> {
        self.bindings.insert(
            participant_id.to_string(),
            Binding {
                participant_id: participant_id.to_string(),
                role,
                display_name,
                handle,
            },
        )
    }

    pub fn resolve(&self, participant_id: &str) -> Option<ConnectionHandle> {
        self.bindings
            .get(participant_id)
            .map(|entry| entry.handle.clone())
    }

    pub fn binding(&self, participant_id: &str) -> Option<Binding> {
        self.bindings
            .get(participant_id)
            .map(|entry| entry.value().clone())
    }

    /// Drops every binding that points at the connection `connection_id` and returns the
    /// participant ids that were bound to it.
    pub fn unregister(&self, connection_id: Uuid) -> Vec<String> {
        let mut removed = Vec::new();
        self.bindings.retain(|participant_id, binding| {
            if binding.handle.id() == connection_id {
                removed.push(participant_id.clone());
                false
            } else {
                true
            }
        });
        removed.sort();
        removed
    }

    pub fn len(&self) -> usize {
        self.bindings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bindings.is_empty()
    }

    pub fn count_by_role(&self, role: Role) -> usize {
        self.bindings
            .iter()
            .filter(|entry| entry.value().role == role)
            .count()
    }
}
