use dashmap::DashMap;
use tokio::sync::broadcast;

use crate::error::AppError;
use crate::models::event::LocationSnapshot;
use crate::models::participant::{Position, Role};

/// Latest reported position per participant. Every accepted write publishes a full
/// snapshot to all subscribers.
pub struct LocationStore {
    positions: DashMap<String, Position>,
    snapshots_tx: broadcast::Sender<LocationSnapshot>,
}

impl LocationStore {
    pub fn new(event_buffer_size: usize) -> Self {
        let (snapshots_tx, _unused_rx) = broadcast::channel(event_buffer_size.max(1));

        Self {
            positions: DashMap::new(),
            snapshots_tx,
        }
    }

    /// Validates the coordinates, replaces any previous position of the same participant
    /// and broadcasts the resulting snapshot.
    pub fn upsert(&self, position: Position) -> Result<(), AppError> {
        position.location.validate()?;
        if position.participant_id.trim().is_empty() {
            return Err(AppError::Validation(
                "participant id cannot be empty".to_string(),
            ));
        }

        self.positions
            .insert(position.participant_id.clone(), position);

        // No receivers just means nobody is connected.
        let _ = self.snapshots_tx.send(self.snapshot());
        Ok(())
    }

    pub fn get(&self, participant_id: &str) -> Option<Position> {
        self.positions
            .get(participant_id)
            .map(|entry| entry.value().clone())
    }

    /// Copy of every position held for `role`, ordered by participant id.
    pub fn list_by_role(&self, role: Role) -> Vec<Position> {
        let mut positions: Vec<Position> = self
            .positions
            .iter()
            .filter(|entry| entry.value().role == role)
            .map(|entry| entry.value().clone())
            .collect();
        positions.sort_by(|a, b| a.participant_id.cmp(&b.participant_id));
        positions
    }

    pub fn snapshot(&self) -> LocationSnapshot {
        LocationSnapshot {
            drivers: self.list_by_role(Role::Driver),
            passengers: self.list_by_role(Role::Passenger),
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<LocationSnapshot> {
        self.snapshots_tx.subscribe()
    }

    pub fn len(&self) -> usize {
        self.positions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.positions.is_empty()
    }
}
