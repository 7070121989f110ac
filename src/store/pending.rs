use std::collections::VecDeque;

use dashmap::DashMap;

use crate::models::event::ServerEvent;

/// Per-participant backlog of events that could not be delivered. Only used when
/// `QUEUE_UNDELIVERED` is enabled; flushed on the participant's next registration.
#[derive(Debug)]
pub struct PendingDeliveries {
    queues: DashMap<String, VecDeque<ServerEvent>>,
    limit: usize,
}

impl PendingDeliveries {
    pub fn new(limit: usize) -> Self {
        Self {
            queues: DashMap::new(),
            limit: limit.max(1),
        }
    }

    /// Queues `event` for `participant_id`. Returns true if the oldest queued event had to
    /// be dropped to stay within the limit.
    pub fn push(&self, participant_id: &str, event: ServerEvent) -> bool {
        let mut queue = self.queues.entry(participant_id.to_string()).or_default();
        let overflowed = queue.len() >= self.limit;
        if overflowed {
            queue.pop_front();
        }
        queue.push_back(event);
        overflowed
    }

    pub fn drain(&self, participant_id: &str) -> Vec<ServerEvent> {
        self.queues
            .remove(participant_id)
            .map(|(_, queue)| queue.into_iter().collect())
            .unwrap_or_default()
    }

    pub fn queued_for(&self, participant_id: &str) -> usize {
        self.queues
            .get(participant_id)
            .map(|queue| queue.len())
            .unwrap_or(0)
    }
}
