//! Unacknowledged deliveries awaiting their acks.
//!
//! A point-to-point message routed with `requiresAcknowledgment` is
//! tracked here until an `Acknowledgment` referencing its id arrives or
//! its retries are exhausted.  Broadcasts are never tracked.  The timer
//! loop drives [`PendingAckStore::sweep`].

use relay_protocol::Message;
use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

#[derive(Debug, Clone)]
pub struct PendingAck {
    pub message: Message,
    pub first_sent: Instant,
    pub last_sent: Instant,
    /// Retransmissions performed so far.
    pub retries: u32,
}

/// What one sweep decided.
#[derive(Debug, Default)]
pub struct SweepOutcome {
    /// Due again; already stamped with the new attempt.
    pub retries: Vec<Message>,
    /// Exhausted their retries; entries removed.
    pub expired: Vec<Message>,
}

#[derive(Debug, Default)]
pub struct PendingAckStore {
    pending: Mutex<HashMap<String, PendingAck>>,
}

impl PendingAckStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start tracking a freshly routed message.
    pub fn track(&self, message: Message) {
        let now = Instant::now();
        self.pending.lock().unwrap().insert(
            message.id.clone(),
            PendingAck {
                message,
                first_sent: now,
                last_sent: now,
                retries: 0,
            },
        );
    }

    /// Clear the entry for `message_id`; `false` when nothing was tracked.
    pub fn acknowledge(&self, message_id: &str) -> bool {
        self.pending.lock().unwrap().remove(message_id).is_some()
    }

    /// Visit every entry overdue by `deadline`: bump the ones with
    /// retries left, evict the rest.
    pub fn sweep(&self, deadline: Duration, max_retries: u32) -> SweepOutcome {
        let now = Instant::now();
        let mut outcome = SweepOutcome::default();
        let mut pending = self.pending.lock().unwrap();
        let mut exhausted: Vec<String> = Vec::new();
        for (id, entry) in pending.iter_mut() {
            if now.duration_since(entry.last_sent) < deadline {
                continue;
            }
            if entry.retries < max_retries {
                entry.retries += 1;
                entry.last_sent = now;
                outcome.retries.push(entry.message.clone());
            } else {
                exhausted.push(id.clone());
            }
        }
        for id in exhausted {
            if let Some(entry) = pending.remove(&id) {
                outcome.expired.push(entry.message);
            }
        }
        outcome
    }

    pub fn contains(&self, message_id: &str) -> bool {
        self.pending.lock().unwrap().contains_key(message_id)
    }

    pub fn len(&self) -> usize {
        self.pending.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn clear(&self) {
        self.pending.lock().unwrap().clear();
    }
}
