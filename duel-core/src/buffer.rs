//! Outbound queue for the match session.
//!
//! Two halves:
//! - a FIFO of envelopes produced while the channel is down, flushed on the
//!   next connect
//! - the set of sent envelopes that require an acknowledgment, each with a
//!   deadline
//!
//! Both count against one capacity to bound memory while offline.

use std::collections::{HashMap, VecDeque};
use thiserror::Error;

use duelsync_types::{Envelope, MessageId};

/// Error type for queue operations.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BufferError {
    /// Queue is at capacity.
    #[error("outbound queue full (capacity: {capacity})")]
    Full {
        /// Queue capacity.
        capacity: usize,
    },
}

#[derive(Debug, Clone)]
struct AwaitingAck {
    envelope: Envelope,
    deadline: u64,
}

/// Outbound envelopes with acknowledgment tracking.
///
/// Envelopes flow through in this order:
/// 1. `enqueue()` while offline
/// 2. `drain()` on connect, then `track()` those that need an ack
/// 3. `ack()` when the acknowledgment arrives, or `expired()` once the
///    deadline passes
#[derive(Debug)]
pub struct OutboundQueue {
    capacity: usize,
    queue: VecDeque<Envelope>,
    awaiting: HashMap<MessageId, AwaitingAck>,
}

impl OutboundQueue {
    /// Create a queue bounding queued plus awaiting envelopes.
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            queue: VecDeque::new(),
            awaiting: HashMap::new(),
        }
    }

    /// Hold an envelope for the next connect.
    pub fn enqueue(&mut self, envelope: Envelope) -> Result<(), BufferError> {
        if self.total_count() >= self.capacity {
            return Err(BufferError::Full {
                capacity: self.capacity,
            });
        }
        self.queue.push_back(envelope);
        Ok(())
    }

    /// Take every queued envelope, oldest first.
    pub fn drain(&mut self) -> Vec<Envelope> {
        self.queue.drain(..).collect()
    }

    /// Start the acknowledgment window for a sent envelope.
    pub fn track(&mut self, envelope: Envelope, deadline: u64) {
        self.awaiting
            .insert(envelope.message_id, AwaitingAck { envelope, deadline });
    }

    /// Acknowledgment arrived. Returns the envelope if it was awaited.
    pub fn ack(&mut self, message_id: &MessageId) -> Option<Envelope> {
        self.awaiting.remove(message_id).map(|entry| entry.envelope)
    }

    /// Put an unsent envelope back at the front of the queue.
    pub fn requeue_front(&mut self, envelope: Envelope) {
        self.queue.push_front(envelope);
    }

    /// Remove and return envelopes whose ack deadline is at or before `now`.
    pub fn expired(&mut self, now: u64) -> Vec<Envelope> {
        let ids: Vec<MessageId> = self
            .awaiting
            .iter()
            .filter(|(_, entry)| entry.deadline <= now)
            .map(|(id, _)| *id)
            .collect();
        let mut expired: Vec<Envelope> = ids
            .iter()
            .filter_map(|id| self.awaiting.remove(id).map(|entry| entry.envelope))
            .collect();
        expired.sort_by_key(|envelope| envelope.timestamp);
        expired
    }

    /// Whether an envelope is awaiting acknowledgment.
    pub fn is_awaiting(&self, message_id: &MessageId) -> bool {
        self.awaiting.contains_key(message_id)
    }

    /// Number of queued envelopes (not including awaiting).
    pub fn len(&self) -> usize {
        self.queue.len()
    }

    /// Check if the queue is empty.
    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    /// Number of envelopes awaiting acknowledgment.
    pub fn awaiting_count(&self) -> usize {
        self.awaiting.len()
    }

    /// Queued plus awaiting.
    pub fn total_count(&self) -> usize {
        self.queue.len() + self.awaiting.len()
    }

    /// Drop everything.
    pub fn clear(&mut self) {
        self.queue.clear();
        self.awaiting.clear();
    }
}
