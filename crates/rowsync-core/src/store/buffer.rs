// ── Event buffer ──
//
// Holds change events that arrive while a scope has no trusted snapshot.
// Replayed in arrival order once the snapshot lands.

use std::collections::VecDeque;

use crate::model::ChangeEvent;

/// Bounded FIFO of pending change events.
#[derive(Debug)]
pub struct EventBuffer {
    events: VecDeque<ChangeEvent>,
    capacity: usize,
}

impl EventBuffer {
    pub fn new(capacity: usize) -> Self {
        Self {
            events: VecDeque::new(),
            capacity: capacity.max(1),
        }
    }

    /// Queue an event. Returns `false`, without queueing, when full.
    #[must_use]
    pub fn push(&mut self, event: ChangeEvent) -> bool {
        if self.events.len() >= self.capacity {
            return false;
        }
        self.events.push_back(event);
        true
    }

    /// Take every pending event, oldest first.
    pub fn drain(&mut self) -> impl Iterator<Item = ChangeEvent> + '_ {
        self.events.drain(..)
    }

    pub fn clear(&mut self) {
        self.events.clear();
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}
