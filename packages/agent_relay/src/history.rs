//! Bounded per-agent message history.
//!
//! The relay keeps a short transcript per agent so that a newly attached
//! watcher can catch up on recent context. The buffer is a fixed-capacity
//! ring: once full, appending drops the oldest entry.

use std::collections::VecDeque;

use crate::message::Message;

/// Maximum number of retained messages per agent.
pub const DEFAULT_HISTORY_CAPACITY: usize = 100;

/// Number of messages replayed to a newly attached watcher.
pub const DEFAULT_REPLAY_LIMIT: usize = 50;

/// Fixed-capacity, insertion-ordered ring of transcript entries.
#[derive(Debug)]
pub struct HistoryRing {
    buffer: VecDeque<Message>,
    capacity: usize,
}

impl HistoryRing {
    pub fn new(capacity: usize) -> Self {
        Self {
            buffer: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    /// Append a message, evicting the oldest entries while at capacity.
    pub fn push(&mut self, message: Message) {
        if self.capacity == 0 {
            return;
        }
        while self.buffer.len() >= self.capacity {
            self.buffer.pop_front();
        }
        self.buffer.push_back(message);
    }

    /// The last `limit` messages, oldest first.
    pub fn recent(&self, limit: usize) -> impl Iterator<Item = &Message> {
        let skip = self.buffer.len().saturating_sub(limit);
        self.buffer.iter().skip(skip)
    }

    pub fn len(&self) -> usize {
        self.buffer.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }
}
