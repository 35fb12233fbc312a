//! Ring of recently completed, unnamed macros

use crate::events::EventLog;
use std::collections::VecDeque;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    /// Towards older entries
    Forward,
    /// Towards newer entries
    Backward,
}

/// Fixed-capacity ring; index 0 is the most recent push
#[derive(Debug, Clone)]
pub struct HistoryRing {
    entries: VecDeque<EventLog>,
    capacity: usize,
    cursor: usize,
}

impl HistoryRing {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            entries: VecDeque::with_capacity(capacity),
            capacity,
            cursor: 0,
        }
    }

    /// Insert at the head, evicting the oldest entry when full.
    /// Resets the cursor to the new head.
    pub fn push(&mut self, log: EventLog) {
        self.entries.push_front(log);
        if self.entries.len() > self.capacity {
            self.entries.pop_back();
        }
        self.cursor = 0;
    }

    /// Swap the entry under the cursor in place (used when appending to it)
    pub fn replace_current(&mut self, log: EventLog) {
        match self.entries.get_mut(self.cursor) {
            Some(entry) => *entry = log,
            None => self.push(log),
        }
    }

    pub fn rotate(&mut self, direction: Direction) -> Option<&EventLog> {
        let len = self.entries.len();
        if len == 0 {
            return None;
        }
        self.cursor = match direction {
            Direction::Forward => (self.cursor + 1) % len,
            Direction::Backward => (self.cursor + len - 1) % len,
        };
        self.entries.get(self.cursor)
    }

    pub fn rotate_to_origin(&mut self) -> Option<&EventLog> {
        self.cursor = 0;
        self.entries.front()
    }

    /// Entry under the cursor
    pub fn current(&self) -> Option<&EventLog> {
        self.entries.get(self.cursor)
    }

    pub fn head(&self) -> Option<&EventLog> {
        self.entries.front()
    }

    pub fn cursor(&self) -> usize {
        self.cursor
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn iter(&self) -> impl Iterator<Item = &EventLog> {
        self.entries.iter()
    }
}
