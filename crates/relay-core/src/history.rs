//! Bounded FIFO of recent readings.

use std::collections::VecDeque;

use crate::reading::Reading;

/// Number of readings retained by default.
pub const DEFAULT_HISTORY_CAPACITY: usize = 100;

/// Number of readings replayed to a new connection by default.
pub const DEFAULT_REPLAY_LEN: usize = 20;

/// Most recent readings in arrival order. The oldest entry is evicted once
/// `capacity` is exceeded.
#[derive(Debug, Clone)]
pub struct HistoryBuffer {
    entries: VecDeque<Reading>,
    capacity: usize,
}

impl HistoryBuffer {
    /// Create an empty buffer. A capacity of `0` is raised to `1`.
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            entries: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    /// Append at the tail, evicting from the head past capacity.
    pub fn append(&mut self, reading: Reading) {
        self.entries.push_back(reading);
        while self.entries.len() > self.capacity {
            let _ = self.entries.pop_front();
        }
    }

    /// Up to the last `n` readings, oldest first.
    pub fn recent_slice(&self, n: usize) -> Vec<Reading> {
        let skip = self.entries.len().saturating_sub(n);
        self.entries.iter().skip(skip).cloned().collect()
    }

    /// Number of stored readings.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether no reading has been recorded.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Maximum number of stored readings.
    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

impl Default for HistoryBuffer {
    fn default() -> Self {
        Self::new(DEFAULT_HISTORY_CAPACITY)
    }
}
