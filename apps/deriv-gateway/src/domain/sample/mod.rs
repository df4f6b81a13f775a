//! Tick Samples and Bounded History
//!
//! A `Sample` is one observed price point for a symbol. Each active
//! subscription keeps its recent samples in a `RingBuffer`: a
//! fixed-capacity, append-only store that evicts the oldest entry
//! when full.

use std::collections::VecDeque;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A symbol string (e.g. `R_100`, `frxEURUSD`).
pub type Symbol = String;

/// One observed price point for a symbol. Immutable, append-only.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Sample {
    /// Symbol the sample belongs to.
    pub symbol: Symbol,
    /// Quoted price.
    pub value: f64,
    /// Server timestamp as Unix seconds.
    pub epoch: i64,
}

impl Sample {
    /// Create a new sample.
    #[must_use]
    pub const fn new(symbol: Symbol, value: f64, epoch: i64) -> Self {
        Self {
            symbol,
            value,
            epoch,
        }
    }

    /// The sample's timestamp as a UTC datetime.
    ///
    /// Returns `None` if the epoch is out of chrono's representable range.
    #[must_use]
    pub fn timestamp(&self) -> Option<DateTime<Utc>> {
        DateTime::from_timestamp(self.epoch, 0)
    }
}

/// Fixed-capacity FIFO buffer. Pushing onto a full buffer evicts the
/// oldest entry first; the buffer never exceeds its configured capacity.
#[derive(Debug, Clone)]
pub struct RingBuffer<T> {
    items: VecDeque<T>,
    capacity: usize,
}

impl<T> RingBuffer<T> {
    /// Create a buffer holding at most `capacity` entries.
    ///
    /// A capacity of zero is clamped to one so the buffer can always
    /// hold the latest entry.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            items: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    /// Append an entry, evicting the oldest if the buffer is full.
    pub fn push(&mut self, item: T) {
        if self.items.len() == self.capacity {
            self.items.pop_front();
        }
        self.items.push_back(item);
    }

    /// The most recently pushed entry.
    #[must_use]
    pub fn latest(&self) -> Option<&T> {
        self.items.back()
    }

    /// Number of entries currently held.
    #[must_use]
    pub fn len(&self) -> usize {
        self.items.len()
    }

    /// Whether the buffer holds no entries.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Configured maximum capacity.
    #[must_use]
    pub const fn capacity(&self) -> usize {
        self.capacity
    }
}

impl<T: Clone> RingBuffer<T> {
    /// Snapshot of up to the `limit` most recent entries, ordered
    /// oldest to newest. A finite, non-restartable view of local state.
    #[must_use]
    pub fn snapshot(&self, limit: usize) -> Vec<T> {
        let skip = self.items.len().saturating_sub(limit);
        self.items.iter().skip(skip).cloned().collect()
    }
}
