//! Bounded, ordered window of items with a current-position pointer.
//!
//! Eviction is driven by playback position, not access recency: items the
//! consumer has already passed go first, then the newest unwatched items from
//! the tail. The item at `position` is never evicted and stays at `position`
//! after every mutation.

use std::collections::HashSet;

use thiserror::Error;
use tracing::debug;

use crate::domain::{Item, ItemId};

/// Default number of items kept in the window
pub const DEFAULT_CAPACITY: usize = 10;

/// Errors raised when building a window
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum WindowError {
    #[error("Window capacity must be at least 1, got {0}")]
    CapacityMisconfiguration(usize),
}

/// Result of an append
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AppendOutcome {
    /// Newly appended identities still present after eviction, in order
    pub appended: Vec<ItemId>,

    /// Identities removed to get back under capacity
    pub evicted: Vec<ItemId>,

    /// Position after the append (adjusted for front eviction)
    pub position: usize,
}

impl AppendOutcome {
    /// Whether the append changed the window at all
    pub fn changed(&self) -> bool {
        !self.appended.is_empty() || !self.evicted.is_empty()
    }
}

/// Read-only copy of the window
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WindowSnapshot {
    pub items: Vec<Item>,
    pub position: usize,
}

impl WindowSnapshot {
    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Item currently being consumed
    pub fn current(&self) -> Option<&Item> {
        self.items.get(self.position)
    }

    /// Item after the current one, wrapping to the start
    pub fn next(&self) -> Option<&Item> {
        if self.items.is_empty() {
            return None;
        }
        self.items.get((self.position + 1) % self.items.len())
    }

    /// Identities in window order
    pub fn ids(&self) -> Vec<ItemId> {
        self.items.iter().map(|item| item.id.clone()).collect()
    }
}

/// The sliding window itself. Callers serialize access to it.
#[derive(Debug, Clone)]
pub struct WindowQueue {
    capacity: usize,
    items: Vec<Item>,
    ids: HashSet<ItemId>,
    position: usize,
}

impl WindowQueue {
    /// Create an empty window. A capacity of zero is rejected.
    pub fn new(capacity: usize) -> Result<Self, WindowError> {
        if capacity < 1 {
            return Err(WindowError::CapacityMisconfiguration(capacity));
        }

        Ok(Self {
            capacity,
            items: Vec::with_capacity(capacity + 1),
            ids: HashSet::with_capacity(capacity + 1),
            position: 0,
        })
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn position(&self) -> usize {
        self.position
    }

    pub fn contains(&self, id: &ItemId) -> bool {
        self.ids.contains(id)
    }

    /// Item at the current position
    pub fn current(&self) -> Option<&Item> {
        self.items.get(self.position)
    }

    /// Append items not already in the window, then evict down to capacity
    pub fn append(&mut self, new_items: impl IntoIterator<Item = Item>) -> AppendOutcome {
        let mut appended = Vec::new();

        for item in new_items {
            // insert() also catches duplicates inside the same batch
            if !self.ids.insert(item.id.clone()) {
                continue;
            }
            appended.push(item.id.clone());
            self.items.push(item);
        }

        let evicted = self.evict();
        if !evicted.is_empty() {
            let gone: HashSet<&ItemId> = evicted.iter().collect();
            appended.retain(|id| !gone.contains(id));
        }

        debug!(
            appended = appended.len(),
            evicted = evicted.len(),
            len = self.items.len(),
            position = self.position,
            "Window appended"
        );

        AppendOutcome {
            appended,
            evicted,
            position: self.position,
        }
    }

    /// Move to the next item, wrapping around. No-op when empty.
    pub fn advance(&mut self) -> usize {
        if !self.items.is_empty() {
            self.position = (self.position + 1) % self.items.len();
        }
        self.position
    }

    /// Jump to `position`, clamped into the window. No-op when empty.
    pub fn set_position(&mut self, position: i64) -> usize {
        if self.items.is_empty() {
            return self.position;
        }

        let last = self.items.len() - 1;
        let clamped = position.clamp(0, last as i64) as usize;
        if clamped as i64 != position {
            debug!(requested = position, clamped, "Position out of range, clamped");
        }
        self.position = clamped;
        self.position
    }

    /// Copy of the current sequence and position
    pub fn snapshot(&self) -> WindowSnapshot {
        WindowSnapshot {
            items: self.items.clone(),
            position: self.position,
        }
    }

    /// Remove the excess over capacity: watched items from the front first,
    /// then the rest from the tail.
    fn evict(&mut self) -> Vec<ItemId> {
        let excess = self.items.len().saturating_sub(self.capacity);
        if excess == 0 {
            return Vec::new();
        }

        let from_front = excess.min(self.position);
        let from_tail = excess - from_front;

        let mut evicted: Vec<Item> = self.items.drain(..from_front).collect();
        let tail_start = self.items.len() - from_tail;
        evicted.extend(self.items.drain(tail_start..));

        self.position -= from_front;

        for item in &evicted {
            self.ids.remove(&item.id);
        }

        debug_assert!(self.items.len() == self.capacity);
        debug_assert!(self.position < self.items.len());

        debug!(from_front, from_tail, position = self.position, "Evicted from window");

        evicted.into_iter().map(|item| item.id).collect()
    }
}
