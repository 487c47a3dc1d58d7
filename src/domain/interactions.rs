//! Decorative like/comment counters shown next to the current item.
//!
//! Values are random, generated on first request and then fixed per item.
//! The window and cache never look at them.

use std::collections::HashMap;
use std::sync::Mutex;

use rand::Rng;
use serde::{Deserialize, Serialize};

use super::item::ItemId;

/// Counters displayed for one item
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Interactions {
    pub likes: u32,
    pub comments: u32,
}

impl Interactions {
    fn generate<R: Rng + ?Sized>(rng: &mut R) -> Self {
        Self {
            likes: rng.random_range(100..10_100),
            comments: rng.random_range(10..510),
        }
    }
}

/// Lazily populated counters, cached by identity
#[derive(Debug, Default)]
pub struct InteractionBoard {
    counters: Mutex<HashMap<ItemId, Interactions>>,
}

impl InteractionBoard {
    pub fn new() -> Self {
        Self::default()
    }

    /// Counters for an item, generating them on first use
    pub fn for_item(&self, id: &ItemId) -> Interactions {
        let mut counters = self
            .counters
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        *counters
            .entry(id.clone())
            .or_insert_with(|| Interactions::generate(&mut rand::rng()))
    }

    /// Drop counters for items no longer shown
    pub fn forget(&self, ids: &[ItemId]) {
        let mut counters = self
            .counters
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        for id in ids {
            counters.remove(id);
        }
    }

    pub fn len(&self) -> usize {
        self.counters
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
