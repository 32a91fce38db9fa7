//! Per-cycle fetch deduplication.
//!
//! Several components may ask for the same entities at once (a list view and
//! a detail view both wanting the same swap commitment, say). The tracker
//! remembers which ids have already been requested in the current cycle so
//! only the first caller issues the remote read.

use std::collections::HashSet;
use std::hash::Hash;
use std::sync::{Mutex, MutexGuard, PoisonError};
use tracing::debug;

/// Tracks which entity ids have a fetch in flight or done for this cycle.
///
/// Constructed explicitly and shared by `Arc`; call [`reset`](Self::reset)
/// at each cycle boundary (a poll tick, a sign-out).
#[derive(Debug)]
pub struct FetchDedupTracker<Id> {
    loaded: Mutex<HashSet<Id>>,
}

impl<Id> FetchDedupTracker<Id>
where
    Id: Eq + Hash + Clone,
{
    /// Creates an empty tracker.
    pub fn new() -> Self {
        Self {
            loaded: Mutex::new(HashSet::new()),
        }
    }

    fn lock(&self) -> MutexGuard<'_, HashSet<Id>> {
        self.loaded.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Marks every id as loaded and returns those that were not loaded yet.
    ///
    /// The check and the marking happen under one lock acquisition, so two
    /// back-to-back callers can never both receive the same id. Input order
    /// is preserved and duplicates within `ids` are returned once.
    pub fn get_not_loaded_ids(&self, ids: &[Id]) -> Vec<Id> {
        let mut loaded = self.lock();
        let fresh: Vec<Id> = ids
            .iter()
            .filter(|id| loaded.insert((*id).clone()))
            .cloned()
            .collect();
        debug!(
            requested = ids.len(),
            fresh = fresh.len(),
            "dedup tracker filtered ids"
        );
        fresh
    }

    /// Returns true if `id` was handed out in this cycle.
    pub fn is_loaded(&self, id: &Id) -> bool {
        self.lock().contains(id)
    }

    /// Number of ids marked in this cycle.
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    /// Returns true if nothing has been marked in this cycle.
    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    /// Clears all marks so every id is eligible again.
    pub fn reset(&self) {
        self.lock().clear();
    }
}

impl<Id> Default for FetchDedupTracker<Id>
where
    Id: Eq + Hash + Clone,
{
    fn default() -> Self {
        Self::new()
    }
}
