//! The mirror cache.
//!
//! A `CoreCache` is the client-side collection a subscription keeps
//! consistent. It replays change events — synchronously for the
//! owning client's own saves, asynchronously for everyone else's —
//! deduplicating by per-name sequence so the same commit observed
//! through both paths counts once.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex};
use strata_types::{CacheChange, ChangeEvent, Item};
use tracing::trace;

/// Invoked after the mirror applies each change.
pub type ChangeCallback = Box<dyn Fn(&ChangeEvent) + Send + Sync>;

#[derive(Default)]
struct CacheState {
    // live mirrored items by lowercased name
    items: BTreeMap<String, Arc<Item>>,
    // highest sequence observed per name, for cross-path dedup
    last_seq: HashMap<String, u64>,
    create_count: usize,
    update_count: usize,
    delete_count: usize,
    cleared_count: usize,
}

/// An ordered local snapshot of the items matching a subscription.
pub struct CoreCache {
    state: Mutex<CacheState>,
    on_change: Option<ChangeCallback>,
}

impl CoreCache {
    pub(crate) fn new(on_change: Option<ChangeCallback>) -> Arc<Self> {
        Arc::new(Self {
            state: Mutex::new(CacheState::default()),
            on_change,
        })
    }

    /// Live (non-deleted) mirrored items.
    pub fn item_count(&self) -> usize {
        self.state.lock().expect("cache state poisoned").items.len()
    }

    /// Total creations observed since the last clear.
    pub fn create_count(&self) -> usize {
        self.state.lock().expect("cache state poisoned").create_count
    }

    /// Total updates observed since the last clear.
    pub fn update_count(&self) -> usize {
        self.state.lock().expect("cache state poisoned").update_count
    }

    /// Total deletions/expiries observed since the last clear.
    pub fn delete_count(&self) -> usize {
        self.state.lock().expect("cache state poisoned").delete_count
    }

    /// Number of explicit clears.
    pub fn cleared_count(&self) -> usize {
        self.state.lock().expect("cache state poisoned").cleared_count
    }

    /// The mirrored items in name order.
    pub fn items(&self) -> Vec<Arc<Item>> {
        self.state
            .lock()
            .expect("cache state poisoned")
            .items
            .values()
            .cloned()
            .collect()
    }

    /// The mirrored item with the given name, if live.
    pub fn item(&self, name: &str) -> Option<Arc<Item>> {
        self.state
            .lock()
            .expect("cache state poisoned")
            .items
            .get(&name.to_lowercase())
            .cloned()
    }

    /// Empties the mirror and resets the counters. Emits
    /// `CacheCleared` before any later events for re-observed items.
    pub fn clear(&self) {
        {
            let mut state = self.state.lock().expect("cache state poisoned");
            state.items.clear();
            state.last_seq.clear();
            state.create_count = 0;
            state.update_count = 0;
            state.delete_count = 0;
            state.cleared_count += 1;
        }
        self.emit(&ChangeEvent::cleared());
    }

    /// Applies one change event. Stale events (sequence at or below
    /// the last observed for the name) are ignored, which makes the
    /// synchronous self-notification path and the subscription stream
    /// idempotent with each other.
    pub(crate) fn apply(&self, event: &ChangeEvent) {
        let Some(item) = &event.item else {
            return;
        };
        let key = item.name.to_lowercase();

        let reported = {
            let mut state = self.state.lock().expect("cache state poisoned");
            if let Some(&seen) = state.last_seq.get(&key) {
                // an expiry carries the lapsed version's own sequence,
                // so equality is not staleness for it
                let stale = match event.change {
                    CacheChange::ItemExpired => item.sequence < seen,
                    _ => item.sequence <= seen,
                };
                if stale {
                    trace!(name = %item.name, sequence = item.sequence, "stale event ignored");
                    return;
                }
            }
            state.last_seq.insert(key.clone(), item.sequence);

            match event.change {
                CacheChange::ItemCreated | CacheChange::ItemUpdated => {
                    let was_present = state.items.insert(key, item.clone()).is_some();
                    if was_present {
                        state.update_count += 1;
                        CacheChange::ItemUpdated
                    } else {
                        // the first version this mirror observes is a
                        // creation from its point of view
                        state.create_count += 1;
                        CacheChange::ItemCreated
                    }
                }
                CacheChange::ItemRemoved | CacheChange::ItemExpired => {
                    if state.items.remove(&key).is_none() {
                        return;
                    }
                    state.delete_count += 1;
                    event.change
                }
                CacheChange::CacheCleared => return,
            }
        };
        self.emit(&ChangeEvent {
            change: reported,
            item: event.item.clone(),
        });
    }

    fn emit(&self, event: &ChangeEvent) {
        if let Some(callback) = &self.on_change {
            callback(event);
        }
    }
}
