//! Optional durable backing store.
//!
//! The object store is correct without persistence; a `DurableStore`
//! is a write-behind delegate the router feeds committed items into,
//! and restores from at startup. Concrete backends (relational,
//! file-based) are adapters outside the core; the in-memory
//! implementation here exists for tests and as the reference for the
//! contract.

use async_trait::async_trait;
use std::sync::Mutex;
use strata_types::{CoreResult, Item};

/// A pluggable crash-durability delegate.
#[async_trait]
pub trait DurableStore: Send + Sync {
    /// Records one committed item version.
    async fn persist(&self, item: &Item) -> CoreResult<()>;

    /// Returns every persisted version, in commit order.
    async fn restore(&self) -> CoreResult<Vec<Item>>;
}

/// Keeps persisted items in memory. Durable in name only; used by
/// tests to observe the write-behind contract.
#[derive(Default)]
pub struct InMemoryDurableStore {
    items: Mutex<Vec<Item>>,
}

impl InMemoryDurableStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of persisted versions.
    pub fn len(&self) -> usize {
        self.items.lock().expect("durable store lock poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl DurableStore for InMemoryDurableStore {
    async fn persist(&self, item: &Item) -> CoreResult<()> {
        self.items
            .lock()
            .expect("durable store lock poisoned")
            .push(item.clone());
        Ok(())
    }

    async fn restore(&self) -> CoreResult<Vec<Item>> {
        Ok(self
            .items
            .lock()
            .expect("durable store lock poisoned")
            .clone())
    }
}
