//! Change events.
//!
//! Every committed save produces a change event. The router fans
//! events out to matching subscriptions; mirror caches replay them to
//! keep their local snapshot consistent. Per item name, events are
//! delivered in the server's commit order.

use crate::Item;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

/// The kind of change a cache observes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CacheChange {
    /// The local mirror was cleared; precedes any events for items
    /// re-observed after the clear.
    CacheCleared,
    /// The first live version matching the filter appeared.
    ItemCreated,
    /// A later version replaced a mirrored item.
    ItemUpdated,
    /// A null-payload version logically deleted a mirrored item.
    ItemRemoved,
    /// A mirrored item passed its expiry.
    ItemExpired,
}

impl fmt::Display for CacheChange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            CacheChange::CacheCleared => "CacheCleared",
            CacheChange::ItemCreated => "ItemCreated",
            CacheChange::ItemUpdated => "ItemUpdated",
            CacheChange::ItemRemoved => "ItemRemoved",
            CacheChange::ItemExpired => "ItemExpired",
        };
        f.write_str(text)
    }
}

/// A change plus the item version it concerns. `CacheCleared` carries
/// no item.
#[derive(Debug, Clone)]
pub struct ChangeEvent {
    pub change: CacheChange,
    pub item: Option<Arc<Item>>,
}

impl ChangeEvent {
    pub fn created(item: Arc<Item>) -> Self {
        Self {
            change: CacheChange::ItemCreated,
            item: Some(item),
        }
    }

    pub fn updated(item: Arc<Item>) -> Self {
        Self {
            change: CacheChange::ItemUpdated,
            item: Some(item),
        }
    }

    pub fn removed(item: Arc<Item>) -> Self {
        Self {
            change: CacheChange::ItemRemoved,
            item: Some(item),
        }
    }

    pub fn expired(item: Arc<Item>) -> Self {
        Self {
            change: CacheChange::ItemExpired,
            item: Some(item),
        }
    }

    pub fn cleared() -> Self {
        Self {
            change: CacheChange::CacheCleared,
            item: None,
        }
    }

    /// The logical name of the affected item, when there is one.
    pub fn item_name(&self) -> Option<&str> {
        self.item.as_deref().map(|item| item.name.as_str())
    }

    /// The sequence of the affected version, when there is one.
    pub fn sequence(&self) -> Option<u64> {
        self.item.as_deref().map(|item| item.sequence)
    }
}
