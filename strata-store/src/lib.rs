//! Authoritative versioned object store.
//!
//! The store is the only mutable shared resource in a Strata
//! deployment. It keeps every saved version of every (scope, name)
//! pair, maintains the current-pointer invariant under concurrent
//! saves, and answers id, name and expression-query lookups. Expiry is
//! enforced lazily at read time; a housekeeping purge exists but is
//! never required for correctness.
//!
//! Committed saves emit change events through an optional sink; the
//! router fans those out to subscriptions. The store itself knows
//! nothing about subscribers.

mod persistence;
mod store;

pub use persistence::{DurableStore, InMemoryDurableStore};
pub use store::{ObjectStore, SaveOutcome};
