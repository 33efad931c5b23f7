//! Lifecycle-scoped value interning.
//!
//! Item metadata repeats heavily: thousands of versions carry the same
//! `Category`/`Region`/owner values. An `InternTable` is an explicit,
//! arena-style pool keyed by the value's text form; canonicalizing a
//! property set through it makes equal named values share one
//! instance. The table is owned by whoever scopes its lifetime
//! (typically the store) — there is no process-wide singleton — and
//! `clear`/`repool` manage the arena explicitly.

use crate::{NamedValue, NamedValueSet};
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

/// An explicit pool of shared named values.
pub struct InternTable {
    pool: Mutex<HashMap<String, Arc<NamedValue>>>,
    last_cleared: Mutex<DateTime<Utc>>,
}

impl Default for InternTable {
    fn default() -> Self {
        Self::new()
    }
}

impl InternTable {
    pub fn new() -> Self {
        Self {
            pool: Mutex::new(HashMap::new()),
            last_cleared: Mutex::new(Utc::now()),
        }
    }

    /// Number of distinct pooled values.
    pub fn len(&self) -> usize {
        self.pool.lock().expect("intern pool lock poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// When the pool was last cleared.
    pub fn last_cleared(&self) -> DateTime<Utc> {
        *self.last_cleared.lock().expect("intern pool lock poisoned")
    }

    /// Returns the pooled instance for a named value, inserting it on
    /// first sight.
    pub fn intern(&self, nv: NamedValue) -> Arc<NamedValue> {
        self.repool(&Arc::new(nv))
    }

    /// Returns the pooled instance for an already-shared value. After
    /// a `clear`, this re-establishes the value in the fresh pool.
    pub fn repool(&self, nv: &Arc<NamedValue>) -> Arc<NamedValue> {
        let key = nv.serialize();
        self.pool
            .lock()
            .expect("intern pool lock poisoned")
            .entry(key)
            .or_insert_with(|| nv.clone())
            .clone()
    }

    /// Rebuilds a property set with every value drawn from the pool.
    /// The frozen flag is preserved.
    pub fn canonicalize(&self, props: &NamedValueSet) -> NamedValueSet {
        let mut pooled = NamedValueSet::new();
        for nv in props.iter_shared() {
            // a set under construction is never frozen
            let _ = pooled.set_shared(self.repool(nv));
        }
        if props.is_frozen() {
            pooled.freeze();
        }
        pooled
    }

    /// Empties the pool. Existing holders keep their instances; new
    /// interns repopulate the arena.
    pub fn clear(&self) {
        self.pool.lock().expect("intern pool lock poisoned").clear();
        *self.last_cleared.lock().expect("intern pool lock poisoned") = Utc::now();
    }
}
