//! The versioned object store.

use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, RwLock};
use strata_expr::{Expr, ExprContext};
use strata_types::{
    CacheChange, ChangeEvent, CoreError, CoreResult, InternTable, Item, ItemId, ItemInfo,
};
use tokio::sync::mpsc::UnboundedSender;
use tracing::{debug, trace};

/// What a committed save decided: the new version's identity and how
/// it changed the current pointer.
#[derive(Debug, Clone, Copy)]
pub struct SaveOutcome {
    pub id: ItemId,
    pub sequence: u64,
    pub change: CacheChange,
}

// (scope, lowercased name) — item names are case-insensitive
type ScopeName = (String, String);

// All versions of one (scope, name), ascending by sequence. The slot
// mutex is the per-name critical section: concurrent saves to one name
// serialize here while other names proceed independently.
#[derive(Default)]
struct NameSlot {
    versions: Vec<Arc<Item>>,
}

impl NameSlot {
    fn current(&self, now: DateTime<Utc>) -> Option<Arc<Item>> {
        self.versions
            .last()
            .filter(|item| item.is_current(now))
            .cloned()
    }
}

/// The authoritative keeper of versioned items.
pub struct ObjectStore {
    slots: RwLock<HashMap<ScopeName, Arc<Mutex<NameSlot>>>>,
    by_id: RwLock<HashMap<ItemId, Arc<Item>>>,
    events: Option<UnboundedSender<ChangeEvent>>,
    // metadata repeats across versions; equal named values share one
    // pooled instance, scoped to this store's lifetime
    interned_props: InternTable,
}

impl Default for ObjectStore {
    fn default() -> Self {
        Self::new()
    }
}

impl ObjectStore {
    /// Creates a store without an event sink (no notifications).
    pub fn new() -> Self {
        Self {
            slots: RwLock::new(HashMap::new()),
            by_id: RwLock::new(HashMap::new()),
            events: None,
            interned_props: InternTable::new(),
        }
    }

    /// Creates a store that reports every committed save through the
    /// given sink. The send happens after the commit; a dropped
    /// receiver never fails a save.
    pub fn with_event_sink(events: UnboundedSender<ChangeEvent>) -> Self {
        Self {
            events: Some(events),
            ..Self::new()
        }
    }

    fn slot_for(&self, scope: &str, name: &str) -> Arc<Mutex<NameSlot>> {
        let key = (scope.to_string(), name.to_lowercase());
        if let Some(slot) = self
            .slots
            .read()
            .expect("store index lock poisoned")
            .get(&key)
        {
            return slot.clone();
        }
        self.slots
            .write()
            .expect("store index lock poisoned")
            .entry(key)
            .or_default()
            .clone()
    }

    /// Commits a new version. Assigns the next sequence for the
    /// (scope, name) pair and atomically swaps the current pointer.
    /// Returns once the version is durably recorded — notification
    /// dispatch is decoupled and never blocks the save.
    pub fn save(&self, mut item: Item) -> CoreResult<SaveOutcome> {
        if item.name.trim().is_empty() {
            return Err(CoreError::Argument("item name is empty".into()));
        }
        if item.app_scope.is_empty() {
            return Err(CoreError::Argument("item scope is empty".into()));
        }

        item.app_props = self.interned_props.canonicalize(&item.app_props);

        let slot = self.slot_for(&item.app_scope, &item.name);
        let mut slot = slot.lock().expect("name slot lock poisoned");

        let now = Utc::now();
        let had_live_current = slot.current(now).is_some();
        item.sequence = slot.versions.last().map(|v| v.sequence + 1).unwrap_or(1);

        let item = Arc::new(item);
        let id = item.id;
        let sequence = item.sequence;
        slot.versions.push(item.clone());
        self.by_id
            .write()
            .expect("store index lock poisoned")
            .insert(id, item.clone());

        trace!(name = %item.name, scope = %item.app_scope, sequence, "committed item version");

        let change = match (had_live_current, item.payload.is_some()) {
            (false, true) => CacheChange::ItemCreated,
            (true, true) => CacheChange::ItemUpdated,
            (_, false) => CacheChange::ItemRemoved,
        };
        if let Some(events) = &self.events {
            // receiver teardown must not fail the commit
            let _ = events.send(ChangeEvent {
                change,
                item: Some(item),
            });
        }
        Ok(SaveOutcome {
            id,
            sequence,
            change,
        })
    }

    /// Loads the exact version addressed by id, regardless of
    /// currency. Deleted and expired versions remain loadable here.
    pub fn load(&self, id: ItemId) -> Option<Arc<Item>> {
        self.by_id
            .read()
            .expect("store index lock poisoned")
            .get(&id)
            .cloned()
    }

    /// Loads several versions by id, skipping unknown ids.
    pub fn load_by_ids(&self, ids: &[ItemId]) -> Vec<Arc<Item>> {
        let by_id = self.by_id.read().expect("store index lock poisoned");
        ids.iter().filter_map(|id| by_id.get(id).cloned()).collect()
    }

    /// Loads the current version for a (scope, name), or `None` when
    /// the name is absent, deleted or expired.
    pub fn load_by_name(&self, scope: &str, name: &str) -> Option<Arc<Item>> {
        let key = (scope.to_string(), name.to_lowercase());
        let slot = self
            .slots
            .read()
            .expect("store index lock poisoned")
            .get(&key)?
            .clone();
        let slot = slot.lock().expect("name slot lock poisoned");
        slot.current(Utc::now())
    }

    // One consistent snapshot of every current item in the scopes.
    fn current_items(&self, scopes: &[String], now: DateTime<Utc>) -> Vec<Arc<Item>> {
        let slots = self.slots.read().expect("store index lock poisoned");
        let mut items = Vec::new();
        for ((scope, _), slot) in slots.iter() {
            if !scopes.iter().any(|s| s == scope) {
                continue;
            }
            let slot = slot.lock().expect("name slot lock poisoned");
            if let Some(item) = slot.current(now) {
                items.push(item);
            }
        }
        items
    }

    fn check_filter(expr: &Expr) -> CoreResult<()> {
        if expr.has_errors() {
            return Err(CoreError::Evaluation(
                "filter expression contains errors".into(),
            ));
        }
        Ok(())
    }

    fn item_matches(item: &Item, expr: &Expr, now: DateTime<Utc>) -> CoreResult<bool> {
        let ctx = ExprContext::for_item(&item.app_props, &item.name, item.created, item.expires);
        expr.matches(&ctx, now)
    }

    /// Evaluates `expr` against every current item in the scopes and
    /// returns the matches ordered by `order` (by name when absent),
    /// windowed by `start_row`/`row_count`.
    ///
    /// Filter evaluation failures surface to the caller with the same
    /// identity as a local evaluation failure.
    pub fn query(
        &self,
        scopes: &[String],
        expr: &Expr,
        order: Option<&Expr>,
        start_row: usize,
        row_count: Option<usize>,
    ) -> CoreResult<Vec<Arc<Item>>> {
        Self::check_filter(expr)?;
        if let Some(order) = order {
            Self::check_filter(order)?;
        }
        let now = Utc::now();

        let mut matched = Vec::new();
        for item in self.current_items(scopes, now) {
            if Self::item_matches(&item, expr, now)? {
                matched.push(item);
            }
        }

        match order {
            None => matched.sort_by(|a, b| {
                (a.name.to_lowercase(), &a.app_scope).cmp(&(b.name.to_lowercase(), &b.app_scope))
            }),
            Some(order) => {
                let mut keyed = Vec::with_capacity(matched.len());
                for item in matched {
                    let ctx =
                        ExprContext::for_item(&item.app_props, &item.name, item.created, item.expires);
                    let key = order.evaluate(&ctx, now)?;
                    keyed.push((key, item));
                }
                keyed.sort_by(|(ka, a), (kb, b)| {
                    let primary = match (ka, kb) {
                        (Some(ka), Some(kb)) => {
                            ka.compare(kb).unwrap_or(std::cmp::Ordering::Equal)
                        }
                        // items without an order key sort last
                        (Some(_), None) => std::cmp::Ordering::Less,
                        (None, Some(_)) => std::cmp::Ordering::Greater,
                        (None, None) => std::cmp::Ordering::Equal,
                    };
                    primary.then_with(|| a.name.to_lowercase().cmp(&b.name.to_lowercase()))
                });
                matched = keyed.into_iter().map(|(_, item)| item).collect();
            }
        }

        let windowed: Vec<Arc<Item>> = match row_count {
            Some(count) => matched.into_iter().skip(start_row).take(count).collect(),
            None => matched.into_iter().skip(start_row).collect(),
        };
        debug!(rows = windowed.len(), "query evaluated");
        Ok(windowed)
    }

    /// Number of current items matching `expr` in the scopes.
    pub fn count(&self, scopes: &[String], expr: &Expr) -> CoreResult<usize> {
        Ok(self.query(scopes, expr, None, 0, None)?.len())
    }

    /// Header projection of `query`, payloads excluded. Semantically
    /// consistent with `query` for the same filter.
    pub fn load_headers(&self, scopes: &[String], expr: &Expr) -> CoreResult<Vec<ItemInfo>> {
        Ok(self
            .query(scopes, expr, None, 0, None)?
            .iter()
            .map(|item| item.info())
            .collect())
    }

    /// Logical delete: commits a payload-less version preserving the
    /// item's name, kind and properties. Returns the tombstone's
    /// outcome.
    pub fn delete(&self, item: &Item) -> CoreResult<SaveOutcome> {
        let now = Utc::now();
        let tombstone = Item {
            id: ItemId::new(),
            kind: item.kind,
            name: item.name.clone(),
            data_type_name: item.data_type_name.clone(),
            payload: None,
            app_props: item.app_props.clone(),
            app_scope: item.app_scope.clone(),
            created: now,
            expires: item.expires.max(now),
            sequence: 0, // assigned on save
            transp_key_id: None,
            sender_key_id: None,
            recver_key_id: None,
            signature: None,
        };
        self.save(tombstone)
    }

    /// Housekeeping sweep: drops expired versions and reports an
    /// `ItemExpired` event for names whose current version lapsed.
    /// Never required for correctness — reads enforce expiry lazily.
    pub fn purge_expired(&self) -> usize {
        let now = Utc::now();
        let slots: Vec<Arc<Mutex<NameSlot>>> = self
            .slots
            .read()
            .expect("store index lock poisoned")
            .values()
            .cloned()
            .collect();

        let mut removed_ids = Vec::new();
        for slot in slots {
            let mut slot = slot.lock().expect("name slot lock poisoned");
            let lapsed_current = slot
                .versions
                .last()
                .filter(|item| item.payload.is_some() && item.expires <= now)
                .cloned();
            slot.versions.retain(|item| {
                let expired = item.expires <= now;
                if expired {
                    removed_ids.push(item.id);
                }
                !expired
            });
            if let (Some(item), Some(events)) = (lapsed_current, &self.events) {
                let _ = events.send(ChangeEvent::expired(item));
            }
        }

        let mut by_id = self.by_id.write().expect("store index lock poisoned");
        for id in &removed_ids {
            by_id.remove(id);
        }
        if !removed_ids.is_empty() {
            debug!(count = removed_ids.len(), "purged expired item versions");
        }
        removed_ids.len()
    }

    /// The property intern pool, for housekeeping (`clear`) and
    /// diagnostics.
    pub fn interned_props(&self) -> &InternTable {
        &self.interned_props
    }

    /// Rebuilds store state from persisted versions, preserving
    /// sequences. Emits no events.
    pub fn restore(&self, items: Vec<Item>) {
        for mut item in items {
            item.app_props = self.interned_props.canonicalize(&item.app_props);
            let slot = self.slot_for(&item.app_scope, &item.name);
            let mut slot = slot.lock().expect("name slot lock poisoned");
            let item = Arc::new(item);
            self.by_id
                .write()
                .expect("store index lock poisoned")
                .insert(item.id, item.clone());
            slot.versions.push(item);
            slot.versions.sort_by_key(|v| v.sequence);
        }
    }
}
