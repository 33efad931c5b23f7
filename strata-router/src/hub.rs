//! Subscription registry and notification fan-out.
//!
//! Every subscription owns an unbounded ordered channel. Dispatch
//! walks the registry once per committed event and clones the event
//! into each matching channel; delivery to one subscriber never waits
//! on another, and a subscriber that stopped reading only grows its
//! own queue until it is cancelled.

use crate::protocol::{SubscribeSpec, SubscriptionMode};
use chrono::Utc;
use std::collections::HashMap;
use std::sync::RwLock;
use strata_expr::{Expr, ExprContext};
use strata_store::ObjectStore;
use strata_types::{ChangeEvent, CoreResult, Item, SubscriptionId};
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tracing::{debug, warn};

struct SubscriptionEntry {
    scopes: Vec<String>,
    filter: Expr,
    data_type_name: Option<String>,
    sender: UnboundedSender<ChangeEvent>,
}

impl SubscriptionEntry {
    fn matches(&self, item: &Item) -> bool {
        if !self.scopes.iter().any(|scope| scope == &item.app_scope) {
            return false;
        }
        if let Some(wanted) = &self.data_type_name {
            if wanted != &item.data_type_name {
                return false;
            }
        }
        let ctx = ExprContext::for_item(&item.app_props, &item.name, item.created, item.expires);
        match self.filter.matches(&ctx, Utc::now()) {
            Ok(matched) => matched,
            Err(err) => {
                // the filter was validated at create; a per-item type
                // mismatch skips that item rather than killing the stream
                warn!(%err, item = %item.name, "subscription filter failed for item");
                false
            }
        }
    }
}

/// A live subscription's delivery end: the id (for cancellation) and
/// the ordered event stream.
pub struct SubscriptionStream {
    pub id: SubscriptionId,
    pub events: UnboundedReceiver<ChangeEvent>,
}

/// The router's subscription registry.
#[derive(Default)]
pub(crate) struct NotificationHub {
    subs: RwLock<HashMap<SubscriptionId, SubscriptionEntry>>,
}

impl NotificationHub {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Registers a subscription. The filter must already be validated.
    ///
    /// For `AllThenNew` the current matches are snapshotted and
    /// enqueued as synthetic `ItemCreated` events before the entry
    /// joins live dispatch; holding the registry write lock across the
    /// snapshot keeps the snapshot and the live stream ordered.
    pub(crate) fn subscribe(
        &self,
        store: &ObjectStore,
        spec: &SubscribeSpec,
        filter: Expr,
    ) -> CoreResult<SubscriptionStream> {
        let (sender, events) = mpsc::unbounded_channel();
        let id = SubscriptionId::new();

        let mut subs = self.subs.write().expect("subscription registry poisoned");
        if spec.mode == SubscriptionMode::AllThenNew {
            let snapshot = store.query(&spec.scopes, &filter, None, 0, None)?;
            for item in snapshot {
                if let Some(wanted) = &spec.data_type_name {
                    if wanted != &item.data_type_name {
                        continue;
                    }
                }
                // a send into our own fresh channel cannot fail
                let _ = sender.send(ChangeEvent::created(item));
            }
        }
        subs.insert(
            id,
            SubscriptionEntry {
                scopes: spec.scopes.clone(),
                filter,
                data_type_name: spec.data_type_name.clone(),
                sender,
            },
        );
        debug!(%id, mode = ?spec.mode, "subscription registered");
        Ok(SubscriptionStream { id, events })
    }

    /// Removes a subscription; its channel closes and any queued
    /// events are dropped.
    pub(crate) fn cancel(&self, id: SubscriptionId) {
        if self
            .subs
            .write()
            .expect("subscription registry poisoned")
            .remove(&id)
            .is_some()
        {
            debug!(%id, "subscription cancelled");
        }
    }

    pub(crate) fn subscription_count(&self) -> usize {
        self.subs.read().expect("subscription registry poisoned").len()
    }

    /// Fans one committed event out to every matching subscription.
    pub(crate) fn dispatch(&self, event: &ChangeEvent) {
        let Some(item) = event.item.as_deref() else {
            return;
        };
        let mut dead = Vec::new();
        {
            let subs = self.subs.read().expect("subscription registry poisoned");
            for (id, entry) in subs.iter() {
                if !entry.matches(item) {
                    continue;
                }
                if entry.sender.send(event.clone()).is_err() {
                    dead.push(*id);
                }
            }
        }
        for id in dead {
            self.cancel(id);
        }
    }
}
