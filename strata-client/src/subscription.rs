//! Client-side subscriptions.
//!
//! Lifecycle: `Created → Started → Active → Cancelled`. Cancellation
//! is terminal and idempotent, and cancelling a subscription that was
//! never started is a clean no-op. Dropping a subscription stops its
//! delivery task; the router reaps the server-side entry on its next
//! dispatch to the closed channel.

use crate::cache::CoreCache;
use chrono::Utc;
use std::sync::{Arc, Mutex};
use strata_expr::{Expr, ExprContext};
use strata_router::{SessionHandle, SubscribeSpec, SubscriptionMode};
use strata_types::{CoreError, CoreResult, Item, SubscriptionId};
use tokio::task::JoinHandle;
use tracing::debug;

/// Subscription lifecycle states.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubscriptionState {
    Created,
    Started,
    Active,
    Cancelled,
}

/// A live, filtered view mirroring matching items into a `CoreCache`.
pub struct Subscription {
    filter: Expr,
    mode: SubscriptionMode,
    scopes: Vec<String>,
    data_type_name: Option<String>,
    session: SessionHandle,
    cache: Arc<CoreCache>,
    state: Arc<Mutex<SubscriptionState>>,
    id: Mutex<Option<SubscriptionId>>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl Subscription {
    pub(crate) fn new(
        filter: Expr,
        mode: SubscriptionMode,
        scopes: Vec<String>,
        data_type_name: Option<String>,
        session: SessionHandle,
        cache: Arc<CoreCache>,
    ) -> Self {
        Self {
            filter,
            mode,
            scopes,
            data_type_name,
            session,
            cache,
            state: Arc::new(Mutex::new(SubscriptionState::Created)),
            id: Mutex::new(None),
            task: Mutex::new(None),
        }
    }

    pub fn state(&self) -> SubscriptionState {
        *self.state.lock().expect("subscription state poisoned")
    }

    pub fn mode(&self) -> SubscriptionMode {
        self.mode
    }

    /// The mirror this subscription feeds.
    pub fn cache(&self) -> &Arc<CoreCache> {
        &self.cache
    }

    /// Registers with the router and begins streaming. For
    /// `AllThenNew`, the snapshot of pre-existing matches arrives as
    /// `ItemCreated` events ahead of any live changes. An erroneous
    /// filter fails here with an evaluation error and leaves the
    /// subscription in `Created`.
    pub async fn start(&self) -> CoreResult<()> {
        {
            let mut state = self.state.lock().expect("subscription state poisoned");
            match *state {
                SubscriptionState::Created => *state = SubscriptionState::Started,
                SubscriptionState::Cancelled => {
                    return Err(CoreError::Cancelled("subscription cancelled".into()))
                }
                _ => return Err(CoreError::Argument("subscription already started".into())),
            }
        }

        let spec = SubscribeSpec {
            scopes: self.scopes.clone(),
            filter_xml: strata_expr::serialize(&self.filter)?,
            mode: self.mode,
            data_type_name: self.data_type_name.clone(),
        };
        let mut stream = match self.session.subscribe(spec).await {
            Ok(stream) => stream,
            Err(err) => {
                *self.state.lock().expect("subscription state poisoned") =
                    SubscriptionState::Created;
                return Err(err);
            }
        };
        *self.id.lock().expect("subscription id poisoned") = Some(stream.id);

        let cache = self.cache.clone();
        let state = self.state.clone();
        let task = tokio::spawn(async move {
            {
                let mut state = state.lock().expect("subscription state poisoned");
                if *state == SubscriptionState::Started {
                    *state = SubscriptionState::Active;
                }
            }
            while let Some(event) = stream.events.recv().await {
                cache.apply(&event);
            }
            debug!("subscription stream ended");
        });
        *self.task.lock().expect("subscription task poisoned") = Some(task);
        Ok(())
    }

    /// Cancels the subscription. Safe at any point in the lifecycle,
    /// including before `start`; repeated cancels are no-ops.
    pub async fn cancel(&self) {
        let previous = {
            let mut state = self.state.lock().expect("subscription state poisoned");
            std::mem::replace(&mut *state, SubscriptionState::Cancelled)
        };
        if previous == SubscriptionState::Cancelled {
            return;
        }
        if let Some(task) = self.task.lock().expect("subscription task poisoned").take() {
            task.abort();
        }
        let id = self.id.lock().expect("subscription id poisoned").take();
        if let Some(id) = id {
            self.session.cancel_subscription(id).await;
        }
    }

    // Whether a just-committed item belongs in this mirror; used for
    // the writer's synchronous self-notification.
    pub(crate) fn matches_item(&self, item: &Item) -> bool {
        match self.state() {
            SubscriptionState::Started | SubscriptionState::Active => {}
            _ => return false,
        }
        if !self.scopes.iter().any(|scope| scope == &item.app_scope) {
            return false;
        }
        if let Some(wanted) = &self.data_type_name {
            if wanted != &item.data_type_name {
                return false;
            }
        }
        let ctx = ExprContext::for_item(&item.app_props, &item.name, item.created, item.expires);
        self.filter.matches(&ctx, Utc::now()).unwrap_or(false)
    }

    pub(crate) fn apply_local(&self, event: &strata_types::ChangeEvent) {
        self.cache.apply(event);
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(task) = self.task.lock().expect("subscription task poisoned").take() {
            task.abort();
        }
    }
}
