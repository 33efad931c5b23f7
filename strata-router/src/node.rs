//! The router node and client sessions.

use crate::config::RouterConfig;
use crate::hub::{NotificationHub, SubscriptionStream};
use crate::protocol::{Request, Response, SubscribeSpec};
use crate::transport::{LoopbackTransport, RequestTransport};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use strata_expr::Expr;
use strata_store::{DurableStore, ObjectStore};
use strata_types::{ChangeEvent, ClientId, CoreError, CoreResult, SubscriptionId};
use tokio::sync::mpsc::UnboundedReceiver;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Hook for multi-node topologies: may answer a connect with another
/// node's address instead of a session. The single-node router never
/// redirects; cross-node write semantics are deliberately undefined.
pub trait RedirectPolicy: Send + Sync {
    fn redirect_for(&self, client_id: ClientId) -> Option<String>;
}

/// Outcome of a connect request.
pub enum ConnectOutcome {
    /// A live session on this node.
    Session(SessionHandle),
    /// The client should reconnect to the node at this address.
    Redirect(String),
}

pub(crate) struct RouterInner {
    config: RouterConfig,
    store: ObjectStore,
    hub: NotificationHub,
    durable: Option<Arc<dyn DurableStore>>,
}

impl RouterInner {
    /// Handles one request. Runs on the caller's task; the store's
    /// per-name critical sections provide all required mutual
    /// exclusion.
    pub(crate) fn handle(&self, request: Request) -> CoreResult<Response> {
        match request {
            Request::SaveItem(item) => {
                let outcome = self.store.save(item)?;
                Ok(Response::Saved {
                    id: outcome.id,
                    sequence: outcome.sequence,
                    change: outcome.change,
                })
            }
            Request::DeleteItem(item) => {
                let outcome = self.store.delete(&item)?;
                Ok(Response::Saved {
                    id: outcome.id,
                    sequence: outcome.sequence,
                    change: outcome.change,
                })
            }
            Request::LoadById(id) => Ok(Response::MaybeItem(
                self.store.load(id).map(|item| (*item).clone()),
            )),
            Request::LoadByName { scope, name } => Ok(Response::MaybeItem(
                self.store
                    .load_by_name(&scope, &name)
                    .map(|item| (*item).clone()),
            )),
            Request::Query {
                scopes,
                filter_xml,
                order_xml,
                start_row,
                row_count,
            } => {
                let filter = strata_expr::deserialize(&filter_xml)?;
                let order = order_xml
                    .as_deref()
                    .map(strata_expr::deserialize)
                    .transpose()?;
                let items = self
                    .store
                    .query(&scopes, &filter, order.as_ref(), start_row, row_count)?;
                Ok(Response::Items(
                    items.iter().map(|item| (**item).clone()).collect(),
                ))
            }
            Request::Count { scopes, filter_xml } => {
                let filter = strata_expr::deserialize(&filter_xml)?;
                Ok(Response::Count(self.store.count(&scopes, &filter)?))
            }
            Request::LoadHeaders { scopes, filter_xml } => {
                let filter = strata_expr::deserialize(&filter_xml)?;
                Ok(Response::Headers(self.store.load_headers(&scopes, &filter)?))
            }
        }
    }

    fn subscribe(&self, spec: &SubscribeSpec) -> CoreResult<SubscriptionStream> {
        let filter = strata_expr::deserialize(&spec.filter_xml)?;
        // validate at create; streaming never downgrades these
        if filter.has_errors() {
            return Err(CoreError::Evaluation(
                "subscription filter contains errors".into(),
            ));
        }
        self.hub.subscribe(&self.store, spec, filter)
    }
}

/// A single authoritative router node hosting the object store.
pub struct RouterNode {
    inner: Arc<RouterInner>,
    redirect: Option<Arc<dyn RedirectPolicy>>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl RouterNode {
    /// Starts a node with no durable backing. Must be called within a
    /// tokio runtime; the notification pump runs as a background task.
    pub fn start(config: RouterConfig) -> Self {
        Self::start_inner(config, None)
    }

    /// Starts a node with a write-behind durable store, restoring
    /// previously persisted items first.
    pub async fn start_with_durable(
        config: RouterConfig,
        durable: Arc<dyn DurableStore>,
    ) -> CoreResult<Self> {
        let node = Self::start_inner(config, Some(durable.clone()));
        let restored = durable.restore().await?;
        if !restored.is_empty() {
            info!(count = restored.len(), "restored items from durable store");
            node.inner.store.restore(restored);
        }
        Ok(node)
    }

    fn start_inner(config: RouterConfig, durable: Option<Arc<dyn DurableStore>>) -> Self {
        let (events_tx, events_rx) = tokio::sync::mpsc::unbounded_channel();
        let inner = Arc::new(RouterInner {
            store: ObjectStore::with_event_sink(events_tx),
            hub: NotificationHub::new(),
            durable,
            config,
        });
        info!(env = %inner.config.env_name, port = inner.config.port, "router node starting");

        let mut tasks = Vec::new();
        tasks.push(tokio::spawn(Self::pump_events(inner.clone(), events_rx)));
        if let Some(secs) = inner.config.housekeep_secs {
            tasks.push(tokio::spawn(Self::housekeep(inner.clone(), secs)));
        }
        Self {
            inner,
            redirect: None,
            tasks: Mutex::new(tasks),
        }
    }

    /// Installs the multi-node redirection hook.
    pub fn set_redirect_policy(&mut self, policy: Arc<dyn RedirectPolicy>) {
        self.redirect = Some(policy);
    }

    // Save returns once committed; this pump decouples persistence
    // and subscriber dispatch from the commit path.
    async fn pump_events(inner: Arc<RouterInner>, mut events: UnboundedReceiver<ChangeEvent>) {
        while let Some(event) = events.recv().await {
            if let (Some(durable), Some(item)) = (&inner.durable, event.item.as_deref()) {
                if let Err(err) = durable.persist(item).await {
                    warn!(%err, "durable write-behind failed");
                }
            }
            inner.hub.dispatch(&event);
        }
        debug!("notification pump stopped");
    }

    async fn housekeep(inner: Arc<RouterInner>, period_secs: u64) {
        let mut tick = tokio::time::interval(Duration::from_secs(period_secs.max(1)));
        loop {
            tick.tick().await;
            let purged = inner.store.purge_expired();
            if purged > 0 {
                debug!(purged, "housekeeping sweep");
            }
        }
    }

    /// Accepts a client connection, or redirects it per policy.
    pub fn connect(&self, client_id: ClientId) -> ConnectOutcome {
        if let Some(policy) = &self.redirect {
            if let Some(address) = policy.redirect_for(client_id) {
                debug!(%client_id, %address, "redirecting client");
                return ConnectOutcome::Redirect(address);
            }
        }
        debug!(%client_id, "client connected");
        ConnectOutcome::Session(SessionHandle {
            client_id,
            inner: self.inner.clone(),
            transport: Arc::new(LoopbackTransport {
                inner: self.inner.clone(),
            }),
        })
    }

    /// The node's configuration.
    pub fn config(&self) -> &RouterConfig {
        &self.inner.config
    }

    /// Number of live subscriptions (diagnostics).
    pub fn subscription_count(&self) -> usize {
        self.inner.hub.subscription_count()
    }

    /// Runs one housekeeping sweep immediately.
    pub fn purge_expired(&self) -> usize {
        self.inner.store.purge_expired()
    }

    /// Stops background tasks. Sessions already handed out keep
    /// working against the store, but no further notifications flow.
    pub fn shutdown(&self) {
        for task in self.tasks.lock().expect("router task list poisoned").drain(..) {
            task.abort();
        }
        info!("router node stopped");
    }
}

impl Drop for RouterNode {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// A client's live session on a router node.
///
/// Cloneable; clones share the underlying channel.
#[derive(Clone)]
pub struct SessionHandle {
    client_id: ClientId,
    inner: Arc<RouterInner>,
    transport: Arc<dyn RequestTransport>,
}

impl SessionHandle {
    pub fn client_id(&self) -> ClientId {
        self.client_id
    }

    /// Submits one request over the session transport.
    pub async fn submit(&self, request: Request) -> CoreResult<Response> {
        self.transport.submit(request).await
    }

    /// Creates a subscription; events arrive on the returned ordered
    /// stream. The filter is validated here — an erroneous expression
    /// fails the creation with the usual evaluation error identity.
    pub async fn subscribe(&self, spec: SubscribeSpec) -> CoreResult<SubscriptionStream> {
        self.inner.subscribe(&spec)
    }

    /// Cancels a subscription; queued events are dropped.
    pub async fn cancel_subscription(&self, id: SubscriptionId) {
        self.inner.hub.cancel(id);
    }

    /// Builds the expression wire form for requests. Exposed so the
    /// client proxy serializes exactly once per request.
    pub fn encode_filter(expr: &Expr) -> CoreResult<String> {
        strata_expr::serialize(expr)
    }
}
