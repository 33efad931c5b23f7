//! The client proxy.

use crate::cache::ChangeCallback;
use crate::cache::CoreCache;
use crate::item::ClientItem;
use crate::registry::{DataTypeRegistry, StoreData};
use crate::subscription::Subscription;
use crate::throttle::{PendingRequest, RequestThrottle};
use chrono::Utc;
use std::sync::{Arc, Mutex, Weak};
use strata_crypto::CryptoManager;
use strata_expr::Expr;
use strata_router::{
    ConnectOutcome, Request, Response, RouterNode, SessionHandle, SubscriptionMode,
};
use strata_types::{
    ChangeEvent, ClientId, CoreError, CoreResult, Item, ItemId, ItemInfo, NamedValueSet,
    DEFAULT_APP_SCOPE,
};
use tracing::debug;

/// Client proxy configuration.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Maximum concurrent outstanding requests; clamped to 1..=100.
    /// Excess begin calls queue, they never fail.
    pub max_request_count: usize,
    /// Scopes this client's operations are confined to when no scope
    /// is supplied explicitly.
    pub default_app_scopes: Vec<String>,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            max_request_count: 8,
            default_app_scopes: vec![DEFAULT_APP_SCOPE.to_string()],
        }
    }
}

struct ClientInner {
    id: ClientId,
    session: SessionHandle,
    crypto: Arc<CryptoManager>,
    registry: Arc<DataTypeRegistry>,
    scopes: Vec<String>,
    throttle: RequestThrottle,
    subscriptions: Mutex<Vec<Weak<Subscription>>>,
}

/// A connected client. Cheap to clone; clones share the session,
/// key cache, registry and throttle.
#[derive(Clone)]
pub struct CoreClient {
    inner: Arc<ClientInner>,
}

fn unexpected_response() -> CoreError {
    CoreError::Argument("unexpected router response".into())
}

impl CoreClient {
    /// Connects with default configuration.
    pub fn connect(node: &RouterNode) -> CoreResult<Self> {
        Self::connect_with(node, ClientConfig::default())
    }

    /// Connects to a router node. A redirecting node is reported as an
    /// error here — remote nodes need a transport adapter.
    pub fn connect_with(node: &RouterNode, config: ClientConfig) -> CoreResult<Self> {
        let id = ClientId::new();
        let session = match node.connect(id) {
            ConnectOutcome::Session(session) => session,
            ConnectOutcome::Redirect(address) => {
                return Err(CoreError::Argument(format!(
                    "router redirected to '{address}'; no transport adapter configured"
                )))
            }
        };
        let scopes = if config.default_app_scopes.is_empty() {
            vec![DEFAULT_APP_SCOPE.to_string()]
        } else {
            config.default_app_scopes.clone()
        };
        debug!(client = %id, scopes = ?scopes, "client connected");
        Ok(Self {
            inner: Arc::new(ClientInner {
                id,
                session,
                crypto: Arc::new(CryptoManager::new()),
                registry: Arc::new(DataTypeRegistry::new()),
                scopes,
                throttle: RequestThrottle::new(config.max_request_count),
                subscriptions: Mutex::new(Vec::new()),
            }),
        })
    }

    pub fn client_id(&self) -> ClientId {
        self.inner.id
    }

    /// This client's key cache.
    pub fn crypto(&self) -> &CryptoManager {
        &self.inner.crypto
    }

    /// This client's data type registry.
    pub fn registry(&self) -> &DataTypeRegistry {
        &self.inner.registry
    }

    pub fn default_app_scopes(&self) -> &[String] {
        &self.inner.scopes
    }

    /// The configured concurrency limit.
    pub fn max_request_count(&self) -> usize {
        self.inner.throttle.limit()
    }

    fn primary_scope(&self) -> String {
        self.inner
            .scopes
            .first()
            .cloned()
            .unwrap_or_else(|| DEFAULT_APP_SCOPE.to_string())
    }

    fn resolve_scopes(&self, explicit: Option<&str>) -> Vec<String> {
        match explicit {
            Some(scope) => vec![scope.to_string()],
            None => self.inner.scopes.clone(),
        }
    }

    // ── Item construction ────────────────────────────────────────

    /// Builds an item from pre-serialized text and an explicit type
    /// tag. Interface-like (abstract) tags are rejected here, before
    /// anything enters the serialization path.
    pub fn make_item_from_text(
        &self,
        data_type_name: &str,
        text: &str,
        name: &str,
        props: Option<&NamedValueSet>,
    ) -> CoreResult<ClientItem> {
        if self.inner.registry.is_abstract(data_type_name) {
            return Err(CoreError::Argument(format!(
                "cannot save under interface type '{data_type_name}'"
            )));
        }
        let mut item = ClientItem::new(name);
        item.set_scope(self.primary_scope())?;
        item.set_text(text, data_type_name)?;
        if let Some(props) = props {
            item.merge_props(props)?;
        }
        Ok(item)
    }

    /// Builds an item around a typed payload. The type tag recorded
    /// is the payload's concrete runtime type.
    pub fn make_object<D: StoreData + ?Sized>(
        &self,
        data: &D,
        name: &str,
        props: Option<&NamedValueSet>,
    ) -> CoreResult<ClientItem> {
        let mut item = ClientItem::new(name);
        item.set_scope(self.primary_scope())?;
        item.set_data(data)?;
        if let Some(props) = props {
            item.merge_props(props)?;
        }
        Ok(item)
    }

    // ── Raw (unthrottled) operations ─────────────────────────────

    async fn save_item_raw(&self, item: &mut ClientItem) -> CoreResult<ItemId> {
        if !item.frozen() && item.app_scope().is_empty() {
            item.set_scope(self.primary_scope())?;
        }
        if self.inner.registry.is_abstract(item.data_type_name()) {
            return Err(CoreError::Argument(format!(
                "cannot save under interface type '{}'",
                item.data_type_name()
            )));
        }
        item.freeze(&self.inner.crypto)?;
        let wire = item.to_item()?;
        let response = self
            .inner
            .session
            .submit(Request::SaveItem(wire.clone()))
            .await?;
        let Response::Saved {
            id,
            sequence,
            change,
        } = response
        else {
            return Err(unexpected_response());
        };
        item.committed(sequence);

        // the writer's own mirrors see the save before this returns
        let mut committed = wire;
        committed.sequence = sequence;
        self.notify_local(&ChangeEvent {
            change,
            item: Some(Arc::new(committed)),
        });
        Ok(id)
    }

    async fn delete_item_raw(&self, item: &ClientItem) -> CoreResult<ItemId> {
        let wire = item.to_item()?;
        let response = self
            .inner
            .session
            .submit(Request::DeleteItem(wire.clone()))
            .await?;
        let Response::Saved { id, sequence, change } = response else {
            return Err(unexpected_response());
        };

        let tombstone = Item {
            id,
            payload: None,
            sequence,
            created: Utc::now(),
            signature: None,
            transp_key_id: None,
            sender_key_id: None,
            recver_key_id: None,
            ..wire
        };
        self.notify_local(&ChangeEvent {
            change,
            item: Some(Arc::new(tombstone)),
        });
        Ok(id)
    }

    async fn load_by_name_raw(
        &self,
        explicit_scope: Option<&str>,
        name: &str,
    ) -> CoreResult<Option<ClientItem>> {
        for scope in self.resolve_scopes(explicit_scope) {
            let response = self
                .inner
                .session
                .submit(Request::LoadByName {
                    scope,
                    name: name.to_string(),
                })
                .await?;
            match response {
                Response::MaybeItem(Some(item)) => {
                    return Ok(Some(ClientItem::from_item(item)))
                }
                Response::MaybeItem(None) => continue,
                _ => return Err(unexpected_response()),
            }
        }
        Ok(None)
    }

    async fn load_by_id_raw(&self, id: ItemId) -> CoreResult<Option<ClientItem>> {
        let response = self.inner.session.submit(Request::LoadById(id)).await?;
        match response {
            Response::MaybeItem(item) => Ok(item.map(ClientItem::from_item)),
            _ => Err(unexpected_response()),
        }
    }

    async fn query_raw(
        &self,
        filter: &Expr,
        order: Option<&Expr>,
        start_row: usize,
        row_count: Option<usize>,
    ) -> CoreResult<Vec<ClientItem>> {
        let response = self
            .inner
            .session
            .submit(Request::Query {
                scopes: self.inner.scopes.clone(),
                filter_xml: strata_expr::serialize(filter)?,
                order_xml: order.map(strata_expr::serialize).transpose()?,
                start_row,
                row_count,
            })
            .await?;
        match response {
            Response::Items(items) => {
                Ok(items.into_iter().map(ClientItem::from_item).collect())
            }
            _ => Err(unexpected_response()),
        }
    }

    async fn count_raw(&self, filter: &Expr) -> CoreResult<usize> {
        let response = self
            .inner
            .session
            .submit(Request::Count {
                scopes: self.inner.scopes.clone(),
                filter_xml: strata_expr::serialize(filter)?,
            })
            .await?;
        match response {
            Response::Count(count) => Ok(count),
            _ => Err(unexpected_response()),
        }
    }

    async fn headers_raw(&self, filter: &Expr) -> CoreResult<Vec<ItemInfo>> {
        let response = self
            .inner
            .session
            .submit(Request::LoadHeaders {
                scopes: self.inner.scopes.clone(),
                filter_xml: strata_expr::serialize(filter)?,
            })
            .await?;
        match response {
            Response::Headers(headers) => Ok(headers),
            _ => Err(unexpected_response()),
        }
    }

    fn notify_local(&self, event: &ChangeEvent) {
        let subscriptions = {
            let mut list = self
                .inner
                .subscriptions
                .lock()
                .expect("subscription list poisoned");
            list.retain(|weak| weak.strong_count() > 0);
            list.iter().filter_map(Weak::upgrade).collect::<Vec<_>>()
        };
        if let Some(item) = &event.item {
            for subscription in subscriptions {
                if subscription.matches_item(item) {
                    subscription.apply_local(event);
                }
            }
        }
    }

    // ── Synchronous (direct) forms ───────────────────────────────

    /// Saves a typed payload as a new version of `name`.
    pub async fn save_object<D: StoreData + ?Sized>(
        &self,
        data: &D,
        name: &str,
        props: Option<&NamedValueSet>,
        lifetime: chrono::Duration,
    ) -> CoreResult<ItemId> {
        let mut item = self.make_object(data, name, props)?;
        item.set_lifetime(lifetime)?;
        self.save_item(&mut item).await
    }

    /// Saves a built item, freezing it first. The item's sequence is
    /// filled in from the commit.
    pub async fn save_item(&self, item: &mut ClientItem) -> CoreResult<ItemId> {
        self.inner
            .throttle
            .run(self.save_item_raw(item))
            .await
    }

    /// Logically deletes an item: a payload-less version under the
    /// same name. Returns the tombstone's id.
    pub async fn delete_item(&self, item: &ClientItem) -> CoreResult<ItemId> {
        self.inner
            .throttle
            .run(self.delete_item_raw(item))
            .await
    }

    /// Deletes every current item matching the filter; returns how
    /// many were deleted.
    pub async fn delete_objects(&self, filter: &Expr) -> CoreResult<usize> {
        let items = self.load_items(filter).await?;
        let mut deleted = 0;
        for item in &items {
            self.delete_item(item).await?;
            deleted += 1;
        }
        Ok(deleted)
    }

    /// Loads the current version by name from the client's scopes.
    pub async fn load_item(&self, name: &str) -> CoreResult<Option<ClientItem>> {
        self.inner
            .throttle
            .run(self.load_by_name_raw(None, name))
            .await
    }

    /// Loads the current version by name from an explicit scope.
    pub async fn load_item_scoped(
        &self,
        scope: &str,
        name: &str,
    ) -> CoreResult<Option<ClientItem>> {
        self.inner
            .throttle
            .run(self.load_by_name_raw(Some(scope), name))
            .await
    }

    /// Loads the exact version addressed by id, current or not.
    pub async fn load_item_by_id(&self, id: ItemId) -> CoreResult<Option<ClientItem>> {
        self.inner.throttle.run(self.load_by_id_raw(id)).await
    }

    /// Loads every current item matching the filter.
    pub async fn load_items(&self, filter: &Expr) -> CoreResult<Vec<ClientItem>> {
        self.inner
            .throttle
            .run(self.query_raw(filter, None, 0, None))
            .await
    }

    /// Loads a page of matching items under an ordering expression.
    pub async fn load_items_paged(
        &self,
        filter: &Expr,
        order: Option<&Expr>,
        start_row: usize,
        row_count: Option<usize>,
    ) -> CoreResult<Vec<ClientItem>> {
        self.inner
            .throttle
            .run(self.query_raw(filter, order, start_row, row_count))
            .await
    }

    /// Loads payload-free headers for every matching item.
    pub async fn load_item_infos(&self, filter: &Expr) -> CoreResult<Vec<ItemInfo>> {
        self.inner.throttle.run(self.headers_raw(filter)).await
    }

    /// Counts matching current items.
    pub async fn count_items(&self, filter: &Expr) -> CoreResult<usize> {
        self.inner.throttle.run(self.count_raw(filter)).await
    }

    // ── Begin/End (async) forms ──────────────────────────────────

    /// Starts a save in the background. Excess begins queue under the
    /// throttle; the returned handle's `end()` yields the id.
    pub fn begin_save_object<T: StoreData>(
        &self,
        data: T,
        name: String,
        props: Option<NamedValueSet>,
        lifetime: chrono::Duration,
    ) -> PendingRequest<ItemId> {
        let client = self.clone();
        self.inner.throttle.spawn(async move {
            let mut item = client.make_object(&data, &name, props.as_ref())?;
            item.set_lifetime(lifetime)?;
            client.save_item_raw(&mut item).await
        })
    }

    /// Starts a by-name load in the background.
    pub fn begin_load_item(&self, name: String) -> PendingRequest<Option<ClientItem>> {
        let client = self.clone();
        self.inner
            .throttle
            .spawn(async move { client.load_by_name_raw(None, &name).await })
    }

    /// Starts a by-id load in the background.
    pub fn begin_load_item_by_id(&self, id: ItemId) -> PendingRequest<Option<ClientItem>> {
        let client = self.clone();
        self.inner
            .throttle
            .spawn(async move { client.load_by_id_raw(id).await })
    }

    /// Starts a query in the background.
    pub fn begin_load_items(&self, filter: Expr) -> PendingRequest<Vec<ClientItem>> {
        let client = self.clone();
        self.inner
            .throttle
            .spawn(async move { client.query_raw(&filter, None, 0, None).await })
    }

    /// Starts a count in the background.
    pub fn begin_count_items(&self, filter: Expr) -> PendingRequest<usize> {
        let client = self.clone();
        self.inner
            .throttle
            .spawn(async move { client.count_raw(&filter).await })
    }

    // ── Subscriptions ────────────────────────────────────────────

    /// Creates a subscription over the client's scopes. No server
    /// contact happens until `start`; the returned subscription owns
    /// the mirror cache it feeds.
    pub fn subscribe(
        &self,
        filter: Expr,
        mode: SubscriptionMode,
        on_change: Option<ChangeCallback>,
    ) -> Arc<Subscription> {
        self.subscribe_typed(filter, mode, None, on_change)
    }

    /// Creates a subscription restricted to one payload type.
    pub fn subscribe_typed(
        &self,
        filter: Expr,
        mode: SubscriptionMode,
        data_type_name: Option<String>,
        on_change: Option<ChangeCallback>,
    ) -> Arc<Subscription> {
        let cache = CoreCache::new(on_change);
        let subscription = Arc::new(Subscription::new(
            filter,
            mode,
            self.inner.scopes.clone(),
            data_type_name,
            self.inner.session.clone(),
            cache,
        ));
        self.inner
            .subscriptions
            .lock()
            .expect("subscription list poisoned")
            .push(Arc::downgrade(&subscription));
        subscription
    }
}
