//! Request/response protocol between client proxies and the router.
//!
//! Filter and order expressions travel in their serialized XML form,
//! exactly as they would over a network transport; the router parses
//! them back before evaluation, so wire-grammar errors surface on the
//! server side with the same identity as local evaluation failures.

use serde::{Deserialize, Serialize};
use strata_types::{CacheChange, Item, ItemId, ItemInfo, SubscriptionId};

/// How a subscription reports pre-existing matches on start.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SubscriptionMode {
    /// Synthesize `ItemCreated` for every currently matching item
    /// (one atomic snapshot), then stream new changes.
    AllThenNew,
    /// Stream new changes only; pre-existing matches are never
    /// reported.
    NewOnly,
}

/// A subscription request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubscribeSpec {
    pub scopes: Vec<String>,
    /// Serialized filter expression (XML grammar).
    pub filter_xml: String,
    pub mode: SubscriptionMode,
    /// Restricts matches to one payload type when set.
    pub data_type_name: Option<String>,
}

/// A client request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Request {
    SaveItem(Item),
    DeleteItem(Item),
    LoadById(ItemId),
    LoadByName {
        scope: String,
        name: String,
    },
    Query {
        scopes: Vec<String>,
        filter_xml: String,
        order_xml: Option<String>,
        start_row: usize,
        row_count: Option<usize>,
    },
    Count {
        scopes: Vec<String>,
        filter_xml: String,
    },
    LoadHeaders {
        scopes: Vec<String>,
        filter_xml: String,
    },
}

/// A router response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Response {
    Saved {
        id: ItemId,
        sequence: u64,
        change: CacheChange,
    },
    MaybeItem(Option<Item>),
    Items(Vec<Item>),
    Headers(Vec<ItemInfo>),
    Count(usize),
    Subscribed(SubscriptionId),
}
