//! Client proxy for Strata.
//!
//! A `CoreClient` connects to a router node and provides the typed
//! surface applications use:
//! - save/load/query with a tagged-envelope data type registry that
//!   preserves the runtime type of payloads saved through
//!   trait-object APIs
//! - the item freeze pipeline: serialize, transport-encrypt, seal,
//!   sign — and the matching lazy read pipeline with derived
//!   `is_signed` / `is_secret` flags
//! - bounded request concurrency with `begin_*`/`end` async forms
//!   that queue rather than fail when the limit is reached
//! - subscriptions feeding mirror caches that the writer's own saves
//!   update synchronously, while other clients converge within the
//!   propagation delay

mod cache;
mod client;
mod item;
mod registry;
mod subscription;
mod throttle;

pub use cache::{ChangeCallback, CoreCache};
pub use client::{ClientConfig, CoreClient};
pub use item::ClientItem;
pub use registry::{DataTypeRegistry, StoreData};
pub use subscription::{Subscription, SubscriptionState};
pub use throttle::{PendingRequest, RequestThrottle};

// the subscription mode is part of the wire protocol
pub use strata_router::SubscriptionMode;
