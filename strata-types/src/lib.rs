//! Core type definitions for Strata.
//!
//! This crate defines the fundamental types shared by the store, the
//! client proxy and the router:
//! - Item, subscription and client identifiers (UUID v4)
//! - Typed values and the `NamedValueSet` property map
//! - The versioned `Item` record and its header projection
//! - Change events emitted by the store and mirrored by caches
//!
//! Consumer payloads are opaque bytes to everything in this crate; they
//! are identified only by their `data_type_name` tag.

mod event;
mod ids;
mod intern;
mod item;
mod named_values;
mod value;

pub use event::{CacheChange, ChangeEvent};
pub use ids::{ClientId, ItemId, RequestId, SubscriptionId};
pub use intern::InternTable;
pub use item::{Item, ItemInfo, ItemKind, DEFAULT_APP_SCOPE};
pub use named_values::{NamedValue, NamedValueSet};
pub use value::Value;

/// Result type alias using the shared error taxonomy.
pub type CoreResult<T> = std::result::Result<T, CoreError>;

/// Errors shared across the Strata crates.
///
/// Absence (a load miss, an expired item) is never an error; those
/// paths return `None` or an empty collection.
#[derive(Debug, thiserror::Error)]
pub enum CoreError {
    /// A payload could not be serialized or deserialized, typically
    /// because its concrete data type was never supplied or registered.
    #[error("serialization error: {0}")]
    Serialization(String),

    /// A syntactically parsed but semantically invalid expression was
    /// evaluated. Carries the same identity whether raised locally or
    /// during server-side query/filter evaluation.
    #[error("evaluation error: {0}")]
    Evaluation(String),

    /// Invalid API usage surfaced synchronously at the call boundary.
    #[error("invalid argument: {0}")]
    Argument(String),

    /// Decrypt or verify attempted without the required local key
    /// material. Recoverable: import the key and retry the read.
    #[error("security error: {0}")]
    Security(String),

    /// Mutation of a frozen item or property set.
    #[error("object is frozen")]
    Frozen,

    /// The request or subscription was cancelled before completion.
    #[error("cancelled: {0}")]
    Cancelled(String),
}

impl From<serde_json::Error> for CoreError {
    fn from(err: serde_json::Error) -> Self {
        CoreError::Serialization(err.to_string())
    }
}
