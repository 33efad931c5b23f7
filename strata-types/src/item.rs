//! The versioned item record.
//!
//! An `Item` is the durable unit of storage: an immutable snapshot of
//! one version of a named object. Items are only ever created whole
//! (by the client freeze pipeline or by the store on restore) and are
//! never mutated in place; an update is a new version with a higher
//! sequence number, a logical delete is a new version with no payload.

use crate::{ItemId, NamedValueSet};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// The scope items land in when a client declares no explicit scopes.
pub const DEFAULT_APP_SCOPE: &str = "default";

/// Classifies an item within its scope.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ItemKind {
    /// An ordinary application object.
    #[default]
    Object,
    /// Internal bookkeeping written by the router itself.
    System,
    /// Short-lived diagnostic records.
    Debug,
}

/// One immutable version of a stored object.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Item {
    /// Version identity, assigned when the version is first saved.
    pub id: ItemId,
    pub kind: ItemKind,
    /// Logical key; multiple versions share a name.
    pub name: String,
    /// Fully-qualified type tag of the payload, used for polymorphic
    /// reconstruction. Empty for property-only items.
    pub data_type_name: String,
    /// Serialized (and possibly encrypted) payload bytes. `None`
    /// encodes a logical delete.
    pub payload: Option<Vec<u8>>,
    /// Queryable application metadata.
    pub app_props: NamedValueSet,
    /// Isolation partition.
    pub app_scope: String,
    pub created: DateTime<Utc>,
    pub expires: DateTime<Utc>,
    /// Monotonic per-(scope, name) version counter, assigned by the
    /// store at save time.
    pub sequence: u64,
    /// Symmetric transport key reference; present iff the payload is
    /// transport-encrypted.
    pub transp_key_id: Option<String>,
    /// Signing key reference of the sender; present iff signed.
    pub sender_key_id: Option<String>,
    /// Receiver key reference; present iff sealed to a recipient.
    pub recver_key_id: Option<String>,
    /// Detached signature over the payload bytes.
    pub signature: Option<Vec<u8>>,
}

impl Item {
    /// Whether this version is current at `now`: it has a payload and
    /// has not expired. Deleted and expired versions stay loadable by
    /// id but are invisible to name and query lookups.
    pub fn is_current(&self, now: DateTime<Utc>) -> bool {
        self.payload.is_some() && self.expires > now
    }

    /// Whether this version encodes a logical delete.
    pub fn is_deleted(&self) -> bool {
        self.payload.is_none()
    }

    /// The relative lifetime this version was saved with.
    pub fn lifetime(&self) -> chrono::Duration {
        self.expires - self.created
    }

    /// The payload-free header projection.
    pub fn info(&self) -> ItemInfo {
        ItemInfo {
            id: self.id,
            kind: self.kind,
            name: self.name.clone(),
            data_type_name: self.data_type_name.clone(),
            app_scope: self.app_scope.clone(),
            app_props: self.app_props.clone(),
            created: self.created,
            expires: self.expires,
            sequence: self.sequence,
        }
    }
}

/// Header projection of an item: everything except the payload and the
/// crypto envelope. Semantically consistent with the full item for
/// query purposes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ItemInfo {
    pub id: ItemId,
    pub kind: ItemKind,
    pub name: String,
    pub data_type_name: String,
    pub app_scope: String,
    pub app_props: NamedValueSet,
    pub created: DateTime<Utc>,
    pub expires: DateTime<Utc>,
    pub sequence: u64,
}
