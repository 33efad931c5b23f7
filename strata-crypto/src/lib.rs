//! Application-layer security for Strata items.
//!
//! Each client owns a `CryptoManager`: a local cache of key records,
//! keyed by key id. A record holds the client's own signing and
//! encryption key pairs, an optional symmetric transport key, and
//! optionally a peer's imported public material. Nothing is ever
//! transmitted implicitly — public and transport keys move between
//! clients by explicit export/import, normally bootstrapped through
//! the store itself as signed payloads.
//!
//! All operations are local, synchronous and CPU-bound; none require a
//! network round trip.

mod keys;
mod manager;

pub use keys::{PublicKeyBundle, TransportKey};
pub use manager::CryptoManager;

/// Result type alias using the crate's error type.
pub type CryptoResult<T> = std::result::Result<T, CryptoError>;

/// Errors from the crypto layer.
#[derive(Debug, thiserror::Error)]
pub enum CryptoError {
    /// No record exists for the key id.
    #[error("unknown key id: '{0}'")]
    UnknownKeyId(String),

    /// The record exists but lacks the required material, e.g. a
    /// decrypt before the transport key was imported.
    #[error("{what} not set for key id '{id}'")]
    MissingKey { id: String, what: &'static str },

    /// Malformed imported key material.
    #[error("invalid key material: {0}")]
    InvalidKey(String),

    /// Underlying cipher failure (wrong key or tampered data).
    #[error("crypto failure: {0}")]
    Failure(String),
}

impl From<CryptoError> for strata_types::CoreError {
    fn from(err: CryptoError) -> Self {
        strata_types::CoreError::Security(err.to_string())
    }
}
