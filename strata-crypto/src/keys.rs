//! Key material containers and exchange encodings.

use crate::{CryptoError, CryptoResult};
use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use rand::RngCore;
use zeroize::{Zeroize, ZeroizeOnDrop};

/// Size of a symmetric transport key in bytes (256 bits).
pub const TRANSPORT_KEY_SIZE: usize = 32;

/// A symmetric transport key, zeroized on drop.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct TransportKey {
    bytes: [u8; TRANSPORT_KEY_SIZE],
}

impl TransportKey {
    /// Generates a fresh random transport key.
    pub fn generate() -> Self {
        let mut bytes = [0u8; TRANSPORT_KEY_SIZE];
        rand::rngs::OsRng.fill_bytes(&mut bytes);
        Self { bytes }
    }

    pub fn from_bytes(bytes: [u8; TRANSPORT_KEY_SIZE]) -> Self {
        Self { bytes }
    }

    pub fn as_bytes(&self) -> &[u8; TRANSPORT_KEY_SIZE] {
        &self.bytes
    }

    /// Encodes the key for manual exchange.
    pub fn to_base64(&self) -> String {
        BASE64.encode(self.bytes)
    }

    /// Decodes a key from its exchange form.
    pub fn from_base64(encoded: &str) -> CryptoResult<Self> {
        let bytes = BASE64
            .decode(encoded)
            .map_err(|e| CryptoError::InvalidKey(format!("transport key base64: {e}")))?;
        let bytes: [u8; TRANSPORT_KEY_SIZE] = bytes
            .try_into()
            .map_err(|_| CryptoError::InvalidKey("transport key length".into()))?;
        Ok(Self { bytes })
    }
}

impl std::fmt::Debug for TransportKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TransportKey")
            .field("bytes", &"[REDACTED]")
            .finish()
    }
}

/// The public half of a key record as exchanged between clients:
/// the Ed25519 verifying key followed by the sealed-box public key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublicKeyBundle {
    pub verify: [u8; 32],
    pub seal: [u8; 32],
}

impl PublicKeyBundle {
    /// Encodes the bundle for manual exchange.
    pub fn to_base64(&self) -> String {
        let mut bytes = Vec::with_capacity(64);
        bytes.extend_from_slice(&self.verify);
        bytes.extend_from_slice(&self.seal);
        BASE64.encode(bytes)
    }

    /// Decodes a bundle from its exchange form.
    pub fn from_base64(encoded: &str) -> CryptoResult<Self> {
        let bytes = BASE64
            .decode(encoded)
            .map_err(|e| CryptoError::InvalidKey(format!("public key base64: {e}")))?;
        if bytes.len() != 64 {
            return Err(CryptoError::InvalidKey("public key length".into()));
        }
        let mut verify = [0u8; 32];
        let mut seal = [0u8; 32];
        verify.copy_from_slice(&bytes[..32]);
        seal.copy_from_slice(&bytes[32..]);
        Ok(Self { verify, seal })
    }
}
