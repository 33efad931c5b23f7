//! The per-client key cache.

use crate::keys::{PublicKeyBundle, TransportKey};
use crate::{CryptoError, CryptoResult};
use chacha20poly1305::aead::{Aead, KeyInit};
use chacha20poly1305::{ChaCha20Poly1305, Nonce};
use crypto_box::ChaChaBox;
use ed25519_dalek::{Signature, Signer, SigningKey, Verifier, VerifyingKey};
use rand::rngs::OsRng;
use rand::RngCore;
use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};
use uuid::Uuid;

const NONCE_SIZE: usize = 12;
// sealed envelope framing: ephemeral public key, XChaCha nonce
const SEAL_PUBKEY_SIZE: usize = 32;
const SEAL_NONCE_SIZE: usize = 24;

/// One key record: the owning client's secret halves (present only for
/// locally generated ids), the public bundle (own or imported from a
/// peer), and the optional symmetric transport key.
#[derive(Default)]
struct KeyRecord {
    signing: Option<SigningKey>,
    seal_secret: Option<crypto_box::SecretKey>,
    public: Option<PublicKeyBundle>,
    transport: Option<TransportKey>,
}

/// A client-local cache of key records, keyed by key id.
///
/// Records are exclusively owned by the client that generated or
/// imported them; the router never sees key material.
#[derive(Default)]
pub struct CryptoManager {
    keys: Mutex<HashMap<String, KeyRecord>>,
}

impl CryptoManager {
    pub fn new() -> Self {
        Self::default()
    }

    fn cache(&self) -> MutexGuard<'_, HashMap<String, KeyRecord>> {
        self.keys.lock().expect("key cache lock poisoned")
    }

    /// Generates a fresh key record: an Ed25519 signing pair, a
    /// sealed-box pair, and an initial transport key. Everything stays
    /// local; the returned id names the record in later calls.
    pub fn generate_new_keys(&self) -> String {
        let id = Uuid::new_v4().to_string();
        let signing = SigningKey::generate(&mut OsRng);
        let seal_secret = crypto_box::SecretKey::generate(&mut OsRng);
        let public = PublicKeyBundle {
            verify: signing.verifying_key().to_bytes(),
            seal: *seal_secret.public_key().as_bytes(),
        };
        let record = KeyRecord {
            signing: Some(signing),
            seal_secret: Some(seal_secret),
            public: Some(public),
            transport: Some(TransportKey::generate()),
        };
        self.cache().insert(id.clone(), record);
        id
    }

    /// Exports the public bundle for manual exchange with a peer.
    pub fn get_public_key(&self, id: &str) -> CryptoResult<String> {
        let cache = self.cache();
        let record = cache
            .get(id)
            .ok_or_else(|| CryptoError::UnknownKeyId(id.into()))?;
        record
            .public
            .as_ref()
            .map(PublicKeyBundle::to_base64)
            .ok_or(CryptoError::MissingKey {
                id: id.into(),
                what: "public key",
            })
    }

    /// Imports a peer's public bundle under the peer's key id,
    /// creating the record when absent. After this, signatures made
    /// with that id verify locally and payloads can be sealed to it.
    pub fn set_public_key(&self, id: &str, encoded: &str) -> CryptoResult<()> {
        let bundle = PublicKeyBundle::from_base64(encoded)?;
        self.cache().entry(id.to_string()).or_default().public = Some(bundle);
        Ok(())
    }

    /// Exports the symmetric transport key for manual exchange.
    pub fn get_transport_key(&self, id: &str) -> CryptoResult<String> {
        let cache = self.cache();
        let record = cache
            .get(id)
            .ok_or_else(|| CryptoError::UnknownKeyId(id.into()))?;
        record
            .transport
            .as_ref()
            .map(TransportKey::to_base64)
            .ok_or(CryptoError::MissingKey {
                id: id.into(),
                what: "transport key",
            })
    }

    /// Imports a peer-supplied transport key, creating the record when
    /// absent.
    pub fn set_transport_key(&self, id: &str, encoded: &str) -> CryptoResult<()> {
        let key = TransportKey::from_base64(encoded)?;
        self.cache().entry(id.to_string()).or_default().transport = Some(key);
        Ok(())
    }

    /// Whether a transport key is locally available for the id.
    pub fn has_transport_key(&self, id: &str) -> bool {
        self.cache()
            .get(id)
            .map(|record| record.transport.is_some())
            .unwrap_or(false)
    }

    // ── Symmetric (transport key) encryption ─────────────────────

    /// Encrypts with the record's transport key. Output framing is
    /// nonce || ciphertext.
    pub fn encrypt_with_transport_key(&self, id: &str, buffer: &[u8]) -> CryptoResult<Vec<u8>> {
        let cache = self.cache();
        let key = transport_of(&cache, id)?;
        let cipher = ChaCha20Poly1305::new(key.as_bytes().into());
        let mut nonce_bytes = [0u8; NONCE_SIZE];
        OsRng.fill_bytes(&mut nonce_bytes);
        let nonce = Nonce::from_slice(&nonce_bytes);
        let ciphertext = cipher
            .encrypt(nonce, buffer)
            .map_err(|e| CryptoError::Failure(e.to_string()))?;
        let mut out = Vec::with_capacity(NONCE_SIZE + ciphertext.len());
        out.extend_from_slice(&nonce_bytes);
        out.extend_from_slice(&ciphertext);
        Ok(out)
    }

    /// Decrypts a nonce || ciphertext buffer with the record's
    /// transport key.
    pub fn decrypt_with_transport_key(&self, id: &str, buffer: &[u8]) -> CryptoResult<Vec<u8>> {
        let cache = self.cache();
        let key = transport_of(&cache, id)?;
        if buffer.len() < NONCE_SIZE {
            return Err(CryptoError::Failure("ciphertext too short".into()));
        }
        let cipher = ChaCha20Poly1305::new(key.as_bytes().into());
        let nonce = Nonce::from_slice(&buffer[..NONCE_SIZE]);
        cipher
            .decrypt(nonce, &buffer[NONCE_SIZE..])
            .map_err(|_| CryptoError::Failure("decryption failed (wrong key or tampered data)".into()))
    }

    // ── Asymmetric (sealed box) encryption ───────────────────────

    /// Seals a buffer to the record's public key; only the holder of
    /// the matching secret key can open it. Framing is
    /// ephemeral-public-key || nonce || ciphertext.
    pub fn encrypt_with_public_key(&self, id: &str, buffer: &[u8]) -> CryptoResult<Vec<u8>> {
        let cache = self.cache();
        let record = cache
            .get(id)
            .ok_or_else(|| CryptoError::UnknownKeyId(id.into()))?;
        let public = record.public.as_ref().ok_or(CryptoError::MissingKey {
            id: id.into(),
            what: "public key",
        })?;
        let recipient = crypto_box::PublicKey::from(public.seal);

        let ephemeral = crypto_box::SecretKey::generate(&mut OsRng);
        let sealer = ChaChaBox::new(&recipient, &ephemeral);
        let mut nonce_bytes = [0u8; SEAL_NONCE_SIZE];
        OsRng.fill_bytes(&mut nonce_bytes);
        let ciphertext = sealer
            .encrypt(&nonce_bytes.into(), buffer)
            .map_err(|e| CryptoError::Failure(e.to_string()))?;

        let mut out =
            Vec::with_capacity(SEAL_PUBKEY_SIZE + SEAL_NONCE_SIZE + ciphertext.len());
        out.extend_from_slice(ephemeral.public_key().as_bytes());
        out.extend_from_slice(&nonce_bytes);
        out.extend_from_slice(&ciphertext);
        Ok(out)
    }

    /// Opens a sealed buffer with the record's secret key.
    pub fn decrypt_with_secret_key(&self, id: &str, buffer: &[u8]) -> CryptoResult<Vec<u8>> {
        let cache = self.cache();
        let record = cache
            .get(id)
            .ok_or_else(|| CryptoError::UnknownKeyId(id.into()))?;
        let secret = record.seal_secret.as_ref().ok_or(CryptoError::MissingKey {
            id: id.into(),
            what: "secret key",
        })?;

        if buffer.len() < SEAL_PUBKEY_SIZE + SEAL_NONCE_SIZE {
            return Err(CryptoError::Failure("sealed buffer too short".into()));
        }
        let mut ephemeral_pub = [0u8; SEAL_PUBKEY_SIZE];
        ephemeral_pub.copy_from_slice(&buffer[..SEAL_PUBKEY_SIZE]);
        let mut nonce_bytes = [0u8; SEAL_NONCE_SIZE];
        nonce_bytes
            .copy_from_slice(&buffer[SEAL_PUBKEY_SIZE..SEAL_PUBKEY_SIZE + SEAL_NONCE_SIZE]);

        let opener = ChaChaBox::new(&crypto_box::PublicKey::from(ephemeral_pub), secret);
        opener
            .decrypt(
                &nonce_bytes.into(),
                &buffer[SEAL_PUBKEY_SIZE + SEAL_NONCE_SIZE..],
            )
            .map_err(|_| {
                CryptoError::Failure("seal open failed (wrong key or tampered data)".into())
            })
    }

    // ── Signatures ───────────────────────────────────────────────

    /// Signs a buffer with the record's signing key.
    pub fn create_signature(&self, id: &str, buffer: &[u8]) -> CryptoResult<Vec<u8>> {
        let cache = self.cache();
        let record = cache
            .get(id)
            .ok_or_else(|| CryptoError::UnknownKeyId(id.into()))?;
        let signing = record.signing.as_ref().ok_or(CryptoError::MissingKey {
            id: id.into(),
            what: "signing key",
        })?;
        Ok(signing.sign(buffer).to_bytes().to_vec())
    }

    /// Verifies a signature with the record's (own or imported)
    /// verifying key. A bad signature is `Ok(false)`; missing key
    /// material is an error.
    pub fn verify_signature(&self, id: &str, buffer: &[u8], signature: &[u8]) -> CryptoResult<bool> {
        let cache = self.cache();
        let record = cache
            .get(id)
            .ok_or_else(|| CryptoError::UnknownKeyId(id.into()))?;
        let public = record.public.as_ref().ok_or(CryptoError::MissingKey {
            id: id.into(),
            what: "public key",
        })?;
        let verify = VerifyingKey::from_bytes(&public.verify)
            .map_err(|e| CryptoError::InvalidKey(e.to_string()))?;
        let Ok(signature) = Signature::from_slice(signature) else {
            return Ok(false);
        };
        Ok(verify.verify(buffer, &signature).is_ok())
    }
}

fn transport_of<'a>(
    cache: &'a HashMap<String, KeyRecord>,
    id: &str,
) -> CryptoResult<&'a TransportKey> {
    let record = cache
        .get(id)
        .ok_or_else(|| CryptoError::UnknownKeyId(id.into()))?;
    record.transport.as_ref().ok_or(CryptoError::MissingKey {
        id: id.into(),
        what: "transport key",
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transport_encryption_round_trip() {
        let manager = CryptoManager::new();
        let id = manager.generate_new_keys();
        let cipher = manager.encrypt_with_transport_key(&id, b"payload").unwrap();
        assert_ne!(&cipher[NONCE_SIZE..], b"payload");
        let plain = manager.decrypt_with_transport_key(&id, &cipher).unwrap();
        assert_eq!(plain, b"payload");
    }

    #[test]
    fn transport_key_exchange() {
        let alice = CryptoManager::new();
        let bob = CryptoManager::new();
        let id = alice.generate_new_keys();
        let cipher = alice.encrypt_with_transport_key(&id, b"secret").unwrap();

        // bob cannot decrypt until the key is imported
        assert!(matches!(
            bob.decrypt_with_transport_key(&id, &cipher),
            Err(CryptoError::UnknownKeyId(_))
        ));
        let exported = alice.get_transport_key(&id).unwrap();
        bob.set_transport_key(&id, &exported).unwrap();
        assert_eq!(bob.decrypt_with_transport_key(&id, &cipher).unwrap(), b"secret");
    }

    #[test]
    fn signatures_verify_after_public_key_exchange() {
        let alice = CryptoManager::new();
        let bob = CryptoManager::new();
        let id = alice.generate_new_keys();
        let signature = alice.create_signature(&id, b"message").unwrap();

        // bob has no record yet
        assert!(bob.verify_signature(&id, b"message", &signature).is_err());
        let public = alice.get_public_key(&id).unwrap();
        bob.set_public_key(&id, &public).unwrap();
        assert!(bob.verify_signature(&id, b"message", &signature).unwrap());
        assert!(!bob.verify_signature(&id, b"tampered", &signature).unwrap());
    }

    #[test]
    fn sealed_box_round_trip_via_exported_public_key() {
        let alice = CryptoManager::new();
        let bob = CryptoManager::new();
        let bob_id = bob.generate_new_keys();

        // alice imports bob's public bundle under bob's id and seals to it
        let public = bob.get_public_key(&bob_id).unwrap();
        alice.set_public_key(&bob_id, &public).unwrap();
        let sealed = alice.encrypt_with_public_key(&bob_id, b"for bob").unwrap();

        // alice cannot open what she sealed
        assert!(matches!(
            alice.decrypt_with_secret_key(&bob_id, &sealed),
            Err(CryptoError::MissingKey { .. })
        ));
        assert_eq!(bob.decrypt_with_secret_key(&bob_id, &sealed).unwrap(), b"for bob");
    }

    #[test]
    fn imported_record_has_no_secret_material() {
        let alice = CryptoManager::new();
        let bob = CryptoManager::new();
        let id = alice.generate_new_keys();
        bob.set_public_key(&id, &alice.get_public_key(&id).unwrap()).unwrap();
        assert!(matches!(
            bob.create_signature(&id, b"x"),
            Err(CryptoError::MissingKey { .. })
        ));
        assert!(!bob.has_transport_key(&id));
    }
}
