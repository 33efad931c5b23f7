//! The client-side item: builder and received wrapper in one.
//!
//! A `ClientItem` is mutable until frozen. Freezing runs the outbound
//! pipeline — serialize, transport-encrypt, seal, sign — and fixes the
//! expiry; after that the item is immutable and any further mutation
//! is an error. Items received from the router arrive frozen and run
//! the inbound pipeline lazily on first read, so a failed decrypt can
//! be retried after the missing key is imported without reloading the
//! item.

use crate::registry::{DataTypeRegistry, StoreData};
use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use std::any::Any;
use std::sync::Mutex;
use strata_crypto::CryptoManager;
use strata_types::{CoreError, CoreResult, Item, ItemId, ItemKind, NamedValueSet, Value};

pub struct ClientItem {
    item: Item,
    frozen: bool,
    // outbound plaintext, serialized but not yet encrypted
    pending_text: Option<String>,
    lifetime: chrono::Duration,
    use_explicit_expiry: bool,
    // inbound decrypted plaintext, cached after the first read
    plaintext: Mutex<Option<String>>,
}

impl ClientItem {
    /// Starts a mutable item with the default (unbounded) lifetime.
    pub fn new(name: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            item: Item {
                id: ItemId::new(),
                kind: ItemKind::Object,
                name: name.into(),
                data_type_name: String::new(),
                payload: None,
                app_props: NamedValueSet::new(),
                app_scope: String::new(),
                created: now,
                expires: now,
                sequence: 0,
                transp_key_id: None,
                sender_key_id: None,
                recver_key_id: None,
                signature: None,
            },
            frozen: false,
            pending_text: None,
            lifetime: chrono::Duration::MAX,
            use_explicit_expiry: false,
            plaintext: Mutex::new(None),
        }
    }

    /// Wraps an item received from the router (already frozen).
    pub fn from_item(item: Item) -> Self {
        Self {
            item,
            frozen: true,
            pending_text: None,
            lifetime: chrono::Duration::zero(),
            use_explicit_expiry: true,
            plaintext: Mutex::new(None),
        }
    }

    fn check_not_frozen(&self) -> CoreResult<()> {
        if self.frozen {
            return Err(CoreError::Frozen);
        }
        Ok(())
    }

    // ── Builder surface ──────────────────────────────────────────

    /// Sets the payload from any serializable value. Called through a
    /// trait-object reference, the tag recorded is the concrete
    /// runtime type's — derived types survive base-typed saves.
    pub fn set_data<D: StoreData + ?Sized>(&mut self, data: &D) -> CoreResult<()> {
        self.check_not_frozen()?;
        self.pending_text = Some(data.to_json()?);
        self.item.data_type_name = data.data_type_name().to_string();
        Ok(())
    }

    /// Sets the payload from pre-serialized text and an explicit tag.
    pub fn set_text(&mut self, text: impl Into<String>, data_type_name: impl Into<String>) -> CoreResult<()> {
        self.check_not_frozen()?;
        self.pending_text = Some(text.into());
        self.item.data_type_name = data_type_name.into();
        Ok(())
    }

    pub fn set_kind(&mut self, kind: ItemKind) -> CoreResult<()> {
        self.check_not_frozen()?;
        self.item.kind = kind;
        Ok(())
    }

    pub fn set_scope(&mut self, scope: impl Into<String>) -> CoreResult<()> {
        self.check_not_frozen()?;
        self.item.app_scope = scope.into();
        Ok(())
    }

    pub fn set_prop(&mut self, name: &str, value: impl Into<Value>) -> CoreResult<()> {
        self.check_not_frozen()?;
        self.item.app_props.set(name, value)
    }

    pub fn merge_props(&mut self, props: &NamedValueSet) -> CoreResult<()> {
        self.check_not_frozen()?;
        self.item.app_props.merge(props)
    }

    /// Sets a relative lifetime; expiry is fixed at freeze time.
    pub fn set_lifetime(&mut self, lifetime: chrono::Duration) -> CoreResult<()> {
        self.check_not_frozen()?;
        self.lifetime = lifetime.max(chrono::Duration::zero());
        self.use_explicit_expiry = false;
        Ok(())
    }

    /// Sets an absolute expiry instead of a relative lifetime.
    pub fn set_expires(&mut self, expires: DateTime<Utc>) -> CoreResult<()> {
        self.check_not_frozen()?;
        self.item.expires = expires;
        self.use_explicit_expiry = true;
        Ok(())
    }

    /// References the transport key the payload will be encrypted
    /// with. Readers need the same key imported before `data` works.
    pub fn set_transp_key_id(&mut self, id: impl Into<String>) -> CoreResult<()> {
        self.check_not_frozen()?;
        self.item.transp_key_id = Some(id.into());
        Ok(())
    }

    /// References the signing key; the payload is signed at freeze.
    pub fn set_sender_key_id(&mut self, id: impl Into<String>) -> CoreResult<()> {
        self.check_not_frozen()?;
        self.item.sender_key_id = Some(id.into());
        Ok(())
    }

    /// References the recipient key; the payload is sealed so only
    /// the holder of the matching secret key can read it.
    pub fn set_recver_key_id(&mut self, id: impl Into<String>) -> CoreResult<()> {
        self.check_not_frozen()?;
        self.item.recver_key_id = Some(id.into());
        Ok(())
    }

    /// Runs the outbound pipeline and freezes the item:
    /// serialize → transport-encrypt → seal → sign.
    pub fn freeze(&mut self, crypto: &CryptoManager) -> CoreResult<()> {
        if self.frozen {
            return Ok(());
        }
        if self.item.name.trim().is_empty() {
            return Err(CoreError::Argument("item name not set".into()));
        }

        let now = Utc::now();
        self.item.created = now;
        if self.use_explicit_expiry {
            if self.item.expires < now {
                self.item.expires = now;
            }
        } else {
            self.item.expires = now
                .checked_add_signed(self.lifetime)
                .unwrap_or(DateTime::<Utc>::MAX_UTC);
        }

        // a failed crypto step must leave the item retryable, so the
        // pending text is only consumed once the pipeline succeeds
        let payload = match self.pending_text.clone() {
            None => None,
            Some(text) => {
                let mut bytes = text.clone().into_bytes();
                if let Some(transp) = &self.item.transp_key_id {
                    bytes = crypto.encrypt_with_transport_key(transp, &bytes)?;
                }
                if let Some(recver) = &self.item.recver_key_id {
                    bytes = crypto.encrypt_with_public_key(recver, &bytes)?;
                }
                if let Some(sender) = &self.item.sender_key_id {
                    self.item.signature = Some(crypto.create_signature(sender, &bytes)?);
                }
                // the plaintext was produced locally; keep it for reads
                *self.plaintext.lock().expect("plaintext cache poisoned") = Some(text);
                Some(bytes)
            }
        };
        self.pending_text = None;
        self.item.payload = payload;
        self.item.app_props.freeze();
        self.frozen = true;
        Ok(())
    }

    pub(crate) fn committed(&mut self, sequence: u64) {
        self.item.sequence = sequence;
    }

    // ── Read surface ─────────────────────────────────────────────

    pub fn id(&self) -> ItemId {
        self.item.id
    }

    pub fn name(&self) -> &str {
        &self.item.name
    }

    pub fn kind(&self) -> ItemKind {
        self.item.kind
    }

    pub fn data_type_name(&self) -> &str {
        &self.item.data_type_name
    }

    pub fn app_scope(&self) -> &str {
        &self.item.app_scope
    }

    pub fn app_props(&self) -> &NamedValueSet {
        &self.item.app_props
    }

    pub fn created(&self) -> DateTime<Utc> {
        self.item.created
    }

    pub fn expires(&self) -> DateTime<Utc> {
        self.item.expires
    }

    pub fn sequence(&self) -> u64 {
        self.item.sequence
    }

    pub fn frozen(&self) -> bool {
        self.frozen
    }

    /// Whether this version is live right now.
    pub fn is_current(&self) -> bool {
        self.item.is_current(Utc::now())
    }

    pub fn is_deleted(&self) -> bool {
        self.item.is_deleted()
    }

    /// Derived flag: the item declares a transport key, whether or
    /// not this client can currently decrypt it.
    pub fn is_secret(&self) -> bool {
        self.item.transp_key_id.is_some()
    }

    /// Derived flag: true once the sender's public key is known
    /// locally and the signature verifies. Never an error — an
    /// unverifiable item simply reports false.
    pub fn is_signed(&self, crypto: &CryptoManager) -> bool {
        let (Some(sender), Some(signature), Some(payload)) = (
            &self.item.sender_key_id,
            &self.item.signature,
            &self.item.payload,
        ) else {
            return false;
        };
        crypto
            .verify_signature(sender, payload, signature)
            .unwrap_or(false)
    }

    /// The serialized plaintext, running the inbound pipeline on
    /// first call. Fails with a security error while a required key
    /// is missing; succeeds on retry once it is imported.
    pub fn text(&self, crypto: &CryptoManager) -> CoreResult<Option<String>> {
        if let Some(text) = &self.pending_text {
            return Ok(Some(text.clone()));
        }
        let Some(payload) = &self.item.payload else {
            return Ok(None);
        };
        let mut cache = self.plaintext.lock().expect("plaintext cache poisoned");
        if let Some(text) = cache.as_ref() {
            return Ok(Some(text.clone()));
        }

        let mut bytes = payload.clone();
        if let Some(recver) = &self.item.recver_key_id {
            bytes = crypto.decrypt_with_secret_key(recver, &bytes)?;
        }
        if let Some(transp) = &self.item.transp_key_id {
            bytes = crypto.decrypt_with_transport_key(transp, &bytes)?;
        }
        let text = String::from_utf8(bytes)
            .map_err(|e| CoreError::Serialization(format!("payload is not utf-8: {e}")))?;
        *cache = Some(text.clone());
        Ok(Some(text))
    }

    /// Deserializes the payload to an explicitly supplied type.
    pub fn data_as<T: DeserializeOwned>(&self, crypto: &CryptoManager) -> CoreResult<Option<T>> {
        match self.text(crypto)? {
            None => Ok(None),
            Some(text) => Ok(Some(serde_json::from_str(&text)?)),
        }
    }

    /// Deserializes the payload through the registry using the stored
    /// type tag, recovering the concrete runtime type it was saved
    /// with. Unregistered tags fail with a serialization error.
    pub fn data_dyn(
        &self,
        crypto: &CryptoManager,
        registry: &DataTypeRegistry,
    ) -> CoreResult<Option<Box<dyn Any + Send>>> {
        match self.text(crypto)? {
            None => Ok(None),
            Some(text) => Ok(Some(registry.decode(&self.item.data_type_name, &text)?)),
        }
    }

    /// The frozen wire form. Fails on an unfrozen item.
    pub fn to_item(&self) -> CoreResult<Item> {
        if !self.frozen {
            return Err(CoreError::Argument("item not frozen".into()));
        }
        Ok(self.item.clone())
    }
}
