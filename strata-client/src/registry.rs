//! The data type registry: tagged-envelope polymorphism.
//!
//! Payloads are opaque bytes to the store; the `data_type_name` tag is
//! what reconstructs them. The registry maps tags to decoders so that
//! an item saved through a trait-object (base-typed) API deserializes
//! back to its concrete runtime type — a registry/table lookup, not
//! reflection.
//!
//! Abstract tags mark interface-like names that carry no serializable
//! identity of their own; saving under one is rejected at the API
//! boundary with an argument error.

use serde::de::DeserializeOwned;
use serde::Serialize;
use std::any::Any;
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, RwLock};
use strata_types::{CoreError, CoreResult};

/// A serializable payload with a stable runtime type tag.
///
/// Implemented automatically for every `Serialize` type; the tag
/// defaults to the fully-qualified Rust type name. Object-safe, so a
/// `&dyn` reference to an application trait with `StoreData` as a
/// supertrait still reports the concrete type underneath — that is
/// what keeps derived types intact through base-typed save calls.
pub trait StoreData: Any + Send + Sync {
    /// The fully-qualified type tag stored as `data_type_name`.
    fn data_type_name(&self) -> &'static str;

    /// Serializes the payload to its JSON envelope body.
    fn to_json(&self) -> CoreResult<String>;
}

impl<T> StoreData for T
where
    T: Serialize + Any + Send + Sync,
{
    fn data_type_name(&self) -> &'static str {
        std::any::type_name::<T>()
    }

    fn to_json(&self) -> CoreResult<String> {
        serde_json::to_string(self).map_err(Into::into)
    }
}

type DecodeFn = dyn Fn(&str) -> CoreResult<Box<dyn Any + Send>> + Send + Sync;

/// Maps data type tags to decoders.
#[derive(Default)]
pub struct DataTypeRegistry {
    decoders: RwLock<HashMap<String, Arc<DecodeFn>>>,
    abstract_tags: RwLock<HashSet<String>>,
}

impl DataTypeRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a concrete type under its default tag.
    pub fn register<T>(&self)
    where
        T: DeserializeOwned + Any + Send + 'static,
    {
        self.register_as::<T>(std::any::type_name::<T>());
    }

    /// Registers a concrete type under an explicit tag.
    pub fn register_as<T>(&self, name: &str)
    where
        T: DeserializeOwned + Any + Send + 'static,
    {
        let decoder: Arc<DecodeFn> = Arc::new(|json| {
            let value: T = serde_json::from_str(json)?;
            Ok(Box::new(value) as Box<dyn Any + Send>)
        });
        self.decoders
            .write()
            .expect("type registry lock poisoned")
            .insert(name.to_string(), decoder);
    }

    /// Marks a tag as abstract (interface-like). Saves under it are
    /// rejected before entering the serialization path.
    pub fn register_abstract(&self, name: &str) {
        self.abstract_tags
            .write()
            .expect("type registry lock poisoned")
            .insert(name.to_string());
    }

    pub fn is_abstract(&self, name: &str) -> bool {
        self.abstract_tags
            .read()
            .expect("type registry lock poisoned")
            .contains(name)
    }

    pub fn is_registered(&self, name: &str) -> bool {
        self.decoders
            .read()
            .expect("type registry lock poisoned")
            .contains_key(name)
    }

    /// Decodes a JSON envelope body through the tag's registered
    /// decoder. The result's concrete type is whatever was registered
    /// — downcast to recover it.
    pub fn decode(&self, name: &str, json: &str) -> CoreResult<Box<dyn Any + Send>> {
        let decoder = self
            .decoders
            .read()
            .expect("type registry lock poisoned")
            .get(name)
            .cloned();
        match decoder {
            Some(decoder) => decoder(json),
            None => Err(CoreError::Serialization(format!(
                "cannot deserialize: data type '{name}' is not registered"
            ))),
        }
    }
}
