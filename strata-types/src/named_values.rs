//! The `NamedValueSet` property map.
//!
//! An ordered, unique-key map of name → typed value, used both as item
//! metadata and as the evaluation context for filter expressions. Names
//! are case-insensitive (the first-seen casing is preserved for
//! display) and iteration order is deterministic.
//!
//! The text form is `name/Type=text` pairs joined by `|`, e.g.
//! `Category/I64=10|Region/Str=EMEA`. Names may not contain the
//! delimiter characters; string values are escaped.

use crate::{CoreError, CoreResult, Value};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

const PAIR_SEP: char = '|';
const TYPE_SEP: char = '/';
const VALUE_SEP: char = '=';

/// A single named, typed value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NamedValue {
    name: String,
    value: Value,
}

impl NamedValue {
    /// Creates a named value. The name must be non-empty and free of
    /// the `/`, `=`, `|` and `,` delimiters.
    pub fn new(name: impl Into<String>, value: impl Into<Value>) -> CoreResult<Self> {
        let name = name.into();
        validate_name(&name)?;
        Ok(Self {
            name,
            value: value.into(),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn value(&self) -> &Value {
        &self.value
    }

    /// Renders the `name/Type=text` pair form.
    pub fn serialize(&self) -> String {
        format!(
            "{}{}{}{}{}",
            self.name,
            TYPE_SEP,
            self.value.type_name(),
            VALUE_SEP,
            self.value.to_text()
        )
    }

    /// Parses a `name/Type=text` pair.
    pub fn parse(text: &str) -> CoreResult<Self> {
        let bad = || CoreError::Serialization(format!("invalid named value: '{text}'"));
        let (head, value_text) = text.split_once(VALUE_SEP).ok_or_else(bad)?;
        let (name, type_name) = head.split_once(TYPE_SEP).ok_or_else(bad)?;
        let value = Value::parse_typed(type_name, value_text)?;
        NamedValue::new(name, value)
    }
}

impl fmt::Display for NamedValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}={}", self.name, self.value)
    }
}

fn validate_name(name: &str) -> CoreResult<()> {
    if name.is_empty() {
        return Err(CoreError::Argument("value name is empty".into()));
    }
    if name.contains([TYPE_SEP, VALUE_SEP, PAIR_SEP, ',']) || name.chars().any(char::is_control) {
        return Err(CoreError::Argument(format!("invalid value name: '{name}'")));
    }
    Ok(())
}

/// An ordered set of named values with case-insensitive unique keys.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NamedValueSet {
    // keyed by the lowercased name for case-insensitive lookup;
    // BTreeMap keeps iteration deterministic. Values are shared so an
    // intern table can hand the same instance to thousands of items.
    values: BTreeMap<String, Arc<NamedValue>>,
    frozen: bool,
}

impl NamedValueSet {
    /// Creates an empty, modifiable set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a set from name/value pairs.
    pub fn from_pairs<N, V>(pairs: impl IntoIterator<Item = (N, V)>) -> CoreResult<Self>
    where
        N: Into<String>,
        V: Into<Value>,
    {
        let mut set = Self::new();
        for (name, value) in pairs {
            set.set(name, value)?;
        }
        Ok(set)
    }

    /// Number of values in the set.
    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Whether the set has been frozen (made read-only).
    pub fn is_frozen(&self) -> bool {
        self.frozen
    }

    /// Freezes the set; all further mutation fails with `Frozen`.
    pub fn freeze(&mut self) {
        self.frozen = true;
    }

    fn check_not_frozen(&self) -> CoreResult<()> {
        if self.frozen {
            return Err(CoreError::Frozen);
        }
        Ok(())
    }

    /// Sets a value, replacing any existing value with the same name
    /// (case-insensitive).
    pub fn set(&mut self, name: impl Into<String>, value: impl Into<Value>) -> CoreResult<()> {
        let nv = NamedValue::new(name, value)?;
        self.set_shared(Arc::new(nv))
    }

    /// Sets an already-shared (typically interned) named value.
    pub fn set_shared(&mut self, nv: Arc<NamedValue>) -> CoreResult<()> {
        self.check_not_frozen()?;
        self.values.insert(nv.name.to_lowercase(), nv);
        Ok(())
    }

    /// Removes a value by name.
    pub fn unset(&mut self, name: &str) -> CoreResult<()> {
        self.check_not_frozen()?;
        self.values.remove(&name.to_lowercase());
        Ok(())
    }

    /// Finds a named value (case-insensitive).
    pub fn get(&self, name: &str) -> Option<&NamedValue> {
        self.values.get(&name.to_lowercase()).map(Arc::as_ref)
    }

    /// Finds a named value as its shared handle.
    pub fn get_shared(&self, name: &str) -> Option<Arc<NamedValue>> {
        self.values.get(&name.to_lowercase()).cloned()
    }

    /// Finds a value (case-insensitive).
    pub fn value(&self, name: &str) -> Option<&Value> {
        self.get(name).map(NamedValue::value)
    }

    /// Finds a string value, or the default when absent or non-string.
    pub fn get_string(&self, name: &str, default: &str) -> String {
        match self.value(name) {
            Some(Value::Str(s)) => s.clone(),
            _ => default.to_string(),
        }
    }

    /// Finds an integer value, or the default when absent or non-integer.
    pub fn get_i64(&self, name: &str, default: i64) -> i64 {
        match self.value(name) {
            Some(Value::I64(i)) => *i,
            _ => default,
        }
    }

    /// Finds a boolean value, or the default when absent or non-boolean.
    pub fn get_bool(&self, name: &str, default: bool) -> bool {
        match self.value(name) {
            Some(Value::Bool(b)) => *b,
            _ => default,
        }
    }

    /// Copies every value from `other` into this set, replacing
    /// existing names.
    pub fn merge(&mut self, other: &NamedValueSet) -> CoreResult<()> {
        self.check_not_frozen()?;
        for (key, nv) in other.values.iter() {
            self.values.insert(key.clone(), nv.clone());
        }
        Ok(())
    }

    /// Removes all values.
    pub fn clear(&mut self) -> CoreResult<()> {
        self.check_not_frozen()?;
        self.values.clear();
        Ok(())
    }

    /// Iterates values in deterministic (name-sorted) order.
    pub fn iter(&self) -> impl Iterator<Item = &NamedValue> {
        self.values.values().map(Arc::as_ref)
    }

    /// Iterates the shared value handles in deterministic order.
    pub fn iter_shared(&self) -> impl Iterator<Item = &Arc<NamedValue>> {
        self.values.values()
    }

    /// Serializes the whole set to its text form.
    pub fn serialize(&self) -> String {
        self.iter()
            .map(NamedValue::serialize)
            .collect::<Vec<_>>()
            .join(&PAIR_SEP.to_string())
    }

    /// Parses a set from its text form. Empty input yields an empty set.
    pub fn parse(text: &str) -> CoreResult<Self> {
        let mut set = Self::new();
        for part in text.split([PAIR_SEP, '\n']) {
            // leading whitespace belongs to formatting, trailing
            // whitespace belongs to the value
            let part = part.trim_start();
            if part.is_empty() {
                continue;
            }
            let nv = NamedValue::parse(part)?;
            set.values.insert(nv.name.to_lowercase(), Arc::new(nv));
        }
        Ok(set)
    }

    /// Returns an unfrozen deep copy.
    pub fn duplicate(&self) -> Self {
        Self {
            values: self.values.clone(),
            frozen: false,
        }
    }
}

impl fmt::Display for NamedValueSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut first = true;
        for nv in self.iter() {
            if !first {
                write!(f, ", ")?;
            }
            write!(f, "{nv}")?;
            first = false;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn set_get_is_case_insensitive() {
        let mut props = NamedValueSet::new();
        props.set("Category", 10).unwrap();
        assert_eq!(props.get_i64("category", 0), 10);
        assert_eq!(props.get_i64("CATEGORY", 0), 10);
        // replacing under a different casing keeps a single entry
        props.set("CATEGORY", 11).unwrap();
        assert_eq!(props.len(), 1);
        assert_eq!(props.get_i64("Category", 0), 11);
    }

    #[test]
    fn unset_removes() {
        let mut props = NamedValueSet::new();
        props.set("Region", "EMEA").unwrap();
        props.unset("region").unwrap();
        assert!(props.value("Region").is_none());
    }

    #[test]
    fn frozen_set_rejects_mutation() {
        let mut props = NamedValueSet::new();
        props.set("a", 1).unwrap();
        props.freeze();
        assert!(matches!(props.set("b", 2), Err(CoreError::Frozen)));
        assert!(matches!(props.clear(), Err(CoreError::Frozen)));
        // reads still work
        assert_eq!(props.get_i64("a", 0), 1);
        // and an unfrozen duplicate is mutable again
        let mut copy = props.duplicate();
        copy.set("b", 2).unwrap();
        assert_eq!(copy.len(), 2);
    }

    #[test]
    fn text_round_trip() {
        let props = NamedValueSet::from_pairs([
            ("Category", Value::I64(10)),
            ("Region", Value::Str("EMEA | APAC".into())),
            ("Live", Value::Bool(true)),
        ])
        .unwrap();
        let parsed = NamedValueSet::parse(&props.serialize()).unwrap();
        assert_eq!(parsed, props);
    }

    #[test]
    fn invalid_names_are_rejected() {
        let mut props = NamedValueSet::new();
        assert!(matches!(props.set("", 1), Err(CoreError::Argument(_))));
        assert!(matches!(props.set("a=b", 1), Err(CoreError::Argument(_))));
        assert!(matches!(props.set("a|b", 1), Err(CoreError::Argument(_))));
    }
}
