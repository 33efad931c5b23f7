//! Filter expression engine.
//!
//! Expressions are predicate trees built from constants, field
//! references and operators, evaluated against a `NamedValueSet`
//! context. The same trees drive ad-hoc store queries and live
//! subscription filters, and round-trip losslessly through a small
//! versioned XML grammar for transmission and storage.
//!
//! Evaluation errors carry the shared `CoreError::Evaluation` identity
//! whether they are raised locally or during server-side filtering.

mod eval;
mod node;
mod xml;

pub use eval::ExprContext;
pub use node::{Expr, OpCode};
pub use xml::{deserialize, serialize};

/// System property resolved to the item's logical name.
pub const SYS_PROP_ITEM_NAME: &str = "$ItemName";
/// System property resolved to the item's creation timestamp.
pub const SYS_PROP_ITEM_CREATED: &str = "$ItemCreated";
/// System property resolved to the item's expiry timestamp.
pub const SYS_PROP_ITEM_EXPIRES: &str = "$ItemExpires";
