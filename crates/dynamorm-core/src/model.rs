//! The `Model` trait: the contract a record type implements (by hand or via
//! `#[derive(Model)]`) so the registry can describe it and the query/update
//! builders can marshal it.

use std::sync::Arc;

use crate::attr_value::AttrValue;
use crate::descriptor::Descriptor;
use crate::error::Result;

/// A record type usable with the query engine.
///
/// Implementors provide a [`Descriptor`] builder (called once and memoized by
/// the [`crate::registry::Registry`]) plus marshal/unmarshal functions
/// between `Self` and the backend's attribute-map representation. Hand
/// implementations exist for the core's own tests; ordinary callers derive
/// this via `#[derive(Model)]` in `dynamorm-macros`.
pub trait Model: Sized {
    /// A stable name for this type, used in diagnostics and as the registry
    /// cache key alongside `TypeId`.
    const TYPE_NAME: &'static str;

    /// Builds this type's descriptor. Called at most once per process; the
    /// registry caches the result behind a `TypeId`-keyed table.
    fn build_descriptor() -> Result<Descriptor>;

    /// Marshals `self` into a backend attribute map.
    fn into_attrs(self) -> std::collections::BTreeMap<String, AttrValue>;

    /// Unmarshals a backend attribute map back into `Self`.
    fn from_attrs(attrs: &std::collections::BTreeMap<String, AttrValue>) -> Result<Self>;
}

/// A convenience bundle of a type's descriptor, handed to callers that need
/// to branch on key schema without committing to a particular record value.
#[derive(Clone)]
pub struct ModelInfo {
    pub descriptor: Arc<Descriptor>,
}
