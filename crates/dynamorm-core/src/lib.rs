//! Model descriptors, attribute-value conversion, and the shared error
//! taxonomy underlying DynamORM.
//!
//! This crate has no notion of a backend connection or an async runtime: it
//! is the synchronous, in-memory half of the engine (registry, descriptor,
//! attribute-value conversion). The `dynamorm` crate builds the backend-facing
//! half (planner, query/update builders, executor, batch engine, transaction
//! builder) on top of it.

pub mod attr_value;
pub mod descriptor;
pub mod error;
pub mod model;
pub mod registry;

pub use attr_value::{AttrValue, FromAttrValue, ToAttrValue};
pub use descriptor::{Descriptor, DescriptorBuilder, FieldDescriptor, GlobalIndex, LocalIndex, Role};
pub use error::{CoreError, Result};
pub use model::Model;
pub use registry::Registry;
