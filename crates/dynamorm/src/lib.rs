//! DynamORM: a typed query/update/transaction engine fronting a managed
//! NoSQL key-value backend.
//!
//! The crate is split along the sync/async boundary spec §5 draws: model
//! descriptors, attribute-value conversion, and the expression builder
//! ([`dynamorm_core`], [`dynamorm_expr`]) are fully synchronous; only the
//! [`executor`] and [`batch`] modules ever suspend. [`client::DynamormClient`]
//! is the one entry point applications construct; everything else is reached
//! through it.

pub mod backend;
pub mod batch;
pub mod client;
pub mod clock;
pub mod cursor;
pub mod error;
pub mod executor;
pub mod key;
pub mod planner;
pub mod query;
pub mod retry;
#[cfg(any(test, feature = "test-util"))]
pub mod testing;
pub mod transaction;
pub mod update;

pub use backend::{BackendClient, Item, ReturnValues};
pub use client::DynamormClient;
pub use error::{CancellationKind, CancellationReason, Error, Result};
pub use key::Key;
pub use query::{Direction, QueryBuilder};
pub use transaction::TransactionBuilder;
pub use update::UpdateBuilder;

pub use dynamorm_core::{AttrValue, Descriptor, Model, Role};
pub use dynamorm_expr::Op;
// `Model` the trait (type namespace) and `Model` the derive macro (macro
// namespace) share a name on purpose, mirroring `serde::Serialize`.
pub use dynamorm_macros::Model;
