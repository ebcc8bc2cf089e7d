//! Condition, key-condition, filter, update, and projection expression
//! composition, with mechanical identifier/value placeholder escaping.
//!
//! This crate never talks to a backend; it only renders strings and
//! placeholder maps from a sequence of builder calls (see
//! [`builder::ExpressionBuilder`]).

pub mod builder;
pub mod components;
pub mod error;
pub mod op;

pub use builder::{ExpressionBuilder, GroupBuilder};
pub use components::{ExpressionComponents, UpdateClauses};
pub use error::{ExprError, Result};
pub use op::Op;
