//! The descriptor/conversion error type.
//!
//! This is deliberately narrower than [`dynamorm::Error`](../../dynamorm/src/error.rs):
//! the core crate only ever produces validation-shaped failures (a malformed
//! model, an unsupported value kind). Everything that can come back from a
//! live backend call (throttling, transport, conditional failures,
//! transaction cancellation) lives in the `dynamorm` crate, which wraps a
//! `CoreError` into its own `Error::Validation` variant at the boundary.

/// Errors raised while building or using a [`crate::descriptor::Descriptor`].
#[derive(Debug, thiserror::Error)]
pub enum CoreError {
    /// A record type has no field tagged as the partition key.
    #[error("model {type_name} has no partition key field")]
    MissingPartitionKey {
        /// The record type's name, for diagnostics.
        type_name: &'static str,
    },

    /// A field was assigned more than one mutually-exclusive role.
    #[error("field {field} on {type_name} has conflicting roles: {first:?} and {second:?}")]
    ConflictingRole {
        type_name: &'static str,
        field: &'static str,
        first: crate::descriptor::Role,
        second: crate::descriptor::Role,
    },

    /// Two indexes on the same model were declared with the same name.
    #[error("duplicate index name {name:?} on model {type_name}")]
    DuplicateIndexName {
        type_name: &'static str,
        name: String,
    },

    /// A `version` field was declared on something other than an integer.
    #[error("version field {field} on {type_name} must be integer-typed")]
    VersionFieldNotInteger {
        type_name: &'static str,
        field: &'static str,
    },

    /// A `ttl` field was declared on something other than an integer.
    #[error("ttl field {field} on {type_name} must be an epoch-seconds integer")]
    TtlFieldNotInteger {
        type_name: &'static str,
        field: &'static str,
    },

    /// A field tagged `encrypted` was also assigned a key role.
    #[error("encrypted field {field} on {type_name} cannot carry a key role")]
    EncryptedFieldHasKeyRole {
        type_name: &'static str,
        field: &'static str,
    },

    /// A value could not be converted to or from its backend representation.
    #[error("cannot convert value for field {field}: {reason}")]
    Conversion { field: String, reason: String },

    /// A value category isn't one of the supported attribute kinds.
    #[error("unsupported value kind: {0}")]
    UnsupportedKind(String),
}

/// Convenience alias used throughout `dynamorm-core`.
pub type Result<T> = std::result::Result<T, CoreError>;
