//! The structured error taxonomy (spec §7) surfaced by every public entry
//! point in this crate. Narrower errors from `dynamorm-core` and
//! `dynamorm-expr` convert into `Error::Validation` at this boundary.

/// One cancelled operation within a failed transaction.
#[derive(Debug, Clone, PartialEq)]
pub struct CancellationReason {
    pub index: usize,
    pub kind: CancellationKind,
    pub message: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CancellationKind {
    ConditionFailed,
    ItemCollisionSize,
    ThrottlingError,
    Other,
}

/// The kind of transport-layer failure behind an `Error::Transport`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportKind {
    Timeout,
    Network,
    DeadlineImminent,
    Other,
}

/// DynamORM's unified error type.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// A malformed descriptor, bad operator/value shape, empty `IN`, unknown
    /// field, or missing PK condition where one is required.
    #[error("validation failed: {0}")]
    Validation(String),

    /// A `Get`/`first` terminal found no matching item.
    #[error("item not found")]
    ItemNotFound,

    /// The backend signaled a conditional-check failure.
    #[error("condition failed")]
    ConditionFailed,

    /// A `TransactWriteItems`-shaped call was cancelled; `reasons` carries
    /// one entry per composed operation.
    #[error("transaction cancelled: {} operation(s)", reasons.len())]
    TransactionCanceled { reasons: Vec<CancellationReason> },

    /// The backend throttled the call. Retryable per the active policy.
    #[error("request throttled")]
    Throttled,

    /// A transport-level failure.
    #[error("transport error ({kind:?}, retryable={retryable})")]
    Transport { kind: TransportKind, retryable: bool },

    /// A requested operation isn't supported, e.g. `OR` in a key condition.
    #[error("unsupported operation: {0}")]
    Unsupported(String),
}

impl Error {
    /// Whether this error is retryable under the currently-active policy,
    /// i.e. it is `Throttled`, a retryable `Transport`, or a
    /// `TransactionCanceled` whose reasons are *all* `ThrottlingError`.
    pub fn is_retryable(&self) -> bool {
        match self {
            Error::Throttled => true,
            Error::Transport { retryable, .. } => *retryable,
            Error::TransactionCanceled { reasons } => {
                !reasons.is_empty() && reasons.iter().all(|r| r.kind == CancellationKind::ThrottlingError)
            }
            _ => false,
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, Error::ItemNotFound)
    }

    pub fn is_condition_failed(&self) -> bool {
        matches!(self, Error::ConditionFailed)
    }

    pub fn validation(message: impl Into<String>) -> Self {
        Error::Validation(message.into())
    }
}

impl From<dynamorm_core::CoreError> for Error {
    fn from(err: dynamorm_core::CoreError) -> Self {
        Error::Validation(err.to_string())
    }
}

impl From<dynamorm_expr::ExprError> for Error {
    fn from(err: dynamorm_expr::ExprError) -> Self {
        Error::Validation(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn throttled_is_retryable() {
        assert!(Error::Throttled.is_retryable());
        assert!(!Error::ConditionFailed.is_retryable());
    }

    #[test]
    fn transaction_canceled_retryable_iff_all_throttling() {
        let all_throttled = Error::TransactionCanceled {
            reasons: vec![CancellationReason {
                index: 0,
                kind: CancellationKind::ThrottlingError,
                message: None,
            }],
        };
        assert!(all_throttled.is_retryable());

        let mixed = Error::TransactionCanceled {
            reasons: vec![
                CancellationReason {
                    index: 0,
                    kind: CancellationKind::ThrottlingError,
                    message: None,
                },
                CancellationReason {
                    index: 1,
                    kind: CancellationKind::ConditionFailed,
                    message: None,
                },
            ],
        };
        assert!(!mixed.is_retryable());
    }

    #[test]
    fn core_error_converts_to_validation() {
        let core_err = dynamorm_core::CoreError::MissingPartitionKey { type_name: "T" };
        let err: Error = core_err.into();
        assert!(matches!(err, Error::Validation(_)));
    }
}
