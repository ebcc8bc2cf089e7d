//! Errors raised while composing an expression.

/// Errors from [`crate::builder::ExpressionBuilder`].
#[derive(Debug, thiserror::Error)]
pub enum ExprError {
    /// `IN` was given an empty value list.
    #[error("IN operator requires at least one value for field {field}")]
    EmptyInList { field: String },

    /// `IN` was given more values than the backend expression cost limit allows.
    #[error("IN operator on field {field} exceeds the {max} value limit ({got} given)")]
    InListTooLarge { field: String, max: usize, got: usize },

    /// A key condition used an operator the backend doesn't allow there (only
    /// `=`, `<`, `<=`, `>`, `>=`, `BETWEEN`, `BEGINS_WITH`).
    #[error("operator {op:?} is not valid in a key condition")]
    InvalidKeyConditionOperator { op: crate::op::Op },

    /// The backend forbids `OR` in key conditions.
    #[error("key conditions may only be AND-composed")]
    OrInKeyCondition,

    /// An attribute-value conversion failed while interning a value.
    #[error(transparent)]
    Conversion(#[from] dynamorm_core::CoreError),
}

pub type Result<T> = std::result::Result<T, ExprError>;
