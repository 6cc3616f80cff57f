//! Field access error types.

/// Errors raised when a component accesses its own fields.
#[derive(Debug, thiserror::Error)]
pub enum FieldError {
    /// The component has no input field with this name.
    #[error("unknown input field `{0}`")]
    UnknownInput(String),

    /// The component has no output field with this name.
    #[error("unknown output field `{0}`")]
    UnknownOutput(String),

    /// An event payload did not have the requested type.
    #[error("field `{field}` holds `{found}`, not `{expected}`")]
    TypeMismatch {
        /// The field that was read.
        field: String,
        /// The type the caller asked for.
        expected: &'static str,
        /// The type the payload actually carries.
        found: &'static str,
    },

    /// The operation is not available for the field's buffering policy
    /// (e.g. popping from a `Latest` field).
    #[error("field `{field}` has policy {policy}, operation requires {required}")]
    PolicyMismatch {
        /// The field that was accessed.
        field: String,
        /// The policy the field was declared with.
        policy: &'static str,
        /// The policy the operation needs.
        required: &'static str,
    },
}
