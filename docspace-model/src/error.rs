//! Error types for the model layer.

use thiserror::Error;

/// Result type for model operations.
pub type ModelResult<T> = Result<T, ModelError>;

/// Errors that can occur in entity/attribute operations.
#[derive(Debug, Error)]
pub enum ModelError {
    /// A value failed validation and the caller asked for a hard failure.
    #[error("validation failed for '{attribute}': {}", errors.join(", "))]
    Validation {
        attribute: String,
        errors: Vec<String>,
    },

    /// Serialization/deserialization error.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// A serialized payload was structurally wrong.
    #[error("invalid payload: {0}")]
    InvalidPayload(String),
}
