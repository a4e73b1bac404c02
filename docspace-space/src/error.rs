//! Error types for the registry layer.

use thiserror::Error;

/// Result type for registry operations.
pub type SpaceResult<T> = Result<T, SpaceError>;

/// Errors that can occur in registry operations.
///
/// Operations referencing unknown entities or attributes are no-ops, not
/// errors; only malformed payloads and bad search patterns fail hard.
#[derive(Debug, Error)]
pub enum SpaceError {
    /// Serialization/deserialization error.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// An attribute payload failed to rebuild.
    #[error("model error: {0}")]
    Model(#[from] docspace_model::ModelError),

    /// An attribute search pattern failed to compile.
    #[error("invalid search pattern: {0}")]
    Pattern(#[from] regex::Error),

    /// An imported payload was structurally wrong.
    #[error("invalid payload: {0}")]
    InvalidPayload(String),
}
