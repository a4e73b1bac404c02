//! Core type definitions for docspace.
//!
//! This crate defines the fundamental types the entity engine is built on:
//! - Entity identifiers and the `{entityId}::{attributeName}` composite key
//! - The closed set of semantic value kinds and the typed value union
//! - Kind inference over raw JSON input
//! - The injectable external event sink
//!
//! Everything domain-specific (module definitions, layouts, documents)
//! lives elsewhere; these types are the contract between the engine's
//! subsystems.

mod ids;
pub mod parse;
mod sink;
mod value;

pub use ids::{AttributeKey, EntityId};
pub use sink::{null_sink, EventSink, NullSink, SharedSink, TracingSink};
pub use value::{infer_kind, AttributeValue, ValueKind};

/// Result type alias using the crate's error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in type operations.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("invalid attribute key: {0}")]
    InvalidKey(String),
}
