//! Error types for the event bus.

use thiserror::Error;

/// Result type for bus operations.
pub type BusResult<T> = Result<T, BusError>;

/// Errors surfaced by emission. Handler failures only become errors when
/// the caller opted into `stop_on_error`; otherwise they are logged and
/// isolated.
#[derive(Debug, Error)]
pub enum BusError {
    /// A handler failed and `stop_on_error` was set.
    #[error("handler failed for event '{event}': {message}")]
    Handler { event: String, message: String },

    /// An async handler exceeded the per-call timeout and `stop_on_error`
    /// was set.
    #[error("handler for event '{event}' timed out after {millis}ms")]
    Timeout { event: String, millis: u128 },
}
