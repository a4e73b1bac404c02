//! The external event sink: the one-way boundary through which core
//! events reach non-core collaborators (persistence, UI refresh, logging,
//! a network relay).
//!
//! The core never assumes a transport. Every local entity emission and
//! every registry/bus notification is forwarded through whichever sink
//! the host injected; the default sink drops everything.

use serde_json::Value;
use std::rc::Rc;

/// A destination for broadcast events.
pub trait EventSink {
    /// Delivers one event. Implementations must not fail; anything that
    /// can go wrong downstream is the collaborator's concern.
    fn publish(&self, event: &str, payload: &Value);
}

/// Shared handle to a sink. The engine is single-threaded by design, so
/// sinks are reference-counted, not atomically shared.
pub type SharedSink = Rc<dyn EventSink>;

/// A sink that discards every event.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullSink;

impl EventSink for NullSink {
    fn publish(&self, _event: &str, _payload: &Value) {}
}

/// A sink that logs every event at debug level.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingSink;

impl EventSink for TracingSink {
    fn publish(&self, event: &str, payload: &Value) {
        tracing::debug!(target: "docspace::sink", event, %payload, "broadcast");
    }
}

/// The default sink handle.
#[must_use]
pub fn null_sink() -> SharedSink {
    Rc::new(NullSink)
}
