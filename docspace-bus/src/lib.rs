//! Generic event bus for docspace.
//!
//! An entity-independent publish/subscribe primitive used inside the
//! engine and exposed to external collaborators (UI shell, persistence,
//! module runtime):
//!
//! - priority-ordered dispatch with registration-order tie-breaking
//! - one-shot and wildcard subscribers, per-subscriber conditions
//! - nested namespaces (each a full bus of its own)
//! - explicit early termination ([`HandlerReply::Halt`])
//! - failure isolation: handler errors are logged and re-emitted as
//!   `eventbus:error`, never propagated to siblings
//! - async emission with per-handler timeouts (tokio)
//! - bounded emission history and statistics
//!
//! # Example
//!
//! ```
//! use docspace_bus::{EmitOptions, EventBus, HandlerReply, SubscribeOptions};
//! use serde_json::json;
//!
//! let bus = EventBus::new();
//! bus.on(
//!     "document:saved",
//!     |event| {
//!         println!("saved: {}", event.data);
//!         Ok(HandlerReply::Continue)
//!     },
//!     SubscribeOptions::default(),
//! );
//! bus.emit("document:saved", json!({"id": "doc_1"}), &EmitOptions::default()).unwrap();
//! ```

mod bus;
mod error;

pub use bus::{
    AsyncHandler, BusEvent, BusHistoryFilter, BusProxy, BusStats, Condition, EmitOptions,
    EmitOutcome, EventBus, EventListenerCounts, HandlerReply, SubscribeOptions, SubscriptionId,
    SyncHandler,
};
pub use error::{BusError, BusResult};
