//! Batched registry mutations.
//!
//! A batch queues register/unregister operations and applies them with
//! notifications suppressed, trading granular events for throughput
//! during bulk loads. The prior suppression state is restored by a drop
//! guard, so it holds even if an operation panics.

use crate::space::SpaceShared;
use crate::subscription::ChangeNotification;
use docspace_model::Attribute;
use std::rc::Rc;

enum BatchOp {
    Register {
        entity_id: String,
        attribute: Attribute,
    },
    Unregister {
        entity_id: String,
        attribute_name: String,
    },
}

/// A queued sequence of registry mutations. Build it with
/// `AttributeSpace::batch`.
pub struct Batch {
    shared: Rc<SpaceShared>,
    operations: Vec<BatchOp>,
    suppress: bool,
    notify_completion: bool,
}

impl Batch {
    pub(crate) fn new(shared: Rc<SpaceShared>) -> Self {
        Self {
            shared,
            operations: Vec::new(),
            suppress: true,
            notify_completion: true,
        }
    }

    /// Queues an attribute registration.
    pub fn register_attribute(&mut self, entity_id: &str, attribute: Attribute) -> &mut Self {
        self.operations.push(BatchOp::Register {
            entity_id: entity_id.to_string(),
            attribute,
        });
        self
    }

    /// Queues an attribute removal.
    pub fn unregister_attribute(&mut self, entity_id: &str, attribute_name: &str) -> &mut Self {
        self.operations.push(BatchOp::Unregister {
            entity_id: entity_id.to_string(),
            attribute_name: attribute_name.to_string(),
        });
        self
    }

    /// Whether intermediate notifications are suppressed while the batch
    /// applies (default: true).
    pub fn suppress_notifications(&mut self, suppress: bool) -> &mut Self {
        self.suppress = suppress;
        self
    }

    /// Whether a single `batch:completed` event is emitted after the
    /// batch applies (default: true).
    pub fn notify_completion(&mut self, notify: bool) -> &mut Self {
        self.notify_completion = notify;
        self
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.operations.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.operations.is_empty()
    }

    /// Applies every queued operation, then emits `batch:completed` with
    /// the operation count (unless disabled). The queue is drained.
    pub fn execute(&mut self) -> usize {
        let count = self.operations.len();
        {
            let _guard = SuppressGuard::engage(&self.shared, self.suppress);
            for operation in self.operations.drain(..) {
                match operation {
                    BatchOp::Register {
                        entity_id,
                        attribute,
                    } => self.shared.register_attribute(&entity_id, &attribute),
                    BatchOp::Unregister {
                        entity_id,
                        attribute_name,
                    } => {
                        self.shared.unregister_attribute(&entity_id, &attribute_name);
                    }
                }
            }
        }

        if self.notify_completion {
            let mut note = ChangeNotification::new("batch:completed");
            note.payload = serde_json::json!({ "operationCount": count });
            self.shared.notify(note);
        }
        count
    }
}

/// Restores the previous suppression flag on drop.
struct SuppressGuard<'a> {
    shared: &'a SpaceShared,
    previous: bool,
}

impl<'a> SuppressGuard<'a> {
    fn engage(shared: &'a SpaceShared, suppress: bool) -> Self {
        let previous = shared.set_suppressed(suppress);
        Self { shared, previous }
    }
}

impl Drop for SuppressGuard<'_> {
    fn drop(&mut self) {
        self.shared.set_suppressed(self.previous);
    }
}
