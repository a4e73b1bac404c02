//! Process-wide attribute registry for docspace.
//!
//! [`AttributeSpace`] is the root the document builder reaches entities
//! through, and the router that propagates their changes to interested
//! observers at four levels of granularity:
//!
//! 1. a single attribute (`subscribe`)
//! 2. a whole entity (`subscribe_to_entity`)
//! 3. an entity type (`subscribe_to_type`)
//! 4. everything (`subscribe_global`)
//!
//! Within one notification the tiers always fire in that order, each
//! callback failure-isolated, and a copy of the notification goes to the
//! external sink. Changes are also appended to a bounded history that
//! collaborators can query or persist via `export`/`import`.
//!
//! # Example
//!
//! ```
//! use docspace_model::Entity;
//! use docspace_space::AttributeSpace;
//! use serde_json::json;
//!
//! let mut space = AttributeSpace::new();
//! let mut note = Entity::new("note");
//! note.set_attribute_value("title", json!("Hello"));
//! let id = space.register_entity(note);
//!
//! let sub = space.subscribe_to_entity(id.as_str(), |change| {
//!     println!("{}: {:?}", change.event_type, change.attribute_name);
//!     Ok(())
//! });
//!
//! if let Some(entity) = space.entity_mut(id.as_str()) {
//!     entity.set_attribute_value("title", json!("Hello again"));
//! }
//! space.unsubscribe(&sub);
//! ```

mod batch;
mod error;
mod history;
mod space;
mod subscription;

pub use batch::Batch;
pub use error::{SpaceError, SpaceResult};
pub use history::{ChangeRecord, HistoryFilter};
pub use space::{AttributeSpace, SpaceStats};
pub use subscription::{ChangeCallback, ChangeNotification, Subscription};
