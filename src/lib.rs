//! SQLite-backed store for declarative load balancer configuration, with a
//! hook pipeline composed around every entity write.
//!
//! Writes (`create`, `update`, `delete`) run inside one transaction through
//! an ordered chain of hooks: change-event recording outermost, soft-delete
//! rewriting in the middle, audit stamping innermost, then the terminal row
//! write. Deletes become tombstones (`deleted_at`), reads filter tombstones
//! out unless the call bypasses soft deletes, and each completed mutation
//! publishes one change message fanned out to the related entities'
//! subjects.
//!
//! ```no_run
//! use std::sync::Arc;
//! use lbstore::{
//!     EntityId, EntityKind, LoadBalancer, MutationContext, NotifierPublisher, Pipeline, Store,
//! };
//!
//! fn main() -> anyhow::Result<()> {
//!     let publisher = NotifierPublisher::new();
//!     let events = publisher.observer();
//!     let store = Store::open_memory(Pipeline::standard(), Arc::new(publisher))?;
//!
//!     let ctx = MutationContext::new().with_actor("alice");
//!     let lb = store.create(&ctx, &LoadBalancer {
//!         id: None,
//!         name: "edge-lb".to_string(),
//!         owner_id: EntityId::new(EntityKind::Owner),
//!         location_id: EntityId::new(EntityKind::Location),
//!         provider_id: EntityId::new(EntityKind::Provider),
//!         created_by: None,
//!         updated_by: None,
//!         deleted_at: None,
//!     })?;
//!
//!     let (subject, message) = events.recv()?;
//!     assert_eq!(subject, "load-balancer");
//!     assert_eq!(Some(&message.subject_id), lb.id.as_ref());
//!     Ok(())
//! }
//! ```

pub mod context;
pub mod entity;
pub mod error;
pub mod event;
pub mod hook;
pub mod id;
pub mod notifier;
pub mod store;

pub use context::{MutationContext, UNKNOWN_ACTOR};
pub use entity::{Entity, LoadBalancer, Origin, Pool, Port};
pub use error::Error;
pub use event::{ChangeMessage, EventType, FieldChange, NotifierPublisher, Publisher, UNKNOWN_VALUE};
pub use hook::{Hook, Mutation, Operation, Pipeline};
pub use id::{EntityId, EntityKind, ParseIdError};
pub use notifier::ChangeNotifier;
pub use store::Store;

pub use rusqlite;
