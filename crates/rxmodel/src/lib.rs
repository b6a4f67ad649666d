//! # rxmodel Architecture
//!
//! rxmodel is an **in-memory observable state layer**. Entity types declare
//! their attributes once; instances read and write through those
//! declarations, and every real change is announced as an event. Ordered
//! collections of entities announce what was added, removed, or moved.
//!
//! ## The Four Layers
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │  ObservableList (list.rs)                                   │
//! │  - Typed, ordered entity collection                         │
//! │  - Reconciles mutations into Add/Remove/Sort events         │
//! └─────────────────────────────────────────────────────────────┘
//!                              │
//!                              ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │  Entity (entity.rs)                                         │
//! │  - Constructing → Initializing → Ready                      │
//! │  - Attribute accessors with change detection                │
//! └─────────────────────────────────────────────────────────────┘
//!                              │
//!                              ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │  Attributes (attributes/)                                   │
//! │  - RuleChain: read/write stages plus metadata               │
//! │  - EntityType: inheritance flattened once at build()        │
//! └─────────────────────────────────────────────────────────────┘
//!                              │
//!                              ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │  EventBus (bus.rs, event.rs)                                │
//! │  - Category hierarchy, deduplicated ordered dispatch        │
//! │  - Transactions defer delivery until success                │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Key Principle: Synchronous, Single-Threaded
//!
//! Everything runs on the caller's thread. Handles are `Rc` based and
//! listeners fire before `dispatch_event` returns. A transaction batches
//! delivery; it is not a concurrency primitive.
//!
//! ## Example
//!
//! ```
//! use rxmodel::attributes::{EntityType, RuleChain};
//! use rxmodel::event::CHANGE;
//! use rxmodel::{EventTarget, Listener, Value};
//!
//! let todo = EntityType::builder("Todo")
//!     .attribute("title", RuleChain::new().is_required())
//!     .value("done", false)
//!     .build()
//!     .unwrap();
//!
//! let item = todo.create(serde_json::json!({"title": "write docs"})).unwrap();
//! item.add_event_listener(&[&CHANGE], &Listener::new(|event| {
//!     assert_eq!(event.key(), Some("done"));
//! }))
//! .unwrap();
//! item.set("done", true).unwrap();
//! assert_eq!(item.get("done").unwrap(), Value::Bool(true));
//! ```
//!
//! ## Module Overview
//!
//! - [`attributes`]: Rule chains and entity type declarations
//! - [`entity`]: Entity instances
//! - [`list`]: Observable lists and specialized list types
//! - [`bus`]: Listener registry, dispatch, and transactions
//! - [`event`]: Event categories and payloads
//! - [`value`]: Dynamic attribute values
//! - [`config`]: Configuration management
//! - [`error`]: Error types

pub mod attributes;
pub mod bus;
pub mod config;
pub mod entity;
pub mod error;
pub mod event;
pub mod list;
pub mod value;

#[cfg(any(test, feature = "test_utils"))]
pub mod test_utils;

pub use attributes::{EntityType, Rule, RuleChain};
pub use bus::{EventBus, EventTarget, Listener, Target};
pub use entity::{Entity, EntityState};
pub use error::{ModelError, Result};
pub use event::{Category, Event};
pub use list::{ListType, ObservableList};
pub use value::{Object, Value};
