//! Event categories and mutation events.
//!
//! Categories form a static hierarchy. A listener registered for a category
//! receives every event whose category is that category or one of its
//! descendants, so a listener on [`MUTATION`] sees adds, removes, sorts and
//! changes alike.
//!
//! ```
//! use rxmodel::event::{Category, MUTATION};
//!
//! static SAVED: Category = Category::child("SavedEvent", &MUTATION);
//!
//! assert!(SAVED.is_a(&MUTATION));
//! assert!(!MUTATION.is_a(&SAVED));
//! ```

use std::cell::Cell;
use std::fmt;

use crate::bus::Target;
use crate::entity::Entity;
use crate::value::Value;

/// A node in the event category hierarchy.
///
/// Categories are compared by identity, so they must be declared as
/// `static` items.
pub struct Category {
    name: &'static str,
    parent: Option<&'static Category>,
}

impl Category {
    pub const fn root(name: &'static str) -> Self {
        Self { name, parent: None }
    }

    pub const fn child(name: &'static str, parent: &'static Category) -> Self {
        Self {
            name,
            parent: Some(parent),
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn parent(&self) -> Option<&'static Category> {
        self.parent
    }

    /// Whether this category is `ancestor` or descends from it.
    pub fn is_a(&self, ancestor: &Category) -> bool {
        let mut current: Option<&Category> = Some(self);
        while let Some(category) = current {
            if std::ptr::eq(category, ancestor) {
                return true;
            }
            current = category.parent;
        }
        false
    }
}

impl PartialEq for Category {
    fn eq(&self, other: &Self) -> bool {
        std::ptr::eq(self, other)
    }
}

impl Eq for Category {}

impl fmt::Debug for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name)
    }
}

/// Base category of every content change notification.
pub static MUTATION: Category = Category::root("MutationEvent");
/// An element joined a list.
pub static ADD: Category = Category::child("AddEvent", &MUTATION);
/// An element left a list.
pub static REMOVE: Category = Category::child("RemoveEvent", &MUTATION);
/// An element moved to another position of a list.
pub static SORT: Category = Category::child("SortEvent", &MUTATION);
/// An entity attribute or property changed.
pub static CHANGE: Category = Category::child("ChangeEvent", &MUTATION);

/// What an event is about.
#[derive(Debug, Clone)]
pub enum Payload {
    None,
    Add { model: Entity },
    Remove { model: Entity },
    Sort { model: Entity, old_index: usize },
    Change { key: String },
    Data(Value),
}

/// A dispatched notification.
///
/// `target` is the object that first dispatched the event; `related_target`
/// is set when the event was forwarded to an owner by a propagating
/// attribute.
#[derive(Debug, Clone)]
pub struct Event {
    category: &'static Category,
    payload: Payload,
    target: Option<Target>,
    related_target: Option<Target>,
    propagation_stopped: Cell<bool>,
}

impl Event {
    pub fn new(category: &'static Category) -> Self {
        Self::with_payload(category, Payload::None)
    }

    pub fn with_data(category: &'static Category, data: impl Into<Value>) -> Self {
        Self::with_payload(category, Payload::Data(data.into()))
    }

    pub fn add(model: Entity) -> Self {
        Self::with_payload(&ADD, Payload::Add { model })
    }

    pub fn remove(model: Entity) -> Self {
        Self::with_payload(&REMOVE, Payload::Remove { model })
    }

    pub fn sort(model: Entity, old_index: usize) -> Self {
        Self::with_payload(&SORT, Payload::Sort { model, old_index })
    }

    pub fn change(key: impl Into<String>) -> Self {
        Self::with_payload(&CHANGE, Payload::Change { key: key.into() })
    }

    fn with_payload(category: &'static Category, payload: Payload) -> Self {
        Self {
            category,
            payload,
            target: None,
            related_target: None,
            propagation_stopped: Cell::new(false),
        }
    }

    pub fn category(&self) -> &'static Category {
        self.category
    }

    /// Whether the event belongs to `category` or one of its descendants.
    pub fn is(&self, category: &Category) -> bool {
        self.category.is_a(category)
    }

    pub fn payload(&self) -> &Payload {
        &self.payload
    }

    /// The element of an add, remove or sort event.
    pub fn model(&self) -> Option<&Entity> {
        match &self.payload {
            Payload::Add { model } | Payload::Remove { model } | Payload::Sort { model, .. } => {
                Some(model)
            }
            _ => None,
        }
    }

    /// The attribute or property name of a change event.
    pub fn key(&self) -> Option<&str> {
        match &self.payload {
            Payload::Change { key } => Some(key),
            _ => None,
        }
    }

    pub fn old_index(&self) -> Option<usize> {
        match &self.payload {
            Payload::Sort { old_index, .. } => Some(*old_index),
            _ => None,
        }
    }

    pub fn data(&self) -> Option<&Value> {
        match &self.payload {
            Payload::Data(value) => Some(value),
            _ => None,
        }
    }

    pub fn target(&self) -> Option<&Target> {
        self.target.as_ref()
    }

    pub fn related_target(&self) -> Option<&Target> {
        self.related_target.as_ref()
    }

    pub(crate) fn set_target(&mut self, target: Target) {
        self.target = Some(target);
    }

    pub(crate) fn set_related_target(&mut self, target: Target) {
        self.related_target = Some(target);
    }

    /// Flag the event as stopped. Dispatch does not consult the flag.
    pub fn stop_propagation(&self) {
        self.propagation_stopped.set(true);
    }

    pub fn is_propagation_stopped(&self) -> bool {
        self.propagation_stopped.get()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    static BASE: Category = Category::root("Base");
    static DERIVED: Category = Category::child("Derived", &BASE);
    static OTHER: Category = Category::root("Other");

    #[test]
    fn builtin_categories_descend_from_mutation() {
        for category in [&ADD, &REMOVE, &SORT, &CHANGE] {
            assert!(category.is_a(&MUTATION));
            assert_eq!(category.parent(), Some(&MUTATION));
        }
        assert!(!MUTATION.is_a(&CHANGE));
    }

    #[test]
    fn custom_hierarchies_match_by_identity() {
        assert!(DERIVED.is_a(&BASE));
        assert!(DERIVED.is_a(&DERIVED));
        assert!(!DERIVED.is_a(&OTHER));
        assert_ne!(&BASE, &OTHER);
    }

    #[test]
    fn change_event_exposes_key() {
        let event = Event::change("title");
        assert_eq!(event.key(), Some("title"));
        assert!(event.is(&MUTATION));
        assert!(event.model().is_none());
        assert!(event.target().is_none());
    }

    #[test]
    fn stop_propagation_is_informational() {
        let event = Event::new(&MUTATION);
        assert!(!event.is_propagation_stopped());
        event.stop_propagation();
        assert!(event.is_propagation_stopped());
        assert!(event.clone().is_propagation_stopped());
    }

    #[test]
    fn data_events_carry_values() {
        let event = Event::with_data(&OTHER, 5);
        assert_eq!(event.data(), Some(&Value::Int(5)));
        assert_eq!(event.category().name(), "Other");
    }
}
