//! Observable ordered collections of entities.
//!
//! An [`ObservableList`] owns its elements and a snapshot of the contents as
//! of the last reconciliation. Every structural mutation runs one
//! reconciliation pass that compares the two by position:
//!
//! ```text
//!  snapshot  [X, M1, M2, Y]
//!  contents  [X, M3, M2, Y]       splice(1, 1, [M3])
//!            ───────────────
//!  M1 gone from contents   ──► Remove(M1)
//!  M3 new to contents      ──► Add(M3)
//! ```
//!
//! An element of the snapshot that still exists but no longer sits at its
//! old position produces `Sort(element, old_index)`.
//!
//! Lists are typed: assigned values that are not already instances of the
//! element type are converted by constructing one. [`ListType::of`] returns
//! the one list type specialized for an entity type.

use std::cell::{Cell, RefCell};
use std::collections::HashMap;
use std::fmt;
use std::rc::{Rc, Weak};

use serde::ser::{Serialize, SerializeSeq, Serializer};
use tracing::trace;

use crate::attributes::EntityType;
use crate::bus::{EventBus, EventTarget, Target};
use crate::entity::Entity;
use crate::error::{ModelError, Result};
use crate::event::{Event, Payload};
use crate::value::Value;

thread_local! {
    static SPECIALIZED: RefCell<HashMap<usize, ListType>> = RefCell::new(HashMap::new());
}

struct ListTypeInner {
    element_type: EntityType,
}

/// A list constructor bound to an element type. Equality is identity.
#[derive(Clone)]
pub struct ListType {
    inner: Rc<ListTypeInner>,
}

impl ListType {
    /// The list type specialized for `element_type`. Repeated calls with the
    /// same entity type return the same list type.
    pub fn of(element_type: &EntityType) -> ListType {
        SPECIALIZED.with(|cache| {
            cache
                .borrow_mut()
                .entry(element_type.key())
                .or_insert_with(|| ListType {
                    inner: Rc::new(ListTypeInner {
                        element_type: element_type.clone(),
                    }),
                })
                .clone()
        })
    }

    /// Lists of [`EntityType::base`] entities.
    pub fn base() -> ListType {
        ListType::of(&EntityType::base())
    }

    pub fn element_type(&self) -> &EntityType {
        &self.inner.element_type
    }

    /// Build a list from an array, another list, a single value, or nothing.
    pub fn create(&self, initial: impl Into<Value>) -> Result<ObservableList> {
        ObservableList::with_type(self, initial.into())
    }

    pub fn ptr_eq(&self, other: &ListType) -> bool {
        Rc::ptr_eq(&self.inner, &other.inner)
    }

    /// Convert an assigned value into an element slot.
    fn element(&self, value: Value) -> Result<Option<Entity>> {
        let ty = &self.inner.element_type;
        match value {
            Value::Undefined => Ok(None),
            Value::Entity(entity) if entity.is_instance_of(ty) => Ok(Some(entity)),
            other => ty.create(other).map(Some),
        }
    }

    fn elements(&self, values: impl IntoIterator<Item = Value>) -> Result<Vec<Option<Entity>>> {
        values.into_iter().map(|value| self.element(value)).collect()
    }
}

impl PartialEq for ListType {
    fn eq(&self, other: &Self) -> bool {
        self.ptr_eq(other)
    }
}

impl Eq for ListType {}

impl fmt::Debug for ListType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ListType<{}>", self.inner.element_type.name())
    }
}

type Slots = Vec<Option<Entity>>;

struct ListInner {
    ty: ListType,
    bus: EventBus,
    elements: RefCell<Slots>,
    snapshot: RefCell<Slots>,
    /// Open list transactions; reconciliation waits for the last to close.
    suspended: Cell<usize>,
    /// Bumped by every reconciliation that replaces the snapshot.
    generation: Cell<u64>,
}

/// Handle to an observable list. Clones share the same list.
#[derive(Clone)]
pub struct ObservableList {
    inner: Rc<ListInner>,
}

#[derive(Clone)]
pub struct WeakList(Weak<ListInner>);

impl WeakList {
    pub fn upgrade(&self) -> Option<ObservableList> {
        self.0.upgrade().map(|inner| ObservableList { inner })
    }
}

impl ObservableList {
    /// A list of base entities.
    pub fn new(initial: impl Into<Value>) -> Result<ObservableList> {
        ListType::base().create(initial)
    }

    pub(crate) fn with_type(ty: &ListType, initial: Value) -> Result<ObservableList> {
        let values = match initial {
            Value::Undefined | Value::Null => Vec::new(),
            Value::Array(items) => items,
            Value::List(list) => list.values(),
            single => vec![single],
        };
        let elements = ty.elements(values)?;
        Ok(ObservableList {
            inner: Rc::new(ListInner {
                ty: ty.clone(),
                bus: EventBus::new(),
                snapshot: RefCell::new(elements.clone()),
                elements: RefCell::new(elements),
                suspended: Cell::new(0),
                generation: Cell::new(0),
            }),
        })
    }

    pub fn list_type(&self) -> &ListType {
        &self.inner.ty
    }

    pub fn element_type(&self) -> &EntityType {
        self.inner.ty.element_type()
    }

    /// Element at `index`; `None` for holes and out-of-range indices.
    pub fn get(&self, index: usize) -> Option<Entity> {
        self.inner.elements.borrow().get(index).cloned().flatten()
    }

    /// Assign a slot, growing the list with holes when `index` is past the
    /// end.
    pub fn set(&self, index: usize, value: impl Into<Value>) -> Result<()> {
        let slot = self.inner.ty.element(value.into())?;
        {
            let mut elements = self.inner.elements.borrow_mut();
            grow_to(&mut elements, index)?;
            elements[index] = slot;
        }
        self.reconcile();
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.inner.elements.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Truncate, or extend with holes.
    pub fn set_len(&self, len: usize) -> Result<()> {
        {
            let mut elements = self.inner.elements.borrow_mut();
            match len.checked_sub(1) {
                Some(last) if len > elements.len() => grow_to(&mut elements, last)?,
                _ => elements.truncate(len),
            }
        }
        self.reconcile();
        Ok(())
    }

    /// Append values, returning the new length.
    pub fn push<V: Into<Value>>(&self, values: impl IntoIterator<Item = V>) -> Result<usize> {
        let slots = self.inner.ty.elements(values.into_iter().map(Into::<Value>::into))?;
        let len = {
            let mut elements = self.inner.elements.borrow_mut();
            elements.extend(slots);
            elements.len()
        };
        self.reconcile();
        Ok(len)
    }

    pub fn pop(&self) -> Option<Entity> {
        let popped = self.inner.elements.borrow_mut().pop();
        self.reconcile();
        popped.flatten()
    }

    /// Replace `delete_count` slots from `start` with `items`, returning the
    /// removed slots. Both bounds are clamped to the list.
    pub fn splice<V: Into<Value>>(
        &self,
        start: usize,
        delete_count: usize,
        items: impl IntoIterator<Item = V>,
    ) -> Result<Vec<Option<Entity>>> {
        let slots = self.inner.ty.elements(items.into_iter().map(Into::<Value>::into))?;
        let removed: Slots = {
            let mut elements = self.inner.elements.borrow_mut();
            let start = start.min(elements.len());
            let end = start.saturating_add(delete_count).min(elements.len());
            elements.splice(start..end, slots).collect()
        };
        self.reconcile();
        Ok(removed)
    }

    /// Replace the whole contents.
    pub fn replace_all<V: Into<Value>>(&self, items: impl IntoIterator<Item = V>) -> Result<()> {
        let slots = self.inner.ty.elements(items.into_iter().map(Into::<Value>::into))?;
        *self.inner.elements.borrow_mut() = slots;
        self.reconcile();
        Ok(())
    }

    /// Iterate over a copy of the current slots.
    pub fn iter(&self) -> std::vec::IntoIter<Option<Entity>> {
        self.to_vec().into_iter()
    }

    pub fn to_vec(&self) -> Vec<Option<Entity>> {
        self.inner.elements.borrow().clone()
    }

    pub fn contains(&self, entity: &Entity) -> bool {
        self.inner
            .elements
            .borrow()
            .iter()
            .flatten()
            .any(|member| member.ptr_eq(entity))
    }

    /// Merge `models` (an array or another list) into the list.
    ///
    /// Members are skipped, models whose id matches a member's id are merged
    /// into that member, and everything else is appended. Runs as one list
    /// transaction.
    pub fn update(&self, models: impl Into<Value>) -> Result<()> {
        let models = match models.into() {
            Value::Array(items) => items,
            Value::List(list) => list.values(),
            _ => return Ok(()),
        };
        self.transaction(|| {
            for model in models {
                if let Value::Entity(entity) = &model {
                    if self.contains(entity) {
                        continue;
                    }
                }
                let id = model_id(&model)?;
                if !id.is_undefined() {
                    if let Some(member) = self.find_by_id(&id)? {
                        member.update(model)?;
                        continue;
                    }
                }
                self.push([model])?;
            }
            Ok(())
        })
    }

    fn find_by_id(&self, id: &Value) -> Result<Option<Entity>> {
        for member in self.to_vec().into_iter().flatten() {
            if member.id()?.is_same(id) {
                return Ok(Some(member));
            }
        }
        Ok(None)
    }

    fn values(&self) -> Vec<Value> {
        self.iter().map(Value::from).collect()
    }

    pub fn ptr_eq(&self, other: &ObservableList) -> bool {
        Rc::ptr_eq(&self.inner, &other.inner)
    }

    pub fn downgrade(&self) -> WeakList {
        WeakList(Rc::downgrade(&self.inner))
    }

    /// Compare the contents with the snapshot and dispatch the difference.
    ///
    /// A listener may mutate the list while the events are delivered. The
    /// nested pass reports that change against the new snapshot, and any
    /// remaining event of this pass that the snapshot no longer agrees with
    /// is skipped.
    fn reconcile(&self) {
        if self.inner.suspended.get() > 0 {
            return;
        }
        let current = self.to_vec();
        let previous = self.inner.snapshot.replace(current.clone());
        let events = diff(&previous, &current);
        if events.is_empty() {
            return;
        }
        let generation = self.inner.generation.get() + 1;
        self.inner.generation.set(generation);
        trace!(
            element_type = self.element_type().name(),
            events = events.len(),
            "list reconciled"
        );
        for event in events {
            if self.inner.generation.get() != generation && self.is_stale(&event) {
                trace!(category = event.category().name(), "skipping superseded event");
                continue;
            }
            self.dispatch_event(event);
        }
    }

    /// Whether the snapshot contradicts `event`: an add or sort for an
    /// element that left, or a remove for one that is back.
    fn is_stale(&self, event: &Event) -> bool {
        let snapshot = self.inner.snapshot.borrow();
        match event.payload() {
            Payload::Add { model } | Payload::Sort { model, .. } => {
                position(&snapshot, model).is_none()
            }
            Payload::Remove { model } => position(&snapshot, model).is_some(),
            _ => false,
        }
    }
}

/// Extend `slots` with holes until `index` is addressable. Fails instead of
/// aborting when the slots cannot be allocated.
fn grow_to(slots: &mut Slots, index: usize) -> Result<()> {
    let len = index
        .checked_add(1)
        .ok_or(ModelError::IndexOutOfRange(index))?;
    if len > slots.len() {
        slots
            .try_reserve(len - slots.len())
            .map_err(|_| ModelError::IndexOutOfRange(index))?;
        slots.resize(len, None);
    }
    Ok(())
}

fn model_id(model: &Value) -> Result<Value> {
    match model {
        Value::Entity(entity) => entity.id(),
        Value::Object(map) => Ok(map.get("id").cloned().unwrap_or_default()),
        _ => Ok(Value::Undefined),
    }
}

fn position(slots: &[Option<Entity>], entity: &Entity) -> Option<usize> {
    slots
        .iter()
        .position(|slot| slot.as_ref().is_some_and(|e| e.ptr_eq(entity)))
}

/// Events describing how `previous` became `current`: sorts and removes in
/// snapshot order, then adds in contents order.
pub(crate) fn diff(previous: &[Option<Entity>], current: &[Option<Entity>]) -> Vec<Event> {
    let mut events = Vec::new();
    for (j, slot) in previous.iter().enumerate() {
        let Some(entity) = slot else { continue };
        match position(current, entity) {
            None => events.push(Event::remove(entity.clone())),
            Some(_) => {
                let moved = current
                    .get(j)
                    .is_some_and(|now| !now.as_ref().is_some_and(|e| e.ptr_eq(entity)));
                if moved {
                    events.push(Event::sort(entity.clone(), j));
                }
            }
        }
    }
    for entity in current.iter().flatten() {
        if position(previous, entity).is_none() {
            events.push(Event::add(entity.clone()));
        }
    }
    events
}

struct Suspend<'a>(&'a Cell<usize>);

impl<'a> Suspend<'a> {
    fn new(counter: &'a Cell<usize>) -> Self {
        counter.set(counter.get() + 1);
        Suspend(counter)
    }
}

impl Drop for Suspend<'_> {
    fn drop(&mut self) {
        self.0.set(self.0.get().saturating_sub(1));
    }
}

impl EventTarget for ObservableList {
    fn event_bus(&self) -> &EventBus {
        &self.inner.bus
    }

    fn as_target(&self) -> Target {
        Target::List(self.clone())
    }

    /// Mutations inside `callback` are reconciled once, after it succeeds,
    /// and the resulting events are delivered together with any other
    /// events the callback dispatched.
    fn transaction<T, E, F>(&self, callback: F) -> std::result::Result<T, E>
    where
        F: FnOnce() -> std::result::Result<T, E>,
        Self: Sized,
    {
        self.event_bus().batch(|| {
            let result = {
                let _suspended = Suspend::new(&self.inner.suspended);
                callback()
            };
            if result.is_ok() {
                self.reconcile();
            }
            result
        })
    }
}

impl PartialEq for ObservableList {
    fn eq(&self, other: &Self) -> bool {
        self.ptr_eq(other)
    }
}

impl fmt::Debug for ObservableList {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(self.inner.elements.borrow().iter()).finish()
    }
}

impl Serialize for ObservableList {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        let slots = self.to_vec();
        let mut seq = serializer.serialize_seq(Some(slots.len()))?;
        for slot in &slots {
            seq.serialize_element(slot)?;
        }
        seq.end()
    }
}
