//! Listener registry, polymorphic dispatch and transactional batching.
//!
//! Every entity and list owns an [`EventBus`]. The [`EventTarget`] trait
//! gives them a shared surface:
//!
//! ```text
//! add_event_listener(categories, listener)
//!     │
//!     ▼
//! registry: [(Category, [Listener, ...]), ...]      insertion ordered
//!     │
//! dispatch_event(event) ──► open transaction? ──yes──► queue
//!     │ no
//!     ▼
//! listeners whose category the event satisfies, each invoked once
//! ```
//!
//! # Invariants
//!
//! 1. A listener fires at most once per dispatch, even when it matches
//!    several registered categories.
//! 2. Listeners fire in registration order.
//! 3. Removing a listener while a dispatch is running does not affect the
//!    pass already in progress.
//! 4. Events dispatched inside a transaction are delivered, in order, only
//!    after the outermost transaction succeeds; a failing transaction
//!    delivers none of the events it queued.

use std::cell::{Cell, RefCell};
use std::collections::HashMap;
use std::fmt;
use std::rc::{Rc, Weak};

use tracing::{debug, trace, warn};

use crate::config::settings;
use crate::entity::{Entity, WeakEntity};
use crate::error::{ModelError, Result};
use crate::event::{Category, Event};
use crate::list::{ObservableList, WeakList};

/// An event callback. Identity is the identity of the handle, so clones of
/// one listener register and unregister as the same listener.
#[derive(Clone)]
pub struct Listener {
    callback: Rc<dyn Fn(&Event)>,
}

impl Listener {
    pub fn new(callback: impl Fn(&Event) + 'static) -> Self {
        Self {
            callback: Rc::new(callback),
        }
    }

    pub fn ptr_eq(&self, other: &Listener) -> bool {
        std::ptr::eq(
            Rc::as_ptr(&self.callback) as *const (),
            Rc::as_ptr(&other.callback) as *const (),
        )
    }

    fn call(&self, event: &Event) {
        (self.callback)(event)
    }
}

impl PartialEq for Listener {
    fn eq(&self, other: &Self) -> bool {
        self.ptr_eq(other)
    }
}

impl fmt::Debug for Listener {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Listener({:p})", Rc::as_ptr(&self.callback) as *const ())
    }
}

#[derive(Default)]
struct BusInner {
    listeners: RefCell<Vec<(&'static Category, Vec<Listener>)>>,
    /// Open while a transaction runs.
    queue: RefCell<Option<Vec<Event>>>,
    depth: Cell<usize>,
    /// Dispatches of this bus currently on the stack.
    reentry: Cell<usize>,
    /// Forwarding listeners installed by propagating attributes, keyed by
    /// attribute and stage.
    forwarders: RefCell<HashMap<String, Listener>>,
}

/// Per-object listener registry. Cloning yields another handle to the same
/// registry.
#[derive(Clone, Default)]
pub struct EventBus {
    inner: Rc<BusInner>,
}

#[derive(Clone)]
pub struct WeakBus(Weak<BusInner>);

impl WeakBus {
    pub fn upgrade(&self) -> Option<EventBus> {
        self.0.upgrade().map(|inner| EventBus { inner })
    }
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn ptr_eq(&self, other: &EventBus) -> bool {
        Rc::ptr_eq(&self.inner, &other.inner)
    }

    pub fn downgrade(&self) -> WeakBus {
        WeakBus(Rc::downgrade(&self.inner))
    }

    /// Register `listener` for each category. Registering the same listener
    /// twice for one category has no further effect.
    pub fn subscribe(&self, categories: &[&'static Category], listener: &Listener) -> Result<()> {
        if categories.is_empty() {
            return Err(ModelError::Configuration(
                "Expected at least one event category for listener".to_string(),
            ));
        }
        let mut registry = self.inner.listeners.borrow_mut();
        for &category in categories {
            match registry
                .iter_mut()
                .find(|(registered, _)| std::ptr::eq(*registered, category))
            {
                Some((_, listeners)) => {
                    if !listeners.iter().any(|l| l.ptr_eq(listener)) {
                        listeners.push(listener.clone());
                    }
                }
                None => registry.push((category, vec![listener.clone()])),
            }
        }
        Ok(())
    }

    /// Remove `listener` from the given categories, or from every category
    /// when `categories` is empty.
    pub fn unsubscribe(&self, categories: &[&'static Category], listener: &Listener) {
        let mut registry = self.inner.listeners.borrow_mut();
        for (registered, listeners) in registry.iter_mut() {
            if categories.is_empty() || categories.iter().any(|c| std::ptr::eq(*c, *registered)) {
                listeners.retain(|l| !l.ptr_eq(listener));
            }
        }
    }

    /// Number of listeners registered for exactly `category`.
    pub fn listener_count(&self, category: &Category) -> usize {
        self.inner
            .listeners
            .borrow()
            .iter()
            .find(|(registered, _)| std::ptr::eq(*registered, category))
            .map_or(0, |(_, listeners)| listeners.len())
    }

    /// Whether a transaction is currently open on this bus.
    pub fn is_batching(&self) -> bool {
        self.inner.depth.get() > 0
    }

    /// Dispatch `event`, setting its target with `this` when unset. Inside a
    /// transaction the event is queued instead.
    pub fn dispatch(&self, this: impl FnOnce() -> Target, mut event: Event) {
        if event.target().is_none() {
            event.set_target(this());
        }
        if let Some(queue) = self.inner.queue.borrow_mut().as_mut() {
            trace!(category = event.category().name(), "event queued");
            queue.push(event);
            return;
        }
        self.deliver(&event);
    }

    fn deliver(&self, event: &Event) {
        let listeners = self.matching(event.category());
        if listeners.is_empty() {
            return;
        }
        let limit = settings().max_dispatch_depth;
        let Some(_depth) = DepthGuard::enter(&self.inner.reentry, limit) else {
            warn!(
                category = event.category().name(),
                limit, "dispatch depth limit reached, dropping event"
            );
            return;
        };
        trace!(
            category = event.category().name(),
            listeners = listeners.len(),
            "dispatching event"
        );
        for listener in &listeners {
            listener.call(event);
        }
    }

    fn matching(&self, category: &'static Category) -> Vec<Listener> {
        let registry = self.inner.listeners.borrow();
        let mut matched: Vec<Listener> = Vec::new();
        for (registered, listeners) in registry.iter() {
            if !category.is_a(registered) {
                continue;
            }
            for listener in listeners {
                if !matched.iter().any(|m| m.ptr_eq(listener)) {
                    matched.push(listener.clone());
                }
            }
        }
        matched
    }

    /// Run `callback` with dispatch deferred. Queued events are delivered in
    /// capture order once the outermost transaction succeeds.
    ///
    /// Nested transactions extend the open queue; when one fails only the
    /// events it queued are dropped.
    pub fn batch<T, E>(&self, callback: impl FnOnce() -> std::result::Result<T, E>) -> std::result::Result<T, E> {
        let batch = Batch::open(&self.inner);
        let result = callback();
        let events = batch.close(result.is_ok());
        if !events.is_empty() {
            debug!(events = events.len(), "flushing transaction");
            for event in &events {
                self.deliver(event);
            }
        }
        result
    }

    pub(crate) fn forwarder(&self, key: &str, make: impl FnOnce() -> Listener) -> Listener {
        self.inner
            .forwarders
            .borrow_mut()
            .entry(key.to_string())
            .or_insert_with(make)
            .clone()
    }
}

impl fmt::Debug for EventBus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventBus")
            .field("categories", &self.inner.listeners.borrow().len())
            .field("batching", &self.is_batching())
            .finish()
    }
}

/// An open transaction scope. Dropping it without [`Batch::close`] (a panic
/// in the callback) discards what the scope queued.
struct Batch<'a> {
    bus: &'a BusInner,
    mark: usize,
    closed: bool,
}

impl<'a> Batch<'a> {
    fn open(bus: &'a BusInner) -> Self {
        bus.depth.set(bus.depth.get() + 1);
        let mark = bus.queue.borrow_mut().get_or_insert_with(Vec::new).len();
        Self {
            bus,
            mark,
            closed: false,
        }
    }

    /// Close the scope, returning the events to deliver now.
    fn close(mut self, committed: bool) -> Vec<Event> {
        self.closed = true;
        self.finish(committed)
    }

    fn finish(&self, committed: bool) -> Vec<Event> {
        let depth = self.bus.depth.get().saturating_sub(1);
        self.bus.depth.set(depth);
        let mut queue = self.bus.queue.borrow_mut();
        if !committed {
            if let Some(events) = queue.as_mut() {
                let discarded = events.len().saturating_sub(self.mark);
                if discarded > 0 {
                    debug!(discarded, "transaction failed, discarding queued events");
                }
                events.truncate(self.mark);
            }
        }
        if depth == 0 {
            queue.take().unwrap_or_default()
        } else {
            Vec::new()
        }
    }
}

impl Drop for Batch<'_> {
    fn drop(&mut self) {
        if !self.closed {
            self.finish(false);
        }
    }
}

/// Bounds how often one bus re-enters its own dispatch. Forwarding into
/// other buses does not count.
struct DepthGuard<'a>(&'a Cell<usize>);

impl<'a> DepthGuard<'a> {
    fn enter(depth: &'a Cell<usize>, limit: usize) -> Option<Self> {
        let current = depth.get();
        if current >= limit {
            return None;
        }
        depth.set(current + 1);
        Some(DepthGuard(depth))
    }
}

impl Drop for DepthGuard<'_> {
    fn drop(&mut self) {
        self.0.set(self.0.get().saturating_sub(1));
    }
}

/// Anything that can dispatch events: a bare bus, an entity, or a list.
#[derive(Clone)]
pub enum Target {
    Bus(EventBus),
    Entity(Entity),
    List(ObservableList),
}

impl Target {
    pub fn downgrade(&self) -> WeakTarget {
        match self {
            Target::Bus(bus) => WeakTarget::Bus(bus.downgrade()),
            Target::Entity(entity) => WeakTarget::Entity(entity.downgrade()),
            Target::List(list) => WeakTarget::List(list.downgrade()),
        }
    }

    pub fn as_entity(&self) -> Option<&Entity> {
        match self {
            Target::Entity(entity) => Some(entity),
            _ => None,
        }
    }

    pub fn as_list(&self) -> Option<&ObservableList> {
        match self {
            Target::List(list) => Some(list),
            _ => None,
        }
    }
}

impl PartialEq for Target {
    fn eq(&self, other: &Self) -> bool {
        self.event_bus().ptr_eq(other.event_bus())
    }
}

impl fmt::Debug for Target {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Target::Bus(bus) => bus.fmt(f),
            Target::Entity(entity) => entity.fmt(f),
            Target::List(list) => list.fmt(f),
        }
    }
}

impl From<EventBus> for Target {
    fn from(bus: EventBus) -> Self {
        Target::Bus(bus)
    }
}

impl From<Entity> for Target {
    fn from(entity: Entity) -> Self {
        Target::Entity(entity)
    }
}

impl From<ObservableList> for Target {
    fn from(list: ObservableList) -> Self {
        Target::List(list)
    }
}

#[derive(Clone)]
pub enum WeakTarget {
    Bus(WeakBus),
    Entity(WeakEntity),
    List(WeakList),
}

impl WeakTarget {
    pub fn upgrade(&self) -> Option<Target> {
        match self {
            WeakTarget::Bus(bus) => bus.upgrade().map(Target::Bus),
            WeakTarget::Entity(entity) => entity.upgrade().map(Target::Entity),
            WeakTarget::List(list) => list.upgrade().map(Target::List),
        }
    }
}

/// The event API shared by buses, entities and lists.
pub trait EventTarget {
    fn event_bus(&self) -> &EventBus;

    fn as_target(&self) -> Target;

    fn add_event_listener(&self, categories: &[&'static Category], listener: &Listener) -> Result<()> {
        self.event_bus().subscribe(categories, listener)
    }

    /// An empty `categories` slice removes the listener everywhere.
    fn remove_event_listener(&self, categories: &[&'static Category], listener: &Listener) {
        self.event_bus().unsubscribe(categories, listener)
    }

    fn dispatch_event(&self, event: Event) {
        self.event_bus().dispatch(|| self.as_target(), event)
    }

    fn transaction<T, E, F>(&self, callback: F) -> std::result::Result<T, E>
    where
        F: FnOnce() -> std::result::Result<T, E>,
        Self: Sized,
    {
        self.event_bus().batch(callback)
    }
}

impl EventTarget for EventBus {
    fn event_bus(&self) -> &EventBus {
        self
    }

    fn as_target(&self) -> Target {
        Target::Bus(self.clone())
    }
}

impl EventTarget for Target {
    fn event_bus(&self) -> &EventBus {
        match self {
            Target::Bus(bus) => bus,
            Target::Entity(entity) => entity.event_bus(),
            Target::List(list) => list.event_bus(),
        }
    }

    fn as_target(&self) -> Target {
        self.clone()
    }

    fn transaction<T, E, F>(&self, callback: F) -> std::result::Result<T, E>
    where
        F: FnOnce() -> std::result::Result<T, E>,
        Self: Sized,
    {
        match self {
            Target::List(list) => list.transaction(callback),
            other => other.event_bus().batch(callback),
        }
    }
}
