use std::cell::RefCell;
use std::rc::Rc;

use crate::bus::{EventTarget, Listener};
use crate::entity::Entity;
use crate::event::{Category, Event};
use crate::value::Value;

/// Captures every event delivered to the categories it is attached to.
#[derive(Clone)]
pub struct EventRecorder {
    events: Rc<RefCell<Vec<Event>>>,
    listener: Listener,
}

impl EventRecorder {
    pub fn attach(target: &impl EventTarget, categories: &[&'static Category]) -> Self {
        let events = Rc::new(RefCell::new(Vec::new()));
        let listener = {
            let events = Rc::clone(&events);
            Listener::new(move |event: &Event| events.borrow_mut().push(event.clone()))
        };
        target
            .add_event_listener(categories, &listener)
            .expect("failed to attach event recorder");
        Self { events, listener }
    }

    pub fn listener(&self) -> &Listener {
        &self.listener
    }

    pub fn events(&self) -> Vec<Event> {
        self.events.borrow().clone()
    }

    pub fn len(&self) -> usize {
        self.events.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.borrow().is_empty()
    }

    /// Keys of the recorded change events.
    pub fn keys(&self) -> Vec<String> {
        self.events
            .borrow()
            .iter()
            .filter_map(|event| event.key().map(str::to_string))
            .collect()
    }

    pub fn categories(&self) -> Vec<&'static str> {
        self.events
            .borrow()
            .iter()
            .map(|event| event.category().name())
            .collect()
    }

    pub fn clear(&self) {
        self.events.borrow_mut().clear();
    }
}

/// `n` distinct base entities with no attributes or properties.
pub fn entities(n: usize) -> Vec<Entity> {
    (0..n)
        .map(|_| Entity::new(Value::Undefined).expect("base entity"))
        .collect()
}
