//! Observable entities.
//!
//! An [`Entity`] is an instance of an [`EntityType`]: per-instance storage for
//! the type's flattened attributes, a bag of plain properties for anything
//! undeclared, and its own [`EventBus`].
//!
//! ## Lifecycle
//!
//! ```text
//! Constructing ──► Initializing ──► Ready
//!  required check    defaults,        change events
//!  constants seeded  initials and     dispatched on
//!                    properties       real changes
//!                    written
//! ```
//!
//! Change events are never dispatched before `Ready`, and constant
//! attributes are written exactly once, while `Constructing`.

use std::cell::{Cell, RefCell};
use std::collections::HashMap;
use std::fmt;
use std::rc::{Rc, Weak};
use std::sync::atomic::{AtomicU64, Ordering};

use serde::ser::{Error as _, Serialize, SerializeMap, Serializer};

use crate::attributes::{Attribute, EntityType, RuleContext};
use crate::bus::{EventBus, EventTarget, Target};
use crate::config::settings;
use crate::error::{ModelError, Result};
use crate::event::Event;
use crate::value::{Object, Value};

static NEXT_ID: AtomicU64 = AtomicU64::new(1);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntityState {
    Constructing,
    Initializing,
    Ready,
}

struct EntityInner {
    unique_id: String,
    ty: EntityType,
    bus: EventBus,
    state: Cell<EntityState>,
    /// Raw attribute values, as returned by the write stages.
    storage: RefCell<HashMap<String, Value>>,
    properties: RefCell<Object>,
}

/// Handle to an observable entity. Clones share the same instance.
#[derive(Clone)]
pub struct Entity {
    inner: Rc<EntityInner>,
}

#[derive(Clone)]
pub struct WeakEntity(Weak<EntityInner>);

impl WeakEntity {
    pub fn upgrade(&self) -> Option<Entity> {
        self.0.upgrade().map(|inner| Entity { inner })
    }
}

impl Entity {
    /// An instance of [`EntityType::base`]; every initial becomes a plain
    /// property.
    pub fn new(initials: impl Into<Value>) -> Result<Entity> {
        EntityType::base().create(initials)
    }

    pub(crate) fn construct(ty: &EntityType, initials: Value) -> Result<Entity> {
        let mut initials = initial_values(initials)?;
        let entity = Entity {
            inner: Rc::new(EntityInner {
                unique_id: format!(
                    "{}{}",
                    settings().id_prefix,
                    NEXT_ID.fetch_add(1, Ordering::Relaxed)
                ),
                ty: ty.clone(),
                bus: EventBus::new(),
                state: Cell::new(EntityState::Constructing),
                storage: RefCell::new(HashMap::with_capacity(ty.attributes().len())),
                properties: RefCell::default(),
            }),
        };

        for attr in ty.attributes() {
            let pending = initials
                .get(attr.name())
                .cloned()
                .unwrap_or_else(|| attr.default().clone());
            if attr.is_required() && pending.is_undefined() {
                return Err(ModelError::RequiredAttribute {
                    path: attr.path().to_string(),
                });
            }
            if attr.is_constant() {
                if !initials.contains_key(attr.name()) && attr.default().is_undefined() {
                    return Err(ModelError::Configuration(format!(
                        "Uninitialized constant attribute {}",
                        attr.path()
                    )));
                }
                initials.remove(attr.name());
                entity.write_attribute(attr, pending)?;
            }
        }

        entity.inner.state.set(EntityState::Initializing);
        let writable = || ty.attributes().iter().filter(|attr| !attr.is_constant());
        for attr in writable() {
            if !initials.contains_key(attr.name()) && !attr.default().is_undefined() {
                entity.write_attribute(attr, attr.default().clone())?;
            }
        }
        for attr in writable() {
            if let Some(value) = initials.remove(attr.name()) {
                entity.write_attribute(attr, value)?;
            }
        }
        entity.inner.properties.borrow_mut().extend(initials);
        entity.inner.state.set(EntityState::Ready);

        Ok(entity)
    }

    /// Process-unique identifier assigned at construction.
    pub fn unique_id(&self) -> &str {
        &self.inner.unique_id
    }

    /// Current value of the `id` attribute or property.
    pub fn id(&self) -> Result<Value> {
        self.get("id")
    }

    pub fn entity_type(&self) -> &EntityType {
        &self.inner.ty
    }

    pub fn state(&self) -> EntityState {
        self.inner.state.get()
    }

    pub fn is_instance_of(&self, ty: &EntityType) -> bool {
        self.inner.ty.is_subtype_of(ty)
    }

    /// Read an attribute through its read stages, or a plain property.
    /// Unknown names read `Undefined`.
    pub fn get(&self, name: &str) -> Result<Value> {
        match self.inner.ty.attribute(name) {
            Some(attr) => self.read_attribute(attr),
            None => Ok(self
                .inner
                .properties
                .borrow()
                .get(name)
                .cloned()
                .unwrap_or_default()),
        }
    }

    /// Write an attribute through its write stages, or set a plain property.
    /// Constant attributes cannot be written, and writing `Undefined` to an
    /// attribute restores its default.
    pub fn set(&self, name: &str, value: impl Into<Value>) -> Result<()> {
        match self.inner.ty.attribute(name) {
            Some(attr) if attr.is_constant() => Err(ModelError::ReadOnlyAttribute {
                path: attr.path().to_string(),
            }),
            Some(attr) => self.write_attribute(attr, value.into()),
            None => {
                self.inner
                    .properties
                    .borrow_mut()
                    .insert(name.to_string(), value.into());
                Ok(())
            }
        }
    }

    /// Stored value of an attribute, bypassing read stages.
    pub fn raw(&self, name: &str) -> Value {
        self.inner
            .storage
            .borrow()
            .get(name)
            .cloned()
            .unwrap_or_default()
    }

    /// Names of the plain properties, in key order.
    pub fn property_names(&self) -> Vec<String> {
        self.inner.properties.borrow().keys().cloned().collect()
    }

    /// Deep merge `source` (an object or another entity) into this entity
    /// within one transaction.
    ///
    /// Keys whose current value is an entity or a list are merged into that
    /// value. Declared attributes are written through their accessors. Plain
    /// properties that change are assigned and announced with a change
    /// event.
    pub fn update(&self, source: impl Into<Value>) -> Result<()> {
        let source = initial_values(source.into())?;
        self.transaction(|| {
            for (key, incoming) in source {
                let current = self.get(&key)?;
                match &current {
                    Value::Entity(nested) => nested.update(incoming)?,
                    Value::List(nested) => nested.update(incoming)?,
                    _ => self.assign(&key, &current, incoming)?,
                }
            }
            Ok(())
        })
    }

    fn assign(&self, key: &str, current: &Value, incoming: Value) -> Result<()> {
        match self.inner.ty.attribute(key) {
            Some(attr) if attr.is_constant() => {
                if current.is_same(&incoming) {
                    Ok(())
                } else {
                    Err(ModelError::ReadOnlyAttribute {
                        path: attr.path().to_string(),
                    })
                }
            }
            Some(attr) => self.write_attribute(attr, incoming),
            None => {
                if current.is_same(&incoming) {
                    return Ok(());
                }
                self.inner
                    .properties
                    .borrow_mut()
                    .insert(key.to_string(), incoming);
                self.dispatch_event(Event::change(key));
                Ok(())
            }
        }
    }

    /// Serializable attributes and plain properties, as read by a caller.
    pub fn to_object(&self) -> Result<Object> {
        let mut out = Object::new();
        for attr in self.inner.ty.attributes() {
            if attr.is_serializable() {
                let value = self.read_attribute(attr)?;
                if !value.is_undefined() {
                    out.insert(attr.name().to_string(), value);
                }
            }
        }
        for (key, value) in self.inner.properties.borrow().iter() {
            if !value.is_undefined() {
                out.insert(key.clone(), value.clone());
            }
        }
        Ok(out)
    }

    pub fn to_json(&self) -> Result<serde_json::Value> {
        serde_json::to_value(self).map_err(|e| ModelError::rule(e.to_string()))
    }

    pub fn ptr_eq(&self, other: &Entity) -> bool {
        Rc::ptr_eq(&self.inner, &other.inner)
    }

    pub fn downgrade(&self) -> WeakEntity {
        WeakEntity(Rc::downgrade(&self.inner))
    }

    fn read_attribute(&self, attr: &Attribute) -> Result<Value> {
        let raw = self.raw(attr.name());
        let owner = self.as_target();
        let ctx = RuleContext::new(&owner, attr.name());
        attr.chain()
            .get(&ctx, raw)
            .map_err(|source| ModelError::Get {
                path: attr.path().to_string(),
                source: Box::new(source),
            })
    }

    /// Writing `Undefined` writes the attribute's default instead.
    fn write_attribute(&self, attr: &Attribute, value: Value) -> Result<()> {
        let value = match value {
            Value::Undefined => attr.default().clone(),
            value => value,
        };
        let previous = self.raw(attr.name());
        let owner = self.as_target();
        let ctx = RuleContext::new(&owner, attr.name());
        let failed = |source| ModelError::Set {
            path: attr.path().to_string(),
            source: Box::new(source),
        };
        let next = attr.chain().set(&ctx, value, &previous).map_err(failed)?;
        if next.is_same(&previous) {
            return Ok(());
        }
        self.inner
            .storage
            .borrow_mut()
            .insert(attr.name().to_string(), next);
        ctx.commit().map_err(failed)?;
        if self.state() == EntityState::Ready {
            self.dispatch_event(Event::change(attr.name()));
        }
        Ok(())
    }
}

/// Key/value pairs contributed by an initials or update source.
fn initial_values(source: Value) -> Result<Object> {
    match source {
        Value::Object(map) => Ok(map),
        Value::Entity(entity) => entity.to_object(),
        _ => Ok(Object::new()),
    }
}

impl EventTarget for Entity {
    fn event_bus(&self) -> &EventBus {
        &self.inner.bus
    }

    fn as_target(&self) -> Target {
        Target::Entity(self.clone())
    }
}

impl PartialEq for Entity {
    fn eq(&self, other: &Self) -> bool {
        self.ptr_eq(other)
    }
}

impl fmt::Debug for Entity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}({})", self.inner.ty.name(), self.inner.unique_id)
    }
}

impl Serialize for Entity {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        let values = self.to_object().map_err(S::Error::custom)?;
        let mut map = serializer.serialize_map(Some(values.len()))?;
        for attr in self.inner.ty.attributes() {
            if let Some(value) = values.get(attr.name()) {
                map.serialize_entry(attr.name(), value)?;
            }
        }
        for (key, value) in &values {
            if !self.inner.ty.has_attribute(key) {
                map.serialize_entry(key, value)?;
            }
        }
        map.end()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::attributes::{Rule, RuleChain};
    use crate::event::{CHANGE, MUTATION};
    use crate::test_utils::EventRecorder;
    use serde_json::json;

    fn abc() -> EntityType {
        EntityType::builder("ModelA")
            .value("a", 1)
            .value("b", 2)
            .value("c", 3)
            .build()
            .unwrap()
    }

    #[test]
    fn accepts_initial_values() {
        let ty = EntityType::builder("ModelA")
            .attribute("foo", RuleChain::new())
            .build()
            .unwrap();
        let entity = ty.create(json!({"foo": 123})).unwrap();
        assert_eq!(entity.get("foo").unwrap(), Value::Int(123));
        assert_eq!(entity.state(), EntityState::Ready);
    }

    #[test]
    fn defaults_are_overridden_by_initials() {
        let ty = abc();
        let plain = ty.create(Value::Undefined).unwrap();
        assert_eq!(plain.get("a").unwrap(), Value::Int(1));

        let seeded = ty.create(json!({"a": 10, "extra": "x"})).unwrap();
        assert_eq!(seeded.get("a").unwrap(), Value::Int(10));
        assert_eq!(seeded.get("extra").unwrap(), Value::from("x"));
        assert_eq!(seeded.property_names(), vec!["extra".to_string()]);
    }

    #[test]
    fn attributes_are_per_instance() {
        let ty = abc();
        let first = ty.create(Value::Undefined).unwrap();
        let second = ty.create(Value::Undefined).unwrap();
        first.set("a", 100).unwrap();
        assert_eq!(second.get("a").unwrap(), Value::Int(1));
        assert_ne!(first.unique_id(), second.unique_id());
    }

    #[test]
    fn unique_ids_use_prefix_and_counter() {
        let entity = Entity::new(Value::Undefined).unwrap();
        let prefix = &settings().id_prefix;
        let n: u64 = entity.unique_id()[prefix.len()..].parse().unwrap();
        assert!(n >= 1);
    }

    #[test]
    fn required_attribute_must_resolve() {
        let ty = EntityType::builder("ModelA")
            .attribute("foo", RuleChain::new().is_required())
            .build()
            .unwrap();
        let err = ty.create(Value::Undefined).unwrap_err();
        assert_eq!(err.to_string(), "Required attribute ModelA[foo] cannot be undefined");
        assert!(ty.create(json!({"foo": 0})).is_ok());
    }

    #[test]
    fn constant_attribute_is_read_only() {
        let ty = EntityType::builder("ModelA")
            .attribute("foo", RuleChain::new().is_constant().default_value(123))
            .build()
            .unwrap();
        let entity = ty.create(Value::Undefined).unwrap();
        assert_eq!(entity.get("foo").unwrap(), Value::Int(123));
        assert!(matches!(
            entity.set("foo", 345),
            Err(ModelError::ReadOnlyAttribute { ref path }) if path == "ModelA[foo]"
        ));
    }

    #[test]
    fn constant_attribute_needs_a_value() {
        let ty = EntityType::builder("ModelA")
            .attribute("foo", RuleChain::new().is_constant())
            .build()
            .unwrap();
        let err = ty.create(Value::Undefined).unwrap_err();
        assert_eq!(err.to_string(), "Uninitialized constant attribute ModelA[foo]");
        let entity = ty.create(json!({"foo": 123})).unwrap();
        assert_eq!(entity.get("foo").unwrap(), Value::Int(123));
    }

    #[test]
    fn id_reads_through_getter() {
        assert!(Entity::new(Value::Undefined).unwrap().id().unwrap().is_undefined());
        assert_eq!(
            Entity::new(json!({"id": "abc"})).unwrap().id().unwrap(),
            Value::from("abc")
        );

        let ty = EntityType::builder("ModelA")
            .attribute(
                "id",
                Rule::new()
                    .read(|v| Ok(Value::Int(v.as_i64().unwrap_or(0) * 2)))
                    .constant(true)
                    .default_value(111),
            )
            .build()
            .unwrap();
        assert_eq!(ty.create(Value::Undefined).unwrap().id().unwrap(), Value::Int(222));
    }

    #[test]
    fn change_events_only_after_construction() {
        let seen = Rc::new(RefCell::new(Vec::new()));
        let ty = EntityType::builder("ModelA")
            .attribute(
                "foo",
                Rule::new().write({
                    let seen = Rc::clone(&seen);
                    move |v, _| {
                        seen.borrow_mut().push(v.clone());
                        Ok(v)
                    }
                }),
            )
            .build()
            .unwrap();
        let entity = ty.create(json!({"foo": 1})).unwrap();
        let recorder = EventRecorder::attach(&entity, &[&CHANGE]);
        assert_eq!(*seen.borrow(), vec![Value::Int(1)]);

        entity.set("foo", 1).unwrap();
        assert!(recorder.is_empty());

        entity.set("foo", 2).unwrap();
        assert_eq!(recorder.keys(), vec!["foo"]);
        assert_eq!(
            recorder.events()[0].target(),
            Some(&Target::Entity(entity.clone()))
        );
    }

    #[test]
    fn plain_property_set_is_silent() {
        let entity = Entity::new(Value::Undefined).unwrap();
        let recorder = EventRecorder::attach(&entity, &[&MUTATION]);
        entity.set("foo", 1).unwrap();
        assert_eq!(entity.get("foo").unwrap(), Value::Int(1));
        assert!(recorder.is_empty());
    }

    #[test]
    fn accessor_errors_name_the_attribute() {
        let ty = EntityType::builder("ModelA")
            .attribute(
                "foo",
                Rule::new()
                    .read(|_| Err(ModelError::rule("Expected error")))
                    .write(|v, _| {
                        if v.is_undefined() {
                            Ok(v)
                        } else {
                            Err(ModelError::rule("Expected error"))
                        }
                    }),
            )
            .build()
            .unwrap();
        let entity = ty.create(Value::Undefined).unwrap();
        assert_eq!(
            entity.get("foo").unwrap_err().to_string(),
            "Get of attribute ModelA[foo] failed\nExpected error"
        );
        assert_eq!(
            entity.set("foo", 1).unwrap_err().to_string(),
            "Set of attribute ModelA[foo] failed\nExpected error"
        );
    }

    #[test]
    fn inherited_attributes_are_bound_to_most_derived_declaration() {
        let a = abc();
        let b = EntityType::builder("ModelB")
            .extends(&a)
            .value("a", "derived")
            .value("d", 4)
            .build()
            .unwrap();
        let entity = b.create(Value::Undefined).unwrap();
        assert_eq!(entity.get("a").unwrap(), Value::from("derived"));
        assert_eq!(entity.get("b").unwrap(), Value::Int(2));
        assert!(entity.is_instance_of(&a));
        assert!(entity.is_instance_of(&EntityType::base()));
        assert!(!a.create(Value::Undefined).unwrap().is_instance_of(&b));
    }

    #[test]
    fn serializes_serializable_attributes_then_properties() {
        let ty = EntityType::builder("ModelA")
            .attribute("a", RuleChain::new())
            .value("b", "abc")
            .attribute("c", RuleChain::new().is_constant().default_value(123))
            .attribute("d", RuleChain::new().is_required())
            .attribute(
                "e",
                Rule::new()
                    .serializable(false)
                    .required(true)
                    .default_value("test"),
            )
            .build()
            .unwrap();
        let entity = ty.create(json!({"a": "holly", "d": "dolly", "z": true})).unwrap();
        assert_eq!(entity.get("e").unwrap(), Value::from("test"));
        assert_eq!(
            entity.to_json().unwrap(),
            json!({"a": "holly", "b": "abc", "c": 123, "d": "dolly", "z": true})
        );
    }

    #[test]
    fn update_fires_for_plain_properties() {
        let entity = Entity::new(Value::Undefined).unwrap();
        let observed = Rc::new(RefCell::new(Vec::new()));
        let listener = {
            let entity = entity.downgrade();
            let observed = Rc::clone(&observed);
            crate::bus::Listener::new(move |event| {
                let value = entity.upgrade().and_then(|e| e.get("foo").ok());
                observed
                    .borrow_mut()
                    .push((event.key().map(str::to_string), value));
            })
        };
        entity.add_event_listener(&[&CHANGE], &listener).unwrap();

        entity.update(json!({"foo": 123})).unwrap();
        entity.update(json!({"foo": 123})).unwrap();
        assert_eq!(
            *observed.borrow(),
            vec![(Some("foo".to_string()), Some(Value::Int(123)))]
        );
    }

    #[test]
    fn update_merges_into_nested_entities() {
        let inner = EntityType::builder("ModelA")
            .attribute(
                "my_attr",
                Rule::new().read(|v| {
                    Ok(match v.as_str() {
                        Some(s) => Value::from(format!("__{}", s)),
                        None => v,
                    })
                }),
            )
            .build()
            .unwrap();
        let nested = inner.create(Value::Undefined).unwrap();
        let entity = Entity::new(Value::object([
            ("b", Value::from("abc")),
            ("c", Value::Entity(nested.clone())),
        ]))
        .unwrap();

        entity
            .update(json!({"b": "replaced", "c": {"my_attr": "suffix"}}))
            .unwrap();

        assert!(entity.get("c").unwrap().is_same(&Value::Entity(nested.clone())));
        assert_eq!(
            entity.to_json().unwrap(),
            json!({"b": "replaced", "c": {"my_attr": "__suffix"}})
        );
    }

    #[test]
    fn update_rejects_changing_constants() {
        let ty = EntityType::builder("ModelA")
            .attribute("id", RuleChain::new().is_constant())
            .build()
            .unwrap();
        let entity = ty.create(json!({"id": 7})).unwrap();
        entity.update(json!({"id": 7})).unwrap();
        assert!(matches!(
            entity.update(json!({"id": 8})),
            Err(ModelError::ReadOnlyAttribute { .. })
        ));
    }

    #[test]
    fn failed_update_delivers_no_events() {
        let ty = EntityType::builder("ModelA")
            .attribute("n", RuleChain::new().assert(Value::is_integer))
            .build()
            .unwrap();
        let entity = ty.create(Value::Undefined).unwrap();
        let recorder = EventRecorder::attach(&entity, &[&MUTATION]);
        let result = entity.update(json!({"extra": 1, "n": 1.5}));
        assert!(result.is_err());
        assert!(recorder.is_empty());
        assert_eq!(entity.get("extra").unwrap(), Value::Int(1));
    }

    #[test]
    fn initials_from_another_entity() {
        let source = Entity::new(json!({"a": 5, "q": "x"})).unwrap();
        let copy = abc().create(source).unwrap();
        assert_eq!(copy.get("a").unwrap(), Value::Int(5));
        assert_eq!(copy.get("q").unwrap(), Value::from("x"));
    }

    #[test]
    fn writing_undefined_restores_the_default() {
        let entity = EntityType::builder("ModelA")
            .value("a", 5)
            .build()
            .unwrap()
            .create(Value::Undefined)
            .unwrap();
        entity.set("a", 10).unwrap();
        let recorder = EventRecorder::attach(&entity, &[&CHANGE]);

        entity.set("a", Value::Undefined).unwrap();
        assert_eq!(entity.get("a").unwrap(), Value::Int(5));
        assert_eq!(recorder.keys(), vec!["a"]);

        entity.set("a", Value::Undefined).unwrap();
        assert_eq!(recorder.len(), 1);
    }

    #[test]
    fn undefined_initials_seed_the_default() {
        let ty = abc();
        let entity = ty
            .create(Value::object([("a", Value::Undefined), ("b", Value::Int(20))]))
            .unwrap();
        assert_eq!(entity.get("a").unwrap(), Value::Int(1));
        assert_eq!(entity.get("b").unwrap(), Value::Int(20));

        entity.update(Value::object([("b", Value::Undefined)])).unwrap();
        assert_eq!(entity.get("b").unwrap(), Value::Int(2));
    }

    #[test]
    fn undefined_initial_for_constant_uses_the_default() {
        let ty = EntityType::builder("ModelA")
            .attribute("kind", RuleChain::new().is_constant().default_value("plain"))
            .build()
            .unwrap();
        let entity = ty
            .create(Value::object([("kind", Value::Undefined)]))
            .unwrap();
        assert_eq!(entity.get("kind").unwrap(), Value::from("plain"));
    }
}
