//! Composable attribute rule chains.
//!
//! A [`RuleChain`] is an ordered list of [`Rule`] stages built once, when the
//! schema is declared. Each builder call returns a new chain that extends
//! its receiver, so a shared prefix can seed several attributes.
//!
//! ```text
//!  write:  value ─► stage 0 ─► stage 1 ─► ... ─► stored
//!  read:   stored ─► stage 0 ─► stage 1 ─► ... ─► value
//!  metadata (default, required, constant, serializable):
//!          last stage that defines it wins
//! ```

use std::cell::RefCell;
use std::fmt;
use std::rc::Rc;
use std::sync::atomic::{AtomicU64, Ordering};

use crate::attributes::schema::EntityType;
use crate::bus::{EventTarget, Listener, Target, WeakTarget};
use crate::error::{ModelError, Result};
use crate::event::{Category, MUTATION};
use crate::list::ListType;
use crate::value::Value;

static NEXT_STAGE: AtomicU64 = AtomicU64::new(1);

pub type ReadFn = Rc<dyn Fn(&RuleContext<'_>, Value) -> Result<Value>>;
pub type WriteFn = Rc<dyn Fn(&RuleContext<'_>, Value, &Value) -> Result<Value>>;

type Effect = Box<dyn FnOnce() -> Result<()>>;

/// Where a rule runs: the object owning the attribute, and its name.
///
/// Write stages may also register effects that only make sense once the
/// written value is stored. They run on [`RuleContext::commit`] and are
/// dropped with the context when the write fails.
pub struct RuleContext<'a> {
    owner: &'a Target,
    attribute: &'a str,
    effects: RefCell<Vec<Effect>>,
}

impl<'a> RuleContext<'a> {
    pub fn new(owner: &'a Target, attribute: &'a str) -> Self {
        Self {
            owner,
            attribute,
            effects: RefCell::default(),
        }
    }

    /// Run `effect` when the write is committed.
    pub fn on_commit(&self, effect: impl FnOnce() -> Result<()> + 'static) {
        self.effects.borrow_mut().push(Box::new(effect));
    }

    /// Run the registered effects in registration order.
    pub fn commit(&self) -> Result<()> {
        let effects = std::mem::take(&mut *self.effects.borrow_mut());
        effects.into_iter().try_for_each(|effect| effect())
    }

    pub fn owner(&self) -> &Target {
        self.owner
    }

    pub fn attribute(&self) -> &str {
        self.attribute
    }
}

/// One stage of a rule chain: optional transforms plus optional metadata.
///
/// A rule on its own is also a complete attribute rule set, equivalent to a
/// single-stage chain.
#[derive(Clone, Default)]
pub struct Rule {
    read: Option<ReadFn>,
    write: Option<WriteFn>,
    default: Option<Value>,
    required: Option<bool>,
    constant: Option<bool>,
    serializable: Option<bool>,
}

impl Rule {
    pub fn new() -> Self {
        Self::default()
    }

    /// Transform applied when the attribute is read.
    pub fn read(self, read: impl Fn(Value) -> Result<Value> + 'static) -> Self {
        self.read_with(move |_, value| read(value))
    }

    pub fn read_with(mut self, read: impl Fn(&RuleContext<'_>, Value) -> Result<Value> + 'static) -> Self {
        self.read = Some(Rc::new(read));
        self
    }

    /// Transform applied when the attribute is written; receives the
    /// incoming value and the previously stored one.
    pub fn write(self, write: impl Fn(Value, &Value) -> Result<Value> + 'static) -> Self {
        self.write_with(move |_, value, previous| write(value, previous))
    }

    pub fn write_with(
        mut self,
        write: impl Fn(&RuleContext<'_>, Value, &Value) -> Result<Value> + 'static,
    ) -> Self {
        self.write = Some(Rc::new(write));
        self
    }

    pub fn default_value(mut self, value: impl Into<Value>) -> Self {
        self.default = Some(value.into());
        self
    }

    pub fn required(mut self, required: bool) -> Self {
        self.required = Some(required);
        self
    }

    pub fn constant(mut self, constant: bool) -> Self {
        self.constant = Some(constant);
        self
    }

    pub fn serializable(mut self, serializable: bool) -> Self {
        self.serializable = Some(serializable);
        self
    }
}

impl fmt::Debug for Rule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Rule")
            .field("read", &self.read.is_some())
            .field("write", &self.write.is_some())
            .field("default", &self.default)
            .field("required", &self.required)
            .field("constant", &self.constant)
            .field("serializable", &self.serializable)
            .finish()
    }
}

/// Something a `construct` stage can build from a raw value.
#[derive(Clone, Debug, PartialEq)]
pub enum Constructor {
    Entity(EntityType),
    List(ListType),
}

impl Constructor {
    /// Return `value` unchanged when it already is an instance, otherwise
    /// build one with `value` as the sole argument.
    pub fn construct(&self, value: Value) -> Result<Value> {
        match self {
            Constructor::Entity(ty) => match value {
                Value::Entity(entity) if entity.is_instance_of(ty) => Ok(Value::Entity(entity)),
                other => ty.create(other).map(Value::Entity),
            },
            Constructor::List(ty) => match value {
                Value::List(list) if list.list_type() == ty => Ok(Value::List(list)),
                other => ty.create(other).map(Value::List),
            },
        }
    }
}

impl From<EntityType> for Constructor {
    fn from(ty: EntityType) -> Self {
        Constructor::Entity(ty)
    }
}

impl From<&EntityType> for Constructor {
    fn from(ty: &EntityType) -> Self {
        Constructor::Entity(ty.clone())
    }
}

impl From<ListType> for Constructor {
    fn from(ty: ListType) -> Self {
        Constructor::List(ty)
    }
}

impl From<&ListType> for Constructor {
    fn from(ty: &ListType) -> Self {
        Constructor::List(ty.clone())
    }
}

/// An ordered composition of rule stages.
#[derive(Clone, Default, Debug)]
pub struct RuleChain {
    stages: Vec<Rule>,
}

impl RuleChain {
    pub fn new() -> Self {
        Self::default()
    }

    /// Extend the chain with a raw stage.
    pub fn then(&self, rule: Rule) -> Self {
        let mut stages = self.stages.clone();
        stages.push(rule);
        Self { stages }
    }

    /// Reject writes failing `predicate` with "Assertion failed".
    pub fn assert(&self, predicate: impl Fn(&Value) -> bool + 'static) -> Self {
        self.assert_with(predicate, "Assertion failed")
    }

    pub fn assert_with(
        &self,
        predicate: impl Fn(&Value) -> bool + 'static,
        message: impl Into<String>,
    ) -> Self {
        let message = message.into();
        self.then(Rule::new().write(move |value, _| {
            if predicate(&value) {
                Ok(value)
            } else {
                Err(ModelError::validation(message.clone()))
            }
        }))
    }

    /// Replace written values with `process(value)`.
    pub fn process(&self, process: impl Fn(Value) -> Value + 'static) -> Self {
        self.then(Rule::new().write(move |value, _| Ok(process(value))))
    }

    /// Forward mutation events of the stored value to the owner.
    pub fn propagate(&self) -> Self {
        self.propagate_categories(&[&MUTATION])
    }

    /// Forward events of the given categories emitted by the stored value to
    /// the owner, with `related_target` set to the owner. Replacing the value
    /// stops forwarding from the previous one, once the write is stored.
    pub fn propagate_categories(&self, categories: &[&'static Category]) -> Self {
        let categories: Rc<[&'static Category]> = categories.into();
        let stage = NEXT_STAGE.fetch_add(1, Ordering::Relaxed);
        self.then(Rule::new().write_with(move |ctx, value, previous| {
            if value.is_same(previous) {
                return Ok(value);
            }
            if categories.is_empty() {
                return Err(ModelError::Configuration(
                    "Expected at least one event category to propagate".to_string(),
                ));
            }
            let key = format!("{}#{}", ctx.attribute(), stage);
            let owner = ctx.owner();
            let forwarder = owner
                .event_bus()
                .forwarder(&key, || forward_to(owner.downgrade()));
            let (old, new) = (previous.as_target(), value.as_target());
            let categories = Rc::clone(&categories);
            ctx.on_commit(move || {
                if let Some(old) = old {
                    old.remove_event_listener(&categories, &forwarder);
                }
                match new {
                    Some(new) => new.add_event_listener(&categories, &forwarder),
                    None => Ok(()),
                }
            });
            Ok(value)
        }))
    }

    /// Build an instance of `constructor` from written values that are not
    /// already one.
    pub fn construct(&self, constructor: impl Into<Constructor>) -> Self {
        let constructor = constructor.into();
        self.then(Rule::new().write(move |value, _| constructor.construct(value)))
    }

    pub fn default_value(&self, value: impl Into<Value>) -> Self {
        self.then(Rule::new().default_value(value))
    }

    pub fn is_required(&self) -> Self {
        self.then(Rule::new().required(true))
    }

    pub fn is_constant(&self) -> Self {
        self.then(Rule::new().constant(true))
    }

    pub fn not_serializable(&self) -> Self {
        self.then(Rule::new().serializable(false))
    }

    /// `construct(constructor)` followed by `propagate()`.
    pub fn nested(&self, constructor: impl Into<Constructor>) -> Self {
        self.construct(constructor).propagate()
    }

    /// Apply every read stage, root to leaf.
    pub fn get(&self, ctx: &RuleContext<'_>, value: Value) -> Result<Value> {
        self.stages
            .iter()
            .filter_map(|stage| stage.read.as_ref())
            .try_fold(value, |value, read| read(ctx, value))
    }

    /// Apply every write stage, root to leaf.
    pub fn set(&self, ctx: &RuleContext<'_>, value: Value, previous: &Value) -> Result<Value> {
        self.stages
            .iter()
            .filter_map(|stage| stage.write.as_ref())
            .try_fold(value, |value, write| write(ctx, value, previous))
    }

    pub fn resolved_default(&self) -> Value {
        self.stages
            .iter()
            .rev()
            .find_map(|stage| stage.default.clone())
            .unwrap_or_default()
    }

    pub fn required(&self) -> bool {
        self.resolve(|stage| stage.required).unwrap_or(false)
    }

    pub fn constant(&self) -> bool {
        self.resolve(|stage| stage.constant).unwrap_or(false)
    }

    pub fn serializable(&self) -> bool {
        self.resolve(|stage| stage.serializable).unwrap_or(true)
    }

    pub fn len(&self) -> usize {
        self.stages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.stages.is_empty()
    }

    fn resolve(&self, field: impl Fn(&Rule) -> Option<bool>) -> Option<bool> {
        self.stages.iter().rev().find_map(field)
    }
}

impl From<Rule> for RuleChain {
    fn from(rule: Rule) -> Self {
        RuleChain::new().then(rule)
    }
}

fn forward_to(owner: WeakTarget) -> Listener {
    Listener::new(move |event| {
        if let Some(owner) = owner.upgrade() {
            let mut forwarded = event.clone();
            forwarded.set_related_target(owner.clone());
            owner.dispatch_event(forwarded);
        }
    })
}
