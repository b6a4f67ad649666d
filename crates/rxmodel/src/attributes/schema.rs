//! Entity type declarations and their flattened attribute tables.
//!
//! Each [`EntityType`] declares attributes for its own level and may extend
//! a parent type. At registration ([`EntityTypeBuilder::build`]) the
//! inheritance chain is flattened once: the type's own attributes come
//! first, followed by every inherited attribute whose name was not
//! redeclared. Instances never walk the chain again.

use std::collections::HashMap;
use std::fmt;
use std::rc::Rc;

use tracing::debug;

use crate::attributes::rules::{Rule, RuleChain};
use crate::entity::Entity;
use crate::error::{ModelError, Result};
use crate::list::ListType;
use crate::value::Value;

/// How an attribute is declared on one level.
#[derive(Clone, Debug)]
pub enum Schema {
    /// A bare default value, with no transforms or metadata.
    Default(Value),
    /// A full rule set.
    Rules(RuleChain),
}

impl From<RuleChain> for Schema {
    fn from(chain: RuleChain) -> Self {
        Schema::Rules(chain)
    }
}

impl From<Rule> for Schema {
    fn from(rule: Rule) -> Self {
        Schema::Rules(rule.into())
    }
}

impl From<Value> for Schema {
    fn from(value: Value) -> Self {
        Schema::Default(value)
    }
}

/// A resolved attribute in a type's flattened table.
#[derive(Clone, Debug)]
pub struct Attribute {
    name: String,
    /// `Type[name]`, naming the declaring level.
    path: String,
    chain: RuleChain,
    default: Value,
    required: bool,
    constant: bool,
    serializable: bool,
}

impl Attribute {
    fn resolve(declaring_type: &str, name: &str, schema: Schema) -> Self {
        let chain = match schema {
            Schema::Default(value) => RuleChain::new().default_value(value),
            Schema::Rules(chain) => chain,
        };
        Self {
            name: name.to_string(),
            path: format!("{}[{}]", declaring_type, name),
            default: chain.resolved_default(),
            required: chain.required(),
            constant: chain.constant(),
            serializable: chain.serializable(),
            chain,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn chain(&self) -> &RuleChain {
        &self.chain
    }

    pub fn default(&self) -> &Value {
        &self.default
    }

    pub fn is_required(&self) -> bool {
        self.required
    }

    pub fn is_constant(&self) -> bool {
        self.constant
    }

    pub fn is_serializable(&self) -> bool {
        self.serializable
    }
}

struct TypeInner {
    name: String,
    parent: Option<EntityType>,
    table: Vec<Attribute>,
    index: HashMap<String, usize>,
}

/// A declared entity type. Cloning yields another handle to the same type;
/// equality is identity.
#[derive(Clone)]
pub struct EntityType {
    inner: Rc<TypeInner>,
}

thread_local! {
    static BASE: EntityType = EntityType {
        inner: Rc::new(TypeInner {
            name: "Model".to_string(),
            parent: None,
            table: Vec::new(),
            index: HashMap::new(),
        }),
    };
}

impl EntityType {
    /// The root type every declared type extends. It has no attributes;
    /// initials given to it become plain properties.
    pub fn base() -> EntityType {
        BASE.with(EntityType::clone)
    }

    pub fn builder(name: impl Into<String>) -> EntityTypeBuilder {
        EntityTypeBuilder {
            name: name.into(),
            parent: None,
            attributes: Vec::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.inner.name
    }

    pub fn parent(&self) -> Option<&EntityType> {
        self.inner.parent.as_ref()
    }

    /// Flattened attributes, most-derived declarations first.
    pub fn attributes(&self) -> &[Attribute] {
        &self.inner.table
    }

    pub fn attribute(&self, name: &str) -> Option<&Attribute> {
        self.inner.index.get(name).map(|&i| &self.inner.table[i])
    }

    pub fn has_attribute(&self, name: &str) -> bool {
        self.inner.index.contains_key(name)
    }

    /// Whether `self` is `ancestor` or extends it.
    pub fn is_subtype_of(&self, ancestor: &EntityType) -> bool {
        let mut current = Some(self);
        while let Some(ty) = current {
            if ty == ancestor {
                return true;
            }
            current = ty.parent();
        }
        false
    }

    /// Build an instance from `initials` (an object, another entity, or
    /// nothing).
    pub fn create(&self, initials: impl Into<Value>) -> Result<Entity> {
        Entity::construct(self, initials.into())
    }

    /// The list type specialized for this element type.
    pub fn list_type(&self) -> ListType {
        ListType::of(self)
    }

    pub fn ptr_eq(&self, other: &EntityType) -> bool {
        Rc::ptr_eq(&self.inner, &other.inner)
    }

    pub(crate) fn key(&self) -> usize {
        Rc::as_ptr(&self.inner) as usize
    }
}

impl PartialEq for EntityType {
    fn eq(&self, other: &Self) -> bool {
        self.ptr_eq(other)
    }
}

impl Eq for EntityType {}

impl fmt::Debug for EntityType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EntityType")
            .field("name", &self.inner.name)
            .field("attributes", &self.inner.table.len())
            .finish()
    }
}

/// Declares the attributes of one level of an entity type.
pub struct EntityTypeBuilder {
    name: String,
    parent: Option<EntityType>,
    attributes: Vec<(String, Schema)>,
}

impl EntityTypeBuilder {
    /// Inherit the attributes of `parent`. Defaults to [`EntityType::base`].
    pub fn extends(mut self, parent: &EntityType) -> Self {
        self.parent = Some(parent.clone());
        self
    }

    pub fn attribute(mut self, name: impl Into<String>, schema: impl Into<Schema>) -> Self {
        self.attributes.push((name.into(), schema.into()));
        self
    }

    /// Declare an attribute whose schema is a bare default value.
    pub fn value(self, name: impl Into<String>, default: impl Into<Value>) -> Self {
        self.attribute(name, Schema::Default(default.into()))
    }

    /// Register the type, flattening its inheritance chain.
    pub fn build(self) -> Result<EntityType> {
        let parent = self.parent.unwrap_or_else(EntityType::base);
        let mut table: Vec<Attribute> = Vec::with_capacity(self.attributes.len());
        let mut index: HashMap<String, usize> = HashMap::new();

        for (name, schema) in self.attributes {
            if index.contains_key(&name) {
                return Err(ModelError::Configuration(format!(
                    "Attribute {}[{}] is declared twice",
                    self.name, name
                )));
            }
            index.insert(name.clone(), table.len());
            table.push(Attribute::resolve(&self.name, &name, schema));
        }
        for inherited in parent.attributes() {
            if !index.contains_key(inherited.name()) {
                index.insert(inherited.name().to_string(), table.len());
                table.push(inherited.clone());
            }
        }

        debug!(
            entity_type = %self.name,
            parent = %parent.name(),
            attributes = table.len(),
            "registered entity type"
        );

        Ok(EntityType {
            inner: Rc::new(TypeInner {
                name: self.name,
                parent: Some(parent),
                table,
                index,
            }),
        })
    }
}
