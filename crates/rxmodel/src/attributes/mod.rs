//! # Attribute System
//!
//! Entity types declare their attributes declaratively. Each attribute is
//! described by a rule chain: how the stored value is transformed when read,
//! how incoming values are validated and transformed when written, and the
//! metadata that governs construction and serialization.
//!
//! ## Schema Forms
//!
//! | Form | Example | Description |
//! |------|---------|-------------|
//! | Bare default | `.value("count", 0)` | Default value, no transforms |
//! | Single rule | `.attribute("id", Rule::new().constant(true))` | One stage with metadata |
//! | Chain | `.attribute("qty", RuleChain::new().assert(Value::is_integer))` | Ordered stages |
//!
//! ## Metadata
//!
//! | Key | Fallback | Effect |
//! |-----|----------|--------|
//! | `default` | `Undefined` | Written during initialization unless an initial is given, and whenever `Undefined` is written |
//! | `required` | `false` | Construction fails when neither default nor initial resolve |
//! | `constant` | `false` | Written once during construction, read-only afterwards |
//! | `serializable` | `true` | Included in serialized output |
//!
//! ## Usage
//!
//! ```
//! use rxmodel::attributes::{EntityType, RuleChain};
//! use rxmodel::Value;
//!
//! let line = EntityType::builder("Line")
//!     .attribute("qty", RuleChain::new().assert(Value::is_integer).default_value(1))
//!     .build()
//!     .unwrap();
//! let order = EntityType::builder("Order")
//!     .attribute("lines", RuleChain::new().nested(line.list_type()))
//!     .build()
//!     .unwrap();
//!
//! let created = order.create(serde_json::json!({"lines": [{"qty": 2}]})).unwrap();
//! assert_eq!(created.to_json().unwrap(), serde_json::json!({"lines": [{"qty": 2}]}));
//! ```

mod rules;
mod schema;

pub use rules::{Constructor, ReadFn, Rule, RuleChain, RuleContext, WriteFn};
pub use schema::{Attribute, EntityType, EntityTypeBuilder, Schema};
