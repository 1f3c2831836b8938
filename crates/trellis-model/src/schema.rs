// SPDX-License-Identifier: Apache-2.0
//! Schema descriptors: declared field sets for model types.
//!
//! Field declarations are class-side registration, not interception: a
//! [`ModelSchema`] is built once per model type with [`ModelSchema::builder`]
//! and shared (`Rc`) by every instance. Schemas inherit by merging the
//! parent's descriptor map; an `open` schema additionally declares unknown
//! keys on first assignment (the dynamic-model variant).
//!
//! Model-typed fields name their schema by string so that recursive types
//! (`Person { partner: Person }`) need no cyclic construction; names resolve
//! through the factory's registered schema set.
use std::cell::RefCell;
use std::fmt;
use std::rc::Rc;

use rustc_hash::FxHashMap;

use crate::error::{ModelError, Result};
use crate::value::Value;

/// Declared runtime type of a field.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FieldKind {
    /// Numeric primitive.
    Number,
    /// String primitive.
    String,
    /// Boolean primitive.
    Bool,
    /// String or number.
    Alphanumeric,
    /// Opaque callback slot.
    Function,
    /// Any primitive.
    Any,
    /// A model of the named schema (or any subtype of it).
    Model(std::string::String),
    /// Ordered sequence of the given item kind.
    List(Box<FieldKind>),
}

impl FieldKind {
    /// Shorthand for a model kind.
    #[must_use]
    pub fn model(schema_name: &str) -> Self {
        Self::Model(schema_name.to_owned())
    }

    /// Shorthand for a list kind.
    #[must_use]
    pub fn list(item: Self) -> Self {
        Self::List(Box::new(item))
    }

    /// `true` when a value of this exact runtime type is admitted without
    /// adoption or coercion.
    #[must_use]
    pub fn admits(&self, value: &Value) -> bool {
        match self {
            Self::Number => matches!(value, Value::Number(_)),
            Self::String => matches!(value, Value::String(_)),
            Self::Bool => matches!(value, Value::Bool(_)),
            Self::Alphanumeric => matches!(value, Value::Number(_) | Value::String(_)),
            Self::Function => matches!(value, Value::Func(_)),
            Self::Any => value.is_primitive(),
            Self::Model(name) => match value {
                Value::Model(m) => m.schema().is_a(name),
                _ => false,
            },
            Self::List(item) => match value {
                Value::List(items) => items.iter().all(|v| item.admits(v)),
                _ => false,
            },
        }
    }

    /// Attempts to coerce a convertible primitive (`"3"` → `3`, `1` → `true`,
    /// number ↔ string). Returns `None` when no safe conversion exists.
    #[must_use]
    pub fn coerce(&self, value: &Value) -> Option<Value> {
        match (self, value) {
            (Self::Number, Value::String(s)) => s.trim().parse::<f64>().ok().map(Value::Number),
            (Self::Number, Value::Bool(b)) => Some(Value::Number(if *b { 1.0 } else { 0.0 })),
            (Self::String, Value::Number(n)) => Some(Value::String(format_number(*n))),
            (Self::String, Value::Bool(b)) => Some(Value::String(b.to_string())),
            (Self::Bool, Value::Number(n)) if *n == 0.0 || *n == 1.0 => {
                Some(Value::Bool(*n == 1.0))
            }
            (Self::Bool, Value::String(s)) => match s.as_str() {
                "true" => Some(Value::Bool(true)),
                "false" => Some(Value::Bool(false)),
                _ => None,
            },
            _ => None,
        }
    }

    /// Type-appropriate zero value for required fields without a default
    /// (`""`, `0`, `false`). Model kinds are handled by the owner, which
    /// constructs a fresh instance; lists zero to an empty sequence.
    #[must_use]
    pub fn zero_value(&self) -> Value {
        match self {
            Self::Number => Value::Number(0.0),
            Self::String | Self::Alphanumeric => Value::String(std::string::String::new()),
            Self::Bool => Value::Bool(false),
            Self::List(_) => Value::List(Vec::new()),
            Self::Function | Self::Any | Self::Model(_) => Value::Null,
        }
    }

    /// `true` for [`FieldKind::Model`].
    #[must_use]
    pub fn is_model(&self) -> bool {
        matches!(self, Self::Model(_))
    }

    /// The schema name for model kinds (including list-of-model item kinds).
    #[must_use]
    pub fn model_schema_name(&self) -> Option<&str> {
        match self {
            Self::Model(name) => Some(name),
            Self::List(item) => item.model_schema_name(),
            _ => None,
        }
    }
}

impl fmt::Display for FieldKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Number => f.write_str("number"),
            Self::String => f.write_str("string"),
            Self::Bool => f.write_str("boolean"),
            Self::Alphanumeric => f.write_str("alphanumeric"),
            Self::Function => f.write_str("function"),
            Self::Any => f.write_str("any"),
            Self::Model(name) => write!(f, "model<{name}>"),
            Self::List(item) => write!(f, "list<{item}>"),
        }
    }
}

/// Renders a number the way JSON does (integers without a trailing `.0`).
fn format_number(n: f64) -> String {
    if n.fract() == 0.0 && n.is_finite() && n.abs() < 9e15 {
        format!("{}", n as i64)
    } else {
        format!("{n}")
    }
}

/// Default for a field: a plain JSON value or a factory closure evaluated
/// per instance.
#[derive(Clone)]
pub enum DefaultValue {
    /// Fixed JSON default.
    Json(serde_json::Value),
    /// Closure evaluated at instance construction.
    Factory(Rc<dyn Fn() -> serde_json::Value>),
}

impl DefaultValue {
    /// Produces the default as JSON data.
    #[must_use]
    pub fn produce(&self) -> serde_json::Value {
        match self {
            Self::Json(v) => v.clone(),
            Self::Factory(f) => f(),
        }
    }
}

impl fmt::Debug for DefaultValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Json(v) => write!(f, "Json({v})"),
            Self::Factory(_) => f.write_str("Factory(..)"),
        }
    }
}

/// Declaration of one field on a schema.
#[derive(Debug, Clone)]
pub struct FieldDef {
    /// Field name.
    pub name: String,
    /// Declared runtime type.
    pub kind: FieldKind,
    /// Required fields are never null; without a default they zero-fill.
    pub required: bool,
    /// Reference fields hold a registry pointer instead of owning a child.
    pub reference: bool,
    /// Optional default (value or factory).
    pub default: Option<DefaultValue>,
}

impl FieldDef {
    /// Declares a field of `kind`.
    #[must_use]
    pub fn new(name: &str, kind: FieldKind) -> Self {
        Self {
            name: name.to_owned(),
            kind,
            required: false,
            reference: false,
            default: None,
        }
    }

    /// String field shorthand.
    #[must_use]
    pub fn string(name: &str) -> Self {
        Self::new(name, FieldKind::String)
    }

    /// Number field shorthand.
    #[must_use]
    pub fn number(name: &str) -> Self {
        Self::new(name, FieldKind::Number)
    }

    /// Boolean field shorthand.
    #[must_use]
    pub fn boolean(name: &str) -> Self {
        Self::new(name, FieldKind::Bool)
    }

    /// Owned-submodel field shorthand.
    #[must_use]
    pub fn model(name: &str, schema_name: &str) -> Self {
        Self::new(name, FieldKind::model(schema_name))
    }

    /// Cross-hierarchy reference field shorthand.
    #[must_use]
    pub fn reference(name: &str, schema_name: &str) -> Self {
        let mut def = Self::new(name, FieldKind::model(schema_name));
        def.reference = true;
        def
    }

    /// List field shorthand.
    #[must_use]
    pub fn list(name: &str, item: FieldKind) -> Self {
        Self::new(name, FieldKind::list(item))
    }

    /// Marks the field required.
    #[must_use]
    pub fn required(mut self) -> Self {
        self.required = true;
        self
    }

    /// Marks the field a reference.
    #[must_use]
    pub fn as_reference(mut self) -> Self {
        self.reference = true;
        self
    }

    /// Sets a fixed JSON default.
    #[must_use]
    pub fn with_default(mut self, default: serde_json::Value) -> Self {
        self.default = Some(DefaultValue::Json(default));
        self
    }

    /// Sets a per-instance default factory.
    #[must_use]
    pub fn with_default_fn(mut self, f: impl Fn() -> serde_json::Value + 'static) -> Self {
        self.default = Some(DefaultValue::Factory(Rc::new(f)));
        self
    }
}

/// Immutable, shared descriptor of a model type.
#[derive(Debug)]
pub struct ModelSchema {
    name: String,
    discriminator: Option<String>,
    parent: Option<Rc<ModelSchema>>,
    fields: Vec<FieldDef>,
    index: FxHashMap<String, usize>,
    open: bool,
}

impl ModelSchema {
    /// Starts a schema declaration.
    #[must_use]
    pub fn builder(name: &str) -> ModelSchemaBuilder {
        ModelSchemaBuilder {
            name: name.to_owned(),
            discriminator: Some(name.to_owned()),
            parent: None,
            fields: Vec::new(),
            open: false,
        }
    }

    /// Schema name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The `_type` discriminator, when this schema carries its own.
    #[must_use]
    pub fn discriminator(&self) -> Option<&str> {
        self.discriminator.as_deref()
    }

    /// `true` when unknown keys are declared on first assignment.
    #[must_use]
    pub fn is_open(&self) -> bool {
        self.open
    }

    /// `true` when this schema is `name` or inherits from it.
    #[must_use]
    pub fn is_a(&self, name: &str) -> bool {
        if self.name == name {
            return true;
        }
        self.parent.as_deref().is_some_and(|p| p.is_a(name))
    }

    /// Finds `name` in this schema's inheritance chain (itself included).
    #[must_use]
    pub fn ancestor_schema(self: &Rc<Self>, name: &str) -> Option<Rc<ModelSchema>> {
        if self.name == name {
            return Some(Rc::clone(self));
        }
        self.parent.as_ref().and_then(|p| p.ancestor_schema(name))
    }

    /// Looks up a declared field.
    #[must_use]
    pub fn field(&self, name: &str) -> Option<&FieldDef> {
        self.index.get(name).map(|&i| &self.fields[i])
    }

    /// All declared fields (inherited first), in declaration order.
    #[must_use]
    pub fn fields(&self) -> &[FieldDef] {
        &self.fields
    }

    /// Declared field names in declaration order.
    #[must_use]
    pub fn field_names(&self) -> Vec<&str> {
        self.fields.iter().map(|f| f.name.as_str()).collect()
    }
}

/// Builder for [`ModelSchema`].
pub struct ModelSchemaBuilder {
    name: String,
    discriminator: Option<String>,
    parent: Option<Rc<ModelSchema>>,
    fields: Vec<FieldDef>,
    open: bool,
}

impl ModelSchemaBuilder {
    /// Inherits the parent's field set; colliding names override in place.
    #[must_use]
    pub fn extends(mut self, parent: &Rc<ModelSchema>) -> Self {
        self.parent = Some(Rc::clone(parent));
        self
    }

    /// Declares a field.
    #[must_use]
    pub fn field(mut self, def: FieldDef) -> Self {
        self.fields.push(def);
        self
    }

    /// Marks the schema open: unknown keys in `set_data` are declared on
    /// first assignment.
    #[must_use]
    pub fn open(mut self) -> Self {
        self.open = true;
        self
    }

    /// Overrides the `_type` discriminator (defaults to the schema name).
    #[must_use]
    pub fn discriminator(mut self, name: &str) -> Self {
        self.discriminator = Some(name.to_owned());
        self
    }

    /// Drops the discriminator: exports of this schema carry no `_type` key.
    #[must_use]
    pub fn anonymous(mut self) -> Self {
        self.discriminator = None;
        self
    }

    /// Finalizes the schema.
    ///
    /// # Errors
    /// Returns [`ModelError::RequiredReference`] for a field declared both
    /// `required` and `reference` without a default: such a field could
    /// never be satisfied at construction time.
    pub fn build(self) -> Result<Rc<ModelSchema>> {
        let mut fields: Vec<FieldDef> = self
            .parent
            .as_deref()
            .map(|p| p.fields.clone())
            .unwrap_or_default();
        let mut index: FxHashMap<String, usize> =
            fields.iter().enumerate().map(|(i, f)| (f.name.clone(), i)).collect();
        for def in self.fields {
            if let Some(&i) = index.get(&def.name) {
                fields[i] = def;
            } else {
                index.insert(def.name.clone(), fields.len());
                fields.push(def);
            }
        }
        for def in &fields {
            if def.required && def.reference && def.default.is_none() {
                return Err(ModelError::RequiredReference(def.name.clone()));
            }
        }
        let open = self.open || self.parent.as_deref().is_some_and(|p| p.open);
        Ok(Rc::new(ModelSchema {
            name: self.name,
            discriminator: self.discriminator,
            parent: self.parent,
            fields,
            index,
            open,
        }))
    }
}

/// Shared set of registered schemas, keyed by type name. The factory owns
/// one; typed path builders borrow it to resolve model-kind fields.
pub type SchemaSet = Rc<RefCell<FxHashMap<String, Rc<ModelSchema>>>>;

/// Typed path builder over a schema graph.
///
/// Navigating a `SchemaPath` checks every segment against the declared
/// field set, so a misspelled watch path fails at construction instead of
/// silently never firing. The result exposes the declared kind and flags
/// and converts into a watchable pattern.
#[derive(Debug, Clone)]
pub struct SchemaPath {
    schemas: SchemaSet,
    level: Rc<ModelSchema>,
    segments: Vec<String>,
    leaf: Option<FieldDef>,
}

impl SchemaPath {
    /// Root path of `schema`.
    #[must_use]
    pub fn root(schemas: SchemaSet, schema: Rc<ModelSchema>) -> Self {
        Self {
            schemas,
            level: schema,
            segments: Vec::new(),
            leaf: None,
        }
    }

    /// Descends into the named field.
    ///
    /// # Errors
    /// [`ModelError::UnknownField`] when the segment is not declared,
    /// [`ModelError::NotFoundPath`] when the current leaf is not a model
    /// field, [`ModelError::UnknownSchema`] when a model kind names an
    /// unregistered schema.
    pub fn at(&self, name: &str) -> Result<Self> {
        let level = self.level_for_descent()?;
        let def = level
            .field(name)
            .cloned()
            .ok_or_else(|| ModelError::UnknownField(name.to_owned()))?;
        let mut segments = self.segments.clone();
        segments.push(name.to_owned());
        Ok(Self {
            schemas: Rc::clone(&self.schemas),
            level,
            segments,
            leaf: Some(def),
        })
    }

    /// Descends into a list index.
    pub fn index(&self, i: usize) -> Result<Self> {
        let Some(def) = &self.leaf else {
            return Err(ModelError::NotFoundPath(self.path()));
        };
        let FieldKind::List(item) = &def.kind else {
            return Err(ModelError::NotFoundPath(self.path()));
        };
        let mut item_def = def.clone();
        item_def.kind = (**item).clone();
        let mut segments = self.segments.clone();
        segments.push(i.to_string());
        Ok(Self {
            schemas: Rc::clone(&self.schemas),
            level: Rc::clone(&self.level),
            segments,
            leaf: Some(item_def),
        })
    }

    fn level_for_descent(&self) -> Result<Rc<ModelSchema>> {
        match &self.leaf {
            None => Ok(Rc::clone(&self.level)),
            Some(def) => {
                let Some(name) = def.kind.model_schema_name() else {
                    return Err(ModelError::NotFoundPath(self.path()));
                };
                self.schemas
                    .borrow()
                    .get(name)
                    .cloned()
                    .ok_or_else(|| ModelError::UnknownSchema(name.to_owned()))
            }
        }
    }

    /// Dotted path string.
    #[must_use]
    pub fn path(&self) -> String {
        self.segments.join(".")
    }

    /// Path segments.
    #[must_use]
    pub fn path_array(&self) -> &[String] {
        &self.segments
    }

    /// Declared kind at the leaf (`None` at the root).
    #[must_use]
    pub fn kind(&self) -> Option<&FieldKind> {
        self.leaf.as_ref().map(|d| &d.kind)
    }

    /// `true` when the leaf field is required.
    #[must_use]
    pub fn required(&self) -> bool {
        self.leaf.as_ref().is_some_and(|d| d.required)
    }

    /// `true` when the leaf field is a reference.
    #[must_use]
    pub fn is_reference(&self) -> bool {
        self.leaf.as_ref().is_some_and(|d| d.reference)
    }
}

impl From<&SchemaPath> for crate::path::PathPattern {
    fn from(path: &SchemaPath) -> Self {
        Self::parse(&path.path())
    }
}

#[cfg(test)]
#[allow(clippy::expect_used, clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn inheritance_merges_and_overrides() {
        let base = ModelSchema::builder("Base")
            .field(FieldDef::string("name"))
            .field(FieldDef::number("age"))
            .build()
            .unwrap();
        let child = ModelSchema::builder("Child")
            .extends(&base)
            .field(FieldDef::string("age")) // override: number -> string
            .field(FieldDef::boolean("alive"))
            .build()
            .unwrap();

        assert!(child.is_a("Base"));
        assert!(child.is_a("Child"));
        assert!(!base.is_a("Child"));
        assert_eq!(child.field_names(), vec!["name", "age", "alive"]);
        assert_eq!(child.field("age").unwrap().kind, FieldKind::String);
    }

    #[test]
    fn required_reference_without_default_fails_fast() {
        let err = ModelSchema::builder("Bad")
            .field(FieldDef::reference("target", "Bad").required())
            .build()
            .unwrap_err();
        assert_eq!(err, ModelError::RequiredReference("target".into()));
    }

    #[test]
    fn coercion_covers_convertible_primitives() {
        assert_eq!(
            FieldKind::Number.coerce(&Value::String("3".into())),
            Some(Value::Number(3.0))
        );
        assert_eq!(FieldKind::Bool.coerce(&Value::Number(1.0)), Some(Value::Bool(true)));
        assert_eq!(
            FieldKind::String.coerce(&Value::Number(4.0)),
            Some(Value::String("4".into()))
        );
        assert_eq!(FieldKind::Bool.coerce(&Value::Number(3.0)), None);
    }
}
