// SPDX-License-Identifier: Apache-2.0
//! Runtime field values.
//!
//! A model field holds exactly one [`Value`]. Primitives mirror JSON;
//! structured values are either an owned child model (a strong handle; the
//! tree owns its children), a lazy [`RefValue`] pointer into the registry,
//! or an ordered list mutated in place. Function values are opaque callback
//! slots with pointer identity; they never leave the process (exported as
//! `null`, never replicated).
use std::cell::RefCell;
use std::fmt;
use std::rc::Rc;

use crate::gid::Gid;
use crate::model::{ExportOptions, Model, WeakModel};

/// Opaque callback payload for function-typed fields.
///
/// Equality is pointer identity: two `FuncValue`s are equal iff they share
/// the same allocation.
#[derive(Clone)]
pub struct FuncValue(Rc<dyn Fn(&Model) -> Value>);

impl FuncValue {
    /// Wraps a callback.
    #[must_use]
    pub fn new(f: impl Fn(&Model) -> Value + 'static) -> Self {
        Self(Rc::new(f))
    }

    /// Invokes the callback against `model`.
    #[must_use]
    pub fn call(&self, model: &Model) -> Value {
        (self.0)(model)
    }
}

impl fmt::Debug for FuncValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("<function>")
    }
}

impl PartialEq for FuncValue {
    #[allow(ambiguous_wide_pointer_comparisons)]
    fn eq(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.0, &other.0)
    }
}

/// Lazy pointer to a model in the owner's registry.
///
/// The pointer keeps its gid for the lifetime of the field value; the weak
/// target is a resolution cache, shared by clones of the pointer so a
/// resolution through any read sticks to the stored value. A deleted
/// target surfaces as an absent value on the next read.
#[derive(Debug, Clone)]
pub struct RefValue {
    /// Gid of the referenced model.
    pub gid: Gid,
    target: Rc<RefCell<Option<WeakModel>>>,
}

impl RefValue {
    /// Creates an unresolved pointer.
    #[must_use]
    pub fn new(gid: Gid) -> Self {
        Self {
            gid,
            target: Rc::new(RefCell::new(None)),
        }
    }

    /// Creates a pointer pre-resolved to `model`.
    #[must_use]
    pub fn resolved(model: &Model) -> Self {
        Self {
            gid: model.gid(),
            target: Rc::new(RefCell::new(Some(model.downgrade()))),
        }
    }

    /// Returns the cached target if it is still alive.
    #[must_use]
    pub fn cached(&self) -> Option<Model> {
        self.target.borrow().as_ref().and_then(WeakModel::upgrade)
    }

    /// Stores a resolution result.
    pub fn cache(&self, model: &Model) {
        *self.target.borrow_mut() = Some(model.downgrade());
    }

    /// `true` when no live target is cached.
    #[must_use]
    pub fn is_unresolved(&self) -> bool {
        self.cached().is_none()
    }
}

impl PartialEq for RefValue {
    fn eq(&self, other: &Self) -> bool {
        self.gid == other.gid
    }
}

/// Runtime value of one model field.
#[derive(Debug, Clone, Default)]
pub enum Value {
    /// Absent value.
    #[default]
    Null,
    /// Boolean primitive.
    Bool(bool),
    /// Numeric primitive (double precision, as on the wire).
    Number(f64),
    /// String primitive.
    String(String),
    /// Opaque callback slot.
    Func(FuncValue),
    /// Owned child model.
    Model(Model),
    /// Lazy reference pointer.
    Ref(RefValue),
    /// Ordered sequence, mutated in place.
    List(Vec<Value>),
}

impl Value {
    /// Short kind name used in error messages and logs.
    #[must_use]
    pub fn kind_name(&self) -> &'static str {
        match self {
            Self::Null => "null",
            Self::Bool(_) => "boolean",
            Self::Number(_) => "number",
            Self::String(_) => "string",
            Self::Func(_) => "function",
            Self::Model(_) => "model",
            Self::Ref(_) => "reference",
            Self::List(_) => "list",
        }
    }

    /// `true` for [`Value::Null`].
    #[must_use]
    pub fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    /// `true` for primitives (null, bool, number, string).
    #[must_use]
    pub fn is_primitive(&self) -> bool {
        matches!(self, Self::Null | Self::Bool(_) | Self::Number(_) | Self::String(_))
    }

    /// Boolean accessor.
    #[must_use]
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Self::Bool(b) => Some(*b),
            _ => None,
        }
    }

    /// Numeric accessor.
    #[must_use]
    pub fn as_number(&self) -> Option<f64> {
        match self {
            Self::Number(n) => Some(*n),
            _ => None,
        }
    }

    /// String accessor.
    #[must_use]
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::String(s) => Some(s),
            _ => None,
        }
    }

    /// Owned-model accessor.
    #[must_use]
    pub fn as_model(&self) -> Option<&Model> {
        match self {
            Self::Model(m) => Some(m),
            _ => None,
        }
    }

    /// Reference accessor.
    #[must_use]
    pub fn as_ref_value(&self) -> Option<&RefValue> {
        match self {
            Self::Ref(r) => Some(r),
            _ => None,
        }
    }

    /// List accessor.
    #[must_use]
    pub fn as_list(&self) -> Option<&[Value]> {
        match self {
            Self::List(items) => Some(items),
            _ => None,
        }
    }

    /// Converts a JSON primitive into a value. Objects and arrays are the
    /// domain of field adoption and return `None` here.
    #[must_use]
    pub fn from_json_primitive(json: &serde_json::Value) -> Option<Self> {
        match json {
            serde_json::Value::Null => Some(Self::Null),
            serde_json::Value::Bool(b) => Some(Self::Bool(*b)),
            serde_json::Value::Number(n) => n.as_f64().map(Self::Number),
            serde_json::Value::String(s) => Some(Self::String(s.clone())),
            _ => None,
        }
    }

    /// Exports the value as plain JSON data.
    ///
    /// Models export recursively (or as `{gid}` when `options.shallow`),
    /// references export as `{gid}` (or `null` while no pointer is held),
    /// functions export as `null`.
    #[must_use]
    pub fn export(&self, options: &ExportOptions) -> serde_json::Value {
        match self {
            Self::Null | Self::Func(_) => serde_json::Value::Null,
            Self::Bool(b) => serde_json::Value::from(*b),
            Self::Number(n) => serde_json::Value::from(*n),
            Self::String(s) => serde_json::Value::from(s.clone()),
            Self::Model(m) => {
                if options.shallow {
                    gid_marker(&m.gid())
                } else {
                    m.export_with(&options.nested())
                }
            }
            Self::Ref(r) => gid_marker(&r.gid),
            Self::List(items) => {
                serde_json::Value::Array(items.iter().map(|v| v.export(options)).collect())
            }
        }
    }

    /// Structural snapshot used for watcher old-value caches: a deep export
    /// with default options.
    #[must_use]
    pub fn snapshot(&self) -> serde_json::Value {
        self.export(&ExportOptions::default())
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::Null, Self::Null) => true,
            (Self::Bool(a), Self::Bool(b)) => a == b,
            (Self::Number(a), Self::Number(b)) => a == b,
            (Self::String(a), Self::String(b)) => a == b,
            (Self::Func(a), Self::Func(b)) => a == b,
            (Self::Model(a), Self::Model(b)) => Model::ptr_eq(a, b),
            (Self::Ref(a), Self::Ref(b)) => a == b,
            (Self::List(a), Self::List(b)) => a == b,
            _ => false,
        }
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Self::Bool(b)
    }
}

impl From<f64> for Value {
    fn from(n: f64) -> Self {
        Self::Number(n)
    }
}

impl From<i64> for Value {
    fn from(n: i64) -> Self {
        Self::Number(n as f64)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Self::String(s.to_owned())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Self::String(s)
    }
}

impl From<Model> for Value {
    fn from(m: Model) -> Self {
        Self::Model(m)
    }
}

/// Renders a `{gid}` marker object.
#[must_use]
pub fn gid_marker(gid: &Gid) -> serde_json::Value {
    let mut map = serde_json::Map::with_capacity(1);
    map.insert("gid".to_owned(), gid.to_json());
    serde_json::Value::Object(map)
}

/// Extracts the gid from a JSON object carrying one.
#[must_use]
pub fn json_gid(json: &serde_json::Value) -> Option<Gid> {
    json.as_object().and_then(|m| m.get("gid")).and_then(Gid::from_json)
}

/// `true` when `json` is an object whose only key is `gid`: the wire marker
/// for a reference or an already-known model.
#[must_use]
pub fn is_gid_marker(json: &serde_json::Value) -> bool {
    json.as_object().is_some_and(|m| m.len() == 1 && m.contains_key("gid"))
}

#[cfg(test)]
#[allow(clippy::expect_used, clippy::unwrap_used)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn gid_markers_are_single_key_objects() {
        assert!(is_gid_marker(&json!({ "gid": 1 })));
        assert!(is_gid_marker(&json!({ "gid": "a" })));
        assert!(!is_gid_marker(&json!({ "gid": 1, "name": "x" })));
        assert!(!is_gid_marker(&json!("gid")));
        assert_eq!(json_gid(&json!({ "gid": 7, "name": "x" })), Some(Gid::Int(7)));
        assert_eq!(json_gid(&json!({ "name": "x" })), None);
    }

    #[test]
    fn primitive_export_mirrors_json() {
        let opts = crate::model::ExportOptions::default();
        assert_eq!(Value::Null.export(&opts), json!(null));
        assert_eq!(Value::Bool(true).export(&opts), json!(true));
        assert_eq!(Value::Number(2.5).export(&opts), json!(2.5));
        assert_eq!(Value::String("s".into()).export(&opts), json!("s"));
        assert_eq!(
            Value::List(vec![Value::Number(1.0), Value::Null]).export(&opts),
            json!([1.0, null])
        );
        assert_eq!(Value::Ref(RefValue::new(Gid::Int(3))).export(&opts), json!({ "gid": 3 }));
    }

    #[test]
    fn functions_have_pointer_identity_and_export_as_null() {
        let f = FuncValue::new(|_| Value::Null);
        let g = f.clone();
        assert_eq!(Value::Func(f.clone()), Value::Func(g));
        assert_ne!(Value::Func(f.clone()), Value::Func(FuncValue::new(|_| Value::Null)));
        assert_eq!(Value::Func(f).export(&crate::model::ExportOptions::default()), json!(null));
    }

    #[test]
    fn ref_values_compare_by_gid() {
        assert_eq!(RefValue::new(Gid::Int(1)), RefValue::new(Gid::Int(1)));
        assert_ne!(
            Value::Ref(RefValue::new(Gid::Int(1))),
            Value::Ref(RefValue::new(Gid::Int(2)))
        );
    }
}
