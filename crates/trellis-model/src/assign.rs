// SPDX-License-Identifier: Apache-2.0
//! Mutation pipeline: typed `set`, adoption of plain data, bulk assignment,
//! and in-place list editing.
//!
//! The pipeline for one field follows the field contract: an input of the
//! declared runtime type is accepted outright; with `init`, adoption rules
//! turn plain JSON into live values (resolve `{gid}` markers, mutate a
//! matching child in place, construct submodels through the factory, diff
//! arrays index-by-index, coerce convertible primitives); non-strict owners
//! record a type error and accept; strict owners raise.
//!
//! Every accepted mutation issues the pre-notification up the parent chain,
//! runs validators (a veto reverts atomically and fires a synthetic change
//! carrying the old value), mutates, then issues the change notification.
use serde_json::Value as Json;
use tracing::warn;

use crate::error::{ModelError, Result};
use crate::gid::Gid;
use crate::model::{Model, ModelConfig};
use crate::path::Path;
use crate::schema::{FieldDef, FieldKind};
use crate::value::{is_gid_marker, json_gid, RefValue, Value};

/// Value offered to [`Model::set`]: a live runtime value, or plain JSON
/// data subject to the adoption rules.
#[derive(Debug, Clone)]
pub enum Assign {
    /// A runtime value, accepted when it has the declared type.
    Value(Value),
    /// Plain data; with `init`, adoption may resolve, construct, or coerce.
    Data(Json),
}

impl From<Value> for Assign {
    fn from(v: Value) -> Self {
        Self::Value(v)
    }
}

impl From<Json> for Assign {
    fn from(j: Json) -> Self {
        Self::Data(j)
    }
}

impl From<&str> for Assign {
    fn from(s: &str) -> Self {
        Self::Value(Value::from(s))
    }
}

impl From<String> for Assign {
    fn from(s: String) -> Self {
        Self::Value(Value::from(s))
    }
}

impl From<f64> for Assign {
    fn from(n: f64) -> Self {
        Self::Value(Value::from(n))
    }
}

impl From<i64> for Assign {
    fn from(n: i64) -> Self {
        Self::Value(Value::from(n))
    }
}

impl From<bool> for Assign {
    fn from(b: bool) -> Self {
        Self::Value(Value::from(b))
    }
}

impl From<Model> for Assign {
    fn from(m: Model) -> Self {
        Self::Value(Value::Model(m))
    }
}

/// Result of resolving an assignment against a field.
enum Outcome {
    /// Store this value (after the notification gauntlet).
    Set(Value),
    /// The input was applied in place (child `set_data`, list diff);
    /// no field-level mutation remains.
    InPlace,
}

fn type_mismatch(def: &FieldDef, actual: &str) -> ModelError {
    ModelError::TypeMismatch {
        field: def.name.clone(),
        expected: def.kind.to_string(),
        actual: actual.to_owned(),
    }
}

fn json_kind_name(json: &Json) -> &'static str {
    match json {
        Json::Null => "null",
        Json::Bool(_) => "boolean",
        Json::Number(_) => "number",
        Json::String(_) => "string",
        Json::Array(_) => "array",
        Json::Object(_) => "object",
    }
}

/// Infers a declared kind for an open-schema field from its first value.
fn infer_kind(json: &Json) -> FieldKind {
    match json {
        Json::Bool(_) => FieldKind::Bool,
        Json::Number(_) => FieldKind::Number,
        Json::String(_) => FieldKind::String,
        Json::Array(_) => FieldKind::list(FieldKind::Any),
        Json::Null | Json::Object(_) => FieldKind::Any,
    }
}

impl Model {
    /// Sets a field with adoption enabled (`init = true`, full replacement).
    pub fn set(&self, name: &str, value: impl Into<Assign>) -> Result<bool> {
        self.set_with(name, value.into(), true, false)
    }

    /// Full-control set.
    ///
    /// Returns `Ok(false)` when a validator vetoed the change; the model is
    /// unmodified in that case and watchers observed a synthetic change
    /// back to the old value.
    pub fn set_with(&self, name: &str, assign: Assign, init: bool, merge: bool) -> Result<bool> {
        self.ensure_alive()?;
        let idx = match self.field_index(name) {
            Some(i) => i,
            None if self.schema().is_open() && init => {
                let kind = match &assign {
                    Assign::Data(j) => infer_kind(j),
                    Assign::Value(v) => infer_kind(&v.snapshot()),
                };
                self.declare(name, kind)?;
                self.field_index(name)
                    .ok_or_else(|| ModelError::UnknownField(name.to_owned()))?
            }
            None => return Err(ModelError::UnknownField(name.to_owned())),
        };
        let (def, current) = {
            let fields = self.core.fields.borrow();
            (fields[idx].def.clone(), fields[idx].value.clone())
        };
        match self.resolve_assign(&def, &current, &assign, init, merge) {
            Ok(Outcome::InPlace) => Ok(true),
            Ok(Outcome::Set(v)) => self.commit_field(idx, &def, &current, v),
            Err(e) => {
                let downgrade =
                    !self.is_strict() && matches!(e, ModelError::TypeMismatch { .. });
                if !downgrade {
                    return Err(e);
                }
                // Non-strict: record the error and accept the raw value.
                let fallback = match assign {
                    Assign::Value(v) => v,
                    Assign::Data(j) => Value::from_json_primitive(&j).unwrap_or(Value::Null),
                };
                let accepted = self.commit_field(idx, &def, &current, fallback)?;
                self.record_field_error(name, e);
                Ok(accepted)
            }
        }
    }

    /// Declares a new field at runtime. Only open schemas permit this.
    pub fn declare(&self, name: &str, kind: FieldKind) -> Result<()> {
        self.ensure_alive()?;
        if self.has(name) {
            return Ok(());
        }
        if !self.schema().is_open() {
            return Err(ModelError::UnknownField(name.to_owned()));
        }
        let def = FieldDef::new(name, kind);
        let mut fields = self.core.fields.borrow_mut();
        self.core.findex.borrow_mut().insert(name.to_owned(), fields.len());
        fields.push(crate::field::FieldSlot::new(def));
        Ok(())
    }

    // ── Resolution ─────────────────────────────────────────────────────

    fn resolve_assign(
        &self,
        def: &FieldDef,
        current: &Value,
        assign: &Assign,
        init: bool,
        merge: bool,
    ) -> Result<Outcome> {
        match assign {
            Assign::Value(v) => self.resolve_value(def, v.clone()),
            Assign::Data(json) => self.resolve_data(def, current, json, init, merge),
        }
    }

    fn resolve_value(&self, def: &FieldDef, v: Value) -> Result<Outcome> {
        if v.is_null() {
            if def.required {
                return Err(ModelError::RequiredNull(def.name.clone()));
            }
            return Ok(Outcome::Set(Value::Null));
        }
        if def.reference {
            return match v {
                Value::Model(m) => Ok(Outcome::Set(Value::Ref(RefValue::resolved(&m)))),
                Value::Ref(_) => Ok(Outcome::Set(v)),
                other => Err(type_mismatch(def, other.kind_name())),
            };
        }
        if def.kind.admits(&v) {
            match &v {
                Value::Model(m) => self.check_adoptable(m)?,
                Value::List(items) => {
                    for item in items {
                        if let Value::Model(m) = item {
                            self.check_adoptable(m)?;
                        }
                    }
                }
                _ => {}
            }
            return Ok(Outcome::Set(v));
        }
        if let Some(coerced) = def.kind.coerce(&v) {
            return Ok(Outcome::Set(coerced));
        }
        Err(type_mismatch(def, v.kind_name()))
    }

    fn resolve_data(
        &self,
        def: &FieldDef,
        current: &Value,
        json: &Json,
        init: bool,
        merge: bool,
    ) -> Result<Outcome> {
        if json.is_null() {
            return self.resolve_value(def, Value::Null);
        }
        if let Some(v) = Value::from_json_primitive(json) {
            return self.resolve_value(def, v);
        }
        if def.reference {
            if let Some(gid) = json_gid(json) {
                let r = RefValue::new(gid);
                if let Some(reg) = self.registry() {
                    if let Some(target) = reg.by_gid(&r.gid) {
                        r.cache(&target);
                    }
                }
                return Ok(Outcome::Set(Value::Ref(r)));
            }
            return Err(type_mismatch(def, json_kind_name(json)));
        }
        match (&def.kind, json) {
            (FieldKind::List(item), Json::Array(arr)) if init => {
                self.apply_list_diff(def, item, arr, merge)?;
                Ok(Outcome::InPlace)
            }
            (FieldKind::Model(type_name), Json::Object(_)) if init => {
                self.adopt_model_data(def, current, type_name, json, merge)
            }
            _ => Err(type_mismatch(def, json_kind_name(json))),
        }
    }

    /// Adoption of object data into a model-typed field.
    fn adopt_model_data(
        &self,
        def: &FieldDef,
        current: &Value,
        type_name: &str,
        json: &Json,
        merge: bool,
    ) -> Result<Outcome> {
        let incoming_gid = json_gid(json);

        // Same gid as the current child: mutate in place.
        if let (Value::Model(cur), Some(gid)) = (current, &incoming_gid) {
            if !cur.is_destroyed() && cur.gid() == *gid {
                cur.set_data(json, merge)?;
                return Ok(Outcome::InPlace);
            }
        }

        // Known gid: adopt the registered model (moving it here); a payload
        // beyond the bare marker also updates it in place.
        if let Some(gid) = &incoming_gid {
            if let Some(existing) = self.registry().and_then(|reg| reg.by_gid(gid)) {
                if !existing.schema().is_a(type_name) {
                    return Err(type_mismatch(def, existing.schema().name()));
                }
                self.check_adoptable(&existing)?;
                if !is_gid_marker(json) {
                    existing.set_data(json, merge)?;
                }
                return Ok(Outcome::Set(Value::Model(existing)));
            }
        }

        // Unknown: construct a fresh child (first receipt of a new model
        // creates it, gid marker or full payload alike).
        let child = self.construct_child(type_name, json)?;
        Ok(Outcome::Set(Value::Model(child)))
    }

    /// Constructs a child model of `type_name` from `data`, through the
    /// factory when wired, within the own schema family otherwise.
    pub(crate) fn construct_child(&self, type_name: &str, data: &Json) -> Result<Model> {
        if let Some(factory) = self.factory() {
            return factory.create_by_name(type_name, data, &ModelConfig::default(), false);
        }
        let schema = self
            .schema()
            .ancestor_schema(type_name)
            .ok_or_else(|| ModelError::UnknownSchema(type_name.to_owned()))?;
        let config = ModelConfig {
            gid: json_gid(data),
            strict: Some(self.is_strict()),
        };
        let child = Model::construct(&schema, None, None, &config)?;
        child.set_data(data, false)?;
        Ok(child)
    }

    /// Dry-run ownership checks for adopting `child` into one of our
    /// fields: no cycles, no theft from a locked parent, matching registry.
    fn check_adoptable(&self, child: &Model) -> Result<()> {
        if Model::ptr_eq(child, self) {
            return Err(ModelError::OwnershipCycle(child.gid()));
        }
        let mut cursor = self.parent().map(|(p, _)| p);
        while let Some(ancestor) = cursor {
            if Model::ptr_eq(&ancestor, child) {
                return Err(ModelError::OwnershipCycle(child.gid()));
            }
            cursor = ancestor.parent().map(|(p, _)| p);
        }
        if let Some((parent, _)) = child.parent() {
            if !Model::ptr_eq(&parent, self) && child.is_locked() {
                return Err(ModelError::LockedReparent(child.gid()));
            }
        }
        match (child.registry(), self.registry()) {
            (Some(a), Some(b)) => {
                if !std::rc::Rc::ptr_eq(&a, &b) {
                    return Err(ModelError::CrossRegistry(child.gid()));
                }
            }
            (Some(_), None) => return Err(ModelError::CrossRegistry(child.gid())),
            _ => {}
        }
        Ok(())
    }

    pub(crate) fn is_locked(&self) -> bool {
        self.core.parent.borrow().as_ref().is_some_and(|l| l.lock)
    }

    // ── Commit ─────────────────────────────────────────────────────────

    /// Runs the notification gauntlet and stores `new` into the slot.
    fn commit_field(&self, idx: usize, def: &FieldDef, old: &Value, new: Value) -> Result<bool> {
        if new == *old {
            return Ok(true);
        }
        if let Value::Model(m) = &new {
            if !def.reference {
                self.check_adoptable(m)?;
            }
        }
        let path = Path::field(&def.name);
        if !self.notify_before(&path, &new, true) {
            // Veto: revert by firing a synthetic change at the old value.
            self.notify_change(&path);
            return Ok(false);
        }
        // Detach replaced children; they self-destroy at the next sweep
        // unless re-attached.
        if !def.reference {
            let survives = |m: &Model| match &new {
                Value::Model(n) => Model::ptr_eq(n, m),
                Value::List(items) => items
                    .iter()
                    .any(|v| matches!(v, Value::Model(n) if Model::ptr_eq(n, m))),
                _ => false,
            };
            let mut replaced: Vec<Model> = Vec::new();
            match old {
                Value::Model(m) if !survives(m) => replaced.push(m.clone()),
                Value::List(items) => {
                    replaced.extend(
                        items
                            .iter()
                            .filter_map(Value::as_model)
                            .filter(|m| !survives(m))
                            .cloned(),
                    );
                }
                _ => {}
            }
            for child in replaced {
                child.clear_parent_link();
                if let Some(factory) = self.factory() {
                    factory.enqueue_cleanup(child.downgrade());
                }
            }
        }
        // Attach the new child (moving it from a previous owner if needed).
        if let Value::Model(m) = &new {
            if !def.reference {
                self.adopt(m, &def.name)?;
            }
        }
        if let Value::List(items) = &new {
            for item in items {
                if let Value::Model(m) = item {
                    self.adopt(m, &def.name)?;
                }
            }
        }
        {
            let mut fields = self.core.fields.borrow_mut();
            let slot = &mut fields[idx];
            slot.value = new;
            slot.explicit = true;
            slot.error = None;
        }
        self.notify_change(&path);
        Ok(true)
    }

    /// Moves `child` under our `field`, releasing any previous owner.
    fn adopt(&self, child: &Model, field: &str) -> Result<()> {
        if let Some((old_parent, old_field)) = child.parent() {
            if Model::ptr_eq(&old_parent, self) && old_field == field {
                return Ok(());
            }
            if !old_parent.is_destroyed() {
                old_parent.release_child(child, &old_field);
            }
            child.clear_parent_link();
        }
        child.set_parent_link(self, field, false)
    }

    /// Clears `child` out of the named slot (scalar field or list item),
    /// firing change notifications. Used by detach/destroy and moves.
    pub(crate) fn release_child(&self, child: &Model, field: &str) {
        let Some(idx) = self.field_index(field) else {
            return;
        };
        enum Found {
            Scalar,
            Item(usize),
            None,
        }
        let found = {
            let fields = self.core.fields.borrow();
            match &fields[idx].value {
                Value::Model(m) if Model::ptr_eq(m, child) => Found::Scalar,
                Value::List(items) => items
                    .iter()
                    .position(|v| matches!(v, Value::Model(m) if Model::ptr_eq(m, child)))
                    .map_or(Found::None, Found::Item),
                _ => Found::None,
            }
        };
        match found {
            Found::Scalar => {
                let path = Path::field(field);
                self.notify_before(&path, &Value::Null, false);
                self.core.fields.borrow_mut()[idx].value = Value::Null;
                self.notify_change(&path);
            }
            Found::Item(i) => {
                let len = {
                    let mut fields = self.core.fields.borrow_mut();
                    if let Value::List(items) = &mut fields[idx].value {
                        items.remove(i);
                        items.len()
                    } else {
                        0
                    }
                };
                // Every index from the removal point shifted.
                for j in i..=len {
                    let path = Path::indexed(field, j);
                    self.notify_change(&path);
                }
            }
            Found::None => {}
        }
    }

    /// Nulls out every reference field (and list entry) pointing at `gid`.
    pub(crate) fn clear_references_to(&self, gid: &Gid) {
        if self.is_destroyed() {
            return;
        }
        let count = self.core.fields.borrow().len();
        for idx in 0..count {
            let (name, hit) = {
                let fields = self.core.fields.borrow();
                let slot = &fields[idx];
                let hit = match &slot.value {
                    Value::Ref(r) => r.gid == *gid,
                    Value::List(items) => items
                        .iter()
                        .any(|v| matches!(v, Value::Ref(r) if r.gid == *gid)),
                    _ => false,
                };
                (slot.def.name.clone(), hit)
            };
            if !hit {
                continue;
            }
            let is_list = {
                let fields = self.core.fields.borrow();
                matches!(&fields[idx].value, Value::List(_))
            };
            if is_list {
                let cleared: Vec<usize> = {
                    let mut fields = self.core.fields.borrow_mut();
                    let mut cleared = Vec::new();
                    if let Value::List(items) = &mut fields[idx].value {
                        for (i, item) in items.iter_mut().enumerate() {
                            if matches!(item, Value::Ref(r) if r.gid == *gid) {
                                *item = Value::Null;
                                cleared.push(i);
                            }
                        }
                    }
                    cleared
                };
                for i in cleared {
                    self.notify_change(&Path::indexed(&name, i));
                }
            } else {
                let path = Path::field(&name);
                self.notify_before(&path, &Value::Null, false);
                self.core.fields.borrow_mut()[idx].value = Value::Null;
                self.notify_change(&path);
            }
        }
    }

    pub(crate) fn record_field_error(&self, name: &str, error: ModelError) {
        if let Some(idx) = self.field_index(name) {
            self.core.fields.borrow_mut()[idx].error = Some(error);
        }
    }

    pub(crate) fn mark_default(&self, name: &str) {
        if let Some(idx) = self.field_index(name) {
            self.core.fields.borrow_mut()[idx].explicit = false;
        }
    }

    // ── Defaults ───────────────────────────────────────────────────────

    /// Applies defaults to every field that has not been explicitly set.
    pub(crate) fn apply_defaults(&self) -> Result<()> {
        for name in self.field_names() {
            if !self.is_default(&name) {
                continue;
            }
            self.apply_default(&name)?;
        }
        Ok(())
    }

    /// Applies the declared default (or a type-appropriate zero value for
    /// required fields) and marks the field as still-default.
    pub(crate) fn apply_default(&self, name: &str) -> Result<()> {
        let def = self
            .field_info(name)
            .ok_or_else(|| ModelError::UnknownField(name.to_owned()))?
            .def;
        if let Some(default) = &def.default {
            let json = default.produce();
            self.set_with(name, Assign::Data(json), true, false)?;
        } else if def.required && !def.reference {
            match &def.kind {
                FieldKind::Model(type_name) => {
                    if self.schema().is_a(type_name) {
                        // A fresh child of our own family would recurse
                        // through this very default; leave it unset.
                        warn!(field = name, "skipping self-recursive required default");
                    } else {
                        let child = self.construct_child(type_name, &Json::Object(serde_json::Map::new()))?;
                        self.set_with(name, Assign::Value(Value::Model(child)), true, false)?;
                    }
                }
                kind => {
                    let zero = kind.zero_value();
                    if !zero.is_null() {
                        self.set_with(name, Assign::Value(zero), true, false)?;
                    }
                }
            }
        } else {
            let current = self.get_raw(name)?;
            if !current.is_null() {
                self.set_with(name, Assign::Value(Value::Null), true, false)?;
            }
        }
        self.mark_default(name);
        Ok(())
    }

    // ── Bulk assignment ────────────────────────────────────────────────

    /// Bulk assignment from plain data, inside a single batch.
    ///
    /// Full mode (`merge = false`) writes every declared field, resetting
    /// absent keys to their defaults. Merge mode writes only present keys
    /// and mutates model values in place when gids match. Strict models
    /// abort on the first field error; non-strict models record per-field
    /// errors and keep going.
    pub fn set_data(&self, data: &Json, merge: bool) -> Result<()> {
        self.ensure_alive()?;
        let Some(obj) = data.as_object() else {
            return Err(ModelError::TypeMismatch {
                field: "$data".to_owned(),
                expected: "object".to_owned(),
                actual: json_kind_name(data).to_owned(),
            });
        };
        if let Some(gid) = obj.get("gid").and_then(Gid::from_json) {
            self.init_gid(gid);
        }
        let token = self.start_batch();
        let result = self.set_data_inner(obj, merge);
        self.end_batch(token)?;
        result
    }

    fn set_data_inner(&self, obj: &serde_json::Map<String, Json>, merge: bool) -> Result<()> {
        for name in self.field_names() {
            let step = match obj.get(&name) {
                Some(value) => self
                    .set_with(&name, Assign::Data(value.clone()), true, merge)
                    .map(|_| ()),
                None if !merge => self.apply_default(&name),
                None => Ok(()),
            };
            if let Err(e) = step {
                if self.is_strict() {
                    return Err(e);
                }
                self.record_field_error(&name, e);
            }
        }
        for (key, value) in obj {
            if key == "gid" || key == "_type" || self.has(key) {
                continue;
            }
            if self.schema().is_open() {
                self.declare(key, infer_kind(value))?;
                if let Err(e) = self.set_with(key, Assign::Data(value.clone()), true, merge) {
                    if self.is_strict() {
                        return Err(e);
                    }
                    self.record_field_error(key, e);
                }
            } else {
                warn!(field = %key, schema = self.schema().name(), "ignoring undeclared key");
            }
        }
        Ok(())
    }

    // ── Lists ──────────────────────────────────────────────────────────

    /// Index-by-index reconciliation of a list field against an incoming
    /// array: only differing indices fire collection events, removed
    /// trailing indices fire once each.
    fn apply_list_diff(
        &self,
        def: &FieldDef,
        item_kind: &FieldKind,
        arr: &[Json],
        merge: bool,
    ) -> Result<()> {
        let name = def.name.clone();
        let idx = self
            .field_index(&name)
            .ok_or_else(|| ModelError::UnknownField(name.clone()))?;
        let item_def = FieldDef::new(&name, item_kind.clone());
        let current: Vec<Value> = {
            let fields = self.core.fields.borrow();
            fields[idx].value.as_list().map(<[Value]>::to_vec).unwrap_or_default()
        };
        // Materialize the list slot (without events) so item edits land.
        {
            let mut fields = self.core.fields.borrow_mut();
            if !matches!(fields[idx].value, Value::List(_)) {
                fields[idx].value = Value::List(Vec::new());
            }
            fields[idx].explicit = true;
        }
        for (i, incoming) in arr.iter().enumerate() {
            let cur = current.get(i).cloned().unwrap_or(Value::Null);
            let outcome = self.resolve_data(&item_def, &cur, incoming, true, merge)?;
            match outcome {
                Outcome::InPlace => {}
                Outcome::Set(v) => {
                    if v != cur {
                        self.store_list_item(idx, &name, i, v)?;
                    }
                }
            }
        }
        if arr.len() < current.len() {
            self.truncate_list(idx, &name, arr.len());
        }
        Ok(())
    }

    /// Stores one list item (growing the list with nulls as needed), with
    /// the full notification gauntlet at `field.index`.
    fn store_list_item(&self, idx: usize, name: &str, i: usize, value: Value) -> Result<bool> {
        let path = Path::indexed(name, i);
        if !self.notify_before(&path, &value, true) {
            self.notify_change(&path);
            return Ok(false);
        }
        let old_child = {
            let fields = self.core.fields.borrow();
            match &fields[idx].value {
                Value::List(items) => items.get(i).and_then(|v| v.as_model().cloned()),
                _ => None,
            }
        };
        if let Some(old) = old_child {
            if !matches!(&value, Value::Model(m) if Model::ptr_eq(m, &old)) {
                old.clear_parent_link();
                if let Some(factory) = self.factory() {
                    factory.enqueue_cleanup(old.downgrade());
                }
            }
        }
        if let Value::Model(m) = &value {
            self.adopt(m, name)?;
        }
        {
            let mut fields = self.core.fields.borrow_mut();
            if let Value::List(items) = &mut fields[idx].value {
                while items.len() <= i {
                    items.push(Value::Null);
                }
                items[i] = value;
            }
        }
        self.notify_change(&path);
        Ok(true)
    }

    /// Drops trailing items, detaching owned models and firing one change
    /// per removed index.
    fn truncate_list(&self, idx: usize, name: &str, new_len: usize) {
        let removed: Vec<Value> = {
            let mut fields = self.core.fields.borrow_mut();
            match &mut fields[idx].value {
                Value::List(items) if items.len() > new_len => items.split_off(new_len),
                _ => Vec::new(),
            }
        };
        for (offset, value) in removed.iter().enumerate() {
            if let Value::Model(m) = value {
                m.clear_parent_link();
                if let Some(factory) = self.factory() {
                    factory.enqueue_cleanup(m.downgrade());
                }
            }
            self.notify_change(&Path::indexed(name, new_len + offset));
        }
    }

    /// Number of items in a list field (an absent list reads as empty).
    pub fn list_len(&self, name: &str) -> Result<usize> {
        Ok(self.get_items(name)?.len())
    }

    /// Reads one list item.
    pub fn list_get(&self, name: &str, i: usize) -> Result<Option<Value>> {
        Ok(self.get_items(name)?.get(i).cloned())
    }

    /// Appends an item; returns its index.
    pub fn list_push(&self, name: &str, value: impl Into<Assign>) -> Result<usize> {
        let i = self.list_len(name)?;
        self.list_set(name, i, value)?;
        Ok(i)
    }

    /// Sets the item at `i` (growing the list with nulls as needed).
    pub fn list_set(&self, name: &str, i: usize, value: impl Into<Assign>) -> Result<bool> {
        self.ensure_alive()?;
        let idx = self
            .field_index(name)
            .ok_or_else(|| ModelError::UnknownField(name.to_owned()))?;
        let (def, cur) = {
            let fields = self.core.fields.borrow();
            let cur = match &fields[idx].value {
                Value::List(items) => items.get(i).cloned().unwrap_or(Value::Null),
                _ => Value::Null,
            };
            (fields[idx].def.clone(), cur)
        };
        let FieldKind::List(item_kind) = &def.kind else {
            return Err(type_mismatch(&def, "list item"));
        };
        let item_def = FieldDef::new(name, (**item_kind).clone());
        {
            let mut fields = self.core.fields.borrow_mut();
            if !matches!(fields[idx].value, Value::List(_)) {
                fields[idx].value = Value::List(Vec::new());
            }
            fields[idx].explicit = true;
        }
        let outcome = match value.into() {
            Assign::Value(v) => self.resolve_value(&item_def, v)?,
            Assign::Data(j) => self.resolve_data(&item_def, &cur, &j, true, false)?,
        };
        match outcome {
            Outcome::InPlace => Ok(true),
            Outcome::Set(v) => {
                if v == cur {
                    return Ok(true);
                }
                self.store_list_item(idx, name, i, v)
            }
        }
    }

    /// Removes the item at `i`, returning it. Later items shift down; each
    /// shifted index fires a change.
    pub fn list_remove(&self, name: &str, i: usize) -> Result<Option<Value>> {
        self.ensure_alive()?;
        let idx = self
            .field_index(name)
            .ok_or_else(|| ModelError::UnknownField(name.to_owned()))?;
        let (removed, len) = {
            let mut fields = self.core.fields.borrow_mut();
            match &mut fields[idx].value {
                Value::List(items) if i < items.len() => {
                    let removed = items.remove(i);
                    (Some(removed), items.len())
                }
                _ => (None, 0),
            }
        };
        let Some(removed) = removed else {
            return Ok(None);
        };
        if let Value::Model(m) = &removed {
            m.clear_parent_link();
            if let Some(factory) = self.factory() {
                factory.enqueue_cleanup(m.downgrade());
            }
        }
        for j in i..=len {
            self.notify_change(&Path::indexed(name, j));
        }
        Ok(Some(removed))
    }

    // ── Dotted-path assignment ─────────────────────────────────────────

    /// Sets a leaf at a dotted path, lazily creating intermediate
    /// model-typed fields on demand when `init_along_path`.
    pub fn set_path(&self, path: &str, value: impl Into<Assign>, init_along_path: bool) -> Result<bool> {
        self.ensure_alive()?;
        let parsed = Path::parse(path);
        let segments = parsed.segments();
        if segments.is_empty() {
            return Err(ModelError::NotFoundPath(path.to_owned()));
        }
        let mut cursor = self.clone();
        let mut i = 0usize;
        while i < segments.len() - 1 {
            let segment = &segments[i];
            let current = match cursor.get(segment) {
                Ok(v) => v,
                Err(ModelError::UnknownField(_)) => {
                    return Err(ModelError::NotFoundPath(path.to_owned()))
                }
                Err(e) => return Err(e),
            };
            match current {
                Value::Model(m) => {
                    cursor = m;
                    i += 1;
                }
                Value::List(items) => {
                    let index_segment = &segments[i + 1];
                    let Some(index) = Path::parse_index(index_segment) else {
                        return Err(ModelError::NotFoundPath(path.to_owned()));
                    };
                    if i + 1 == segments.len() - 1 {
                        return cursor.list_set(segment, index, value);
                    }
                    match items.get(index) {
                        Some(Value::Model(m)) => {
                            cursor = m.clone();
                            i += 2;
                        }
                        _ => return Err(ModelError::NotFoundPath(path.to_owned())),
                    }
                }
                Value::Null => {
                    let kind_is_model = cursor
                        .field_info(segment)
                        .map(|info| info.def.kind.is_model() && !info.def.reference);
                    if init_along_path && kind_is_model == Some(true) {
                        let type_name = cursor
                            .field_info(segment)
                            .and_then(|info| info.def.kind.model_schema_name().map(str::to_owned))
                            .ok_or_else(|| ModelError::NotFoundPath(path.to_owned()))?;
                        let child = cursor
                            .construct_child(&type_name, &Json::Object(serde_json::Map::new()))?;
                        cursor.set_with(segment, Assign::Value(Value::Model(child.clone())), true, false)?;
                        cursor = child;
                        i += 1;
                    } else {
                        return Err(ModelError::NotFoundPath(path.to_owned()));
                    }
                }
                _ => return Err(ModelError::NotFoundPath(path.to_owned())),
            }
        }
        let leaf = &segments[segments.len() - 1];
        match cursor.set_with(leaf, value.into(), true, false) {
            Err(ModelError::UnknownField(_)) => Err(ModelError::NotFoundPath(path.to_owned())),
            other => other,
        }
    }
}
