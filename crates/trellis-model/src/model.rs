// SPDX-License-Identifier: Apache-2.0
//! Model instances: composition of fields, parent/child ownership, lifecycle.
//!
//! A [`Model`] is a cheap handle (`Rc`) over shared instance state; clones
//! refer to the same record, [`WeakModel`] is the non-owning counterpart.
//! Ownership of the tree lives in field values: a model-valued non-reference
//! field holds the strong handle to its child, registries hold weak links
//! back. The state machine runs `construct → define fields → apply defaults
//! → live ↔ batch → destroyed`; once destroyed, the only readable surface
//! is `gid()`.
//!
//! Mutation and adoption live in [`assign`](crate::Model::set_with),
//! notification fan-out in the watch half of the impl; this module carries
//! construction, identity, introspection, export, and teardown.
use std::cell::{Cell, OnceCell, RefCell};
use std::fmt;
use std::rc::{Rc, Weak};

use rustc_hash::FxHashMap;
use tracing::warn;

use crate::error::{ModelError, Result};
use crate::factory::Factory;
use crate::field::{FieldInfo, FieldSlot};
use crate::gid::Gid;
use crate::path::Path;
use crate::registry::SharedRegistry;
use crate::schema::ModelSchema;
use crate::value::{gid_marker, Value};
use crate::watch::{EventBus, SubscriptionId, Watcher};

/// Lifecycle state of a model.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifeState {
    /// Constructed and usable.
    Alive,
    /// Torn down; only `gid()` remains readable.
    Destroyed,
}

/// Lifecycle event emitted by a model.
#[derive(Debug, Clone)]
pub enum ModelEvent {
    /// The model was destroyed.
    Destroyed(Gid),
}

/// Construction-time configuration applied by the factory before data.
#[derive(Debug, Clone, Default)]
pub struct ModelConfig {
    /// Explicit gid (otherwise allocated at registration).
    pub gid: Option<Gid>,
    /// Strictness override: strict models raise on type mismatch,
    /// non-strict models record a per-field error and accept the value.
    pub strict: Option<bool>,
}

/// Options for [`Model::export_with`].
#[derive(Debug, Clone, Default)]
pub struct ExportOptions {
    /// Top-level allow-list of field names.
    pub keys: Option<Vec<String>>,
    /// Opaque view tag forwarded recursively to nested exports.
    pub view: Option<String>,
    /// Emit `{gid}` for model values instead of recursing.
    pub shallow: bool,
    /// Omit fields still holding their default.
    pub non_default: bool,
}

impl ExportOptions {
    /// Options for the next nesting level: the top-level `keys` filter is
    /// dropped, everything else is carried through.
    #[must_use]
    pub fn nested(&self) -> Self {
        Self {
            keys: None,
            view: self.view.clone(),
            shallow: self.shallow,
            non_default: self.non_default,
        }
    }
}

/// Link from a child model to its owning field.
#[derive(Clone)]
pub(crate) struct ParentLink {
    pub(crate) parent: WeakModel,
    pub(crate) field: String,
    pub(crate) lock: bool,
}

/// Re-entrant batch bookkeeping (see `start_batch`/`end_batch`).
#[derive(Default)]
pub(crate) struct BatchState {
    pub(crate) stack: Vec<u64>,
    pub(crate) next_token: u64,
    pub(crate) dirty: Vec<Path>,
}

/// Shared state behind a [`Model`] handle.
pub(crate) struct ModelCore {
    pub(crate) gid: OnceCell<Gid>,
    pub(crate) schema: Rc<ModelSchema>,
    pub(crate) strict: Cell<bool>,
    pub(crate) state: Cell<LifeState>,
    pub(crate) root: Cell<bool>,
    pub(crate) fields: RefCell<Vec<FieldSlot>>,
    pub(crate) findex: RefCell<FxHashMap<String, usize>>,
    pub(crate) parent: RefCell<Option<ParentLink>>,
    pub(crate) registry: RefCell<Option<SharedRegistry>>,
    pub(crate) factory: RefCell<Option<Factory>>,
    pub(crate) watchers: RefCell<Vec<Rc<Watcher>>>,
    pub(crate) next_watcher: Cell<u64>,
    pub(crate) batch: RefCell<BatchState>,
    pub(crate) events: EventBus<ModelEvent>,
}

/// Handle to a model instance. Clones share the same record.
#[derive(Clone)]
pub struct Model {
    pub(crate) core: Rc<ModelCore>,
}

/// Non-owning handle to a model.
#[derive(Clone)]
pub struct WeakModel {
    core: Weak<ModelCore>,
}

impl WeakModel {
    /// Upgrades to a strong handle if the model is still alive somewhere.
    #[must_use]
    pub fn upgrade(&self) -> Option<Model> {
        self.core.upgrade().map(|core| Model { core })
    }
}

impl fmt::Debug for WeakModel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("WeakModel")
    }
}

impl Model {
    /// Constructs a free-standing model of `schema`: no registry, no
    /// factory. References never resolve on such a model and model-typed
    /// defaults can only be built for the model's own schema family; use a
    /// [`Factory`](crate::Factory) for anything wired.
    pub fn new(schema: &Rc<ModelSchema>) -> Result<Self> {
        Self::construct(schema, None, None, &ModelConfig::default())
    }

    /// Full construction pipeline: define fields, apply config, apply
    /// defaults.
    pub(crate) fn construct(
        schema: &Rc<ModelSchema>,
        factory: Option<Factory>,
        registry: Option<SharedRegistry>,
        config: &ModelConfig,
    ) -> Result<Self> {
        let slots: Vec<FieldSlot> = schema.fields().iter().cloned().map(FieldSlot::new).collect();
        let findex: FxHashMap<String, usize> = slots
            .iter()
            .enumerate()
            .map(|(i, s)| (s.def.name.clone(), i))
            .collect();
        let model = Self {
            core: Rc::new(ModelCore {
                gid: OnceCell::new(),
                schema: Rc::clone(schema),
                strict: Cell::new(config.strict.unwrap_or(true)),
                state: Cell::new(LifeState::Alive),
                root: Cell::new(false),
                fields: RefCell::new(slots),
                findex: RefCell::new(findex),
                parent: RefCell::new(None),
                registry: RefCell::new(registry),
                factory: RefCell::new(factory),
                watchers: RefCell::new(Vec::new()),
                next_watcher: Cell::new(1),
                batch: RefCell::new(BatchState::default()),
                events: EventBus::new(),
            }),
        };
        if let Some(gid) = &config.gid {
            let _ = model.core.gid.set(gid.clone());
        }
        model.apply_defaults()?;
        Ok(model)
    }

    /// `true` when both handles refer to the same instance.
    #[must_use]
    pub fn ptr_eq(a: &Self, b: &Self) -> bool {
        Rc::ptr_eq(&a.core, &b.core)
    }

    /// Downgrades to a weak handle.
    #[must_use]
    pub fn downgrade(&self) -> WeakModel {
        WeakModel {
            core: Rc::downgrade(&self.core),
        }
    }

    /// The model's gid. Allocated lazily (UUID string) for models that
    /// never passed through a factory or explicit configuration.
    #[must_use]
    pub fn gid(&self) -> Gid {
        self.core
            .gid
            .get_or_init(|| Gid::Str(uuid::Uuid::new_v4().to_string()))
            .clone()
    }

    /// Assigns the gid if none is set yet. Crate-internal: gids are
    /// immutable once chosen.
    pub(crate) fn init_gid(&self, gid: Gid) {
        let _ = self.core.gid.set(gid);
    }

    /// The model's schema.
    #[must_use]
    pub fn schema(&self) -> Rc<ModelSchema> {
        Rc::clone(&self.core.schema)
    }

    /// Lifecycle state.
    #[must_use]
    pub fn state(&self) -> LifeState {
        self.core.state.get()
    }

    /// `true` after [`Model::destroy`].
    #[must_use]
    pub fn is_destroyed(&self) -> bool {
        self.core.state.get() == LifeState::Destroyed
    }

    /// `true` for models explicitly declared roots.
    #[must_use]
    pub fn is_root(&self) -> bool {
        self.core.root.get()
    }

    /// Declares (or revokes) root status.
    pub fn set_root(&self, root: bool) {
        self.core.root.set(root);
    }

    /// Strictness: strict models raise on type mismatch.
    #[must_use]
    pub fn is_strict(&self) -> bool {
        self.core.strict.get()
    }

    /// Adjusts strictness at runtime.
    pub fn set_strict(&self, strict: bool) {
        self.core.strict.set(strict);
    }

    /// The registry this model is scoped to, if any.
    #[must_use]
    pub fn registry(&self) -> Option<SharedRegistry> {
        self.core.registry.borrow().clone()
    }

    pub(crate) fn set_registry(&self, registry: &SharedRegistry) {
        *self.core.registry.borrow_mut() = Some(Rc::clone(registry));
    }

    /// The factory that created this model, if any.
    #[must_use]
    pub fn factory(&self) -> Option<Factory> {
        self.core.factory.borrow().clone()
    }

    pub(crate) fn set_factory(&self, factory: &Factory) {
        *self.core.factory.borrow_mut() = Some(factory.clone());
    }

    /// The owning parent and field name, for non-root models.
    #[must_use]
    pub fn parent(&self) -> Option<(Model, String)> {
        let link = self.core.parent.borrow();
        link.as_ref()
            .and_then(|l| l.parent.upgrade().map(|p| (p, l.field.clone())))
    }

    /// `true` while the model has no live owning field.
    #[must_use]
    pub fn is_detached(&self) -> bool {
        self.parent().is_none()
    }

    /// Locks the model to its current owning field; locked models refuse
    /// re-parenting.
    pub fn lock(&self) {
        if let Some(link) = self.core.parent.borrow_mut().as_mut() {
            link.lock = true;
        }
    }

    /// Subscribes to lifecycle events.
    pub fn on_event(&self, handler: impl Fn(&ModelEvent) + 'static) -> SubscriptionId {
        self.core.events.subscribe(handler)
    }

    /// Removes a lifecycle subscription.
    pub fn unsubscribe(&self, id: SubscriptionId) {
        self.core.events.unsubscribe(id);
    }

    pub(crate) fn ensure_alive(&self) -> Result<()> {
        if self.is_destroyed() {
            return Err(ModelError::UseAfterDestroy(self.gid()));
        }
        Ok(())
    }

    // ── Ownership plumbing ──────────────────────────────────────────────

    /// Installs the owning-field link on this model.
    ///
    /// Enforces registry identity with the parent, refuses re-parenting of
    /// locked models, and rejects ownership cycles. The caller is
    /// responsible for having cleared any previous owning field.
    pub(crate) fn set_parent_link(&self, parent: &Model, field: &str, lock: bool) -> Result<()> {
        {
            let current = self.core.parent.borrow();
            if let Some(link) = current.as_ref() {
                let same = link.field == field
                    && link.parent.upgrade().as_ref().is_some_and(|p| Self::ptr_eq(p, parent));
                if link.lock && !same {
                    return Err(ModelError::LockedReparent(self.gid()));
                }
            }
        }
        // No ancestor of the new parent may be this model.
        let mut cursor = Some(parent.clone());
        while let Some(m) = cursor {
            if Self::ptr_eq(&m, self) {
                return Err(ModelError::OwnershipCycle(self.gid()));
            }
            cursor = m.parent().map(|(p, _)| p);
        }
        // Registry identity must match the parent's; bare children are
        // adopted into the parent's registry (and factory) on attachment.
        match (self.registry(), parent.registry()) {
            (Some(a), Some(b)) => {
                if !Rc::ptr_eq(&a, &b) {
                    return Err(ModelError::CrossRegistry(self.gid()));
                }
            }
            (None, Some(b)) => {
                b.register(self)?;
                self.set_registry(&b);
                if let (None, Some(f)) = (self.factory(), parent.factory()) {
                    self.set_factory(&f);
                }
            }
            (Some(_), None) => return Err(ModelError::CrossRegistry(self.gid())),
            (None, None) => {}
        }
        *self.core.parent.borrow_mut() = Some(ParentLink {
            parent: parent.downgrade(),
            field: field.to_owned(),
            lock,
        });
        self.core.root.set(false);
        Ok(())
    }

    pub(crate) fn clear_parent_link(&self) {
        *self.core.parent.borrow_mut() = None;
    }

    /// Detaches the model from its owning field.
    ///
    /// With `make_root` the model becomes a root and lives on; otherwise it
    /// is queued with its factory and self-destroys at the next sweep
    /// unless re-attached first.
    pub fn detach(&self, make_root: bool) {
        if let Some((parent, field)) = self.parent() {
            if !parent.is_destroyed() {
                parent.release_child(self, &field);
            }
        }
        self.clear_parent_link();
        if make_root {
            self.core.root.set(true);
        } else if let Some(factory) = self.factory() {
            factory.enqueue_cleanup(self.downgrade());
        }
    }

    // ── Introspection ──────────────────────────────────────────────────

    /// `true` when the field is declared.
    #[must_use]
    pub fn has(&self, name: &str) -> bool {
        self.core.findex.borrow().contains_key(name)
    }

    /// Declared field names, in declaration order.
    #[must_use]
    pub fn field_names(&self) -> Vec<String> {
        self.core.fields.borrow().iter().map(|s| s.def.name.clone()).collect()
    }

    /// Introspection snapshot of one field.
    #[must_use]
    pub fn field_info(&self, name: &str) -> Option<FieldInfo> {
        let idx = *self.core.findex.borrow().get(name)?;
        let fields = self.core.fields.borrow();
        let slot = &fields[idx];
        Some(FieldInfo {
            def: slot.def.clone(),
            is_default: !slot.explicit,
            error: slot.error.clone(),
        })
    }

    /// `true` while the field has never been explicitly set.
    #[must_use]
    pub fn is_default(&self, name: &str) -> bool {
        self.field_info(name).is_some_and(|i| i.is_default)
    }

    pub(crate) fn field_index(&self, name: &str) -> Option<usize> {
        self.core.findex.borrow().get(name).copied()
    }

    // ── Reads ──────────────────────────────────────────────────────────

    /// Reads a field, resolving reference pointers through the registry.
    ///
    /// An unresolved reference reads as [`Value::Null`] (with a warning);
    /// the pointer is retained for later resolution attempts.
    pub fn get(&self, name: &str) -> Result<Value> {
        self.read(name, true)
    }

    /// Reads a field without resolving references.
    pub fn get_raw(&self, name: &str) -> Result<Value> {
        self.read(name, false)
    }

    fn read(&self, name: &str, resolve: bool) -> Result<Value> {
        self.ensure_alive()?;
        let idx = self
            .field_index(name)
            .ok_or_else(|| ModelError::UnknownField(name.to_owned()))?;
        let stored = self.core.fields.borrow()[idx].value.clone();
        if !resolve {
            return Ok(stored);
        }
        match stored {
            Value::Ref(r) => {
                if let Some(target) = r.cached() {
                    if !target.is_destroyed() {
                        return Ok(Value::Model(target));
                    }
                }
                let resolved = self
                    .registry()
                    .and_then(|reg| reg.by_gid(&r.gid));
                match resolved {
                    Some(target) => {
                        r.cache(&target);
                        Ok(Value::Model(target))
                    }
                    None => {
                        warn!(gid = %r.gid, field = name, "reference did not resolve");
                        Ok(Value::Null)
                    }
                }
            }
            other => Ok(other),
        }
    }

    /// Typed read: string fields.
    pub fn get_string(&self, name: &str) -> Result<Option<String>> {
        Ok(self.get(name)?.as_str().map(str::to_owned))
    }

    /// Typed read: numeric fields.
    pub fn get_number(&self, name: &str) -> Result<Option<f64>> {
        Ok(self.get(name)?.as_number())
    }

    /// Typed read: boolean fields.
    pub fn get_bool(&self, name: &str) -> Result<Option<bool>> {
        Ok(self.get(name)?.as_bool())
    }

    /// Typed read: model fields (owned children or resolved references).
    pub fn get_model(&self, name: &str) -> Result<Option<Model>> {
        Ok(self.get(name)?.as_model().cloned())
    }

    /// Typed read: list fields (an absent list reads as empty).
    pub fn get_items(&self, name: &str) -> Result<Vec<Value>> {
        Ok(self.get_raw(name)?.as_list().map(<[Value]>::to_vec).unwrap_or_default())
    }

    // ── Export ─────────────────────────────────────────────────────────

    /// Exports the model as plain JSON data with default options.
    #[must_use]
    pub fn export(&self) -> serde_json::Value {
        self.export_with(&ExportOptions::default())
    }

    /// Exports the model as plain JSON data.
    ///
    /// The gid is always present; `_type` appears iff the schema carries
    /// its own discriminator; references export as `{gid}`; `keys` filters
    /// the top level only. A destroyed model exports as its `{gid}` marker.
    #[must_use]
    pub fn export_with(&self, options: &ExportOptions) -> serde_json::Value {
        if self.is_destroyed() {
            return gid_marker(&self.gid());
        }
        let mut out = serde_json::Map::new();
        out.insert("gid".to_owned(), self.gid().to_json());
        if let Some(d) = self.core.schema.discriminator() {
            out.insert("_type".to_owned(), serde_json::Value::from(d));
        }
        let fields = self.core.fields.borrow();
        for slot in fields.iter() {
            if let Some(keys) = &options.keys {
                if !keys.iter().any(|k| k == &slot.def.name) {
                    continue;
                }
            }
            if options.non_default && !slot.explicit {
                continue;
            }
            out.insert(slot.def.name.clone(), slot.value.export(options));
        }
        serde_json::Value::Object(out)
    }

    /// Re-creates this tree from its export through a factory sharing the
    /// same schema registrations but a fresh registry.
    pub fn clone_deep(&self) -> Result<Model> {
        self.ensure_alive()?;
        let data = self.export();
        match self.factory() {
            Some(factory) => {
                let fork = factory.fork();
                fork.create_by_schema(&self.schema(), &data, &ModelConfig::default(), true)
            }
            None => {
                let clone = Self::new(&self.schema())?;
                clone.set_data(&data, false)?;
                Ok(clone)
            }
        }
    }

    // ── Teardown ───────────────────────────────────────────────────────

    /// Destroys the model: owned children are destroyed recursively, the
    /// owning field and all reference fields across the registry are
    /// cleared, the registry entry is removed, and `Destroyed` fires.
    pub fn destroy(&self) {
        if self.is_destroyed() {
            return;
        }
        let gid = self.gid();
        self.core.state.set(LifeState::Destroyed);

        // Owned children (model fields and list items, not references).
        let children: Vec<Model> = {
            let fields = self.core.fields.borrow();
            let mut out = Vec::new();
            for slot in fields.iter() {
                match &slot.value {
                    Value::Model(m) => out.push(m.clone()),
                    Value::List(items) => {
                        out.extend(items.iter().filter_map(|v| v.as_model().cloned()));
                    }
                    _ => {}
                }
            }
            out
        };
        for child in children {
            child.destroy();
        }

        if let Some((parent, field)) = self.parent() {
            if !parent.is_destroyed() {
                parent.release_child(self, &field);
            }
        }
        self.clear_parent_link();

        if let Some(registry) = self.registry() {
            for peer in registry.all() {
                if !Self::ptr_eq(&peer, self) {
                    peer.clear_references_to(&gid);
                }
            }
            registry.remove(self);
        }

        self.core.events.emit(&ModelEvent::Destroyed(gid));
        self.core.fields.borrow_mut().clear();
        self.core.findex.borrow_mut().clear();
        self.core.watchers.borrow_mut().clear();
    }

    /// Walks owned fields and attempts to resolve every lazy reference,
    /// recursing into children. Misses are logged and left for later.
    pub fn resolve_references(&self) {
        if self.is_destroyed() {
            return;
        }
        let entries: Vec<Value> = self.core.fields.borrow().iter().map(|s| s.value.clone()).collect();
        let registry = self.registry();
        for value in entries {
            resolve_value_refs(&value, registry.as_ref());
        }
    }
}

fn resolve_value_refs(value: &Value, registry: Option<&SharedRegistry>) {
    match value {
        Value::Ref(r) => {
            if r.cached().is_none() {
                match registry.and_then(|reg| reg.by_gid(&r.gid)) {
                    Some(target) => r.cache(&target),
                    None => warn!(gid = %r.gid, "reference did not resolve"),
                }
            }
        }
        Value::Model(m) => m.resolve_references(),
        Value::List(items) => {
            for item in items {
                resolve_value_refs(item, registry);
            }
        }
        _ => {}
    }
}

impl fmt::Debug for Model {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Model<{}>({})", self.core.schema.name(), self.gid())
    }
}

impl PartialEq for Model {
    fn eq(&self, other: &Self) -> bool {
        Self::ptr_eq(self, other)
    }
}
