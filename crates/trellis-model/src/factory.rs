// SPDX-License-Identifier: Apache-2.0
//! Model factory: schema registration, `_type` dispatch, construction.
//!
//! The factory owns the registry its models are scoped to and the table of
//! registered schemas used for `_type` discriminator dispatch and for
//! resolving model-kind field declarations. Construction follows the fixed
//! pipeline: select schema (discriminator wins over the declared type when
//! registered), instantiate, apply config, apply data, allocate a gid if
//! none arrived, register, flag roots.
//!
//! The factory also carries the deferred-cleanup queue: detached non-root
//! models are queued and self-destroy at the next [`Factory::sweep`],
//! giving callers a grace window to re-attach.
use std::cell::{Cell, RefCell};
use std::fmt;
use std::rc::Rc;

use rustc_hash::FxHashMap;
use serde_json::Value as Json;
use tracing::warn;

use crate::error::{ModelError, Result};
use crate::gid::Gid;
use crate::model::{Model, ModelConfig, WeakModel};
use crate::registry::{Registry, SharedRegistry};
use crate::schema::{ModelSchema, SchemaPath, SchemaSet};
use crate::value::json_gid;

struct FactoryCore {
    schemas: SchemaSet,
    registry: SharedRegistry,
    string_gids: Cell<bool>,
    cleanup: RefCell<Vec<WeakModel>>,
}

/// Handle to a factory. Clones share the same schema table, registry, and
/// cleanup queue.
#[derive(Clone)]
pub struct Factory {
    core: Rc<FactoryCore>,
}

impl Default for Factory {
    fn default() -> Self {
        Self::new()
    }
}

impl Factory {
    /// Creates a factory with a fresh registry.
    #[must_use]
    pub fn new() -> Self {
        Self::with_registry(Rc::new(Registry::new()))
    }

    /// Creates a factory scoped to an existing registry.
    #[must_use]
    pub fn with_registry(registry: SharedRegistry) -> Self {
        Self {
            core: Rc::new(FactoryCore {
                schemas: Rc::new(RefCell::new(FxHashMap::default())),
                registry,
                string_gids: Cell::new(false),
                cleanup: RefCell::new(Vec::new()),
            }),
        }
    }

    /// A sibling factory sharing this one's schema registrations but a
    /// fresh, empty registry. Used by deep cloning.
    #[must_use]
    pub fn fork(&self) -> Self {
        Self {
            core: Rc::new(FactoryCore {
                schemas: Rc::clone(&self.core.schemas),
                registry: Rc::new(Registry::new()),
                string_gids: Cell::new(self.core.string_gids.get()),
                cleanup: RefCell::new(Vec::new()),
            }),
        }
    }

    /// The registry this factory's models are scoped to.
    #[must_use]
    pub fn registry(&self) -> SharedRegistry {
        Rc::clone(&self.core.registry)
    }

    /// Switches gid allocation to UUID strings instead of sequential
    /// integers.
    pub fn use_string_gids(&self, on: bool) {
        self.core.string_gids.set(on);
    }

    // ── Schema registration ────────────────────────────────────────────

    /// Registers a schema under its name, and under its discriminator when
    /// that differs, for `_type` dispatch and model-kind resolution.
    pub fn register_schema(&self, schema: &Rc<ModelSchema>) {
        let mut table = self.core.schemas.borrow_mut();
        table.insert(schema.name().to_owned(), Rc::clone(schema));
        if let Some(d) = schema.discriminator() {
            if d != schema.name() {
                table.insert(d.to_owned(), Rc::clone(schema));
            }
        }
    }

    /// Looks up a registered schema by name or discriminator.
    #[must_use]
    pub fn schema(&self, name: &str) -> Option<Rc<ModelSchema>> {
        self.core.schemas.borrow().get(name).cloned()
    }

    /// Typed path builder rooted at the named schema.
    pub fn schema_path(&self, name: &str) -> Result<SchemaPath> {
        let schema = self
            .schema(name)
            .ok_or_else(|| ModelError::UnknownSchema(name.to_owned()))?;
        Ok(SchemaPath::root(Rc::clone(&self.core.schemas), schema))
    }

    // ── Construction ───────────────────────────────────────────────────

    /// Creates a non-root model of the named type from plain data.
    pub fn create(&self, type_name: &str, data: &Json) -> Result<Model> {
        self.create_with(type_name, data, &ModelConfig::default(), false)
    }

    /// Creates a root model of the named type from plain data.
    pub fn create_root(&self, type_name: &str, data: &Json) -> Result<Model> {
        self.create_with(type_name, data, &ModelConfig::default(), true)
    }

    /// Full-control creation by registered type name.
    pub fn create_with(
        &self,
        type_name: &str,
        data: &Json,
        config: &ModelConfig,
        root: bool,
    ) -> Result<Model> {
        let declared = self
            .schema(type_name)
            .ok_or_else(|| ModelError::UnknownSchema(type_name.to_owned()))?;
        self.create_by_schema(&declared, data, config, root)
    }

    pub(crate) fn create_by_name(
        &self,
        type_name: &str,
        data: &Json,
        config: &ModelConfig,
        root: bool,
    ) -> Result<Model> {
        self.create_with(type_name, data, config, root)
    }

    /// Creation with an explicit declared schema.
    ///
    /// A `_type` discriminator in `data` selects the registered schema when
    /// it is a subtype of the declared one; an unknown or unrelated
    /// discriminator logs a warning and falls back to the declared schema.
    pub fn create_by_schema(
        &self,
        declared: &Rc<ModelSchema>,
        data: &Json,
        config: &ModelConfig,
        root: bool,
    ) -> Result<Model> {
        let schema = match data.get("_type").and_then(Json::as_str) {
            None => Rc::clone(declared),
            Some(tag) => match self.schema(tag) {
                Some(s) if s.is_a(declared.name()) => s,
                Some(s) => {
                    warn!(
                        tag,
                        declared = declared.name(),
                        actual = s.name(),
                        "discriminator is not a subtype of the declared schema; using the declared one"
                    );
                    Rc::clone(declared)
                }
                None => {
                    warn!(tag, declared = declared.name(), "unknown _type; using the declared schema");
                    Rc::clone(declared)
                }
            },
        };
        let mut config = config.clone();
        if config.gid.is_none() {
            config.gid = json_gid(data);
        }
        let model = Model::construct(&schema, Some(self.clone()), Some(self.registry()), &config)?;
        if data.is_object() {
            model.set_data(data, false)?;
        }
        if model.core.gid.get().is_none() {
            model.init_gid(self.allocate_gid());
        }
        self.core.registry.register(&model)?;
        model.set_root(root);
        Ok(model)
    }

    /// Creates one model per data item (as roots), then runs a
    /// reference-resolution pass so intra-set references bind.
    pub fn create_set(&self, type_name: &str, items: &[Json]) -> Result<Vec<Model>> {
        let models: Vec<Model> = items
            .iter()
            .map(|data| self.create_with(type_name, data, &ModelConfig::default(), true))
            .collect::<Result<Vec<_>>>()?;
        for model in &models {
            model.resolve_references();
        }
        Ok(models)
    }

    fn allocate_gid(&self) -> Gid {
        if self.core.string_gids.get() {
            Gid::Str(uuid::Uuid::new_v4().to_string())
        } else {
            self.core.registry.next_int_gid()
        }
    }

    // ── Deferred cleanup ───────────────────────────────────────────────

    /// Queues a detached model for the next sweep.
    pub(crate) fn enqueue_cleanup(&self, model: WeakModel) {
        self.core.cleanup.borrow_mut().push(model);
    }

    /// Destroys every queued model that is still detached and not a root.
    /// Returns the number destroyed. Models re-attached (or made roots)
    /// since detachment are skipped.
    pub fn sweep(&self) -> usize {
        let queued: Vec<WeakModel> = std::mem::take(&mut *self.core.cleanup.borrow_mut());
        let mut destroyed = 0usize;
        for weak in queued {
            let Some(model) = weak.upgrade() else {
                continue;
            };
            if model.is_destroyed() || model.is_root() || model.parent().is_some() {
                continue;
            }
            model.destroy();
            destroyed += 1;
        }
        destroyed
    }
}

impl fmt::Debug for Factory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Factory({} schemas, {} live models)",
            self.core.schemas.borrow().len(),
            self.core.registry.len()
        )
    }
}
