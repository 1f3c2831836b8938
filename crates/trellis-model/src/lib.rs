// SPDX-License-Identifier: Apache-2.0
//! trellis-model: reactive, typed, hierarchical data models.
//!
//! Applications declare schemas for nested record types with runtime-typed
//! fields (primitives, submodels, ordered sequences, cross-hierarchy
//! references by gid). Instances form a parent/child tree; the engine
//! tracks mutations, notifies path-pattern watchers, validates types, and
//! imports/exports plain JSON data. The replication layer in `trellis-sync`
//! builds on the watcher and registry surfaces exposed here.
//!
//! Entry points:
//! - [`ModelSchema::builder`] declares a model type;
//! - [`Factory`] registers schemas and constructs instances (with `_type`
//!   dispatch, gid allocation, and registry wiring);
//! - [`Model`] is the instance handle: `get`/`set`, dotted-path access,
//!   `set_data`/`export`, `watch`, batching, lifecycle.

mod assign;
mod error;
mod factory;
mod field;
mod gid;
mod model;
mod notify;
mod path;
mod paths;
mod registry;
mod schema;
mod throttle;
mod value;
mod watch;

pub use assign::Assign;
pub use error::{ModelError, Result};
pub use factory::Factory;
pub use field::FieldInfo;
pub use gid::Gid;
pub use model::{ExportOptions, LifeState, Model, ModelConfig, ModelEvent, WeakModel};
pub use notify::BatchToken;
pub use path::{MatchKind, Path, PathPattern};
pub use registry::{Registry, RegistryEvent, SharedRegistry};
pub use schema::{
    DefaultValue, FieldDef, FieldKind, ModelSchema, ModelSchemaBuilder, SchemaPath, SchemaSet,
};
pub use throttle::Throttle;
pub use value::{gid_marker, is_gid_marker, json_gid, FuncValue, RefValue, Value};
pub use watch::{
    ChangeEvent, ChangeHandler, Debounce, EventBus, SubscriptionId, Validator, WatchOptions,
    WatcherHandle,
};
