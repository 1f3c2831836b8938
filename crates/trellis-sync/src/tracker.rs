// SPDX-License-Identifier: Apache-2.0
//! Per-model change collection and inbound merge.
//!
//! A tracker is one replica's authority over one model: it collects
//! outbound changes through two watchers (`*` for direct fields, plus
//! `field.*` per list field), produces versioned [`Commit`]s, and applies
//! inbound commits after subtracting everything its own history already
//! overrides. The bounded history is the merge window: an update based
//! below it is stale and rejected outright.
use std::cell::{Cell, RefCell};
use std::collections::{BTreeMap, VecDeque};
use std::rc::{Rc, Weak};

use rustc_hash::FxHashSet;
use serde_json::Value as Json;
use tracing::debug;

use trellis_model::{
    ExportOptions, FieldKind, Gid, Model, Value, WatchOptions, WatcherHandle,
};
use trellis_proto::Commit;

use crate::error::{Result, SyncError};

/// Default bounded-history length.
pub const DEFAULT_HISTORY_LENGTH: usize = 20;

/// Configuration for a [`ChangeTracker`].
#[derive(Debug, Clone)]
pub struct TrackerOptions {
    /// Identifier of the owning coordinator, stamped into commits.
    pub sync_id: String,
    /// Tie-breaker between peers at equal base versions.
    pub priority: i64,
    /// Maximum number of commits retained as the merge window.
    pub history_length: usize,
}

impl Default for TrackerOptions {
    fn default() -> Self {
        Self {
            sync_id: String::new(),
            priority: 0,
            history_length: DEFAULT_HISTORY_LENGTH,
        }
    }
}

struct TrackerCore {
    model: Model,
    sync_id: String,
    priority: i64,
    history_length: usize,
    version: Cell<u64>,
    history: RefCell<VecDeque<Commit>>,
    /// Latest value per touched top-level field path, pending commit.
    changes: RefCell<BTreeMap<String, Value>>,
    /// Gids this tracker has announced (or received); they travel as
    /// `{gid}` markers.
    known: RefCell<FxHashSet<Gid>>,
    /// Gids first observed in a local change; their next emission is a
    /// full export.
    fresh: RefCell<FxHashSet<Gid>>,
    watchers: RefCell<Vec<WatcherHandle>>,
    active: Cell<bool>,
    /// Set while applying an inbound commit so the collectors do not echo
    /// remote changes back as local ones.
    muted: Cell<bool>,
}

/// Change collector/applier for one model.
#[derive(Clone)]
pub struct ChangeTracker {
    core: Rc<TrackerCore>,
}

impl ChangeTracker {
    /// Creates an inactive tracker for `model`.
    #[must_use]
    pub fn new(model: &Model, options: &TrackerOptions) -> Self {
        let core = Rc::new(TrackerCore {
            model: model.clone(),
            sync_id: options.sync_id.clone(),
            priority: options.priority,
            history_length: options.history_length.max(1),
            version: Cell::new(0),
            history: RefCell::new(VecDeque::new()),
            changes: RefCell::new(BTreeMap::new()),
            known: RefCell::new(FxHashSet::default()),
            fresh: RefCell::new(FxHashSet::default()),
            watchers: RefCell::new(Vec::new()),
            active: Cell::new(false),
            muted: Cell::new(false),
        });
        let tracker = Self { core };
        tracker.seed_known();
        tracker
    }

    /// The tracked model.
    #[must_use]
    pub fn model(&self) -> Model {
        self.core.model.clone()
    }

    /// Current tracker version.
    #[must_use]
    pub fn version(&self) -> u64 {
        self.core.version.get()
    }

    /// The tracker's priority.
    #[must_use]
    pub fn priority(&self) -> i64 {
        self.core.priority
    }

    /// Models owned at tracker birth travel via full state, never as fresh
    /// payloads.
    fn seed_known(&self) {
        let mut known = self.core.known.borrow_mut();
        for name in self.core.model.field_names() {
            if let Ok(value) = self.core.model.get_raw(&name) {
                note_owned_gids(&value, &mut known);
            }
        }
    }

    /// Installs the collectors: `*` for direct fields, `field.*` per list
    /// field. Idempotent.
    pub fn start(&self) {
        if self.core.active.get() {
            return;
        }
        self.core.active.set(true);
        let mut patterns = vec!["*".to_owned()];
        for name in self.core.model.field_names() {
            if let Some(info) = self.core.model.field_info(&name) {
                if matches!(info.def.kind, FieldKind::List(_)) {
                    patterns.push(format!("{name}.*"));
                }
            }
        }
        let mut handles = self.core.watchers.borrow_mut();
        for pattern in patterns {
            let weak = Rc::downgrade(&self.core);
            let handle = self.core.model.watch(pattern.as_str(), WatchOptions::default(), move |event| {
                collect(&weak, &event.path);
            });
            if let Ok(handle) = handle {
                handles.push(handle);
            }
        }
    }

    /// Removes the collectors. Pending changes survive.
    pub fn stop(&self) {
        self.core.active.set(false);
        for handle in self.core.watchers.borrow_mut().drain(..) {
            self.core.model.remove_watcher(handle);
        }
    }

    /// `true` while uncommitted changes are pending.
    #[must_use]
    pub fn has_changes(&self) -> bool {
        !self.core.changes.borrow().is_empty()
    }

    /// Drops pending changes without committing.
    pub fn clear_changes(&self) {
        self.core.changes.borrow_mut().clear();
    }

    /// The retained commit window, oldest first.
    #[must_use]
    pub fn history(&self) -> Vec<Commit> {
        self.core.history.borrow().iter().cloned().collect()
    }

    // ── Outbound ───────────────────────────────────────────────────────

    /// Produces the next commit, or `None` when nothing changed (quiet
    /// commits do not burn versions).
    pub fn commit(&self) -> Option<Commit> {
        let pending = std::mem::take(&mut *self.core.changes.borrow_mut());
        if pending.is_empty() {
            return None;
        }
        let mut changes = BTreeMap::new();
        for (path, value) in &pending {
            changes.insert(path.clone(), self.encode(value));
        }
        let version = self.core.version.get();
        let update = Commit {
            sync_id: self.core.sync_id.clone(),
            version: version + 1,
            base_version: version,
            priority: self.core.priority,
            changes,
        };
        self.push_history(update.clone());
        self.core.version.set(update.version);
        Some(update)
    }

    /// Encodes one collected value per the wire grammar: fresh models in
    /// full, known models as `{gid}`, lists item-by-item, primitives as
    /// themselves.
    fn encode(&self, value: &Value) -> Json {
        match value {
            Value::Model(model) => {
                let gid = model.gid();
                if self.core.fresh.borrow_mut().remove(&gid) {
                    let exported = model.export();
                    let mut known = self.core.known.borrow_mut();
                    note_exported_gids(&exported, &mut known);
                    exported
                } else {
                    trellis_model::gid_marker(&gid)
                }
            }
            Value::List(items) => Json::Array(items.iter().map(|v| self.encode(v)).collect()),
            other => other.export(&ExportOptions::default()),
        }
    }

    fn push_history(&self, commit: Commit) {
        let mut history = self.core.history.borrow_mut();
        history.push_back(commit);
        while history.len() > self.core.history_length {
            history.pop_front();
        }
    }

    // ── Inbound ────────────────────────────────────────────────────────

    /// Applies an inbound commit.
    ///
    /// The effective change set subtracts every key our own history (and
    /// uncommitted changes) already overrides, with the priority advantage
    /// breaking ties at equal base versions. The filtered commit (what
    /// this tracker considers authoritative for its peers) is recorded in
    /// history and returned.
    pub fn merge(&self, update: &Commit) -> Result<Commit> {
        let min_base = self.core.history.borrow().front().map(|c| c.base_version);
        if let Some(required) = min_base {
            if update.base_version < required {
                return Err(SyncError::StaleUpdate {
                    required,
                    got: update.base_version,
                });
            }
        }
        let advantage = u64::from(self.core.priority > update.priority);
        let mut changes = update.changes.clone();
        for committed in self.core.history.borrow().iter() {
            if committed.base_version + advantage > update.base_version {
                for key in committed.changes.keys() {
                    changes.remove(key);
                }
            }
        }
        if self.core.version.get() + advantage > update.base_version {
            for key in self.core.changes.borrow().keys() {
                changes.remove(key);
            }
        }

        if !changes.is_empty() {
            let data = Json::Object(changes.clone().into_iter().collect());
            {
                let mut known = self.core.known.borrow_mut();
                note_exported_gids(&data, &mut known);
            }
            // Inbound payloads apply with per-field reversion: a bad field
            // reverts alone while the rest of the batch proceeds.
            let was_strict = self.core.model.is_strict();
            self.core.model.set_strict(false);
            self.core.muted.set(true);
            let applied = self.core.model.set_data(&data, true);
            self.core.muted.set(false);
            self.core.model.set_strict(was_strict);
            applied?;
        } else {
            debug!(
                sync_id = %update.sync_id,
                base_version = update.base_version,
                "inbound commit fully overridden by local history"
            );
        }

        let version = self.core.version.get().max(update.version);
        self.core.version.set(version);
        let filtered = Commit {
            sync_id: update.sync_id.clone(),
            version: update.version,
            base_version: update.base_version,
            priority: update.priority,
            changes,
        };
        self.push_history(filtered.clone());
        Ok(filtered)
    }

    /// Full shallow state as a commit (`base_version = 0` so a fresh
    /// replica with empty history accepts it).
    #[must_use]
    pub fn create_full_state(&self) -> Commit {
        let options = ExportOptions {
            shallow: true,
            ..ExportOptions::default()
        };
        let exported = self.core.model.export_with(&options);
        let changes: BTreeMap<String, Json> = match exported {
            Json::Object(map) => map.into_iter().collect(),
            _ => BTreeMap::new(),
        };
        Commit {
            sync_id: self.core.sync_id.clone(),
            version: self.core.version.get(),
            base_version: 0,
            priority: self.core.priority,
            changes,
        }
    }
}

impl std::fmt::Debug for ChangeTracker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "ChangeTracker({:?} v{} {} pending)",
            self.core.model,
            self.core.version.get(),
            self.core.changes.borrow().len()
        )
    }
}

/// Collector body shared by all tracker watchers: stash the latest value
/// of the touched top-level field and note fresh models.
fn collect(core: &Weak<TrackerCore>, path: &trellis_model::Path) {
    let Some(core) = core.upgrade() else {
        return;
    };
    if core.muted.get() || !core.active.get() {
        return;
    }
    let Some(head) = path.head() else {
        return;
    };
    let Ok(value) = core.model.get_raw(head) else {
        return;
    };
    {
        let mut known = core.known.borrow_mut();
        let mut fresh = core.fresh.borrow_mut();
        mark_fresh(&value, &mut known, &mut fresh);
    }
    core.changes.borrow_mut().insert(head.to_owned(), value);
}

fn mark_fresh(value: &Value, known: &mut FxHashSet<Gid>, fresh: &mut FxHashSet<Gid>) {
    match value {
        Value::Model(model) => {
            let gid = model.gid();
            if known.insert(gid.clone()) {
                fresh.insert(gid);
            }
        }
        Value::List(items) => {
            for item in items {
                mark_fresh(item, known, fresh);
            }
        }
        _ => {}
    }
}

/// Seeds `known` with every model gid reachable as an owned value.
fn note_owned_gids(value: &Value, known: &mut FxHashSet<Gid>) {
    match value {
        Value::Model(model) => {
            known.insert(model.gid());
            for name in model.field_names() {
                if let Ok(nested) = model.get_raw(&name) {
                    note_owned_gids(&nested, known);
                }
            }
        }
        Value::List(items) => {
            for item in items {
                note_owned_gids(item, known);
            }
        }
        _ => {}
    }
}

/// Records every gid appearing in exported/inbound payload data.
fn note_exported_gids(json: &Json, known: &mut FxHashSet<Gid>) {
    match json {
        Json::Object(map) => {
            if let Some(gid) = map.get("gid").and_then(Gid::from_json) {
                known.insert(gid);
            }
            for nested in map.values() {
                note_exported_gids(nested, known);
            }
        }
        Json::Array(items) => {
            for item in items {
                note_exported_gids(item, known);
            }
        }
        _ => {}
    }
}
