// SPDX-License-Identifier: Apache-2.0
//! Process-local gid → model index.
//!
//! The registry is a weak index: ownership of models lives in the tree
//! (parents hold their children; callers hold their roots). Lookups are
//! O(1); there is no traversal. Registration is scoped by the factory that
//! created the model; two models from different registries never share a
//! hierarchy.
use std::cell::Cell;
use std::cell::RefCell;
use std::rc::Rc;

use rustc_hash::FxHashMap;

use crate::error::{ModelError, Result};
use crate::gid::Gid;
use crate::model::{Model, WeakModel};
use crate::watch::{EventBus, SubscriptionId};

/// Membership event emitted by a [`Registry`].
#[derive(Debug, Clone)]
pub enum RegistryEvent {
    /// A model was registered.
    Added(Model),
    /// A model was removed (destroyed or explicitly deregistered).
    Removed(Model),
}

/// Gid-keyed index of the models created by one factory.
pub struct Registry {
    items: RefCell<FxHashMap<Gid, WeakModel>>,
    events: EventBus<RegistryEvent>,
    max_int: Cell<i64>,
}

impl Default for Registry {
    fn default() -> Self {
        Self::new()
    }
}

impl Registry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self {
            items: RefCell::new(FxHashMap::default()),
            events: EventBus::new(),
            max_int: Cell::new(0),
        }
    }

    /// Registers `model` under its gid.
    ///
    /// # Errors
    /// [`ModelError::DuplicateGid`] when a live model already holds the gid.
    pub fn register(&self, model: &Model) -> Result<()> {
        let gid = model.gid();
        {
            let mut items = self.items.borrow_mut();
            if let Some(existing) = items.get(&gid) {
                if let Some(live) = existing.upgrade() {
                    if !Model::ptr_eq(&live, model) {
                        return Err(ModelError::DuplicateGid(gid));
                    }
                    return Ok(());
                }
            }
            items.insert(gid.clone(), model.downgrade());
        }
        if let Some(n) = gid.as_int() {
            if n > self.max_int.get() {
                self.max_int.set(n);
            }
        }
        self.events.emit(&RegistryEvent::Added(model.clone()));
        Ok(())
    }

    /// Removes `model` from the index. A no-op when the gid maps elsewhere.
    pub fn remove(&self, model: &Model) {
        let gid = model.gid();
        let removed = {
            let mut items = self.items.borrow_mut();
            match items.get(&gid) {
                Some(entry) => {
                    let same = entry.upgrade().as_ref().is_none_or(|m| Model::ptr_eq(m, model));
                    if same {
                        items.remove(&gid);
                    }
                    same
                }
                None => false,
            }
        };
        if removed {
            self.events.emit(&RegistryEvent::Removed(model.clone()));
        }
    }

    /// Looks up a model by gid.
    #[must_use]
    pub fn by_gid(&self, gid: &Gid) -> Option<Model> {
        let upgraded = self.items.borrow().get(gid).and_then(WeakModel::upgrade);
        if upgraded.is_none() {
            // Prune a dead entry so the gid can be reused.
            self.items.borrow_mut().retain(|g, w| g != gid || w.upgrade().is_some());
        }
        upgraded
    }

    /// Looks up a model by gid, requiring it to be of schema `type_name`
    /// (or a subtype).
    #[must_use]
    pub fn by_gid_as(&self, gid: &Gid, type_name: &str) -> Option<Model> {
        self.by_gid(gid).filter(|m| m.schema().is_a(type_name))
    }

    /// All live models, ordered by gid.
    #[must_use]
    pub fn all(&self) -> Vec<Model> {
        let mut entries: Vec<(Gid, Model)> = self
            .items
            .borrow()
            .iter()
            .filter_map(|(g, w)| w.upgrade().map(|m| (g.clone(), m)))
            .collect();
        entries.sort_by(|(a, _), (b, _)| a.cmp(b));
        entries.into_iter().map(|(_, m)| m).collect()
    }

    /// Number of live entries.
    #[must_use]
    pub fn len(&self) -> usize {
        self.items.borrow().values().filter(|w| w.upgrade().is_some()).count()
    }

    /// `true` when no live models are registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// `true` when the gid is taken by a live model.
    #[must_use]
    pub fn contains(&self, gid: &Gid) -> bool {
        self.by_gid(gid).is_some()
    }

    /// Next free integer gid (one above the maximum ever registered).
    #[must_use]
    pub fn next_int_gid(&self) -> Gid {
        Gid::Int(self.max_int.get() + 1)
    }

    /// Subscribes to membership events.
    pub fn on_event(&self, handler: impl Fn(&RegistryEvent) + 'static) -> SubscriptionId {
        self.events.subscribe(handler)
    }

    /// Removes a membership subscription.
    pub fn unsubscribe(&self, id: SubscriptionId) {
        self.events.unsubscribe(id);
    }
}

impl std::fmt::Debug for Registry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Registry({} live)", self.len())
    }
}

/// Shared handle to a registry.
pub type SharedRegistry = Rc<Registry>;

#[cfg(test)]
#[allow(clippy::expect_used, clippy::unwrap_used)]
mod tests {
    use std::cell::RefCell;

    use super::*;
    use crate::model::{Model, ModelConfig};
    use crate::schema::ModelSchema;

    fn sample(gid: Gid) -> Model {
        let schema = ModelSchema::builder("Item").build().unwrap();
        Model::construct(
            &schema,
            None,
            None,
            &ModelConfig {
                gid: Some(gid),
                strict: None,
            },
        )
        .unwrap()
    }

    #[test]
    fn register_rejects_duplicate_gids_and_reregistration_is_idempotent() {
        let registry = Registry::new();
        let a = sample(Gid::Int(1));
        registry.register(&a).unwrap();
        registry.register(&a).unwrap();

        let b = sample(Gid::Int(1));
        assert!(matches!(registry.register(&b), Err(ModelError::DuplicateGid(Gid::Int(1)))));
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn membership_events_fire_for_add_and_remove() {
        let registry = Registry::new();
        let log: Rc<RefCell<Vec<&'static str>>> = Rc::default();
        let sink = Rc::clone(&log);
        registry.on_event(move |event| {
            sink.borrow_mut().push(match event {
                RegistryEvent::Added(_) => "added",
                RegistryEvent::Removed(_) => "removed",
            });
        });

        let model = sample(Gid::Int(3));
        registry.register(&model).unwrap();
        registry.remove(&model);
        registry.remove(&model);
        assert_eq!(*log.borrow(), vec!["added", "removed"]);
    }

    #[test]
    fn dead_entries_free_their_gid() {
        let registry = Registry::new();
        {
            let transient = sample(Gid::Int(9));
            registry.register(&transient).unwrap();
            assert!(registry.contains(&Gid::Int(9)));
        }
        // The weak entry is dead; the gid becomes available again.
        assert!(registry.by_gid(&Gid::Int(9)).is_none());
        let fresh = sample(Gid::Int(9));
        registry.register(&fresh).unwrap();
    }

    #[test]
    fn integer_allocation_tracks_the_maximum() {
        let registry = Registry::new();
        assert_eq!(registry.next_int_gid(), Gid::Int(1));
        let a = sample(Gid::Int(5));
        registry.register(&a).unwrap();
        assert_eq!(registry.next_int_gid(), Gid::Int(6));
        let b = sample(Gid::Str("named".into()));
        registry.register(&b).unwrap();
        assert_eq!(registry.next_int_gid(), Gid::Int(6));
    }

    #[test]
    fn all_returns_live_models_in_gid_order() {
        let registry = Registry::new();
        let b = sample(Gid::Int(2));
        let a = sample(Gid::Int(1));
        registry.register(&b).unwrap();
        registry.register(&a).unwrap();
        let gids: Vec<Gid> = registry.all().iter().map(Model::gid).collect();
        assert_eq!(gids, vec![Gid::Int(1), Gid::Int(2)]);
    }
}
