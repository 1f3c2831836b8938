// SPDX-License-Identifier: Apache-2.0
//! Registry-wide replication: one tracker per model, batched exchanges.
//!
//! The coordinator follows registry membership (trackers attach on `added`,
//! drop on `removed`), batches `commit` across all trackers into one push
//! payload, and dispatches inbound payloads to the matching trackers.
//! Because a child model may arrive before the update that creates it (or
//! vice versa), `merge` drains a retry queue: applying a parent's update
//! constructs missing children, which registers them, which attaches their
//! trackers, which lets the queued updates land on the next pass. The loop
//! terminates as soon as a pass stops shrinking the queue.
use std::cell::{Cell, RefCell};
use std::rc::{Rc, Weak};
use std::time::{Duration, Instant};

use rustc_hash::FxHashMap;
use tracing::warn;

use trellis_model::{
    EventBus, Gid, Model, RegistryEvent, SharedRegistry, SubscriptionId, Throttle,
};
use trellis_proto::{Commit, CommitSet};

use crate::error::SyncError;
use crate::tracker::{ChangeTracker, TrackerOptions, DEFAULT_HISTORY_LENGTH};

/// Configuration for a [`SyncCoordinator`].
#[derive(Debug, Clone)]
pub struct CoordinatorOptions {
    /// Coordinator identifier; a fresh UUID when not supplied.
    pub sync_id: Option<String>,
    /// Priority stamped into every commit (ties at equal base versions go
    /// to the higher priority).
    pub priority: i64,
    /// History window handed to each tracker.
    pub history_length: usize,
    /// Trailing auto-commit window driven by [`SyncCoordinator::poll`].
    pub auto_commit: Option<Duration>,
}

impl Default for CoordinatorOptions {
    fn default() -> Self {
        Self {
            sync_id: None,
            priority: 0,
            history_length: DEFAULT_HISTORY_LENGTH,
            auto_commit: None,
        }
    }
}

/// Lifecycle of a coordinator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CoordinatorState {
    /// Constructed; trackers exist but are not collecting.
    Idle,
    /// Trackers are collecting.
    Started,
    /// Collection suspended.
    Stopped,
    /// Torn down; unusable.
    Destroyed,
}

/// Events emitted by a coordinator.
#[derive(Debug, Clone)]
pub enum CoordinatorEvent {
    /// A `commit` pass produced these commits (the transport pushes them).
    NewCommits(CommitSet),
}

/// Result of a [`SyncCoordinator::merge`] pass.
#[derive(Debug, Default)]
pub struct MergeOutcome {
    /// Filtered commit per applied gid: what this replica considers
    /// authoritative for its peers.
    pub applied: CommitSet,
    /// Updates that failed (stale, invalid, or never found a model).
    pub failed: Vec<(String, SyncError)>,
}

struct CoordCore {
    sync_id: String,
    priority: i64,
    history_length: usize,
    registry: SharedRegistry,
    trackers: RefCell<FxHashMap<Gid, ChangeTracker>>,
    events: EventBus<CoordinatorEvent>,
    state: Cell<CoordinatorState>,
    throttle: RefCell<Option<Throttle>>,
    registry_sub: Cell<Option<SubscriptionId>>,
}

/// Aggregates change trackers for every model under a registry.
#[derive(Clone)]
pub struct SyncCoordinator {
    core: Rc<CoordCore>,
}

impl SyncCoordinator {
    /// Creates a coordinator over `registry` and attaches trackers for the
    /// models already present.
    #[must_use]
    pub fn new(registry: SharedRegistry, options: &CoordinatorOptions) -> Self {
        let sync_id = options
            .sync_id
            .clone()
            .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());
        let throttle = options
            .auto_commit
            .map(|window| Throttle::new(window).leading(false));
        let core = Rc::new(CoordCore {
            sync_id,
            priority: options.priority,
            history_length: options.history_length,
            registry: Rc::clone(&registry),
            trackers: RefCell::new(FxHashMap::default()),
            events: EventBus::new(),
            state: Cell::new(CoordinatorState::Idle),
            throttle: RefCell::new(throttle),
            registry_sub: Cell::new(None),
        });
        for model in registry.all() {
            attach_tracker(&core, &model);
        }
        let weak = Rc::downgrade(&core);
        let sub = registry.on_event(move |event| on_registry_event(&weak, event));
        core.registry_sub.set(Some(sub));
        Self { core }
    }

    /// The coordinator's identifier (stamped into commits).
    #[must_use]
    pub fn sync_id(&self) -> &str {
        &self.core.sync_id
    }

    /// Current lifecycle state.
    #[must_use]
    pub fn state(&self) -> CoordinatorState {
        self.core.state.get()
    }

    /// The tracker for `gid`, when one exists.
    #[must_use]
    pub fn tracker(&self, gid: &Gid) -> Option<ChangeTracker> {
        self.core.trackers.borrow().get(gid).cloned()
    }

    /// Number of attached trackers.
    #[must_use]
    pub fn len(&self) -> usize {
        self.core.trackers.borrow().len()
    }

    /// `true` when no trackers are attached.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.core.trackers.borrow().is_empty()
    }

    /// Subscribes to coordinator events.
    pub fn on_event(&self, handler: impl Fn(&CoordinatorEvent) + 'static) -> SubscriptionId {
        self.core.events.subscribe(handler)
    }

    /// Removes an event subscription.
    pub fn unsubscribe(&self, id: SubscriptionId) {
        self.core.events.unsubscribe(id);
    }

    /// Activates all trackers.
    pub fn start(&self) {
        if self.core.state.get() == CoordinatorState::Destroyed {
            return;
        }
        self.core.state.set(CoordinatorState::Started);
        for tracker in self.trackers_snapshot() {
            tracker.start();
        }
    }

    /// Suspends collection.
    pub fn stop(&self) {
        if self.core.state.get() == CoordinatorState::Destroyed {
            return;
        }
        self.core.state.set(CoordinatorState::Stopped);
        for tracker in self.trackers_snapshot() {
            tracker.stop();
        }
    }

    /// Tears the coordinator down: trackers stop and detach, the registry
    /// subscription is dropped.
    pub fn destroy(&self) {
        if self.core.state.get() == CoordinatorState::Destroyed {
            return;
        }
        for tracker in self.trackers_snapshot() {
            tracker.stop();
        }
        self.core.trackers.borrow_mut().clear();
        if let Some(sub) = self.core.registry_sub.take() {
            self.core.registry.unsubscribe(sub);
        }
        self.core.state.set(CoordinatorState::Destroyed);
    }

    /// `true` while any tracker holds uncommitted changes.
    #[must_use]
    pub fn has_changes(&self) -> bool {
        self.trackers_snapshot().iter().any(ChangeTracker::has_changes)
    }

    /// Collects non-empty commits from every tracker, keyed by gid, and
    /// emits [`CoordinatorEvent::NewCommits`] when anything was produced.
    pub fn commit(&self) -> CommitSet {
        let mut out = CommitSet::new();
        let mut entries: Vec<(Gid, ChangeTracker)> = self
            .core
            .trackers
            .borrow()
            .iter()
            .map(|(g, t)| (g.clone(), t.clone()))
            .collect();
        entries.sort_by(|(a, _), (b, _)| a.cmp(b));
        for (gid, tracker) in entries {
            if let Some(commit) = tracker.commit() {
                out.insert(gid.to_key(), commit);
            }
        }
        if !out.is_empty() {
            self.core.events.emit(&CoordinatorEvent::NewCommits(out.clone()));
        }
        out
    }

    /// Drives the trailing auto-commit edge. Returns the commits produced
    /// by this tick, if the window elapsed with changes pending.
    pub fn poll(&self, now: Instant) -> Option<CommitSet> {
        let due = {
            let mut slot = self.core.throttle.borrow_mut();
            let throttle = slot.as_mut()?;
            let due = throttle.poll(now);
            if !due && self.has_changes() {
                throttle.note(now);
            }
            due
        };
        if !due {
            return None;
        }
        let commits = self.commit();
        (!commits.is_empty()).then_some(commits)
    }

    /// Dispatches inbound commits to their trackers, retrying updates
    /// whose model does not exist yet (it may be created by another update
    /// in the same payload). Stale or invalid updates are logged and
    /// surfaced in the outcome without terminating the pass.
    pub fn merge(&self, updates: &CommitSet) -> MergeOutcome {
        let mut outcome = MergeOutcome::default();
        let mut queue: Vec<(String, Commit)> =
            updates.iter().map(|(k, c)| (k.clone(), c.clone())).collect();
        loop {
            let before = queue.len();
            if before == 0 {
                break;
            }
            let mut retry = Vec::new();
            for (key, commit) in queue {
                let gid = Gid::from_key(&key);
                let tracker = self.tracker(&gid);
                match tracker {
                    None => retry.push((key, commit)),
                    Some(tracker) => match tracker.merge(&commit) {
                        Ok(filtered) => {
                            outcome.applied.insert(key, filtered);
                        }
                        Err(error) => {
                            warn!(gid = %key, %error, "dropping inbound commit");
                            outcome.failed.push((key, error));
                        }
                    },
                }
            }
            queue = retry;
            if queue.len() >= before {
                break;
            }
        }
        for (key, _) in queue {
            warn!(gid = %key, "update target never materialized");
            outcome.failed.push((key.clone(), SyncError::UnknownModel(key)));
        }
        outcome
    }

    /// Builds the full-state payload: one commit per model whose change
    /// map is the full shallow export.
    #[must_use]
    pub fn create_full_state(&self) -> CommitSet {
        let mut out = CommitSet::new();
        for (gid, tracker) in self.core.trackers.borrow().iter() {
            out.insert(gid.to_key(), tracker.create_full_state());
        }
        out
    }

    fn trackers_snapshot(&self) -> Vec<ChangeTracker> {
        self.core.trackers.borrow().values().cloned().collect()
    }
}

impl std::fmt::Debug for SyncCoordinator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "SyncCoordinator({} trackers, {:?})",
            self.len(),
            self.state()
        )
    }
}

fn attach_tracker(core: &Rc<CoordCore>, model: &Model) {
    let options = TrackerOptions {
        sync_id: core.sync_id.clone(),
        priority: core.priority,
        history_length: core.history_length,
    };
    let tracker = ChangeTracker::new(model, &options);
    if core.state.get() == CoordinatorState::Started {
        tracker.start();
    }
    core.trackers.borrow_mut().insert(model.gid(), tracker);
}

fn on_registry_event(core: &Weak<CoordCore>, event: &RegistryEvent) {
    let Some(core) = core.upgrade() else {
        return;
    };
    if core.state.get() == CoordinatorState::Destroyed {
        return;
    }
    match event {
        RegistryEvent::Added(model) => attach_tracker(&core, model),
        RegistryEvent::Removed(model) => {
            let removed = core.trackers.borrow_mut().remove(&model.gid());
            if let Some(tracker) = removed {
                tracker.stop();
            }
        }
    }
}
