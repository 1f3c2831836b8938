// SPDX-License-Identifier: Apache-2.0
//! Watchers and event plumbing.
//!
//! A watcher binds a [`PathPattern`] to a handler on one model. Handlers
//! come in two kinds: change handlers (fire after mutation) and validators
//! (fire before mutation; a false verdict vetoes the whole `set`
//! atomically). Flags follow the watcher contract: `immediate` fires once
//! at registration, `deep` also fires for descendants of the watched path,
//! `track_old` captures a structural snapshot of the prior value at the
//! first pre-notification of each batch, `debounce` coalesces bursts.
use std::cell::{Cell, RefCell};
use std::fmt;
use std::rc::Rc;
use std::time::Duration;

use rustc_hash::FxHashMap;

use crate::path::{Path, PathPattern};
use crate::schema::FieldKind;
use crate::throttle::Throttle;
use crate::value::Value;

/// Event delivered to change handlers.
#[derive(Debug, Clone)]
pub struct ChangeEvent {
    /// Concrete path the event applies to, relative to the watched model.
    pub path: Path,
    /// Current (post-mutation) value at `path`.
    pub new_value: Value,
    /// Structural snapshot of the prior value; present only for watchers
    /// registered with `track_old` (or `deep`).
    pub old_value: Option<serde_json::Value>,
}

/// Change handler: invoked after an accepted mutation.
pub type ChangeHandler = Rc<dyn Fn(&ChangeEvent)>;

/// Validator: invoked with the proposed leaf value and the event path
/// before mutation. Returning `false` vetoes the change.
pub type Validator = Rc<dyn Fn(&Value, &Path) -> bool>;

/// Debounce configuration for a watcher: a coalescing window with
/// selectable leading/trailing edges.
#[derive(Debug, Clone, Copy)]
pub struct Debounce {
    /// Coalescing window.
    pub window: Duration,
    /// Deliver the first event of a burst immediately.
    pub leading: bool,
    /// Deliver the last held event once the window elapses (via
    /// [`Model::poll_watchers`](crate::Model::poll_watchers)).
    pub trailing: bool,
}

impl Debounce {
    /// Both edges enabled.
    #[must_use]
    pub fn new(window: Duration) -> Self {
        Self {
            window,
            leading: true,
            trailing: true,
        }
    }

    pub(crate) fn throttle(self) -> Throttle {
        Throttle::new(self.window)
            .leading(self.leading)
            .trailing(self.trailing)
    }
}

impl From<Duration> for Debounce {
    fn from(window: Duration) -> Self {
        Self::new(window)
    }
}

/// Watcher registration flags.
#[derive(Debug, Clone, Default)]
pub struct WatchOptions {
    /// Fire once, synchronously, at registration with the current value.
    pub immediate: bool,
    /// Also fire when descendants of the watched path change.
    pub deep: bool,
    /// Capture and deliver the prior value.
    pub track_old: bool,
    /// Coalesce bursts through a throttle window.
    pub debounce: Option<Debounce>,
    /// Skip delivery (with a log line) when the value is not of this kind.
    pub expect_kind: Option<FieldKind>,
}

impl WatchOptions {
    /// Options with `immediate` set.
    #[must_use]
    pub fn immediate() -> Self {
        Self {
            immediate: true,
            ..Self::default()
        }
    }

    /// Options with `deep` set.
    #[must_use]
    pub fn deep() -> Self {
        Self {
            deep: true,
            ..Self::default()
        }
    }

    /// Options with `track_old` set.
    #[must_use]
    pub fn track_old() -> Self {
        Self {
            track_old: true,
            ..Self::default()
        }
    }
}

/// Handle identifying a registered watcher on its model.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct WatcherHandle(pub(crate) u64);

pub(crate) enum WatcherKind {
    Handler(ChangeHandler),
    Validator(Validator),
}

impl fmt::Debug for WatcherKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Handler(_) => f.write_str("Handler"),
            Self::Validator(_) => f.write_str("Validator"),
        }
    }
}

/// One registered subscription on a model.
#[derive(Debug)]
pub(crate) struct Watcher {
    pub(crate) id: u64,
    pub(crate) pattern: PathPattern,
    pub(crate) kind: WatcherKind,
    pub(crate) options: WatchOptions,
    /// Old-value snapshots keyed by concrete event path, captured at the
    /// first pre-notification of a batch and consumed at delivery.
    pub(crate) old_cache: RefCell<FxHashMap<String, serde_json::Value>>,
    /// Debounce state (present iff `options.debounce`).
    pub(crate) throttle: RefCell<Option<Throttle>>,
    /// Event held for the trailing debounce edge.
    pub(crate) held: RefCell<Option<ChangeEvent>>,
    pub(crate) removed: Cell<bool>,
}

impl Watcher {
    pub(crate) fn new(id: u64, pattern: PathPattern, kind: WatcherKind, options: WatchOptions) -> Self {
        let throttle = options.debounce.map(Debounce::throttle);
        Self {
            id,
            pattern,
            kind,
            options,
            old_cache: RefCell::new(FxHashMap::default()),
            throttle: RefCell::new(throttle),
            held: RefCell::new(None),
            removed: Cell::new(false),
        }
    }

    pub(crate) fn is_validator(&self) -> bool {
        matches!(self.kind, WatcherKind::Validator(_))
    }
}

/// Identifier of an [`EventBus`] subscription.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

/// Small typed subscribe/emit bus.
///
/// Used for registry membership events, model lifecycle events, and
/// coordinator output; handlers run synchronously in subscription order.
pub struct EventBus<E> {
    subscribers: RefCell<Vec<(u64, Rc<dyn Fn(&E)>)>>,
    next_id: Cell<u64>,
}

impl<E> Default for EventBus<E> {
    fn default() -> Self {
        Self {
            subscribers: RefCell::new(Vec::new()),
            next_id: Cell::new(1),
        }
    }
}

impl<E> EventBus<E> {
    /// Creates an empty bus.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Subscribes a handler; returns its id for later removal.
    pub fn subscribe(&self, handler: impl Fn(&E) + 'static) -> SubscriptionId {
        let id = self.next_id.get();
        self.next_id.set(id + 1);
        self.subscribers.borrow_mut().push((id, Rc::new(handler)));
        SubscriptionId(id)
    }

    /// Removes a subscription. Unknown ids are ignored.
    pub fn unsubscribe(&self, id: SubscriptionId) {
        self.subscribers.borrow_mut().retain(|(sid, _)| *sid != id.0);
    }

    /// Emits an event to all current subscribers.
    ///
    /// The subscriber list is snapshotted first, so handlers may subscribe
    /// or unsubscribe re-entrantly without poisoning the borrow.
    pub fn emit(&self, event: &E) {
        let snapshot: Vec<Rc<dyn Fn(&E)>> =
            self.subscribers.borrow().iter().map(|(_, h)| Rc::clone(h)).collect();
        for handler in snapshot {
            handler(event);
        }
    }

    /// Number of live subscriptions.
    #[must_use]
    pub fn len(&self) -> usize {
        self.subscribers.borrow().len()
    }

    /// `true` when nobody is subscribed.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.subscribers.borrow().is_empty()
    }
}

impl<E> fmt::Debug for EventBus<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "EventBus({} subscribers)", self.len())
    }
}

#[cfg(test)]
#[allow(clippy::expect_used, clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn event_bus_subscribe_emit_unsubscribe() {
        let bus: EventBus<u32> = EventBus::new();
        let seen = Rc::new(RefCell::new(Vec::new()));
        let seen2 = Rc::clone(&seen);
        let id = bus.subscribe(move |n| seen2.borrow_mut().push(*n));
        bus.emit(&1);
        bus.emit(&2);
        bus.unsubscribe(id);
        bus.emit(&3);
        assert_eq!(*seen.borrow(), vec![1, 2]);
    }

    #[test]
    fn event_bus_allows_reentrant_unsubscribe() {
        let bus: Rc<EventBus<()>> = Rc::new(EventBus::new());
        let bus2 = Rc::clone(&bus);
        let slot: Rc<RefCell<Option<SubscriptionId>>> = Rc::new(RefCell::new(None));
        let slot2 = Rc::clone(&slot);
        let id = bus.subscribe(move |()| {
            if let Some(id) = slot2.borrow_mut().take() {
                bus2.unsubscribe(id);
            }
        });
        *slot.borrow_mut() = Some(id);
        bus.emit(&());
        assert!(bus.is_empty());
    }
}
