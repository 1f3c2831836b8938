// SPDX-License-Identifier: Apache-2.0
//! Notification fan-out, batches, and the watch API.
//!
//! Ordering guarantees (single-threaded, depth-first):
//! - within one model, the pre-notification for a path strictly precedes
//!   its paired change;
//! - validators run before mutation, change handlers after;
//! - upward propagation is synchronous: a child change re-fires on the
//!   parent with the owning field name prepended, recursively;
//! - within one batch, each affected path's final change fires after all
//!   its pre-notifications, in first-touch order, de-duplicated.
use std::rc::Rc;
use std::time::Instant;

use tracing::warn;

use crate::error::{ModelError, Result};
use crate::model::Model;
use crate::path::{MatchKind, Path, PathPattern};
use crate::value::Value;
use crate::watch::{
    ChangeEvent, WatchOptions, Watcher, WatcherHandle, WatcherKind,
};

/// Token returned by [`Model::start_batch`]; only its owner may end the
/// batch level it opened.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BatchToken(u64);

impl Model {
    // ── Watch API ──────────────────────────────────────────────────────

    /// Registers a change watcher at a path pattern.
    ///
    /// The pattern accepts `*` wildcards on intermediate and final
    /// segments; a [`SchemaPath`](crate::SchemaPath) converts into a
    /// checked pattern.
    pub fn watch(
        &self,
        pattern: impl Into<PathPattern>,
        options: WatchOptions,
        handler: impl Fn(&ChangeEvent) + 'static,
    ) -> Result<WatcherHandle> {
        self.ensure_alive()?;
        let pattern = pattern.into();
        let immediate = options.immediate;
        let watcher = Rc::new(Watcher::new(
            self.next_watcher_id(),
            pattern,
            WatcherKind::Handler(Rc::new(handler)),
            options,
        ));
        self.core.watchers.borrow_mut().push(Rc::clone(&watcher));
        if immediate {
            self.fire_immediate(&watcher);
        }
        Ok(WatcherHandle(watcher.id))
    }

    /// Registers a validator at a path pattern. Validators run before
    /// mutation; returning `false` vetoes the whole `set` atomically.
    pub fn watch_validator(
        &self,
        pattern: impl Into<PathPattern>,
        validator: impl Fn(&Value, &Path) -> bool + 'static,
    ) -> Result<WatcherHandle> {
        self.ensure_alive()?;
        let watcher = Rc::new(Watcher::new(
            self.next_watcher_id(),
            pattern.into(),
            WatcherKind::Validator(Rc::new(validator)),
            WatchOptions::default(),
        ));
        self.core.watchers.borrow_mut().push(watcher.clone());
        Ok(WatcherHandle(watcher.id))
    }

    /// Removes a watcher. Returns `false` for unknown handles.
    pub fn remove_watcher(&self, handle: WatcherHandle) -> bool {
        let mut watchers = self.core.watchers.borrow_mut();
        let before = watchers.len();
        watchers.retain(|w| {
            if w.id == handle.0 {
                w.removed.set(true);
                false
            } else {
                true
            }
        });
        watchers.len() != before
    }

    /// Delivers trailing debounce edges that have come due.
    pub fn poll_watchers(&self, now: Instant) {
        for watcher in self.watchers_snapshot() {
            let due = watcher
                .throttle
                .borrow_mut()
                .as_mut()
                .is_some_and(|t| t.poll(now));
            if due {
                let held = watcher.held.borrow_mut().take();
                if let (Some(event), WatcherKind::Handler(handler)) = (held, &watcher.kind) {
                    handler(&event);
                }
            }
        }
    }

    fn next_watcher_id(&self) -> u64 {
        let id = self.core.next_watcher.get();
        self.core.next_watcher.set(id + 1);
        id
    }

    fn watchers_snapshot(&self) -> Vec<Rc<Watcher>> {
        self.core.watchers.borrow().clone()
    }

    fn fire_immediate(&self, watcher: &Rc<Watcher>) {
        let probe = Path::from_segments(watcher.pattern.segments().to_vec());
        for (path, value) in self.resolve_targets(&probe) {
            let WatcherKind::Handler(handler) = &watcher.kind else {
                continue;
            };
            handler(&ChangeEvent {
                path,
                new_value: value,
                old_value: None,
            });
        }
    }

    // ── Batches ────────────────────────────────────────────────────────

    /// Opens a (re-entrant) batch level. While any level is open, change
    /// notifications on this model are deferred and de-duplicated; they
    /// fire at the outermost [`Model::end_batch`] in first-touch order.
    pub fn start_batch(&self) -> BatchToken {
        let mut batch = self.core.batch.borrow_mut();
        batch.next_token += 1;
        let token = batch.next_token;
        batch.stack.push(token);
        BatchToken(token)
    }

    /// Closes a batch level. Only the token that opened the level may
    /// close it; closing the outermost level flushes deferred changes.
    pub fn end_batch(&self, token: BatchToken) -> Result<()> {
        let flush: Option<Vec<Path>> = {
            let mut batch = self.core.batch.borrow_mut();
            match batch.stack.last() {
                Some(&top) if top == token.0 => {
                    batch.stack.pop();
                    if batch.stack.is_empty() {
                        Some(std::mem::take(&mut batch.dirty))
                    } else {
                        None
                    }
                }
                _ => return Err(ModelError::BatchTokenMismatch),
            }
        };
        if let Some(dirty) = flush {
            for path in dirty {
                self.fire_change(&path);
                if let Some((parent, field)) = self.parent() {
                    if !parent.is_destroyed() {
                        parent.notify_change(&path.prefixed(&field));
                    }
                }
            }
        }
        Ok(())
    }

    pub(crate) fn in_batch(&self) -> bool {
        !self.core.batch.borrow().stack.is_empty()
    }

    fn record_dirty(&self, path: &Path) {
        let mut batch = self.core.batch.borrow_mut();
        if batch.stack.is_empty() {
            return;
        }
        if !batch.dirty.iter().any(|p| p == path) {
            batch.dirty.push(path.clone());
        }
    }

    // ── Fan-out ────────────────────────────────────────────────────────

    /// Pre-notification for a change at `path` with the proposed leaf
    /// value. Caches old values for tracking watchers, runs validators,
    /// records the batch dirty entry, and bubbles up the parent chain.
    /// Returns `false` when any validator on any ancestor vetoes.
    pub(crate) fn notify_before(&self, path: &Path, proposed: &Value, run_validators: bool) -> bool {
        for watcher in self.watchers_snapshot() {
            if watcher.removed.get() || !fires(&watcher, path) {
                continue;
            }
            match &watcher.kind {
                WatcherKind::Validator(validator) => {
                    if run_validators && !validator(proposed, path) {
                        return false;
                    }
                }
                WatcherKind::Handler(_) => {
                    if watcher.options.track_old || watcher.options.deep {
                        self.cache_old(&watcher, path);
                    }
                }
            }
        }
        self.record_dirty(path);
        if let Some((parent, field)) = self.parent() {
            if !parent.is_destroyed()
                && !parent.notify_before(&path.prefixed(&field), proposed, run_validators)
            {
                return false;
            }
        }
        true
    }

    /// Change notification for `path`: deferred while batching, otherwise
    /// fired on this model and bubbled to the parent.
    pub(crate) fn notify_change(&self, path: &Path) {
        if self.in_batch() {
            self.record_dirty(path);
            return;
        }
        self.fire_change(path);
        if let Some((parent, field)) = self.parent() {
            if !parent.is_destroyed() {
                parent.notify_change(&path.prefixed(&field));
            }
        }
    }

    fn fire_change(&self, path: &Path) {
        for watcher in self.watchers_snapshot() {
            if watcher.removed.get() || watcher.is_validator() || !fires(&watcher, path) {
                continue;
            }
            self.deliver(&watcher, path);
        }
    }

    /// Captures pre-mutation snapshots at the watcher's event path(s),
    /// first write wins within a batch.
    fn cache_old(&self, watcher: &Rc<Watcher>, path: &Path) {
        let targets = self.resolve_targets(&watcher.pattern.event_path(path));
        let mut cache = watcher.old_cache.borrow_mut();
        for (target_path, value) in targets {
            cache
                .entry(target_path.to_string())
                .or_insert_with(|| value.snapshot());
        }
    }

    /// Delivers a change to one watcher, re-reading the live value at the
    /// watcher's event path (per concrete match when wildcards remain).
    fn deliver(&self, watcher: &Rc<Watcher>, path: &Path) {
        for (target_path, value) in self.resolve_targets(&watcher.pattern.event_path(path)) {
            if let Some(expected) = &watcher.options.expect_kind {
                if !value.is_null() && !expected.admits(&value) {
                    warn!(
                        path = %target_path,
                        expected = %expected,
                        actual = value.kind_name(),
                        "watcher value kind mismatch; skipping delivery"
                    );
                    continue;
                }
            }
            let old_value = watcher.old_cache.borrow_mut().remove(&target_path.to_string());
            let event = ChangeEvent {
                path: target_path,
                new_value: value,
                old_value,
            };
            self.dispatch(watcher, event);
        }
    }

    fn dispatch(&self, watcher: &Rc<Watcher>, event: ChangeEvent) {
        let WatcherKind::Handler(handler) = &watcher.kind else {
            return;
        };
        let fire_now = {
            let mut throttle = watcher.throttle.borrow_mut();
            match throttle.as_mut() {
                None => true,
                Some(t) => t.note(Instant::now()),
            }
        };
        if fire_now {
            handler(&event);
        } else {
            *watcher.held.borrow_mut() = Some(event);
        }
    }

    /// Expands an event path (which may retain pattern wildcards beyond
    /// the changed prefix) into concrete `(path, value)` targets. A fully
    /// concrete path always yields exactly one target, reading `Null` when
    /// the tree no longer reaches it.
    fn resolve_targets(&self, event_path: &Path) -> Vec<(Path, Value)> {
        let has_wildcard = event_path
            .segments()
            .iter()
            .any(|s| s == PathPattern::WILDCARD);
        if has_wildcard {
            self.path_pattern_values(event_path)
        } else {
            let value = self.path_value(event_path).unwrap_or(Value::Null);
            vec![(event_path.clone(), value)]
        }
    }
}

fn fires(watcher: &Watcher, path: &Path) -> bool {
    match watcher.pattern.match_path(path) {
        MatchKind::Exact | MatchKind::PatternDeeper => true,
        MatchKind::PathDeeper => watcher.options.deep,
        MatchKind::None => false,
    }
}
