// SPDX-License-Identifier: Apache-2.0
//! Edge-configurable throttle for coalescing bursts.
//!
//! The core is cooperative: nothing inside it owns a timer. A [`Throttle`]
//! is fed event timestamps (`note`) and polled for its trailing edge
//! (`poll`) by whoever drives the host loop: debounced watchers through
//! `Model::poll_watchers`, the sync coordinator through its own `poll`.
//! Injected `Instant`s keep tests deterministic.
use std::time::{Duration, Instant};

/// A `{leading, trailing}` throttle window.
#[derive(Debug, Clone)]
pub struct Throttle {
    window: Duration,
    leading: bool,
    trailing: bool,
    window_start: Option<Instant>,
    pending: bool,
}

impl Throttle {
    /// Creates a throttle with both edges enabled.
    #[must_use]
    pub fn new(window: Duration) -> Self {
        Self {
            window,
            leading: true,
            trailing: true,
            window_start: None,
            pending: false,
        }
    }

    /// Enables/disables the leading edge.
    #[must_use]
    pub fn leading(mut self, on: bool) -> Self {
        self.leading = on;
        self
    }

    /// Enables/disables the trailing edge.
    #[must_use]
    pub fn trailing(mut self, on: bool) -> Self {
        self.trailing = on;
        self
    }

    /// The configured window.
    #[must_use]
    pub fn window(&self) -> Duration {
        self.window
    }

    /// Records an event at `now`. Returns `true` when the event should fire
    /// immediately (leading edge of a fresh window); otherwise the event is
    /// held for the trailing edge.
    pub fn note(&mut self, now: Instant) -> bool {
        let fresh = self
            .window_start
            .is_none_or(|start| now.duration_since(start) >= self.window);
        if fresh {
            self.window_start = Some(now);
            if self.leading {
                self.pending = false;
                return true;
            }
        }
        self.pending = self.trailing;
        false
    }

    /// Polls the trailing edge. Returns `true` once per window in which
    /// events were held, after the window has elapsed.
    pub fn poll(&mut self, now: Instant) -> bool {
        if !self.pending {
            return false;
        }
        let Some(start) = self.window_start else {
            self.pending = false;
            return false;
        };
        if now.duration_since(start) >= self.window {
            self.pending = false;
            self.window_start = Some(now);
            return true;
        }
        false
    }

    /// `true` while an event is held for the trailing edge.
    #[must_use]
    pub fn is_pending(&self) -> bool {
        self.pending
    }

    /// Drops any held event and closes the window.
    pub fn reset(&mut self) {
        self.window_start = None;
        self.pending = false;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn leading_fires_first_event_then_holds() {
        let mut t = Throttle::new(Duration::from_millis(100));
        let t0 = Instant::now();
        assert!(t.note(t0));
        assert!(!t.note(t0 + Duration::from_millis(10)));
        assert!(t.is_pending());
        assert!(!t.poll(t0 + Duration::from_millis(50)));
        assert!(t.poll(t0 + Duration::from_millis(100)));
        assert!(!t.poll(t0 + Duration::from_millis(120)));
    }

    #[test]
    fn trailing_only_never_fires_on_note() {
        let mut t = Throttle::new(Duration::from_millis(100)).leading(false);
        let t0 = Instant::now();
        assert!(!t.note(t0));
        assert!(t.is_pending());
        assert!(t.poll(t0 + Duration::from_millis(100)));
    }
}
