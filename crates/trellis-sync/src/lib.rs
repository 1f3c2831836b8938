// SPDX-License-Identifier: Apache-2.0
//! trellis-sync: optimistic replication for Trellis model trees.
//!
//! Each model gets a [`ChangeTracker`]: a watcher-driven collector that
//! turns local mutations into versioned [`Commit`](trellis_proto::Commit)s
//! and applies inbound commits after subtracting whatever its own history
//! overrides (priority breaks ties). A [`SyncCoordinator`] aggregates the
//! trackers of a whole registry, batching `commit`/`merge` across them and
//! emitting push payloads for the transport.
//!
//! Convergence: with bounded delays, no losses, and no commits older than
//! the history horizon, two replicas exchanging all of each other's
//! commits reach equal exports; the higher-priority replica wins ties.

mod coordinator;
mod error;
mod tracker;

pub use coordinator::{
    CoordinatorEvent, CoordinatorOptions, CoordinatorState, MergeOutcome, SyncCoordinator,
};
pub use error::{Result, SyncError};
pub use tracker::{ChangeTracker, TrackerOptions, DEFAULT_HISTORY_LENGTH};
