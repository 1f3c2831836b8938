// SPDX-License-Identifier: Apache-2.0
//! Error types for the replication engine.
use thiserror::Error;

use trellis_model::ModelError;

/// Errors raised by trackers and the coordinator.
#[derive(Debug, Error)]
pub enum SyncError {
    /// An inbound commit's base version fell below the history window; the
    /// update is dropped without mutating the model.
    #[error("stale update: requires base version >= {required}, got {got}")]
    StaleUpdate {
        /// Oldest base version still covered by history.
        required: u64,
        /// Base version the update carried.
        got: u64,
    },
    /// An update targeted a gid that never materialized during the merge.
    #[error("no model for update target gid {0}")]
    UnknownModel(String),
    /// The model engine rejected the applied changes.
    #[error(transparent)]
    Model(#[from] ModelError),
}

/// Convenience alias for fallible replication operations.
pub type Result<T, E = SyncError> = std::result::Result<T, E>;
