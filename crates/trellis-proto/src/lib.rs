// SPDX-License-Identifier: Apache-2.0
//! Wire schema for Trellis replication.
//!
//! A peer exchange is a stream of [`Message`]s; the payload of `push` and
//! `full-state` is a [`CommitSet`]: a mapping from gid (as a string key,
//! since JSON object keys are strings; integer gids render in decimal) to one
//! [`Commit`] per model.
//!
//! The encoded-value grammar inside `changes` is plain JSON:
//! - primitives carry themselves;
//! - an object with at least a `gid` key is a model payload, and `{gid}`
//!   alone is the marker for a reference or an already-known model;
//! - an array is a list payload, with `{gid}` meaning the same inside it.
//!
//! The transport that carries these messages is out of scope; only the
//! shapes and the length-prefixed packet framing are defined here.

mod wire;

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

pub use wire::{Packet, WireError};

/// A versioned, prioritized change-set produced by one change tracker.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Commit {
    /// Identifier of the originating coordinator.
    #[serde(rename = "syncID")]
    pub sync_id: String,
    /// Version this commit advances its tracker to (monotone, ≥ 1).
    pub version: u64,
    /// Tracker version the changes were built on.
    pub base_version: u64,
    /// Tie-breaker between peers at equal base versions.
    pub priority: i64,
    /// Field path → encoded value.
    pub changes: BTreeMap<String, serde_json::Value>,
}

impl Commit {
    /// `true` when the commit carries no changes.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.changes.is_empty()
    }
}

/// Per-model commits keyed by gid (wire-key form).
pub type CommitSet = BTreeMap<String, Commit>;

/// Messages exchanged between peers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "kebab-case")]
pub enum Message {
    /// Server → client after accept: the connection's identifier.
    Connection {
        /// Connection identifier assigned by the server.
        id: String,
    },
    /// Incremental commits, either direction.
    Push(CommitSet),
    /// Full shallow state, server → client on accept.
    FullState(CommitSet),
    /// Error report, either direction.
    Error {
        /// Human-readable description.
        message: String,
    },
}

#[cfg(test)]
#[allow(clippy::expect_used, clippy::unwrap_used)]
mod tests {
    use super::*;

    fn sample_commit() -> Commit {
        let mut changes = BTreeMap::new();
        changes.insert("name".to_owned(), serde_json::json!("left"));
        changes.insert("child".to_owned(), serde_json::json!({ "gid": 7 }));
        changes.insert("tags".to_owned(), serde_json::json!(["a", "b"]));
        Commit {
            sync_id: "sync-1".to_owned(),
            version: 3,
            base_version: 2,
            priority: 1,
            changes,
        }
    }

    #[test]
    fn commit_serializes_with_wire_field_names() {
        let json = serde_json::to_value(sample_commit()).unwrap();
        assert_eq!(json["syncID"], serde_json::json!("sync-1"));
        assert_eq!(json["baseVersion"], serde_json::json!(2));
        assert_eq!(json["version"], serde_json::json!(3));
        assert_eq!(json["priority"], serde_json::json!(1));
    }

    #[test]
    fn message_round_trips_through_tagged_json() {
        let mut set = CommitSet::new();
        set.insert("1".to_owned(), sample_commit());
        let msg = Message::Push(set);
        let text = serde_json::to_string(&msg).unwrap();
        assert!(text.contains("\"event\":\"push\""));
        let back: Message = serde_json::from_str(&text).unwrap();
        assert_eq!(back, msg);
    }
}
