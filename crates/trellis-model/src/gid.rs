// SPDX-License-Identifier: Apache-2.0
//! Globally-unique model identifiers.
use std::fmt;

use serde::{Deserialize, Serialize};

/// Globally-unique identifier of a model within a [`Registry`](crate::Registry).
///
/// Gids are caller-supplied (string or integer) or allocated by a
/// [`Factory`](crate::Factory): the next integer above the registry maximum,
/// or a fresh UUID string for string-keyed registries. On the wire a gid is
/// always carried as a string key (JSON object keys); [`Gid::to_key`] and
/// [`Gid::from_key`] round-trip that representation.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Gid {
    /// Integer identifier (the default allocation scheme).
    Int(i64),
    /// String identifier (caller-supplied names or allocated UUIDs).
    Str(String),
}

impl Gid {
    /// Renders the gid as a wire key (JSON map keys are strings).
    #[must_use]
    pub fn to_key(&self) -> String {
        match self {
            Self::Int(n) => n.to_string(),
            Self::Str(s) => s.clone(),
        }
    }

    /// Parses a wire key back into a gid.
    ///
    /// Integer-looking keys become [`Gid::Int`] so that a gid survives the
    /// string round-trip unchanged.
    #[must_use]
    pub fn from_key(key: &str) -> Self {
        key.parse::<i64>().map_or_else(|_| Self::Str(key.to_owned()), Self::Int)
    }

    /// Returns the integer value when this gid is integer-keyed.
    #[must_use]
    pub fn as_int(&self) -> Option<i64> {
        match self {
            Self::Int(n) => Some(*n),
            Self::Str(_) => None,
        }
    }

    /// Extracts a gid from a JSON value (string or integer number).
    #[must_use]
    pub fn from_json(value: &serde_json::Value) -> Option<Self> {
        match value {
            serde_json::Value::String(s) => Some(Self::Str(s.clone())),
            serde_json::Value::Number(n) => n.as_i64().map(Self::Int),
            _ => None,
        }
    }

    /// Renders the gid as a JSON value (string or number).
    #[must_use]
    pub fn to_json(&self) -> serde_json::Value {
        match self {
            Self::Int(n) => serde_json::Value::from(*n),
            Self::Str(s) => serde_json::Value::from(s.clone()),
        }
    }
}

impl fmt::Display for Gid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Int(n) => write!(f, "{n}"),
            Self::Str(s) => f.write_str(s),
        }
    }
}

impl From<i64> for Gid {
    fn from(n: i64) -> Self {
        Self::Int(n)
    }
}

impl From<&str> for Gid {
    fn from(s: &str) -> Self {
        Self::Str(s.to_owned())
    }
}

impl From<String> for Gid {
    fn from(s: String) -> Self {
        Self::Str(s)
    }
}

#[cfg(test)]
#[allow(clippy::expect_used, clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn wire_key_round_trip_preserves_kind() {
        assert_eq!(Gid::from_key("42"), Gid::Int(42));
        assert_eq!(Gid::from_key("node-a"), Gid::Str("node-a".into()));
        assert_eq!(Gid::Int(7).to_key(), "7");
        assert_eq!(Gid::from_key(&Gid::Str("9x".into()).to_key()), Gid::Str("9x".into()));
    }

    #[test]
    fn json_round_trip() {
        let g = Gid::from_json(&serde_json::json!(12)).unwrap();
        assert_eq!(g, Gid::Int(12));
        assert_eq!(g.to_json(), serde_json::json!(12));
        assert!(Gid::from_json(&serde_json::json!(true)).is_none());
    }
}
