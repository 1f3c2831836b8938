// SPDX-License-Identifier: Apache-2.0
//! Path navigation over the live tree.
use std::collections::BTreeMap;

use crate::model::Model;
use crate::path::{Path, PathPattern};
use crate::value::Value;

impl Model {
    /// Reads the value at a concrete dotted path. Numeric segments index
    /// into list fields; crossing a non-model intermediate yields `None`.
    #[must_use]
    pub fn path(&self, path: &str) -> Option<Value> {
        self.path_value(&Path::parse(path))
    }

    /// Reads the value at a concrete parsed path.
    #[must_use]
    pub fn path_value(&self, path: &Path) -> Option<Value> {
        let mut current = Value::Model(self.clone());
        for segment in path.segments() {
            current = step(&current, segment)?;
        }
        Some(current)
    }

    /// Collects all values matching a wildcard pattern, keyed by their
    /// resolved concrete path.
    #[must_use]
    pub fn path_pattern(&self, pattern: &str) -> BTreeMap<String, Value> {
        let parsed = PathPattern::parse(pattern);
        let path = Path::from_segments(parsed.segments().to_vec());
        self.path_pattern_values(&path)
            .into_iter()
            .map(|(p, v)| (p.to_string(), v))
            .collect()
    }

    /// Expands a path whose segments may contain wildcards against the
    /// live tree.
    pub(crate) fn path_pattern_values(&self, path: &Path) -> Vec<(Path, Value)> {
        let mut out = Vec::new();
        expand(
            &Value::Model(self.clone()),
            path.segments(),
            &mut Vec::new(),
            &mut out,
        );
        out
    }
}

fn step(value: &Value, segment: &str) -> Option<Value> {
    match value {
        Value::Model(m) => {
            if m.is_destroyed() || !m.has(segment) {
                return None;
            }
            m.get(segment).ok()
        }
        Value::List(items) => {
            let index = Path::parse_index(segment)?;
            items.get(index).cloned()
        }
        _ => None,
    }
}

fn expand(value: &Value, segments: &[String], prefix: &mut Vec<String>, out: &mut Vec<(Path, Value)>) {
    let Some(segment) = segments.first() else {
        out.push((Path::from_segments(prefix.clone()), value.clone()));
        return;
    };
    let rest = &segments[1..];
    if segment == PathPattern::WILDCARD {
        match value {
            Value::Model(m) => {
                if m.is_destroyed() {
                    return;
                }
                for name in m.field_names() {
                    if let Ok(v) = m.get(&name) {
                        prefix.push(name.clone());
                        expand(&v, rest, prefix, out);
                        prefix.pop();
                    }
                }
            }
            Value::List(items) => {
                for (i, item) in items.iter().enumerate() {
                    prefix.push(i.to_string());
                    expand(item, rest, prefix, out);
                    prefix.pop();
                }
            }
            _ => {}
        }
        return;
    }
    if let Some(next) = step(value, segment) {
        prefix.push(segment.clone());
        expand(&next, rest, prefix, out);
        prefix.pop();
    }
}
