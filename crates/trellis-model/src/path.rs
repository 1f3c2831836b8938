// SPDX-License-Identifier: Apache-2.0
//! Dotted paths and wildcard patterns.
//!
//! A [`Path`] names one concrete location in a model tree (`"child.name"`,
//! `"items.2"`); numeric segments index into list fields. A [`PathPattern`]
//! is a path whose segments may be `*`, matching any single segment.
//!
//! Matching is prefix-based: a pattern and a path agree when, over their
//! shared prefix, every pattern segment equals the path segment or is `*`.
//! Whether the longer side ultimately fires is a watcher-level decision
//! (see [`MatchKind`]).
use std::fmt;

/// One concrete dotted path inside a model tree.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default)]
pub struct Path {
    segments: Vec<String>,
}

impl Path {
    /// Parses a dotted path. Empty input yields the empty (root) path.
    #[must_use]
    pub fn parse(path: &str) -> Self {
        if path.is_empty() {
            return Self::default();
        }
        Self {
            segments: path.split('.').map(str::to_owned).collect(),
        }
    }

    /// Builds a path from owned segments.
    #[must_use]
    pub fn from_segments(segments: Vec<String>) -> Self {
        Self { segments }
    }

    /// Builds a single-segment path.
    #[must_use]
    pub fn field(name: &str) -> Self {
        Self {
            segments: vec![name.to_owned()],
        }
    }

    /// Builds a two-segment `field.index` path for list-item events.
    #[must_use]
    pub fn indexed(name: &str, index: usize) -> Self {
        Self {
            segments: vec![name.to_owned(), index.to_string()],
        }
    }

    /// The path's segments, in order.
    #[must_use]
    pub fn segments(&self) -> &[String] {
        &self.segments
    }

    /// Number of segments.
    #[must_use]
    pub fn len(&self) -> usize {
        self.segments.len()
    }

    /// `true` for the empty (root) path.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.segments.is_empty()
    }

    /// First segment, when present.
    #[must_use]
    pub fn head(&self) -> Option<&str> {
        self.segments.first().map(String::as_str)
    }

    /// The path with its first segment removed.
    #[must_use]
    pub fn tail(&self) -> Self {
        Self {
            segments: self.segments.iter().skip(1).cloned().collect(),
        }
    }

    /// Returns a copy with `segment` prepended (used when bubbling a child
    /// change up through its owning field).
    #[must_use]
    pub fn prefixed(&self, segment: &str) -> Self {
        let mut segments = Vec::with_capacity(self.segments.len() + 1);
        segments.push(segment.to_owned());
        segments.extend(self.segments.iter().cloned());
        Self { segments }
    }

    /// Interprets a segment as a list index.
    #[must_use]
    pub fn parse_index(segment: &str) -> Option<usize> {
        segment.parse::<usize>().ok()
    }
}

impl fmt::Display for Path {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.segments.join("."))
    }
}

impl From<&str> for Path {
    fn from(path: &str) -> Self {
        Self::parse(path)
    }
}

/// How a pattern relates to a concrete changed path.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MatchKind {
    /// The shared prefix disagrees; the watcher does not fire.
    None,
    /// Pattern and path have equal length and agree; fires.
    Exact,
    /// The changed path is a strict prefix of the pattern; always fires,
    /// since a newly-assigned parent reshapes its descendants. The handler
    /// receives the value re-read at the pattern path.
    PatternDeeper,
    /// The pattern is a strict prefix of the changed path; fires only for
    /// `deep` watchers.
    PathDeeper,
}

/// A dotted path pattern with `*` wildcards.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PathPattern {
    segments: Vec<String>,
}

impl PathPattern {
    /// Wildcard segment.
    pub const WILDCARD: &'static str = "*";

    /// Parses a dotted pattern. Empty input yields the empty pattern,
    /// which matches every path.
    #[must_use]
    pub fn parse(pattern: &str) -> Self {
        if pattern.is_empty() {
            return Self { segments: Vec::new() };
        }
        Self {
            segments: pattern.split('.').map(str::to_owned).collect(),
        }
    }

    /// The pattern's segments, in order (`*` for wildcards).
    #[must_use]
    pub fn segments(&self) -> &[String] {
        &self.segments
    }

    /// Number of segments.
    #[must_use]
    pub fn len(&self) -> usize {
        self.segments.len()
    }

    /// `true` for the empty pattern.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.segments.is_empty()
    }

    /// Classifies this pattern against a concrete changed path.
    ///
    /// The shared prefix must agree segment-by-segment (`*` matches any
    /// one segment); the relative lengths decide the [`MatchKind`].
    #[must_use]
    pub fn match_path(&self, path: &Path) -> MatchKind {
        let shared = self.segments.len().min(path.len());
        for i in 0..shared {
            let p = &self.segments[i];
            if p != Self::WILDCARD && p != &path.segments()[i] {
                return MatchKind::None;
            }
        }
        match self.segments.len().cmp(&path.len()) {
            std::cmp::Ordering::Equal => MatchKind::Exact,
            std::cmp::Ordering::Greater => MatchKind::PatternDeeper,
            std::cmp::Ordering::Less => MatchKind::PathDeeper,
        }
    }

    /// `true` when the shared prefix agrees, regardless of depth.
    #[must_use]
    pub fn matches(&self, path: &Path) -> bool {
        self.match_path(path) != MatchKind::None
    }

    /// The concrete event path delivered to a handler for a change at
    /// `path`: the changed path's segments over the shared prefix, then the
    /// pattern's remaining segments (which may still contain wildcards; the
    /// caller resolves those against the live tree).
    #[must_use]
    pub fn event_path(&self, path: &Path) -> Path {
        let shared = self.segments.len().min(path.len());
        let mut segments: Vec<String> = path.segments()[..shared].to_vec();
        segments.extend(self.segments.iter().skip(shared).cloned());
        Path::from_segments(segments)
    }

    /// `true` if any segment is a wildcard.
    #[must_use]
    pub fn has_wildcards(&self) -> bool {
        self.segments.iter().any(|s| s == Self::WILDCARD)
    }
}

impl fmt::Display for PathPattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.segments.join("."))
    }
}

impl From<&str> for PathPattern {
    fn from(pattern: &str) -> Self {
        Self::parse(pattern)
    }
}

impl From<&Path> for PathPattern {
    fn from(path: &Path) -> Self {
        Self {
            segments: path.segments().to_vec(),
        }
    }
}

#[cfg(test)]
#[allow(clippy::expect_used, clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn exact_and_wildcard_matches() {
        let p = PathPattern::parse("a.*.c");
        assert_eq!(p.match_path(&Path::parse("a.b.c")), MatchKind::Exact);
        assert_eq!(p.match_path(&Path::parse("a.x.c")), MatchKind::Exact);
        assert_eq!(p.match_path(&Path::parse("a.b.d")), MatchKind::None);
        assert_eq!(p.match_path(&Path::parse("b.b.c")), MatchKind::None);
    }

    #[test]
    fn depth_classification() {
        let p = PathPattern::parse("a.b");
        assert_eq!(p.match_path(&Path::parse("a")), MatchKind::PatternDeeper);
        assert_eq!(p.match_path(&Path::parse("a.b.c")), MatchKind::PathDeeper);
    }

    #[test]
    fn event_path_splices_pattern_remainder() {
        let p = PathPattern::parse("*.name");
        let e = p.event_path(&Path::parse("left"));
        assert_eq!(e, Path::parse("left.name"));

        let q = PathPattern::parse("a.b");
        assert_eq!(q.event_path(&Path::parse("a.b.c")), Path::parse("a.b"));
    }

    #[test]
    fn prefixed_bubbles_child_paths() {
        assert_eq!(Path::parse("name").prefixed("child"), Path::parse("child.name"));
    }
}
