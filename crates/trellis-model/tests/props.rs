// SPDX-License-Identifier: Apache-2.0

#![allow(missing_docs)]
#![allow(clippy::unwrap_used, clippy::expect_used)]

use proptest::prelude::*;
use trellis_model::{Gid, Path, PathPattern};

fn segment() -> impl Strategy<Value = String> {
    prop_oneof![
        Just("a".to_owned()),
        Just("b".to_owned()),
        Just("c".to_owned()),
        Just("0".to_owned()),
    ]
}

fn pattern_segment() -> impl Strategy<Value = String> {
    prop_oneof![segment(), Just("*".to_owned())]
}

prop_compose! {
    fn path_strategy()(segments in prop::collection::vec(segment(), 0..5)) -> String {
        segments.join(".")
    }
}

prop_compose! {
    fn pattern_strategy()(segments in prop::collection::vec(pattern_segment(), 0..5)) -> String {
        segments.join(".")
    }
}

proptest! {
    // The matcher matches iff every non-wildcard pattern segment within the
    // shared prefix equals the corresponding path segment.
    #[test]
    fn matcher_agrees_with_the_prefix_rule(p in pattern_strategy(), q in path_strategy()) {
        let pattern = PathPattern::parse(&p);
        let path = Path::parse(&q);
        let shared = pattern.len().min(path.len());
        let reference = (0..shared).all(|i| {
            let ps = &pattern.segments()[i];
            ps == "*" || ps == &path.segments()[i]
        });
        prop_assert_eq!(pattern.matches(&path), reference);
    }

    // Event paths take the changed path over the shared prefix, then the
    // pattern remainder.
    #[test]
    fn event_path_has_the_expected_shape(p in pattern_strategy(), q in path_strategy()) {
        let pattern = PathPattern::parse(&p);
        let path = Path::parse(&q);
        let event = pattern.event_path(&path);
        prop_assert_eq!(event.len(), pattern.len());
        let shared = pattern.len().min(path.len());
        for i in 0..shared {
            prop_assert_eq!(&event.segments()[i], &path.segments()[i]);
        }
        for i in shared..pattern.len() {
            prop_assert_eq!(&event.segments()[i], &pattern.segments()[i]);
        }
    }

    // Gids survive the wire-key round trip with their kind intact.
    #[test]
    fn gid_wire_keys_round_trip(n in any::<i64>(), s in "[a-z][a-z0-9-]{0,12}") {
        let int = Gid::Int(n);
        prop_assert_eq!(Gid::from_key(&int.to_key()), int);
        // Non-numeric strings stay strings.
        prop_assume!(s.parse::<i64>().is_err());
        let text = Gid::Str(s);
        prop_assert_eq!(Gid::from_key(&text.to_key()), text.clone());
        prop_assert_eq!(Gid::from_json(&text.to_json()), Some(text));
    }
}
