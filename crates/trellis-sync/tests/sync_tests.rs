// SPDX-License-Identifier: Apache-2.0

#![allow(missing_docs)]
#![allow(clippy::unwrap_used, clippy::expect_used, clippy::float_cmp)]

use std::cell::RefCell;
use std::collections::BTreeMap;
use std::rc::Rc;
use std::time::{Duration, Instant};

use serde_json::json;
use trellis_model::{Factory, FieldDef, FieldKind, Gid, ModelSchema, Value};
use trellis_proto::{Commit, CommitSet};
use trellis_sync::{
    ChangeTracker, CoordinatorEvent, CoordinatorOptions, CoordinatorState, SyncCoordinator,
    SyncError, TrackerOptions,
};

fn doc_factory() -> Factory {
    let doc = ModelSchema::builder("Doc")
        .field(FieldDef::string("name"))
        .field(FieldDef::string("foo"))
        .field(FieldDef::model("child", "Doc"))
        .field(FieldDef::list("tags", FieldKind::String))
        .build()
        .expect("schema");
    let factory = Factory::new();
    factory.register_schema(&doc);
    factory
}

fn replica(priority: i64) -> (Factory, SyncCoordinator) {
    let factory = doc_factory();
    let coordinator = SyncCoordinator::new(
        factory.registry(),
        &CoordinatorOptions {
            sync_id: Some(format!("peer-{priority}")),
            priority,
            ..CoordinatorOptions::default()
        },
    );
    (factory, coordinator)
}

fn commit(sync_id: &str, version: u64, base: u64, priority: i64, changes: &[(&str, serde_json::Value)]) -> Commit {
    Commit {
        sync_id: sync_id.to_owned(),
        version,
        base_version: base,
        priority,
        changes: changes
            .iter()
            .map(|(k, v)| ((*k).to_owned(), v.clone()))
            .collect::<BTreeMap<_, _>>(),
    }
}

// ── Tracker ────────────────────────────────────────────────────────────

#[test]
fn commit_versions_increase_and_quiet_commits_do_not_burn_versions() {
    let factory = doc_factory();
    let model = factory.create_root("Doc", &json!({ "gid": 1 })).unwrap();
    let tracker = ChangeTracker::new(&model, &TrackerOptions::default());
    tracker.start();

    assert!(tracker.commit().is_none(), "nothing changed yet");
    assert_eq!(tracker.version(), 0);

    model.set("name", "a").unwrap();
    let first = tracker.commit().unwrap();
    assert_eq!((first.version, first.base_version), (1, 0));

    assert!(tracker.commit().is_none(), "quiet commit");
    assert_eq!(tracker.version(), 1);

    model.set("name", "b").unwrap();
    let second = tracker.commit().unwrap();
    assert_eq!((second.version, second.base_version), (2, 1));
    assert!(second.version > first.version);
}

#[test]
fn first_emission_of_a_new_model_is_a_full_export_then_a_marker() {
    let factory = doc_factory();
    let model = factory.create_root("Doc", &json!({ "gid": 1 })).unwrap();
    let tracker = ChangeTracker::new(&model, &TrackerOptions::default());
    tracker.start();

    model.set("child", json!({ "gid": 2, "name": "kid" })).unwrap();
    let first = tracker.commit().unwrap();
    assert_eq!(first.changes["child"]["gid"], json!(2));
    assert_eq!(first.changes["child"]["name"], json!("kid"));

    // Re-assigning the (now known) child emits only the marker.
    let child = model.get_model("child").unwrap().unwrap();
    model.set("child", Value::Null).unwrap();
    model.set("child", child).unwrap();
    let second = tracker.commit().unwrap();
    assert_eq!(second.changes["child"], json!({ "gid": 2 }));
}

#[test]
fn list_changes_travel_as_whole_arrays() {
    let factory = doc_factory();
    let model = factory
        .create_root("Doc", &json!({ "gid": 1, "tags": ["a"] }))
        .unwrap();
    let tracker = ChangeTracker::new(&model, &TrackerOptions::default());
    tracker.start();

    model.list_push("tags", "b").unwrap();
    let update = tracker.commit().unwrap();
    assert_eq!(update.changes["tags"], json!(["a", "b"]));
}

#[test]
fn merge_applies_remote_changes_and_reports_the_filtered_commit() {
    let factory = doc_factory();
    let model = factory.create_root("Doc", &json!({ "gid": 1 })).unwrap();
    let tracker = ChangeTracker::new(&model, &TrackerOptions::default());
    tracker.start();

    let filtered = tracker
        .merge(&commit("peer", 1, 0, 1, &[("name", json!("remote"))]))
        .unwrap();
    assert_eq!(model.get_string("name").unwrap().as_deref(), Some("remote"));
    assert_eq!(filtered.changes["name"], json!("remote"));
    assert_eq!(tracker.version(), 1);
    // The merge does not echo into the local change set.
    assert!(!tracker.has_changes());
}

#[test]
fn merge_priority_tiebreak_converges_to_the_higher_priority() {
    for a_first in [true, false] {
        let (factory_a, coord_a) = replica(1);
        let (factory_b, coord_b) = replica(0);
        let model_a = factory_a.create_root("Doc", &json!({ "gid": 1 })).unwrap();
        let model_b = factory_b.create_root("Doc", &json!({ "gid": 1 })).unwrap();
        coord_a.start();
        coord_b.start();

        model_a.set("foo", "foo").unwrap();
        model_b.set("foo", "bar").unwrap();
        let push_a = coord_a.commit();
        let push_b = coord_b.commit();

        if a_first {
            let out = coord_b.merge(&push_a);
            assert!(out.failed.is_empty());
            let out = coord_a.merge(&push_b);
            assert!(out.failed.is_empty());
        } else {
            let out = coord_a.merge(&push_b);
            assert!(out.failed.is_empty());
            let out = coord_b.merge(&push_a);
            assert!(out.failed.is_empty());
        }

        assert_eq!(
            model_a.get_string("foo").unwrap().as_deref(),
            Some("foo"),
            "exchange order a_first={a_first}"
        );
        assert_eq!(
            model_b.get_string("foo").unwrap().as_deref(),
            Some("foo"),
            "exchange order a_first={a_first}"
        );
    }
}

#[test]
fn stale_updates_are_rejected_without_mutation() {
    let factory = doc_factory();
    let model = factory.create_root("Doc", &json!({ "gid": 1 })).unwrap();
    let tracker = ChangeTracker::new(
        &model,
        &TrackerOptions {
            history_length: 2,
            ..TrackerOptions::default()
        },
    );

    for (version, text) in [(1, "x1"), (2, "x2"), (3, "x3")] {
        tracker
            .merge(&commit("peer", version, version - 1, 1, &[("name", json!(text))]))
            .unwrap();
    }
    assert_eq!(model.get_string("name").unwrap().as_deref(), Some("x3"));
    assert_eq!(tracker.history().len(), 2);

    let err = tracker
        .merge(&commit("peer", 4, 0, 1, &[("name", json!("ancient"))]))
        .unwrap_err();
    assert!(matches!(err, SyncError::StaleUpdate { required: 1, got: 0 }));
    assert_eq!(model.get_string("name").unwrap().as_deref(), Some("x3"));
}

#[test]
fn full_state_uses_the_shallow_export() {
    let factory = doc_factory();
    let model = factory
        .create_root("Doc", &json!({ "gid": 1, "name": "n", "child": { "gid": 2 } }))
        .unwrap();
    let tracker = ChangeTracker::new(&model, &TrackerOptions::default());
    let state = tracker.create_full_state();
    assert_eq!(state.base_version, 0);
    assert_eq!(state.changes["name"], json!("n"));
    assert_eq!(state.changes["child"], json!({ "gid": 2 }));
}

// ── Coordinator ────────────────────────────────────────────────────────

#[test]
fn late_child_creation_resolves_through_the_retry_queue() {
    let (factory, coordinator) = replica(0);
    let root = factory.create_root("Doc", &json!({ "gid": "root" })).unwrap();
    coordinator.start();

    let mut updates = CommitSet::new();
    updates.insert(
        "new-id".to_owned(),
        commit("peer", 1, 0, 5, &[("name", json!("foo"))]),
    );
    updates.insert(
        "root".to_owned(),
        commit("peer", 1, 0, 5, &[("child", json!({ "gid": "new-id" }))]),
    );

    let outcome = coordinator.merge(&updates);
    assert!(outcome.failed.is_empty(), "failures: {:?}", outcome.failed);
    assert_eq!(outcome.applied.len(), 2);
    assert_eq!(root.path("child.name").unwrap().as_str(), Some("foo"));
}

#[test]
fn updates_for_models_that_never_materialize_are_surfaced() {
    let (factory, coordinator) = replica(0);
    factory.create_root("Doc", &json!({ "gid": "root" })).unwrap();
    coordinator.start();

    let mut updates = CommitSet::new();
    updates.insert(
        "ghost".to_owned(),
        commit("peer", 1, 0, 0, &[("name", json!("boo"))]),
    );
    let outcome = coordinator.merge(&updates);
    assert_eq!(outcome.applied.len(), 0);
    assert!(matches!(
        outcome.failed.as_slice(),
        [(gid, SyncError::UnknownModel(_))] if gid.as_str() == "ghost"
    ));
}

#[test]
fn full_state_bootstraps_a_fresh_replica() {
    let (factory_a, coord_a) = replica(1);
    let model_a = factory_a
        .create_root(
            "Doc",
            &json!({
                "gid": "root",
                "name": "A",
                "child": { "gid": "kid", "name": "K" },
                "tags": ["t1", "t2"]
            }),
        )
        .unwrap();

    let (factory_b, coord_b) = replica(0);
    let model_b = factory_b.create_root("Doc", &json!({ "gid": "root" })).unwrap();
    coord_b.start();

    let outcome = coord_b.merge(&coord_a.create_full_state());
    assert!(outcome.failed.is_empty(), "failures: {:?}", outcome.failed);
    assert_eq!(model_a.export(), model_b.export());
}

#[test]
fn commit_collects_across_trackers_and_emits_new_commits() {
    let (factory, coordinator) = replica(0);
    let root = factory
        .create_root("Doc", &json!({ "gid": "root", "child": { "gid": "kid" } }))
        .unwrap();
    coordinator.start();

    let seen: Rc<RefCell<Vec<usize>>> = Rc::default();
    let sink = Rc::clone(&seen);
    coordinator.on_event(move |event| {
        let CoordinatorEvent::NewCommits(set) = event;
        sink.borrow_mut().push(set.len());
    });

    root.set("name", "r").unwrap();
    let child = root.get_model("child").unwrap().unwrap();
    child.set("name", "k").unwrap();

    let push = coordinator.commit();
    assert_eq!(push.len(), 2, "one commit per changed model");
    assert!(push.contains_key("root") && push.contains_key("kid"));
    assert_eq!(*seen.borrow(), vec![2]);

    assert!(coordinator.commit().is_empty(), "nothing pending after commit");
}

#[test]
fn coordinator_state_machine_gates_collection() {
    let (factory, coordinator) = replica(0);
    let model = factory.create_root("Doc", &json!({ "gid": 1 })).unwrap();
    assert_eq!(coordinator.state(), CoordinatorState::Idle);

    coordinator.start();
    assert_eq!(coordinator.state(), CoordinatorState::Started);
    model.set("name", "collected").unwrap();
    assert!(coordinator.has_changes());
    coordinator.commit();

    coordinator.stop();
    assert_eq!(coordinator.state(), CoordinatorState::Stopped);
    model.set("name", "ignored").unwrap();
    assert!(!coordinator.has_changes(), "stopped trackers do not collect");

    coordinator.destroy();
    assert_eq!(coordinator.state(), CoordinatorState::Destroyed);
    assert!(coordinator.is_empty());
}

#[test]
fn trackers_follow_registry_membership() {
    let (factory, coordinator) = replica(0);
    coordinator.start();
    assert!(coordinator.is_empty());

    let model = factory.create_root("Doc", &json!({ "gid": 7 })).unwrap();
    assert!(coordinator.tracker(&Gid::Int(7)).is_some());

    model.destroy();
    assert!(coordinator.tracker(&Gid::Int(7)).is_none());
}

#[test]
fn auto_commit_fires_on_the_trailing_edge() {
    let factory = doc_factory();
    let coordinator = SyncCoordinator::new(
        factory.registry(),
        &CoordinatorOptions {
            auto_commit: Some(Duration::from_millis(10)),
            ..CoordinatorOptions::default()
        },
    );
    let model = factory.create_root("Doc", &json!({ "gid": 1 })).unwrap();
    coordinator.start();
    model.set("name", "x").unwrap();

    let t0 = Instant::now();
    assert!(coordinator.poll(t0).is_none(), "window just opened");
    let produced = coordinator.poll(t0 + Duration::from_millis(11));
    let produced = produced.expect("trailing edge commits");
    assert_eq!(produced.len(), 1);
    assert!(coordinator.poll(t0 + Duration::from_millis(22)).is_none(), "nothing pending");
}

#[test]
fn merged_trees_converge_across_both_replicas() {
    let (factory_a, coord_a) = replica(1);
    let (factory_b, coord_b) = replica(0);
    let model_a = factory_a.create_root("Doc", &json!({ "gid": "root" })).unwrap();
    let model_b = factory_b.create_root("Doc", &json!({ "gid": "root" })).unwrap();
    coord_a.start();
    coord_b.start();

    // A grows a subtree; B edits a scalar and a list.
    model_a
        .set("child", json!({ "gid": "kid", "name": "K" }))
        .unwrap();
    model_b.set("name", "B").unwrap();
    model_b.set("tags", json!(["one", "two"])).unwrap();

    let push_a = coord_a.commit();
    let push_b = coord_b.commit();
    assert!(coord_b.merge(&push_a).failed.is_empty());
    assert!(coord_a.merge(&push_b).failed.is_empty());

    assert_eq!(model_a.export(), model_b.export());
    assert_eq!(model_b.path("child.name").unwrap().as_str(), Some("K"));
    assert_eq!(model_a.get_string("name").unwrap().as_deref(), Some("B"));
}
