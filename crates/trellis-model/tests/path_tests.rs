// SPDX-License-Identifier: Apache-2.0

#![allow(missing_docs)]
#![allow(clippy::unwrap_used, clippy::expect_used, clippy::float_cmp)]

use serde_json::json;
use trellis_model::{Factory, FieldDef, FieldKind, ModelError, ModelSchema};

fn tree_factory() -> Factory {
    let node = ModelSchema::builder("Node")
        .field(FieldDef::string("name"))
        .field(FieldDef::model("left", "Node"))
        .field(FieldDef::model("right", "Node"))
        .field(FieldDef::list("items", FieldKind::model("Node")))
        .build()
        .expect("schema");
    let factory = Factory::new();
    factory.register_schema(&node);
    factory
}

#[test]
fn concrete_paths_navigate_models_and_lists() {
    let factory = tree_factory();
    let root = factory
        .create_root(
            "Node",
            &json!({
                "name": "root",
                "left": { "name": "l", "left": { "name": "ll" } },
                "items": [ { "name": "i0" }, { "name": "i1" } ]
            }),
        )
        .unwrap();

    assert_eq!(root.path("name").unwrap().as_str(), Some("root"));
    assert_eq!(root.path("left.left.name").unwrap().as_str(), Some("ll"));
    assert_eq!(root.path("items.1.name").unwrap().as_str(), Some("i1"));
    assert!(root.path("right.name").is_none(), "crossing an absent model");
    assert!(root.path("name.deeper").is_none(), "crossing a primitive");
    assert!(root.path("items.7.name").is_none(), "index out of range");
}

#[test]
fn wildcard_patterns_collect_all_matches() {
    let factory = tree_factory();
    let root = factory
        .create_root(
            "Node",
            &json!({
                "left": { "name": "l" },
                "right": { "name": "r" },
                "items": [ { "name": "i0" } ]
            }),
        )
        .unwrap();

    let names = root.path_pattern("*.name");
    assert_eq!(names.get("left.name").and_then(|v| v.as_str().map(str::to_owned)), Some("l".into()));
    assert_eq!(names.get("right.name").and_then(|v| v.as_str().map(str::to_owned)), Some("r".into()));

    let items = root.path_pattern("items.*.name");
    assert_eq!(items.len(), 1);
    assert_eq!(items.get("items.0.name").and_then(|v| v.as_str().map(str::to_owned)), Some("i0".into()));
}

#[test]
fn set_path_creates_intermediates_on_demand() {
    let factory = tree_factory();
    let root = factory.create_root("Node", &json!({})).unwrap();

    assert!(root.set_path("left.left.name", "deep", true).unwrap());
    assert_eq!(root.path("left.left.name").unwrap().as_str(), Some("deep"));
    // The lazily-created intermediates are owned children.
    let left = root.get_model("left").unwrap().unwrap();
    assert_eq!(left.parent().unwrap().1, "left");
}

#[test]
fn set_path_without_init_raises_not_found() {
    let factory = tree_factory();
    let root = factory.create_root("Node", &json!({})).unwrap();

    let err = root.set_path("left.name", "x", false).unwrap_err();
    assert!(matches!(err, ModelError::NotFoundPath(_)));
    assert!(root.get_model("left").unwrap().is_none(), "nothing was created");
}

#[test]
fn set_path_crossing_a_primitive_raises_not_found() {
    let factory = tree_factory();
    let root = factory.create_root("Node", &json!({ "name": "leaf" })).unwrap();
    let err = root.set_path("name.inner", "x", true).unwrap_err();
    assert!(matches!(err, ModelError::NotFoundPath(_)));
}

#[test]
fn set_path_assigns_list_items_by_index() {
    let factory = tree_factory();
    let root = factory
        .create_root("Node", &json!({ "items": [ { "name": "a" } ] }))
        .unwrap();

    assert!(root.set_path("items.0.name", "a2", true).unwrap());
    assert_eq!(root.path("items.0.name").unwrap().as_str(), Some("a2"));
}
