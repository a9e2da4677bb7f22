//! End-to-end tests for the Pass 1 syntactic pipeline: extractor -> store,
//! exercised through the public crate API rather than any single module's
//! internals.

use cmm_indexer::{run_pass1, EntityKind, Role, SqliteStore, StoragePort, Visibility};
use std::fs;
use tempfile::TempDir;

#[test]
fn scan_two_files_then_read_back_full_hierarchy() {
    let dir = TempDir::new().unwrap();
    let a_path = dir.path().join("a.py");
    fs::write(
        &a_path,
        "class Calculator:\n    def __init__(self):\n        pass\n\n    def add(self, a, b):\n        return a + b\n",
    )
    .unwrap();

    let mut store = SqliteStore::open_in_memory().unwrap();
    let report = run_pass1(&mut store, &[a_path.clone()]).unwrap();
    assert_eq!(report.scanned, 1);
    assert_eq!(report.parse_errors, 0);

    let model = store.get_file(&a_path.to_string_lossy()).unwrap().unwrap();
    assert_eq!(model.entities.len(), 1);
    let class = &model.entities[0];
    assert_eq!(class.name, "Calculator");
    assert_eq!(class.kind, EntityKind::Class);
    assert_eq!(class.metadata.role, Some(Role::Class));

    let ctor = class.children.iter().find(|e| e.name == "__init__").unwrap();
    assert_eq!(ctor.metadata.role, Some(Role::Constructor));
    assert_eq!(ctor.visibility, Visibility::Public);

    let add = class.children.iter().find(|e| e.name == "add").unwrap();
    assert_eq!(add.metadata.role, Some(Role::Method));
}

#[test]
fn private_helper_and_public_dunder_survive_a_rescan() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("b.py");
    fs::write(
        &path,
        "def _helper():\n    pass\n\ndef __dunder__():\n    pass\n",
    )
    .unwrap();

    let mut store = SqliteStore::open_in_memory().unwrap();
    run_pass1(&mut store, &[path.clone()]).unwrap();
    run_pass1(&mut store, &[path.clone()]).unwrap(); // unchanged content, should no-op

    let model = store.get_file(&path.to_string_lossy()).unwrap().unwrap();
    let helper = model.entities.iter().find(|e| e.name == "_helper").unwrap();
    let dunder = model.entities.iter().find(|e| e.name == "__dunder__").unwrap();
    assert_eq!(helper.visibility, Visibility::Private);
    assert_eq!(dunder.visibility, Visibility::Public);
}

#[test]
fn renaming_a_class_and_rescanning_drops_the_old_name_everywhere() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("c.py");
    fs::write(&path, "class OldClass:\n    def run(self):\n        pass\n").unwrap();

    let mut store = SqliteStore::open_in_memory().unwrap();
    run_pass1(&mut store, &[path.clone()]).unwrap();

    fs::write(&path, "class NewClass:\n    def run(self):\n        pass\n").unwrap();
    run_pass1(&mut store, &[path.clone()]).unwrap();

    let model = store.get_file(&path.to_string_lossy()).unwrap().unwrap();
    assert_eq!(model.entities.len(), 1);
    assert_eq!(model.entities[0].name, "NewClass");

    let intent = store.get_hierarchical_intent().unwrap();
    assert!(intent.iter().all(|tree| tree.name != "OldClass"));
}

#[test]
fn call_to_a_name_outside_the_scanned_set_stays_unresolved() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("d.py");
    fs::write(
        &path,
        "def run():\n    external_thing()\n",
    )
    .unwrap();

    let mut store = SqliteStore::open_in_memory().unwrap();
    run_pass1(&mut store, &[path.clone()]).unwrap();

    let model = store.get_file(&path.to_string_lossy()).unwrap().unwrap();
    let run_fn = model.entities.iter().find(|e| e.name == "run").unwrap();
    let relation = run_fn
        .relations
        .iter()
        .find(|r| r.to_name == "external_thing")
        .unwrap();
    assert!(relation.to_id.is_none());
    assert!(!relation.is_verified);
}

#[test]
fn a_file_that_fails_to_parse_does_not_abort_the_batch() {
    let dir = TempDir::new().unwrap();
    let good = dir.path().join("good.py");
    let bad = dir.path().join("bad.py");
    fs::write(&good, "def ok():\n    pass\n").unwrap();
    fs::write(&bad, [0xFF, 0xFE, 0x00, 0x01]).unwrap(); // invalid UTF-8

    let mut store = SqliteStore::open_in_memory().unwrap();
    let report = run_pass1(&mut store, &[good.clone(), bad.clone()]).unwrap();

    assert_eq!(report.scanned, 1);
    assert_eq!(report.parse_errors, 1);
    assert!(store.get_file(&good.to_string_lossy()).unwrap().is_some());
    assert!(store.get_file(&bad.to_string_lossy()).unwrap().is_none());
}
