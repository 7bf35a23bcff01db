//! Catalog directory walk: version directories, file-stem kinds, bad files.

use std::path::PathBuf;

use armitage::contracts::{ContractCatalog, ContractCheck};
use serde_json::json;
use tempfile::TempDir;

fn write_schema(dir: &PathBuf, version: &str, kind: &str, schema: &serde_json::Value) {
    let subdir = dir.join(version);
    std::fs::create_dir_all(&subdir).expect("mkdir");
    std::fs::write(
        subdir.join(format!("{kind}.json")),
        serde_json::to_string_pretty(schema).expect("serialize"),
    )
    .expect("write");
}

fn setup_tree() -> (TempDir, PathBuf) {
    let dir = TempDir::new().expect("temp dir");
    let path = dir.path().to_path_buf();

    write_schema(
        &path,
        "v1",
        "report.v1",
        &json!({
            "type": "object",
            "required": ["kind", "schemaVersion", "title"],
            "properties": { "title": { "type": "string" } }
        }),
    );
    write_schema(
        &path,
        "v2",
        "report.v2",
        &json!({
            "type": "object",
            "required": ["kind", "schemaVersion", "title", "body"]
        }),
    );
    // Not a vN directory: ignored.
    std::fs::create_dir_all(path.join("drafts")).expect("mkdir");
    // Broken file inside a versioned directory: skipped with a warning.
    std::fs::write(path.join("v2").join("broken.json"), "{ not json").expect("write");

    (dir, path)
}

#[test]
fn catalog_registers_by_version_and_kind() {
    let (_dir, path) = setup_tree();
    let catalog = ContractCatalog::from_dir(&path, &[]).expect("catalog");

    assert_eq!(
        catalog.registered(),
        vec![(1, "report.v1".to_owned()), (2, "report.v2".to_owned())]
    );
    assert_eq!(
        catalog.resolve_alias("urn:armitage:contract:v1:report.v1"),
        Some(&(1, "report.v1".to_owned()))
    );
}

#[test]
fn version_lookup_uses_the_payload_schema_version() {
    let (_dir, path) = setup_tree();
    let catalog = ContractCatalog::from_dir(&path, &[]).expect("catalog");

    let v1_ok = json!({"kind": "report.v1", "schemaVersion": 1, "title": "t"});
    assert!(matches!(catalog.check(&v1_ok), ContractCheck::Valid));

    // Same kind, wrong version: no schema, skipped.
    let wrong_version = json!({"kind": "report.v1", "schemaVersion": 3, "title": "t"});
    assert!(matches!(catalog.check(&wrong_version), ContractCheck::Skipped(_)));
}

#[test]
fn missing_directory_yields_an_empty_catalog() {
    let catalog =
        ContractCatalog::from_dir(&PathBuf::from("/nonexistent/contracts"), &[]).expect("catalog");
    assert!(catalog.registered().is_empty());
}

#[test]
fn shipped_contracts_compile() {
    let catalog = crate::common::load_shipped_contracts();
    let kinds: Vec<String> = catalog.registered().into_iter().map(|(_, k)| k).collect();
    assert!(kinds.contains(&"analytics.run.v2".to_owned()));
    assert!(kinds.contains(&"dataset.preview.v2".to_owned()));
    assert!(kinds.contains(&"dataset.list.v2".to_owned()));
    assert!(kinds.contains(&"writeback.prepare.v2".to_owned()));
    assert!(kinds.contains(&"writeback.commit.v2".to_owned()));
}
