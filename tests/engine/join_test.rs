//! Join semantics through the full engine entry point, resolver included.

use std::sync::Arc;

use armitage::engine::dataset::{Cell, Dataset};
use armitage::engine::{execute, plan::parse_plan, EngineBounds, EngineError};
use serde_json::json;

use crate::common::id_name_dataset;

fn resolver_for(dataset: Dataset) -> impl Fn(&str) -> Option<Arc<Dataset>> + Send + Sync {
    let dataset = Arc::new(dataset);
    move |id: &str| {
        if id == dataset.dataset_id {
            Some(dataset.clone())
        } else {
            None
        }
    }
}

fn join_plan() -> serde_json::Value {
    json!([{
        "op": "join",
        "rightDatasetId": "r",
        "leftKeys": ["id"],
        "rightKeys": ["id"],
        "how": "inner",
        "rightPrefix": "r_",
        "selectRight": ["name"]
    }])
}

#[test]
fn inner_join_with_prefix_carries_right_name() {
    let left = id_name_dataset("l", "t1", "u1", 1, "L");
    let right = id_name_dataset("r", "t1", "u1", 1, "R");
    let (steps, _) = parse_plan(&join_plan()).expect("plan");

    let (frame, warnings) = execute(
        &left,
        &steps,
        &EngineBounds::default(),
        &resolver_for(right),
    )
    .expect("execute");

    let names: Vec<&str> = frame.columns.iter().map(|c| c.name.as_str()).collect();
    assert_eq!(names, vec!["id", "name", "r_name"]);
    assert_eq!(
        frame.rows,
        vec![vec![
            Cell::I32(1),
            Cell::Str("L".to_owned()),
            Cell::Str("R".to_owned())
        ]]
    );
    assert!(warnings.is_empty());
}

#[test]
fn left_join_miss_emits_null_right_cells() {
    let left = id_name_dataset("l", "t1", "u1", 1, "L");
    let right = id_name_dataset("r", "t1", "u1", 2, "R");
    let mut plan = join_plan();
    plan[0]["how"] = json!("left");
    let (steps, _) = parse_plan(&plan).expect("plan");

    let (frame, warnings) = execute(
        &left,
        &steps,
        &EngineBounds::default(),
        &resolver_for(right),
    )
    .expect("execute");

    assert_eq!(
        frame.rows,
        vec![vec![Cell::I32(1), Cell::Str("L".to_owned()), Cell::Null]]
    );
    assert!(warnings.is_empty(), "no cap warnings on a plain miss");
}

#[test]
fn inner_join_miss_drops_the_row() {
    let left = id_name_dataset("l", "t1", "u1", 1, "L");
    let right = id_name_dataset("r", "t1", "u1", 2, "R");
    let (steps, _) = parse_plan(&join_plan()).expect("plan");

    let (frame, _) = execute(
        &left,
        &steps,
        &EngineBounds::default(),
        &resolver_for(right),
    )
    .expect("execute");
    assert_eq!(frame.row_count(), 0);
}

#[test]
fn unresolvable_right_dataset_is_an_argument_error() {
    let left = id_name_dataset("l", "t1", "u1", 1, "L");
    let (steps, _) = parse_plan(&join_plan()).expect("plan");

    let err = execute(&left, &steps, &EngineBounds::default(), &|_: &str| None);
    assert!(matches!(err, Err(EngineError::Argument(_))));
}

#[test]
fn missing_key_column_skips_join_with_warning() {
    let left = id_name_dataset("l", "t1", "u1", 1, "L");
    let right = id_name_dataset("r", "t1", "u1", 1, "R");
    let mut plan = join_plan();
    plan[0]["leftKeys"] = json!(["ghost"]);
    let (steps, _) = parse_plan(&plan).expect("plan");

    let (frame, warnings) = execute(
        &left,
        &steps,
        &EngineBounds::default(),
        &resolver_for(right),
    )
    .expect("execute");

    assert_eq!(frame.columns.len(), 2, "left frame unchanged");
    assert_eq!(warnings.len(), 1);
    assert!(warnings[0].contains("join skipped"));
}
