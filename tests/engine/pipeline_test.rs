//! End-to-end pipeline semantics: grouping, filtering, caps, totality.

use std::sync::Arc;

use armitage::engine::dataset::{Cell, ColumnType, Dataset};
use armitage::engine::{execute, plan::parse_plan, EngineBounds};
use serde_json::json;

use crate::common::{prices_dataset, sales_dataset};

fn no_resolver() -> impl Fn(&str) -> Option<Arc<Dataset>> + Send + Sync {
    |_: &str| None
}

#[test]
fn group_count_returns_rows_in_insertion_order() {
    let dataset = sales_dataset("d1", "t1", "u1");
    let (steps, _) = parse_plan(&json!([{
        "op": "groupBy",
        "by": ["category"],
        "aggregates": [{"op": "count", "as": "n"}]
    }]))
    .expect("plan");

    let (frame, warnings) = execute(&dataset, &steps, &EngineBounds::default(), &no_resolver())
        .expect("execute");

    assert_eq!(frame.row_count(), 2);
    assert_eq!(frame.rows[0], vec![Cell::Str("A".to_owned()), Cell::F64(2.0)]);
    assert_eq!(frame.rows[1], vec![Cell::Str("B".to_owned()), Cell::F64(1.0)]);
    assert_eq!(frame.columns[0].name, "category");
    assert_eq!(frame.columns[0].data_type, ColumnType::String);
    assert_eq!(frame.columns[1].name, "n");
    assert_eq!(frame.columns[1].data_type, ColumnType::Double);
    assert!(warnings.is_empty());
}

#[test]
fn filter_sort_topn_keeps_the_single_match() {
    let dataset = prices_dataset("d1", "t1", "u1");
    let (steps, _) = parse_plan(&json!([
        {"op": "filter", "column": "price", "operator": "eq", "value": "30"},
        {"op": "sort", "column": "price", "direction": "desc"},
        {"op": "topN", "n": 2}
    ]))
    .expect("plan");

    let (frame, warnings) = execute(&dataset, &steps, &EngineBounds::default(), &no_resolver())
        .expect("execute");

    assert_eq!(frame.rows, vec![vec![Cell::I32(30)]]);
    assert!(warnings.is_empty());
}

#[test]
fn topn_never_exceeds_result_row_bound() {
    let dataset = prices_dataset("d1", "t1", "u1");
    let bounds = EngineBounds {
        max_result_rows: 2,
        ..EngineBounds::default()
    };
    let (steps, _) = parse_plan(&json!([{"op": "topN", "n": 5000}])).expect("plan");
    let (frame, warnings) = execute(&dataset, &steps, &bounds, &no_resolver()).expect("execute");

    assert!(frame.row_count() <= 2);
    assert!(warnings.iter().any(|w| w.contains("rows")));
}

#[test]
fn group_cap_bounds_result_rows() {
    let dataset = prices_dataset("d1", "t1", "u1");
    let bounds = EngineBounds {
        max_groups: 2,
        ..EngineBounds::default()
    };
    let (steps, _) = parse_plan(&json!([{
        "op": "groupBy",
        "by": ["price"],
        "aggregates": [{"op": "count", "as": "n"}]
    }]))
    .expect("plan");
    let (frame, warnings) = execute(&dataset, &steps, &bounds, &no_resolver()).expect("execute");

    assert_eq!(frame.row_count(), 2);
    assert!(warnings.iter().any(|w| w.contains("group cap")));
}

#[test]
fn cap_breaches_warn_but_never_error() {
    // Every bound at its minimum: the engine must stay total.
    let dataset = sales_dataset("d1", "t1", "u1");
    let bounds = EngineBounds {
        top_n: 1,
        max_groups: 1,
        max_join_rows: 1,
        max_join_matches_per_left: 1,
        max_columns: 1,
        max_result_rows: 1,
    };
    let (steps, _) = parse_plan(&json!([
        {"op": "groupBy", "by": ["category"], "aggregates": [{"op": "sum", "column": "price", "as": "total"}]},
        {"op": "sort", "column": "total", "direction": "desc"}
    ]))
    .expect("plan");

    let (frame, warnings) = execute(&dataset, &steps, &bounds, &no_resolver()).expect("execute");
    assert_eq!(frame.row_count(), 1);
    assert_eq!(frame.columns.len(), 1);
    assert!(!warnings.is_empty());
}

#[test]
fn decimal_sum_survives_the_pipeline_exactly() {
    let dataset = sales_dataset("d1", "t1", "u1");
    let (steps, _) = parse_plan(&json!([{
        "op": "groupBy",
        "by": ["category"],
        "aggregates": [
            {"op": "sum", "column": "price", "as": "total"},
            {"op": "avg", "column": "price", "as": "mean"}
        ]
    }]))
    .expect("plan");
    let (frame, _) = execute(&dataset, &steps, &EngineBounds::default(), &no_resolver())
        .expect("execute");

    assert_eq!(frame.columns[1].data_type, ColumnType::Decimal);
    assert_eq!(
        frame.rows[0][1],
        Cell::Decimal("30".parse().expect("decimal"))
    );
    assert_eq!(
        frame.rows[0][2],
        Cell::Decimal("15".parse().expect("decimal"))
    );
}

#[test]
fn unknown_ops_and_operators_degrade_to_warnings() {
    let dataset = prices_dataset("d1", "t1", "u1");
    let (steps, parse_warnings) = parse_plan(&json!([
        {"op": "pivot"},
        {"op": "filter", "column": "price", "operator": "gte", "value": "10"},
        {"op": "topN", "n": "3"}
    ]))
    .expect("plan");

    assert_eq!(steps.len(), 1, "only topN survives");
    assert_eq!(parse_warnings.len(), 2);

    let (frame, _) = execute(&dataset, &steps, &EngineBounds::default(), &no_resolver())
        .expect("execute");
    assert_eq!(frame.row_count(), 3);
}
