//! Invoker stage machine: every terminal state is a complete envelope.

use armitage::context::ExecutionContext;
use armitage::envelope::PolicyDecision;
use serde_json::{json, Value};

use crate::common::{prices_dataset, runtime, sales_dataset};

fn ctx() -> ExecutionContext {
    ExecutionContext::for_tests("t1", "u1", &["analyst"])
}

fn exposed() -> Vec<String> {
    vec![
        "analytics.run".to_owned(),
        "dataset.preview".to_owned(),
        "dataset.list".to_owned(),
        "writeback.prepare".to_owned(),
        "writeback.commit".to_owned(),
    ]
}

#[tokio::test]
async fn unknown_tool_is_tool_not_allowed() {
    let rt = runtime().await;
    let envelope = rt
        .invoker
        .invoke("ghost.tool", &json!({}), &exposed(), &ctx())
        .await;
    assert!(!envelope.ok);
    assert_eq!(envelope.policy.decision, PolicyDecision::Deny);
    assert_eq!(
        envelope.error.expect("error").code,
        "TOOL_NOT_ALLOWED"
    );
}

#[tokio::test]
async fn hidden_tool_is_tool_not_allowed() {
    let rt = runtime().await;
    let envelope = rt
        .invoker
        .invoke(
            "analytics.run",
            &json!({}),
            &["dataset.list".to_owned()],
            &ctx(),
        )
        .await;
    assert_eq!(envelope.error.expect("error").code, "TOOL_NOT_ALLOWED");
}

#[tokio::test]
async fn bad_arguments_are_validation_error_with_field() {
    let rt = runtime().await;
    let envelope = rt
        .invoker
        .invoke(
            "analytics.run",
            &json!({"datasetId": "d1", "pipeline": [], "bogus": 1}),
            &exposed(),
            &ctx(),
        )
        .await;
    let error = envelope.error.expect("error");
    assert_eq!(error.code, "VALIDATION_ERROR");
    assert!(error.details.iter().any(|d| d.contains("bogus")));
    assert_eq!(envelope.data, Value::Null);
}

#[tokio::test]
async fn write_tool_without_write_role_is_forbidden() {
    let rt = runtime().await;
    let envelope = rt
        .invoker
        .invoke(
            "writeback.commit",
            &json!({}),
            &exposed(),
            &ExecutionContext::for_tests("t1", "u1", &["analyst"]),
        )
        .await;
    assert_eq!(envelope.error.expect("error").code, "FORBIDDEN");
}

#[tokio::test]
async fn empty_role_set_cannot_even_read() {
    let rt = runtime().await;
    let envelope = rt
        .invoker
        .invoke(
            "dataset.list",
            &json!({}),
            &exposed(),
            &ExecutionContext::for_tests("t1", "u1", &[]),
        )
        .await;
    assert_eq!(envelope.error.expect("error").code, "FORBIDDEN");
}

#[tokio::test]
async fn handler_failure_surfaces_its_code() {
    let rt = runtime().await;
    let envelope = rt
        .invoker
        .invoke(
            "analytics.run",
            &json!({"datasetId": "missing", "pipeline": []}),
            &exposed(),
            &ctx(),
        )
        .await;
    let error = envelope.error.expect("error");
    assert_eq!(error.code, "TOOL_EXECUTION_FAILED");
    assert!(error
        .details
        .iter()
        .any(|d| d.contains("DATASET_NOT_FOUND")));
}

#[tokio::test]
async fn successful_run_produces_allow_envelope_with_evidence() {
    let rt = runtime().await;
    rt.datasets.insert(sales_dataset("d1", "t1", "u1"));

    let envelope = rt
        .invoker
        .invoke(
            "analytics.run",
            &json!({
                "datasetId": "d1",
                "pipeline": [{"op": "groupBy", "by": ["category"], "aggregates": [{"op": "count", "as": "n"}]}]
            }),
            &exposed(),
            &ctx(),
        )
        .await;

    assert!(envelope.ok);
    assert!(envelope.error.is_none());
    assert_eq!(envelope.policy.decision, PolicyDecision::Allow);
    assert_eq!(envelope.data["rowCount"], json!(2));
    assert!(!envelope.evidence.is_empty());
    assert_eq!(envelope.tool.name, "analytics.run");
    assert!(envelope.normalized_intent.is_some());
}

#[tokio::test]
async fn preview_evidence_falls_back_to_compacted_payload() {
    let rt = runtime().await;
    rt.datasets.insert(prices_dataset("d1", "t1", "u1"));

    let envelope = rt
        .invoker
        .invoke(
            "dataset.preview",
            &json!({"datasetId": "d1", "pageSize": 2}),
            &exposed(),
            &ctx(),
        )
        .await;

    assert!(envelope.ok);
    // The preview handler attaches no evidence; the invoker synthesizes
    // one from the payload.
    assert_eq!(envelope.evidence.len(), 1);
    assert_eq!(envelope.evidence[0]["kind"], json!("dataset.preview.v2"));
}

#[tokio::test]
async fn tenant_isolation_holds_through_the_pipeline() {
    let rt = runtime().await;
    rt.datasets.insert(sales_dataset("d1", "t1", "u1"));

    let envelope = rt
        .invoker
        .invoke(
            "analytics.run",
            &json!({"datasetId": "d1", "pipeline": []}),
            &exposed(),
            &ExecutionContext::for_tests("t2", "u1", &["analyst"]),
        )
        .await;

    let error = envelope.error.expect("error");
    assert_eq!(error.code, "TOOL_EXECUTION_FAILED");
    assert!(error.details.iter().any(|d| d.contains("DATASET_NOT_FOUND")));
}

#[tokio::test]
async fn identical_runs_are_cache_hits_with_identical_rows() {
    let rt = runtime().await;
    rt.datasets.insert(sales_dataset("d1", "t1", "u1"));
    let args = json!({
        "datasetId": "d1",
        "pipeline": [{"op": "sort", "column": "price", "direction": "asc"}]
    });

    let first = rt
        .invoker
        .invoke("analytics.run", &args, &exposed(), &ctx())
        .await;
    let second = rt
        .invoker
        .invoke("analytics.run", &args, &exposed(), &ctx())
        .await;

    assert_eq!(first.data["cached"], json!(false));
    assert_eq!(second.data["cached"], json!(true));
    assert_eq!(
        first.data["rows"].to_string(),
        second.data["rows"].to_string(),
        "cached rows must be byte-identical"
    );
}

#[tokio::test]
async fn persisting_a_result_bypasses_the_cache_and_mints_a_dataset() {
    let rt = runtime().await;
    rt.datasets.insert(sales_dataset("d1", "t1", "u1"));
    let args = json!({
        "datasetId": "d1",
        "pipeline": [{"op": "select", "columns": ["category"]}],
        "persistAs": "categories"
    });

    let envelope = rt
        .invoker
        .invoke("analytics.run", &args, &exposed(), &ctx())
        .await;
    assert!(envelope.ok);
    let new_id = envelope.data["resultDatasetId"]
        .as_str()
        .expect("persisted id")
        .to_owned();

    // The persisted dataset is immediately usable, same tenant only.
    assert!(rt.datasets.lookup(&new_id, "t1", "u1").is_some());
    assert!(rt.datasets.lookup(&new_id, "t2", "u1").is_none());

    // Same args again: still not served from cache.
    let again = rt
        .invoker
        .invoke("analytics.run", &args, &exposed(), &ctx())
        .await;
    assert_eq!(again.data["cached"], json!(false));
}
