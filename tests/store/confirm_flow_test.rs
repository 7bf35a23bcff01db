//! The prepare → CONFIRM → commit flow end to end through the invoker.

use armitage::context::{extract_confirmation, ExecutionContext};
use serde_json::json;

use crate::common::runtime;

fn exposed() -> Vec<String> {
    vec!["writeback.prepare".to_owned(), "writeback.commit".to_owned()]
}

fn writer_ctx() -> ExecutionContext {
    ExecutionContext::for_tests("t1", "u1", &["admin"])
}

#[tokio::test]
async fn prepare_then_commit_consumes_the_plan_once() {
    let rt = runtime().await;

    let prepared = rt
        .invoker
        .invoke(
            "writeback.prepare",
            &json!({"action": "update-price", "payload": {"sku": "X-1", "price": "99"}}),
            &exposed(),
            &writer_ctx(),
        )
        .await;
    assert!(prepared.ok, "{:?}", prepared.error);
    let plan_id = prepared.data["planId"].as_str().expect("plan id").to_owned();

    // The user replies with the confirm phrase; the planner extracts the id.
    let user_text = format!("looks right, CONFIRM {plan_id}");
    let ctx = writer_ctx().with_confirmation(extract_confirmation(&user_text));

    let committed = rt
        .invoker
        .invoke("writeback.commit", &json!({}), &exposed(), &ctx)
        .await;
    assert!(committed.ok, "{:?}", committed.error);
    assert_eq!(committed.data["planId"], json!(plan_id));
    assert_eq!(committed.data["action"], json!("update-price"));
    assert_eq!(committed.data["payload"]["sku"], json!("X-1"));

    // Second commit with the same id: the plan is gone.
    let replay = rt
        .invoker
        .invoke("writeback.commit", &json!({}), &exposed(), &ctx)
        .await;
    let error = replay.error.expect("error");
    assert_eq!(error.code, "TOOL_EXECUTION_FAILED");
    assert!(error.details.iter().any(|d| d.contains("PLAN_NOT_FOUND")));
}

#[tokio::test]
async fn commit_without_a_confirmation_id_is_refused() {
    let rt = runtime().await;
    let envelope = rt
        .invoker
        .invoke("writeback.commit", &json!({}), &exposed(), &writer_ctx())
        .await;
    let error = envelope.error.expect("error");
    assert_eq!(error.code, "TOOL_EXECUTION_FAILED");
    assert!(error
        .details
        .iter()
        .any(|d| d.contains("CONFIRMATION_REQUIRED")));
}

#[tokio::test]
async fn plans_are_tenant_scoped_on_commit() {
    let rt = runtime().await;
    let prepared = rt
        .invoker
        .invoke(
            "writeback.prepare",
            &json!({"action": "delete-row"}),
            &exposed(),
            &writer_ctx(),
        )
        .await;
    let plan_id = prepared.data["planId"].as_str().expect("plan id").to_owned();

    let foreign = ExecutionContext::for_tests("t2", "u1", &["admin"])
        .with_confirmation(Some(plan_id));
    let envelope = rt
        .invoker
        .invoke("writeback.commit", &json!({}), &exposed(), &foreign)
        .await;
    let error = envelope.error.expect("error");
    assert!(error.details.iter().any(|d| d.contains("PLAN_NOT_FOUND")));
}
