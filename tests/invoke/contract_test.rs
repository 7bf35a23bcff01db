//! Response-contract enforcement through the invoker.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{json, Value};

use armitage::compact::{compact_for_history, DEFAULT_MAX_TOOL_RESULT_BYTES};
use armitage::context::ExecutionContext;
use armitage::dispatch::{Dispatcher, HandlerOutcome, ToolHandler};
use armitage::invoke::Invoker;
use armitage::registry::{FilterCanonicalizer, PagingPolicy, ToolRegistry, ToolSpec};

use crate::common::load_shipped_contracts;

/// Handler that returns whatever payload it was constructed with.
struct FixedPayloadHandler {
    payload: Value,
}

#[async_trait]
impl ToolHandler for FixedPayloadHandler {
    async fn execute(
        &self,
        _intent: &armitage::registry::ToolIntent,
        _ctx: &ExecutionContext,
    ) -> anyhow::Result<HandlerOutcome> {
        Ok(HandlerOutcome::ok("done", self.payload.clone()))
    }
}

fn stub_spec(name: &str) -> ToolSpec {
    ToolSpec {
        name: name.to_owned(),
        description: "test stub".to_owned(),
        requires_write: false,
        write_roles: vec![],
        args: vec![],
        paging: PagingPolicy::none(),
        allowed_filter_keys: vec![],
        filter_aliases: Arc::new(FilterCanonicalizer::default()),
    }
}

fn invoker_with(payload: Value) -> Invoker {
    let mut registry = ToolRegistry::new();
    registry.register(stub_spec("analytics.run"));
    let mut dispatcher = Dispatcher::new();
    dispatcher.register("analytics.run", Arc::new(FixedPayloadHandler { payload }));
    Invoker::new(
        Arc::new(registry),
        Arc::new(dispatcher),
        Arc::new(load_shipped_contracts()),
    )
}

fn ctx() -> ExecutionContext {
    ExecutionContext::for_tests("t1", "u1", &["analyst"])
}

#[tokio::test]
async fn payload_missing_required_field_is_contract_error() {
    // Declares the governed kind but omits almost everything it requires.
    let invoker = invoker_with(json!({
        "kind": "analytics.run.v2",
        "schemaVersion": 2
    }));

    let envelope = invoker
        .invoke(
            "analytics.run",
            &json!({}),
            &["analytics.run".to_owned()],
            &ctx(),
        )
        .await;

    assert!(!envelope.ok);
    let error = envelope.error.as_ref().expect("error");
    assert_eq!(error.code, "CONTRACT_ERROR");
    assert!(!error.details.is_empty());

    // The chat-history copy carries no data field at all.
    let compacted = compact_for_history(&envelope, DEFAULT_MAX_TOOL_RESULT_BYTES);
    let parsed: Value = serde_json::from_str(&compacted).expect("json");
    assert!(parsed.get("data").is_none());
    assert_eq!(
        parsed.pointer("/policy/reasonCode").and_then(Value::as_str),
        Some("CONTRACT_ERROR")
    );
}

#[tokio::test]
async fn conforming_payload_passes_the_contract() {
    let invoker = invoker_with(json!({
        "kind": "analytics.run.v2",
        "schemaVersion": 2,
        "datasetId": "d1",
        "rowCount": 0,
        "columns": [],
        "rows": [],
        "warnings": [],
        "cached": false
    }));

    let envelope = invoker
        .invoke(
            "analytics.run",
            &json!({}),
            &["analytics.run".to_owned()],
            &ctx(),
        )
        .await;
    assert!(envelope.ok, "{:?}", envelope.error);
}

#[tokio::test]
async fn undeclared_kind_skips_validation_with_warning() {
    let invoker = invoker_with(json!({
        "kind": "misc.report.v9",
        "schemaVersion": 9,
        "anything": true
    }));

    let envelope = invoker
        .invoke(
            "analytics.run",
            &json!({}),
            &["analytics.run".to_owned()],
            &ctx(),
        )
        .await;
    assert!(envelope.ok);
    assert!(envelope
        .warnings
        .iter()
        .any(|w| w.contains("validation skipped")));
}
