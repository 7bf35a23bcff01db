//! Two-phase writeback handlers: `writeback.prepare` stages a change as a
//! confirmation plan, `writeback.commit` consumes the plan exactly once
//! after the user replies `CONFIRM <id>`.
//!
//! The actual mutation is performed by a [`WritebackSink`] — the seam where
//! the external write backend plugs in. The default sink only acknowledges,
//! which is what non-production wiring and tests want.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use serde_json::json;
use tracing::info;

use crate::context::ExecutionContext;
use crate::dispatch::{HandlerOutcome, ToolHandler};
use crate::invoke::str_arg;
use crate::registry::{ArgValue, ToolIntent};
use crate::store::{ConfirmationPlan, PlanStore};

// ---------------------------------------------------------------------------
// Sink
// ---------------------------------------------------------------------------

/// Applies a confirmed plan against the external write backend.
#[async_trait]
pub trait WritebackSink: Send + Sync {
    /// Perform the staged change; returns a receipt string.
    async fn apply(&self, plan: &ConfirmationPlan) -> anyhow::Result<String>;
}

/// Sink that only logs the commit — the default wiring.
pub struct LoggingWritebackSink;

#[async_trait]
impl WritebackSink for LoggingWritebackSink {
    async fn apply(&self, plan: &ConfirmationPlan) -> anyhow::Result<String> {
        info!(plan_id = %plan.id, tool = %plan.tool, "writeback committed (logging sink)");
        Ok(format!("logged:{}", plan.id))
    }
}

// ---------------------------------------------------------------------------
// writeback.prepare
// ---------------------------------------------------------------------------

/// Handler for `writeback.prepare`.
pub struct WritebackPrepareHandler {
    plans: Arc<PlanStore>,
    ttl_secs: u64,
}

impl WritebackPrepareHandler {
    /// Wire the handler to the plan store.
    pub fn new(plans: Arc<PlanStore>, ttl_secs: u64) -> Self {
        Self { plans, ttl_secs }
    }
}

#[async_trait]
impl ToolHandler for WritebackPrepareHandler {
    async fn execute(
        &self,
        intent: &ToolIntent,
        ctx: &ExecutionContext,
    ) -> anyhow::Result<HandlerOutcome> {
        let action = str_arg(intent, "action")
            .ok_or_else(|| anyhow::anyhow!("action absent after validation"))?;
        let mut data = intent
            .arg("payload")
            .and_then(ArgValue::as_string_map)
            .cloned()
            .unwrap_or_default();
        data.insert("action".to_owned(), action.to_owned());

        let plan = ConfirmationPlan::stage(
            "writeback.commit",
            &ctx.tenant_id,
            &ctx.user_id,
            self.ttl_secs,
            data,
        );
        self.plans.create(&plan).await?;

        let payload = json!({
            "kind": "writeback.prepare.v2",
            "schemaVersion": 2,
            "planId": plan.id,
            "action": action,
            "expiresAtUtc": plan.expires_at,
            "instruction": format!("Reply 'CONFIRM {}' to commit this change.", plan.id),
        });
        Ok(HandlerOutcome::ok(
            format!("staged '{action}'; awaiting confirmation"),
            payload,
        ))
    }
}

// ---------------------------------------------------------------------------
// writeback.commit
// ---------------------------------------------------------------------------

/// Handler for `writeback.commit`.
pub struct WritebackCommitHandler {
    plans: Arc<PlanStore>,
    sink: Arc<dyn WritebackSink>,
}

impl WritebackCommitHandler {
    /// Wire the handler to the plan store and the write sink.
    pub fn new(plans: Arc<PlanStore>, sink: Arc<dyn WritebackSink>) -> Self {
        Self { plans, sink }
    }
}

#[async_trait]
impl ToolHandler for WritebackCommitHandler {
    async fn execute(
        &self,
        intent: &ToolIntent,
        ctx: &ExecutionContext,
    ) -> anyhow::Result<HandlerOutcome> {
        // The id the user actually typed wins over anything the model put
        // into the arguments.
        let plan_id = ctx
            .confirmation_id
            .as_deref()
            .or_else(|| str_arg(intent, "planId"));
        let Some(plan_id) = plan_id else {
            return Ok(HandlerOutcome::fail(
                "CONFIRMATION_REQUIRED",
                "no confirmation id present; ask the user to reply CONFIRM <id>",
            ));
        };

        let Some(plan) = self
            .plans
            .consume(plan_id, &ctx.tenant_id, &ctx.user_id)
            .await?
        else {
            return Ok(HandlerOutcome::fail(
                "PLAN_NOT_FOUND",
                format!("plan '{plan_id}' does not exist, was already used, or expired"),
            ));
        };

        let receipt = self.sink.apply(&plan).await?;
        let action = plan.data.get("action").cloned().unwrap_or_default();

        let payload = json!({
            "kind": "writeback.commit.v2",
            "schemaVersion": 2,
            "planId": plan.id,
            "action": action,
            "payload": plan.data,
            "committedAtUtc": Utc::now(),
            "receipt": receipt,
        });
        Ok(HandlerOutcome::ok(
            format!("committed '{action}'"),
            payload,
        ))
    }
}
