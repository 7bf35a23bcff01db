//! Tool invoker: the fail-closed stage machine wrapped around every tool
//! call.
//!
//! ```text
//!  START → [exposure check] → [registry validate] → [authorize]
//!        → [dispatch] → [contract validate] → [evidence fallback]
//!        → ENVELOPE_OK
//!           ↑  any stage fails → ENVELOPE_FAIL(code, message, details)
//! ```
//!
//! Every terminal state produces a complete [`Envelope`]; no error or
//! panic-shaped control flow escapes to the planner. Failure is an
//! explicit result sum, and the envelope constructor is a pure mapping
//! from it.

use std::sync::Arc;
use std::time::Instant;

use serde_json::Value;
use sha2::{Digest, Sha256};
use tracing::{info, warn};

use crate::context::ExecutionContext;
use crate::contracts::{ContractCatalog, ContractCheck};
use crate::dispatch::Dispatcher;
use crate::envelope::{Envelope, ReasonCode, ToolRef};
use crate::registry::{ArgValue, ToolIntent, ToolRegistry, ToolSpec};

pub mod evidence;

use evidence::{compact_value, EvidenceBounds};

/// Result sum the stage machine runs on before the envelope is built.
enum StageOutcome {
    Ok {
        spec: Arc<ToolSpec>,
        intent: ToolIntent,
        message: String,
        data: Value,
        warnings: Vec<String>,
        source: Option<String>,
        evidence: Vec<Value>,
    },
    Fail {
        tool: ToolRef,
        code: ReasonCode,
        message: String,
        details: Vec<String>,
    },
}

/// The invoker: shared, read-only after construction.
pub struct Invoker {
    registry: Arc<ToolRegistry>,
    dispatcher: Arc<Dispatcher>,
    contracts: Arc<ContractCatalog>,
    evidence_bounds: EvidenceBounds,
}

impl Invoker {
    /// Wire the invoker to its collaborators.
    pub fn new(
        registry: Arc<ToolRegistry>,
        dispatcher: Arc<Dispatcher>,
        contracts: Arc<ContractCatalog>,
    ) -> Self {
        Self {
            registry,
            dispatcher,
            contracts,
            evidence_bounds: EvidenceBounds::default(),
        }
    }

    /// Run one tool call through the full pipeline.
    ///
    /// `exposed` is the set of tool names offered to the model this turn;
    /// anything else is rejected before validation. The returned envelope
    /// is complete in every terminal state.
    pub async fn invoke(
        &self,
        tool_name: &str,
        raw_args: &Value,
        exposed: &[String],
        ctx: &ExecutionContext,
    ) -> Envelope {
        let started = Instant::now();
        let outcome = self.run_stages(tool_name, raw_args, exposed, ctx).await;
        let duration_ms = duration_ms(started);

        let envelope = match outcome {
            StageOutcome::Ok {
                spec,
                intent,
                message,
                data,
                warnings,
                source,
                evidence,
            } => {
                let evidence = if evidence.is_empty() {
                    // Fallback: compact the payload so the planner never
                    // spins on a seemingly empty result.
                    vec![compact_value(&data, &self.evidence_bounds)]
                } else {
                    evidence
                        .iter()
                        .map(|item| compact_value(item, &self.evidence_bounds))
                        .collect()
                };
                Envelope::success(
                    ToolRef {
                        name: spec.name.clone(),
                        requires_write: spec.requires_write,
                    },
                    ctx,
                    message,
                    Some(intent.to_json()),
                    data,
                    warnings,
                    source,
                    evidence,
                    duration_ms,
                )
            }
            StageOutcome::Fail {
                tool,
                code,
                message,
                details,
            } => Envelope::failure(tool, ctx, code, message, details, duration_ms),
        };

        self.log_invocation(&envelope, ctx);
        envelope
    }

    async fn run_stages(
        &self,
        tool_name: &str,
        raw_args: &Value,
        exposed: &[String],
        ctx: &ExecutionContext,
    ) -> StageOutcome {
        // Stage 1: exposure. An unknown tool and a hidden tool look the same.
        let spec = match self.registry.get(tool_name) {
            Some(spec) if exposed.iter().any(|t| t == tool_name) => spec,
            _ => {
                return StageOutcome::Fail {
                    tool: ToolRef {
                        name: tool_name.to_owned(),
                        requires_write: false,
                    },
                    code: ReasonCode::ToolNotAllowed,
                    message: format!("tool '{tool_name}' is not available for this request"),
                    details: Vec::new(),
                };
            }
        };
        let tool = ToolRef {
            name: spec.name.clone(),
            requires_write: spec.requires_write,
        };

        // Stage 2: registry validation.
        let (intent, mut warnings) = match crate::registry::validate(&spec, raw_args) {
            Ok(validated) => validated,
            Err(e) => {
                return StageOutcome::Fail {
                    tool,
                    code: ReasonCode::ValidationError,
                    message: e.to_string(),
                    details: vec![format!("field: {}", e.field)],
                };
            }
        };

        // Stage 3: authorization. Reads need any authenticated role;
        // writes need a role from the tool's allow-list.
        if !self.authorized(&spec, ctx) {
            return StageOutcome::Fail {
                tool,
                code: ReasonCode::Forbidden,
                message: format!("caller roles do not permit '{}'", spec.name),
                details: Vec::new(),
            };
        }

        // Stage 4: dispatch.
        let Some(handler) = self.dispatcher.get(&spec.name) else {
            warn!(tool = %spec.name, "registered tool has no handler");
            return StageOutcome::Fail {
                tool,
                code: ReasonCode::InternalError,
                message: "tool is misconfigured".to_owned(),
                details: Vec::new(),
            };
        };
        let outcome = match handler.execute(&intent, ctx).await {
            Ok(outcome) => outcome,
            Err(e) => {
                warn!(tool = %spec.name, error = %e, "handler returned an error");
                return StageOutcome::Fail {
                    tool,
                    code: ReasonCode::InternalError,
                    // Top-level message only; no backtraces or causes.
                    message: "tool execution failed unexpectedly".to_owned(),
                    details: Vec::new(),
                };
            }
        };

        if !outcome.result.success {
            let mut details = Vec::new();
            if let Some(code) = &outcome.result.code {
                details.push(format!("handlerCode: {code}"));
            }
            return StageOutcome::Fail {
                tool,
                code: ReasonCode::ToolExecutionFailed,
                message: outcome.result.message,
                details,
            };
        }

        // Stage 5: response contract.
        match self.contracts.check(&outcome.result.data) {
            ContractCheck::Invalid(errors) => {
                return StageOutcome::Fail {
                    tool,
                    code: ReasonCode::ContractError,
                    message: "tool payload violates its response contract".to_owned(),
                    details: errors,
                };
            }
            ContractCheck::Skipped(warning) => warnings.push(warning),
            ContractCheck::Valid | ContractCheck::NotApplicable => {}
        }

        StageOutcome::Ok {
            spec,
            intent,
            message: outcome.result.message,
            data: outcome.result.data,
            warnings,
            source: outcome.extras.source,
            evidence: outcome.extras.evidence,
        }
    }

    fn authorized(&self, spec: &ToolSpec, ctx: &ExecutionContext) -> bool {
        if ctx.roles.is_empty() {
            // Unauthenticated callers get nothing, reads included.
            return false;
        }
        if !spec.requires_write {
            return true;
        }
        spec.write_roles
            .iter()
            .any(|allowed| ctx.roles.iter().any(|r| r.eq_ignore_ascii_case(allowed)))
    }

    fn log_invocation(&self, envelope: &Envelope, ctx: &ExecutionContext) {
        let data_json = envelope.data.to_string();
        let output_hash = hex::encode(Sha256::digest(data_json.as_bytes()));
        let dataset_id = envelope
            .normalized_intent
            .as_ref()
            .and_then(|intent| intent.pointer("/args/datasetId"))
            .and_then(Value::as_str)
            .unwrap_or("");
        info!(
            tool = %envelope.tool.name,
            ok = envelope.ok,
            duration_ms = envelope.telemetry.duration_ms,
            compacted_bytes = data_json.len(),
            truncated = envelope.truncated,
            output_hash = %output_hash,
            dataset_id,
            tenant_id = %ctx.tenant_id,
            user_id = %ctx.user_id,
            "tool invocation finished"
        );
    }
}

fn duration_ms(started: Instant) -> u64 {
    u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX)
}

/// Convenience for handlers: read a string argument.
pub fn str_arg<'a>(intent: &'a ToolIntent, name: &str) -> Option<&'a str> {
    intent.arg(name).and_then(ArgValue::as_str)
}
