//! Uniform response container produced for every tool invocation.
//!
//! An [`Envelope`] is the only shape the planner (and, unrendered, the API
//! client) ever sees from a tool call. Constructors enforce the envelope
//! invariants:
//!
//! - `ok = true` ⇒ `error` is absent
//! - `ok = false` ⇒ `error` is present and `data` is empty
//! - `policy.decision = deny` ⇔ `ok = false`

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::context::ExecutionContext;

/// Discriminator value for the current envelope shape.
pub const ENVELOPE_KIND: &str = "envelope.v2";

// ---------------------------------------------------------------------------
// Reason codes
// ---------------------------------------------------------------------------

/// Stable failure reason codes, embedded in `error.code` and
/// `policy.reasonCode`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ReasonCode {
    /// Tool not exposed for this request.
    ToolNotAllowed,
    /// Argument shape/type/range violation.
    ValidationError,
    /// Role check failed.
    Forbidden,
    /// Handler reported failure.
    ToolExecutionFailed,
    /// Response schema validation failed (non-retryable).
    ContractError,
    /// Any other exception, stripped of internals.
    InternalError,
}

impl ReasonCode {
    /// Wire string for logs and envelopes.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::ToolNotAllowed => "TOOL_NOT_ALLOWED",
            Self::ValidationError => "VALIDATION_ERROR",
            Self::Forbidden => "FORBIDDEN",
            Self::ToolExecutionFailed => "TOOL_EXECUTION_FAILED",
            Self::ContractError => "CONTRACT_ERROR",
            Self::InternalError => "INTERNAL_ERROR",
        }
    }
}

// ---------------------------------------------------------------------------
// Envelope sections
// ---------------------------------------------------------------------------

/// Identity of the tool the envelope answers for.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolRef {
    /// Registered tool name.
    pub name: String,
    /// Whether the tool mutates state.
    pub requires_write: bool,
}

/// Structured failure body.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorBody {
    /// Stable reason code string.
    pub code: String,
    /// Human-readable message (no stack traces).
    pub message: String,
    /// Optional detail lines (offending field, flattened schema errors).
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub details: Vec<String>,
}

/// Caller identity echoed back for audit correlation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Meta {
    pub tenant_id: String,
    pub user_id: String,
    pub correlation_id: String,
    pub roles: Vec<String>,
}

/// Timing block filled in by the invoker.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Telemetry {
    pub request_id: String,
    pub trace_id: String,
    /// Wall-clock duration of the whole invocation.
    pub duration_ms: u64,
}

/// Authorization verdict recorded on every envelope.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Policy {
    /// `allow` or `deny`.
    pub decision: PolicyDecision,
    /// `OK` on allow, the failure reason code on deny.
    pub reason_code: String,
    pub checked_at_utc: DateTime<Utc>,
    pub roles_evaluated: Vec<String>,
}

/// The two policy outcomes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PolicyDecision {
    Allow,
    Deny,
}

// ---------------------------------------------------------------------------
// Envelope
// ---------------------------------------------------------------------------

/// The uniform tool-call response container (`envelope.v2`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Envelope {
    /// Always [`ENVELOPE_KIND`].
    pub kind: String,
    pub generated_at_utc: DateTime<Utc>,
    pub tool: ToolRef,
    pub ok: bool,
    /// One-line outcome summary.
    pub message: String,
    /// The validated intent the handler actually saw, when validation ran.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub normalized_intent: Option<Value>,
    /// Handler payload. `Null` on failure; absent in compacted copies.
    #[serde(default)]
    pub data: Value,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub warnings: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorBody>,
    pub meta: Meta,
    pub telemetry: Telemetry,
    pub policy: Policy,
    /// Backend the data came from, when the handler reported one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
    /// Bounded excerpts of the payload for the model's benefit.
    #[serde(default)]
    pub evidence: Vec<Value>,
    /// Set by the compactor on the chat-history copy only.
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub compacted: bool,
    /// Set when any bound fired while compacting.
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub truncated: bool,
}

impl Envelope {
    /// Build a success envelope. `policy.decision` is `allow`.
    #[allow(clippy::too_many_arguments)]
    pub fn success(
        tool: ToolRef,
        ctx: &ExecutionContext,
        message: String,
        normalized_intent: Option<Value>,
        data: Value,
        warnings: Vec<String>,
        source: Option<String>,
        evidence: Vec<Value>,
        duration_ms: u64,
    ) -> Self {
        let now = Utc::now();
        Self {
            kind: ENVELOPE_KIND.to_owned(),
            generated_at_utc: now,
            tool,
            ok: true,
            message,
            normalized_intent,
            data,
            warnings,
            error: None,
            meta: Meta::from_ctx(ctx),
            telemetry: Telemetry::from_ctx(ctx, duration_ms),
            policy: Policy {
                decision: PolicyDecision::Allow,
                reason_code: "OK".to_owned(),
                checked_at_utc: now,
                roles_evaluated: ctx.roles.clone(),
            },
            source,
            evidence,
            compacted: false,
            truncated: false,
        }
    }

    /// Build a failure envelope. `data` is `Null`, `policy.decision` is
    /// `deny`, and `error.code == policy.reasonCode`.
    pub fn failure(
        tool: ToolRef,
        ctx: &ExecutionContext,
        code: ReasonCode,
        message: String,
        details: Vec<String>,
        duration_ms: u64,
    ) -> Self {
        let now = Utc::now();
        Self {
            kind: ENVELOPE_KIND.to_owned(),
            generated_at_utc: now,
            tool,
            ok: false,
            message: message.clone(),
            normalized_intent: None,
            data: Value::Null,
            warnings: Vec::new(),
            error: Some(ErrorBody {
                code: code.as_str().to_owned(),
                message,
                details,
            }),
            meta: Meta::from_ctx(ctx),
            telemetry: Telemetry::from_ctx(ctx, duration_ms),
            policy: Policy {
                decision: PolicyDecision::Deny,
                reason_code: code.as_str().to_owned(),
                checked_at_utc: now,
                roles_evaluated: ctx.roles.clone(),
            },
            source: None,
            evidence: Vec::new(),
            compacted: false,
            truncated: false,
        }
    }
}

impl Meta {
    fn from_ctx(ctx: &ExecutionContext) -> Self {
        Self {
            tenant_id: ctx.tenant_id.clone(),
            user_id: ctx.user_id.clone(),
            correlation_id: ctx.correlation_id.clone(),
            roles: ctx.roles.clone(),
        }
    }
}

impl Telemetry {
    fn from_ctx(ctx: &ExecutionContext, duration_ms: u64) -> Self {
        Self {
            request_id: ctx.request_id.clone(),
            trace_id: ctx.trace_id.clone(),
            duration_ms,
        }
    }
}
