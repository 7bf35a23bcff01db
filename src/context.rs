//! Execution context: the immutable per-request identity handed to every
//! stage of the tool pipeline.
//!
//! Built once per chat turn from transport headers (`X-Tenant-Id`,
//! `X-User-Id`, `X-Roles`, `X-Conversation-Id`, `X-Correlation-Id`,
//! `X-Language`). When `X-Roles` is absent, the bearer token's
//! `roles`/`role`/`groups` claims are used as a fallback source — the token
//! payload is decoded, never verified; signature checks belong to the
//! transport layer in front of this crate.

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use regex::Regex;
use serde_json::Value;
use uuid::Uuid;

use crate::i18n::Lang;

// ---------------------------------------------------------------------------
// ExecutionContext
// ---------------------------------------------------------------------------

/// Immutable identity and correlation data for one chat turn.
///
/// Handlers receive a shared reference; nothing in the pipeline mutates it
/// after construction.
#[derive(Debug, Clone)]
pub struct ExecutionContext {
    pub tenant_id: String,
    pub user_id: String,
    /// Role names, lower-cased, deduplicated, order-preserving.
    pub roles: Vec<String>,
    pub correlation_id: String,
    /// Fresh per request; never taken from the client.
    pub request_id: String,
    pub trace_id: String,
    pub conversation_id: String,
    /// Confirmation id extracted from the latest user text, if any.
    pub confirmation_id: Option<String>,
    /// Resolved response language.
    pub language: Lang,
}

/// Errors from context construction.
#[derive(Debug, thiserror::Error)]
pub enum ContextError {
    /// A required transport header was absent or blank.
    #[error("missing required header: {0}")]
    MissingHeader(&'static str),
}

impl ExecutionContext {
    /// Build a context from a header lookup function.
    ///
    /// `lookup` receives lower-cased header names. `X-Tenant-Id` and
    /// `X-User-Id` are required. Roles come from `X-Roles` (CSV) or, when
    /// that is absent, from the bearer token claims. The correlation id
    /// defaults to a fresh UUID; the conversation id defaults to the
    /// correlation id.
    ///
    /// # Errors
    ///
    /// Returns [`ContextError::MissingHeader`] when tenant or user is absent.
    pub fn from_headers<F>(lookup: F) -> Result<Self, ContextError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let tenant_id = non_blank(lookup("x-tenant-id"))
            .ok_or(ContextError::MissingHeader("X-Tenant-Id"))?;
        let user_id =
            non_blank(lookup("x-user-id")).ok_or(ContextError::MissingHeader("X-User-Id"))?;

        let roles = match non_blank(lookup("x-roles")) {
            Some(csv) => split_csv(&csv),
            None => lookup("authorization")
                .as_deref()
                .map(roles_from_bearer)
                .unwrap_or_default(),
        };

        let correlation_id =
            non_blank(lookup("x-correlation-id")).unwrap_or_else(new_opaque_id);
        let conversation_id =
            non_blank(lookup("x-conversation-id")).unwrap_or_else(|| correlation_id.clone());
        let language = Lang::resolve(&lookup("x-language").unwrap_or_default());

        Ok(Self {
            tenant_id,
            user_id,
            roles,
            correlation_id,
            request_id: new_opaque_id(),
            trace_id: new_opaque_id(),
            conversation_id,
            confirmation_id: None,
            language,
        })
    }

    /// Record the confirmation id carried by the user's latest message.
    pub fn with_confirmation(mut self, confirmation_id: Option<String>) -> Self {
        self.confirmation_id = confirmation_id;
        self
    }

    /// Override the resolved language (e.g. from the conversation store).
    pub fn with_language(mut self, language: Lang) -> Self {
        self.language = language;
        self
    }

    /// Minimal context for unit tests.
    pub fn for_tests(tenant_id: &str, user_id: &str, roles: &[&str]) -> Self {
        Self {
            tenant_id: tenant_id.to_owned(),
            user_id: user_id.to_owned(),
            roles: roles.iter().map(|r| (*r).to_owned()).collect(),
            correlation_id: "corr-test".to_owned(),
            request_id: "req-test".to_owned(),
            trace_id: "trace-test".to_owned(),
            conversation_id: "conv-test".to_owned(),
            confirmation_id: None,
            language: Lang::En,
        }
    }
}

/// Generate an opaque id (uuid v4, simple form).
fn new_opaque_id() -> String {
    Uuid::new_v4().simple().to_string()
}

fn non_blank(value: Option<String>) -> Option<String> {
    value.map(|v| v.trim().to_owned()).filter(|v| !v.is_empty())
}

/// Split a CSV of roles, lower-casing and deduplicating while preserving
/// first-seen order.
fn split_csv(csv: &str) -> Vec<String> {
    let mut out: Vec<String> = Vec::new();
    for part in csv.split(',') {
        let role = part.trim().to_lowercase();
        if !role.is_empty() && !out.contains(&role) {
            out.push(role);
        }
    }
    out
}

// ---------------------------------------------------------------------------
// JWT claim fallback
// ---------------------------------------------------------------------------

/// Extract roles from a `Bearer <jwt>` header value.
///
/// Decodes the payload segment only. The `roles`, `role` and `groups`
/// claims are all consulted; string claims are CSV-expanded, array claims
/// are flattened. An unparseable token yields no roles.
fn roles_from_bearer(authorization: &str) -> Vec<String> {
    let token = match authorization.strip_prefix("Bearer ") {
        Some(t) => t.trim(),
        None => return Vec::new(),
    };

    let payload_b64 = match token.split('.').nth(1) {
        Some(p) => p,
        None => return Vec::new(),
    };

    let payload: Value = match URL_SAFE_NO_PAD
        .decode(payload_b64)
        .ok()
        .and_then(|bytes| serde_json::from_slice(&bytes).ok())
    {
        Some(v) => v,
        None => return Vec::new(),
    };

    let mut collected = String::new();
    for claim in ["roles", "role", "groups"] {
        match payload.get(claim) {
            Some(Value::String(s)) => {
                if !collected.is_empty() {
                    collected.push(',');
                }
                collected.push_str(s);
            }
            Some(Value::Array(items)) => {
                for item in items {
                    if let Value::String(s) = item {
                        if !collected.is_empty() {
                            collected.push(',');
                        }
                        collected.push_str(s);
                    }
                }
            }
            _ => {}
        }
    }

    split_csv(&collected)
}

// ---------------------------------------------------------------------------
// Confirm protocol
// ---------------------------------------------------------------------------

/// Extract a confirmation id (`CONFIRM <hex32>` or a locale equivalent)
/// from user text. Case-insensitive; diacritics on the localized keyword
/// are accepted.
pub fn extract_confirmation(text: &str) -> Option<String> {
    // Keyword alternation is small and fixed; the pattern is infallible.
    static PATTERN: &str =
        r"(?i)\b(?:CONFIRM|X[AÁ]C\s*NH[AẬ]N)\s+([0-9a-fA-F]{32})\b";
    let re = Regex::new(PATTERN).ok()?;
    re.captures(text)
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str().to_lowercase())
}
