//! Envelope compactor: bounds the JSON placed back into the chat history.
//!
//! Applied in order until the budget holds: drop `data` and prune
//! `evidence`; then empty the evidence entirely; then fall back to a
//! minimal envelope. Only the chat-history copy is touched — the envelope
//! handed to the API client is never mutated.

use serde_json::{json, Value};

use crate::envelope::Envelope;
use crate::invoke::evidence::{compact_value, EvidenceBounds};

/// Default byte budget for one tool result in the history.
pub const DEFAULT_MAX_TOOL_RESULT_BYTES: usize = 6144;

/// Truncation applied to the minimal envelope's message.
const MINIMAL_MESSAGE_CHARS: usize = 200;

/// Produce the bounded chat-history JSON for an envelope.
pub fn compact_for_history(envelope: &Envelope, max_bytes: usize) -> String {
    let bounds = EvidenceBounds::default();

    let minimal = || minimal_envelope(envelope);

    // The working copy is plain JSON so `data` can be removed outright.
    let Ok(Value::Object(mut copy)) = serde_json::to_value(envelope) else {
        return minimal();
    };

    // Stage 1: no data, pruned evidence.
    copy.remove("data");
    if let Some(Value::Array(evidence)) = copy.get_mut("evidence") {
        for item in evidence.iter_mut() {
            *item = compact_value(item, &bounds);
        }
    }
    if let Some(text) = within_budget(&copy, max_bytes) {
        return text;
    }

    // Stage 2: evidence gone, flags set.
    copy.insert("evidence".to_owned(), Value::Array(Vec::new()));
    copy.insert("truncated".to_owned(), Value::Bool(true));
    copy.insert("compacted".to_owned(), Value::Bool(true));
    if let Some(text) = within_budget(&copy, max_bytes) {
        return text;
    }

    // Stage 3: minimal envelope.
    minimal()
}

fn minimal_envelope(envelope: &Envelope) -> String {
    let message: String = envelope.message.chars().take(MINIMAL_MESSAGE_CHARS).collect();
    json!({
        "tool": {
            "name": envelope.tool.name,
            "requiresWrite": envelope.tool.requires_write,
        },
        "ok": envelope.ok,
        "message": message,
        "compacted": true,
        "truncated": true,
        "note": "max_bytes",
    })
    .to_string()
}

fn within_budget(copy: &serde_json::Map<String, Value>, max_bytes: usize) -> Option<String> {
    let text = serde_json::to_string(copy).ok()?;
    if text.len() <= max_bytes {
        Some(text)
    } else {
        None
    }
}
