//! Per-turn tool-call signature accounting for the circuit breaker.
//!
//! A signature is `SHA-256(tool_name | args_json)`. The map lives for one
//! turn only; the planner trips its breaker when any signature is observed
//! more often than [`MAX_REPEATS`].

use std::collections::HashMap;

use sha2::{Digest, Sha256};

/// How many times an identical call may run before the breaker trips.
pub const MAX_REPEATS: u32 = 2;

/// Per-turn signature counter.
#[derive(Debug, Default)]
pub struct SignatureMap {
    counts: HashMap<String, u32>,
}

impl SignatureMap {
    /// Fresh map for a new turn.
    pub fn new() -> Self {
        Self::default()
    }

    /// Record one observation; returns the updated count.
    pub fn observe(&mut self, tool_name: &str, args_json: &str) -> u32 {
        let signature = signature(tool_name, args_json);
        let count = self.counts.entry(signature).or_insert(0);
        *count = count.saturating_add(1);
        *count
    }
}

/// Deterministic call signature.
pub fn signature(tool_name: &str, args_json: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(tool_name.as_bytes());
    hasher.update(b"|");
    hasher.update(args_json.as_bytes());
    hex::encode(hasher.finalize())
}
