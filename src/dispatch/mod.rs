//! Tool dispatcher: routes a validated intent to exactly one registered
//! handler.
//!
//! Handlers receive the typed intent and the immutable execution context,
//! nothing else. They never build envelopes, never compute telemetry and
//! never authorize — those belong to the invoker. Handler registration is
//! explicit at startup; there is no scanning.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use tracing::warn;

use crate::context::ExecutionContext;
use crate::registry::{ToolIntent, ToolSpec};

// ---------------------------------------------------------------------------
// Handler contract
// ---------------------------------------------------------------------------

/// What a handler reports back: outcome flag, human message, payload.
#[derive(Debug, Clone)]
pub struct HandlerResult {
    pub success: bool,
    pub message: String,
    pub data: Value,
    /// Handler-specific failure code, surfaced inside the failure envelope.
    pub code: Option<String>,
}

/// Side-band hints that ride along with the result.
#[derive(Debug, Clone, Default)]
pub struct HandlerExtras {
    /// Which backend produced the data.
    pub source: Option<String>,
    /// Pre-built evidence items; when empty the invoker synthesizes one.
    pub evidence: Vec<Value>,
}

/// Full handler outcome.
#[derive(Debug, Clone)]
pub struct HandlerOutcome {
    pub result: HandlerResult,
    pub extras: HandlerExtras,
}

impl HandlerOutcome {
    /// Successful outcome with payload.
    pub fn ok(message: impl Into<String>, data: Value) -> Self {
        Self {
            result: HandlerResult {
                success: true,
                message: message.into(),
                data,
                code: None,
            },
            extras: HandlerExtras::default(),
        }
    }

    /// Failed outcome with a handler-specific code.
    pub fn fail(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            result: HandlerResult {
                success: false,
                message: message.into(),
                data: Value::Null,
                code: Some(code.into()),
            },
            extras: HandlerExtras::default(),
        }
    }

    /// Attach a source label.
    pub fn with_source(mut self, source: impl Into<String>) -> Self {
        self.extras.source = Some(source.into());
        self
    }

    /// Attach pre-built evidence items.
    pub fn with_evidence(mut self, evidence: Vec<Value>) -> Self {
        self.extras.evidence = evidence;
        self
    }
}

/// A tool implementation.
///
/// Errors returned here are treated as internal failures by the invoker;
/// expected failures should come back as [`HandlerOutcome::fail`] instead.
#[async_trait]
pub trait ToolHandler: Send + Sync {
    /// Execute the validated intent.
    async fn execute(
        &self,
        intent: &ToolIntent,
        ctx: &ExecutionContext,
    ) -> anyhow::Result<HandlerOutcome>;
}

/// One tool's spec plus its handler, contributed at startup.
pub struct ToolRegistration {
    pub spec: ToolSpec,
    pub handler: Arc<dyn ToolHandler>,
}

// ---------------------------------------------------------------------------
// Dispatcher
// ---------------------------------------------------------------------------

/// Dispatch table keyed by tool name. At most one handler per tool.
#[derive(Default)]
pub struct Dispatcher {
    handlers: HashMap<String, Arc<dyn ToolHandler>>,
}

impl Dispatcher {
    /// Empty dispatcher.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a handler; a duplicate name replaces the previous handler
    /// with a warning.
    pub fn register(&mut self, name: &str, handler: Arc<dyn ToolHandler>) {
        if self.handlers.insert(name.to_owned(), handler).is_some() {
            warn!(tool = name, "duplicate handler registration replaced previous handler");
        }
    }

    /// Handler lookup by exact tool name.
    pub fn get(&self, name: &str) -> Option<Arc<dyn ToolHandler>> {
        self.handlers.get(name).cloned()
    }

    /// Number of registered handlers.
    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    /// Whether the dispatcher has no handlers.
    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }
}
