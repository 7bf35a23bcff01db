//! LLM client abstraction and the chat wire types shared across the crate.
//!
//! The planner speaks OpenAI-shaped messages internally, so the same
//! [`ChatMessage`] type serves three places: the inbound chat request, the
//! planner history, and the outbound `/chat/completions` call. One
//! implementation is provided: [`openai::OpenAiCompatClient`], pointed at
//! any OpenAI-compatible endpoint.

use async_trait::async_trait;
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;

pub mod openai;

// ---------------------------------------------------------------------------
// Wire types
// ---------------------------------------------------------------------------

/// Conversation participant role.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// System message.
    System,
    /// Human user message.
    User,
    /// Assistant (LLM) message.
    Assistant,
    /// Tool result message.
    Tool,
}

/// A chat message, OpenAI-shaped.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: Role,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    /// Present on assistant messages that request tool calls.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_calls: Option<Vec<ToolCall>>,
    /// Present on tool messages answering a call.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,
}

impl ChatMessage {
    /// Plain system message.
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: Some(content.into()),
            tool_calls: None,
            tool_call_id: None,
        }
    }

    /// Plain user message.
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: Some(content.into()),
            tool_calls: None,
            tool_call_id: None,
        }
    }

    /// Plain assistant message.
    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: Some(content.into()),
            tool_calls: None,
            tool_call_id: None,
        }
    }

    /// Assistant message carrying tool calls.
    pub fn assistant_tool_calls(content: Option<String>, tool_calls: Vec<ToolCall>) -> Self {
        Self {
            role: Role::Assistant,
            content,
            tool_calls: Some(tool_calls),
            tool_call_id: None,
        }
    }

    /// Tool result message answering `tool_call_id`.
    pub fn tool_result(tool_call_id: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            role: Role::Tool,
            content: Some(content.into()),
            tool_calls: None,
            tool_call_id: Some(tool_call_id.into()),
        }
    }

    /// The message text, empty when absent.
    pub fn text(&self) -> &str {
        self.content.as_deref().unwrap_or("")
    }
}

/// A tool call requested by the assistant.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolCall {
    /// Unique call identifier, echoed back on the tool message.
    pub id: String,
    /// Always `function`.
    #[serde(rename = "type")]
    pub kind: String,
    pub function: FunctionCall,
}

/// Function payload of a tool call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FunctionCall {
    pub name: String,
    /// Arguments as a JSON-encoded string, per the wire contract.
    pub arguments: String,
}

/// A tool offered to the model.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolDefinition {
    pub name: String,
    pub description: String,
    /// JSON Schema for the function parameters.
    pub parameters: Value,
}

impl ToolDefinition {
    /// Wire form: `{type:"function", function:{…}}`.
    pub fn to_wire(&self) -> Value {
        serde_json::json!({
            "type": "function",
            "function": {
                "name": self.name,
                "description": self.description,
                "parameters": self.parameters,
            }
        })
    }
}

/// Tool choice directive.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ToolChoice {
    /// Model decides freely.
    Auto,
    /// Force one named function.
    Function(String),
}

impl ToolChoice {
    /// Wire form: `"auto"` or `{type:"function", function:{name}}`.
    pub fn to_wire(&self) -> Value {
        match self {
            Self::Auto => Value::String("auto".to_owned()),
            Self::Function(name) => serde_json::json!({
                "type": "function",
                "function": { "name": name }
            }),
        }
    }
}

// ---------------------------------------------------------------------------
// Request / Response
// ---------------------------------------------------------------------------

/// A completion request to an LLM client.
#[derive(Debug, Clone)]
pub struct CompletionRequest {
    pub messages: Vec<ChatMessage>,
    /// Tools offered this call; `None` disables tool calling entirely.
    pub tools: Option<Vec<ToolDefinition>>,
    pub tool_choice: Option<ToolChoice>,
    pub temperature: Option<f32>,
    pub max_tokens: Option<u32>,
}

/// Token usage for one completion.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UsageStats {
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
}

impl UsageStats {
    /// Fold another completion's usage into this one.
    pub fn add(&mut self, other: UsageStats) {
        self.prompt_tokens = self.prompt_tokens.saturating_add(other.prompt_tokens);
        self.completion_tokens = self.completion_tokens.saturating_add(other.completion_tokens);
    }

    /// Prompt + completion tokens.
    pub fn total(&self) -> u32 {
        self.prompt_tokens.saturating_add(self.completion_tokens)
    }
}

/// The assistant message a completion produced.
#[derive(Debug, Clone, Default)]
pub struct AssistantTurn {
    pub content: Option<String>,
    pub tool_calls: Vec<ToolCall>,
}

/// A completed LLM call.
#[derive(Debug, Clone)]
pub struct CompletionResponse {
    pub message: AssistantTurn,
    pub finish_reason: Option<String>,
    pub usage: UsageStats,
    /// The model identifier that served this response.
    pub model: String,
}

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Errors returned by LLM clients.
#[derive(Debug, thiserror::Error)]
pub enum ProviderError {
    /// HTTP transport failure.
    #[error("provider request failed: {0}")]
    Request(#[from] reqwest::Error),
    /// Response did not match expected schema.
    #[error("provider response parse error: {0}")]
    Parse(String),
    /// Upstream provider responded with an error status.
    #[error("provider returned non-success status {status}: {body}")]
    HttpStatus {
        /// HTTP status code.
        status: u16,
        /// Sanitized response body.
        body: String,
    },
    /// Provider cannot satisfy the request with current configuration.
    #[error("provider unavailable: {0}")]
    Unavailable(String),
}

// ---------------------------------------------------------------------------
// HTTP helpers
// ---------------------------------------------------------------------------

/// Read a response body, mapping non-2xx statuses to a structured error.
///
/// Failure bodies from OpenAI-compatible gateways arrive as
/// `{"error":{"message":…}}`; the message alone is what ends up in logs.
/// Unstructured bodies fall back to a whitespace-collapsed excerpt. Either
/// way, anything shaped like the endpoint credential is scrubbed first.
///
/// # Errors
///
/// Returns `ProviderError::Request` on transport failure, `ProviderError::HttpStatus` on non-2xx.
pub async fn read_http_response(response: reqwest::Response) -> Result<String, ProviderError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response.text().await?);
    }
    let body = response.text().await.unwrap_or_default();
    Err(ProviderError::HttpStatus {
        status: status.as_u16(),
        body: error_excerpt(&body),
    })
}

/// Longest error excerpt worth keeping; gateway messages are one sentence.
const MAX_ERROR_EXCERPT_CHARS: usize = 200;

fn error_excerpt(raw: &str) -> String {
    let message = serde_json::from_str::<Value>(raw)
        .ok()
        .and_then(|body| {
            body.pointer("/error/message")
                .and_then(Value::as_str)
                .map(ToOwned::to_owned)
        })
        .unwrap_or_else(|| raw.split_whitespace().collect::<Vec<_>>().join(" "));

    let scrubbed = scrub_credentials(&message);
    if scrubbed.chars().count() > MAX_ERROR_EXCERPT_CHARS {
        let head: String = scrubbed.chars().take(MAX_ERROR_EXCERPT_CHARS).collect();
        return format!("{head}…");
    }
    scrubbed
}

/// The only secrets this client ever holds are the configured bearer key
/// (`sk-…` style) and whatever JWT a gateway mints from it; gateways are
/// fond of echoing both back inside 401/403 bodies.
fn scrub_credentials(text: &str) -> String {
    let mut scrubbed = text.to_owned();
    for pattern in [
        r"sk-[A-Za-z0-9_\-]{16,}",
        r"(?i)bearer\s+[A-Za-z0-9_\-.]{16,}",
        r"eyJ[A-Za-z0-9_\-]+\.[A-Za-z0-9_\-]+\.[A-Za-z0-9_\-]+",
    ] {
        if let Ok(regex) = Regex::new(pattern) {
            scrubbed = regex.replace_all(&scrubbed, "[redacted]").into_owned();
        }
    }
    scrubbed
}

// ---------------------------------------------------------------------------
// Trait
// ---------------------------------------------------------------------------

/// Core LLM client interface.
///
/// Implementations must be `Send + Sync` so the planner can call them from
/// any task.
#[async_trait]
pub trait LlmClient: Send + Sync {
    /// Request a completion.
    ///
    /// # Errors
    ///
    /// Returns [`ProviderError`] on API, network, or parse failure.
    async fn complete(
        &self,
        request: CompletionRequest,
    ) -> Result<CompletionResponse, ProviderError>;

    /// The model identifier string this client is instantiated for.
    fn model_id(&self) -> &str;
}
