//! OpenAI-compatible client using the `/chat/completions` API.
//!
//! Works against any endpoint that speaks the OpenAI tool-calling dialect
//! (OpenAI itself, Azure-style gateways, local inference servers). The
//! base URL comes from configuration; the path is appended here.

use serde::Deserialize;
use serde_json::Value;

use super::{
    read_http_response, AssistantTurn, CompletionRequest, CompletionResponse, LlmClient,
    ProviderError, UsageStats,
};

/// Default completion token budget when the request carries none.
const DEFAULT_MAX_TOKENS: u32 = 4096;

// ---------------------------------------------------------------------------
// Wire types (pub for integration testing)
// ---------------------------------------------------------------------------

/// Chat completions response body.
#[doc(hidden)]
#[derive(Debug, Deserialize)]
pub struct OpenAiResponse {
    /// Response choices.
    pub choices: Vec<OpenAiChoice>,
    /// Model that served the response.
    pub model: Option<String>,
    /// Token usage.
    pub usage: Option<OpenAiUsage>,
}

/// A response choice.
#[doc(hidden)]
#[derive(Debug, Deserialize)]
pub struct OpenAiChoice {
    /// Assistant message for this choice.
    pub message: OpenAiResponseMessage,
    /// Why generation stopped.
    pub finish_reason: Option<String>,
}

/// Assistant message payload.
#[doc(hidden)]
#[derive(Debug, Deserialize)]
pub struct OpenAiResponseMessage {
    /// Optional text content.
    pub content: Option<String>,
    /// Optional tool calls.
    pub tool_calls: Option<Vec<super::ToolCall>>,
}

/// Usage statistics.
#[doc(hidden)]
#[derive(Debug, Deserialize)]
pub struct OpenAiUsage {
    /// Prompt token count.
    pub prompt_tokens: Option<u32>,
    /// Completion token count.
    pub completion_tokens: Option<u32>,
}

// ---------------------------------------------------------------------------
// Client
// ---------------------------------------------------------------------------

/// OpenAI-compatible chat completions client.
pub struct OpenAiCompatClient {
    http: reqwest::Client,
    base_url: String,
    api_key: Option<String>,
    model: String,
}

impl OpenAiCompatClient {
    /// Build a client for `base_url` (no trailing slash) and `model`.
    pub fn new(base_url: impl Into<String>, api_key: Option<String>, model: impl Into<String>) -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url: base_url.into().trim_end_matches('/').to_owned(),
            api_key,
            model: model.into(),
        }
    }

    fn build_body(&self, request: &CompletionRequest) -> Value {
        let mut body = serde_json::json!({
            "model": self.model,
            "messages": request.messages,
        });
        if let Some(tools) = &request.tools {
            if !tools.is_empty() {
                body["tools"] = Value::Array(tools.iter().map(super::ToolDefinition::to_wire).collect());
                if let Some(choice) = &request.tool_choice {
                    body["tool_choice"] = choice.to_wire();
                }
            }
        }
        if let Some(temperature) = request.temperature {
            body["temperature"] = serde_json::json!(temperature);
        }
        body["max_tokens"] = serde_json::json!(request.max_tokens.unwrap_or(DEFAULT_MAX_TOKENS));
        body
    }
}

#[async_trait::async_trait]
impl LlmClient for OpenAiCompatClient {
    async fn complete(
        &self,
        request: CompletionRequest,
    ) -> Result<CompletionResponse, ProviderError> {
        let url = format!("{}/chat/completions", self.base_url);
        let body = self.build_body(&request);

        let mut http_request = self.http.post(&url).json(&body);
        if let Some(key) = &self.api_key {
            http_request = http_request.bearer_auth(key);
        }

        let response = http_request.send().await?;
        let text = read_http_response(response).await?;

        let parsed: OpenAiResponse = serde_json::from_str(&text)
            .map_err(|e| ProviderError::Parse(format!("chat completions body: {e}")))?;

        let choice = parsed
            .choices
            .into_iter()
            .next()
            .ok_or_else(|| ProviderError::Parse("response contained no choices".to_owned()))?;

        let usage = parsed.usage.map_or_else(UsageStats::default, |u| UsageStats {
            prompt_tokens: u.prompt_tokens.unwrap_or(0),
            completion_tokens: u.completion_tokens.unwrap_or(0),
        });

        Ok(CompletionResponse {
            message: AssistantTurn {
                content: choice.message.content,
                tool_calls: choice.message.tool_calls.unwrap_or_default(),
            },
            finish_reason: choice.finish_reason,
            usage,
            model: parsed.model.unwrap_or_else(|| self.model.clone()),
        })
    }

    fn model_id(&self) -> &str {
        &self.model
    }
}
