//! Chat surface wire types: the inbound chat request and the
//! OpenAI-shaped chat response handed back to the caller.
//!
//! The HTTP controller itself lives outside the crate; it deserializes a
//! [`ChatRequest`], builds an execution context from headers (see
//! [`crate::context`]), runs the planner, and serializes the
//! [`ChatResponse`] this module builds. Exactly one choice, always.

use chrono::Utc;
use serde::{Deserialize, Serialize};

use crate::providers::{ChatMessage, Role, UsageStats};

/// Inbound chat request body.
#[derive(Debug, Clone, Deserialize)]
pub struct ChatRequest {
    /// Requested model; informational, the configured model serves.
    #[serde(default)]
    pub model: Option<String>,
    pub messages: Vec<ChatMessage>,
    #[serde(default)]
    pub temperature: Option<f32>,
    #[serde(default)]
    pub max_tokens: Option<u32>,
}

impl ChatRequest {
    /// Text of the latest user message, empty when there is none.
    pub fn last_user_text(&self) -> &str {
        self.messages
            .iter()
            .rev()
            .find(|m| m.role == Role::User)
            .map(ChatMessage::text)
            .unwrap_or("")
    }
}

/// Outbound chat completion response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatResponse {
    pub id: String,
    /// Always `chat.completion`.
    pub object: String,
    /// Unix seconds.
    pub created: i64,
    pub model: String,
    pub choices: Vec<ChatChoice>,
    pub usage: ChatUsage,
}

/// One response choice.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatChoice {
    pub index: u32,
    pub finish_reason: String,
    pub message: ChatChoiceMessage,
}

/// The assistant message of a choice.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatChoiceMessage {
    pub role: Role,
    pub content: String,
}

/// Usage block with the derived total.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct ChatUsage {
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
    pub total_tokens: u32,
}

impl ChatResponse {
    /// Build the single-choice response for a finished turn.
    pub fn from_answer(request_id: &str, model: &str, content: String, usage: UsageStats) -> Self {
        Self {
            id: format!("chatcmpl-{request_id}"),
            object: "chat.completion".to_owned(),
            created: Utc::now().timestamp(),
            model: model.to_owned(),
            choices: vec![ChatChoice {
                index: 0,
                finish_reason: "stop".to_owned(),
                message: ChatChoiceMessage {
                    role: Role::Assistant,
                    content,
                },
            }],
            usage: ChatUsage {
                prompt_tokens: usage.prompt_tokens,
                completion_tokens: usage.completion_tokens,
                total_tokens: usage.total(),
            },
        }
    }
}
