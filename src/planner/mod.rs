//! Planner loop: the bounded, circuit-broken exchange between the LLM and
//! the tool runtime that produces one user-visible answer per turn.
//!
//! Each turn owns an isolated planner state (history, signature map,
//! breaker flag); nothing is shared across turns beyond the conversation
//! store. Tool calls emitted in one assistant message run sequentially in
//! emission order — later calls may reference dataset ids minted by
//! earlier ones, so parallel execution is forbidden.

use std::sync::Arc;

use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::api::ChatRequest;
use crate::compact::compact_for_history;
use crate::context::{extract_confirmation, ExecutionContext};
use crate::i18n::{self, Lang};
use crate::invoke::Invoker;
use crate::providers::{
    ChatMessage, CompletionRequest, LlmClient, Role, ToolChoice, ToolDefinition, UsageStats,
};
use crate::registry::ToolRegistry;
use crate::store::ConversationStore;

pub mod signature;

use signature::{SignatureMap, MAX_REPEATS};

/// Characters of the last user text kept as the conversation query hint.
const QUERY_HINT_CHARS: usize = 200;

// ---------------------------------------------------------------------------
// Settings
// ---------------------------------------------------------------------------

/// Planner tuning knobs.
#[derive(Debug, Clone, Copy)]
pub struct PlannerSettings {
    /// Tool-calling steps per turn; clamped to [1, 20].
    pub max_steps: u32,
    /// Completion token budget per LLM call.
    pub max_tokens: u32,
    /// Temperature for tool-calling steps.
    pub tool_temperature: f32,
    /// Temperature for the synthesis pass.
    pub synthesis_temperature: f32,
    /// Byte budget per compacted tool result in the history.
    pub max_tool_result_bytes: usize,
}

impl Default for PlannerSettings {
    fn default() -> Self {
        Self {
            max_steps: 8,
            max_tokens: 4096,
            tool_temperature: 0.0,
            synthesis_temperature: 0.2,
            max_tool_result_bytes: crate::compact::DEFAULT_MAX_TOOL_RESULT_BYTES,
        }
    }
}

// ---------------------------------------------------------------------------
// Turn input / output
// ---------------------------------------------------------------------------

/// One user turn handed to the planner.
pub struct TurnRequest {
    pub chat: ChatRequest,
    /// Tool names exposed to the model for this turn.
    pub exposed_tools: Vec<String>,
    pub ctx: ExecutionContext,
    /// Cooperative cancellation; flips to `true` to abort.
    pub cancel: Option<watch::Receiver<bool>>,
}

/// What a finished turn produced.
#[derive(Debug, Clone)]
pub struct TurnOutcome {
    /// Final assistant Markdown.
    pub content: String,
    pub usage: UsageStats,
    /// LLM tool-calling steps actually taken.
    pub steps_taken: u32,
    pub breaker_tripped: bool,
}

/// The only error a turn surfaces; every other failure degrades into the
/// synthesized or fallback answer.
#[derive(Debug, thiserror::Error)]
pub enum PlannerError {
    /// The caller's cancellation signal fired.
    #[error("turn cancelled")]
    Cancelled,
}

// ---------------------------------------------------------------------------
// Planner
// ---------------------------------------------------------------------------

/// Per-process planner front end; per-turn state lives inside `run_turn`.
pub struct Planner {
    llm: Arc<dyn LlmClient>,
    invoker: Arc<Invoker>,
    registry: Arc<ToolRegistry>,
    conversations: Arc<ConversationStore>,
    settings: PlannerSettings,
}

impl Planner {
    /// Wire the planner to its collaborators.
    pub fn new(
        llm: Arc<dyn LlmClient>,
        invoker: Arc<Invoker>,
        registry: Arc<ToolRegistry>,
        conversations: Arc<ConversationStore>,
        settings: PlannerSettings,
    ) -> Self {
        Self {
            llm,
            invoker,
            registry,
            conversations,
            settings,
        }
    }

    /// Run one complete turn.
    ///
    /// # Errors
    ///
    /// Returns [`PlannerError::Cancelled`] when the cancellation signal
    /// fires; all other failures produce a normal (possibly fallback)
    /// answer.
    pub async fn run_turn(&self, turn: TurnRequest) -> Result<TurnOutcome, PlannerError> {
        let TurnRequest {
            chat,
            exposed_tools,
            ctx,
            cancel,
        } = turn;

        // Conversation-store language wins over the header when present.
        let stored = self
            .conversations
            .get(&ctx.tenant_id, &ctx.conversation_id);
        let lang = stored
            .as_ref()
            .map_or(ctx.language, |s| Lang::resolve(&s.language));
        let last_user_text = chat.last_user_text().to_owned();
        let ctx = ctx
            .with_language(lang)
            .with_confirmation(extract_confirmation(&last_user_text));

        // Seed the history: resolved system prompt, then the client's
        // messages minus any client-supplied system role.
        let system = system_prompt(lang, stored.as_ref().and_then(|s| s.last_query_hint.as_deref()));
        let mut history: Vec<ChatMessage> = Vec::with_capacity(chat.messages.len().saturating_add(2));
        history.push(ChatMessage::system(system));
        history.extend(chat.messages.iter().filter(|m| m.role != Role::System).cloned());

        let tool_defs = self.tool_definitions(&exposed_tools);
        let max_steps = self.settings.max_steps.clamp(1, 20);

        let mut usage = UsageStats::default();
        let mut signatures = SignatureMap::new();
        let mut breaker_tripped = false;
        let mut steps_taken: u32 = 0;
        let mut last_failure: Option<String> = None;

        'steps: for step in 1..=max_steps {
            check_cancel(&cancel)?;
            steps_taken = step;

            let request = CompletionRequest {
                messages: history.clone(),
                tools: Some(tool_defs.clone()),
                tool_choice: Some(ToolChoice::Auto),
                temperature: Some(self.settings.tool_temperature),
                max_tokens: Some(self.settings.max_tokens),
            };
            let response = match self.llm.complete(request).await {
                Ok(response) => response,
                Err(e) => {
                    warn!(error = %e, step, "LLM step failed; moving to synthesis");
                    break 'steps;
                }
            };
            usage.add(response.usage);

            if response.message.tool_calls.is_empty() {
                // Outcome 1: final message — synthesis still runs so the
                // answer lands in the required shape.
                if let Some(content) = response.message.content {
                    if !content.is_empty() {
                        history.push(ChatMessage::assistant(content));
                    }
                }
                break 'steps;
            }

            // Outcome 2: tool calls, executed sequentially in emission order.
            let calls = response.message.tool_calls.clone();
            history.push(ChatMessage::assistant_tool_calls(
                response.message.content.clone(),
                calls.clone(),
            ));

            for (index, call) in calls.iter().enumerate() {
                let count = signatures.observe(&call.function.name, &call.function.arguments);
                if count > MAX_REPEATS {
                    info!(
                        tool = %call.function.name,
                        count,
                        "circuit breaker tripped; moving to synthesis"
                    );
                    breaker_tripped = true;
                    // Keep the wire valid: every emitted call gets a tool
                    // message, the skipped ones a short note.
                    for skipped in calls.iter().skip(index) {
                        history.push(ChatMessage::tool_result(
                            skipped.id.clone(),
                            r#"{"skipped":"repeated call; circuit breaker"}"#,
                        ));
                    }
                    break 'steps;
                }

                check_cancel(&cancel)?;
                let args: serde_json::Value =
                    serde_json::from_str(&call.function.arguments).unwrap_or(serde_json::Value::Null);
                let envelope = self
                    .invoker
                    .invoke(&call.function.name, &args, &exposed_tools, &ctx)
                    .await;
                if let Some(error) = &envelope.error {
                    last_failure = Some(error.code.clone());
                }
                let compacted =
                    compact_for_history(&envelope, self.settings.max_tool_result_bytes);
                history.push(ChatMessage::tool_result(call.id.clone(), compacted));
            }
        }
        // Outcome 3 (step budget exhausted) falls through to synthesis.

        check_cancel(&cancel)?;
        let content = self
            .synthesize(history, lang, last_failure.as_deref(), &mut usage)
            .await;

        self.conversations.put(
            &ctx.tenant_id,
            &ctx.conversation_id,
            lang.code().to_owned(),
            Some(last_user_text.chars().take(QUERY_HINT_CHARS).collect()),
        );

        Ok(TurnOutcome {
            content,
            usage,
            steps_taken,
            breaker_tripped,
        })
    }

    /// Synthesis pass: one completion without tools; the system prompt
    /// gains the no-more-tools line. Empty output falls back to a
    /// localized phrase picked by the last failure class.
    async fn synthesize(
        &self,
        mut history: Vec<ChatMessage>,
        lang: Lang,
        last_failure: Option<&str>,
        usage: &mut UsageStats,
    ) -> String {
        if let Some(system) = history.first_mut() {
            if system.role == Role::System {
                let mut content = system.content.take().unwrap_or_default();
                content.push_str("\n\nYou already have tool results; do not call tools.");
                system.content = Some(content);
            }
        }

        let request = CompletionRequest {
            messages: history,
            tools: None,
            tool_choice: None,
            temperature: Some(self.settings.synthesis_temperature),
            max_tokens: Some(self.settings.max_tokens),
        };
        match self.llm.complete(request).await {
            Ok(response) => {
                usage.add(response.usage);
                let content = response.message.content.unwrap_or_default();
                if content.trim().is_empty() {
                    debug!("synthesis returned empty content; using fallback");
                    fallback_for(lang, last_failure)
                } else {
                    content
                }
            }
            Err(e) => {
                warn!(error = %e, "synthesis pass failed; using fallback");
                fallback_for(lang, last_failure)
            }
        }
    }

    fn tool_definitions(&self, exposed: &[String]) -> Vec<ToolDefinition> {
        exposed
            .iter()
            .filter_map(|name| self.registry.get(name))
            .map(|spec| ToolDefinition {
                name: spec.name.clone(),
                description: spec.description.clone(),
                parameters: spec.parameters_schema(),
            })
            .collect()
    }
}

/// Pick the fallback phrase for an empty or failed synthesis.
///
/// Caller-correctable failures get an explanation-flavoured phrase, the
/// rest an apology; a clean turn gets the rephrase suggestion.
fn fallback_for(lang: Lang, last_failure: Option<&str>) -> String {
    match last_failure {
        Some("VALIDATION_ERROR" | "FORBIDDEN") => {
            format!("{}.", i18n::rejected_phrase(lang))
        }
        Some(_) => i18n::retry_phrase(lang).to_owned(),
        None => i18n::synthesis_fallback(lang).to_owned(),
    }
}

fn check_cancel(cancel: &Option<watch::Receiver<bool>>) -> Result<(), PlannerError> {
    match cancel {
        Some(rx) if *rx.borrow() => Err(PlannerError::Cancelled),
        _ => Ok(()),
    }
}

/// The language-resolved system prompt seeding every turn.
///
/// Carries the reset-filters and confirm-by-id contracts plus the required
/// synthesis output shape.
fn system_prompt(lang: Lang, last_query_hint: Option<&str>) -> String {
    let mut prompt = String::from(
        "You are an assistant for enterprise data questions. You answer by \
         calling the exposed tools and then summarizing their results.\n\
         \n\
         Rules:\n\
         - When the user changes topic, reset previously applied filters; \
         never carry filters across unrelated questions.\n\
         - Destructive changes are two-phase: a prepare tool returns a plan \
         id, and the change is committed only after the user replies \
         'CONFIRM <id>'. Never invent confirmation ids.\n\
         - Use dataset ids returned by earlier tool calls when chaining \
         analytics steps.\n\
         \n\
         Final answers must be Markdown with these sections in order:\n\
         ## Conclusion / Insight\n\
         ## Insight Preview\n\
         (a table)\n\
         ## List Preview\n\
         (a table; include this section only when list data exists)\n",
    );
    prompt.push_str(&format!("\nAnswer in language: {}.\n", lang.code()));
    if let Some(hint) = last_query_hint {
        prompt.push_str(&format!("\nPrevious query context: {hint}\n"));
    }
    prompt
}
