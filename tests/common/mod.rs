//! Shared fixtures for integration tests.

#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use chrono::Utc;

use armitage::contracts::ContractCatalog;
use armitage::dispatch::Dispatcher;
use armitage::engine::dataset::{Cell, ColumnDef, ColumnType, Dataset};
use armitage::engine::EngineBounds;
use armitage::invoke::Invoker;
use armitage::providers::{
    AssistantTurn, ChatMessage, CompletionRequest, CompletionResponse, FunctionCall, LlmClient,
    ProviderError, Role, ToolCall, UsageStats,
};
use armitage::registry::ToolRegistry;
use armitage::store::{ConversationStore, DatasetStore, PlanStore, ResultCache};
use armitage::tools::{self, BuiltinToolConfig, LoggingWritebackSink};

/// Everything a test needs to drive the tool pipeline.
pub struct Runtime {
    pub datasets: Arc<DatasetStore>,
    pub cache: Arc<ResultCache>,
    pub plans: Arc<PlanStore>,
    pub registry: Arc<ToolRegistry>,
    pub dispatcher: Arc<Dispatcher>,
    pub invoker: Arc<Invoker>,
    pub conversations: Arc<ConversationStore>,
}

/// Build a runtime with the built-in tools and the shipped contract tree.
pub async fn runtime() -> Runtime {
    runtime_with_contracts(load_shipped_contracts()).await
}

/// Build a runtime with a custom contract catalog.
pub async fn runtime_with_contracts(catalog: ContractCatalog) -> Runtime {
    let datasets = Arc::new(DatasetStore::in_memory(600));
    let cache = Arc::new(ResultCache::new(300));
    let plans = Arc::new(
        PlanStore::connect("sqlite::memory:")
            .await
            .expect("plan store"),
    );

    let mut registry = ToolRegistry::new();
    let mut dispatcher = Dispatcher::new();
    tools::register_builtin(
        &mut registry,
        &mut dispatcher,
        datasets.clone(),
        cache.clone(),
        plans.clone(),
        Arc::new(LoggingWritebackSink),
        &BuiltinToolConfig {
            bounds: EngineBounds::default(),
            write_roles: vec!["admin".to_owned()],
            plan_ttl_secs: 900,
        },
    );

    let registry = Arc::new(registry);
    let dispatcher = Arc::new(dispatcher);
    let invoker = Arc::new(Invoker::new(
        registry.clone(),
        dispatcher.clone(),
        Arc::new(catalog),
    ));

    Runtime {
        datasets,
        cache,
        plans,
        registry,
        dispatcher,
        invoker,
        conversations: Arc::new(ConversationStore::new(3600)),
    }
}

/// The contract tree shipped with the crate.
pub fn load_shipped_contracts() -> ContractCatalog {
    ContractCatalog::from_dir(
        std::path::Path::new("contracts"),
        &["analytics.run.v2".to_owned()],
    )
    .expect("shipped contracts")
}

/// A small typed dataset: category (string) + price (decimal).
pub fn sales_dataset(id: &str, tenant: &str, user: &str) -> Dataset {
    Dataset::new(
        id.to_owned(),
        "atomic:sales".to_owned(),
        tenant.to_owned(),
        user.to_owned(),
        Utc::now(),
        600,
        vec![
            ColumnDef::plain("category", ColumnType::String),
            ColumnDef::plain("price", ColumnType::Decimal),
        ],
        vec![
            vec![
                Cell::Str("A".to_owned()),
                Cell::Str("A".to_owned()),
                Cell::Str("B".to_owned()),
            ],
            vec![
                Cell::Decimal("10".parse().expect("decimal")),
                Cell::Decimal("20".parse().expect("decimal")),
                Cell::Decimal("5".parse().expect("decimal")),
            ],
        ],
    )
    .expect("dataset")
}

/// Dataset with a single int column named `price`, values 10..=50.
pub fn prices_dataset(id: &str, tenant: &str, user: &str) -> Dataset {
    Dataset::new(
        id.to_owned(),
        "atomic:prices".to_owned(),
        tenant.to_owned(),
        user.to_owned(),
        Utc::now(),
        600,
        vec![ColumnDef::plain("price", ColumnType::Int32)],
        vec![vec![
            Cell::I32(10),
            Cell::I32(20),
            Cell::I32(30),
            Cell::I32(40),
            Cell::I32(50),
        ]],
    )
    .expect("dataset")
}

/// Two-column `{id, name}` dataset with a single row.
pub fn id_name_dataset(id: &str, tenant: &str, user: &str, row_id: i32, name: &str) -> Dataset {
    Dataset::new(
        id.to_owned(),
        "atomic:idname".to_owned(),
        tenant.to_owned(),
        user.to_owned(),
        Utc::now(),
        600,
        vec![
            ColumnDef::plain("id", ColumnType::Int32),
            ColumnDef::plain("name", ColumnType::String),
        ],
        vec![vec![Cell::I32(row_id)], vec![Cell::Str(name.to_owned())]],
    )
    .expect("dataset")
}

// ---------------------------------------------------------------------------
// Scripted LLM
// ---------------------------------------------------------------------------

/// Scripted LLM client: pops pre-built responses, records every request.
pub struct MockLlm {
    script: Mutex<VecDeque<CompletionResponse>>,
    pub requests: Mutex<Vec<CompletionRequest>>,
}

impl MockLlm {
    pub fn new(script: Vec<CompletionResponse>) -> Self {
        Self {
            script: Mutex::new(script.into()),
            requests: Mutex::new(Vec::new()),
        }
    }

    /// Number of completions served so far.
    pub fn calls(&self) -> usize {
        self.requests.lock().expect("lock").len()
    }

    /// The last request the planner sent.
    pub fn last_request(&self) -> CompletionRequest {
        self.requests
            .lock()
            .expect("lock")
            .last()
            .cloned()
            .expect("at least one request")
    }
}

#[async_trait::async_trait]
impl LlmClient for MockLlm {
    async fn complete(
        &self,
        request: CompletionRequest,
    ) -> Result<CompletionResponse, ProviderError> {
        self.requests.lock().expect("lock").push(request);
        let next = self.script.lock().expect("lock").pop_front();
        Ok(next.unwrap_or_else(|| text_response("(script exhausted)")))
    }

    fn model_id(&self) -> &str {
        "mock-model"
    }
}

/// Plain-text assistant response.
pub fn text_response(content: &str) -> CompletionResponse {
    CompletionResponse {
        message: AssistantTurn {
            content: Some(content.to_owned()),
            tool_calls: vec![],
        },
        finish_reason: Some("stop".to_owned()),
        usage: UsageStats {
            prompt_tokens: 10,
            completion_tokens: 5,
        },
        model: "mock-model".to_owned(),
    }
}

/// Assistant response carrying one tool call.
pub fn tool_call_response(call_id: &str, tool: &str, arguments: &str) -> CompletionResponse {
    CompletionResponse {
        message: AssistantTurn {
            content: None,
            tool_calls: vec![ToolCall {
                id: call_id.to_owned(),
                kind: "function".to_owned(),
                function: FunctionCall {
                    name: tool.to_owned(),
                    arguments: arguments.to_owned(),
                },
            }],
        },
        finish_reason: Some("tool_calls".to_owned()),
        usage: UsageStats {
            prompt_tokens: 20,
            completion_tokens: 8,
        },
        model: "mock-model".to_owned(),
    }
}

/// The three required Markdown sections, for synthesis scripts.
pub fn sectioned_answer() -> &'static str {
    "## Conclusion / Insight\nSales concentrate in category A.\n\n\
     ## Insight Preview\n| category | n |\n|---|---|\n| A | 2 |\n| B | 1 |\n\n\
     ## List Preview\n| price |\n|---|\n| 10 |\n| 20 |"
}

/// Tool messages in a history (role == tool).
pub fn tool_messages(messages: &[ChatMessage]) -> Vec<&ChatMessage> {
    messages.iter().filter(|m| m.role == Role::Tool).collect()
}
