#![allow(missing_docs)]

//! armitage — tool-calling orchestration engine over governed tabular data.
//!
//! Single binary with one-shot subcommands for operating the runtime from
//! the shell: run a chat turn end to end, inspect registered tools, and
//! inspect the compiled contract catalog. The HTTP surface lives in the
//! host service; this binary wires the same core.

use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing::info;

use armitage::api::ChatRequest;
use armitage::config::ArmitageConfig;
use armitage::context::ExecutionContext;
use armitage::contracts::ContractCatalog;
use armitage::dispatch::Dispatcher;
use armitage::invoke::Invoker;
use armitage::planner::{Planner, TurnRequest};
use armitage::providers::openai::OpenAiCompatClient;
use armitage::providers::ChatMessage;
use armitage::registry::ToolRegistry;
use armitage::store::{ConversationStore, DatasetStore, PlanStore, ResultCache};
use armitage::tools::{self, BuiltinToolConfig, LoggingWritebackSink};

#[derive(Parser)]
#[command(name = "armitage", about = "Tool-calling orchestration engine", version)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run one chat turn against the configured LLM and print the answer.
    Chat {
        /// The user message.
        prompt: String,
        /// Tenant identifier.
        #[arg(long, default_value = "local")]
        tenant: String,
        /// User identifier.
        #[arg(long, default_value = "operator")]
        user: String,
        /// Comma-separated roles.
        #[arg(long, default_value = "admin")]
        roles: String,
        /// Response language code.
        #[arg(long, default_value = "en")]
        lang: String,
    },
    /// List registered tools.
    Tools,
    /// List compiled response contracts.
    Contracts,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    armitage::logging::init_cli();

    let cli = Cli::parse();
    let config = ArmitageConfig::load().context("loading configuration")?;

    match cli.command {
        Command::Chat {
            prompt,
            tenant,
            user,
            roles,
            lang,
        } => run_chat(&config, prompt, &tenant, &user, &roles, &lang).await,
        Command::Tools => {
            let (registry, _) = build_tools(&config).await?;
            for name in registry.names() {
                let spec = registry.get(&name).context("registered spec")?;
                println!(
                    "{name}  write={}  args={}",
                    spec.requires_write,
                    spec.args.len()
                );
            }
            Ok(())
        }
        Command::Contracts => {
            let catalog = ContractCatalog::from_dir(
                &config.contracts.dir,
                &config.contracts.enforced_kinds,
            )?;
            for (version, kind) in catalog.registered() {
                println!("v{version}  {kind}");
            }
            Ok(())
        }
    }
}

async fn build_tools(config: &ArmitageConfig) -> Result<(Arc<ToolRegistry>, Arc<Dispatcher>)> {
    let datasets = Arc::new(DatasetStore::in_memory(config.store.dataset_ttl_secs));
    let cache = Arc::new(ResultCache::new(config.store.result_cache_ttl_secs));
    let plans = Arc::new(
        PlanStore::connect(&config.store.plans_db_url)
            .await
            .context("opening plan store")?,
    );

    let mut registry = ToolRegistry::new();
    let mut dispatcher = Dispatcher::new();
    tools::register_builtin(
        &mut registry,
        &mut dispatcher,
        datasets,
        cache,
        plans,
        Arc::new(LoggingWritebackSink),
        &BuiltinToolConfig {
            bounds: config.engine,
            write_roles: config.writeback.write_roles.clone(),
            plan_ttl_secs: config.store.plan_ttl_secs,
        },
    );
    Ok((Arc::new(registry), Arc::new(dispatcher)))
}

async fn run_chat(
    config: &ArmitageConfig,
    prompt: String,
    tenant: &str,
    user: &str,
    roles: &str,
    lang: &str,
) -> Result<()> {
    let (registry, dispatcher) = build_tools(config).await?;
    let contracts = Arc::new(ContractCatalog::from_dir(
        &config.contracts.dir,
        &config.contracts.enforced_kinds,
    )?);
    let invoker = Arc::new(Invoker::new(
        registry.clone(),
        dispatcher,
        contracts,
    ));
    let conversations = Arc::new(ConversationStore::new(config.store.conversation_ttl_secs));
    let llm = Arc::new(OpenAiCompatClient::new(
        config.llm.base_url.clone(),
        config.llm.api_key.clone(),
        config.llm.model.clone(),
    ));

    let planner = Planner::new(
        llm,
        invoker,
        registry.clone(),
        conversations,
        config.planner_settings(),
    );

    let ctx = ExecutionContext::from_headers(|name| match name {
        "x-tenant-id" => Some(tenant.to_owned()),
        "x-user-id" => Some(user.to_owned()),
        "x-roles" => Some(roles.to_owned()),
        "x-language" => Some(lang.to_owned()),
        _ => None,
    })
    .context("building execution context")?;

    let outcome = planner
        .run_turn(TurnRequest {
            chat: ChatRequest {
                model: None,
                messages: vec![ChatMessage::user(prompt)],
                temperature: None,
                max_tokens: None,
            },
            exposed_tools: registry.names(),
            ctx,
            cancel: None,
        })
        .await
        .context("running turn")?;

    info!(
        steps = outcome.steps_taken,
        breaker = outcome.breaker_tripped,
        tokens = outcome.usage.total(),
        "turn finished"
    );
    println!("{}", outcome.content);
    Ok(())
}
