//! Configuration loading and management.
//!
//! Loads configuration from `./config.toml` (or `$ARMITAGE_CONFIG_PATH`).
//! Environment variables override file values; file values override
//! defaults.
//!
//! Precedence: env vars > config file > defaults.

use std::path::PathBuf;

use anyhow::{Context, Result};
use serde::Deserialize;

use crate::engine::EngineBounds;
use crate::planner::PlannerSettings;

// ── Top-level config ────────────────────────────────────────────

/// Top-level configuration loaded from TOML.
///
/// Path: `./config.toml` or `$ARMITAGE_CONFIG_PATH`.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct ArmitageConfig {
    /// Engine bound caps (`[engine]`).
    pub engine: EngineBounds,
    /// Store TTLs and the plan database (`[store]`).
    pub store: StoreConfig,
    /// Planner tuning (`[planner]`).
    pub planner: PlannerConfig,
    /// LLM endpoint (`[llm]`).
    pub llm: LlmConfig,
    /// Response contracts (`[contracts]`).
    pub contracts: ContractsConfig,
    /// Write authorization (`[writeback]`).
    pub writeback: WritebackConfig,
}

impl ArmitageConfig {
    /// Load configuration with precedence: env vars > TOML file > defaults.
    ///
    /// If the file does not exist, defaults are used.
    ///
    /// # Errors
    ///
    /// Returns an error when the file exists but cannot be parsed.
    pub fn load() -> Result<Self> {
        let mut config = Self::load_from_file()?;
        config.apply_overrides(|key| std::env::var(key).ok());
        Ok(config)
    }

    fn load_from_file() -> Result<Self> {
        let path = Self::config_path();
        match std::fs::read_to_string(&path) {
            Ok(contents) => {
                tracing::info!(path = %path.display(), "loading config from file");
                let config: ArmitageConfig =
                    toml::from_str(&contents).context("failed to parse config TOML")?;
                Ok(config)
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::info!("no config file found, using defaults");
                Ok(ArmitageConfig::default())
            }
            Err(e) => Err(anyhow::anyhow!("failed to read config file: {e}")),
        }
    }

    fn config_path() -> PathBuf {
        std::env::var("ARMITAGE_CONFIG_PATH")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("config.toml"))
    }

    /// Apply environment variable overrides.
    ///
    /// Takes a resolver function for testability.
    fn apply_overrides(&mut self, env: impl Fn(&str) -> Option<String>) {
        if let Some(v) = env("ARMITAGE_LLM_BASE_URL") {
            self.llm.base_url = v;
        }
        if let Some(v) = env("ARMITAGE_LLM_MODEL") {
            self.llm.model = v;
        }
        if let Some(v) = env("ARMITAGE_LLM_API_KEY") {
            self.llm.api_key = Some(v);
        }
        if let Some(v) = env("ARMITAGE_PLANS_DB_URL") {
            self.store.plans_db_url = v;
        }
        if let Some(v) = env("ARMITAGE_MAX_STEPS").and_then(|v| v.parse().ok()) {
            self.planner.max_steps = v;
        }
        if let Some(v) = env("ARMITAGE_CONTRACTS_DIR") {
            self.contracts.dir = PathBuf::from(v);
        }
    }

    /// Planner settings derived from the `[planner]` section.
    pub fn planner_settings(&self) -> PlannerSettings {
        PlannerSettings {
            max_steps: self.planner.max_steps,
            max_tokens: self.planner.max_tokens,
            tool_temperature: self.planner.tool_temperature,
            synthesis_temperature: self.planner.synthesis_temperature,
            max_tool_result_bytes: self.planner.max_tool_result_bytes,
        }
    }
}

// ── Sections ────────────────────────────────────────────────────

/// Store TTLs and persistence.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// Dataset lifetime in seconds (clamped to [60, 3600] on use).
    pub dataset_ttl_secs: u64,
    /// Result cache lifetime in seconds (clamped to [300, 600] on use).
    pub result_cache_ttl_secs: u64,
    /// Conversation state lifetime in seconds.
    pub conversation_ttl_secs: u64,
    /// Confirmation plan lifetime in seconds.
    pub plan_ttl_secs: u64,
    /// Sqlite URL for confirmation plans.
    pub plans_db_url: String,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            dataset_ttl_secs: 600,
            result_cache_ttl_secs: 300,
            conversation_ttl_secs: 3600,
            plan_ttl_secs: 900,
            plans_db_url: "sqlite::memory:".to_owned(),
        }
    }
}

/// Planner tuning.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PlannerConfig {
    pub max_steps: u32,
    pub max_tokens: u32,
    pub tool_temperature: f32,
    pub synthesis_temperature: f32,
    pub max_tool_result_bytes: usize,
}

impl Default for PlannerConfig {
    fn default() -> Self {
        let defaults = PlannerSettings::default();
        Self {
            max_steps: defaults.max_steps,
            max_tokens: defaults.max_tokens,
            tool_temperature: defaults.tool_temperature,
            synthesis_temperature: defaults.synthesis_temperature,
            max_tool_result_bytes: defaults.max_tool_result_bytes,
        }
    }
}

/// LLM endpoint settings.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LlmConfig {
    /// OpenAI-compatible base URL (e.g. `https://api.openai.com/v1`).
    pub base_url: String,
    pub model: String,
    /// Bearer key; prefer `ARMITAGE_LLM_API_KEY` over the file.
    pub api_key: Option<String>,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:8000/v1".to_owned(),
            model: "gpt-4o-mini".to_owned(),
            api_key: None,
        }
    }
}

/// Response contract settings.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ContractsConfig {
    /// Root of the schema tree (`contracts/vN/<kind>.json`).
    pub dir: PathBuf,
    /// Kinds that must have a registered schema.
    pub enforced_kinds: Vec<String>,
}

impl Default for ContractsConfig {
    fn default() -> Self {
        Self {
            dir: PathBuf::from("contracts"),
            enforced_kinds: vec!["analytics.run.v2".to_owned()],
        }
    }
}

/// Write authorization settings.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct WritebackConfig {
    /// Roles allowed to run write tools.
    pub write_roles: Vec<String>,
}

impl Default for WritebackConfig {
    fn default() -> Self {
        Self {
            write_roles: vec!["admin".to_owned(), "editor".to_owned()],
        }
    }
}
