//! Response contract validator: JSON Schemas for governed tool payload
//! kinds.
//!
//! At startup the catalog walks a contracts tree shaped like
//! `contracts/v2/analytics.run.v2.json`: the ancestor directory name
//! carries the schema version, the file stem is the payload kind. Each
//! compiled schema registers under `(version, kind)` and an alias URI.
//! At runtime, any payload whose top level carries both `kind` (string)
//! and `schemaVersion` (number) is checked; an enforced kind with no
//! schema fails hard, anything else degrades to a warning.

use std::collections::{HashMap, HashSet};
use std::path::Path;

use jsonschema::Validator;
use serde_json::Value;
use tracing::{debug, info, warn};

/// How many flattened error lines a failed evaluation reports.
const MAX_ERROR_LINES: usize = 5;

/// Outcome of a payload check.
#[derive(Debug)]
pub enum ContractCheck {
    /// Payload does not declare `kind` + `schemaVersion`; nothing to do.
    NotApplicable,
    /// Schema found and the payload conforms.
    Valid,
    /// No schema for a non-enforced kind; carry the warning.
    Skipped(String),
    /// Evaluation failed or an enforced kind has no schema. Non-retryable.
    Invalid(Vec<String>),
}

/// Compiled-schema catalog, read-only after startup.
pub struct ContractCatalog {
    schemas: HashMap<(u64, String), Validator>,
    aliases: HashMap<String, (u64, String)>,
    enforced: HashSet<String>,
}

impl ContractCatalog {
    /// Empty catalog (nothing validates, nothing is enforced).
    pub fn empty() -> Self {
        Self {
            schemas: HashMap::new(),
            aliases: HashMap::new(),
            enforced: HashSet::new(),
        }
    }

    /// Walk a contracts directory and compile every schema found.
    ///
    /// Unreadable or uncompilable files are skipped with a warning so one
    /// bad contract cannot take the catalog down.
    ///
    /// # Errors
    ///
    /// Returns an error only when the root directory itself is unreadable.
    pub fn from_dir(dir: &Path, enforced_kinds: &[String]) -> anyhow::Result<Self> {
        let mut catalog = Self::empty();
        catalog.enforced = enforced_kinds.iter().cloned().collect();

        if !dir.is_dir() {
            info!(dir = %dir.display(), "contracts directory missing; catalog is empty");
            return Ok(catalog);
        }

        for entry in std::fs::read_dir(dir)? {
            let entry = entry?;
            let path = entry.path();
            let Some(version) = version_from_dir_name(&path) else {
                continue;
            };
            let files = match std::fs::read_dir(&path) {
                Ok(files) => files,
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "skipping unreadable contracts subdirectory");
                    continue;
                }
            };
            for file in files.flatten() {
                let file_path = file.path();
                if file_path.extension().and_then(|e| e.to_str()) != Some("json") {
                    continue;
                }
                let Some(kind) = file_path.file_stem().and_then(|s| s.to_str()) else {
                    continue;
                };
                match load_schema(&file_path) {
                    Ok(validator) => {
                        catalog.register(version, kind, validator);
                    }
                    Err(e) => {
                        warn!(path = %file_path.display(), error = %e, "skipping invalid contract schema");
                    }
                }
            }
        }

        info!(count = catalog.schemas.len(), "contract catalog initialised");
        Ok(catalog)
    }

    /// Register one compiled schema under `(version, kind)` and its alias.
    pub fn register(&mut self, version: u64, kind: &str, validator: Validator) {
        self.aliases.insert(
            format!("urn:armitage:contract:v{version}:{kind}"),
            (version, kind.to_owned()),
        );
        self.schemas.insert((version, kind.to_owned()), validator);
        debug!(version, kind, "contract schema registered");
    }

    /// Mark a kind as enforced: payloads of that kind must have a schema.
    pub fn enforce(&mut self, kind: &str) {
        self.enforced.insert(kind.to_owned());
    }

    /// Registered `(version, kind)` pairs, sorted.
    pub fn registered(&self) -> Vec<(u64, String)> {
        let mut keys: Vec<(u64, String)> = self.schemas.keys().cloned().collect();
        keys.sort();
        keys
    }

    /// Resolve an alias URI to its `(version, kind)` key.
    pub fn resolve_alias(&self, alias: &str) -> Option<&(u64, String)> {
        self.aliases.get(alias)
    }

    /// Check a tool payload against its declared contract.
    pub fn check(&self, payload: &Value) -> ContractCheck {
        let Some(kind) = payload.get("kind").and_then(Value::as_str) else {
            return ContractCheck::NotApplicable;
        };
        let Some(version) = payload.get("schemaVersion").and_then(Value::as_u64) else {
            return ContractCheck::NotApplicable;
        };

        match self.schemas.get(&(version, kind.to_owned())) {
            Some(validator) => {
                let errors: Vec<String> = validator
                    .iter_errors(payload)
                    .take(MAX_ERROR_LINES)
                    .map(|e| format!("{}: {e}", e.instance_path))
                    .collect();
                if errors.is_empty() {
                    ContractCheck::Valid
                } else {
                    ContractCheck::Invalid(errors)
                }
            }
            None if self.enforced.contains(kind) => ContractCheck::Invalid(vec![format!(
                "no schema registered for enforced kind '{kind}' v{version}"
            )]),
            None => ContractCheck::Skipped(format!(
                "no schema registered for kind '{kind}' v{version}; validation skipped"
            )),
        }
    }
}

fn version_from_dir_name(path: &Path) -> Option<u64> {
    if !path.is_dir() {
        return None;
    }
    let name = path.file_name()?.to_str()?;
    name.strip_prefix('v')?.parse().ok()
}

fn load_schema(path: &Path) -> anyhow::Result<Validator> {
    let content = std::fs::read_to_string(path)?;
    let schema: Value = serde_json::from_str(&content)?;
    jsonschema::validator_for(&schema)
        .map_err(|e| anyhow::anyhow!("schema compilation failed: {e}"))
}
