//! Tool registry: per-tool declarations (argument whitelist, paging policy,
//! filter keys, write roles) plus the typed values validation produces.
//!
//! Registration is explicit at startup — each tool module contributes its
//! [`ToolSpec`] when the registry is built; nothing is discovered by
//! scanning. After startup the registry is read-only and shared.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use rust_decimal::Decimal;
use serde_json::Value;
use uuid::Uuid;

pub mod filters;
pub mod validate;

pub use filters::FilterCanonicalizer;
pub use validate::{validate, ValidateError};

// ---------------------------------------------------------------------------
// Argument model
// ---------------------------------------------------------------------------

/// Declared argument types.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArgType {
    String,
    Int,
    Bool,
    Guid,
    Decimal,
    Json,
    StringMap,
}

/// A typed argument value produced by validation.
///
/// Handlers pattern-match on these instead of re-parsing JSON.
#[derive(Debug, Clone, PartialEq)]
pub enum ArgValue {
    Str(String),
    Int(i64),
    Bool(bool),
    Guid(Uuid),
    Decimal(Decimal),
    Json(Value),
    StringMap(BTreeMap<String, String>),
}

impl ArgValue {
    /// String payload, if this is a string value.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::Str(s) => Some(s),
            _ => None,
        }
    }

    /// Integer payload, if this is an int value.
    pub fn as_int(&self) -> Option<i64> {
        match self {
            Self::Int(v) => Some(*v),
            _ => None,
        }
    }

    /// Boolean payload, if this is a bool value.
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Self::Bool(v) => Some(*v),
            _ => None,
        }
    }

    /// JSON payload, if this is a json value.
    pub fn as_json(&self) -> Option<&Value> {
        match self {
            Self::Json(v) => Some(v),
            _ => None,
        }
    }

    /// Map payload, if this is a string-map value.
    pub fn as_string_map(&self) -> Option<&BTreeMap<String, String>> {
        match self {
            Self::StringMap(m) => Some(m),
            _ => None,
        }
    }

    /// Plain JSON projection for the envelope's normalized intent.
    pub fn to_json(&self) -> Value {
        match self {
            Self::Str(s) => Value::String(s.clone()),
            Self::Int(v) => Value::from(*v),
            Self::Bool(v) => Value::from(*v),
            Self::Guid(v) => Value::String(v.simple().to_string()),
            Self::Decimal(v) => Value::String(v.to_string()),
            Self::Json(v) => v.clone(),
            Self::StringMap(m) => Value::Object(
                m.iter()
                    .map(|(k, v)| (k.clone(), Value::String(v.clone())))
                    .collect(),
            ),
        }
    }
}

/// Declaration of one tool argument.
#[derive(Debug, Clone)]
pub struct ArgSpec {
    pub name: String,
    pub arg_type: ArgType,
    pub required: bool,
    /// Substituted when an optional argument is absent.
    pub default: Option<Value>,
    /// Inclusive lower bound for int arguments.
    pub min_int: Option<i64>,
    /// Inclusive upper bound for int arguments.
    pub max_int: Option<i64>,
}

impl ArgSpec {
    /// Required argument with no default.
    pub fn required(name: &str, arg_type: ArgType) -> Self {
        Self {
            name: name.to_owned(),
            arg_type,
            required: true,
            default: None,
            min_int: None,
            max_int: None,
        }
    }

    /// Optional argument, with or without a default.
    pub fn optional(name: &str, arg_type: ArgType, default: Option<Value>) -> Self {
        Self {
            name: name.to_owned(),
            arg_type,
            required: false,
            default,
            min_int: None,
            max_int: None,
        }
    }

    /// Attach an inclusive integer range.
    pub fn with_range(mut self, min: i64, max: i64) -> Self {
        self.min_int = Some(min);
        self.max_int = Some(max);
        self
    }
}

// ---------------------------------------------------------------------------
// Tool spec
// ---------------------------------------------------------------------------

/// Paging behaviour for a tool.
#[derive(Debug, Clone)]
pub struct PagingPolicy {
    pub supports_paging: bool,
    pub default_page: u32,
    pub default_page_size: u32,
    pub max_page_size: u32,
}

impl PagingPolicy {
    /// Tool does not page; requests always see page 1 of one full page.
    pub fn none() -> Self {
        Self {
            supports_paging: false,
            default_page: 1,
            default_page_size: 50,
            max_page_size: 50,
        }
    }

    /// Standard paging with the given size defaults.
    pub fn pages(default_page_size: u32, max_page_size: u32) -> Self {
        Self {
            supports_paging: true,
            default_page: 1,
            default_page_size,
            max_page_size,
        }
    }
}

/// Complete declaration of a callable tool.
#[derive(Debug, Clone)]
pub struct ToolSpec {
    pub name: String,
    /// Description surfaced to the model.
    pub description: String,
    pub requires_write: bool,
    /// Roles allowed to run the tool when `requires_write` is set.
    pub write_roles: Vec<String>,
    pub args: Vec<ArgSpec>,
    pub paging: PagingPolicy,
    /// Canonical filter keys this tool accepts.
    pub allowed_filter_keys: Vec<String>,
    /// Alias table used to canonicalize incoming filter keys.
    pub filter_aliases: Arc<FilterCanonicalizer>,
}

impl ToolSpec {
    /// JSON Schema for the tool's parameters, assembled from the arg specs.
    pub fn parameters_schema(&self) -> Value {
        let mut properties = serde_json::Map::new();
        let mut required = Vec::new();
        for arg in &self.args {
            let ty = match arg.arg_type {
                ArgType::String | ArgType::Guid | ArgType::Decimal => "string",
                ArgType::Int => "integer",
                ArgType::Bool => "boolean",
                ArgType::Json | ArgType::StringMap => "object",
            };
            properties.insert(arg.name.clone(), serde_json::json!({ "type": ty }));
            if arg.required {
                required.push(Value::String(arg.name.clone()));
            }
        }
        if !self.allowed_filter_keys.is_empty() {
            properties.insert(
                "filters".to_owned(),
                serde_json::json!({
                    "type": "object",
                    "additionalProperties": { "type": "string" }
                }),
            );
        }
        if self.paging.supports_paging {
            properties.insert("page".to_owned(), serde_json::json!({ "type": "integer" }));
            properties.insert(
                "pageSize".to_owned(),
                serde_json::json!({ "type": "integer" }),
            );
        }
        serde_json::json!({
            "type": "object",
            "properties": Value::Object(properties),
            "required": required
        })
    }
}

// ---------------------------------------------------------------------------
// Intent
// ---------------------------------------------------------------------------

/// A tool invocation after validation and canonicalization.
#[derive(Debug, Clone, PartialEq)]
pub struct ToolIntent {
    /// Canonical filter key → raw string value.
    pub filters: BTreeMap<String, String>,
    pub page: u32,
    pub page_size: u32,
    /// Declared argument name → typed value.
    pub args: BTreeMap<String, ArgValue>,
}

impl ToolIntent {
    /// Typed argument lookup.
    pub fn arg(&self, name: &str) -> Option<&ArgValue> {
        self.args.get(name)
    }

    /// JSON projection for the envelope's `normalizedIntent`.
    pub fn to_json(&self) -> Value {
        serde_json::json!({
            "filters": self.filters,
            "page": self.page,
            "pageSize": self.page_size,
            "args": Value::Object(
                self.args
                    .iter()
                    .map(|(k, v)| (k.clone(), v.to_json()))
                    .collect()
            ),
        })
    }
}

// ---------------------------------------------------------------------------
// Registry
// ---------------------------------------------------------------------------

/// Startup-built, thereafter read-only map of tool specs.
#[derive(Debug, Default)]
pub struct ToolRegistry {
    tools: HashMap<String, Arc<ToolSpec>>,
}

impl ToolRegistry {
    /// Empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a spec. Replaces any previous spec with the same name.
    pub fn register(&mut self, spec: ToolSpec) {
        self.tools.insert(spec.name.clone(), Arc::new(spec));
    }

    /// Spec lookup by exact tool name.
    pub fn get(&self, name: &str) -> Option<Arc<ToolSpec>> {
        self.tools.get(name).cloned()
    }

    /// Registered tool names, sorted.
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.tools.keys().cloned().collect();
        names.sort();
        names
    }

    /// Number of registered tools.
    pub fn len(&self) -> usize {
        self.tools.len()
    }

    /// Whether the registry is empty.
    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }
}
