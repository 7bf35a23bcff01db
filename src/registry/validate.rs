//! Argument validation: raw tool-call JSON → typed [`ToolIntent`].
//!
//! Fail-closed on shape: unknown top-level arguments, type mismatches,
//! range violations and missing required arguments all reject with the
//! offending field named. Filters degrade to warnings instead (see
//! [`super::filters`]); paging is clamped, never rejected.

use std::collections::BTreeMap;

use rust_decimal::Decimal;
use serde_json::Value;
use uuid::Uuid;

use super::{ArgSpec, ArgType, ArgValue, ToolIntent, ToolSpec};

/// Validation rejection; `field` names the offending argument.
#[derive(Debug, thiserror::Error)]
#[error("invalid argument '{field}': {message}")]
pub struct ValidateError {
    pub field: String,
    pub message: String,
}

impl ValidateError {
    fn new(field: &str, message: impl Into<String>) -> Self {
        Self {
            field: field.to_owned(),
            message: message.into(),
        }
    }
}

/// Reserved argument names every tool accepts besides its declared specs.
const RESERVED: [&str; 3] = ["filters", "page", "pageSize"];

/// Validate raw arguments against a tool spec.
///
/// # Errors
///
/// Returns [`ValidateError`] on any shape/type/range violation. Filter
/// irregularities are reported through the warning list instead.
pub fn validate(
    spec: &ToolSpec,
    raw: &Value,
) -> Result<(ToolIntent, Vec<String>), ValidateError> {
    let empty = serde_json::Map::new();
    let obj = match raw {
        Value::Object(map) => map,
        Value::Null => &empty,
        _ => {
            return Err(ValidateError::new(
                "arguments",
                "tool arguments must be a JSON object",
            ))
        }
    };

    // (a) unknown top-level arguments reject.
    for key in obj.keys() {
        let declared = spec.args.iter().any(|a| a.name == *key);
        if !declared && !RESERVED.contains(&key.as_str()) {
            return Err(ValidateError::new(key, "unknown argument"));
        }
    }

    let mut warnings = Vec::new();

    // (b) filters canonicalize; unknown keys become warnings.
    let filters = match obj.get("filters") {
        Some(Value::Object(raw_filters)) => spec.filter_aliases.canonicalize(
            raw_filters,
            &spec.allowed_filter_keys,
            &mut warnings,
        ),
        Some(Value::Null) | None => BTreeMap::new(),
        Some(_) => return Err(ValidateError::new("filters", "filters must be an object")),
    };

    // (c) declared args parse-and-coerce.
    let mut args = BTreeMap::new();
    for arg_spec in &spec.args {
        match obj.get(&arg_spec.name) {
            Some(Value::Null) | None => {
                if arg_spec.required {
                    return Err(ValidateError::new(&arg_spec.name, "required argument missing"));
                }
                if let Some(default) = &arg_spec.default {
                    let value = coerce(arg_spec, default)?;
                    args.insert(arg_spec.name.clone(), value);
                }
            }
            Some(value) => {
                let value = coerce(arg_spec, value)?;
                args.insert(arg_spec.name.clone(), value);
            }
        }
    }

    // (d) paging clamps.
    let (page, page_size) = resolve_paging(spec, obj);

    Ok((
        ToolIntent {
            filters,
            page,
            page_size,
            args,
        },
        warnings,
    ))
}

fn resolve_paging(spec: &ToolSpec, obj: &serde_json::Map<String, Value>) -> (u32, u32) {
    if !spec.paging.supports_paging {
        return (spec.paging.default_page, spec.paging.default_page_size);
    }
    let page = lenient_u32(obj.get("page"))
        .unwrap_or(spec.paging.default_page)
        .max(1);
    let page_size = lenient_u32(obj.get("pageSize"))
        .unwrap_or(spec.paging.default_page_size)
        .clamp(1, spec.paging.max_page_size);
    (page, page_size)
}

/// Paging values tolerate number and string encodings; anything else
/// falls back to the policy default.
fn lenient_u32(value: Option<&Value>) -> Option<u32> {
    match value {
        Some(Value::Number(n)) => n.as_u64().and_then(|v| u32::try_from(v).ok()),
        Some(Value::String(s)) => s.trim().parse().ok(),
        _ => None,
    }
}

// ---------------------------------------------------------------------------
// Coercion
// ---------------------------------------------------------------------------

fn coerce(spec: &ArgSpec, value: &Value) -> Result<ArgValue, ValidateError> {
    let field = spec.name.as_str();
    match spec.arg_type {
        ArgType::String => match value {
            Value::String(s) => Ok(ArgValue::Str(s.clone())),
            Value::Number(n) => Ok(ArgValue::Str(n.to_string())),
            _ => Err(ValidateError::new(field, "expected a string")),
        },
        ArgType::Int => {
            let parsed = match value {
                Value::Number(n) => n.as_i64(),
                Value::String(s) => s.trim().parse().ok(),
                _ => None,
            }
            .ok_or_else(|| ValidateError::new(field, "expected an integer"))?;
            if let Some(min) = spec.min_int {
                if parsed < min {
                    return Err(ValidateError::new(field, format!("must be >= {min}")));
                }
            }
            if let Some(max) = spec.max_int {
                if parsed > max {
                    return Err(ValidateError::new(field, format!("must be <= {max}")));
                }
            }
            Ok(ArgValue::Int(parsed))
        }
        ArgType::Bool => match value {
            Value::Bool(b) => Ok(ArgValue::Bool(*b)),
            Value::String(s) => match s.trim().to_ascii_lowercase().as_str() {
                "true" => Ok(ArgValue::Bool(true)),
                "false" => Ok(ArgValue::Bool(false)),
                _ => Err(ValidateError::new(field, "expected a boolean")),
            },
            _ => Err(ValidateError::new(field, "expected a boolean")),
        },
        ArgType::Guid => {
            let s = value
                .as_str()
                .ok_or_else(|| ValidateError::new(field, "expected a guid string"))?;
            Uuid::parse_str(s.trim())
                .map(ArgValue::Guid)
                .map_err(|_| ValidateError::new(field, "expected a guid string"))
        }
        ArgType::Decimal => {
            let parsed: Option<Decimal> = match value {
                Value::Number(n) => n.to_string().parse().ok(),
                Value::String(s) => s.trim().parse().ok(),
                _ => None,
            };
            parsed
                .map(ArgValue::Decimal)
                .ok_or_else(|| ValidateError::new(field, "expected a decimal"))
        }
        ArgType::Json => match value {
            Value::Object(_) | Value::Array(_) => Ok(ArgValue::Json(value.clone())),
            Value::String(s) => serde_json::from_str(s)
                .map(ArgValue::Json)
                .map_err(|_| ValidateError::new(field, "expected a JSON value")),
            _ => Err(ValidateError::new(field, "expected a JSON value")),
        },
        ArgType::StringMap => {
            let obj = value
                .as_object()
                .ok_or_else(|| ValidateError::new(field, "expected an object of strings"))?;
            let mut map = BTreeMap::new();
            for (k, v) in obj {
                let text = match v {
                    Value::String(s) => s.clone(),
                    Value::Number(n) => n.to_string(),
                    Value::Bool(b) => b.to_string(),
                    _ => {
                        return Err(ValidateError::new(
                            field,
                            format!("value for '{k}' must be scalar"),
                        ))
                    }
                };
                map.insert(k.clone(), text);
            }
            Ok(ArgValue::StringMap(map))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::{FilterCanonicalizer, PagingPolicy};
    use serde_json::json;
    use std::sync::Arc;

    fn spec() -> ToolSpec {
        ToolSpec {
            name: "sample.read".to_owned(),
            description: "sample".to_owned(),
            requires_write: false,
            write_roles: vec![],
            args: vec![
                ArgSpec::required("datasetId", ArgType::String),
                ArgSpec::optional("limit", ArgType::Int, Some(json!(10))).with_range(1, 100),
                ArgSpec::optional("verbose", ArgType::Bool, None),
            ],
            paging: PagingPolicy::pages(20, 200),
            allowed_filter_keys: vec!["seasonNo".to_owned()],
            filter_aliases: Arc::new(FilterCanonicalizer::new(&[("season", "seasonNo")])),
        }
    }

    #[test]
    fn unknown_argument_rejects_with_field_name() {
        let err = validate(&spec(), &json!({"datasetId": "d", "bogus": 1}))
            .expect_err("must reject");
        assert_eq!(err.field, "bogus");
    }

    #[test]
    fn missing_required_rejects() {
        let err = validate(&spec(), &json!({})).expect_err("must reject");
        assert_eq!(err.field, "datasetId");
    }

    #[test]
    fn optional_default_is_substituted() {
        let (intent, _) = validate(&spec(), &json!({"datasetId": "d"})).expect("valid");
        assert_eq!(intent.arg("limit").and_then(ArgValue::as_int), Some(10));
        assert_eq!(intent.arg("verbose"), None);
    }

    #[test]
    fn int_range_is_enforced() {
        let err = validate(&spec(), &json!({"datasetId": "d", "limit": 999}))
            .expect_err("must reject");
        assert_eq!(err.field, "limit");
    }

    #[test]
    fn int_tolerates_string_encoding() {
        let (intent, _) =
            validate(&spec(), &json!({"datasetId": "d", "limit": "42"})).expect("valid");
        assert_eq!(intent.arg("limit").and_then(ArgValue::as_int), Some(42));
    }

    #[test]
    fn paging_is_clamped_to_policy() {
        let (intent, _) = validate(
            &spec(),
            &json!({"datasetId": "d", "page": 0, "pageSize": 10_000}),
        )
        .expect("valid");
        assert_eq!(intent.page, 1);
        assert_eq!(intent.page_size, 200);
    }

    #[test]
    fn filters_canonicalize_with_warnings() {
        let (intent, warnings) = validate(
            &spec(),
            &json!({"datasetId": "d", "filters": {"Season": "25A", "junk": "x"}}),
        )
        .expect("valid");
        assert_eq!(
            intent.filters.get("seasonNo").map(String::as_str),
            Some("25A")
        );
        assert_eq!(warnings.len(), 1);
    }
}
