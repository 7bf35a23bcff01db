//! Pipeline DSL parsing.
//!
//! The wire shape is `{steps: [Step, …]}` or a bare `[Step, …]`; each step
//! is `{op, …}`. Unknown ops are dropped with a warning; numeric
//! parameters tolerate both number and string encodings. Structural
//! violations (empty `by`, malformed join keys, missing step fields) are
//! argument errors — everything else degrades to warnings.

use serde_json::Value;

use super::EngineError;

// ---------------------------------------------------------------------------
// Step types
// ---------------------------------------------------------------------------

/// Filter comparison operators.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FilterOp {
    /// Case-insensitive equality on the stringified cell.
    Eq,
    /// Case-insensitive substring on the stringified cell.
    Contains,
}

/// Sort direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortDirection {
    Asc,
    Desc,
}

/// Join variants.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JoinKind {
    Inner,
    Left,
}

/// Aggregate operators.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AggOp {
    Count,
    Sum,
    Avg,
    Min,
    Max,
}

impl AggOp {
    /// Lower-case operator name.
    pub fn name(self) -> &'static str {
        match self {
            Self::Count => "count",
            Self::Sum => "sum",
            Self::Avg => "avg",
            Self::Min => "min",
            Self::Max => "max",
        }
    }
}

/// One aggregate of a `groupBy` step.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Aggregate {
    pub op: AggOp,
    /// Source column; `None` for `count`.
    pub column: Option<String>,
    /// Output column name.
    pub output: String,
}

/// A typed pipeline step.
#[derive(Debug, Clone, PartialEq)]
pub enum PipelineStep {
    Filter {
        column: String,
        op: FilterOp,
        value: String,
    },
    Select {
        columns: Vec<String>,
    },
    GroupBy {
        by: Vec<String>,
        aggregates: Vec<Aggregate>,
    },
    Sort {
        column: String,
        direction: SortDirection,
    },
    TopN {
        n: u32,
    },
    Join {
        right_dataset_id: String,
        left_keys: Vec<String>,
        right_keys: Vec<String>,
        how: JoinKind,
        right_prefix: String,
        select_right: Option<Vec<String>>,
    },
}

// ---------------------------------------------------------------------------
// Parsing
// ---------------------------------------------------------------------------

/// Default prefix for right-side join columns when none is supplied.
const DEFAULT_RIGHT_PREFIX: &str = "r_";

/// Parse the pipeline DSL into typed steps plus parse warnings.
///
/// # Errors
///
/// Returns [`EngineError::Argument`] for structural violations; tolerable
/// irregularities (unknown op, unknown operator) become warnings instead.
pub fn parse_plan(value: &Value) -> Result<(Vec<PipelineStep>, Vec<String>), EngineError> {
    let raw_steps: &Vec<Value> = match value {
        Value::Array(items) => items,
        Value::Object(map) => match map.get("steps") {
            Some(Value::Array(items)) => items,
            Some(other) => {
                return Err(EngineError::Argument(format!(
                    "pipeline: steps must be an array, got {}",
                    json_kind(other)
                )))
            }
            // An object without steps is an empty pipeline.
            None => return Ok((Vec::new(), Vec::new())),
        },
        Value::Null => return Ok((Vec::new(), Vec::new())),
        other => {
            return Err(EngineError::Argument(format!(
                "pipeline: expected object or array, got {}",
                json_kind(other)
            )))
        }
    };

    let mut steps = Vec::with_capacity(raw_steps.len());
    let mut warnings = Vec::new();

    for raw in raw_steps {
        let obj = match raw.as_object() {
            Some(o) => o,
            None => {
                warnings.push("pipeline: non-object step ignored".to_owned());
                continue;
            }
        };
        let op = obj.get("op").and_then(Value::as_str).unwrap_or("");
        match op.to_ascii_lowercase().as_str() {
            "filter" => {
                if let Some(step) = parse_filter(raw, &mut warnings)? {
                    steps.push(step);
                }
            }
            "select" => steps.push(parse_select(raw)?),
            "groupby" | "group_by" => steps.push(parse_group_by(raw)?),
            "sort" => steps.push(parse_sort(raw, &mut warnings)?),
            "topn" | "top_n" => steps.push(parse_top_n(raw)?),
            "join" => steps.push(parse_join(raw)?),
            other => {
                warnings.push(format!("pipeline: unknown op '{other}' ignored"));
            }
        }
    }

    Ok((steps, warnings))
}

fn parse_filter(
    raw: &Value,
    warnings: &mut Vec<String>,
) -> Result<Option<PipelineStep>, EngineError> {
    let column = required_str(raw, "column", "filter")?;
    let op_str = raw.get("operator").and_then(Value::as_str).unwrap_or("eq");
    let op = match op_str.to_ascii_lowercase().as_str() {
        "eq" | "equals" => FilterOp::Eq,
        "contains" => FilterOp::Contains,
        other => {
            warnings.push(format!("filter: unknown operator '{other}', step ignored"));
            return Ok(None);
        }
    };
    let value = match raw.get("value") {
        None | Some(Value::Null) => String::new(),
        Some(Value::String(s)) => s.clone(),
        Some(other) => lenient_scalar_string(other),
    };
    Ok(Some(PipelineStep::Filter { column, op, value }))
}

fn parse_select(raw: &Value) -> Result<PipelineStep, EngineError> {
    let requested = string_list(raw.get("columns"))
        .ok_or_else(|| EngineError::Argument("select: columns must be a non-empty array".to_owned()))?;
    if requested.is_empty() {
        return Err(EngineError::Argument(
            "select: columns must be a non-empty array".to_owned(),
        ));
    }
    // Collapse duplicates case-insensitively, keeping first occurrence.
    let mut columns: Vec<String> = Vec::with_capacity(requested.len());
    for name in requested {
        if !columns.iter().any(|c| c.eq_ignore_ascii_case(&name)) {
            columns.push(name);
        }
    }
    Ok(PipelineStep::Select { columns })
}

fn parse_group_by(raw: &Value) -> Result<PipelineStep, EngineError> {
    let by = string_list(raw.get("by"))
        .filter(|b| !b.is_empty())
        .ok_or_else(|| EngineError::Argument("groupBy: by must be a non-empty array".to_owned()))?;

    let mut aggregates = Vec::new();
    if let Some(raw_aggs) = raw.get("aggregates").and_then(Value::as_array) {
        for raw_agg in raw_aggs {
            aggregates.push(parse_aggregate(raw_agg)?);
        }
    }
    Ok(PipelineStep::GroupBy { by, aggregates })
}

fn parse_aggregate(raw: &Value) -> Result<Aggregate, EngineError> {
    let op_str = raw
        .get("op")
        .and_then(Value::as_str)
        .ok_or_else(|| EngineError::Argument("groupBy: aggregate missing op".to_owned()))?;
    let op = match op_str.to_ascii_lowercase().as_str() {
        "count" => AggOp::Count,
        "sum" => AggOp::Sum,
        "avg" | "average" => AggOp::Avg,
        "min" => AggOp::Min,
        "max" => AggOp::Max,
        other => {
            return Err(EngineError::Argument(format!(
                "groupBy: unknown aggregate op '{other}'"
            )))
        }
    };

    let column = raw
        .get("column")
        .and_then(Value::as_str)
        .map(ToOwned::to_owned);
    // count takes no column (one supplied is ignored); the rest need one.
    let column = match op {
        AggOp::Count => None,
        _ => Some(column.filter(|c| !c.is_empty()).ok_or_else(|| {
            EngineError::Argument(format!("groupBy: aggregate '{}' requires a column", op.name()))
        })?),
    };

    let output = raw
        .get("as")
        .and_then(Value::as_str)
        .map(ToOwned::to_owned)
        .unwrap_or_else(|| match &column {
            Some(c) => format!("{}_{c}", op.name()),
            None => op.name().to_owned(),
        });

    Ok(Aggregate { op, column, output })
}

fn parse_sort(raw: &Value, warnings: &mut Vec<String>) -> Result<PipelineStep, EngineError> {
    let column = required_str(raw, "column", "sort")?;
    let dir_str = raw
        .get("direction")
        .and_then(Value::as_str)
        .unwrap_or("asc");
    let direction = match dir_str.to_ascii_lowercase().as_str() {
        "asc" | "ascending" => SortDirection::Asc,
        "desc" | "descending" => SortDirection::Desc,
        other => {
            warnings.push(format!("sort: unknown direction '{other}', using asc"));
            SortDirection::Asc
        }
    };
    Ok(PipelineStep::Sort { column, direction })
}

fn parse_top_n(raw: &Value) -> Result<PipelineStep, EngineError> {
    let n = lenient_u64(raw.get("n"))
        .ok_or_else(|| EngineError::Argument("topN: n must be a positive integer".to_owned()))?;
    if n == 0 {
        return Err(EngineError::Argument(
            "topN: n must be a positive integer".to_owned(),
        ));
    }
    Ok(PipelineStep::TopN {
        n: u32::try_from(n).unwrap_or(u32::MAX),
    })
}

fn parse_join(raw: &Value) -> Result<PipelineStep, EngineError> {
    let right_dataset_id = required_str(raw, "rightDatasetId", "join")?;
    let left_keys = string_list(raw.get("leftKeys")).unwrap_or_default();
    let right_keys = string_list(raw.get("rightKeys")).unwrap_or_default();
    if left_keys.is_empty() || left_keys.len() != right_keys.len() {
        return Err(EngineError::Argument(
            "join: leftKeys and rightKeys must be non-empty and the same length".to_owned(),
        ));
    }

    let how = match raw
        .get("how")
        .and_then(Value::as_str)
        .unwrap_or("inner")
        .to_ascii_lowercase()
        .as_str()
    {
        "inner" => JoinKind::Inner,
        "left" => JoinKind::Left,
        other => {
            return Err(EngineError::Argument(format!(
                "join: unknown how '{other}' (expected inner or left)"
            )))
        }
    };

    let right_prefix = raw
        .get("rightPrefix")
        .and_then(Value::as_str)
        .filter(|p| !p.is_empty())
        .unwrap_or(DEFAULT_RIGHT_PREFIX)
        .to_owned();

    let select_right = string_list(raw.get("selectRight"));

    Ok(PipelineStep::Join {
        right_dataset_id,
        left_keys,
        right_keys,
        how,
        right_prefix,
        select_right,
    })
}

// ---------------------------------------------------------------------------
// Lenient field helpers
// ---------------------------------------------------------------------------

fn required_str(raw: &Value, field: &str, step: &str) -> Result<String, EngineError> {
    raw.get(field)
        .and_then(Value::as_str)
        .map(ToOwned::to_owned)
        .filter(|s| !s.is_empty())
        .ok_or_else(|| EngineError::Argument(format!("{step}: missing required field {field}")))
}

/// Accept a JSON array of strings; scalars inside are stringified.
fn string_list(value: Option<&Value>) -> Option<Vec<String>> {
    match value {
        Some(Value::Array(items)) => Some(
            items
                .iter()
                .filter_map(|v| match v {
                    Value::String(s) => Some(s.clone()),
                    Value::Number(n) => Some(n.to_string()),
                    _ => None,
                })
                .collect(),
        ),
        _ => None,
    }
}

/// Accept a number or a numeric string.
fn lenient_u64(value: Option<&Value>) -> Option<u64> {
    match value {
        Some(Value::Number(n)) => n.as_u64().or_else(|| {
            // Tolerate float encodings of whole numbers.
            n.as_f64().filter(|f| *f >= 0.0 && f.fract() == 0.0).map(|f| {
                #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
                {
                    f as u64
                }
            })
        }),
        Some(Value::String(s)) => s.trim().parse().ok(),
        _ => None,
    }
}

fn lenient_scalar_string(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
