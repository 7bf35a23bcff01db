//! Tabular dataset model: typed columnar storage plus the row-major
//! [`Frame`] the engine works on.
//!
//! A [`Dataset`] is immutable after construction, owned by exactly one
//! `(tenant, user)` pair, and reachable only until `created_at + ttl`.
//! Column values keep their declared type through serialization so that
//! aggregate semantics survive a round-trip through a remote store.

use chrono::{DateTime, SecondsFormat, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};

// ---------------------------------------------------------------------------
// Column types
// ---------------------------------------------------------------------------

/// Closed set of column data types.
///
/// Unknown runtime type tags fall back to [`ColumnType::String`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ColumnType {
    Int32,
    Int64,
    Double,
    Single,
    Decimal,
    Boolean,
    Datetime,
    String,
}

impl ColumnType {
    /// Parse a type tag, falling back to `String` for anything unknown.
    pub fn from_tag(tag: &str) -> Self {
        match tag.to_ascii_lowercase().as_str() {
            "int32" | "int" => Self::Int32,
            "int64" | "long" | "bigint" => Self::Int64,
            "double" | "float64" => Self::Double,
            "single" | "float" | "float32" => Self::Single,
            "decimal" | "money" | "numeric" => Self::Decimal,
            "boolean" | "bool" | "bit" => Self::Boolean,
            "datetime" | "datetime2" | "date" | "timestamp" => Self::Datetime,
            _ => Self::String,
        }
    }

    /// Canonical tag for serialization.
    pub fn tag(self) -> &'static str {
        match self {
            Self::Int32 => "int32",
            Self::Int64 => "int64",
            Self::Double => "double",
            Self::Single => "single",
            Self::Decimal => "decimal",
            Self::Boolean => "boolean",
            Self::Datetime => "datetime",
            Self::String => "string",
        }
    }
}

/// One column of a dataset schema.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ColumnDef {
    /// Technical name (join/filter/group key).
    pub name: String,
    pub data_type: ColumnType,
    /// Presentation name, kept verbatim from the source.
    pub display_name: String,
}

impl ColumnDef {
    /// Column with identical technical and display name.
    pub fn plain(name: &str, data_type: ColumnType) -> Self {
        Self {
            name: name.to_owned(),
            data_type,
            display_name: name.to_owned(),
        }
    }
}

// ---------------------------------------------------------------------------
// Cell
// ---------------------------------------------------------------------------

/// A single typed cell value.
///
/// Serialized with an explicit type tag so a remote store round-trip never
/// collapses decimals into doubles.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "t", content = "v", rename_all = "lowercase")]
pub enum Cell {
    Null,
    I32(i32),
    I64(i64),
    F64(f64),
    F32(f32),
    Decimal(Decimal),
    Bool(bool),
    Datetime(DateTime<Utc>),
    Str(String),
}

impl Cell {
    /// Invariant stringification used by filters, sort keys and group keys.
    ///
    /// `Null` stringifies to the empty string.
    pub fn canon(&self) -> String {
        match self {
            Self::Null => String::new(),
            Self::I32(v) => v.to_string(),
            Self::I64(v) => v.to_string(),
            Self::F64(v) => v.to_string(),
            Self::F32(v) => v.to_string(),
            Self::Decimal(v) => v.to_string(),
            Self::Bool(v) => v.to_string(),
            Self::Datetime(v) => v.to_rfc3339_opts(SecondsFormat::Secs, true),
            Self::Str(v) => v.clone(),
        }
    }

    /// Plain JSON projection (for payloads handed to the model).
    pub fn to_json(&self) -> Value {
        match self {
            Self::Null => Value::Null,
            Self::I32(v) => Value::from(*v),
            Self::I64(v) => Value::from(*v),
            Self::F64(v) => Value::from(*v),
            Self::F32(v) => Value::from(f64::from(*v)),
            Self::Decimal(v) => Value::String(v.to_string()),
            Self::Bool(v) => Value::from(*v),
            Self::Datetime(v) => Value::String(v.to_rfc3339_opts(SecondsFormat::Secs, true)),
            Self::Str(v) => Value::String(v.clone()),
        }
    }

    /// Coerce a plain JSON value into a cell of the declared column type.
    ///
    /// This is the read side of the cross-store fidelity rule: the type tag
    /// decides the target representation, never JSON-number inference.
    pub fn from_json(value: &Value, data_type: ColumnType) -> Self {
        if value.is_null() {
            return Self::Null;
        }
        match data_type {
            ColumnType::Int32 => value
                .as_i64()
                .and_then(|v| i32::try_from(v).ok())
                .or_else(|| value.as_str().and_then(|s| s.trim().parse().ok()))
                .map_or(Self::Null, Self::I32),
            ColumnType::Int64 => value
                .as_i64()
                .or_else(|| value.as_str().and_then(|s| s.trim().parse().ok()))
                .map_or(Self::Null, Self::I64),
            ColumnType::Double => value
                .as_f64()
                .or_else(|| value.as_str().and_then(|s| s.trim().parse().ok()))
                .map_or(Self::Null, Self::F64),
            ColumnType::Single => value
                .as_f64()
                .or_else(|| value.as_str().and_then(|s| s.trim().parse().ok()))
                .map_or(Self::Null, |v| {
                    #[allow(clippy::cast_possible_truncation)]
                    {
                        Self::F32(v as f32)
                    }
                }),
            ColumnType::Decimal => match value {
                Value::String(s) => s.trim().parse().map_or(Self::Null, Self::Decimal),
                Value::Number(n) => n
                    .to_string()
                    .parse()
                    .map_or(Self::Null, Self::Decimal),
                _ => Self::Null,
            },
            ColumnType::Boolean => value
                .as_bool()
                .or_else(|| value.as_str().and_then(|s| s.trim().parse().ok()))
                .map_or(Self::Null, Self::Bool),
            ColumnType::Datetime => value
                .as_str()
                .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
                .map_or(Self::Null, |dt| Self::Datetime(dt.with_timezone(&Utc))),
            ColumnType::String => match value {
                Value::String(s) => Self::Str(s.clone()),
                other => Self::Str(other.to_string()),
            },
        }
    }
}

// ---------------------------------------------------------------------------
// Frame
// ---------------------------------------------------------------------------

/// Row-major working set the engine operates on and returns.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Frame {
    pub columns: Vec<ColumnDef>,
    pub rows: Vec<Vec<Cell>>,
}

impl Frame {
    /// Empty frame with the given schema.
    pub fn empty(columns: Vec<ColumnDef>) -> Self {
        Self {
            columns,
            rows: Vec::new(),
        }
    }

    /// Case-insensitive column lookup.
    pub fn find_column(&self, name: &str) -> Option<usize> {
        self.columns
            .iter()
            .position(|c| c.name.eq_ignore_ascii_case(name))
    }

    /// Number of rows.
    pub fn row_count(&self) -> usize {
        self.rows.len()
    }
}

// ---------------------------------------------------------------------------
// Dataset
// ---------------------------------------------------------------------------

/// Errors from dataset construction.
#[derive(Debug, thiserror::Error)]
pub enum DatasetError {
    /// Column vector count differs from the schema arity.
    #[error("dataset has {columns} column vectors but schema declares {schema}")]
    SchemaMismatch { columns: usize, schema: usize },
    /// Column vectors have unequal lengths.
    #[error("dataset column '{column}' has {len} values, expected {expected}")]
    RaggedColumns {
        column: String,
        len: usize,
        expected: usize,
    },
}

/// An immutable, TTL-bounded, tenant/user-owned tabular snapshot.
///
/// Storage is columnar (one `Vec<Cell>` per schema column); the engine
/// materializes a row-major [`Frame`] on demand.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Dataset {
    pub dataset_id: String,
    /// Label of the producing query or backend.
    pub source: String,
    pub tenant_id: String,
    pub user_id: String,
    pub created_at_utc: DateTime<Utc>,
    /// Lifetime in seconds from `created_at_utc`.
    pub ttl_secs: u64,
    pub schema: Vec<ColumnDef>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub schema_digest: Option<String>,
    columns: Vec<Vec<Cell>>,
}

impl Dataset {
    /// Construct a dataset, validating the columnar shape.
    ///
    /// # Errors
    ///
    /// Returns [`DatasetError`] if the column vectors disagree with the
    /// schema arity or have unequal lengths.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        dataset_id: String,
        source: String,
        tenant_id: String,
        user_id: String,
        created_at_utc: DateTime<Utc>,
        ttl_secs: u64,
        schema: Vec<ColumnDef>,
        columns: Vec<Vec<Cell>>,
    ) -> Result<Self, DatasetError> {
        if columns.len() != schema.len() {
            return Err(DatasetError::SchemaMismatch {
                columns: columns.len(),
                schema: schema.len(),
            });
        }
        let expected = columns.first().map_or(0, Vec::len);
        for (def, col) in schema.iter().zip(&columns) {
            if col.len() != expected {
                return Err(DatasetError::RaggedColumns {
                    column: def.name.clone(),
                    len: col.len(),
                    expected,
                });
            }
        }
        let schema_digest = Some(schema_digest(&schema));
        Ok(Self {
            dataset_id,
            source,
            tenant_id,
            user_id,
            created_at_utc,
            ttl_secs,
            schema,
            schema_digest,
            columns,
        })
    }

    /// Build a dataset from a result [`Frame`] (the `persistAs` path).
    ///
    /// # Errors
    ///
    /// Returns [`DatasetError`] if the frame rows are ragged.
    pub fn from_frame(
        dataset_id: String,
        source: String,
        tenant_id: String,
        user_id: String,
        ttl_secs: u64,
        frame: &Frame,
    ) -> Result<Self, DatasetError> {
        let mut columns: Vec<Vec<Cell>> = vec![Vec::with_capacity(frame.rows.len()); frame.columns.len()];
        for row in &frame.rows {
            if row.len() != frame.columns.len() {
                return Err(DatasetError::SchemaMismatch {
                    columns: row.len(),
                    schema: frame.columns.len(),
                });
            }
            for (idx, cell) in row.iter().enumerate() {
                if let Some(col) = columns.get_mut(idx) {
                    col.push(cell.clone());
                }
            }
        }
        Self::new(
            dataset_id,
            source,
            tenant_id,
            user_id,
            Utc::now(),
            ttl_secs,
            frame.columns.clone(),
            columns,
        )
    }

    /// Number of rows.
    pub fn row_count(&self) -> usize {
        self.columns.first().map_or(0, Vec::len)
    }

    /// Whether the dataset is past its lifetime at `now`.
    ///
    /// Expiry is strict: the dataset is still reachable at exactly
    /// `created_at + ttl`.
    pub fn expired_at(&self, now: DateTime<Utc>) -> bool {
        let deadline = self
            .created_at_utc
            .checked_add_signed(chrono::Duration::seconds(
                i64::try_from(self.ttl_secs).unwrap_or(i64::MAX),
            ));
        match deadline {
            Some(d) => now > d,
            None => false,
        }
    }

    /// Whether `(tenant_id, user_id)` owns this dataset.
    pub fn owned_by(&self, tenant_id: &str, user_id: &str) -> bool {
        self.tenant_id == tenant_id && self.user_id == user_id
    }

    /// Materialize a row-major frame snapshot.
    pub fn frame(&self) -> Frame {
        let rows = (0..self.row_count())
            .map(|r| {
                self.columns
                    .iter()
                    .map(|col| col.get(r).cloned().unwrap_or(Cell::Null))
                    .collect()
            })
            .collect();
        Frame {
            columns: self.schema.clone(),
            rows,
        }
    }
}

/// Digest of the ordered schema (`name:type` pairs), hex-encoded SHA-256.
pub fn schema_digest(schema: &[ColumnDef]) -> String {
    let mut hasher = Sha256::new();
    for col in schema {
        hasher.update(col.name.as_bytes());
        hasher.update(b":");
        hasher.update(col.data_type.tag().as_bytes());
        hasher.update(b"|");
    }
    hex::encode(hasher.finalize())
}
