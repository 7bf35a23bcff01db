//! Atomic data engine: a pure, bounded pipeline executor over in-memory
//! tabular datasets.
//!
//! [`execute`] applies a parsed [`plan::PipelineStep`] sequence to a
//! dataset's frame. The engine is total with respect to resource caps:
//! every cap breach is a warning, never an error. [`EngineError::Argument`]
//! is reserved for structural violations (unknown aggregate column, empty
//! `by`, malformed join keys, unresolvable right dataset). The engine never
//! reaches into storage — the right side of a join comes from an injected
//! resolver closure.

use std::sync::Arc;

use serde::{Deserialize, Serialize};

pub mod coerce;
pub mod dataset;
pub mod group;
pub mod join;
pub mod plan;

use dataset::{Cell, Dataset, Frame};
use plan::{FilterOp, PipelineStep, SortDirection};

/// ASCII unit separator; cannot occur in printable cell content, so joined
/// composite keys never collide.
pub const GROUP_KEY_SEPARATOR: &str = "\u{1F}";

// ---------------------------------------------------------------------------
// Errors & bounds
// ---------------------------------------------------------------------------

/// Engine failure: structural argument violations only.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    /// The plan references something that cannot be resolved.
    #[error("{0}")]
    Argument(String),
}

/// Hard caps applied during execution. All values are clamped to their
/// documented ranges before use (see [`EngineBounds::clamped`]).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct EngineBounds {
    /// Result row budget; clamped to [1, 5000].
    pub top_n: usize,
    /// Distinct groups kept by `groupBy`; clamped to [1, 10000].
    pub max_groups: usize,
    /// Join index and output row budget; clamped to [1, 100000].
    pub max_join_rows: usize,
    /// Matches taken per left row; clamped to [1, 1000].
    pub max_join_matches_per_left: usize,
    /// Result column budget; clamped to [1, 256].
    pub max_columns: usize,
    /// Absolute result row ceiling; clamped to [1, 10000].
    pub max_result_rows: usize,
}

impl Default for EngineBounds {
    fn default() -> Self {
        Self {
            top_n: 50,
            max_groups: 500,
            max_join_rows: 5000,
            max_join_matches_per_left: 50,
            max_columns: 64,
            max_result_rows: 1000,
        }
    }
}

impl EngineBounds {
    /// Clamp every bound into its documented range.
    pub fn clamped(&self) -> Self {
        Self {
            top_n: self.top_n.clamp(1, 5000),
            max_groups: self.max_groups.clamp(1, 10_000),
            max_join_rows: self.max_join_rows.clamp(1, 100_000),
            max_join_matches_per_left: self.max_join_matches_per_left.clamp(1, 1000),
            max_columns: self.max_columns.clamp(1, 256),
            max_result_rows: self.max_result_rows.clamp(1, 10_000),
        }
    }
}

/// Resolver for the right side of a join. Tenancy scoping is the caller's
/// responsibility; the engine only sees what the closure yields.
pub type DatasetResolver<'a> = dyn Fn(&str) -> Option<Arc<Dataset>> + Send + Sync + 'a;

// ---------------------------------------------------------------------------
// Execution
// ---------------------------------------------------------------------------

/// Execute a pipeline over a dataset.
///
/// Steps run in order; afterwards the result is clipped to
/// `min(top_n, max_result_rows)` rows and `max_columns` columns, with one
/// warning per truncation applied.
///
/// # Errors
///
/// Returns [`EngineError::Argument`] for structural violations only; cap
/// breaches are reported through the warning list.
pub fn execute(
    dataset: &Dataset,
    steps: &[PipelineStep],
    bounds: &EngineBounds,
    resolver: &DatasetResolver<'_>,
) -> Result<(Frame, Vec<String>), EngineError> {
    let bounds = bounds.clamped();
    let mut frame = dataset.frame();
    let mut warnings: Vec<String> = Vec::new();

    for step in steps {
        frame = apply_step(frame, step, &bounds, resolver, &mut warnings)?;
    }

    // Final row budget.
    let row_cap = bounds.top_n.min(bounds.max_result_rows);
    if frame.rows.len() > row_cap {
        frame.rows.truncate(row_cap);
        warnings.push(format!("result truncated to {row_cap} rows"));
    }

    // Final column budget.
    if frame.columns.len() > bounds.max_columns {
        frame.columns.truncate(bounds.max_columns);
        for row in &mut frame.rows {
            row.truncate(bounds.max_columns);
        }
        warnings.push(format!(
            "result truncated to {} columns",
            bounds.max_columns
        ));
    }

    Ok((frame, warnings))
}

fn apply_step(
    frame: Frame,
    step: &PipelineStep,
    bounds: &EngineBounds,
    resolver: &DatasetResolver<'_>,
    warnings: &mut Vec<String>,
) -> Result<Frame, EngineError> {
    match step {
        PipelineStep::Filter { column, op, value } => Ok(apply_filter(frame, column, *op, value)),
        PipelineStep::Select { columns } => Ok(apply_select(frame, columns)),
        PipelineStep::GroupBy { by, aggregates } => {
            group::execute_group_by(&frame, by, aggregates, bounds.max_groups, warnings)
        }
        PipelineStep::Sort { column, direction } => Ok(apply_sort(frame, column, *direction)),
        PipelineStep::TopN { n } => Ok(apply_top_n(frame, *n)),
        PipelineStep::Join {
            right_dataset_id,
            left_keys,
            right_keys,
            how,
            right_prefix,
            select_right,
        } => {
            let right = resolver(right_dataset_id).ok_or_else(|| {
                EngineError::Argument(format!(
                    "join: right dataset '{right_dataset_id}' not found"
                ))
            })?;
            Ok(join::execute_join(
                frame,
                &right.frame(),
                left_keys,
                right_keys,
                *how,
                right_prefix,
                select_right.as_deref(),
                bounds,
                warnings,
            ))
        }
    }
}

/// Filter on the stringified cell; a missing column makes the step a no-op.
fn apply_filter(mut frame: Frame, column: &str, op: FilterOp, value: &str) -> Frame {
    let Some(idx) = frame.find_column(column) else {
        return frame;
    };
    let needle = value.to_lowercase();
    frame.rows.retain(|row| {
        let cell = row.get(idx).map_or_else(String::new, Cell::canon);
        let haystack = cell.to_lowercase();
        match op {
            FilterOp::Eq => haystack == needle,
            FilterOp::Contains => haystack.contains(&needle),
        }
    });
    frame
}

/// Project requested columns in requested order; unknown names drop
/// silently; when none resolve the frame is returned unchanged.
fn apply_select(frame: Frame, columns: &[String]) -> Frame {
    let resolved: Vec<usize> = columns
        .iter()
        .filter_map(|name| frame.find_column(name))
        .collect();
    if resolved.is_empty() {
        return frame;
    }
    let out_columns = resolved
        .iter()
        .filter_map(|&i| frame.columns.get(i).cloned())
        .collect();
    let out_rows = frame
        .rows
        .iter()
        .map(|row| {
            resolved
                .iter()
                .map(|&i| row.get(i).cloned().unwrap_or(Cell::Null))
                .collect()
        })
        .collect();
    Frame {
        columns: out_columns,
        rows: out_rows,
    }
}

/// Stable sort on the stringified cell, ordinal-ignore-case. The
/// comparison stays stringly even for numeric columns; that matches the
/// upstream query surface and is relied upon by clients.
fn apply_sort(mut frame: Frame, column: &str, direction: SortDirection) -> Frame {
    let Some(idx) = frame.find_column(column) else {
        return frame;
    };
    let mut decorated: Vec<(String, Vec<Cell>)> = frame
        .rows
        .drain(..)
        .map(|row| {
            let key = row
                .get(idx)
                .map_or_else(String::new, Cell::canon)
                .to_lowercase();
            (key, row)
        })
        .collect();
    match direction {
        SortDirection::Asc => decorated.sort_by(|a, b| a.0.cmp(&b.0)),
        SortDirection::Desc => decorated.sort_by(|a, b| b.0.cmp(&a.0)),
    }
    frame.rows = decorated.into_iter().map(|(_, row)| row).collect();
    frame
}

/// Keep the first `clamp(n, 1, 5000)` rows.
fn apply_top_n(mut frame: Frame, n: u32) -> Frame {
    let keep = usize::try_from(n.clamp(1, 5000)).unwrap_or(1);
    frame.rows.truncate(keep);
    frame
}
