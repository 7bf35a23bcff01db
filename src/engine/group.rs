//! `groupBy` execution: grouped accumulation with a hard group cap.
//!
//! Group keys are the ordered tuple of stringified `by` values joined with
//! an ASCII unit separator, which cannot collide with printable cell
//! content. Insertion order of first occurrence is preserved in the output.

use std::collections::HashMap;

use rust_decimal::Decimal;

use super::coerce;
use super::dataset::{Cell, ColumnDef, ColumnType, Frame};
use super::plan::{AggOp, Aggregate};
use super::{EngineError, GROUP_KEY_SEPARATOR};

// ---------------------------------------------------------------------------
// Accumulators
// ---------------------------------------------------------------------------

/// Numeric accumulator; decimal sources keep exact decimal state, all
/// others run on doubles.
#[derive(Debug, Clone)]
enum Acc {
    Double {
        sum: f64,
        min: Option<f64>,
        max: Option<f64>,
        count: u64,
    },
    Decimal {
        sum: Decimal,
        min: Option<Decimal>,
        max: Option<Decimal>,
        count: u64,
    },
}

impl Acc {
    fn new(decimal: bool) -> Self {
        if decimal {
            Self::Decimal {
                sum: Decimal::ZERO,
                min: None,
                max: None,
                count: 0,
            }
        } else {
            Self::Double {
                sum: 0.0,
                min: None,
                max: None,
                count: 0,
            }
        }
    }

    /// Fold one source cell in. Unparseable cells are skipped.
    fn push(&mut self, cell: &Cell) {
        match self {
            Self::Double {
                sum,
                min,
                max,
                count,
            } => {
                if let Some(v) = coerce::to_f64(cell) {
                    *sum += v;
                    *min = Some(min.map_or(v, |m| m.min(v)));
                    *max = Some(max.map_or(v, |m| m.max(v)));
                    *count = count.saturating_add(1);
                }
            }
            Self::Decimal {
                sum,
                min,
                max,
                count,
            } => {
                if let Some(v) = coerce::to_decimal(cell) {
                    *sum = sum.saturating_add(v);
                    *min = Some(min.map_or(v, |m| m.min(v)));
                    *max = Some(max.map_or(v, |m| m.max(v)));
                    *count = count.saturating_add(1);
                }
            }
        }
    }

    /// Produce the result cell for `op`. `rows` is the group row counter
    /// used by `count`. Empty accumulators yield 0.
    fn finish(&self, op: AggOp, rows: u64) -> Cell {
        match op {
            AggOp::Count => Cell::F64(u64_to_f64(rows)),
            AggOp::Sum => match self {
                Self::Double { sum, .. } => Cell::F64(*sum),
                Self::Decimal { sum, .. } => Cell::Decimal(*sum),
            },
            AggOp::Avg => match self {
                Self::Double { sum, count, .. } => {
                    if *count == 0 {
                        Cell::F64(0.0)
                    } else {
                        Cell::F64(*sum / u64_to_f64(*count))
                    }
                }
                Self::Decimal { sum, count, .. } => {
                    if *count == 0 {
                        Cell::Decimal(Decimal::ZERO)
                    } else {
                        let divisor = Decimal::from(*count);
                        Cell::Decimal(sum.checked_div(divisor).unwrap_or(Decimal::ZERO))
                    }
                }
            },
            AggOp::Min => match self {
                Self::Double { min, .. } => Cell::F64(min.unwrap_or(0.0)),
                Self::Decimal { min, .. } => Cell::Decimal(min.unwrap_or(Decimal::ZERO)),
            },
            AggOp::Max => match self {
                Self::Double { max, .. } => Cell::F64(max.unwrap_or(0.0)),
                Self::Decimal { max, .. } => Cell::Decimal(max.unwrap_or(Decimal::ZERO)),
            },
        }
    }
}

#[allow(clippy::cast_precision_loss)]
fn u64_to_f64(v: u64) -> f64 {
    v as f64
}

struct Group {
    key_cells: Vec<Cell>,
    rows: u64,
    accs: Vec<Acc>,
}

// ---------------------------------------------------------------------------
// Execution
// ---------------------------------------------------------------------------

/// Execute a `groupBy` step over `frame`.
///
/// # Errors
///
/// Returns [`EngineError::Argument`] when a `by` column or an aggregate's
/// source column does not exist. The group cap is a warning, not an error.
pub fn execute_group_by(
    frame: &Frame,
    by: &[String],
    aggregates: &[Aggregate],
    max_groups: usize,
    warnings: &mut Vec<String>,
) -> Result<Frame, EngineError> {
    let by_idx: Vec<usize> = by
        .iter()
        .map(|name| {
            frame.find_column(name).ok_or_else(|| {
                EngineError::Argument(format!("groupBy: column '{name}' does not exist"))
            })
        })
        .collect::<Result<_, _>>()?;

    // (source index, decimal?) per aggregate; count has no source.
    let agg_src: Vec<Option<(usize, bool)>> = aggregates
        .iter()
        .map(|agg| match &agg.column {
            None => Ok(None),
            Some(name) => {
                let idx = frame.find_column(name).ok_or_else(|| {
                    EngineError::Argument(format!(
                        "groupBy: aggregate column '{name}' does not exist"
                    ))
                })?;
                let decimal = frame
                    .columns
                    .get(idx)
                    .is_some_and(|c| c.data_type == ColumnType::Decimal);
                Ok(Some((idx, decimal)))
            }
        })
        .collect::<Result<_, _>>()?;

    let mut order: Vec<Group> = Vec::new();
    let mut index: HashMap<String, usize> = HashMap::new();
    let mut dropped = false;

    for row in &frame.rows {
        let key = by_idx
            .iter()
            .map(|&i| row.get(i).map_or_else(String::new, Cell::canon))
            .collect::<Vec<_>>()
            .join(GROUP_KEY_SEPARATOR);

        let slot = match index.get(&key) {
            Some(&slot) => slot,
            None => {
                if order.len() >= max_groups {
                    dropped = true;
                    continue;
                }
                let group = Group {
                    key_cells: by_idx
                        .iter()
                        .map(|&i| row.get(i).cloned().unwrap_or(Cell::Null))
                        .collect(),
                    rows: 0,
                    accs: agg_src
                        .iter()
                        .map(|src| Acc::new(src.is_some_and(|(_, dec)| dec)))
                        .collect(),
                };
                order.push(group);
                let slot = order.len().saturating_sub(1);
                index.insert(key, slot);
                slot
            }
        };

        if let Some(group) = order.get_mut(slot) {
            group.rows = group.rows.saturating_add(1);
            for (acc, src) in group.accs.iter_mut().zip(&agg_src) {
                if let Some((idx, _)) = src {
                    if let Some(cell) = row.get(*idx) {
                        acc.push(cell);
                    }
                }
            }
        }
    }

    if dropped {
        warnings.push(format!(
            "groupBy: group cap of {max_groups} reached; additional groups dropped"
        ));
    }

    // Output schema: by columns first, then one column per aggregate.
    let mut columns: Vec<ColumnDef> = by_idx
        .iter()
        .filter_map(|&i| frame.columns.get(i).cloned())
        .collect();
    for (agg, src) in aggregates.iter().zip(&agg_src) {
        let decimal = agg.op != AggOp::Count && src.is_some_and(|(_, dec)| dec);
        columns.push(ColumnDef::plain(
            &agg.output,
            if decimal {
                ColumnType::Decimal
            } else {
                ColumnType::Double
            },
        ));
    }

    let rows = order
        .into_iter()
        .map(|group| {
            let mut row = group.key_cells;
            for (agg, acc) in aggregates.iter().zip(&group.accs) {
                row.push(acc.finish(agg.op, group.rows));
            }
            row
        })
        .collect();

    Ok(Frame { columns, rows })
}
