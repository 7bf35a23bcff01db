//! Hash-join execution over two frames.
//!
//! The right side is indexed into `composite key → row indexes` over at
//! most `min(right rows, max_join_rows)` rows. Per-left-row matches and
//! total output rows are capped; every cap breach surfaces as its own
//! warning. Missing key columns skip the step instead of failing it.

use std::collections::HashMap;

use super::dataset::{Cell, ColumnDef, Frame};
use super::plan::JoinKind;
use super::{EngineBounds, GROUP_KEY_SEPARATOR};

/// Execute a join step. Returns the joined frame, or the left frame
/// unchanged when key columns are missing.
#[allow(clippy::too_many_arguments)]
pub fn execute_join(
    left: Frame,
    right: &Frame,
    left_keys: &[String],
    right_keys: &[String],
    how: JoinKind,
    right_prefix: &str,
    select_right: Option<&[String]>,
    bounds: &EngineBounds,
    warnings: &mut Vec<String>,
) -> Frame {
    // Resolve key columns on both sides; any miss skips the join.
    let left_idx = match resolve_keys(&left, left_keys) {
        Ok(idx) => idx,
        Err(name) => {
            warnings.push(format!("join skipped: left key column '{name}' missing"));
            return left;
        }
    };
    let right_idx = match resolve_keys(right, right_keys) {
        Ok(idx) => idx,
        Err(name) => {
            warnings.push(format!("join skipped: right key column '{name}' missing"));
            return left;
        }
    };

    // Columns carried from the right side.
    let carried: Vec<usize> = match select_right {
        Some(requested) => right
            .columns
            .iter()
            .enumerate()
            .filter(|(_, col)| requested.iter().any(|r| r.eq_ignore_ascii_case(&col.name)))
            .map(|(i, _)| i)
            .collect(),
        None => (0..right.columns.len()).collect(),
    };

    // Output schema: left columns, then prefixed right columns with
    // case-insensitive collision renaming (_2, _3, …).
    let mut columns = left.columns.clone();
    let mut collided = false;
    for &idx in &carried {
        let Some(col) = right.columns.get(idx) else {
            continue;
        };
        let base = format!("{right_prefix}{}", col.name);
        let mut name = base.clone();
        let mut suffix: u32 = 2;
        while columns.iter().any(|c| c.name.eq_ignore_ascii_case(&name)) {
            collided = true;
            name = format!("{base}_{suffix}");
            suffix = suffix.saturating_add(1);
        }
        columns.push(ColumnDef {
            name,
            data_type: col.data_type,
            display_name: col.display_name.clone(),
        });
    }
    if collided {
        warnings.push("join: right column names collided with left; renamed".to_owned());
    }

    // Index the right side, bounded.
    let indexed = right.rows.len().min(bounds.max_join_rows);
    if right.rows.len() > indexed {
        warnings.push(format!(
            "join: right side truncated to {indexed} rows for indexing"
        ));
    }
    let mut index: HashMap<String, Vec<usize>> = HashMap::new();
    for (row_idx, row) in right.rows.iter().take(indexed).enumerate() {
        let key = composite_key(row, &right_idx);
        index.entry(key).or_default().push(row_idx);
    }

    let mut rows: Vec<Vec<Cell>> = Vec::new();
    let mut matches_capped = false;
    let mut output_capped = false;

    'outer: for row in &left.rows {
        let key = composite_key(row, &left_idx);
        match index.get(&key) {
            Some(matched) => {
                if matched.len() > bounds.max_join_matches_per_left {
                    matches_capped = true;
                }
                for &right_row_idx in matched.iter().take(bounds.max_join_matches_per_left) {
                    if rows.len() >= bounds.max_join_rows {
                        output_capped = true;
                        break 'outer;
                    }
                    let mut out = row.clone();
                    if let Some(right_row) = right.rows.get(right_row_idx) {
                        for &idx in &carried {
                            out.push(right_row.get(idx).cloned().unwrap_or(Cell::Null));
                        }
                    }
                    rows.push(out);
                }
            }
            None if how == JoinKind::Left => {
                if rows.len() >= bounds.max_join_rows {
                    output_capped = true;
                    break;
                }
                let mut out = row.clone();
                out.extend(std::iter::repeat_with(|| Cell::Null).take(carried.len()));
                rows.push(out);
            }
            None => {}
        }
    }

    if matches_capped {
        warnings.push(format!(
            "join: matches per left row capped at {}",
            bounds.max_join_matches_per_left
        ));
    }
    if output_capped {
        warnings.push(format!(
            "join: output capped at {} rows",
            bounds.max_join_rows
        ));
    }

    Frame { columns, rows }
}

fn resolve_keys(frame: &Frame, keys: &[String]) -> Result<Vec<usize>, String> {
    keys.iter()
        .map(|name| frame.find_column(name).ok_or_else(|| name.clone()))
        .collect()
}

/// Composite key built exactly like group keys.
fn composite_key(row: &[Cell], idx: &[usize]) -> String {
    idx.iter()
        .map(|&i| row.get(i).map_or_else(String::new, Cell::canon))
        .collect::<Vec<_>>()
        .join(GROUP_KEY_SEPARATOR)
}
