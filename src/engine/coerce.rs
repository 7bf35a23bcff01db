//! Numeric coercion rules for aggregate source cells.
//!
//! Two paths: decimal columns accumulate in [`Decimal`], everything else in
//! `f64`. Both accept the full numeric family plus parseable strings;
//! unparseable or non-numeric cells yield `None` and are skipped by the
//! caller, never raised.

use rust_decimal::prelude::{FromPrimitive, ToPrimitive};
use rust_decimal::Decimal;

use super::dataset::Cell;

/// Coerce a cell for the double accumulator path.
///
/// Accepts double, float, decimal, int and long cells; strings parse with
/// invariant culture. Booleans, datetimes and nulls are not numeric.
pub fn to_f64(cell: &Cell) -> Option<f64> {
    match cell {
        Cell::F64(v) => Some(*v),
        Cell::F32(v) => Some(f64::from(*v)),
        Cell::Decimal(v) => v.to_f64(),
        Cell::I32(v) => Some(f64::from(*v)),
        Cell::I64(v) => {
            #[allow(clippy::cast_precision_loss)]
            Some(*v as f64)
        }
        Cell::Str(s) => s.trim().parse().ok(),
        Cell::Null | Cell::Bool(_) | Cell::Datetime(_) => None,
    }
}

/// Coerce a cell for the decimal accumulator path.
///
/// Accepts decimal, int, long, float and double cells; strings parse with
/// invariant culture. Floats that fall outside the decimal range are
/// dropped rather than clamped.
pub fn to_decimal(cell: &Cell) -> Option<Decimal> {
    match cell {
        Cell::Decimal(v) => Some(*v),
        Cell::I32(v) => Some(Decimal::from(*v)),
        Cell::I64(v) => Some(Decimal::from(*v)),
        Cell::F32(v) => Decimal::from_f32(*v),
        Cell::F64(v) => Decimal::from_f64(*v),
        Cell::Str(s) => s.trim().parse().ok(),
        Cell::Null | Cell::Bool(_) | Cell::Datetime(_) => None,
    }
}
