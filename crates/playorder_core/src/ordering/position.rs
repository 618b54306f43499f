//! Integer position computation.
//!
//! # Responsibility
//! - Compute a collision-free position between two neighbors.
//! - Detect when two neighbors have no integer left between them.
//! - Produce renumbered and bulk-insert position sequences.
//!
//! # Invariants
//! - A computed position is strictly between `left` and `right` when both
//!   are present.
//! - Arithmetic never overflows; exhaustion is reported, not wrapped.

use crate::model::member::Position;
use std::fmt::{Display, Formatter};

/// Default spacing between consecutive positions.
pub const STEP: i64 = 1000;

/// No usable integer exists between the resolved neighbors.
///
/// Internal control signal: the engine recovers by renumbering the
/// collection and retrying exactly once.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NeedsRenumber {
    pub left: Option<Position>,
    pub right: Option<Position>,
}

impl Display for NeedsRenumber {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "no free position between {} and {}",
            fmt_bound(self.left),
            fmt_bound(self.right)
        )
    }
}

fn fmt_bound(value: Option<Position>) -> String {
    value.map_or_else(|| "none".to_string(), |value| value.to_string())
}

/// Computes the position for a new or moved member.
///
/// `left` is the position that must sort before the result and `right` the
/// one that must sort after it. Absent bounds mean the collection ends there.
///
/// # Errors
/// - [`NeedsRenumber`] when `left` and `right` are adjacent integers, or when
///   stepping past an end would overflow `i64`.
pub fn compute_position(
    left: Option<Position>,
    right: Option<Position>,
    step: i64,
) -> Result<Position, NeedsRenumber> {
    let exhausted = NeedsRenumber { left, right };
    match (left, right) {
        (Some(left), Some(right)) => {
            let mid = floor_midpoint(left, right);
            if mid == left || mid == right {
                return Err(exhausted);
            }
            Ok(mid)
        }
        (Some(left), None) => left.checked_add(step).ok_or(exhausted),
        (None, Some(right)) => right.checked_sub(step).ok_or(exhausted),
        (None, None) => Ok(step),
    }
}

/// `floor((left + right) / 2)` without intermediate overflow.
pub fn floor_midpoint(left: Position, right: Position) -> Position {
    let sum = i128::from(left) + i128::from(right);
    // The floored mean of two i64 values always fits back into i64.
    sum.div_euclid(2) as Position
}

/// Positions assigned by a full renumber: `step, 2*step, ...`.
///
/// Returns `None` if the last position would overflow.
pub fn renumbered_positions(count: usize, step: i64) -> Option<Vec<Position>> {
    let mut positions = Vec::with_capacity(count);
    let mut cursor: Position = 0;
    for _ in 0..count {
        cursor = cursor.checked_add(step)?;
        positions.push(cursor);
    }
    Some(positions)
}

/// Cursor sequence for a bulk append after `max_position`.
///
/// Starts at `max_position` (or 0 for an empty collection) and yields
/// `count` positions spaced by `step`.
pub fn tail_positions(
    max_position: Option<Position>,
    count: usize,
    step: i64,
) -> Option<Vec<Position>> {
    let mut cursor = max_position.unwrap_or(0);
    let mut positions = Vec::with_capacity(count);
    for _ in 0..count {
        cursor = cursor.checked_add(step)?;
        positions.push(cursor);
    }
    Some(positions)
}

/// Cursor sequence for a bulk prepend before `min_position`.
///
/// The first yielded position is closest to the previous head; each further
/// one is `step` lower.
pub fn head_positions(
    min_position: Option<Position>,
    count: usize,
    step: i64,
) -> Option<Vec<Position>> {
    let mut cursor = min_position.unwrap_or(step);
    let mut positions = Vec::with_capacity(count);
    for _ in 0..count {
        cursor = cursor.checked_sub(step)?;
        positions.push(cursor);
    }
    Some(positions)
}
