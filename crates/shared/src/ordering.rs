//! Position arithmetic for ordered siblings (tasks in a list, lists in a board).
//!
//! Siblings are ordered by `position`, ties broken by the lower id. New
//! positions are midpoints between neighbours, so an insert or move writes one
//! row instead of renumbering the container. When two neighbours are so close
//! that no `f64` fits between them `resolve` reports `NeedsRenumber`; the
//! caller compacts the container with `renumber` and resolves again.

use std::cmp::Ordering;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::domain::{List, ListId, Task, TaskId};

/// Distance between consecutive positions at the ends of a container and
/// after `renumber`.
pub const POSITION_STEP: f64 = 1.0;

/// Gaps narrower than this are reported by `needs_renumber`.
pub const MIN_GAP: f64 = 1e-9;

pub trait Ordered {
    type Id: Copy + Eq + Ord;

    fn position(&self) -> f64;
    fn order_id(&self) -> Self::Id;
}

impl Ordered for Task {
    type Id = TaskId;

    fn position(&self) -> f64 {
        self.position
    }

    fn order_id(&self) -> TaskId {
        self.id
    }
}

impl Ordered for List {
    type Id = ListId;

    fn position(&self) -> f64 {
        self.position
    }

    fn order_id(&self) -> ListId {
        self.id
    }
}

/// Where a created or moved item should land among its new siblings.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Placement<Id> {
    Start,
    End,
    /// Index among the destination siblings, not counting the moving item.
    Index(usize),
    After(Id),
    Before(Id),
    Exact(f64),
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PlacementError {
    #[error("anchor is not among the destination siblings")]
    UnknownAnchor,
    #[error("position must be a finite number")]
    NonFinite,
    #[error("neighbouring positions have collapsed; renumber the container")]
    NeedsRenumber,
}

pub fn compare<T: Ordered>(a: &T, b: &T) -> Ordering {
    a.position()
        .total_cmp(&b.position())
        .then_with(|| a.order_id().cmp(&b.order_id()))
}

pub fn sort_siblings<T: Ordered>(items: &mut [T]) {
    items.sort_by(compare);
}

pub fn start_position<T: Ordered>(siblings: &[T]) -> f64 {
    siblings
        .iter()
        .map(Ordered::position)
        .min_by(f64::total_cmp)
        .map_or(0.0, |first| first - POSITION_STEP)
}

pub fn end_position<T: Ordered>(siblings: &[T]) -> f64 {
    siblings
        .iter()
        .map(Ordered::position)
        .max_by(f64::total_cmp)
        .map_or(0.0, |last| last + POSITION_STEP)
}

/// Midpoint strictly between `lo` and `hi`, if one is representable.
pub fn position_between(lo: f64, hi: f64) -> Option<f64> {
    let mid = lo + (hi - lo) / 2.0;
    (mid > lo && mid < hi).then_some(mid)
}

/// Computes the position `moving` (or a new item when `None`) should take.
pub fn resolve<T: Ordered>(
    siblings: &[T],
    moving: Option<T::Id>,
    placement: Placement<T::Id>,
) -> Result<f64, PlacementError> {
    let mut slots: Vec<(f64, T::Id)> = siblings
        .iter()
        .filter(|item| Some(item.order_id()) != moving)
        .map(|item| (item.position(), item.order_id()))
        .collect();
    slots.sort_by(|a, b| a.0.total_cmp(&b.0).then_with(|| a.1.cmp(&b.1)));

    let slot_index = |id: T::Id| {
        slots
            .iter()
            .position(|(_, sibling)| *sibling == id)
            .ok_or(PlacementError::UnknownAnchor)
    };

    let insert_at = match placement {
        Placement::Exact(position) => {
            return if position.is_finite() {
                Ok(position)
            } else {
                Err(PlacementError::NonFinite)
            };
        }
        Placement::Start => 0,
        Placement::End => slots.len(),
        Placement::Index(index) => index.min(slots.len()),
        Placement::After(anchor) => slot_index(anchor)? + 1,
        Placement::Before(anchor) => slot_index(anchor)?,
    };

    let position = match (
        insert_at.checked_sub(1).and_then(|i| slots.get(i)),
        slots.get(insert_at),
    ) {
        (None, None) => Some(0.0),
        (None, Some((next, _))) => Some(next - POSITION_STEP).filter(|p| p < next),
        (Some((prev, _)), None) => Some(prev + POSITION_STEP).filter(|p| p > prev),
        (Some((prev, _)), Some((next, _))) => position_between(*prev, *next),
    };
    position.ok_or(PlacementError::NeedsRenumber)
}

/// Evenly spaced positions for `siblings` in their current order.
pub fn renumber<T: Ordered>(siblings: &[T]) -> Vec<(T::Id, f64)> {
    let mut ordered: Vec<&T> = siblings.iter().collect();
    ordered.sort_by(|a, b| compare(*a, *b));
    ordered
        .into_iter()
        .enumerate()
        .map(|(index, item)| (item.order_id(), index as f64 * POSITION_STEP))
        .collect()
}

/// True when some neighbours share a position or sit closer than `MIN_GAP`.
pub fn needs_renumber<T: Ordered>(siblings: &[T]) -> bool {
    let mut positions: Vec<f64> = siblings.iter().map(Ordered::position).collect();
    positions.sort_by(f64::total_cmp);
    positions.windows(2).any(|pair| pair[1] - pair[0] < MIN_GAP)
}

#[cfg(test)]
#[path = "tests/ordering_tests.rs"]
mod tests;
