#![forbid(unsafe_code)]

//! Drag-and-drop reorder reducer.
//!
//! A drag is captured against the display list but applied to the working
//! list. Between capture and drop the working list may have changed (a split,
//! a merge, a refilter), so a [`DragSpec`] holds row references rather than
//! indices: the unit id plus a composite content key used when the id alone
//! is ambiguous or stale.
//!
//! # Algorithm
//!
//! 1. Resolve dragged rows to working indices: by id when exactly one unit
//!    carries it, otherwise by composite key. Each working index is claimed
//!    at most once.
//! 2. Resolve the target the same way. A target inside the dragged set is
//!    refused.
//! 3. Remove the dragged units (keeping their working-list order), shift the
//!    target index by the number of removed units before it, and insert above
//!    or below it.

use std::collections::BTreeSet;

use crate::filter::DisplayList;
use crate::unit::{Unit, UnitId};

/// Which half of the target row the pointer was over.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DropPosition {
    #[default]
    Above,
    Below,
}

/// Content fingerprint used when ids collide or go stale.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CompositeKey {
    pub brand: String,
    pub product_name: String,
    pub size: String,
    pub formula: String,
    pub split_tag: Option<String>,
    pub quantity: u32,
}

impl CompositeKey {
    #[must_use]
    pub fn of(unit: &Unit) -> Self {
        Self {
            brand: unit.brand.clone(),
            product_name: unit.product_name.clone(),
            size: unit.size.clone(),
            formula: unit.formula.clone(),
            split_tag: unit.split_tag().map(|t| t.to_string()),
            quantity: unit.quantity,
        }
    }
}

/// Reference to a row captured at drag start.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RowRef {
    pub id: UnitId,
    pub key: CompositeKey,
}

impl RowRef {
    #[must_use]
    pub fn of(unit: &Unit) -> Self {
        Self {
            id: unit.id.clone(),
            key: CompositeKey::of(unit),
        }
    }
}

/// A captured drop gesture.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DragSpec {
    pub dragged: Vec<RowRef>,
    pub target: RowRef,
    pub position: DropPosition,
}

/// Errors from capturing or applying a drag.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ReorderError {
    #[error("nothing is being dragged")]
    EmptyDrag,
    #[error("display index {0} is out of range")]
    StaleIndex(usize),
    #[error("drop target is part of the dragged rows")]
    TargetInDragged,
    #[error("drop target {0} is no longer in the list")]
    UnresolvedTarget(UnitId),
    #[error("dragged row {0} is no longer in the list")]
    UnresolvedDragged(UnitId),
}

impl DragSpec {
    /// Capture a drag of display rows `dragged` onto display row `target`.
    /// Duplicate display indices are ignored.
    pub fn capture(
        working: &[Unit],
        display: &DisplayList,
        dragged: &[usize],
        target: usize,
        position: DropPosition,
    ) -> Result<Self, ReorderError> {
        let unit_at = |display_index: usize| {
            display
                .get(display_index)
                .and_then(|row| working.get(row.working_index))
                .ok_or(ReorderError::StaleIndex(display_index))
        };
        let distinct: BTreeSet<usize> = dragged.iter().copied().collect();
        if distinct.is_empty() {
            return Err(ReorderError::EmptyDrag);
        }
        if distinct.contains(&target) {
            return Err(ReorderError::TargetInDragged);
        }
        let dragged = distinct
            .into_iter()
            .map(|i| unit_at(i).map(RowRef::of))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self {
            dragged,
            target: RowRef::of(unit_at(target)?),
            position,
        })
    }
}

/// Result of a successful reorder.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReorderOutcome {
    /// Ids of the moved units, in their new working-list order.
    pub moved: Vec<UnitId>,
    /// Working index of the first moved unit.
    pub inserted_at: usize,
}

/// Apply `spec` to `working`.
pub fn reorder(working: &mut Vec<Unit>, spec: &DragSpec) -> Result<ReorderOutcome, ReorderError> {
    if spec.dragged.is_empty() {
        return Err(ReorderError::EmptyDrag);
    }
    let mut claimed = BTreeSet::new();
    for row in &spec.dragged {
        let index =
            resolve(working, row, &claimed).ok_or_else(|| ReorderError::UnresolvedDragged(row.id.clone()))?;
        claimed.insert(index);
    }
    let target = match resolve(working, &spec.target, &BTreeSet::new()) {
        Some(index) if claimed.contains(&index) => return Err(ReorderError::TargetInDragged),
        Some(index) => index,
        None => return Err(ReorderError::UnresolvedTarget(spec.target.id.clone())),
    };

    let mut moved_units = Vec::with_capacity(claimed.len());
    for &index in claimed.iter().rev() {
        moved_units.push(working.remove(index));
    }
    moved_units.reverse();

    let shifted = target - claimed.range(..target).count();
    let inserted_at = match spec.position {
        DropPosition::Above => shifted,
        DropPosition::Below => shifted + 1,
    };
    let moved: Vec<UnitId> = moved_units.iter().map(|u| u.id.clone()).collect();
    working.splice(inserted_at..inserted_at, moved_units);

    tracing::debug!(
        target: "packplan.reorder",
        moved = moved.len(),
        from_first = claimed.first().copied(),
        inserted_at,
        position = ?spec.position,
        "reordered units"
    );
    Ok(ReorderOutcome { moved, inserted_at })
}

fn resolve(working: &[Unit], row: &RowRef, claimed: &BTreeSet<usize>) -> Option<usize> {
    let by_id: Vec<usize> = working
        .iter()
        .enumerate()
        .filter(|(i, u)| u.id == row.id && !claimed.contains(i))
        .map(|(i, _)| i)
        .collect();
    if let [only] = by_id.as_slice() {
        return Some(*only);
    }
    let same_key = |i: &usize| CompositeKey::of(&working[*i]) == row.key;
    // Ambiguous id: narrow by content first, then search the whole list.
    by_id.iter().copied().find(same_key).or_else(|| {
        (0..working.len())
            .filter(|i| !claimed.contains(i))
            .find(same_key)
    })
}

/// Display indices of `ids` in `display`, for re-selecting moved rows.
#[must_use]
pub fn display_indices_of(working: &[Unit], display: &DisplayList, ids: &[UnitId]) -> Vec<usize> {
    display
        .rows()
        .iter()
        .enumerate()
        .filter(|(_, row)| {
            working
                .get(row.working_index)
                .is_some_and(|u| ids.contains(&u.id))
        })
        .map(|(i, _)| i)
        .collect()
}
