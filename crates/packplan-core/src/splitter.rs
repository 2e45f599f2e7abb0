#![forbid(unsafe_code)]

//! Batch splitting and merging.
//!
//! # State machine
//!
//! ```text
//!   Whole ──split──► {Split 1/n … Split n/n} ──undo_split / undo_all_splits──► Whole
//!                          │      ▲
//!                          └split─┘   (re-splitting a batch grows n)
//! ```
//!
//! # Invariants
//!
//! - A split replaces one unit, in place, with two batches whose quantities
//!   sum to the unit's quantity.
//! - Batches share `original_id` (the root of the family, never a batch id).
//! - After every split, each batch sharing an `original_id` carries a tag
//!   `k/n` where `n` is the current family size and `k` follows working-list
//!   order.
//! - Batch ids `<original_id>_split_<n>` are monotonic per original id and
//!   never reused, even after the family is merged and split again.
//! - Merging sums quantities and volumes of the whole stable family and puts
//!   the merged unit where the first member was.
//!
//! Rejected requests leave the list untouched.

use ahash::AHashMap;

use crate::identity::{StableId, base_identity};
use crate::step::{StepRules, round_to_step};
use crate::unit::{Lineage, SplitTag, Unit, UnitId};

/// Errors from split and merge requests.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SplitError {
    /// No unit with this id is in the working list.
    #[error("unit {0} not found")]
    UnitNotFound(UnitId),
    /// The unit is not larger than one increment and cannot be split.
    #[error("unit quantity {quantity} is not larger than the split step {step}")]
    TooSmall { quantity: u32, step: u32 },
    /// The (rounded) first batch quantity is outside `[min, max]`.
    #[error("first batch quantity {rounded} (requested {requested}) outside [{min}, {max}]")]
    OutOfRange {
        requested: u32,
        rounded: u32,
        min: u32,
        max: u32,
    },
    /// The unit has no split batches to merge.
    #[error("unit {0} is not part of a split family")]
    NotSplit(UnitId),
}

/// Result of a successful split.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SplitOutcome {
    /// Working-list index of the first new batch; the second follows it.
    pub index: usize,
    /// Ids of the two new batches.
    pub first_id: UnitId,
    pub second_id: UnitId,
    /// Family root shared by all batches.
    pub original_id: UnitId,
    /// Family size after the split.
    pub family_size: u32,
}

/// Result of a successful merge.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MergeOutcome {
    /// Working-list index of the merged unit.
    pub index: usize,
    /// Id of the merged unit.
    pub merged_id: UnitId,
    /// Number of units folded into the merged unit.
    pub absorbed: usize,
    /// Total quantity of the merged unit.
    pub quantity: u32,
}

/// Batches sharing one `original_id`, in working-list order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SplitFamily {
    pub original_id: UnitId,
    pub base: StableId,
    pub members: Vec<usize>,
}

/// Splits and merges units in a working list.
///
/// Holds the per-family high-water mark of issued batch indices so ids are
/// never reused within an engine session.
#[derive(Debug, Clone, Default)]
pub struct BatchSplitter {
    rules: StepRules,
    high_water: AHashMap<UnitId, u32>,
}

impl BatchSplitter {
    /// Create a splitter with the given size-class rules.
    #[must_use]
    pub fn new(rules: StepRules) -> Self {
        Self {
            rules,
            high_water: AHashMap::new(),
        }
    }

    /// Size-class rules in use.
    #[must_use]
    pub fn rules(&self) -> &StepRules {
        &self.rules
    }

    /// Split increment for a unit.
    #[must_use]
    pub fn step_for(&self, unit: &Unit) -> u32 {
        self.rules.step_for(&unit.size)
    }

    /// Record batch indices already present in `list`.
    pub fn observe(&mut self, list: &[Unit]) {
        for unit in list {
            if let Some(original) = unit.original_id()
                && let Some(index) = unit.id.split_index_for(original)
            {
                let mark = self.high_water.entry(original.clone()).or_insert(0);
                *mark = (*mark).max(index);
            }
        }
    }

    /// Forget issued indices (new shipment).
    pub fn reset(&mut self) {
        self.high_water.clear();
    }

    /// Round `requested` to the unit's step and check it leaves at least one
    /// step on each side. Returns the rounded first-batch quantity.
    pub fn validate(&self, unit: &Unit, requested: u32) -> Result<u32, SplitError> {
        let step = self.step_for(unit);
        if unit.quantity <= step {
            return Err(SplitError::TooSmall {
                quantity: unit.quantity,
                step,
            });
        }
        let rounded = round_to_step(requested, step);
        let max = unit.quantity - step;
        if rounded < step || rounded > max {
            return Err(SplitError::OutOfRange {
                requested,
                rounded,
                min: step,
                max,
            });
        }
        Ok(rounded)
    }

    /// Replace the unit `id` with two batches, the first holding
    /// `requested` (rounded to step) units.
    pub fn split(
        &mut self,
        list: &mut Vec<Unit>,
        id: &UnitId,
        requested: u32,
    ) -> Result<SplitOutcome, SplitError> {
        let index = position_of(list, id)?;
        let first_qty = self.validate(&list[index], requested)?;

        let unit = list.remove(index);
        let original_id = unit.family_root().clone();
        let next = self.next_index(list, &original_id);
        let first_id = UnitId::split_child(&original_id, next);
        let second_id = UnitId::split_child(&original_id, next + 1);
        self.high_water.insert(original_id.clone(), next + 1);

        let second_qty = unit.quantity - first_qty;
        let first_volume = if unit.quantity == 0 {
            0.0
        } else {
            unit.volume * f64::from(first_qty) / f64::from(unit.quantity)
        };
        // Placeholder tags; rewritten by retag_family below.
        let placeholder = Lineage::SplitChild {
            original_id: original_id.clone(),
            tag: PLACEHOLDER_TAG,
        };
        let first = Unit {
            id: first_id.clone(),
            quantity: first_qty,
            volume: first_volume,
            lineage: placeholder.clone(),
            ..unit.clone()
        };
        let second = Unit {
            id: second_id.clone(),
            quantity: second_qty,
            volume: unit.volume - first_volume,
            lineage: placeholder,
            ..unit
        };
        list.insert(index, second);
        list.insert(index, first);

        let family_size = retag_family(list, &original_id);
        tracing::debug!(
            target: "packplan.splitter",
            original_id = %original_id,
            first_id = %first_id,
            second_id = %second_id,
            first_qty,
            second_qty,
            family_size,
            "split unit"
        );
        Ok(SplitOutcome {
            index,
            first_id,
            second_id,
            original_id,
            family_size,
        })
    }

    /// Merge the split family of batch `id` back into one whole unit.
    pub fn undo_split(&mut self, list: &mut Vec<Unit>, id: &UnitId) -> Result<MergeOutcome, SplitError> {
        let index = position_of(list, id)?;
        if !list[index].is_split_child() {
            return Err(SplitError::NotSplit(id.clone()));
        }
        merge_family(list, index)
    }

    /// Merge every batch of `id`'s stable family. Accepts a batch or a whole
    /// unit that still has lingering batches.
    pub fn undo_all_splits(
        &mut self,
        list: &mut Vec<Unit>,
        id: &UnitId,
    ) -> Result<MergeOutcome, SplitError> {
        let index = position_of(list, id)?;
        if family_indices(list, index).len() < 2 && !list[index].is_split_child() {
            return Err(SplitError::NotSplit(id.clone()));
        }
        merge_family(list, index)
    }

    fn next_index(&self, list: &[Unit], original_id: &UnitId) -> u32 {
        let seen = list
            .iter()
            .filter(|u| u.original_id() == Some(original_id))
            .filter_map(|u| u.id.split_index_for(original_id))
            .max()
            .unwrap_or(0);
        let issued = self.high_water.get(original_id).copied().unwrap_or(0);
        seen.max(issued) + 1
    }
}

const PLACEHOLDER_TAG: SplitTag = match SplitTag::new(1, 1) {
    Some(tag) => tag,
    None => panic!("1/1 is a valid split tag"),
};

fn position_of(list: &[Unit], id: &UnitId) -> Result<usize, SplitError> {
    list.iter()
        .position(|u| &u.id == id)
        .ok_or_else(|| SplitError::UnitNotFound(id.clone()))
}

/// Rewrite the tags of every batch sharing `original_id` so they read
/// `1/n … n/n` in working-list order. Returns `n`.
pub fn retag_family(list: &mut [Unit], original_id: &UnitId) -> u32 {
    let total = list
        .iter()
        .filter(|u| u.original_id() == Some(original_id))
        .count() as u32;
    let mut ordinal = 0;
    for unit in list.iter_mut() {
        if let Lineage::SplitChild {
            original_id: family,
            tag,
        } = &mut unit.lineage
            && family == original_id
        {
            ordinal += 1;
            if let Some(next) = SplitTag::new(ordinal, total) {
                *tag = next;
            }
        }
    }
    total
}

/// Working-list indices of the stable family of the unit at `index`: the
/// unit itself plus every split batch with the same base stable id.
///
/// Families of distinct units that share a stable id are one stable family
/// here; merging folds them together under the first member's root id.
#[must_use]
pub fn family_indices(list: &[Unit], index: usize) -> Vec<usize> {
    let Some(target) = list.get(index) else {
        return Vec::new();
    };
    let base = base_identity(target);
    list.iter()
        .enumerate()
        .filter(|(i, u)| *i == index || (u.is_split_child() && base_identity(u) == base))
        .map(|(i, _)| i)
        .collect()
}

fn merge_family(list: &mut Vec<Unit>, index: usize) -> Result<MergeOutcome, SplitError> {
    let members = family_indices(list, index);
    let Some(&first) = members.first() else {
        return Err(SplitError::UnitNotFound(list[index].id.clone()));
    };

    let quantity = members
        .iter()
        .fold(0_u32, |acc, &i| acc.saturating_add(list[i].quantity));
    let volume: f64 = members.iter().map(|&i| list[i].volume).sum();
    let template = &list[first];
    let merged = Unit {
        id: template.family_root().clone(),
        quantity,
        volume,
        lineage: Lineage::Whole,
        ..template.clone()
    };
    let merged_id = merged.id.clone();

    for &i in members.iter().rev() {
        list.remove(i);
    }
    list.insert(first, merged);

    tracing::debug!(
        target: "packplan.splitter",
        merged_id = %merged_id,
        absorbed = members.len(),
        quantity,
        "merged split family"
    );
    Ok(MergeOutcome {
        index: first,
        merged_id,
        absorbed: members.len(),
        quantity,
    })
}

/// Whether the split action should be offered on the unit at `index`.
///
/// Only the family member with the highest quantity (first in list order on
/// ties) gets the affordance. This is a presentation rule; nothing else
/// depends on it.
#[must_use]
pub fn is_split_entry_point(list: &[Unit], index: usize) -> bool {
    let members = family_indices(list, index);
    let best = members
        .iter()
        .copied()
        .reduce(|best, i| if list[i].quantity > list[best].quantity { i } else { best });
    best == Some(index)
}

/// Group split batches by `original_id`, families ordered by first
/// appearance in the working list.
#[must_use]
pub fn split_families(list: &[Unit]) -> Vec<SplitFamily> {
    let mut families: Vec<SplitFamily> = Vec::new();
    let mut slot: AHashMap<&UnitId, usize> = AHashMap::new();
    for (i, unit) in list.iter().enumerate() {
        let Some(original) = unit.original_id() else {
            continue;
        };
        match slot.get(original) {
            Some(&f) => families[f].members.push(i),
            None => {
                slot.insert(original, families.len());
                families.push(SplitFamily {
                    original_id: original.clone(),
                    base: base_identity(unit),
                    members: vec![i],
                });
            }
        }
    }
    families
}
