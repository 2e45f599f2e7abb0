#![forbid(unsafe_code)]

//! Rebuilding a working list from a fresh fetch plus saved records.
//!
//! # Pipeline
//!
//! ```text
//!   fetched units
//!        │ assign_synthetic_ids      blank ids become <shipment>_<index>
//!        ▼
//!   apply_saved_splits               template unit replaced by saved batches
//!        │
//!        ▼
//!   apply_saved_order                saved stable ids first, rest appended
//!        │
//!        ▼
//!   apply_saved_locks                saved ids filtered to present units
//! ```
//!
//! Every stage is total: a saved record that does not fit the fetched data is
//! skipped with a `warn` event on `packplan.reconcile`, never an error. The
//! output always holds every fetched unit (or the batches replacing it)
//! exactly once.

use std::collections::BTreeSet;

use packplan_core::{
    Lineage, LockSet, SplitTag, StableId, Unit, UnitId, base_identity, identify, retag_family,
};

use crate::gateway::{PersistenceGateway, ShipmentId, SplitRecord};

/// Records loaded for a shipment. `None` means nothing usable was saved.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SavedState {
    pub order: Option<Vec<StableId>>,
    pub splits: Option<Vec<SplitRecord>>,
    pub locks: Option<Vec<UnitId>>,
}

impl SavedState {
    /// Read all records of `shipment`. Storage and decode failures are
    /// logged and the affected record is treated as absent.
    pub fn load<G: PersistenceGateway + ?Sized>(gateway: &G, shipment: &ShipmentId) -> Self {
        Self {
            order: or_absent(gateway.load_order(shipment), shipment, "order"),
            splits: or_absent(gateway.load_splits(shipment), shipment, "splits"),
            locks: or_absent(gateway.load_locks(shipment), shipment, "locks"),
        }
    }
}

fn or_absent<T>(
    result: Result<Option<T>, crate::storage::StorageError>,
    shipment: &ShipmentId,
    record: &'static str,
) -> Option<T> {
    result.unwrap_or_else(|err| {
        tracing::warn!(
            target: "packplan.reconcile",
            shipment = %shipment,
            record,
            error = %err,
            "saved record unreadable; treating as absent"
        );
        None
    })
}

/// Counters describing one reconciliation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReconcileReport {
    /// Units returned by the source.
    pub fetched: usize,
    /// Units that received a synthetic id.
    pub synthetic_ids: usize,
    /// Saved split families restored.
    pub splits_applied: usize,
    /// Saved split families that matched nothing or failed validation.
    pub splits_skipped: usize,
    /// Units placed by the saved order.
    pub ordered: usize,
    /// Units absent from the saved order, appended at the end.
    pub appended: usize,
    /// Saved order entries with no matching unit.
    pub unmatched_saved: usize,
    /// Saved locks still pointing at a unit.
    pub locks_restored: usize,
    /// Saved locks dropped because their unit is gone.
    pub locks_pruned: usize,
}

/// Output of [`reconcile`].
#[derive(Debug, Clone, PartialEq)]
pub struct Reconciled {
    pub working: Vec<Unit>,
    pub locks: LockSet,
    pub report: ReconcileReport,
}

/// Run the whole pipeline.
#[must_use]
pub fn reconcile(
    shipment: &ShipmentId,
    mut units: Vec<Unit>,
    saved: &SavedState,
    legacy_id_fallback: bool,
) -> Reconciled {
    let mut report = ReconcileReport {
        fetched: units.len(),
        synthetic_ids: assign_synthetic_ids(&mut units, shipment),
        ..ReconcileReport::default()
    };

    if let Some(splits) = &saved.splits {
        let (applied, skipped) = apply_saved_splits(&mut units, splits);
        report.splits_applied = applied;
        report.splits_skipped = skipped;
    }

    let working = match &saved.order {
        Some(order) => {
            let placed = apply_saved_order(units, order, legacy_id_fallback);
            report.ordered = placed.ordered;
            report.appended = placed.appended;
            report.unmatched_saved = placed.unmatched;
            if placed.appended > 0 || placed.unmatched > 0 {
                tracing::warn!(
                    target: "packplan.reconcile",
                    shipment = %shipment,
                    saved = order.len(),
                    fetched = placed.working.len(),
                    appended = placed.appended,
                    unmatched = placed.unmatched,
                    "saved order does not match fetched units"
                );
            }
            placed.working
        }
        None => units,
    };

    let (locks, pruned) = apply_saved_locks(&working, saved.locks.as_deref().unwrap_or_default());
    report.locks_restored = locks.len();
    report.locks_pruned = pruned;

    Reconciled {
        working,
        locks,
        report,
    }
}

/// Give every unit with a blank id the id `<shipment>_<index>`. Returns how
/// many ids were assigned.
///
/// A synthetic id already carried by a fetched unit gets a `_<k>` suffix
/// (smallest free `k`), so the list never holds the same id twice.
pub fn assign_synthetic_ids(units: &mut [Unit], shipment: &ShipmentId) -> usize {
    let mut taken: BTreeSet<String> = units
        .iter()
        .filter(|u| !u.id.is_blank())
        .map(|u| u.id.as_str().to_owned())
        .collect();
    let mut assigned = 0;
    for (index, unit) in units.iter_mut().enumerate() {
        if !unit.id.is_blank() {
            continue;
        }
        let plain = format!("{shipment}_{index}");
        let mut id = plain.clone();
        let mut suffix = 0_usize;
        while taken.contains(&id) {
            suffix += 1;
            id = format!("{plain}_{suffix}");
        }
        taken.insert(id.clone());
        unit.id = UnitId::new(id);
        assigned += 1;
    }
    if assigned > 0 {
        tracing::debug!(
            target: "packplan.reconcile",
            shipment = %shipment,
            assigned,
            "assigned synthetic unit ids"
        );
    }
    assigned
}

/// Replace matched template units with their saved batches. Returns
/// `(applied, skipped)`.
pub fn apply_saved_splits(units: &mut Vec<Unit>, records: &[SplitRecord]) -> (usize, usize) {
    let mut applied = 0;
    let mut skipped = 0;
    for record in records {
        let Some(template) = find_template(units, record) else {
            tracing::warn!(
                target: "packplan.reconcile",
                product_id = %record.product_id,
                stable_id = record.stable_identifier.as_ref().map(StableId::as_str),
                "saved split matches no fetched unit; skipping"
            );
            skipped += 1;
            continue;
        };

        let root = units[template].family_root().clone();
        let members: Vec<usize> = if units[template].is_split_child() {
            (0..units.len())
                .filter(|&i| units[i].original_id() == Some(&root))
                .collect()
        } else {
            vec![template]
        };
        let available = members
            .iter()
            .fold(0_u32, |acc, &i| acc.saturating_add(units[i].quantity));
        if record.total_quantity() != Some(available) {
            tracing::warn!(
                target: "packplan.reconcile",
                product_id = %record.product_id,
                saved_total = record.total_quantity(),
                fetched_total = available,
                "saved split quantities do not add up; skipping"
            );
            skipped += 1;
            continue;
        }

        let at = members[0];
        let volume: f64 = members.iter().map(|&i| units[i].volume).sum();
        let base = Unit {
            lineage: Lineage::Whole,
            ..units[at].clone()
        };
        for &i in members.iter().rev() {
            units.remove(i);
        }
        let lingering = units.iter().any(|u| u.original_id() == Some(&root));
        let tags = saved_tags(record).filter(|_| !lingering);
        let restored_tags = tags.is_some();
        let batches = rebuild_batches(&base, &root, record, (available, volume), tags, units);
        let count = batches.len();
        units.splice(at..at, batches);
        if !restored_tags {
            retag_family(units, &root);
        }

        tracing::debug!(
            target: "packplan.reconcile",
            original_id = %root,
            batches = count,
            "restored split family"
        );
        applied += 1;
    }
    (applied, skipped)
}

/// Template for `record`: by raw id, then by base stable id (when the record
/// has one), then by an id-prefix match. First match in list order wins.
fn find_template(units: &[Unit], record: &SplitRecord) -> Option<usize> {
    let wanted = &record.product_id;
    units
        .iter()
        .position(|u| &u.id == wanted || u.original_id() == Some(wanted))
        .or_else(|| {
            let stable = record.stable_identifier.as_ref()?;
            units
                .iter()
                .position(|u| !u.is_split_child() && &base_identity(u) == stable)
        })
        .or_else(|| {
            units.iter().position(|u| {
                !u.is_split_child()
                    && !u.id.is_blank()
                    && (shares_prefix(wanted, &u.id) || shares_prefix(&u.id, wanted))
            })
        })
}

/// Whether `id` is `prefix` followed by `_` and more characters.
fn shares_prefix(id: &UnitId, prefix: &UnitId) -> bool {
    id.as_str()
        .strip_prefix(prefix.as_str())
        .is_some_and(|rest| rest.len() > 1 && rest.starts_with('_'))
}

/// Saved tags, if they are exactly `1/n … n/n` in some order with `n` the
/// batch count. Batches reordered by drag keep their tags, so the saved
/// order's tagged stable ids still point at the right batch.
fn saved_tags(record: &SplitRecord) -> Option<Vec<SplitTag>> {
    let count = u32::try_from(record.len()).ok()?;
    let tags = record
        .batches()
        .map(|b| b.split_tag.parse::<SplitTag>().ok())
        .collect::<Option<Vec<_>>>()?;
    let ordinals: BTreeSet<u32> = tags.iter().map(|t| t.ordinal()).collect();
    let consistent = tags.iter().all(|t| t.total() == count) && ordinals.len() == tags.len();
    consistent.then_some(tags)
}

fn rebuild_batches(
    base: &Unit,
    root: &UnitId,
    record: &SplitRecord,
    (quantity, volume): (u32, f64),
    tags: Option<Vec<SplitTag>>,
    others: &[Unit],
) -> Vec<Unit> {
    let mut taken: BTreeSet<u32> = others
        .iter()
        .filter(|u| u.original_id() == Some(root))
        .filter_map(|u| u.id.split_index_for(root))
        .collect();
    let mut kept: Vec<Option<u32>> = Vec::with_capacity(record.len());
    for batch in record.batches() {
        let index = batch.id.split_index_for(root).filter(|i| taken.insert(*i));
        kept.push(index);
    }
    let mut next = taken.last().copied().unwrap_or(0);

    let total = quantity.max(1);
    let count = kept.len() as u32;
    let mut volume_left = volume;
    record
        .batches()
        .zip(kept)
        .enumerate()
        .filter_map(|(position, (batch, index))| {
            let index = index.unwrap_or_else(|| {
                next += 1;
                next
            });
            let ordinal = position as u32 + 1;
            let tag = match &tags {
                Some(tags) => tags.get(position).copied()?,
                None => SplitTag::new(ordinal, count)?,
            };
            let share = if ordinal == count {
                volume_left
            } else {
                volume * f64::from(batch.quantity) / f64::from(total)
            };
            volume_left -= share;
            Some(Unit {
                id: UnitId::split_child(root, index),
                quantity: batch.quantity,
                volume: share,
                lineage: Lineage::SplitChild {
                    original_id: root.clone(),
                    tag,
                },
                ..base.clone()
            })
        })
        .collect()
}

/// Result of [`apply_saved_order`].
#[derive(Debug, Clone, PartialEq)]
pub struct PlacedOrder {
    pub working: Vec<Unit>,
    pub ordered: usize,
    pub appended: usize,
    pub unmatched: usize,
}

/// Arrange `units` by `order`: each saved stable id places the first
/// unplaced unit with that stable id, or (with `legacy_id_fallback`) the
/// first unplaced unit whose raw id equals it. Units left over keep their
/// fetched order and go last.
#[must_use]
pub fn apply_saved_order(units: Vec<Unit>, order: &[StableId], legacy_id_fallback: bool) -> PlacedOrder {
    let identities: Vec<StableId> = units.iter().map(identify).collect();
    let mut placed = vec![false; units.len()];
    let mut sequence = Vec::with_capacity(units.len());
    let mut unmatched = 0;

    for saved in order {
        let hit = (0..units.len())
            .find(|&i| !placed[i] && &identities[i] == saved)
            .or_else(|| {
                legacy_id_fallback
                    .then(|| (0..units.len()).find(|&i| !placed[i] && units[i].id.as_str() == saved.as_str()))
                    .flatten()
            });
        match hit {
            Some(i) => {
                placed[i] = true;
                sequence.push(i);
            }
            None => unmatched += 1,
        }
    }
    let ordered = sequence.len();
    sequence.extend((0..units.len()).filter(|&i| !placed[i]));
    let appended = sequence.len() - ordered;

    let mut slots: Vec<Option<Unit>> = units.into_iter().map(Some).collect();
    let working = sequence
        .into_iter()
        .filter_map(|i| slots[i].take())
        .collect();
    PlacedOrder {
        working,
        ordered,
        appended,
        unmatched,
    }
}

/// Lock the saved ids still present in `working`. Returns the lock set and
/// the number of ids dropped.
#[must_use]
pub fn apply_saved_locks(working: &[Unit], saved: &[UnitId]) -> (LockSet, usize) {
    let mut locks: LockSet = saved.iter().cloned().collect();
    let pruned = locks.prune(working);
    if pruned > 0 {
        tracing::debug!(
            target: "packplan.reconcile",
            pruned,
            kept = locks.len(),
            "pruned locks of vanished units"
        );
    }
    (locks, pruned)
}
