#![forbid(unsafe_code)]

//! The engine facade: one shipment's working list plus everything that
//! mutates or projects it.
//!
//! # Phases
//!
//! ```text
//!   Idle ──load──► Reconciling ──commit──► Ready ──refresh──► Reconciling …
//! ```
//!
//! Persistence writes happen only in `Ready`. While a fresh fetch is being
//! reconciled nothing is written, so half-built lists never overwrite the
//! saved records they are built from.
//!
//! # Usage
//!
//! ```rust,ignore
//! let mut engine = Engine::with_storage(MemoryStorage::new(), EngineConfig::default());
//! engine.load(ShipmentId::new("S-1"), &source)?;
//! engine.split(&UnitId::new("42"), 12)?;
//! for unit in engine.display_list().units(engine.working_list()) { /* render */ }
//! ```

use bitflags::bitflags;
use packplan_core::{
    BatchSplitter, ClickModifiers, Column, DisplayList, DragSpec, DropPosition, FilterSet,
    FilterSpec, LockSet, MergeOutcome, ReorderOutcome, Selection, SortDirection, SplitOutcome,
    StableId, Unit, UnitId, column_values, derive_display_list, display_indices_of,
    family_indices, identify, is_split_entry_point, sort_once, split_families,
};
use web_time::Instant;

use crate::config::EngineConfig;
use crate::error::EngineError;
use crate::gateway::{PersistenceGateway, ShipmentId, SplitRecord, StoreGateway};
use crate::reconcile::{ReconcileReport, Reconciled, SavedState, reconcile};
use crate::source::UnitSource;
use crate::storage::{StorageBackend, StorageError};

/// Lifecycle phase of the loaded shipment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Phase {
    /// Nothing loaded yet.
    #[default]
    Idle,
    /// A fetch is being merged with saved records; writes are refused.
    Reconciling,
    /// The working list is committed; mutations persist.
    Ready,
}

bitflags! {
    /// Records touched by a mutation.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    struct Dirty: u8 {
        const ORDER = 0b001;
        const SPLITS = 0b010;
        const LOCKS = 0b100;
    }
}

/// Working-list owner for one shipment at a time.
#[derive(Debug)]
pub struct Engine<G> {
    config: EngineConfig,
    gateway: G,
    shipment: Option<ShipmentId>,
    phase: Phase,
    working: Vec<Unit>,
    locks: LockSet,
    filters: FilterSet,
    splitter: BatchSplitter,
    selection: Selection,
}

impl<G: PersistenceGateway> Engine<G> {
    #[must_use]
    pub fn new(gateway: G, config: EngineConfig) -> Self {
        Self {
            splitter: BatchSplitter::new(config.step_rules.clone()),
            config,
            gateway,
            shipment: None,
            phase: Phase::Idle,
            working: Vec::new(),
            locks: LockSet::new(),
            filters: FilterSet::new(),
            selection: Selection::new(),
        }
    }

    #[must_use]
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    #[must_use]
    pub fn gateway(&self) -> &G {
        &self.gateway
    }

    pub fn gateway_mut(&mut self) -> &mut G {
        &mut self.gateway
    }

    #[must_use]
    pub fn into_gateway(self) -> G {
        self.gateway
    }

    #[must_use]
    pub fn phase(&self) -> Phase {
        self.phase
    }

    #[must_use]
    pub fn shipment(&self) -> Option<&ShipmentId> {
        self.shipment.as_ref()
    }

    // ── Loading ──────────────────────────────────────────────────────

    /// Fetch `shipment` from `source` and reconcile it with saved records.
    ///
    /// A fetch failure leaves the engine as it was.
    pub fn load<S: UnitSource + ?Sized>(
        &mut self,
        shipment: ShipmentId,
        source: &S,
    ) -> Result<ReconcileReport, EngineError> {
        let units = source.fetch_units(&shipment).inspect_err(|err| {
            tracing::warn!(
                target: "packplan.engine",
                shipment = %shipment,
                error = %err,
                "unit fetch failed"
            );
        })?;
        Ok(self.load_units(shipment, units))
    }

    /// Refetch the current shipment.
    pub fn refresh<S: UnitSource + ?Sized>(
        &mut self,
        source: &S,
    ) -> Result<ReconcileReport, EngineError> {
        let shipment = self.shipment.clone().ok_or(EngineError::NoShipment)?;
        self.load(shipment, source)
    }

    /// Reconcile already-fetched `units` for `shipment` and commit them.
    pub fn load_units(&mut self, shipment: ShipmentId, units: Vec<Unit>) -> ReconcileReport {
        let started = Instant::now();
        if self.shipment.as_ref() != Some(&shipment) {
            self.splitter.reset();
            self.filters.clear_all();
        }
        self.transition(Phase::Reconciling);

        let saved = SavedState::load(&self.gateway, &shipment);
        let Reconciled {
            working,
            locks,
            report,
        } = reconcile(&shipment, units, &saved, self.config.legacy_id_fallback);

        self.working = working;
        self.locks = locks;
        self.selection.clear();
        self.splitter.observe(&self.working);
        self.shipment = Some(shipment);
        self.transition(Phase::Ready);
        self.persist(Dirty::all());

        tracing::info!(
            target: "packplan.reconcile",
            shipment = %self.shipment.as_ref().map(ShipmentId::as_str).unwrap_or_default(),
            fetched = report.fetched,
            units = self.working.len(),
            splits_applied = report.splits_applied,
            splits_skipped = report.splits_skipped,
            appended = report.appended,
            locks = report.locks_restored,
            elapsed_us = started.elapsed().as_micros() as u64,
            "reconciled shipment"
        );
        report
    }

    fn transition(&mut self, next: Phase) {
        tracing::debug!(
            target: "packplan.engine",
            from = ?self.phase,
            to = ?next,
            "phase transition"
        );
        self.phase = next;
    }

    // ── Projections ──────────────────────────────────────────────────

    /// The authoritative working list.
    #[must_use]
    pub fn working_list(&self) -> &[Unit] {
        &self.working
    }

    /// The filtered, lock-aware display list.
    #[must_use]
    pub fn display_list(&self) -> DisplayList {
        derive_display_list(&self.working, &self.filters, &self.locks)
    }

    #[must_use]
    pub fn locks(&self) -> &LockSet {
        &self.locks
    }

    #[must_use]
    pub fn filters(&self) -> &FilterSet {
        &self.filters
    }

    #[must_use]
    pub fn selection(&self) -> &Selection {
        &self.selection
    }

    /// Units of the selected display rows, in display order.
    #[must_use]
    pub fn selected_units(&self) -> Vec<&Unit> {
        let display = self.display_list();
        self.selection
            .indices()
            .iter()
            .filter_map(|&i| display.get(i))
            .filter_map(|row| self.working.get(row.working_index))
            .collect()
    }

    /// Distinct values of `column`, for filter menus.
    #[must_use]
    pub fn column_values(&self, column: Column) -> Vec<String> {
        column_values(&self.working, column)
    }

    #[must_use]
    pub fn is_column_active(&self, column: Column) -> bool {
        self.filters.is_column_active(column, &self.working)
    }

    /// Whether the split action should be offered on unit `id`.
    #[must_use]
    pub fn can_split(&self, id: &UnitId) -> bool {
        self.position_of(id).is_some_and(|i| {
            let unit = &self.working[i];
            is_split_entry_point(&self.working, i) && unit.quantity > self.splitter.step_for(unit)
        })
    }

    /// Split increment of unit `id`.
    pub fn step_for(&self, id: &UnitId) -> Result<u32, EngineError> {
        let i = self.require(id)?;
        Ok(self.splitter.step_for(&self.working[i]))
    }

    // ── Splitting ────────────────────────────────────────────────────

    /// Split unit `id`, the first batch holding `first_qty` rounded to the
    /// unit's step. A locked unit passes its lock to both batches.
    pub fn split(&mut self, id: &UnitId, first_qty: u32) -> Result<SplitOutcome, EngineError> {
        let was_locked = self.locks.is_locked(id);
        let outcome = self.splitter.split(&mut self.working, id, first_qty)?;
        let mut dirty = Dirty::ORDER | Dirty::SPLITS;
        if was_locked {
            self.locks.rekey(id, outcome.first_id.clone());
            self.locks.lock(outcome.second_id.clone());
            dirty |= Dirty::LOCKS;
        }
        self.after_structure_change();
        self.persist(dirty);
        Ok(outcome)
    }

    /// Merge the split family of batch `id`.
    pub fn undo_split(&mut self, id: &UnitId) -> Result<MergeOutcome, EngineError> {
        self.merge(id, false)
    }

    /// Merge every batch of `id`'s stable family; `id` may be a whole unit
    /// with lingering batches.
    pub fn undo_all_splits(&mut self, id: &UnitId) -> Result<MergeOutcome, EngineError> {
        self.merge(id, true)
    }

    fn merge(&mut self, id: &UnitId, all: bool) -> Result<MergeOutcome, EngineError> {
        let members: Vec<UnitId> = self
            .position_of(id)
            .map(|i| family_indices(&self.working, i))
            .unwrap_or_default()
            .into_iter()
            .map(|i| self.working[i].id.clone())
            .collect();
        let outcome = if all {
            self.splitter.undo_all_splits(&mut self.working, id)?
        } else {
            self.splitter.undo_split(&mut self.working, id)?
        };

        let mut dirty = Dirty::ORDER | Dirty::SPLITS;
        if members.iter().any(|m| self.locks.is_locked(m)) {
            for member in &members {
                self.locks.rekey(member, outcome.merged_id.clone());
            }
            dirty |= Dirty::LOCKS;
        }
        self.after_structure_change();
        self.persist(dirty);
        Ok(outcome)
    }

    fn after_structure_change(&mut self) {
        let len = self.display_list().len();
        self.selection.clamp(len);
    }

    // ── Locks ────────────────────────────────────────────────────────

    /// Flip the lock on unit `id`. Returns whether it is now locked.
    pub fn toggle_lock(&mut self, id: &UnitId) -> Result<bool, EngineError> {
        self.require(id)?;
        let locked = self.locks.toggle(id);
        tracing::debug!(target: "packplan.engine", id = %id, locked, "lock toggled");
        self.selection.clear();
        self.persist(Dirty::LOCKS);
        Ok(locked)
    }

    // ── Filtering and sorting ────────────────────────────────────────

    /// Replace the filter on `column`. A spec that restricts nothing clears it.
    pub fn apply_filter(&mut self, column: Column, spec: FilterSpec) {
        self.filters.set(column, spec);
        self.selection.clear();
    }

    pub fn clear_filter(&mut self, column: Column) {
        self.filters.clear(column);
        self.selection.clear();
    }

    pub fn clear_filters(&mut self) {
        self.filters.clear_all();
        self.selection.clear();
    }

    /// Sort unlocked units by `column` once.
    pub fn sort_column(&mut self, column: Column, direction: SortDirection) {
        sort_once(&mut self.working, column, direction, &self.locks);
        self.selection.clear();
        self.persist(Dirty::ORDER);
    }

    // ── Selection and drag ───────────────────────────────────────────

    /// Click on display row `index`.
    pub fn click(&mut self, index: usize, modifiers: ClickModifiers) -> Result<(), EngineError> {
        if index >= self.display_list().len() {
            return Err(EngineError::DisplayIndex(index));
        }
        self.selection.click(index, modifiers);
        Ok(())
    }

    pub fn clear_selection(&mut self) {
        self.selection.clear();
    }

    /// Capture a drag that grabbed display row `grab` and is dropped on
    /// display row `target`. The whole selection moves when `grab` is in it.
    pub fn capture_drag(
        &self,
        grab: usize,
        target: usize,
        position: DropPosition,
    ) -> Result<DragSpec, EngineError> {
        let rows = self.selection.drag_set(grab);
        Ok(DragSpec::capture(
            &self.working,
            &self.display_list(),
            &rows,
            target,
            position,
        )?)
    }

    /// Apply a captured drag and select the moved rows.
    pub fn reorder(&mut self, spec: &DragSpec) -> Result<ReorderOutcome, EngineError> {
        let outcome = packplan_core::reorder(&mut self.working, spec)?;
        let display = self.display_list();
        self.selection
            .select_indices(display_indices_of(&self.working, &display, &outcome.moved));
        self.persist(Dirty::ORDER);
        Ok(outcome)
    }

    /// Capture and apply in one step.
    pub fn drag_drop(
        &mut self,
        grab: usize,
        target: usize,
        position: DropPosition,
    ) -> Result<ReorderOutcome, EngineError> {
        let spec = self.capture_drag(grab, target, position)?;
        self.reorder(&spec)
    }

    // ── Persistence ──────────────────────────────────────────────────

    /// Records that would be written for the current working list.
    #[must_use]
    pub fn snapshot(&self) -> SavedState {
        SavedState {
            order: Some(self.order_record()),
            splits: Some(self.split_records()),
            locks: Some(self.locks.iter().cloned().collect()),
        }
    }

    fn order_record(&self) -> Vec<StableId> {
        self.working.iter().map(identify).collect()
    }

    fn split_records(&self) -> Vec<SplitRecord> {
        split_families(&self.working)
            .iter()
            .filter_map(|family| SplitRecord::from_family(&self.working, family))
            .collect()
    }

    fn persist(&mut self, dirty: Dirty) {
        let Some(shipment) = self.shipment.clone() else {
            return;
        };
        if self.phase != Phase::Ready {
            tracing::debug!(
                target: "packplan.engine",
                phase = ?self.phase,
                records = ?dirty,
                "persistence refused outside ready phase"
            );
            return;
        }
        if dirty.contains(Dirty::ORDER) {
            let order = self.order_record();
            log_write(self.gateway.save_order(&shipment, &order), &shipment, "order");
        }
        if dirty.contains(Dirty::SPLITS) {
            let splits = self.split_records();
            log_write(self.gateway.save_splits(&shipment, &splits), &shipment, "splits");
        }
        if dirty.contains(Dirty::LOCKS) {
            let locks: Vec<UnitId> = self.locks.iter().cloned().collect();
            log_write(self.gateway.save_locks(&shipment, &locks), &shipment, "locks");
        }
    }

    // ── Helpers ──────────────────────────────────────────────────────

    fn position_of(&self, id: &UnitId) -> Option<usize> {
        self.working.iter().position(|u| &u.id == id)
    }

    fn require(&self, id: &UnitId) -> Result<usize, EngineError> {
        self.position_of(id)
            .ok_or_else(|| EngineError::UnitNotFound(id.clone()))
    }
}

impl<B: StorageBackend> Engine<StoreGateway<B>> {
    /// Engine over `backend`, keyed under `config.namespace`.
    #[must_use]
    pub fn with_storage(backend: B, config: EngineConfig) -> Self {
        let gateway = StoreGateway::new(backend, config.namespace.clone());
        Self::new(gateway, config)
    }
}

fn log_write(result: Result<(), StorageError>, shipment: &ShipmentId, record: &'static str) {
    if let Err(err) = result {
        tracing::warn!(
            target: "packplan.storage",
            shipment = %shipment,
            record,
            error = %err,
            "failed to persist record"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::MemoryStorage;
    use packplan_core::Condition;

    type TestEngine = Engine<StoreGateway<MemoryStorage>>;

    fn engine() -> TestEngine {
        Engine::with_storage(MemoryStorage::new(), EngineConfig::default())
    }

    fn unit(id: &str, product: &str, qty: u32) -> Unit {
        Unit::new(id, "TPS", product, "Gallon", qty)
    }

    fn ids(engine: &TestEngine) -> Vec<&str> {
        engine.working_list().iter().map(|u| u.id.as_str()).collect()
    }

    fn loaded(units: Vec<Unit>) -> TestEngine {
        let mut engine = engine();
        engine.load_units(ShipmentId::new("S"), units);
        engine
    }

    #[test]
    fn load_commits_and_becomes_ready() {
        let mut engine = engine();
        assert_eq!(engine.phase(), Phase::Idle);
        let report = engine.load_units(ShipmentId::new("S"), vec![unit("", "A", 1), unit("b", "B", 2)]);
        assert_eq!(engine.phase(), Phase::Ready);
        assert_eq!(report.synthetic_ids, 1);
        assert_eq!(ids(&engine), vec!["S_0", "b"]);
    }

    #[test]
    fn writes_are_refused_while_reconciling() {
        let mut engine = engine();
        engine.shipment = Some(ShipmentId::new("S"));
        engine.working = vec![unit("a", "A", 1)];
        engine.phase = Phase::Reconciling;
        engine.persist(Dirty::all());
        assert_eq!(engine.gateway().backend().write_count(), 0);

        engine.phase = Phase::Ready;
        engine.persist(Dirty::ORDER);
        assert_eq!(engine.gateway().backend().write_count(), 1);
    }

    #[test]
    fn mutations_before_load_do_not_persist() {
        let mut engine = engine();
        engine.sort_column(Column::Brand, SortDirection::Ascending);
        assert_eq!(engine.gateway().backend().write_count(), 0);
    }

    #[test]
    fn split_and_undo_persist_records() {
        let mut engine = loaded(vec![unit("42", "Fert", 40)]);
        engine.split(&UnitId::new("42"), 12).unwrap();
        let saved = SavedState::load(engine.gateway(), &ShipmentId::new("S"));
        assert_eq!(saved.splits.as_ref().map(Vec::len), Some(1));
        assert_eq!(
            saved.order.unwrap(),
            vec![
                StableId::from_raw("TPS::Fert::Gallon::1/2"),
                StableId::from_raw("TPS::Fert::Gallon::2/2"),
            ]
        );

        engine.undo_split(&UnitId::new("42_split_1")).unwrap();
        let saved = SavedState::load(engine.gateway(), &ShipmentId::new("S"));
        assert_eq!(saved.splits, Some(Vec::new()));
        assert_eq!(ids(&engine), vec!["42"]);
    }

    #[test]
    fn lock_follows_split_and_merge() {
        let mut engine = loaded(vec![unit("42", "Fert", 40)]);
        engine.toggle_lock(&UnitId::new("42")).unwrap();
        engine.split(&UnitId::new("42"), 12).unwrap();
        assert!(engine.locks().is_locked(&UnitId::new("42_split_1")));
        assert!(engine.locks().is_locked(&UnitId::new("42_split_2")));

        engine.undo_all_splits(&UnitId::new("42_split_2")).unwrap();
        assert!(engine.locks().is_locked(&UnitId::new("42")));
        assert_eq!(engine.locks().len(), 1);
    }

    #[test]
    fn rejected_split_changes_nothing() {
        let mut engine = loaded(vec![unit("42", "Fert", 4)]);
        let before = engine.gateway().backend().write_count();
        assert!(matches!(
            engine.split(&UnitId::new("42"), 2),
            Err(EngineError::Split(_))
        ));
        assert_eq!(ids(&engine), vec!["42"]);
        assert_eq!(engine.gateway().backend().write_count(), before);
    }

    #[test]
    fn toggle_unknown_unit_is_an_error() {
        let mut engine = loaded(vec![unit("a", "A", 1)]);
        assert_eq!(
            engine.toggle_lock(&UnitId::new("zz")),
            Err(EngineError::UnitNotFound(UnitId::new("zz")))
        );
    }

    #[test]
    fn filter_keeps_locked_row_in_place() {
        let mut engine = loaded(vec![
            unit("a", "A", 1),
            unit("b", "B", 1),
            unit("c", "C", 1),
            unit("d", "D", 1),
        ]);
        engine.toggle_lock(&UnitId::new("b")).unwrap();
        engine.apply_filter(
            Column::ProductName,
            FilterSpec::condition(Condition::NotEquals("C".into())),
        );
        let display = engine.display_list();
        let shown: Vec<&str> = display
            .units(engine.working_list())
            .map(|u| u.id.as_str())
            .collect();
        assert_eq!(shown, vec!["a", "b", "d"]);
        assert!(engine.is_column_active(Column::ProductName));
        assert!(!engine.is_column_active(Column::Brand));
    }

    #[test]
    fn drag_moves_selection_and_persists_order() {
        let mut engine = loaded(vec![unit("a", "A", 1), unit("b", "B", 1), unit("c", "C", 1)]);
        engine.click(0, ClickModifiers::empty()).unwrap();
        engine.click(1, ClickModifiers::SHIFT).unwrap();
        engine.drag_drop(1, 2, DropPosition::Below).unwrap();
        assert_eq!(ids(&engine), vec!["c", "a", "b"]);
        assert_eq!(
            engine.selection().indices().iter().copied().collect::<Vec<_>>(),
            vec![1, 2]
        );
        let saved = SavedState::load(engine.gateway(), &ShipmentId::new("S"));
        assert_eq!(saved.order.unwrap()[0], StableId::from_raw("TPS::C::Gallon"));
    }

    #[test]
    fn click_out_of_range_is_rejected() {
        let mut engine = loaded(vec![unit("a", "A", 1)]);
        assert_eq!(
            engine.click(3, ClickModifiers::empty()),
            Err(EngineError::DisplayIndex(3))
        );
    }

    #[test]
    fn refresh_without_shipment_fails() {
        let mut engine = engine();
        let source = crate::source::StaticSource::new();
        assert_eq!(engine.refresh(&source), Err(EngineError::NoShipment));
    }

    #[test]
    fn split_affordance_goes_to_largest_batch() {
        let mut engine = loaded(vec![unit("42", "Fert", 40)]);
        engine.split(&UnitId::new("42"), 12).unwrap();
        assert!(!engine.can_split(&UnitId::new("42_split_1")));
        assert!(engine.can_split(&UnitId::new("42_split_2")));
        assert_eq!(engine.step_for(&UnitId::new("42_split_2")), Ok(4));
    }
}
