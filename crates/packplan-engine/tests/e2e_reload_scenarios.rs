#![forbid(unsafe_code)]

//! End-to-end reload scenarios: mutate a shipment, drop the engine, reload
//! from storage against a fresh fetch.
//!
//! Run:
//!   cargo test -p packplan-engine --test e2e_reload_scenarios

use packplan_engine::core::{Column, DropPosition, SortDirection, StableId, Unit, UnitId};
use packplan_engine::{
    Engine, EngineConfig, EngineError, FileStorage, MemoryStorage, PersistenceGateway, Phase,
    ShipmentId, SourceError, StaticSource, StoreGateway,
};

// ============================================================================
// Helpers
// ============================================================================

type MemEngine = Engine<StoreGateway<MemoryStorage>>;

fn shipment() -> ShipmentId {
    ShipmentId::new("S-100")
}

fn unit(id: &str, product: &str, size: &str, qty: u32) -> Unit {
    Unit::new(id, "TPS", product, size, qty)
}

fn ids(units: &[Unit]) -> Vec<&str> {
    units.iter().map(|u| u.id.as_str()).collect()
}

fn products(units: &[Unit]) -> Vec<String> {
    units
        .iter()
        .map(|u| match u.split_tag() {
            Some(tag) => format!("{} {}", u.product_name, tag),
            None => u.product_name.clone(),
        })
        .collect()
}

fn reload(engine: MemEngine, fetched: Vec<Unit>) -> MemEngine {
    let backend = engine.into_gateway().into_backend();
    let mut next = Engine::with_storage(backend, EngineConfig::default());
    next.load(shipment(), &StaticSource::new().with(shipment(), fetched))
        .unwrap();
    next
}

// ============================================================================
// Scenarios
// ============================================================================

#[test]
fn saved_order_with_new_and_vanished_units() {
    let mut engine = Engine::with_storage(MemoryStorage::new(), EngineConfig::default());
    engine.load_units(
        shipment(),
        vec![unit("x", "X", "Tote", 1), unit("y", "Y", "Tote", 1), unit("z", "Z", "Tote", 1)],
    );

    let engine = reload(
        engine,
        vec![unit("w", "W", "Tote", 1), unit("z", "Z", "Tote", 1), unit("y", "Y", "Tote", 1)],
    );
    assert_eq!(ids(engine.working_list()), vec!["y", "z", "w"]);
}

#[test]
fn split_resplit_undo_survives_reload() {
    let mut engine = Engine::with_storage(MemoryStorage::new(), EngineConfig::default());
    engine.load_units(
        shipment(),
        vec![unit("1", "Kelp", "Tote", 3), unit("42", "Fert", "Gallon", 40)],
    );

    engine.split(&UnitId::new("42"), 12).unwrap();
    engine.split(&UnitId::new("42_split_1"), 4).unwrap();
    let quantities: Vec<u32> = engine.working_list().iter().map(|u| u.quantity).collect();
    assert_eq!(quantities, vec![3, 4, 8, 28]);

    let fresh = vec![unit("1", "Kelp", "Tote", 3), unit("42", "Fert", "Gallon", 40)];
    let mut engine = reload(engine, fresh.clone());
    assert_eq!(
        products(engine.working_list()),
        vec!["Kelp", "Fert 1/3", "Fert 2/3", "Fert 3/3"]
    );
    assert_eq!(
        ids(engine.working_list()),
        vec!["1", "42_split_3", "42_split_4", "42_split_2"]
    );

    engine.undo_all_splits(&UnitId::new("42_split_4")).unwrap();
    let engine = reload(engine, fresh);
    assert_eq!(ids(engine.working_list()), vec!["1", "42"]);
    assert_eq!(engine.working_list()[1].quantity, 40);
}

#[test]
fn splits_follow_regenerated_server_ids() {
    let mut engine = Engine::with_storage(MemoryStorage::new(), EngineConfig::default());
    engine.load_units(
        shipment(),
        vec![unit("a-1", "Alpha", "Tote", 10), unit("b-1", "Beta", "Quart", 48)],
    );
    engine.split(&UnitId::new("b-1"), 12).unwrap();
    engine.drag_drop(1, 0, DropPosition::Above).unwrap();
    assert_eq!(
        products(engine.working_list()),
        vec!["Beta 1/2", "Alpha", "Beta 2/2"]
    );

    let engine = reload(
        engine,
        vec![unit("a-2", "Alpha", "Tote", 10), unit("b-2", "Beta", "Quart", 48)],
    );
    assert_eq!(
        products(engine.working_list()),
        vec!["Beta 1/2", "Alpha", "Beta 2/2"]
    );
    assert_eq!(
        ids(engine.working_list()),
        vec!["b-2_split_1", "a-2", "b-2_split_2"]
    );
}

#[test]
fn dragged_batches_keep_their_tags_across_reload() {
    let mut engine = Engine::with_storage(MemoryStorage::new(), EngineConfig::default());
    engine.load_units(shipment(), vec![unit("42", "Fert", "Gallon", 40)]);
    engine.split(&UnitId::new("42"), 12).unwrap();
    engine.drag_drop(1, 0, DropPosition::Above).unwrap();
    assert_eq!(products(engine.working_list()), vec!["Fert 2/2", "Fert 1/2"]);

    let engine = reload(engine, vec![unit("42", "Fert", "Gallon", 40)]);
    assert_eq!(products(engine.working_list()), vec!["Fert 2/2", "Fert 1/2"]);
    let quantities: Vec<u32> = engine.working_list().iter().map(|u| u.quantity).collect();
    assert_eq!(quantities, vec![28, 12]);
}

#[test]
fn locks_survive_reload_and_prune_vanished_units() {
    let mut engine = Engine::with_storage(MemoryStorage::new(), EngineConfig::default());
    engine.load_units(
        shipment(),
        vec![unit("a", "A", "Tote", 1), unit("b", "B", "Tote", 1), unit("c", "C", "Tote", 1)],
    );
    engine.toggle_lock(&UnitId::new("b")).unwrap();
    engine.toggle_lock(&UnitId::new("c")).unwrap();

    let engine = reload(engine, vec![unit("a", "A", "Tote", 1), unit("b", "B", "Tote", 1)]);
    assert!(engine.locks().is_locked(&UnitId::new("b")));
    assert_eq!(engine.locks().len(), 1);
    let saved = engine.gateway().load_locks(&shipment()).unwrap().unwrap();
    assert_eq!(saved, vec![UnitId::new("b")]);
}

#[test]
fn sort_is_one_shot_and_persisted() {
    let mut engine = Engine::with_storage(MemoryStorage::new(), EngineConfig::default());
    engine.load_units(
        shipment(),
        vec![unit("a", "A", "Tote", 5), unit("b", "B", "Tote", 1), unit("c", "C", "Tote", 3)],
    );
    engine.toggle_lock(&UnitId::new("a")).unwrap();
    engine.sort_column(Column::Quantity, SortDirection::Ascending);
    assert_eq!(ids(engine.working_list()), vec!["a", "b", "c"]);

    engine.sort_column(Column::Quantity, SortDirection::Descending);
    assert_eq!(ids(engine.working_list()), vec!["a", "c", "b"]);

    let engine = reload(
        engine,
        vec![unit("a", "A", "Tote", 5), unit("b", "B", "Tote", 1), unit("c", "C", "Tote", 3)],
    );
    assert_eq!(ids(engine.working_list()), vec!["a", "c", "b"]);
}

#[test]
fn corrupt_records_fall_back_to_fetch_order() {
    let mut backend = MemoryStorage::new();
    backend.insert_raw("packplan:S-100:order", "not json");
    backend.insert_raw("packplan:S-100:splits", r#"{"version":99,"data":[]}"#);
    backend.insert_raw("packplan:S-100:locks", r#"{"version":1,"data":"b"}"#);
    let mut engine = Engine::with_storage(backend, EngineConfig::default());

    let report = engine.load_units(
        shipment(),
        vec![unit("a", "A", "Tote", 1), unit("b", "B", "Tote", 1)],
    );
    assert_eq!(ids(engine.working_list()), vec!["a", "b"]);
    assert_eq!(report.splits_applied, 0);
    assert!(engine.locks().is_empty());

    // The next commit overwrites the unreadable records.
    let order = engine.gateway().load_order(&shipment()).unwrap().unwrap();
    assert_eq!(
        order,
        vec![StableId::from_raw("TPS::A::Tote"), StableId::from_raw("TPS::B::Tote")]
    );
}

#[test]
fn legacy_split_record_without_stable_id_is_restored() {
    let mut backend = MemoryStorage::new();
    backend.insert_raw(
        "packplan:S-100:splits",
        r#"[
            {"productId":"42",
             "firstBatch":{"id":"42_split_1","quantity":12,"splitTag":"1/2"},
             "secondBatch":{"id":"42_split_2","quantity":28,"splitTag":"2/2"}},
            {"productId":"9","firstBatch":null}
        ]"#,
    );
    let mut engine = Engine::with_storage(backend, EngineConfig::default());

    let report = engine.load_units(
        shipment(),
        vec![unit("1", "Kelp", "Tote", 3), unit("42", "Fert", "Gallon", 40)],
    );
    assert_eq!(report.splits_applied, 1);
    let quantities: Vec<u32> = engine.working_list().iter().map(|u| u.quantity).collect();
    assert_eq!(quantities, vec![3, 12, 28]);
    assert_eq!(ids(engine.working_list()), vec!["1", "42_split_1", "42_split_2"]);

    // Saving rewrites the record with stable ids in envelope form.
    let saved = engine.gateway().load_splits(&shipment()).unwrap().unwrap();
    assert_eq!(
        saved[0].stable_identifier,
        Some(StableId::from_raw("TPS::Fert::Gallon"))
    );
}

#[test]
fn blank_ids_never_collide_with_fetched_ids() {
    let mut engine = Engine::with_storage(MemoryStorage::new(), EngineConfig::default());
    let report = engine.load_units(
        shipment(),
        vec![unit("S-100_1", "A", "Tote", 1), unit("", "B", "Tote", 1)],
    );
    assert_eq!(report.synthetic_ids, 1);
    assert_eq!(ids(engine.working_list()), vec!["S-100_1", "S-100_1_1"]);

    engine.toggle_lock(&UnitId::new("S-100_1")).unwrap();
    assert_eq!(engine.locks().len(), 1);
    assert!(!engine.locks().is_locked(&UnitId::new("S-100_1_1")));
}

#[test]
fn fetch_failure_keeps_previous_state() {
    let mut engine = Engine::with_storage(MemoryStorage::new(), EngineConfig::default());
    engine.load_units(shipment(), vec![unit("a", "A", "Tote", 1)]);

    let failing = |_: &ShipmentId| -> Result<Vec<Unit>, SourceError> {
        Err(SourceError::Unavailable("timeout".into()))
    };
    assert_eq!(
        engine.refresh(&failing),
        Err(EngineError::Source(SourceError::Unavailable("timeout".into())))
    );
    assert_eq!(engine.phase(), Phase::Ready);
    assert_eq!(ids(engine.working_list()), vec!["a"]);
}

#[test]
fn namespace_comes_from_config() {
    let config = EngineConfig {
        namespace: "dock-7".into(),
        ..EngineConfig::default()
    };
    let mut engine = Engine::with_storage(MemoryStorage::new(), config);
    engine.load_units(shipment(), vec![unit("a", "A", "Tote", 1)]);
    assert_eq!(
        engine.gateway().backend().keys(),
        vec!["dock-7:S-100:locks", "dock-7:S-100:order", "dock-7:S-100:splits"]
    );
}

#[test]
fn file_storage_round_trip() {
    let dir = tempfile::tempdir().unwrap();
    let fetched = vec![unit("7", "Bloom", "8oz", 240), unit("8", "Root", "Tote", 2)];

    {
        let storage = FileStorage::open(dir.path()).unwrap();
        let mut engine = Engine::with_storage(storage, EngineConfig::default());
        engine.load_units(shipment(), fetched.clone());
        engine.split(&UnitId::new("7"), 100).unwrap();
        engine.toggle_lock(&UnitId::new("8")).unwrap();
    }
    assert!(dir.path().join("packplan%3AS-100%3Asplits.json").exists());

    let storage = FileStorage::open(dir.path()).unwrap();
    let mut engine = Engine::with_storage(storage, EngineConfig::default());
    let report = engine.load_units(shipment(), fetched);
    assert_eq!(report.splits_applied, 1);
    let quantities: Vec<u32> = engine.working_list().iter().map(|u| u.quantity).collect();
    assert_eq!(quantities, vec![120, 120, 2]);
    assert!(engine.locks().is_locked(&UnitId::new("8")));
}
