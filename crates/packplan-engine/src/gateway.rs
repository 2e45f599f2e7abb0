#![forbid(unsafe_code)]

//! Per-shipment persisted records and the gateway that stores them.
//!
//! Three records are kept for every shipment:
//!
//! | Record   | Key                           | Payload                    |
//! |----------|-------------------------------|----------------------------|
//! | `order`  | `<namespace>:<shipment>:order`  | `[StableId]`               |
//! | `splits` | `<namespace>:<shipment>:splits` | `[SplitRecord]`            |
//! | `locks`  | `<namespace>:<shipment>:locks`  | `[UnitId]`                 |
//!
//! # File Format
//!
//! ```json
//! { "version": 1, "data": ["TPS::Fert::Gallon::1/2", "TPS::Fert::Gallon::2/2"] }
//! ```
//!
//! Bare arrays (records written before the envelope existed) are accepted on
//! read and rewritten in envelope form on the next save. `splits` entries are
//! decoded one at a time: an unreadable entry is dropped with a `warn`, the
//! rest of the record still loads.

use std::fmt;

use packplan_core::{SplitFamily, StableId, Unit, UnitId};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::storage::{StorageBackend, StorageError};

/// Current record envelope version.
pub const RECORD_VERSION: u64 = 1;

/// Shipment whose plan is being edited.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ShipmentId(String);

impl ShipmentId {
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ShipmentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ShipmentId {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

/// One batch of a saved split family.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchRecord {
    pub id: UnitId,
    pub quantity: u32,
    pub split_tag: String,
}

impl BatchRecord {
    #[must_use]
    pub fn of(unit: &Unit) -> Self {
        Self {
            id: unit.id.clone(),
            quantity: unit.quantity,
            split_tag: unit.split_tag().map(|t| t.to_string()).unwrap_or_default(),
        }
    }
}

/// A saved split family: the pre-split unit plus its batches in working-list
/// order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SplitRecord {
    /// Id of the unit that was split (the family's `original_id`).
    pub product_id: UnitId,
    /// Base stable id of the family (no split tag suffix). Absent in records
    /// saved before stable ids existed; those match by raw id only.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stable_identifier: Option<StableId>,
    pub first_batch: BatchRecord,
    pub second_batch: BatchRecord,
    #[serde(default)]
    pub additional_batches: Vec<BatchRecord>,
}

impl SplitRecord {
    /// All batches, first to last.
    pub fn batches(&self) -> impl Iterator<Item = &BatchRecord> {
        [&self.first_batch, &self.second_batch]
            .into_iter()
            .chain(self.additional_batches.iter())
    }

    /// Number of batches.
    #[must_use]
    pub fn len(&self) -> usize {
        2 + self.additional_batches.len()
    }

    /// Always false; a record holds at least two batches.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        false
    }

    /// Sum of batch quantities, `None` on overflow.
    #[must_use]
    pub fn total_quantity(&self) -> Option<u32> {
        self.batches()
            .try_fold(0_u32, |acc, b| acc.checked_add(b.quantity))
    }

    /// Build a record for `family`. Families with fewer than two batches in
    /// `list` produce `None`.
    #[must_use]
    pub fn from_family(list: &[Unit], family: &SplitFamily) -> Option<Self> {
        let mut batches = family
            .members
            .iter()
            .filter_map(|&i| list.get(i))
            .map(BatchRecord::of);
        let first_batch = batches.next()?;
        let second_batch = batches.next()?;
        Some(Self {
            product_id: family.original_id.clone(),
            stable_identifier: Some(family.base.clone()),
            first_batch,
            second_batch,
            additional_batches: batches.collect(),
        })
    }
}

/// Load/save access to the per-shipment records.
///
/// `Ok(None)` means nothing was saved for the shipment.
pub trait PersistenceGateway {
    fn load_order(&self, shipment: &ShipmentId) -> Result<Option<Vec<StableId>>, StorageError>;
    fn save_order(&mut self, shipment: &ShipmentId, order: &[StableId]) -> Result<(), StorageError>;

    fn load_splits(&self, shipment: &ShipmentId)
    -> Result<Option<Vec<SplitRecord>>, StorageError>;
    fn save_splits(
        &mut self,
        shipment: &ShipmentId,
        splits: &[SplitRecord],
    ) -> Result<(), StorageError>;

    fn load_locks(&self, shipment: &ShipmentId) -> Result<Option<Vec<UnitId>>, StorageError>;
    fn save_locks(&mut self, shipment: &ShipmentId, locks: &[UnitId]) -> Result<(), StorageError>;
}

#[derive(Serialize)]
struct EnvelopeOut<'a, T: Serialize> {
    version: u64,
    data: &'a T,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum Stored<T> {
    Envelope { version: u64, data: T },
    Bare(T),
}

/// Record kinds, used to build storage keys.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordKind {
    Order,
    Splits,
    Locks,
}

impl RecordKind {
    pub const ALL: [RecordKind; 3] = [RecordKind::Order, RecordKind::Splits, RecordKind::Locks];

    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Order => "order",
            Self::Splits => "splits",
            Self::Locks => "locks",
        }
    }
}

/// [`PersistenceGateway`] over any [`StorageBackend`].
#[derive(Debug, Clone)]
pub struct StoreGateway<B> {
    backend: B,
    namespace: String,
}

impl<B: StorageBackend> StoreGateway<B> {
    #[must_use]
    pub fn new(backend: B, namespace: impl Into<String>) -> Self {
        Self {
            backend,
            namespace: namespace.into(),
        }
    }

    #[must_use]
    pub fn backend(&self) -> &B {
        &self.backend
    }

    pub fn backend_mut(&mut self) -> &mut B {
        &mut self.backend
    }

    #[must_use]
    pub fn into_backend(self) -> B {
        self.backend
    }

    /// Storage key of `kind` for `shipment`.
    #[must_use]
    pub fn key(&self, shipment: &ShipmentId, kind: RecordKind) -> String {
        format!("{}:{}:{}", self.namespace, shipment, kind.as_str())
    }

    /// Delete every record of `shipment`.
    pub fn clear(&mut self, shipment: &ShipmentId) -> Result<(), StorageError> {
        for kind in RecordKind::ALL {
            let key = self.key(shipment, kind);
            self.backend.remove(&key)?;
        }
        Ok(())
    }

    fn read<T: DeserializeOwned>(
        &self,
        shipment: &ShipmentId,
        kind: RecordKind,
    ) -> Result<Option<T>, StorageError> {
        let key = self.key(shipment, kind);
        let Some(raw) = self.backend.get(&key)? else {
            return Ok(None);
        };
        match serde_json::from_str::<Stored<T>>(&raw)? {
            Stored::Envelope { version, data } if version == RECORD_VERSION => Ok(Some(data)),
            Stored::Envelope { version, .. } => Err(StorageError::UnsupportedVersion {
                found: version,
                expected: RECORD_VERSION,
            }),
            Stored::Bare(data) => {
                tracing::debug!(
                    target: "packplan.storage",
                    key = %key,
                    "read legacy record without envelope"
                );
                Ok(Some(data))
            }
        }
    }

    fn write<T: Serialize>(
        &mut self,
        shipment: &ShipmentId,
        kind: RecordKind,
        data: &T,
    ) -> Result<(), StorageError> {
        let key = self.key(shipment, kind);
        let json = serde_json::to_string(&EnvelopeOut {
            version: RECORD_VERSION,
            data,
        })?;
        self.backend.set(&key, &json)
    }
}

impl<B: StorageBackend> PersistenceGateway for StoreGateway<B> {
    fn load_order(&self, shipment: &ShipmentId) -> Result<Option<Vec<StableId>>, StorageError> {
        self.read(shipment, RecordKind::Order)
    }

    fn save_order(&mut self, shipment: &ShipmentId, order: &[StableId]) -> Result<(), StorageError> {
        self.write(shipment, RecordKind::Order, &order)
    }

    fn load_splits(
        &self,
        shipment: &ShipmentId,
    ) -> Result<Option<Vec<SplitRecord>>, StorageError> {
        let Some(entries) = self.read::<Vec<serde_json::Value>>(shipment, RecordKind::Splits)?
        else {
            return Ok(None);
        };
        let records = entries
            .into_iter()
            .enumerate()
            .filter_map(|(index, entry)| match serde_json::from_value::<SplitRecord>(entry) {
                Ok(record) => Some(record),
                Err(err) => {
                    tracing::warn!(
                        target: "packplan.storage",
                        shipment = %shipment,
                        index,
                        error = %err,
                        "skipping unreadable split entry"
                    );
                    None
                }
            })
            .collect();
        Ok(Some(records))
    }

    fn save_splits(
        &mut self,
        shipment: &ShipmentId,
        splits: &[SplitRecord],
    ) -> Result<(), StorageError> {
        self.write(shipment, RecordKind::Splits, &splits)
    }

    fn load_locks(&self, shipment: &ShipmentId) -> Result<Option<Vec<UnitId>>, StorageError> {
        self.read(shipment, RecordKind::Locks)
    }

    fn save_locks(&mut self, shipment: &ShipmentId, locks: &[UnitId]) -> Result<(), StorageError> {
        self.write(shipment, RecordKind::Locks, &locks)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::MemoryStorage;
    use packplan_core::{BatchSplitter, split_families};

    fn gateway() -> StoreGateway<MemoryStorage> {
        StoreGateway::new(MemoryStorage::new(), "packplan")
    }

    #[test]
    fn keys_follow_namespace_layout() {
        let gw = gateway();
        let s = ShipmentId::new("S-9");
        assert_eq!(gw.key(&s, RecordKind::Order), "packplan:S-9:order");
        assert_eq!(gw.key(&s, RecordKind::Splits), "packplan:S-9:splits");
        assert_eq!(gw.key(&s, RecordKind::Locks), "packplan:S-9:locks");
    }

    #[test]
    fn order_is_written_in_envelope() {
        let mut gw = gateway();
        let s = ShipmentId::new("S");
        gw.save_order(&s, &[StableId::from_raw("a::b::c")]).unwrap();
        let raw = gw.backend().get("packplan:S:order").unwrap().unwrap();
        assert_eq!(raw, r#"{"version":1,"data":["a::b::c"]}"#);
        assert_eq!(
            gw.load_order(&s).unwrap(),
            Some(vec![StableId::from_raw("a::b::c")])
        );
    }

    #[test]
    fn bare_legacy_array_is_accepted() {
        let mut gw = gateway();
        gw.backend_mut()
            .insert_raw("packplan:S:locks", r#"["u1","u2"]"#);
        assert_eq!(
            gw.load_locks(&ShipmentId::new("S")).unwrap(),
            Some(vec![UnitId::new("u1"), UnitId::new("u2")])
        );
    }

    #[test]
    fn future_version_is_rejected() {
        let mut gw = gateway();
        gw.backend_mut()
            .insert_raw("packplan:S:order", r#"{"version":7,"data":[]}"#);
        assert!(matches!(
            gw.load_order(&ShipmentId::new("S")),
            Err(StorageError::UnsupportedVersion {
                found: 7,
                expected: 1
            })
        ));
    }

    #[test]
    fn garbage_is_a_json_error() {
        let mut gw = gateway();
        gw.backend_mut().insert_raw("packplan:S:splits", "{{{");
        assert!(matches!(
            gw.load_splits(&ShipmentId::new("S")),
            Err(StorageError::Json(_))
        ));
    }

    #[test]
    fn split_record_wire_shape() {
        let mut list = vec![Unit::new("42", "TPS", "Fert", "Gallon", 40)];
        let mut splitter = BatchSplitter::default();
        splitter.split(&mut list, &UnitId::new("42"), 12).unwrap();
        let family = &split_families(&list)[0];
        let record = SplitRecord::from_family(&list, family).unwrap();
        assert_eq!(record.total_quantity(), Some(40));
        assert_eq!(record.len(), 2);

        let json = serde_json::to_value(&record).unwrap();
        assert_eq!(json["productId"], "42");
        assert_eq!(json["stableIdentifier"], "TPS::Fert::Gallon");
        assert_eq!(json["firstBatch"]["splitTag"], "1/2");
        assert_eq!(json["secondBatch"]["quantity"], 28);
        assert_eq!(json["additionalBatches"], serde_json::json!([]));
    }

    #[test]
    fn split_entry_without_stable_identifier_decodes() {
        let mut gw = gateway();
        gw.backend_mut().insert_raw(
            "packplan:S:splits",
            r#"[{"productId":"42",
                "firstBatch":{"id":"42_split_1","quantity":12,"splitTag":"1/2"},
                "secondBatch":{"id":"42_split_2","quantity":28,"splitTag":"2/2"}}]"#,
        );
        let records = gw.load_splits(&ShipmentId::new("S")).unwrap().unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].product_id, UnitId::new("42"));
        assert_eq!(records[0].stable_identifier, None);
        assert_eq!(records[0].total_quantity(), Some(40));

        let json = serde_json::to_value(&records[0]).unwrap();
        assert!(json.get("stableIdentifier").is_none());
    }

    #[test]
    fn unreadable_split_entry_is_dropped_alone() {
        let mut gw = gateway();
        gw.backend_mut().insert_raw(
            "packplan:S:splits",
            r#"{"version":1,"data":[
                {"productId":"1"},
                {"productId":"42","stableIdentifier":"TPS::Fert::Gallon",
                 "firstBatch":{"id":"42_split_1","quantity":12,"splitTag":"1/2"},
                 "secondBatch":{"id":"42_split_2","quantity":28,"splitTag":"2/2"}}
            ]}"#,
        );
        let records = gw.load_splits(&ShipmentId::new("S")).unwrap().unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].product_id, UnitId::new("42"));
        assert_eq!(
            records[0].stable_identifier,
            Some(StableId::from_raw("TPS::Fert::Gallon"))
        );
    }

    #[test]
    fn clear_removes_all_records() {
        let mut gw = gateway();
        let s = ShipmentId::new("S");
        gw.save_order(&s, &[]).unwrap();
        gw.save_locks(&s, &[]).unwrap();
        gw.clear(&s).unwrap();
        assert_eq!(gw.load_order(&s).unwrap(), None);
        assert_eq!(gw.load_locks(&s).unwrap(), None);
        assert!(gw.backend().keys().is_empty());
    }
}
