#![forbid(unsafe_code)]

//! packplan engine
//!
//! Stateful half of packplan: owns one shipment's working list, persists
//! order, splits, and locks, and rebuilds everything from a fresh fetch.
//!
//! - [`engine`] - the [`Engine`] facade and its load/ready phases
//! - [`reconcile`] - merging fetched units with saved records
//! - [`gateway`] - persisted record shapes and the [`PersistenceGateway`] seam
//! - [`storage`] - raw key/value backends (memory, one-file-per-key)
//! - [`source`] - the [`UnitSource`] seam for fetching units
//! - [`config`] - [`EngineConfig`] loading and validation
//!
//! Pure list operations live in `packplan-core`, re-exported here as
//! [`core`].

pub mod config;
pub mod engine;
pub mod error;
pub mod gateway;
pub mod reconcile;
pub mod source;
pub mod storage;

pub use packplan_core as core;

pub use config::{ConfigError, EngineConfig};
pub use engine::{Engine, Phase};
pub use error::EngineError;
pub use gateway::{
    BatchRecord, PersistenceGateway, RECORD_VERSION, RecordKind, ShipmentId, SplitRecord,
    StoreGateway,
};
pub use reconcile::{
    PlacedOrder, ReconcileReport, Reconciled, SavedState, apply_saved_locks, apply_saved_order,
    apply_saved_splits, assign_synthetic_ids, reconcile,
};
pub use source::{SourceError, StaticSource, UnitSource};
pub use storage::{FileStorage, MemoryStorage, StorageBackend, StorageError};
