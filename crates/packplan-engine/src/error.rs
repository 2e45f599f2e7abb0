#![forbid(unsafe_code)]

use packplan_core::{ReorderError, SplitError, UnitId};

use crate::source::SourceError;

/// Errors returned by [`Engine`](crate::Engine) entry points. A failed call
/// leaves the working list unchanged.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum EngineError {
    #[error(transparent)]
    Split(#[from] SplitError),
    #[error(transparent)]
    Reorder(#[from] ReorderError),
    #[error(transparent)]
    Source(#[from] SourceError),
    #[error("unit {0} not found")]
    UnitNotFound(UnitId),
    #[error("display row {0} is out of range")]
    DisplayIndex(usize),
    #[error("no shipment loaded")]
    NoShipment,
}
