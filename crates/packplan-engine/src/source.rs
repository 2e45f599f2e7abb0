#![forbid(unsafe_code)]

//! Where fresh units come from.

use std::collections::HashMap;

use packplan_core::Unit;

use crate::gateway::ShipmentId;

/// Errors from fetching units.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SourceError {
    #[error("shipment {0} is unknown to the unit source")]
    UnknownShipment(ShipmentId),
    #[error("unit source unavailable: {0}")]
    Unavailable(String),
    #[error("unit payload could not be decoded: {0}")]
    Decode(String),
}

impl From<serde_json::Error> for SourceError {
    fn from(err: serde_json::Error) -> Self {
        Self::Decode(err.to_string())
    }
}

/// Fetches the current units of a shipment.
pub trait UnitSource {
    fn fetch_units(&self, shipment: &ShipmentId) -> Result<Vec<Unit>, SourceError>;
}

impl<F> UnitSource for F
where
    F: Fn(&ShipmentId) -> Result<Vec<Unit>, SourceError>,
{
    fn fetch_units(&self, shipment: &ShipmentId) -> Result<Vec<Unit>, SourceError> {
        self(shipment)
    }
}

/// Fixed units per shipment.
#[derive(Debug, Clone, Default)]
pub struct StaticSource {
    shipments: HashMap<ShipmentId, Vec<Unit>>,
}

impl StaticSource {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style insert.
    #[must_use]
    pub fn with(mut self, shipment: impl Into<ShipmentId>, units: Vec<Unit>) -> Self {
        self.insert(shipment, units);
        self
    }

    pub fn insert(&mut self, shipment: impl Into<ShipmentId>, units: Vec<Unit>) {
        self.shipments.insert(shipment.into(), units);
    }

    /// Decode a JSON array of unit records for `shipment`.
    pub fn insert_json(
        &mut self,
        shipment: impl Into<ShipmentId>,
        json: &str,
    ) -> Result<(), SourceError> {
        let units: Vec<Unit> = serde_json::from_str(json)?;
        self.insert(shipment, units);
        Ok(())
    }
}

impl UnitSource for StaticSource {
    fn fetch_units(&self, shipment: &ShipmentId) -> Result<Vec<Unit>, SourceError> {
        self.shipments
            .get(shipment)
            .cloned()
            .ok_or_else(|| SourceError::UnknownShipment(shipment.clone()))
    }
}
