#![forbid(unsafe_code)]

//! Production units and their split lineage.
//!
//! A [`Unit`] is one line of a shipment's packaging plan. Units produced by
//! splitting carry a [`Lineage::SplitChild`] pointing back at the pre-split
//! unit and a [`SplitTag`] of the form `k/n`.
//!
//! # Wire format
//!
//! Units serialize to the camelCase JSON shape used by the dashboard:
//!
//! ```json
//! { "id": "42_split_1", "brand": "TPS", "productName": "Fert", "size": "Gallon",
//!   "quantity": 12, "formula": "", "volume": 0.0,
//!   "originalId": "42", "splitTag": "1/2" }
//! ```
//!
//! `originalId` and `splitTag` are either both present or both absent. A
//! record carrying only one of them (or an unparsable tag) decodes as a whole
//! unit.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Opaque unit identifier, possibly server-assigned, possibly synthesized.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UnitId(String);

impl UnitId {
    /// Create an id from any string-like value.
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Borrow the raw id.
    #[inline]
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Whether the id is missing (empty or whitespace).
    #[must_use]
    pub fn is_blank(&self) -> bool {
        self.0.trim().is_empty()
    }

    /// Split index encoded in an id of the form `<original>_split_<n>`.
    ///
    /// Returns `None` unless the id starts with `original` followed by
    /// `_split_` and a decimal index.
    #[must_use]
    pub fn split_index_for(&self, original: &UnitId) -> Option<u32> {
        self.0
            .strip_prefix(original.as_str())?
            .strip_prefix(SPLIT_ID_INFIX)?
            .parse()
            .ok()
    }

    /// Build the id of the `index`-th split batch of `original`.
    #[must_use]
    pub fn split_child(original: &UnitId, index: u32) -> Self {
        Self(format!("{}{SPLIT_ID_INFIX}{index}", original.as_str()))
    }
}

/// Separator between the original id and the split index in batch ids.
pub const SPLIT_ID_INFIX: &str = "_split_";

impl fmt::Display for UnitId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for UnitId {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

impl From<String> for UnitId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

/// Position of a split batch among its siblings, rendered as `k/n`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SplitTag {
    ordinal: u32,
    total: u32,
}

impl SplitTag {
    /// Create a tag. Returns `None` unless `1 <= ordinal <= total`.
    #[must_use]
    pub const fn new(ordinal: u32, total: u32) -> Option<Self> {
        if ordinal == 0 || ordinal > total {
            return None;
        }
        Some(Self { ordinal, total })
    }

    /// This batch's 1-based position among its siblings.
    #[must_use]
    pub const fn ordinal(self) -> u32 {
        self.ordinal
    }

    /// Total sibling count.
    #[must_use]
    pub const fn total(self) -> u32 {
        self.total
    }
}

impl fmt::Display for SplitTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.ordinal, self.total)
    }
}

/// Error returned when a `k/n` split tag cannot be parsed.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid split tag {0:?} (expected k/n with 1 <= k <= n)")]
pub struct ParseSplitTagError(pub String);

impl FromStr for SplitTag {
    type Err = ParseSplitTagError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let err = || ParseSplitTagError(s.to_owned());
        let (k, n) = s.trim().split_once('/').ok_or_else(err)?;
        let k = k.trim().parse().map_err(|_| err())?;
        let n = n.trim().parse().map_err(|_| err())?;
        Self::new(k, n).ok_or_else(err)
    }
}

/// Where a unit came from.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum Lineage {
    /// Not produced by a split.
    #[default]
    Whole,
    /// One batch of a split family.
    SplitChild {
        /// Id of the unit that was split.
        original_id: UnitId,
        /// Position among the family's batches.
        tag: SplitTag,
    },
}

/// One row of a shipment's packaging plan.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(from = "UnitRecord", into = "UnitRecord")]
pub struct Unit {
    pub id: UnitId,
    pub brand: String,
    pub product_name: String,
    pub size: String,
    pub quantity: u32,
    pub formula: String,
    pub volume: f64,
    pub lineage: Lineage,
}

impl Unit {
    /// Create a whole unit with empty formula and zero volume.
    #[must_use]
    pub fn new(
        id: impl Into<UnitId>,
        brand: impl Into<String>,
        product_name: impl Into<String>,
        size: impl Into<String>,
        quantity: u32,
    ) -> Self {
        Self {
            id: id.into(),
            brand: brand.into(),
            product_name: product_name.into(),
            size: size.into(),
            quantity,
            formula: String::new(),
            volume: 0.0,
            lineage: Lineage::Whole,
        }
    }

    /// Set the formula column.
    #[must_use]
    pub fn with_formula(mut self, formula: impl Into<String>) -> Self {
        self.formula = formula.into();
        self
    }

    /// Set the volume column.
    #[must_use]
    pub fn with_volume(mut self, volume: f64) -> Self {
        self.volume = volume;
        self
    }

    /// Whether this unit is a batch of a split family.
    #[inline]
    #[must_use]
    pub fn is_split_child(&self) -> bool {
        matches!(self.lineage, Lineage::SplitChild { .. })
    }

    /// The split tag, for split children.
    #[must_use]
    pub fn split_tag(&self) -> Option<SplitTag> {
        match &self.lineage {
            Lineage::Whole => None,
            Lineage::SplitChild { tag, .. } => Some(*tag),
        }
    }

    /// The pre-split unit's id, for split children.
    #[must_use]
    pub fn original_id(&self) -> Option<&UnitId> {
        match &self.lineage {
            Lineage::Whole => None,
            Lineage::SplitChild { original_id, .. } => Some(original_id),
        }
    }

    /// Id that a split of this unit would record as `original_id`.
    #[must_use]
    pub fn family_root(&self) -> &UnitId {
        self.original_id().unwrap_or(&self.id)
    }
}

/// Serialized shape of a [`Unit`].
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct UnitRecord {
    #[serde(default)]
    id: UnitId,
    #[serde(default)]
    brand: String,
    #[serde(default)]
    product_name: String,
    #[serde(default)]
    size: String,
    #[serde(default)]
    quantity: u32,
    #[serde(default)]
    formula: String,
    #[serde(default)]
    volume: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    original_id: Option<UnitId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    split_tag: Option<String>,
}

impl From<UnitRecord> for Unit {
    fn from(r: UnitRecord) -> Self {
        let lineage = match (r.original_id, r.split_tag) {
            (Some(original_id), Some(tag)) => match tag.parse() {
                Ok(tag) => Lineage::SplitChild { original_id, tag },
                Err(err) => {
                    tracing::warn!(
                        target: "packplan.unit",
                        id = %r.id,
                        error = %err,
                        "dropping unparsable split tag; decoding as whole unit"
                    );
                    Lineage::Whole
                }
            },
            (None, None) => Lineage::Whole,
            (original_id, tag) => {
                tracing::warn!(
                    target: "packplan.unit",
                    id = %r.id,
                    has_original_id = original_id.is_some(),
                    has_split_tag = tag.is_some(),
                    "incomplete split lineage; decoding as whole unit"
                );
                Lineage::Whole
            }
        };
        Self {
            id: r.id,
            brand: r.brand,
            product_name: r.product_name,
            size: r.size,
            quantity: r.quantity,
            formula: r.formula,
            volume: r.volume,
            lineage,
        }
    }
}

impl From<Unit> for UnitRecord {
    fn from(u: Unit) -> Self {
        let (original_id, split_tag) = match u.lineage {
            Lineage::Whole => (None, None),
            Lineage::SplitChild { original_id, tag } => (Some(original_id), Some(tag.to_string())),
        };
        Self {
            id: u.id,
            brand: u.brand,
            product_name: u.product_name,
            size: u.size,
            quantity: u.quantity,
            formula: u.formula,
            volume: u.volume,
            original_id,
            split_tag,
        }
    }
}
