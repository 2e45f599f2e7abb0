#![forbid(unsafe_code)]

//! Content-derived unit identity.
//!
//! Server ids regenerate across fetches; the [`StableId`] of a unit does not.
//! It is built from `brand::product_name::size`, suffixed with `::k/n` for
//! split batches. Stripping the suffix yields the unit's *stable family*.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::unit::{SplitTag, Unit};

/// Separator between stable id components.
pub const STABLE_ID_SEPARATOR: &str = "::";

/// Content-based identity of a unit.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct StableId(String);

impl StableId {
    /// Wrap a previously serialized stable id.
    #[must_use]
    pub fn from_raw(raw: impl Into<String>) -> Self {
        Self(raw.into())
    }

    /// Borrow the raw string.
    #[inline]
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Stable id with any trailing `::k/n` split tag removed.
    #[must_use]
    pub fn base(&self) -> StableId {
        match self.0.rsplit_once(STABLE_ID_SEPARATOR) {
            Some((head, tail)) if tail.parse::<SplitTag>().is_ok() => Self(head.to_owned()),
            _ => self.clone(),
        }
    }
}

impl fmt::Display for StableId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Stable id of a unit.
#[must_use]
pub fn identify(unit: &Unit) -> StableId {
    let mut id = base_identity(unit).0;
    if let Some(tag) = unit.split_tag() {
        id.push_str(STABLE_ID_SEPARATOR);
        id.push_str(&tag.to_string());
    }
    StableId(id)
}

/// Stable id of a unit ignoring its split tag (its stable family).
#[must_use]
pub fn base_identity(unit: &Unit) -> StableId {
    StableId(format!(
        "{}{STABLE_ID_SEPARATOR}{}{STABLE_ID_SEPARATOR}{}",
        unit.brand, unit.product_name, unit.size
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::unit::{Lineage, UnitId};

    fn child(tag: &str) -> Unit {
        Unit {
            lineage: Lineage::SplitChild {
                original_id: UnitId::new("7"),
                tag: tag.parse().unwrap(),
            },
            ..Unit::new("7_split_1", "TPS", "Fert", "Gallon", 10)
        }
    }

    #[test]
    fn whole_unit_identity() {
        let unit = Unit::new("7", "TPS", "Fert", "Gallon", 40);
        assert_eq!(identify(&unit).as_str(), "TPS::Fert::Gallon");
    }

    #[test]
    fn split_child_identity_has_tag_suffix() {
        assert_eq!(identify(&child("2/3")).as_str(), "TPS::Fert::Gallon::2/3");
        assert_eq!(identify(&child("2/3")).base().as_str(), "TPS::Fert::Gallon");
    }

    #[test]
    fn identity_ignores_server_id() {
        let a = Unit::new("1", "TPS", "Fert", "Gallon", 40);
        let b = Unit::new("abc-999", "TPS", "Fert", "Gallon", 12);
        assert_eq!(identify(&a), identify(&b));
    }

    #[test]
    fn base_of_whole_id_is_unchanged() {
        let id = StableId::from_raw("A::B::1/2 Gallon");
        assert_eq!(id.base(), id);
    }
}
