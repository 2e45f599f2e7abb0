#![forbid(unsafe_code)]

//! Units pinned in place against filter and sort repositioning.
//!
//! A lock only freezes the *position* a unit holds under filtering and
//! one-shot sorting. Locked units still move under drag-and-drop and can be
//! split or merged.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use crate::unit::{Unit, UnitId};

/// Set of locked unit ids.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct LockSet {
    ids: BTreeSet<UnitId>,
}

impl LockSet {
    /// Create an empty lock set.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Flip the lock on `id`. Returns whether the unit is now locked.
    pub fn toggle(&mut self, id: &UnitId) -> bool {
        if self.ids.remove(id) {
            false
        } else {
            self.ids.insert(id.clone());
            true
        }
    }

    /// Lock `id`.
    pub fn lock(&mut self, id: UnitId) {
        self.ids.insert(id);
    }

    #[inline]
    #[must_use]
    pub fn is_locked(&self, id: &UnitId) -> bool {
        self.ids.contains(id)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.ids.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    /// Locked ids in sorted order.
    pub fn iter(&self) -> impl Iterator<Item = &UnitId> {
        self.ids.iter()
    }

    /// Drop ids of units no longer in `list`. Returns how many were removed.
    pub fn prune(&mut self, list: &[Unit]) -> usize {
        let before = self.ids.len();
        let present: BTreeSet<&UnitId> = list.iter().map(|u| &u.id).collect();
        self.ids.retain(|id| present.contains(id));
        before - self.ids.len()
    }

    /// Replace the id of a locked unit (after a merge or re-key).
    pub fn rekey(&mut self, from: &UnitId, to: UnitId) {
        if self.ids.remove(from) {
            self.ids.insert(to);
        }
    }
}

impl FromIterator<UnitId> for LockSet {
    fn from_iter<I: IntoIterator<Item = UnitId>>(iter: I) -> Self {
        Self {
            ids: iter.into_iter().collect(),
        }
    }
}
