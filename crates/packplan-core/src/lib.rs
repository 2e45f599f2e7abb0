#![forbid(unsafe_code)]

//! packplan core
//!
//! Pure, storage-free building blocks of the shipment "sort products" table:
//!
//! - [`unit`] - production units and their split lineage
//! - [`identity`] - content-derived [`StableId`]s that survive refetches
//! - [`step`] - size-class split increments
//! - [`splitter`] - splitting a unit into batches and merging them back
//! - [`lock`] - units pinned against filter/sort repositioning
//! - [`filter`] - column filters, one-shot sort, display-list derivation
//! - [`selection`] - display-row selection (single, shift-range, toggle)
//! - [`reorder`] - drag-and-drop reducer over the working list
//!
//! # Role in packplan
//! `packplan-core` holds no state beyond what callers pass in. The
//! `packplan-engine` crate owns the working list, persistence, and
//! reconciliation, and calls into these modules for every mutation.

pub mod filter;
pub mod identity;
pub mod lock;
pub mod reorder;
pub mod selection;
pub mod splitter;
pub mod step;
pub mod unit;

pub use filter::{
    CellValue, Column, Condition, DisplayList, DisplayRow, FilterSet, FilterSpec, SortDirection,
    column_values, derive_display_list, sort_once,
};
pub use identity::{StableId, base_identity, identify};
pub use lock::LockSet;
pub use reorder::{
    CompositeKey, DragSpec, DropPosition, ReorderError, ReorderOutcome, RowRef,
    display_indices_of, reorder,
};
pub use selection::{ClickModifiers, Selection};
pub use splitter::{
    BatchSplitter, MergeOutcome, SplitError, SplitFamily, SplitOutcome, family_indices,
    is_split_entry_point, retag_family, split_families,
};
pub use step::{StepRule, StepRules, round_to_step};
pub use unit::{Lineage, SplitTag, Unit, UnitId};
