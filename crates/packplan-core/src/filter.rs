#![forbid(unsafe_code)]

//! Column filters, one-shot sorting, and display-list derivation.
//!
//! The display list is a projection of the working list. It is recomputed on
//! every render and never mutates the working list. Locked units are exempt
//! from filtering and keep their working index: the rebuild walks slots
//! `0..n` and emits the locked unit that owns a slot, otherwise the next
//! surviving unlocked unit.
//!
//! Sorting is one-shot. [`sort_once`] reorders the unlocked units of the
//! working list in place and keeps no comparator around, so later filter
//! changes do not re-apply it.

use std::cmp::Ordering;
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::lock::LockSet;
use crate::unit::Unit;

/// Filterable, sortable table columns.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Column {
    Brand,
    ProductName,
    Size,
    Quantity,
    Formula,
    Volume,
    SplitTag,
}

impl Column {
    /// Every column, in table order.
    pub const ALL: [Column; 7] = [
        Column::Brand,
        Column::ProductName,
        Column::Size,
        Column::Quantity,
        Column::Formula,
        Column::Volume,
        Column::SplitTag,
    ];

    /// Whether values compare numerically.
    #[must_use]
    pub const fn is_numeric(self) -> bool {
        matches!(self, Column::Quantity | Column::Volume)
    }

    /// Raw cell value of `unit` in this column.
    #[must_use]
    pub fn value(self, unit: &Unit) -> CellValue {
        match self {
            Column::Brand => CellValue::Text(unit.brand.clone()),
            Column::ProductName => CellValue::Text(unit.product_name.clone()),
            Column::Size => CellValue::Text(unit.size.clone()),
            Column::Quantity => CellValue::Number(f64::from(unit.quantity)),
            Column::Formula => CellValue::Text(unit.formula.clone()),
            Column::Volume => CellValue::Number(unit.volume),
            Column::SplitTag => match unit.split_tag() {
                Some(tag) => CellValue::Text(tag.to_string()),
                None => CellValue::Empty,
            },
        }
    }
}

/// A raw cell value.
#[derive(Debug, Clone, PartialEq)]
pub enum CellValue {
    Empty,
    Text(String),
    Number(f64),
}

impl CellValue {
    #[must_use]
    pub fn is_empty(&self) -> bool {
        match self {
            CellValue::Empty => true,
            CellValue::Text(s) => s.trim().is_empty(),
            CellValue::Number(n) => n.is_nan(),
        }
    }

    /// Numeric reading with JavaScript `Number(...)` semantics.
    #[must_use]
    pub fn as_number(&self) -> f64 {
        match self {
            CellValue::Empty => 0.0,
            CellValue::Text(s) => coerce_number(s),
            CellValue::Number(n) => *n,
        }
    }
}

impl fmt::Display for CellValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CellValue::Empty => Ok(()),
            CellValue::Text(s) => f.write_str(s),
            CellValue::Number(n) if n.fract() == 0.0 && n.is_finite() => write!(f, "{n:.0}"),
            CellValue::Number(n) => write!(f, "{n}"),
        }
    }
}

/// Coerce a string the way JavaScript `Number(...)` does for plain decimals:
/// blank is `0`, anything unparsable is `NaN`.
#[must_use]
pub fn coerce_number(raw: &str) -> f64 {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return 0.0;
    }
    trimmed.parse().unwrap_or(f64::NAN)
}

/// Condition predicate applied to a column's raw value.
///
/// Comparison variants coerce both sides to numbers; NaN never matches.
/// Text variants compare case-insensitively.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "camelCase")]
pub enum Condition {
    Equals(String),
    NotEquals(String),
    GreaterThan(String),
    GreaterOrEqual(String),
    LessThan(String),
    LessOrEqual(String),
    /// Inclusive `[min, max]`.
    Between(String, String),
    NotBetween(String, String),
    Contains(String),
    NotContains(String),
    StartsWith(String),
    EndsWith(String),
    IsEmpty,
    IsNotEmpty,
}

impl Condition {
    /// Evaluate against a cell of `column`.
    #[must_use]
    pub fn matches(&self, column: Column, value: &CellValue) -> bool {
        let number = || value.as_number();
        let text = || value.to_string().to_lowercase();
        match self {
            Condition::Equals(v) => equals(column, value, v),
            Condition::NotEquals(v) => !equals(column, value, v),
            Condition::GreaterThan(v) => number() > coerce_number(v),
            Condition::GreaterOrEqual(v) => number() >= coerce_number(v),
            Condition::LessThan(v) => number() < coerce_number(v),
            Condition::LessOrEqual(v) => number() <= coerce_number(v),
            Condition::Between(min, max) => in_range(number(), min, max),
            Condition::NotBetween(min, max) => {
                let n = number();
                !n.is_nan() && !in_range(n, min, max)
            }
            Condition::Contains(v) => text().contains(&v.to_lowercase()),
            Condition::NotContains(v) => !text().contains(&v.to_lowercase()),
            Condition::StartsWith(v) => text().starts_with(&v.to_lowercase()),
            Condition::EndsWith(v) => text().ends_with(&v.to_lowercase()),
            Condition::IsEmpty => value.is_empty(),
            Condition::IsNotEmpty => !value.is_empty(),
        }
    }
}

fn equals(column: Column, value: &CellValue, expected: &str) -> bool {
    if column.is_numeric() {
        value.as_number() == coerce_number(expected)
    } else {
        value.to_string().trim().eq_ignore_ascii_case(expected.trim())
    }
}

fn in_range(n: f64, min: &str, max: &str) -> bool {
    n >= coerce_number(min) && n <= coerce_number(max)
}

/// Filter applied to one column.
///
/// An empty `selected_values` set places no value restriction.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FilterSpec {
    #[serde(default)]
    pub selected_values: BTreeSet<String>,
    #[serde(default)]
    pub condition: Option<Condition>,
}

impl FilterSpec {
    /// Filter keeping only the given values.
    #[must_use]
    pub fn values<I, S>(values: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            selected_values: values.into_iter().map(Into::into).collect(),
            condition: None,
        }
    }

    /// Filter applying only a condition.
    #[must_use]
    pub fn condition(condition: Condition) -> Self {
        Self {
            selected_values: BTreeSet::new(),
            condition: Some(condition),
        }
    }

    /// Whether the spec restricts nothing.
    #[must_use]
    pub fn is_noop(&self) -> bool {
        self.selected_values.is_empty() && self.condition.is_none()
    }

    /// Whether `unit` survives this filter on `column`.
    #[must_use]
    pub fn keeps(&self, column: Column, unit: &Unit) -> bool {
        let value = column.value(unit);
        if !self.selected_values.is_empty() && !self.selected_values.contains(&value.to_string()) {
            return false;
        }
        self.condition
            .as_ref()
            .is_none_or(|condition| condition.matches(column, &value))
    }

    /// Whether the column should be highlighted as filtered, given the values
    /// currently available in it. Selecting every available value is the same
    /// as no filter.
    #[must_use]
    pub fn is_active(&self, available: &[String]) -> bool {
        if self.condition.is_some() {
            return true;
        }
        !self.selected_values.is_empty()
            && !available.iter().all(|v| self.selected_values.contains(v))
    }
}

/// Per-column filters.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FilterSet {
    columns: BTreeMap<Column, FilterSpec>,
}

impl FilterSet {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Install `spec` on `column`; a no-op spec clears the column.
    pub fn set(&mut self, column: Column, spec: FilterSpec) {
        if spec.is_noop() {
            self.columns.remove(&column);
        } else {
            self.columns.insert(column, spec);
        }
    }

    pub fn clear(&mut self, column: Column) {
        self.columns.remove(&column);
    }

    pub fn clear_all(&mut self) {
        self.columns.clear();
    }

    #[must_use]
    pub fn get(&self, column: Column) -> Option<&FilterSpec> {
        self.columns.get(&column)
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.columns.is_empty()
    }

    /// Whether `unit` survives every column filter.
    #[must_use]
    pub fn keeps(&self, unit: &Unit) -> bool {
        self.columns
            .iter()
            .all(|(column, spec)| spec.keeps(*column, unit))
    }

    /// Whether `column` is actively filtered against the values of `list`.
    #[must_use]
    pub fn is_column_active(&self, column: Column, list: &[Unit]) -> bool {
        self.columns
            .get(&column)
            .is_some_and(|spec| spec.is_active(&column_values(list, column)))
    }
}

/// Distinct display values of `column` in `list`, sorted numerically for
/// numeric columns and case-insensitively otherwise.
#[must_use]
pub fn column_values(list: &[Unit], column: Column) -> Vec<String> {
    let mut values: Vec<CellValue> = Vec::new();
    let mut seen = BTreeSet::new();
    for unit in list {
        let value = column.value(unit);
        if seen.insert(value.to_string()) {
            values.push(value);
        }
    }
    values.sort_by(|a, b| compare_cells(column, a, b));
    values.iter().map(ToString::to_string).collect()
}

/// One row of the display list.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DisplayRow {
    /// Index of the unit in the working list.
    pub working_index: usize,
    /// Slot of the rebuild walk that emitted this row. Equals
    /// `working_index` for locked rows.
    pub slot: usize,
    pub locked: bool,
}

/// Filtered projection of the working list.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DisplayList {
    rows: Vec<DisplayRow>,
}

impl DisplayList {
    #[must_use]
    pub fn rows(&self) -> &[DisplayRow] {
        &self.rows
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    #[must_use]
    pub fn get(&self, display_index: usize) -> Option<&DisplayRow> {
        self.rows.get(display_index)
    }

    /// Working-list indices in display order.
    pub fn working_indices(&self) -> impl Iterator<Item = usize> + '_ {
        self.rows.iter().map(|r| r.working_index)
    }

    /// Display index of the row showing working index `working_index`.
    #[must_use]
    pub fn display_index_of(&self, working_index: usize) -> Option<usize> {
        self.rows
            .iter()
            .position(|r| r.working_index == working_index)
    }

    /// Resolve the rows to units of `working`.
    pub fn units<'a>(&'a self, working: &'a [Unit]) -> impl Iterator<Item = &'a Unit> + 'a {
        self.rows.iter().filter_map(|r| working.get(r.working_index))
    }
}

/// Derive the display list from the working list.
#[must_use]
pub fn derive_display_list(working: &[Unit], filters: &FilterSet, locks: &LockSet) -> DisplayList {
    let survivors = working
        .iter()
        .enumerate()
        .filter(|(_, u)| !locks.is_locked(&u.id) && filters.keeps(u))
        .map(|(i, _)| i);
    DisplayList {
        rows: rebuild(working, locks, survivors),
    }
}

fn rebuild(
    working: &[Unit],
    locks: &LockSet,
    unlocked: impl IntoIterator<Item = usize>,
) -> Vec<DisplayRow> {
    let mut unlocked = unlocked.into_iter();
    let mut rows = Vec::with_capacity(working.len());
    for (slot, unit) in working.iter().enumerate() {
        if locks.is_locked(&unit.id) {
            rows.push(DisplayRow {
                working_index: slot,
                slot,
                locked: true,
            });
        } else if let Some(working_index) = unlocked.next() {
            rows.push(DisplayRow {
                working_index,
                slot,
                locked: false,
            });
        }
    }
    rows
}

/// Sort direction for [`sort_once`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum SortDirection {
    Ascending,
    Descending,
}

/// Reorder the unlocked units of `working` by `column`, leaving locked
/// units at their indices. The sort is stable.
pub fn sort_once(working: &mut Vec<Unit>, column: Column, direction: SortDirection, locks: &LockSet) {
    let mut order: Vec<usize> = (0..working.len())
        .filter(|&i| !locks.is_locked(&working[i].id))
        .collect();
    order.sort_by(|&a, &b| {
        let ord = compare_cells(column, &column.value(&working[a]), &column.value(&working[b]));
        match direction {
            SortDirection::Ascending => ord,
            SortDirection::Descending => ord.reverse(),
        }
    });

    let rows = rebuild(working, locks, order);
    let mut taken: Vec<Option<Unit>> = std::mem::take(working).into_iter().map(Some).collect();
    working.extend(rows.iter().filter_map(|r| taken[r.working_index].take()));

    tracing::debug!(
        target: "packplan.filter",
        column = ?column,
        direction = ?direction,
        locked = locks.len(),
        rows = working.len(),
        "one-shot sort applied"
    );
}

fn compare_cells(column: Column, a: &CellValue, b: &CellValue) -> Ordering {
    if column.is_numeric() {
        a.as_number().total_cmp(&b.as_number())
    } else {
        a.to_string()
            .to_lowercase()
            .cmp(&b.to_string().to_lowercase())
    }
}
