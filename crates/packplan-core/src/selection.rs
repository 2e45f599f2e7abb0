#![forbid(unsafe_code)]

//! Row selection over the display list.
//!
//! Indices are display indices. A plain click selects one row and moves the
//! anchor; a toggle click (ctrl/cmd) flips one row; a shift click selects the
//! inclusive range from the anchor.

use std::collections::BTreeSet;

use bitflags::bitflags;

bitflags! {
    /// Modifier keys held during a click.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct ClickModifiers: u8 {
        /// Extend from the anchor.
        const SHIFT = 0b01;
        /// Ctrl on most platforms, Cmd on macOS.
        const TOGGLE = 0b10;
    }
}

/// Selected display rows.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Selection {
    anchor: Option<usize>,
    selected: BTreeSet<usize>,
}

impl Selection {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Apply a click on display row `index`.
    pub fn click(&mut self, index: usize, modifiers: ClickModifiers) {
        if modifiers.contains(ClickModifiers::SHIFT)
            && let Some(anchor) = self.anchor
        {
            let (lo, hi) = if anchor <= index {
                (anchor, index)
            } else {
                (index, anchor)
            };
            if !modifiers.contains(ClickModifiers::TOGGLE) {
                self.selected.clear();
            }
            self.selected.extend(lo..=hi);
        } else if modifiers.contains(ClickModifiers::TOGGLE) {
            if !self.selected.insert(index) {
                self.selected.remove(&index);
            }
            self.anchor = Some(index);
        } else {
            self.select_only(index);
        }
        tracing::trace!(
            target: "packplan.selection",
            index,
            shift = modifiers.contains(ClickModifiers::SHIFT),
            toggle = modifiers.contains(ClickModifiers::TOGGLE),
            selected_count = self.selected.len(),
            "selection click"
        );
    }

    /// Select exactly `index`.
    pub fn select_only(&mut self, index: usize) {
        self.selected.clear();
        self.selected.insert(index);
        self.anchor = Some(index);
    }

    /// Replace the selection; the anchor moves to the first index.
    pub fn select_indices(&mut self, indices: impl IntoIterator<Item = usize>) {
        self.selected = indices.into_iter().collect();
        self.anchor = self.selected.first().copied();
    }

    pub fn clear(&mut self) {
        self.selected.clear();
        self.anchor = None;
    }

    /// Drop indices at or past `len` (the display list shrank).
    pub fn clamp(&mut self, len: usize) {
        self.selected.retain(|&i| i < len);
        if self.anchor.is_some_and(|a| a >= len) {
            self.anchor = self.selected.first().copied();
        }
    }

    #[must_use]
    pub fn anchor(&self) -> Option<usize> {
        self.anchor
    }

    #[must_use]
    pub fn contains(&self, index: usize) -> bool {
        self.selected.contains(&index)
    }

    #[must_use]
    pub fn indices(&self) -> &BTreeSet<usize> {
        &self.selected
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.selected.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.selected.is_empty()
    }

    /// Rows a drag starting on `index` should carry: the whole selection if
    /// `index` is part of it, otherwise just `index`.
    #[must_use]
    pub fn drag_set(&self, index: usize) -> Vec<usize> {
        if self.selected.contains(&index) {
            self.selected.iter().copied().collect()
        } else {
            vec![index]
        }
    }
}
