// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Real backing store for committed cell state.
//!
//! `BTreeMap`-backed so iteration is deterministic. The store holds only
//! committed truth: staging lives in the [`Overlay`](crate::Overlay), and the
//! tracker mutates the store exclusively from inside record processing.
use std::collections::BTreeMap;

use crate::{Attachment, CellPos, CellState};

/// Committed cell states and attachment bindings.
///
/// Absent positions read as [`CellState::EMPTY`]; writing the empty state
/// drops the entry so the map tracks only occupied cells. Attachment
/// replacement is a single map insert, which is what makes a replace
/// observable as "exactly one bound" at every point.
#[derive(Debug, Default, Clone)]
pub struct GridStore {
    cells: BTreeMap<CellPos, CellState>,
    attachments: BTreeMap<CellPos, Attachment>,
}

impl GridStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Committed state at `pos`.
    #[must_use]
    pub fn state(&self, pos: CellPos) -> CellState {
        self.cells.get(&pos).copied().unwrap_or(CellState::EMPTY)
    }

    /// Writes `state` at `pos`, returning the previous committed state.
    pub fn set_state(&mut self, pos: CellPos, state: CellState) -> CellState {
        let previous = if state == CellState::EMPTY {
            self.cells.remove(&pos)
        } else {
            self.cells.insert(pos, state)
        };
        previous.unwrap_or(CellState::EMPTY)
    }

    /// Attachment bound at `pos`, if any.
    #[must_use]
    pub fn attachment(&self, pos: CellPos) -> Option<&Attachment> {
        self.attachments.get(&pos)
    }

    /// Binds `attachment` at `pos`, returning whatever binding it displaced.
    ///
    /// A replace goes through this as one insert; there is no intermediate
    /// unbound observation point.
    pub fn bind_attachment(&mut self, pos: CellPos, attachment: Attachment) -> Option<Attachment> {
        self.attachments.insert(pos, attachment)
    }

    /// Removes the binding at `pos`, returning it.
    pub fn unbind_attachment(&mut self, pos: CellPos) -> Option<Attachment> {
        self.attachments.remove(&pos)
    }

    /// Number of occupied cells.
    #[must_use]
    pub fn cell_count(&self) -> usize {
        self.cells.len()
    }

    /// Number of bound attachments.
    #[must_use]
    pub fn attachment_count(&self) -> usize {
        self.attachments.len()
    }

    /// Iterates occupied cells in position order.
    pub fn cells(&self) -> impl Iterator<Item = (&CellPos, &CellState)> {
        self.cells.iter()
    }

    /// Iterates attachment bindings in position order.
    pub fn attachments(&self) -> impl Iterator<Item = (&CellPos, &Attachment)> {
        self.attachments.iter()
    }
}
