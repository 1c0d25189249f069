// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Immutable captures of a cell at request time.
use core::fmt;

use crate::{Attachment, CellPos, CellState, ChangeKind};

/// What a cell held at the moment a mutation was requested.
///
/// A snapshot is taken before the request stages anything, is owned by
/// exactly one journal record, and is never mutated afterwards. It is the
/// "old" side of every transition: vacate logic, listener dispatch, and
/// staleness re-validation all read from it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CellSnapshot {
    pos: CellPos,
    state: CellState,
    attachment: Option<Attachment>,
    change: ChangeKind,
}

impl CellSnapshot {
    /// Captures a snapshot from the observed position, state, and attachment.
    #[must_use]
    pub const fn capture(
        pos: CellPos,
        state: CellState,
        attachment: Option<Attachment>,
        change: ChangeKind,
    ) -> Self {
        Self {
            pos,
            state,
            attachment,
            change,
        }
    }

    /// Position the snapshot was taken at.
    #[must_use]
    pub const fn pos(&self) -> CellPos {
        self.pos
    }

    /// State the cell held at capture time.
    #[must_use]
    pub const fn state(&self) -> CellState {
        self.state
    }

    /// Attachment bound at capture time, if any.
    #[must_use]
    pub const fn attachment(&self) -> Option<&Attachment> {
        self.attachment.as_ref()
    }

    /// Classification of the transition this snapshot belongs to.
    #[must_use]
    pub const fn change(&self) -> ChangeKind {
        self.change
    }

    /// Consumes the snapshot, yielding the captured attachment.
    #[must_use]
    pub fn into_attachment(self) -> Option<Attachment> {
        self.attachment
    }
}

impl fmt::Display for CellSnapshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {} @{}", self.change, self.state, self.pos)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{AttachmentId, KindId};
    use bytes::Bytes;

    #[test]
    fn capture_preserves_every_field() {
        let pos = CellPos::new(1, 2, 3);
        let state = CellState::of(KindId::from_label("furnace"));
        let att = Attachment::new(
            AttachmentId::from_raw(11),
            KindId::from_label("furnace"),
            Bytes::from_static(b"fuel"),
        );
        let snap = CellSnapshot::capture(pos, state, Some(att.clone()), ChangeKind::Break);
        assert_eq!(snap.pos(), pos);
        assert_eq!(snap.state(), state);
        assert_eq!(snap.change(), ChangeKind::Break);
        assert_eq!(snap.attachment(), Some(&att));
        assert_eq!(snap.into_attachment(), Some(att));
    }
}
