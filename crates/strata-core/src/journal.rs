// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! The ordered mutation journal and its record variants.
//!
//! Records are a tagged enum plus a common header, not a type hierarchy: the
//! header carries ordering and lifecycle (`seq`, recursion depth, captured
//! overlay generation, the cancelled flag) and [`CellOp`] carries the
//! per-variant payload. Appending stages the record's effects into the
//! overlay immediately; applying to the real store happens only during the
//! commit walk, in ascending `seq` order.
use core::fmt;

use crate::overlay::AttachmentOp;
use crate::{
    Attachment, CellPos, CellSnapshot, CellState, ChangeFlags, KindId, Overlay,
};

/// Sequence number of a record within one batch.
///
/// Strictly increasing and unique inside a single journal; assignment order
/// is application order. Never reused across splices because the whole batch
/// draws from one counter.
#[repr(transparent)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct OpSeq(u64);

impl OpSeq {
    /// Builds a sequence number from a raw value.
    #[must_use]
    pub const fn from_raw(raw: u64) -> Self {
        Self(raw)
    }

    /// Raw numeric value.
    #[must_use]
    pub const fn value(self) -> u64 {
        self.0
    }
}

impl fmt::Display for OpSeq {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "s{}", self.0)
    }
}

/// Payload of a journal record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CellOp {
    /// Replace the cell state at the snapshot's position.
    StateChange {
        /// The cell as it was when the change was requested.
        snapshot: CellSnapshot,
        /// State to commit.
        new_state: CellState,
        /// Side effects to dispatch after the commit.
        flags: ChangeFlags,
    },
    /// Bind an attachment, together with the cell state that accompanies it.
    AttachmentAdd {
        /// Position receiving the binding.
        pos: CellPos,
        /// Attachment to bind; its in-flight marker is set while pending.
        attachment: Attachment,
        /// Cell state accompanying the bind.
        state: CellState,
    },
    /// Remove the binding captured in the snapshot.
    AttachmentRemove {
        /// The cell (including the removed attachment) at request time.
        snapshot: CellSnapshot,
        /// Cell state accompanying the removal.
        state: CellState,
    },
    /// Displace one binding with another in a single step.
    AttachmentReplace {
        /// Position whose binding is displaced.
        pos: CellPos,
        /// The binding being displaced; marker set while pending.
        displaced: Attachment,
        /// The binding taking its place; marker set while pending.
        replacement: Attachment,
    },
    /// Tell a neighboring position that its neighbor changed.
    NeighborNotification {
        /// Kind of the occupant that caused the notification.
        source_kind: KindId,
        /// Position the change happened at.
        source_pos: CellPos,
        /// Position being notified.
        notified_pos: CellPos,
        /// Snapshot of the source when the notification came out of vacate
        /// logic, for diagnostics.
        source_snapshot: Option<CellSnapshot>,
    },
}

impl CellOp {
    /// The position this record primarily acts on.
    #[must_use]
    pub const fn pos(&self) -> CellPos {
        match self {
            Self::StateChange { snapshot, .. } | Self::AttachmentRemove { snapshot, .. } => {
                snapshot.pos()
            }
            Self::AttachmentAdd { pos, .. } | Self::AttachmentReplace { pos, .. } => *pos,
            Self::NeighborNotification { notified_pos, .. } => *notified_pos,
        }
    }

    /// Stable single-byte tag used in receipt digests.
    #[must_use]
    pub const fn kind_tag(&self) -> u8 {
        match self {
            Self::StateChange { .. } => b's',
            Self::AttachmentAdd { .. } => b'a',
            Self::AttachmentRemove { .. } => b'r',
            Self::AttachmentReplace { .. } => b'x',
            Self::NeighborNotification { .. } => b'n',
        }
    }

    /// The captured pre-image, for the variants that carry one. Staleness
    /// re-validation compares this against the live store.
    #[must_use]
    pub const fn snapshot(&self) -> Option<&CellSnapshot> {
        match self {
            Self::StateChange { snapshot, .. } | Self::AttachmentRemove { snapshot, .. } => {
                Some(snapshot)
            }
            Self::AttachmentAdd { .. }
            | Self::AttachmentReplace { .. }
            | Self::NeighborNotification { .. } => None,
        }
    }

    /// Stages this record's speculative effects into the overlay.
    ///
    /// Called once at append time so in-flight readers observe the would-be
    /// state, and again from inside processing where a variant's sequence
    /// re-stages under the record's sandbox frame. Staging never touches the
    /// real store.
    pub fn stage_into(&self, overlay: &mut Overlay) {
        match self {
            Self::StateChange {
                snapshot,
                new_state,
                ..
            } => {
                overlay.stage_state(snapshot.pos(), *new_state);
            }
            Self::AttachmentAdd {
                pos,
                attachment,
                state,
            } => {
                overlay.stage_state(*pos, *state);
                overlay.stage_attachment(*pos, AttachmentOp::Add(attachment.clone()));
            }
            Self::AttachmentRemove { snapshot, state } => {
                overlay.stage_state(snapshot.pos(), *state);
                overlay.stage_attachment(snapshot.pos(), AttachmentOp::Remove);
            }
            Self::AttachmentReplace {
                pos, replacement, ..
            } => {
                overlay.stage_attachment(*pos, AttachmentOp::Replace(replacement.clone()));
            }
            Self::NeighborNotification { .. } => {}
        }
    }
}

impl fmt::Display for CellOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::StateChange {
                snapshot,
                new_state,
                flags,
            } => write!(
                f,
                "state {} -> {} @{} [{}]",
                snapshot.state(),
                new_state,
                snapshot.pos(),
                flags
            ),
            Self::AttachmentAdd {
                pos, attachment, ..
            } => write!(f, "attach+ {attachment} @{pos}"),
            Self::AttachmentRemove { snapshot, .. } => match snapshot.attachment() {
                Some(att) => write!(f, "attach- {} @{}", att, snapshot.pos()),
                None => write!(f, "attach- ? @{}", snapshot.pos()),
            },
            Self::AttachmentReplace {
                pos,
                displaced,
                replacement,
            } => write!(f, "attach~ {displaced} -> {replacement} @{pos}"),
            Self::NeighborNotification {
                source_kind,
                source_pos,
                notified_pos,
                ..
            } => write!(f, "notify {notified_pos} from {source_kind} @{source_pos}"),
        }
    }
}

/// Header plus payload for one journal record.
///
/// The payload is consumed (`take_op`) when the commit walk processes the
/// record, leaving the header behind for receipts. `cancelled` transitions
/// false to true at most once.
#[derive(Debug, Clone)]
pub struct JournalEntry {
    seq: OpSeq,
    depth: u32,
    snapshot_gen: u64,
    cancelled: bool,
    op: Option<CellOp>,
}

impl JournalEntry {
    /// Builds a live entry.
    #[must_use]
    pub const fn new(seq: OpSeq, depth: u32, snapshot_gen: u64, op: CellOp) -> Self {
        Self {
            seq,
            depth,
            snapshot_gen,
            cancelled: false,
            op: Some(op),
        }
    }

    /// Sequence number.
    #[must_use]
    pub const fn seq(&self) -> OpSeq {
        self.seq
    }

    /// Recursion depth the record was enqueued at.
    #[must_use]
    pub const fn depth(&self) -> u32 {
        self.depth
    }

    /// Overlay generation captured when the record was built.
    #[must_use]
    pub const fn snapshot_gen(&self) -> u64 {
        self.snapshot_gen
    }

    /// Whether the record has been cancelled.
    #[must_use]
    pub const fn is_cancelled(&self) -> bool {
        self.cancelled
    }

    /// Payload, unless already consumed by processing.
    #[must_use]
    pub const fn op(&self) -> Option<&CellOp> {
        self.op.as_ref()
    }

    /// Sets the cancelled flag, returning whether this call made the
    /// transition. Idempotent: the second call observes `false`.
    pub fn mark_cancelled(&mut self) -> bool {
        let transitioned = !self.cancelled;
        self.cancelled = true;
        transitioned
    }

    fn take_op(&mut self) -> Option<CellOp> {
        self.op.take()
    }
}

/// Ordered, append-only record log for one phase scope.
///
/// Reads go by index so appends during a commit walk never invalidate the
/// in-progress traversal: records enqueued while record `k` is processing
/// land at the tail and are simply visible to later index reads.
#[derive(Debug, Default)]
pub struct Journal {
    entries: Vec<JournalEntry>,
}

impl Journal {
    /// Creates an empty journal.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends `entry` and immediately stages its effects into `overlay`.
    ///
    /// Staging at append time is what makes the overlay a preview of the
    /// batch: readers see the would-be state before any commit happens.
    pub fn append(&mut self, entry: JournalEntry, overlay: &mut Overlay) -> OpSeq {
        debug_assert!(
            self.entries
                .last()
                .is_none_or(|last| last.seq() < entry.seq()),
            "journal seq must be strictly increasing"
        );
        if let Some(op) = entry.op() {
            op.stage_into(overlay);
        }
        let seq = entry.seq();
        self.entries.push(entry);
        seq
    }

    /// Number of records, consumed ones included.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the journal holds no records.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Record at `idx`, if in range.
    #[must_use]
    pub fn entry(&self, idx: usize) -> Option<&JournalEntry> {
        self.entries.get(idx)
    }

    /// Marks the record with `seq` cancelled.
    ///
    /// Returns `None` when no record here carries `seq`; `Some(transitioned)`
    /// otherwise, where `transitioned` is `false` for a repeat cancellation.
    pub fn cancel(&mut self, seq: OpSeq) -> Option<bool> {
        let idx = self.position_of(seq)?;
        Some(self.entries[idx].mark_cancelled())
    }

    /// Consumes the payload of the record at `idx` for processing.
    pub(crate) fn take_op(&mut self, idx: usize) -> Option<CellOp> {
        self.entries.get_mut(idx).and_then(JournalEntry::take_op)
    }

    /// Appends every record of `child` after this journal's records.
    ///
    /// The child belongs to a nested phase that just completed; its records
    /// joined before the parent could append again, so ascending seq order is
    /// preserved end to end.
    pub fn splice(&mut self, child: Self) {
        debug_assert!(
            match (self.entries.last(), child.entries.first()) {
                (Some(last), Some(first)) => last.seq() < first.seq(),
                _ => true,
            },
            "spliced journal would break ascending seq order"
        );
        self.entries.extend(child.entries);
    }

    /// Iterates records in order.
    pub fn entries(&self) -> impl Iterator<Item = &JournalEntry> {
        self.entries.iter()
    }

    fn position_of(&self, seq: OpSeq) -> Option<usize> {
        self.entries
            .binary_search_by_key(&seq, JournalEntry::seq)
            .ok()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::ChangeKind;

    fn stone() -> CellState {
        CellState::of(KindId::from_label("stone"))
    }

    fn state_change(seq: u64, pos: CellPos, new_state: CellState) -> JournalEntry {
        let snapshot = CellSnapshot::capture(pos, CellState::EMPTY, None, ChangeKind::Place);
        JournalEntry::new(
            OpSeq::from_raw(seq),
            0,
            0,
            CellOp::StateChange {
                snapshot,
                new_state,
                flags: ChangeFlags::NONE,
            },
        )
    }

    #[test]
    fn append_stages_into_the_overlay() {
        let mut journal = Journal::new();
        let mut overlay = Overlay::new();
        let pos = CellPos::new(4, 0, 0);
        journal.append(state_change(0, pos, stone()), &mut overlay);
        assert_eq!(overlay.staged_state(pos), Some(stone()));
        assert_eq!(journal.len(), 1);
    }

    #[test]
    fn cancel_is_idempotent_and_reports_the_transition() {
        let mut journal = Journal::new();
        let mut overlay = Overlay::new();
        journal.append(state_change(0, CellPos::new(0, 0, 0), stone()), &mut overlay);
        assert_eq!(journal.cancel(OpSeq::from_raw(0)), Some(true));
        assert_eq!(journal.cancel(OpSeq::from_raw(0)), Some(false));
        assert_eq!(journal.cancel(OpSeq::from_raw(9)), None);
        assert!(journal.entry(0).unwrap().is_cancelled());
    }

    #[test]
    fn take_op_consumes_exactly_once() {
        let mut journal = Journal::new();
        let mut overlay = Overlay::new();
        journal.append(state_change(0, CellPos::new(0, 0, 0), stone()), &mut overlay);
        assert!(journal.take_op(0).is_some());
        assert!(journal.take_op(0).is_none(), "payload consumed");
        assert!(journal.entry(0).is_some(), "header survives for receipts");
    }

    #[test]
    fn splice_preserves_ascending_seq_order() {
        let mut overlay = Overlay::new();
        let mut parent = Journal::new();
        parent.append(state_change(0, CellPos::new(0, 0, 0), stone()), &mut overlay);
        let mut child = Journal::new();
        child.append(state_change(1, CellPos::new(1, 0, 0), stone()), &mut overlay);
        child.append(state_change(2, CellPos::new(2, 0, 0), stone()), &mut overlay);
        parent.splice(child);
        let seqs: Vec<u64> = parent.entries().map(|e| e.seq().value()).collect();
        assert_eq!(seqs, vec![0, 1, 2]);
    }
}
