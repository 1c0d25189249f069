// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Speculative overlay over the real store.
//!
//! Every pending record stages its would-be effects here at append time, so
//! in-flight readers observe the state the batch is building toward while the
//! [`GridStore`](crate::GridStore) still holds committed truth. The overlay
//! is an append-only journal of staged writes plus per-position shadow
//! chains: a later stage for the same position shadows the earlier one, and
//! unwinding walks the chain backwards.
//!
//! ## Frames
//!
//! [`Overlay::push_frame`] captures the current extent of both journals and
//! returns an [`OverlayFrame`]. Popping the frame discards every entry staged
//! after the capture point (sandboxed rollback); releasing it absorbs those
//! entries into the enclosing scope. Frames are strictly LIFO and the handle
//! is consumed by either operation, so a frame cannot be popped twice.
//!
//! ## Generation
//!
//! The `generation` counter advances on every discard (frame pop, clear) and
//! on record cancellation. Records stamp the generation they were captured
//! against; a mismatch at processing time means staged context the record may
//! have depended on is gone, and the record must re-validate against the real
//! store before applying.
use rustc_hash::FxHashMap;

use crate::{Attachment, CellPos, CellState, GridStore};

/// A staged attachment transition, queued per position.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AttachmentOp {
    /// Bind this attachment at the position.
    Add(Attachment),
    /// Remove whatever binding the position holds.
    Remove,
    /// Displace the current binding with this attachment in one step.
    Replace(Attachment),
}

/// What the overlay says a position's binding will become.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StagedBinding<'a> {
    /// An attachment will be bound.
    Bound(&'a Attachment),
    /// The binding will be absent.
    Vacant,
}

#[derive(Debug, Clone)]
struct StagedState {
    pos: CellPos,
    state: CellState,
    prev: Option<usize>,
}

#[derive(Debug, Clone)]
struct StagedAttachment {
    pos: CellPos,
    op: AttachmentOp,
    prev: Option<usize>,
}

#[derive(Debug, Clone, Copy)]
struct FrameMark {
    token: u64,
    state_mark: usize,
    att_mark: usize,
}

/// Handle to an open overlay frame.
///
/// Consumed by [`Overlay::pop_frame`] or [`Overlay::release_frame`]; holding
/// it is what authorizes closing the frame, and dropping it without closing
/// leaks the frame (the next LIFO check will catch the mismatch).
#[derive(Debug)]
#[must_use = "close the frame via pop_frame or release_frame"]
pub struct OverlayFrame {
    token: u64,
}

/// Speculative staging layer. See the module docs for the model.
#[derive(Debug, Default)]
pub struct Overlay {
    states: Vec<StagedState>,
    state_index: FxHashMap<CellPos, usize>,
    atts: Vec<StagedAttachment>,
    att_index: FxHashMap<CellPos, usize>,
    frames: Vec<FrameMark>,
    next_token: u64,
    generation: u64,
}

impl Overlay {
    /// Creates an empty overlay.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Stages a pending cell-state write. Later stages for the same position
    /// shadow earlier ones.
    pub fn stage_state(&mut self, pos: CellPos, state: CellState) {
        let idx = self.states.len();
        let prev = self.state_index.insert(pos, idx);
        self.states.push(StagedState { pos, state, prev });
    }

    /// Stages a pending attachment transition at `pos`.
    pub fn stage_attachment(&mut self, pos: CellPos, op: AttachmentOp) {
        let idx = self.atts.len();
        let prev = self.att_index.insert(pos, idx);
        self.atts.push(StagedAttachment { pos, op, prev });
    }

    /// Latest staged state for `pos`, if any.
    #[must_use]
    pub fn staged_state(&self, pos: CellPos) -> Option<CellState> {
        self.state_index.get(&pos).map(|&idx| self.states[idx].state)
    }

    /// Latest staged binding outcome for `pos`, if any transition is queued.
    #[must_use]
    pub fn staged_binding(&self, pos: CellPos) -> Option<StagedBinding<'_>> {
        self.att_index.get(&pos).map(|&idx| match &self.atts[idx].op {
            AttachmentOp::Add(att) | AttachmentOp::Replace(att) => StagedBinding::Bound(att),
            AttachmentOp::Remove => StagedBinding::Vacant,
        })
    }

    /// Whether any attachment transition is queued at `pos`.
    #[must_use]
    pub fn has_attachment_op(&self, pos: CellPos) -> bool {
        self.att_index.contains_key(&pos)
    }

    /// Number of staged state writes (shadowed entries included).
    #[must_use]
    pub fn staged_state_count(&self) -> usize {
        self.states.len()
    }

    /// Number of staged attachment transitions (shadowed entries included).
    #[must_use]
    pub fn staged_attachment_count(&self) -> usize {
        self.atts.len()
    }

    /// Monotone counter advanced by every discard and cancellation.
    #[must_use]
    pub const fn generation(&self) -> u64 {
        self.generation
    }

    /// Opens a frame capturing the overlay's current extent.
    pub fn push_frame(&mut self) -> OverlayFrame {
        let token = self.next_token;
        self.next_token = self.next_token.wrapping_add(1);
        self.frames.push(FrameMark {
            token,
            state_mark: self.states.len(),
            att_mark: self.atts.len(),
        });
        OverlayFrame { token }
    }

    /// Discards every entry staged after `frame` was opened, unwinding the
    /// shadow chains, and advances the generation.
    ///
    /// # Panics
    ///
    /// Panics if `frame` is not the innermost open frame. Out-of-order frame
    /// use is a programming error, not a recoverable condition.
    pub fn pop_frame(&mut self, frame: OverlayFrame) {
        let mark = self.close_frame(&frame, "pop_frame");
        for idx in (mark.state_mark..self.states.len()).rev() {
            let entry = &self.states[idx];
            match entry.prev {
                Some(prev) => {
                    self.state_index.insert(entry.pos, prev);
                }
                None => {
                    self.state_index.remove(&entry.pos);
                }
            }
        }
        self.states.truncate(mark.state_mark);
        for idx in (mark.att_mark..self.atts.len()).rev() {
            let entry = &self.atts[idx];
            match entry.prev {
                Some(prev) => {
                    self.att_index.insert(entry.pos, prev);
                }
                None => {
                    self.att_index.remove(&entry.pos);
                }
            }
        }
        self.atts.truncate(mark.att_mark);
        self.generation = self.generation.wrapping_add(1);
    }

    /// Closes `frame` keeping its entries; they now belong to the enclosing
    /// scope.
    ///
    /// # Panics
    ///
    /// Panics if `frame` is not the innermost open frame.
    pub fn release_frame(&mut self, frame: OverlayFrame) {
        let _ = self.close_frame(&frame, "release_frame");
    }

    /// Drops all staged entries and frames, advancing the generation. Batch
    /// teardown only.
    pub fn clear(&mut self) {
        self.states.clear();
        self.state_index.clear();
        self.atts.clear();
        self.att_index.clear();
        self.frames.clear();
        self.generation = self.generation.wrapping_add(1);
    }

    /// Advances the generation without discarding entries. Record
    /// cancellation routes through this so dependents re-validate.
    pub(crate) fn bump_generation(&mut self) {
        self.generation = self.generation.wrapping_add(1);
    }

    fn close_frame(&mut self, frame: &OverlayFrame, op: &str) -> FrameMark {
        let top = self.frames.pop();
        let in_order = top.as_ref().is_some_and(|m| m.token == frame.token);
        assert!(
            in_order,
            "{op} out of LIFO order: closed frame {} while innermost is {}",
            frame.token,
            top.as_ref()
                .map_or_else(|| "none".to_owned(), |m| m.token.to_string())
        );
        match top {
            Some(mark) => mark,
            None => unreachable!("LIFO assert above requires an open frame"),
        }
    }
}

/// Composite read path: staged values first, committed truth second.
///
/// Borrows both layers immutably; build one per read scope. The wrapper is
/// two pointers and exposes no mutation.
#[derive(Debug, Clone, Copy)]
pub struct StagedView<'a> {
    overlay: &'a Overlay,
    store: &'a GridStore,
}

impl<'a> StagedView<'a> {
    /// Builds a view over the overlay and store pair.
    #[must_use]
    pub const fn new(overlay: &'a Overlay, store: &'a GridStore) -> Self {
        Self { overlay, store }
    }

    /// State readers observe at `pos`: the staged value when one exists,
    /// the committed value otherwise.
    #[must_use]
    pub fn state_at(&self, pos: CellPos) -> CellState {
        self.overlay
            .staged_state(pos)
            .unwrap_or_else(|| self.store.state(pos))
    }

    /// Attachment readers observe at `pos`, honoring staged transitions.
    #[must_use]
    pub fn attachment_at(&self, pos: CellPos) -> Option<&'a Attachment> {
        match self.overlay.staged_binding(pos) {
            Some(StagedBinding::Bound(att)) => Some(att),
            Some(StagedBinding::Vacant) => None,
            None => self.store.attachment(pos),
        }
    }

    /// The overlay under this view.
    #[must_use]
    pub const fn overlay(&self) -> &'a Overlay {
        self.overlay
    }

    /// The real store under this view.
    #[must_use]
    pub const fn store(&self) -> &'a GridStore {
        self.store
    }
}
