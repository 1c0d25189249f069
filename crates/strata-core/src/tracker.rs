// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! The tracker: orchestrates batches from `begin` to receipt.
//!
//! A tracker owns the real store, the overlay, and the phase stack, and
//! drives the whole lifecycle: requests become journal records staged into
//! the overlay, and the outermost `end` runs the commit walk — ascending seq
//! order, cancelled records skipped, stale records re-validated, every
//! record's side effects sandboxed under its own overlay frame so a failure
//! rolls back that record's staging and nothing else.
//!
//! ## Re-entrancy
//!
//! Behavior hooks receive an [`EffectCtx`] borrowing everything except the
//! hooks themselves. Submissions made through it append to the same journal
//! the walk is reading, tagged one depth deeper than the record being
//! processed; the walk picks them up when the index reaches them. The walk
//! never recurses — depth is data, not stack.
use core::fmt;

use thiserror::Error;
use tracing::{debug, warn};

use crate::hooks::{rules, EffectError, WorldHooks};
use crate::journal::{CellOp, JournalEntry};
use crate::overlay::AttachmentOp;
use crate::phase::{Cause, PhaseContext, PhaseHandle, PhasePolicy, PhaseStack, SpawnRequest};
use crate::receipt::{BatchReceipt, Disposition, ReceiptEntry};
use crate::{
    CellPos, CellSnapshot, CellState, ChangeFlags, ChangeKind, GridStore, KindId, OpSeq, Overlay,
    StagedView, TrackerConfig,
};

/// Identifier of one top-level mutation batch.
///
/// # Invariants
///
/// - Zero is reserved; the counter wraps around it.
/// - Ids are process-local and never persisted.
#[repr(transparent)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct BatchId(u64);

impl BatchId {
    /// Builds an id from a raw value.
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

impl fmt::Display for BatchId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "b{}", self.0)
    }
}

/// Errors surfaced by tracker operations.
///
/// LIFO misuse of handles is not here: that is a programming error and
/// panics. These are the recoverable conditions a correct caller can hit.
#[derive(Debug, Error)]
pub enum TrackerError {
    /// A mutation was submitted with no active phase.
    #[error("no active phase: begin an operation before submitting")]
    Idle,
    /// No pending record carries the given sequence number.
    #[error("unknown record sequence {0}")]
    UnknownSeq(OpSeq),
    /// An attachment operation targeted a position with nothing bound.
    #[error("no attachment bound at {0}")]
    NoAttachment(CellPos),
    /// A submission exceeded the configured recursion depth bound.
    #[error("recursion depth {depth} exceeds configured max {max}")]
    DepthExceeded {
        /// Depth the record would have been enqueued at.
        depth: u32,
        /// Configured bound.
        max: u32,
    },
    /// Tracker state desynced; aborting the operation is the only safe move.
    #[error("tracker state corrupted: {0}")]
    InternalCorruption(&'static str),
}

/// Where a queued spawn ended up.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[must_use = "an Immediate spawn is the caller's to materialize"]
pub enum SpawnDisposition {
    /// Buffered in the innermost capturing phase; the tracker dispatches it
    /// later.
    Captured,
    /// The innermost phase does not capture; the caller handles the spawn
    /// itself, right now.
    Immediate,
}

#[derive(Debug)]
struct BatchState {
    id: BatchId,
    seq_counter: u64,
}

impl BatchState {
    fn next_seq(&mut self) -> OpSeq {
        let seq = self.seq_counter;
        self.seq_counter = self.seq_counter.wrapping_add(1);
        OpSeq::from_raw(seq)
    }
}

/// Mutation surface handed to behavior hooks.
///
/// Borrows the tracker's store, overlay, and phase stack — everything except
/// the hooks, which is what makes re-entry safe to express. Records
/// submitted through a context carry the context's depth; for a context
/// handed to a hook that is one deeper than the record whose effects are
/// running.
#[derive(Debug)]
pub struct EffectCtx<'a> {
    store: &'a mut GridStore,
    overlay: &'a mut Overlay,
    phases: &'a mut PhaseStack,
    batch: &'a mut BatchState,
    config: &'a TrackerConfig,
    depth: u32,
}

impl EffectCtx<'_> {
    /// Composite read path over staged and committed state.
    #[must_use]
    pub fn view(&self) -> StagedView<'_> {
        StagedView::new(self.overlay, self.store)
    }

    /// State readers currently observe at `pos`.
    #[must_use]
    pub fn state_at(&self, pos: CellPos) -> CellState {
        self.view().state_at(pos)
    }

    /// Depth records submitted through this context will carry.
    #[must_use]
    pub const fn depth(&self) -> u32 {
        self.depth
    }

    /// Cause chain of the innermost phase.
    #[must_use]
    pub fn cause(&self) -> Option<&Cause> {
        self.phases.innermost().map(PhaseContext::cause)
    }

    /// Requests a state change; the transition kind is derived.
    pub fn submit_state_change(
        &mut self,
        pos: CellPos,
        new_state: CellState,
        flags: ChangeFlags,
    ) -> Result<OpSeq, TrackerError> {
        self.submit_state_change_as(pos, new_state, flags, None)
    }

    /// Requests a state change with an explicit transition kind (`Decay`,
    /// `Grow`) that derivation cannot know.
    pub fn submit_state_change_as(
        &mut self,
        pos: CellPos,
        new_state: CellState,
        flags: ChangeFlags,
        change: Option<ChangeKind>,
    ) -> Result<OpSeq, TrackerError> {
        let snapshot = {
            let view = StagedView::new(self.overlay, self.store);
            let old_state = view.state_at(pos);
            let attachment = view.attachment_at(pos).cloned();
            let kind = change.unwrap_or_else(|| ChangeKind::classify(old_state, new_state));
            CellSnapshot::capture(pos, old_state, attachment, kind)
        };
        self.append(CellOp::StateChange {
            snapshot,
            new_state,
            flags,
        })
    }

    /// Requests binding `attachment` at `pos` together with `state`.
    pub fn submit_attachment_add(
        &mut self,
        pos: CellPos,
        mut attachment: crate::Attachment,
        state: CellState,
    ) -> Result<OpSeq, TrackerError> {
        attachment.mark_captured();
        self.append(CellOp::AttachmentAdd {
            pos,
            attachment,
            state,
        })
    }

    /// Requests removing the attachment at `pos`, leaving `state` behind.
    pub fn submit_attachment_remove(
        &mut self,
        pos: CellPos,
        state: CellState,
    ) -> Result<OpSeq, TrackerError> {
        let snapshot = {
            let view = StagedView::new(self.overlay, self.store);
            let old_state = view.state_at(pos);
            let mut removed = view
                .attachment_at(pos)
                .cloned()
                .ok_or(TrackerError::NoAttachment(pos))?;
            removed.mark_captured();
            let kind = ChangeKind::classify(old_state, state);
            CellSnapshot::capture(pos, old_state, Some(removed), kind)
        };
        self.append(CellOp::AttachmentRemove { snapshot, state })
    }

    /// Requests displacing the attachment at `pos` with `replacement` in a
    /// single step.
    pub fn submit_attachment_replace(
        &mut self,
        pos: CellPos,
        mut replacement: crate::Attachment,
    ) -> Result<OpSeq, TrackerError> {
        let mut displaced = {
            let view = StagedView::new(self.overlay, self.store);
            view.attachment_at(pos)
                .cloned()
                .ok_or(TrackerError::NoAttachment(pos))?
        };
        displaced.mark_captured();
        replacement.mark_captured();
        self.append(CellOp::AttachmentReplace {
            pos,
            displaced,
            replacement,
        })
    }

    /// Requests a neighbor notification from `source_pos` to `notified_pos`.
    pub fn submit_neighbor_notice(
        &mut self,
        source_pos: CellPos,
        notified_pos: CellPos,
    ) -> Result<OpSeq, TrackerError> {
        let source_kind = {
            let view = StagedView::new(self.overlay, self.store);
            view.state_at(source_pos).kind()
        };
        self.append_neighbor(source_kind, source_pos, notified_pos)
    }

    /// Cancels a pending record. Idempotent; `Ok(false)` means it was
    /// already cancelled.
    pub fn cancel(&mut self, seq: OpSeq) -> Result<bool, TrackerError> {
        match self.phases.cancel(seq) {
            Some(transitioned) => {
                if transitioned {
                    self.overlay.bump_generation();
                    debug!(%seq, "record cancelled");
                }
                Ok(transitioned)
            }
            None => Err(TrackerError::UnknownSeq(seq)),
        }
    }

    /// Queues a deferred spawn. The innermost capturing phase buffers it;
    /// otherwise the caller materializes it immediately.
    pub fn queue_spawn(&mut self, spawn: SpawnRequest) -> SpawnDisposition {
        match self.phases.innermost_mut() {
            Some(phase) if phase.policy().capture_spawns => {
                phase.push_spawn(spawn);
                SpawnDisposition::Captured
            }
            _ => SpawnDisposition::Immediate,
        }
    }

    pub(crate) fn append_neighbor(
        &mut self,
        source_kind: KindId,
        source_pos: CellPos,
        notified_pos: CellPos,
    ) -> Result<OpSeq, TrackerError> {
        let source_snapshot = self
            .phases
            .innermost()
            .and_then(|phase| phase.notify_source().cloned());
        self.append(CellOp::NeighborNotification {
            source_kind,
            source_pos,
            notified_pos,
            source_snapshot,
        })
    }

    fn append(&mut self, op: CellOp) -> Result<OpSeq, TrackerError> {
        if self.phases.is_idle() {
            return Err(TrackerError::Idle);
        }
        if self.depth > self.config.max_depth {
            warn!(
                depth = self.depth,
                max = self.config.max_depth,
                op = %op,
                "record refused: enqueue beyond configured depth bound"
            );
            return Err(TrackerError::DepthExceeded {
                depth: self.depth,
                max: self.config.max_depth,
            });
        }
        let snapshot_gen = self.overlay.generation();
        let seq = self.batch.next_seq();
        let entry = JournalEntry::new(seq, self.depth, snapshot_gen, op);
        let phase = self
            .phases
            .innermost_mut()
            .ok_or(TrackerError::InternalCorruption("idle check passed but no phase"))?;
        Ok(phase.journal_mut().append(entry, self.overlay))
    }
}

/// Orchestrator for the journal, overlay, phase stack, and real store.
///
/// Single-threaded by design: one tracker mediates one world's mutations,
/// cooperatively. See the module docs for the lifecycle.
pub struct Tracker<H: WorldHooks> {
    store: GridStore,
    overlay: Overlay,
    phases: PhaseStack,
    hooks: H,
    config: TrackerConfig,
    batch_counter: u64,
    current_batch: Option<BatchState>,
}

impl<H: WorldHooks> Tracker<H> {
    /// Builds a tracker over `store` with default config.
    #[must_use]
    pub fn new(store: GridStore, hooks: H) -> Self {
        Self::with_config(store, hooks, TrackerConfig::default())
    }

    /// Builds a tracker with explicit config.
    #[must_use]
    pub fn with_config(store: GridStore, hooks: H, config: TrackerConfig) -> Self {
        Self {
            store,
            overlay: Overlay::new(),
            phases: PhaseStack::new(),
            hooks,
            config,
            batch_counter: 0,
            current_batch: None,
        }
    }

    /// Whether no operation is active.
    #[must_use]
    pub fn is_idle(&self) -> bool {
        self.phases.is_idle()
    }

    /// Composite read path over staged and committed state.
    #[must_use]
    pub fn view(&self) -> StagedView<'_> {
        StagedView::new(&self.overlay, &self.store)
    }

    /// The real store.
    #[must_use]
    pub fn store(&self) -> &GridStore {
        &self.store
    }

    /// The overlay.
    #[must_use]
    pub fn overlay(&self) -> &Overlay {
        &self.overlay
    }

    /// The hooks, shared.
    #[must_use]
    pub fn hooks(&self) -> &H {
        &self.hooks
    }

    /// The hooks, exclusive.
    pub fn hooks_mut(&mut self) -> &mut H {
        &mut self.hooks
    }

    /// The config.
    #[must_use]
    pub fn config(&self) -> &TrackerConfig {
        &self.config
    }

    /// Tears the tracker down into its store and hooks.
    #[must_use]
    pub fn into_inner(self) -> (GridStore, H) {
        (self.store, self.hooks)
    }

    /// Opens an operation under `cause` with an explicit policy.
    ///
    /// The outermost begin allocates a fresh batch; nested begins stack, and
    /// their records join the parent's stream on completion.
    pub fn begin(&mut self, cause: Cause, policy: PhasePolicy) -> PhaseHandle {
        if self.phases.is_idle() {
            let id = self.next_batch_id();
            self.current_batch = Some(BatchState {
                id,
                seq_counter: 0,
            });
            debug!(batch = %id, %cause, "operation begun");
        }
        let frame = self.overlay.push_frame();
        self.phases.push(cause, policy, frame)
    }

    /// Opens an operation under `cause` with the configured default policy.
    pub fn begin_default(&mut self, cause: Cause) -> PhaseHandle {
        let policy = self.config.default_policy;
        self.begin(cause, policy)
    }

    /// Opens a nested operation inheriting the parent's cause chain.
    pub fn begin_inherited(&mut self, policy: PhasePolicy) -> Result<PhaseHandle, TrackerError> {
        let cause = self
            .phases
            .innermost()
            .ok_or(TrackerError::Idle)?
            .cause()
            .clone();
        Ok(self.begin(cause, policy))
    }

    /// Requests a state change; the transition kind is derived.
    pub fn submit_state_change(
        &mut self,
        pos: CellPos,
        new_state: CellState,
        flags: ChangeFlags,
    ) -> Result<OpSeq, TrackerError> {
        self.ctx_at(0)?
            .submit_state_change_as(pos, new_state, flags, None)
    }

    /// Requests a state change with an explicit transition kind.
    pub fn submit_state_change_as(
        &mut self,
        pos: CellPos,
        new_state: CellState,
        flags: ChangeFlags,
        change: ChangeKind,
    ) -> Result<OpSeq, TrackerError> {
        self.ctx_at(0)?
            .submit_state_change_as(pos, new_state, flags, Some(change))
    }

    /// Requests binding `attachment` at `pos` together with `state`.
    pub fn submit_attachment_add(
        &mut self,
        pos: CellPos,
        attachment: crate::Attachment,
        state: CellState,
    ) -> Result<OpSeq, TrackerError> {
        self.ctx_at(0)?.submit_attachment_add(pos, attachment, state)
    }

    /// Requests removing the attachment at `pos`, leaving `state` behind.
    pub fn submit_attachment_remove(
        &mut self,
        pos: CellPos,
        state: CellState,
    ) -> Result<OpSeq, TrackerError> {
        self.ctx_at(0)?.submit_attachment_remove(pos, state)
    }

    /// Requests displacing the attachment at `pos` with `replacement`.
    pub fn submit_attachment_replace(
        &mut self,
        pos: CellPos,
        replacement: crate::Attachment,
    ) -> Result<OpSeq, TrackerError> {
        self.ctx_at(0)?.submit_attachment_replace(pos, replacement)
    }

    /// Requests a neighbor notification from `source_pos` to `notified_pos`.
    pub fn submit_neighbor_notice(
        &mut self,
        source_pos: CellPos,
        notified_pos: CellPos,
    ) -> Result<OpSeq, TrackerError> {
        self.ctx_at(0)?.submit_neighbor_notice(source_pos, notified_pos)
    }

    /// Cancels a pending record. Idempotent.
    pub fn cancel(&mut self, seq: OpSeq) -> Result<bool, TrackerError> {
        self.ctx_at(0)?.cancel(seq)
    }

    /// Discards the named phase wholesale: its records are never processed
    /// and its staged entries vanish with its frame.
    ///
    /// # Panics
    ///
    /// Panics if `handle` does not name the innermost phase.
    pub fn abort(&mut self, handle: PhaseHandle) {
        let phase = self.phases.pop(handle);
        let cause = phase.cause().clone();
        let (journal, spawns, frame) = phase.into_parts();
        debug!(
            %cause,
            discarded = journal.len(),
            spawns = spawns.len(),
            "operation aborted"
        );
        drop(journal);
        if let Some(frame) = frame {
            self.overlay.pop_frame(frame);
        }
        if self.phases.is_idle() {
            self.current_batch = None;
            self.overlay.clear();
        }
    }

    /// Completes the named phase.
    ///
    /// Nested completion splices the phase's records and buffered spawns
    /// into the parent and returns `None`. Outermost completion runs the
    /// commit walk and returns the batch receipt.
    ///
    /// # Panics
    ///
    /// Panics if `handle` does not name the innermost phase.
    pub fn end(&mut self, handle: PhaseHandle) -> Result<Option<BatchReceipt>, TrackerError> {
        assert!(
            self.phases.is_innermost(handle),
            "phase end out of LIFO order: handle {} is not innermost",
            handle.token()
        );
        if self.phases.depth() > 1 {
            let child = self.phases.pop(handle);
            let (journal, spawns, frame) = child.into_parts();
            let parent = self
                .phases
                .innermost_mut()
                .ok_or(TrackerError::InternalCorruption("nested pop left no parent"))?;
            parent.journal_mut().splice(journal);
            for spawn in spawns {
                parent.push_spawn(spawn);
            }
            if let Some(frame) = frame {
                self.overlay.release_frame(frame);
            }
            return Ok(None);
        }
        self.run_commit(handle).map(Some)
    }

    fn run_commit(&mut self, handle: PhaseHandle) -> Result<BatchReceipt, TrackerError> {
        let batch_id = self
            .current_batch
            .as_ref()
            .ok_or(TrackerError::InternalCorruption("active phase without batch state"))?
            .id;
        let cause = self
            .phases
            .innermost()
            .ok_or(TrackerError::InternalCorruption("commit without active phase"))?
            .cause()
            .clone();
        debug!(batch = %batch_id, %cause, "commit walk started");
        let mut outcomes = Vec::new();
        let mut idx = 0;
        let mut drain_depth = 0_u32;
        loop {
            self.walk_from(&mut idx, &mut outcomes)?;
            // Spawns left after the walk may enqueue more records; loop
            // until the journal stops growing and the buffer stays empty.
            // Each round runs one level deeper; the depth bound caps the
            // rounds.
            drain_depth = drain_depth.saturating_add(1);
            if !self.drain_batch_spawns(drain_depth)? {
                break;
            }
        }
        let phase = self.phases.pop(handle);
        let (journal, _spawns, frame) = phase.into_parts();
        drop(journal);
        if let Some(frame) = frame {
            self.overlay.release_frame(frame);
        }
        self.overlay.clear();
        self.current_batch = None;
        let receipt = BatchReceipt::new(batch_id, cause, outcomes);
        debug!(
            batch = %batch_id,
            records = receipt.entries().len(),
            applied = receipt.applied_count(),
            digest = %receipt.digest_hex(),
            "commit walk finished"
        );
        Ok(receipt)
    }

    fn walk_from(
        &mut self,
        idx: &mut usize,
        outcomes: &mut Vec<ReceiptEntry>,
    ) -> Result<(), TrackerError> {
        loop {
            let live_gen = self.overlay.generation();
            let header = {
                let phase = self
                    .phases
                    .innermost()
                    .ok_or(TrackerError::InternalCorruption("walk without active phase"))?;
                match phase.journal().entry(*idx) {
                    None => break,
                    Some(entry) => (
                        entry.seq(),
                        entry.depth(),
                        entry.snapshot_gen(),
                        entry.is_cancelled(),
                        entry.op().map(|op| (op.pos(), op.kind_tag())),
                    ),
                }
            };
            let (seq, depth, snapshot_gen, cancelled, op_info) = header;
            let Some((pos, kind_tag)) = op_info else {
                return Err(TrackerError::InternalCorruption(
                    "record payload consumed before the walk reached it",
                ));
            };
            if cancelled {
                outcomes.push(ReceiptEntry {
                    seq,
                    pos,
                    kind_tag,
                    disposition: Disposition::Cancelled,
                });
                *idx += 1;
                continue;
            }
            if snapshot_gen != live_gen && self.captured_state_diverged(*idx)? {
                warn!(
                    %seq,
                    captured_gen = snapshot_gen,
                    live_gen,
                    "stale record skipped: captured state no longer matches the store"
                );
                outcomes.push(ReceiptEntry {
                    seq,
                    pos,
                    kind_tag,
                    disposition: Disposition::Stale,
                });
                *idx += 1;
                continue;
            }
            let op = self
                .phases
                .innermost_mut()
                .ok_or(TrackerError::InternalCorruption("walk without active phase"))?
                .journal_mut()
                .take_op(*idx)
                .ok_or(TrackerError::InternalCorruption(
                    "record payload missing at processing time",
                ))?;
            let frame = self.overlay.push_frame();
            match self.process_taken(seq, depth, op) {
                Ok(()) => {
                    self.overlay.release_frame(frame);
                    outcomes.push(ReceiptEntry {
                        seq,
                        pos,
                        kind_tag,
                        disposition: Disposition::Applied,
                    });
                }
                Err(err) => {
                    warn!(
                        %seq,
                        error = %err,
                        "record side effects failed; rolling back its staging"
                    );
                    self.overlay.pop_frame(frame);
                    outcomes.push(ReceiptEntry {
                        seq,
                        pos,
                        kind_tag,
                        disposition: Disposition::Failed,
                    });
                }
            }
            *idx += 1;
        }
        Ok(())
    }

    /// Whether the record at `idx` captured state the store has since moved
    /// away from. Records without a snapshot never re-validate; they act on
    /// current state by construction.
    fn captured_state_diverged(&self, idx: usize) -> Result<bool, TrackerError> {
        let phase = self
            .phases
            .innermost()
            .ok_or(TrackerError::InternalCorruption("walk without active phase"))?;
        Ok(phase
            .journal()
            .entry(idx)
            .and_then(JournalEntry::op)
            .and_then(CellOp::snapshot)
            .is_some_and(|snap| self.store.state(snap.pos()) != snap.state()))
    }

    fn process_taken(&mut self, seq: OpSeq, depth: u32, op: CellOp) -> Result<(), EffectError> {
        let Self {
            store,
            overlay,
            phases,
            hooks,
            config,
            current_batch,
            ..
        } = self;
        let batch = current_batch
            .as_mut()
            .ok_or(TrackerError::InternalCorruption("processing without batch state"))?;
        let mut ctx = EffectCtx {
            store,
            overlay,
            phases,
            batch,
            config,
            depth: depth.saturating_add(1),
        };
        apply_op(&mut ctx, hooks, seq, depth, op)
    }

    /// Dispatches spawns no record claimed, one depth level per round.
    /// Rounds past the depth bound drop their buffer instead of dispatching.
    fn drain_batch_spawns(&mut self, depth: u32) -> Result<bool, TrackerError> {
        let leftovers = self
            .phases
            .innermost_mut()
            .ok_or(TrackerError::InternalCorruption("spawn drain without active phase"))?
            .drain_all_spawns();
        if leftovers.is_empty() {
            return Ok(false);
        }
        if depth > self.config.max_depth {
            warn!(
                depth,
                max = self.config.max_depth,
                dropped = leftovers.len(),
                "batch spawns dropped: drain beyond configured depth bound"
            );
            return Ok(false);
        }
        if !self.hooks.game_rule(rules::SPAWN_DROPS) {
            debug!(dropped = leftovers.len(), "batch spawns dropped by game rule");
            return Ok(false);
        }
        let Self {
            store,
            overlay,
            phases,
            hooks,
            config,
            current_batch,
            ..
        } = self;
        let batch = current_batch
            .as_mut()
            .ok_or(TrackerError::InternalCorruption("spawn drain without batch state"))?;
        let mut ctx = EffectCtx {
            store,
            overlay,
            phases,
            batch,
            config,
            depth,
        };
        for spawn in leftovers {
            if let Err(err) = hooks.process_spawn(&mut ctx, spawn) {
                warn!(pos = %spawn.pos, error = %err, "deferred spawn failed");
            }
        }
        Ok(true)
    }

    fn ctx_at(&mut self, depth: u32) -> Result<EffectCtx<'_>, TrackerError> {
        if self.phases.is_idle() {
            return Err(TrackerError::Idle);
        }
        let Self {
            store,
            overlay,
            phases,
            config,
            current_batch,
            ..
        } = self;
        let batch = current_batch
            .as_mut()
            .ok_or(TrackerError::InternalCorruption("active phases without batch state"))?;
        Ok(EffectCtx {
            store,
            overlay,
            phases,
            batch,
            config,
            depth,
        })
    }

    fn next_batch_id(&mut self) -> BatchId {
        self.batch_counter = self.batch_counter.wrapping_add(1);
        if self.batch_counter == 0 {
            self.batch_counter = 1;
        }
        BatchId::from_raw(self.batch_counter)
    }
}

impl<H: WorldHooks> fmt::Debug for Tracker<H> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Tracker")
            .field("store", &self.store)
            .field("overlay", &self.overlay)
            .field("phases", &self.phases)
            .field("config", &self.config)
            .field("batch_counter", &self.batch_counter)
            .field("current_batch", &self.current_batch)
            .finish_non_exhaustive()
    }
}

fn apply_op<H: WorldHooks>(
    ctx: &mut EffectCtx<'_>,
    hooks: &mut H,
    seq: OpSeq,
    depth: u32,
    op: CellOp,
) -> Result<(), EffectError> {
    match op {
        CellOp::StateChange {
            snapshot,
            new_state,
            flags,
        } => apply_state_change(ctx, hooks, seq, depth, snapshot, new_state, flags),
        CellOp::AttachmentAdd {
            pos,
            mut attachment,
            state,
        } => {
            ctx.overlay.stage_state(pos, state);
            ctx.overlay
                .stage_attachment(pos, AttachmentOp::Add(attachment.clone()));
            let released = attachment.release_capture();
            debug_assert!(released, "attachment add processed without capture marker");
            let _ = ctx.store.bind_attachment(pos, attachment);
            Ok(())
        }
        CellOp::AttachmentRemove { snapshot, state } => {
            let pos = snapshot.pos();
            let mut removed = snapshot.into_attachment();
            if let Some(att) = removed.as_mut() {
                let released = att.release_capture();
                debug_assert!(released, "attachment remove processed without capture marker");
            }
            ctx.overlay.stage_state(pos, state);
            ctx.overlay.stage_attachment(pos, AttachmentOp::Remove);
            let _ = ctx.store.unbind_attachment(pos);
            hooks.recompute_derived_output(ctx, pos)
        }
        CellOp::AttachmentReplace {
            pos,
            mut displaced,
            mut replacement,
        } => {
            let released_old = displaced.release_capture();
            let released_new = replacement.release_capture();
            debug_assert!(
                released_old && released_new,
                "attachment replace processed without capture markers"
            );
            ctx.overlay
                .stage_attachment(pos, AttachmentOp::Replace(replacement.clone()));
            // One insert: at no point is the position observed unbound.
            let _ = ctx.store.bind_attachment(pos, replacement);
            Ok(())
        }
        CellOp::NeighborNotification {
            source_kind,
            source_pos,
            notified_pos,
            ..
        } => {
            let notified_state = ctx.state_at(notified_pos);
            hooks.on_neighbor_changed(ctx, notified_pos, notified_state, source_kind, source_pos)
        }
    }
}

fn apply_state_change<H: WorldHooks>(
    ctx: &mut EffectCtx<'_>,
    hooks: &mut H,
    seq: OpSeq,
    depth: u32,
    snapshot: CellSnapshot,
    new_state: CellState,
    flags: ChangeFlags,
) -> Result<(), EffectError> {
    let pos = snapshot.pos();
    let old_state = snapshot.state();
    // Spawns captured for this position before the record commits.
    drain_spawns_at(ctx, hooks, pos)?;
    debug!(
        %seq,
        depth,
        %pos,
        old = %old_state,
        new = %new_state,
        change = %snapshot.change(),
        flags = %flags,
        "cell transition"
    );
    // Readers mid-processing observe the changed cell.
    ctx.overlay.stage_state(pos, new_state);
    let kind_changed = old_state.kind() != new_state.kind();
    if kind_changed {
        // Teardown before setup; notifications born inside it carry the
        // old snapshot as their source.
        if let Some(phase) = ctx.phases.innermost_mut() {
            phase.set_notify_source(Some(snapshot.clone()));
        }
        let vacated = hooks.on_vacated(ctx, pos, old_state);
        if let Some(phase) = ctx.phases.innermost_mut() {
            phase.set_notify_source(None);
        }
        vacated?;
    }
    let _ = ctx.store.set_state(pos, new_state);
    if flags.contains(ChangeFlags::PHYSICS) && kind_changed && !ctx.overlay.has_attachment_op(pos)
    {
        hooks.on_placed(ctx, pos, new_state)?;
    }
    hooks.notify_listeners(pos, &snapshot, new_state)?;
    if flags.contains(ChangeFlags::SYNC_CLIENTS) {
        hooks.sync_client(pos, old_state, new_state, flags)?;
    }
    let suppress = ctx
        .phases
        .innermost()
        .is_some_and(|phase| phase.policy().suppress_notifications);
    if flags.contains(ChangeFlags::NOTIFY_NEIGHBORS) && !suppress {
        for neighbor in pos.face_neighbors() {
            ctx.append_neighbor(new_state.kind(), pos, neighbor)?;
        }
    }
    // Spawns the record's own hooks queued while it ran.
    drain_spawns_at(ctx, hooks, pos)?;
    Ok(())
}

fn drain_spawns_at<H: WorldHooks>(
    ctx: &mut EffectCtx<'_>,
    hooks: &mut H,
    pos: CellPos,
) -> Result<(), EffectError> {
    let spawns = match ctx.phases.innermost_mut() {
        Some(phase) => phase.drain_spawns_at(pos),
        None => return Ok(()),
    };
    if spawns.is_empty() {
        return Ok(());
    }
    if !hooks.game_rule(rules::SPAWN_DROPS) {
        debug!(%pos, dropped = spawns.len(), "spawns dropped by game rule");
        return Ok(());
    }
    for spawn in spawns {
        hooks.process_spawn(ctx, spawn)?;
    }
    Ok(())
}
