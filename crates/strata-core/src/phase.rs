// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Phase contexts: the scopes mutation batches run under.
//!
//! The stack is IDLE when empty and ACTIVE otherwise. Every `begin` pushes a
//! context carrying its cause chain, dispatch policy, an owned sub-journal,
//! and a capture buffer for deferred spawns; every mutation request lands in
//! the innermost context's journal. Nested completion splices the child
//! journal into the parent, so one total order survives, consistent with call
//! order.
use core::fmt;

use crate::journal::Journal;
use crate::overlay::OverlayFrame;
use crate::{CellPos, CellSnapshot, KindId, OpSeq};

/// Diagnostic cause chain for a phase.
///
/// Root causes are caller-supplied ("player:dig", "tick:random"); nested
/// phases inherit the parent chain and may extend it. Causes never influence
/// semantics, only logging and receipts.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Cause {
    segments: Vec<String>,
}

impl Cause {
    /// Builds a root cause from a label.
    #[must_use]
    pub fn new(label: impl Into<String>) -> Self {
        Self {
            segments: vec![label.into()],
        }
    }

    /// Extends the chain with a nested label.
    #[must_use]
    pub fn child(&self, label: impl Into<String>) -> Self {
        let mut segments = self.segments.clone();
        segments.push(label.into());
        Self { segments }
    }

    /// Chain segments, root first.
    #[must_use]
    pub fn segments(&self) -> &[String] {
        &self.segments
    }
}

impl fmt::Display for Cause {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, segment) in self.segments.iter().enumerate() {
            if i > 0 {
                f.write_str("/")?;
            }
            f.write_str(segment)?;
        }
        Ok(())
    }
}

/// Dispatch policy for one phase scope.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct PhasePolicy {
    /// Suppress neighbor-notification enqueueing for records in this phase.
    pub suppress_notifications: bool,
    /// Buffer secondary-object spawns in the phase instead of dispatching
    /// them as they are requested.
    pub capture_spawns: bool,
}

impl Default for PhasePolicy {
    fn default() -> Self {
        Self {
            suppress_notifications: false,
            capture_spawns: true,
        }
    }
}

/// A deferred secondary-object spawn, buffered by a capturing phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct SpawnRequest {
    /// Position the spawn belongs to.
    pub pos: CellPos,
    /// Kind of thing to spawn.
    pub kind: KindId,
    /// How many.
    pub count: u32,
}

/// One scope on the phase stack.
#[derive(Debug)]
pub struct PhaseContext {
    token: u64,
    cause: Cause,
    policy: PhasePolicy,
    journal: Journal,
    spawns: Vec<SpawnRequest>,
    notify_source: Option<CellSnapshot>,
    frame: Option<OverlayFrame>,
}

impl PhaseContext {
    /// Cause chain of this phase.
    #[must_use]
    pub fn cause(&self) -> &Cause {
        &self.cause
    }

    /// Dispatch policy of this phase.
    #[must_use]
    pub fn policy(&self) -> PhasePolicy {
        self.policy
    }

    /// Records owned by this phase so far.
    #[must_use]
    pub fn journal(&self) -> &Journal {
        &self.journal
    }

    pub(crate) fn journal_mut(&mut self) -> &mut Journal {
        &mut self.journal
    }

    pub(crate) fn into_parts(self) -> (Journal, Vec<SpawnRequest>, Option<OverlayFrame>) {
        (self.journal, self.spawns, self.frame)
    }

    /// Buffers a spawn in this phase.
    pub(crate) fn push_spawn(&mut self, spawn: SpawnRequest) {
        self.spawns.push(spawn);
    }

    /// Takes every buffered spawn belonging to `pos`, in buffer order.
    pub(crate) fn drain_spawns_at(&mut self, pos: CellPos) -> Vec<SpawnRequest> {
        let mut taken = Vec::new();
        self.spawns.retain(|spawn| {
            if spawn.pos == pos {
                taken.push(*spawn);
                false
            } else {
                true
            }
        });
        taken
    }

    /// Takes every buffered spawn.
    pub(crate) fn drain_all_spawns(&mut self) -> Vec<SpawnRequest> {
        std::mem::take(&mut self.spawns)
    }

    /// Number of buffered spawns.
    #[must_use]
    pub fn pending_spawns(&self) -> usize {
        self.spawns.len()
    }

    /// Snapshot attributed as the source of notifications enqueued while
    /// vacate logic runs, if one is set.
    #[must_use]
    pub fn notify_source(&self) -> Option<&CellSnapshot> {
        self.notify_source.as_ref()
    }

    pub(crate) fn set_notify_source(&mut self, source: Option<CellSnapshot>) {
        self.notify_source = source;
    }
}

/// Handle naming a pushed phase. Validated on pop: closing any phase other
/// than the innermost is fatal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PhaseHandle {
    token: u64,
}

impl PhaseHandle {
    /// Raw token, for diagnostics.
    #[must_use]
    pub const fn token(self) -> u64 {
        self.token
    }
}

/// LIFO stack of phase contexts.
#[derive(Debug, Default)]
pub struct PhaseStack {
    contexts: Vec<PhaseContext>,
    next_token: u64,
}

impl PhaseStack {
    /// Creates an idle stack.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether no phase is active.
    #[must_use]
    pub fn is_idle(&self) -> bool {
        self.contexts.is_empty()
    }

    /// Number of active phases.
    #[must_use]
    pub fn depth(&self) -> usize {
        self.contexts.len()
    }

    /// Pushes a context built from `cause` and `policy`, owning `frame`.
    pub fn push(
        &mut self,
        cause: Cause,
        policy: PhasePolicy,
        frame: OverlayFrame,
    ) -> PhaseHandle {
        let token = self.next_token;
        self.next_token = self.next_token.wrapping_add(1);
        self.contexts.push(PhaseContext {
            token,
            cause,
            policy,
            journal: Journal::new(),
            spawns: Vec::new(),
            notify_source: None,
            frame: Some(frame),
        });
        PhaseHandle { token }
    }

    /// The innermost active context.
    #[must_use]
    pub fn innermost(&self) -> Option<&PhaseContext> {
        self.contexts.last()
    }

    /// Whether `handle` names the innermost context.
    #[must_use]
    pub fn is_innermost(&self, handle: PhaseHandle) -> bool {
        self.contexts
            .last()
            .is_some_and(|ctx| ctx.token == handle.token)
    }

    pub(crate) fn innermost_mut(&mut self) -> Option<&mut PhaseContext> {
        self.contexts.last_mut()
    }

    /// Pops the innermost context, which must be the one `handle` names.
    ///
    /// # Panics
    ///
    /// Panics if the stack is idle or `handle` does not name the innermost
    /// context. Out-of-order phase completion is a programming error.
    pub fn pop(&mut self, handle: PhaseHandle) -> PhaseContext {
        let top_token = self.contexts.last().map(|ctx| ctx.token);
        assert!(
            top_token == Some(handle.token),
            "phase pop out of LIFO order: handle {} while innermost is {}",
            handle.token,
            top_token.map_or_else(|| "none".to_owned(), |t| t.to_string())
        );
        match self.contexts.pop() {
            Some(ctx) => ctx,
            None => unreachable!("LIFO assert above requires an active phase"),
        }
    }

    /// Cancels the record with `seq`, searching innermost to outermost.
    pub fn cancel(&mut self, seq: OpSeq) -> Option<bool> {
        self.contexts
            .iter_mut()
            .rev()
            .find_map(|ctx| ctx.journal_mut().cancel(seq))
    }
}
