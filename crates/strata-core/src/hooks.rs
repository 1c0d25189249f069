// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Behavior hooks the subsystem consumes.
//!
//! The journal decides *when* effects run and in what order; what they *do*
//! belongs to the host. Hooks that receive an [`EffectCtx`] may re-enter the
//! tracker through it — submitting follow-up records at increased depth is
//! the normal way cascades happen. A hook returning `Err` is a local
//! mutation failure: the enclosing record abandons its remaining side
//! effects and the commit walk continues with the next record.
use thiserror::Error;

use crate::tracker::{EffectCtx, TrackerError};
use crate::{CellPos, CellSnapshot, CellState, ChangeFlags, KindId, SpawnRequest};

/// Well-known game-rule names the subsystem itself consults.
pub mod rules {
    /// Whether breaking an occupant yields captured spawns. When the host
    /// answers `false`, buffered spawns for the transition are dropped.
    pub const SPAWN_DROPS: &str = "spawnDrops";
}

/// Error from a behavior hook while a record's side effects were running.
#[derive(Debug, Error)]
pub enum EffectError {
    /// The host refused the effect outright.
    #[error("effect rejected: {0}")]
    Rejected(&'static str),
    /// The host attempted the effect and failed.
    #[error("effect failed: {0}")]
    Failed(String),
    /// A re-entrant tracker call inside the hook was refused.
    #[error(transparent)]
    Tracker(#[from] TrackerError),
}

/// World behavior consumed by the commit walk.
///
/// Every method has a no-op default so hosts implement only what their
/// occupants need. Methods taking an [`EffectCtx`] run inside a record's
/// sandbox frame: staging is rolled back if the record fails, while records
/// submitted through the context stay journaled and are re-validated for
/// staleness when the walk reaches them.
pub trait WorldHooks {
    /// Teardown for the old occupant kind, before the new state commits.
    fn on_vacated(
        &mut self,
        _world: &mut EffectCtx<'_>,
        _pos: CellPos,
        _old: CellState,
    ) -> Result<(), EffectError> {
        Ok(())
    }

    /// Setup for the new occupant kind, after the commit.
    fn on_placed(
        &mut self,
        _world: &mut EffectCtx<'_>,
        _pos: CellPos,
        _new: CellState,
    ) -> Result<(), EffectError> {
        Ok(())
    }

    /// Observer dispatch for an applied transition.
    fn notify_listeners(
        &mut self,
        _pos: CellPos,
        _old: &CellSnapshot,
        _new: CellState,
    ) -> Result<(), EffectError> {
        Ok(())
    }

    /// Client sync for an applied transition, when its flags request it.
    fn sync_client(
        &mut self,
        _pos: CellPos,
        _old: CellState,
        _new: CellState,
        _flags: ChangeFlags,
    ) -> Result<(), EffectError> {
        Ok(())
    }

    /// Reaction of the occupant at `notified_pos` to a change at
    /// `source_pos`.
    fn on_neighbor_changed(
        &mut self,
        _world: &mut EffectCtx<'_>,
        _notified_pos: CellPos,
        _notified_state: CellState,
        _source_kind: KindId,
        _source_pos: CellPos,
    ) -> Result<(), EffectError> {
        Ok(())
    }

    /// Recompute derived output (comparator-style) after an attachment was
    /// removed at `pos`.
    fn recompute_derived_output(
        &mut self,
        _world: &mut EffectCtx<'_>,
        _pos: CellPos,
    ) -> Result<(), EffectError> {
        Ok(())
    }

    /// Materialize one deferred spawn.
    fn process_spawn(
        &mut self,
        _world: &mut EffectCtx<'_>,
        _spawn: SpawnRequest,
    ) -> Result<(), EffectError> {
        Ok(())
    }

    /// Boolean game-rule lookup. The default answers `true` for every rule.
    fn game_rule(&self, _rule: &str) -> bool {
        true
    }
}

/// Hooks that ignore every effect and permit every rule.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullHooks;

impl WorldHooks for NullHooks {}
