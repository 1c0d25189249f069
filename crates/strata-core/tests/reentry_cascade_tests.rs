// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>

#![allow(missing_docs)]
use strata_core::{
    Cause, CellPos, CellSnapshot, CellState, ChangeFlags, Disposition, EffectCtx, EffectError,
    GridStore, KindId, PhasePolicy, SpawnDisposition, SpawnRequest, Tracker, TrackerConfig,
    TrackerError, WorldHooks,
};

fn kind(label: &str) -> CellState {
    CellState::of(KindId::from_label(label))
}

type Event = (&'static str, CellPos);

/// Hooks that log every callback and optionally submit one follow-up change
/// or refuse placement at a chosen position.
#[derive(Debug, Default)]
struct RecordingHooks {
    events: Vec<Event>,
    follow_up: Option<(CellPos, CellState)>,
    fail_placed_at: Option<CellPos>,
}

impl WorldHooks for RecordingHooks {
    fn on_vacated(
        &mut self,
        _world: &mut EffectCtx<'_>,
        pos: CellPos,
        _old: CellState,
    ) -> Result<(), EffectError> {
        self.events.push(("vacated", pos));
        Ok(())
    }

    fn on_placed(
        &mut self,
        world: &mut EffectCtx<'_>,
        pos: CellPos,
        _new: CellState,
    ) -> Result<(), EffectError> {
        self.events.push(("placed", pos));
        if self.fail_placed_at == Some(pos) {
            if let Some((p, s)) = self.follow_up.take() {
                world.submit_state_change(p, s, ChangeFlags::NONE)?;
            }
            return Err(EffectError::Rejected("placement refused for the test"));
        }
        if let Some((p, s)) = self.follow_up.take() {
            world.submit_state_change(p, s, ChangeFlags::NONE)?;
        }
        Ok(())
    }

    fn notify_listeners(
        &mut self,
        pos: CellPos,
        _old: &CellSnapshot,
        _new: CellState,
    ) -> Result<(), EffectError> {
        self.events.push(("listeners", pos));
        Ok(())
    }

    fn on_neighbor_changed(
        &mut self,
        _world: &mut EffectCtx<'_>,
        notified_pos: CellPos,
        _notified_state: CellState,
        _source_kind: KindId,
        _source_pos: CellPos,
    ) -> Result<(), EffectError> {
        self.events.push(("neighbor", notified_pos));
        Ok(())
    }
}

#[test]
fn hook_submission_is_processed_before_later_fanout_records() {
    let origin = CellPos::new(0, 0, 0);
    let extra = CellPos::new(10, 0, 0);
    let hooks = RecordingHooks {
        follow_up: Some((extra, kind("dirt"))),
        ..RecordingHooks::default()
    };
    let mut tracker = Tracker::new(GridStore::new(), hooks);

    let op = tracker.begin_default(Cause::new("test:cascade"));
    tracker
        .submit_state_change(
            origin,
            kind("stone"),
            ChangeFlags::NOTIFY_NEIGHBORS.with(ChangeFlags::PHYSICS),
        )
        .unwrap();
    let receipt = tracker.end(op).unwrap().unwrap();

    // The follow-up was appended during placement, before the neighbor
    // fanout, so it both sits and runs ahead of the notification records.
    assert_eq!(receipt.entries().len(), 8);
    assert_eq!(receipt.applied_count(), 8);
    assert_eq!(receipt.entries()[1].pos, extra);
    assert_eq!(receipt.entries()[1].kind_tag, b's');
    for entry in &receipt.entries()[2..] {
        assert_eq!(entry.kind_tag, b'n');
    }

    let mut expected: Vec<Event> = vec![
        ("vacated", origin),
        ("placed", origin),
        ("listeners", origin),
        ("vacated", extra),
        ("listeners", extra),
    ];
    expected.extend(origin.face_neighbors().map(|n| ("neighbor", n)));
    assert_eq!(tracker.hooks().events, expected);

    assert_eq!(tracker.store().state(origin), kind("stone"));
    assert_eq!(tracker.store().state(extra), kind("dirt"));
}

#[test]
fn failing_record_is_isolated_from_its_siblings() {
    let p1 = CellPos::new(1, 0, 0);
    let p2 = CellPos::new(2, 0, 0);
    let p3 = CellPos::new(3, 0, 0);
    let hooks = RecordingHooks {
        fail_placed_at: Some(p2),
        ..RecordingHooks::default()
    };
    let mut tracker = Tracker::new(GridStore::new(), hooks);

    let op = tracker.begin_default(Cause::new("test:isolation"));
    for pos in [p1, p2, p3] {
        tracker
            .submit_state_change(pos, kind("stone"), ChangeFlags::PHYSICS)
            .unwrap();
    }
    let receipt = tracker.end(op).unwrap().unwrap();

    let dispositions: Vec<Disposition> = receipt
        .entries()
        .iter()
        .map(|entry| entry.disposition)
        .collect();
    assert_eq!(
        dispositions,
        vec![Disposition::Applied, Disposition::Failed, Disposition::Applied]
    );

    // The state write is the commit point and precedes placement side
    // effects, so even the failed record's cell shows the new state.
    for pos in [p1, p2, p3] {
        assert_eq!(tracker.store().state(pos), kind("stone"));
    }

    // Listener dispatch for the failed record was abandoned.
    let expected: Vec<Event> = vec![
        ("vacated", p1),
        ("placed", p1),
        ("listeners", p1),
        ("vacated", p2),
        ("placed", p2),
        ("vacated", p3),
        ("placed", p3),
        ("listeners", p3),
    ];
    assert_eq!(tracker.hooks().events, expected);
}

#[test]
fn follow_up_of_a_failed_record_survives_when_its_capture_still_holds() {
    let p2 = CellPos::new(2, 0, 0);
    let p3 = CellPos::new(3, 0, 0);
    let hooks = RecordingHooks {
        follow_up: Some((p3, kind("dirt"))),
        fail_placed_at: Some(p2),
        ..RecordingHooks::default()
    };
    let mut tracker = Tracker::new(GridStore::new(), hooks);

    let op = tracker.begin_default(Cause::new("test:failed-follow-up"));
    tracker
        .submit_state_change(p2, kind("stone"), ChangeFlags::PHYSICS)
        .unwrap();
    let receipt = tracker.end(op).unwrap().unwrap();

    // The failed record's sandbox frame discarded the follow-up's staging,
    // but the record itself stays journaled; it re-validates against the
    // store (still empty at p3) and applies.
    let dispositions: Vec<Disposition> = receipt
        .entries()
        .iter()
        .map(|entry| entry.disposition)
        .collect();
    assert_eq!(dispositions, vec![Disposition::Failed, Disposition::Applied]);
    assert_eq!(tracker.store().state(p2), kind("stone"));
    assert_eq!(tracker.store().state(p3), kind("dirt"));
}

/// Hooks that place an endless eastward chain, counting refusals.
#[derive(Debug, Default)]
struct ChainHooks {
    placed: u32,
    refused: u32,
}

impl WorldHooks for ChainHooks {
    fn on_placed(
        &mut self,
        world: &mut EffectCtx<'_>,
        pos: CellPos,
        new: CellState,
    ) -> Result<(), EffectError> {
        self.placed += 1;
        let next = CellPos::new(pos.x + 1, pos.y, pos.z);
        match world.submit_state_change(next, new, ChangeFlags::PHYSICS) {
            Ok(_) => {}
            Err(TrackerError::DepthExceeded { .. }) => self.refused += 1,
            Err(other) => return Err(other.into()),
        }
        Ok(())
    }
}

#[test]
fn depth_bound_stops_a_hook_cascade() {
    let config = TrackerConfig {
        max_depth: 2,
        ..TrackerConfig::default()
    };
    let mut tracker = Tracker::with_config(GridStore::new(), ChainHooks::default(), config);

    let op = tracker.begin_default(Cause::new("test:depth-chain"));
    tracker
        .submit_state_change(CellPos::new(0, 0, 0), kind("stone"), ChangeFlags::PHYSICS)
        .unwrap();
    let receipt = tracker.end(op).unwrap().unwrap();

    // Depths 0, 1 and 2 landed; the submission at depth 3 was refused.
    assert_eq!(receipt.entries().len(), 3);
    assert_eq!(receipt.applied_count(), 3);
    assert_eq!(tracker.hooks().placed, 3);
    assert_eq!(tracker.hooks().refused, 1);
    for x in 0..3 {
        assert_eq!(tracker.store().state(CellPos::new(x, 0, 0)), kind("stone"));
    }
    assert_eq!(tracker.store().state(CellPos::new(3, 0, 0)), CellState::EMPTY);
}

/// Hooks that seed one deferred spawn and re-queue every spawn handed back,
/// so the batch-end drain never empties on its own.
#[derive(Debug, Default)]
struct RespawnHooks {
    seed: Option<CellPos>,
    drain_depths: Vec<u32>,
}

impl WorldHooks for RespawnHooks {
    fn on_placed(
        &mut self,
        world: &mut EffectCtx<'_>,
        _pos: CellPos,
        new: CellState,
    ) -> Result<(), EffectError> {
        if let Some(elsewhere) = self.seed.take() {
            let disposition = world.queue_spawn(SpawnRequest {
                pos: elsewhere,
                kind: new.kind(),
                count: 1,
            });
            assert_eq!(disposition, SpawnDisposition::Captured);
        }
        Ok(())
    }

    fn process_spawn(
        &mut self,
        world: &mut EffectCtx<'_>,
        spawn: SpawnRequest,
    ) -> Result<(), EffectError> {
        self.drain_depths.push(world.depth());
        let disposition = world.queue_spawn(spawn);
        assert_eq!(disposition, SpawnDisposition::Captured);
        Ok(())
    }
}

#[test]
fn self_requeuing_spawns_are_cut_off_at_the_depth_bound() {
    let config = TrackerConfig {
        max_depth: 3,
        ..TrackerConfig::default()
    };
    let hooks = RespawnHooks {
        seed: Some(CellPos::new(9, 0, 9)),
        drain_depths: Vec::new(),
    };
    let mut tracker = Tracker::with_config(GridStore::new(), hooks, config);

    let op = tracker.begin_default(Cause::new("test:respawn"));
    tracker
        .submit_state_change(CellPos::new(0, 0, 0), kind("stone"), ChangeFlags::PHYSICS)
        .unwrap();
    let receipt = tracker.end(op).unwrap().unwrap();

    assert_eq!(receipt.applied_count(), 1);
    // One drain round per depth level; the round past the bound drops the
    // buffer instead of dispatching, so the commit terminates.
    assert_eq!(tracker.hooks().drain_depths, vec![1, 2, 3]);
    assert!(tracker.is_idle());
}

/// Hooks for break-and-drop flows: queues a spawn while vacating and logs
/// every materialized spawn.
#[derive(Debug)]
struct BreakHooks {
    events: Vec<Event>,
    spawn_drops: bool,
    spawn_elsewhere: Option<CellPos>,
}

impl WorldHooks for BreakHooks {
    fn on_vacated(
        &mut self,
        world: &mut EffectCtx<'_>,
        pos: CellPos,
        old: CellState,
    ) -> Result<(), EffectError> {
        self.events.push(("vacated", pos));
        let disposition = world.queue_spawn(SpawnRequest {
            pos,
            kind: old.kind(),
            count: 1,
        });
        assert_eq!(disposition, SpawnDisposition::Captured);
        self.events.push(("spawn-queued", pos));
        Ok(())
    }

    fn on_placed(
        &mut self,
        world: &mut EffectCtx<'_>,
        pos: CellPos,
        new: CellState,
    ) -> Result<(), EffectError> {
        self.events.push(("placed", pos));
        if let Some(q) = self.spawn_elsewhere.take() {
            let disposition = world.queue_spawn(SpawnRequest {
                pos: q,
                kind: new.kind(),
                count: 1,
            });
            assert_eq!(disposition, SpawnDisposition::Captured);
        }
        Ok(())
    }

    fn notify_listeners(
        &mut self,
        pos: CellPos,
        _old: &CellSnapshot,
        _new: CellState,
    ) -> Result<(), EffectError> {
        self.events.push(("listeners", pos));
        Ok(())
    }

    fn process_spawn(
        &mut self,
        _world: &mut EffectCtx<'_>,
        spawn: SpawnRequest,
    ) -> Result<(), EffectError> {
        self.events.push(("spawn", spawn.pos));
        Ok(())
    }

    fn game_rule(&self, rule: &str) -> bool {
        if rule == strata_core::rules::SPAWN_DROPS {
            self.spawn_drops
        } else {
            true
        }
    }
}

#[test]
fn break_spawns_are_captured_and_drained_after_the_record() {
    let pos = CellPos::new(4, 8, 4);
    let mut store = GridStore::new();
    store.set_state(pos, kind("stone"));
    let hooks = BreakHooks {
        events: Vec::new(),
        spawn_drops: true,
        spawn_elsewhere: None,
    };
    let mut tracker = Tracker::new(store, hooks);

    let op = tracker.begin_default(Cause::new("test:break"));
    tracker
        .submit_state_change(pos, CellState::EMPTY, ChangeFlags::NONE)
        .unwrap();
    tracker.end(op).unwrap().unwrap();

    assert_eq!(
        tracker.hooks().events,
        vec![
            ("vacated", pos),
            ("spawn-queued", pos),
            ("listeners", pos),
            ("spawn", pos),
        ]
    );
    assert_eq!(tracker.store().state(pos), CellState::EMPTY);
}

#[test]
fn spawn_drop_rule_discards_captured_spawns() {
    let pos = CellPos::new(4, 8, 4);
    let mut store = GridStore::new();
    store.set_state(pos, kind("stone"));
    let hooks = BreakHooks {
        events: Vec::new(),
        spawn_drops: false,
        spawn_elsewhere: None,
    };
    let mut tracker = Tracker::new(store, hooks);

    let op = tracker.begin_default(Cause::new("test:no-drops"));
    tracker
        .submit_state_change(pos, CellState::EMPTY, ChangeFlags::NONE)
        .unwrap();
    tracker.end(op).unwrap().unwrap();

    assert_eq!(
        tracker.hooks().events,
        vec![("vacated", pos), ("spawn-queued", pos), ("listeners", pos)],
        "no spawn event: the rule dropped the buffer"
    );
}

#[test]
fn spawns_for_untouched_positions_drain_at_batch_end() {
    let pos = CellPos::new(0, 0, 0);
    let elsewhere = CellPos::new(7, 7, 7);
    let hooks = BreakHooks {
        events: Vec::new(),
        spawn_drops: true,
        spawn_elsewhere: Some(elsewhere),
    };
    let mut tracker = Tracker::new(GridStore::new(), hooks);

    let op = tracker.begin_default(Cause::new("test:leftover"));
    tracker
        .submit_state_change(pos, kind("stone"), ChangeFlags::PHYSICS)
        .unwrap();
    tracker.end(op).unwrap().unwrap();

    assert_eq!(
        tracker.hooks().events,
        vec![
            ("vacated", pos),
            ("spawn-queued", pos),
            ("placed", pos),
            ("listeners", pos),
            ("spawn", pos),
            ("spawn", elsewhere),
        ],
        "a spawn no record claims is drained once the walk finishes"
    );
}

/// Queues a spawn under a non-capturing phase and keeps what came back.
#[derive(Debug, Default)]
struct InlineSpawnHooks {
    dispositions: Vec<(CellPos, SpawnDisposition)>,
    materialized: Vec<CellPos>,
}

impl WorldHooks for InlineSpawnHooks {
    fn on_vacated(
        &mut self,
        world: &mut EffectCtx<'_>,
        pos: CellPos,
        old: CellState,
    ) -> Result<(), EffectError> {
        let disposition = world.queue_spawn(SpawnRequest {
            pos,
            kind: old.kind(),
            count: 1,
        });
        self.dispositions.push((pos, disposition));
        Ok(())
    }

    fn process_spawn(
        &mut self,
        _world: &mut EffectCtx<'_>,
        spawn: SpawnRequest,
    ) -> Result<(), EffectError> {
        self.materialized.push(spawn.pos);
        Ok(())
    }
}

#[test]
fn non_capturing_phase_hands_spawns_back_immediately() {
    let pos = CellPos::new(1, 1, 1);
    let mut store = GridStore::new();
    store.set_state(pos, kind("stone"));
    let mut tracker = Tracker::new(store, InlineSpawnHooks::default());
    let policy = PhasePolicy {
        capture_spawns: false,
        ..PhasePolicy::default()
    };

    let op = tracker.begin(Cause::new("test:inline-spawn"), policy);
    tracker
        .submit_state_change(pos, CellState::EMPTY, ChangeFlags::NONE)
        .unwrap();
    let receipt = tracker.end(op).unwrap().unwrap();

    assert_eq!(receipt.applied_count(), 1);
    assert_eq!(
        tracker.hooks().dispositions,
        vec![(pos, SpawnDisposition::Immediate)]
    );
    assert!(
        tracker.hooks().materialized.is_empty(),
        "an Immediate spawn is never buffered or drained by the walk"
    );
}
