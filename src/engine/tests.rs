// Copyright (C) 2025 Michael Wilson <mike@mdwn.dev>
//
// This program is free software: you can redistribute it and/or modify it under
// the terms of the GNU General Public License as published by the Free Software
// Foundation, version 3.
//
// This program is distributed in the hope that it will be useful, but WITHOUT
// ANY WARRANTY; without even the implied warranty of MERCHANTABILITY or FITNESS
// FOR A PARTICULAR PURPOSE. See the GNU General Public License for more details.
//
// You should have received a copy of the GNU General Public License along with
// this program. If not, see <https://www.gnu.org/licenses/>.
//

//! End-to-end state machine coverage driving `TransitionEngine` through
//! `advance_tick` the way the tick loop in `main.rs` does, rather than
//! exercising `submit`/`step_time` in isolation the way `submission.rs`'s own
//! tests do.

use std::time::Duration;

use super::*;
use crate::color::Easing;
use crate::model::{Step, Transition};

const PERIOD_MS: u64 = 16;

fn config() -> EngineConfig {
    EngineConfig {
        protected_layer_min: 500,
        layer_grace_ticks: 300,
        drift_threshold_ticks: 3,
        drift_check_interval_ticks: 60,
        period: Duration::from_millis(PERIOD_MS),
    }
}

fn tick(count: u64) -> Tick {
    Tick {
        count,
        period: Duration::from_millis(PERIOD_MS),
    }
}

fn ms(count: u64) -> Duration {
    Duration::from_millis(count * PERIOD_MS)
}

fn wash(name: &str, light: LightId, transition_ms: u64) -> Effect {
    Effect {
        name: name.to_string(),
        priority: 0,
        steps: vec![Step {
            layer: 1,
            lights: vec![light],
            wait_for: WaitCondition::None,
            transition: Transition {
                target: ColorSample::new(200, 100, 50, 0),
                duration: Duration::from_millis(transition_ms),
                easing: Easing::Linear,
            },
            wait_until: WaitCondition::Elapsed(Duration::from_secs(3600)),
        }],
        cyclic: false,
    }
}

/// S1: a freshly-added effect walks `waitingFor` (instant, `WaitCondition::None`)
/// straight into `transitioning`, samples a mid-flight color, then lands
/// exactly on its target once the transition's duration elapses.
#[test]
fn transition_lands_on_target_after_duration_elapses() {
    let mut engine = TransitionEngine::new(config());
    let mut store = LayerStore::new();
    let mut interpolator = Interpolator::new();

    engine
        .submit(
            &mut store,
            &mut interpolator,
            Submission {
                kind: SubmissionKind::Add,
                effect: wash("wash", 1, 160),
                cycle: None,
            },
            Duration::ZERO,
            0,
        )
        .unwrap();

    // Tick 0 begins the transition; sample a few ticks in.
    engine.advance_tick(&mut store, &mut interpolator, tick(0));
    for count in 1..5 {
        engine.advance_tick(&mut store, &mut interpolator, tick(count));
    }
    let mid = store.get_light_state(1, 1).unwrap();
    assert!(mid.r > 0 && mid.r < 200);

    // 160ms / 16ms per tick = 10 ticks to land.
    for count in 5..=11 {
        engine.advance_tick(&mut store, &mut interpolator, tick(count));
    }
    let landed = store.get_light_state(1, 1).unwrap();
    assert_eq!(landed.r, 200);
    assert_eq!(landed.g, 100);
    assert_eq!(landed.b, 50);
}

/// Testable property 6, "queue continuity": a successor queued behind a
/// finishing non-persistent record takes over the very same tick its
/// predecessor departs, never leaving the slot briefly empty.
#[test]
fn queued_successor_installs_the_same_tick_predecessor_finishes() {
    let mut engine = TransitionEngine::new(config());
    let mut store = LayerStore::new();
    let mut interpolator = Interpolator::new();

    let mut first = wash("first", 1, 0);
    first.steps[0].wait_until = WaitCondition::None;
    engine
        .submit(
            &mut store,
            &mut interpolator,
            Submission {
                kind: SubmissionKind::Add,
                effect: first,
                cycle: None,
            },
            Duration::ZERO,
            0,
        )
        .unwrap();

    engine
        .submit(
            &mut store,
            &mut interpolator,
            Submission {
                kind: SubmissionKind::Add,
                effect: wash("second", 1, 0),
                cycle: None,
            },
            Duration::ZERO,
            0,
        )
        .unwrap();
    assert_eq!(store.queue_len(1, 1), 1);

    // First effect: tick 0 begins its zero-duration transition, tick 1 lands
    // it and opens a zero-wait hold, tick 2 releases that hold and hands the
    // slot to the queued successor.
    engine.advance_tick(&mut store, &mut interpolator, tick(0));
    engine.advance_tick(&mut store, &mut interpolator, tick(1));
    engine.advance_tick(&mut store, &mut interpolator, tick(2));

    let active = store.get_active(1, 1).unwrap();
    assert_eq!(active.effect.name, "second");
    assert_eq!(store.queue_len(1, 1), 0);
}

/// A `waitingFor` hold gated on a beat count is released the instant a
/// matching `GameEvent` arrives, without waiting for a time-based deadline.
#[test]
fn beat_event_releases_a_waiting_for_hold_before_its_deadline() {
    let mut engine = TransitionEngine::new(config());
    let mut store = LayerStore::new();
    let mut interpolator = Interpolator::new();

    let mut gated = wash("gated", 1, 50);
    gated.steps[0].wait_for = WaitCondition::Beats(1);
    engine
        .submit(
            &mut store,
            &mut interpolator,
            Submission {
                kind: SubmissionKind::Add,
                effect: gated,
                cycle: None,
            },
            Duration::ZERO,
            0,
        )
        .unwrap();

    // No beat has fired yet: record should still be waiting, not transitioning.
    engine.advance_tick(&mut store, &mut interpolator, tick(0));
    assert!(matches!(
        store.get_active(1, 1).unwrap().phase,
        Phase::WaitingFor { .. }
    ));

    engine.apply_event(&mut store, &mut interpolator, &GameEvent::Beat, ms(1));
    assert!(matches!(
        store.get_active(1, 1).unwrap().phase,
        Phase::Transitioning { .. }
    ));
}

/// S4: once drift between a persistent effect's registered schedule and its
/// actual installed timing exceeds the configured threshold, `advance_tick`
/// corrects it within one check interval rather than letting it accumulate.
#[test]
fn advance_tick_corrects_registered_schedule_drift_once_past_threshold() {
    let mut engine = TransitionEngine::new(config());
    let mut store = LayerStore::new();
    let mut interpolator = Interpolator::new();

    let mut persistent = wash("sweep", 1, 0);
    persistent.cyclic = true;
    persistent.steps[0].wait_until = WaitCondition::None;

    engine
        .submit(
            &mut store,
            &mut interpolator,
            Submission {
                kind: SubmissionKind::Add,
                effect: persistent,
                cycle: Some(CycleSpec {
                    cycle_start_tick: 0,
                    cycle_ticks: 60,
                    light_offset_ticks: 0,
                }),
            },
            Duration::ZERO,
            0,
        )
        .unwrap();

    // Simulate an external clock skew nudging this record's own timing ahead
    // of the registered ideal, the way a re-synced upstream tempo source
    // might in production.
    {
        let record = store.get_active_mut(1, 1).unwrap();
        let timing = record.timing.as_mut().unwrap();
        timing.started_at_tick += 10;
    }

    // Drive one full check interval so `maybe_correct_drift` fires.
    for count in 0..61 {
        engine.advance_tick(&mut store, &mut interpolator, tick(count));
    }

    let registered = engine.timing_registry.get("sweep").unwrap();
    assert_eq!(registered.started_at_tick, 10);
}
