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

mod drift;
mod submission;

#[cfg(test)]
mod tests;

use std::collections::{HashMap, HashSet};
use std::time::Duration;

use tracing::{debug, trace, warn};

use crate::clock::Tick;
use crate::color::ColorSample;
use crate::config::Config;
use crate::error::InterpolationError;
use crate::events::GameEvent;
use crate::interpolator::Interpolator;
use crate::model::{ActiveRecord, AbsoluteTiming, Effect, LayerId, LightId, Phase, WaitCondition};
use crate::store::{LayerStore, Slot};

pub use submission::{CycleSpec, Submission, SubmissionKind};

/// Tick-denominated counterparts of `Config`'s millisecond knobs, computed
/// once at `Config`'s resolved `tick_hz` so the state machine never does
/// floating-point time math on the hot per-tick path.
#[derive(Debug, Clone, Copy)]
pub struct EngineConfig {
    pub protected_layer_min: LayerId,
    pub layer_grace_ticks: u64,
    pub drift_threshold_ticks: u64,
    pub drift_check_interval_ticks: u64,
    pub period: Duration,
}

impl EngineConfig {
    pub fn from_config(config: &Config) -> EngineConfig {
        let ms_to_ticks = |ms: u64| -> u64 { (ms * config.tick_hz as u64) / 1000 };
        EngineConfig {
            protected_layer_min: config.protected_layer_min,
            layer_grace_ticks: ms_to_ticks(config.layer_grace_ms).max(1),
            drift_threshold_ticks: ms_to_ticks(config.drift_threshold_ms),
            drift_check_interval_ticks: ms_to_ticks(config.drift_check_interval_ms).max(1),
            period: Duration::from_secs_f64(1.0 / config.tick_hz as f64),
        }
    }
}

fn tick_to_duration(tick: u64, period: Duration) -> Duration {
    Duration::from_secs_f64(tick as f64 * period.as_secs_f64())
}

/// The state machine from spec.md §4.3: advances every active
/// (layer, light) record through `waitingFor` → `transitioning` →
/// `waitingUntil`, applies the four submission disciplines, and runs
/// periodic drift correction for persistent cyclic effects. Operates on
/// `LayerStore` and `Interpolator` passed in by the caller rather than
/// owning them itself — per spec.md §9's note against shared mutable effect
/// handles, this keeps `TransitionEngine` a value-based, steppable piece of
/// logic rather than an object with its own hidden mutable world, the way
/// the teacher's `engine::processing` module is free functions operating on
/// an `EffectEngine`'s borrowed fields.
pub struct TransitionEngine {
    config: EngineConfig,
    /// Per-light name of the most recent effect installed on layer 0, used
    /// by the `set` submission discipline's re-entrance rule (spec.md §4.3,
    /// scenario S5).
    last_layer0_name: HashMap<LightId, String>,
    /// Whether a blackout effect currently occupies a protected (system)
    /// layer, gating `add`/`add-unblocked-by-name` per the submission table.
    blackout_active: bool,
    last_drift_check_tick: u64,
    /// The ideal, never-drifted cycle schedule per persistent effect name,
    /// registered the first time that name installs with `absoluteTiming`
    /// and only ever updated by `engine::drift`'s periodic correction. Used
    /// as the "expected" side of the drift comparison in spec.md §4.3.
    timing_registry: HashMap<String, AbsoluteTiming>,
}

impl TransitionEngine {
    pub fn new(config: EngineConfig) -> TransitionEngine {
        TransitionEngine {
            config,
            last_layer0_name: HashMap::new(),
            blackout_active: false,
            last_drift_check_tick: 0,
            timing_registry: HashMap::new(),
        }
    }

    pub fn set_blackout_active(&mut self, active: bool) {
        self.blackout_active = active;
    }

    pub fn blackout_active(&self) -> bool {
        self.blackout_active
    }

    /// Applies a single game event to every active record whose current
    /// transition is gated on it (spec.md §4.9). Must be called before
    /// `advance_tick` processes the same tick's time-based steps, so an
    /// event that fully satisfies a wait is picked up by the same tick's
    /// sweep rather than waiting a full extra period.
    pub fn apply_event(
        &mut self,
        store: &mut LayerStore,
        interpolator: &mut Interpolator,
        event: &GameEvent,
        now: Duration,
    ) {
        let slots: Vec<Slot> = store.active_slots().copied().collect();
        for (layer, light) in slots {
            self.apply_event_to_slot((layer, light), store, interpolator, event, now);
        }
    }

    fn apply_event_to_slot(
        &mut self,
        slot: Slot,
        store: &mut LayerStore,
        interpolator: &mut Interpolator,
        event: &GameEvent,
        now: Duration,
    ) {
        let (layer, light) = slot;
        let satisfied_waiting_for = {
            let Some(record) = store.get_active_mut(layer, light) else {
                return;
            };
            match &mut record.phase {
                Phase::WaitingFor { condition, deadline } if deadline.is_none() => {
                    crate::events::apply_event(condition, event)
                }
                _ => false,
            }
        };
        if satisfied_waiting_for {
            begin_transition(slot, store, interpolator, now);
            return;
        }

        let satisfied_waiting_until = {
            let Some(record) = store.get_active_mut(layer, light) else {
                return;
            };
            match &mut record.phase {
                Phase::WaitingUntil { condition, deadline } if deadline.is_none() => {
                    crate::events::apply_event(condition, event)
                }
                _ => false,
            }
        };
        if satisfied_waiting_until {
            self.advance_past_hold(slot, store, interpolator, now, None);
        }
    }

    /// Advances the whole state machine by one tick: time-gated waits are
    /// checked against `now`, landed transitions are sampled, terminal
    /// records are handed off to the queue or persisted, drift is corrected
    /// at most once per `drift_check_interval_ticks`, and idle layers above
    /// the base are reaped.
    pub fn advance_tick(
        &mut self,
        store: &mut LayerStore,
        interpolator: &mut Interpolator,
        tick: Tick,
    ) {
        let now = tick_to_duration(tick.count, tick.period);
        let slots: Vec<Slot> = store.active_slots().copied().collect();

        for slot in slots {
            self.step_time(slot, store, interpolator, now, tick.count);
        }

        self.maybe_correct_drift(store, tick.count, tick.period);
        store.cleanup_idle_layers(tick.count, self.config.layer_grace_ticks);
    }

    fn step_time(
        &mut self,
        slot: Slot,
        store: &mut LayerStore,
        interpolator: &mut Interpolator,
        now: Duration,
        now_tick: u64,
    ) {
        let (layer, light) = slot;

        if let Some(record) = store.get_active_mut(layer, light) {
            if record.timing.is_some() {
                record.elapsed_ticks += 1;
            }
        }

        let action = {
            let Some(record) = store.get_active(layer, light) else {
                return;
            };
            match &record.phase {
                Phase::WaitingFor { deadline, .. } => {
                    if deadline.is_some_and(|d| now >= d) {
                        Some(Action::Begin)
                    } else {
                        None
                    }
                }
                Phase::Transitioning { started_at, .. } => {
                    let step = record.current_step();
                    let duration = step.map(|s| s.transition.duration).unwrap_or(Duration::ZERO);
                    Some(Action::Sample {
                        started_at: *started_at,
                        landed: now >= *started_at + duration,
                    })
                }
                Phase::WaitingUntil { deadline, .. } => {
                    if deadline.is_some_and(|d| now >= d) {
                        Some(Action::Hold)
                    } else {
                        None
                    }
                }
            }
        };

        match action {
            Some(Action::Begin) => begin_transition(slot, store, interpolator, now),
            Some(Action::Sample { started_at, landed }) => {
                self.sample_transition(slot, store, interpolator, now, started_at, landed)
            }
            Some(Action::Hold) => self.advance_past_hold(slot, store, interpolator, now, Some(now_tick)),
            None => {}
        }
    }

    fn sample_transition(
        &mut self,
        slot: Slot,
        store: &mut LayerStore,
        interpolator: &mut Interpolator,
        now: Duration,
        started_at: Duration,
        landed: bool,
    ) {
        let (layer, light) = slot;
        let transition = match store.get_active(layer, light).and_then(|r| r.current_step()) {
            Some(step) => step.transition.clone(),
            None => return,
        };
        let elapsed = now.saturating_sub(started_at);
        let sample = interpolator
            .sample(layer, light, &transition, elapsed)
            .unwrap_or_else(|err: InterpolationError| {
                warn!(layer, light, error = %err, "missing interpolation start state; defaulting to opaque black");
                ColorSample::blackout()
            });
        store.set_light_state(layer, light, sample);

        if landed {
            if let Some(record) = store.get_active_mut(layer, light) {
                record.last_end_state = transition.target;
                record.phase = Phase::waiting_until(transition_wait_until(record), now);
            }
        }
    }

    /// Called once a `waitingUntil` hold elapses (by time or by event):
    /// advances to the next step, or finishes the record if none remain.
    fn advance_past_hold(
        &mut self,
        slot: Slot,
        store: &mut LayerStore,
        interpolator: &mut Interpolator,
        now: Duration,
        now_tick: Option<u64>,
    ) {
        let (layer, light) = slot;
        let terminal = {
            let Some(record) = store.get_active_mut(layer, light) else {
                return;
            };
            record.step_index += 1;
            if record.step_index < record.effect.steps.len() {
                let next_wait = record.effect.steps[record.step_index].wait_for.clone();
                record.phase = Phase::waiting_for(next_wait, now);
                false
            } else {
                true
            }
        };
        if terminal {
            self.finish_record(slot, store, interpolator, now, now_tick);
        }
    }

    /// Terminal handling (spec.md §3 "Lifecycles", §4.3): a persistent
    /// record re-enqueues itself carrying forward its cycle alignment; a
    /// finished record (persistent or not) always yields the slot to the
    /// queue's front entry if one exists, so a successor takes over on the
    /// very same tick (testable property 6, "queue continuity").
    fn finish_record(
        &mut self,
        slot: Slot,
        store: &mut LayerStore,
        interpolator: &mut Interpolator,
        now: Duration,
        now_tick: Option<u64>,
    ) {
        let (layer, light) = slot;
        let Some(record) = store.remove_active(layer, light) else {
            return;
        };
        interpolator.remove_layer(layer, light);

        if record.effect.is_permanent() {
            let timing = record.timing.unwrap_or(AbsoluteTiming {
                started_at_tick: now_tick.unwrap_or(0),
                cycle_ticks: 0,
            });
            let rearmed = rearm_timing(timing, now_tick.unwrap_or(0));
            debug!(
                layer,
                light,
                effect = %record.effect.name,
                next_boundary_tick = rearmed.started_at_tick,
                "persistent effect re-enqueuing for next cycle"
            );
            store.enqueue(
                layer,
                light,
                crate::model::PendingRecord {
                    effect: record.effect.clone(),
                    light,
                    unblock_name: None,
                    timing: Some(rearmed),
                },
            );
        }

        if let Some(next) = store.take_eligible_queued(layer, light, |_| true) {
            self.install(slot, store, next.effect, next.timing, now);
        } else if layer > 0 {
            store.remove_light_state(layer, light);
        }
    }

    /// Installs `effect` as the active record for `slot`, seeding its start
    /// color from the slot's cached last color for visual continuity across
    /// submissions (spec.md §4.2 `getLightState`/`setLightState`).
    fn install(
        &mut self,
        slot: Slot,
        store: &mut LayerStore,
        effect: Effect,
        timing: Option<AbsoluteTiming>,
        now: Duration,
    ) {
        let (layer, light) = slot;
        let start = store
            .get_light_state(layer, light)
            .unwrap_or_else(|| ColorSample::blackout().with_opacity(0.0));

        let phase = match (timing, effect.steps.first()) {
            (Some(t), _) => Phase::WaitingFor {
                condition: WaitCondition::None,
                deadline: Some(tick_to_duration(t.started_at_tick, self.config.period)),
            },
            (None, Some(step)) => Phase::waiting_for(step.wait_for.clone(), now),
            (None, None) => Phase::waiting_for(WaitCondition::None, now),
        };

        if layer == 0 {
            self.last_layer0_name.insert(light, effect.name.clone());
        }

        if let Some(t) = timing {
            self.timing_registry.entry(effect.name.clone()).or_insert(t);
        }

        let record = ActiveRecord {
            effect,
            layer,
            light,
            step_index: 0,
            phase,
            last_end_state: start,
            timing,
            elapsed_ticks: 0,
        };
        store.put_active(layer, light, record);
    }
}

enum Action {
    Begin,
    Sample { started_at: Duration, landed: bool },
    Hold,
}

fn begin_transition(slot: Slot, store: &mut LayerStore, interpolator: &mut Interpolator, now: Duration) {
    let (layer, light) = slot;
    let Some(record) = store.get_active_mut(layer, light) else {
        return;
    };
    if record.current_step().is_none() {
        return;
    }
    let from = record.last_end_state;
    interpolator.capture_start(layer, light, from);
    record.phase = Phase::Transitioning { from, started_at: now };
    trace!(layer, light, effect = %record.effect.name, "beginning transition");
}

fn transition_wait_until(record: &ActiveRecord) -> WaitCondition {
    record
        .current_step()
        .map(|s| s.wait_until.clone())
        .unwrap_or(WaitCondition::None)
}

/// Computes the next cycle boundary for a persistent effect that just
/// finished a cycle: the most recent boundary at-or-before `now_tick`,
/// which — because `now_tick` sits right at the end of the cycle whose
/// steps just ran to completion — is exactly the *next* scheduled start.
fn rearm_timing(timing: AbsoluteTiming, now_tick: u64) -> AbsoluteTiming {
    AbsoluteTiming {
        started_at_tick: timing.most_recent_boundary_tick(now_tick),
        cycle_ticks: timing.cycle_ticks,
    }
}
