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

use std::time::Duration;

use crate::color::{ColorSample, Easing};

pub type LightId = u32;
pub type LayerId = u32;

/// A condition that gates advancement of an effect's state machine. `None`
/// is satisfied immediately; the rest are satisfied by an external event
/// reported through `EventHandler` (beat/measure/keyframe) or by elapsed
/// wall-clock time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WaitCondition {
    None,
    /// Satisfied after this many beat events have been observed.
    Beats(u32),
    /// Satisfied after this many measure events have been observed.
    Measures(u32),
    /// Satisfied the next time a keyframe with this name fires.
    Keyframe(String),
    /// Satisfied after this much wall-clock time has elapsed.
    Elapsed(Duration),
}

impl WaitCondition {
    pub fn is_none(&self) -> bool {
        matches!(self, WaitCondition::None)
    }
}

/// A single eased move from whatever color is currently showing to `target`
/// over `duration`, sampled through `easing`.
#[derive(Debug, Clone, PartialEq)]
pub struct Transition {
    pub target: ColorSample,
    pub duration: Duration,
    pub easing: Easing,
}

impl Transition {
    pub fn instant(target: ColorSample) -> Transition {
        Transition {
            target,
            duration: Duration::ZERO,
            easing: Easing::Linear,
        }
    }
}

/// One step of an effect's program: wait for `wait_for`, then transition,
/// then hold (`wait_until`) before either advancing to the next step,
/// looping (if the owning effect is cyclic), or terminating.
///
/// Carries its own `layer`/`lights` rather than inheriting a single pair
/// from the owning `Effect`, per spec.md §3's "Transitions of one effect may
/// target different layers and different lights" and §4.3's "transition
/// expansion": each step is narrowed to one (layer, light) slot by
/// `Effect::narrowed_to` before it ever reaches a `TransitionEngine`.
#[derive(Debug, Clone)]
pub struct Step {
    pub layer: LayerId,
    pub lights: Vec<LightId>,
    pub wait_for: WaitCondition,
    pub transition: Transition,
    pub wait_until: WaitCondition,
}

/// An immutable description of a lighting effect: an ordered program of
/// steps, each independently targeting its own layer and light set. Per the
/// redesign flag against shared mutable effect handles, an `Effect` value
/// carries no runtime cursor of its own — that lives in the per-(layer,
/// light) `ActiveRecord` that references it.
#[derive(Debug, Clone)]
pub struct Effect {
    pub name: String,
    pub priority: i32,
    pub steps: Vec<Step>,
    /// Whether the step sequence restarts from step 0 after the last step's
    /// `wait_until` is satisfied, re-aligning to the persistent cycle
    /// boundary rather than free-running (see `engine::drift`).
    pub cyclic: bool,
}

impl Effect {
    pub fn total_step_count(&self) -> usize {
        self.steps.len()
    }

    pub fn is_permanent(&self) -> bool {
        self.cyclic
    }

    /// Every distinct (layer, light) slot this effect's steps target, in
    /// first-seen order. `TransitionEngine::submit` installs one narrowed
    /// record per slot returned here.
    pub fn slots(&self) -> Vec<(LayerId, LightId)> {
        let mut seen: Vec<(LayerId, LightId)> = Vec::new();
        for step in &self.steps {
            for &light in &step.lights {
                let slot = (step.layer, light);
                if !seen.contains(&slot) {
                    seen.push(slot);
                }
            }
        }
        seen
    }

    /// Narrows this effect down to the ordered sub-list of steps that target
    /// `slot`, each narrowed step's `lights` reduced to that one light — the
    /// "flattened sub-list of transitions that apply to this light" from
    /// spec.md §3's per-(layer, light) active record invariant, and the
    /// "transition expansion" described in §4.3.
    pub fn narrowed_to(&self, slot: (LayerId, LightId)) -> Effect {
        let (layer, light) = slot;
        let steps = self
            .steps
            .iter()
            .filter(|step| step.layer == layer && step.lights.contains(&light))
            .cloned()
            .map(|mut step| {
                step.lights = vec![light];
                step
            })
            .collect();
        Effect {
            name: self.name.clone(),
            priority: self.priority,
            steps,
            cyclic: self.cyclic,
        }
    }
}

/// The phase of an `ActiveRecord`'s state machine, mirroring the three named
/// states from the engine's design: waiting for a gating condition, actively
/// transitioning, and holding once the transition lands.
///
/// `deadline` is the absolute engine time (tick count converted to duration)
/// at which a time-based wait is satisfied; it is `None` for event-gated
/// conditions (`Beats`/`Measures`/`Keyframe`), which are only ever resolved
/// by `events::apply_event` decrementing `condition` in place, never by
/// elapsed time.
#[derive(Debug, Clone, PartialEq)]
pub enum Phase {
    WaitingFor {
        condition: WaitCondition,
        deadline: Option<Duration>,
    },
    Transitioning {
        from: ColorSample,
        started_at: Duration,
    },
    WaitingUntil {
        condition: WaitCondition,
        deadline: Option<Duration>,
    },
}

impl Phase {
    /// Computes the entry state for a wait condition at `now`: a deadline
    /// for time-based conditions, `None` for event-gated ones.
    pub fn waiting_for(condition: WaitCondition, now: Duration) -> Phase {
        let deadline = match &condition {
            WaitCondition::None => Some(now),
            WaitCondition::Elapsed(d) => Some(now + *d),
            WaitCondition::Beats(_) | WaitCondition::Measures(_) | WaitCondition::Keyframe(_) => {
                None
            }
        };
        Phase::WaitingFor { condition, deadline }
    }

    pub fn waiting_until(condition: WaitCondition, now: Duration) -> Phase {
        let deadline = match &condition {
            WaitCondition::None => Some(now),
            WaitCondition::Elapsed(d) => Some(now + *d),
            WaitCondition::Beats(_) | WaitCondition::Measures(_) | WaitCondition::Keyframe(_) => {
                None
            }
        };
        Phase::WaitingUntil { condition, deadline }
    }
}

/// The wall-clock reference a persistent cyclic effect re-aligns to. Stored
/// as an integer tick count rather than a float duration so that cycle
/// boundary arithmetic (`elapsed_ticks % cycle_ticks`) is exact and free of
/// float drift; periodic drift correction (see `engine::drift`) compares
/// this against the observed tick position and nudges the record back into
/// alignment if the divergence exceeds the configured threshold.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AbsoluteTiming {
    pub started_at_tick: u64,
    pub cycle_ticks: u64,
}

impl AbsoluteTiming {
    /// Ticks elapsed since the start of the current cycle, given the
    /// current absolute tick count.
    pub fn ticks_into_cycle(&self, now_tick: u64) -> u64 {
        if self.cycle_ticks == 0 {
            return 0;
        }
        let elapsed = now_tick.saturating_sub(self.started_at_tick);
        elapsed % self.cycle_ticks
    }

    /// The most recent cycle boundary at or before `now_tick`: `T0 + ℓ +
    /// ⌊(now−T0−ℓ)/C⌋·C` once the first boundary has passed, else the first
    /// start `T0 + ℓ` itself (`started_at_tick` already folds `T0` and `ℓ`
    /// together). This is both the re-arm target a just-finished persistent
    /// cycle uses (spec.md §4.3) and the reference point drift correction
    /// compares the record's own tick count against.
    pub fn most_recent_boundary_tick(&self, now_tick: u64) -> u64 {
        if self.cycle_ticks == 0 || now_tick < self.started_at_tick {
            self.started_at_tick
        } else {
            now_tick - self.ticks_into_cycle(now_tick)
        }
    }
}

/// The currently running effect for a single (layer, light) pair.
#[derive(Debug, Clone)]
pub struct ActiveRecord {
    pub effect: Effect,
    pub layer: LayerId,
    pub light: LightId,
    pub step_index: usize,
    pub phase: Phase,
    /// The color reached at the end of the most recently completed
    /// transition; the start color for the next one. Per invariant (d) in
    /// spec.md §3, defined whenever `phase` is not `WaitingFor` at step 0.
    pub last_end_state: ColorSample,
    pub timing: Option<AbsoluteTiming>,
    /// Ticks elapsed since this record's step sequence last restarted a
    /// cycle; free-running counter used by `engine::drift` to detect
    /// divergence from the wall-clock-derived cycle position in `timing`.
    pub elapsed_ticks: u64,
}

impl ActiveRecord {
    pub fn current_step(&self) -> Option<&Step> {
        self.effect.steps.get(self.step_index)
    }
}

/// An effect queued to take over a (layer, light) slot once the active
/// record there reaches a point that permits replacement — either its
/// natural terminal state, or an explicit unblock-by-name submission.
#[derive(Debug, Clone)]
pub struct PendingRecord {
    pub effect: Effect,
    pub light: LightId,
    /// If set, this pending record only becomes eligible to take over once
    /// the active record's effect name matches `unblock_name` and that
    /// active record is released (submission discipline 3/4).
    pub unblock_name: Option<String>,
    /// Carried-forward cycle alignment for a persistent effect re-enqueuing
    /// itself at the end of a cycle; `None` for an ordinary (non-cyclic)
    /// queue entry.
    pub timing: Option<AbsoluteTiming>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ticks_into_cycle_wraps() {
        let timing = AbsoluteTiming {
            started_at_tick: 0,
            cycle_ticks: 60,
        };
        assert_eq!(timing.ticks_into_cycle(0), 0);
        assert_eq!(timing.ticks_into_cycle(59), 59);
        assert_eq!(timing.ticks_into_cycle(60), 0);
        assert_eq!(timing.ticks_into_cycle(125), 5);
    }

    #[test]
    fn most_recent_boundary_before_first_start_is_the_first_start() {
        let timing = AbsoluteTiming {
            started_at_tick: 15,
            cycle_ticks: 60,
        };
        assert_eq!(timing.most_recent_boundary_tick(10), 15);
    }

    #[test]
    fn most_recent_boundary_lands_on_cycle_starts() {
        let timing = AbsoluteTiming {
            started_at_tick: 15,
            cycle_ticks: 60,
        };
        assert_eq!(timing.most_recent_boundary_tick(15), 15);
        assert_eq!(timing.most_recent_boundary_tick(74), 15);
        assert_eq!(timing.most_recent_boundary_tick(75), 75);
        assert_eq!(timing.most_recent_boundary_tick(200), 135);
    }

    #[test]
    fn zero_cycle_ticks_never_divides() {
        let timing = AbsoluteTiming {
            started_at_tick: 10,
            cycle_ticks: 0,
        };
        assert_eq!(timing.ticks_into_cycle(1000), 0);
    }
}
