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

use tracing::{debug, info};

use crate::error::SubmissionError;
use crate::interpolator::Interpolator;
use crate::model::{AbsoluteTiming, Effect, LayerId, LightId, PendingRecord};
use crate::store::LayerStore;

use super::TransitionEngine;

/// A persistent effect's cycle alignment, carried in from the cue that
/// submitted it (spec.md §4.3's `cycleStartTime`/`cycleDuration`/`lightOffset`
/// triple). `None` for a one-shot (non-cyclic) effect.
#[derive(Debug, Clone, Copy)]
pub struct CycleSpec {
    pub cycle_start_tick: u64,
    pub cycle_ticks: u64,
    pub light_offset_ticks: u64,
}

impl CycleSpec {
    fn to_timing(self) -> AbsoluteTiming {
        AbsoluteTiming {
            started_at_tick: self.cycle_start_tick + self.light_offset_ticks,
            cycle_ticks: self.cycle_ticks,
        }
    }
}

/// The four disciplines a `CueDispatcher` submission may request, named
/// exactly as spec.md §4.3's table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubmissionKind {
    Add,
    Set,
    AddUnblockedByName,
    SetUnblockedByName,
}

/// One cue's request to install `effect` across every light it targets.
#[derive(Debug, Clone)]
pub struct Submission {
    pub kind: SubmissionKind,
    pub effect: Effect,
    pub cycle: Option<CycleSpec>,
}

impl TransitionEngine {
    /// Applies one submission to every (layer, light) slot the effect's
    /// steps target, per the discipline table in spec.md §4.3. An effect's
    /// steps may span several layers and light sets (spec.md §3: "Transitions
    /// of one effect may target different layers and different lights"), so
    /// the pre-action checks below look at the whole set of layers the
    /// submission touches rather than a single one. Per-light failures
    /// (unknown light id) are the caller's concern — this only ever receives
    /// light ids already resolved against the fixture table.
    pub fn submit(
        &mut self,
        store: &mut LayerStore,
        interpolator: &mut Interpolator,
        submission: Submission,
        now: Duration,
        now_tick: u64,
    ) -> Result<(), SubmissionError> {
        let slots = submission.effect.slots();
        if slots.is_empty() {
            return Err(SubmissionError::EmptyTargetSet {
                name: submission.effect.name.clone(),
            });
        }

        let name = submission.effect.name.clone();
        let mut layers: Vec<LayerId> = slots.iter().map(|&(layer, _)| layer).collect();
        layers.sort_unstable();
        layers.dedup();
        // The representative layer reported in rejection errors: the lowest
        // layer the submission touches, matching the single-layer shape
        // those error variants were designed around.
        let layer = layers[0];
        let touches_below_protected = layers.iter().any(|&l| l < self.config.protected_layer_min);
        let touches_system_layer = layers.iter().any(|&l| l >= self.config.protected_layer_min);

        match submission.kind {
            SubmissionKind::Add => {
                if self.blackout_active && touches_below_protected {
                    debug!(?layers, effect = %name, "add submission cancels active blackout");
                    self.blackout_active = false;
                }
            }
            SubmissionKind::Set => {
                self.remove_all(store, interpolator);
            }
            SubmissionKind::AddUnblockedByName => {
                if self.name_active_anywhere(store, &name) {
                    return Err(SubmissionError::NameAlreadyActive { layer, name });
                }
                if self.blackout_active && touches_below_protected {
                    return Err(SubmissionError::LayerBlackedOut { layer });
                }
            }
            SubmissionKind::SetUnblockedByName => {
                if self.name_active_anywhere(store, &name) {
                    return Err(SubmissionError::NameAlreadyActive { layer, name });
                }
                self.remove_all(store, interpolator);
            }
        }

        for slot in slots {
            let reentrant_layer0 = reentrant_layer0_for(self, slot.0, slot.1, &submission.kind, &name);
            self.submit_to_slot(store, interpolator, slot, &submission, reentrant_layer0, now, now_tick);
        }

        // Any submission that successfully installs on a system/protected
        // layer (spec.md §3: layers ≥ `protectedLayerMin` "are treated as
        // system/blackout") raises the interlock those same layers are
        // themselves exempt from, per the `add`/`add-unblocked-by-name`
        // disciplines above and testable property 8, "blackout dominance".
        if touches_system_layer {
            self.blackout_active = true;
        }

        info!(?layers, effect = %name, kind = ?submission.kind, "submission applied");
        Ok(())
    }

    fn submit_to_slot(
        &mut self,
        store: &mut LayerStore,
        interpolator: &mut Interpolator,
        slot: (LayerId, LightId),
        submission: &Submission,
        reentrant_layer0: bool,
        now: Duration,
        now_tick: u64,
    ) {
        let (layer, light) = slot;
        let timing = submission.cycle.map(CycleSpec::to_timing);
        let per_slot_effect = submission.effect.narrowed_to(slot);

        if reentrant_layer0 {
            self.enqueue_for_slot(store, slot, per_slot_effect, timing);
            return;
        }

        match store.get_active(layer, light) {
            Some(existing) if existing.effect.name == submission.effect.name => {
                self.enqueue_for_slot(store, slot, per_slot_effect, timing);
            }
            Some(_) => {
                store.remove_active(layer, light);
                interpolator.remove_layer(layer, light);
                self.install_now(store, slot, per_slot_effect, timing, now);
            }
            None => {
                self.install_now(store, slot, per_slot_effect, timing, now);
            }
        }
        store.touch_layer(layer, now_tick);
    }

    fn enqueue_for_slot(
        &mut self,
        store: &mut LayerStore,
        slot: (u32, LightId),
        effect: Effect,
        timing: Option<AbsoluteTiming>,
    ) {
        let (layer, light) = slot;
        store.enqueue(
            layer,
            light,
            PendingRecord {
                effect,
                light,
                unblock_name: None,
                timing,
            },
        );
    }

    fn install_now(
        &mut self,
        store: &mut LayerStore,
        slot: (u32, LightId),
        effect: Effect,
        timing: Option<AbsoluteTiming>,
        now: Duration,
    ) {
        self.install(slot, store, effect, timing, now);
    }

    /// The "unblock by name" refusal check: true if any active record,
    /// anywhere in the store, carries the given effect name.
    fn name_active_anywhere(&self, store: &LayerStore, name: &str) -> bool {
        store
            .active_slots()
            .any(|&(layer, light)| {
                store
                    .get_active(layer, light)
                    .is_some_and(|record| record.effect.name == name)
            })
    }

    /// `set`/`set-unblocked-by-name`'s pre-action: clears every active and
    /// queued record on every layer. Layer-0's remembered name is left
    /// intact so the re-entrance rule can still fire for the submission
    /// that triggered this very clear.
    fn remove_all(&mut self, store: &mut LayerStore, interpolator: &mut Interpolator) {
        let slots: Vec<(u32, LightId)> = store.active_slots().copied().collect();
        for (layer, light) in slots {
            store.remove_active(layer, light);
            interpolator.remove_layer(layer, light);
        }
        store.clear_all();
    }
}

fn reentrant_layer0_for(
    engine: &TransitionEngine,
    layer: u32,
    light: LightId,
    kind: &SubmissionKind,
    name: &str,
) -> bool {
    layer == 0
        && matches!(kind, SubmissionKind::Set | SubmissionKind::SetUnblockedByName)
        && engine.last_layer0_name.get(&light) == Some(&name.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::color::{ColorSample, Easing};
    use crate::engine::EngineConfig;
    use crate::model::{Step, Transition, WaitCondition};

    fn config() -> EngineConfig {
        EngineConfig {
            protected_layer_min: 500,
            layer_grace_ticks: 300,
            drift_threshold_ticks: 1,
            drift_check_interval_ticks: 60,
            period: Duration::from_millis(16),
        }
    }

    fn simple_effect(name: &str, layer: u32, lights: Vec<LightId>) -> Effect {
        Effect {
            name: name.to_string(),
            priority: 0,
            steps: vec![Step {
                layer,
                lights,
                wait_for: WaitCondition::None,
                transition: Transition {
                    target: ColorSample::new(10, 20, 30, 0),
                    duration: Duration::from_millis(100),
                    easing: Easing::Linear,
                },
                wait_until: WaitCondition::Elapsed(Duration::from_secs(3600)),
            }],
            cyclic: false,
        }
    }

    #[test]
    fn add_installs_into_empty_slot() {
        let mut engine = TransitionEngine::new(config());
        let mut store = LayerStore::new();
        let mut interpolator = Interpolator::new();

        engine
            .submit(
                &mut store,
                &mut interpolator,
                Submission {
                    kind: SubmissionKind::Add,
                    effect: simple_effect("wash", 1, vec![1]),
                    cycle: None,
                },
                Duration::ZERO,
                0,
            )
            .unwrap();

        assert!(store.get_active(1, 1).is_some());
    }

    #[test]
    fn add_with_same_name_enqueues_rather_than_restarts() {
        let mut engine = TransitionEngine::new(config());
        let mut store = LayerStore::new();
        let mut interpolator = Interpolator::new();

        for _ in 0..2 {
            engine
                .submit(
                    &mut store,
                    &mut interpolator,
                    Submission {
                        kind: SubmissionKind::Add,
                        effect: simple_effect("wash", 1, vec![1]),
                        cycle: None,
                    },
                    Duration::ZERO,
                    0,
                )
                .unwrap();
        }

        assert_eq!(store.queue_len(1, 1), 1);
    }

    #[test]
    fn add_unblocked_by_name_refuses_when_name_already_active() {
        let mut engine = TransitionEngine::new(config());
        let mut store = LayerStore::new();
        let mut interpolator = Interpolator::new();

        engine
            .submit(
                &mut store,
                &mut interpolator,
                Submission {
                    kind: SubmissionKind::Add,
                    effect: simple_effect("strobe", 2, vec![1]),
                    cycle: None,
                },
                Duration::ZERO,
                0,
            )
            .unwrap();

        let result = engine.submit(
            &mut store,
            &mut interpolator,
            Submission {
                kind: SubmissionKind::AddUnblockedByName,
                effect: simple_effect("strobe", 2, vec![2]),
                cycle: None,
            },
            Duration::ZERO,
            0,
        );

        assert!(matches!(result, Err(SubmissionError::NameAlreadyActive { .. })));
    }

    #[test]
    fn set_clears_other_layers_before_installing() {
        let mut engine = TransitionEngine::new(config());
        let mut store = LayerStore::new();
        let mut interpolator = Interpolator::new();

        engine
            .submit(
                &mut store,
                &mut interpolator,
                Submission {
                    kind: SubmissionKind::Add,
                    effect: simple_effect("old", 3, vec![1]),
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
                    kind: SubmissionKind::Set,
                    effect: simple_effect("new", 1, vec![1]),
                    cycle: None,
                },
                Duration::ZERO,
                0,
            )
            .unwrap();

        assert!(store.get_active(3, 1).is_none());
        assert!(store.get_active(1, 1).is_some());
    }

    #[test]
    fn add_on_blacked_out_system_layer_does_not_cancel_blackout() {
        let mut engine = TransitionEngine::new(config());
        engine.set_blackout_active(true);
        let mut store = LayerStore::new();
        let mut interpolator = Interpolator::new();

        engine
            .submit(
                &mut store,
                &mut interpolator,
                Submission {
                    kind: SubmissionKind::Add,
                    effect: simple_effect("system-glow", 600, vec![1]),
                    cycle: None,
                },
                Duration::ZERO,
                0,
            )
            .unwrap();

        assert!(engine.blackout_active());
    }

    #[test]
    fn add_below_protected_threshold_cancels_blackout() {
        let mut engine = TransitionEngine::new(config());
        engine.set_blackout_active(true);
        let mut store = LayerStore::new();
        let mut interpolator = Interpolator::new();

        engine
            .submit(
                &mut store,
                &mut interpolator,
                Submission {
                    kind: SubmissionKind::Add,
                    effect: simple_effect("wash", 1, vec![1]),
                    cycle: None,
                },
                Duration::ZERO,
                0,
            )
            .unwrap();

        assert!(!engine.blackout_active());
    }

    #[test]
    fn submitting_to_a_system_layer_raises_blackout_without_being_told_to() {
        let mut engine = TransitionEngine::new(config());
        let mut store = LayerStore::new();
        let mut interpolator = Interpolator::new();
        assert!(!engine.blackout_active());

        engine
            .submit(
                &mut store,
                &mut interpolator,
                Submission {
                    kind: SubmissionKind::Add,
                    effect: simple_effect("system-blackout", 500, vec![1, 2]),
                    cycle: None,
                },
                Duration::ZERO,
                0,
            )
            .unwrap();

        assert!(engine.blackout_active());
    }
}
