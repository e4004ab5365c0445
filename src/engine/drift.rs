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

use tracing::debug;

use crate::model::AbsoluteTiming;
use crate::store::{LayerStore, Slot};

use super::{tick_to_duration, TransitionEngine};

impl TransitionEngine {
    /// Runs periodic drift correction at most once per
    /// `drift_check_interval_ticks` (spec.md §4.3: "once per second"). Any
    /// number of persistent effect names may be registered; each gets its own
    /// independent check against the single active record chosen to
    /// represent it.
    pub(super) fn maybe_correct_drift(&mut self, store: &mut LayerStore, now_tick: u64, period: Duration) {
        if now_tick < self.last_drift_check_tick + self.config.drift_check_interval_ticks {
            return;
        }
        self.last_drift_check_tick = now_tick;

        let names: Vec<String> = self.timing_registry.keys().cloned().collect();
        for name in names {
            self.correct_drift_for_name(store, &name, period);
        }
    }

    /// Compares the registered ideal schedule for `name` against one active
    /// record carrying that name's current `timing`, and — if the two have
    /// diverged past `drift_threshold_ticks` — shifts every other active and
    /// queued record sharing `name`, plus the registry entry itself, by the
    /// same correction. The sampled record is left untouched: it already sits
    /// at the corrected position, so re-shifting it would overshoot.
    fn correct_drift_for_name(&mut self, store: &mut LayerStore, name: &str, period: Duration) {
        let Some(canonical) = self.timing_registry.get(name).copied() else {
            return;
        };
        if canonical.cycle_ticks == 0 {
            return;
        }

        let Some(reference_slot) = find_reference_slot(store, name) else {
            return;
        };
        let Some(reference_timing) = store.get_active(reference_slot.0, reference_slot.1).and_then(|r| r.timing)
        else {
            return;
        };

        let delta_ticks = phase_offset(
            reference_timing.started_at_tick,
            canonical.started_at_tick,
            canonical.cycle_ticks,
        );
        if delta_ticks == 0 {
            return;
        }

        let drift = tick_to_duration(delta_ticks.unsigned_abs(), period);
        let threshold = tick_to_duration(self.config.drift_threshold_ticks, period);
        if drift <= threshold {
            return;
        }

        debug!(
            effect = name,
            drift_ms = drift.as_secs_f64() * 1000.0,
            delta_ticks,
            "correcting schedule drift"
        );

        self.timing_registry.insert(
            name.to_string(),
            AbsoluteTiming {
                started_at_tick: canonical.started_at_tick.saturating_add_signed(delta_ticks),
                cycle_ticks: canonical.cycle_ticks,
            },
        );

        let slots: Vec<Slot> = store.active_slots().copied().collect();
        for slot in slots {
            if slot == reference_slot {
                continue;
            }
            if let Some(record) = store.get_active_mut(slot.0, slot.1) {
                if record.effect.name == name {
                    if let Some(timing) = &mut record.timing {
                        timing.started_at_tick = timing.started_at_tick.saturating_add_signed(delta_ticks);
                    }
                }
            }
        }
        store.adjust_queued_timing_for_name(name, delta_ticks);
    }
}

/// The signed tick offset between `actual_start` and `canonical_start`,
/// reduced into the cycle's own period so that a started-at-tick which has
/// been carried forward by any whole number of re-armed cycles still reads
/// as the same small phase error rather than growing without bound. Chosen
/// over comparing `most_recent_boundary_tick` at a given instant because
/// that quantity depends on which instant is sampled (it wraps every
/// cycle), where a phase offset is a property of the schedule alone.
fn phase_offset(actual_start: u64, canonical_start: u64, cycle_ticks: u64) -> i64 {
    let cycle = cycle_ticks as i64;
    let raw = actual_start as i64 - canonical_start as i64;
    let wrapped = raw.rem_euclid(cycle);
    if wrapped > cycle / 2 {
        wrapped - cycle
    } else {
        wrapped
    }
}

fn find_reference_slot(store: &LayerStore, name: &str) -> Option<Slot> {
    store
        .active_slots()
        .copied()
        .find(|&(layer, light)| {
            store
                .get_active(layer, light)
                .is_some_and(|r| r.effect.name == name && r.timing.is_some())
        })
}
