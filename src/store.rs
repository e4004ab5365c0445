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

use std::collections::{HashMap, VecDeque};

use tracing::{debug, trace};

use crate::color::ColorSample;
use crate::model::{ActiveRecord, LayerId, LightId, PendingRecord};

/// Key identifying a single (layer, light) slot, the unit every active
/// record, queue, and final-state entry is addressed by.
pub type Slot = (LayerId, LightId);

/// Holds the per-(layer, light) active record, its queued continuations, and
/// the last-committed color for every layer/light the sequencer has ever
/// touched. Layers with no active or queued work are reaped by
/// `cleanup_idle_layers` once they have been idle past the configured grace
/// period, the way the teacher's engine keeps `active_effects` trimmed
/// rather than letting it grow across a whole show's lifetime.
#[derive(Debug, Default)]
pub struct LayerStore {
    active: HashMap<Slot, ActiveRecord>,
    queued: HashMap<Slot, VecDeque<PendingRecord>>,
    light_state: HashMap<Slot, ColorSample>,
    last_touched_tick: HashMap<LayerId, u64>,
}

impl LayerStore {
    pub fn new() -> LayerStore {
        LayerStore::default()
    }

    pub fn get_active(&self, layer: LayerId, light: LightId) -> Option<&ActiveRecord> {
        self.active.get(&(layer, light))
    }

    pub fn get_active_mut(&mut self, layer: LayerId, light: LightId) -> Option<&mut ActiveRecord> {
        self.active.get_mut(&(layer, light))
    }

    pub fn put_active(&mut self, layer: LayerId, light: LightId, record: ActiveRecord) {
        trace!(layer, light, effect = %record.effect.name, "storing active record");
        self.active.insert((layer, light), record);
    }

    pub fn remove_active(&mut self, layer: LayerId, light: LightId) -> Option<ActiveRecord> {
        self.active.remove(&(layer, light))
    }

    pub fn enqueue(&mut self, layer: LayerId, light: LightId, record: PendingRecord) {
        trace!(layer, light, effect = %record.effect.name, "enqueuing pending record");
        self.queued
            .entry((layer, light))
            .or_default()
            .push_back(record);
    }

    pub fn dequeue(&mut self, layer: LayerId, light: LightId) -> Option<PendingRecord> {
        let slot = (layer, light);
        let popped = self.queued.get_mut(&slot).and_then(|q| q.pop_front());
        if let Some(q) = self.queued.get(&slot) {
            if q.is_empty() {
                self.queued.remove(&slot);
            }
        }
        popped
    }

    pub fn queue_len(&self, layer: LayerId, light: LightId) -> usize {
        self.queued.get(&(layer, light)).map_or(0, VecDeque::len)
    }

    /// Pops the first queued record for which `is_eligible` returns true,
    /// preserving the relative order of the records left behind. Used to
    /// promote the first eligible pending record for a slot whose active
    /// record just departed, honoring `unblock_name` gating without
    /// disturbing FIFO order among the records that remain.
    pub fn take_eligible_queued<F>(
        &mut self,
        layer: LayerId,
        light: LightId,
        is_eligible: F,
    ) -> Option<PendingRecord>
    where
        F: Fn(&PendingRecord) -> bool,
    {
        let slot = (layer, light);
        let queue = self.queued.get_mut(&slot)?;
        let pos = queue.iter().position(is_eligible)?;
        let popped = queue.remove(pos);
        if queue.is_empty() {
            self.queued.remove(&slot);
        }
        popped
    }

    /// All active records across every layer that target the given light,
    /// used by the blender to fold a light's per-layer contributions.
    pub fn active_effects_for_light(&self, light: LightId) -> Vec<&ActiveRecord> {
        self.active
            .iter()
            .filter(|((_, l), _)| *l == light)
            .map(|(_, record)| record)
            .collect()
    }

    pub fn set_light_state(&mut self, layer: LayerId, light: LightId, color: ColorSample) {
        self.light_state.insert((layer, light), color);
    }

    pub fn get_light_state(&self, layer: LayerId, light: LightId) -> Option<ColorSample> {
        self.light_state.get(&(layer, light)).copied()
    }

    /// Drops the cached per-layer color for a (layer, light) slot, matching
    /// the terminal-handling rule for a non-persistent effect finishing with
    /// an empty queue on a layer above the base: that layer stops
    /// contributing to the light's blend entirely rather than freezing on
    /// its last color (layer 0 never has this called on it).
    pub fn remove_light_state(&mut self, layer: LayerId, light: LightId) {
        self.light_state.remove(&(layer, light));
    }

    /// Shifts the carried-forward cycle timing of every queued record whose
    /// effect shares `name`, mirroring the shift periodic drift correction
    /// applies to the matching active records (spec.md §4.3).
    pub fn adjust_queued_timing_for_name(&mut self, name: &str, delta_ticks: i64) {
        for queue in self.queued.values_mut() {
            for pending in queue.iter_mut() {
                if pending.effect.name == name {
                    if let Some(timing) = &mut pending.timing {
                        timing.started_at_tick = timing.started_at_tick.saturating_add_signed(delta_ticks);
                    }
                }
            }
        }
    }

    /// Removes every active record, queued record, and final-state entry for
    /// a layer, leaving no trace for `cleanup_idle_layers` to later collect.
    pub fn clear_layer(&mut self, layer: LayerId) {
        debug!(layer, "clearing layer");
        self.active.retain(|(l, _), _| *l != layer);
        self.queued.retain(|(l, _), _| *l != layer);
        self.light_state.retain(|(l, _), _| *l != layer);
        self.last_touched_tick.remove(&layer);
    }

    pub fn clear_all(&mut self) {
        debug!("clearing all layers");
        self.active.clear();
        self.queued.clear();
        self.light_state.clear();
        self.last_touched_tick.clear();
    }

    /// Records that a layer had activity at `tick`, resetting its idle-grace
    /// window.
    pub fn touch_layer(&mut self, layer: LayerId, tick: u64) {
        self.last_touched_tick.insert(layer, tick);
    }

    /// Reaps layers that have neither active nor queued records and have not
    /// been touched within `grace_ticks` of `now_tick`. Run once per tick
    /// from the engine's tick handler rather than on a separate timer.
    pub fn cleanup_idle_layers(&mut self, now_tick: u64, grace_ticks: u64) {
        let idle_layers: Vec<LayerId> = self
            .last_touched_tick
            .iter()
            .filter(|(layer, &touched)| {
                **layer != 0
                    && now_tick.saturating_sub(touched) >= grace_ticks
                    && !self.active.keys().any(|(l, _)| l == *layer)
                    && !self.queued.keys().any(|(l, _)| l == *layer)
            })
            .map(|(layer, _)| *layer)
            .collect();

        for layer in idle_layers {
            debug!(layer, "reaping idle layer");
            self.last_touched_tick.remove(&layer);
            self.light_state.retain(|(l, _), _| *l != layer);
        }
    }

    pub fn active_slots(&self) -> impl Iterator<Item = &Slot> {
        self.active.keys()
    }
}
