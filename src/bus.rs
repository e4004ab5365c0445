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

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use crate::color::ColorSample;
use crate::model::LightId;

/// A double-buffered publication point for final per-light colors. The
/// engine stages every light's blended result for the current tick, then
/// commits the whole frame atomically so readers (the DMX publisher, a
/// preview sink) never observe a half-written tick. Modeled on the
/// `Arc<RwLock<..>>` shared-state pattern the teacher's `dmx::universe`
/// module uses for its own current/target buffers.
#[derive(Clone)]
pub struct LightStateBus {
    staged: Arc<RwLock<HashMap<LightId, ColorSample>>>,
    committed: Arc<RwLock<HashMap<LightId, ColorSample>>>,
}

impl LightStateBus {
    pub fn new() -> LightStateBus {
        LightStateBus {
            staged: Arc::new(RwLock::new(HashMap::new())),
            committed: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Records `color` for `light` in the staging buffer. Not visible to
    /// readers until `commit_frame` is called.
    pub fn stage(&self, light: LightId, color: ColorSample) {
        self.staged
            .write()
            .expect("light state bus staged lock poisoned")
            .insert(light, color);
    }

    /// Atomically publishes the staged frame: readers either see the
    /// previous tick's full frame or this tick's full frame, never a mix.
    /// A tick with nothing staged is a no-op, leaving the previously
    /// published frame in place rather than publishing an empty one. The
    /// staging buffer is drained on every call, so a light that stages no
    /// update this tick does not linger in the next committed frame.
    pub fn commit_frame(&self) {
        let staged = std::mem::take(
            &mut *self
                .staged
                .write()
                .expect("light state bus staged lock poisoned"),
        );
        if staged.is_empty() {
            return;
        }
        *self
            .committed
            .write()
            .expect("light state bus committed lock poisoned") = staged;
    }

    pub fn get(&self, light: LightId) -> Option<ColorSample> {
        self.committed
            .read()
            .expect("light state bus committed lock poisoned")
            .get(&light)
            .copied()
    }

    pub fn snapshot(&self) -> HashMap<LightId, ColorSample> {
        self.committed
            .read()
            .expect("light state bus committed lock poisoned")
            .clone()
    }
}

impl Default for LightStateBus {
    fn default() -> LightStateBus {
        LightStateBus::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn staged_values_are_invisible_until_commit() {
        let bus = LightStateBus::new();
        bus.stage(1, ColorSample::new(255, 0, 0, 0));
        assert!(bus.get(1).is_none());

        bus.commit_frame();
        assert_eq!(bus.get(1).unwrap().r, 255);
    }

    #[test]
    fn commit_replaces_the_whole_frame() {
        let bus = LightStateBus::new();
        bus.stage(1, ColorSample::new(1, 0, 0, 0));
        bus.stage(2, ColorSample::new(2, 0, 0, 0));
        bus.commit_frame();

        // Next tick only stages light 1; light 2 should drop out of the
        // committed frame once the new frame commits.
        bus.stage(1, ColorSample::new(9, 0, 0, 0));
        bus.commit_frame();

        assert_eq!(bus.get(1).unwrap().r, 9);
        assert!(bus.get(2).is_none());
    }
}
