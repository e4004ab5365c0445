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
use std::time::Duration;

use crate::color::ColorSample;
use crate::error::InterpolationError;
use crate::model::{LayerId, LightId, Transition};

type Slot = (LayerId, LightId);

/// Samples the eased position between a recorded start color and a
/// transition's target at an elapsed duration. Start colors are captured
/// once, at `t = 0` of a transition (or when the active record is
/// retargeted mid-flight), and overwritten the instant `t` reaches 1 so the
/// *next* transition from this (layer, light) pair starts from the color
/// that was actually landed on rather than re-deriving it from the prior
/// transition's target (which could differ under a fast retarget).
#[derive(Debug, Default)]
pub struct Interpolator {
    start_colors: HashMap<Slot, ColorSample>,
}

impl Interpolator {
    pub fn new() -> Interpolator {
        Interpolator::default()
    }

    /// Captures `color` as the frozen start state for `(layer, light)`. Call
    /// this exactly once when a transition begins.
    pub fn capture_start(&mut self, layer: LayerId, light: LightId, color: ColorSample) {
        self.start_colors.insert((layer, light), color);
    }

    pub fn remove_layer(&mut self, layer: LayerId, light: LightId) {
        self.start_colors.remove(&(layer, light));
    }

    pub fn remove_all_for_layer(&mut self, layer: LayerId) {
        self.start_colors.retain(|(l, _), _| *l != layer);
    }

    /// Samples the transition at `elapsed`. Once `elapsed >= transition.duration`
    /// the recorded start color is overwritten with the transition's target,
    /// so a subsequent call (for the next step) starts from the landed color.
    pub fn sample(
        &mut self,
        layer: LayerId,
        light: LightId,
        transition: &Transition,
        elapsed: Duration,
    ) -> Result<ColorSample, InterpolationError> {
        let start = *self
            .start_colors
            .get(&(layer, light))
            .ok_or(InterpolationError::MissingStartState { light, layer })?;

        let t = if transition.duration.is_zero() {
            1.0
        } else {
            (elapsed.as_secs_f64() / transition.duration.as_secs_f64()).clamp(0.0, 1.0)
        };
        let eased_t = transition.easing.apply(t);
        let sample = start.lerp(&transition.target, eased_t);

        if t >= 1.0 {
            self.start_colors
                .insert((layer, light), transition.target);
        }

        Ok(sample)
    }
}
