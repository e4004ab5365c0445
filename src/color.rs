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

use serde::Deserialize;

/// A single sampled color, the unit every layer produces per light per tick.
///
/// `opacity` is the layer's contribution weight at blend time, not a DMX
/// channel of its own. `pan`/`tilt` are optional because not every fixture
/// kind has moving-head channels; a blend against a fixture with no pan/tilt
/// support simply drops them.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ColorSample {
    pub r: u8,
    pub g: u8,
    pub b: u8,
    pub i: u8,
    pub opacity: f64,
    pub pan: Option<u8>,
    pub tilt: Option<u8>,
    pub blend_mode: BlendMode,
}

impl ColorSample {
    /// Black, fully opaque, replace-mode. The default for a layer with no
    /// prior state.
    pub fn blackout() -> ColorSample {
        ColorSample {
            r: 0,
            g: 0,
            b: 0,
            i: 0,
            opacity: 1.0,
            pan: None,
            tilt: None,
            blend_mode: BlendMode::Replace,
        }
    }

    pub fn new(r: u8, g: u8, b: u8, i: u8) -> ColorSample {
        ColorSample {
            r,
            g,
            b,
            i,
            opacity: 1.0,
            ..ColorSample::blackout()
        }
    }

    pub fn with_opacity(mut self, opacity: f64) -> ColorSample {
        self.opacity = opacity.clamp(0.0, 1.0);
        self
    }

    pub fn with_blend_mode(mut self, blend_mode: BlendMode) -> ColorSample {
        self.blend_mode = blend_mode;
        self
    }

    pub fn with_pan_tilt(mut self, pan: u8, tilt: u8) -> ColorSample {
        self.pan = Some(pan);
        self.tilt = Some(tilt);
        self
    }

    /// Linearly interpolates every channel between `self` and `other` at
    /// `t` in `[0, 1]`. Pan/tilt interpolate the same way when both samples
    /// carry them; otherwise the target's value wins outright once t
    /// reaches 1, matching the "replace-only" semantics for moving-head
    /// channels documented on `Blender`.
    pub fn lerp(&self, other: &ColorSample, t: f64) -> ColorSample {
        let t = t.clamp(0.0, 1.0);
        let lerp_u8 = |a: u8, b: u8| -> u8 {
            (a as f64 + (b as f64 - a as f64) * t).round().clamp(0.0, 255.0) as u8
        };

        ColorSample {
            r: lerp_u8(self.r, other.r),
            g: lerp_u8(self.g, other.g),
            b: lerp_u8(self.b, other.b),
            i: lerp_u8(self.i, other.i),
            opacity: self.opacity + (other.opacity - self.opacity) * t,
            pan: match (self.pan, other.pan) {
                (Some(a), Some(b)) => Some(lerp_u8(a, b)),
                _ => self.pan.or(other.pan),
            },
            tilt: match (self.tilt, other.tilt) {
                (Some(a), Some(b)) => Some(lerp_u8(a, b)),
                _ => self.tilt.or(other.tilt),
            },
            blend_mode: other.blend_mode,
        }
    }
}

/// Per-channel compositing rule applied when a layer's sample is folded onto
/// the accumulated result of the layers beneath it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BlendMode {
    /// The incoming channel value fully replaces the accumulated one,
    /// weighted by opacity.
    Replace,
    /// Channels are summed and clamped to 255.
    Add,
    /// Channels are multiplied (normalized to `[0, 1]`) and rescaled to `u8`.
    Multiply,
    /// Standard photographic overlay: darkens when the base channel is below
    /// half intensity, lightens otherwise.
    Overlay,
}

impl Default for BlendMode {
    fn default() -> BlendMode {
        BlendMode::Replace
    }
}

/// Easing curve applied to the `[0, 1]` progress ratio of a transition before
/// it is used to interpolate between start and target color.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Easing {
    Linear,
    EaseIn,
    EaseOut,
    EaseInOut,
}

impl Default for Easing {
    fn default() -> Easing {
        Easing::Linear
    }
}

impl Easing {
    /// Applies the curve to a linear progress ratio already clamped to
    /// `[0, 1]` by the caller.
    pub fn apply(&self, t: f64) -> f64 {
        match self {
            Easing::Linear => t,
            Easing::EaseIn => t * t,
            Easing::EaseOut => t * (2.0 - t),
            Easing::EaseInOut => {
                if t < 0.5 {
                    2.0 * t * t
                } else {
                    -1.0 + (4.0 - 2.0 * t) * t
                }
            }
        }
    }
}
