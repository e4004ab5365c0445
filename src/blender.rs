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

use crate::color::{BlendMode, ColorSample};

/// Folds a stack of per-layer color samples (lowest layer first) into a
/// single resulting color for one light, applying each sample's own blend
/// mode against the accumulator built from the layers beneath it.
///
/// Pan/tilt are never blended channel-by-channel: a moving-head fixture has
/// exactly one physical position, so the topmost layer that supplies a
/// pan/tilt value wins outright regardless of that layer's blend mode,
/// matching the "replace-only" rule for those two channels.
pub struct Blender;

impl Blender {
    /// `layers` must already be sorted lowest-layer-first; this function
    /// does no reordering of its own.
    pub fn blend(layers: &[ColorSample]) -> ColorSample {
        let mut acc = ColorSample::blackout();
        for sample in layers {
            acc = Blender::blend_one(&acc, sample);
        }
        acc
    }

    fn blend_one(base: &ColorSample, incoming: &ColorSample) -> ColorSample {
        let weight = incoming.opacity.clamp(0.0, 1.0);

        // Each arm implements spec.md §4.5's formula literally rather than a
        // generic "compute full-strength result, then lerp by weight" shape:
        // `add`'s clamp happens *before* the opacity weighting is applied, so
        // a generic lerp over a pre-clamped full-strength sum gives a
        // different (wrong) answer once the raw sum would have saturated.
        let blend_channel = |b: u8, i: u8| -> u8 {
            let b = b as f64;
            let i = i as f64;
            let value = match incoming.blend_mode {
                BlendMode::Replace if weight >= 1.0 => i,
                BlendMode::Replace => b * (1.0 - weight) + i * weight,
                BlendMode::Add => b + i * weight,
                BlendMode::Multiply => b * (1.0 - weight + weight * i / 255.0),
                BlendMode::Overlay => {
                    let overlaid = overlay_channel(b as u8, i as u8);
                    b * (1.0 - weight) + overlaid * weight
                }
            };
            value.round().clamp(0.0, 255.0) as u8
        };

        ColorSample {
            r: blend_channel(base.r, incoming.r),
            g: blend_channel(base.g, incoming.g),
            b: blend_channel(base.b, incoming.b),
            i: blend_channel(base.i, incoming.i),
            opacity: 1.0,
            pan: incoming.pan.or(base.pan),
            tilt: incoming.tilt.or(base.tilt),
            blend_mode: BlendMode::Replace,
        }
    }
}

/// Standard photographic overlay: darkens when the base channel sits below
/// half intensity, lightens otherwise. Resolves the flagged ambiguity over
/// which overlay formula to use.
fn overlay_channel(base: u8, incoming: u8) -> f64 {
    let b = base as f64 / 255.0;
    let i = incoming as f64 / 255.0;
    let result = if b < 0.5 {
        2.0 * b * i
    } else {
        1.0 - 2.0 * (1.0 - b) * (1.0 - i)
    };
    result * 255.0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_stack_is_blackout() {
        assert_eq!(Blender::blend(&[]), ColorSample::blackout());
    }

    #[test]
    fn replace_with_full_opacity_fully_overwrites() {
        let base = ColorSample::new(10, 10, 10, 10);
        let top = ColorSample::new(200, 0, 0, 0).with_opacity(1.0);
        let result = Blender::blend(&[base, top]);
        assert_eq!(result.r, 200);
        assert_eq!(result.g, 0);
    }

    #[test]
    fn replace_with_partial_opacity_mixes() {
        let base = ColorSample::new(0, 0, 0, 0);
        let top = ColorSample::new(200, 0, 0, 0).with_opacity(0.5);
        let result = Blender::blend(&[base, top]);
        assert_eq!(result.r, 100);
    }

    #[test]
    fn add_sums_and_clamps() {
        let base = ColorSample::new(200, 0, 0, 0);
        let top = ColorSample::new(200, 0, 0, 0).with_blend_mode(BlendMode::Add);
        let result = Blender::blend(&[base, top]);
        assert_eq!(result.r, 255);
    }

    #[test]
    fn multiply_darkens_toward_zero() {
        let base = ColorSample::new(255, 255, 255, 255);
        let top = ColorSample::new(0, 0, 0, 0).with_blend_mode(BlendMode::Multiply);
        let result = Blender::blend(&[base, top]);
        assert_eq!(result.r, 0);
    }

    #[test]
    fn overlay_lightens_bright_base_and_darkens_dark_base() {
        let dark_base = ColorSample::new(10, 10, 10, 10);
        let dark_top = ColorSample::new(10, 10, 10, 10).with_blend_mode(BlendMode::Overlay);
        let dark_result = Blender::blend(&[dark_base, dark_top]);
        assert!(dark_result.r < 10);

        let bright_base = ColorSample::new(250, 250, 250, 250);
        let bright_top = ColorSample::new(250, 250, 250, 250).with_blend_mode(BlendMode::Overlay);
        let bright_result = Blender::blend(&[bright_base, bright_top]);
        assert!(bright_result.r > 250 - 1);
    }

    #[test]
    fn pan_tilt_is_replace_only_regardless_of_blend_mode() {
        let base = ColorSample::blackout().with_pan_tilt(10, 10);
        let top = ColorSample::new(0, 0, 0, 0)
            .with_blend_mode(BlendMode::Add)
            .with_pan_tilt(200, 50);
        let result = Blender::blend(&[base, top]);
        assert_eq!(result.pan, Some(200));
        assert_eq!(result.tilt, Some(50));
    }

    #[test]
    fn lower_layer_pan_tilt_survives_when_top_has_none() {
        let base = ColorSample::blackout().with_pan_tilt(10, 20);
        let top = ColorSample::new(0, 0, 0, 0);
        let result = Blender::blend(&[base, top]);
        assert_eq!(result.pan, Some(10));
        assert_eq!(result.tilt, Some(20));
    }
}
