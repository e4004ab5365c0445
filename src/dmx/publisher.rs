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

use tracing::warn;

use crate::color::ColorSample;
use crate::config::{BrightnessLevel, BrightnessTable};
use crate::dmx::fixture::{FixtureChannelTable, FixtureInfo, FixtureKind};
use crate::model::LightId;

pub const UNIVERSE_SIZE: usize = 512;

/// Converts every light's committed color into one 512-byte DMX buffer per
/// universe, per the fixture channel table's addressing. A light whose
/// fixture is unknown to the table is logged and skipped rather than
/// failing the whole publish — matching the error-handling policy that
/// fixture resolution failures are absorbed at the point of origin.
///
/// Lights are visited in id order (`frame` is drained into a sorted `Vec`
/// first) so that two fixtures sharing a physical DMX address — a
/// misconfiguration, but not one worth failing the whole publish over —
/// overwrite each other deterministically rather than racing on hash order.
pub struct DmxPublisher<'a> {
    table: &'a FixtureChannelTable,
    brightness: BrightnessTable,
    level: BrightnessLevel,
}

impl<'a> DmxPublisher<'a> {
    pub fn new(table: &'a FixtureChannelTable) -> DmxPublisher<'a> {
        DmxPublisher {
            table,
            brightness: BrightnessTable::default(),
            level: BrightnessLevel::Max,
        }
    }

    pub fn with_brightness(table: &'a FixtureChannelTable, brightness: BrightnessTable) -> DmxPublisher<'a> {
        DmxPublisher {
            table,
            brightness,
            level: BrightnessLevel::Max,
        }
    }

    /// Sets the brightness preset applied to every color channel byte ahead
    /// of the 0..=255 clamp, per spec.md §6's `brightness` config mapping.
    /// Pan/tilt are positional, not intensity, channels and are never scaled.
    pub fn set_level(&mut self, level: BrightnessLevel) {
        self.level = level;
    }

    pub fn publish(&self, frame: &HashMap<LightId, ColorSample>) -> HashMap<u16, [u8; UNIVERSE_SIZE]> {
        let mut universes: HashMap<u16, [u8; UNIVERSE_SIZE]> = HashMap::new();
        for universe in self.table.universes() {
            universes.insert(universe, [0u8; UNIVERSE_SIZE]);
        }

        let mut lights: Vec<(&LightId, &ColorSample)> = frame.iter().collect();
        lights.sort_unstable_by_key(|(light, _)| **light);

        for (&light, color) in lights {
            let fixture = match self.table.get(light) {
                Ok(fixture) => fixture,
                Err(err) => {
                    warn!(light, error = %err, "skipping light with no fixture mapping");
                    continue;
                }
            };

            let buffer = universes
                .entry(fixture.universe)
                .or_insert([0u8; UNIVERSE_SIZE]);
            write_fixture(buffer, fixture, color, &self.brightness, self.level);
        }

        universes
    }
}

fn write_channel(buffer: &mut [u8; UNIVERSE_SIZE], fixture: &FixtureInfo, channel: &str, value: u8) {
    match fixture.dmx_channel(channel) {
        Ok(dmx_channel) => {
            let index = dmx_channel as usize;
            if index >= 1 && index <= UNIVERSE_SIZE {
                buffer[index - 1] = value;
            }
        }
        Err(err) => warn!(fixture = %fixture.name, error = %err, "dropping unmapped channel"),
    }
}

/// Like `write_channel`, but scales the value by the active brightness
/// preset first. Used for every intensity-bearing channel; pan/tilt always
/// go through the unscaled `write_channel` instead.
fn write_scaled_channel(
    buffer: &mut [u8; UNIVERSE_SIZE],
    fixture: &FixtureInfo,
    channel: &str,
    value: u8,
    brightness: &BrightnessTable,
    level: BrightnessLevel,
) {
    write_channel(buffer, fixture, channel, brightness.scale(level, value));
}

fn write_fixture(
    buffer: &mut [u8; UNIVERSE_SIZE],
    fixture: &FixtureInfo,
    color: &ColorSample,
    brightness: &BrightnessTable,
    level: BrightnessLevel,
) {
    match fixture.kind {
        FixtureKind::Rgb => {
            write_scaled_channel(buffer, fixture, "r", color.r, brightness, level);
            write_scaled_channel(buffer, fixture, "g", color.g, brightness, level);
            write_scaled_channel(buffer, fixture, "b", color.b, brightness, level);
        }
        FixtureKind::Rgbw => {
            write_scaled_channel(buffer, fixture, "r", color.r, brightness, level);
            write_scaled_channel(buffer, fixture, "g", color.g, brightness, level);
            write_scaled_channel(buffer, fixture, "b", color.b, brightness, level);
            write_scaled_channel(buffer, fixture, "w", color.i, brightness, level);
        }
        FixtureKind::RgbStrobe => {
            write_scaled_channel(buffer, fixture, "r", color.r, brightness, level);
            write_scaled_channel(buffer, fixture, "g", color.g, brightness, level);
            write_scaled_channel(buffer, fixture, "b", color.b, brightness, level);
            write_channel(buffer, fixture, "strobe", color.i);
        }
        FixtureKind::DimmerOnly => {
            write_scaled_channel(buffer, fixture, "dimmer", color.i, brightness, level);
        }
        FixtureKind::MovingHead => {
            write_scaled_channel(buffer, fixture, "r", color.r, brightness, level);
            write_scaled_channel(buffer, fixture, "g", color.g, brightness, level);
            write_scaled_channel(buffer, fixture, "b", color.b, brightness, level);
            write_channel(buffer, fixture, "pan", color.pan.unwrap_or(128));
            write_channel(buffer, fixture, "tilt", color.tilt.unwrap_or(128));
        }
    }
}
