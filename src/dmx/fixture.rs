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

use serde::Deserialize;

use crate::error::FixtureError;
use crate::model::LightId;

/// The closed set of fixture shapes this publisher knows how to address.
/// Each kind fixes which named channels it expects to find in its
/// `FixtureInfo::channels` map, the way the teacher's `FixtureCapabilities`
/// bitflags derive a strategy from which channels a fixture profile
/// defines.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum FixtureKind {
    Rgb,
    Rgbw,
    RgbStrobe,
    DimmerOnly,
    MovingHead,
}

impl FixtureKind {
    /// The channel names this kind requires to be present in a fixture's
    /// channel map.
    pub fn required_channels(&self) -> &'static [&'static str] {
        match self {
            FixtureKind::Rgb => &["r", "g", "b"],
            FixtureKind::Rgbw => &["r", "g", "b", "w"],
            FixtureKind::RgbStrobe => &["r", "g", "b", "strobe"],
            FixtureKind::DimmerOnly => &["dimmer"],
            FixtureKind::MovingHead => &["r", "g", "b", "pan", "tilt"],
        }
    }
}

/// A single addressable fixture: which universe it lives on, its DMX start
/// address, and the channel-name-to-offset map that positions each of its
/// logical channels relative to that start address (offsets are 0-based;
/// absolute DMX channel is `address + offset`, matching the teacher's own
/// `fixture_info.address + channel_offset - 1` convention for a 1-based
/// address and 1-based channel numbering).
#[derive(Debug, Clone)]
pub struct FixtureInfo {
    pub name: String,
    pub universe: u16,
    pub address: u16,
    pub kind: FixtureKind,
    pub channels: HashMap<String, u16>,
}

impl FixtureInfo {
    pub fn validate(&self) -> Result<(), FixtureError> {
        for required in self.kind.required_channels() {
            if !self.channels.contains_key(*required) {
                return Err(FixtureError::UnknownChannel {
                    fixture: self.name.clone(),
                    channel: required.to_string(),
                });
            }
        }
        Ok(())
    }

    /// The absolute 1-based DMX channel number for a named logical channel.
    pub fn dmx_channel(&self, channel: &str) -> Result<u16, FixtureError> {
        self.channels
            .get(channel)
            .map(|offset| self.address + offset)
            .ok_or_else(|| FixtureError::UnknownChannel {
                fixture: self.name.clone(),
                channel: channel.to_string(),
            })
    }
}

/// A read-mostly map from light id to its addressing info, built once at
/// boot from configuration and handed to the publisher by reference.
#[derive(Debug, Clone, Default)]
pub struct FixtureChannelTable {
    fixtures: HashMap<LightId, FixtureInfo>,
}

impl FixtureChannelTable {
    pub fn new() -> FixtureChannelTable {
        FixtureChannelTable::default()
    }

    pub fn insert(&mut self, light: LightId, info: FixtureInfo) -> Result<(), FixtureError> {
        info.validate()?;
        self.fixtures.insert(light, info);
        Ok(())
    }

    pub fn get(&self, light: LightId) -> Result<&FixtureInfo, FixtureError> {
        self.fixtures
            .get(&light)
            .ok_or(FixtureError::UnknownLight(light.to_string()))
    }

    pub fn lights(&self) -> impl Iterator<Item = LightId> + '_ {
        self.fixtures.keys().copied()
    }

    pub fn universes(&self) -> impl Iterator<Item = u16> {
        let mut universes: Vec<u16> = self.fixtures.values().map(|f| f.universe).collect();
        universes.sort_unstable();
        universes.dedup();
        universes.into_iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rgb_fixture() -> FixtureInfo {
        let mut channels = HashMap::new();
        channels.insert("r".to_string(), 0);
        channels.insert("g".to_string(), 1);
        channels.insert("b".to_string(), 2);
        FixtureInfo {
            name: "par-1".to_string(),
            universe: 0,
            address: 1,
            kind: FixtureKind::Rgb,
            channels,
        }
    }

    #[test]
    fn validate_rejects_missing_required_channel() {
        let mut fixture = rgb_fixture();
        fixture.channels.remove("b");
        assert!(matches!(
            fixture.validate(),
            Err(FixtureError::UnknownChannel { .. })
        ));
    }

    #[test]
    fn dmx_channel_is_address_plus_offset() {
        let fixture = rgb_fixture();
        assert_eq!(fixture.dmx_channel("r").unwrap(), 1);
        assert_eq!(fixture.dmx_channel("g").unwrap(), 2);
        assert_eq!(fixture.dmx_channel("b").unwrap(), 3);
    }

    #[test]
    fn table_reports_sorted_deduped_universes() {
        let mut table = FixtureChannelTable::new();
        let mut fixture_a = rgb_fixture();
        fixture_a.universe = 2;
        let mut fixture_b = rgb_fixture();
        fixture_b.name = "par-2".to_string();
        fixture_b.universe = 0;
        table.insert(1, fixture_a).unwrap();
        table.insert(2, fixture_b).unwrap();

        let universes: Vec<u16> = table.universes().collect();
        assert_eq!(universes, vec![0, 2]);
    }

    #[test]
    fn unknown_light_is_a_typed_error() {
        let table = FixtureChannelTable::new();
        assert!(matches!(
            table.get(99),
            Err(FixtureError::UnknownLight(_))
        ));
    }
}
