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

use std::fs;
use std::path::Path;

use serde::Deserialize;

use crate::error::ConfigError;

/// The knobs §6 of the spec names as runtime-recognized configuration,
/// loaded from a single YAML file the way the teacher's `config.rs` loads
/// its player config. Every field has the spec's documented default so a
/// mostly-empty YAML document is a valid config.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Config {
    #[serde(default = "defaults::tick_hz")]
    pub tick_hz: u32,

    #[serde(default = "defaults::layer_grace_ms")]
    pub layer_grace_ms: u64,

    #[serde(default = "defaults::consistency_window_ms")]
    pub consistency_window_ms: u64,

    #[serde(default = "defaults::inactivity_ms")]
    pub inactivity_ms: u64,

    #[serde(default = "defaults::drift_threshold_ms")]
    pub drift_threshold_ms: u64,

    #[serde(default = "defaults::drift_check_interval_ms")]
    pub drift_check_interval_ms: u64,

    #[serde(default = "defaults::protected_layer_min")]
    pub protected_layer_min: u32,

    #[serde(default)]
    pub brightness: BrightnessTable,

    #[serde(default)]
    pub sinks: Vec<SinkConfig>,

    /// Path to a fixture-channel table YAML document; resolved and loaded
    /// separately by the binary, not inlined into this struct, matching the
    /// teacher's split between `player.yaml` and the song repository it
    /// points at.
    #[serde(default)]
    pub fixtures_path: Option<String>,
}

mod defaults {
    pub fn tick_hz() -> u32 {
        60
    }
    pub fn layer_grace_ms() -> u64 {
        5000
    }
    pub fn consistency_window_ms() -> u64 {
        2000
    }
    pub fn inactivity_ms() -> u64 {
        15000
    }
    pub fn drift_threshold_ms() -> u64 {
        5
    }
    pub fn drift_check_interval_ms() -> u64 {
        1000
    }
    pub fn protected_layer_min() -> u32 {
        500
    }
}

impl Default for Config {
    fn default() -> Config {
        Config {
            tick_hz: defaults::tick_hz(),
            layer_grace_ms: defaults::layer_grace_ms(),
            consistency_window_ms: defaults::consistency_window_ms(),
            inactivity_ms: defaults::inactivity_ms(),
            drift_threshold_ms: defaults::drift_threshold_ms(),
            drift_check_interval_ms: defaults::drift_check_interval_ms(),
            protected_layer_min: defaults::protected_layer_min(),
            brightness: BrightnessTable::default(),
            sinks: Vec::new(),
            fixtures_path: None,
        }
    }
}

impl Config {
    /// Loads and parses a YAML config file, matching
    /// `config::init_player_and_controller`'s `serde_yml::from_str` shape.
    pub fn load(path: impl AsRef<Path>) -> Result<Config, ConfigError> {
        let path = path.as_ref();
        let contents = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.display().to_string(),
            source,
        })?;
        serde_yml::from_str(&contents).map_err(|source| ConfigError::Parse {
            path: path.display().to_string(),
            source,
        })
    }

    /// `consistency_window_ms` clamped to the spec's documented 0–10000
    /// range, applied defensively in case a YAML document supplies a value
    /// outside it.
    pub fn consistency_window_ms(&self) -> u64 {
        self.consistency_window_ms.min(10_000)
    }
}

/// A named brightness preset mapped to the linear scale factor applied to
/// every DMX byte before it is written to the universe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Hash)]
#[serde(rename_all = "lowercase")]
pub enum BrightnessLevel {
    Low,
    Medium,
    High,
    Max,
}

/// The `brightness` config block: `{low, medium, high, max} -> factor`. The
/// factor multiplies every outgoing DMX byte ahead of `DmxPublisher`'s clamp
/// to `0..=255`.
#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
pub struct BrightnessTable {
    #[serde(default = "defaults_brightness::low")]
    pub low: f64,
    #[serde(default = "defaults_brightness::medium")]
    pub medium: f64,
    #[serde(default = "defaults_brightness::high")]
    pub high: f64,
    #[serde(default = "defaults_brightness::max")]
    pub max: f64,
}

mod defaults_brightness {
    pub fn low() -> f64 {
        0.25
    }
    pub fn medium() -> f64 {
        0.5
    }
    pub fn high() -> f64 {
        0.75
    }
    pub fn max() -> f64 {
        1.0
    }
}

impl Default for BrightnessTable {
    fn default() -> BrightnessTable {
        BrightnessTable {
            low: defaults_brightness::low(),
            medium: defaults_brightness::medium(),
            high: defaults_brightness::high(),
            max: defaults_brightness::max(),
        }
    }
}

impl BrightnessTable {
    pub fn factor(&self, level: BrightnessLevel) -> f64 {
        match level {
            BrightnessLevel::Low => self.low,
            BrightnessLevel::Medium => self.medium,
            BrightnessLevel::High => self.high,
            BrightnessLevel::Max => self.max,
        }
    }

    /// Scales a single DMX byte by `level`'s factor, clamping back to
    /// `0..=255`. Applied by `DmxPublisher` immediately before a byte is
    /// written into the universe buffer.
    pub fn scale(&self, level: BrightnessLevel, value: u8) -> u8 {
        ((value as f64) * self.factor(level)).round().clamp(0.0, 255.0) as u8
    }
}

/// One configured sink; the binary resolves this into a concrete `Sink`
/// trait object at boot (`main.rs`), matching the teacher's own
/// config-to-device resolution split (`audio::get_device`, `dmx::get_device`).
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "kind", rename_all = "kebab-case")]
pub enum SinkConfig {
    Sacn { name: String, target: String },
    Artnet { name: String, target: String },
    Enttec { name: String },
    Preview { name: String },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_spec_documented_values() {
        let config = Config::default();
        assert_eq!(config.tick_hz, 60);
        assert_eq!(config.layer_grace_ms, 5000);
        assert_eq!(config.consistency_window_ms, 2000);
        assert_eq!(config.inactivity_ms, 15000);
        assert_eq!(config.drift_threshold_ms, 5);
        assert_eq!(config.drift_check_interval_ms, 1000);
        assert_eq!(config.protected_layer_min, 500);
    }

    #[test]
    fn consistency_window_is_clamped_to_ten_seconds() {
        let mut config = Config::default();
        config.consistency_window_ms = 999_999;
        assert_eq!(config.consistency_window_ms(), 10_000);
    }

    #[test]
    fn partial_yaml_document_fills_in_defaults() {
        let config: Config = serde_yml::from_str("tickHz: 30\n").unwrap();
        assert_eq!(config.tick_hz, 30);
        assert_eq!(config.layer_grace_ms, 5000);
    }

    #[test]
    fn loads_sinks_and_brightness_from_yaml() {
        let yaml = r#"
brightness:
  low: 0.1
  medium: 0.4
  high: 0.7
  max: 1.0
sinks:
  - kind: sacn
    name: house
    target: "239.255.0.1:5568"
  - kind: preview
    name: monitor
"#;
        let config: Config = serde_yml::from_str(yaml).unwrap();
        assert_eq!(config.brightness.low, 0.1);
        assert_eq!(config.sinks.len(), 2);
        assert!(matches!(config.sinks[0], SinkConfig::Sacn { .. }));
        assert!(matches!(config.sinks[1], SinkConfig::Preview { .. }));
    }

    #[test]
    fn missing_file_is_a_typed_read_error() {
        let err = Config::load("/nonexistent/strobecue-config.yaml").unwrap_err();
        assert!(matches!(err, ConfigError::Read { .. }));
    }
}
