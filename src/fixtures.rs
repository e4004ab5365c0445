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

//! Loads the fixture-channel table from the YAML document named by
//! `Config::fixtures_path`, matching `config.rs`'s own
//! `serde_yml::from_str` loading shape (spec.md §6: "the surrounding
//! collaborator stores JSON for fixture tables and preferences; the core
//! consumes them as in-memory structures" — a plain list-of-records YAML
//! file plays that role for this binary).

use std::collections::HashMap;
use std::fs;
use std::path::Path;

use serde::Deserialize;

use crate::dmx::{FixtureChannelTable, FixtureInfo, FixtureKind};
use crate::error::{ConfigError, FixtureError};
use crate::model::LightId;

#[derive(Debug, Deserialize)]
struct FixtureRecord {
    light: LightId,
    name: String,
    universe: u16,
    address: u16,
    kind: FixtureKind,
    #[serde(default)]
    channels: HashMap<String, u16>,
}

/// Loads and validates every fixture record in `path`, assembling them into
/// a `FixtureChannelTable`. A record missing one of its kind's required
/// channels is logged and dropped rather than failing the whole table, per
/// spec.md §7's "unknown fixture kind" policy: other fixtures still load.
pub fn load_fixture_table(path: impl AsRef<Path>) -> Result<FixtureChannelTable, ConfigError> {
    let path = path.as_ref();
    let contents = fs::read_to_string(path).map_err(|source| ConfigError::Read {
        path: path.display().to_string(),
        source,
    })?;
    let records: Vec<FixtureRecord> = serde_yml::from_str(&contents).map_err(|source| ConfigError::Parse {
        path: path.display().to_string(),
        source,
    })?;

    let mut table = FixtureChannelTable::new();
    for record in records {
        let info = FixtureInfo {
            name: record.name,
            universe: record.universe,
            address: record.address,
            kind: record.kind,
            channels: record.channels,
        };
        insert_or_warn(&mut table, record.light, info);
    }
    Ok(table)
}

fn insert_or_warn(table: &mut FixtureChannelTable, light: LightId, info: FixtureInfo) {
    if let Err(err) = table.insert(light, info) {
        log_invalid_fixture(light, &err);
    }
}

fn log_invalid_fixture(light: LightId, err: &FixtureError) {
    tracing::warn!(light, error = %err, "dropping invalid fixture record");
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_temp_yaml(contents: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(contents.as_bytes()).unwrap();
        file
    }

    #[test]
    fn loads_a_valid_rgb_fixture() {
        let file = write_temp_yaml(
            r#"
- light: 1
  name: par-1
  universe: 0
  address: 1
  kind: rgb
  channels:
    r: 0
    g: 1
    b: 2
"#,
        );
        let table = load_fixture_table(file.path()).unwrap();
        assert!(table.get(1).is_ok());
    }

    #[test]
    fn an_invalid_fixture_record_is_dropped_not_fatal() {
        let file = write_temp_yaml(
            r#"
- light: 1
  name: broken
  universe: 0
  address: 1
  kind: rgb
  channels:
    r: 0
- light: 2
  name: par-2
  universe: 0
  address: 10
  kind: dimmer-only
  channels:
    dimmer: 0
"#,
        );
        let table = load_fixture_table(file.path()).unwrap();
        assert!(table.get(1).is_err());
        assert!(table.get(2).is_ok());
    }

    #[test]
    fn missing_file_is_a_typed_read_error() {
        let err = load_fixture_table("/nonexistent/strobecue-fixtures.yaml").unwrap_err();
        assert!(matches!(err, ConfigError::Read { .. }));
    }
}
