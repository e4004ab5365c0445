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

use super::Cue;

/// One named, priority-ordered layer of cue implementations (spec.md §4.10:
/// "one group active by default, other groups layered on top with per-cue
/// fallback"). A group that doesn't recognize a `cueKind` simply falls
/// through to the next lower-priority group.
pub struct CueGroup {
    name: String,
    priority: i32,
    cues: HashMap<String, Box<dyn Cue>>,
}

impl CueGroup {
    pub fn new(name: impl Into<String>, priority: i32) -> CueGroup {
        CueGroup {
            name: name.into(),
            priority,
            cues: HashMap::new(),
        }
    }

    pub fn register(mut self, cue_kind: impl Into<String>, cue: Box<dyn Cue>) -> CueGroup {
        self.cues.insert(cue_kind.into(), cue);
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    fn get(&self, cue_kind: &str) -> Option<&dyn Cue> {
        self.cues.get(cue_kind).map(|cue| cue.as_ref())
    }
}

/// The value-held cue-group registry (spec.md §9's redesign flag against a
/// process-wide singleton table): built once at boot from a list of
/// `CueGroup`s, sorted highest-priority first, and owned by `CueDispatcher`
/// rather than reached through module-global state.
pub struct CueRegistry {
    groups: Vec<CueGroup>,
}

impl CueRegistry {
    pub fn new(mut groups: Vec<CueGroup>) -> CueRegistry {
        groups.sort_by(|a, b| b.priority.cmp(&a.priority));
        CueRegistry { groups }
    }

    /// Finds the highest-priority group that recognizes `cue_kind`, falling
    /// through lower-priority groups in registration order. `None` if no
    /// group declares a handler for it, which the dispatcher treats as an
    /// unrecognized cue kind.
    pub fn resolve(&self, cue_kind: &str) -> Option<&dyn Cue> {
        self.groups.iter().find_map(|group| group.get(cue_kind))
    }

    pub fn groups(&self) -> &[CueGroup] {
        &self.groups
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cue::{CueEffect, CueParams};
    use crate::engine::SubmissionKind;
    use crate::error::CueError;
    use crate::model::Effect;

    struct StubCue {
        name: &'static str,
    }

    impl Cue for StubCue {
        fn build_effect(&self, _params: &CueParams) -> Result<CueEffect, CueError> {
            Ok(CueEffect {
                effect: Effect {
                    name: self.name.to_string(),
                    priority: 0,
                    steps: vec![],
                    cyclic: false,
                },
                kind: SubmissionKind::Add,
                cycle: None,
            })
        }
    }

    #[test]
    fn higher_priority_group_wins_when_both_declare_the_kind() {
        let low = CueGroup::new("base", 0).register("strobe", Box::new(StubCue { name: "low" }));
        let high = CueGroup::new("overlay", 10).register("strobe", Box::new(StubCue { name: "high" }));
        let registry = CueRegistry::new(vec![low, high]);

        let params = CueParams {
            cue_kind: "strobe".to_string(),
            payload: serde_json::Value::Null,
            lights: vec![1],
            timestamp: std::time::Duration::ZERO,
        };
        let cue = registry.resolve("strobe").unwrap();
        assert_eq!(cue.build_effect(&params).unwrap().effect.name, "high");
    }

    #[test]
    fn unrecognized_kind_falls_through_every_group() {
        let base = CueGroup::new("base", 0).register("strobe", Box::new(StubCue { name: "low" }));
        let registry = CueRegistry::new(vec![base]);

        assert!(registry.resolve("unknown-kind").is_none());
    }

    #[test]
    fn a_group_missing_the_kind_falls_through_to_the_next() {
        let high = CueGroup::new("overlay", 10).register("flash", Box::new(StubCue { name: "flash-cue" }));
        let low = CueGroup::new("base", 0).register("strobe", Box::new(StubCue { name: "strobe-cue" }));
        let registry = CueRegistry::new(vec![low, high]);

        assert!(registry.resolve("strobe").is_some());
    }
}
