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

pub mod builtin;
pub mod dispatcher;
pub mod registry;

use std::time::Duration;

use crate::engine::{CycleSpec, SubmissionKind};
use crate::error::CueError;
use crate::model::{Effect, LightId};

pub use dispatcher::{CueDispatcher, CueRequest};
pub use registry::{CueGroup, CueRegistry};

/// The already-decoded request a `Cue` is asked to turn into an effect.
/// Carries the resolved light targets and the request's own timestamp, not
/// raw wire bytes — parsing the rhythm game's own protocol into `payload` is
/// a collaborator's concern, not this crate's (spec.md §1).
#[derive(Debug, Clone)]
pub struct CueParams {
    pub cue_kind: String,
    pub payload: serde_json::Value,
    pub lights: Vec<LightId>,
    pub timestamp: Duration,
}

/// An `Effect` bundled with the submission discipline and optional cycle
/// alignment the cue wants it installed with. The discipline is declared by
/// the cue itself (spec.md §4.10: "submits it... using one of the four
/// submission disciplines declared by the cue"), not inferred by the
/// dispatcher.
#[derive(Debug, Clone)]
pub struct CueEffect {
    pub effect: Effect,
    pub kind: SubmissionKind,
    pub cycle: Option<CycleSpec>,
}

/// The closed capability trait every cue implementation satisfies, per
/// spec.md §9's redesign flag against dynamic `ICue` dispatch: "a single
/// capability trait with exactly the methods `build_effect(params) ->
/// Effect`, `on_stop()`, `on_pause()`, `on_destroy()`; no inheritance."
/// Lifecycle hooks default to no-ops since most cues (including both
/// built-ins) have no teardown state to release.
pub trait Cue: Send + Sync {
    fn build_effect(&self, params: &CueParams) -> Result<CueEffect, CueError>;
    fn on_stop(&self) {}
    fn on_pause(&self) {}
    fn on_destroy(&self) {}
}
