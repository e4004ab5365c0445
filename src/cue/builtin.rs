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

use std::time::Duration;

use crate::color::{ColorSample, Easing};
use crate::engine::SubmissionKind;
use crate::error::CueError;
use crate::model::{Effect, Step, Transition, WaitCondition};

use super::{Cue, CueEffect, CueParams};

/// A step's `wait_until` for a cue that never advances on its own; the only
/// way such a record terminates is a later submission replacing or
/// unblocking it, per the `set`/`add` disciplines these built-ins use.
fn hold_forever() -> WaitCondition {
    WaitCondition::Elapsed(Duration::from_secs(3600))
}

/// Routes unrecognized cue kinds to an immediate blackout. Per spec.md §6's
/// "Cue submission interface": "the dispatcher refuses unknown kinds by
/// routing them to the 'no-cue' handler (a blackout)."
pub struct NoCueHandler;

impl Cue for NoCueHandler {
    fn build_effect(&self, params: &CueParams) -> Result<CueEffect, CueError> {
        Ok(CueEffect {
            effect: Effect {
                name: "no-cue".to_string(),
                priority: 0,
                steps: vec![Step {
                    layer: 0,
                    lights: params.lights.clone(),
                    wait_for: WaitCondition::None,
                    transition: Transition::instant(ColorSample::blackout()),
                    wait_until: hold_forever(),
                }],
                cyclic: false,
            },
            kind: SubmissionKind::Set,
            cycle: None,
        })
    }
}

/// The inactivity-timeout fallback (spec.md §4.10, §6 `inactivityMs`): "a
/// 'blackout-slow' effect is submitted to reset the stage." Fades every
/// targeted light to black over `fade` rather than cutting instantly, so an
/// idle stage settles instead of snapping dark.
pub struct BlackoutSlowCue {
    pub fade: Duration,
}

impl Default for BlackoutSlowCue {
    fn default() -> BlackoutSlowCue {
        BlackoutSlowCue {
            fade: Duration::from_millis(1000),
        }
    }
}

impl Cue for BlackoutSlowCue {
    fn build_effect(&self, params: &CueParams) -> Result<CueEffect, CueError> {
        Ok(CueEffect {
            effect: Effect {
                name: "blackout-slow".to_string(),
                priority: 0,
                steps: vec![Step {
                    layer: 0,
                    lights: params.lights.clone(),
                    wait_for: WaitCondition::None,
                    transition: Transition {
                        target: ColorSample::blackout(),
                        duration: self.fade,
                        easing: Easing::EaseOut,
                    },
                    wait_until: hold_forever(),
                }],
                cyclic: false,
            },
            kind: SubmissionKind::Set,
            cycle: None,
        })
    }
}

/// Routes a "system blackout" cue kind to an instant blackout submitted on a
/// protected/system layer (spec.md §3: layers at or above `protectedLayerMin`
/// are "treated as system/blackout"), rather than layer 0. Installing here —
/// instead of layer 0 like `NoCueHandler`/`BlackoutSlowCue` — is what actually
/// raises `TransitionEngine`'s blackout interlock (spec.md testable property
/// 8, "blackout dominance"), since that flag is only set by a submission that
/// touches a layer in the protected range. Uses `SubmissionKind::Add` rather
/// than `Set`: the protected layer's own opaque color already wins every
/// lower layer through the blender's replace-opaque fast path, so there is no
/// need to also clear the layers beneath it.
pub struct SystemBlackoutCue {
    pub protected_layer: crate::model::LayerId,
}

impl Cue for SystemBlackoutCue {
    fn build_effect(&self, params: &CueParams) -> Result<CueEffect, CueError> {
        Ok(CueEffect {
            effect: Effect {
                name: "system-blackout".to_string(),
                priority: i32::MAX,
                steps: vec![Step {
                    layer: self.protected_layer,
                    lights: params.lights.clone(),
                    wait_for: WaitCondition::None,
                    transition: Transition::instant(ColorSample::blackout()),
                    wait_until: hold_forever(),
                }],
                cyclic: false,
            },
            kind: SubmissionKind::Add,
            cycle: None,
        })
    }
}
