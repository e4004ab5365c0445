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

use thiserror::Error;

/// Errors raised when a cue submission is rejected outright.
#[derive(Debug, Error)]
pub enum SubmissionError {
    #[error("layer {layer} is in blackout and rejecting new submissions")]
    LayerBlackedOut { layer: u32 },

    #[error("no active or queued effect named '{name}' to unblock on layer {layer}")]
    NothingToUnblock { layer: u32, name: String },

    #[error("effect '{name}' targets no known lights")]
    EmptyTargetSet { name: String },

    #[error("an effect named '{name}' is already active or queued on layer {layer}")]
    NameAlreadyActive { layer: u32, name: String },
}

/// Errors raised resolving a light or fixture.
#[derive(Debug, Error)]
pub enum FixtureError {
    #[error("unknown light '{0}'")]
    UnknownLight(String),

    #[error("unknown fixture kind '{0}'")]
    UnknownFixtureKind(String),

    #[error("channel '{channel}' is not defined for fixture '{fixture}'")]
    UnknownChannel { fixture: String, channel: String },
}

/// Errors raised delivering a universe to a concrete sink. A single failure
/// is always isolated from its siblings by `SinkFanout`; whether it is
/// transient (the sink stays registered and is retried next frame) or a hard
/// failure (the sink is removed from the fanout) is decided by `is_fatal`.
#[derive(Debug, Error)]
pub enum SinkError {
    #[error("sink '{sink}' failed to send: {source}")]
    Send {
        sink: String,
        #[source]
        source: std::io::Error,
    },

    #[error("sink '{sink}' is not connected")]
    NotConnected { sink: String },
}

impl SinkError {
    /// True for failures that mean the sink can never recover on its own —
    /// a lost connection requires the operator to re-register it, so
    /// `SinkFanout` removes it rather than retrying every frame. A single
    /// send failure is treated as transient and left in the fanout.
    pub fn is_fatal(&self) -> bool {
        matches!(self, SinkError::NotConnected { .. })
    }
}

/// Errors raised sampling a transition at a given instant. Absorbed by the
/// interpolator, which falls back to a default color rather than propagate.
#[derive(Debug, Error)]
pub enum InterpolationError {
    #[error("no start state recorded for light '{light}' on layer {layer}")]
    MissingStartState { light: u32, layer: u32 },
}

/// The only error kind that is fatal to the sequencer's executor.
#[derive(Debug, Error)]
pub enum ShutdownError {
    #[error("shutdown did not complete within the allotted timeout")]
    Timeout,
}

/// Top-level error type for the sequencer. Only `Shutdown` is ever surfaced to
/// `main` as process-exit-worthy; every other variant is logged and absorbed
/// at the component boundary that can locally recover, per the propagation
/// policy above.
#[derive(Debug, Error)]
pub enum SequencerError {
    #[error(transparent)]
    Submission(#[from] SubmissionError),

    #[error(transparent)]
    Fixture(#[from] FixtureError),

    #[error(transparent)]
    Sink(#[from] SinkError),

    #[error(transparent)]
    Interpolation(#[from] InterpolationError),

    #[error(transparent)]
    Cue(#[from] CueError),

    #[error(transparent)]
    Shutdown(#[from] ShutdownError),
}

/// Errors raised loading or validating a `Cue`.
#[derive(Debug, Error)]
pub enum CueError {
    #[error("cue kind '{0}' is not registered")]
    UnknownCue(String),

    #[error("invalid cue parameters: {0}")]
    InvalidParams(String),
}

/// Errors raised loading configuration from disk.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("unable to read config file '{path}': {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("unable to parse config file '{path}': {source}")]
    Parse {
        path: String,
        #[source]
        source: serde_yml::Error,
    },
}
