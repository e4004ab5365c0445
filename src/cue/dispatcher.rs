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
use std::time::Duration;

use tracing::{debug, info};

use crate::config::Config;
use crate::engine::{Submission, TransitionEngine};
use crate::error::SequencerError;
use crate::interpolator::Interpolator;
use crate::model::LightId;
use crate::store::LayerStore;

use super::builtin::{BlackoutSlowCue, NoCueHandler};
use super::registry::CueRegistry;
use super::{Cue, CueParams};

/// An incoming cue request, matching spec.md §6's "Cue submission
/// interface": `{cueKind, params, timestamp}`. `lights` is the already-
/// resolved target set (wire parsing of the game's own cue protocol, and
/// resolving whatever light-selector syntax it uses, is a collaborator's
/// concern).
#[derive(Debug, Clone)]
pub struct CueRequest {
    pub cue_kind: String,
    pub payload: serde_json::Value,
    pub lights: Vec<LightId>,
    pub timestamp: Duration,
    /// Set for requests that must apply regardless of the consistency
    /// window. Per spec.md §4.10: "Strobe-state changes ride alongside and
    /// are always applied regardless of the window."
    pub bypass_debounce: bool,
}

/// Receives cue requests, resolves the responsible `Cue` implementation
/// through a `CueRegistry`, and submits the built effect to
/// `TransitionEngine`. Owns its own debounce and inactivity bookkeeping
/// rather than pushing that state onto the engine, mirroring the teacher's
/// `Controller` owning its own dispatch loop state independent of the
/// `Player` it drives.
pub struct CueDispatcher {
    registry: CueRegistry,
    no_cue: NoCueHandler,
    blackout_slow: BlackoutSlowCue,
    consistency_window: Duration,
    inactivity_timeout: Duration,
    /// Last payload and timestamp dispatched per cue kind, for the
    /// consistency-window dedup check.
    last_by_kind: HashMap<String, (serde_json::Value, Duration)>,
    last_dispatch_at: Option<Duration>,
    /// Set once the inactivity blackout has fired for the current idle
    /// stretch, so it is submitted once rather than every tick while still
    /// idle; cleared the next time any cue actually dispatches.
    inactivity_triggered: bool,
}

impl CueDispatcher {
    pub fn new(registry: CueRegistry, config: &Config) -> CueDispatcher {
        CueDispatcher {
            registry,
            no_cue: NoCueHandler,
            blackout_slow: BlackoutSlowCue::default(),
            consistency_window: Duration::from_millis(config.consistency_window_ms()),
            inactivity_timeout: Duration::from_millis(config.inactivity_ms),
            last_by_kind: HashMap::new(),
            last_dispatch_at: None,
            inactivity_triggered: false,
        }
    }

    /// Applies one cue request: looks up the responsible `Cue`, builds its
    /// effect, and submits it. Unrecognized kinds fall through to
    /// `NoCueHandler`, per spec.md §6. A duplicate request (same kind, same
    /// payload) arriving inside the consistency window is suppressed and
    /// reports success without resubmitting, unless `bypass_debounce` is set.
    pub fn dispatch(
        &mut self,
        engine: &mut TransitionEngine,
        store: &mut LayerStore,
        interpolator: &mut Interpolator,
        request: CueRequest,
        now_tick: u64,
    ) -> Result<(), SequencerError> {
        if !request.bypass_debounce && self.suppressed_by_consistency_window(&request) {
            debug!(
                cue_kind = %request.cue_kind,
                "suppressing duplicate cue submission within consistency window"
            );
            return Ok(());
        }

        let params = CueParams {
            cue_kind: request.cue_kind.clone(),
            payload: request.payload.clone(),
            lights: request.lights.clone(),
            timestamp: request.timestamp,
        };

        let cue: &dyn Cue = self
            .registry
            .resolve(&request.cue_kind)
            .unwrap_or(&self.no_cue as &dyn Cue);
        let built = cue.build_effect(&params)?;

        engine.submit(
            store,
            interpolator,
            Submission {
                kind: built.kind,
                effect: built.effect,
                cycle: built.cycle,
            },
            request.timestamp,
            now_tick,
        )?;

        self.last_by_kind
            .insert(request.cue_kind, (request.payload, request.timestamp));
        self.last_dispatch_at = Some(request.timestamp);
        self.inactivity_triggered = false;
        Ok(())
    }

    fn suppressed_by_consistency_window(&self, request: &CueRequest) -> bool {
        match self.last_by_kind.get(&request.cue_kind) {
            Some((last_payload, last_at)) => {
                let elapsed = request.timestamp.saturating_sub(*last_at);
                elapsed < self.consistency_window && *last_payload == request.payload
            }
            None => false,
        }
    }

    /// Checked once per tick by the engine's tick handler (spec.md §4.10
    /// "Inactivity"): once `inactivity_timeout` has passed since the last
    /// dispatched cue, submits `blackout-slow` targeting every light in
    /// `lights` to reset the stage.
    pub fn check_inactivity(
        &mut self,
        engine: &mut TransitionEngine,
        store: &mut LayerStore,
        interpolator: &mut Interpolator,
        lights: &[LightId],
        now: Duration,
        now_tick: u64,
    ) -> Result<(), SequencerError> {
        if self.inactivity_triggered || lights.is_empty() {
            return Ok(());
        }
        let idle_for = match self.last_dispatch_at {
            Some(last) => now.saturating_sub(last),
            None => now,
        };
        if idle_for < self.inactivity_timeout {
            return Ok(());
        }

        info!(
            idle_ms = idle_for.as_millis() as u64,
            "inactivity timeout reached; submitting blackout-slow"
        );
        let params = CueParams {
            cue_kind: "blackout-slow".to_string(),
            payload: serde_json::Value::Null,
            lights: lights.to_vec(),
            timestamp: now,
        };
        let built = self.blackout_slow.build_effect(&params)?;
        engine.submit(
            store,
            interpolator,
            Submission {
                kind: built.kind,
                effect: built.effect,
                cycle: built.cycle,
            },
            now,
            now_tick,
        )?;
        self.inactivity_triggered = true;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cue::registry::CueGroup;
    use crate::cue::CueEffect;
    use crate::engine::{EngineConfig, SubmissionKind};
    use crate::error::CueError;
    use crate::model::{Effect, Step, Transition, WaitCondition};

    struct CountingCue {
        calls: std::sync::Arc<std::sync::atomic::AtomicUsize>,
    }

    impl Cue for CountingCue {
        fn build_effect(&self, params: &CueParams) -> Result<CueEffect, CueError> {
            self.calls.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
            Ok(CueEffect {
                effect: Effect {
                    name: "counted".to_string(),
                    priority: 0,
                    steps: vec![Step {
                        layer: 1,
                        lights: params.lights.clone(),
                        wait_for: WaitCondition::None,
                        transition: Transition::instant(crate::color::ColorSample::new(1, 2, 3, 0)),
                        wait_until: WaitCondition::Elapsed(Duration::from_secs(3600)),
                    }],
                    cyclic: false,
                },
                kind: SubmissionKind::Add,
                cycle: None,
            })
        }
    }

    fn config() -> Config {
        Config {
            consistency_window_ms: 2000,
            inactivity_ms: 15000,
            ..Config::default()
        }
    }

    fn engine() -> TransitionEngine {
        TransitionEngine::new(EngineConfig {
            protected_layer_min: 500,
            layer_grace_ticks: 300,
            drift_threshold_ticks: 1,
            drift_check_interval_ticks: 60,
            period: Duration::from_millis(16),
        })
    }

    fn request(payload: serde_json::Value, timestamp: Duration) -> CueRequest {
        CueRequest {
            cue_kind: "test".to_string(),
            payload,
            lights: vec![1],
            timestamp,
            bypass_debounce: false,
        }
    }

    #[test]
    fn duplicate_request_inside_window_is_suppressed() {
        let calls = std::sync::Arc::new(std::sync::atomic::AtomicUsize::new(0));
        let group = CueGroup::new("base", 0).register(
            "test",
            Box::new(CountingCue { calls: calls.clone() }),
        );
        let mut dispatcher = CueDispatcher::new(CueRegistry::new(vec![group]), &config());
        let mut engine = engine();
        let mut store = LayerStore::new();
        let mut interpolator = Interpolator::new();

        dispatcher
            .dispatch(
                &mut engine,
                &mut store,
                &mut interpolator,
                request(serde_json::json!({"color": "red"}), Duration::from_millis(0)),
                0,
            )
            .unwrap();
        dispatcher
            .dispatch(
                &mut engine,
                &mut store,
                &mut interpolator,
                request(serde_json::json!({"color": "red"}), Duration::from_millis(500)),
                30,
            )
            .unwrap();

        assert_eq!(calls.load(std::sync::atomic::Ordering::SeqCst), 1);
    }

    #[test]
    fn different_payload_inside_window_still_dispatches() {
        let calls = std::sync::Arc::new(std::sync::atomic::AtomicUsize::new(0));
        let group = CueGroup::new("base", 0).register(
            "test",
            Box::new(CountingCue { calls: calls.clone() }),
        );
        let mut dispatcher = CueDispatcher::new(CueRegistry::new(vec![group]), &config());
        let mut engine = engine();
        let mut store = LayerStore::new();
        let mut interpolator = Interpolator::new();

        dispatcher
            .dispatch(
                &mut engine,
                &mut store,
                &mut interpolator,
                request(serde_json::json!({"color": "red"}), Duration::from_millis(0)),
                0,
            )
            .unwrap();
        dispatcher
            .dispatch(
                &mut engine,
                &mut store,
                &mut interpolator,
                request(serde_json::json!({"color": "blue"}), Duration::from_millis(500)),
                30,
            )
            .unwrap();

        assert_eq!(calls.load(std::sync::atomic::Ordering::SeqCst), 2);
    }

    #[test]
    fn bypass_debounce_always_dispatches() {
        let calls = std::sync::Arc::new(std::sync::atomic::AtomicUsize::new(0));
        let group = CueGroup::new("base", 0).register(
            "test",
            Box::new(CountingCue { calls: calls.clone() }),
        );
        let mut dispatcher = CueDispatcher::new(CueRegistry::new(vec![group]), &config());
        let mut engine = engine();
        let mut store = LayerStore::new();
        let mut interpolator = Interpolator::new();

        let mut first = request(serde_json::json!({"color": "red"}), Duration::from_millis(0));
        first.bypass_debounce = true;
        let mut second = request(serde_json::json!({"color": "red"}), Duration::from_millis(10));
        second.bypass_debounce = true;

        dispatcher.dispatch(&mut engine, &mut store, &mut interpolator, first, 0).unwrap();
        dispatcher.dispatch(&mut engine, &mut store, &mut interpolator, second, 1).unwrap();

        assert_eq!(calls.load(std::sync::atomic::Ordering::SeqCst), 2);
    }

    #[test]
    fn unknown_cue_kind_routes_to_no_cue_handler() {
        let mut dispatcher = CueDispatcher::new(CueRegistry::new(vec![]), &config());
        let mut engine = engine();
        let mut store = LayerStore::new();
        let mut interpolator = Interpolator::new();

        dispatcher
            .dispatch(
                &mut engine,
                &mut store,
                &mut interpolator,
                request(serde_json::Value::Null, Duration::ZERO),
                0,
            )
            .unwrap();

        let active = store.get_active(0, 1).unwrap();
        assert_eq!(active.effect.name, "no-cue");
    }

    #[test]
    fn inactivity_timeout_submits_blackout_slow_once() {
        let mut dispatcher = CueDispatcher::new(CueRegistry::new(vec![]), &config());
        let mut engine = engine();
        let mut store = LayerStore::new();
        let mut interpolator = Interpolator::new();

        dispatcher
            .check_inactivity(
                &mut engine,
                &mut store,
                &mut interpolator,
                &[1],
                Duration::from_millis(16000),
                1000,
            )
            .unwrap();
        assert_eq!(store.get_active(0, 1).unwrap().effect.name, "blackout-slow");

        store.remove_active(0, 1);
        dispatcher
            .check_inactivity(
                &mut engine,
                &mut store,
                &mut interpolator,
                &[1],
                Duration::from_millis(16100),
                1010,
            )
            .unwrap();
        assert!(store.get_active(0, 1).is_none());
    }

    #[test]
    fn inactivity_timeout_does_not_fire_before_the_deadline() {
        let mut dispatcher = CueDispatcher::new(CueRegistry::new(vec![]), &config());
        let mut engine = engine();
        let mut store = LayerStore::new();
        let mut interpolator = Interpolator::new();

        dispatcher
            .check_inactivity(
                &mut engine,
                &mut store,
                &mut interpolator,
                &[1],
                Duration::from_millis(1000),
                60,
            )
            .unwrap();

        assert!(store.get_active(0, 1).is_none());
    }
}
