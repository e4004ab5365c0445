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

//! Wires every component into the single engine executor spec.md §5
//! describes: one task owns `LayerStore`, `TransitionEngine`, `Interpolator`
//! and the render pipeline down to `SinkFanout::send`, driven by `Clock`
//! ticks pushed in over a channel (the clock's own subscriber callback is
//! synchronous, so it cannot itself await the fanout's send). External
//! entry points — cue submissions, game events, sink enable/disable — are
//! queues drained once per tick, mirroring the teacher's `Controller`: a
//! single task draining an `mpsc::Receiver<Event>` that mutates one owned
//! `Player`.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, oneshot};
use tracing::{error, info, warn};

use crate::blender::Blender;
use crate::bus::LightStateBus;
use crate::clock::{Clock, Tick};
use crate::color::ColorSample;
use crate::config::Config;
use crate::cue::builtin::NoCueHandler;
use crate::cue::{Cue, CueDispatcher, CueParams, CueRegistry, CueRequest};
use crate::dmx::{DmxPublisher, FixtureChannelTable};
use crate::engine::{EngineConfig, Submission, TransitionEngine};
use crate::error::ShutdownError;
use crate::events::{EventHandler, EventReceiver};
use crate::interpolator::Interpolator;
use crate::model::LightId;
use crate::sinks::{Sink, SinkFanout};
use crate::store::LayerStore;

fn tick_to_duration(tick: u64, period: Duration) -> Duration {
    Duration::from_secs_f64(tick as f64 * period.as_secs_f64())
}

/// Enqueues a cue request for the engine task to pick up on its next tick,
/// matching spec.md §6's "synchronous-style call ... returns immediately
/// after enqueue." Cheap to clone, the way `EventHandler` is.
#[derive(Clone)]
pub struct CueHandle {
    tx: mpsc::Sender<CueRequest>,
    accepting: Arc<AtomicBool>,
}

impl CueHandle {
    pub fn submit(&self, request: CueRequest) {
        if !self.accepting.load(Ordering::Acquire) {
            info!(cue_kind = %request.cue_kind, "cue ingress stopped; dropping submission");
            return;
        }
        if self.tx.try_send(request).is_err() {
            warn!("cue ingress queue full or closed; dropping cue submission");
        }
    }

    fn close(&self) {
        self.accepting.store(false, Ordering::Release);
    }
}

/// Owns the engine executor task and the handles external callers use to
/// reach it. Dropping a `Sequencer` without calling `shutdown` abandons the
/// engine task and the Clock mid-flight; callers are expected to shut down
/// explicitly, the way the teacher's `Controller` is explicitly `join`ed.
pub struct Sequencer {
    clock: Arc<Clock>,
    cue_handle: CueHandle,
    event_handler: EventHandler,
    sinks: Arc<SinkFanout>,
    lights: Vec<LightId>,
    shutdown_tx: Option<oneshot::Sender<()>>,
    task: Option<tokio::task::JoinHandle<()>>,
}

impl Sequencer {
    /// Builds every engine-owned component, registers `sinks` with the
    /// fanout, subscribes the tick loop to `clock`, and starts it. `clock`
    /// is not started here; the caller starts it once every other
    /// subsystem is wired, matching `main.rs`'s boot ordering.
    pub async fn start(
        config: Config,
        table: FixtureChannelTable,
        sinks: Vec<Arc<dyn Sink>>,
        cue_registry: CueRegistry,
        clock: Arc<Clock>,
    ) -> Sequencer {
        let engine_config = EngineConfig::from_config(&config);

        let fanout = Arc::new(SinkFanout::new());
        for sink in sinks {
            fanout.register(sink).await;
        }

        let (event_handler, event_rx) = EventHandler::channel(256);
        let (cue_tx, cue_rx) = mpsc::channel::<CueRequest>(64);
        let (tick_tx, tick_rx) = mpsc::unbounded_channel::<Tick>();
        let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();

        clock
            .subscribe(move |tick| {
                let _ = tick_tx.send(tick);
            })
            .await;

        let mut lights: Vec<LightId> = table.lights().collect();
        lights.sort_unstable();

        let task_fanout = fanout.clone();
        let task_lights = lights.clone();
        let task = tokio::spawn(run_engine_task(
            config,
            table,
            engine_config,
            cue_registry,
            task_fanout,
            task_lights,
            event_rx,
            cue_rx,
            tick_rx,
            shutdown_rx,
        ));

        Sequencer {
            clock,
            cue_handle: CueHandle {
                tx: cue_tx,
                accepting: Arc::new(AtomicBool::new(true)),
            },
            event_handler,
            sinks: fanout,
            lights,
            shutdown_tx: Some(shutdown_tx),
            task: Some(task),
        }
    }

    pub fn cue_handle(&self) -> CueHandle {
        self.cue_handle.clone()
    }

    pub fn event_handler(&self) -> EventHandler {
        self.event_handler.clone()
    }

    pub fn sinks(&self) -> Arc<SinkFanout> {
        self.sinks.clone()
    }

    pub fn lights(&self) -> &[LightId] {
        &self.lights
    }

    /// Orchestrates shutdown in the order spec.md §5 mandates: stop cue
    /// ingress, submit a final blackout, let the engine task run it through
    /// one more tick so `SinkFanout` actually transmits it, then stop the
    /// Clock. A total budget of 5 seconds applies to the engine task's
    /// portion; exceeding it is reported as `ShutdownError::Timeout` and the
    /// caller is expected to force an exit.
    pub async fn shutdown(mut self) -> Result<(), ShutdownError> {
        self.cue_handle.close();

        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }

        if let Some(task) = self.task.take() {
            match tokio::time::timeout(Duration::from_secs(5), task).await {
                Ok(Ok(())) => {}
                Ok(Err(join_err)) => error!(error = %join_err, "engine task panicked during shutdown"),
                Err(_) => {
                    error!("shutdown did not complete within the allotted timeout");
                    return Err(ShutdownError::Timeout);
                }
            }
        }

        self.clock.stop().await;
        Ok(())
    }
}

#[allow(clippy::too_many_arguments)]
async fn run_engine_task(
    config: Config,
    table: FixtureChannelTable,
    engine_config: EngineConfig,
    cue_registry: CueRegistry,
    fanout: Arc<SinkFanout>,
    lights: Vec<LightId>,
    mut event_rx: EventReceiver,
    mut cue_rx: mpsc::Receiver<CueRequest>,
    mut tick_rx: mpsc::UnboundedReceiver<Tick>,
    mut shutdown_rx: oneshot::Receiver<()>,
) {
    let mut store = LayerStore::new();
    let mut engine = TransitionEngine::new(engine_config);
    let mut interpolator = Interpolator::new();
    let bus = LightStateBus::new();
    let publisher = DmxPublisher::with_brightness(&table, config.brightness);
    let mut cue_dispatcher = CueDispatcher::new(cue_registry, &config);
    let mut last_tick: u64 = 0;

    loop {
        tokio::select! {
            maybe_tick = tick_rx.recv() => {
                let Some(tick) = maybe_tick else { break };
                last_tick = tick.count;
                process_tick(
                    &mut engine,
                    &mut store,
                    &mut interpolator,
                    &mut cue_dispatcher,
                    &mut event_rx,
                    &mut cue_rx,
                    &bus,
                    &publisher,
                    &fanout,
                    &lights,
                    tick,
                )
                .await;
            }
            _ = &mut shutdown_rx => {
                final_blackout(
                    &mut engine,
                    &mut store,
                    &mut interpolator,
                    &bus,
                    &publisher,
                    &fanout,
                    &lights,
                    engine_config,
                    last_tick,
                )
                .await;
                break;
            }
        }
    }
}

#[allow(clippy::too_many_arguments)]
async fn process_tick(
    engine: &mut TransitionEngine,
    store: &mut LayerStore,
    interpolator: &mut Interpolator,
    cue_dispatcher: &mut CueDispatcher,
    event_rx: &mut EventReceiver,
    cue_rx: &mut mpsc::Receiver<CueRequest>,
    bus: &LightStateBus,
    publisher: &DmxPublisher<'_>,
    fanout: &SinkFanout,
    lights: &[LightId],
    tick: Tick,
) {
    let now = tick_to_duration(tick.count, tick.period);

    while let Ok(request) = cue_rx.try_recv() {
        if let Err(err) = cue_dispatcher.dispatch(engine, store, interpolator, request, tick.count) {
            error!(error = %err, "cue dispatch failed");
        }
    }

    for event in event_rx.drain() {
        engine.apply_event(store, interpolator, &event, now);
    }

    if let Err(err) = cue_dispatcher.check_inactivity(engine, store, interpolator, lights, now, tick.count) {
        error!(error = %err, "inactivity blackout submission failed");
    }

    engine.advance_tick(store, interpolator, tick);

    render_and_publish(store, bus, publisher, fanout, lights, false).await;
}

/// Folds every layer's cached color for a light into one blended result and
/// stages it, then commits the whole frame and hands it to the publisher
/// and sink fanout. `force` bypasses `SinkFanout`'s unchanged-frame
/// coalescing, used for the shutdown blackout so it reaches hardware even
/// if the last ordinary frame already matched it.
async fn render_and_publish(
    store: &LayerStore,
    bus: &LightStateBus,
    publisher: &DmxPublisher<'_>,
    fanout: &SinkFanout,
    lights: &[LightId],
    force: bool,
) {
    for &light in lights {
        let mut records = store.active_effects_for_light(light);
        records.sort_by_key(|record| record.layer);
        let samples: Vec<ColorSample> = records
            .iter()
            .map(|record| {
                store
                    .get_light_state(record.layer, light)
                    .unwrap_or_else(ColorSample::blackout)
            })
            .collect();
        bus.stage(light, Blender::blend(&samples));
    }
    bus.commit_frame();

    let frame = bus.snapshot();
    let universes = publisher.publish(&frame);
    let failed = if force {
        fanout.shutdown(&universes).await
    } else {
        fanout.send(&universes).await
    };
    if !failed.is_empty() {
        let sinks: Vec<&str> = failed.iter().map(|failure| failure.sink.as_str()).collect();
        warn!(sinks = ?sinks, "sinks failed to receive this tick's universes");
    }
}

/// Steps 2–4 of the shutdown sequence (spec.md §5): installs an instant
/// blackout on every light directly through the engine (bypassing
/// `CueDispatcher`, since cue ingress is already stopped), advances one
/// synthetic tick so the zero-duration transition lands and is sampled,
/// then forces the fanout to transmit it.
#[allow(clippy::too_many_arguments)]
async fn final_blackout(
    engine: &mut TransitionEngine,
    store: &mut LayerStore,
    interpolator: &mut Interpolator,
    bus: &LightStateBus,
    publisher: &DmxPublisher<'_>,
    fanout: &SinkFanout,
    lights: &[LightId],
    engine_config: EngineConfig,
    last_tick: u64,
) {
    let now = tick_to_duration(last_tick, engine_config.period);

    let params = CueParams {
        cue_kind: "shutdown-blackout".to_string(),
        payload: serde_json::Value::Null,
        lights: lights.to_vec(),
        timestamp: now,
    };
    let handler = NoCueHandler;
    match handler.build_effect(&params) {
        Ok(built) => {
            let submission = Submission {
                kind: built.kind,
                effect: built.effect,
                cycle: built.cycle,
            };
            if let Err(err) = engine.submit(store, interpolator, submission, now, last_tick) {
                error!(error = %err, "final shutdown blackout rejected");
            }
        }
        Err(err) => error!(error = %err, "failed to build shutdown blackout effect"),
    }

    let final_tick = Tick {
        count: last_tick + 1,
        period: engine_config.period,
    };
    engine.advance_tick(store, interpolator, final_tick);
    render_and_publish(store, bus, publisher, fanout, lights, true).await;
}
