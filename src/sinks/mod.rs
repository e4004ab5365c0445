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

pub mod artnet;
pub mod enttec;
pub mod preview;
pub mod sacn;

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::Mutex;
use tracing::{error, info, span, Level};

use crate::dmx::UNIVERSE_SIZE;
use crate::error::SinkError;

/// A concrete DMX transport. Every sink owns its own connection state and
/// is expected to attempt delivery best-effort: a `send` failure is
/// recoverable at the `SinkFanout` level and must never panic.
#[async_trait]
pub trait Sink: Send + Sync {
    fn name(&self) -> &str;
    async fn send(&self, universe: u16, data: &[u8; UNIVERSE_SIZE]) -> Result<(), SinkError>;
}

struct Entry {
    sink: Arc<dyn Sink>,
    enabled: bool,
    /// Per-universe "last sent" buffer (spec.md §4.8): a universe is only
    /// handed to this sink's `send` when at least one byte changed since the
    /// last frame actually transmitted, coalescing no-op frames. Absent
    /// until the first frame for that universe is sent.
    last_sent: HashMap<u16, [u8; UNIVERSE_SIZE]>,
}

/// One sink's delivery failure, reported to every registered error listener:
/// which sink, and what it failed with.
#[derive(Debug, Clone)]
pub struct SinkFailure {
    pub sink: String,
    pub cause: Arc<SinkError>,
}

/// An occurrence a sink-error listener is notified of: either an ordinary
/// delivery failure, or the sink's removal from the fanout once a failure
/// proved unrecoverable (spec.md §7: a sink "signalling a hard unrecoverable
/// state" is dropped and a synthetic removal notice raised alongside it).
#[derive(Debug, Clone)]
pub enum SinkEvent {
    Failed(SinkFailure),
    Removed { sink: String },
}

type Listener = Box<dyn Fn(SinkEvent) + Send + Sync>;

/// A handle identifying one error-listener registration, used to unsubscribe
/// later.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ListenerId(u64);

/// Delivers each tick's universes to every enabled sink concurrently. One
/// sink's failure is logged and isolated; it never prevents delivery to its
/// siblings, and never stops the tick loop that called `send`. This is the
/// one `tokio::join_all` suspension point per tick described by the
/// concurrency model: everything else in the sequencer's tick is
/// synchronous.
pub struct SinkFanout {
    sinks: Mutex<HashMap<String, Entry>>,
    listeners: Mutex<Vec<(u64, Listener)>>,
    next_listener_id: AtomicU64,
}

impl SinkFanout {
    pub fn new() -> SinkFanout {
        SinkFanout {
            sinks: Mutex::new(HashMap::new()),
            listeners: Mutex::new(Vec::new()),
            next_listener_id: AtomicU64::new(0),
        }
    }

    pub async fn register(&self, sink: Arc<dyn Sink>) {
        let name = sink.name().to_string();
        self.sinks.lock().await.insert(
            name,
            Entry {
                sink,
                enabled: true,
                last_sent: HashMap::new(),
            },
        );
    }

    pub async fn enable(&self, name: &str) {
        if let Some(entry) = self.sinks.lock().await.get_mut(name) {
            entry.enabled = true;
        }
    }

    pub async fn disable(&self, name: &str) {
        if let Some(entry) = self.sinks.lock().await.get_mut(name) {
            entry.enabled = false;
        }
    }

    /// Registers a callback invoked for every `SinkEvent` raised by
    /// `send`/`shutdown`: each delivery failure, and each removal that
    /// follows a hard-failed sink. Mirrors `Clock::subscribe`'s callback
    /// registration rather than a channel, since listeners here are just as
    /// often a synchronous metrics/logging hook as an async consumer.
    pub async fn subscribe_errors<F>(&self, listener: F) -> ListenerId
    where
        F: Fn(SinkEvent) + Send + Sync + 'static,
    {
        let id = self.next_listener_id.fetch_add(1, Ordering::Relaxed);
        self.listeners.lock().await.push((id, Box::new(listener)));
        ListenerId(id)
    }

    pub async fn unsubscribe_errors(&self, id: ListenerId) {
        self.listeners.lock().await.retain(|(lid, _)| *lid != id.0);
    }

    /// Sends every universe to every enabled sink concurrently, skipping a
    /// (sink, universe) pair whose bytes are unchanged since the last frame
    /// that sink actually transmitted. Each failure is logged, reported to
    /// every registered error listener, and — if it signals a hard
    /// unrecoverable state — removes that sink from the fanout and raises a
    /// synthetic `SinkEvent::Removed` alongside it. The returned list names
    /// the sinks that failed this call, for a caller that wants a cheap
    /// summary without registering a listener.
    pub async fn send(&self, universes: &HashMap<u16, [u8; UNIVERSE_SIZE]>) -> Vec<SinkFailure> {
        self.dispatch(universes, false).await
    }

    /// Forces every enabled sink to transmit every universe regardless of
    /// whether it matches the last frame sent, bypassing coalescing. Used
    /// for the final all-zero blackout frame on shutdown (spec.md §4.7,
    /// §5), which must reach hardware even if the last ordinary frame was
    /// already all zero.
    pub async fn shutdown(&self, universes: &HashMap<u16, [u8; UNIVERSE_SIZE]>) -> Vec<SinkFailure> {
        self.dispatch(universes, true).await
    }

    async fn dispatch(&self, universes: &HashMap<u16, [u8; UNIVERSE_SIZE]>, force: bool) -> Vec<SinkFailure> {
        let span = span!(Level::DEBUG, "sink_fanout_send", force);
        let _enter = span.enter();

        let to_send: Vec<(Arc<dyn Sink>, u16, [u8; UNIVERSE_SIZE])> = {
            let mut sinks = self.sinks.lock().await;
            let mut out = Vec::with_capacity(sinks.len() * universes.len().max(1));
            for entry in sinks.values_mut().filter(|e| e.enabled) {
                for (&universe, data) in universes.iter() {
                    let unchanged = !force && entry.last_sent.get(&universe) == Some(data);
                    if unchanged {
                        continue;
                    }
                    entry.last_sent.insert(universe, *data);
                    out.push((entry.sink.clone(), universe, *data));
                }
            }
            out
        };

        let mut tasks = Vec::with_capacity(to_send.len());
        for (sink, universe, data) in to_send {
            tasks.push(tokio::spawn(async move {
                let result = sink.send(universe, &data).await;
                (sink.name().to_string(), result)
            }));
        }

        let mut failures: Vec<(String, SinkError)> = Vec::new();
        for task in tasks {
            match task.await {
                Ok((name, Ok(()))) => {
                    info!(sink = %name, "universe delivered");
                }
                Ok((name, Err(err))) => {
                    error!(sink = %name, error = %err, "sink delivery failed");
                    failures.push((name, err));
                }
                Err(join_err) => {
                    error!(error = %join_err, "sink task panicked");
                }
            }
        }

        if failures.is_empty() {
            return Vec::new();
        }

        let mut removed = Vec::new();
        {
            let mut sinks = self.sinks.lock().await;
            for (name, cause) in &failures {
                if cause.is_fatal() && sinks.remove(name).is_some() {
                    error!(sink = %name, "sink signaled an unrecoverable failure; removing from fanout");
                    removed.push(name.clone());
                }
            }
        }

        let listeners = self.listeners.lock().await;
        let mut reported = Vec::with_capacity(failures.len());
        for (sink, cause) in failures {
            let cause = Arc::new(cause);
            let failure = SinkFailure { sink, cause };
            for (_, listener) in listeners.iter() {
                listener(SinkEvent::Failed(failure.clone()));
            }
            reported.push(failure);
        }
        for sink in removed {
            for (_, listener) in listeners.iter() {
                listener(SinkEvent::Removed { sink: sink.clone() });
            }
        }

        reported
    }
}

impl Default for SinkFanout {
    fn default() -> SinkFanout {
        SinkFanout::new()
    }
}
