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

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{error, info, span, Level};

/// A tick delivered to every subscriber: a monotonically increasing count
/// plus the nominal period, so subscribers doing integer cycle-boundary math
/// (persistent cyclic effects) never need to reach for a float duration.
#[derive(Debug, Clone, Copy)]
pub struct Tick {
    pub count: u64,
    pub period: std::time::Duration,
}

type Subscriber = Box<dyn Fn(Tick) + Send + Sync>;

/// Fixed-rate tick source driving the whole sequencer. Built on
/// `tokio::time::interval`; a subscriber that panics or otherwise fails is
/// caught, logged via `error!`, and does not stop the tick loop for the
/// other subscribers — mirroring the teacher's `Controller::trigger_events`,
/// which logs and continues on a single event's failure rather than tearing
/// down the whole dispatch loop.
pub struct Clock {
    subscribers: Arc<Mutex<Vec<(u64, Subscriber)>>>,
    next_id: AtomicU64,
    running: Arc<AtomicBool>,
    tick_count: Arc<AtomicU64>,
    handle: Mutex<Option<JoinHandle<()>>>,
    period: std::time::Duration,
}

/// A handle identifying one subscription, used to unsubscribe later.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SubscriptionId(u64);

impl Clock {
    pub fn new(hz: u32) -> Clock {
        let period = std::time::Duration::from_secs_f64(1.0 / hz.max(1) as f64);
        Clock {
            subscribers: Arc::new(Mutex::new(Vec::new())),
            next_id: AtomicU64::new(0),
            running: Arc::new(AtomicBool::new(false)),
            tick_count: Arc::new(AtomicU64::new(0)),
            handle: Mutex::new(None),
            period,
        }
    }

    pub fn period(&self) -> std::time::Duration {
        self.period
    }

    pub fn current_tick(&self) -> u64 {
        self.tick_count.load(Ordering::Relaxed)
    }

    pub async fn subscribe<F>(&self, callback: F) -> SubscriptionId
    where
        F: Fn(Tick) + Send + Sync + 'static,
    {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.subscribers
            .lock()
            .await
            .push((id, Box::new(callback)));
        SubscriptionId(id)
    }

    pub async fn unsubscribe(&self, id: SubscriptionId) {
        self.subscribers.lock().await.retain(|(sid, _)| *sid != id.0);
    }

    /// Starts the tick loop on a fresh tokio task. A no-op if already
    /// running.
    pub async fn start(self: &Arc<Self>) {
        if self.running.swap(true, Ordering::SeqCst) {
            return;
        }

        let subscribers = self.subscribers.clone();
        let running = self.running.clone();
        let tick_count = self.tick_count.clone();
        let period = self.period;

        let join = tokio::spawn(async move {
            let span = span!(Level::INFO, "clock");
            let _enter = span.enter();
            info!(hz = 1.0 / period.as_secs_f64(), "clock started");

            let mut interval = tokio::time::interval(period);
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Burst);

            while running.load(Ordering::SeqCst) {
                interval.tick().await;
                let count = tick_count.fetch_add(1, Ordering::SeqCst) + 1;
                let tick = Tick { count, period };

                let subs = subscribers.lock().await;
                for (id, callback) in subs.iter() {
                    let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
                        callback(tick)
                    }));
                    if let Err(_) = result {
                        error!(subscriber = id, "clock subscriber panicked; continuing");
                    }
                }
            }

            info!("clock stopped");
        });

        *self.handle.lock().await = Some(join);
    }

    /// Stops the tick loop and waits for the driving task to finish.
    pub async fn stop(&self) {
        self.running.store(false, Ordering::SeqCst);
        if let Some(handle) = self.handle.lock().await.take() {
            let _ = handle.await;
        }
    }
}
