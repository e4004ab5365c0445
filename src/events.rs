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

use tokio::sync::mpsc;
use tracing::trace;

use crate::model::WaitCondition;

/// A game-originated event the sequencer can gate transitions on. Raised by
/// whatever drives the rhythm game's beat clock or keyframe markers, fed in
/// over `EventHandler::fire`, and drained once per engine tick — mirroring
/// the teacher's `Controller`, a single task draining an `mpsc::Receiver`
/// between ticks rather than reacting inline from the producer's thread.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GameEvent {
    Beat,
    Measure,
    Keyframe(String),
}

/// Injects game events into the sequencer's ingress queue. Cheap to clone
/// and share with whatever produces beat/measure/keyframe events; the
/// receiving half is owned by the engine's single tick loop.
#[derive(Clone)]
pub struct EventHandler {
    tx: mpsc::Sender<GameEvent>,
}

/// The receiving half, drained once per tick by the engine.
pub struct EventReceiver {
    rx: mpsc::Receiver<GameEvent>,
}

impl EventHandler {
    pub fn channel(capacity: usize) -> (EventHandler, EventReceiver) {
        let (tx, rx) = mpsc::channel(capacity);
        (EventHandler { tx }, EventReceiver { rx })
    }

    pub fn fire_beat(&self) {
        let _ = self.tx.try_send(GameEvent::Beat);
    }

    pub fn fire_measure(&self) {
        let _ = self.tx.try_send(GameEvent::Measure);
    }

    pub fn fire_keyframe(&self, name: impl Into<String>) {
        let _ = self.tx.try_send(GameEvent::Keyframe(name.into()));
    }
}

impl EventReceiver {
    /// Drains every event queued since the last tick without blocking.
    pub fn drain(&mut self) -> Vec<GameEvent> {
        let mut events = Vec::new();
        while let Ok(event) = self.rx.try_recv() {
            events.push(event);
        }
        events
    }
}

/// Applies a single incoming event to a wait condition, decrementing its
/// remaining count. Returns `true` once the condition is satisfied. A
/// `Keyframe` condition is satisfied the instant a matching keyframe fires,
/// regardless of count; `Beats`/`Measures` tick down to zero.
pub fn apply_event(condition: &mut WaitCondition, event: &GameEvent) -> bool {
    match (condition, event) {
        (WaitCondition::Beats(remaining), GameEvent::Beat) => {
            *remaining = remaining.saturating_sub(1);
            trace!(remaining = *remaining, "beat applied to wait condition");
            *remaining == 0
        }
        (WaitCondition::Measures(remaining), GameEvent::Measure) => {
            *remaining = remaining.saturating_sub(1);
            trace!(remaining = *remaining, "measure applied to wait condition");
            *remaining == 0
        }
        (WaitCondition::Keyframe(name), GameEvent::Keyframe(fired)) => name == fired,
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn beats_count_down_to_zero() {
        let mut condition = WaitCondition::Beats(2);
        assert!(!apply_event(&mut condition, &GameEvent::Beat));
        assert!(apply_event(&mut condition, &GameEvent::Beat));
    }

    #[test]
    fn measures_do_not_respond_to_beats() {
        let mut condition = WaitCondition::Measures(1);
        assert!(!apply_event(&mut condition, &GameEvent::Beat));
        assert!(apply_event(&mut condition, &GameEvent::Measure));
    }

    #[test]
    fn keyframe_only_satisfied_by_matching_name() {
        let mut condition = WaitCondition::Keyframe("drop".to_string());
        assert!(!apply_event(
            &mut condition,
            &GameEvent::Keyframe("verse".to_string())
        ));
        assert!(apply_event(
            &mut condition,
            &GameEvent::Keyframe("drop".to_string())
        ));
    }

    #[tokio::test]
    async fn fire_and_drain_round_trips() {
        let (handler, mut receiver) = EventHandler::channel(8);
        handler.fire_beat();
        handler.fire_measure();
        handler.fire_keyframe("drop");

        let drained = receiver.drain();
        assert_eq!(
            drained,
            vec![
                GameEvent::Beat,
                GameEvent::Measure,
                GameEvent::Keyframe("drop".to_string())
            ]
        );
        assert!(receiver.drain().is_empty());
    }
}
