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

use std::collections::VecDeque;
use std::sync::Mutex;

use async_trait::async_trait;

use crate::dmx::UNIVERSE_SIZE;
use crate::error::SinkError;
use crate::sinks::Sink;

const RING_CAPACITY: usize = 64;

/// An in-process sink that keeps the most recent frames in memory for a
/// test or UI to subscribe to, rather than sending anything over the wire.
pub struct PreviewSink {
    name: String,
    ring: Mutex<VecDeque<(u16, [u8; UNIVERSE_SIZE])>>,
}

impl PreviewSink {
    pub fn new(name: impl Into<String>) -> PreviewSink {
        PreviewSink {
            name: name.into(),
            ring: Mutex::new(VecDeque::with_capacity(RING_CAPACITY)),
        }
    }

    pub fn latest(&self, universe: u16) -> Option<[u8; UNIVERSE_SIZE]> {
        self.ring
            .lock()
            .expect("preview ring lock poisoned")
            .iter()
            .rev()
            .find(|(u, _)| *u == universe)
            .map(|(_, data)| *data)
    }

    pub fn frame_count(&self) -> usize {
        self.ring.lock().expect("preview ring lock poisoned").len()
    }
}

#[async_trait]
impl Sink for PreviewSink {
    fn name(&self) -> &str {
        &self.name
    }

    async fn send(&self, universe: u16, data: &[u8; UNIVERSE_SIZE]) -> Result<(), SinkError> {
        let mut ring = self.ring.lock().expect("preview ring lock poisoned");
        if ring.len() == RING_CAPACITY {
            ring.pop_front();
        }
        ring.push_back((universe, *data));
        Ok(())
    }
}
