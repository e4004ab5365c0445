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

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use rust_dmx::DmxPort;
use tracing::error;

use crate::dmx::UNIVERSE_SIZE;
use crate::error::SinkError;
use crate::sinks::Sink;

/// Drives an Enttec-class USB DMX widget via `rust_dmx`, the same crate the
/// teacher's legacy serial transport (`dmxengine.rs`) uses. `rust_dmx`'s
/// `DmxPort` is a blocking, synchronous API, so each `send` hands the write
/// off to `spawn_blocking` rather than block the tokio runtime.
pub struct EnttecSink {
    name: String,
    port: Arc<Mutex<Box<dyn DmxPort>>>,
}

impl EnttecSink {
    /// Opens the first available Enttec port, matching the teacher's own
    /// "skip index 0, which rust_dmx reserves for the offline DMX port"
    /// convention.
    pub fn open(name: impl Into<String>) -> Result<EnttecSink, SinkError> {
        let name = name.into();
        let mut ports = rust_dmx::EnttecDmxPort::available_ports().map_err(|e| SinkError::Send {
            sink: name.clone(),
            source: std::io::Error::new(std::io::ErrorKind::NotFound, e.to_string()),
        })?;

        if ports.is_empty() {
            return Err(SinkError::NotConnected { sink: name });
        }

        let mut port = ports.swap_remove(0);
        // Opens the port; without this first write subsequent writes have
        // been observed not to take effect.
        let _ = port.write(&[0]);

        Ok(EnttecSink {
            name,
            port: Arc::new(Mutex::new(port)),
        })
    }
}

#[async_trait]
impl Sink for EnttecSink {
    fn name(&self) -> &str {
        &self.name
    }

    async fn send(&self, _universe: u16, data: &[u8; UNIVERSE_SIZE]) -> Result<(), SinkError> {
        let port = self.port.clone();
        let name = self.name.clone();
        let data = *data;

        tokio::task::spawn_blocking(move || {
            let mut port = port.lock().expect("enttec port lock poisoned");
            port.write(&data)
        })
        .await
        .map_err(|join_err| SinkError::Send {
            sink: name.clone(),
            source: std::io::Error::new(std::io::ErrorKind::Other, join_err.to_string()),
        })?
        .map_err(|e| {
            error!(sink = %name, error = %e, "enttec write failed");
            SinkError::Send {
                sink: name,
                source: std::io::Error::new(std::io::ErrorKind::Other, e.to_string()),
            }
        })
    }
}
