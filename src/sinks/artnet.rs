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

use std::sync::atomic::{AtomicU8, Ordering};

use async_trait::async_trait;
use tokio::net::UdpSocket;

use crate::dmx::UNIVERSE_SIZE;
use crate::error::SinkError;
use crate::sinks::Sink;

const ARTNET_PORT: u16 = 6454;
const ARTNET_ID: &[u8; 8] = b"Art-Net\0";
const OP_DMX: u16 = 0x5000;

/// Minimal Art-Net sink: one `ArtDMX` OpCode packet per universe per send.
/// No device discovery (`ArtPoll`/`ArtPollReply`) or RDM.
pub struct ArtnetSink {
    name: String,
    socket: UdpSocket,
    target: std::net::SocketAddr,
    sequence: AtomicU8,
}

impl ArtnetSink {
    pub async fn bind(name: impl Into<String>, target: std::net::SocketAddr) -> std::io::Result<ArtnetSink> {
        let socket = UdpSocket::bind("0.0.0.0:0").await?;
        socket.set_broadcast(true)?;
        Ok(ArtnetSink {
            name: name.into(),
            socket,
            target,
            sequence: AtomicU8::new(1),
        })
    }

    fn build_packet(&self, universe: u16, data: &[u8; UNIVERSE_SIZE]) -> Vec<u8> {
        let sequence = self.sequence.fetch_add(1, Ordering::Relaxed).max(1);
        let mut packet = Vec::with_capacity(18 + UNIVERSE_SIZE);
        packet.extend_from_slice(ARTNET_ID);
        packet.extend_from_slice(&OP_DMX.to_le_bytes());
        packet.extend_from_slice(&[0x00, 14]); // protocol version, big-endian 14
        packet.push(sequence);
        packet.push(0x00); // physical port
        packet.extend_from_slice(&universe.to_le_bytes());
        packet.extend_from_slice(&(UNIVERSE_SIZE as u16).to_be_bytes());
        packet.extend_from_slice(data);
        packet
    }
}

#[async_trait]
impl Sink for ArtnetSink {
    fn name(&self) -> &str {
        &self.name
    }

    async fn send(&self, universe: u16, data: &[u8; UNIVERSE_SIZE]) -> Result<(), SinkError> {
        let packet = self.build_packet(universe, data);
        self.socket
            .send_to(&packet, self.target)
            .await
            .map_err(|source| SinkError::Send {
                sink: self.name.clone(),
                source,
            })?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn packet_starts_with_artnet_id_and_dmx_opcode() {
        let sink = ArtnetSink::bind("artnet", "127.0.0.1:6454".parse().unwrap())
            .await
            .unwrap();
        let data = [0u8; UNIVERSE_SIZE];
        let packet = sink.build_packet(0, &data);
        assert_eq!(&packet[0..8], ARTNET_ID);
        assert_eq!(u16::from_le_bytes([packet[8], packet[9]]), OP_DMX);
    }

    #[tokio::test]
    async fn packet_carries_universe_little_endian() {
        let sink = ArtnetSink::bind("artnet", "127.0.0.1:6454".parse().unwrap())
            .await
            .unwrap();
        let data = [0u8; UNIVERSE_SIZE];
        let packet = sink.build_packet(300, &data);
        assert_eq!(u16::from_le_bytes([packet[14], packet[15]]), 300);
    }
}
