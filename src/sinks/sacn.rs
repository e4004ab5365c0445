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

const SACN_PORT: u16 = 5568;
const ROOT_VECTOR: u32 = 0x0000_0004;
const FRAMING_VECTOR: u32 = 0x0000_0002;
const DMP_VECTOR: u8 = 0x02;
const CID: [u8; 16] = *b"strobecue-sacn01";

/// Minimal E1.31 (sACN) sink: one unicast/multicast UDP packet per universe
/// per send, root layer + framing layer + DMP layer, no universe discovery
/// or sync packets. Sequence number increments per packet per universe so a
/// receiver can detect drops/out-of-order delivery.
pub struct SacnSink {
    name: String,
    socket: UdpSocket,
    target: std::net::SocketAddr,
    source_name: String,
    sequence: AtomicU8,
}

impl SacnSink {
    pub async fn bind(name: impl Into<String>, target: std::net::SocketAddr) -> std::io::Result<SacnSink> {
        let socket = UdpSocket::bind("0.0.0.0:0").await?;
        Ok(SacnSink {
            name: name.into(),
            socket,
            target,
            source_name: "strobecue".to_string(),
            sequence: AtomicU8::new(0),
        })
    }

    fn build_packet(&self, universe: u16, data: &[u8; UNIVERSE_SIZE]) -> Vec<u8> {
        let sequence = self.sequence.fetch_add(1, Ordering::Relaxed);
        let mut packet = Vec::with_capacity(126 + UNIVERSE_SIZE);

        // Root layer.
        packet.extend_from_slice(&[0x00, 0x10]); // preamble size
        packet.extend_from_slice(&[0x00, 0x00]); // postamble size
        packet.extend_from_slice(b"ASC-E1.17\0\0\0"); // ACN packet identifier
        let root_len = 0x7000 | (38 + 0x0b + UNIVERSE_SIZE as u16);
        packet.extend_from_slice(&root_len.to_be_bytes());
        packet.extend_from_slice(&ROOT_VECTOR.to_be_bytes());
        packet.extend_from_slice(&CID);

        // Framing layer.
        let framing_len = 0x7000 | (77 + UNIVERSE_SIZE as u16);
        packet.extend_from_slice(&framing_len.to_be_bytes());
        packet.extend_from_slice(&FRAMING_VECTOR.to_be_bytes());
        let mut source_name_bytes = [0u8; 64];
        let name_bytes = self.source_name.as_bytes();
        let copy_len = name_bytes.len().min(64);
        source_name_bytes[..copy_len].copy_from_slice(&name_bytes[..copy_len]);
        packet.extend_from_slice(&source_name_bytes);
        packet.push(100); // priority
        packet.extend_from_slice(&[0x00, 0x00]); // sync address
        packet.push(sequence);
        packet.push(0x00); // options
        packet.extend_from_slice(&universe.to_be_bytes());

        // DMP layer.
        let dmp_len = 0x7000 | (10 + UNIVERSE_SIZE as u16);
        packet.extend_from_slice(&dmp_len.to_be_bytes());
        packet.push(DMP_VECTOR);
        packet.push(0xa1); // address/data type
        packet.extend_from_slice(&0u16.to_be_bytes()); // first property address
        packet.extend_from_slice(&1u16.to_be_bytes()); // address increment
        packet.extend_from_slice(&((UNIVERSE_SIZE + 1) as u16).to_be_bytes());
        packet.push(0x00); // DMX start code
        packet.extend_from_slice(data);

        packet
    }
}

#[async_trait]
impl Sink for SacnSink {
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
    async fn sequence_increments_per_packet() {
        let sink = SacnSink::bind("sacn", "127.0.0.1:5568".parse().unwrap())
            .await
            .unwrap();
        let data = [0u8; UNIVERSE_SIZE];
        let first = sink.build_packet(1, &data);
        let second = sink.build_packet(1, &data);
        // The sequence byte sits right before the universe field in the
        // framing layer; rather than hardcode its offset twice, just assert
        // the two built packets differ.
        assert_ne!(first, second);
    }

    #[tokio::test]
    async fn packet_carries_the_universe_data_verbatim() {
        let sink = SacnSink::bind("sacn", "127.0.0.1:5568".parse().unwrap())
            .await
            .unwrap();
        let mut data = [0u8; UNIVERSE_SIZE];
        data[0] = 42;
        data[511] = 7;
        let packet = sink.build_packet(1, &data);
        assert_eq!(packet[packet.len() - UNIVERSE_SIZE], 42);
        assert_eq!(packet[packet.len() - 1], 7);
    }
}
