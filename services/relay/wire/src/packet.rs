//! Fixed-size packet framing.
//!
//! All socket I/O moves in units of the packet size. A logical message
//! shorter than one packet is zero-padded to a full packet; a longer one is
//! cut into a first full packet followed by continuation packets.

use bytes::{Bytes, BytesMut};

use crate::header::PACKET_SIZE;

/// Splits encoded messages into transport packets
#[derive(Debug, Clone, Copy)]
pub struct Packetizer {
    packet_size: usize,
}

impl Packetizer {
    /// Create a packetizer with the protocol packet size
    pub fn new() -> Self {
        Self::with_packet_size(PACKET_SIZE)
    }

    /// Create a packetizer with a custom packet size (must be non-zero)
    pub fn with_packet_size(packet_size: usize) -> Self {
        Self {
            packet_size: packet_size.max(1),
        }
    }

    /// Packet size in bytes
    pub fn packet_size(&self) -> usize {
        self.packet_size
    }

    /// Server-side framing.
    ///
    /// Short messages are padded to exactly one packet. Longer messages are
    /// sent as a full first packet and `min(remaining, packet_size)`
    /// continuation chunks; the final chunk is not padded.
    pub fn split(&self, message: Bytes) -> Vec<Bytes> {
        if message.len() < self.packet_size {
            return vec![self.pad(&message)];
        }

        let total = message.len().div_ceil(self.packet_size);
        let mut packets = Vec::with_capacity(total);
        let mut offset = 0;
        while offset < message.len() {
            let end = std::cmp::min(offset + self.packet_size, message.len());
            packets.push(message.slice(offset..end));
            offset = end;
        }
        packets
    }

    /// Client-side framing: every packet, including the last, is padded.
    pub fn split_padded(&self, message: Bytes) -> Vec<Bytes> {
        self.split(message)
            .into_iter()
            .map(|packet| {
                if packet.len() < self.packet_size {
                    self.pad(&packet)
                } else {
                    packet
                }
            })
            .collect()
    }

    fn pad(&self, data: &[u8]) -> Bytes {
        let mut packet = BytesMut::zeroed(self.packet_size);
        packet[..data.len()].copy_from_slice(data);
        packet.freeze()
    }
}

impl Default for Packetizer {
    fn default() -> Self {
        Self::new()
    }
}
