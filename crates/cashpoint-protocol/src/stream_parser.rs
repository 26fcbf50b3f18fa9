//! Stream parser for the five-byte peripheral packet protocol.
//!
//! Serial reads arrive in arbitrary chunks: half a packet, three packets at
//! once, or line noise. The parser accumulates bytes in an internal buffer
//! and extracts every checksum-valid packet it can find.
//!
//! # Resynchronisation
//!
//! The start marker `0x24` is not escaped, so it may appear inside a packet
//! body. When a candidate starting at `0x24` fails its checksum, the parser
//! drops only that one byte and scans again from the next position. A valid
//! packet hidden one byte behind a false start is therefore never lost.
//!
//! ```text
//! buffer:  24 ff 00 00 00 24 53 41 0d a1
//!          ^^ candidate fails checksum, drop 1 byte
//!             ff 00 00 00 skipped while scanning for 24
//!                         ^^^^^^^^^^^^^^ valid packet emitted
//! ```
//!
//! # Usage
//!
//! ```
//! use cashpoint_protocol::PacketParser;
//!
//! let mut parser = PacketParser::new();
//!
//! parser.feed(&[0x24, 0x53, 0x41]);
//! assert!(parser.next_packet().is_none());
//!
//! parser.feed(&[0x0D, 0xA1]);
//! let packet = parser.next_packet().unwrap();
//! assert_eq!(packet.cmd1(), b'S');
//! ```

use bytes::{Buf, BytesMut};
use std::collections::VecDeque;

use cashpoint_core::constants::{PACKET_LEN, START_BYTE};

use crate::packet::Packet;

/// Initial buffer capacity; a serial read rarely carries more than a few packets.
const INITIAL_BUFFER_CAPACITY: usize = 64;

/// Initial capacity of the ready-packet queue.
const INITIAL_PACKET_QUEUE_CAPACITY: usize = 4;

/// Counters describing what the parser has seen since creation or the last [`PacketParser::clear`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ParserStats {
    /// Checksum-valid packets extracted.
    pub packets: u64,

    /// Bytes dropped while scanning for a start marker.
    pub skipped_bytes: u64,

    /// Candidates starting at `0x24` that failed validation.
    pub rejected_candidates: u64,
}

/// Stateful parser that turns a serial byte stream into [`Packet`]s.
///
/// After every [`feed`](PacketParser::feed) the internal buffer holds at most
/// `PACKET_LEN - 1` bytes, all of them starting at a `0x24`; anything else has
/// either been emitted as a packet or discarded.
///
/// # Example
///
/// ```
/// use cashpoint_protocol::PacketParser;
///
/// let mut parser = PacketParser::new();
/// parser.feed(&[0x24, 0x53, 0x41, 0x0D, 0xA1, 0x24, 0x47, 0x41, 0x3F, 0xC7]);
///
/// assert_eq!(parser.packets_available(), 2);
/// assert_eq!(parser.buffered(), 0);
/// ```
#[derive(Debug)]
pub struct PacketParser {
    /// Bytes not yet consumed by the framing rules.
    buffer: BytesMut,

    /// Packets ready for extraction.
    packets: VecDeque<Packet>,

    stats: ParserStats,
}

impl PacketParser {
    pub fn new() -> Self {
        Self {
            buffer: BytesMut::with_capacity(INITIAL_BUFFER_CAPACITY),
            packets: VecDeque::with_capacity(INITIAL_PACKET_QUEUE_CAPACITY),
            stats: ParserStats::default(),
        }
    }

    /// Append bytes from the serial line and extract every complete packet.
    pub fn feed(&mut self, bytes: &[u8]) {
        self.buffer.extend_from_slice(bytes);

        while self.try_extract_packet() {}
    }

    /// Next complete packet, if any.
    pub fn next_packet(&mut self) -> Option<Packet> {
        self.packets.pop_front()
    }

    pub fn packets_available(&self) -> usize {
        self.packets.len()
    }

    /// Number of bytes held back waiting for the rest of a packet.
    pub fn buffered(&self) -> usize {
        self.buffer.len()
    }

    pub fn stats(&self) -> ParserStats {
        self.stats
    }

    /// Discard buffered bytes, queued packets and counters.
    ///
    /// Called when the transport closes so stale bytes never leak into the
    /// next session.
    pub fn clear(&mut self) {
        self.buffer.clear();
        self.packets.clear();
        self.stats = ParserStats::default();
    }

    /// Iterator draining every packet currently queued.
    ///
    /// Does not parse more input; call [`feed`](PacketParser::feed) first.
    ///
    /// ```
    /// use cashpoint_protocol::PacketParser;
    ///
    /// let mut parser = PacketParser::new();
    /// parser.feed(&[0x24, 0x53, 0x41, 0x0D, 0xA1, 0x24, 0x53, 0x41, 0x0E, 0xA2]);
    ///
    /// let data: Vec<u8> = parser.drain_packets().map(|p| p.data()).collect();
    /// assert_eq!(data, vec![0x0D, 0x0E]);
    /// ```
    pub fn drain_packets(&mut self) -> DrainPackets<'_> {
        DrainPackets { parser: self }
    }

    /// Apply the framing rules once.
    ///
    /// Returns `true` while progress is possible.
    fn try_extract_packet(&mut self) -> bool {
        let Some(start) = self.buffer.iter().position(|&b| b == START_BYTE) else {
            self.skip(self.buffer.len());
            return false;
        };
        self.skip(start);

        if self.buffer.len() < PACKET_LEN {
            return false;
        }

        match Packet::try_from(&self.buffer[..PACKET_LEN]) {
            Ok(packet) => {
                self.buffer.advance(PACKET_LEN);
                self.packets.push_back(packet);
                self.stats.packets += 1;
            }
            Err(_) => {
                // Only the false start is dropped; the next 0x24 may begin a real packet.
                self.buffer.advance(1);
                self.stats.rejected_candidates += 1;
            }
        }
        true
    }

    fn skip(&mut self, count: usize) {
        if count > 0 {
            self.buffer.advance(count);
            self.stats.skipped_bytes += count as u64;
        }
    }
}

impl Default for PacketParser {
    fn default() -> Self {
        Self::new()
    }
}

/// Draining iterator returned by [`PacketParser::drain_packets`].
pub struct DrainPackets<'a> {
    parser: &'a mut PacketParser,
}

impl Iterator for DrainPackets<'_> {
    type Item = Packet;

    fn next(&mut self) -> Option<Self::Item> {
        self.parser.next_packet()
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let len = self.parser.packets_available();
        (len, Some(len))
    }
}

impl ExactSizeIterator for DrainPackets<'_> {
    fn len(&self) -> usize {
        self.parser.packets_available()
    }
}
