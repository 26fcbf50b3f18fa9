//! Tokio codec for the five-byte packet protocol.
//!
//! `PacketCodec` wraps [`PacketParser`] so a serial stream can be driven with
//! `FramedRead`/`FramedWrite`:
//!
//! ```text
//! serial bytes -> Decoder -> Packet
//! Packet -> Encoder -> serial bytes
//! ```
//!
//! Corrupt input never surfaces as a decode error; the parser resyncs and
//! the stream simply yields the next valid packet.
//!
//! # Usage
//!
//! ```
//! use bytes::BytesMut;
//! use tokio_util::codec::{Decoder, Encoder};
//! use cashpoint_protocol::{Packet, PacketCodec};
//!
//! let mut codec = PacketCodec::new();
//! let mut wire = BytesMut::new();
//! codec.encode(Packet::new(b'G', b'A', b'?'), &mut wire).unwrap();
//! assert_eq!(&wire[..], &[0x24, 0x47, 0x41, 0x3F, 0xC7]);
//!
//! let decoded = codec.decode(&mut wire).unwrap();
//! assert_eq!(decoded, Some(Packet::new(b'G', b'A', b'?')));
//! ```

use bytes::BytesMut;
use tokio_util::codec::{Decoder, Encoder};

use cashpoint_core::{Error, Result};

use crate::{Packet, ParserStats, PacketParser};

#[derive(Debug, Default)]
pub struct PacketCodec {
    parser: PacketParser,
}

impl PacketCodec {
    pub fn new() -> Self {
        Self {
            parser: PacketParser::new(),
        }
    }

    /// Framing counters of the wrapped parser.
    pub fn stats(&self) -> ParserStats {
        self.parser.stats()
    }

    /// Drop any partial packet and queued packets.
    pub fn reset(&mut self) {
        self.parser.clear();
    }
}

impl Decoder for PacketCodec {
    type Item = Packet;
    type Error = Error;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>> {
        if !src.is_empty() {
            // All bytes now belong to the parser's own buffer.
            self.parser.feed(src);
            src.clear();
        }

        Ok(self.parser.next_packet())
    }
}

impl Encoder<Packet> for PacketCodec {
    type Error = Error;

    fn encode(&mut self, item: Packet, dst: &mut BytesMut) -> Result<()> {
        dst.extend_from_slice(item.as_bytes());
        Ok(())
    }
}
