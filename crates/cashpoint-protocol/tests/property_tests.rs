//! Property-based tests for the packet framer.
//!
//! Serial lines deliver arbitrary noise; these tests check that no input can
//! make the parser emit an invalid packet or lose a valid one behind noise.

use proptest::prelude::*;
use cashpoint_protocol::{Packet, PacketParser};

/// Strategy for arbitrary well-formed packets.
fn valid_packet() -> impl Strategy<Value = Packet> {
    (any::<u8>(), any::<u8>(), any::<u8>()).prop_map(|(c1, c2, d)| Packet::new(c1, c2, d))
}

/// Strategy for noise that contains no start marker.
fn noise_without_start() -> impl Strategy<Value = Vec<u8>> {
    prop::collection::vec(any::<u8>().prop_filter("no start byte", |b| *b != 0x24), 0..32)
}

proptest! {
    /// Property: every emitted packet has a valid checksum, whatever the input.
    #[test]
    fn prop_output_always_checksum_valid(
        chunks in prop::collection::vec(prop::collection::vec(any::<u8>(), 0..16), 0..16)
    ) {
        let mut parser = PacketParser::new();
        for chunk in &chunks {
            parser.feed(chunk);
        }

        for packet in parser.drain_packets() {
            prop_assert!(Packet::is_valid(packet.as_bytes()));
        }
        prop_assert!(parser.buffered() < 5);
    }

    /// Property: a valid packet after start-free noise is always recovered.
    #[test]
    fn prop_packet_survives_noise_prefix(
        noise in noise_without_start(),
        packet in valid_packet(),
    ) {
        let mut parser = PacketParser::new();
        parser.feed(&noise);
        parser.feed(packet.as_bytes());

        prop_assert_eq!(parser.next_packet(), Some(packet));
    }

    /// Property: a sequence of valid packets decodes in order regardless of chunking.
    #[test]
    fn prop_chunking_does_not_matter(
        packets in prop::collection::vec(valid_packet(), 1..8),
        split in 1usize..7,
    ) {
        let wire: Vec<u8> = packets.iter().flat_map(|p| p.as_bytes().to_vec()).collect();

        let mut parser = PacketParser::new();
        for chunk in wire.chunks(split) {
            parser.feed(chunk);
        }

        let decoded: Vec<Packet> = parser.drain_packets().collect();
        prop_assert_eq!(decoded, packets);
    }
}
