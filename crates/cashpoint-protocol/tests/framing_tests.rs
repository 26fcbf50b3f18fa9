//! Framing tests over real Tokio streams.
//!
//! A duplex pipe stands in for the serial line; the reading side is driven by
//! `FramedRead` with `PacketCodec`, exactly as the device runtime does.

use futures::{SinkExt, StreamExt};
use tokio::io::{AsyncWriteExt, DuplexStream};
use tokio_util::codec::{FramedRead, FramedWrite};
use cashpoint_protocol::{Packet, PacketCodec};

fn create_pipe() -> (DuplexStream, FramedRead<DuplexStream, PacketCodec>) {
    let (device, host) = tokio::io::duplex(256);
    (device, FramedRead::new(host, PacketCodec::new()))
}

#[tokio::test]
async fn test_two_packets_in_one_write_extracted_in_order() {
    let (mut device, mut reader) = create_pipe();

    device
        .write_all(&[0x24, 0x53, 0x41, 0x0D, 0xA1, 0x24, 0x47, 0x41, 0x3F, 0xC7])
        .await
        .unwrap();

    let first = reader.next().await.unwrap().unwrap();
    let second = reader.next().await.unwrap().unwrap();
    assert_eq!(first, Packet::new(b'S', b'A', 0x0D));
    assert_eq!(second, Packet::new(b'G', b'A', b'?'));
}

#[tokio::test]
async fn test_corrupt_candidate_costs_one_byte() {
    let (mut device, mut reader) = create_pipe();

    device
        .write_all(&[0x24, 0xFF, 0x00, 0x00, 0x00, 0x24, 0x53, 0x41, 0x0D, 0xA1])
        .await
        .unwrap();
    drop(device);

    let packets: Vec<Packet> = reader.by_ref().map(|r| r.unwrap()).collect().await;
    assert_eq!(packets, vec![Packet::new(b'S', b'A', 0x0D)]);
    assert_eq!(reader.decoder().stats().rejected_candidates, 1);
}

#[tokio::test]
async fn test_packet_split_across_writes() {
    let (mut device, mut reader) = create_pipe();

    device.write_all(&[0x24, 0x45]).await.unwrap();
    device.write_all(&[0x53, 0x0B]).await.unwrap();
    device.write_all(&[0xA3]).await.unwrap();

    let packet = reader.next().await.unwrap().unwrap();
    assert_eq!(packet, Packet::new(b'E', b'S', 0x0B));
}

#[tokio::test]
async fn test_encoder_writes_wire_bytes() {
    let (host, device) = tokio::io::duplex(64);
    let mut writer = FramedWrite::new(host, PacketCodec::new());
    let mut device_reader = FramedRead::new(device, PacketCodec::new());

    writer.send(Packet::new(b'e', b's', 0x0B)).await.unwrap();

    let echoed = device_reader.next().await.unwrap().unwrap();
    assert_eq!(echoed.as_bytes(), &[0x24, 0x65, 0x73, 0x0B, 0xE3]);
}

#[tokio::test]
async fn test_stream_ends_cleanly_with_partial_tail() {
    let (mut device, mut reader) = create_pipe();

    device.write_all(&[0x24, 0x4F, 0x4B]).await.unwrap();
    drop(device);

    assert!(reader.next().await.is_none());
}
