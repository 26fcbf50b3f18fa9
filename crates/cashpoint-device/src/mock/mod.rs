//! In-process device simulators for testing and development.
//!
//! Each simulator runs on a tokio task behind one end of a
//! `tokio::io::duplex` pipe and hands out the other end as a [`Transport`],
//! so the full engine (framing, correlation, events) runs unchanged. A
//! handle controls the simulated device and records what it received.

pub mod acceptor;
pub mod dispenser;

pub use acceptor::{MockAcceptor, MockAcceptorHandle};
pub use dispenser::{MockDispenser, MockDispenserHandle};

use futures::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio_util::codec::{FramedRead, FramedWrite};
use tracing::trace;

use cashpoint_protocol::{Packet, PacketCodec};

use crate::transport::Transport;

/// Pipe capacity in bytes; a few dozen packets.
const PIPE_CAPACITY: usize = 256;

/// Start a device task answering each request with `respond`.
///
/// Packets sent on the returned channel are written unsolicited.
fn spawn_device<F>(name: &str, mut respond: F) -> (Transport, mpsc::Sender<Packet>)
where
    F: FnMut(Packet) -> Vec<Packet> + Send + 'static,
{
    let (host, device) = tokio::io::duplex(PIPE_CAPACITY);
    let (read_half, write_half) = tokio::io::split(device);
    let mut requests = FramedRead::new(read_half, PacketCodec::new());
    let mut replies = FramedWrite::new(write_half, PacketCodec::new());
    let (push_tx, mut push_rx) = mpsc::channel::<Packet>(32);

    let device_name = name.to_string();
    tokio::spawn(async move {
        loop {
            tokio::select! {
                request = requests.next() => {
                    let Some(Ok(request)) = request else { break };
                    trace!(device = %device_name, rx = %request, "Simulator received");
                    for reply in respond(request) {
                        if replies.send(reply).await.is_err() {
                            return;
                        }
                    }
                }
                Some(packet) = push_rx.recv() => {
                    if replies.send(packet).await.is_err() {
                        return;
                    }
                }
                else => break,
            }
        }
        trace!(device = %device_name, "Simulator stopped");
    });

    (Transport::from_stream(name, host), push_tx)
}
