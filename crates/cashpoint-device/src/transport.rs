//! Transport session: the open byte stream to one peripheral.
//!
//! A transport is either a real serial port (`tokio-serial`) or any
//! `AsyncRead + AsyncWrite` stream, which is how tests and the simulators
//! plug in through `tokio::io::duplex`. The stream is split once: the read
//! half goes to the engine's single reader loop, the write half to its
//! single writer.

use tokio::io::{AsyncRead, AsyncWrite, ReadHalf, WriteHalf};
use tokio_serial::{DataBits, FlowControl, Parity, SerialStream, StopBits};
use tokio_util::codec::{FramedRead, FramedWrite};
use tracing::{debug, info};

use cashpoint_protocol::PacketCodec;

use crate::config::SerialSettings;
use crate::error::{DeviceError, Result};

/// Byte stream a transport can run over.
pub trait SerialIo: AsyncRead + AsyncWrite + Send + Unpin + 'static {}

impl<T: AsyncRead + AsyncWrite + Send + Unpin + 'static> SerialIo for T {}

pub type PacketReader = FramedRead<ReadHalf<Box<dyn SerialIo>>, PacketCodec>;
pub type PacketWriter = FramedWrite<WriteHalf<Box<dyn SerialIo>>, PacketCodec>;

/// An open, not yet started, connection to a peripheral.
pub struct Transport {
    name: String,
    reader: PacketReader,
    writer: PacketWriter,
}

impl Transport {
    /// Open a serial port: 8 data bits, 1 stop bit, no parity, no flow control.
    ///
    /// Failure is reported, never retried here.
    ///
    /// # Errors
    /// Returns `DeviceError::PortUnavailable` when the port cannot be opened
    /// and `DeviceError::ConfigurationError` for unsupported line settings.
    pub fn open(settings: &SerialSettings) -> Result<Self> {
        info!(
            "Opening serial port {} at {} bps",
            settings.path, settings.baud_rate
        );

        let builder = tokio_serial::new(&settings.path, settings.baud_rate)
            .data_bits(data_bits(settings.data_bits)?)
            .stop_bits(stop_bits(settings.stop_bits)?)
            .parity(Parity::None)
            .flow_control(FlowControl::None);

        let stream = SerialStream::open(&builder)
            .map_err(|e| DeviceError::port_unavailable(&settings.path, e))?;

        debug!("Serial port {} open", settings.path);
        Ok(Self::from_stream(settings.path.clone(), stream))
    }

    /// Wrap an already open stream.
    pub fn from_stream(name: impl Into<String>, stream: impl SerialIo) -> Self {
        let boxed: Box<dyn SerialIo> = Box::new(stream);
        let (read_half, write_half) = tokio::io::split(boxed);

        Self {
            name: name.into(),
            reader: FramedRead::new(read_half, PacketCodec::new()),
            writer: FramedWrite::new(write_half, PacketCodec::new()),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub(crate) fn into_parts(self) -> (String, PacketReader, PacketWriter) {
        (self.name, self.reader, self.writer)
    }
}

impl std::fmt::Debug for Transport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Transport").field("name", &self.name).finish()
    }
}

fn data_bits(bits: u8) -> Result<DataBits> {
    match bits {
        5 => Ok(DataBits::Five),
        6 => Ok(DataBits::Six),
        7 => Ok(DataBits::Seven),
        8 => Ok(DataBits::Eight),
        other => Err(DeviceError::configuration(format!(
            "unsupported data bits: {other}"
        ))),
    }
}

fn stop_bits(bits: u8) -> Result<StopBits> {
    match bits {
        1 => Ok(StopBits::One),
        2 => Ok(StopBits::Two),
        other => Err(DeviceError::configuration(format!(
            "unsupported stop bits: {other}"
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::{SinkExt, StreamExt};
    use cashpoint_protocol::Packet;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    #[test]
    fn test_line_settings() {
        assert!(matches!(data_bits(8), Ok(DataBits::Eight)));
        assert!(matches!(stop_bits(1), Ok(StopBits::One)));
        assert!(matches!(
            data_bits(9),
            Err(DeviceError::ConfigurationError { .. })
        ));
    }

    #[test]
    fn test_open_missing_port_fails() {
        let settings = SerialSettings::new("/dev/cashpoint-does-not-exist");
        let result = Transport::open(&settings);
        assert!(matches!(result, Err(DeviceError::PortUnavailable { .. })));
    }

    #[tokio::test]
    async fn test_stream_transport_frames_both_ways() {
        let (host, mut device) = tokio::io::duplex(64);
        let transport = Transport::from_stream("duplex", host);
        assert_eq!(transport.name(), "duplex");

        let (_, mut reader, mut writer) = transport.into_parts();

        writer.send(Packet::new(b'G', b'A', b'?')).await.unwrap();
        let mut wire = [0u8; 5];
        device.read_exact(&mut wire).await.unwrap();
        assert_eq!(wire, [0x24, 0x47, 0x41, 0x3F, 0xC7]);

        device.write_all(Packet::new(b'g', b'a', 0x02).as_bytes()).await.unwrap();
        let reply = reader.next().await.unwrap().unwrap();
        assert_eq!(reply.data(), 0x02);
    }
}
