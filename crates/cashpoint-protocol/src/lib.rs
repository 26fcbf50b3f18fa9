pub mod codec;
pub mod commands;
pub mod config_byte;
pub mod packet;
pub mod profile;
pub mod status;
pub mod stream_parser;

pub use codec::PacketCodec;
pub use commands::{AcceptorCommand, CommandSpec, DispenserCommand};
pub use config_byte::AcceptorConfig;
pub use packet::{Packet, Signature, checksum, hex};
pub use profile::{ACCEPTOR_PROFILE, DISPENSER_PROFILE, PacketClass, PeripheralProfile};
pub use status::{AcceptorStatus, DispenserStatus};
pub use stream_parser::{DrainPackets, PacketParser, ParserStats};
