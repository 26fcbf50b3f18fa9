use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    // Packet errors
    #[error("Invalid packet length: expected 5 bytes, got {0}")]
    InvalidPacketLength(usize),

    #[error("Invalid start byte: 0x{0:02x}")]
    InvalidStartByte(u8),

    #[error("Checksum mismatch: expected 0x{expected:02x}, got 0x{actual:02x}")]
    ChecksumMismatch { expected: u8, actual: u8 },

    // Command errors
    #[error("Dispense count out of range: {0} (allowed 1-250)")]
    InvalidDispenseCount(u32),

    #[error("Unrecognized bill code: {0}")]
    UnknownDenomination(u8),

    #[error("Unknown status code: 0x{0:02x}")]
    UnknownStatus(u8),

    // IO errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, Error>;
