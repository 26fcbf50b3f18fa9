use std::fmt;

use cashpoint_core::{Error, Result, constants::*};

/// Compute the packet checksum: `(cmd1 + cmd2 + data) mod 256`.
///
/// ```
/// use cashpoint_protocol::checksum;
///
/// assert_eq!(checksum(b'S', b'A', 0x0D), 0xA1);
/// ```
#[must_use]
pub fn checksum(cmd1: u8, cmd2: u8, data: u8) -> u8 {
    cmd1.wrapping_add(cmd2).wrapping_add(data)
}

/// Render bytes as lowercase space-separated hex, the format used in every log line.
///
/// ```
/// use cashpoint_protocol::hex;
///
/// assert_eq!(hex(&[0x24, 0x53, 0x41]), "24 53 41");
/// assert_eq!(hex(&[]), "");
/// ```
#[must_use]
pub fn hex(bytes: &[u8]) -> String {
    bytes
        .iter()
        .map(|b| format!("{b:02x}"))
        .collect::<Vec<_>>()
        .join(" ")
}

/// A validated five-byte packet: `STX | CMD1 | CMD2 | DATA | CHK`.
///
/// A `Packet` can only be built through [`Packet::new`], which computes the
/// checksum, or [`Packet::try_from`], which verifies it. Holding a `Packet`
/// therefore always means holding a checksum-valid frame.
///
/// # Wire Format
/// ```text
/// 24 53 41 0d a1     enable intake   ($ S A 0x0D)
/// 24 4f 4b 61 fb     ack             ($ O K a)
/// 24 45 53 0b a3     event           ($ E S STACK_END)
/// ```
///
/// # Examples
/// ```
/// use cashpoint_protocol::Packet;
///
/// let packet = Packet::new(b'S', b'A', 0x0D);
/// assert_eq!(packet.as_bytes(), &[0x24, 0x53, 0x41, 0x0D, 0xA1]);
///
/// let parsed = Packet::try_from(&[0x24, 0x53, 0x41, 0x0D, 0xA1][..]).unwrap();
/// assert_eq!(parsed, packet);
/// ```
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct Packet([u8; PACKET_LEN]);

impl Packet {
    /// Build a packet from its command letters and data byte.
    #[must_use]
    pub fn new(cmd1: u8, cmd2: u8, data: u8) -> Self {
        Packet([START_BYTE, cmd1, cmd2, data, checksum(cmd1, cmd2, data)])
    }

    #[must_use]
    pub fn cmd1(&self) -> u8 {
        self.0[CMD1_INDEX]
    }

    #[must_use]
    pub fn cmd2(&self) -> u8 {
        self.0[CMD2_INDEX]
    }

    #[must_use]
    pub fn data(&self) -> u8 {
        self.0[DATA_INDEX]
    }

    #[must_use]
    pub fn checksum(&self) -> u8 {
        self.0[CHECKSUM_INDEX]
    }

    #[must_use]
    pub fn as_bytes(&self) -> &[u8; PACKET_LEN] {
        &self.0
    }

    /// The exact `(CMD1, CMD2)` signature of this packet.
    #[must_use]
    pub fn signature(&self) -> Signature {
        Signature::exact(self.cmd1(), self.cmd2())
    }

    /// Check whether a candidate slice is a checksum-valid packet.
    #[must_use]
    pub fn is_valid(bytes: &[u8]) -> bool {
        bytes.len() == PACKET_LEN
            && bytes[0] == START_BYTE
            && bytes[CHECKSUM_INDEX]
                == checksum(bytes[CMD1_INDEX], bytes[CMD2_INDEX], bytes[DATA_INDEX])
    }
}

impl TryFrom<&[u8]> for Packet {
    type Error = Error;

    fn try_from(bytes: &[u8]) -> Result<Self> {
        if bytes.len() != PACKET_LEN {
            return Err(Error::InvalidPacketLength(bytes.len()));
        }
        if bytes[0] != START_BYTE {
            return Err(Error::InvalidStartByte(bytes[0]));
        }
        let expected = checksum(bytes[CMD1_INDEX], bytes[CMD2_INDEX], bytes[DATA_INDEX]);
        if bytes[CHECKSUM_INDEX] != expected {
            return Err(Error::ChecksumMismatch {
                expected,
                actual: bytes[CHECKSUM_INDEX],
            });
        }

        let mut raw = [0u8; PACKET_LEN];
        raw.copy_from_slice(bytes);
        Ok(Packet(raw))
    }
}

impl fmt::Debug for Packet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Packet[{}]", hex(&self.0))
    }
}

impl fmt::Display for Packet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", hex(&self.0))
    }
}

/// Serialized as its hex rendering, the form the diagnostics logs use.
impl serde::Serialize for Packet {
    fn serialize<S: serde::Serializer>(
        &self,
        serializer: S,
    ) -> std::result::Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

/// The `(CMD1, CMD2)` pair a response is expected to carry.
///
/// Some replies vary their second byte (the dispenser's status reply puts a
/// status letter there), so the second byte may be left open. Routing always
/// prefers an exact registration over an open one.
///
/// ```
/// use cashpoint_protocol::{Packet, Signature};
///
/// let ok = Signature::exact(b'O', b'K');
/// assert!(ok.matches(&Packet::new(b'O', b'K', b'a')));
///
/// let status = Signature::any_second(b's');
/// assert!(status.matches(&Packet::new(b's', b't', b'b')));
/// assert!(!status.matches(&Packet::new(b'S', b't', b'b')));
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Signature {
    pub cmd1: u8,
    pub cmd2: Option<u8>,
}

impl Signature {
    #[must_use]
    pub const fn exact(cmd1: u8, cmd2: u8) -> Self {
        Signature {
            cmd1,
            cmd2: Some(cmd2),
        }
    }

    #[must_use]
    pub const fn any_second(cmd1: u8) -> Self {
        Signature { cmd1, cmd2: None }
    }

    #[must_use]
    pub fn matches(&self, packet: &Packet) -> bool {
        self.cmd1 == packet.cmd1() && self.cmd2.is_none_or(|cmd2| cmd2 == packet.cmd2())
    }

    #[must_use]
    pub fn is_exact(&self) -> bool {
        self.cmd2.is_some()
    }
}

impl fmt::Display for Signature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.cmd2 {
            Some(cmd2) => write!(f, "{:02x}-{:02x}", self.cmd1, cmd2),
            None => write!(f, "{:02x}-*", self.cmd1),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case(b'S', b'A', 0x0D, 0xA1)]
    #[case(b'G', b'A', b'?', 0xC7)]
    #[case(b'O', b'K', b'a', 0xFB)]
    #[case(b'D', b'S', 0x01, 0x98)]
    #[case(b'd', b'a', 0x01, 0xC6)]
    #[case(b'H', b'I', b'?', 0xD0)]
    #[case(b'm', b'e', b'!', 0xF3)]
    fn test_checksum_known_values(
        #[case] cmd1: u8,
        #[case] cmd2: u8,
        #[case] data: u8,
        #[case] expected: u8,
    ) {
        assert_eq!(checksum(cmd1, cmd2, data), expected);
        assert_eq!(Packet::new(cmd1, cmd2, data).checksum(), expected);
    }

    #[test]
    fn test_checksum_wraps() {
        assert_eq!(checksum(0xFF, 0xFF, 0xFF), 0xFD);
    }

    #[test]
    fn test_try_from_rejects_bad_checksum() {
        let result = Packet::try_from(&[0x24, 0xFF, 0x00, 0x00, 0x00][..]);
        assert!(matches!(
            result,
            Err(Error::ChecksumMismatch {
                expected: 0xFF,
                actual: 0x00
            })
        ));
    }

    #[test]
    fn test_try_from_rejects_wrong_length_and_start() {
        assert!(matches!(
            Packet::try_from(&[0x24, 0x53, 0x41][..]),
            Err(Error::InvalidPacketLength(3))
        ));
        assert!(matches!(
            Packet::try_from(&[0x23, 0x53, 0x41, 0x0D, 0xA1][..]),
            Err(Error::InvalidStartByte(0x23))
        ));
    }

    #[test]
    fn test_accessors() {
        let packet = Packet::new(b'g', b'b', 10);
        assert_eq!(packet.cmd1(), b'g');
        assert_eq!(packet.cmd2(), b'b');
        assert_eq!(packet.data(), 10);
        assert_eq!(packet.signature(), Signature::exact(b'g', b'b'));
    }

    #[test]
    fn test_display_is_hex() {
        let packet = Packet::new(b'S', b'A', 0x0D);
        assert_eq!(packet.to_string(), "24 53 41 0d a1");
        assert_eq!(format!("{packet:?}"), "Packet[24 53 41 0d a1]");
    }

    #[test]
    fn test_signature_display() {
        assert_eq!(Signature::exact(b'O', b'K').to_string(), "4f-4b");
        assert_eq!(Signature::any_second(b's').to_string(), "73-*");
    }

    #[test]
    fn test_exact_signature_does_not_match_other_second_byte() {
        let sig = Signature::exact(b's', b'e');
        assert!(!sig.matches(&Packet::new(b's', b't', b'b')));
        assert!(sig.matches(&Packet::new(b's', b'e', 0x82)));
        assert!(sig.is_exact());
        assert!(!Signature::any_second(b's').is_exact());
    }
}
