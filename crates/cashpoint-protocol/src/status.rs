//! Status and error code tables for both peripherals.

use std::fmt;

use cashpoint_core::{Error, Result};
use serde::Serialize;

use crate::packet::Packet;

// ============================================================================
// Bill Acceptor
// ============================================================================

/// Acceptor state as reported by status replies and `E S` events.
///
/// The codes for the `*_WAIT` intermediate states are not documented by the
/// device and only ever appear in logs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum AcceptorStatus {
    Wait,
    StartWait,
    RecognitionWait,
    RecognitionEnd,
    ReturnWait,
    ReturnEnd,
    StackWait,
    StackEnd,
    ErrorWait,
}

impl AcceptorStatus {
    /// Decode a status or event code.
    ///
    /// # Errors
    /// Returns `Error::UnknownStatus` for codes outside the table.
    pub fn from_code(code: u8) -> Result<Self> {
        match code {
            0x01 => Ok(AcceptorStatus::Wait),
            0x02 => Ok(AcceptorStatus::StartWait),
            0x04 => Ok(AcceptorStatus::RecognitionWait),
            0x05 => Ok(AcceptorStatus::RecognitionEnd),
            0x07 => Ok(AcceptorStatus::ReturnWait),
            0x08 => Ok(AcceptorStatus::ReturnEnd),
            0x0A => Ok(AcceptorStatus::StackWait),
            0x0B => Ok(AcceptorStatus::StackEnd),
            0x0C => Ok(AcceptorStatus::ErrorWait),
            other => Err(Error::UnknownStatus(other)),
        }
    }

    #[must_use]
    pub fn code(self) -> u8 {
        match self {
            AcceptorStatus::Wait => 0x01,
            AcceptorStatus::StartWait => 0x02,
            AcceptorStatus::RecognitionWait => 0x04,
            AcceptorStatus::RecognitionEnd => 0x05,
            AcceptorStatus::ReturnWait => 0x07,
            AcceptorStatus::ReturnEnd => 0x08,
            AcceptorStatus::StackWait => 0x0A,
            AcceptorStatus::StackEnd => 0x0B,
            AcceptorStatus::ErrorWait => 0x0C,
        }
    }

    /// Intake is armed and waiting for a bill.
    #[must_use]
    pub fn is_armed(self) -> bool {
        self == AcceptorStatus::StartWait
    }

    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            AcceptorStatus::Wait => "WAIT",
            AcceptorStatus::StartWait => "START_WAIT",
            AcceptorStatus::RecognitionWait => "RECOGNITION_WAIT",
            AcceptorStatus::RecognitionEnd => "RECOGNITION_END",
            AcceptorStatus::ReturnWait => "RETURN_WAIT",
            AcceptorStatus::ReturnEnd => "RETURN_END",
            AcceptorStatus::StackWait => "STACK_WAIT",
            AcceptorStatus::StackEnd => "STACK_END",
            AcceptorStatus::ErrorWait => "ERROR_WAIT",
        }
    }

    /// Render any status code, known or not.
    ///
    /// ```
    /// use cashpoint_protocol::AcceptorStatus;
    ///
    /// assert_eq!(AcceptorStatus::status_string(0x0B), "STACK_END");
    /// assert_eq!(AcceptorStatus::status_string(0x33), "UNKNOWN (0x33)");
    /// ```
    #[must_use]
    pub fn status_string(code: u8) -> String {
        match AcceptorStatus::from_code(code) {
            Ok(status) => status.as_str().to_string(),
            Err(_) => format!("UNKNOWN (0x{code:02x})"),
        }
    }

    /// Translate an acceptor error code from the `G E ?` query.
    ///
    /// ```
    /// use cashpoint_protocol::AcceptorStatus;
    ///
    /// assert_eq!(AcceptorStatus::error_string(4), "Transport Motor error");
    /// assert_eq!(AcceptorStatus::error_string(13), "Main Sensor #3 error");
    /// ```
    #[must_use]
    pub fn error_string(code: u8) -> String {
        match code {
            1 => "Start Sensor error".to_string(),
            2 => "Shutter Sensor error".to_string(),
            4 => "Transport Motor error".to_string(),
            9 => "Suspected fraud".to_string(),
            11..=18 => format!("Main Sensor #{} error", code - 10),
            other => format!("Unknown error ({other})"),
        }
    }
}

impl fmt::Display for AcceptorStatus {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

// ============================================================================
// Bill Dispenser
// ============================================================================

/// Dispenser status decoded from an `s` (or `S`) reply.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum DispenserStatus {
    Idle,
    Dispensing,
    Disabled,
    /// Normal completion after dispensing this many bills.
    Completed(u8),
    /// Abnormal completion after dispensing this many bills.
    Aborted(u8),
    /// Device reported this error code.
    Error(u8),
}

impl DispenserStatus {
    /// Decode a status packet. Returns `None` for packets that are not status replies.
    ///
    /// Letter casing of the reply depends on the dialect; both casings decode.
    ///
    /// ```
    /// use cashpoint_protocol::{DispenserStatus, Packet};
    ///
    /// assert_eq!(DispenserStatus::decode(&Packet::new(b's', b't', b'b')), Some(DispenserStatus::Idle));
    /// assert_eq!(DispenserStatus::decode(&Packet::new(b'S', b'o', 3)), Some(DispenserStatus::Completed(3)));
    /// assert_eq!(DispenserStatus::decode(&Packet::new(b'd', b'a', 3)), None);
    /// ```
    #[must_use]
    pub fn decode(packet: &Packet) -> Option<Self> {
        if !packet.cmd1().eq_ignore_ascii_case(&b's') {
            return None;
        }

        let data = packet.data();
        match (packet.cmd2().to_ascii_lowercase(), data) {
            (b't', b'b') => Some(DispenserStatus::Idle),
            (b'o', b'n') => Some(DispenserStatus::Dispensing),
            (b'h', b'!') => Some(DispenserStatus::Disabled),
            (b'o', count) => Some(DispenserStatus::Completed(count)),
            (b'n', count) => Some(DispenserStatus::Aborted(count)),
            (b'e', code) => Some(DispenserStatus::Error(code)),
            _ => None,
        }
    }

    /// Bills reported by a completion status.
    #[must_use]
    pub fn dispensed(&self) -> Option<u8> {
        match self {
            DispenserStatus::Completed(n) | DispenserStatus::Aborted(n) => Some(*n),
            _ => None,
        }
    }

    /// Translate a dispenser error code.
    ///
    /// ```
    /// use cashpoint_protocol::DispenserStatus;
    ///
    /// assert_eq!(DispenserStatus::error_description(0x82), "JAM");
    /// assert_eq!(DispenserStatus::error_description(0x10), "Unknown error code: 0x10");
    /// ```
    #[must_use]
    pub fn error_description(code: u8) -> String {
        let text = match code {
            0x81 => "Empty",
            0x82 => "JAM",
            0x83 => "Bill DOUBLE",
            0x84 => "Shutter Error",
            0x85 => "LENGTH LONG",
            0x86 => "LENGTH SHORT",
            0x87 => "REJ_OVER",
            0x8A => "TAKEOUT",
            0x8C => "MOTOR",
            0x8E => "LENGTH DIFFERENTIAL",
            other => return format!("Unknown error code: 0x{other:02x}"),
        };
        text.to_string()
    }
}

impl fmt::Display for DispenserStatus {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            DispenserStatus::Idle => write!(f, "idle"),
            DispenserStatus::Dispensing => write!(f, "dispensing"),
            DispenserStatus::Disabled => write!(f, "disabled"),
            DispenserStatus::Completed(n) => write!(f, "completed normally after {n} bills"),
            DispenserStatus::Aborted(n) => write!(f, "completed abnormally after {n} bills"),
            DispenserStatus::Error(code) => {
                write!(f, "error: {}", DispenserStatus::error_description(*code))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case(0x01, AcceptorStatus::Wait)]
    #[case(0x02, AcceptorStatus::StartWait)]
    #[case(0x05, AcceptorStatus::RecognitionEnd)]
    #[case(0x08, AcceptorStatus::ReturnEnd)]
    #[case(0x0B, AcceptorStatus::StackEnd)]
    #[case(0x0C, AcceptorStatus::ErrorWait)]
    fn test_acceptor_code_table(#[case] code: u8, #[case] status: AcceptorStatus) {
        assert_eq!(AcceptorStatus::from_code(code).unwrap(), status);
        assert_eq!(status.code(), code);
    }

    #[test]
    fn test_unknown_acceptor_code() {
        assert!(matches!(
            AcceptorStatus::from_code(0x00),
            Err(Error::UnknownStatus(0x00))
        ));
    }

    #[test]
    fn test_only_start_wait_is_armed() {
        assert!(AcceptorStatus::StartWait.is_armed());
        assert!(!AcceptorStatus::Wait.is_armed());
        assert!(!AcceptorStatus::StackEnd.is_armed());
    }

    #[rstest]
    #[case(1, "Start Sensor error")]
    #[case(2, "Shutter Sensor error")]
    #[case(9, "Suspected fraud")]
    #[case(11, "Main Sensor #1 error")]
    #[case(18, "Main Sensor #8 error")]
    #[case(19, "Unknown error (19)")]
    fn test_acceptor_error_strings(#[case] code: u8, #[case] text: &str) {
        assert_eq!(AcceptorStatus::error_string(code), text);
    }

    #[rstest]
    #[case(b's', b'h', b'!', DispenserStatus::Disabled)]
    #[case(b's', b'o', b'n', DispenserStatus::Dispensing)]
    #[case(b's', b'o', 5, DispenserStatus::Completed(5))]
    #[case(b's', b'n', 2, DispenserStatus::Aborted(2))]
    #[case(b's', b'e', 0x82, DispenserStatus::Error(0x82))]
    #[case(b'S', b'T', b'b', DispenserStatus::Idle)]
    fn test_dispenser_status_decode(
        #[case] cmd1: u8,
        #[case] cmd2: u8,
        #[case] data: u8,
        #[case] expected: DispenserStatus,
    ) {
        assert_eq!(
            DispenserStatus::decode(&Packet::new(cmd1, cmd2, data)),
            Some(expected)
        );
    }

    #[test]
    fn test_dispensed_count() {
        assert_eq!(DispenserStatus::Completed(7).dispensed(), Some(7));
        assert_eq!(DispenserStatus::Aborted(1).dispensed(), Some(1));
        assert_eq!(DispenserStatus::Idle.dispensed(), None);
    }

    #[test]
    fn test_unrecognized_status_packet() {
        assert_eq!(DispenserStatus::decode(&Packet::new(b's', b'z', 0)), None);
    }
}
