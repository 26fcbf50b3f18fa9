use cashpoint_core::constants::{RESET_TIMEOUT_MS, VERSION_TIMEOUT_MS};

use super::CommandSpec;
use crate::packet::{Packet, Signature};

/// Acknowledgment reply for state-changing acceptor commands.
pub(crate) const OK: Signature = Signature::exact(b'O', b'K');

/// Commands understood by the bill acceptor.
///
/// ```
/// use cashpoint_protocol::{AcceptorCommand, Packet, Signature};
///
/// let spec = AcceptorCommand::EnableAcceptance.spec();
/// assert_eq!(spec.request, Packet::new(b'S', b'A', 0x0D));
/// assert_eq!(spec.expect, Signature::exact(b'O', b'K'));
/// assert_eq!(spec.expect_data, Some(b'a'));
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AcceptorCommand {
    EnableAcceptance,
    DisableAcceptance,
    GetStatus,
    GetBillData,
    GetConfig,
    SetConfig(u8),
    GetErrorCode,
    GetVersion,
    StackBill,
    ReturnBill,
    Reset,
    CheckConnection,
}

impl AcceptorCommand {
    #[must_use]
    pub fn name(&self) -> &'static str {
        match self {
            AcceptorCommand::EnableAcceptance => "Enable Acceptance",
            AcceptorCommand::DisableAcceptance => "Disable Acceptance",
            AcceptorCommand::GetStatus => "Get Status",
            AcceptorCommand::GetBillData => "Get Bill Data",
            AcceptorCommand::GetConfig => "Get Config",
            AcceptorCommand::SetConfig(_) => "Set Config",
            AcceptorCommand::GetErrorCode => "Get Error Code",
            AcceptorCommand::GetVersion => "Get Version",
            AcceptorCommand::StackBill => "Stack Bill",
            AcceptorCommand::ReturnBill => "Return Bill",
            AcceptorCommand::Reset => "Reset Device",
            AcceptorCommand::CheckConnection => "Check Connection",
        }
    }

    #[must_use]
    pub fn spec(&self) -> CommandSpec {
        let name = self.name();
        match *self {
            AcceptorCommand::EnableAcceptance => {
                CommandSpec::new(name, Packet::new(b'S', b'A', 0x0D), OK).expect_data(b'a')
            }
            AcceptorCommand::DisableAcceptance => {
                CommandSpec::new(name, Packet::new(b'S', b'A', 0x0E), OK).expect_data(b'a')
            }
            AcceptorCommand::GetStatus => CommandSpec::new(
                name,
                Packet::new(b'G', b'A', b'?'),
                Signature::exact(b'g', b'a'),
            ),
            AcceptorCommand::GetBillData => CommandSpec::new(
                name,
                Packet::new(b'G', b'B', b'?'),
                Signature::exact(b'g', b'b'),
            ),
            AcceptorCommand::GetConfig => CommandSpec::new(
                name,
                Packet::new(b'G', b'C', b'?'),
                Signature::exact(b'g', b'c'),
            ),
            AcceptorCommand::SetConfig(config) => {
                CommandSpec::new(name, Packet::new(b'S', b'C', config), OK).expect_data(b'c')
            }
            AcceptorCommand::GetErrorCode => CommandSpec::new(
                name,
                Packet::new(b'G', b'E', b'?'),
                Signature::exact(b'g', b'e'),
            ),
            AcceptorCommand::GetVersion => CommandSpec::new(
                name,
                Packet::new(b'G', b'V', b'?'),
                Signature::any_second(b'v'),
            )
            .timeout_ms(VERSION_TIMEOUT_MS),
            AcceptorCommand::StackBill => {
                CommandSpec::new(name, Packet::new(b'S', b'A', 0x09), OK).expect_data(b'a')
            }
            AcceptorCommand::ReturnBill => {
                CommandSpec::new(name, Packet::new(b'S', b'A', 0x06), OK).expect_data(b'a')
            }
            AcceptorCommand::Reset => CommandSpec::new(name, Packet::new(b'R', b'S', b'T'), OK)
                .expect_data(b'a')
                .timeout_ms(RESET_TIMEOUT_MS),
            AcceptorCommand::CheckConnection => CommandSpec::new(
                name,
                Packet::new(b'H', b'i', b'?'),
                Signature::exact(b'm', b'e'),
            )
            .expect_data(b'!'),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;
    use std::time::Duration;

    #[rstest]
    #[case(AcceptorCommand::EnableAcceptance, [0x24, 0x53, 0x41, 0x0D, 0xA1])]
    #[case(AcceptorCommand::DisableAcceptance, [0x24, 0x53, 0x41, 0x0E, 0xA2])]
    #[case(AcceptorCommand::GetStatus, [0x24, 0x47, 0x41, 0x3F, 0xC7])]
    #[case(AcceptorCommand::StackBill, [0x24, 0x53, 0x41, 0x09, 0x9D])]
    #[case(AcceptorCommand::ReturnBill, [0x24, 0x53, 0x41, 0x06, 0x9A])]
    #[case(AcceptorCommand::Reset, [0x24, 0x52, 0x53, 0x54, 0xF9])]
    fn test_request_bytes(#[case] command: AcceptorCommand, #[case] expected: [u8; 5]) {
        assert_eq!(command.spec().request.as_bytes(), &expected);
    }

    #[test]
    fn test_set_config_carries_byte() {
        let spec = AcceptorCommand::SetConfig(0x2F).spec();
        assert_eq!(spec.request.data(), 0x2F);
        assert_eq!(spec.expect, OK);
        assert_eq!(spec.expect_data, Some(b'c'));
    }

    #[test]
    fn test_timeout_overrides() {
        assert_eq!(
            AcceptorCommand::Reset.spec().timeout,
            Some(Duration::from_millis(3_000))
        );
        assert_eq!(
            AcceptorCommand::GetVersion.spec().timeout,
            Some(Duration::from_millis(1_000))
        );
        assert_eq!(AcceptorCommand::GetStatus.spec().timeout, None);
    }

    #[test]
    fn test_positive_reply_check() {
        let spec = AcceptorCommand::EnableAcceptance.spec();
        assert!(spec.is_positive(&Packet::new(b'O', b'K', b'a')));
        assert!(!spec.is_positive(&Packet::new(b'O', b'K', b'c')));

        let status = AcceptorCommand::GetStatus.spec();
        assert!(status.is_positive(&Packet::new(b'g', b'a', 0x02)));
    }
}
