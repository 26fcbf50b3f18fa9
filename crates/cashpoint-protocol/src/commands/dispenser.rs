use cashpoint_core::{
    Dialect, DispenseCount,
    constants::{DISPENSE_TIMEOUT_MS, TOTAL_COUNT_TIMEOUT_MS},
};

use super::CommandSpec;
use crate::packet::{Packet, Signature};

/// Commands understood by the bill dispenser.
///
/// Letters are written in old-dialect casing and converted with
/// [`Dialect::letter`] when the command is built, for the request and for the
/// expected reply alike. The dispense command and the connection probe are
/// the same in both dialects.
///
/// ```
/// use cashpoint_core::Dialect;
/// use cashpoint_protocol::{DispenserCommand, Packet, Signature};
///
/// let old = DispenserCommand::Enable.spec(Dialect::Old);
/// assert_eq!(old.request, Packet::new(b'H', b'C', b'?'));
/// assert_eq!(old.expect, Signature::exact(b'h', b'c'));
///
/// let new = DispenserCommand::Enable.spec(Dialect::New);
/// assert_eq!(new.request, Packet::new(b'h', b'c', b'?'));
/// assert_eq!(new.expect, Signature::exact(b'H', b'C'));
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DispenserCommand {
    Reset,
    Disable,
    Enable,
    ClearDispensedCount,
    GetTotalCount,
    ClearTotalCount,
    GetStatus,
    /// Shares its reply letter with [`DispenserCommand::GetStatus`]. While
    /// both are pending an `s e` error status resolves this query, since
    /// exact signatures win over wildcards.
    GetErrorCode,
    Dispense(DispenseCount),
    CheckConnection,
}

impl DispenserCommand {
    #[must_use]
    pub fn name(&self) -> &'static str {
        match self {
            DispenserCommand::Reset => "Reset Device",
            DispenserCommand::Disable => "Disable Dispenser",
            DispenserCommand::Enable => "Enable Dispenser",
            DispenserCommand::ClearDispensedCount => "Clear Dispensed Count",
            DispenserCommand::GetTotalCount => "Get Total Dispensed Count",
            DispenserCommand::ClearTotalCount => "Clear Total Dispensed Count",
            DispenserCommand::GetStatus => "Get Status",
            DispenserCommand::GetErrorCode => "Get Error Code",
            DispenserCommand::Dispense(_) => "Dispense Bills",
            DispenserCommand::CheckConnection => "Check Connection",
        }
    }

    #[must_use]
    pub fn spec(&self, dialect: Dialect) -> CommandSpec {
        let l = |c: u8| dialect.letter(c);
        let name = self.name();
        match *self {
            DispenserCommand::Reset => CommandSpec::new(
                name,
                Packet::new(l(b'I'), 0x00, 0x00),
                Signature::any_second(l(b'i')),
            )
            .expect_data(l(b'a')),
            DispenserCommand::Disable => CommandSpec::new(
                name,
                Packet::new(l(b'H'), 0x00, 0x00),
                Signature::any_second(l(b'h')),
            )
            .expect_data(l(b'a')),
            DispenserCommand::Enable => CommandSpec::new(
                name,
                Packet::new(l(b'H'), l(b'C'), b'?'),
                Signature::exact(l(b'h'), l(b'c')),
            )
            .expect_data(b'!'),
            DispenserCommand::ClearDispensedCount => CommandSpec::new(
                name,
                Packet::new(l(b'R'), l(b'E'), l(b'M')),
                Signature::any_second(l(b'r')),
            )
            .expect_data(l(b'o')),
            DispenserCommand::GetTotalCount => CommandSpec::new(
                name,
                Packet::new(l(b'G'), l(b'T'), b'?'),
                Signature::any_second(l(b't')),
            )
            .follow_on(Signature::any_second(l(b'g')))
            .timeout_ms(TOTAL_COUNT_TIMEOUT_MS),
            DispenserCommand::ClearTotalCount => CommandSpec::new(
                name,
                Packet::new(l(b'C'), l(b'T'), l(b'C')),
                Signature::exact(l(b'c'), l(b't')),
            )
            .expect_data(b'!'),
            DispenserCommand::GetStatus => CommandSpec::new(
                name,
                Packet::new(l(b'S'), 0x00, 0x00),
                Signature::any_second(l(b's')),
            ),
            DispenserCommand::GetErrorCode => CommandSpec::new(
                name,
                Packet::new(l(b'S'), l(b'E'), l(b'R')),
                Signature::exact(l(b's'), l(b'e')),
            ),
            DispenserCommand::Dispense(count) => CommandSpec::new(
                name,
                Packet::new(b'D', b'S', count.as_u8()),
                Signature::exact(b'd', b'a'),
            )
            .expect_data(count.as_u8())
            .timeout_ms(DISPENSE_TIMEOUT_MS),
            DispenserCommand::CheckConnection => CommandSpec::new(
                name,
                Packet::new(b'H', b'I', b'?'),
                Signature::exact(b'm', b'e'),
            )
            .expect_data(b'!')
            .timeout_ms(TOTAL_COUNT_TIMEOUT_MS),
        }
    }
}
