//! Typed view over the acceptor configuration byte (`G C ?` / `S C cfg`).
//!
//! The bit assignments come from field observation and have not been checked
//! against a device manual. Unknown bits are preserved untouched so a
//! read-modify-write never clears something this table does not know about.

use std::fmt;

use cashpoint_core::Denomination;
use serde::Serialize;

pub const ACCEPT_1000: u8 = 0x01;
pub const ACCEPT_5000: u8 = 0x02;
pub const ACCEPT_10000: u8 = 0x04;
pub const ACCEPT_50000: u8 = 0x08;
pub const AUTO_STACK: u8 = 0x10;
/// Device pushes `E S` event packets on its own.
pub const EVENT_TX: u8 = 0x20;

/// Acceptor configuration byte.
///
/// ```
/// use cashpoint_core::Denomination;
/// use cashpoint_protocol::AcceptorConfig;
///
/// let config = AcceptorConfig::from_byte(0x25);
/// assert!(config.event_tx());
/// assert!(config.accepts(Denomination::Won1000));
/// assert!(config.accepts(Denomination::Won10000));
/// assert!(!config.accepts(Denomination::Won5000));
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct AcceptorConfig(u8);

impl AcceptorConfig {
    #[must_use]
    pub const fn from_byte(byte: u8) -> Self {
        AcceptorConfig(byte)
    }

    #[must_use]
    pub const fn as_byte(self) -> u8 {
        self.0
    }

    #[must_use]
    pub fn accepts(self, denomination: Denomination) -> bool {
        self.0 & denomination_mask(denomination) != 0
    }

    #[must_use]
    pub fn with_denomination(self, denomination: Denomination, accept: bool) -> Self {
        self.with_bit(denomination_mask(denomination), accept)
    }

    #[must_use]
    pub fn auto_stack(self) -> bool {
        self.0 & AUTO_STACK != 0
    }

    #[must_use]
    pub fn with_auto_stack(self, on: bool) -> Self {
        self.with_bit(AUTO_STACK, on)
    }

    #[must_use]
    pub fn event_tx(self) -> bool {
        self.0 & EVENT_TX != 0
    }

    #[must_use]
    pub fn with_event_tx(self, on: bool) -> Self {
        self.with_bit(EVENT_TX, on)
    }

    fn with_bit(self, mask: u8, on: bool) -> Self {
        if on {
            AcceptorConfig(self.0 | mask)
        } else {
            AcceptorConfig(self.0 & !mask)
        }
    }
}

fn denomination_mask(denomination: Denomination) -> u8 {
    match denomination {
        Denomination::Won1000 => ACCEPT_1000,
        Denomination::Won5000 => ACCEPT_5000,
        Denomination::Won10000 => ACCEPT_10000,
        Denomination::Won50000 => ACCEPT_50000,
    }
}

impl fmt::Display for AcceptorConfig {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let accepted: Vec<String> = [
            Denomination::Won1000,
            Denomination::Won5000,
            Denomination::Won10000,
            Denomination::Won50000,
        ]
        .into_iter()
        .filter(|d| self.accepts(*d))
        .map(|d| d.amount().to_string())
        .collect();

        write!(
            f,
            "0x{:02x} accept=[{}] auto_stack={} event_tx={}",
            self.0,
            accepted.join(","),
            self.auto_stack(),
            self.event_tx()
        )
    }
}
