use crate::{
    Result,
    constants::{MAX_DISPENSE_COUNT, MIN_DISPENSE_COUNT},
    error::Error,
};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Dispenser command dialect, selected on the device by DIP switch 3.
///
/// The two dialects use the same command letters with opposite casing:
/// the old dialect sends upper-case commands and receives lower-case
/// replies, the new dialect does the reverse. A session must use one
/// dialect for every command it sends.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Dialect {
    /// DIP SW3 off (factory default).
    #[default]
    Old,

    /// DIP SW3 on.
    New,
}

impl Dialect {
    /// Map a dialect from the `isOld` flag used by operator tooling.
    #[must_use]
    pub fn from_is_old(is_old: bool) -> Self {
        if is_old { Dialect::Old } else { Dialect::New }
    }

    /// Render a command letter, written in old-dialect casing, for this dialect.
    ///
    /// Non-letters pass through unchanged.
    ///
    /// ```
    /// use cashpoint_core::Dialect;
    ///
    /// assert_eq!(Dialect::Old.letter(b'G'), b'G');
    /// assert_eq!(Dialect::New.letter(b'G'), b'g');
    /// assert_eq!(Dialect::New.letter(b't'), b'T');
    /// assert_eq!(Dialect::New.letter(b'?'), b'?');
    /// ```
    #[must_use]
    pub fn letter(self, old_casing: u8) -> u8 {
        match self {
            Dialect::Old => old_casing,
            Dialect::New if old_casing.is_ascii_uppercase() => old_casing.to_ascii_lowercase(),
            Dialect::New if old_casing.is_ascii_lowercase() => old_casing.to_ascii_uppercase(),
            Dialect::New => old_casing,
        }
    }

    #[must_use]
    pub fn is_old(self) -> bool {
        matches!(self, Dialect::Old)
    }
}

impl fmt::Display for Dialect {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Dialect::Old => write!(f, "old (DIP SW3 off)"),
            Dialect::New => write!(f, "new (DIP SW3 on)"),
        }
    }
}

/// Bank note accepted by the bill acceptor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Denomination {
    Won1000,
    Won5000,
    Won10000,
    Won50000,
}

impl Denomination {
    /// Decode the bill code returned by the acceptor's bill data query.
    ///
    /// # Errors
    /// Returns `Error::UnknownDenomination` for any code other than 1, 5, 10 or 50.
    pub fn from_bill_code(code: u8) -> Result<Self> {
        match code {
            1 => Ok(Denomination::Won1000),
            5 => Ok(Denomination::Won5000),
            10 => Ok(Denomination::Won10000),
            50 => Ok(Denomination::Won50000),
            other => Err(Error::UnknownDenomination(other)),
        }
    }

    /// Face value in won.
    #[must_use]
    pub fn amount(self) -> u32 {
        match self {
            Denomination::Won1000 => 1_000,
            Denomination::Won5000 => 5_000,
            Denomination::Won10000 => 10_000,
            Denomination::Won50000 => 50_000,
        }
    }

    /// The bill code the device reports for this note.
    #[must_use]
    pub fn bill_code(self) -> u8 {
        match self {
            Denomination::Won1000 => 1,
            Denomination::Won5000 => 5,
            Denomination::Won10000 => 10,
            Denomination::Won50000 => 50,
        }
    }
}

impl fmt::Display for Denomination {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{} KRW", self.amount())
    }
}

/// Number of bills for a single dispense command (1-250).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DispenseCount(u8);

impl DispenseCount {
    /// Create a validated dispense count.
    ///
    /// # Errors
    /// Returns `Error::InvalidDispenseCount` outside 1-250.
    pub fn new(count: u32) -> Result<Self> {
        match u8::try_from(count) {
            Ok(n) if (MIN_DISPENSE_COUNT..=MAX_DISPENSE_COUNT).contains(&n) => Ok(DispenseCount(n)),
            _ => Err(Error::InvalidDispenseCount(count)),
        }
    }

    #[must_use]
    pub fn as_u8(&self) -> u8 {
        self.0
    }
}

impl fmt::Display for DispenseCount {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}
