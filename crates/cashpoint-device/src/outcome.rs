//! Tagged result of a device command.

use std::fmt;

/// Result of a single command exchange with a peripheral.
///
/// Timeouts and device nacks are ordinary outcomes on a serial link, so they
/// are values here rather than errors. Callers that only care about success
/// can collapse an outcome with [`Outcome::ok`] or [`Outcome::is_ok`].
///
/// ```
/// use cashpoint_device::Outcome;
///
/// let reply: Outcome<u8> = Outcome::Ok(10);
/// assert_eq!(reply.ok(), Some(10));
///
/// let lost: Outcome<u32> = Outcome::Timeout;
/// assert!(!lost.is_ok());
/// assert_eq!(lost.map(|v| v * 1000).ok(), None);
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[must_use]
pub enum Outcome<T> {
    /// The device answered with the expected reply.
    Ok(T),

    /// No matching reply within the retry budget, or a reply that did not
    /// match the expected pattern.
    Timeout,

    /// The device answered with a negative reply carrying this code.
    DeviceError(u8),

    /// The session closed before or while the command ran.
    TransportClosed,
}

impl<T> Outcome<T> {
    pub fn is_ok(&self) -> bool {
        matches!(self, Outcome::Ok(_))
    }

    pub fn ok(self) -> Option<T> {
        match self {
            Outcome::Ok(value) => Some(value),
            _ => None,
        }
    }

    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> Outcome<U> {
        match self {
            Outcome::Ok(value) => Outcome::Ok(f(value)),
            Outcome::Timeout => Outcome::Timeout,
            Outcome::DeviceError(code) => Outcome::DeviceError(code),
            Outcome::TransportClosed => Outcome::TransportClosed,
        }
    }

    pub fn and_then<U>(self, f: impl FnOnce(T) -> Outcome<U>) -> Outcome<U> {
        match self {
            Outcome::Ok(value) => f(value),
            Outcome::Timeout => Outcome::Timeout,
            Outcome::DeviceError(code) => Outcome::DeviceError(code),
            Outcome::TransportClosed => Outcome::TransportClosed,
        }
    }

    /// Drop the payload, keeping only success or the failure kind.
    pub fn discard(self) -> Outcome<()> {
        self.map(|_| ())
    }
}

impl<T: fmt::Display> fmt::Display for Outcome<T> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Outcome::Ok(value) => write!(f, "ok: {value}"),
            Outcome::Timeout => write!(f, "timeout"),
            Outcome::DeviceError(code) => write!(f, "device error 0x{code:02x}"),
            Outcome::TransportClosed => write!(f, "transport closed"),
        }
    }
}
