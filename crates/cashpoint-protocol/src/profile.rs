//! Declarative per-peripheral packet classification.
//!
//! The engine evaluates one profile per packet: event signatures win over
//! any pending request, everything else is a response candidate. A fallback
//! route lets a packet complete a request registered under another
//! signature, e.g. an `N G` nack answering a command that waits for `O K`.

use crate::packet::{Packet, Signature};

/// How the engine treats an inbound packet.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PacketClass {
    /// Unsolicited device event; acknowledged and dispatched, never correlated.
    Event,
    /// Candidate reply for a pending request.
    Response,
}

/// Packet routing rule for one peripheral.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PeripheralProfile {
    /// Name used in log fields.
    pub name: &'static str,

    /// Signatures that mark a packet as an unsolicited event.
    pub events: &'static [Signature],

    /// Command letters of the acknowledgment echoed back for each event.
    pub ack: Option<(u8, u8)>,

    /// `(incoming, pending)`: a packet matching `incoming` with no request of
    /// its own completes the request registered under `pending`.
    pub fallbacks: &'static [(Signature, Signature)],
}

impl PeripheralProfile {
    #[must_use]
    pub fn classify(&self, packet: &Packet) -> PacketClass {
        if self.events.iter().any(|sig| sig.matches(packet)) {
            PacketClass::Event
        } else {
            PacketClass::Response
        }
    }

    /// Acknowledgment for an event, echoing its data byte.
    ///
    /// ```
    /// use cashpoint_protocol::{ACCEPTOR_PROFILE, Packet};
    ///
    /// let event = Packet::new(b'E', b'S', 0x0B);
    /// assert_eq!(ACCEPTOR_PROFILE.ack_for(&event), Some(Packet::new(b'e', b's', 0x0B)));
    /// ```
    #[must_use]
    pub fn ack_for(&self, event: &Packet) -> Option<Packet> {
        self.ack
            .map(|(cmd1, cmd2)| Packet::new(cmd1, cmd2, event.data()))
    }

    /// Alternative pending signature this packet may complete.
    #[must_use]
    pub fn fallback_for(&self, packet: &Packet) -> Option<Signature> {
        self.fallbacks
            .iter()
            .find(|(incoming, _)| incoming.matches(packet))
            .map(|(_, pending)| *pending)
    }
}

/// Bill acceptor: pushes `E S <code>` events and expects `e s <code>` back.
pub const ACCEPTOR_PROFILE: PeripheralProfile = PeripheralProfile {
    name: "bill-acceptor",
    events: &[Signature::exact(b'E', b'S')],
    ack: Some((b'e', b's')),
    fallbacks: &[(Signature::exact(b'N', b'G'), Signature::exact(b'O', b'K'))],
};

/// Bill dispenser: no push events, status is always polled.
pub const DISPENSER_PROFILE: PeripheralProfile = PeripheralProfile {
    name: "bill-dispenser",
    events: &[],
    ack: None,
    fallbacks: &[],
};

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_acceptor_event_classification() {
        assert_eq!(
            ACCEPTOR_PROFILE.classify(&Packet::new(b'E', b'S', 0x05)),
            PacketClass::Event
        );
        assert_eq!(
            ACCEPTOR_PROFILE.classify(&Packet::new(b'O', b'K', b'a')),
            PacketClass::Response
        );
        assert_eq!(
            ACCEPTOR_PROFILE.classify(&Packet::new(b'e', b's', 0x05)),
            PacketClass::Response
        );
    }

    #[test]
    fn test_dispenser_has_no_events() {
        let status = Packet::new(b's', b't', b'b');
        assert_eq!(DISPENSER_PROFILE.classify(&status), PacketClass::Response);
        assert_eq!(DISPENSER_PROFILE.ack_for(&status), None);
    }

    #[test]
    fn test_nack_falls_back_to_ok() {
        let nack = Packet::new(b'N', b'G', b'a');
        assert_eq!(
            ACCEPTOR_PROFILE.fallback_for(&nack),
            Some(Signature::exact(b'O', b'K'))
        );
        assert_eq!(
            ACCEPTOR_PROFILE.fallback_for(&Packet::new(b'g', b'a', 1)),
            None
        );
        assert_eq!(DISPENSER_PROFILE.fallback_for(&nack), None);
    }
}
