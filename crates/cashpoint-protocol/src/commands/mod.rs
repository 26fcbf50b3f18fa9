//! Command tables for both peripherals.
//!
//! Every operation is described by a [`CommandSpec`]: the packet to send, the
//! signature of the reply it waits for, and the data byte a positive reply
//! carries. The runtime only needs this description to drive a command; the
//! interpretation of typed results stays with each façade.

mod acceptor;
mod dispenser;

pub use acceptor::AcceptorCommand;
pub use dispenser::DispenserCommand;

use std::time::Duration;

use crate::packet::{Packet, Signature};

/// Wire description of a single request/response exchange.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CommandSpec {
    /// Human readable name used in logs and the command log.
    pub name: &'static str,

    /// Packet written to the device.
    pub request: Packet,

    /// Signature of the reply that completes the exchange.
    pub expect: Signature,

    /// Data byte a positive reply must carry, if the command checks it.
    pub expect_data: Option<u8>,

    /// Second reply that arrives without another send.
    pub follow_on: Option<Signature>,

    /// Per-attempt timeout overriding the engine default.
    pub timeout: Option<Duration>,
}

impl CommandSpec {
    pub(crate) const fn new(name: &'static str, request: Packet, expect: Signature) -> Self {
        Self {
            name,
            request,
            expect,
            expect_data: None,
            follow_on: None,
            timeout: None,
        }
    }

    pub(crate) const fn expect_data(mut self, data: u8) -> Self {
        self.expect_data = Some(data);
        self
    }

    pub(crate) const fn follow_on(mut self, signature: Signature) -> Self {
        self.follow_on = Some(signature);
        self
    }

    pub(crate) const fn timeout_ms(mut self, millis: u64) -> Self {
        self.timeout = Some(Duration::from_millis(millis));
        self
    }

    /// Check a reply's data byte against [`CommandSpec::expect_data`].
    ///
    /// Commands that do not check the data byte accept any reply.
    #[must_use]
    pub fn is_positive(&self, reply: &Packet) -> bool {
        self.expect_data.is_none_or(|data| reply.data() == data)
    }
}
