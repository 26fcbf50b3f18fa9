//! Simulated bill acceptor.
//!
//! Answers the acceptor command set from an in-memory device state and can
//! push `E S` events on demand, including a full bill insertion sequence.
//!
//! ```
//! use cashpoint_device::mock::MockAcceptor;
//! use cashpoint_device::{AcceptorSettings, BillAcceptor};
//! use cashpoint_core::Denomination;
//! use std::time::Duration;
//!
//! #[tokio::main]
//! async fn main() -> cashpoint_device::Result<()> {
//!     let (transport, handle) = MockAcceptor::start();
//!     let settings = AcceptorSettings::default().init_delay(Duration::ZERO);
//!     let mut acceptor = BillAcceptor::new(settings);
//!     acceptor.connect_with(transport).await?;
//!
//!     assert!(acceptor.enable_acceptance().await.is_ok());
//!     handle.set_bill(Denomination::Won5000);
//!     assert_eq!(acceptor.get_bill_data().await.ok(), Some(5));
//!     Ok(())
//! }
//! ```

use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use tokio::sync::mpsc;

use cashpoint_core::Denomination;
use cashpoint_protocol::{AcceptorStatus, Packet};

use crate::transport::Transport;

/// Pause between the events of a simulated bill insertion.
const INSERTION_STEP: Duration = Duration::from_millis(100);

#[derive(Debug)]
struct DeviceState {
    status: u8,
    bill_code: u8,
    config: u8,
    error_code: u8,
    version: (u8, u8),
    enabled: bool,
    silent: bool,
    ignore_enable: bool,
    drop_enable: bool,
    enable_requests: usize,
    acks: Vec<u8>,
    received: Vec<Packet>,
}

impl Default for DeviceState {
    fn default() -> Self {
        Self {
            status: AcceptorStatus::Wait.code(),
            bill_code: 0,
            // All denominations, Event TX.
            config: 0x2F,
            error_code: 0,
            version: (1, 0),
            enabled: false,
            silent: false,
            ignore_enable: false,
            drop_enable: false,
            enable_requests: 0,
            acks: Vec::new(),
            received: Vec::new(),
        }
    }
}

impl DeviceState {
    fn respond(&mut self, request: Packet) -> Vec<Packet> {
        self.received.push(request);
        let ok = |data| vec![Packet::new(b'O', b'K', data)];

        match (request.cmd1(), request.cmd2(), request.data()) {
            (b'e', b's', code) => {
                self.acks.push(code);
                Vec::new()
            }
            _ if self.silent => Vec::new(),
            (b'S', b'A', 0x0D) => {
                self.enable_requests += 1;
                if self.drop_enable {
                    return Vec::new();
                }
                self.enabled = true;
                self.status = AcceptorStatus::StartWait.code();
                if self.ignore_enable { Vec::new() } else { ok(b'a') }
            }
            (b'S', b'A', 0x0E) => {
                let was_enabled = std::mem::replace(&mut self.enabled, false);
                self.status = AcceptorStatus::Wait.code();
                if was_enabled {
                    ok(b'a')
                } else {
                    vec![Packet::new(b'N', b'G', b'a')]
                }
            }
            (b'S', b'A', 0x09) => {
                self.status = AcceptorStatus::StackEnd.code();
                ok(b'a')
            }
            (b'S', b'A', 0x06) => {
                self.status = AcceptorStatus::ReturnEnd.code();
                ok(b'a')
            }
            (b'G', b'A', b'?') => vec![Packet::new(b'g', b'a', self.status)],
            (b'G', b'B', b'?') => vec![Packet::new(b'g', b'b', self.bill_code)],
            (b'G', b'C', b'?') => vec![Packet::new(b'g', b'c', self.config)],
            (b'S', b'C', config) => {
                self.config = config;
                ok(b'c')
            }
            (b'G', b'E', b'?') => vec![Packet::new(b'g', b'e', self.error_code)],
            (b'G', b'V', b'?') => vec![Packet::new(b'v', self.version.0, self.version.1)],
            (b'R', b'S', b'T') => {
                self.enabled = false;
                self.status = AcceptorStatus::Wait.code();
                ok(b'a')
            }
            (b'H', b'i', b'?') => vec![Packet::new(b'm', b'e', b'!')],
            _ => Vec::new(),
        }
    }
}

/// Simulated acceptor factory.
#[derive(Debug)]
pub struct MockAcceptor;

impl MockAcceptor {
    /// Start a simulator; returns the host-side transport and a control handle.
    pub fn start() -> (Transport, MockAcceptorHandle) {
        let state = Arc::new(Mutex::new(DeviceState::default()));
        let device = Arc::clone(&state);
        let (transport, events) =
            super::spawn_device("mock-acceptor", move |request| lock(&device).respond(request));

        (transport, MockAcceptorHandle { state, events })
    }
}

/// Controls a running [`MockAcceptor`].
#[derive(Debug, Clone)]
pub struct MockAcceptorHandle {
    state: Arc<Mutex<DeviceState>>,
    events: mpsc::Sender<Packet>,
}

impl MockAcceptorHandle {
    /// Push an `E S <code>` event and make `code` the reported status.
    pub async fn push_event(&self, code: u8) {
        self.state().status = code;
        // A stopped simulator has nobody left to notify.
        let _ = self.events.send(Packet::new(b'E', b'S', code)).await;
    }

    /// Run a full insertion: recognition, escrow, stacking.
    pub async fn insert_bill(&self, denomination: Denomination) {
        self.set_bill(denomination);
        for status in [
            AcceptorStatus::RecognitionWait,
            AcceptorStatus::RecognitionEnd,
            AcceptorStatus::StackWait,
            AcceptorStatus::StackEnd,
        ] {
            self.push_event(status.code()).await;
            tokio::time::sleep(INSERTION_STEP).await;
        }
    }

    pub fn set_bill(&self, denomination: Denomination) {
        self.state().bill_code = denomination.bill_code();
    }

    /// Report a raw bill code, including codes the host does not know.
    pub fn set_bill_code(&self, code: u8) {
        self.state().bill_code = code;
    }

    pub fn set_status(&self, status: AcceptorStatus) {
        self.state().status = status.code();
    }

    pub fn set_error(&self, code: u8) {
        let mut state = self.state();
        state.error_code = code;
        state.status = AcceptorStatus::ErrorWait.code();
    }

    pub fn set_config(&self, config: u8) {
        self.state().config = config;
    }

    /// Stop answering commands. Event acks are still recorded.
    pub fn set_silent(&self, silent: bool) {
        self.state().silent = silent;
    }

    /// Arm on enable but never answer it, like units that re-arm by themselves.
    pub fn set_ignore_enable(&self, ignore: bool) {
        self.state().ignore_enable = ignore;
    }

    /// Neither answer nor act on enable commands; the device stays disarmed.
    pub fn set_drop_enable(&self, drop: bool) {
        self.state().drop_enable = drop;
    }

    pub fn status(&self) -> u8 {
        self.state().status
    }

    pub fn config(&self) -> u8 {
        self.state().config
    }

    pub fn is_enabled(&self) -> bool {
        self.state().enabled
    }

    /// Number of enable commands received.
    pub fn enable_requests(&self) -> usize {
        self.state().enable_requests
    }

    /// Event codes acknowledged by the host, in order.
    pub fn acks(&self) -> Vec<u8> {
        self.state().acks.clone()
    }

    /// Every packet received from the host.
    pub fn received(&self) -> Vec<Packet> {
        self.state().received.clone()
    }

    fn state(&self) -> MutexGuard<'_, DeviceState> {
        lock(&self.state)
    }
}

fn lock(state: &Mutex<DeviceState>) -> MutexGuard<'_, DeviceState> {
    state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}
