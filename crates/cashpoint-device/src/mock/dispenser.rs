//! Simulated bill dispenser.
//!
//! The simulator only understands commands in its own dialect; a command
//! sent in the other casing goes unanswered, as on a real unit with the
//! DIP switch set the other way.

use std::sync::{Arc, Mutex, MutexGuard};

use tokio::sync::mpsc;

use cashpoint_core::Dialect;
use cashpoint_protocol::{DispenserStatus, Packet};

use crate::transport::Transport;

#[derive(Debug)]
struct DeviceState {
    dialect: Dialect,
    status: DispenserStatus,
    total: u32,
    stock: u32,
    error_code: u8,
    disabled: bool,
    received: Vec<Packet>,
}

impl Default for DeviceState {
    fn default() -> Self {
        Self {
            dialect: Dialect::Old,
            status: DispenserStatus::Idle,
            total: 0,
            stock: 1_000,
            error_code: 0,
            disabled: false,
            received: Vec::new(),
        }
    }
}

impl DeviceState {
    fn respond(&mut self, request: Packet) -> Vec<Packet> {
        self.received.push(request);
        let dialect = self.dialect;
        let l = |c: u8| dialect.letter(c);
        let (cmd1, cmd2, data) = (request.cmd1(), request.cmd2(), request.data());

        if (cmd1, cmd2, data) == (b'H', b'I', b'?') {
            return vec![Packet::new(b'm', b'e', b'!')];
        }
        if (cmd1, cmd2) == (b'D', b'S') {
            return self.dispense(data);
        }

        if (cmd1, cmd2, data) == (l(b'I'), 0x00, 0x00) {
            self.disabled = false;
            self.status = DispenserStatus::Idle;
            vec![Packet::new(l(b'i'), 0x00, l(b'a'))]
        } else if (cmd1, cmd2, data) == (l(b'H'), 0x00, 0x00) {
            self.disabled = true;
            self.status = DispenserStatus::Disabled;
            vec![Packet::new(l(b'h'), 0x00, l(b'a'))]
        } else if (cmd1, cmd2, data) == (l(b'H'), l(b'C'), b'?') {
            self.disabled = false;
            self.status = DispenserStatus::Idle;
            vec![Packet::new(l(b'h'), l(b'c'), b'!')]
        } else if (cmd1, cmd2, data) == (l(b'R'), l(b'E'), l(b'M')) {
            self.status = DispenserStatus::Idle;
            vec![Packet::new(l(b'r'), 0x00, l(b'o'))]
        } else if (cmd1, cmd2, data) == (l(b'G'), l(b'T'), b'?') {
            let [b0, b1, b2, b3] = self.total.to_be_bytes();
            vec![Packet::new(l(b't'), b0, b1), Packet::new(l(b'g'), b2, b3)]
        } else if (cmd1, cmd2, data) == (l(b'C'), l(b'T'), l(b'C')) {
            self.total = 0;
            vec![Packet::new(l(b'c'), l(b't'), b'!')]
        } else if (cmd1, cmd2, data) == (l(b'S'), 0x00, 0x00) {
            vec![status_reply(dialect, self.status)]
        } else if (cmd1, cmd2, data) == (l(b'S'), l(b'E'), l(b'R')) {
            vec![Packet::new(l(b's'), l(b'e'), self.error_code)]
        } else {
            Vec::new()
        }
    }

    fn dispense(&mut self, count: u8) -> Vec<Packet> {
        if self.disabled {
            return Vec::new();
        }

        let requested = u32::from(count);
        if self.stock == 0 {
            self.error_code = 0x81;
            self.status = DispenserStatus::Error(0x81);
            return Vec::new();
        }
        if requested > self.stock {
            // Ran out part way: pay out what is left, then report empty.
            let paid = u8::try_from(self.stock).unwrap_or(u8::MAX);
            self.stock = 0;
            self.total += u32::from(paid);
            self.error_code = 0x81;
            self.status = DispenserStatus::Aborted(paid);
            return Vec::new();
        }

        self.stock -= requested;
        self.total += requested;
        self.status = DispenserStatus::Completed(count);
        vec![Packet::new(b'd', b'a', count)]
    }
}

/// Encode `status` the way the device reports it.
fn status_reply(dialect: Dialect, status: DispenserStatus) -> Packet {
    let (code, value) = match status {
        DispenserStatus::Idle => (b't', b'b'),
        DispenserStatus::Dispensing => (b'o', b'n'),
        DispenserStatus::Disabled => (b'h', b'!'),
        DispenserStatus::Completed(n) => (b'o', n),
        DispenserStatus::Aborted(n) => (b'n', n),
        DispenserStatus::Error(code) => (b'e', code),
    };
    Packet::new(dialect.letter(b's'), dialect.letter(code), value)
}

/// Simulated dispenser factory.
#[derive(Debug)]
pub struct MockDispenser;

impl MockDispenser {
    /// Start a simulator answering in `dialect`.
    pub fn start(dialect: Dialect) -> (Transport, MockDispenserHandle) {
        let state = Arc::new(Mutex::new(DeviceState {
            dialect,
            ..Default::default()
        }));
        let device = Arc::clone(&state);
        let (transport, unsolicited) =
            super::spawn_device("mock-dispenser", move |request| lock(&device).respond(request));

        (transport, MockDispenserHandle { state, unsolicited })
    }
}

/// Controls a running [`MockDispenser`].
#[derive(Debug, Clone)]
pub struct MockDispenserHandle {
    state: Arc<Mutex<DeviceState>>,
    unsolicited: mpsc::Sender<Packet>,
}

impl MockDispenserHandle {
    /// Send a status packet nobody asked for.
    pub async fn push_status(&self, status: DispenserStatus) {
        let packet = {
            let mut state = self.state();
            state.status = status;
            status_reply(state.dialect, status)
        };
        // A stopped simulator has nobody left to notify.
        let _ = self.unsolicited.send(packet).await;
    }

    pub fn set_dialect(&self, dialect: Dialect) {
        self.state().dialect = dialect;
    }

    pub fn set_total(&self, total: u32) {
        self.state().total = total;
    }

    pub fn total(&self) -> u32 {
        self.state().total
    }

    /// Bills left in the cassette.
    pub fn set_stock(&self, stock: u32) {
        self.state().stock = stock;
    }

    pub fn set_status(&self, status: DispenserStatus) {
        self.state().status = status;
    }

    pub fn set_error(&self, code: u8) {
        let mut state = self.state();
        state.error_code = code;
        state.status = DispenserStatus::Error(code);
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
