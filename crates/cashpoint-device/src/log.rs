//! Bounded diagnostics logs kept per session.
//!
//! These exist for support and troubleshooting only; nothing reads them for
//! control flow.

use std::collections::VecDeque;
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use serde::Serialize;

use cashpoint_protocol::hex;

/// One command exchange.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CommandLogEntry {
    pub command: String,
    pub tx: Vec<u8>,
    pub rx: Vec<u8>,
    pub timestamp: DateTime<Utc>,
    pub error: Option<String>,
}

impl CommandLogEntry {
    /// Outgoing bytes as hex.
    pub fn tx_hex(&self) -> String {
        hex(&self.tx)
    }

    /// Incoming bytes as hex.
    pub fn rx_hex(&self) -> String {
        hex(&self.rx)
    }
}

/// One connection lifecycle event (open, close, event received, ...).
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ConnectionLogEntry {
    pub event: String,
    pub details: String,
    pub timestamp: DateTime<Utc>,
}

/// Command and connection rings, each holding the latest `capacity` entries.
#[derive(Debug)]
pub struct DiagnosticLog {
    capacity: usize,
    commands: Mutex<VecDeque<CommandLogEntry>>,
    connections: Mutex<VecDeque<ConnectionLogEntry>>,
}

impl DiagnosticLog {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            commands: Mutex::new(VecDeque::new()),
            connections: Mutex::new(VecDeque::new()),
        }
    }

    pub fn record_command(
        &self,
        command: impl Into<String>,
        tx: &[u8],
        rx: &[u8],
        error: Option<String>,
    ) {
        let entry = CommandLogEntry {
            command: command.into(),
            tx: tx.to_vec(),
            rx: rx.to_vec(),
            timestamp: Utc::now(),
            error,
        };
        push_bounded(&self.commands, entry, self.capacity);
    }

    pub fn record_connection(&self, event: impl Into<String>, details: impl Into<String>) {
        let entry = ConnectionLogEntry {
            event: event.into(),
            details: details.into(),
            timestamp: Utc::now(),
        };
        push_bounded(&self.connections, entry, self.capacity);
    }

    /// Snapshot of the command log, oldest first.
    pub fn commands(&self) -> Vec<CommandLogEntry> {
        lock(&self.commands).iter().cloned().collect()
    }

    /// Snapshot of the connection log, oldest first.
    pub fn connections(&self) -> Vec<ConnectionLogEntry> {
        lock(&self.connections).iter().cloned().collect()
    }

    pub fn clear_commands(&self) {
        lock(&self.commands).clear();
    }

    pub fn clear_connections(&self) {
        lock(&self.connections).clear();
    }
}

fn push_bounded<T>(ring: &Mutex<VecDeque<T>>, entry: T, capacity: usize) {
    let mut ring = lock(ring);
    while ring.len() >= capacity {
        ring.pop_front();
    }
    ring.push_back(entry);
}

// A poisoned diagnostics ring is still usable; the data is append-only.
fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ring_drops_oldest() {
        let log = DiagnosticLog::new(3);
        for i in 0..5u8 {
            log.record_command(format!("cmd{i}"), &[i], &[], None);
        }

        let names: Vec<String> = log.commands().into_iter().map(|e| e.command).collect();
        assert_eq!(names, vec!["cmd2", "cmd3", "cmd4"]);
    }

    #[test]
    fn test_hex_rendering() {
        let log = DiagnosticLog::new(8);
        log.record_command(
            "Enable Acceptance",
            &[0x24, 0x53, 0x41, 0x0D, 0xA1],
            &[0x24, 0x4F, 0x4B, 0x61, 0xFB],
            None,
        );

        let entry = &log.commands()[0];
        assert_eq!(entry.tx_hex(), "24 53 41 0d a1");
        assert_eq!(entry.rx_hex(), "24 4f 4b 61 fb");
    }

    #[test]
    fn test_clear_is_per_ring() {
        let log = DiagnosticLog::new(8);
        log.record_command("Get Status", &[], &[], Some("timeout".into()));
        log.record_connection("CONNECTED", "/dev/ttyUSB0");

        log.clear_commands();
        assert!(log.commands().is_empty());
        assert_eq!(log.connections().len(), 1);

        log.clear_connections();
        assert!(log.connections().is_empty());
    }
}
