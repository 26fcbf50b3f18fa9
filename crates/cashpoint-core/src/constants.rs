//! Core constants for the cash peripheral wire protocol.
//!
//! Both the bill acceptor and the bill dispenser speak the same fixed-size
//! packet protocol over RS-232. Every frame is exactly five bytes:
//!
//! ```text
//! STX   CMD1  CMD2  DATA  CHK
//! 0x24  'S'   'A'   0x0D  0xA1
//! ```
//!
//! Where:
//! - `STX` - Start marker, always `$` (0x24)
//! - `CMD1`/`CMD2` - Two command letters (ASCII)
//! - `DATA` - One argument or result byte
//! - `CHK` - `(CMD1 + CMD2 + DATA) mod 256`
//!
//! The start marker is not escaped, so a `0x24` may legitimately appear in
//! `CMD1..CHK`. The framer handles that with its one-byte resync rule.
//!
//! # Usage
//!
//! ```
//! use cashpoint_core::constants::*;
//!
//! assert_eq!(PACKET_LEN, 5);
//! assert_eq!(START_BYTE, b'$');
//!
//! use std::time::Duration;
//! let timeout = Duration::from_millis(DEFAULT_RESPONSE_TIMEOUT_MS);
//! ```

// ============================================================================
// Packet Framing
// ============================================================================

/// Start of packet marker (STX).
///
/// ```text
/// $ S A <0x0D> <CHK>
/// ^
/// Start marker
/// ```
pub const START_BYTE: u8 = 0x24; // '$'

/// Fixed length of every packet, start marker and checksum included.
pub const PACKET_LEN: usize = 5;

/// Index of the first command letter inside a packet.
pub const CMD1_INDEX: usize = 1;

/// Index of the second command letter inside a packet.
pub const CMD2_INDEX: usize = 2;

/// Index of the data byte inside a packet.
pub const DATA_INDEX: usize = 3;

/// Index of the checksum byte inside a packet.
pub const CHECKSUM_INDEX: usize = 4;

// ============================================================================
// Serial Line Settings
// ============================================================================

/// Line speed used by both peripherals (bps).
pub const DEFAULT_BAUD_RATE: u32 = 9_600;

/// Data bits per character.
pub const DEFAULT_DATA_BITS: u8 = 8;

/// Stop bits per character.
pub const DEFAULT_STOP_BITS: u8 = 1;

// ============================================================================
// Timing
// ============================================================================

/// Default per-attempt response timeout (milliseconds).
///
/// The device manual recommends 500 ms.
pub const DEFAULT_RESPONSE_TIMEOUT_MS: u64 = 500;

/// Default number of send attempts (initial send plus four retries).
pub const DEFAULT_MAX_ATTEMPTS: u32 = 5;

/// Pause between a timed-out attempt and the next resend (milliseconds).
pub const DEFAULT_RETRY_BACKOFF_MS: u64 = 100;

/// Reset command timeout (milliseconds).
pub const RESET_TIMEOUT_MS: u64 = 3_000;

/// Settle time after a reset before the acceptor is usable again (milliseconds).
pub const INITIALIZE_SETTLE_MS: u64 = 2_500;

/// Version query timeout (milliseconds).
pub const VERSION_TIMEOUT_MS: u64 = 1_000;

/// Dispense command timeout (milliseconds).
pub const DISPENSE_TIMEOUT_MS: u64 = 5_000;

/// Timeout for each half of the two-packet total count reply (milliseconds).
pub const TOTAL_COUNT_TIMEOUT_MS: u64 = 2_000;

/// Delay after opening the port before the first command (milliseconds).
pub const DEVICE_INIT_DELAY_MS: u64 = 1_000;

/// Window in which a repeated event code is treated as a duplicate (milliseconds).
pub const EVENT_DEDUP_WINDOW_MS: u64 = 500;

/// Quiet time after acknowledging an event (milliseconds).
pub const EVENT_SETTLE_MS: u64 = 50;

/// Longest a send waits for the event busy window to clear (milliseconds).
pub const BUSY_WAIT_LIMIT_MS: u64 = 500;

/// Poll slice used while waiting for the busy window (milliseconds).
pub const BUSY_WAIT_SLICE_MS: u64 = 50;

/// An event seen this recently proves the link is alive without probing (milliseconds).
pub const EVENT_LIVENESS_MS: u64 = 5_000;

/// An event seen this recently still proves the link alive after a failed probe (milliseconds).
pub const EVENT_LIVENESS_FALLBACK_MS: u64 = 10_000;

/// Status polling interval used by the polled acceptance flow (milliseconds).
pub const STATUS_POLL_INTERVAL_MS: u64 = 500;

// ============================================================================
// Limits
// ============================================================================

/// Smallest bill count accepted by the dispense command.
pub const MIN_DISPENSE_COUNT: u8 = 1;

/// Largest bill count accepted by the dispense command.
pub const MAX_DISPENSE_COUNT: u8 = 250;

/// Default capacity of each diagnostics ring.
pub const DEFAULT_LOG_CAPACITY: usize = 256;

/// Default depth of the event queue between reader and dispatcher.
pub const DEFAULT_EVENT_QUEUE: usize = 32;
