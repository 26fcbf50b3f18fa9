//! Session settings for both peripherals.
//!
//! Every struct deserializes from TOML with all fields optional; missing
//! fields take the device defaults. Durations are written in milliseconds.

use std::time::Duration;

use cashpoint_core::{Dialect, constants::*};
use serde::{Deserialize, Serialize};

/// Serial line settings. Both devices run 9600 8N1 without flow control.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SerialSettings {
    /// Port path, e.g. `/dev/ttyUSB0` or `COM4`.
    pub path: String,
    pub baud_rate: u32,
    pub data_bits: u8,
    pub stop_bits: u8,
}

impl Default for SerialSettings {
    fn default() -> Self {
        Self {
            path: default_port_path().to_string(),
            baud_rate: DEFAULT_BAUD_RATE,
            data_bits: DEFAULT_DATA_BITS,
            stop_bits: DEFAULT_STOP_BITS,
        }
    }
}

impl SerialSettings {
    pub fn new(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            ..Default::default()
        }
    }

    pub fn baud_rate(mut self, baud_rate: u32) -> Self {
        self.baud_rate = baud_rate;
        self
    }
}

#[cfg(windows)]
fn default_port_path() -> &'static str {
    "COM1"
}

#[cfg(not(windows))]
fn default_port_path() -> &'static str {
    "/dev/ttyUSB0"
}

/// Timing and sizing of the shared protocol engine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Per-attempt wait for a matching reply.
    #[serde(with = "millis")]
    pub response_timeout: Duration,

    /// Send attempts before a command reports a timeout.
    pub max_attempts: u32,

    /// Pause between a timed-out attempt and the resend.
    #[serde(with = "millis")]
    pub retry_backoff: Duration,

    /// Quiet time after an event acknowledgment.
    #[serde(with = "millis")]
    pub event_settle: Duration,

    /// Repeats of the same event code inside this window are dropped.
    #[serde(with = "millis")]
    pub dedup_window: Duration,

    /// Longest a command waits for the event busy window to clear.
    #[serde(with = "millis")]
    pub busy_wait_limit: Duration,

    #[serde(with = "millis")]
    pub busy_wait_slice: Duration,

    /// Capacity of each diagnostics ring.
    pub log_capacity: usize,

    /// Depth of the queue between the reader and the event task.
    pub event_queue: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            response_timeout: Duration::from_millis(DEFAULT_RESPONSE_TIMEOUT_MS),
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            retry_backoff: Duration::from_millis(DEFAULT_RETRY_BACKOFF_MS),
            event_settle: Duration::from_millis(EVENT_SETTLE_MS),
            dedup_window: Duration::from_millis(EVENT_DEDUP_WINDOW_MS),
            busy_wait_limit: Duration::from_millis(BUSY_WAIT_LIMIT_MS),
            busy_wait_slice: Duration::from_millis(BUSY_WAIT_SLICE_MS),
            log_capacity: DEFAULT_LOG_CAPACITY,
            event_queue: DEFAULT_EVENT_QUEUE,
        }
    }
}

impl EngineConfig {
    pub fn response_timeout(mut self, timeout: Duration) -> Self {
        self.response_timeout = timeout;
        self
    }

    pub fn max_attempts(mut self, attempts: u32) -> Self {
        self.max_attempts = attempts;
        self
    }

    pub fn retry_backoff(mut self, backoff: Duration) -> Self {
        self.retry_backoff = backoff;
        self
    }

    pub fn dedup_window(mut self, window: Duration) -> Self {
        self.dedup_window = window;
        self
    }

    pub fn log_capacity(mut self, capacity: usize) -> Self {
        self.log_capacity = capacity;
        self
    }
}

/// Bill acceptor session settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AcceptorSettings {
    pub serial: SerialSettings,
    pub engine: EngineConfig,

    /// Wait after opening the port before the first command.
    #[serde(with = "millis")]
    pub init_delay: Duration,

    /// Settle time after a reset issued by `initialize_device`.
    #[serde(with = "millis")]
    pub initialize_settle: Duration,

    /// Delay before the informational bill poll on `RECOGNITION_WAIT`.
    #[serde(with = "millis")]
    pub recognition_poll_delay: Duration,

    /// Delay before reading the bill value on `STACK_END`.
    #[serde(with = "millis")]
    pub stack_read_delay: Duration,

    /// Delay before re-arming intake after a stacked bill.
    #[serde(with = "millis")]
    pub rearm_delay: Duration,

    /// Interval between status polls in the polled acceptance flow.
    #[serde(with = "millis")]
    pub status_poll_interval: Duration,

    /// Probe the device during `connect`.
    pub connect_check: bool,
}

impl Default for AcceptorSettings {
    fn default() -> Self {
        Self {
            serial: SerialSettings::default(),
            engine: EngineConfig::default(),
            init_delay: Duration::from_millis(DEVICE_INIT_DELAY_MS),
            initialize_settle: Duration::from_millis(INITIALIZE_SETTLE_MS),
            recognition_poll_delay: Duration::from_millis(200),
            stack_read_delay: Duration::from_millis(300),
            rearm_delay: Duration::from_millis(300),
            status_poll_interval: Duration::from_millis(STATUS_POLL_INTERVAL_MS),
            connect_check: true,
        }
    }
}

impl AcceptorSettings {
    pub fn new(path: impl Into<String>) -> Self {
        Self {
            serial: SerialSettings::new(path),
            ..Default::default()
        }
    }

    pub fn engine(mut self, engine: EngineConfig) -> Self {
        self.engine = engine;
        self
    }

    pub fn init_delay(mut self, delay: Duration) -> Self {
        self.init_delay = delay;
        self
    }

    pub fn connect_check(mut self, enabled: bool) -> Self {
        self.connect_check = enabled;
        self
    }
}

/// Bill dispenser session settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DispenserSettings {
    pub serial: SerialSettings,
    pub engine: EngineConfig,

    /// Command dialect selected on the device by DIP switch 3.
    pub dialect: Dialect,

    #[serde(with = "millis")]
    pub init_delay: Duration,

    /// Probe the device during `connect`.
    pub connect_check: bool,
}

impl Default for DispenserSettings {
    fn default() -> Self {
        Self {
            serial: SerialSettings::default(),
            engine: EngineConfig::default(),
            dialect: Dialect::default(),
            init_delay: Duration::from_millis(DEVICE_INIT_DELAY_MS),
            connect_check: true,
        }
    }
}

impl DispenserSettings {
    pub fn new(path: impl Into<String>) -> Self {
        Self {
            serial: SerialSettings::new(path),
            ..Default::default()
        }
    }

    pub fn dialect(mut self, dialect: Dialect) -> Self {
        self.dialect = dialect;
        self
    }

    pub fn engine(mut self, engine: EngineConfig) -> Self {
        self.engine = engine;
        self
    }

    pub fn init_delay(mut self, delay: Duration) -> Self {
        self.init_delay = delay;
        self
    }

    pub fn connect_check(mut self, enabled: bool) -> Self {
        self.connect_check = enabled;
        self
    }
}

/// Serialize a `Duration` as whole milliseconds.
mod millis {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(value.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_millis)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_engine_defaults() {
        let config = EngineConfig::default();
        assert_eq!(config.response_timeout, Duration::from_millis(500));
        assert_eq!(config.max_attempts, 5);
        assert_eq!(config.retry_backoff, Duration::from_millis(100));
        assert_eq!(config.dedup_window, Duration::from_millis(500));
        assert_eq!(config.log_capacity, 256);
    }

    #[test]
    fn test_builder_setters() {
        let settings = AcceptorSettings::new("/dev/ttyS3")
            .init_delay(Duration::ZERO)
            .connect_check(false)
            .engine(EngineConfig::default().max_attempts(2));

        assert_eq!(settings.serial.path, "/dev/ttyS3");
        assert_eq!(settings.serial.baud_rate, 9_600);
        assert_eq!(settings.init_delay, Duration::ZERO);
        assert!(!settings.connect_check);
        assert_eq!(settings.engine.max_attempts, 2);
    }

    #[test]
    fn test_partial_toml_uses_defaults() {
        let settings: DispenserSettings = toml::from_str(
            r#"
            dialect = "new"
            init_delay = 250

            [serial]
            path = "COM5"

            [engine]
            response_timeout = 800
            "#,
        )
        .unwrap();

        assert_eq!(settings.dialect, Dialect::New);
        assert_eq!(settings.init_delay, Duration::from_millis(250));
        assert_eq!(settings.serial.path, "COM5");
        assert_eq!(settings.serial.baud_rate, 9_600);
        assert_eq!(settings.engine.response_timeout, Duration::from_millis(800));
        assert_eq!(settings.engine.max_attempts, 5);
    }

    #[test]
    fn test_json_roundtrip_keeps_millis() {
        let json = serde_json::to_value(EngineConfig::default()).unwrap();
        assert_eq!(json["response_timeout"], 500);
        assert_eq!(json["busy_wait_slice"], 50);
    }
}
