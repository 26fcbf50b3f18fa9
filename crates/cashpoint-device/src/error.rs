//! Session-level errors for peripheral operations.
//!
//! Only failures that end or prevent a session are raised as errors: a port
//! that cannot be opened, a stream that cannot be set up, a device that does
//! not answer the connection probe. Timeouts and device nacks are expected
//! operating conditions and travel as [`Outcome`](crate::Outcome) values.

/// Result type alias for session operations.
pub type Result<T> = std::result::Result<T, DeviceError>;

/// Errors raised by the session layer.
#[derive(Debug, thiserror::Error)]
pub enum DeviceError {
    /// Serial port could not be opened.
    #[error("Port unavailable: {path}: {source}")]
    PortUnavailable {
        path: String,
        #[source]
        source: tokio_serial::Error,
    },

    /// Operation requires an open session.
    #[error("Not connected: {device}")]
    NotConnected { device: String },

    /// A session is already open for this device.
    #[error("Already connected: {device}")]
    AlreadyConnected { device: String },

    /// Reader/writer streams could not be set up.
    #[error("Stream setup failed: {message}")]
    StreamSetup { message: String },

    /// The device did not answer during session setup.
    #[error("Communication failed: {message}")]
    CommunicationFailed { message: String },

    /// Invalid settings.
    #[error("Configuration error: {message}")]
    ConfigurationError { message: String },

    /// Protocol-level error from the wire layer.
    #[error("Protocol error: {0}")]
    Protocol(#[from] cashpoint_core::Error),

    /// Generic I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl DeviceError {
    pub fn port_unavailable(path: impl Into<String>, source: tokio_serial::Error) -> Self {
        Self::PortUnavailable {
            path: path.into(),
            source,
        }
    }

    pub fn not_connected(device: impl Into<String>) -> Self {
        Self::NotConnected {
            device: device.into(),
        }
    }

    pub fn already_connected(device: impl Into<String>) -> Self {
        Self::AlreadyConnected {
            device: device.into(),
        }
    }

    pub fn stream_setup(message: impl Into<String>) -> Self {
        Self::StreamSetup {
            message: message.into(),
        }
    }

    pub fn communication_failed(message: impl Into<String>) -> Self {
        Self::CommunicationFailed {
            message: message.into(),
        }
    }

    pub fn configuration(message: impl Into<String>) -> Self {
        Self::ConfigurationError {
            message: message.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_not_connected_error() {
        let error = DeviceError::not_connected("bill-acceptor");
        assert!(matches!(error, DeviceError::NotConnected { .. }));
        assert_eq!(error.to_string(), "Not connected: bill-acceptor");
    }

    #[test]
    fn test_communication_failed_error() {
        let error = DeviceError::communication_failed("no reply to H i ?");
        assert_eq!(error.to_string(), "Communication failed: no reply to H i ?");
    }

    #[test]
    fn test_port_unavailable_keeps_source() {
        let source = tokio_serial::Error::new(tokio_serial::ErrorKind::NoDevice, "no such port");
        let error = DeviceError::port_unavailable("/dev/ttyUSB9", source);
        assert_eq!(
            error.to_string(),
            "Port unavailable: /dev/ttyUSB9: no such port"
        );
        assert!(std::error::Error::source(&error).is_some());
    }

    #[test]
    fn test_protocol_conversion() {
        let error: DeviceError = cashpoint_core::Error::InvalidDispenseCount(0).into();
        assert!(matches!(error, DeviceError::Protocol(_)));
    }
}
