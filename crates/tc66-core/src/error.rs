//! Error types for tc66-core.
//!
//! This module defines all error types that can occur when talking to a
//! TC66C meter over Bluetooth Low Energy.
//!
//! # Error Classification
//!
//! Callers driving a polling loop need to know which failures end the session
//! and which only spoil one measurement. [`Error::kind`] groups every variant
//! into an [`ErrorKind`]:
//!
//! | Error | Kind | Typical handling |
//! |-------|------|------------------|
//! | [`Error::ResponseTimeout`] | [`ErrorKind::Cycle`] | Skip the cycle or stop, per policy |
//! | [`Error::Framing`] | [`ErrorKind::Cycle`] | Skip the cycle or stop, per policy |
//! | [`Error::Bluetooth`] | [`ErrorKind::Transport`] | Stop the session |
//! | [`Error::Timeout`] | [`ErrorKind::Transport`] | Stop the session |
//! | [`Error::DeviceNotFound`] | [`ErrorKind::Transport`] | Stop the session |
//! | [`Error::NotConnected`] | [`ErrorKind::Transport`] | Stop the session |
//! | [`Error::ServiceNotFound`] | [`ErrorKind::Protocol`] | Unsupported firmware, do not retry |
//! | [`Error::CharacteristicNotFound`] | [`ErrorKind::Protocol`] | Unsupported firmware, do not retry |
//! | [`Error::Decode`] | [`ErrorKind::Decode`] | Do not retry |
//! | [`Error::ConnectionFailed`] | [`ErrorKind::Transport`] | Stop the session |
//! | [`Error::Cancelled`] | [`ErrorKind::Cancelled`] | Graceful shutdown |
//!
//! ## Recommended Timeouts
//!
//! | Operation | Default | Notes |
//! |-----------|---------|-------|
//! | Connection | 30 seconds | Includes waiting for the first advertisement |
//! | Service discovery | 15 seconds | |
//! | Single GATT operation | 5 seconds | Notify enable/disable, command write |
//! | Measurement response | 5 seconds | The meter normally answers in ~100ms |

use std::time::Duration;

use thiserror::Error;

use crate::frame::FrameError;

/// Errors that can occur when communicating with TC66C meters.
///
/// This enum is marked `#[non_exhaustive]` to allow adding new error variants
/// in future versions without breaking downstream code.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum Error {
    /// Bluetooth Low Energy error.
    #[error("Bluetooth error: {0}")]
    Bluetooth(#[from] btleplug::Error),

    /// Device not found during scan or connection.
    #[error("Device not found: {0}")]
    DeviceNotFound(DeviceNotFoundReason),

    /// Operation attempted while not connected to device.
    #[error("Not connected to device")]
    NotConnected,

    /// Required primary service not advertised by the device.
    #[error("Service not found: {uuid} (device exposes {service_count} services)")]
    ServiceNotFound {
        /// The UUID that was not found.
        uuid: String,
        /// Number of services the device exposes.
        service_count: usize,
    },

    /// Required BLE characteristic not found on device.
    #[error("Characteristic not found: {uuid} in service {service}")]
    CharacteristicNotFound {
        /// The UUID that was not found.
        uuid: String,
        /// The service that was searched.
        service: String,
    },

    /// Response fragments did not add up to a frame.
    #[error("Framing error: {0}")]
    Framing(#[from] FrameError),

    /// Frame could not be decrypted or decoded.
    #[error("Decode error: {0}")]
    Decode(String),

    /// The device did not deliver a complete response in time.
    #[error("No complete response within {duration:?} ({received} bytes received)")]
    ResponseTimeout {
        /// The response timeout.
        duration: Duration,
        /// Bytes received before the deadline.
        received: usize,
    },

    /// A transport operation timed out.
    #[error("Operation '{operation}' timed out after {duration:?}")]
    Timeout {
        /// The operation that timed out.
        operation: String,
        /// The timeout duration.
        duration: Duration,
    },

    /// Operation was cancelled.
    #[error("Operation cancelled")]
    Cancelled,

    /// Connection failed with specific reason.
    #[error("Connection failed: {reason}")]
    ConnectionFailed {
        /// The device identifier that failed to connect.
        device_id: Option<String>,
        /// The structured reason for the failure.
        reason: ConnectionFailureReason,
    },

    /// Write operation failed.
    #[error("Write failed to characteristic {uuid}: {reason}")]
    WriteFailed {
        /// The characteristic UUID.
        uuid: String,
        /// The reason for the failure.
        reason: String,
    },
}

/// Coarse classification of an [`Error`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// Spoils one measurement; the session is still usable.
    Cycle,
    /// Radio or connection failure; the session is gone.
    Transport,
    /// The device does not speak the expected GATT layout.
    Protocol,
    /// The response could not be decrypted or decoded.
    Decode,
    /// Stop was requested.
    Cancelled,
}

/// Structured reasons for connection failures.
///
/// This enum is marked `#[non_exhaustive]` to allow adding new reasons
/// in future versions without breaking downstream code.
#[derive(Debug, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum ConnectionFailureReason {
    /// Bluetooth adapter not available or powered off.
    AdapterUnavailable,
    /// Connection attempt timed out.
    Timeout,
    /// Service discovery did not finish.
    DiscoveryFailed(String),
    /// Generic BLE error.
    BleError(String),
}

impl std::fmt::Display for ConnectionFailureReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::AdapterUnavailable => write!(f, "Bluetooth adapter unavailable"),
            Self::Timeout => write!(f, "connection timed out"),
            Self::DiscoveryFailed(msg) => write!(f, "service discovery failed: {}", msg),
            Self::BleError(msg) => write!(f, "BLE error: {}", msg),
        }
    }
}

/// Reason why a device was not found.
///
/// This enum is marked `#[non_exhaustive]` to allow adding new reasons
/// in future versions without breaking downstream code.
#[derive(Debug, Clone)]
#[non_exhaustive]
pub enum DeviceNotFoundReason {
    /// Device with specified address not found.
    NotFound { identifier: String },
    /// Scan timed out before finding device.
    ScanTimeout { duration: Duration },
    /// No Bluetooth adapter available.
    NoAdapter,
}

impl std::fmt::Display for DeviceNotFoundReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::NotFound { identifier } => write!(f, "device '{}' not found", identifier),
            Self::ScanTimeout { duration } => write!(f, "scan timed out after {:?}", duration),
            Self::NoAdapter => write!(f, "no Bluetooth adapter available"),
        }
    }
}

impl Error {
    /// Create a device not found error for a specific identifier.
    pub fn device_not_found(identifier: impl Into<String>) -> Self {
        Self::DeviceNotFound(DeviceNotFoundReason::NotFound {
            identifier: identifier.into(),
        })
    }

    /// Create a timeout error with operation context.
    pub fn timeout(operation: impl Into<String>, duration: Duration) -> Self {
        Self::Timeout {
            operation: operation.into(),
            duration,
        }
    }

    /// Create a service not found error.
    pub fn service_not_found(uuid: impl Into<String>, service_count: usize) -> Self {
        Self::ServiceNotFound {
            uuid: uuid.into(),
            service_count,
        }
    }

    /// Create a characteristic not found error.
    pub fn characteristic_not_found(uuid: impl Into<String>, service: impl Into<String>) -> Self {
        Self::CharacteristicNotFound {
            uuid: uuid.into(),
            service: service.into(),
        }
    }

    /// Create a connection failure with structured reason.
    pub fn connection_failed(device_id: Option<String>, reason: ConnectionFailureReason) -> Self {
        Self::ConnectionFailed { device_id, reason }
    }

    /// Classify this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::ResponseTimeout { .. } | Self::Framing(_) => ErrorKind::Cycle,
            Self::ServiceNotFound { .. } | Self::CharacteristicNotFound { .. } => {
                ErrorKind::Protocol
            }
            Self::Decode(_) => ErrorKind::Decode,
            Self::Cancelled => ErrorKind::Cancelled,
            Self::Bluetooth(_)
            | Self::DeviceNotFound(_)
            | Self::NotConnected
            | Self::Timeout { .. }
            | Self::ConnectionFailed { .. }
            | Self::WriteFailed { .. } => ErrorKind::Transport,
        }
    }

    /// Whether this error only affects the current measurement.
    pub fn is_cycle_failure(&self) -> bool {
        self.kind() == ErrorKind::Cycle
    }
}

impl From<tc66_types::ParseError> for Error {
    fn from(err: tc66_types::ParseError) -> Self {
        Error::Decode(err.to_string())
    }
}

/// Result type alias using tc66-core's Error type.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = Error::device_not_found("AA:BB:CC:DD:EE:FF");
        assert!(err.to_string().contains("AA:BB:CC:DD:EE:FF"));

        let err = Error::NotConnected;
        assert_eq!(err.to_string(), "Not connected to device");

        let err = Error::service_not_found("0000ffe0", 3);
        assert!(err.to_string().contains("0000ffe0"));
        assert!(err.to_string().contains("3 services"));

        let err = Error::characteristic_not_found("0000ffe2", "0000ffe0");
        assert!(err.to_string().contains("0000ffe2"));
        assert!(err.to_string().contains("in service 0000ffe0"));

        let err = Error::timeout("connect", Duration::from_secs(30));
        assert!(err.to_string().contains("connect"));
        assert!(err.to_string().contains("30s"));
    }

    #[test]
    fn test_response_timeout_reports_received_bytes() {
        let err = Error::ResponseTimeout {
            duration: Duration::from_secs(5),
            received: 120,
        };
        assert!(err.to_string().contains("120 bytes"));
        assert!(err.to_string().contains("5s"));
    }

    #[test]
    fn test_framing_error_conversion() {
        let err: Error = FrameError::Overrun { received: 200 }.into();
        assert!(matches!(err, Error::Framing(_)));
        assert!(err.to_string().contains("200"));
    }

    #[test]
    fn test_parse_error_conversion() {
        let parse = tc66_types::Frame::from_slice(&[0u8; 10]).unwrap_err();
        let err: Error = parse.into();
        assert!(matches!(err, Error::Decode(_)));
        assert_eq!(err.kind(), ErrorKind::Decode);
    }

    #[test]
    fn test_error_kinds() {
        assert_eq!(
            Error::ResponseTimeout {
                duration: Duration::from_secs(5),
                received: 0
            }
            .kind(),
            ErrorKind::Cycle
        );
        assert_eq!(
            Error::Framing(FrameError::Incomplete { received: 40 }).kind(),
            ErrorKind::Cycle
        );
        assert_eq!(
            Error::timeout("write", Duration::from_secs(5)).kind(),
            ErrorKind::Transport
        );
        assert_eq!(Error::NotConnected.kind(), ErrorKind::Transport);
        assert_eq!(
            Error::characteristic_not_found("x", "y").kind(),
            ErrorKind::Protocol
        );
        assert_eq!(Error::Cancelled.kind(), ErrorKind::Cancelled);
        assert_eq!(
            Error::connection_failed(None, ConnectionFailureReason::Timeout).kind(),
            ErrorKind::Transport
        );
        assert!(Error::Framing(FrameError::Overrun { received: 200 }).is_cycle_failure());
        assert!(!Error::Cancelled.is_cycle_failure());
    }

    #[test]
    fn test_device_not_found_reasons() {
        let err = Error::DeviceNotFound(DeviceNotFoundReason::NoAdapter);
        assert!(err.to_string().contains("no Bluetooth adapter"));

        let err = Error::DeviceNotFound(DeviceNotFoundReason::ScanTimeout {
            duration: Duration::from_secs(30),
        });
        assert!(err.to_string().contains("30s"));
    }

    #[test]
    fn test_btleplug_error_conversion() {
        fn _assert_from_impl<T: From<btleplug::Error>>() {}
        _assert_from_impl::<Error>();
    }

    #[test]
    fn test_connection_failure_reasons() {
        let err = Error::connection_failed(
            Some("AA:BB:CC:DD:EE:FF".to_string()),
            ConnectionFailureReason::AdapterUnavailable,
        );
        assert!(err.to_string().contains("adapter unavailable"));

        let reason = ConnectionFailureReason::DiscoveryFailed("timed out after 15s".to_string());
        assert_eq!(reason.to_string(), "service discovery failed: timed out after 15s");
    }
}
