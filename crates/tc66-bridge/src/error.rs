//! Error types for the bridge.

use thiserror::Error;

use crate::bus::PublishError;
use crate::config::ConfigError;

/// Any condition that ends a bridge run.
#[derive(Debug, Error)]
pub enum BridgeError {
    /// Meter side: connection, protocol, response or decode failure.
    #[error(transparent)]
    Device(#[from] tc66_core::Error),

    /// Bus side: connection or publish failure.
    #[error(transparent)]
    Publish(#[from] PublishError),

    /// Invalid configuration.
    #[error(transparent)]
    Config(#[from] ConfigError),
}

impl BridgeError {
    /// Whether this error only reports a shutdown request.
    pub fn is_cancelled(&self) -> bool {
        matches!(
            self,
            Self::Device(tc66_core::Error::Cancelled) | Self::Publish(PublishError::Cancelled)
        )
    }
}

/// Process outcome of a bridge run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitStatus {
    /// Stopped on request or after the configured number of cycles.
    Success,
    /// Stopped because of a fatal condition.
    Failure,
}

impl ExitStatus {
    /// Process exit code.
    pub fn code(self) -> u8 {
        match self {
            Self::Success => 0,
            Self::Failure => 1,
        }
    }
}

impl From<ExitStatus> for std::process::ExitCode {
    fn from(status: ExitStatus) -> Self {
        Self::from(status.code())
    }
}
