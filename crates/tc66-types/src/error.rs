//! Error types for data parsing in tc66-types.

use thiserror::Error;

/// Errors that can occur when parsing TC66C frames and readings.
///
/// This error type is platform-agnostic and does not include
/// BLE-specific errors (those belong in tc66-core).
///
/// This enum is marked `#[non_exhaustive]` to allow adding new error variants
/// in future versions without breaking downstream code.
#[derive(Debug, Error, PartialEq, Eq)]
#[non_exhaustive]
pub enum ParseError {
    /// The input did not have the exact length required.
    #[error("Invalid length: requires {expected} bytes, got {actual}")]
    InvalidLength {
        /// Required length.
        expected: usize,
        /// Length that was supplied.
        actual: usize,
    },
}
