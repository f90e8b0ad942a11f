//! # Error Types
//!
//! Custom error types for HoTT Link using `thiserror`.
//!
//! Decoder plausibility failures are not errors. They travel in-band as
//! [`crate::hott::decoder::Rejected`] so a noisy frame never aborts an import.

use thiserror::Error;

/// Main error type for HoTT Link
#[derive(Debug, Error)]
pub enum HottError {
    /// Malformed frame or unexpected answer content
    #[error("HoTT protocol error: {0}")]
    Protocol(String),

    /// Trailing CRC16 of an answer did not match its content
    #[error("Checksum mismatch")]
    ChecksumMismatch,

    /// Answer did not carry the expected begin/end markers or size
    #[error("Frame length mismatch: expected {expected} bytes, got {actual}")]
    FrameLengthMismatch { expected: usize, actual: usize },

    /// A read did not complete within its timeout
    #[error("Timeout: expected {expected} bytes, received {received}")]
    Timeout { expected: usize, received: usize },

    /// The session error counter passed its hard limit
    #[error("Transfer error budget exceeded after {0} errors")]
    TransferErrorBudgetExceeded(u32),

    /// Serial port errors
    #[error("Serial error: {0}")]
    Serial(String),

    /// None of the candidate device paths could be opened
    #[error("Serial port not found, tried: {0}")]
    SerialPortNotFound(String),

    /// Capture file header or block errors
    #[error("Capture error: {0}")]
    Capture(String),

    /// Operation cancelled through the interrupt flag
    #[error("Interrupted by user")]
    Interrupted,

    /// Configuration errors
    #[error("Configuration error: {0}")]
    Config(#[from] toml::de::Error),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl HottError {
    /// Whether the session may retry the cycle that produced this error
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            HottError::ChecksumMismatch
                | HottError::FrameLengthMismatch { .. }
                | HottError::Timeout { .. }
        )
    }
}

/// Result type alias for HoTT Link
pub type Result<T> = std::result::Result<T, HottError>;
