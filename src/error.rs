//! Error types for X-ray emitter protocol operations.

use thiserror::Error;

/// Result type alias for emitter operations.
pub type Result<T> = std::result::Result<T, EmitterError>;

/// Malformed byte stream. Always fatal to the exchange that produced it.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FramingError {
    /// Fewer bytes than the smallest possible frame
    #[error("Frame too short: {len} bytes (min 6)")]
    TooShort {
        /// Number of bytes received
        len: usize,
    },

    /// Declared payload length disagrees with the bytes present
    #[error("Length mismatch: header declares {declared} payload bytes, frame is {actual} bytes")]
    LengthMismatch {
        /// Payload length from the length field
        declared: usize,
        /// Total frame length received
        actual: usize,
    },

    /// First byte is not the start marker
    #[error("Bad start marker: {0:#04x}")]
    BadStartMarker(u8),

    /// Command byte outside the controller's command set
    #[error("Unknown command byte: {0:#04x}")]
    UnknownCommand(u8),

    /// Payload does not fit the 16-bit length field
    #[error("Payload too long: {len} bytes (max 65535)")]
    PayloadTooLong {
        /// Length of the rejected payload
        len: usize,
    },
}

/// Failure of a single request/response exchange.
#[derive(Error, Debug)]
pub enum ExchangeError {
    /// The controller is not connected; nothing was sent
    #[error("Emitter not connected")]
    NotConnected,

    /// Write or read did not complete in time
    #[error("Communication timeout")]
    Timeout,

    /// Response didn't match the shape expected for the command
    #[error("Unexpected response: expected {expected}, got {actual}")]
    UnexpectedResponse {
        /// Expected response shape
        expected: String,
        /// Actual response received
        actual: String,
    },

    /// Response checksum validation failed (strict checksum policy only)
    #[error("Checksum mismatch: computed {expected:#04x}, frame carries {actual:#04x}")]
    ChecksumMismatch {
        /// Checksum computed over the received bytes
        expected: u8,
        /// Checksum byte carried by the frame
        actual: u8,
    },

    /// Response could not be decoded
    #[error("Framing error: {0}")]
    Framing(#[from] FramingError),

    /// Serial I/O failure
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl ExchangeError {
    pub(crate) fn unexpected(expected: impl Into<String>, actual: impl Into<String>) -> Self {
        ExchangeError::UnexpectedResponse {
            expected: expected.into(),
            actual: actual.into(),
        }
    }
}

/// Error types for emitter setup and control.
#[derive(Error, Debug)]
pub enum EmitterError {
    /// Serial port communication error
    #[error("Serial port error: {0}")]
    SerialPort(#[from] serialport::Error),

    /// General I/O error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// A protocol exchange failed
    #[error(transparent)]
    Exchange(#[from] ExchangeError),

    /// Configuration cannot guarantee the controller's host timeout
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
}
