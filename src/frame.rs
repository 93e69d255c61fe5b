//! Wire frame encoding and decoding.
//!
//! Every message on the line, in either direction, has the layout
//!
//! ```text
//! start(0x40) | device | command | len_lo | len_hi | payload[len] | checksum
//! ```
//!
//! where `checksum` is the wrapping byte sum of everything between the start
//! marker and the checksum itself. Nothing in here performs I/O.

use crate::constants::*;
use crate::error::FramingError;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Commands understood by the emitter controller
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Command {
    StatusQuery,
    SetParameters,
    EmissionOn,
    EmissionOff,
}

impl Command {
    pub fn from_byte(byte: u8) -> Option<Self> {
        match byte {
            STATUS_CMD => Some(Command::StatusQuery),
            SET_PARAMETERS_CMD => Some(Command::SetParameters),
            EMISSION_ON_CMD => Some(Command::EmissionOn),
            EMISSION_OFF_CMD => Some(Command::EmissionOff),
            _ => None,
        }
    }

    pub fn byte(self) -> u8 {
        match self {
            Command::StatusQuery => STATUS_CMD,
            Command::SetParameters => SET_PARAMETERS_CMD,
            Command::EmissionOn => EMISSION_ON_CMD,
            Command::EmissionOff => EMISSION_OFF_CMD,
        }
    }

    /// Total length of the controller's answer to this command
    pub fn response_len(self) -> usize {
        match self {
            Command::StatusQuery => STATUS_RESPONSE_LEN,
            Command::SetParameters => PARAMETERS_RESPONSE_LEN,
            Command::EmissionOn | Command::EmissionOff => EMISSION_RESPONSE_LEN,
        }
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?} ('{}')", self, self.byte() as char)
    }
}

/// One complete wire message
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub device_id: u8,
    pub command: Command,
    pub payload: Vec<u8>,
    pub checksum: u8,
}

/// Result of decoding a well-formed frame.
///
/// A checksum mismatch is not a framing failure; callers decide what to do
/// with it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecodedFrame {
    pub frame: Frame,
    /// Checksum recomputed over the received bytes
    pub computed_checksum: u8,
}

impl DecodedFrame {
    pub fn checksum_matches(&self) -> bool {
        self.computed_checksum == self.frame.checksum
    }
}

/// Wrapping byte sum, the controller's checksum
pub fn checksum(bytes: &[u8]) -> u8 {
    bytes.iter().fold(0u8, |acc, &b| acc.wrapping_add(b))
}

/// Build a request frame addressed to the controller
pub fn encode(command: Command, payload: &[u8]) -> Result<Vec<u8>, FramingError> {
    if payload.len() > MAX_PAYLOAD_LEN {
        return Err(FramingError::PayloadTooLong { len: payload.len() });
    }
    let [len_lo, len_hi] = (payload.len() as u16).to_le_bytes();

    let mut bytes = Vec::with_capacity(FRAME_OVERHEAD + payload.len());
    bytes.extend_from_slice(&[START_BYTE, DEVICE_ID, command.byte(), len_lo, len_hi]);
    bytes.extend_from_slice(payload);
    bytes.push(checksum(&bytes[1..]));
    Ok(bytes)
}

/// Parse a complete frame
pub fn decode(bytes: &[u8]) -> Result<DecodedFrame, FramingError> {
    if bytes.len() < FRAME_OVERHEAD {
        return Err(FramingError::TooShort { len: bytes.len() });
    }
    if bytes[0] != START_BYTE {
        return Err(FramingError::BadStartMarker(bytes[0]));
    }

    let declared = u16::from_le_bytes([bytes[3], bytes[4]]) as usize;
    if bytes.len() != declared + FRAME_OVERHEAD {
        return Err(FramingError::LengthMismatch {
            declared,
            actual: bytes.len(),
        });
    }
    let command = Command::from_byte(bytes[2]).ok_or(FramingError::UnknownCommand(bytes[2]))?;

    let last = bytes.len() - 1;
    Ok(DecodedFrame {
        frame: Frame {
            device_id: bytes[1],
            command,
            payload: bytes[5..last].to_vec(),
            checksum: bytes[last],
        },
        computed_checksum: checksum(&bytes[1..last]),
    })
}

/// Space separated upper-case hex, for frame dumps
pub(crate) fn hex(bytes: &[u8]) -> String {
    bytes
        .iter()
        .map(|b| format!("{:02X}", b))
        .collect::<Vec<_>>()
        .join(" ")
}
