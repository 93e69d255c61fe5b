use crate::constants::PARAMETERS_PAYLOAD_LEN;
use crate::frame::Command;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Emission state reported in the first byte of a status response
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EmissionState {
    Ok,
    EmissionOn,
    EmissionRampingUp,
    EmissionTraining,
    Cooling,
}

impl EmissionState {
    pub fn from_code(code: u8) -> Option<Self> {
        match code {
            0x00 => Some(EmissionState::Ok),
            0x01 => Some(EmissionState::EmissionOn),
            0x02 => Some(EmissionState::EmissionRampingUp),
            0x03 => Some(EmissionState::EmissionTraining),
            0x04 => Some(EmissionState::Cooling),
            _ => None,
        }
    }

    pub fn code(self) -> u8 {
        match self {
            EmissionState::Ok => 0x00,
            EmissionState::EmissionOn => 0x01,
            EmissionState::EmissionRampingUp => 0x02,
            EmissionState::EmissionTraining => 0x03,
            EmissionState::Cooling => 0x04,
        }
    }
}

impl fmt::Display for EmissionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            EmissionState::Ok => "idle, everything is fine",
            EmissionState::EmissionOn => "emission is on",
            EmissionState::EmissionRampingUp => "emission ramping up to the set mode",
            EmissionState::EmissionTraining => "tube training in progress",
            EmissionState::Cooling => "cooling",
        };
        f.write_str(text)
    }
}

/// Fault reported in the second byte of a status response
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum Fault {
    #[default]
    None,
    TubeControlFault,
    ModeFault,
    VoltageFault,
    CurrentFault,
    ProtectiveBoxOpen,
    LowSupplyVoltage,
    HostDisconnected,
    Overheat,
}

impl Fault {
    pub fn from_code(code: u8) -> Option<Self> {
        match code {
            0x00 => Some(Fault::None),
            0x01 => Some(Fault::TubeControlFault),
            0x02 => Some(Fault::ModeFault),
            0x03 => Some(Fault::VoltageFault),
            0x04 => Some(Fault::CurrentFault),
            0x05 => Some(Fault::ProtectiveBoxOpen),
            0x06 => Some(Fault::LowSupplyVoltage),
            0x07 => Some(Fault::HostDisconnected),
            0x08 => Some(Fault::Overheat),
            _ => None,
        }
    }

    pub fn code(self) -> u8 {
        match self {
            Fault::None => 0x00,
            Fault::TubeControlFault => 0x01,
            Fault::ModeFault => 0x02,
            Fault::VoltageFault => 0x03,
            Fault::CurrentFault => 0x04,
            Fault::ProtectiveBoxOpen => 0x05,
            Fault::LowSupplyVoltage => 0x06,
            Fault::HostDisconnected => 0x07,
            Fault::Overheat => 0x08,
        }
    }
}

impl fmt::Display for Fault {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            Fault::None => "no fault",
            Fault::TubeControlFault => "X-ray tube control fault",
            Fault::ModeFault => "the preset mode cannot be reached",
            Fault::VoltageFault => "voltage threshold exceeded",
            Fault::CurrentFault => "current threshold exceeded",
            Fault::ProtectiveBoxOpen => "protective box is open",
            Fault::LowSupplyVoltage => "low supply voltage",
            Fault::HostDisconnected => "no message from the host for more than 1 s",
            Fault::Overheat => "overheat",
        };
        f.write_str(text)
    }
}

/// Decoded status response
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusOutcome {
    pub state: EmissionState,
    pub fault: Fault,
}

impl StatusOutcome {
    /// Device-reported faults are data, not protocol errors
    pub fn has_fault(&self) -> bool {
        self.fault != Fault::None
    }
}

/// Emitter operating parameters, in the device's own units
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct EmitterParameters {
    pub voltage: u16,
    pub current: u16,
    pub work_time: u16,
    pub cool_time: u16,
}

impl EmitterParameters {
    pub fn new(voltage: u16, current: u16, work_time: u16, cool_time: u16) -> Self {
        Self {
            voltage,
            current,
            work_time,
            cool_time,
        }
    }

    /// Serialize as four little-endian words
    pub fn to_payload(&self) -> [u8; PARAMETERS_PAYLOAD_LEN] {
        let mut payload = [0u8; PARAMETERS_PAYLOAD_LEN];
        let words = [self.voltage, self.current, self.work_time, self.cool_time];
        for (chunk, word) in payload.chunks_exact_mut(2).zip(words) {
            chunk.copy_from_slice(&word.to_le_bytes());
        }
        payload
    }

    pub fn from_payload(payload: &[u8]) -> Option<Self> {
        if payload.len() != PARAMETERS_PAYLOAD_LEN {
            return None;
        }
        let word = |i: usize| u16::from_le_bytes([payload[i * 2], payload[i * 2 + 1]]);
        Some(Self::new(word(0), word(1), word(2), word(3)))
    }
}

/// Connection state, owned by the client's IO task
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum ConnectionState {
    #[default]
    Disconnected,
    Connected,
    EmissionActive,
}

impl ConnectionState {
    pub fn is_connected(self) -> bool {
        !matches!(self, ConnectionState::Disconnected)
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConnectionState::Disconnected => f.write_str("disconnected"),
            ConnectionState::Connected => f.write_str("connected"),
            ConnectionState::EmissionActive => f.write_str("emission active"),
        }
    }
}

/// A status outcome stamped with the time it was received
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatusReport {
    pub timestamp: DateTime<Utc>,
    pub outcome: StatusOutcome,
}

impl StatusReport {
    pub fn now(outcome: StatusOutcome) -> Self {
        Self {
            timestamp: Utc::now(),
            outcome,
        }
    }
}

/// How a response with a wrong checksum is treated
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChecksumPolicy {
    /// Log and publish a warning, keep using the frame
    #[default]
    Advisory,
    /// Fail the exchange
    Strict,
}

/// Events published for display layers
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum EmitterEvent {
    ConnectionChanged(ConnectionState),
    Status(StatusReport),
    ParametersApplied(EmitterParameters),
    ChecksumMismatch {
        command: Command,
        expected: u8,
        actual: u8,
    },
    HeartbeatFailed {
        reason: String,
    },
}
