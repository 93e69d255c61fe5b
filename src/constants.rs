//! Protocol constants for X-ray emitter communication.
//!
//! This module defines all the constants used in the emitter's serial protocol,
//! including frame markers, command bytes, timing parameters, and serial port
//! configuration.

/// First byte of every frame (`'@'`)
pub const START_BYTE: u8 = 0x40;

/// Address of the emitter controller
pub const DEVICE_ID: u8 = 0x00;

/// Status request command (`'S'`)
pub const STATUS_CMD: u8 = 0x53;

/// Set parameters command (`'P'`)
pub const SET_PARAMETERS_CMD: u8 = 0x50;

/// Switch emission on (`'N'`)
pub const EMISSION_ON_CMD: u8 = 0x4E;

/// Switch emission off (`'F'`)
pub const EMISSION_OFF_CMD: u8 = 0x46;

/// Bytes in a frame besides the payload: start, device, command, two length bytes, checksum
pub const FRAME_OVERHEAD: usize = 6;

/// Largest payload the two length bytes can describe
pub const MAX_PAYLOAD_LEN: usize = u16::MAX as usize;

/// Payload length of a status response (state byte, fault byte)
pub const STATUS_PAYLOAD_LEN: usize = 2;

/// Payload length of a set-parameters request and its echo
pub const PARAMETERS_PAYLOAD_LEN: usize = 8;

/// Total length of a status response
pub const STATUS_RESPONSE_LEN: usize = FRAME_OVERHEAD + STATUS_PAYLOAD_LEN;

/// Total length of a set-parameters response
pub const PARAMETERS_RESPONSE_LEN: usize = FRAME_OVERHEAD + PARAMETERS_PAYLOAD_LEN;

/// Total length of an emission on/off acknowledgement
pub const EMISSION_RESPONSE_LEN: usize = FRAME_OVERHEAD;

/// Baud rate (19200 bps)
pub const BAUD_RATE: u32 = 19200;

/// Default serial port name used by the controller's host software
pub const DEFAULT_PORT: &str = "COM3";

/// Upper bound for an outbound frame to be written
pub const WRITE_TIMEOUT_MS: u64 = 100;

/// Time the controller needs between receiving a request and answering it
pub const PROCESSING_DELAY_MS: u64 = 50;

/// Upper bound for collecting a response once the processing delay has passed
pub const READ_TIMEOUT_MS: u64 = 50;

/// Interval between status requests while emission is on
pub const HEARTBEAT_INTERVAL_MS: u64 = 500;

/// Silence after which the controller switches emission off by itself
pub const DEVICE_HOST_TIMEOUT_MS: u64 = 1000;

/// Capacity of the request queue feeding the IO task
pub const REQUEST_QUEUE_DEPTH: usize = 16;

/// Capacity of the heartbeat channel; one heartbeat is in flight at a time
pub const HEARTBEAT_QUEUE_DEPTH: usize = 1;

/// Capacity of the event broadcast channel
pub const EVENT_CHANNEL_CAPACITY: usize = 64;
