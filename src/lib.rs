//! # X-ray Emitter Library
//!
//! A Rust library for controlling high-voltage X-ray emission controllers over
//! their serial control protocol.
//!
//! The controller speaks a framed, checksummed, half-duplex command/response
//! protocol and switches emission off as a safety measure when the host stays
//! silent for more than one second. This library keeps that deadline while
//! emission is on by scheduling status requests in the background.
//!
//! ## Features
//!
//! - Frame encoding and decoding with the controller's byte-sum checksum
//! - Status, set-parameters, emission-on and emission-off exchanges
//! - Connection state tracking with a watch channel and an event stream
//! - Heartbeat scheduling while emission is active
//! - A simulated controller for running without hardware
//!
//! ## Example
//!
//! ```no_run
//! use xray_emitter::{Emitter, EmitterConfig};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let emitter = Emitter::connect(EmitterConfig::for_port("/dev/ttyUSB0")).await?;
//!     if emitter.is_connected() {
//!         let applied = emitter.set_features(1000, 50, 30, 60).await?;
//!         println!("Voltage now {}", applied.voltage);
//!     }
//!     Ok(())
//! }
//! ```

pub mod client;
pub mod config;
pub mod constants;
pub mod error;
pub mod frame;
mod heartbeat;
pub mod protocol;
pub mod sim;
pub mod transport;
pub mod types;

pub use client::Emitter;
pub use config::{EmitterConfig, Timing};
pub use error::{EmitterError, ExchangeError, FramingError, Result};
pub use frame::{Command, Frame};
pub use sim::{Behavior, SimHandle, SimulatedEmitter};
pub use transport::{SerialTransport, Transport};
pub use types::*;
