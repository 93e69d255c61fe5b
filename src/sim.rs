//! Simulated emitter controller.
//!
//! [`SimulatedEmitter`] answers frames the way the real controller does,
//! including its one-second host timeout, so the client can be driven
//! without hardware. A [`SimHandle`] stays with the caller to inspect the
//! device and inject faults after the transport has been handed over.

use crate::constants::DEVICE_HOST_TIMEOUT_MS;
use crate::error::ExchangeError;
use crate::frame::{self, Command};
use crate::transport::Transport;
use crate::types::{EmissionState, EmitterParameters, Fault};
use async_trait::async_trait;
use log::{debug, warn};
use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::time::Instant;

/// How the simulated controller answers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Behavior {
    #[default]
    Normal,
    /// Receive requests but never answer
    Silent,
    /// Answer with the checksum byte inverted
    CorruptChecksum,
    /// Answer with the last byte missing
    Truncated,
}

/// A request as seen by the simulated controller
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Received {
    pub at: Instant,
    pub command: Command,
}

#[derive(Debug, Default)]
struct Device {
    emitting: bool,
    fault: Fault,
    parameters: EmitterParameters,
    last_contact: Option<Instant>,
    received: Vec<Received>,
    behavior: Behavior,
}

impl Device {
    /// Apply the host timeout as of `now`
    fn expire(&mut self, now: Instant) {
        let timeout = Duration::from_millis(DEVICE_HOST_TIMEOUT_MS);
        let silent_too_long = self
            .last_contact
            .is_some_and(|last| now.duration_since(last) > timeout);
        if self.emitting && silent_too_long {
            warn!("Simulated emitter lost the host, switching emission off");
            self.emitting = false;
            self.fault = Fault::HostDisconnected;
        }
    }

    fn state(&self) -> EmissionState {
        if self.emitting {
            EmissionState::EmissionOn
        } else {
            EmissionState::Ok
        }
    }

    /// Process one request frame and build the answer, if any
    fn handle(&mut self, request: &[u8]) -> Option<Vec<u8>> {
        let now = Instant::now();
        self.expire(now);

        let decoded = match frame::decode(request) {
            Ok(decoded) => decoded,
            Err(e) => {
                debug!("Simulated emitter ignores malformed request: {}", e);
                return None;
            }
        };
        let command = decoded.frame.command;
        self.last_contact = Some(now);
        self.received.push(Received { at: now, command });

        let payload = match command {
            Command::StatusQuery => vec![self.state().code(), self.fault.code()],
            Command::SetParameters => {
                if let Some(params) = EmitterParameters::from_payload(&decoded.frame.payload) {
                    self.parameters = params;
                }
                self.parameters.to_payload().to_vec()
            }
            Command::EmissionOn => {
                self.emitting = true;
                if self.fault == Fault::HostDisconnected {
                    self.fault = Fault::None;
                }
                Vec::new()
            }
            Command::EmissionOff => {
                self.emitting = false;
                Vec::new()
            }
        };

        let mut response = frame::encode(command, &payload).ok()?;
        match self.behavior {
            Behavior::Normal => {}
            Behavior::Silent => return None,
            Behavior::CorruptChecksum => {
                if let Some(checksum) = response.last_mut() {
                    *checksum = !*checksum;
                }
            }
            Behavior::Truncated => {
                response.pop();
            }
        }
        Some(response)
    }
}

/// Transport end of the simulated controller
pub struct SimulatedEmitter {
    device: Arc<Mutex<Device>>,
    pending: VecDeque<u8>,
}

/// Inspection and fault-injection end of the simulated controller
#[derive(Clone)]
pub struct SimHandle {
    device: Arc<Mutex<Device>>,
}

impl SimulatedEmitter {
    pub fn new() -> (Self, SimHandle) {
        let device = Arc::new(Mutex::new(Device::default()));
        let handle = SimHandle {
            device: Arc::clone(&device),
        };
        (
            Self {
                device,
                pending: VecDeque::new(),
            },
            handle,
        )
    }

    fn device(&self) -> MutexGuard<'_, Device> {
        self.device.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[async_trait]
impl Transport for SimulatedEmitter {
    async fn send(&mut self, bytes: &[u8], _timeout: Duration) -> Result<(), ExchangeError> {
        let response = self.device().handle(bytes);
        if let Some(response) = response {
            self.pending.extend(response);
        }
        Ok(())
    }

    async fn receive(&mut self, buf: &mut [u8], timeout: Duration) -> Result<usize, ExchangeError> {
        if self.pending.is_empty() {
            tokio::time::sleep(timeout).await;
            return Err(ExchangeError::Timeout);
        }
        let n = buf.len().min(self.pending.len());
        for (slot, byte) in buf.iter_mut().zip(self.pending.drain(..n)) {
            *slot = byte;
        }
        Ok(n)
    }

    async fn clear_input(&mut self) -> Result<(), ExchangeError> {
        self.pending.clear();
        Ok(())
    }
}

impl SimHandle {
    fn device(&self) -> MutexGuard<'_, Device> {
        let mut device = self.device.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        device.expire(Instant::now());
        device
    }

    /// Whether the tube is emitting right now
    pub fn is_emitting(&self) -> bool {
        self.device().emitting
    }

    pub fn fault(&self) -> Fault {
        self.device().fault
    }

    /// Make the controller report `fault` from the next status request on
    pub fn set_fault(&self, fault: Fault) {
        self.device().fault = fault;
    }

    pub fn set_behavior(&self, behavior: Behavior) {
        self.device().behavior = behavior;
    }

    /// Parameters currently active on the controller
    pub fn parameters(&self) -> EmitterParameters {
        self.device().parameters
    }

    /// Every well-formed request received so far
    pub fn received(&self) -> Vec<Received> {
        self.device().received.clone()
    }

    pub fn request_count(&self) -> usize {
        self.device().received.len()
    }
}
