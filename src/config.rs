//! Runtime configuration for the emitter client.

use crate::constants::*;
use crate::error::{EmitterError, Result};
use crate::types::ChecksumPolicy;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Per-exchange timing, in milliseconds
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Timing {
    pub write_timeout_ms: u64,
    pub processing_delay_ms: u64,
    pub read_timeout_ms: u64,
    pub heartbeat_interval_ms: u64,
}

impl Default for Timing {
    fn default() -> Self {
        Self {
            write_timeout_ms: WRITE_TIMEOUT_MS,
            processing_delay_ms: PROCESSING_DELAY_MS,
            read_timeout_ms: READ_TIMEOUT_MS,
            heartbeat_interval_ms: HEARTBEAT_INTERVAL_MS,
        }
    }
}

impl Timing {
    pub fn write_timeout(&self) -> Duration {
        Duration::from_millis(self.write_timeout_ms)
    }

    pub fn processing_delay(&self) -> Duration {
        Duration::from_millis(self.processing_delay_ms)
    }

    pub fn read_timeout(&self) -> Duration {
        Duration::from_millis(self.read_timeout_ms)
    }

    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_millis(self.heartbeat_interval_ms)
    }

    /// Worst-case duration of one exchange
    pub fn exchange_budget(&self) -> Duration {
        self.write_timeout() + self.processing_delay() + self.read_timeout()
    }
}

/// Emitter connection settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EmitterConfig {
    pub port_name: String,
    pub baud_rate: u32,
    pub timing: Timing,
    pub checksum_policy: ChecksumPolicy,
}

impl Default for EmitterConfig {
    fn default() -> Self {
        Self {
            port_name: DEFAULT_PORT.to_string(),
            baud_rate: BAUD_RATE,
            timing: Timing::default(),
            checksum_policy: ChecksumPolicy::default(),
        }
    }
}

impl EmitterConfig {
    pub fn for_port(port_name: &str) -> Self {
        Self {
            port_name: port_name.to_string(),
            ..Self::default()
        }
    }

    /// Check that the timing can keep the controller's host timeout from firing.
    ///
    /// A heartbeat may wait behind the user exchange already in flight, so the heartbeat
    /// interval plus two exchange budgets must stay inside the device timeout.
    pub fn validate(&self) -> Result<()> {
        let timing = &self.timing;
        let device_timeout = Duration::from_millis(DEVICE_HOST_TIMEOUT_MS);
        let interval = timing.heartbeat_interval();
        let budget = timing.exchange_budget();

        if self.baud_rate == 0 {
            return Err(EmitterError::InvalidConfig("baud rate must be non-zero".into()));
        }
        if interval.is_zero() || interval >= device_timeout {
            return Err(EmitterError::InvalidConfig(format!(
                "heartbeat interval {}ms must be between 1 and {}ms",
                timing.heartbeat_interval_ms,
                DEVICE_HOST_TIMEOUT_MS - 1
            )));
        }
        if budget >= interval {
            return Err(EmitterError::InvalidConfig(format!(
                "exchange budget {}ms does not fit in heartbeat interval {}ms",
                budget.as_millis(),
                timing.heartbeat_interval_ms
            )));
        }
        if interval + budget * 2 >= device_timeout {
            return Err(EmitterError::InvalidConfig(format!(
                "heartbeat interval {}ms plus two exchanges of {}ms reaches the {}ms device timeout",
                timing.heartbeat_interval_ms,
                budget.as_millis(),
                DEVICE_HOST_TIMEOUT_MS
            )));
        }
        Ok(())
    }
}
