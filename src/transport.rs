//! Byte transport between the host and the emitter controller.

use crate::config::EmitterConfig;
use crate::error::{ExchangeError, Result};
use async_trait::async_trait;
use serialport::{ClearBuffer, DataBits, FlowControl, Parity, SerialPort, StopBits};
use std::io;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio_serial::{SerialPortBuilderExt, SerialStream};

/// A duplex byte channel with bounded-time writes and reads.
///
/// Implementations know nothing about frames; the protocol layer decides
/// how many bytes to wait for.
#[async_trait]
pub trait Transport: Send {
    /// Write all of `bytes`, failing with [`ExchangeError::Timeout`] if that takes longer than `timeout`.
    async fn send(&mut self, bytes: &[u8], timeout: Duration) -> std::result::Result<(), ExchangeError>;

    /// Read whatever is available into `buf`, waiting at most `timeout` for the first byte.
    async fn receive(
        &mut self,
        buf: &mut [u8],
        timeout: Duration,
    ) -> std::result::Result<usize, ExchangeError>;

    /// Drop any stale bytes waiting in the input buffer.
    async fn clear_input(&mut self) -> std::result::Result<(), ExchangeError>;
}

/// Serial port transport, 8N1 without flow control
pub struct SerialTransport {
    stream: SerialStream,
    port_name: String,
}

impl SerialTransport {
    /// Open the port named in `config`. Must be called from inside a Tokio runtime.
    pub fn open(config: &EmitterConfig) -> Result<Self> {
        let stream = serialport::new(&config.port_name, config.baud_rate)
            .data_bits(DataBits::Eight)
            .parity(Parity::None)
            .stop_bits(StopBits::One)
            .flow_control(FlowControl::None)
            .timeout(config.timing.read_timeout())
            .open_native_async()?;

        Ok(Self {
            stream,
            port_name: config.port_name.clone(),
        })
    }

    pub fn port_name(&self) -> &str {
        &self.port_name
    }
}

#[async_trait]
impl Transport for SerialTransport {
    async fn send(&mut self, bytes: &[u8], timeout: Duration) -> std::result::Result<(), ExchangeError> {
        let write = async {
            self.stream.write_all(bytes).await?;
            self.stream.flush().await
        };
        tokio::time::timeout(timeout, write)
            .await
            .map_err(|_| ExchangeError::Timeout)??;
        Ok(())
    }

    async fn receive(
        &mut self,
        buf: &mut [u8],
        timeout: Duration,
    ) -> std::result::Result<usize, ExchangeError> {
        match tokio::time::timeout(timeout, self.stream.read(buf)).await {
            Ok(read) => Ok(read?),
            Err(_) => Err(ExchangeError::Timeout),
        }
    }

    async fn clear_input(&mut self) -> std::result::Result<(), ExchangeError> {
        self.stream
            .clear(ClearBuffer::Input)
            .map_err(io::Error::from)?;
        Ok(())
    }
}

/// List available serial ports
pub fn list_ports() -> Result<Vec<serialport::SerialPortInfo>> {
    Ok(serialport::available_ports()?)
}
