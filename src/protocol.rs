use crate::config::Timing;
use crate::constants::*;
use crate::error::ExchangeError;
use crate::frame::{self, Command, Frame};
use crate::transport::Transport;
use crate::types::*;
use log::{debug, info, trace, warn};
use tokio::sync::broadcast;
use tokio::time::Instant;

type ExchangeResult<T> = std::result::Result<T, ExchangeError>;

/// Size of a single read from the transport
const READ_CHUNK: usize = 64;

/// Single-exchange protocol engine.
///
/// Sends one request and validates the one response that belongs to it.
/// Connection state lives one level up, in the client's IO task; this type
/// only turns commands into bytes and bytes back into typed answers.
pub struct Protocol {
    transport: Box<dyn Transport>,
    timing: Timing,
    checksum_policy: ChecksumPolicy,
    events: broadcast::Sender<EmitterEvent>,
}

impl Protocol {
    pub fn new(
        transport: Box<dyn Transport>,
        timing: Timing,
        checksum_policy: ChecksumPolicy,
        events: broadcast::Sender<EmitterEvent>,
    ) -> Self {
        Self {
            transport,
            timing,
            checksum_policy,
            events,
        }
    }

    /// Request the controller's status.
    ///
    /// A reported fault is data, not an error. A state or fault code outside
    /// the known sets is [`ExchangeError::UnexpectedResponse`], so such a
    /// reply fails the liveness probe and, during emission, the heartbeat.
    pub async fn query_status(&mut self) -> ExchangeResult<StatusOutcome> {
        let response = self.exchange(Command::StatusQuery, &[]).await?;
        let (state_code, fault_code) = (response.payload[0], response.payload[1]);

        let state = EmissionState::from_code(state_code).ok_or_else(|| {
            ExchangeError::unexpected("emission state code 0x00..=0x04", format!("{:#04x}", state_code))
        })?;
        let fault = Fault::from_code(fault_code).ok_or_else(|| {
            ExchangeError::unexpected("fault code 0x00..=0x08", format!("{:#04x}", fault_code))
        })?;

        let outcome = StatusOutcome { state, fault };
        if outcome.has_fault() {
            warn!("Emitter reports {}: {}", state, fault);
        } else {
            debug!("Emitter status: {}", state);
        }
        Ok(outcome)
    }

    /// Send operating parameters; returns the values the controller echoed back
    pub async fn set_parameters(&mut self, params: EmitterParameters) -> ExchangeResult<EmitterParameters> {
        let response = self
            .exchange(Command::SetParameters, &params.to_payload())
            .await?;
        let applied = EmitterParameters::from_payload(&response.payload).ok_or_else(|| {
            ExchangeError::unexpected(
                format!("{} parameter bytes", PARAMETERS_PAYLOAD_LEN),
                format!("{}", response.payload.len()),
            )
        })?;

        if applied != params {
            warn!("Emitter applied {:?} instead of requested {:?}", applied, params);
        } else {
            info!(
                "Parameters set: voltage {}, current {}, work time {}, cool time {}",
                applied.voltage, applied.current, applied.work_time, applied.cool_time
            );
        }
        Ok(applied)
    }

    /// Switch emission on
    pub async fn emission_on(&mut self) -> ExchangeResult<()> {
        self.exchange(Command::EmissionOn, &[]).await?;
        info!("X-ray emission switched on");
        Ok(())
    }

    /// Switch emission off
    pub async fn emission_off(&mut self) -> ExchangeResult<()> {
        self.exchange(Command::EmissionOff, &[]).await?;
        info!("X-ray emission switched off");
        Ok(())
    }

    /// Send one request and return the validated response frame
    async fn exchange(&mut self, command: Command, payload: &[u8]) -> ExchangeResult<Frame> {
        let request = frame::encode(command, payload)?;

        self.transport.clear_input().await?;
        trace!("Sending:  {}", frame::hex(&request));
        self.transport
            .send(&request, self.timing.write_timeout())
            .await?;

        // The controller answers only after its processing delay
        tokio::time::sleep(self.timing.processing_delay()).await;

        let response = self.read_response(command.response_len()).await?;
        trace!("Received: {}", frame::hex(&response));
        self.validate(command, &response)
    }

    /// Collect bytes until the read timeout elapses.
    ///
    /// Reading goes on after `expected` bytes so that trailing bytes of an
    /// over-long reply are seen; it stops as soon as the reply is too long.
    async fn read_response(&mut self, expected: usize) -> ExchangeResult<Vec<u8>> {
        let deadline = Instant::now() + self.timing.read_timeout();
        let mut response = Vec::with_capacity(expected);
        let mut chunk = [0u8; READ_CHUNK];

        while response.len() <= expected {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                break;
            }
            match self.transport.receive(&mut chunk, remaining).await {
                Ok(0) => break,
                Ok(n) => response.extend_from_slice(&chunk[..n]),
                Err(ExchangeError::Timeout) => break,
                Err(e) => return Err(e),
            }
        }

        if response.is_empty() {
            return Err(ExchangeError::Timeout);
        }
        Ok(response)
    }

    fn validate(&self, command: Command, response: &[u8]) -> ExchangeResult<Frame> {
        let expected_len = command.response_len();
        if response.len() != expected_len {
            return Err(ExchangeError::unexpected(
                format!("{} bytes for {}", expected_len, command),
                format!("{} bytes [{}]", response.len(), frame::hex(response)),
            ));
        }

        if response[2] != command.byte() {
            return Err(ExchangeError::unexpected(
                format!("echo of {}", command),
                format!("command byte {:#04x}", response[2]),
            ));
        }

        let decoded = frame::decode(response)?;
        if !decoded.checksum_matches() {
            let (expected, actual) = (decoded.computed_checksum, decoded.frame.checksum);
            match self.checksum_policy {
                ChecksumPolicy::Strict => {
                    return Err(ExchangeError::ChecksumMismatch { expected, actual });
                }
                ChecksumPolicy::Advisory => {
                    warn!(
                        "Checksum does not match for {}: computed {:#04x}, received {:#04x}",
                        command, expected, actual
                    );
                    let _ = self.events.send(EmitterEvent::ChecksumMismatch {
                        command,
                        expected,
                        actual,
                    });
                }
            }
        }

        let frame = decoded.frame;
        let payload_len = expected_len - FRAME_OVERHEAD;
        if frame.payload.len() != payload_len {
            return Err(ExchangeError::unexpected(
                format!("length field {}", payload_len),
                format!("{}", frame.payload.len()),
            ));
        }
        Ok(frame)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::collections::VecDeque;
    use std::sync::{Arc, Mutex};
    use std::time::Duration;

    /// Answers each request with the next scripted reply, split into chunks
    #[derive(Clone, Default)]
    struct Scripted {
        replies: Arc<Mutex<VecDeque<Vec<Vec<u8>>>>>,
        sent: Arc<Mutex<Vec<Vec<u8>>>>,
        pending: VecDeque<Vec<u8>>,
    }

    impl Scripted {
        fn replying(replies: Vec<Vec<u8>>) -> Self {
            Self::chunked(replies.into_iter().map(|r| vec![r]).collect())
        }

        fn chunked(replies: Vec<Vec<Vec<u8>>>) -> Self {
            let scripted = Self::default();
            scripted.replies.lock().unwrap().extend(replies);
            scripted
        }

        fn sent(&self) -> Vec<Vec<u8>> {
            self.sent.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl Transport for Scripted {
        async fn send(&mut self, bytes: &[u8], _timeout: Duration) -> ExchangeResult<()> {
            self.sent.lock().unwrap().push(bytes.to_vec());
            if let Some(chunks) = self.replies.lock().unwrap().pop_front() {
                self.pending = chunks.into();
            }
            Ok(())
        }

        async fn receive(&mut self, buf: &mut [u8], timeout: Duration) -> ExchangeResult<usize> {
            match self.pending.pop_front() {
                Some(bytes) => {
                    buf[..bytes.len()].copy_from_slice(&bytes);
                    Ok(bytes.len())
                }
                None => {
                    tokio::time::sleep(timeout).await;
                    Err(ExchangeError::Timeout)
                }
            }
        }

        async fn clear_input(&mut self) -> ExchangeResult<()> {
            self.pending.clear();
            Ok(())
        }
    }

    fn engine(transport: &Scripted, policy: ChecksumPolicy) -> (Protocol, broadcast::Receiver<EmitterEvent>) {
        let (events, rx) = broadcast::channel(8);
        let protocol = Protocol::new(Box::new(transport.clone()), Timing::default(), policy, events);
        (protocol, rx)
    }

    fn response(command: Command, payload: &[u8]) -> Vec<u8> {
        frame::encode(command, payload).unwrap()
    }

    #[tokio::test(start_paused = true)]
    async fn status_maps_state_and_fault() {
        let status = response(Command::StatusQuery, &[0x01, 0x07]);
        let transport = Scripted::replying(vec![status]);
        let (mut protocol, _) = engine(&transport, ChecksumPolicy::Advisory);

        let outcome = protocol.query_status().await.unwrap();
        assert_eq!(
            outcome,
            StatusOutcome {
                state: EmissionState::EmissionOn,
                fault: Fault::HostDisconnected,
            }
        );
        assert_eq!(transport.sent(), vec![vec![0x40, 0x00, 0x53, 0x00, 0x00, 0x53]]);
    }

    #[tokio::test(start_paused = true)]
    async fn status_response_split_across_reads() {
        let status = response(Command::StatusQuery, &[0x00, 0x00]);
        let transport = Scripted::chunked(vec![vec![status[..3].to_vec(), status[3..].to_vec()]]);
        let (mut protocol, _) = engine(&transport, ChecksumPolicy::Advisory);

        let outcome = protocol.query_status().await.unwrap();
        assert_eq!(outcome.state, EmissionState::Ok);
        assert!(!outcome.has_fault());
    }

    #[tokio::test(start_paused = true)]
    async fn set_parameters_sends_little_endian_words() {
        let params = EmitterParameters::new(1000, 50, 30, 60);
        let echo = response(Command::SetParameters, &params.to_payload());
        let transport = Scripted::replying(vec![echo]);
        let (mut protocol, _) = engine(&transport, ChecksumPolicy::Advisory);

        assert_eq!(protocol.set_parameters(params).await.unwrap(), params);
        let sent = transport.sent();
        assert_eq!(&sent[0][5..13], &[0xE8, 0x03, 0x32, 0x00, 0x1E, 0x00, 0x3C, 0x00]);
    }

    #[tokio::test(start_paused = true)]
    async fn wrong_length_is_unexpected() {
        // an emission acknowledgement is not a status response
        let short = response(Command::StatusQuery, &[]);
        let long = response(Command::EmissionOn, &[0x00]);
        let status = response(Command::StatusQuery, &[0x00, 0x00]);
        let transport = Scripted::replying(vec![short, long, status]);
        let (mut protocol, _) = engine(&transport, ChecksumPolicy::Advisory);

        assert!(matches!(
            protocol.query_status().await,
            Err(ExchangeError::UnexpectedResponse { .. })
        ));
        assert!(matches!(
            protocol.emission_on().await,
            Err(ExchangeError::UnexpectedResponse { .. })
        ));
        assert!(matches!(
            protocol.set_parameters(EmitterParameters::default()).await,
            Err(ExchangeError::UnexpectedResponse { .. })
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn wrong_echo_is_unexpected() {
        let off = response(Command::EmissionOff, &[]);
        let transport = Scripted::replying(vec![off]);
        let (mut protocol, _) = engine(&transport, ChecksumPolicy::Advisory);

        assert!(matches!(
            protocol.emission_on().await,
            Err(ExchangeError::UnexpectedResponse { .. })
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn echo_outside_command_set_is_unexpected() {
        let mut status = response(Command::StatusQuery, &[0x00, 0x00]);
        status[2] = 0x58;
        let transport = Scripted::replying(vec![status]);
        let (mut protocol, _) = engine(&transport, ChecksumPolicy::Advisory);

        assert!(matches!(
            protocol.query_status().await,
            Err(ExchangeError::UnexpectedResponse { .. })
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn trailing_bytes_after_full_reply_are_unexpected() {
        let status = response(Command::StatusQuery, &[0x00, 0x00]);
        let transport = Scripted::chunked(vec![vec![status, vec![0xAA]]]);
        let (mut protocol, _) = engine(&transport, ChecksumPolicy::Advisory);

        assert!(matches!(
            protocol.query_status().await,
            Err(ExchangeError::UnexpectedResponse { .. })
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn unknown_status_code_is_unexpected() {
        let status = response(Command::StatusQuery, &[0x09, 0x00]);
        let transport = Scripted::replying(vec![status]);
        let (mut protocol, _) = engine(&transport, ChecksumPolicy::Advisory);

        assert!(matches!(
            protocol.query_status().await,
            Err(ExchangeError::UnexpectedResponse { .. })
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn silence_times_out() {
        let transport = Scripted::default();
        let (mut protocol, _) = engine(&transport, ChecksumPolicy::Advisory);

        let started = Instant::now();
        assert!(matches!(protocol.emission_off().await, Err(ExchangeError::Timeout)));
        assert!(started.elapsed() <= Timing::default().exchange_budget());
    }

    #[tokio::test(start_paused = true)]
    async fn advisory_checksum_keeps_frame_and_warns() {
        let mut status = response(Command::StatusQuery, &[0x04, 0x00]);
        *status.last_mut().unwrap() = 0x00;
        let transport = Scripted::replying(vec![status]);
        let (mut protocol, mut events) = engine(&transport, ChecksumPolicy::Advisory);

        assert_eq!(protocol.query_status().await.unwrap().state, EmissionState::Cooling);
        match events.try_recv().unwrap() {
            EmitterEvent::ChecksumMismatch { command, expected, actual } => {
                assert_eq!(command, Command::StatusQuery);
                assert_eq!(expected, 0x59);
                assert_eq!(actual, 0x00);
            }
            other => panic!("unexpected event {:?}", other),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn strict_checksum_fails_exchange() {
        let mut status = response(Command::StatusQuery, &[0x04, 0x00]);
        *status.last_mut().unwrap() = 0x00;
        let transport = Scripted::replying(vec![status]);
        let (mut protocol, _) = engine(&transport, ChecksumPolicy::Strict);

        assert!(matches!(
            protocol.query_status().await,
            Err(ExchangeError::ChecksumMismatch { expected: 0x59, actual: 0x00 })
        ));
    }
}
