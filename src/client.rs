//! Public handle to the emitter and the IO task behind it.
//!
//! A single IO task owns the transport. User calls reach it through the
//! request queue and heartbeats through their own channel, which the task
//! always serves first. Exactly one exchange is on the line at any time and
//! no lock is ever held across an exchange.

use crate::config::EmitterConfig;
use crate::constants::*;
use crate::error::{ExchangeError, Result};
use crate::heartbeat::{Beat, HeartbeatScheduler};
use crate::protocol::Protocol;
use crate::transport::{self, SerialTransport, Transport};
use crate::types::*;
use log::{debug, error, info, warn};
use tokio::sync::{broadcast, mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

type ExchangeResult<T> = std::result::Result<T, ExchangeError>;
type Reply<T> = oneshot::Sender<ExchangeResult<T>>;

/// A request for the IO task
pub(crate) enum Request {
    /// Liveness probe; answers with the resulting connection state
    Probe {
        reply: oneshot::Sender<ConnectionState>,
    },
    QueryStatus {
        reply: Reply<StatusOutcome>,
    },
    SetParameters {
        params: EmitterParameters,
        reply: Reply<EmitterParameters>,
    },
    EmissionOn {
        reply: Reply<()>,
    },
    EmissionOff {
        reply: Reply<()>,
    },
}

/// Main X-ray emitter interface
///
/// Cheap calls (`is_connected`, `connection_state`) read a watch channel;
/// every device operation is one queued exchange.
pub struct Emitter {
    requests: mpsc::Sender<Request>,
    state: watch::Receiver<ConnectionState>,
    events: broadcast::Sender<EmitterEvent>,
    cancel: CancellationToken,
    task: Option<JoinHandle<()>>,
}

impl Emitter {
    /// Open the serial port named in `config` and probe the emitter.
    ///
    /// A port that cannot be opened, or a device that does not answer like the
    /// emitter, is not an error: the handle starts out disconnected.
    pub async fn connect(config: EmitterConfig) -> Result<Self> {
        config.validate()?;
        // the startup probe opens the port
        Ok(Self::start(None, config).await)
    }

    /// Probe the emitter over an already opened transport
    pub async fn with_transport(transport: Box<dyn Transport>, config: EmitterConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self::start(Some(transport), config).await)
    }

    /// List available serial ports
    pub fn list_ports() -> Result<Vec<serialport::SerialPortInfo>> {
        transport::list_ports()
    }

    async fn start(transport: Option<Box<dyn Transport>>, config: EmitterConfig) -> Self {
        let (requests, requests_rx) = mpsc::channel(REQUEST_QUEUE_DEPTH);
        let (beats, beats_rx) = mpsc::channel(HEARTBEAT_QUEUE_DEPTH);
        let (state_tx, state) = watch::channel(ConnectionState::Disconnected);
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        let cancel = CancellationToken::new();

        let protocol = transport.map(|transport| {
            Protocol::new(transport, config.timing.clone(), config.checksum_policy, events.clone())
        });
        let session = Session {
            protocol,
            heartbeat: HeartbeatScheduler::new(config.timing.heartbeat_interval()),
            config,
            state: state_tx,
            events: events.clone(),
            beats,
        };
        let task = tokio::spawn(session.run(requests_rx, beats_rx, cancel.clone()));

        let emitter = Self {
            requests,
            state,
            events,
            cancel,
            task: Some(task),
        };
        emitter.reconnect().await;
        emitter
    }

    pub fn is_connected(&self) -> bool {
        self.state.borrow().is_connected()
    }

    pub fn connection_state(&self) -> ConnectionState {
        *self.state.borrow()
    }

    /// Receiver that observes every connection state change
    pub fn watch_state(&self) -> watch::Receiver<ConnectionState> {
        self.state.clone()
    }

    /// Subscribe to status, parameter and connection events
    pub fn subscribe(&self) -> broadcast::Receiver<EmitterEvent> {
        self.events.subscribe()
    }

    /// Run the liveness probe again, opening the serial port if it is not open yet.
    ///
    /// Ignored while emission is active. Returns whether the emitter answered.
    pub async fn reconnect(&self) -> bool {
        let (reply, response) = oneshot::channel();
        if self.requests.send(Request::Probe { reply }).await.is_err() {
            return false;
        }
        response.await.is_ok_and(ConnectionState::is_connected)
    }

    /// Request the emitter's status.
    ///
    /// Device faults come back as data in the outcome. State or fault codes
    /// outside the known sets are an [`ExchangeError::UnexpectedResponse`],
    /// which fails the liveness probe and, while emission is active, counts
    /// as a failed heartbeat and disconnects.
    pub async fn query_status(&self) -> ExchangeResult<StatusOutcome> {
        self.request(|reply| Request::QueryStatus { reply }).await
    }

    /// Send parameters; returns the values now active on the device
    pub async fn set_parameters(&self, params: EmitterParameters) -> ExchangeResult<EmitterParameters> {
        self.request(|reply| Request::SetParameters { params, reply })
            .await
    }

    /// Switch emission on and start the heartbeat
    pub async fn emission_on(&self) -> ExchangeResult<()> {
        self.request(|reply| Request::EmissionOn { reply }).await
    }

    /// Switch emission off and stop the heartbeat
    pub async fn emission_off(&self) -> ExchangeResult<()> {
        self.request(|reply| Request::EmissionOff { reply }).await
    }

    pub async fn set_features(
        &self,
        voltage: u16,
        current: u16,
        work_time: u16,
        cool_time: u16,
    ) -> ExchangeResult<EmitterParameters> {
        self.set_parameters(EmitterParameters::new(voltage, current, work_time, cool_time))
            .await
    }

    pub async fn turn_on_xray(&self) -> ExchangeResult<()> {
        self.emission_on().await
    }

    pub async fn turn_off_xray(&self) -> ExchangeResult<()> {
        self.emission_off().await
    }

    /// Switch emission off if it is on, then stop the IO task
    pub async fn shutdown(mut self) {
        if self.connection_state() == ConnectionState::EmissionActive {
            if let Err(e) = self.emission_off().await {
                error!("Could not switch emission off during shutdown: {}", e);
            }
        }
        self.cancel.cancel();
        if let Some(task) = self.task.take() {
            let _ = task.await;
        }
    }

    async fn request<T>(&self, make: impl FnOnce(Reply<T>) -> Request) -> ExchangeResult<T> {
        let (reply, response) = oneshot::channel();
        self.requests
            .send(make(reply))
            .await
            .map_err(|_| ExchangeError::NotConnected)?;
        response.await.map_err(|_| ExchangeError::NotConnected)?
    }
}

impl Drop for Emitter {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

/// State owned by the IO task
struct Session {
    protocol: Option<Protocol>,
    config: EmitterConfig,
    state: watch::Sender<ConnectionState>,
    events: broadcast::Sender<EmitterEvent>,
    heartbeat: HeartbeatScheduler,
    beats: mpsc::Sender<Beat>,
}

impl Session {
    async fn run(
        mut self,
        mut requests: mpsc::Receiver<Request>,
        mut beats: mpsc::Receiver<Beat>,
        cancel: CancellationToken,
    ) {
        loop {
            tokio::select! {
                biased;

                _ = cancel.cancelled() => {
                    debug!("IO task cancelled");
                    break;
                }

                // the session holds a sender, so this never yields None
                Some(reply) = beats.recv() => {
                    let result = self.heartbeat().await;
                    let _ = reply.send(result);
                }

                request = requests.recv() => match request {
                    Some(request) => self.handle(request).await,
                    None => {
                        debug!("Request channel closed, exiting IO task");
                        break;
                    }
                }
            }
        }
        self.heartbeat.stop();
    }

    async fn handle(&mut self, request: Request) {
        match request {
            Request::Probe { reply } => {
                let state = self.probe().await;
                let _ = reply.send(state);
            }
            Request::QueryStatus { reply } => {
                let result = self.query_status().await;
                let _ = reply.send(result);
            }
            Request::SetParameters { params, reply } => {
                let result = self.set_parameters(params).await;
                let _ = reply.send(result);
            }
            Request::EmissionOn { reply } => {
                let result = self.emission_on().await;
                let _ = reply.send(result);
            }
            Request::EmissionOff { reply } => {
                let result = self.emission_off().await;
                let _ = reply.send(result);
            }
        }
    }

    fn current(&self) -> ConnectionState {
        *self.state.borrow()
    }

    /// The protocol, if the emitter is connected
    fn connected(&mut self) -> ExchangeResult<&mut Protocol> {
        if !self.current().is_connected() {
            return Err(ExchangeError::NotConnected);
        }
        self.protocol.as_mut().ok_or(ExchangeError::NotConnected)
    }

    fn set_state(&mut self, next: ConnectionState) {
        let changed = self.state.send_if_modified(|state| {
            if *state == next {
                return false;
            }
            *state = next;
            true
        });
        if changed {
            info!("Emitter {}", next);
            let _ = self.events.send(EmitterEvent::ConnectionChanged(next));
        }
    }

    async fn probe(&mut self) -> ConnectionState {
        if self.current() == ConnectionState::EmissionActive {
            debug!("Probe ignored while emission is active");
            return ConnectionState::EmissionActive;
        }
        if self.protocol.is_none() {
            self.protocol = self.open_port();
        }
        let Some(protocol) = self.protocol.as_mut() else {
            self.set_state(ConnectionState::Disconnected);
            return ConnectionState::Disconnected;
        };

        match protocol.query_status().await {
            Ok(outcome) => {
                info!("The X-ray emitter is connected");
                self.set_state(ConnectionState::Connected);
                let _ = self.events.send(EmitterEvent::Status(StatusReport::now(outcome)));
            }
            Err(e) => {
                warn!("No X-ray emitter answered on {}: {}", self.config.port_name, e);
                self.set_state(ConnectionState::Disconnected);
            }
        }
        self.current()
    }

    fn open_port(&self) -> Option<Protocol> {
        match SerialTransport::open(&self.config) {
            Ok(port) => {
                info!("Opened {} at {} baud", port.port_name(), self.config.baud_rate);
                Some(Protocol::new(
                Box::new(port),
                self.config.timing.clone(),
                self.config.checksum_policy,
                self.events.clone(),
                ))
            }
            Err(e) => {
                warn!("The serial port {} could not be opened: {}", self.config.port_name, e);
                None
            }
        }
    }

    async fn query_status(&mut self) -> ExchangeResult<StatusOutcome> {
        let outcome = self.connected()?.query_status().await?;
        let _ = self.events.send(EmitterEvent::Status(StatusReport::now(outcome)));
        Ok(outcome)
    }

    async fn set_parameters(&mut self, params: EmitterParameters) -> ExchangeResult<EmitterParameters> {
        let applied = self.connected()?.set_parameters(params).await?;
        let _ = self.events.send(EmitterEvent::ParametersApplied(applied));
        Ok(applied)
    }

    async fn emission_on(&mut self) -> ExchangeResult<()> {
        self.connected()?.emission_on().await?;
        self.set_state(ConnectionState::EmissionActive);
        self.heartbeat.start(self.beats.downgrade());
        Ok(())
    }

    async fn emission_off(&mut self) -> ExchangeResult<()> {
        self.connected()?.emission_off().await?;
        self.heartbeat.stop();
        self.set_state(ConnectionState::Connected);
        Ok(())
    }

    async fn heartbeat(&mut self) -> ExchangeResult<StatusOutcome> {
        // stale heartbeat queued before emission went off
        if self.current() != ConnectionState::EmissionActive {
            return Err(ExchangeError::NotConnected);
        }

        match self.query_status().await {
            Ok(outcome) => Ok(outcome),
            Err(e) => {
                error!("Heartbeat failed, emitter considered disconnected: {}", e);
                self.heartbeat.stop();
                self.set_state(ConnectionState::Disconnected);
                let _ = self.events.send(EmitterEvent::HeartbeatFailed {
                    reason: e.to_string(),
                });
                Err(e)
            }
        }
    }
}
