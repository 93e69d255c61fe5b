//! Periodic status requests that keep emission alive.
//!
//! The controller switches emission off when it hears nothing from the host
//! for a second. While emission is active the scheduler pushes a heartbeat
//! into its own channel every period. The IO task drains that channel before
//! the user request queue, so a heartbeat waits behind at most the exchange
//! already on the line.

use crate::error::ExchangeError;
use crate::types::StatusOutcome;
use log::{debug, trace};
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::{self, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

/// Reply slot of one heartbeat, answered by the IO task
pub(crate) type Beat = oneshot::Sender<Result<StatusOutcome, ExchangeError>>;

struct Running {
    cancel: CancellationToken,
    task: JoinHandle<()>,
}

/// Start/stop handle for the heartbeat task
pub(crate) struct HeartbeatScheduler {
    period: Duration,
    running: Option<Running>,
}

impl HeartbeatScheduler {
    pub(crate) fn new(period: Duration) -> Self {
        Self {
            period,
            running: None,
        }
    }

    /// Spawn the heartbeat task unless one is already running.
    ///
    /// The first heartbeat goes out one period from now.
    pub(crate) fn start(&mut self, beats: mpsc::WeakSender<Beat>) {
        if self.is_running() {
            return;
        }
        let cancel = CancellationToken::new();
        let task = tokio::spawn(run(self.period, beats, cancel.clone()));
        debug!("Heartbeat started, every {}ms", self.period.as_millis());
        self.running = Some(Running { cancel, task });
    }

    pub(crate) fn stop(&mut self) {
        if let Some(running) = self.running.take() {
            running.cancel.cancel();
            debug!("Heartbeat stopped");
        }
    }

    pub(crate) fn is_running(&self) -> bool {
        self.running
            .as_ref()
            .is_some_and(|running| !running.task.is_finished())
    }
}

impl Drop for HeartbeatScheduler {
    fn drop(&mut self) {
        self.stop();
    }
}

async fn run(period: Duration, beats: mpsc::WeakSender<Beat>, cancel: CancellationToken) {
    let mut ticker = time::interval_at(Instant::now() + period, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            _ = ticker.tick() => {}
        }

        let outcome = tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            outcome = beat(&beats) => outcome,
        };
        match outcome {
            Some(Ok(status)) => trace!("Heartbeat answered: {}", status.state),
            Some(Err(e)) => {
                debug!("Heartbeat task exiting after failed exchange: {}", e);
                break;
            }
            None => break,
        }
    }
}

/// Queue one heartbeat and wait for its answer. `None` once the client is gone.
async fn beat(beats: &mpsc::WeakSender<Beat>) -> Option<Result<StatusOutcome, ExchangeError>> {
    let sender = beats.upgrade()?;
    let (reply, response) = oneshot::channel();
    sender.send(reply).await.ok()?;
    drop(sender);
    response.await.ok()
}
