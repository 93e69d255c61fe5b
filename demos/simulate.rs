//! Simulation Example
//!
//! Runs the full connect / configure / emit / heartbeat-loss sequence against
//! the built-in simulated controller, so no hardware is needed:
//! - Connecting and probing
//! - Emitting with the heartbeat running
//! - Losing the controller mid-emission and watching the client disconnect
//! - Reconnecting once the controller answers again
//!
//! Usage:
//!   cargo run --example simulate
//!   RUST_LOG=debug cargo run --example simulate

use log::{info, warn};
use std::time::Duration;
use xray_emitter::{Behavior, Emitter, EmitterConfig, EmitterEvent, Result, SimulatedEmitter};

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let (sim, device) = SimulatedEmitter::new();
    let emitter = Emitter::with_transport(Box::new(sim), EmitterConfig::default()).await?;
    info!("Connected: {}", emitter.is_connected());

    let mut events = emitter.subscribe();
    tokio::spawn(async move {
        while let Ok(event) = events.recv().await {
            match event {
                EmitterEvent::HeartbeatFailed { reason } => warn!("Heartbeat lost: {}", reason),
                EmitterEvent::ConnectionChanged(state) => info!("State -> {}", state),
                _ => {}
            }
        }
    });

    emitter.set_features(800, 25, 10, 20).await?;
    emitter.turn_on_xray().await?;
    tokio::time::sleep(Duration::from_secs(3)).await;
    info!(
        "After 3 s: emitting = {}, {} requests seen by the controller",
        device.is_emitting(),
        device.request_count()
    );

    info!("=== Controller stops answering ===");
    device.set_behavior(Behavior::Silent);
    tokio::time::sleep(Duration::from_secs(2)).await;
    info!(
        "Client state: {}, controller emitting: {}, controller fault: {}",
        emitter.connection_state(),
        device.is_emitting(),
        device.fault()
    );

    info!("=== Controller answers again ===");
    device.set_behavior(Behavior::Normal);
    if emitter.reconnect().await {
        let status = emitter.query_status().await?;
        info!("Reconnected, controller reports {} / {}", status.state, status.fault);
    }

    emitter.shutdown().await;
    Ok(())
}
