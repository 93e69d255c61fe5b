//! Basic Usage Example
//!
//! This example demonstrates the core functionality of the emitter library:
//! - Listing and selecting serial ports
//! - Establishing the emitter connection
//! - Setting operating parameters
//! - Switching emission on for a few seconds while the heartbeat runs
//! - Switching emission off again
//!
//! Usage:
//!   cargo run --example basic_usage                  # Interactive mode
//!   cargo run --example basic_usage -- COM3          # Specify port
//!   cargo run --example basic_usage -- /dev/ttyUSB0
//!
//! Set RUST_LOG environment variable to control logging:
//!   RUST_LOG=trace cargo run --example basic_usage   # includes frame dumps
//!   RUST_LOG=info cargo run --example basic_usage

use inquire::Select;
use log::{error, info};
use std::time::Duration;
use xray_emitter::{Emitter, EmitterConfig, EmitterEvent, Result};

/// Interactive serial port selection using inquire
fn select_port() -> Result<String> {
    let ports = Emitter::list_ports()?;

    if ports.is_empty() {
        eprintln!("No serial ports found!");
        std::process::exit(1);
    }

    let port_names: Vec<String> = ports
        .iter()
        .map(|p| format!("{} - {:?}", p.port_name, p.port_type))
        .collect();

    let selection = Select::new("Select a serial port:", port_names)
        .prompt()
        .map_err(|e| {
            std::io::Error::new(
                std::io::ErrorKind::Other,
                format!("Selection cancelled: {}", e),
            )
        })?;

    // Extract just the port name (before " - ")
    let port_name = selection.split(" - ").next().unwrap_or_default().to_string();
    Ok(port_name)
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logger with default info level if RUST_LOG is not set
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    // Get port name from command line argument or interactive selection
    let port_name = std::env::args()
        .nth(1)
        .map(Ok)
        .unwrap_or_else(select_port)?;

    info!("Connecting to the X-ray emitter on {}...", port_name);
    let emitter = Emitter::connect(EmitterConfig::for_port(&port_name)).await?;

    if !emitter.is_connected() {
        error!("✗ No emitter answered on {}", port_name);
        return Ok(());
    }
    info!("✓ Emitter connection established");

    // Print every event the library publishes
    let mut events = emitter.subscribe();
    tokio::spawn(async move {
        while let Ok(event) = events.recv().await {
            match event {
                EmitterEvent::Status(report) => info!(
                    "[{}] {} / {}",
                    report.timestamp.format("%H:%M:%S%.3f"),
                    report.outcome.state,
                    report.outcome.fault
                ),
                other => info!("{:?}", other),
            }
        }
    });

    info!("=== Setting Parameters ===");
    let applied = emitter.set_features(1000, 50, 30, 60).await?;
    info!("Device confirmed {:?}", applied);

    info!("=== Emission Test ===");
    emitter.turn_on_xray().await?;
    tokio::time::sleep(Duration::from_secs(5)).await;
    emitter.turn_off_xray().await?;

    let status = emitter.query_status().await?;
    info!("Final status: {} ({})", status.state, status.fault);

    emitter.shutdown().await;
    info!("=== Basic Usage Complete ===");

    Ok(())
}
