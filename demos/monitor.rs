//! Thermostat monitor example
//!
//! Polls an Ensto thermostat and prints every decoded state:
//! - Target temperature
//! - Room temperature
//! - Floor temperature
//!
//! Run with: cargo run --example monitor -- --address 90:FD:9F:00:00:01

use ensto_heat_ble::{
    BleScanner, Coordinator, Error, Result, SensorKind, Thermostat, ThermostatConfig,
};
use std::sync::Arc;
use std::time::Duration;

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "warn,ensto_heat_ble=debug".into()),
        )
        .init();

    println!("Ensto Thermostat Monitor");
    println!("========================\n");

    // Parse command line arguments
    let args: Vec<String> = std::env::args().collect();
    let address = args
        .iter()
        .position(|arg| arg == "--address")
        .and_then(|i| args.get(i + 1))
        .cloned()
        .ok_or_else(|| Error::InvalidParameter {
            name: "--address".to_string(),
            value: "missing".to_string(),
        })?;

    println!("Looking for thermostat {}...\n", address);

    let scanner = BleScanner::new().await?;
    let device = scanner
        .find_device(&address, Duration::from_secs(15))
        .await?;

    println!(
        "Found {} (RSSI: {:?})",
        device.handle.display_name(),
        device.handle.rssi
    );

    let thermostat = Arc::new(Thermostat::new(
        device.handle.clone(),
        Arc::new(scanner.connector(&device)),
        ThermostatConfig::default(),
    )?);

    let rssi_watch = {
        let thermostat = thermostat.clone();
        scanner
            .watch_advertisements(&address, move |rssi| thermostat.set_rssi(rssi))
            .await?
    };

    let _handle = thermostat.register_callback(|state| {
        let line: Vec<String> = state
            .readings()
            .map(|(kind, value)| format!("{}: {:.1}{}", kind, value, kind.unit()))
            .collect();
        println!("{}", line.join("  |  "));
    });

    println!("Connecting...\n");

    let coordinator = Coordinator::setup(thermostat.clone()).await?;
    coordinator.start();

    println!(
        "Initial room temperature: {:.1}°C",
        thermostat.state().sensor_value(SensorKind::RoomTemperature)
    );
    println!("Press Ctrl+C to exit\n");

    if let Err(e) = tokio::signal::ctrl_c().await {
        eprintln!("Failed to listen for Ctrl+C: {}", e);
    }

    println!("\nShutting down...");
    rssi_watch.abort();
    coordinator.shutdown().await?;

    Ok(())
}
