//! Example: Reading One Measurement
//!
//! This example connects to a TC66C meter, resolves its characteristics,
//! requests a single measurement and prints the decoded values.
//!
//! Run with: `cargo run --example read_meter -- <DEVICE_ADDRESS>`

use std::env;

use tc66_core::{
    ConnectionConfig, Device, GattLink, RequestOptions, codec, request_measurement, resolve,
};
use tokio_util::sync::CancellationToken;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize logging
    tracing_subscriber::fmt::init();

    let args: Vec<String> = env::args().collect();
    let address = if args.len() > 1 {
        &args[1]
    } else {
        eprintln!("Usage: {} <DEVICE_ADDRESS>", args[0]);
        eprintln!();
        eprintln!("Example:");
        eprintln!("  {} AA:BB:CC:DD:EE:FF", args[0]);
        std::process::exit(1);
    };

    let cancel = CancellationToken::new();
    println!("Connecting to {}...", address);
    let device = Device::connect(address, ConnectionConfig::default(), &cancel).await?;
    println!("Connected!");

    let session = resolve(&device).await?;
    println!("Firmware:    {:?}", session.variant);
    println!("Write mode:  {:?}", session.write_mode());

    let frame = request_measurement(&device, &session, &RequestOptions::default(), &cancel).await?;
    let reading = codec::decode(&frame)?;

    println!();
    println!("Measurement:");
    println!("  Voltage: {:.4} V", reading.voltage);
    println!("  Current: {:.5} A", reading.current);
    println!("  Power:   {:.4} W", reading.power);

    device.disconnect().await?;
    println!();
    println!("Disconnected.");

    Ok(())
}
