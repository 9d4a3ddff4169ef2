//! usblink - USB device command-line tool
//!
//! Lists the devices registered under a device class and sends raw command
//! bytes to the one matching a product token.

use std::time::Duration;

use anyhow::{Context, Result, anyhow, bail};
use clap::{Parser, Subcommand};
use tracing::{debug, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use usblink_core::constants::DEFAULT_TIMEOUT_MS;
use usblink_core::{DeviceClassId, DeviceIdentity, EnumerationFlags};
use usblink_hardware::backend::PlatformOpener;
use usblink_hardware::{
    CommunicationManager, DeviceEnumerator, ManagerConfig, WriteStatus, select_device,
};

#[derive(Parser)]
#[command(name = "usblink")]
#[command(about = "Enumerate USB devices and exchange raw commands with them")]
#[command(version)]
struct Cli {
    /// Verbose logging
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List devices of a device class
    List {
        /// Device interface class
        #[arg(long, default_value_t = DeviceClassId::USB_PRINTER)]
        class: DeviceClassId,

        /// Include every class the platform knows about
        #[arg(long)]
        all_classes: bool,

        /// Output in JSON format for machine parsing
        #[arg(long)]
        json: bool,
    },

    /// Send a command to a device and print its replies
    Send {
        /// Case-insensitive substring of the device path
        #[arg(long)]
        product: String,

        /// Command bytes in hex, e.g. "1d4902" or "1d 49 02"
        #[arg(long)]
        payload: String,

        /// Device interface class
        #[arg(long, default_value_t = DeviceClassId::USB_PRINTER)]
        class: DeviceClassId,

        /// Transfer timeout in milliseconds
        #[arg(long, env = "USBLINK_TIMEOUT_MS", default_value_t = DEFAULT_TIMEOUT_MS)]
        timeout_ms: u64,

        /// Number of reads after the write
        #[arg(long, default_value_t = 1)]
        reads: u32,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let log_level = match cli.verbose {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| format!("usblink={}", log_level).into()),
        )
        .with(
            tracing_subscriber::fmt::layer()
                .with_target(false)
                .with_writer(std::io::stderr),
        )
        .init();

    match cli.command {
        Commands::List {
            class,
            all_classes,
            json,
        } => list(&class, all_classes, json),
        Commands::Send {
            product,
            payload,
            class,
            timeout_ms,
            reads,
        } => send(&class, &product, &payload, timeout_ms, reads),
    }
}

fn enumeration_flags(all_classes: bool) -> EnumerationFlags {
    if all_classes {
        EnumerationFlags::default() | EnumerationFlags::ALL_CLASSES
    } else {
        EnumerationFlags::default()
    }
}

fn enumerate(class: &DeviceClassId, flags: EnumerationFlags) -> Vec<DeviceIdentity> {
    let report = DeviceEnumerator::platform().scan(class, flags);
    for failure in &report.failures {
        eprintln!("warning: {failure}");
    }
    report.devices
}

fn list(class: &DeviceClassId, all_classes: bool, json: bool) -> Result<()> {
    let devices = enumerate(class, enumeration_flags(all_classes));

    if json {
        println!("{}", serde_json::to_string_pretty(&devices)?);
        return Ok(());
    }

    if devices.is_empty() {
        println!("No devices found for class {class}");
        return Ok(());
    }

    for device in &devices {
        println!(
            "{}  port={}  {}",
            device,
            device.port_name().as_deref().unwrap_or("-"),
            device.description().unwrap_or_default()
        );
        println!("    {}", device.path());
    }
    Ok(())
}

fn parse_payload(payload: &str) -> Result<Vec<u8>> {
    let digits: String = payload
        .chars()
        .filter(|c| !c.is_whitespace() && *c != ':')
        .collect();
    let bytes = hex::decode(&digits).with_context(|| format!("invalid hex payload: {payload}"))?;
    if bytes.is_empty() {
        bail!("payload is empty");
    }
    Ok(bytes)
}

fn send(
    class: &DeviceClassId,
    product: &str,
    payload: &str,
    timeout_ms: u64,
    reads: u32,
) -> Result<()> {
    let payload = parse_payload(payload)?;

    let devices = enumerate(class, EnumerationFlags::default());
    let device = select_device(&devices, product)
        .ok_or_else(|| anyhow!("no device of class {class} matches product {product}"))?;
    info!("Selected {}", device.path());

    let config = ManagerConfig::default().with_timeout(Duration::from_millis(timeout_ms));
    let mut manager =
        CommunicationManager::open_with(&PlatformOpener::default(), device.path(), config)?;
    if !manager.is_open() {
        bail!("could not open {}", device.path());
    }

    match manager.write_with_status(&payload)? {
        WriteStatus::Complete => debug!("Sent {} bytes", payload.len()),
        status => bail!("write to {} did not complete: {:?}", device.path(), status),
    }

    for _ in 0..reads {
        let reply = manager.read()?;
        if reply.is_empty() {
            println!("(no reply)");
            break;
        }
        println!("{}  {}", hex::encode(&reply), String::from_utf8_lossy(&reply));
    }

    manager.close();
    Ok(())
}
