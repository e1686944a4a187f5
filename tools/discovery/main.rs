/*
 * APT Controller Discovery Tool
 *
 * Lists serial ports whose USB description carries the APT marker, probes
 * each with a hardware-info request to the compact controller address and
 * prints the identity of every controller that answers.
 *
 * Do not run this while a controller is moving under another process: the
 * probe clears the port's buffers. Ports held by a session in this process
 * are reported as busy and skipped.
 */

use anyhow::{Context, Result};
use apt_core::serial::SerialSettings;
use apt_driver_thorlabs::{
    discover_on, enumerate_candidate_ports, DiscoveredController, SystemPorts,
    DEFAULT_PORT_MARKER,
};
use apt_motion::logging::{self, OutputFormat, TracingConfig};
use clap::Parser;
use std::time::Duration;

#[derive(Parser)]
#[command(name = "discovery")]
#[command(about = "Find Thorlabs APT controllers on serial ports", long_about = None)]
struct Args {
    /// Substring a port description must contain
    #[arg(long, default_value = DEFAULT_PORT_MARKER)]
    marker: String,

    /// Per-read timeout while probing, in milliseconds
    #[arg(long, default_value_t = 100)]
    timeout_ms: u64,

    /// Print results as JSON
    #[arg(long)]
    json: bool,

    /// Log verbosely
    #[arg(long, short = 'v')]
    verbose: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let level = if args.verbose {
        tracing::Level::DEBUG
    } else {
        tracing::Level::WARN
    };
    logging::init(TracingConfig::new(level).with_format(OutputFormat::Compact))?;

    let ports = enumerate_candidate_ports(&args.marker).context("Failed to enumerate ports")?;
    if ports.is_empty() {
        if !args.json {
            println!("❌ No serial ports with '{}' in their description.", args.marker);
        } else {
            println!("[]");
        }
        return Ok(());
    }

    if !args.json {
        println!("🔍 Probing {} candidate port(s)...", ports.len());
        for port in &ports {
            println!("   {}  ({})", port.name, port.description);
        }
    }

    let settings =
        SerialSettings::default().with_read_timeout(Duration::from_millis(args.timeout_ms));
    let found = discover_on(&SystemPorts::new(settings), &ports).await;

    if args.json {
        println!("{}", serde_json::to_string_pretty(&found)?);
    } else {
        print_table(&found);
    }
    Ok(())
}

fn print_table(found: &[DiscoveredController]) {
    if found.is_empty() {
        println!("   (No controller answered)");
        return;
    }
    for controller in found {
        println!(
            "✅ FOUND: {} #{} on {} (firmware {}, {} channel(s))",
            controller.info.model,
            controller.info.serial_number,
            controller.port.name,
            controller.info.firmware_version_string(),
            controller.info.channel_count
        );
    }
}
