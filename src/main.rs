//! `apt-motion`: drive one APT controller from the command line.
//!
//! The controller comes from the config file (`--controller <id>`, or the only
//! one defined) and can be overridden or given entirely with `--port`,
//! `--topology` and `--stage`. `--mock` runs every command against the
//! simulated controller instead of a serial port.
//!
//! # Usage
//!
//! ```bash
//! apt-motion --port /dev/ttyUSB0 --topology cube --stage DDSM100 home
//! apt-motion --controller azimuth move 12.5
//! apt-motion --mock status --watch --interval-ms 250
//! ```

use anyhow::{bail, Context, Result};
use apt_motion::config::{AptConfig, ControllerDefinition, DEFAULT_CONFIG_PATH};
use apt_motion::connect::{mock_controller, mock_session, open_session, resolve_port, MOCK_SERIAL_NUMBER};
use apt_motion::logging;
use apt_motion::monitor::{watch_status, StatusSample};
use apt_core::serial::DynLink;
use apt_driver_thorlabs::{
    probe, read_hardware_info, read_hardware_info_from, ControllerSession, SessionConfig,
};
use apt_protocol::address::COMPACT_ADDRESS;
use apt_protocol::{ControllerTopology, DeviceInfo};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::time::Duration;

#[derive(Parser)]
#[command(name = "apt-motion")]
#[command(about = "Drive Thorlabs APT motion controllers over a serial link", long_about = None)]
struct Cli {
    /// Configuration file
    #[arg(long, default_value = DEFAULT_CONFIG_PATH)]
    config: PathBuf,

    /// Controller id from the configuration file
    #[arg(long, short = 'c')]
    controller: Option<String>,

    /// Serial port path (overrides the configuration)
    #[arg(long)]
    port: Option<String>,

    /// Controller topology: compact/cube or rack/benchtop
    #[arg(long)]
    topology: Option<String>,

    /// Stage preset: DDSM100, NRT150 or PRMTZ8
    #[arg(long)]
    stage: Option<String>,

    /// Channel number (1-based)
    #[arg(long, default_value_t = 1)]
    channel: u8,

    /// Use a simulated controller instead of a serial port
    #[arg(long)]
    mock: bool,

    /// Log level (overrides the configuration)
    #[arg(long)]
    log_level: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Print the controller's hardware information
    Info,
    #[command(flatten)]
    Session(SessionCommand),
}

/// Commands that run inside an initialized session.
#[derive(Subcommand)]
enum SessionCommand {
    /// Enable the channel
    Enable,
    /// Disable the channel
    Disable,
    /// Flash the controller's front panel LED
    Identify,
    /// Home the channel
    Home {
        /// Return without waiting for the homed confirmation
        #[arg(long)]
        no_wait: bool,
    },
    /// Move to an absolute position in physical units
    Move {
        /// Target position (mm or degrees)
        #[arg(allow_hyphen_values = true)]
        position: f64,
        /// Return without waiting for the move-completed confirmation
        #[arg(long)]
        no_wait: bool,
    },
    /// Print the position counter
    Position,
    /// Print the encoder counter
    Encoder,
    /// Print position and velocity from a status update
    Status {
        /// Keep polling until interrupted
        #[arg(long)]
        watch: bool,
        /// Milliseconds between polls when watching
        #[arg(long, default_value_t = 500)]
        interval_ms: u64,
        /// Stop after this many polls when watching
        #[arg(long)]
        samples: Option<usize>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut config = AptConfig::load_from(&cli.config)
        .with_context(|| format!("Failed to load {}", cli.config.display()))?;
    if let Some(level) = &cli.log_level {
        config.application.log_level = level.clone();
    }
    config.validate()?;
    logging::init_from_config(&config)?;

    let definition = select_definition(&cli, &config)?;
    tracing::debug!(controller = %definition.id, mock = cli.mock, "Selected controller");

    let command = match &cli.command {
        Commands::Info => {
            let info = if cli.mock {
                let mut sim = mock_controller(&definition);
                read_hardware_info_from(&mut sim, COMPACT_ADDRESS, definition.session.options().read_timeout)
                    .await?
            } else {
                query_info(&definition, &config).await?
            };
            print_info(&info);
            return Ok(());
        }
        Commands::Session(command) => command,
    };

    let mut session = if cli.mock {
        let sim = mock_controller(&definition);
        mock_session(&definition, &sim)?
    } else {
        open_session(&definition, &config.discovery).await?
    };

    let outcome = run_command(&mut session, cli.channel, command).await;
    let closed = session.close().await;
    outcome?;
    closed?;
    Ok(())
}

/// Pick the controller definition and apply command-line overrides.
fn select_definition(cli: &Cli, config: &AptConfig) -> Result<ControllerDefinition> {
    let mut definition = match (&cli.controller, config.controllers.as_slice()) {
        (Some(id), _) => config
            .controller(id)
            .cloned()
            .with_context(|| format!("No controller '{}' in configuration", id))?,
        (None, [only]) if cli.port.is_none() => only.clone(),
        (None, _) => {
            let topology = match &cli.topology {
                Some(t) => t.parse()?,
                None => ControllerTopology::Compact,
            };
            let stage = cli.stage.as_deref().unwrap_or("DDSM100");
            let mut session = SessionConfig::for_stage("", topology, stage);
            session.port = cli.port.clone();
            ControllerDefinition {
                id: "cli".to_string(),
                serial_number: cli.mock.then_some(MOCK_SERIAL_NUMBER),
                session,
            }
        }
    };

    if let Some(port) = &cli.port {
        definition.session.port = Some(port.clone());
    }
    if let Some(topology) = &cli.topology {
        definition.session.topology = topology.parse()?;
    }
    if let Some(stage) = &cli.stage {
        definition.session.stage = Some(stage.clone());
        definition.session.scale_factors = None;
    }
    if cli.mock && definition.session.port.is_none() && definition.serial_number.is_none() {
        definition.serial_number = Some(MOCK_SERIAL_NUMBER);
    }
    definition.validate()?;
    Ok(definition)
}

async fn query_info(definition: &ControllerDefinition, config: &AptConfig) -> Result<DeviceInfo> {
    let port = resolve_port(definition, &config.discovery).await?;
    let settings = config.discovery.serial_settings();
    let outcome = probe(&port, &settings).await?;
    if !outcome.is_present() {
        bail!("No APT controller answered on {}", port);
    }
    Ok(read_hardware_info(&port, outcome.destination(), &settings).await?)
}

async fn run_command(
    session: &mut ControllerSession<DynLink>,
    channel: u8,
    command: &SessionCommand,
) -> Result<()> {
    session.initialize(channel).await?;

    match command {
        SessionCommand::Enable => {
            session.enable(channel).await?;
            println!("✅ Channel {} enabled", channel);
        }
        SessionCommand::Disable => {
            session.disable(channel).await?;
            println!("✅ Channel {} disabled", channel);
        }
        SessionCommand::Identify => {
            session.identify(channel).await?;
            println!("💡 Identify sent to channel {}", channel);
        }
        SessionCommand::Home { no_wait } => {
            session.home(channel, !no_wait).await?;
            if *no_wait {
                println!("Homing channel {}", channel);
            } else {
                println!("✅ Channel {} homed", channel);
            }
        }
        SessionCommand::Move { position, no_wait } => {
            session.move_absolute(*position, channel, !no_wait).await?;
            if *no_wait {
                println!("Moving channel {} to {}", channel, position);
            } else {
                let reached = session.get_position(channel).await?;
                println!("✅ Channel {} at {:.4}", channel, reached);
            }
        }
        SessionCommand::Position => {
            println!("{:.4}", session.get_position(channel).await?);
        }
        SessionCommand::Encoder => {
            println!("{:.4}", session.get_encoder_count(channel).await?);
        }
        SessionCommand::Status {
            watch,
            interval_ms,
            samples,
        } => {
            let limit = if *watch { *samples } else { Some(1) };
            let interval = Duration::from_millis(*interval_ms);
            tokio::select! {
                result = watch_status(session, channel, interval, limit, print_sample) => {
                    result?;
                }
                _ = tokio::signal::ctrl_c() => {
                    tracing::info!("Interrupted");
                }
            }
        }
    }
    Ok(())
}

fn print_sample(sample: &StatusSample) {
    println!(
        "{:>8.3}s  position {:>12.4}  velocity {:>10.4}  bits 0x{:08X}",
        sample.elapsed.as_secs_f64(),
        sample.report.position,
        sample.report.velocity,
        sample.report.status_bits
    );
}

fn print_info(info: &DeviceInfo) {
    println!("Model:            {}", info.model);
    println!("Serial number:    {}", info.serial_number);
    println!("Firmware:         {}", info.firmware_version_string());
    println!("Hardware version: {}", info.hardware_version);
    println!("Channels:         {}", info.channel_count);
    if !info.notes.is_empty() {
        println!("Notes:            {}", info.notes);
    }
}
