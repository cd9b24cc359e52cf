//! `dds-ctl`: command-line control of the coherent DDS and its AOMs.
//!
//! ```bash
//! # talk to simulated hardware
//! dds-ctl --simulation set-profile rPara 2.871e9 --profile 1
//!
//! # real board on a given port
//! dds-ctl --config config/raman.toml --device /dev/ttyUSB1 identity
//!
//! # sidebands at +/- 1.2 MHz around the calibration drive
//! dds-ctl --config config/raman.toml bichromat 1.2e6 --phase 30
//! ```
//!
//! A device that cannot be reached at startup aborts the command with a
//! non-zero exit status.

#[cfg(not(test))]
#[global_allocator]
static GLOBAL: mimalloc::MiMalloc = mimalloc::MiMalloc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use dds_core::driver::Capability;
use dds_core::timing::MachineUnits;
use dds_hardware::{
    create_registry_from_config, AomInterface, BichromaticRequest, DeviceRegistry,
    MappingOptions, ProfileLedger, QubitReference, SystemConfig,
};
use std::path::PathBuf;
use std::process;
use tracing_subscriber::EnvFilter;

// =============================================================================
// CLI Argument Structure
// =============================================================================

#[derive(Parser, Debug)]
#[command(name = "dds-ctl")]
#[command(version)]
#[command(about = "Program the coherent DDS through its AOM frequency mapping", long_about = None)]
struct Cli {
    /// System configuration file (TOML)
    #[arg(long, global = true, conflicts_with = "simulation")]
    config: Option<PathBuf>,

    /// Use simulated devices instead of a configuration file
    #[arg(long, global = true)]
    simulation: bool,

    /// Override the DDS reference clock in Hz
    #[arg(long, global = true)]
    clock_hz: Option<f64>,

    /// Serial port of the DDS; switches every DDS to the serial driver
    #[arg(long, global = true, value_name = "PORT")]
    device: Option<String>,

    /// More logging (-v debug, -vv trace)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    /// Only log warnings and errors
    #[arg(short, long, global = true, conflicts_with = "verbose")]
    quiet: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Query the identification string of every DDS
    Identity,

    /// Program a logical frequency on a named AOM
    SetProfile {
        /// AOM name, e.g. rPara
        aom: String,
        /// Logical frequency in Hz
        frequency_hz: f64,
        /// Profile slot
        #[arg(long, default_value_t = 1)]
        profile: u8,
        /// Amplitude in [0, 1]
        #[arg(long, default_value_t = 1.0)]
        amplitude: f64,
        /// Phase in degrees
        #[arg(long, default_value_t = 0.0)]
        phase: f64,
        /// Qubit transition the detuning is measured from
        #[arg(long, value_enum, default_value_t = Reference::Carrier)]
        reference: Reference,
        /// Treat the frequency as a calibration offset, not a detuning
        #[arg(long, conflicts_with = "reference")]
        calibration: bool,
    },

    /// Program an RF frequency directly (full amplitude, zero phase)
    SetAom {
        /// AOM name
        aom: String,
        /// RF frequency in Hz, before the order division
        frequency_hz: f64,
        /// Profile slot
        #[arg(long, default_value_t = 0)]
        profile: u8,
    },

    /// Switch a named AOM to a profile
    Select {
        /// AOM name
        aom: String,
        /// Profile slot
        profile: u8,
    },

    /// Symmetric red/blue sideband pair on the configured AOMs
    Bichromat {
        /// Sideband offset in Hz
        sideband_hz: f64,
        /// Phase in degrees (blue +phase, red -phase)
        #[arg(long, default_value_t = 0.0)]
        phase: f64,
        /// Red sideband amplitude override
        #[arg(long)]
        red_amplitude: Option<f64>,
        /// Blue sideband amplitude override
        #[arg(long)]
        blue_amplitude: Option<f64>,
    },

    /// Load the sensible pulse shape on the pulse-shape AOM
    PulseShape {
        /// Ramp duration in microseconds; 0 leaves the table unchanged
        #[arg(long, default_value_t = 2.0)]
        duration_us: f64,
        /// Also play one shaped pulse of this length (machine units)
        #[arg(long)]
        pulse_mu: Option<MachineUnits>,
    },

    /// Reset the phase accumulators of every DDS
    ResetPhase,

    /// List registered devices
    Devices,

    /// Show what each profile slot was last programmed with
    Profiles,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum Reference {
    Carrier,
    Clock,
    Strontium,
}

impl From<Reference> for QubitReference {
    fn from(reference: Reference) -> Self {
        match reference {
            Reference::Carrier => QubitReference::Carrier,
            Reference::Clock => QubitReference::Clock,
            Reference::Strontium => QubitReference::Strontium,
        }
    }
}

// =============================================================================
// Main Entry Point
// =============================================================================

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    init_logging(cli.verbose, cli.quiet);

    if let Err(e) = run(cli).await {
        tracing::error!("{:#}", e);
        eprintln!("error: {:#}", e);
        process::exit(1);
    }
}

fn init_logging(verbose: u8, quiet: bool) {
    let default_level = match (quiet, verbose) {
        (true, _) => "warn",
        (false, 0) => "info",
        (false, 1) => "debug",
        (false, _) => "trace",
    };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

fn load_config(cli: &Cli) -> Result<SystemConfig> {
    let config = match (&cli.config, cli.simulation) {
        (Some(path), _) => SystemConfig::from_file(path)
            .with_context(|| format!("Failed to load {}", path.display()))?,
        (None, true) => SystemConfig::simulation()?,
        (None, false) => anyhow::bail!("either --config <FILE> or --simulation is required"),
    };
    Ok(config.with_dds_overrides(cli.device.as_deref(), cli.clock_hz))
}

// =============================================================================
// Core Logic
// =============================================================================

async fn run(cli: Cli) -> Result<()> {
    let config = load_config(&cli)?;
    let registry = create_registry_from_config(&config)
        .await
        .context("Hardware startup failed")?;

    let result = execute(&cli.command, &config, &registry).await;
    registry.shutdown();
    result
}

async fn execute(command: &Command, config: &SystemConfig, registry: &DeviceRegistry) -> Result<()> {
    match command {
        Command::Identity => {
            for device in registry.list_devices() {
                if let Some(dds) = registry.get_profile_programmable(&device.id) {
                    println!("{}: {}", device.id, dds.identity().await?);
                }
            }
        }
        Command::Devices => {
            for device in registry.list_devices() {
                let capabilities: Vec<&str> =
                    device.capabilities.iter().map(Capability::name).collect();
                println!(
                    "{:<12} {:<16} {:<28} [{}]",
                    device.id,
                    device.driver_type,
                    device.name,
                    capabilities.join(", ")
                );
                if let Some(address) = &device.metadata.address {
                    println!("{:<12} address: {}", "", address);
                }
            }
        }
        Command::Profiles => {
            let aoms = interface(config, registry)?;
            if aoms.ledger().path().is_none() {
                tracing::warn!("no ledger_path configured; only this run's writes are known");
            }
            for line in ledger_lines(aoms.ledger()) {
                println!("{}", line);
            }
        }
        Command::ResetPhase => {
            interface(config, registry)?.reset_phase().await?;
            println!("phase reset");
        }
        Command::SetProfile {
            aom,
            frequency_hz,
            profile,
            amplitude,
            phase,
            reference,
            calibration,
        } => {
            let options = if *calibration {
                MappingOptions::calibration()
            } else {
                MappingOptions::detuning((*reference).into())
            };
            let aoms = interface(config, registry)?;
            aoms.set_profile(aom, *frequency_hz, *profile, *amplitude, *phase, &options)
                .await?;
            let dds_hz = aoms.aom(aom)?.physical_frequency(aoms.lsb_round(*frequency_hz), &options)?;
            println!("{} profile {}: {:.6} MHz", aom, profile, dds_hz / 1e6);
        }
        Command::SetAom {
            aom,
            frequency_hz,
            profile,
        } => {
            interface(config, registry)?
                .debug_set_profile(aom, *frequency_hz, *profile)
                .await?;
            println!("{} profile {}: {:.6} MHz (direct)", aom, profile, frequency_hz / 1e6);
        }
        Command::Select { aom, profile } => {
            let switch = interface(config, registry)?.set_to_profile(aom, *profile).await?;
            println!(
                "{} -> profile {} (written at {} mu, active at {} mu)",
                aom, profile, switch.write_at_mu, switch.active_at_mu
            );
        }
        Command::Bichromat {
            sideband_hz,
            phase,
            red_amplitude,
            blue_amplitude,
        } => {
            let request = BichromaticRequest {
                red_amplitude: *red_amplitude,
                blue_amplitude: *blue_amplitude,
                ..Default::default()
            };
            let tones = interface(config, registry)?
                .set_bichromat(*sideband_hz, *phase, request)
                .await?;
            println!(
                "blue {:+.3} Hz amp {:.4}, red {:+.3} Hz amp {:.4}",
                tones.blue.frequency_hz,
                tones.blue.amplitude,
                tones.red.frequency_hz,
                tones.red.amplitude
            );
        }
        Command::PulseShape {
            duration_us,
            pulse_mu,
        } => {
            let aoms = interface(config, registry)?;
            aoms.set_sensible_pulse_shape(duration_us * 1e-6).await?;
            if let Some(duration_mu) = pulse_mu {
                aoms.pulse_shape_pulse(*duration_mu).await?;
            }
            println!("pulse shape {} us loaded", duration_us);
        }
    }
    Ok(())
}

fn interface(config: &SystemConfig, registry: &DeviceRegistry) -> Result<AomInterface> {
    AomInterface::from_config(config, registry)
}

/// One line per recorded slot, keyed `device/channel/profile`.
fn ledger_lines(ledger: &ProfileLedger) -> Vec<String> {
    ledger
        .entries()
        .iter()
        .map(|(slot, setting)| {
            format!(
                "{:<12} {:>14.6} MHz {:>8.3} deg amp {:.4}",
                slot,
                setting.frequency_hz / 1e6,
                setting.phase_deg,
                setting.amplitude
            )
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn parses_set_profile() {
        let cli = Cli::parse_from([
            "dds-ctl",
            "--simulation",
            "set-profile",
            "rPara",
            "2.871e9",
            "--reference",
            "clock",
        ]);
        match cli.command {
            Command::SetProfile {
                profile, reference, ..
            } => {
                assert_eq!(profile, 1);
                assert!(matches!(reference, Reference::Clock));
            }
            other => panic!("unexpected command {other:?}"),
        }
        assert!(cli.simulation);
    }

    #[test]
    fn config_and_simulation_conflict() {
        let parsed = Cli::try_parse_from([
            "dds-ctl",
            "--simulation",
            "--config",
            "x.toml",
            "devices",
        ]);
        assert!(parsed.is_err());
    }

    #[tokio::test]
    async fn profiles_lists_ledger_slots() {
        let config = SystemConfig::simulation().unwrap();
        let registry = create_registry_from_config(&config).await.unwrap();
        let aoms = AomInterface::from_config(&config, &registry).unwrap();
        aoms.debug_set_profile("rPara", 210e6, 0).await.unwrap();

        let lines = ledger_lines(aoms.ledger());
        assert_eq!(lines.len(), 2);
        assert!(lines[0].starts_with("dds/0/0"));
        assert!(lines[0].contains("210.000000 MHz"));
        assert!(lines[1].starts_with("dds/0/7"));
        assert!(lines[1].contains("amp 0.0000"));
    }

    #[tokio::test]
    async fn simulation_round_trip() {
        let cli = Cli::parse_from(["dds-ctl", "--simulation", "select", "rPara", "1"]);
        run(cli).await.unwrap();
    }
}
