/*!
# voltlink CLI

Drives the wireless voltage sensor from a terminal. Commands are read from
stdin one per line and forwarded to the engine; the engine status is
printed on request.

## Usage

### Against the built-in sensor emulator
```bash
voltlink run --simulate
```

### Against real hardware (requires the `ble` feature)
```bash
SENSOR_MAC=AA:BB:CC:DD:EE:FF voltlink --config voltlink.toml run
```

### Generate a configuration file
```bash
voltlink config --output voltlink.toml
```

Interactive commands: `start`, `stop`, `tare`, `range N`, `freq HZ`,
`status`, `quit`.
*/

use std::io::{self, BufRead};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use tracing::{info, warn};

use voltlink::config::AppConfig;
use voltlink::link::{SensorLink, TransportKind};
use voltlink::state::Snapshot;

#[derive(Parser)]
#[command(name = "voltlink")]
#[command(about = "Wireless voltage sensor link")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Configuration file path
    #[arg(short, long, default_value = "voltlink.toml")]
    config: PathBuf,
}

#[derive(Subcommand)]
enum Commands {
    /// Connect to the sensor and accept commands on stdin
    Run {
        /// Use the built-in sensor emulator instead of Bluetooth
        #[arg(long)]
        simulate: bool,

        /// Print status as JSON
        #[arg(long)]
        json: bool,
    },

    /// Generate configuration file
    Config {
        /// Output path for configuration file
        #[arg(short, long, default_value = "voltlink.toml")]
        output: PathBuf,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    // Logs go to stderr; stdout carries status output
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .init();

    match cli.command {
        Commands::Run { simulate, json } => run(cli.config, simulate, json),
        Commands::Config { output } => generate_config_file(output),
    }
}

/// Load the config file if present, then apply environment overrides
fn load_config(path: &Path) -> Result<AppConfig> {
    let mut config = if path.exists() {
        AppConfig::load_from_file(path)?
    } else {
        warn!("⚠️ Config file {} not found, using defaults", path.display());
        AppConfig::new()
    };
    config.apply_env_overrides();
    Ok(config)
}

fn transport_kind(simulate: bool) -> Result<TransportKind> {
    if simulate {
        Ok(TransportKind::Simulated)
    } else {
        hardware_transport()
    }
}

#[cfg(feature = "ble")]
fn hardware_transport() -> Result<TransportKind> {
    Ok(TransportKind::Ble)
}

#[cfg(not(feature = "ble"))]
fn hardware_transport() -> Result<TransportKind> {
    bail!("built without Bluetooth support; rebuild with --features ble or pass --simulate")
}

/// Run the engine and forward stdin commands until `quit`, EOF or Ctrl+C
fn run(config_path: PathBuf, simulate: bool, json: bool) -> Result<()> {
    let config = load_config(&config_path)?;
    let kind = transport_kind(simulate)?;

    println!("🚀 Starting sensor link v{} ({:?})", voltlink_shared::VERSION, kind);
    println!("📡 Peer: {}", config.link.peer_address);

    let link = Arc::new(SensorLink::new(config, kind));
    if !link.start_link() {
        bail!("sensor link already running");
    }

    // Set up Ctrl+C handler
    let ctrlc_link = Arc::clone(&link);
    ctrlc::set_handler(move || {
        println!("\n🛑 Received Ctrl+C, shutting down gracefully...");
        ctrlc_link.shutdown();
        std::process::exit(0);
    })
    .context("Failed to install Ctrl+C handler")?;

    let stdin = io::stdin();
    for line in stdin.lock().lines() {
        let line = line.context("Failed to read stdin")?;
        let mut words = line.split_whitespace();
        let Some(word) = words.next() else {
            continue;
        };

        match word.to_ascii_lowercase().as_str() {
            "quit" | "exit" => break,
            "status" => {
                let snapshot = link.snapshot();
                print_status(&snapshot, json)?;
                if snapshot.state.is_terminal() && !link.is_running() {
                    println!("⚠️ Session ended; `quit` to exit");
                }
            }
            other => {
                let value = words.next().map(str::parse::<i64>).transpose();
                let result = match (interactive_kind(other), value) {
                    (Some(kind), Ok(value)) => link.enqueue(kind, value).map_err(anyhow::Error::from),
                    (None, _) => Err(anyhow::anyhow!("unknown command {:?}", other)),
                    (_, Err(e)) => Err(anyhow::anyhow!("bad value: {}", e)),
                };
                if let Err(e) = result {
                    eprintln!("❌ {}", e);
                }
            }
        }
    }

    link.shutdown();
    print_status(&link.snapshot(), json)?;
    info!("✅ Sensor link closed");
    Ok(())
}

/// Map interactive words to command kinds
fn interactive_kind(word: &str) -> Option<&'static str> {
    match word {
        "start" => Some("START"),
        "stop" => Some("STOP"),
        "tare" => Some("TARE"),
        "range" => Some("SET_RANGE"),
        "freq" => Some("SET_FREQ"),
        _ => None,
    }
}

fn print_status(snapshot: &Snapshot, json: bool) -> Result<()> {
    if json {
        println!("{}", serde_json::to_string(snapshot)?);
        return Ok(());
    }

    println!(
        "[{:?}] {} | connected={} measuring={} range={} voltage={:.6} V",
        snapshot.state,
        snapshot.status_message,
        snapshot.connected,
        snapshot.measuring,
        snapshot.target_range_idx,
        snapshot.voltage
    );
    for range in &snapshot.calibration {
        match range.calibration {
            Some(entry) => println!("   range {}: slope={} intercept={}", range.range, entry.slope, entry.intercept),
            None => println!("   range {}: uncalibrated", range.range),
        }
    }
    Ok(())
}

/// Generate a default configuration file
fn generate_config_file(output_path: PathBuf) -> Result<()> {
    let config = AppConfig::new();
    config.save_to_file(&output_path)?;

    println!("✅ Generated configuration file: {}", output_path.display());
    println!("📝 Edit the file to customize settings, then run:");
    println!("   voltlink --config {} run", output_path.display());
    Ok(())
}
