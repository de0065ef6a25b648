/*!
Configuration management for the sensor link.
*/

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use anyhow::{Context, Result};

/// Environment variable overriding [`LinkConfig::peer_address`]
pub const ENV_PEER_ADDRESS: &str = "SENSOR_MAC";

/// Environment variable overriding [`LinkConfig::notify_uuid`]
pub const ENV_NOTIFY_UUID: &str = "UART_NOTIFY_UUID";

/// Environment variable overriding [`LinkConfig::write_uuid`]
pub const ENV_WRITE_UUID: &str = "UART_WRITE_UUID";

/// Main application configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub link: LinkConfig,
    pub calibration: CalibrationConfig,
    pub protocol: ProtocolConfig,
    pub simulator: SimulatorConfig,
}

impl AppConfig {
    /// Create a new configuration with default values
    pub fn new() -> Self {
        Self {
            link: LinkConfig::default(),
            calibration: CalibrationConfig::default(),
            protocol: ProtocolConfig::default(),
            simulator: SimulatorConfig::default(),
        }
    }

    /// Load configuration from a TOML file
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path.as_ref())
            .with_context(|| format!("Failed to read config file: {}", path.as_ref().display()))?;

        let config: AppConfig = toml::from_str(&content)
            .with_context(|| "Failed to parse config file as TOML")?;

        Ok(config)
    }

    /// Save configuration to a TOML file
    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let content = toml::to_string_pretty(self)
            .with_context(|| "Failed to serialize config to TOML")?;

        std::fs::write(path.as_ref(), content)
            .with_context(|| format!("Failed to write config file: {}", path.as_ref().display()))?;

        Ok(())
    }

    /// Apply `SENSOR_MAC`, `UART_NOTIFY_UUID` and `UART_WRITE_UUID` from the environment
    pub fn apply_env_overrides(&mut self) {
        self.apply_overrides_from(|key| std::env::var(key).ok());
    }

    /// Apply overrides from an arbitrary key lookup
    pub fn apply_overrides_from<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(value) = lookup(ENV_PEER_ADDRESS) {
            self.link.peer_address = value;
        }
        if let Some(value) = lookup(ENV_NOTIFY_UUID) {
            self.link.notify_uuid = value;
        }
        if let Some(value) = lookup(ENV_WRITE_UUID) {
            self.link.write_uuid = value;
        }
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self::new()
    }
}

/// Physical link settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LinkConfig {
    /// Bluetooth address of the sensor
    pub peer_address: String,

    /// Characteristic the sensor notifies on
    pub notify_uuid: String,

    /// Characteristic commands are written to
    pub write_uuid: String,

    /// Upper bound on establishing the link
    pub connect_timeout_ms: u64,

    /// Pause after subscribing before the first command
    pub settle_delay_ms: u64,

    /// Command queue polling interval
    pub poll_interval_ms: u64,

    /// Largest frame the transport accepts in one write
    pub max_write_len: usize,

    /// Maximum characters of an error kept in the status message
    pub status_error_limit: usize,
}

impl LinkConfig {
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub fn settle_delay(&self) -> Duration {
        Duration::from_millis(self.settle_delay_ms)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms.max(1))
    }
}

impl Default for LinkConfig {
    fn default() -> Self {
        Self {
            peer_address: "00:00:00:00:00:00".to_string(),
            notify_uuid: "49535343-1e4d-4bd9-ba61-23c647249616".to_string(),
            write_uuid: "49535343-1e4d-4bd9-ba61-23c647249616".to_string(),
            connect_timeout_ms: 10_000,
            settle_delay_ms: 1_000,
            poll_interval_ms: 50,
            max_write_len: 244,
            status_error_limit: 32,
        }
    }
}

/// Calibration handshake settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CalibrationConfig {
    /// Ranges fetched at startup, in order
    pub ranges: Vec<u8>,

    /// Requests sent per range before giving up
    pub max_attempts: u32,

    /// Wait for a reply after each request
    pub attempt_timeout_ms: u64,
}

impl CalibrationConfig {
    pub fn attempt_timeout(&self) -> Duration {
        Duration::from_millis(self.attempt_timeout_ms)
    }
}

impl Default for CalibrationConfig {
    fn default() -> Self {
        Self {
            ranges: vec![0, 1],
            max_attempts: 3,
            attempt_timeout_ms: 1_500,
        }
    }
}

/// Wire protocol options
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProtocolConfig {
    /// Drop inbound frames whose CRC does not match
    pub verify_inbound_checksum: bool,
}

/// Calibration the simulated sensor reports for one range
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SimulatedRange {
    pub range: u8,
    pub slope: f32,
    pub intercept: f32,
}

/// In-process sensor emulator settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SimulatorConfig {
    /// Sample period until the host sets one
    pub sample_period_us: u32,

    /// Centre of the generated raw counts
    pub raw_base: u16,

    /// Peak deviation of the generated raw counts
    pub raw_swing: u16,

    /// Delay before answering a calibration request
    pub reply_delay_ms: u64,

    /// Calibration per range
    pub ranges: Vec<SimulatedRange>,
}

impl Default for SimulatorConfig {
    fn default() -> Self {
        Self {
            sample_period_us: 100_000,
            raw_base: 2048,
            raw_swing: 400,
            reply_delay_ms: 20,
            ranges: vec![
                SimulatedRange { range: 0, slope: 0.001_22, intercept: -0.015 },
                SimulatedRange { range: 1, slope: 0.012_2, intercept: -0.15 },
            ],
        }
    }
}
