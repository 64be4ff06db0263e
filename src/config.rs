//! Configuration loading using Figment.
//!
//! Settings are layered in this order, later layers winning:
//! 1. Built-in defaults ([`Settings::default`])
//! 2. A TOML file (`config/osprad.toml` unless another path is given)
//! 3. Environment variables prefixed with `OSPRAD_`, `__` separating sections
//!
//! # Environment Variable Overrides
//!
//! ```text
//! OSPRAD_DEVICE__PORT=/dev/ttyACM0
//! OSPRAD_PROTOCOL__RESPONSE_TIMEOUT_MS=30000
//! OSPRAD_CALIBRATION__PATH=/etc/osprad/calibration_data.csv
//! ```
//!
//! # Example file
//!
//! ```toml
//! [application]
//! log_level = "info"
//!
//! [device]
//! port = "/dev/ttyUSB0"   # omit to use the first serial port found
//! baud_rate = 115200
//!
//! [measurement]
//! integration_time_ms = 0  # 0 = automatic
//! min_scans = 3
//! max_scans = 50
//! ```

use crate::error::{AppResult, DaqError};
use crate::instrument::{MAX_SCANS, MIN_SCANS};
use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Default configuration file location, relative to the working directory.
pub const DEFAULT_CONFIG_PATH: &str = "config/osprad.toml";

/// Top-level configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Settings {
    /// Application settings
    #[serde(default)]
    pub application: ApplicationConfig,
    /// Serial link settings
    #[serde(default)]
    pub device: DeviceConfig,
    /// Command/response timing
    #[serde(default)]
    pub protocol: ProtocolConfig,
    /// Calibration catalog location
    #[serde(default)]
    pub calibration: CalibrationConfig,
    /// Settings applied before each measurement run
    #[serde(default)]
    pub measurement: MeasurementDefaults,
}

/// Application-level configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApplicationConfig {
    /// Logging level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

impl Default for ApplicationConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
        }
    }
}

/// Serial link configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeviceConfig {
    /// Serial port path; `None` selects the first enumerated port.
    #[serde(default)]
    pub port: Option<String>,
    /// Baud rate
    #[serde(default = "default_baud_rate")]
    pub baud_rate: u32,
    /// Delay after opening the port before the first command
    #[serde(default = "default_settle_ms")]
    pub settle_ms: u64,
}

impl Default for DeviceConfig {
    fn default() -> Self {
        Self {
            port: None,
            baud_rate: default_baud_rate(),
            settle_ms: default_settle_ms(),
        }
    }
}

/// Protocol timing and retry configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProtocolConfig {
    /// How long to wait for a settings acknowledgment
    #[serde(default = "default_ack_timeout")]
    pub ack_timeout_ms: u64,
    /// How long to wait for a measurement frame; covers integration and averaging
    #[serde(default = "default_response_timeout")]
    pub response_timeout_ms: u64,
    /// Attempts per exchange when the device stays silent
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    /// Pause between attempts
    #[serde(default = "default_backoff")]
    pub backoff_ms: u64,
    /// Appended to every command; the firmware expects none
    #[serde(default)]
    pub command_terminator: String,
}

impl Default for ProtocolConfig {
    fn default() -> Self {
        Self {
            ack_timeout_ms: default_ack_timeout(),
            response_timeout_ms: default_response_timeout(),
            max_attempts: default_max_attempts(),
            backoff_ms: default_backoff(),
            command_terminator: String::new(),
        }
    }
}

impl ProtocolConfig {
    /// Acknowledgment timeout as a `Duration`.
    pub fn ack_timeout(&self) -> Duration {
        Duration::from_millis(self.ack_timeout_ms)
    }

    /// Measurement response timeout as a `Duration`.
    pub fn response_timeout(&self) -> Duration {
        Duration::from_millis(self.response_timeout_ms)
    }
}

/// Calibration catalog configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CalibrationConfig {
    /// Path to the calibration CSV catalog
    #[serde(default = "default_calibration_path")]
    pub path: PathBuf,
}

impl Default for CalibrationConfig {
    fn default() -> Self {
        Self {
            path: default_calibration_path(),
        }
    }
}

/// Measurement settings applied by the command-line tool.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MeasurementDefaults {
    /// Integration time in ms (0 = automatic)
    #[serde(default)]
    pub integration_time_ms: u32,
    /// Minimum number of scans averaged
    #[serde(default = "default_min_scans")]
    pub min_scans: u32,
    /// Maximum number of scans averaged
    #[serde(default = "default_max_scans")]
    pub max_scans: u32,
}

impl Default for MeasurementDefaults {
    fn default() -> Self {
        Self {
            integration_time_ms: 0,
            min_scans: default_min_scans(),
            max_scans: default_max_scans(),
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_baud_rate() -> u32 {
    115_200
}

fn default_settle_ms() -> u64 {
    1000
}

fn default_ack_timeout() -> u64 {
    2000
}

fn default_response_timeout() -> u64 {
    120_000
}

fn default_max_attempts() -> u32 {
    3
}

fn default_backoff() -> u64 {
    100
}

fn default_calibration_path() -> PathBuf {
    PathBuf::from("calibration_data.csv")
}

fn default_min_scans() -> u32 {
    3
}

fn default_max_scans() -> u32 {
    MAX_SCANS
}

impl Settings {
    /// Load settings from the default file location plus environment.
    pub fn load() -> AppResult<Self> {
        Self::load_from(DEFAULT_CONFIG_PATH)
    }

    /// Load settings from `path` (a missing file is not an error) plus environment.
    pub fn load_from<P: AsRef<Path>>(path: P) -> AppResult<Self> {
        let settings: Settings = Self::figment(path.as_ref()).extract()?;
        settings.validate()?;
        Ok(settings)
    }

    /// The provider stack used by [`Settings::load_from`].
    pub fn figment(path: &Path) -> Figment {
        Figment::from(Serialized::defaults(Settings::default()))
            .merge(Toml::file(path))
            .merge(Env::prefixed("OSPRAD_").split("__"))
    }

    /// Reject values that parse but cannot work.
    pub fn validate(&self) -> AppResult<()> {
        if self.device.baud_rate == 0 {
            return Err(DaqError::Configuration(
                "device.baud_rate must be greater than zero".into(),
            ));
        }
        if self.protocol.ack_timeout_ms == 0 || self.protocol.response_timeout_ms == 0 {
            return Err(DaqError::Configuration(
                "protocol timeouts must be greater than zero".into(),
            ));
        }
        if self.protocol.max_attempts == 0 {
            return Err(DaqError::Configuration(
                "protocol.max_attempts must be at least 1".into(),
            ));
        }
        for (name, value) in [
            ("measurement.min_scans", self.measurement.min_scans),
            ("measurement.max_scans", self.measurement.max_scans),
        ] {
            if !(MIN_SCANS..=MAX_SCANS).contains(&value) {
                return Err(DaqError::Configuration(format!(
                    "{} = {} outside [{}, {}]",
                    name, value, MIN_SCANS, MAX_SCANS
                )));
            }
        }
        if self.measurement.min_scans > self.measurement.max_scans {
            return Err(DaqError::Configuration(format!(
                "measurement.min_scans = {} exceeds measurement.max_scans = {}",
                self.measurement.min_scans, self.measurement.max_scans
            )));
        }
        Ok(())
    }
}
