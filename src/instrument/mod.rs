//! Device interface and the OSpRad implementation.
//!
//! This module defines the [`SpectralDevice`] trait, the single capability
//! interface for spectroradiometers, along with the session state types it
//! exposes. [`OspradDevice`] is the production implementation; it is built
//! around an injected [`TransportFactory`](crate::adapters::TransportFactory),
//! so the same driver runs against a serial port or the in-memory mock.
//!
//! ## Submodules
//!
//! - [`protocol`]: command encoding, frame parsing, timeouts and retries
//! - [`calibration`]: per-unit calibration catalog and derived tables
//! - [`spectral`]: raw counts to calibrated spectrum and photometric value
//! - [`capabilities`]: static description of what the device supports
//! - [`osprad`]: the orchestrator tying the above together

pub mod calibration;
pub mod capabilities;
pub mod osprad;
pub mod protocol;
pub mod spectral;

pub use calibration::{CalibrationSource, CalibrationStore, CalibrationTable};
pub use capabilities::{DeviceCapabilities, SettingDefinition};
pub use osprad::{DeviceOptions, OspradDevice};
pub use spectral::{SpectralOutput, SpectralProcessor};

use crate::error::AppResult;
use crate::measurement::{MeasurementKind, MeasurementResult};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Pixel count of the detector.
pub const SENSOR_PIXELS: usize = 288;

/// Lowest scan count accepted by the firmware.
pub const MIN_SCANS: u32 = 1;

/// Highest scan count accepted by the firmware.
pub const MAX_SCANS: u32 = 50;

/// Minimum scan count used when none is configured.
pub const DEFAULT_MIN_SCANS: u32 = 3;

/// Connection and activity state of a device session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DeviceStatus {
    /// No transport open
    Disconnected,
    /// Transport being opened
    Connecting,
    /// Idle and ready
    Connected,
    /// A measurement is in flight
    Measuring,
    /// The last operation failed; see `last_error`
    Error,
}

impl fmt::Display for DeviceStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            DeviceStatus::Disconnected => "disconnected",
            DeviceStatus::Connecting => "connecting",
            DeviceStatus::Connected => "connected",
            DeviceStatus::Measuring => "measuring",
            DeviceStatus::Error => "error",
        };
        f.write_str(s)
    }
}

/// Acquisition settings. `None` leaves the current value unchanged.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MeasurementSettings {
    /// Integration time in ms, 0 = automatic
    pub integration_time_ms: Option<u32>,
    /// Minimum number of scans averaged
    pub min_scans: Option<u32>,
    /// Maximum number of scans averaged
    pub max_scans: Option<u32>,
}

impl MeasurementSettings {
    /// Settings with every option specified.
    pub fn new(integration_time_ms: u32, min_scans: u32, max_scans: u32) -> Self {
        Self {
            integration_time_ms: Some(integration_time_ms),
            min_scans: Some(min_scans),
            max_scans: Some(max_scans),
        }
    }

    /// Whether no option is set.
    pub fn is_empty(&self) -> bool {
        self.integration_time_ms.is_none() && self.min_scans.is_none() && self.max_scans.is_none()
    }
}

impl From<&crate::config::MeasurementDefaults> for MeasurementSettings {
    fn from(defaults: &crate::config::MeasurementDefaults) -> Self {
        Self::new(
            defaults.integration_time_ms,
            defaults.min_scans,
            defaults.max_scans,
        )
    }
}

/// Clamp a scan count into the range the firmware accepts.
pub fn clamp_scans(count: u32) -> u32 {
    count.clamp(MIN_SCANS, MAX_SCANS)
}

/// Capability interface shared by spectroradiometer drivers.
///
/// All operations block the caller. A session is owned by exactly one caller;
/// the protocol cannot multiplex concurrent requests.
pub trait SpectralDevice {
    /// Open the transport and move to `Connected`.
    fn connect(&mut self) -> AppResult<()>;

    /// Close the transport and reset the session.
    fn disconnect(&mut self) -> AppResult<()>;

    /// Whether a transport is open.
    fn is_connected(&self) -> bool;

    /// Current session state.
    fn status(&self) -> DeviceStatus;

    /// Static description of the device.
    fn capabilities(&self) -> DeviceCapabilities;

    /// Apply acquisition settings, skipping values already sent.
    ///
    /// Fails unless the session is `Connected`; after an error, reconnect first.
    fn configure(&mut self, settings: &MeasurementSettings) -> AppResult<()>;

    /// Acquire one calibrated spectrum.
    fn measure(&mut self, kind: MeasurementKind) -> AppResult<MeasurementResult>;

    /// Settings currently applied on the device.
    fn current_settings(&self) -> MeasurementSettings;

    /// Message of the most recent failure, if any.
    fn last_error(&self) -> Option<&str>;
}
