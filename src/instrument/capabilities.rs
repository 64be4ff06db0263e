//! Static description of a spectroradiometer.

use crate::instrument::{DEFAULT_MIN_SCANS, MAX_SCANS, MIN_SCANS, SENSOR_PIXELS};
use crate::measurement::MeasurementKind;
use serde::Serialize;

/// Highest integration time offered to users, in ms.
pub const MAX_INTEGRATION_TIME_MS: u32 = 10_000;

/// One user-adjustable setting.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SettingDefinition {
    /// Key, matching the `MeasurementSettings` field name without unit suffix
    pub name: String,
    /// Label for display
    pub display_name: String,
    /// Default value
    pub default_value: u32,
    /// Lowest accepted value
    pub min_value: u32,
    /// Highest accepted value
    pub max_value: u32,
    /// Unit symbol, if any
    pub unit: Option<String>,
    /// Help text
    pub tooltip: String,
}

impl SettingDefinition {
    /// Whether `value` lies within the setting's bounds.
    pub fn accepts(&self, value: u32) -> bool {
        (self.min_value..=self.max_value).contains(&value)
    }
}

/// What a device is and what it can do.
#[allow(missing_docs)]
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DeviceCapabilities {
    pub device_name: String,
    pub device_type: String,
    pub manufacturer: String,
    pub model: String,
    /// Calibrated unit number once known, empty before the first measurement
    pub serial_number: String,
    pub measurement_kinds: Vec<MeasurementKind>,
    /// Nominal wavelength coverage in nm
    pub wavelength_range: (f64, f64),
    pub pixel_count: usize,
    pub settings: Vec<SettingDefinition>,
    pub supports_auto_integration: bool,
    pub supports_dark_correction: bool,
    pub supports_continuous_mode: bool,
}

impl DeviceCapabilities {
    /// Capabilities of the OSpRad; `unit` is the loaded calibration unit, if any.
    pub fn osprad(unit: Option<u32>) -> Self {
        Self {
            device_name: "OSpRad Spectroradiometer".to_string(),
            device_type: "Spectroradiometer".to_string(),
            manufacturer: "Open Source".to_string(),
            model: "OSpRad v1".to_string(),
            serial_number: unit.map(|u| u.to_string()).unwrap_or_default(),
            measurement_kinds: vec![MeasurementKind::Radiance, MeasurementKind::Irradiance],
            wavelength_range: (350.0, 850.0),
            pixel_count: SENSOR_PIXELS,
            settings: vec![
                SettingDefinition {
                    name: "integration_time".to_string(),
                    display_name: "Integration Time".to_string(),
                    default_value: 0,
                    min_value: 0,
                    max_value: MAX_INTEGRATION_TIME_MS,
                    unit: Some("ms".to_string()),
                    tooltip: "0 = automatic integration time".to_string(),
                },
                SettingDefinition {
                    name: "min_scans".to_string(),
                    display_name: "Minimum Scans".to_string(),
                    default_value: DEFAULT_MIN_SCANS,
                    min_value: MIN_SCANS,
                    max_value: MAX_SCANS,
                    unit: None,
                    tooltip: "Minimum number of scans to average".to_string(),
                },
                SettingDefinition {
                    name: "max_scans".to_string(),
                    display_name: "Maximum Scans".to_string(),
                    default_value: MAX_SCANS,
                    min_value: MIN_SCANS,
                    max_value: MAX_SCANS,
                    unit: None,
                    tooltip: "Maximum number of scans to average".to_string(),
                },
            ],
            supports_auto_integration: true,
            supports_dark_correction: false,
            supports_continuous_mode: false,
        }
    }

    /// Setting definition by name.
    pub fn setting(&self, name: &str) -> Option<&SettingDefinition> {
        self.settings.iter().find(|s| s.name == name)
    }

    /// Whether `kind` can be measured.
    pub fn supports(&self, kind: MeasurementKind) -> bool {
        self.measurement_kinds.contains(&kind)
    }
}
