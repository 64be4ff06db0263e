//! Measurement types shared between the device driver and downstream consumers.
//!
//! A [`MeasurementResult`] is built exactly once per successful measurement and
//! handed to the caller; nothing in the crate mutates it afterwards. Reporting,
//! export and plotting code consume it read-only.

use crate::data::colorimetry::ColorSummary;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// The two measurement geometries the instrument supports.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MeasurementKind {
    /// Per solid angle, W·sr⁻¹·m⁻²·nm⁻¹
    Radiance,
    /// Flat flux density, W·m⁻²·nm⁻¹
    Irradiance,
}

impl MeasurementKind {
    /// Protocol character requesting a frame of this kind.
    pub fn command_char(self) -> char {
        match self {
            Self::Radiance => 'r',
            Self::Irradiance => 'i',
        }
    }

    /// Unit of the calibrated spectral values.
    pub fn spectral_unit(self) -> MeasurementUnit {
        match self {
            Self::Radiance => MeasurementUnit::WattsPerSrSqmNm,
            Self::Irradiance => MeasurementUnit::WattsPerSqmNm,
        }
    }

    /// Unit of the integrated photometric value.
    pub fn photometric_unit(self) -> MeasurementUnit {
        match self {
            Self::Radiance => MeasurementUnit::CandelaPerSqm,
            Self::Irradiance => MeasurementUnit::Lux,
        }
    }
}

impl fmt::Display for MeasurementKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Radiance => write!(f, "radiance"),
            Self::Irradiance => write!(f, "irradiance"),
        }
    }
}

impl std::str::FromStr for MeasurementKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "radiance" | "r" => Ok(Self::Radiance),
            "irradiance" | "i" => Ok(Self::Irradiance),
            other => Err(format!(
                "unknown measurement kind '{}' (expected radiance or irradiance)",
                other
            )),
        }
    }
}

/// Physical units attached to measurement values.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MeasurementUnit {
    /// W/(sr·m²·nm)
    #[serde(rename = "W/(sr·m²·nm)")]
    WattsPerSrSqmNm,
    /// W/(m²·nm)
    #[serde(rename = "W/(m²·nm)")]
    WattsPerSqmNm,
    /// cd/m²
    #[serde(rename = "cd/m²")]
    CandelaPerSqm,
    /// lux
    #[serde(rename = "lux")]
    Lux,
}

impl MeasurementUnit {
    /// Unit symbol.
    pub fn symbol(self) -> &'static str {
        match self {
            Self::WattsPerSrSqmNm => "W/(sr·m²·nm)",
            Self::WattsPerSqmNm => "W/(m²·nm)",
            Self::CandelaPerSqm => "cd/m²",
            Self::Lux => "lux",
        }
    }
}

impl fmt::Display for MeasurementUnit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.symbol())
    }
}

/// Which physical unit produced a result.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceIdentity {
    /// Device model name
    pub name: String,
    /// Unit serial, the calibration unit number as reported by the device
    pub serial: String,
}

/// A calibrated spectrum with its photometric value and acquisition metadata.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MeasurementResult {
    /// Wavelength of every pixel in nm
    pub wavelength: Vec<f64>,
    /// Calibrated spectral value of every pixel, in `spectral_unit`
    pub spectral_value: Vec<f64>,
    /// Radiance or irradiance
    pub measurement_kind: MeasurementKind,
    /// When the frame was received
    pub timestamp: DateTime<Utc>,
    /// cd/m², only meaningful for radiance (zero otherwise)
    pub luminance: f64,
    /// lux, only meaningful for irradiance (zero otherwise)
    pub illuminance: f64,
    /// Integration time the device actually used
    pub integration_time_ms: u32,
    /// Scans averaged by the device
    pub num_scans: u32,
    /// Share of saturated pixels reported by the device, in percent
    pub saturation_percent: f64,
    /// Raw detector counts as received
    pub raw_counts: Vec<f64>,
    /// Reporting device
    pub device_identity: DeviceIdentity,
    /// Unit of `spectral_value`
    pub spectral_unit: MeasurementUnit,
    /// Unit of the photometric value
    pub photometric_unit: MeasurementUnit,
    /// Pixels whose value was substituted with zero because the correction degenerated
    pub faulted_pixels: Vec<usize>,
}

impl MeasurementResult {
    /// Luminance for radiance results, illuminance for irradiance results.
    pub fn photometric_value(&self) -> f64 {
        match self.measurement_kind {
            MeasurementKind::Radiance => self.luminance,
            MeasurementKind::Irradiance => self.illuminance,
        }
    }

    /// Whether the reported saturation exceeds `threshold_percent`.
    pub fn is_saturated(&self, threshold_percent: f64) -> bool {
        self.saturation_percent > threshold_percent
    }

    /// Chromaticity and CCT of the spectrum.
    pub fn color(&self) -> ColorSummary {
        ColorSummary::from_spectrum(&self.wavelength, &self.spectral_value)
    }
}

impl fmt::Display for MeasurementResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "MeasurementResult(type={}, points={}, {}={:.3e} {}, timestamp={})",
            self.measurement_kind,
            self.wavelength.len(),
            match self.measurement_kind {
                MeasurementKind::Radiance => "luminance",
                MeasurementKind::Irradiance => "illuminance",
            },
            self.photometric_value(),
            self.photometric_unit,
            self.timestamp.to_rfc3339()
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample(kind: MeasurementKind) -> MeasurementResult {
        MeasurementResult {
            wavelength: vec![500.0, 501.0, 502.0],
            spectral_value: vec![1.0, 2.0, 3.0],
            measurement_kind: kind,
            timestamp: Utc::now(),
            luminance: if kind == MeasurementKind::Radiance { 12.5 } else { 0.0 },
            illuminance: if kind == MeasurementKind::Irradiance { 40.0 } else { 0.0 },
            integration_time_ms: 100,
            num_scans: 5,
            saturation_percent: 95.0,
            raw_counts: vec![10.0, 20.0, 30.0],
            device_identity: DeviceIdentity {
                name: "OSpRad".into(),
                serial: "3".into(),
            },
            spectral_unit: kind.spectral_unit(),
            photometric_unit: kind.photometric_unit(),
            faulted_pixels: Vec::new(),
        }
    }

    #[test]
    fn test_kind_units_and_commands() {
        assert_eq!(MeasurementKind::Radiance.command_char(), 'r');
        assert_eq!(MeasurementKind::Irradiance.command_char(), 'i');
        assert_eq!(MeasurementKind::Radiance.photometric_unit().symbol(), "cd/m²");
        assert_eq!(MeasurementKind::Irradiance.photometric_unit().symbol(), "lux");
        assert_eq!(
            MeasurementKind::Irradiance.spectral_unit().to_string(),
            "W/(m²·nm)"
        );
    }

    #[test]
    fn test_kind_from_str() {
        assert_eq!("Radiance".parse::<MeasurementKind>(), Ok(MeasurementKind::Radiance));
        assert_eq!("i".parse::<MeasurementKind>(), Ok(MeasurementKind::Irradiance));
        assert!("flux".parse::<MeasurementKind>().is_err());
    }

    #[test]
    fn test_photometric_value_follows_kind() {
        assert_eq!(sample(MeasurementKind::Radiance).photometric_value(), 12.5);
        assert_eq!(sample(MeasurementKind::Irradiance).photometric_value(), 40.0);
    }

    #[test]
    fn test_saturation_threshold() {
        let result = sample(MeasurementKind::Radiance);
        assert!(result.is_saturated(90.0));
        assert!(!result.is_saturated(95.0));
    }

    #[test]
    fn test_serialization_uses_unit_symbols() {
        let json = serde_json::to_value(sample(MeasurementKind::Irradiance)).unwrap();
        assert_eq!(json["measurement_kind"], "irradiance");
        assert_eq!(json["photometric_unit"], "lux");
        assert_eq!(json["device_identity"]["serial"], "3");
    }

    #[test]
    fn test_display_summary() {
        let text = sample(MeasurementKind::Radiance).to_string();
        assert!(text.starts_with("MeasurementResult(type=radiance, points=3, luminance="));
        assert!(text.contains("cd/m²"));
    }
}
