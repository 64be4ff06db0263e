//! Raw detector counts to calibrated spectrum.
//!
//! For each pixel `i` with positive sensitivity `s[i]`:
//!
//! ```text
//! mult[i]  =  lin[0] * ln(( c[i] + 1) * lin[1])     for c[i] > 0
//! mult[i]  = -lin[0] * ln((-c[i] + 1) * lin[1])     for c[i] <= 0
//! value[i] = (c[i] / mult[i]) / (s[i] * t_int * bin_width[i])
//! ```
//!
//! and the photometric value is
//! `683 * sum(value[i] * bin_width[i] * efficiency[i])`, in cd/m² for
//! radiance and lux for irradiance.
//!
//! Pixels with `s[i] <= 0` are excluded and stay at zero. A pixel whose
//! multiplier is not a positive finite number, or whose value comes out
//! non-finite, is substituted with zero and reported in
//! [`SpectralOutput::faulted_pixels`]; one bad pixel never fails a frame.

use crate::error::{AppResult, DaqError};
use crate::instrument::calibration::CalibrationTable;
use crate::instrument::SENSOR_PIXELS;
use crate::measurement::MeasurementKind;
use tracing::warn;

/// Lumens per watt at the photopic peak.
pub const LUMINOUS_EFFICACY: f64 = 683.0;

/// Calibrated spectrum of one frame.
#[derive(Debug, Clone, PartialEq)]
pub struct SpectralOutput {
    /// Calibrated value per pixel
    pub spectral_value: Vec<f64>,
    /// Luminance (radiance) or illuminance (irradiance)
    pub photometric: f64,
    /// Pixels substituted with zero because the correction degenerated
    pub faulted_pixels: Vec<usize>,
}

/// Applies a calibration table to raw frames.
#[derive(Debug, Clone, Copy, Default)]
pub struct SpectralProcessor;

impl SpectralProcessor {
    /// Non-linearity multiplier for one raw count, from the first two
    /// linearity coefficients.
    pub fn linearity_multiplier(count: f64, k0: f64, k1: f64) -> f64 {
        if count > 0.0 {
            k0 * ((count + 1.0) * k1).ln()
        } else {
            -k0 * ((-count + 1.0) * k1).ln()
        }
    }

    /// Calibrate `raw_counts` taken with `integration_time_ms` as `kind`.
    pub fn compute(
        table: &CalibrationTable,
        raw_counts: &[f64],
        integration_time_ms: u32,
        kind: MeasurementKind,
    ) -> AppResult<SpectralOutput> {
        if raw_counts.len() != SENSOR_PIXELS {
            return Err(DaqError::Measurement(format!(
                "expected {} raw counts, got {}",
                SENSOR_PIXELS,
                raw_counts.len()
            )));
        }

        let sensitivity = table.sensitivity(kind);
        let bin_width = table.wavelength_bin_width();
        let efficiency = table.luminous_efficiency();
        let [k0, k1, ..] = *table.linearity_coeffs() else {
            return Err(DaqError::CalibrationInvalid {
                unit: table.unit_number(),
                reason: "fewer than 2 linearity coefficients".to_string(),
            });
        };
        let t_int = f64::from(integration_time_ms);

        let mut spectral_value = vec![0.0; SENSOR_PIXELS];
        let mut faulted_pixels = Vec::new();
        let mut weighted_sum = 0.0;

        for (i, &count) in raw_counts.iter().enumerate() {
            if sensitivity[i] <= 0.0 {
                continue;
            }

            let mult = Self::linearity_multiplier(count, k0, k1);
            if !mult.is_finite() || mult <= 0.0 {
                faulted_pixels.push(i);
                continue;
            }

            let value = (count / mult) / (sensitivity[i] * t_int * bin_width[i]);
            if !value.is_finite() {
                faulted_pixels.push(i);
                continue;
            }

            spectral_value[i] = value;
            weighted_sum += value * bin_width[i] * efficiency[i];
        }

        if !faulted_pixels.is_empty() {
            warn!(
                "Unit #{}: {} pixel(s) substituted with zero: {:?}",
                table.unit_number(),
                faulted_pixels.len(),
                faulted_pixels
            );
        }

        Ok(SpectralOutput {
            spectral_value,
            photometric: weighted_sum * LUMINOUS_EFFICACY,
            faulted_pixels,
        })
    }
}
