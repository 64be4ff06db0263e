//! CIE 1931 colorimetry for calibrated spectra.
//!
//! Tristimulus values are integrated with forward differences: every sample
//! except the last contributes `value[i] * cmf(wl[i]) * (wl[i+1] - wl[i])`.
//! Colour-matching functions are linearly interpolated from the 2° observer
//! tables at 5 nm; wavelengths outside 380–780 nm contribute nothing.
//!
//! CCT uses McCamy's cubic, which is only meaningful near the Planckian locus.
//! [`ColorSummary::cct_reliable`] flags results outside 2000–12000 K.

use crate::error::{AppResult, DaqError};
use serde::Serialize;

/// First tabulated wavelength in nm.
pub const CIE_START_NM: f64 = 380.0;

/// Table step in nm.
pub const CIE_STEP_NM: f64 = 5.0;

/// Number of tabulated wavelengths (380..=780 nm).
pub const CIE_SAMPLES: usize = 81;

/// Chromaticity returned for a spectrum with no energy.
pub const EQUAL_ENERGY_WHITE: (f64, f64) = (1.0 / 3.0, 1.0 / 3.0);

/// Range in which McCamy's approximation is trusted, in kelvin.
pub const CCT_RELIABLE_RANGE: (f64, f64) = (2000.0, 12000.0);

const ENERGY_EPSILON: f64 = 1e-10;

// XYZ to linear sRGB, D65 white.
const XYZ_TO_SRGB: [[f64; 3]; 3] = [
    [3.2406, -1.5372, -0.4986],
    [-0.9689, 1.8758, 0.0415],
    [0.0557, -0.2040, 1.0570],
];

// =============================================================================
// Colour-matching functions
// =============================================================================

/// x̄ at 5 nm steps from 380 nm.
#[rustfmt::skip]
pub const CIE_X: [f64; CIE_SAMPLES] = [
    0.001368, 0.002236, 0.004243, 0.007650, 0.014310,
    0.023190, 0.043510, 0.077630, 0.134380, 0.214770,
    0.283900, 0.328500, 0.348280, 0.348060, 0.336200,
    0.318700, 0.290800, 0.251100, 0.195360, 0.142100,
    0.095640, 0.057950, 0.032010, 0.014700, 0.004900,
    0.002400, 0.009300, 0.029100, 0.063270, 0.109600,
    0.165500, 0.225750, 0.290400, 0.359700, 0.433450,
    0.512050, 0.594500, 0.678400, 0.762100, 0.842500,
    0.916300, 0.978600, 1.026300, 1.056700, 1.062200,
    1.045600, 1.002600, 0.938400, 0.854450, 0.751400,
    0.642400, 0.541900, 0.447900, 0.360800, 0.283500,
    0.218700, 0.164900, 0.121200, 0.087400, 0.063600,
    0.046770, 0.032900, 0.022700, 0.015840, 0.011359,
    0.008111, 0.005790, 0.004109, 0.002899, 0.002049,
    0.001440, 0.001000, 0.000690, 0.000476, 0.000332,
    0.000235, 0.000166, 0.000117, 0.000083, 0.000059,
    0.000042,
];

/// ȳ at 5 nm steps from 380 nm.
#[rustfmt::skip]
pub const CIE_Y: [f64; CIE_SAMPLES] = [
    0.000039, 0.000064, 0.000120, 0.000217, 0.000396,
    0.000640, 0.001210, 0.002180, 0.004000, 0.007300,
    0.011600, 0.016840, 0.023000, 0.029800, 0.038000,
    0.048000, 0.060000, 0.073900, 0.090980, 0.112600,
    0.139020, 0.169300, 0.208020, 0.258600, 0.323000,
    0.407300, 0.503000, 0.608200, 0.710000, 0.793200,
    0.862000, 0.914850, 0.954000, 0.980300, 0.994950,
    1.000000, 0.995000, 0.978600, 0.952000, 0.915400,
    0.870000, 0.816300, 0.757000, 0.694900, 0.631000,
    0.566800, 0.503000, 0.441200, 0.381000, 0.321000,
    0.265000, 0.217000, 0.175000, 0.138200, 0.107000,
    0.081600, 0.061000, 0.044580, 0.032000, 0.023200,
    0.017000, 0.011920, 0.008210, 0.005723, 0.004102,
    0.002929, 0.002091, 0.001484, 0.001047, 0.000740,
    0.000520, 0.000361, 0.000249, 0.000172, 0.000120,
    0.000085, 0.000060, 0.000042, 0.000030, 0.000021,
    0.000015,
];

/// z̄ at 5 nm steps from 380 nm.
#[rustfmt::skip]
pub const CIE_Z: [f64; CIE_SAMPLES] = [
    0.006450, 0.010550, 0.020050, 0.036210, 0.067850,
    0.110200, 0.207400, 0.371300, 0.645600, 1.039050,
    1.385600, 1.622960, 1.747060, 1.782600, 1.772110,
    1.744100, 1.669200, 1.528100, 1.287640, 1.041900,
    0.812950, 0.616200, 0.465180, 0.353300, 0.272000,
    0.212300, 0.158200, 0.111700, 0.078250, 0.057250,
    0.042160, 0.029840, 0.020300, 0.013400, 0.008750,
    0.005750, 0.003900, 0.002750, 0.002100, 0.001800,
    0.001650, 0.001400, 0.001100, 0.001000, 0.000800,
    0.000600, 0.000340, 0.000240, 0.000190, 0.000100,
    0.000050, 0.000030, 0.000020, 0.000010, 0.000000,
    0.000000, 0.000000, 0.000000, 0.000000, 0.000000,
    0.000000, 0.000000, 0.000000, 0.000000, 0.000000,
    0.000000, 0.000000, 0.000000, 0.000000, 0.000000,
    0.000000, 0.000000, 0.000000, 0.000000, 0.000000,
    0.000000, 0.000000, 0.000000, 0.000000, 0.000000,
    0.000000,
];

/// Colour-matching functions `(x̄, ȳ, z̄)` at `wavelength_nm`, zero outside the table.
pub fn color_matching(wavelength_nm: f64) -> (f64, f64, f64) {
    let end = CIE_START_NM + CIE_STEP_NM * (CIE_SAMPLES - 1) as f64;
    if !(CIE_START_NM..=end).contains(&wavelength_nm) {
        return (0.0, 0.0, 0.0);
    }

    let pos = (wavelength_nm - CIE_START_NM) / CIE_STEP_NM;
    let i = (pos.floor() as usize).min(CIE_SAMPLES - 2);
    let t = pos - i as f64;
    let lerp = |table: &[f64; CIE_SAMPLES]| table[i] + t * (table[i + 1] - table[i]);

    (lerp(&CIE_X), lerp(&CIE_Y), lerp(&CIE_Z))
}

// =============================================================================
// Tristimulus and chromaticity
// =============================================================================

/// CIE XYZ tristimulus values.
#[allow(missing_docs)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct Xyz {
    pub x: f64,
    pub y: f64,
    pub z: f64,
}

impl Xyz {
    /// Sum of the three components.
    pub fn total(&self) -> f64 {
        self.x + self.y + self.z
    }

    /// `(x, y)` chromaticity; equal-energy white when the total is negligible.
    pub fn chromaticity(&self) -> (f64, f64) {
        let total = self.total();
        if total < ENERGY_EPSILON {
            return EQUAL_ENERGY_WHITE;
        }
        (self.x / total, self.y / total)
    }
}

fn check_lengths(wavelength: &[f64], values: &[f64]) -> AppResult<()> {
    if wavelength.len() != values.len() {
        return Err(DaqError::Processing(format!(
            "wavelength and spectral data lengths differ ({} vs {})",
            wavelength.len(),
            values.len()
        )));
    }
    Ok(())
}

/// Integrate over the common prefix of both slices.
fn integrate(wavelength: &[f64], values: &[f64]) -> Xyz {
    let n = wavelength.len().min(values.len());
    let mut xyz = Xyz::default();
    for i in 0..n.saturating_sub(1) {
        let (xb, yb, zb) = color_matching(wavelength[i]);
        let weight = values[i] * (wavelength[i + 1] - wavelength[i]);
        xyz.x += weight * xb;
        xyz.y += weight * yb;
        xyz.z += weight * zb;
    }
    xyz
}

/// Tristimulus values of a spectrum.
pub fn tristimulus(wavelength: &[f64], values: &[f64]) -> AppResult<Xyz> {
    check_lengths(wavelength, values)?;
    Ok(integrate(wavelength, values))
}

/// CIE 1931 `(x, y)` chromaticity of a spectrum.
///
/// A spectrum with no energy returns exactly `(1/3, 1/3)`.
pub fn chromaticity(wavelength: &[f64], values: &[f64]) -> AppResult<(f64, f64)> {
    Ok(tristimulus(wavelength, values)?.chromaticity())
}

/// Correlated colour temperature in kelvin, McCamy's approximation.
pub fn cct(x: f64, y: f64) -> f64 {
    let n = (x - 0.3320) / (0.1858 - y);
    449.0 * n.powi(3) + 3525.0 * n.powi(2) + 6823.3 * n + 5520.33
}

/// Approximate display colour of a spectrum as 8-bit sRGB.
///
/// XYZ is normalised to `Y = 1`, converted with the D65 matrix, gamma encoded
/// with `1/gamma` and clipped to 0–255.
pub fn spectrum_to_rgb(wavelength: &[f64], values: &[f64], gamma: f64) -> AppResult<[u8; 3]> {
    if !(gamma.is_finite() && gamma > 0.0) {
        return Err(DaqError::Processing(format!("invalid gamma {}", gamma)));
    }

    let mut xyz = tristimulus(wavelength, values)?;
    if xyz.y > 0.0 {
        xyz = Xyz {
            x: xyz.x / xyz.y,
            y: 1.0,
            z: xyz.z / xyz.y,
        };
    }

    let encode = |row: &[f64; 3]| -> u8 {
        let linear = row[0] * xyz.x + row[1] * xyz.y + row[2] * xyz.z;
        if linear <= 0.0 {
            return 0;
        }
        (linear.powf(1.0 / gamma) * 255.0).clamp(0.0, 255.0) as u8
    };

    Ok([
        encode(&XYZ_TO_SRGB[0]),
        encode(&XYZ_TO_SRGB[1]),
        encode(&XYZ_TO_SRGB[2]),
    ])
}

// =============================================================================
// Summary
// =============================================================================

/// Chromaticity and CCT of one spectrum.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct ColorSummary {
    /// CIE 1931 x
    pub x: f64,
    /// CIE 1931 y
    pub y: f64,
    /// Correlated colour temperature, K
    pub cct_kelvin: f64,
    /// Whether `cct_kelvin` lies where McCamy's formula holds
    pub cct_reliable: bool,
}

impl ColorSummary {
    /// Summarise a spectrum.
    ///
    /// Only the common prefix of the two slices is used; a [`MeasurementResult`]
    /// always has equal lengths.
    ///
    /// [`MeasurementResult`]: crate::measurement::MeasurementResult
    pub fn from_spectrum(wavelength: &[f64], values: &[f64]) -> Self {
        let (x, y) = integrate(wavelength, values).chromaticity();
        Self::from_chromaticity(x, y)
    }

    /// Summary for known chromaticity coordinates.
    pub fn from_chromaticity(x: f64, y: f64) -> Self {
        let cct_kelvin = cct(x, y);
        let (lo, hi) = CCT_RELIABLE_RANGE;
        Self {
            x,
            y,
            cct_kelvin,
            cct_reliable: cct_kelvin.is_finite() && (lo..=hi).contains(&cct_kelvin),
        }
    }
}
