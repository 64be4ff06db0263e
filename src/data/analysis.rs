//! Descriptive statistics and comparison of calibrated spectra.

use crate::error::{AppResult, DaqError};
use serde::Serialize;

/// Relative-difference guard for near-zero reference values.
const RELATIVE_EPSILON: f64 = 1e-10;

/// Width given to the last sample when integrating a band, in nm.
const LAST_SAMPLE_WIDTH_NM: f64 = 1.0;

fn check_pair(a: &[f64], b: &[f64], what: &str) -> AppResult<()> {
    if a.is_empty() {
        return Err(DaqError::Processing(format!("{}: empty spectrum", what)));
    }
    if a.len() != b.len() {
        return Err(DaqError::Processing(format!(
            "{}: lengths differ ({} vs {})",
            what,
            a.len(),
            b.len()
        )));
    }
    Ok(())
}

/// Index of the first maximum.
fn argmax(values: &[f64]) -> usize {
    values
        .iter()
        .enumerate()
        .fold((0, f64::NEG_INFINITY), |(bi, bv), (i, &v)| {
            if v > bv {
                (i, v)
            } else {
                (bi, bv)
            }
        })
        .0
}

/// Summary statistics of one spectrum.
#[allow(missing_docs)]
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SpectrumStatistics {
    pub min: f64,
    pub max: f64,
    pub mean: f64,
    /// Population standard deviation
    pub std_dev: f64,
    /// Plain sum of the values
    pub total: f64,
    pub peak_wavelength_nm: f64,
    pub peak_value: f64,
    /// Value-weighted mean wavelength, 0 when the total is 0
    pub centroid_nm: f64,
    /// Distance between the first and last sample at or above half the peak
    pub fwhm_nm: f64,
}

impl SpectrumStatistics {
    /// Compute statistics for `values` sampled at `wavelength`.
    pub fn compute(wavelength: &[f64], values: &[f64]) -> AppResult<Self> {
        check_pair(values, wavelength, "statistics")?;

        let n = values.len() as f64;
        let min = values.iter().copied().fold(f64::INFINITY, f64::min);
        let max = values.iter().copied().fold(f64::NEG_INFINITY, f64::max);
        let total: f64 = values.iter().sum();
        let mean = total / n;
        let std_dev = (values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / n).sqrt();

        let peak = argmax(values);
        let peak_value = values[peak];

        let centroid_nm = if total != 0.0 {
            wavelength.iter().zip(values).map(|(w, v)| w * v).sum::<f64>() / total
        } else {
            0.0
        };

        let half = peak_value / 2.0;
        let first = values.iter().position(|&v| v >= half);
        let last = values.iter().rposition(|&v| v >= half);
        let fwhm_nm = match (first, last) {
            (Some(a), Some(b)) => wavelength[b] - wavelength[a],
            _ => 0.0,
        };

        Ok(Self {
            min,
            max,
            mean,
            std_dev,
            total,
            peak_wavelength_nm: wavelength[peak],
            peak_value,
            centroid_nm,
            fwhm_nm,
        })
    }
}

/// Radiometric total of the samples within `[lo_nm, hi_nm]`.
///
/// Each sample is weighted by the distance to the next one; the last sample
/// is given 1 nm.
pub fn band_integral(wavelength: &[f64], values: &[f64], lo_nm: f64, hi_nm: f64) -> AppResult<f64> {
    check_pair(values, wavelength, "band integral")?;

    let last = wavelength.len() - 1;
    Ok(wavelength
        .iter()
        .zip(values)
        .enumerate()
        .filter(|(_, (w, _))| (lo_nm..=hi_nm).contains(*w))
        .map(|(i, (&w, &v))| {
            let width = if i < last {
                wavelength[i + 1] - w
            } else {
                LAST_SAMPLE_WIDTH_NM
            };
            v * width
        })
        .sum())
}

/// Differences between a spectrum and a reference taken on the same grid.
#[allow(missing_docs)]
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SpectrumComparison {
    /// Pearson correlation; `None` when either spectrum is constant
    pub correlation: Option<f64>,
    pub rms_difference: f64,
    /// Mean of `|a - b| / |b|`, in percent
    pub mean_relative_diff_percent: f64,
    /// Max of `|a - b| / |b|`, in percent
    pub max_relative_diff_percent: f64,
    /// Peak wavelength of `a` minus peak wavelength of `b`, nm
    pub peak_shift_nm: f64,
}

impl SpectrumComparison {
    /// Compare `a` against the reference `b`.
    pub fn compare(a: &[f64], b: &[f64], wavelength: &[f64]) -> AppResult<Self> {
        check_pair(a, b, "comparison")?;
        check_pair(a, wavelength, "comparison")?;

        let n = a.len() as f64;
        let mean_a = a.iter().sum::<f64>() / n;
        let mean_b = b.iter().sum::<f64>() / n;

        let (mut cov, mut var_a, mut var_b, mut sq_diff) = (0.0, 0.0, 0.0, 0.0);
        let mut rel_sum = 0.0;
        let mut rel_max = 0.0f64;
        for (&x, &y) in a.iter().zip(b) {
            cov += (x - mean_a) * (y - mean_b);
            var_a += (x - mean_a).powi(2);
            var_b += (y - mean_b).powi(2);
            sq_diff += (x - y).powi(2);

            let rel = (x - y).abs() / (y.abs() + RELATIVE_EPSILON);
            rel_sum += rel;
            rel_max = rel_max.max(rel);
        }

        let correlation = if var_a > 0.0 && var_b > 0.0 {
            Some(cov / (var_a.sqrt() * var_b.sqrt()))
        } else {
            None
        };

        Ok(Self {
            correlation,
            rms_difference: (sq_diff / n).sqrt(),
            mean_relative_diff_percent: rel_sum / n * 100.0,
            max_relative_diff_percent: rel_max * 100.0,
            peak_shift_nm: wavelength[argmax(a)] - wavelength[argmax(b)],
        })
    }
}
