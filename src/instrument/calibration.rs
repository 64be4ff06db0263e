//! Per-unit calibration tables.
//!
//! Every OSpRad unit ships with its own calibration, stored as rows in a shared
//! CSV catalog. Each row is tagged with the unit number and a field name:
//!
//! ```text
//! unit_number, field_name, value, value, ...
//! 7, wavCoef, 301.2, 2.41, -1.1e-3, 2.0e-6, 0, 0
//! 7, radSens, 0.0, 0.0, 1.3e6, ...        (288 values)
//! 7, irrSens, 0.0, 0.0, 8.1e5, ...        (288 values)
//! 7, linCoefs, 1.0, 0.001
//! ```
//!
//! - `wavCoef`: pixel-index-to-wavelength polynomial, lowest order first (≥ 6)
//! - `radSens` / `irrSens`: per-pixel responsivity; a value ≤ 0 excludes the pixel
//! - `linCoefs`: non-linearity correction coefficients (≥ 2)
//!
//! Rows for other units are skipped, as are rows whose first field is not an
//! integer (headers, notes). Empty trailing fields are dropped.
//!
//! # Derived values
//!
//! On load, the table computes per pixel `i`:
//!
//! ```text
//! wavelength[i] = sum(wavCoef[j] * i^j)  for j < min(6, len)
//! bin_width[i]  = wavelength[i+1] - wavelength[i]   (last bin repeats the previous)
//! efficiency[i] = two-lobe Gaussian approximation of the CIE photopic curve
//! ```
//!
//! Tables are immutable once built and shared as `Arc<CalibrationTable>`.

use crate::error::{AppResult, DaqError};
use crate::instrument::SENSOR_PIXELS;
use crate::measurement::MeasurementKind;
use serde::Serialize;
use std::collections::HashMap;
use std::fs::File;
use std::io::{BufReader, Read, Write};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{debug, info};

// =============================================================================
// Constants
// =============================================================================

/// Minimum number of wavelength polynomial coefficients.
pub const MIN_WAVELENGTH_COEFFS: usize = 6;

/// Highest number of wavelength coefficients used in the evaluation.
pub const USED_WAVELENGTH_COEFFS: usize = 6;

/// Minimum number of linearity coefficients.
pub const MIN_LINEARITY_COEFFS: usize = 2;

/// Two-lobe fit of the CIE photopic luminosity function:
/// `(a1, b1, c1, d1, a2, b2, c2, d2)` with `a` amplitude, `b` centre (nm) and
/// `c`/`d` the half-widths below/above the centre.
pub const PHOTOPIC_COEFFICIENTS: [f64; 8] = [0.821, 568.8, 46.9, 40.5, 0.286, 530.9, 16.3, 31.1];

/// Catalog field names.
pub mod fields {
    /// Wavelength polynomial coefficients
    pub const WAVELENGTH_COEFFS: &str = "wavCoef";
    /// Radiance sensitivity
    pub const RADIANCE_SENSITIVITY: &str = "radSens";
    /// Irradiance sensitivity
    pub const IRRADIANCE_SENSITIVITY: &str = "irrSens";
    /// Linearity coefficients
    pub const LINEARITY_COEFFS: &str = "linCoefs";
}

// =============================================================================
// Derivation
// =============================================================================

/// Evaluate the wavelength polynomial for every pixel index.
pub fn wavelengths_from_polynomial(coeffs: &[f64]) -> Vec<f64> {
    let used = coeffs.len().min(USED_WAVELENGTH_COEFFS);
    (0..SENSOR_PIXELS)
        .map(|i| {
            let x = i as f64;
            coeffs[..used]
                .iter()
                .enumerate()
                .map(|(j, c)| c * x.powi(j as i32))
                .sum()
        })
        .collect()
}

/// Forward-difference bin widths; the last bin repeats the one before it.
pub fn bin_widths(wavelength: &[f64]) -> Vec<f64> {
    let mut widths: Vec<f64> = wavelength.windows(2).map(|w| w[1] - w[0]).collect();
    if let Some(&last) = widths.last() {
        widths.push(last);
    }
    widths
}

/// Photopic luminous efficiency at `wavelength_nm`.
pub fn photopic_efficiency(wavelength_nm: f64) -> f64 {
    let [a1, b1, c1, d1, a2, b2, c2, d2] = PHOTOPIC_COEFFICIENTS;
    let half1 = if wavelength_nm < b1 { c1 } else { d1 };
    let half2 = if wavelength_nm < b2 { c2 } else { d2 };
    a1 * (-0.5 * ((wavelength_nm - b1) / half1).powi(2)).exp()
        + a2 * (-0.5 * ((wavelength_nm - b2) / half2).powi(2)).exp()
}

// =============================================================================
// Calibration Table
// =============================================================================

/// Validated calibration of one unit, with its derived per-pixel arrays.
#[derive(Debug, Clone, PartialEq)]
pub struct CalibrationTable {
    unit_number: u32,
    wavelength_polynomial_coeffs: Vec<f64>,
    radiance_sensitivity: Vec<f64>,
    irradiance_sensitivity: Vec<f64>,
    linearity_coeffs: Vec<f64>,
    wavelength: Vec<f64>,
    wavelength_bin_width: Vec<f64>,
    luminous_efficiency: Vec<f64>,
}

impl CalibrationTable {
    /// Validate the catalog fields and derive the per-pixel arrays.
    pub fn new(
        unit_number: u32,
        wavelength_polynomial_coeffs: Vec<f64>,
        radiance_sensitivity: Vec<f64>,
        irradiance_sensitivity: Vec<f64>,
        linearity_coeffs: Vec<f64>,
    ) -> AppResult<Self> {
        let invalid = |reason: String| DaqError::CalibrationInvalid {
            unit: unit_number,
            reason,
        };

        if wavelength_polynomial_coeffs.len() < MIN_WAVELENGTH_COEFFS {
            return Err(invalid(format!(
                "{} has {} coefficients, need at least {}",
                fields::WAVELENGTH_COEFFS,
                wavelength_polynomial_coeffs.len(),
                MIN_WAVELENGTH_COEFFS
            )));
        }
        for (name, values) in [
            (fields::RADIANCE_SENSITIVITY, &radiance_sensitivity),
            (fields::IRRADIANCE_SENSITIVITY, &irradiance_sensitivity),
        ] {
            if values.len() != SENSOR_PIXELS {
                return Err(invalid(format!(
                    "{} has {} values, expected {}",
                    name,
                    values.len(),
                    SENSOR_PIXELS
                )));
            }
        }
        if linearity_coeffs.len() < MIN_LINEARITY_COEFFS {
            return Err(invalid(format!(
                "{} has {} coefficients, need at least {}",
                fields::LINEARITY_COEFFS,
                linearity_coeffs.len(),
                MIN_LINEARITY_COEFFS
            )));
        }

        let wavelength = wavelengths_from_polynomial(&wavelength_polynomial_coeffs);
        if wavelength.iter().any(|w| !w.is_finite()) {
            return Err(invalid(format!(
                "{} produces non-finite wavelengths",
                fields::WAVELENGTH_COEFFS
            )));
        }
        let wavelength_bin_width = bin_widths(&wavelength);
        let luminous_efficiency = wavelength.iter().map(|&w| photopic_efficiency(w)).collect();

        Ok(Self {
            unit_number,
            wavelength_polynomial_coeffs,
            radiance_sensitivity,
            irradiance_sensitivity,
            linearity_coeffs,
            wavelength,
            wavelength_bin_width,
            luminous_efficiency,
        })
    }

    /// Unit this table belongs to.
    pub fn unit_number(&self) -> u32 {
        self.unit_number
    }

    /// Wavelength polynomial coefficients, lowest order first.
    pub fn wavelength_polynomial_coeffs(&self) -> &[f64] {
        &self.wavelength_polynomial_coeffs
    }

    /// Per-pixel radiance responsivity.
    pub fn radiance_sensitivity(&self) -> &[f64] {
        &self.radiance_sensitivity
    }

    /// Per-pixel irradiance responsivity.
    pub fn irradiance_sensitivity(&self) -> &[f64] {
        &self.irradiance_sensitivity
    }

    /// Responsivity table used for `kind`.
    pub fn sensitivity(&self, kind: MeasurementKind) -> &[f64] {
        match kind {
            MeasurementKind::Radiance => &self.radiance_sensitivity,
            MeasurementKind::Irradiance => &self.irradiance_sensitivity,
        }
    }

    /// Non-linearity correction coefficients.
    pub fn linearity_coeffs(&self) -> &[f64] {
        &self.linearity_coeffs
    }

    /// Wavelength of every pixel in nm.
    pub fn wavelength(&self) -> &[f64] {
        &self.wavelength
    }

    /// Wavelength bin width of every pixel in nm.
    pub fn wavelength_bin_width(&self) -> &[f64] {
        &self.wavelength_bin_width
    }

    /// Photopic efficiency of every pixel.
    pub fn luminous_efficiency(&self) -> &[f64] {
        &self.luminous_efficiency
    }

    /// First and last pixel wavelength.
    pub fn wavelength_range(&self) -> (f64, f64) {
        (
            self.wavelength.first().copied().unwrap_or_default(),
            self.wavelength.last().copied().unwrap_or_default(),
        )
    }

    /// Summary for status displays.
    pub fn info(&self) -> CalibrationInfo {
        let excluded = |values: &[f64]| values.iter().filter(|&&s| s <= 0.0).count();
        let (wavelength_min_nm, wavelength_max_nm) = self.wavelength_range();
        CalibrationInfo {
            unit_number: self.unit_number,
            wavelength_min_nm,
            wavelength_max_nm,
            excluded_radiance_pixels: excluded(&self.radiance_sensitivity),
            excluded_irradiance_pixels: excluded(&self.irradiance_sensitivity),
            linearity_coeffs: self.linearity_coeffs.clone(),
        }
    }
}

/// Calibration summary.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CalibrationInfo {
    /// Unit number
    pub unit_number: u32,
    /// Wavelength of pixel 0
    pub wavelength_min_nm: f64,
    /// Wavelength of the last pixel
    pub wavelength_max_nm: f64,
    /// Pixels with radiance sensitivity ≤ 0
    pub excluded_radiance_pixels: usize,
    /// Pixels with irradiance sensitivity ≤ 0
    pub excluded_irradiance_pixels: usize,
    /// Non-linearity correction coefficients
    pub linearity_coeffs: Vec<f64>,
}

// =============================================================================
// Catalog parsing
// =============================================================================

/// Where the calibration catalog comes from.
#[derive(Debug, Clone, PartialEq)]
pub enum CalibrationSource {
    /// CSV file on disk
    File(PathBuf),
    /// Catalog contents held in memory
    Inline(String),
}

impl CalibrationSource {
    fn open(&self, unit: u32) -> AppResult<Box<dyn Read + '_>> {
        match self {
            CalibrationSource::File(path) => match File::open(path) {
                Ok(file) => Ok(Box::new(BufReader::new(file))),
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                    Err(DaqError::CalibrationMissing {
                        unit,
                        reason: format!("calibration file not found: {}", path.display()),
                    })
                }
                Err(e) => Err(DaqError::Io(e)),
            },
            CalibrationSource::Inline(text) => Ok(Box::new(text.as_bytes())),
        }
    }
}

impl std::fmt::Display for CalibrationSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CalibrationSource::File(path) => write!(f, "{}", path.display()),
            CalibrationSource::Inline(_) => write!(f, "<inline catalog>"),
        }
    }
}

/// Load and validate the calibration of `unit_number` from `source`.
pub fn load_for_unit(unit_number: u32, source: &CalibrationSource) -> AppResult<CalibrationTable> {
    let reader = source.open(unit_number)?;
    let table = parse_catalog(unit_number, reader)?;
    info!(
        "Loaded calibration for unit #{} from {}",
        unit_number, source
    );
    Ok(table)
}

/// Extract the calibration of `unit_number` from CSV catalog rows.
pub fn parse_catalog<R: Read>(unit_number: u32, reader: R) -> AppResult<CalibrationTable> {
    let mut csv_reader = csv::ReaderBuilder::new()
        .has_headers(false)
        .flexible(true)
        .trim(csv::Trim::All)
        .from_reader(reader);

    let mut wav_coef = Vec::new();
    let mut rad_sens = Vec::new();
    let mut irr_sens = Vec::new();
    let mut lin_coefs = Vec::new();
    let mut rows_seen = 0usize;

    for record in csv_reader.records() {
        let record = record?;

        let Some(row_unit) = record.get(0).and_then(|f| f.parse::<u32>().ok()) else {
            continue;
        };
        if row_unit != unit_number {
            continue;
        }
        rows_seen += 1;

        let field_name = record.get(1).unwrap_or_default();
        let target = match field_name {
            fields::WAVELENGTH_COEFFS => &mut wav_coef,
            fields::RADIANCE_SENSITIVITY => &mut rad_sens,
            fields::IRRADIANCE_SENSITIVITY => &mut irr_sens,
            fields::LINEARITY_COEFFS => &mut lin_coefs,
            other => {
                debug!("Ignoring catalog field '{}' for unit #{}", other, unit_number);
                continue;
            }
        };

        *target = record
            .iter()
            .skip(2)
            .filter(|v| !v.is_empty())
            .map(|v| {
                v.parse::<f64>().map_err(|_| DaqError::CalibrationInvalid {
                    unit: unit_number,
                    reason: format!("{}: '{}' is not a number", field_name, v),
                })
            })
            .collect::<AppResult<Vec<f64>>>()?;
    }

    if rows_seen == 0 {
        return Err(DaqError::CalibrationMissing {
            unit: unit_number,
            reason: "no catalog rows for this unit".to_string(),
        });
    }

    CalibrationTable::new(unit_number, wav_coef, rad_sens, irr_sens, lin_coefs)
}

/// Write `table` as catalog rows, the inverse of [`parse_catalog`].
pub fn write_catalog<W: Write>(table: &CalibrationTable, writer: W) -> AppResult<()> {
    let mut csv_writer = csv::WriterBuilder::new()
        .flexible(true)
        .has_headers(false)
        .from_writer(writer);

    let unit = table.unit_number().to_string();
    for (name, values) in [
        (fields::WAVELENGTH_COEFFS, table.wavelength_polynomial_coeffs()),
        (fields::RADIANCE_SENSITIVITY, table.radiance_sensitivity()),
        (fields::IRRADIANCE_SENSITIVITY, table.irradiance_sensitivity()),
        (fields::LINEARITY_COEFFS, table.linearity_coeffs()),
    ] {
        let mut row = vec![unit.clone(), name.to_string()];
        row.extend(values.iter().map(|v| v.to_string()));
        csv_writer.write_record(&row)?;
    }
    csv_writer.flush()?;
    Ok(())
}

// =============================================================================
// Calibration Store
// =============================================================================

/// Session cache of calibration tables, loaded lazily per unit.
#[derive(Debug)]
pub struct CalibrationStore {
    source: CalibrationSource,
    tables: HashMap<u32, Arc<CalibrationTable>>,
}

impl CalibrationStore {
    /// Empty store reading from `source` on demand.
    pub fn new(source: CalibrationSource) -> Self {
        Self {
            source,
            tables: HashMap::new(),
        }
    }

    /// Catalog the store reads from.
    pub fn source(&self) -> &CalibrationSource {
        &self.source
    }

    /// Cached table for `unit`, loading it from the catalog on first use.
    ///
    /// A failed load leaves the cache unchanged.
    pub fn resolve(&mut self, unit: u32) -> AppResult<Arc<CalibrationTable>> {
        if let Some(table) = self.tables.get(&unit) {
            return Ok(Arc::clone(table));
        }
        let table = Arc::new(load_for_unit(unit, &self.source)?);
        self.tables.insert(unit, Arc::clone(&table));
        Ok(table)
    }

    /// Cached table for `unit`, without loading.
    pub fn get(&self, unit: u32) -> Option<Arc<CalibrationTable>> {
        self.tables.get(&unit).cloned()
    }

    /// Seed the cache with an already validated table.
    pub fn insert(&mut self, table: CalibrationTable) -> Arc<CalibrationTable> {
        let table = Arc::new(table);
        self.tables.insert(table.unit_number(), Arc::clone(&table));
        table
    }

    /// Units currently cached, ascending.
    pub fn loaded_units(&self) -> Vec<u32> {
        let mut units: Vec<u32> = self.tables.keys().copied().collect();
        units.sort_unstable();
        units
    }

    /// Drop every cached table.
    pub fn clear(&mut self) {
        self.tables.clear();
    }
}
