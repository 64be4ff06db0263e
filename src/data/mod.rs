//! Processing of calibrated spectra.
//!
//! Nothing here is needed for a measurement to succeed; these are consumers of
//! [`MeasurementResult`](crate::measurement::MeasurementResult).

pub mod analysis;
pub mod colorimetry;

pub use analysis::{band_integral, SpectrumComparison, SpectrumStatistics};
pub use colorimetry::{cct, chromaticity, spectrum_to_rgb, tristimulus, ColorSummary, Xyz};
