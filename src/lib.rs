//! Core library for the OSpRad spectroradiometer.
//!
//! The crate talks to the instrument over a line-oriented serial protocol,
//! converts raw detector frames into calibrated spectra using the per-unit
//! calibration catalog, and derives photometric and colorimetric quantities
//! from the result.
//!
//! ```text
//! OspradDevice --command--> Transport --frame--> CalibrationStore
//!       |                                             |
//!       +---------- SpectralProcessor <---------------+
//!                          |
//!                  MeasurementResult --> colorimetry / analysis
//! ```
//!
//! It is used by the `osprad` command-line tool and can be embedded in any
//! application that needs calibrated spectra from the device.

pub mod adapters;
pub mod config;
pub mod data;
pub mod error;
pub mod instrument;
pub mod measurement;

pub use error::{AppResult, DaqError, ErrorKind};
pub use instrument::{OspradDevice, SpectralDevice};
pub use measurement::{MeasurementKind, MeasurementResult};
