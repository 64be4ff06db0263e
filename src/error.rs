//! Custom error types for the application.
//!
//! This module defines the primary error type, `DaqError`, for the whole crate.
//! Using the `thiserror` crate, it provides a centralized and consistent way to
//! handle everything that can go wrong between the serial link and the
//! calibrated spectrum.
//!
//! ## Error Hierarchy
//!
//! - **`Connection`**: no transport could be opened (no port, permission denied).
//! - **`CalibrationMissing`** / **`CalibrationInvalid`**: the catalog has no entry
//!   for the reported unit, or the entry failed validation.
//! - **`Protocol`** / **`ProtocolTimeout`**: malformed, short, unparsable or absent
//!   response lines.
//! - **`Measurement`**: a measure call that could not run (device not connected,
//!   wrong frame length handed to the processor).
//! - **`Config`** / **`Configuration`**: figment load errors and semantic
//!   validation errors in the settings.
//!
//! Callers that only care about the category use [`DaqError::kind`].

use std::time::Duration;
use thiserror::Error;

/// Convenience alias for results using the application error type.
pub type AppResult<T> = std::result::Result<T, DaqError>;

#[allow(missing_docs)]
#[derive(Error, Debug)]
pub enum DaqError {
    #[error("Connection failed: {0}")]
    Connection(String),

    #[error("Calibration not found for unit #{unit}: {reason}")]
    CalibrationMissing { unit: u32, reason: String },

    #[error("Calibration for unit #{unit} is invalid: {reason}")]
    CalibrationInvalid { unit: u32, reason: String },

    #[error("Protocol error: {0}")]
    Protocol(String),

    #[error("Protocol error: no response within {0:?}")]
    ProtocolTimeout(Duration),

    #[error("Measurement failed: {0}")]
    Measurement(String),

    #[error("Data processing error: {0}")]
    Processing(String),

    #[error("Configuration error: {0}")]
    Config(#[from] figment::Error),

    #[error("Configuration validation error: {0}")]
    Configuration(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("Serial support not enabled. Rebuild with --features instrument_serial")]
    SerialFeatureDisabled,
}

/// Coarse error categories reported to callers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// No transport available, or it could not be opened.
    ConnectionFailure,
    /// The calibration catalog has no entry for the unit.
    CalibrationMissing,
    /// The calibration entry failed validation.
    CalibrationInvalid,
    /// Malformed, short, unparsable or missing response.
    ProtocolFailure,
    /// The measurement could not be carried out.
    MeasurementFailure,
    /// Settings could not be loaded or are inconsistent.
    Configuration,
    /// Local file I/O.
    Io,
}

impl DaqError {
    /// Category of this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            DaqError::Connection(_) | DaqError::SerialFeatureDisabled => {
                ErrorKind::ConnectionFailure
            }
            DaqError::CalibrationMissing { .. } => ErrorKind::CalibrationMissing,
            DaqError::CalibrationInvalid { .. } => ErrorKind::CalibrationInvalid,
            DaqError::Protocol(_) | DaqError::ProtocolTimeout(_) => ErrorKind::ProtocolFailure,
            DaqError::Measurement(_) | DaqError::Processing(_) => ErrorKind::MeasurementFailure,
            DaqError::Config(_) | DaqError::Configuration(_) => ErrorKind::Configuration,
            DaqError::Io(_) | DaqError::Csv(_) => ErrorKind::Io,
        }
    }

    /// Whether retrying the same exchange could succeed.
    pub fn is_timeout(&self) -> bool {
        matches!(self, DaqError::ProtocolTimeout(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = DaqError::Protocol("empty response line".to_string());
        assert_eq!(err.to_string(), "Protocol error: empty response line");

        let err = DaqError::CalibrationMissing {
            unit: 7,
            reason: "no catalog rows".into(),
        };
        assert_eq!(
            err.to_string(),
            "Calibration not found for unit #7: no catalog rows"
        );
    }

    #[test]
    fn test_timeout_is_protocol_failure() {
        let err = DaqError::ProtocolTimeout(Duration::from_millis(250));
        assert_eq!(err.kind(), ErrorKind::ProtocolFailure);
        assert!(err.is_timeout());
        assert!(!DaqError::Protocol("bad".into()).is_timeout());
    }

    #[test]
    fn test_kind_mapping() {
        assert_eq!(
            DaqError::Connection("no ports".into()).kind(),
            ErrorKind::ConnectionFailure
        );
        assert_eq!(
            DaqError::SerialFeatureDisabled.kind(),
            ErrorKind::ConnectionFailure
        );
        assert_eq!(
            DaqError::CalibrationInvalid {
                unit: 1,
                reason: "short".into()
            }
            .kind(),
            ErrorKind::CalibrationInvalid
        );
        assert_eq!(
            DaqError::Measurement("Device not connected".into()).kind(),
            ErrorKind::MeasurementFailure
        );
    }
}
