//! End-to-end tests of the measurement pipeline against the simulated instrument.
//!
//! Run with: cargo test --test measurement_pipeline

use osprad::adapters::mock::{format_frame, MockHandle, MockReply, MockTransportFactory};
use osprad::instrument::calibration::CalibrationSource;
use osprad::instrument::protocol::{ProtocolOptions, RetryPolicy};
use osprad::instrument::{
    DeviceOptions, DeviceStatus, MeasurementSettings, OspradDevice, SpectralDevice, SENSOR_PIXELS,
};
use osprad::measurement::MeasurementUnit;
use osprad::{DaqError, ErrorKind, MeasurementKind};
use std::io::Write;
use std::time::Duration;
use tempfile::NamedTempFile;

/// Catalog rows for `unit`: pixel `i` at `380 + i` nm, unit sensitivity.
fn catalog_rows(unit: u32) -> String {
    let ones = vec!["1.0"; SENSOR_PIXELS].join(",");
    format!(
        "{unit},wavCoef,380,1,0,0,0,0\n\
         {unit},radSens,{ones}\n\
         {unit},irrSens,{ones}\n\
         {unit},linCoefs,1.0,0.001\n"
    )
}

fn write_catalog_file(contents: &str) -> NamedTempFile {
    let mut file = NamedTempFile::new().unwrap();
    file.write_all(contents.as_bytes()).unwrap();
    file
}

fn options(calibration: CalibrationSource) -> DeviceOptions {
    DeviceOptions {
        settle_delay: Duration::ZERO,
        protocol: ProtocolOptions {
            retry: RetryPolicy {
                max_attempts: 2,
                backoff_delay: Duration::ZERO,
            },
            ack_timeout: Duration::from_millis(10),
            response_timeout: Duration::from_millis(10),
            terminator: String::new(),
        },
        calibration,
    }
}

fn device_with_frame(frame: String, catalog: &NamedTempFile) -> (OspradDevice, MockHandle) {
    let factory = MockTransportFactory::with_frame(frame);
    let handle = factory.handle();
    let device = OspradDevice::new(
        Box::new(factory),
        options(CalibrationSource::File(catalog.path().to_path_buf())),
    );
    (device, handle)
}

fn uniform_frame(unit: u32) -> String {
    format_frame(unit, 5, 100, 0.0, &[1000.0; SENSOR_PIXELS])
}

#[test]
fn test_uniform_frame_end_to_end() {
    let catalog = write_catalog_file(&format!("{}{}", catalog_rows(2), catalog_rows(1)));
    let (mut device, handle) = device_with_frame(uniform_frame(1), &catalog);

    device.connect().unwrap();
    device
        .configure(&MeasurementSettings::new(100, 5, 5))
        .unwrap();
    let result = device.measure(MeasurementKind::Radiance).unwrap();

    assert_eq!(handle.commands(), vec!["t100", "n5", "a5", "r"]);

    assert_eq!(result.wavelength.len(), SENSOR_PIXELS);
    assert_eq!(result.wavelength[0], 380.0);
    assert_eq!(result.wavelength[SENSOR_PIXELS - 1], 667.0);
    assert_eq!(result.spectral_value.len(), SENSOR_PIXELS);
    assert!(result
        .spectral_value
        .iter()
        .all(|v| v.is_finite() && *v > 0.0));

    assert_eq!(result.measurement_kind, MeasurementKind::Radiance);
    assert_eq!(result.integration_time_ms, 100);
    assert_eq!(result.num_scans, 5);
    assert_eq!(result.saturation_percent, 0.0);
    assert_eq!(result.raw_counts, vec![1000.0; SENSOR_PIXELS]);
    assert_eq!(result.device_identity.serial, "1");
    assert_eq!(result.spectral_unit, MeasurementUnit::WattsPerSrSqmNm);
    assert_eq!(result.photometric_unit, MeasurementUnit::CandelaPerSqm);
    assert!(result.luminance > 0.0);
    assert_eq!(result.illuminance, 0.0);
    assert!(result.faulted_pixels.is_empty());
    assert_eq!(device.status(), DeviceStatus::Connected);
}

#[test]
fn test_irradiance_fills_illuminance() {
    let catalog = write_catalog_file(&catalog_rows(3));
    let (mut device, handle) = device_with_frame(uniform_frame(3), &catalog);

    device.connect().unwrap();
    let result = device.measure(MeasurementKind::Irradiance).unwrap();

    assert_eq!(handle.commands(), vec!["i"]);
    assert!(result.illuminance > 0.0);
    assert_eq!(result.luminance, 0.0);
    assert_eq!(result.photometric_unit, MeasurementUnit::Lux);
}

#[test]
fn test_malformed_frame_is_protocol_failure() {
    let catalog = write_catalog_file(&catalog_rows(1));
    let (mut device, handle) = device_with_frame(uniform_frame(1), &catalog);
    device.connect().unwrap();

    let short = format_frame(1, 5, 100, 0.0, &[1000.0; 100]);
    for reply in [short, String::new(), "1,0,5,100,0.0,abc".to_string()] {
        device.connect().unwrap();
        handle.push_reply(MockReply::Line(reply));

        let err = device.measure(MeasurementKind::Radiance).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ProtocolFailure);
        assert_eq!(device.status(), DeviceStatus::Error);
        assert!(device.last_error().is_some());
    }
}

#[test]
fn test_missing_calibration() {
    let catalog = write_catalog_file(&catalog_rows(1));
    let (mut device, _handle) = device_with_frame(uniform_frame(9), &catalog);
    device.connect().unwrap();

    let err = device.measure(MeasurementKind::Radiance).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::CalibrationMissing);
    assert!(device.last_error().unwrap().contains("#9"));
    assert!(device.calibration().loaded_units().is_empty());
}

#[test]
fn test_missing_catalog_file() {
    let factory = MockTransportFactory::with_frame(uniform_frame(1));
    let mut device = OspradDevice::new(
        Box::new(factory),
        options(CalibrationSource::File("/nonexistent/calibration_data.csv".into())),
    );
    device.connect().unwrap();

    let err = device.measure(MeasurementKind::Radiance).unwrap_err();
    assert!(matches!(err, DaqError::CalibrationMissing { unit: 1, .. }));
}

#[test]
fn test_invalid_calibration() {
    let rows = catalog_rows(1).replace("1,linCoefs,1.0,0.001", "1,linCoefs,1.0");
    let catalog = write_catalog_file(&rows);
    let (mut device, _handle) = device_with_frame(uniform_frame(1), &catalog);
    device.connect().unwrap();

    let err = device.measure(MeasurementKind::Radiance).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::CalibrationInvalid);
}

#[test]
fn test_measure_when_not_connected() {
    let catalog = write_catalog_file(&catalog_rows(1));
    let (mut device, handle) = device_with_frame(uniform_frame(1), &catalog);

    let err = device.measure(MeasurementKind::Radiance).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::MeasurementFailure);
    assert_eq!(device.last_error(), Some("Measurement failed: Device not connected"));
    assert_eq!(device.status(), DeviceStatus::Error);
    assert!(handle.commands().is_empty());
}

#[test]
fn test_silent_device_is_bounded() {
    let catalog = write_catalog_file(&catalog_rows(1));
    let (mut device, handle) = device_with_frame(uniform_frame(1), &catalog);
    device.connect().unwrap();
    handle.set_silent(true);

    let err = device.measure(MeasurementKind::Radiance).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::ProtocolFailure);
    assert!(err.is_timeout());
    // the measurement is waited for twice but written once
    assert_eq!(handle.commands(), vec!["r"]);
}

#[test]
fn test_silent_settings_are_resent() {
    let catalog = write_catalog_file(&catalog_rows(1));
    let (mut device, handle) = device_with_frame(uniform_frame(1), &catalog);
    device.connect().unwrap();
    handle.push_reply(MockReply::Silence);

    device
        .configure(&MeasurementSettings {
            integration_time_ms: Some(40),
            min_scans: None,
            max_scans: None,
        })
        .unwrap();
    assert_eq!(handle.commands(), vec!["t40", "t40"]);
    assert_eq!(device.status(), DeviceStatus::Connected);
}

#[test]
fn test_calibration_is_cached_across_measurements() {
    let catalog = write_catalog_file(&catalog_rows(1));
    let (mut device, _handle) = device_with_frame(uniform_frame(1), &catalog);
    device.connect().unwrap();

    let first = device.measure(MeasurementKind::Radiance).unwrap();

    // the catalog disappearing does not matter once the unit is cached
    let path = catalog.path().to_path_buf();
    drop(catalog);
    assert!(!path.exists());

    let second = device.measure(MeasurementKind::Radiance).unwrap();
    assert_eq!(first.spectral_value, second.spectral_value);
}

#[test]
fn test_excluded_pixel_in_catalog() {
    let mut sens = vec!["1.0"; SENSOR_PIXELS];
    sens[0] = "0";
    sens[287] = "-1";
    let sens = sens.join(",");
    let rows = format!(
        "1,wavCoef,380,1,0,0,0,0\n1,radSens,{sens}\n1,irrSens,{sens}\n1,linCoefs,1.0,0.001\n"
    );
    let catalog = write_catalog_file(&rows);
    let (mut device, _handle) = device_with_frame(uniform_frame(1), &catalog);
    device.connect().unwrap();

    let result = device.measure(MeasurementKind::Radiance).unwrap();
    assert_eq!(result.spectral_value[0], 0.0);
    assert_eq!(result.spectral_value[287], 0.0);
    assert!(result.spectral_value[1] > 0.0);
}

#[test]
fn test_color_of_result() {
    let catalog = write_catalog_file(&catalog_rows(1));
    let (mut device, _handle) = device_with_frame(uniform_frame(1), &catalog);
    device.connect().unwrap();

    let result = device.measure(MeasurementKind::Radiance).unwrap();
    let color = result.color();
    assert!(color.x > 0.0 && color.x < 1.0);
    assert!(color.y > 0.0 && color.y < 1.0);
    assert!(color.cct_kelvin.is_finite());
}
