//! Hardware integration tests for the OSpRad spectroradiometer
//!
//! These tests require a device on a serial port and a calibration catalog
//! containing its unit.
//! Run with: cargo test --test osprad_hardware_test -- --ignored --nocapture
//!
//! Hardware Setup:
//! - OSpRad connected over USB (enumerates as /dev/ttyUSB* or /dev/ttyACM*)
//! - `OSPRAD_DEVICE__PORT` set if it is not the first port
//! - `OSPRAD_CALIBRATION__PATH` pointing at the catalog

use osprad::config::Settings;
use osprad::instrument::{DeviceStatus, MeasurementSettings, OspradDevice, SpectralDevice};
use osprad::MeasurementKind;

fn hardware_device() -> OspradDevice {
    let settings = Settings::load().unwrap();
    OspradDevice::from_settings(&settings)
}

#[test]
#[ignore] // Hardware-only test
fn test_connect_and_measure_radiance() {
    let mut device = hardware_device();
    device.connect().unwrap();
    assert_eq!(device.status(), DeviceStatus::Connected);

    device
        .configure(&MeasurementSettings::new(0, 3, 10))
        .unwrap();
    let result = device.measure(MeasurementKind::Radiance).unwrap();
    println!("{}", result);

    assert_eq!(result.wavelength.len(), result.spectral_value.len());
    assert!(result.luminance.is_finite());
    assert!(device.capabilities().serial_number == result.device_identity.serial);

    device.disconnect().unwrap();
}

#[test]
#[ignore]
fn test_fixed_integration_time_is_reported() {
    let mut device = hardware_device();
    device.connect().unwrap();

    device
        .configure(&MeasurementSettings::new(50, 1, 1))
        .unwrap();
    let result = device.measure(MeasurementKind::Irradiance).unwrap();
    println!(
        "integration {} ms, {} scans, saturation {:.1}%",
        result.integration_time_ms, result.num_scans, result.saturation_percent
    );

    assert_eq!(result.integration_time_ms, 50);
    assert_eq!(result.num_scans, 1);

    device.disconnect().unwrap();
}
