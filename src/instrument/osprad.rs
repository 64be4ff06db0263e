//! OSpRad spectroradiometer driver
//!
//! `OspradDevice` owns one transport and one [`DeviceSession`]. Every
//! operation blocks until the device answers or the protocol deadline passes.
//!
//! ## State machine
//!
//! ```text
//! Disconnected -> Connecting -> Connected <-> Measuring
//!        any failure -> Error        disconnect -> Disconnected
//! ```
//!
//! ## Measurement flow
//!
//! 1. Send `r` or `i` and read one frame
//! 2. Resolve the calibration of the unit named in the frame, loading it from
//!    the catalog on first use
//! 3. Run the spectral processor and assemble a [`MeasurementResult`]
//!
//! Any failure stores its message, moves the session to `Error` and returns
//! the error; the caller decides whether to reconnect.
//!
//! ## Configuration
//!
//! ```toml
//! [device]
//! port = "/dev/ttyUSB0"
//! settle_ms = 1000
//!
//! [protocol]
//! response_timeout_ms = 120000
//! max_attempts = 3
//!
//! [calibration]
//! path = "calibration_data.csv"
//! ```

use crate::adapters::{SerialTransportFactory, Transport, TransportFactory};
use crate::config::Settings;
use crate::error::{AppResult, DaqError};
use crate::instrument::calibration::{CalibrationSource, CalibrationStore};
use crate::instrument::capabilities::DeviceCapabilities;
use crate::instrument::protocol::{self, Command, ProtocolOptions, RetryPolicy};
use crate::instrument::spectral::SpectralProcessor;
use crate::instrument::{
    clamp_scans, DeviceStatus, MeasurementSettings, SpectralDevice, DEFAULT_MIN_SCANS, MAX_SCANS,
};
use crate::measurement::{DeviceIdentity, MeasurementKind, MeasurementResult};
use chrono::Utc;
use std::time::Duration;
use tracing::{debug, error, info};

/// Name reported in [`DeviceIdentity`].
const DEVICE_NAME: &str = "OSpRad";

/// Link and calibration options for one device.
#[derive(Debug, Clone, PartialEq)]
pub struct DeviceOptions {
    /// Pause after opening the transport before the first command
    pub settle_delay: Duration,
    /// Timeouts, retries and framing
    pub protocol: ProtocolOptions,
    /// Calibration catalog
    pub calibration: CalibrationSource,
}

impl Default for DeviceOptions {
    fn default() -> Self {
        Self::from(&Settings::default())
    }
}

impl From<&Settings> for DeviceOptions {
    fn from(settings: &Settings) -> Self {
        Self {
            settle_delay: Duration::from_millis(settings.device.settle_ms),
            protocol: ProtocolOptions {
                retry: RetryPolicy {
                    max_attempts: settings.protocol.max_attempts,
                    backoff_delay: Duration::from_millis(settings.protocol.backoff_ms),
                },
                ack_timeout: settings.protocol.ack_timeout(),
                response_timeout: settings.protocol.response_timeout(),
                terminator: settings.protocol.command_terminator.clone(),
            },
            calibration: CalibrationSource::File(settings.calibration.path.clone()),
        }
    }
}

/// Mutable per-connection state.
#[derive(Debug, Clone, PartialEq)]
pub struct DeviceSession {
    status: DeviceStatus,
    /// Settings in effect, starting from the firmware defaults
    applied: MeasurementSettings,
    /// Values acknowledged by the device; `None` until first sent
    last_sent: MeasurementSettings,
    last_error: Option<String>,
    /// Unit reported by the most recent frame
    unit_number: Option<u32>,
}

impl Default for DeviceSession {
    fn default() -> Self {
        Self {
            status: DeviceStatus::Disconnected,
            applied: MeasurementSettings::new(0, DEFAULT_MIN_SCANS, MAX_SCANS),
            last_sent: MeasurementSettings::default(),
            last_error: None,
            unit_number: None,
        }
    }
}

impl DeviceSession {
    /// Current state.
    pub fn status(&self) -> DeviceStatus {
        self.status
    }

    /// Values the device has acknowledged.
    pub fn last_sent(&self) -> MeasurementSettings {
        self.last_sent
    }

    /// Unit reported by the most recent frame.
    pub fn unit_number(&self) -> Option<u32> {
        self.unit_number
    }
}

/// OSpRad driver.
pub struct OspradDevice {
    factory: Box<dyn TransportFactory>,
    transport: Option<Box<dyn Transport>>,
    session: DeviceSession,
    calibration: CalibrationStore,
    options: DeviceOptions,
}

impl OspradDevice {
    /// Create a driver that opens its link through `factory`.
    pub fn new(factory: Box<dyn TransportFactory>, options: DeviceOptions) -> Self {
        let calibration = CalibrationStore::new(options.calibration.clone());
        Self {
            factory,
            transport: None,
            session: DeviceSession::default(),
            calibration,
            options,
        }
    }

    /// Create a serial driver from loaded settings.
    pub fn from_settings(settings: &Settings) -> Self {
        let factory = SerialTransportFactory::new(
            settings.device.port.clone(),
            settings.device.baud_rate,
        );
        Self::new(Box::new(factory), DeviceOptions::from(settings))
    }

    /// Session state.
    pub fn session(&self) -> &DeviceSession {
        &self.session
    }

    /// Calibration tables loaded in this session.
    pub fn calibration(&self) -> &CalibrationStore {
        &self.calibration
    }

    /// Mutable access to the calibration cache, e.g. to seed a table.
    pub fn calibration_mut(&mut self) -> &mut CalibrationStore {
        &mut self.calibration
    }

    /// Options this driver was built with.
    pub fn options(&self) -> &DeviceOptions {
        &self.options
    }

    fn fail(&mut self, err: DaqError) -> DaqError {
        error!("OSpRad error: {}", err);
        self.session.status = DeviceStatus::Error;
        self.session.last_error = Some(err.to_string());
        err
    }

    fn apply(&mut self, settings: &MeasurementSettings) -> AppResult<()> {
        let Self {
            transport,
            session,
            options,
            ..
        } = self;
        let transport = transport
            .as_mut()
            .ok_or_else(|| DaqError::Connection("Device not connected".to_string()))?;
        let protocol_options = &options.protocol;

        if let Some(ms) = settings.integration_time_ms {
            send_if_changed(
                transport.as_mut(),
                protocol_options,
                "integration_time_ms",
                ms,
                &mut session.last_sent.integration_time_ms,
                Command::SetIntegrationTime,
            )?;
            session.applied.integration_time_ms = Some(ms);
        }
        if let Some(count) = settings.min_scans.map(clamp_scans) {
            send_if_changed(
                transport.as_mut(),
                protocol_options,
                "min_scans",
                count,
                &mut session.last_sent.min_scans,
                Command::SetMinScans,
            )?;
            session.applied.min_scans = Some(count);
        }
        if let Some(count) = settings.max_scans.map(clamp_scans) {
            send_if_changed(
                transport.as_mut(),
                protocol_options,
                "max_scans",
                count,
                &mut session.last_sent.max_scans,
                Command::SetMaxScans,
            )?;
            session.applied.max_scans = Some(count);
        }
        Ok(())
    }

    fn acquire(&mut self, kind: MeasurementKind) -> AppResult<MeasurementResult> {
        let transport = self
            .transport
            .as_mut()
            .ok_or_else(|| DaqError::Measurement("Device not connected".to_string()))?;

        let frame = protocol::request(
            transport.as_mut(),
            &Command::Measure(kind),
            &self.options.protocol,
        )?;
        debug!(
            "Frame from unit #{}: {} scans, {} ms, {:.1}% saturated",
            frame.unit_number,
            frame.num_scans_averaged,
            frame.actual_integration_time_ms,
            frame.saturation_percent
        );

        let table = self.calibration.resolve(frame.unit_number)?;
        let output = SpectralProcessor::compute(
            &table,
            &frame.raw_counts,
            frame.actual_integration_time_ms,
            kind,
        )?;
        self.session.unit_number = Some(frame.unit_number);

        let (luminance, illuminance) = match kind {
            MeasurementKind::Radiance => (output.photometric, 0.0),
            MeasurementKind::Irradiance => (0.0, output.photometric),
        };

        Ok(MeasurementResult {
            wavelength: table.wavelength().to_vec(),
            spectral_value: output.spectral_value,
            measurement_kind: kind,
            timestamp: Utc::now(),
            luminance,
            illuminance,
            integration_time_ms: frame.actual_integration_time_ms,
            num_scans: frame.num_scans_averaged,
            saturation_percent: frame.saturation_percent,
            raw_counts: frame.raw_counts,
            device_identity: DeviceIdentity {
                name: DEVICE_NAME.to_string(),
                serial: frame.unit_number.to_string(),
            },
            spectral_unit: kind.spectral_unit(),
            photometric_unit: kind.photometric_unit(),
            faulted_pixels: output.faulted_pixels,
        })
    }
}

/// Send `command(value)` unless `value` was the last value acknowledged.
fn send_if_changed(
    transport: &mut dyn Transport,
    options: &ProtocolOptions,
    name: &str,
    value: u32,
    last_sent: &mut Option<u32>,
    command: fn(u32) -> Command,
) -> AppResult<()> {
    if *last_sent == Some(value) {
        debug!("Skipping {} = {}: already sent", name, value);
        return Ok(());
    }
    protocol::send(transport, &command(value), options)?;
    *last_sent = Some(value);
    Ok(())
}

impl SpectralDevice for OspradDevice {
    fn connect(&mut self) -> AppResult<()> {
        if self.is_connected() {
            return Ok(());
        }

        self.transport = None;
        self.session.status = DeviceStatus::Connecting;
        info!("Connecting to OSpRad via {}", self.factory.describe());

        let mut transport = match self.factory.open() {
            Ok(transport) => transport,
            Err(e) => return Err(self.fail(e)),
        };

        if !self.options.settle_delay.is_zero() {
            std::thread::sleep(self.options.settle_delay);
        }
        // drop any boot banner emitted while the port was opening
        if let Err(e) = transport.discard_input() {
            return Err(self.fail(e));
        }

        info!("Connected to OSpRad on {}", transport.name());
        self.transport = Some(transport);
        self.session.status = DeviceStatus::Connected;
        self.session.last_error = None;
        Ok(())
    }

    fn disconnect(&mut self) -> AppResult<()> {
        if let Some(transport) = self.transport.take() {
            info!("Disconnecting from OSpRad on {}", transport.name());
        }
        self.session = DeviceSession::default();
        self.calibration.clear();
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.transport.is_some() && self.session.status == DeviceStatus::Connected
    }

    fn status(&self) -> DeviceStatus {
        self.session.status
    }

    fn capabilities(&self) -> DeviceCapabilities {
        let unit = self
            .session
            .unit_number
            .filter(|unit| self.calibration.get(*unit).is_some());
        DeviceCapabilities::osprad(unit)
    }

    fn configure(&mut self, settings: &MeasurementSettings) -> AppResult<()> {
        if !self.is_connected() {
            return Err(self.fail(DaqError::Connection("Device not connected".to_string())));
        }

        match self.apply(settings) {
            Ok(()) => Ok(()),
            Err(e) => Err(self.fail(e)),
        }
    }

    fn measure(&mut self, kind: MeasurementKind) -> AppResult<MeasurementResult> {
        if !self.is_connected() {
            return Err(self.fail(DaqError::Measurement("Device not connected".to_string())));
        }

        self.session.status = DeviceStatus::Measuring;
        match self.acquire(kind) {
            Ok(result) => {
                self.session.status = DeviceStatus::Connected;
                info!("{}", result);
                Ok(result)
            }
            Err(e) => Err(self.fail(e)),
        }
    }

    fn current_settings(&self) -> MeasurementSettings {
        self.session.applied
    }

    fn last_error(&self) -> Option<&str> {
        self.session.last_error.as_deref()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::mock::{format_frame, MockHandle, MockTransportFactory};
    use crate::instrument::calibration::tests::linear_catalog;
    use crate::instrument::SENSOR_PIXELS;
    use tracing_test::traced_test;

    fn fast_options(catalog: String) -> DeviceOptions {
        DeviceOptions {
            settle_delay: Duration::ZERO,
            protocol: ProtocolOptions {
                retry: RetryPolicy::no_retry(),
                ack_timeout: Duration::from_millis(5),
                response_timeout: Duration::from_millis(5),
                terminator: String::new(),
            },
            calibration: CalibrationSource::Inline(catalog),
        }
    }

    fn connected_device() -> (OspradDevice, MockHandle) {
        let factory = MockTransportFactory::with_frame(format_frame(
            1,
            5,
            100,
            0.0,
            &[1000.0; SENSOR_PIXELS],
        ));
        let handle = factory.handle();
        let mut device = OspradDevice::new(Box::new(factory), fast_options(linear_catalog(1, 1.0)));
        device.connect().unwrap();
        (device, handle)
    }

    #[test]
    #[traced_test]
    fn test_configure_suppresses_repeated_writes() {
        let (mut device, handle) = connected_device();

        device.configure(&MeasurementSettings::new(100, 3, 20)).unwrap();
        device.configure(&MeasurementSettings::new(100, 4, 20)).unwrap();

        assert_eq!(handle.commands(), vec!["t100", "n3", "a20", "n4"]);
        assert!(logs_contain("Skipping integration_time_ms = 100: already sent"));
        assert_eq!(device.current_settings(), MeasurementSettings::new(100, 4, 20));
    }

    #[test]
    fn test_configure_clamps_scan_counts() {
        let (mut device, handle) = connected_device();
        device
            .configure(&MeasurementSettings {
                integration_time_ms: None,
                min_scans: Some(0),
                max_scans: Some(99),
            })
            .unwrap();
        assert_eq!(handle.commands(), vec!["n1", "a50"]);
        assert_eq!(device.current_settings().integration_time_ms, Some(0));
    }

    #[test]
    fn test_measure_populates_session() {
        let (mut device, _handle) = connected_device();
        assert!(device.capabilities().serial_number.is_empty());

        let result = device.measure(MeasurementKind::Radiance).unwrap();
        assert_eq!(result.device_identity.serial, "1");
        assert_eq!(device.status(), DeviceStatus::Connected);
        assert_eq!(device.session().unit_number(), Some(1));
        assert_eq!(device.capabilities().serial_number, "1");
        assert_eq!(device.calibration().loaded_units(), vec![1]);
    }

    #[test]
    fn test_disconnect_resets_session() {
        let (mut device, _handle) = connected_device();
        device.configure(&MeasurementSettings::new(50, 2, 10)).unwrap();
        device.measure(MeasurementKind::Irradiance).unwrap();

        device.disconnect().unwrap();
        assert_eq!(device.status(), DeviceStatus::Disconnected);
        assert!(!device.is_connected());
        assert_eq!(device.session().last_sent(), MeasurementSettings::default());
        assert!(device.calibration().loaded_units().is_empty());
    }

    #[test]
    fn test_connect_failure_sets_error() {
        let factory = MockTransportFactory::new();
        factory.handle().fail_open(Some("permission denied".into()));
        let mut device = OspradDevice::new(Box::new(factory), fast_options(String::new()));

        assert!(device.connect().is_err());
        assert_eq!(device.status(), DeviceStatus::Error);
        assert!(device.last_error().unwrap().contains("permission denied"));
    }

    #[test]
    fn test_silent_device_times_out() {
        let (mut device, handle) = connected_device();
        handle.set_silent(true);

        let err = device.measure(MeasurementKind::Radiance).unwrap_err();
        assert!(err.is_timeout());
        assert_eq!(device.status(), DeviceStatus::Error);

        // reconnecting recovers the session
        handle.set_silent(false);
        device.connect().unwrap();
        assert!(device.measure(MeasurementKind::Radiance).is_ok());
        assert_eq!(handle.open_count(), 2);
    }

    #[test]
    fn test_configure_after_failure_requires_reconnect() {
        let (mut device, handle) = connected_device();
        handle.set_frame("not a frame");
        assert!(device.measure(MeasurementKind::Radiance).is_err());
        handle.clear_commands();

        let err = device
            .configure(&MeasurementSettings::new(100, 3, 20))
            .unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::ConnectionFailure);
        assert_eq!(device.status(), DeviceStatus::Error);
        assert!(handle.commands().is_empty());

        device.connect().unwrap();
        device.configure(&MeasurementSettings::new(100, 3, 20)).unwrap();
        assert_eq!(device.status(), DeviceStatus::Connected);
        assert_eq!(handle.commands(), vec!["t100", "n3", "a20"]);
    }

    #[test]
    fn test_options_from_settings() {
        let mut settings = Settings::default();
        settings.protocol.max_attempts = 5;
        settings.device.settle_ms = 250;

        let options = DeviceOptions::from(&settings);
        assert_eq!(options.protocol.retry.max_attempts, 5);
        assert_eq!(options.settle_delay, Duration::from_millis(250));
        assert_eq!(
            options.calibration,
            CalibrationSource::File("calibration_data.csv".into())
        );
    }
}
