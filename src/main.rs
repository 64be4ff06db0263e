//! `osprad` command-line tool.
//!
//! ```text
//! osprad measure --kind radiance --integration-time 0 --min-scans 3
//! osprad measure --simulate --json
//! osprad calibration --unit 7
//! osprad ports
//! ```
//!
//! Settings come from `config/osprad.toml` (or `--config`), overridden by
//! `OSPRAD_*` environment variables and then by the flags below. Log output
//! goes to stderr and honours `RUST_LOG`.

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use osprad::adapters::mock::{format_frame, MockTransportFactory};
use osprad::adapters::serial_adapter::list_ports;
use osprad::config::Settings;
use osprad::data::{band_integral, ColorSummary, SpectrumStatistics};
use osprad::instrument::calibration::{load_for_unit, CalibrationSource, CalibrationTable};
use osprad::instrument::{
    DeviceOptions, MeasurementSettings, OspradDevice, SpectralDevice, SENSOR_PIXELS,
};
use osprad::{MeasurementKind, MeasurementResult};
use std::path::PathBuf;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

/// Saturation above which the reading is flagged.
const SATURATION_WARNING_PERCENT: f64 = 90.0;

/// Band reported as the radiometric value, nm.
const VISIBLE_BAND_NM: (f64, f64) = (380.0, 780.0);

/// Unit number of the simulated instrument.
const SIMULATED_UNIT: u32 = 0;

#[derive(Parser)]
#[command(name = "osprad")]
#[command(version)]
#[command(about = "Calibrated measurements from the OSpRad spectroradiometer", long_about = None)]
struct Cli {
    /// Configuration file (default: config/osprad.toml)
    #[arg(short, long, value_name = "FILE", global = true)]
    config: Option<PathBuf>,

    /// Serial port, overriding the configuration
    #[arg(short, long, global = true)]
    port: Option<String>,

    /// Calibration catalog, overriding the configuration
    #[arg(long, value_name = "FILE", global = true)]
    calibration: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Take one calibrated measurement
    Measure(MeasureArgs),

    /// Load and validate the calibration of one unit
    Calibration {
        /// Unit number as reported by the device
        #[arg(short, long)]
        unit: u32,
    },

    /// List serial ports
    Ports,
}

#[derive(Args)]
struct MeasureArgs {
    /// radiance or irradiance
    #[arg(short, long, default_value = "radiance")]
    kind: MeasurementKind,

    /// Integration time in ms (0 = automatic)
    #[arg(short = 't', long, value_name = "MS")]
    integration_time: Option<u32>,

    /// Minimum number of scans averaged
    #[arg(long, value_name = "N")]
    min_scans: Option<u32>,

    /// Maximum number of scans averaged
    #[arg(long, value_name = "N")]
    max_scans: Option<u32>,

    /// Print the full result as JSON
    #[arg(long)]
    json: bool,

    /// Use a simulated instrument instead of the serial port
    #[arg(long)]
    simulate: bool,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut settings = match &cli.config {
        Some(path) => Settings::load_from(path),
        None => Settings::load(),
    }
    .context("Failed to load configuration")?;
    if let Some(port) = cli.port {
        settings.device.port = Some(port);
    }
    if let Some(path) = cli.calibration {
        settings.calibration.path = path;
    }

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&settings.application.log_level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    match cli.command {
        Commands::Measure(args) => measure_command(&settings, &args),
        Commands::Calibration { unit } => calibration_command(&settings, unit),
        Commands::Ports => ports_command(),
    }
}

fn measure_command(settings: &Settings, args: &MeasureArgs) -> Result<()> {
    let mut device = if args.simulate {
        simulated_device()?
    } else {
        OspradDevice::from_settings(settings)
    };

    device.connect().context("Failed to connect to OSpRad")?;

    let mut requested = MeasurementSettings::from(&settings.measurement);
    if let Some(ms) = args.integration_time {
        requested.integration_time_ms = Some(ms);
    }
    if let Some(n) = args.min_scans {
        requested.min_scans = Some(n);
    }
    if let Some(n) = args.max_scans {
        requested.max_scans = Some(n);
    }
    device
        .configure(&requested)
        .context("Failed to configure OSpRad")?;

    info!("Measuring {}...", args.kind);
    let result = device.measure(args.kind);
    device.disconnect()?;
    let result = result.context("Measurement failed")?;

    if result.is_saturated(SATURATION_WARNING_PERCENT) {
        warn!(
            "High saturation ({:.1}%): reduce integration time or light intensity",
            result.saturation_percent
        );
    }

    if args.json {
        print_json(&result)
    } else {
        print_summary(&result)
    }
}

fn color_of(result: &MeasurementResult) -> Option<ColorSummary> {
    (result.measurement_kind == MeasurementKind::Radiance).then(|| result.color())
}

fn print_json(result: &MeasurementResult) -> Result<()> {
    let statistics = SpectrumStatistics::compute(&result.wavelength, &result.spectral_value)?;
    let report = serde_json::json!({
        "measurement": result,
        "color": color_of(result),
        "statistics": statistics,
    });
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}

fn print_summary(result: &MeasurementResult) -> Result<()> {
    let (lo, hi) = VISIBLE_BAND_NM;
    let radiometric = band_integral(&result.wavelength, &result.spectral_value, lo, hi)?;
    let statistics = SpectrumStatistics::compute(&result.wavelength, &result.spectral_value)?;
    let band_unit = match result.measurement_kind {
        MeasurementKind::Radiance => "W/(sr·m²)",
        MeasurementKind::Irradiance => "W/m²",
    };

    println!("Measurement:       {}", result.measurement_kind);
    println!(
        "Device:            {} #{}",
        result.device_identity.name, result.device_identity.serial
    );
    println!("Timestamp:         {}", result.timestamp.to_rfc3339());
    println!("Radiometric value: {:.3E} {} ({}-{} nm)", radiometric, band_unit, lo, hi);
    println!(
        "Photometric value: {:.3E} {}",
        result.photometric_value(),
        result.photometric_unit
    );
    if let Some(color) = color_of(result) {
        println!("Chromaticity x,y:  {:.4}, {:.4}", color.x, color.y);
        println!(
            "CCT:               {:.1} K{}",
            color.cct_kelvin,
            if color.cct_reliable { "" } else { " (outside 2000-12000 K, unreliable)" }
        );
    }
    println!("Peak:              {:.1} nm", statistics.peak_wavelength_nm);
    println!("Integration time:  {} ms", result.integration_time_ms);
    println!("Scans averaged:    {}", result.num_scans);
    println!("Saturation level:  {:.1}%", result.saturation_percent);
    if !result.faulted_pixels.is_empty() {
        println!("Faulted pixels:    {:?}", result.faulted_pixels);
    }
    Ok(())
}

fn calibration_command(settings: &Settings, unit: u32) -> Result<()> {
    let source = CalibrationSource::File(settings.calibration.path.clone());
    let table = load_for_unit(unit, &source)?;
    let info = table.info();

    println!("Unit:                #{}", info.unit_number);
    println!("Catalog:             {}", source);
    println!(
        "Wavelength range:    {:.2} - {:.2} nm",
        info.wavelength_min_nm, info.wavelength_max_nm
    );
    println!("Excluded (radiance): {}", info.excluded_radiance_pixels);
    println!("Excluded (irradiance): {}", info.excluded_irradiance_pixels);
    println!("Linearity coeffs:    {:?}", info.linearity_coeffs);
    Ok(())
}

fn ports_command() -> Result<()> {
    let ports = list_ports()?;
    if ports.is_empty() {
        println!("No serial ports found");
    }
    for port in ports {
        println!("{}", port);
    }
    Ok(())
}

/// A mock instrument reporting a broad visible hump, with matching calibration.
fn simulated_device() -> Result<OspradDevice> {
    let counts: Vec<f64> = (0..SENSOR_PIXELS)
        .map(|i| 200.0 + 20_000.0 * (-0.5 * ((i as f64 - 150.0) / 60.0).powi(2)).exp())
        .collect();
    let frame = format_frame(SIMULATED_UNIT, 5, 100, 0.0, &counts);
    let factory = MockTransportFactory::with_frame(frame);

    let table = CalibrationTable::new(
        SIMULATED_UNIT,
        vec![350.0, 1.74, 0.0, 0.0, 0.0, 0.0],
        vec![1.0e6; SENSOR_PIXELS],
        vec![1.0e6; SENSOR_PIXELS],
        vec![1.0, 0.001],
    )?;

    let options = DeviceOptions {
        settle_delay: std::time::Duration::ZERO,
        ..DeviceOptions::default()
    };
    let mut device = OspradDevice::new(Box::new(factory), options);
    device.calibration_mut().insert(table);
    Ok(device)
}
