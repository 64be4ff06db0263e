//! Calibration catalog loading from files on disk.

use osprad::config::Settings;
use osprad::instrument::calibration::{
    load_for_unit, write_catalog, CalibrationSource, CalibrationStore, CalibrationTable,
};
use osprad::instrument::SENSOR_PIXELS;
use osprad::ErrorKind;
use std::fs;
use std::sync::Arc;
use tempfile::TempDir;

fn sample_table(unit: u32) -> CalibrationTable {
    let radiance: Vec<f64> = (0..SENSOR_PIXELS)
        .map(|i| if i < 4 { 0.0 } else { 1.0e6 + i as f64 })
        .collect();
    CalibrationTable::new(
        unit,
        vec![301.5, 2.1, -1.2e-3, 3.0e-6, -1.0e-9, 0.0, 7.0],
        radiance,
        vec![5.0e5; SENSOR_PIXELS],
        vec![1.02, 0.0011],
    )
    .unwrap()
}

#[test]
fn test_written_catalog_loads_back() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("calibration_data.csv");

    let mut bytes = Vec::new();
    write_catalog(&sample_table(4), &mut bytes).unwrap();
    write_catalog(&sample_table(11), &mut bytes).unwrap();
    fs::write(&path, &bytes).unwrap();

    let source = CalibrationSource::File(path);
    let table = load_for_unit(11, &source).unwrap();
    assert_eq!(table, sample_table(11));
    assert_eq!(table.wavelength().len(), SENSOR_PIXELS);
    assert_eq!(table.info().excluded_radiance_pixels, 4);

    // the seventh coefficient is stored but not evaluated
    assert_eq!(table.wavelength_polynomial_coeffs().len(), 7);
    assert!((table.wavelength()[0] - 301.5).abs() < 1e-12);
}

#[test]
fn test_derivation_is_deterministic() {
    let a = sample_table(1);
    let b = sample_table(1);
    assert_eq!(a.wavelength(), b.wavelength());
    assert_eq!(a.wavelength_bin_width(), b.wavelength_bin_width());

    let widths = a.wavelength_bin_width();
    assert_eq!(widths[SENSOR_PIXELS - 1], widths[SENSOR_PIXELS - 2]);
}

#[test]
fn test_catalog_with_headers_and_trailing_fields() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("catalog.csv");
    let sens = vec!["2.5"; SENSOR_PIXELS].join(",");
    let contents = format!(
        "unit,field,values\n\
         # exported from the calibration rig\n\
         5,wavCoef,400,1.5,0,0,0,0,,,,\n\
         5,radSens,{sens},,\n\
         5,irrSens,{sens}\n\
         5,linCoefs,1,0.001,,\n\
         5,notes,first light\n"
    );
    fs::write(&path, contents).unwrap();

    let table = load_for_unit(5, &CalibrationSource::File(path)).unwrap();
    assert_eq!(table.wavelength_range(), (400.0, 400.0 + 1.5 * 287.0));
    assert_eq!(table.linearity_coeffs(), &[1.0, 0.001]);
}

#[test]
fn test_failed_load_leaves_store_empty() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("catalog.csv");
    let short = vec!["1.0"; SENSOR_PIXELS - 1].join(",");
    let rows = format!(
        "6,wavCoef,380,1,0,0,0,0\n\
         6,radSens,{short}\n\
         6,irrSens,{short}\n\
         6,linCoefs,1,0.001\n"
    );
    fs::write(&path, rows).unwrap();

    let mut store = CalibrationStore::new(CalibrationSource::File(path));
    let err = store.resolve(6).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::CalibrationInvalid);
    assert!(store.get(6).is_none());
    assert!(store.loaded_units().is_empty());
}

#[test]
fn test_store_shares_tables() {
    let mut bytes = Vec::new();
    write_catalog(&sample_table(2), &mut bytes).unwrap();
    let text = String::from_utf8(bytes).unwrap();

    let mut store = CalibrationStore::new(CalibrationSource::Inline(text));
    let table = store.resolve(2).unwrap();
    let cached = store.get(2).unwrap();
    assert!(Arc::ptr_eq(&table, &cached));
}

#[test]
fn test_settings_point_at_catalog() {
    let dir = TempDir::new().unwrap();
    let config = dir.path().join("osprad.toml");
    fs::write(
        &config,
        "[calibration]\npath = \"/srv/osprad/calibration_data.csv\"\n",
    )
    .unwrap();

    let settings = Settings::load_from(&config).unwrap();
    assert_eq!(
        settings.calibration.path,
        std::path::PathBuf::from("/srv/osprad/calibration_data.csv")
    );
}
