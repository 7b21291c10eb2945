//! End-to-end acquisition tests against the in-process emulator
//!
//! The emulator keeps its state per thread, so every test resets it first and
//! tests can run in parallel.

use seswrapper_rs::analyzer::{AnalyzerConfig, Da30Analyzer};
use seswrapper_rs::config::Config;
use seswrapper_rs::emulator;
use seswrapper_rs::ses::{AnalyzerRegion, CBridge, DetectorRegion, SesError, SesWrapper};
use std::path::Path;
use std::sync::Arc;

fn emulated_wrapper() -> SesWrapper {
    emulator::reset();
    SesWrapper::with_library(Arc::new(emulator::library()))
}

fn write_instrument(dir: &Path) -> std::path::PathBuf {
    let path = dir.join("instrument.dat");
    std::fs::write(&path, "[Instrument]\nModel=DA30\n").unwrap();
    path
}

#[test]
fn test_calls_fail_before_initialize() {
    let wrapper = emulated_wrapper();

    // Properties are available before initialize
    assert!(wrapper.get_property_string("lib_version", 0).is_ok());

    let err = wrapper.detector_info().unwrap_err();
    assert_eq!(err.code(), Some(emulator::codes::NOT_INITIALIZED));
    assert!(err.to_string().contains("WRP_GetDetectorInfo"));
}

#[test]
fn test_config_driven_swept_acquisition() {
    let dir = tempfile::tempdir().unwrap();
    let instrument = write_instrument(dir.path());
    let output = dir.path().join("spectrum.json");

    let toml = format!(
        r#"
[instrument]
config = "{}"

[analyzer]
transmission_mode = true
pass_energy = 5.0

[region]
mode = "swept"
low_energy = 80.0
high_energy = 90.0
energy_step = 0.5
dwell_ms = 50

[acquisition]
iterations = 2
output = "{}"
"#,
        instrument.display().to_string().replace('\\', "/"),
        output.display().to_string().replace('\\', "/"),
    );
    let config = Config::from_toml(&toml).unwrap();

    let wrapper = emulated_wrapper();
    let mut analyzer = Da30Analyzer::with_wrapper(wrapper, config.analyzer_config());
    analyzer.startup().unwrap();
    analyzer.apply_settings(&config.analyzer).unwrap();
    analyzer
        .set_analyzer_region(config.region.as_ref().unwrap().to_region())
        .unwrap();

    let spectrum = analyzer.acquire_data(config.acquisition.iterations).unwrap();
    spectrum.save_json(config.acquisition.output.as_ref().unwrap()).unwrap();
    analyzer.shutdown().unwrap();

    assert_eq!(spectrum.counts.len(), 21);
    assert_eq!(spectrum.pass_energy, 5.0);
    assert!(spectrum.counts.iter().all(|&c| c >= 0.0));
    assert!(spectrum.total_counts() > 0.0);

    let axis = spectrum.energy_axis().unwrap();
    assert_eq!(axis.first(), Some(&80.0));
    assert!((axis[20] - 90.0).abs() < 1e-9);

    let json: serde_json::Value =
        serde_json::from_str(&std::fs::read_to_string(&output).unwrap()).unwrap();
    assert_eq!(json["counts"].as_array().unwrap().len(), 21);
    assert_eq!(json["region"]["is_fixed"], false);
    assert_eq!(json["iterations"], 2);
    assert!(!emulator::is_initialized());
}

#[test]
fn test_fixed_mode_spans_detector_width() {
    let dir = tempfile::tempdir().unwrap();
    let instrument = write_instrument(dir.path());

    let wrapper = emulated_wrapper();
    let mut analyzer = Da30Analyzer::with_wrapper(wrapper, AnalyzerConfig::new(&instrument));
    analyzer.startup().unwrap();
    analyzer.set_pass_energy(2.0).unwrap();

    let region = DetectorRegion {
        first_x_channel: 100,
        last_x_channel: 199,
        ..analyzer.use_full_detector().unwrap()
    };
    analyzer.set_detector_region(&region).unwrap();
    analyzer.use_fixed(1.5, 100).unwrap();

    let spectrum = analyzer.acquire_data(1).unwrap();
    assert_eq!(spectrum.counts.len(), 100);
    // Channel scale centered on the fixed energy
    let energies = spectrum.energies.as_ref().unwrap();
    let middle = (energies[0] + energies[99]) / 2.0;
    assert!((middle - 1.5).abs() < 1e-9);
}

#[test]
fn test_region_check_matches_acquired_channels() {
    let dir = tempfile::tempdir().unwrap();
    let instrument = write_instrument(dir.path());
    let wrapper = emulated_wrapper();
    let mut analyzer = Da30Analyzer::with_wrapper(wrapper, AnalyzerConfig::new(&instrument));
    analyzer.startup().unwrap();

    let region = AnalyzerRegion::swept(10.0, 11.0, 0.25, 200);
    let check = analyzer.wrapper().check_analyzer_region(&region).unwrap();
    assert_eq!(check.steps, 5);
    assert_eq!(check.time_ms, 1000.0);

    analyzer.set_analyzer_region(region).unwrap();
    analyzer.wrapper().init_acquisition(false, false).unwrap();
    assert_eq!(analyzer.wrapper().n_channels().unwrap(), check.steps as usize);
}

#[test]
fn test_injected_start_failure_surfaces_code() {
    let dir = tempfile::tempdir().unwrap();
    let instrument = write_instrument(dir.path());
    let wrapper = emulated_wrapper();
    let mut analyzer = Da30Analyzer::with_wrapper(wrapper, AnalyzerConfig::new(&instrument));
    analyzer.startup().unwrap();
    analyzer.use_fixed(5.0, 10).unwrap();

    emulator::fail_next("WRP_StartAcquisition", 1001);
    let err = analyzer.acquire_data(1).unwrap_err();
    assert!(matches!(
        err,
        SesError::Call {
            function: "WRP_StartAcquisition",
            code: 1001
        }
    ));

    // The failure is one-shot
    let spectrum = analyzer.acquire_data(1).unwrap();
    assert!(!spectrum.counts.is_empty());
}

#[test]
fn test_acquire_without_region_fails() {
    let dir = tempfile::tempdir().unwrap();
    let instrument = write_instrument(dir.path());
    let wrapper = emulated_wrapper();
    let mut analyzer = Da30Analyzer::with_wrapper(wrapper, AnalyzerConfig::new(&instrument));
    analyzer.startup().unwrap();

    let err = analyzer.acquire_data(1).unwrap_err();
    assert_eq!(err.code(), Some(emulator::codes::INVALID_STATE));
    assert_eq!(emulator::calls().last(), Some(&"WRP_InitAcquisition"));
}

#[test]
fn test_bridged_records_round_trip_through_library() {
    let wrapper = emulated_wrapper();
    wrapper.initialize().unwrap();

    let info = wrapper.detector_info().unwrap();
    assert_eq!(info.n_x_channels, 1000);
    assert_eq!(info.into_c().xChannels_, 1000);

    let region = DetectorRegion {
        first_y_channel: 10,
        last_y_channel: 19,
        n_slices: 10,
        ..DetectorRegion::full(&info)
    };
    wrapper.set_detector_region(&region).unwrap();
    assert_eq!(wrapper.detector_region().unwrap(), region);

    let too_wide = DetectorRegion {
        last_x_channel: info.n_x_channels,
        ..region
    };
    assert!(wrapper.set_detector_region(&too_wide).is_err());
    assert_eq!(wrapper.detector_region().unwrap(), region);
    wrapper.finalize().unwrap();
}

#[test]
fn test_energy_relations() {
    let wrapper = emulated_wrapper();
    wrapper.initialize().unwrap();

    wrapper.set_excitation_energy(21.2).unwrap();
    wrapper.set_kinetic_energy(16.0).unwrap();
    assert!((wrapper.binding_energy().unwrap() - 5.2).abs() < 1e-9);

    wrapper.set_binding_energy(10.0).unwrap();
    assert!((wrapper.kinetic_energy().unwrap() - 11.2).abs() < 1e-9);

    wrapper.set_element_voltage("L1", 12.5).unwrap();
    assert_eq!(wrapper.element_voltage("L1").unwrap(), 12.5);
    wrapper.zero_supplies().unwrap();
    assert_eq!(wrapper.element_voltage("L1").unwrap(), 0.0);
}
