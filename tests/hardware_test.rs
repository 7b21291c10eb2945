//! SES hardware tests
//!
//! These tests require SESWrapper.dll, an SES installation and a connected
//! analyzer. Run them one at a time:
//! ```bash
//! cargo test --test hardware_test -- --ignored --test-threads=1
//! ```
//!
//! Set SES_WRAPPER_PATH to SESWrapper.dll and SES_INSTRUMENT_CONFIG to the
//! instrument file. SES_WORKING_DIR overrides the SES installation directory.

use seswrapper_rs::analyzer::{AnalyzerConfig, Da30Analyzer};
use seswrapper_rs::config::default_wrapper_path;
use seswrapper_rs::ses::SesWrapper;
use std::path::PathBuf;

fn get_wrapper_path() -> PathBuf {
    std::env::var_os("SES_WRAPPER_PATH")
        .map(PathBuf::from)
        .unwrap_or_else(default_wrapper_path)
}

fn get_analyzer_config() -> AnalyzerConfig {
    let instrument = std::env::var_os("SES_INSTRUMENT_CONFIG")
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("C:\\SES 1.4.0-r25\\data\\instrument.dat"));
    let mut config = AnalyzerConfig::new(instrument).with_wrapper_path(get_wrapper_path());
    if let Ok(dir) = std::env::var("SES_WORKING_DIR") {
        config.working_dir = dir;
    }
    config
}

#[test]
#[ignore = "Requires SES hardware"]
fn test_load_and_read_version() {
    let wrapper = SesWrapper::open(get_wrapper_path()).expect("Failed to load SESWrapper");
    let version = wrapper
        .get_property_string("lib_version", 0)
        .expect("Failed to read lib_version");
    println!("SES wrapper version: {}", version);
    assert!(!version.is_empty());
}

#[test]
#[ignore = "Requires SES hardware"]
fn test_startup_and_detector_info() {
    let mut analyzer = Da30Analyzer::new(get_analyzer_config()).expect("Failed to load SESWrapper");
    analyzer.startup().expect("Startup failed");

    let info = analyzer.detector_info().expect("Failed to read detector info");
    println!("Detector: {:?}", info);
    assert!(info.n_x_channels > 0);
    assert!(info.n_y_channels > 0);

    analyzer.shutdown().expect("Finalize failed");
}

#[test]
#[ignore = "Requires SES hardware"]
fn test_fixed_mode_acquisition() {
    let mut analyzer = Da30Analyzer::new(get_analyzer_config()).expect("Failed to load SESWrapper");
    analyzer.startup().expect("Startup failed");
    analyzer.use_transmission_mode().expect("Failed to set transmission mode");
    analyzer.set_pass_energy(5.0).expect("Failed to set pass energy");
    let region = analyzer.use_full_detector().expect("Failed to set detector region");
    analyzer.use_fixed(1.5, 1000).expect("Failed to set analyzer region");

    let spectrum = analyzer.acquire_data(1).expect("Acquisition failed");
    println!(
        "Acquired {} channels, {} counts",
        spectrum.counts.len(),
        spectrum.total_counts()
    );
    assert_eq!(spectrum.counts.len(), region.x_width() as usize);

    analyzer.shutdown().expect("Finalize failed");
}
