//! DA30 analyzer sequencing
//!
//! [`Da30Analyzer`] drives a [`SesWrapper`] through the usual session:
//!
//! 1. `startup()`: working directory, instrument library, initialize, load instrument
//! 2. configure: lens mode, pass energy, detector and analyzer regions
//! 3. `acquire_data(n)`: init, then `n` times start / wait for region / continue
//! 4. `shutdown()`: finalize
//!
//! # Example
//! ```no_run
//! use seswrapper_rs::analyzer::{AnalyzerConfig, Da30Analyzer};
//!
//! let mut analyzer = Da30Analyzer::new(AnalyzerConfig::new("C:/SES/data/instrument.dat")).unwrap();
//! analyzer.startup().unwrap();
//! analyzer.use_transmission_mode().unwrap();
//! analyzer.set_pass_energy(5.0).unwrap();
//! analyzer.use_full_detector().unwrap();
//! analyzer.use_fixed(1.5, 5000).unwrap();
//! let spectrum = analyzer.acquire_data(1).unwrap();
//! analyzer.shutdown().unwrap();
//! ```

use crate::config::{default_wrapper_path, default_working_dir, AnalyzerSettings};
use crate::ses::wrapper::ACQ_CHANNEL_SCALE;
use crate::ses::{AnalyzerRegion, DetectorInfo, DetectorRegion, SesError, SesResult, SesWrapper};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// Element set used for transmission mode
pub const TRANSMISSION_ELEMENT_SET: &str = "High Pass";
/// Lens mode used for transmission mode
pub const TRANSMISSION_LENS_MODE: &str = "Transmission";

/// Paths and settings needed to bring up the analyzer
#[derive(Debug, Clone)]
pub struct AnalyzerConfig {
    /// Path to `SESWrapper.dll`
    pub wrapper_path: PathBuf,
    /// Instrument configuration file
    pub instrument_config: PathBuf,
    /// Value for the `lib_working_dir` property
    pub working_dir: String,
    /// Value for the `instrument_library` property (default: the wrapper path)
    pub instrument_library: Option<PathBuf>,
}

impl AnalyzerConfig {
    /// Config with the default wrapper location and working directory
    pub fn new(instrument_config: impl Into<PathBuf>) -> Self {
        Self {
            wrapper_path: default_wrapper_path(),
            instrument_config: instrument_config.into(),
            working_dir: default_working_dir(),
            instrument_library: None,
        }
    }

    /// Override the wrapper location
    pub fn with_wrapper_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.wrapper_path = path.into();
        self
    }
}

/// Integrated spectrum from one acquisition
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Spectrum {
    /// Counts per channel
    pub counts: Vec<f64>,
    /// Kinetic energy per channel as reported by the library
    #[serde(default)]
    pub energies: Option<Vec<f64>>,
    /// Region the spectrum was taken with
    pub region: Option<AnalyzerRegion>,
    /// Pass energy in eV
    pub pass_energy: f64,
    /// Number of start/wait/continue cycles
    pub iterations: u32,
    pub acquired_at: DateTime<Utc>,
}

impl Spectrum {
    /// Kinetic energy of each channel
    ///
    /// Uses the library's channel scale when available, otherwise derives the
    /// axis from a swept region. `None` for fixed mode without a scale.
    pub fn energy_axis(&self) -> Option<Vec<f64>> {
        if let Some(energies) = &self.energies {
            return Some(energies.clone());
        }
        let region = self.region.filter(|r| !r.is_fixed)?;
        Some(
            (0..self.counts.len())
                .map(|i| region.low_energy + i as f64 * region.energy_step)
                .collect(),
        )
    }

    pub fn total_counts(&self) -> f64 {
        self.counts.iter().sum()
    }

    /// Write the spectrum as pretty-printed JSON
    pub fn save_json(&self, path: impl AsRef<Path>) -> std::io::Result<()> {
        let mut writer = BufWriter::new(File::create(path)?);
        serde_json::to_writer_pretty(&mut writer, self).map_err(std::io::Error::from)?;
        writer.flush()
    }
}

/// Managed DA30 session over a [`SesWrapper`]
pub struct Da30Analyzer {
    wrapper: SesWrapper,
    config: AnalyzerConfig,
    analyzer_region: Option<AnalyzerRegion>,
    started: bool,
}

impl Da30Analyzer {
    /// Open the wrapper library named in `config`
    pub fn new(config: AnalyzerConfig) -> SesResult<Self> {
        let wrapper = SesWrapper::open(&config.wrapper_path)?;
        Ok(Self::with_wrapper(wrapper, config))
    }

    /// Use an already opened wrapper
    pub fn with_wrapper(wrapper: SesWrapper, config: AnalyzerConfig) -> Self {
        Self {
            wrapper,
            config,
            analyzer_region: None,
            started: false,
        }
    }

    pub fn wrapper(&self) -> &SesWrapper {
        &self.wrapper
    }

    pub fn config(&self) -> &AnalyzerConfig {
        &self.config
    }

    pub fn is_started(&self) -> bool {
        self.started
    }

    /// Point the library at the SES installation, initialize it and load the
    /// instrument configuration
    pub fn startup(&mut self) -> SesResult<()> {
        let instrument_library = absolute(
            self.config
                .instrument_library
                .as_deref()
                .unwrap_or(&self.config.wrapper_path),
        );
        let instrument_config = absolute(&self.config.instrument_config);

        self.wrapper
            .set_property_string("lib_working_dir", &self.config.working_dir, 0)?;
        self.wrapper.set_property_string(
            "instrument_library",
            &instrument_library.to_string_lossy(),
            0,
        )?;
        self.wrapper.initialize()?;
        self.started = true;
        self.wrapper.load_instrument(&instrument_config)?;

        info!(
            working_dir = %self.config.working_dir,
            instrument = %instrument_config.display(),
            "Analyzer started"
        );
        Ok(())
    }

    /// Finalize the library
    pub fn shutdown(&mut self) -> SesResult<()> {
        self.started = false;
        self.wrapper.finalize()?;
        info!("Analyzer shut down");
        Ok(())
    }

    /// High Pass element set with the Transmission lens mode
    pub fn use_transmission_mode(&mut self) -> SesResult<()> {
        self.wrapper.set_element_set(TRANSMISSION_ELEMENT_SET)?;
        self.wrapper.set_lens_mode(TRANSMISSION_LENS_MODE)
    }

    /// Apply lens, pass energy and detector settings from a config file
    pub fn apply_settings(&mut self, settings: &AnalyzerSettings) -> SesResult<()> {
        if settings.transmission_mode {
            self.use_transmission_mode()?;
        }
        if let Some(element_set) = &settings.element_set {
            self.wrapper.set_element_set(element_set)?;
        }
        if let Some(lens_mode) = &settings.lens_mode {
            self.wrapper.set_lens_mode(lens_mode)?;
        }
        if let Some(pass_energy) = settings.pass_energy {
            self.set_pass_energy(pass_energy)?;
        }
        if settings.full_detector {
            self.use_full_detector()?;
        }
        Ok(())
    }

    pub fn detector_info(&self) -> SesResult<DetectorInfo> {
        self.wrapper.detector_info()
    }

    pub fn detector_region(&self) -> SesResult<DetectorRegion> {
        self.wrapper.detector_region()
    }

    pub fn set_detector_region(&mut self, region: &DetectorRegion) -> SesResult<()> {
        self.wrapper.set_detector_region(region)
    }

    /// Last analyzer region applied through this session
    pub fn analyzer_region(&self) -> Option<AnalyzerRegion> {
        self.analyzer_region
    }

    pub fn set_analyzer_region(&mut self, region: AnalyzerRegion) -> SesResult<()> {
        self.wrapper.set_analyzer_region(&region)?;
        self.analyzer_region = Some(region);
        Ok(())
    }

    pub fn pass_energy(&self) -> SesResult<f64> {
        self.wrapper.pass_energy()
    }

    pub fn set_pass_energy(&mut self, pass_energy: f64) -> SesResult<()> {
        self.wrapper.set_pass_energy(pass_energy)
    }

    /// Sweep from `low_energy` to `high_energy`
    pub fn use_swept(
        &mut self,
        low_energy: f64,
        high_energy: f64,
        energy_step: f64,
        dwell_ms: i32,
    ) -> SesResult<()> {
        self.set_analyzer_region(AnalyzerRegion::swept(
            low_energy,
            high_energy,
            energy_step,
            dwell_ms,
        ))
    }

    /// Hold the analyzer at `center_energy`
    pub fn use_fixed(&mut self, center_energy: f64, dwell_ms: i32) -> SesResult<()> {
        self.set_analyzer_region(AnalyzerRegion::fixed(center_energy, dwell_ms))
    }

    /// Use every detector channel as one ADC-mode slice
    pub fn use_full_detector(&mut self) -> SesResult<DetectorRegion> {
        let info = self.wrapper.detector_info()?;
        let region = DetectorRegion::full(&info);
        self.wrapper.set_detector_region(&region)?;
        debug!(
            x_channels = info.n_x_channels,
            y_channels = info.n_y_channels,
            "Using full detector"
        );
        Ok(region)
    }

    /// Acquire `n_iterations` passes over the current region and read the
    /// integrated spectrum
    pub fn acquire_data(&mut self, n_iterations: u32) -> SesResult<Spectrum> {
        if n_iterations == 0 {
            return Err(SesError::invalid_request("at least one iteration is required"));
        }

        let pass_energy = self.wrapper.pass_energy()?;
        self.wrapper.init_acquisition(false, false)?;
        let n_channels = self.wrapper.n_channels()?;
        info!(n_channels, n_iterations, "Acquisition initialized");

        for iteration in 1..=n_iterations {
            self.wrapper.start_acquisition()?;
            self.wrapper.block_on_region()?;
            self.wrapper.continue_acquisition()?;
            debug!(iteration, n_iterations, "Region complete");
        }

        let counts = self.wrapper.spectrum(n_channels)?;
        let energies = match self
            .wrapper
            .acquired_vector_double(ACQ_CHANNEL_SCALE, 0, n_channels)
        {
            Ok(energies) => Some(energies),
            Err(e) => {
                warn!(error = %e, "Channel scale unavailable");
                None
            }
        };

        Ok(Spectrum {
            counts,
            energies,
            region: self.analyzer_region,
            pass_energy,
            iterations: n_iterations,
            acquired_at: Utc::now(),
        })
    }
}

/// RAII: finalize the library if the session is still running
impl Drop for Da30Analyzer {
    fn drop(&mut self) {
        if self.started {
            if let Err(e) = self.wrapper.finalize() {
                warn!(error = %e, "Finalize on drop failed");
            }
        }
    }
}

fn absolute(path: &Path) -> PathBuf {
    std::path::absolute(path).unwrap_or_else(|_| path.to_path_buf())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::emulator;
    use std::sync::Arc;

    fn emulated(instrument_config: &Path) -> Da30Analyzer {
        emulator::reset();
        let wrapper = SesWrapper::with_library(Arc::new(emulator::library()));
        Da30Analyzer::with_wrapper(wrapper, AnalyzerConfig::new(instrument_config))
    }

    fn instrument_file() -> tempfile::NamedTempFile {
        let file = tempfile::NamedTempFile::new().unwrap();
        std::fs::write(file.path(), "[Instrument]\n").unwrap();
        file
    }

    #[test]
    fn startup_sets_paths_before_initialize() {
        let instrument = instrument_file();
        let mut analyzer = emulated(instrument.path());
        analyzer.startup().unwrap();

        assert_eq!(
            emulator::calls(),
            [
                "WRP_SetPropertyString",
                "WRP_SetPropertyString",
                "WRP_Initialize",
                "WRP_LoadInstrument"
            ]
        );
        assert_eq!(
            analyzer
                .wrapper()
                .get_property_string("lib_working_dir", 0)
                .unwrap(),
            "C:\\SES 1.4.0-r25"
        );
        let loaded = emulator::instrument().unwrap();
        assert!(Path::new(&loaded).is_absolute());
    }

    #[test]
    fn startup_fails_on_missing_instrument_file() {
        let mut analyzer = emulated(Path::new("/nonexistent/instrument.dat"));
        let err = analyzer.startup().unwrap_err();
        assert!(matches!(
            err,
            SesError::Call {
                function: "WRP_LoadInstrument",
                ..
            }
        ));
        // Initialized anyway, so the session still needs finalizing
        assert!(analyzer.is_started());
    }

    #[test]
    fn transmission_mode() {
        let instrument = instrument_file();
        let mut analyzer = emulated(instrument.path());
        analyzer.startup().unwrap();
        analyzer.wrapper().set_lens_mode("Angular30").unwrap();
        analyzer.use_transmission_mode().unwrap();

        let wrapper = analyzer.wrapper();
        assert_eq!(wrapper.get_property_string("element_set", 0).unwrap(), "High Pass");
        assert_eq!(wrapper.get_property_string("lens_mode", 0).unwrap(), "Transmission");
    }

    #[test]
    fn pass_energy_round_trip() {
        let instrument = instrument_file();
        let mut analyzer = emulated(instrument.path());
        analyzer.startup().unwrap();
        analyzer.set_pass_energy(5.0).unwrap();
        assert_eq!(analyzer.pass_energy().unwrap(), 5.0);
    }

    #[test]
    fn full_detector_uses_detector_info() {
        let instrument = instrument_file();
        let mut analyzer = emulated(instrument.path());
        analyzer.startup().unwrap();
        emulator::set_detector_info(&DetectorInfo {
            n_x_channels: 640,
            n_y_channels: 480,
            max_slices: 480,
            ..Default::default()
        });

        let region = analyzer.use_full_detector().unwrap();
        assert_eq!(region.last_x_channel, 639);
        assert_eq!(region.last_y_channel, 479);
        assert_eq!(analyzer.detector_region().unwrap(), region);
    }

    #[test]
    fn region_is_remembered_only_when_accepted() {
        let instrument = instrument_file();
        let mut analyzer = emulated(instrument.path());
        analyzer.startup().unwrap();

        analyzer.use_fixed(1.5, 5000).unwrap();
        assert_eq!(analyzer.analyzer_region(), Some(AnalyzerRegion::fixed(1.5, 5000)));

        assert!(analyzer.use_swept(20.0, 10.0, 0.1, 100).is_err());
        assert_eq!(analyzer.analyzer_region(), Some(AnalyzerRegion::fixed(1.5, 5000)));
    }

    #[test]
    fn acquire_repeats_start_wait_continue() {
        let instrument = instrument_file();
        let mut analyzer = emulated(instrument.path());
        analyzer.startup().unwrap();
        analyzer.use_swept(10.0, 12.0, 0.1, 10).unwrap();
        emulator::clear_calls();

        let spectrum = analyzer.acquire_data(3).unwrap();

        let calls = emulator::calls();
        assert_eq!(calls[0], "WRP_GetPropertyDouble");
        assert_eq!(calls[1], "WRP_InitAcquisition");
        assert_eq!(calls[2], "WRP_GetAcquiredDataInteger");
        let cycle = ["WRP_StartAcquisition", "WRP_WaitForRegionReady", "WRP_ContinueAcquisition"];
        for i in 0..3 {
            assert_eq!(calls[3 + 3 * i..6 + 3 * i], cycle);
        }
        assert_eq!(calls[12], "WRP_GetAcquiredDataVectorDouble");

        assert_eq!(spectrum.counts.len(), 21);
        assert_eq!(spectrum.iterations, 3);
        assert_eq!(spectrum.region, Some(AnalyzerRegion::swept(10.0, 12.0, 0.1, 10)));
        let axis = spectrum.energy_axis().unwrap();
        assert_eq!(axis.len(), 21);
        assert_eq!(axis[0], 10.0);
    }

    #[test]
    fn acquire_requires_iterations() {
        let instrument = instrument_file();
        let mut analyzer = emulated(instrument.path());
        analyzer.startup().unwrap();
        analyzer.use_fixed(1.5, 10).unwrap();
        emulator::clear_calls();

        assert!(matches!(
            analyzer.acquire_data(0),
            Err(SesError::InvalidRequest(_))
        ));
        assert!(emulator::calls().is_empty());
    }

    #[test]
    fn failure_mid_loop_stops_the_sequence() {
        let instrument = instrument_file();
        let mut analyzer = emulated(instrument.path());
        analyzer.startup().unwrap();
        analyzer.use_fixed(1.5, 10).unwrap();
        emulator::fail_next("WRP_WaitForRegionReady", 9);
        emulator::clear_calls();

        let err = analyzer.acquire_data(2).unwrap_err();
        assert_eq!(err.code(), Some(9));
        assert_eq!(emulator::calls().last(), Some(&"WRP_WaitForRegionReady"));
    }

    #[test]
    fn drop_finalizes_started_session() {
        let instrument = instrument_file();
        let mut analyzer = emulated(instrument.path());
        analyzer.startup().unwrap();
        assert!(emulator::is_initialized());
        drop(analyzer);
        assert!(!emulator::is_initialized());
    }

    #[test]
    fn shutdown_then_drop_finalizes_once() {
        let instrument = instrument_file();
        let mut analyzer = emulated(instrument.path());
        analyzer.startup().unwrap();
        analyzer.shutdown().unwrap();
        drop(analyzer);
        let finalizes = emulator::calls()
            .into_iter()
            .filter(|c| *c == "WRP_Finalize")
            .count();
        assert_eq!(finalizes, 1);
    }

    #[test]
    fn fixed_spectrum_axis_from_channel_scale() {
        let spectrum = Spectrum {
            counts: vec![1.0, 2.0, 3.0],
            energies: None,
            region: Some(AnalyzerRegion::fixed(1.5, 10)),
            pass_energy: 5.0,
            iterations: 1,
            acquired_at: Utc::now(),
        };
        assert!(spectrum.energy_axis().is_none());
        assert_eq!(spectrum.total_counts(), 6.0);

        let with_scale = Spectrum {
            energies: Some(vec![1.4, 1.5, 1.6]),
            ..spectrum
        };
        assert_eq!(with_scale.energy_axis(), Some(vec![1.4, 1.5, 1.6]));
    }

    #[test]
    fn pass_energy_read_before_acquisition() {
        let instrument = instrument_file();
        let mut analyzer = emulated(instrument.path());
        analyzer.startup().unwrap();
        analyzer.use_fixed(1.5, 10).unwrap();
        emulator::clear_calls();

        analyzer.acquire_data(1).unwrap();
        let calls = emulator::calls();
        assert_eq!(calls[0], "WRP_GetPropertyDouble");
        assert_eq!(calls[1], "WRP_InitAcquisition");
        assert_eq!(calls.last(), Some(&"WRP_GetAcquiredDataVectorDouble"));
    }

    #[test]
    fn pass_energy_failure_stops_before_init() {
        let instrument = instrument_file();
        let mut analyzer = emulated(instrument.path());
        analyzer.startup().unwrap();
        analyzer.use_fixed(1.5, 10).unwrap();
        emulator::fail_next("WRP_GetPropertyDouble", 3);
        emulator::clear_calls();

        assert_eq!(analyzer.acquire_data(1).unwrap_err().code(), Some(3));
        assert_eq!(emulator::calls(), ["WRP_GetPropertyDouble"]);
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn spectrum_json_reports_write_failure() {
        // Fits the write buffer, so the failure only shows up on flush
        let small = Spectrum {
            counts: vec![1.0],
            energies: None,
            region: None,
            pass_energy: 2.0,
            iterations: 1,
            acquired_at: Utc::now(),
        };
        let err = small.save_json("/dev/full").unwrap_err();
        assert_eq!(err.raw_os_error(), Some(28)); // ENOSPC

        let large = Spectrum {
            counts: vec![1.0; 4096],
            ..small
        };
        assert!(large.save_json("/dev/full").is_err());
    }

    #[test]
    fn spectrum_json_missing_directory() {
        let dir = tempfile::tempdir().unwrap();
        let spectrum = Spectrum {
            counts: vec![1.0],
            energies: None,
            region: None,
            pass_energy: 2.0,
            iterations: 1,
            acquired_at: Utc::now(),
        };
        let err = spectrum
            .save_json(dir.path().join("missing").join("spectrum.json"))
            .unwrap_err();
        assert_eq!(err.kind(), std::io::ErrorKind::NotFound);
    }

    #[test]
    fn spectrum_json_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("spectrum.json");
        let spectrum = Spectrum {
            counts: vec![10.0, 20.0],
            energies: Some(vec![10.0, 10.1]),
            region: Some(AnalyzerRegion::swept(10.0, 10.1, 0.1, 100)),
            pass_energy: 2.0,
            iterations: 2,
            acquired_at: Utc::now(),
        };
        spectrum.save_json(&path).unwrap();

        let loaded: Spectrum = serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(loaded.counts, spectrum.counts);
        assert_eq!(loaded.region, spectrum.region);
        assert_eq!(loaded.iterations, 2);
    }
}
