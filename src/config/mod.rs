//! Configuration for SES acquisitions
//!
//! Acquisitions are described by a TOML file:
//! - `[library]`: where the SES wrapper lives and its working directory
//! - `[instrument]`: the instrument configuration loaded after initialize
//! - `[analyzer]`: lens settings applied before acquiring
//! - `[region]`: fixed or swept energy region
//! - `[acquisition]`: iteration count and output file
//!
//! # Example
//! ```ignore
//! let config = Config::load("da30.toml")?;
//! let mut analyzer = Da30Analyzer::new(config.analyzer_config())?;
//! ```

use crate::analyzer::AnalyzerConfig;
use crate::ses::AnalyzerRegion;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Configuration errors
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Failed to parse TOML: {0}")]
    TomlError(#[from] toml::de::Error),

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// Top-level configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub library: LibraryConfig,
    pub instrument: InstrumentConfig,
    #[serde(default)]
    pub analyzer: AnalyzerSettings,
    /// Energy region; the analyzer keeps its current region when absent
    #[serde(default)]
    pub region: Option<RegionConfig>,
    #[serde(default)]
    pub acquisition: AcquisitionConfig,
}

impl Config {
    /// Load configuration from a TOML file
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml(&content)
    }

    /// Load configuration from a TOML string (useful for testing)
    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        let config: Config = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Reject settings the acquisition sequence cannot run with
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.acquisition.iterations == 0 {
            return Err(ConfigError::Invalid(
                "acquisition.iterations must be at least 1".to_string(),
            ));
        }
        if let Some(pass_energy) = self.analyzer.pass_energy {
            if !(pass_energy > 0.0) {
                return Err(ConfigError::Invalid(format!(
                    "analyzer.pass_energy must be positive, got {pass_energy}"
                )));
            }
        }
        if let Some(region) = &self.region {
            region
                .to_region()
                .validate()
                .map_err(|e| ConfigError::Invalid(e.to_string()))?;
        }
        Ok(())
    }

    /// Settings for [`crate::analyzer::Da30Analyzer`]
    pub fn analyzer_config(&self) -> AnalyzerConfig {
        AnalyzerConfig {
            wrapper_path: self.library.wrapper_path(),
            instrument_config: self.instrument.config.clone(),
            working_dir: self.library.working_dir.clone(),
            instrument_library: self.library.instrument_library.clone(),
        }
    }
}

// =============================================================================
// Library
// =============================================================================

/// Location of the SES wrapper library
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct LibraryConfig {
    /// Path to `SESWrapper.dll`
    #[serde(default)]
    pub path: Option<PathBuf>,

    /// SES installation directory used as the library's working directory
    #[serde(default = "default_working_dir")]
    pub working_dir: String,

    /// Value for the `instrument_library` property (default: the wrapper path)
    #[serde(default)]
    pub instrument_library: Option<PathBuf>,
}

impl Default for LibraryConfig {
    fn default() -> Self {
        Self {
            path: None,
            working_dir: default_working_dir(),
            instrument_library: None,
        }
    }
}

impl LibraryConfig {
    /// Configured wrapper path, falling back to the usual install location
    pub fn wrapper_path(&self) -> PathBuf {
        self.path.clone().unwrap_or_else(default_wrapper_path)
    }
}

pub fn default_working_dir() -> String {
    "C:\\SES 1.4.0-r25".to_string()
}

/// `~/Desktop/seswrapper_2.7.7_Win64/seswrapper_2.7.7_Win64/SESWrapper.dll`
pub fn default_wrapper_path() -> PathBuf {
    let home = std::env::var_os("USERPROFILE")
        .or_else(|| std::env::var_os("HOME"))
        .map(PathBuf::from)
        .unwrap_or_default();
    home.join("Desktop")
        .join("seswrapper_2.7.7_Win64")
        .join("seswrapper_2.7.7_Win64")
        .join("SESWrapper.dll")
}

// =============================================================================
// Instrument and analyzer
// =============================================================================

/// Instrument configuration file passed to `WRP_LoadInstrument`
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct InstrumentConfig {
    pub config: PathBuf,
}

/// Lens settings applied after startup
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct AnalyzerSettings {
    /// Use the "High Pass" element set with the "Transmission" lens mode
    #[serde(default)]
    pub transmission_mode: bool,

    /// Explicit element set (overrides transmission_mode)
    #[serde(default)]
    pub element_set: Option<String>,

    /// Explicit lens mode (overrides transmission_mode)
    #[serde(default)]
    pub lens_mode: Option<String>,

    /// Pass energy in eV
    #[serde(default)]
    pub pass_energy: Option<f64>,

    /// Use the whole detector as a single slice
    #[serde(default = "default_full_detector")]
    pub full_detector: bool,
}

impl Default for AnalyzerSettings {
    fn default() -> Self {
        Self {
            transmission_mode: false,
            element_set: None,
            lens_mode: None,
            pass_energy: None,
            full_detector: default_full_detector(),
        }
    }
}

fn default_full_detector() -> bool {
    true
}

// =============================================================================
// Region and acquisition
// =============================================================================

/// Energy region in config form
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(tag = "mode", rename_all = "lowercase")]
pub enum RegionConfig {
    /// Analyzer held at one kinetic energy
    Fixed { center_energy: f64, dwell_ms: i32 },
    /// Analyzer stepped from low to high kinetic energy
    Swept {
        low_energy: f64,
        high_energy: f64,
        energy_step: f64,
        dwell_ms: i32,
    },
}

impl RegionConfig {
    pub fn to_region(&self) -> AnalyzerRegion {
        match *self {
            Self::Fixed {
                center_energy,
                dwell_ms,
            } => AnalyzerRegion::fixed(center_energy, dwell_ms),
            Self::Swept {
                low_energy,
                high_energy,
                energy_step,
                dwell_ms,
            } => AnalyzerRegion::swept(low_energy, high_energy, energy_step, dwell_ms),
        }
    }
}

/// Acquisition loop settings
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct AcquisitionConfig {
    /// Number of start/wait/continue cycles
    #[serde(default = "default_iterations")]
    pub iterations: u32,

    /// Spectrum output file (JSON)
    #[serde(default)]
    pub output: Option<PathBuf>,
}

impl Default for AcquisitionConfig {
    fn default() -> Self {
        Self {
            iterations: default_iterations(),
            output: None,
        }
    }
}

fn default_iterations() -> u32 {
    1
}

// =============================================================================
// Tests
// =============================================================================
