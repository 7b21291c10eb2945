//! CLI argument parsing for the SES tools
//!
//! Each binary has its own Args struct that embeds [`CommonArgs`].

use crate::emulator;
use crate::ses::{SesResult, SesWrapper};
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;

/// Arguments shared by every tool
#[derive(Parser, Debug, Clone)]
pub struct CommonArgs {
    /// Path to configuration file
    #[arg(short = 'f', long = "config", default_value = "config.toml")]
    pub config_file: String,

    /// Use the in-process emulator instead of SESWrapper.dll
    #[arg(long)]
    pub emulate: bool,
}

impl CommonArgs {
    /// Open the wrapper at `library`, or the emulator when `--emulate` is set
    pub fn open_wrapper(&self, library: impl Into<PathBuf>) -> SesResult<SesWrapper> {
        if self.emulate {
            Ok(SesWrapper::with_library(Arc::new(emulator::library())))
        } else {
            SesWrapper::open(library.into())
        }
    }
}

/// Arguments for `ses_info`
#[derive(Parser, Debug, Clone)]
#[command(about = "Print SES wrapper and detector information")]
pub struct InfoArgs {
    #[command(flatten)]
    pub common: CommonArgs,

    /// Path to SESWrapper.dll (overrides the config file)
    #[arg(short = 'l', long = "library", env = "SES_WRAPPER_PATH")]
    pub library: Option<PathBuf>,

    /// Instrument configuration to load after initialize
    #[arg(short = 'i', long = "instrument", env = "SES_INSTRUMENT_CONFIG")]
    pub instrument: Option<PathBuf>,
}

/// Arguments for `ses_acquire`
#[derive(Parser, Debug, Clone)]
#[command(about = "Run a configured acquisition and save the spectrum")]
pub struct AcquireArgs {
    #[command(flatten)]
    pub common: CommonArgs,

    /// Override acquisition.iterations
    #[arg(short = 'n', long = "iterations")]
    pub iterations: Option<u32>,

    /// Override acquisition.output
    #[arg(short = 'o', long = "output")]
    pub output: Option<PathBuf>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_common_args_default() {
        let args = CommonArgs::try_parse_from(["test"]).unwrap();
        assert_eq!(args.config_file, "config.toml");
        assert!(!args.emulate);
    }

    #[test]
    fn test_common_args_custom_config() {
        let args = CommonArgs::try_parse_from(["test", "-f", "da30.toml", "--emulate"]).unwrap();
        assert_eq!(args.config_file, "da30.toml");
        assert!(args.emulate);
    }

    #[test]
    fn test_info_args() {
        let args = InfoArgs::try_parse_from([
            "test",
            "--library",
            "C:/ses/SESWrapper.dll",
            "-i",
            "instrument.dat",
        ])
        .unwrap();
        assert_eq!(args.library, Some(PathBuf::from("C:/ses/SESWrapper.dll")));
        assert_eq!(args.instrument, Some(PathBuf::from("instrument.dat")));
    }

    #[test]
    fn test_acquire_args_overrides() {
        let args =
            AcquireArgs::try_parse_from(["test", "--config", "run.toml", "-n", "5", "-o", "out.json"])
                .unwrap();
        assert_eq!(args.common.config_file, "run.toml");
        assert_eq!(args.iterations, Some(5));
        assert_eq!(args.output, Some(PathBuf::from("out.json")));
    }

    #[test]
    fn test_acquire_args_rejects_negative_iterations() {
        assert!(AcquireArgs::try_parse_from(["test", "-n", "-1"]).is_err());
    }

    #[test]
    fn test_emulated_wrapper() {
        let args = CommonArgs::try_parse_from(["test", "--emulate"]).unwrap();
        emulator::reset();
        let wrapper = args.open_wrapper("unused/SESWrapper.dll").unwrap();
        assert_eq!(
            wrapper.library().origin(),
            std::path::Path::new(emulator::EMULATOR_PATH)
        );
    }
}
