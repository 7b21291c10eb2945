//! seswrapper-rs: Rust access to the Scienta SES wrapper library
//!
//! - [`ses`]: bindings, struct bridge, error adapter and [`ses::SesWrapper`]
//! - [`analyzer`]: [`analyzer::Da30Analyzer`] acquisition sequencing
//! - [`emulator`]: in-process SES library for running without hardware
//! - [`config`]: TOML acquisition settings

pub mod analyzer;
pub mod common;
pub mod config;
pub mod emulator;
pub mod ses;
