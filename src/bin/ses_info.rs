//! SES Wrapper Info - check that the wrapper loads and talks to the analyzer
//!
//! Usage: cargo run --bin ses_info -- [--library <dll>] [--instrument <file>] [--emulate]
//! Example: cargo run --bin ses_info -- --emulate

use anyhow::{Context, Result};
use clap::Parser;
use seswrapper_rs::common::InfoArgs;
use seswrapper_rs::config::{Config, LibraryConfig};
use seswrapper_rs::ses::{CBridge, SesWrapper};
use std::path::Path;
use tracing_subscriber::EnvFilter;

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::from_default_env().add_directive("seswrapper_rs=info".parse()?),
        )
        .init();

    let args = InfoArgs::parse();

    // The config file is optional here; command line paths win
    let library_config = if Path::new(&args.common.config_file).exists() {
        Config::load(&args.common.config_file)
            .with_context(|| format!("Failed to load {}", args.common.config_file))?
            .library
    } else {
        LibraryConfig::default()
    };
    let library_path = args
        .library
        .clone()
        .unwrap_or_else(|| library_config.wrapper_path());

    println!("===========================================");
    println!("SES Wrapper Info");
    println!("===========================================");
    if args.common.emulate {
        println!("Library: emulator");
    } else {
        println!("Library: {}", library_path.display());
    }
    println!();

    let wrapper = match args.common.open_wrapper(&library_path) {
        Ok(w) => {
            println!("[OK] Library loaded");
            w
        }
        Err(e) => {
            eprintln!("[ERROR] Failed to load library: {}", e);
            std::process::exit(1);
        }
    };

    println!();
    println!("--- Library ---");
    for property in ["lib_description", "lib_version"] {
        match wrapper.get_property_string(property, 0) {
            Ok(value) => println!("  {:<20}: {}", property, value),
            Err(e) => eprintln!("  {:<20}: Error - {}", property, e),
        }
    }

    let instrument_library = library_config
        .instrument_library
        .clone()
        .unwrap_or_else(|| library_path.clone());
    wrapper.set_property_string("lib_working_dir", &library_config.working_dir, 0)?;
    wrapper.set_property_string("instrument_library", &instrument_library.to_string_lossy(), 0)?;

    if let Err(e) = wrapper.initialize() {
        eprintln!("[ERROR] Initialize failed: {}", e);
        std::process::exit(1);
    }
    println!("[OK] Initialized");

    let result = print_instrument(&wrapper, args.instrument.as_deref());

    println!();
    match wrapper.finalize() {
        Ok(()) => println!("[OK] Finalized"),
        Err(e) => eprintln!("[ERROR] Finalize failed: {}", e),
    }
    result
}

fn print_instrument(wrapper: &SesWrapper, instrument: Option<&Path>) -> Result<()> {
    if let Some(instrument) = instrument {
        wrapper
            .load_instrument(instrument)
            .with_context(|| format!("Failed to load instrument {}", instrument.display()))?;
        println!("[OK] Instrument loaded: {}", instrument.display());
    }

    println!();
    println!("--- Detector Info ---");
    let info = wrapper.detector_info()?;
    print_fields(&info)?;

    println!();
    println!("--- Detector Region ---");
    let region = wrapper.detector_region()?;
    print_fields(&region)?;

    println!();
    println!("--- Analyzer ---");
    for property in ["element_set", "lens_mode"] {
        match wrapper.get_property_string(property, 0) {
            Ok(value) => println!("  {:<20}: {}", property, value),
            Err(e) => eprintln!("  {:<20}: Error - {}", property, e),
        }
    }
    println!("  {:<20}: {} eV", "pass_energy", wrapper.pass_energy()?);
    println!("  {:<20}: {} eV", "kinetic_energy", wrapper.kinetic_energy()?);
    println!("  {:<20}: {} eV", "excitation_energy", wrapper.excitation_energy()?);
    println!("  {:<20}: {} eV", "binding_energy", wrapper.binding_energy()?);
    Ok(())
}

/// Print each field of a bridged record as `name (c_name): value`
fn print_fields<T: CBridge + serde::Serialize>(record: &T) -> Result<()> {
    let values = serde_json::to_value(record)?;
    for field in T::FIELDS {
        let value = values.get(field.name).cloned().unwrap_or_default();
        println!("  {:<20}: {}  ({})", field.name, value, field.c_name);
    }
    Ok(())
}
