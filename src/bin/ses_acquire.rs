//! SES Acquire - run a configured acquisition and save the spectrum
//!
//! Usage: cargo run --bin ses_acquire -- -f da30.toml [--emulate] [-n 3] [-o spectrum.json]

use anyhow::{Context, Result};
use clap::Parser;
use seswrapper_rs::analyzer::Da30Analyzer;
use seswrapper_rs::common::AcquireArgs;
use seswrapper_rs::config::Config;
use tracing::info;
use tracing_subscriber::EnvFilter;

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::from_default_env().add_directive("seswrapper_rs=info".parse()?),
        )
        .init();

    let args = AcquireArgs::parse();

    let mut config = Config::load(&args.common.config_file)
        .with_context(|| format!("Failed to load {}", args.common.config_file))?;
    if let Some(iterations) = args.iterations {
        config.acquisition.iterations = iterations;
    }
    if let Some(output) = args.output.clone() {
        config.acquisition.output = Some(output);
    }
    config.validate()?;

    let wrapper = args
        .common
        .open_wrapper(config.library.wrapper_path())
        .context("Failed to open SES wrapper")?;
    let mut analyzer = Da30Analyzer::with_wrapper(wrapper, config.analyzer_config());

    analyzer.startup().context("Analyzer startup failed")?;
    analyzer.apply_settings(&config.analyzer)?;

    if let Some(region) = &config.region {
        let region = region.to_region();
        let check = analyzer.wrapper().check_analyzer_region(&region)?;
        info!(
            steps = check.steps,
            time_ms = check.time_ms,
            energy_step = check.energy_step,
            "Region checked"
        );
        analyzer.set_analyzer_region(region)?;
    }

    let spectrum = analyzer.acquire_data(config.acquisition.iterations)?;

    println!("===========================================");
    println!("Acquisition complete");
    println!("===========================================");
    println!("  Channels    : {}", spectrum.counts.len());
    println!("  Iterations  : {}", spectrum.iterations);
    println!("  Pass energy : {} eV", spectrum.pass_energy);
    println!("  Total counts: {:.0}", spectrum.total_counts());
    if let Some(axis) = spectrum.energy_axis() {
        if let (Some(first), Some(last)) = (axis.first(), axis.last()) {
            println!("  Energy range: {:.3} - {:.3} eV", first, last);
        }
    }

    if let Some(output) = &config.acquisition.output {
        spectrum
            .save_json(output)
            .with_context(|| format!("Failed to write {}", output.display()))?;
        println!("[OK] Spectrum written to {}", output.display());
    }

    analyzer.shutdown()?;
    Ok(())
}
