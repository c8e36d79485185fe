//! Entrypoint for the point-cloud staging pipeline.
//!
//! Responsibilities end at wiring: parse arguments, install the log
//! subscriber once with the verbosity fixed for the whole run, and hand off
//! to the pipeline. Any fatal condition propagates back here and terminates
//! the process with a nonzero status.

use anyhow::{bail, Result};
use clap::Parser;
use tracing::info;

mod artifacts;
mod cli;
mod config;
mod crs;
mod exec;
mod geoid;
mod insar;
mod lastools;
mod pipeline;
mod tiler;
mod vrs;

fn main() -> Result<()> {
    let args = cli::RootArgs::parse();
    init_logging(args.verbose);

    match args.command {
        cli::Command::Tile(tile) => run_tile(&tile),
        cli::Command::Insar(insar) => run_insar(&insar),
    }
}

fn init_logging(verbose: bool) {
    let default = if verbose { "debug" } else { "info" };
    let filter = tracing_subscriber::EnvFilter::try_from_env("PSTAGE_LOG")
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

fn run_tile(args: &cli::TileArgs) -> Result<()> {
    // Input errors are reported before any processing begins.
    for file in &args.files {
        if !file.is_file() {
            bail!("no file at {}", file.display());
        }
    }

    let pipeline = pipeline::Pipeline::new()?;
    for file in &args.files {
        let options = pipeline::PipelineOptions {
            merge: args.merge,
            intensity_to_rgb: args.copy_intensity,
            archive: args.archive,
            rgb_scale: args.rgb_scale,
            translate_z: args.translate_z,
            vrs_hint: args.from_vrs.clone(),
            region: args.region.clone(),
        };
        let out_dir = pipeline.run(file, options)?;
        println!("{}", out_dir.display());
    }
    Ok(())
}

fn run_insar(args: &cli::InsarArgs) -> Result<()> {
    let las = lastools::LasTools::resolve()?;
    let options = insar::InsarOptions {
        quantile: args.quantile,
        with_std: args.with_std,
    };
    info!("staging displacement CSV {}", args.file.display());
    let laz = insar::stage_csv(&las, &args.file, &options)?;
    println!("{}", laz.display());
    Ok(())
}
