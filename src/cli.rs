//! CLI argument parsing for the staging pipeline.
//!
//! The CLI is intentionally thin: it validates option shapes and hands a
//! typed option set to the pipeline, so the same core logic can be driven
//! from tests with stub collaborators.
use clap::{Parser, Subcommand};
use std::path::PathBuf;

use crate::vrs;

/// Root CLI entrypoint for the point-cloud staging workflow.
#[derive(Parser, Debug)]
#[command(
    name = "pstage",
    version,
    about = "Stage LiDAR point clouds (LAS/LAZ) into web-ready 3D tilesets",
    after_help = "Examples:\n  pstage tile survey.laz\n  pstage tile --merge --archive north.laz south.laz\n  pstage tile --from-vrs NAVD88 --region contiguous site.las\n  pstage insar --quantile displacement.csv",
    subcommand_required = true,
    arg_required_else_help = true
)]
pub struct RootArgs {
    #[command(subcommand)]
    pub command: Command,

    /// Emit debug-level log messages
    #[arg(long, short = 'v', global = true)]
    pub verbose: bool,
}

/// Top-level workflow commands.
#[derive(Subcommand, Debug)]
pub enum Command {
    Tile(TileArgs),
    Insar(InsarArgs),
}

/// Tile command inputs for one or more LAS/LAZ files.
#[derive(Parser, Debug)]
#[command(about = "Rewrite, height-correct, and tile LAS/LAZ files")]
pub struct TileArgs {
    /// Input LAS/LAZ files, processed sequentially
    #[arg(value_name = "FILE", required = true)]
    pub files: Vec<PathBuf>,

    /// Merge tileset subdirectories under the output directory into one tileset
    #[arg(long, short = 'm')]
    pub merge: bool,

    /// Copy intensity values to RGB (greyscale)
    #[arg(long, short = 'c')]
    pub copy_intensity: bool,

    /// Move each input file to the archive directory after rewriting
    #[arg(long, short = 'a')]
    pub archive: bool,

    /// Scale multiplier for RGB values
    #[arg(long, short = 's', value_name = "FACTOR", default_value_t = 1.0, value_parser = parse_rgb_scale)]
    pub rgb_scale: f64,

    /// Manual Z translation in meters, added to any geoid correction
    #[arg(long, short = 'z', value_name = "METERS", default_value_t = 0.0)]
    pub translate_z: f64,

    /// Geoid, tidal, or geopotential model to convert heights from
    /// (used only where file headers declare no vertical reference)
    #[arg(long, short = 'g', value_name = "MODEL")]
    pub from_vrs: Option<String>,

    /// Datum-transform region for tidal and orthometric lookups
    #[arg(long, short = 'r', value_name = "REGION", default_value = vrs::REGIONS[0], value_parser = parse_region)]
    pub region: String,
}

/// Insar command inputs for staging a lon/lat/displacement CSV.
#[derive(Parser, Debug)]
#[command(about = "Convert a lon,lat,displacement CSV into a colorized LAZ")]
pub struct InsarArgs {
    /// Input CSV file (lon,lat,displacement[,std])
    #[arg(value_name = "CSV")]
    pub file: PathBuf,

    /// Bin displacement by quantile instead of linearly
    #[arg(long, short = 'q')]
    pub quantile: bool,

    /// Input rows carry a fourth standard-deviation column
    #[arg(long)]
    pub with_std: bool,
}

fn parse_rgb_scale(raw: &str) -> Result<f64, String> {
    let value: f64 = raw.parse().map_err(|_| format!("not a number: {raw}"))?;
    if !value.is_finite() || value < 0.0 {
        return Err(format!("RGB scale must be >= 0, got {raw}"));
    }
    Ok(value)
}

fn parse_region(raw: &str) -> Result<String, String> {
    if vrs::REGIONS.contains(&raw) {
        Ok(raw.to_string())
    } else {
        Err(format!(
            "unknown region {raw:?} (expected one of: {})",
            vrs::REGIONS.join(", ")
        ))
    }
}
