//! Tiling and merging collaborator.
//!
//! Tiling converts a rewritten LAS/LAZ file into a 3D tileset; merging
//! combines the tileset subdirectories under the output directory into one
//! unified tileset. Both are delegated to the external tiling tool. The
//! merge step assumes exclusive ownership of the output directory: stale
//! merge artifacts from a previous run are deleted before the tool runs.

use anyhow::{Context, Result};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

use crate::config;
use crate::exec;

/// Output CRS for every tileset: global geocentric (EPSG:4978), which is
/// what Cesium-style viewers consume.
pub const OUTPUT_EPSG: u32 = 4978;

/// Root-level files a previous merge may have left behind.
const MERGE_ARTIFACTS: &[&str] = &["tileset.json", "r.pnts"];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MergeOutcome {
    Merged,
    /// Fewer than two tilesets were present; the merge was skipped. This is
    /// a user-meaningful edge case, not an error.
    NothingToMerge,
}

/// Resolved command line for the tiling tool.
pub struct Tiler {
    command: Vec<String>,
}

impl Tiler {
    pub fn resolve() -> Result<Self> {
        Ok(Self {
            command: config::resolve_command(config::TILER_ENV, "py3dtiles")?,
        })
    }

    /// Tile `input` into `tileset_dir`, overwriting any previous content.
    pub fn tile(&self, input: &Path, tileset_dir: &Path, input_epsg: Option<u32>) -> Result<()> {
        info!("tiling {} into {}", input.display(), tileset_dir.display());
        let mut command = exec::command(&self.command)?;
        command
            .arg("convert")
            .arg(input)
            .arg("--out")
            .arg(tileset_dir)
            .arg("--overwrite");
        if let Some(code) = input_epsg {
            command
                .arg("--crs_in")
                .arg(code.to_string())
                .arg("--force-crs-in");
        }
        command.arg("--crs_out").arg(OUTPUT_EPSG.to_string());
        exec::run_logged("tiler convert", &mut command)?;
        Ok(())
    }

    /// Merge the tileset subdirectories directly under `out_dir`.
    pub fn merge(&self, out_dir: &Path) -> Result<MergeOutcome> {
        let tilesets = find_tilesets(out_dir)?;
        if tilesets.len() < 2 {
            warn!(
                "found {} tileset under {}; the merged tileset could not be created. \
                 Add another tileset to allow the merge to work",
                tilesets.len(),
                out_dir.display()
            );
            return Ok(MergeOutcome::NothingToMerge);
        }

        for name in MERGE_ARTIFACTS {
            let stale = out_dir.join(name);
            if stale.is_file() {
                info!("cleaning up previous merge artifact {}", stale.display());
                if let Err(err) = fs::remove_file(&stale) {
                    warn!("failed to remove {}: {err}", stale.display());
                }
            }
        }

        info!("merging {} tilesets under {}", tilesets.len(), out_dir.display());
        let mut command = exec::command(&self.command)?;
        command.arg("merge").arg(out_dir).arg("--overwrite");
        exec::run_logged("tiler merge", &mut command)?;
        Ok(MergeOutcome::Merged)
    }
}

/// Tileset manifests in the immediate subdirectories of `out_dir`.
fn find_tilesets(out_dir: &Path) -> Result<Vec<PathBuf>> {
    let entries =
        fs::read_dir(out_dir).with_context(|| format!("read {}", out_dir.display()))?;
    let mut found = Vec::new();
    for entry in entries {
        let entry = entry.with_context(|| format!("read {}", out_dir.display()))?;
        let manifest = entry.path().join("tileset.json");
        if manifest.is_file() {
            found.push(manifest);
        }
    }
    found.sort();
    Ok(found)
}
