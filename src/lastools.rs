//! LAS rewriter collaborators (`las2las` and `lasinfo`).
//!
//! The pipeline never touches point data itself; it drives the LAS tools
//! through well-formed command lines and interprets their text output. The
//! rewrite repairs VLR size errors propagated by processing suites (e.g. QT
//! Modeler) so picky readers such as PDAL accept the file, and applies the
//! CRS stamp, Z translation, and optional intensity-to-RGB copy.

use anyhow::{bail, Context, Result};
use std::fs;
use std::path::Path;
use std::process::Stdio;
use tracing::{debug, info};

use crate::config;
use crate::exec;

/// Resolved command lines for the two LAS tools.
pub struct LasTools {
    las2las: Vec<String>,
    lasinfo: Vec<String>,
}

/// One `las2las` rewrite invocation.
pub struct RewriteRequest<'a> {
    pub input: &'a Path,
    pub output: &'a Path,
    pub wkt_file: &'a Path,
    pub intensity_to_rgb: bool,
    pub rgb_scale: f64,
    pub translate_z: f64,
}

impl LasTools {
    pub fn resolve() -> Result<Self> {
        Ok(Self {
            las2las: config::resolve_command(config::LAS2LAS_ENV, "las2las")?,
            lasinfo: config::resolve_command(config::LASINFO_ENV, "lasinfo")?,
        })
    }

    /// Rewrite `input` with its CRS record stamped in OGC WKT form.
    pub fn stamp_ogc_wkt(&self, input: &Path, output: &Path) -> Result<()> {
        let mut command = exec::command(&self.las2las)?;
        command
            .arg("-i")
            .arg(input)
            .arg("-set_ogc_wkt")
            .arg("-o")
            .arg(output);
        exec::run_logged("las2las wkt stamp", &mut command)?;
        Ok(())
    }

    /// Dump file info. `-nc` skips min/max computation, which shaves a lot
    /// of time off large jobs.
    pub fn info(&self, input: &Path) -> Result<String> {
        let mut command = exec::command(&self.lasinfo)?;
        command.arg("-i").arg(input).arg("-nc").arg("-stdout");
        let output = exec::run_logged("lasinfo", &mut command)?;
        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }

    /// Sample every `every_nth` point, reprojected to geographic
    /// coordinates, and return the mean position as `(lat, lon)`.
    ///
    /// The raw sample text is written to `export` so the caller can track it
    /// as a job artifact.
    pub fn sample_geographic_mean(
        &self,
        input: &Path,
        every_nth: u32,
        export: &Path,
    ) -> Result<(f64, f64)> {
        let mut command = exec::command(&self.las2las)?;
        command
            .arg("-i")
            .arg(input)
            .arg("-keep_every_nth")
            .arg(every_nth.to_string())
            .args(["-target_epsg", "4326", "-stdout", "-parse", "xy"]);
        let output = exec::run_logged("las2las sample", &mut command)?;
        let text = String::from_utf8_lossy(&output.stdout);
        fs::write(export, text.as_bytes())
            .with_context(|| format!("write position sample {}", export.display()))?;
        let (lon, lat) = mean_position(&text)?;
        debug!("mean position: lat {lat}, lon {lon}");
        Ok((lat, lon))
    }

    /// Rewrite a LAS/LAZ file: reload the WKT record, translate Z, and
    /// optionally copy intensity into RGB.
    pub fn rewrite(&self, request: &RewriteRequest<'_>) -> Result<()> {
        if request.intensity_to_rgb {
            self.rewrite_intensity_to_rgb(request)
        } else {
            info!("rewriting LAS to avoid VLR size errors");
            let mut command = exec::command(&self.las2las)?;
            command
                .arg("-i")
                .arg(request.input)
                .arg("-load_ogc_wkt")
                .arg(request.wkt_file)
                .arg("-translate_z")
                .arg(request.translate_z.to_string())
                .arg("-o")
                .arg(request.output);
            exec::run_logged("las2las rewrite", &mut command)?;
            Ok(())
        }
    }

    /// Copy intensity to RGB by exploding the file to text and reforming the
    /// LAS fields through a second `las2las` reading the pipe.
    fn rewrite_intensity_to_rgb(&self, request: &RewriteRequest<'_>) -> Result<()> {
        info!("copying intensity to RGB by exploding and reforming LAS fields");

        let mut read_command = exec::command(&self.las2las)?;
        read_command
            .arg("-i")
            .arg(request.input)
            .arg("-scale_intensity")
            .arg(request.rgb_scale.to_string())
            .arg("-translate_z")
            .arg(request.translate_z.to_string())
            .args(["-otxt", "-oparse", "xyziiiitanr", "-stdout"])
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        debug!("pipe read side: {read_command:?}");

        let mut reader = read_command.spawn().context("spawn las2las export")?;
        let reader_stdout = reader
            .stdout
            .take()
            .context("capture las2las export stdout")?;

        let mut write_command = exec::command(&self.las2las)?;
        write_command
            .args(["-stdin", "-itxt", "-iparse", "xyziRGBtanr", "-scale_rgb_up"])
            .arg("-load_ogc_wkt")
            .arg(request.wkt_file)
            .arg("-o")
            .arg(request.output)
            .stdin(Stdio::from(reader_stdout));
        debug!("pipe write side: {write_command:?}");

        let write_output = write_command.output().context("run las2las import")?;
        let read_output = reader.wait_with_output().context("wait las2las export")?;

        exec::log_output("las2las export", &read_output);
        exec::log_output("las2las import", &write_output);
        if !read_output.status.success() {
            bail!(
                "las2las export exited with {}: {}",
                read_output.status,
                String::from_utf8_lossy(&read_output.stderr).trim()
            );
        }
        if !write_output.status.success() {
            bail!(
                "las2las import exited with {}: {}",
                write_output.status,
                String::from_utf8_lossy(&write_output.stderr).trim()
            );
        }
        Ok(())
    }

    /// Convert a whitespace-separated x/y/z/RGB text file into LAS/LAZ.
    pub fn text_to_laz(&self, input: &Path, output: &Path) -> Result<()> {
        let mut command = exec::command(&self.las2las)?;
        command
            .arg("-i")
            .arg(input)
            .args(["-itxt", "-iparse", "xyzRGB", "-scale_rgb_up"])
            .arg("-o")
            .arg(output);
        exec::run_logged("las2las text import", &mut command)?;
        Ok(())
    }
}

/// Mean of whitespace-separated "x y" lines, as `(x, y)`.
fn mean_position(text: &str) -> Result<(f64, f64)> {
    let mut count = 0usize;
    let mut sum_x = 0.0;
    let mut sum_y = 0.0;
    for line in text.lines() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        let mut parts = line.split_whitespace();
        let (Some(x), Some(y)) = (parts.next(), parts.next()) else {
            bail!("unparseable sample line: {line:?}");
        };
        let x: f64 = x.parse().with_context(|| format!("parse sample x {x:?}"))?;
        let y: f64 = y.parse().with_context(|| format!("parse sample y {y:?}"))?;
        sum_x += x;
        sum_y += y;
        count += 1;
    }
    if count == 0 {
        bail!("position sample is empty");
    }
    Ok((sum_x / count as f64, sum_y / count as f64))
}
