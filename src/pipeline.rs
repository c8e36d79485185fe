//! The staging pipeline: one job per input file.
//!
//! The controller sequences the external collaborators for a single LAS/LAZ
//! file. The step sequence is an explicit plan computed from the option set
//! at job start; the controller iterates the plan rather than hand-counting
//! steps, so the reported "step i of n" lines always agree with the steps
//! actually executed. One amendment exists: a file-declared vertical datum
//! is only discoverable after CRS extraction, so the datum-resolution step
//! is inserted then if the user gave no hint of their own.

use anyhow::{bail, Context, Result};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Instant;
use tracing::{debug, info, warn};

use crate::artifacts::ArtifactSet;
use crate::config::ServiceConfig;
use crate::crs::{self, CrsInfo};
use crate::geoid::{GeoidHeightService, HttpTransport, Transport};
use crate::lastools::{LasTools, RewriteRequest};
use crate::tiler::Tiler;
use crate::vrs;

/// Sampling stride for the mean-position computation. Every Nth point
/// bounds the cost on large files; the mean does not need more.
pub const SAMPLE_EVERY_NTH: u32 = 10_000;

/// Options for one staging job.
#[derive(Debug, Clone)]
pub struct PipelineOptions {
    pub merge: bool,
    pub intensity_to_rgb: bool,
    pub archive: bool,
    pub rgb_scale: f64,
    pub translate_z: f64,
    pub vrs_hint: Option<String>,
    pub region: String,
}

/// Primary pipeline steps, in fixed execution order. Conditional steps are
/// skipped, never reordered. Cleanup runs after the plan and is not a
/// counted step.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepKind {
    StampWkt,
    ExtractCrs,
    ResolveDatum,
    Rewrite,
    Tile,
    Merge,
}

impl StepKind {
    fn describe(self) -> &'static str {
        match self {
            StepKind::StampWkt => "rewriting file with new OGC WKT",
            StepKind::ExtractCrs => "extracting CRS info",
            StepKind::ResolveDatum => "looking up ellipsoid height conversion",
            StepKind::Rewrite => "starting las2las rewrite",
            StepKind::Tile => "starting tiling process",
            StepKind::Merge => "starting merge process",
        }
    }
}

/// Compute the step plan for an option set: four base steps plus one for
/// each enabled conditional.
pub fn step_plan(options: &PipelineOptions) -> Vec<StepKind> {
    let mut plan = vec![StepKind::StampWkt, StepKind::ExtractCrs];
    if options.vrs_hint.is_some() {
        plan.push(StepKind::ResolveDatum);
    }
    plan.push(StepKind::Rewrite);
    plan.push(StepKind::Tile);
    if options.merge {
        plan.push(StepKind::Merge);
    }
    plan
}

/// Run state for one input file.
struct ProcessingJob {
    input: PathBuf,
    file_name: String,
    stem: String,
    wkt_stamped: PathBuf,
    wkt_dump: PathBuf,
    sample_export: PathBuf,
    rewrite_dir: PathBuf,
    rewritten: PathBuf,
    archive_dir: PathBuf,
    out_dir: PathBuf,
    options: PipelineOptions,
    plan: Vec<StepKind>,
    crs: Option<CrsInfo>,
    total_translate_z: f64,
    artifacts: ArtifactSet,
}

impl ProcessingJob {
    fn new(input: &Path, options: PipelineOptions) -> Result<Self> {
        let input = input
            .canonicalize()
            .with_context(|| format!("resolve input path {}", input.display()))?;
        let base_dir = input
            .parent()
            .context("input file has no parent directory")?
            .to_path_buf();
        let stem = input
            .file_stem()
            .and_then(|s| s.to_str())
            .context("input file name is not valid UTF-8")?
            .to_string();
        let file_name = input
            .file_name()
            .and_then(|s| s.to_str())
            .context("input file name is not valid UTF-8")?
            .to_string();

        let wkt_stamped = base_dir.join(format!("{stem}-wkt.laz"));
        let wkt_dump = PathBuf::from(format!("{}-wkt.txt", wkt_stamped.display()));
        let sample_export = PathBuf::from(format!("{}-xy.txt", wkt_stamped.display()));
        let rewrite_dir = base_dir.join("rewrite");
        let rewritten = rewrite_dir.join(format!("{stem}.las"));
        let archive_dir = base_dir.join("archive");
        let out_dir = base_dir.join("3dtiles");
        let plan = step_plan(&options);
        let total_translate_z = options.translate_z;

        Ok(Self {
            input,
            file_name,
            stem,
            wkt_stamped,
            wkt_dump,
            sample_export,
            rewrite_dir,
            rewritten,
            archive_dir,
            out_dir,
            options,
            plan,
            crs: None,
            total_translate_z,
            artifacts: ArtifactSet::new(),
        })
    }

    fn log_summary(&self) {
        info!("file:            {}", self.input.display());
        info!("merge:           {}", self.options.merge);
        info!("intensity > RGB: {}", self.options.intensity_to_rgb);
        info!("intens. scalar:  {}x", self.options.rgb_scale);
        info!("translate Z:     {:+.1}", self.options.translate_z);
        info!("archive input:   {}", self.options.archive);
        debug!("rewrite dir:     {}", self.rewrite_dir.display());
        debug!("archive dir:     {}", self.archive_dir.display());
        debug!("output dir:      {}", self.out_dir.display());
    }

    /// A file-declared vertical datum surfaces during CRS extraction. If the
    /// user gave no hint, the datum-resolution step was not planned; insert
    /// it ahead of the rewrite so the correction lands in this run.
    fn amend_plan_for_file_vrs(&mut self) {
        if self.plan.contains(&StepKind::ResolveDatum) {
            return;
        }
        let at = self
            .plan
            .iter()
            .position(|step| *step == StepKind::Rewrite)
            .unwrap_or(self.plan.len());
        self.plan.insert(at, StepKind::ResolveDatum);
        info!(
            "file declares a vertical datum; height correction step added ({} steps total)",
            self.plan.len()
        );
    }

    fn archive_input(&self) {
        let target = self.archive_dir.join(&self.file_name);
        info!("archiving input to {}", target.display());
        if let Err(err) = fs::rename(&self.input, &target) {
            warn!("failed to archive {}: {err}", self.input.display());
        }
    }
}

/// Top-level pipeline over resolved collaborators.
pub struct Pipeline<T: Transport = HttpTransport> {
    las: LasTools,
    tiler: Tiler,
    geoid: GeoidHeightService<T>,
}

impl Pipeline<HttpTransport> {
    pub fn new() -> Result<Self> {
        Ok(Self {
            las: LasTools::resolve()?,
            tiler: Tiler::resolve()?,
            geoid: GeoidHeightService::new(&ServiceConfig::resolve()),
        })
    }
}

impl<T: Transport> Pipeline<T> {
    /// Process one input file and return the output directory.
    pub fn run(&self, input: &Path, options: PipelineOptions) -> Result<PathBuf> {
        let started = Instant::now();
        if !input.is_file() {
            bail!("no file at {}", input.display());
        }

        let mut job = ProcessingJob::new(input, options)?;
        job.log_summary();

        for dir in [&job.rewrite_dir, &job.archive_dir, &job.out_dir] {
            fs::create_dir_all(dir)
                .with_context(|| format!("create directory {}", dir.display()))?;
        }

        let mut executed = 0usize;
        while executed < job.plan.len() {
            let step = job.plan[executed];
            executed += 1;
            info!("{}... (step {} of {})", step.describe(), executed, job.plan.len());
            self.execute(step, &mut job)?;
        }

        info!("cleaning up processing artifacts");
        let retain = if job.options.archive {
            vec![job.rewritten.clone()]
        } else {
            Vec::new()
        };
        job.artifacts.release_all(&retain);

        let elapsed = started.elapsed();
        info!(
            "finished processing {} ({} sec / {:.1} min)",
            job.file_name,
            elapsed.as_secs(),
            elapsed.as_secs_f64() / 60.0
        );
        Ok(job.out_dir)
    }

    fn execute(&self, step: StepKind, job: &mut ProcessingJob) -> Result<()> {
        match step {
            StepKind::StampWkt => {
                self.las.stamp_ogc_wkt(&job.input, &job.wkt_stamped)?;
                job.artifacts.track(&job.wkt_stamped);
            }
            StepKind::ExtractCrs => {
                let report = self.las.info(&job.wkt_stamped)?;
                let wkt = crs::wkt_from_lasinfo_output(&report)?;
                fs::write(&job.wkt_dump, &wkt)
                    .with_context(|| format!("write WKT dump {}", job.wkt_dump.display()))?;
                job.artifacts.track(&job.wkt_dump);

                let info = crs::parse_wkt(&wkt)?;
                debug!("WKT string: {}", info.wkt);
                info!(
                    "{}CRS: {} (EPSG:{})",
                    if info.is_compound() { "compound " } else { "" },
                    info.horizontal_name.as_deref().unwrap_or("unnamed"),
                    info.horizontal_epsg
                        .map(|c| c.to_string())
                        .unwrap_or_else(|| "unknown".to_string()),
                );
                if job.options.vrs_hint.is_none() && info.vertical_hint().is_some() {
                    job.amend_plan_for_file_vrs();
                }
                job.crs = Some(info);
            }
            StepKind::ResolveDatum => {
                let file_hint = job
                    .crs
                    .as_ref()
                    .context("CRS info missing before datum resolution")?
                    .vertical_hint();
                info!("sampling mean position (every {SAMPLE_EVERY_NTH}th point)");
                let (lat, lon) = self.las.sample_geographic_mean(
                    &job.wkt_stamped,
                    SAMPLE_EVERY_NTH,
                    &job.sample_export,
                )?;
                job.artifacts.track(&job.sample_export);

                let choice = vrs::resolve(job.options.vrs_hint.as_deref(), file_hint.as_deref())?;
                let adjustment = self.geoid.adjustment(choice, lat, lon, &job.options.region)?;
                debug!("correction source: {:?}", adjustment.source);
                job.total_translate_z = job.options.translate_z + adjustment.meters;
                info!(
                    "Z translation: {:+.2} manual {:+.2} geoid = {:+.2} total",
                    job.options.translate_z, adjustment.meters, job.total_translate_z
                );
            }
            StepKind::Rewrite => {
                self.las.rewrite(&RewriteRequest {
                    input: &job.wkt_stamped,
                    output: &job.rewritten,
                    wkt_file: &job.wkt_dump,
                    intensity_to_rgb: job.options.intensity_to_rgb,
                    rgb_scale: job.options.rgb_scale,
                    translate_z: job.total_translate_z,
                })?;
                job.artifacts.track(&job.rewritten);
                if job.options.archive {
                    job.archive_input();
                }
            }
            StepKind::Tile => {
                let input_epsg = job.crs.as_ref().and_then(|c| c.horizontal_epsg);
                self.tiler
                    .tile(&job.rewritten, &job.out_dir.join(&job.stem), input_epsg)?;
            }
            StepKind::Merge => {
                self.tiler.merge(&job.out_dir)?;
            }
        }
        Ok(())
    }
}
