//! InSAR displacement staging: lon/lat/value CSV to colorized LAZ.
//!
//! Displacement rasters arrive as flat lon,lat,displacement[,std] CSV rows
//! with no height and no color. To make them viewable next to the LiDAR
//! tilesets, displacement is binned onto a viridis ramp, a zero Z column is
//! injected, and the LAS rewriter turns the resulting text into LAZ.

use anyhow::{bail, Context, Result};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::info;

use crate::artifacts::ArtifactSet;
use crate::lastools::LasTools;

/// Number of color bins on the ramp.
const COLOR_BINS: usize = 256;

/// Anchor points of the viridis colormap; the ramp interpolates between
/// them.
const VIRIDIS_ANCHORS: [[u8; 3]; 10] = [
    [0x44, 0x01, 0x54],
    [0x48, 0x28, 0x78],
    [0x3e, 0x49, 0x89],
    [0x31, 0x68, 0x8e],
    [0x26, 0x82, 0x8e],
    [0x1f, 0x9e, 0x89],
    [0x35, 0xb7, 0x79],
    [0x6e, 0xce, 0x58],
    [0xb5, 0xde, 0x2b],
    [0xfd, 0xe7, 0x25],
];

#[derive(Debug, Clone, Copy)]
pub struct InsarOptions {
    /// Bin displacement by quantile (equal point count per bin) instead of
    /// linearly (equal value span per bin).
    pub quantile: bool,
    /// Rows carry a fourth standard-deviation column to skip over.
    pub with_std: bool,
}

#[derive(Debug, Clone, Copy, PartialEq)]
struct Record {
    lon: f64,
    lat: f64,
    displacement: f64,
}

/// Convert a displacement CSV into a colorized LAZ next to the input, and
/// return the LAZ path.
pub fn stage_csv(las: &LasTools, input: &Path, options: &InsarOptions) -> Result<PathBuf> {
    let text = fs::read_to_string(input)
        .with_context(|| format!("read displacement CSV {}", input.display()))?;
    let records = parse_llvs(&text, options.with_std)?;
    info!("loaded {} displacement rows", records.len());

    let bins = assign_bins(&records, options.quantile);
    let ramp = viridis_ramp(COLOR_BINS);

    let stem = input
        .file_stem()
        .and_then(|s| s.to_str())
        .context("input file name is not valid UTF-8")?;
    let base_dir = input.parent().context("input file has no parent directory")?;
    let text_path = base_dir.join(format!("{stem}-llzrgb.txt"));
    let laz_path = base_dir.join(format!("{stem}.laz"));

    let mut out = String::with_capacity(records.len() * 48);
    for (record, bin) in records.iter().zip(&bins) {
        let [r, g, b] = ramp[*bin];
        out.push_str(&format!(
            "{} {} 0 {r} {g} {b}\n",
            record.lon, record.lat
        ));
    }
    fs::write(&text_path, out)
        .with_context(|| format!("write color table {}", text_path.display()))?;

    let mut artifacts = ArtifactSet::new();
    artifacts.track(&text_path);

    las.text_to_laz(&text_path, &laz_path)?;
    info!("wrote {}", laz_path.display());

    artifacts.release_all(&[]);
    Ok(laz_path)
}

fn parse_llvs(text: &str, with_std: bool) -> Result<Vec<Record>> {
    let expected = if with_std { 4 } else { 3 };
    let mut records = Vec::new();
    for (index, line) in text.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        let fields: Vec<&str> = line.split(',').map(str::trim).collect();
        if fields.len() != expected {
            bail!(
                "line {}: expected {expected} fields, found {}",
                index + 1,
                fields.len()
            );
        }
        let parse = |field: &str, what: &str| -> Result<f64> {
            field
                .parse()
                .with_context(|| format!("line {}: parse {what} {field:?}", index + 1))
        };
        records.push(Record {
            lon: parse(fields[0], "lon")?,
            lat: parse(fields[1], "lat")?,
            displacement: parse(fields[2], "displacement")?,
        });
    }
    if records.is_empty() {
        bail!("displacement CSV is empty");
    }
    Ok(records)
}

/// Map each record to a color bin index.
fn assign_bins(records: &[Record], quantile: bool) -> Vec<usize> {
    if quantile {
        quantile_bins(records)
    } else {
        linear_bins(records)
    }
}

fn linear_bins(records: &[Record]) -> Vec<usize> {
    let min = records
        .iter()
        .map(|r| r.displacement)
        .fold(f64::INFINITY, f64::min);
    let max = records
        .iter()
        .map(|r| r.displacement)
        .fold(f64::NEG_INFINITY, f64::max);
    let span = max - min;
    records
        .iter()
        .map(|r| {
            if span == 0.0 {
                return 0;
            }
            let t = (r.displacement - min) / span;
            ((t * (COLOR_BINS - 1) as f64).round() as usize).min(COLOR_BINS - 1)
        })
        .collect()
}

/// Equal-count bins: rank each record, then spread ranks across the ramp.
fn quantile_bins(records: &[Record]) -> Vec<usize> {
    let mut order: Vec<usize> = (0..records.len()).collect();
    order.sort_by(|&a, &b| {
        records[a]
            .displacement
            .total_cmp(&records[b].displacement)
    });
    let mut bins = vec![0usize; records.len()];
    if records.len() < 2 {
        return bins;
    }
    for (rank, &index) in order.iter().enumerate() {
        bins[index] = rank * (COLOR_BINS - 1) / (records.len() - 1);
    }
    bins
}

/// Piecewise-linear interpolation across the viridis anchors.
fn viridis_ramp(bins: usize) -> Vec<[u8; 3]> {
    (0..bins)
        .map(|i| {
            let t = if bins > 1 {
                i as f64 / (bins - 1) as f64
            } else {
                0.0
            };
            let scaled = t * (VIRIDIS_ANCHORS.len() - 1) as f64;
            let lo = scaled.floor() as usize;
            let hi = (lo + 1).min(VIRIDIS_ANCHORS.len() - 1);
            let frac = scaled - lo as f64;
            let mix = |a: u8, b: u8| {
                (f64::from(a) + (f64::from(b) - f64::from(a)) * frac).round() as u8
            };
            [
                mix(VIRIDIS_ANCHORS[lo][0], VIRIDIS_ANCHORS[hi][0]),
                mix(VIRIDIS_ANCHORS[lo][1], VIRIDIS_ANCHORS[hi][1]),
                mix(VIRIDIS_ANCHORS[lo][2], VIRIDIS_ANCHORS[hi][2]),
            ]
        })
        .collect()
}
