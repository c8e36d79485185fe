//! Coordinate reference system extraction from OGC well-known text.
//!
//! The LAS rewriter stamps OGC WKT into the file container; `lasinfo` dumps
//! it back out. This module pulls the horizontal and (optional) vertical EPSG
//! codes and names from that text. Parsing is deliberately shallow: only
//! the authority codes and the top-level names are of interest, never the
//! full CRS tree.

use anyhow::{bail, Context, Result};
use regex::Regex;

use crate::vrs;

/// CRS facts derived once per job from the rewritten file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CrsInfo {
    pub horizontal_epsg: Option<u32>,
    pub vertical_epsg: Option<u32>,
    pub horizontal_name: Option<String>,
    pub vertical_name: Option<String>,
    pub wkt: String,
}

impl CrsInfo {
    pub fn is_compound(&self) -> bool {
        self.vertical_epsg.is_some() || self.vertical_name.is_some()
    }

    /// The file-declared vertical reference hint, if any.
    ///
    /// A recognized vertical EPSG code supplies the canonical catalog
    /// spelling; otherwise the raw vertical CRS name is passed through for
    /// fuzzy matching.
    pub fn vertical_hint(&self) -> Option<String> {
        if let Some(name) = self.vertical_epsg.and_then(vrs::model_for_epsg) {
            return Some(name.to_string());
        }
        self.vertical_name.clone()
    }
}

/// Pick the WKT line out of a `lasinfo` dump.
///
/// `lasinfo` prints the CRS record as a single long line; it is the only
/// line carrying a WKT node keyword.
pub fn wkt_from_lasinfo_output(output: &str) -> Result<String> {
    let found = output.lines().map(str::trim).find(|line| {
        line.starts_with("COMPD_CS[")
            || line.starts_with("PROJCS[")
            || line.starts_with("GEOGCS[")
            || line.starts_with("COMPOUNDCRS[")
            || line.starts_with("PROJCRS[")
            || line.starts_with("GEOGCRS[")
    });
    match found {
        Some(line) => Ok(line.to_string()),
        None => bail!("no CRS WKT found in lasinfo output"),
    }
}

/// Parse WKT into the CRS facts the pipeline needs.
pub fn parse_wkt(wkt: &str) -> Result<CrsInfo> {
    let wkt = wkt.trim();
    if wkt.is_empty() {
        bail!("empty WKT string");
    }

    // WKT1 uses VERT_CS, WKT2 uses VERTCRS; both mark where the vertical
    // component starts, so everything before it is the horizontal CRS.
    let vertical_start = Regex::new(r"VERT_CS\[|VERTCRS\[").context("compile WKT regex")?;
    let (horizontal_part, vertical_part) = match vertical_start.find(wkt) {
        Some(m) => (&wkt[..m.start()], Some(&wkt[m.start()..])),
        None => (wkt, None),
    };

    let horizontal_name = name_after(
        horizontal_part,
        r#"(?:PROJCS|GEOGCS|PROJCRS|GEOGCRS)\["([^"]*)"#,
    )?;
    let vertical_name = match vertical_part {
        Some(part) => name_after(part, r#"(?:VERT_CS|VERTCRS)\["([^"]*)"#)?,
        None => None,
    };

    Ok(CrsInfo {
        horizontal_epsg: last_epsg(horizontal_part)?,
        vertical_epsg: match vertical_part {
            Some(part) => last_epsg(part)?,
            None => None,
        },
        horizontal_name,
        vertical_name,
        wkt: wkt.to_string(),
    })
}

fn name_after(part: &str, pattern: &str) -> Result<Option<String>> {
    let re = Regex::new(pattern).context("compile WKT regex")?;
    Ok(re
        .captures(part)
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str().to_string()))
}

/// The authority code of a WKT node is the last EPSG reference in its text:
/// inner nodes (datums, axes, units) carry their own codes before it.
fn last_epsg(part: &str) -> Result<Option<u32>> {
    let re = Regex::new(r#"(?:AUTHORITY|ID)\["EPSG",\s*"?(\d+)"?\]"#).context("compile WKT regex")?;
    let mut last = None;
    for caps in re.captures_iter(part) {
        if let Some(code) = caps.get(1) {
            last = code.as_str().parse::<u32>().ok();
        }
    }
    Ok(last)
}
