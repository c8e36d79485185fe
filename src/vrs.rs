//! Vertical reference system resolution.
//!
//! Height corrections are only meaningful once we know which vertical
//! reference system (VRS) the input heights are measured against. Two hints
//! compete: the model named on the command line and the model declared by the
//! file's own CRS header. File headers win: projects routinely mix files
//! with different vertical datums, and the header is the authoritative record
//! of what the producer wrote. The user hint only fills the gap where a
//! header is silent.
//!
//! Outcomes for the nine (file hint, user hint) combinations:
//!
//! | file hint  | user hint  | outcome                         |
//! |------------|------------|---------------------------------|
//! | matched    | any        | file's model (override logged)  |
//! | empty      | empty      | no correction                   |
//! | empty      | matched    | user's model                    |
//! | empty      | unmatched  | fatal                           |
//! | unmatched  | any        | fatal                           |

use anyhow::{bail, Result};
use tracing::info;

/// Which backing service answers lookups for a model.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServiceKind {
    /// National geoid/geopotential model service (lat, lon, model).
    National,
    /// Regional datum-transform service (lat, lon, frames, region).
    Regional,
}

/// A recognized geoid, tidal, or geopotential model.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VrsModel {
    pub name: &'static str,
    pub kind: ServiceKind,
}

/// The resolver's verdict: either a model to look up, or no correction at all.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VerticalDatumChoice {
    None,
    Model(VrsModel),
}

/// Geoid and geopotential models served by the national model service.
const NATIONAL_MODELS: &[&str] = &[
    "GEOID18", "GEOID12B", "GEOID12A", "GEOID09", "GEOID06", "GEOID03", "GEOID99", "USGG2012",
    "USGG2009", "USGG2003", "G99SSS", "XGEOID16B", "XGEOID17B", "XGEOID18B", "XGEOID19B",
    "XGEOID20B", "EGM2008", "EGM96", "EGM84",
];

/// Tidal and orthometric frames served by the regional datum-transform service.
const REGIONAL_FRAMES: &[&str] = &[
    "NAVD88", "NGVD29", "LMSL", "MLLW", "MLW", "MTL", "DTL", "MHW", "MHHW", "CRD", "PRVD02",
    "VIVD09", "ASVD02", "GUVD04", "NMVD03",
];

/// Candidate regions for the datum-transform service, in fallback order.
/// The first entry is the CLI default.
pub const REGIONS: &[&str] = &[
    "contiguous",
    "ak",
    "as",
    "gcnmi",
    "hi",
    "prvi",
    "sgi",
    "spi",
    "westcoast",
];

/// Alternate spellings seen in CRS headers and user input, mapped onto
/// catalog names. Keys are pre-normalized (uppercase, alphanumeric only).
const ALIASES: &[(&str, &str)] = &[
    ("MSL", "LMSL"),
    ("MEANSEALEVEL", "LMSL"),
    ("MEANLOWERLOWWATER", "MLLW"),
    ("MEANLOWWATER", "MLW"),
    ("MEANHIGHWATER", "MHW"),
    ("MEANHIGHERHIGHWATER", "MHHW"),
    ("NORTHAMERICANVERTICALDATUM1988", "NAVD88"),
    ("NATIONALGEODETICVERTICALDATUM1929", "NGVD29"),
    ("EGM2008GEOID", "EGM2008"),
    ("EGM96GEOID", "EGM96"),
    ("EGM84GEOID", "EGM84"),
];

fn normalize(hint: &str) -> String {
    hint.chars()
        .filter(|c| c.is_ascii_alphanumeric())
        .map(|c| c.to_ascii_uppercase())
        .collect()
}

fn catalog_lookup(name: &str) -> Option<VrsModel> {
    if let Some(found) = NATIONAL_MODELS.iter().copied().find(|m| *m == name) {
        return Some(VrsModel {
            name: found,
            kind: ServiceKind::National,
        });
    }
    REGIONAL_FRAMES
        .iter()
        .copied()
        .find(|m| *m == name)
        .map(|found| VrsModel {
            name: found,
            kind: ServiceKind::Regional,
        })
}

/// Match a free-form hint against the model catalog.
///
/// Matching is fuzzy in the way CRS headers demand: case and punctuation are
/// ignored, known aliases are folded onto catalog names, and a hint may carry
/// trailing qualifiers ("NAVD88 height (ftUS)"). The longest catalog name
/// that prefixes the hint wins.
pub fn model_search(hint: &str) -> Option<VrsModel> {
    let needle = normalize(hint);
    if needle.is_empty() {
        return None;
    }

    let catalog = NATIONAL_MODELS
        .iter()
        .chain(REGIONAL_FRAMES.iter())
        .map(|&name| (name, name));
    let aliases = ALIASES.iter().map(|&(alias, canonical)| (alias, canonical));

    let mut best: Option<(usize, &'static str)> = None;
    for (candidate, canonical) in catalog.chain(aliases) {
        if !needle.starts_with(candidate) {
            continue;
        }
        let longer = match best {
            Some((len, _)) => candidate.len() > len,
            None => true,
        };
        if longer {
            best = Some((candidate.len(), canonical));
        }
    }
    best.and_then(|(_, name)| catalog_lookup(name))
}

/// Canonical model names for vertical EPSG codes commonly stamped by LAS
/// writers. Used to turn a file's vertical CRS into a catalog hint.
pub fn model_for_epsg(code: u32) -> Option<&'static str> {
    match code {
        5703 | 6360 => Some("NAVD88"),
        5702 => Some("NGVD29"),
        5714 => Some("LMSL"),
        3855 => Some("EGM2008"),
        5773 => Some("EGM96"),
        5798 => Some("EGM84"),
        _ => None,
    }
}

/// Decide which VRS governs height correction for this file.
///
/// `file_hint` comes from the file's CRS header, `user_hint` from the command
/// line. Empty strings count as absent. See the module table for outcomes.
pub fn resolve(user_hint: Option<&str>, file_hint: Option<&str>) -> Result<VerticalDatumChoice> {
    let user_hint = user_hint.map(str::trim).filter(|h| !h.is_empty());
    let file_hint = file_hint.map(str::trim).filter(|h| !h.is_empty());

    match (file_hint, user_hint) {
        (Some(file), user) => {
            let Some(model) = model_search(file) else {
                bail!("no vertical reference system matching {file:?} (declared by file header)");
            };
            if let Some(user) = user {
                let same = model_search(user).map(|m| m.name) == Some(model.name);
                if !same {
                    info!(
                        "user value {user:?} overridden by file-declared VRS {}",
                        model.name
                    );
                }
            }
            Ok(VerticalDatumChoice::Model(model))
        }
        (None, None) => Ok(VerticalDatumChoice::None),
        (None, Some(user)) => match model_search(user) {
            Some(model) => {
                info!("VRS found: {} (user-specified)", model.name);
                Ok(VerticalDatumChoice::Model(model))
            }
            None => bail!("no vertical reference system matching {user:?}"),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn model(choice: VerticalDatumChoice) -> &'static str {
        match choice {
            VerticalDatumChoice::Model(m) => m.name,
            VerticalDatumChoice::None => panic!("expected a model"),
        }
    }

    #[test]
    fn matched_file_hint_wins_over_any_user_hint() {
        // file matched, user matched (and different)
        let choice = resolve(Some("GEOID12B"), Some("NAVD88 height")).unwrap();
        assert_eq!(model(choice), "NAVD88");
        // file matched, user unmatched
        let choice = resolve(Some("garbage"), Some("NAVD88")).unwrap();
        assert_eq!(model(choice), "NAVD88");
        // file matched, user empty
        let choice = resolve(None, Some("GEOID18")).unwrap();
        assert_eq!(model(choice), "GEOID18");
    }

    #[test]
    fn user_hint_fills_in_for_a_silent_header() {
        let choice = resolve(Some("GEOID18"), None).unwrap();
        assert_eq!(model(choice), "GEOID18");
        let choice = resolve(Some("msl"), Some("")).unwrap();
        assert_eq!(model(choice), "LMSL");
    }

    #[test]
    fn both_hints_empty_means_no_correction() {
        assert_eq!(resolve(None, None).unwrap(), VerticalDatumChoice::None);
        assert_eq!(
            resolve(Some(""), Some("  ")).unwrap(),
            VerticalDatumChoice::None
        );
    }

    #[test]
    fn unmatched_user_hint_without_file_hint_is_fatal() {
        assert!(resolve(Some("not-a-datum"), None).is_err());
    }

    #[test]
    fn unmatched_file_hint_is_fatal_regardless_of_user_hint() {
        // file unmatched, user empty
        assert!(resolve(None, Some("mystery datum")).is_err());
        // file unmatched, user matched: the file hint is trusted even when invalid
        assert!(resolve(Some("NAVD88"), Some("mystery datum")).is_err());
        // file unmatched, user unmatched
        assert!(resolve(Some("also wrong"), Some("mystery datum")).is_err());
    }

    #[test]
    fn search_tolerates_header_spellings() {
        assert_eq!(model_search("NAVD88 height (ftUS)").unwrap().name, "NAVD88");
        assert_eq!(
            model_search("North American Vertical Datum 1988").unwrap().name,
            "NAVD88"
        );
        assert_eq!(model_search("msl").unwrap().name, "LMSL");
        assert_eq!(model_search("EGM2008 geoid height").unwrap().name, "EGM2008");
        assert!(model_search("WGS84 ellipsoid").is_none());
        assert!(model_search("").is_none());
    }

    #[test]
    fn catalog_routes_models_to_the_right_service() {
        assert_eq!(model_search("GEOID18").unwrap().kind, ServiceKind::National);
        assert_eq!(model_search("EGM96").unwrap().kind, ServiceKind::National);
        assert_eq!(model_search("NAVD88").unwrap().kind, ServiceKind::Regional);
        assert_eq!(model_search("MLLW").unwrap().kind, ServiceKind::Regional);
    }

    #[test]
    fn epsg_codes_map_to_canonical_names() {
        assert_eq!(model_for_epsg(5703), Some("NAVD88"));
        assert_eq!(model_for_epsg(6360), Some("NAVD88"));
        assert_eq!(model_for_epsg(3855), Some("EGM2008"));
        assert_eq!(model_for_epsg(4979), None);
    }
}
