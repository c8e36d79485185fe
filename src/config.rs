//! Resolution of external collaborator commands and service endpoints.
//!
//! Every external tool the pipeline shells out to can be overridden with an
//! environment variable holding a full command line (parsed via shell-words),
//! falling back to a `PATH` lookup of the conventional binary name. The
//! geodetic service base URLs are overridable the same way so tests can point
//! the clients at local stubs.

use anyhow::{bail, Context, Result};
use std::env;

/// Environment override for the `las2las` rewriter command.
pub const LAS2LAS_ENV: &str = "PSTAGE_LAS2LAS";
/// Environment override for the `lasinfo` dump command.
pub const LASINFO_ENV: &str = "PSTAGE_LASINFO";
/// Environment override for the tiling/merging tool command.
pub const TILER_ENV: &str = "PSTAGE_TILER";
/// Environment override for the national geoid-model service base URL.
pub const NGS_URL_ENV: &str = "PSTAGE_NGS_URL";
/// Environment override for the regional datum-transform service base URL.
pub const VDATUM_URL_ENV: &str = "PSTAGE_VDATUM_URL";

const DEFAULT_NGS_URL: &str = "https://geodesy.noaa.gov/api/geoid/ght";
const DEFAULT_VDATUM_URL: &str = "https://vdatum.noaa.gov/vdatumweb/api/convert";

/// Resolve one external tool command: env override first, then `PATH`.
pub fn resolve_command(env_key: &str, default_bin: &str) -> Result<Vec<String>> {
    if let Ok(raw) = env::var(env_key) {
        let argv = parse_command_override(env_key, &raw)?;
        return Ok(argv);
    }
    let path = which::which(default_bin).with_context(|| {
        format!("locate {default_bin} on PATH (set {env_key} to override)")
    })?;
    Ok(vec![path.display().to_string()])
}

fn parse_command_override(env_key: &str, raw: &str) -> Result<Vec<String>> {
    let argv = shell_words::split(raw).with_context(|| format!("parse {env_key}"))?;
    if argv.is_empty() {
        bail!("{env_key} is set but empty");
    }
    Ok(argv)
}

/// Base URLs for the two geodetic lookup services.
#[derive(Debug, Clone)]
pub struct ServiceConfig {
    pub ngs_url: String,
    pub vdatum_url: String,
}

impl ServiceConfig {
    pub fn resolve() -> Self {
        Self {
            ngs_url: env::var(NGS_URL_ENV).unwrap_or_else(|_| DEFAULT_NGS_URL.to_string()),
            vdatum_url: env::var(VDATUM_URL_ENV)
                .unwrap_or_else(|_| DEFAULT_VDATUM_URL.to_string()),
        }
    }
}
