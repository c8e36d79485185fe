//! Lifecycle tracking for intermediate pipeline artifacts.
//!
//! Every file the pipeline creates as a side effect is tracked here and
//! removed at job end unless the caller names it in the retain set. Removal
//! is idempotent: an already-absent file logs a warning, not an error.

use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// Ordered collection of file paths created as pipeline side effects.
#[derive(Debug, Default)]
pub struct ArtifactSet {
    tracked: Vec<PathBuf>,
}

impl ArtifactSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an intermediate file for removal at job end.
    pub fn track(&mut self, path: impl Into<PathBuf>) {
        let path = path.into();
        debug!("tracking artifact {}", path.display());
        self.tracked.push(path);
    }

    /// Remove every tracked file not named in `retain`.
    pub fn release_all(&self, retain: &[PathBuf]) {
        for path in &self.tracked {
            if retain.iter().any(|kept| kept == path) {
                debug!("retaining artifact {}", path.display());
                continue;
            }
            remove_file(path);
        }
    }
}

fn remove_file(path: &Path) {
    match fs::remove_file(path) {
        Ok(()) => debug!("removed artifact {}", path.display()),
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
            warn!("artifact {} already absent", path.display());
        }
        Err(err) => warn!("failed to remove artifact {}: {err}", path.display()),
    }
}
