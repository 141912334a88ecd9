//! Discovery of the gdal2tiles executable.
//!
//! GDAL ships the tiler as `gdal2tiles.py` on older installs and as a plain
//! `gdal2tiles` entry point on newer ones, in a handful of well-known places.
//! [`TilerLocator`] holds an ordered candidate list and returns the first
//! path that exists. An explicitly configured path always wins; otherwise
//! [`crate::config::TilingConfig::new`] and the CLI fall back to the default
//! locator.

use std::path::{Path, PathBuf};
use tracing::debug;

/// Well-known install locations, probed in order.
pub const DEFAULT_TILER_CANDIDATES: &[&str] = &[
    "/usr/bin/gdal2tiles.py",
    "/Library/Frameworks/GDAL.framework/Programs/gdal2tiles.py",
    "/usr/local/bin/gdal2tiles.py",
    "/usr/bin/gdal2tiles",
    "/usr/local/bin/gdal2tiles",
];

/// Ordered list of candidate tiler paths. First existing one wins.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TilerLocator {
    candidates: Vec<PathBuf>,
}

impl Default for TilerLocator {
    fn default() -> Self {
        Self::new(DEFAULT_TILER_CANDIDATES.iter().copied())
    }
}

impl TilerLocator {
    pub fn new<I, P>(candidates: I) -> Self
    where
        I: IntoIterator<Item = P>,
        P: Into<PathBuf>,
    {
        Self {
            candidates: candidates.into_iter().map(Into::into).collect(),
        }
    }

    /// Put `path` ahead of every existing candidate.
    pub fn prepend(mut self, path: impl Into<PathBuf>) -> Self {
        self.candidates.insert(0, path.into());
        self
    }

    pub fn candidates(&self) -> &[PathBuf] {
        &self.candidates
    }

    /// First candidate that exists on disk, or `None`.
    ///
    /// Only performs existence checks; nothing is executed or written.
    pub fn locate(&self) -> Option<PathBuf> {
        let found = self
            .candidates
            .iter()
            .find(|p| Path::new(p).exists())
            .cloned();
        match &found {
            Some(p) => debug!("Found tiler at {}", p.display()),
            None => debug!(
                "No tiler found among {} candidate locations",
                self.candidates.len()
            ),
        }
        found
    }
}
