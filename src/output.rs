//! Result types returned by a tiling run.
//!
//! A run yields one [`PageOutcome`] per selected page. [`TilingOutput`] folds
//! them into the overall verdict: `success` is true only when every page's
//! tiler exited 0. The failed page indices stay available for reporting.

use crate::error::{PageError, TilerError};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// What happened to one page.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PageOutcome {
    /// 0-based page index in the source document.
    pub page_index: usize,
    /// Encoded intermediate image. `None` when no file was produced. The
    /// file itself is already deleted unless `keep_images` was set.
    pub image_path: Option<PathBuf>,
    /// Directory handed to the tiler for this page.
    pub tiles_dir: PathBuf,
    /// Why the page failed, if it did.
    pub error: Option<PageError>,
    /// Wall-clock time spent encoding and tiling this page.
    pub duration_ms: u64,
}

impl PageOutcome {
    pub fn succeeded(&self) -> bool {
        self.error.is_none()
    }
}

/// Counters for a finished run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TilingStats {
    /// Pages in the source document.
    pub document_pages: usize,
    /// Pages in the resolved range.
    pub selected_pages: usize,
    pub succeeded_pages: usize,
    pub failed_pages: usize,
    pub total_duration_ms: u64,
}

/// Everything a completed run produced.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TilingOutput {
    /// Per-page outcomes in ascending page order.
    pub pages: Vec<PageOutcome>,
    pub stats: TilingStats,
    /// Logical AND of every page outcome.
    pub success: bool,
}

impl TilingOutput {
    /// Fold per-page outcomes into the aggregate result.
    ///
    /// Outcomes may arrive in completion order; they are sorted by page so
    /// the result does not depend on scheduling.
    pub fn from_pages(
        mut pages: Vec<PageOutcome>,
        document_pages: usize,
        total_duration_ms: u64,
    ) -> Self {
        pages.sort_by_key(|p| p.page_index);
        let success = pages.iter().fold(true, |acc, p| acc && p.succeeded());
        let failed = pages.iter().filter(|p| !p.succeeded()).count();
        let stats = TilingStats {
            document_pages,
            selected_pages: pages.len(),
            succeeded_pages: pages.len() - failed,
            failed_pages: failed,
            total_duration_ms,
        };
        Self {
            pages,
            stats,
            success,
        }
    }

    /// 0-based indices of the pages that failed, ascending.
    pub fn failed_pages(&self) -> Vec<usize> {
        self.pages
            .iter()
            .filter(|p| !p.succeeded())
            .map(|p| p.page_index)
            .collect()
    }

    /// Treat any page failure as an error.
    pub fn into_result(self) -> Result<Self, TilerError> {
        if self.success {
            Ok(self)
        } else {
            Err(TilerError::PartialFailure {
                failed_pages: self.failed_pages(),
                total: self.stats.selected_pages,
            })
        }
    }
}

/// Document-level information reported by `--inspect-only`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DocumentMetadata {
    pub title: Option<String>,
    pub author: Option<String>,
    pub subject: Option<String>,
    pub creator: Option<String>,
    pub producer: Option<String>,
    pub page_count: usize,
    pub pdf_version: String,
}
