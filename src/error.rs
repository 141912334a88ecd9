//! Error types for the pdf2tiles library.
//!
//! Two distinct error types reflect two distinct failure modes:
//!
//! * [`TilerError`] is **fatal**: the job cannot proceed at all (bad input
//!   file, pdfium missing, a page that will not render, the tiling executable
//!   cannot be launched, the run was interrupted). Returned as
//!   `Err(TilerError)` from the top-level `tile_*` functions.
//!
//! * [`PageError`] is **non-fatal**: a single page failed (no encoder for the
//!   requested format, gdal2tiles exited non-zero) but every other page is
//!   still processed. Stored inside [`crate::output::PageOutcome`] and folded
//!   into the aggregate result.

use std::path::PathBuf;
use thiserror::Error;

/// All fatal errors returned by the pdf2tiles library.
///
/// Page-level failures use [`PageError`] and are stored in
/// [`crate::output::PageOutcome`] rather than propagated here.
#[derive(Debug, Error)]
pub enum TilerError {
    // ── Input errors ──────────────────────────────────────────────────────
    /// Input file was not found at the given path.
    #[error("PDF file not found: '{path}'\nCheck the path exists and is readable.")]
    FileNotFound { path: PathBuf },

    /// Process does not have read permission on the file.
    #[error("Permission denied reading '{path}'\nTry: chmod +r {path:?}")]
    PermissionDenied { path: PathBuf },

    /// The file exists and was read, but is not a PDF.
    #[error("File is not a valid PDF: '{path}'\nFirst bytes: {magic:?}")]
    NotAPdf { path: PathBuf, magic: [u8; 4] },

    // ── PDF errors ────────────────────────────────────────────────────────
    /// pdfium could not load the document.
    #[error("Cannot open PDF '{path}': {detail}")]
    DocumentOpen { path: PathBuf, detail: String },

    /// PDF requires a password but none was provided.
    #[error("PDF '{path}' is encrypted and requires a password.\nProvide it with --password <PASSWORD>.")]
    PasswordRequired { path: PathBuf },

    /// A password was provided but it is wrong.
    #[error("Wrong password for PDF '{path}'")]
    WrongPassword { path: PathBuf },

    /// The resolved page range does not fit the document.
    #[error("Page range {start}..{end} is invalid for a document with {page_count} pages")]
    PageRangeOutOfBounds {
        start: usize,
        end: usize,
        page_count: usize,
    },

    /// pdfium returned an error for a specific page (0-based index).
    #[error("Rasterisation failed for page {page}: {detail}")]
    PageRenderFailed { page: usize, detail: String },

    /// Could not bind to a pdfium library.
    #[error(
        "Failed to bind to pdfium library: {0}\n\n\
Place libpdfium next to the executable, install it system-wide,\n\
or point --pdfium-lib / PDFIUM_LIB_PATH at an existing copy."
    )]
    PdfiumBindingFailed(String),

    // ── Tiling errors ─────────────────────────────────────────────────────
    /// No tiling executable was supplied and none was discovered.
    #[error(
        "No gdal2tiles executable configured.\n\
Install GDAL or pass the path explicitly with --tiler <PATH>."
    )]
    TilerNotConfigured,

    /// The tiling executable could not be started.
    #[error("Failed to launch tiler '{executable}': {source}")]
    TileProcessLaunch {
        executable: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Waiting on (or killing) a running tiler process failed.
    #[error("Lost track of tiler '{executable}' while processing page {page}: {source}")]
    TileProcessWait {
        executable: PathBuf,
        page: usize,
        #[source]
        source: std::io::Error,
    },

    /// The run was interrupted while a page was being processed.
    #[error("Interrupted while processing page {page}")]
    Interrupted { page: usize },

    /// Some pages were tiled but at least one failed.
    ///
    /// Returned by [`crate::output::TilingOutput::into_result`] when the
    /// caller wants to treat any page failure as an error.
    #[error("{} of {total} pages failed to tile (pages {failed_pages:?})", .failed_pages.len())]
    PartialFailure {
        failed_pages: Vec<usize>,
        total: usize,
    },

    // ── I/O errors ────────────────────────────────────────────────────────
    /// Could not create an output directory for the tiles.
    #[error("Failed to create output directory '{path}': {source}")]
    OutputDirFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    // ── Config errors ─────────────────────────────────────────────────────
    /// Configuration validation failed.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    // ── Catch-all ─────────────────────────────────────────────────────────
    /// Unexpected internal error.
    #[error("Internal error: {0}")]
    Internal(String),
}

/// A non-fatal error for a single page.
///
/// Stored in [`crate::output::PageOutcome`] when a page fails. The job
/// continues with the remaining pages and reports an overall failure.
#[derive(Debug, Clone, Error, serde::Serialize, serde::Deserialize)]
pub enum PageError {
    /// No image writer is registered for the requested format.
    #[error("Page {page}: no encoder registered for image format '{format}'")]
    EncoderNotFound { page: usize, format: String },

    /// The writer failed, or the temp file could not be written.
    #[error("Page {page}: image encoding failed: {detail}")]
    EncodeFailed { page: usize, detail: String },

    /// The tiler ran but did not exit with status 0.
    #[error("Page {page}: tiler failed on '{}' ({}){}", .image.display(), exit_label(.exit_code), stderr_suffix(.stderr))]
    TilerFailed {
        page: usize,
        image: PathBuf,
        exit_code: Option<i32>,
        stderr: String,
    },

    /// The tiler was killed after exceeding the configured timeout.
    #[error("Page {page}: tiler timed out after {secs}s on '{}'", .image.display())]
    TilerTimedOut {
        page: usize,
        image: PathBuf,
        secs: u64,
    },
}

impl PageError {
    /// The 0-based page index this error belongs to.
    pub fn page(&self) -> usize {
        match self {
            PageError::EncoderNotFound { page, .. }
            | PageError::EncodeFailed { page, .. }
            | PageError::TilerFailed { page, .. }
            | PageError::TilerTimedOut { page, .. } => *page,
        }
    }
}

fn exit_label(code: &Option<i32>) -> String {
    match code {
        Some(c) => format!("exit code {c}"),
        None => "terminated by signal".to_string(),
    }
}

fn stderr_suffix(stderr: &str) -> String {
    let trimmed = stderr.trim();
    if trimmed.is_empty() {
        String::new()
    } else {
        format!(": {trimmed}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_failure_display() {
        let e = TilerError::PartialFailure {
            failed_pages: vec![3],
            total: 10,
        };
        let msg = e.to_string();
        assert!(msg.contains("1 of 10"), "got: {msg}");
        assert!(msg.contains("[3]"), "got: {msg}");
    }

    #[test]
    fn page_range_display() {
        let e = TilerError::PageRangeOutOfBounds {
            start: 2,
            end: 12,
            page_count: 10,
        };
        assert_eq!(
            e.to_string(),
            "Page range 2..12 is invalid for a document with 10 pages"
        );
    }

    #[test]
    fn tiler_failed_display_includes_file_and_code() {
        let e = PageError::TilerFailed {
            page: 3,
            image: PathBuf::from("/tmp/pdf2tilesAbc.png"),
            exit_code: Some(1),
            stderr: "ERROR 4: not recognized\n".into(),
        };
        let msg = e.to_string();
        assert!(msg.contains("Page 3"), "got: {msg}");
        assert!(msg.contains("/tmp/pdf2tilesAbc.png"), "got: {msg}");
        assert!(msg.contains("exit code 1"), "got: {msg}");
        assert!(msg.ends_with("ERROR 4: not recognized"), "got: {msg}");
    }

    #[test]
    fn tiler_failed_without_code_or_stderr() {
        let e = PageError::TilerFailed {
            page: 0,
            image: PathBuf::from("a.jpg"),
            exit_code: None,
            stderr: "  ".into(),
        };
        assert!(e.to_string().ends_with("(terminated by signal)"));
    }

    #[test]
    fn page_error_reports_its_page() {
        let e = PageError::EncoderNotFound {
            page: 7,
            format: "webp".into(),
        };
        assert_eq!(e.page(), 7);
        assert!(e.to_string().contains("'webp'"));
    }

    #[test]
    fn launch_error_keeps_source() {
        use std::error::Error as _;
        let e = TilerError::TileProcessLaunch {
            executable: PathBuf::from("/nope/gdal2tiles.py"),
            source: std::io::Error::from(std::io::ErrorKind::NotFound),
        };
        assert!(e.source().is_some());
        assert!(e.to_string().contains("/nope/gdal2tiles.py"));
    }
}
