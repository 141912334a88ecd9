//! Progress-callback trait for per-page tiling events.
//!
//! Inject an [`Arc<dyn TilingProgressCallback>`] via
//! [`crate::config::TilingConfigBuilder::progress_callback`] to receive
//! events as the pipeline processes each page.
//!
//! # Example
//!
//! ```rust
//! use pdf2tiles::{TilingConfig, TilingProgressCallback};
//! use std::sync::{Arc, atomic::{AtomicUsize, Ordering}};
//!
//! struct CountingCallback {
//!     tiled: AtomicUsize,
//! }
//!
//! impl TilingProgressCallback for CountingCallback {
//!     fn on_page_complete(&self, page_index: usize, total_pages: usize) {
//!         let done = self.tiled.fetch_add(1, Ordering::SeqCst) + 1;
//!         eprintln!("page {page_index} tiled ({done}/{total_pages})");
//!     }
//! }
//!
//! let config = TilingConfig::builder("plan.pdf", "tiles")
//!     .progress_callback(Arc::new(CountingCallback { tiled: AtomicUsize::new(0) }))
//!     .build()
//!     .unwrap();
//! ```

use std::sync::Arc;

/// Called by the pipeline as it processes each page.
///
/// Page numbers are 0-based document indices. All methods have default
/// no-op implementations so callers only override what they care about.
///
/// # Thread safety
///
/// With `concurrency > 1`, `on_page_start`, `on_page_complete`, and
/// `on_page_error` may be called concurrently from different blocking
/// threads.
pub trait TilingProgressCallback: Send + Sync {
    /// Called once after the page range is resolved, before any page is rendered.
    fn on_job_start(&self, total_pages: usize) {
        let _ = total_pages;
    }

    /// Called when a rendered page enters encoding.
    fn on_page_start(&self, page_index: usize, total_pages: usize) {
        let _ = (page_index, total_pages);
    }

    /// Called when the tiler exited 0 for a page.
    fn on_page_complete(&self, page_index: usize, total_pages: usize) {
        let _ = (page_index, total_pages);
    }

    /// Called when a page failed to encode or tile.
    fn on_page_error(&self, page_index: usize, total_pages: usize, error: String) {
        let _ = (page_index, total_pages, error);
    }

    /// Called once after every page has been attempted.
    fn on_job_complete(&self, total_pages: usize, success_count: usize) {
        let _ = (total_pages, success_count);
    }
}

/// A no-op implementation for callers that don't need progress events.
pub struct NoopProgressCallback;

impl TilingProgressCallback for NoopProgressCallback {}

/// Convenience alias matching the type stored in [`crate::config::TilingConfig`].
pub type ProgressCallback = Arc<dyn TilingProgressCallback>;
