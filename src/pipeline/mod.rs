//! Pipeline stages for PDF-to-tiles conversion.
//!
//! Each submodule implements exactly one transformation step.
//! Keeping stages separate makes each independently testable and lets us
//! swap implementations (a different renderer, a fake tiler in tests)
//! without touching the others.
//!
//! ## Data Flow
//!
//! ```text
//! input ──▶ render ──▶ encode ──▶ tile
//! (path)    (pdfium)   (temp file) (gdal2tiles)
//! ```
//!
//! 1. [`input`]: check the source exists and carries the `%PDF` magic
//! 2. [`render`]: rasterise selected pages; runs in `spawn_blocking` because
//!    pdfium is not async-safe
//! 3. [`encode`]: write each bitmap to a temp file in the requested format
//!    with the best writer available for it
//! 4. [`tile`]: run gdal2tiles on the temp file and wait for its exit
//!    status; the only stage that spawns processes

pub mod encode;
pub mod input;
pub mod render;
pub mod tile;
