//! # pdf2tiles
//!
//! Turn every page of a PDF into a zoomable map-tile pyramid.
//!
//! ## Why this crate?
//!
//! Large drawings (floor plans, schematics, scanned maps) are unusable as a
//! single image: a full-resolution page is tens of megapixels. Slippy-map
//! viewers (Leaflet, OpenLayers) solve that with tile pyramids. This crate
//! rasterises each page at high DPI and hands it to `gdal2tiles` in raster
//! profile, producing one `<zoom>/<x>/<y>` tree per page.
//!
//! ## Pipeline Overview
//!
//! ```text
//! PDF
//!  │
//!  ├─ 1. Input   check the file exists and starts with %PDF
//!  ├─ 2. Render  rasterise pages via pdfium (CPU-bound, spawn_blocking)
//!  ├─ 3. Encode  RGB bitmap → temp file (jpg/png/tif/bmp)
//!  ├─ 4. Tile    gdal2tiles -p raster -z <from>-<to> <image> <dir>
//!  └─ 5. Output  per-page outcomes + aggregate success flag
//! ```
//!
//! A page whose tiler exits non-zero is recorded and the run carries on;
//! the aggregate result is successful only if every page was.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use pdf2tiles::{tile_document, TilingConfig, ZoomRange};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = TilingConfig::builder("plan.pdf", "tiles")
//!         .tiler_executable("/usr/bin/gdal2tiles.py")
//!         .zoom(ZoomRange::new(2, 6)?)
//!         .image_format("png")
//!         .build()?;
//!     let output = tile_document(&config).await?;
//!     eprintln!(
//!         "{}/{} pages tiled",
//!         output.stats.succeeded_pages, output.stats.selected_pages
//!     );
//!     Ok(())
//! }
//! ```
//!
//! ## Feature Flags
//!
//! | Feature | Default | Description |
//! |---------|---------|-------------|
//! | `cli`   | on      | Enables the `pdf2tiles` binary (clap + anyhow + tracing-subscriber + indicatif) |
//!
//! Disable `cli` when using only the library to avoid pulling in CLI-only deps:
//! ```toml
//! pdf2tiles = { version = "0.1", default-features = false }
//! ```
//!
//! ## Choosing a Format
//!
//! | Format | Writer | Notes |
//! |--------|--------|-------|
//! | `jpg`  | JPEG q100 | Default. Small files, fast for gdal2tiles to read |
//! | `png`  | PNG, fast compression | Lossless; best for line art |
//! | `tif`  | TIFF, uncompressed | Large; no quality setting |
//! | `bmp`  | BMP, uncompressed | Large; no quality setting |

// ── Modules ──────────────────────────────────────────────────────────────

pub mod config;
pub mod error;
pub mod locate;
pub mod output;
pub mod pipeline;
pub mod progress;
pub mod stream;
pub mod tiler;

// ── Re-exports ───────────────────────────────────────────────────────────

pub use config::{OutputLayout, PageRange, TilingConfig, TilingConfigBuilder, ZoomRange};
pub use error::{PageError, TilerError};
pub use locate::TilerLocator;
pub use output::{DocumentMetadata, PageOutcome, TilingOutput, TilingStats};
pub use pipeline::encode::{EncoderRegistry, ImageWriter, WriteMode};
pub use pipeline::render::{PageSink, PageSource, PdfiumSource, RasterImage};
pub use pipeline::tile::{
    ExitOutcome, InterruptFlag, ProcessRunner, RunError, SystemRunner, TileInvocation,
};
pub use progress::{NoopProgressCallback, ProgressCallback, TilingProgressCallback};
pub use stream::{tile_stream, PageStream};
pub use tiler::{inspect, tile_document, tile_document_sync, PdfTiler};
