//! Image encoding: `RgbImage` → temp file on disk, ready for the tiler.
//!
//! gdal2tiles only reads files, so every rendered page is written to a fresh
//! temp file whose extension is the configured format identifier. The tiler
//! picks its GDAL driver from that extension.
//!
//! Writers are looked up by format name in an [`EncoderRegistry`]. When more
//! than one writer claims a format, the first one that compresses wins,
//! otherwise the first registered. Compressing writers are driven at their
//! highest quality setting: the deepest zoom level can never be sharper than
//! this intermediate file.

use super::render::RasterImage;
use crate::error::PageError;
use image::codecs::bmp::BmpEncoder;
use image::codecs::jpeg::JpegEncoder;
use image::codecs::png::{CompressionType, FilterType, PngEncoder};
use image::codecs::tiff::TiffEncoder;
use image::{ImageResult, RgbImage};
use std::io::{BufWriter, Seek, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tempfile::TempPath;
use tracing::{debug, warn};

/// Prefix for intermediate image files.
pub const TEMP_PREFIX: &str = "pdf2tiles";

/// How a writer should trade size for fidelity.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteMode {
    /// The writer's own defaults.
    Default,
    /// Highest quality the writer offers.
    MaxQuality,
}

/// Output sink for writers. TIFF needs to seek back to patch offsets.
pub trait WriteSeek: Write + Seek {}

impl<T: Write + Seek> WriteSeek for T {}

/// Something that can serialise an RGB image in one or more formats.
pub trait ImageWriter: Send + Sync {
    /// Short name used in logs.
    fn name(&self) -> &'static str;

    /// Lowercase format identifiers this writer answers to.
    fn format_names(&self) -> &[&'static str];

    /// Whether the output is compressed.
    fn can_write_compressed(&self) -> bool;

    /// Whether [`WriteMode::MaxQuality`] changes anything for this writer.
    fn supports_quality(&self) -> bool;

    fn write(&self, image: &RgbImage, mode: WriteMode, out: &mut dyn WriteSeek)
        -> ImageResult<()>;
}

/// Baseline JPEG. Quality 100 in [`WriteMode::MaxQuality`].
#[derive(Debug, Default)]
pub struct JpegWriter;

impl ImageWriter for JpegWriter {
    fn name(&self) -> &'static str {
        "jpeg"
    }

    fn format_names(&self) -> &[&'static str] {
        &["jpg", "jpeg"]
    }

    fn can_write_compressed(&self) -> bool {
        true
    }

    fn supports_quality(&self) -> bool {
        true
    }

    fn write(
        &self,
        image: &RgbImage,
        mode: WriteMode,
        out: &mut dyn WriteSeek,
    ) -> ImageResult<()> {
        let quality = match mode {
            WriteMode::MaxQuality => 100,
            WriteMode::Default => 75,
        };
        image.write_with_encoder(JpegEncoder::new_with_quality(out, quality))
    }
}

/// PNG. Lossless either way; [`WriteMode::MaxQuality`] trades compression
/// effort for speed since the file is thrown away after tiling.
#[derive(Debug, Default)]
pub struct PngWriter;

impl ImageWriter for PngWriter {
    fn name(&self) -> &'static str {
        "png"
    }

    fn format_names(&self) -> &[&'static str] {
        &["png"]
    }

    fn can_write_compressed(&self) -> bool {
        true
    }

    fn supports_quality(&self) -> bool {
        true
    }

    fn write(
        &self,
        image: &RgbImage,
        mode: WriteMode,
        out: &mut dyn WriteSeek,
    ) -> ImageResult<()> {
        let encoder = match mode {
            WriteMode::MaxQuality => {
                PngEncoder::new_with_quality(out, CompressionType::Fast, FilterType::Adaptive)
            }
            WriteMode::Default => PngEncoder::new(out),
        };
        image.write_with_encoder(encoder)
    }
}

/// Uncompressed TIFF.
#[derive(Debug, Default)]
pub struct TiffWriter;

impl ImageWriter for TiffWriter {
    fn name(&self) -> &'static str {
        "tiff"
    }

    fn format_names(&self) -> &[&'static str] {
        &["tif", "tiff"]
    }

    fn can_write_compressed(&self) -> bool {
        false
    }

    fn supports_quality(&self) -> bool {
        false
    }

    fn write(
        &self,
        image: &RgbImage,
        _mode: WriteMode,
        out: &mut dyn WriteSeek,
    ) -> ImageResult<()> {
        image.write_with_encoder(TiffEncoder::new(out))
    }
}

/// Uncompressed BMP.
#[derive(Debug, Default)]
pub struct BmpWriter;

impl ImageWriter for BmpWriter {
    fn name(&self) -> &'static str {
        "bmp"
    }

    fn format_names(&self) -> &[&'static str] {
        &["bmp"]
    }

    fn can_write_compressed(&self) -> bool {
        false
    }

    fn supports_quality(&self) -> bool {
        false
    }

    fn write(
        &self,
        image: &RgbImage,
        _mode: WriteMode,
        mut out: &mut dyn WriteSeek,
    ) -> ImageResult<()> {
        image.write_with_encoder(BmpEncoder::new(&mut out))
    }
}

/// Ordered collection of image writers.
#[derive(Clone, Default)]
pub struct EncoderRegistry {
    writers: Vec<Arc<dyn ImageWriter>>,
}

impl std::fmt::Debug for EncoderRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_list()
            .entries(self.writers.iter().map(|w| w.name()))
            .finish()
    }
}

impl EncoderRegistry {
    /// An empty registry. Every lookup fails until a writer is registered.
    pub fn new() -> Self {
        Self::default()
    }

    /// JPEG, PNG, TIFF and BMP, in that order.
    pub fn with_defaults() -> Self {
        Self::new()
            .register(JpegWriter)
            .register(PngWriter)
            .register(TiffWriter)
            .register(BmpWriter)
    }

    /// Append a writer. Earlier registrations win ties.
    pub fn register(mut self, writer: impl ImageWriter + 'static) -> Self {
        self.writers.push(Arc::new(writer));
        self
    }

    /// Writers answering to `format` (case-insensitive), in registration order.
    pub fn writers_for(&self, format: &str) -> Vec<Arc<dyn ImageWriter>> {
        let wanted = format.to_ascii_lowercase();
        self.writers
            .iter()
            .filter(|w| w.format_names().iter().any(|n| *n == wanted))
            .cloned()
            .collect()
    }

    /// Choose the writer and mode for `format`.
    ///
    /// First compressing writer, else the first candidate. Deterministic for
    /// a given registry.
    pub fn select(&self, format: &str) -> Option<(Arc<dyn ImageWriter>, WriteMode)> {
        let candidates = self.writers_for(format);
        let writer = candidates
            .iter()
            .find(|w| w.can_write_compressed())
            .or_else(|| candidates.first())
            .cloned()?;

        let mode = if writer.supports_quality() {
            WriteMode::MaxQuality
        } else {
            warn!(
                "Writer '{}' has no quality setting; encoding '{}' with defaults",
                writer.name(),
                format
            );
            WriteMode::Default
        };
        Some((writer, mode))
    }
}

/// An intermediate page image on disk.
///
/// The file is deleted when this value is dropped, unless [`keep`] is called.
///
/// [`keep`]: EncodedImage::keep
#[derive(Debug)]
pub struct EncodedImage {
    /// Writer that produced the file.
    pub writer: &'static str,
    path: TempPath,
}

impl EncodedImage {
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Disable deletion and return the final path.
    pub fn keep(self) -> std::io::Result<PathBuf> {
        self.path.keep().map_err(|e| e.error)
    }
}

/// Write `raster` to a new temp file in `format`.
///
/// The file is named `pdf2tiles<random>.<format>` and lives in `temp_dir`,
/// or the system temp directory when `None`.
pub fn encode_page(
    registry: &EncoderRegistry,
    raster: &RasterImage,
    format: &str,
    temp_dir: Option<&Path>,
) -> Result<EncodedImage, PageError> {
    let page = raster.page_index;
    let (writer, mode) = registry
        .select(format)
        .ok_or_else(|| PageError::EncoderNotFound {
            page,
            format: format.to_string(),
        })?;

    let encode_failed = |detail: String| PageError::EncodeFailed { page, detail };

    let suffix = format!(".{format}");
    let mut builder = tempfile::Builder::new();
    builder.prefix(TEMP_PREFIX).suffix(&suffix);
    let mut file = match temp_dir {
        Some(dir) => builder.tempfile_in(dir),
        None => builder.tempfile(),
    }
    .map_err(|e| encode_failed(format!("cannot create temp file: {e}")))?;

    {
        let mut out = BufWriter::new(file.as_file_mut());
        writer
            .write(&raster.image, mode, &mut out)
            .map_err(|e| encode_failed(e.to_string()))?;
        out.flush().map_err(|e| encode_failed(e.to_string()))?;
    }

    let path = file.into_temp_path();
    debug!(
        "Encoded page {} with '{}' → {}",
        page,
        writer.name(),
        path.display()
    );

    Ok(EncodedImage {
        writer: writer.name(),
        path,
    })
}
