//! Configuration types for PDF-to-tiles runs.
//!
//! All run behaviour is controlled through [`TilingConfig`]. There are two
//! ways to build one:
//!
//! * [`TilingConfig::new`]: source and output only; every other knob takes
//!   its default and the gdal2tiles executable is discovered with
//!   [`TilerLocator::default`].
//! * [`TilingConfig::builder`]: every knob set explicitly, no discovery.
//!
//! Fields stay public so a caller may still adjust a config before the run
//! starts; [`TilingConfig::validate`] is re-run when the job begins.

use crate::error::TilerError;
use crate::locate::TilerLocator;
use crate::progress::ProgressCallback;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::ops::Range;
use std::path::{Path, PathBuf};
use std::str::FromStr;

/// Default rendering resolution in dots per inch.
pub const DEFAULT_DPI: u32 = 600;

/// Default image format handed to the tiler.
pub const DEFAULT_IMAGE_FORMAT: &str = "jpg";

/// Configuration for a single tiling run.
///
/// # Example
/// ```rust
/// use pdf2tiles::{TilingConfig, ZoomRange};
///
/// let config = TilingConfig::builder("plan.pdf", "tiles")
///     .tiler_executable("/usr/bin/gdal2tiles.py")
///     .zoom(ZoomRange::new(2, 6).unwrap())
///     .image_format("png")
///     .build()
///     .unwrap();
/// assert_eq!(config.zoom.to_string(), "2-6");
/// ```
#[derive(Clone)]
pub struct TilingConfig {
    /// Path to the source PDF.
    pub source_path: PathBuf,

    /// Root directory for the generated tile trees. Created if missing.
    pub output_dir: PathBuf,

    /// Path to the gdal2tiles executable. `None` means "not found".
    pub tiler_executable: Option<PathBuf>,

    /// Zoom levels passed to the tiler. Default: 1-8.
    pub zoom: ZoomRange,

    /// Pages to process, half-open and 0-based. Default: every page.
    pub pages: PageRange,

    /// Image format identifier used for the intermediate files. Default: "jpg".
    ///
    /// Also used verbatim as the temp file extension, so gdal2tiles can pick
    /// its driver from the name.
    pub image_format: String,

    /// Rendering DPI. Default: 600.
    ///
    /// gdal2tiles only ever downsamples, so the deepest zoom level is only
    /// as sharp as the rendered page. 600 DPI keeps small print readable at
    /// zoom 8 for A4/Letter pages.
    pub dpi: u32,

    /// Number of pages encoded and tiled at the same time. Default: 1.
    ///
    /// Rendering always happens on one thread; this only bounds how many
    /// encode + gdal2tiles jobs run side by side.
    pub concurrency: usize,

    /// Kill a tiler process that runs longer than this. Default: no limit.
    pub tiler_timeout_secs: Option<u64>,

    /// Keep the intermediate page images instead of deleting them. Default: false.
    pub keep_images: bool,

    /// Directory for intermediate page images. Default: the system temp dir.
    pub temp_dir: Option<PathBuf>,

    /// Where each page's tiles land. Default: [`OutputLayout::PerPage`].
    pub layout: OutputLayout,

    /// PDF user password for encrypted documents.
    pub password: Option<String>,

    /// Explicit pdfium shared library. Default: `./` then the system library.
    pub pdfium_library: Option<PathBuf>,

    /// Receives per-page progress events.
    pub progress_callback: Option<ProgressCallback>,
}

impl fmt::Debug for TilingConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TilingConfig")
            .field("source_path", &self.source_path)
            .field("output_dir", &self.output_dir)
            .field("tiler_executable", &self.tiler_executable)
            .field("zoom", &self.zoom)
            .field("pages", &self.pages)
            .field("image_format", &self.image_format)
            .field("dpi", &self.dpi)
            .field("concurrency", &self.concurrency)
            .field("tiler_timeout_secs", &self.tiler_timeout_secs)
            .field("keep_images", &self.keep_images)
            .field("temp_dir", &self.temp_dir)
            .field("layout", &self.layout)
            .field("password", &self.password.as_ref().map(|_| "<redacted>"))
            .field("pdfium_library", &self.pdfium_library)
            .field(
                "progress_callback",
                &self.progress_callback.as_ref().map(|_| "<dyn TilingProgressCallback>"),
            )
            .finish()
    }
}

impl TilingConfig {
    /// Minimal construction: defaults everywhere, tiler discovered from the
    /// well-known install locations.
    pub fn new(source_path: impl Into<PathBuf>, output_dir: impl Into<PathBuf>) -> Self {
        Self::with_locator(source_path, output_dir, &TilerLocator::default())
    }

    /// Like [`TilingConfig::new`] but discovers the tiler with `locator`.
    pub fn with_locator(
        source_path: impl Into<PathBuf>,
        output_dir: impl Into<PathBuf>,
        locator: &TilerLocator,
    ) -> Self {
        let mut config = Self::defaults(source_path.into(), output_dir.into());
        config.tiler_executable = locator.locate();
        config
    }

    /// Full construction: nothing is discovered, every field comes from the caller.
    pub fn builder(
        source_path: impl Into<PathBuf>,
        output_dir: impl Into<PathBuf>,
    ) -> TilingConfigBuilder {
        TilingConfigBuilder {
            config: Self::defaults(source_path.into(), output_dir.into()),
        }
    }

    fn defaults(source_path: PathBuf, output_dir: PathBuf) -> Self {
        Self {
            source_path,
            output_dir,
            tiler_executable: None,
            zoom: ZoomRange::default(),
            pages: PageRange::default(),
            image_format: DEFAULT_IMAGE_FORMAT.to_string(),
            dpi: DEFAULT_DPI,
            concurrency: 1,
            tiler_timeout_secs: None,
            keep_images: false,
            temp_dir: None,
            layout: OutputLayout::default(),
            password: None,
            pdfium_library: None,
            progress_callback: None,
        }
    }

    /// Check the invariants that do not need the document to be open.
    pub fn validate(&self) -> Result<(), TilerError> {
        if self.zoom.from > self.zoom.to {
            return Err(TilerError::InvalidConfig(format!(
                "zoom range {}-{} is reversed",
                self.zoom.from, self.zoom.to
            )));
        }
        if self.dpi == 0 {
            return Err(TilerError::InvalidConfig("DPI must be ≥ 1".into()));
        }
        if self.concurrency == 0 {
            return Err(TilerError::InvalidConfig("Concurrency must be ≥ 1".into()));
        }
        if self.image_format.trim().is_empty() {
            return Err(TilerError::InvalidConfig("image format is empty".into()));
        }
        if let (Some(start), Some(end)) = (self.pages.start, self.pages.end) {
            if start > end {
                return Err(TilerError::InvalidConfig(format!(
                    "page range {start}..{end} is reversed"
                )));
            }
        }
        if self.layout == OutputLayout::Shared && self.concurrency > 1 {
            return Err(TilerError::InvalidConfig(
                "shared output layout requires concurrency 1".into(),
            ));
        }
        Ok(())
    }
}

/// Builder for [`TilingConfig`].
#[derive(Debug)]
pub struct TilingConfigBuilder {
    config: TilingConfig,
}

impl TilingConfigBuilder {
    pub fn tiler_executable(mut self, path: impl Into<PathBuf>) -> Self {
        self.config.tiler_executable = Some(path.into());
        self
    }

    pub fn zoom(mut self, zoom: ZoomRange) -> Self {
        self.config.zoom = zoom;
        self
    }

    pub fn pages(mut self, pages: PageRange) -> Self {
        self.config.pages = pages;
        self
    }

    pub fn image_format(mut self, format: impl Into<String>) -> Self {
        self.config.image_format = format.into();
        self
    }

    pub fn dpi(mut self, dpi: u32) -> Self {
        self.config.dpi = dpi;
        self
    }

    pub fn concurrency(mut self, n: usize) -> Self {
        self.config.concurrency = n;
        self
    }

    pub fn tiler_timeout_secs(mut self, secs: u64) -> Self {
        self.config.tiler_timeout_secs = Some(secs);
        self
    }

    pub fn keep_images(mut self, keep: bool) -> Self {
        self.config.keep_images = keep;
        self
    }

    pub fn temp_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.config.temp_dir = Some(dir.into());
        self
    }

    pub fn layout(mut self, layout: OutputLayout) -> Self {
        self.config.layout = layout;
        self
    }

    pub fn password(mut self, pwd: impl Into<String>) -> Self {
        self.config.password = Some(pwd.into());
        self
    }

    pub fn pdfium_library(mut self, path: impl Into<PathBuf>) -> Self {
        self.config.pdfium_library = Some(path.into());
        self
    }

    pub fn progress_callback(mut self, cb: ProgressCallback) -> Self {
        self.config.progress_callback = Some(cb);
        self
    }

    /// Build the configuration, validating constraints.
    pub fn build(self) -> Result<TilingConfig, TilerError> {
        self.config.validate()?;
        Ok(self.config)
    }
}

// ── Ranges ───────────────────────────────────────────────────────────────

/// Inclusive span of zoom levels handed to the tiler, e.g. `2-6`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ZoomRange {
    from: u8,
    to: u8,
}

impl ZoomRange {
    /// Create a zoom range; `from` must not exceed `to`.
    pub fn new(from: u8, to: u8) -> Result<Self, TilerError> {
        if from > to {
            return Err(TilerError::InvalidConfig(format!(
                "zoom range {from}-{to} is reversed"
            )));
        }
        Ok(Self { from, to })
    }

    pub fn from(&self) -> u8 {
        self.from
    }

    pub fn to(&self) -> u8 {
        self.to
    }

    /// Every level in the range, lowest first.
    pub fn levels(&self) -> impl Iterator<Item = u8> {
        self.from..=self.to
    }
}

impl Default for ZoomRange {
    fn default() -> Self {
        Self { from: 1, to: 8 }
    }
}

/// Renders as `<from>-<to>`, the form gdal2tiles expects after `-z`.
impl fmt::Display for ZoomRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.from, self.to)
    }
}

/// Parses `"2-6"`, or a single level such as `"5"`.
impl FromStr for ZoomRange {
    type Err = TilerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let parse = |v: &str| {
            v.trim().parse::<u8>().map_err(|_| {
                TilerError::InvalidConfig(format!("invalid zoom level '{}'", v.trim()))
            })
        };
        match s.split_once('-') {
            Some((from, to)) => Self::new(parse(from)?, parse(to)?),
            None => {
                let level = parse(s)?;
                Self::new(level, level)
            }
        }
    }
}

/// Half-open, 0-based page interval `[start, end)`.
///
/// Missing bounds are filled in by [`PageRange::resolve`] once the page
/// count is known: `start` defaults to 0, `end` to the page count.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PageRange {
    pub start: Option<usize>,
    pub end: Option<usize>,
}

impl PageRange {
    /// Every page of the document.
    pub fn all() -> Self {
        Self::default()
    }

    /// Pages `start..end`.
    pub fn new(start: usize, end: usize) -> Self {
        Self {
            start: Some(start),
            end: Some(end),
        }
    }

    /// Pages from `start` to the end of the document.
    pub fn starting_at(start: usize) -> Self {
        Self {
            start: Some(start),
            end: None,
        }
    }

    /// Resolve against the real page count, enforcing `start ≤ end ≤ page_count`.
    pub fn resolve(&self, page_count: usize) -> Result<Range<usize>, TilerError> {
        let start = self.start.unwrap_or(0);
        let end = self.end.unwrap_or(page_count);
        if start > end || end > page_count {
            return Err(TilerError::PageRangeOutOfBounds {
                start,
                end,
                page_count,
            });
        }
        Ok(start..end)
    }
}

impl fmt::Display for PageRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(start) = self.start {
            write!(f, "{start}")?;
        }
        f.write_str("..")?;
        if let Some(end) = self.end {
            write!(f, "{end}")?;
        }
        Ok(())
    }
}

/// Parses `"2..5"`, `"2.."`, `"..5"`, `".."`/`"all"`, or a single page `"3"`.
impl FromStr for PageRange {
    type Err = TilerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        let parse = |v: &str| {
            let v = v.trim();
            v.parse::<usize>()
                .map_err(|_| TilerError::InvalidConfig(format!("invalid page index '{v}'")))
        };
        let bound = |v: &str| -> Result<Option<usize>, TilerError> {
            if v.trim().is_empty() {
                Ok(None)
            } else {
                parse(v).map(Some)
            }
        };

        if s.eq_ignore_ascii_case("all") {
            return Ok(Self::all());
        }

        match s.split_once("..") {
            Some((start, end)) => {
                let range = Self {
                    start: bound(start)?,
                    end: bound(end)?,
                };
                if let (Some(a), Some(b)) = (range.start, range.end) {
                    if a > b {
                        return Err(TilerError::InvalidConfig(format!(
                            "page range {a}..{b} is reversed"
                        )));
                    }
                }
                Ok(range)
            }
            None => {
                let page = parse(s)?;
                let end = page.checked_add(1).ok_or_else(|| {
                    TilerError::InvalidConfig(format!("page {page} is out of range"))
                })?;
                Ok(Self::new(page, end))
            }
        }
    }
}

// ── Output layout ────────────────────────────────────────────────────────

/// Where the tiles of each page are written.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum OutputLayout {
    /// One subdirectory per page: `<output>/page-0003/<z>/<x>/<y>.png`. (default)
    #[default]
    PerPage,
    /// Every page tiles straight into `<output>`; later pages overwrite
    /// earlier tiles that share a path. Sequential runs only.
    Shared,
}

impl OutputLayout {
    /// Tile directory for a 0-based page index.
    pub fn tiles_dir(&self, output_dir: &Path, page_index: usize) -> PathBuf {
        match self {
            OutputLayout::PerPage => output_dir.join(page_dir_name(page_index)),
            OutputLayout::Shared => output_dir.to_path_buf(),
        }
    }
}

/// Directory name used for a page under [`OutputLayout::PerPage`].
pub fn page_dir_name(page_index: usize) -> String {
    format!("page-{page_index:04}")
}
