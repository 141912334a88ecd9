//! Streaming tiling API: emit page outcomes as they complete.
//!
//! Tiling a long document at 600 DPI takes a while, and every page is
//! independent once rendered. The stream lets callers drive a progress bar
//! or react to failed pages while later ones are still being tiled.
//!
//! Pages arrive in completion order. With `concurrency = 1` that is page
//! order; otherwise sort by `page_index` if order matters.
//!
//! ## Shape of the pipeline
//!
//! ```text
//! render (1 blocking task) ──mpsc(concurrency)──▶ page jobs (≤ concurrency blocking tasks)
//!                                                     encode → tiles dir → tiler
//! ```
//!
//! The channel capacity bounds how many rendered bitmaps wait for a job,
//! which is what keeps memory flat on long documents.

use crate::config::TilingConfig;
use crate::error::{PageError, TilerError};
use crate::output::PageOutcome;
use crate::pipeline::encode::{self, EncoderRegistry};
use crate::pipeline::input;
use crate::pipeline::render::RasterImage;
use crate::pipeline::tile::{InterruptFlag, ProcessRunner, RunError, TileInvocation};
use crate::tiler::PdfTiler;
use futures::future;
use futures::stream::{self, StreamExt};
use std::path::PathBuf;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tokio_stream::Stream;
use tracing::{debug, error, info, warn};

/// A boxed stream of page outcomes. An `Err` item is fatal and ends the run.
pub type PageStream = Pin<Box<dyn Stream<Item = Result<PageOutcome, TilerError>> + Send>>;

/// Tile a PDF, streaming page outcomes as they are ready.
///
/// Uses pdfium and the real tiler executable; see [`PdfTiler`] to swap
/// either out.
///
/// # Returns
/// - `Ok(PageStream)`: one `Ok(PageOutcome)` per selected page, possibly
///   followed by a single fatal `Err`
/// - `Err(TilerError)`: the run could not start (bad input, no tiler, ...)
///
/// # Example
/// ```rust,no_run
/// use pdf2tiles::{tile_stream, TilingConfig};
/// use futures::StreamExt;
///
/// # #[tokio::main]
/// # async fn main() -> Result<(), Box<dyn std::error::Error>> {
/// let config = TilingConfig::new("plan.pdf", "tiles");
/// let mut pages = tile_stream(&config).await?;
/// while let Some(page) = pages.next().await {
///     let page = page?;
///     match &page.error {
///         None => println!("page {} → {}", page.page_index, page.tiles_dir.display()),
///         Some(e) => eprintln!("{e}"),
///     }
/// }
/// # Ok(())
/// # }
/// ```
pub async fn tile_stream(config: &TilingConfig) -> Result<PageStream, TilerError> {
    PdfTiler::new(config.clone()).stream().await
}

/// A started run: the stream plus what was learned while opening the document.
pub(crate) struct OpenedRun {
    pub stream: PageStream,
    pub document_pages: usize,
    pub selected_pages: usize,
}

/// Validate everything that can be checked up front, open the document and
/// start rendering.
pub(crate) async fn open(tiler: &PdfTiler) -> Result<OpenedRun, TilerError> {
    let config = Arc::clone(&tiler.config);
    info!("Starting tiling run: {}", config.source_path.display());

    // ── Step 1: Validate ─────────────────────────────────────────────────
    config.validate()?;
    input::validate_source(&config.source_path)?;
    let program = config
        .tiler_executable
        .clone()
        .ok_or(TilerError::TilerNotConfigured)?;
    tokio::fs::create_dir_all(&config.output_dir)
        .await
        .map_err(|source| TilerError::OutputDirFailed {
            path: config.output_dir.clone(),
            source,
        })?;

    // ── Step 2: Resolve the page range ───────────────────────────────────
    let document_pages = {
        let source = Arc::clone(&tiler.source);
        let path = config.source_path.clone();
        tokio::task::spawn_blocking(move || source.page_count(&path))
            .await
            .map_err(|e| TilerError::Internal(format!("page count task failed: {e}")))??
    };
    let range = config.pages.resolve(document_pages)?;
    let selected_pages = range.len();
    info!(
        "Tiling pages {}..{} of {} at {} DPI, zoom {}, format '{}'",
        range.start, range.end, document_pages, config.dpi, config.zoom, config.image_format
    );

    if let Some(ref cb) = config.progress_callback {
        cb.on_job_start(selected_pages);
    }

    // ── Step 3: Render into a bounded channel ────────────────────────────
    let concurrency = config.concurrency;
    let (tx, rx) = mpsc::channel::<RasterImage>(concurrency);
    let render_task = {
        let source = Arc::clone(&tiler.source);
        let path = config.source_path.clone();
        let dpi = config.dpi;
        let interrupt = tiler.interrupt.clone();
        tokio::task::spawn_blocking(move || {
            let render_start = Instant::now();
            let result = source.render_pages(&path, range, dpi, &mut |raster: RasterImage| {
                if interrupt.is_interrupted() {
                    return Err(TilerError::Interrupted {
                        page: raster.page_index,
                    });
                }
                tx.blocking_send(raster)
                    .map_err(|_| TilerError::Internal("page consumer went away".into()))
            });
            debug!("Rendering finished in {}ms", render_start.elapsed().as_millis());
            result
        })
    };

    // ── Step 4: Encode and tile each page ────────────────────────────────
    let job = Arc::new(PageJob {
        config: Arc::clone(&config),
        encoders: Arc::clone(&tiler.encoders),
        runner: Arc::clone(&tiler.runner),
        interrupt: tiler.interrupt.clone(),
        program,
        total_pages: selected_pages,
    });

    let pages = ReceiverStream::new(rx)
        .map(move |raster| {
            let job = Arc::clone(&job);
            async move {
                let page = raster.page_index;
                tokio::task::spawn_blocking(move || job.process(raster))
                    .await
                    .map_err(|e| TilerError::Internal(format!("page {page} task failed: {e}")))?
            }
        })
        .buffer_unordered(concurrency);

    // ── Step 5: Surface a render failure after the last page ─────────────
    let render_result = stream::once(async move {
        match render_task.await {
            Ok(Ok(())) => None,
            Ok(Err(e)) => Some(Err(e)),
            Err(e) => Some(Err(TilerError::Internal(format!("render task failed: {e}")))),
        }
    })
    .filter_map(future::ready);

    Ok(OpenedRun {
        stream: Box::pin(pages.chain(render_result)),
        document_pages,
        selected_pages,
    })
}

/// Everything a page job needs, shared across jobs.
struct PageJob {
    config: Arc<TilingConfig>,
    encoders: Arc<EncoderRegistry>,
    runner: Arc<dyn ProcessRunner>,
    interrupt: InterruptFlag,
    program: PathBuf,
    total_pages: usize,
}

impl PageJob {
    /// Encode, tile and clean up one page. Runs on a blocking thread.
    ///
    /// Recoverable failures become `Ok` outcomes carrying a [`PageError`];
    /// only launch, wait and interrupt failures are returned as `Err`.
    fn process(&self, raster: RasterImage) -> Result<PageOutcome, TilerError> {
        let started = Instant::now();
        let page = raster.page_index;
        let config = &self.config;

        if let Some(ref cb) = config.progress_callback {
            cb.on_page_start(page, self.total_pages);
        }

        let tiles_dir = config.layout.tiles_dir(&config.output_dir, page);

        let encoded = match encode::encode_page(
            &self.encoders,
            &raster,
            &config.image_format,
            config.temp_dir.as_deref(),
        ) {
            Ok(encoded) => encoded,
            Err(err) => {
                error!(
                    "Page {}: could not encode as '{}': {}",
                    page, config.image_format, err
                );
                return Ok(self.finish(page, None, tiles_dir, Some(err), started));
            }
        };
        drop(raster);

        std::fs::create_dir_all(&tiles_dir).map_err(|source| TilerError::OutputDirFailed {
            path: tiles_dir.clone(),
            source,
        })?;

        let invocation =
            TileInvocation::gdal2tiles(&self.program, config.zoom, encoded.path(), &tiles_dir);
        let exit = self
            .runner
            .run(&invocation, &self.interrupt)
            .map_err(|e| match e {
                RunError::Launch(source) => TilerError::TileProcessLaunch {
                    executable: self.program.clone(),
                    source,
                },
                RunError::Wait(source) => TilerError::TileProcessWait {
                    executable: self.program.clone(),
                    page,
                    source,
                },
                RunError::Interrupted => TilerError::Interrupted { page },
            })?;

        let image_path = encoded.path().to_path_buf();
        let writer = encoded.writer;
        if config.keep_images {
            if let Err(e) = encoded.keep() {
                warn!("Page {}: could not keep {}: {}", page, image_path.display(), e);
            }
        } else {
            drop(encoded);
        }

        let error = if exit.success() {
            None
        } else if exit.timed_out {
            Some(PageError::TilerTimedOut {
                page,
                image: image_path.clone(),
                secs: config.tiler_timeout_secs.unwrap_or_default(),
            })
        } else {
            Some(PageError::TilerFailed {
                page,
                image: image_path.clone(),
                exit_code: exit.code,
                stderr: exit.stderr,
            })
        };

        match &error {
            None => debug!(
                "Page {} tiled into {} from a '{}' image",
                page,
                tiles_dir.display(),
                writer
            ),
            Some(err) => error!(
                "Page {}: tiling image {} failed: {}",
                page,
                image_path.display(),
                err
            ),
        }

        Ok(self.finish(page, Some(image_path), tiles_dir, error, started))
    }

    fn finish(
        &self,
        page_index: usize,
        image_path: Option<PathBuf>,
        tiles_dir: PathBuf,
        error: Option<PageError>,
        started: Instant,
    ) -> PageOutcome {
        if let Some(ref cb) = self.config.progress_callback {
            match &error {
                None => cb.on_page_complete(page_index, self.total_pages),
                Some(e) => cb.on_page_error(page_index, self.total_pages, e.to_string()),
            }
        }
        PageOutcome {
            page_index,
            image_path,
            tiles_dir,
            error,
            duration_ms: started.elapsed().as_millis() as u64,
        }
    }
}
