//! Top-level tiling API.
//!
//! [`PdfTiler`] wires the four pipeline stages together. It holds each
//! collaborator behind an `Arc` so tests and embedders can replace the
//! renderer, the writer registry or the process runner without touching the
//! orchestration.
//!
//! The free functions at the bottom cover the common case: real pdfium, the
//! default writers, and real gdal2tiles processes.

use crate::config::TilingConfig;
use crate::error::TilerError;
use crate::output::{DocumentMetadata, TilingOutput};
use crate::pipeline::encode::EncoderRegistry;
use crate::pipeline::input;
use crate::pipeline::render::{PageSource, PdfiumSource};
use crate::pipeline::tile::{InterruptFlag, ProcessRunner, SystemRunner};
use crate::stream::{self, PageStream};
use futures::StreamExt;
use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::info;

/// One configured tiling job.
#[derive(Clone)]
pub struct PdfTiler {
    pub(crate) config: Arc<TilingConfig>,
    pub(crate) source: Arc<dyn PageSource>,
    pub(crate) encoders: Arc<EncoderRegistry>,
    pub(crate) runner: Arc<dyn ProcessRunner>,
    pub(crate) interrupt: InterruptFlag,
}

impl std::fmt::Debug for PdfTiler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PdfTiler")
            .field("config", &self.config)
            .field("encoders", &self.encoders)
            .field("interrupted", &self.interrupt.is_interrupted())
            .finish_non_exhaustive()
    }
}

impl PdfTiler {
    /// pdfium for rendering, the default writers, and real tiler processes
    /// with the configured timeout.
    pub fn new(config: TilingConfig) -> Self {
        let source = PdfiumSource::new(config.pdfium_library.clone(), config.password.clone());
        let runner = SystemRunner::new(config.tiler_timeout_secs.map(Duration::from_secs));
        Self {
            config: Arc::new(config),
            source: Arc::new(source),
            encoders: Arc::new(EncoderRegistry::with_defaults()),
            runner: Arc::new(runner),
            interrupt: InterruptFlag::new(),
        }
    }

    pub fn with_source(mut self, source: Arc<dyn PageSource>) -> Self {
        self.source = source;
        self
    }

    pub fn with_encoders(mut self, encoders: EncoderRegistry) -> Self {
        self.encoders = Arc::new(encoders);
        self
    }

    pub fn with_runner(mut self, runner: Arc<dyn ProcessRunner>) -> Self {
        self.runner = runner;
        self
    }

    /// Share an existing flag, e.g. one a signal handler already holds.
    pub fn with_interrupt(mut self, interrupt: InterruptFlag) -> Self {
        self.interrupt = interrupt;
        self
    }

    /// Handle that cancels this job when raised.
    pub fn interrupt_handle(&self) -> InterruptFlag {
        self.interrupt.clone()
    }

    pub fn config(&self) -> &TilingConfig {
        &self.config
    }

    /// Start the job and stream page outcomes as they complete.
    ///
    /// See [`crate::stream`] for ordering and backpressure.
    pub async fn stream(&self) -> Result<PageStream, TilerError> {
        Ok(stream::open(self).await?.stream)
    }

    /// Run the job to completion.
    ///
    /// # Returns
    /// `Ok(TilingOutput)` once every selected page has been attempted, even
    /// if some pages failed (check `output.success` or call
    /// [`TilingOutput::into_result`]).
    ///
    /// # Errors
    /// Returns `Err(TilerError)` only for fatal errors:
    /// - invalid configuration or input file, no tiler configured
    /// - the document cannot be opened, or a page cannot be rendered
    /// - the tiler cannot be launched or waited on
    /// - the run was interrupted
    pub async fn run(&self) -> Result<TilingOutput, TilerError> {
        let total_start = Instant::now();
        let opened = stream::open(self).await?;

        let mut pages = Vec::with_capacity(opened.selected_pages);
        let mut outcomes = opened.stream;
        while let Some(outcome) = outcomes.next().await {
            pages.push(outcome?);
        }

        let output = TilingOutput::from_pages(
            pages,
            opened.document_pages,
            total_start.elapsed().as_millis() as u64,
        );

        info!(
            "Tiling complete: {}/{} pages succeeded, {}ms total",
            output.stats.succeeded_pages,
            output.stats.selected_pages,
            output.stats.total_duration_ms
        );

        if let Some(ref cb) = self.config.progress_callback {
            cb.on_job_complete(output.stats.selected_pages, output.stats.succeeded_pages);
        }

        Ok(output)
    }

    /// Synchronous wrapper around [`PdfTiler::run`].
    ///
    /// Creates a temporary tokio runtime internally.
    pub fn run_sync(&self) -> Result<TilingOutput, TilerError> {
        tokio::runtime::Runtime::new()
            .map_err(|e| TilerError::Internal(format!("Failed to create tokio runtime: {}", e)))?
            .block_on(self.run())
    }
}

/// Tile every selected page of a PDF with the default collaborators.
///
/// # Example
/// ```rust,no_run
/// use pdf2tiles::{tile_document, TilingConfig};
///
/// #[tokio::main]
/// async fn main() -> Result<(), Box<dyn std::error::Error>> {
///     let config = TilingConfig::new("plan.pdf", "tiles");
///     let output = tile_document(&config).await?;
///     if !output.success {
///         eprintln!("failed pages: {:?}", output.failed_pages());
///     }
///     Ok(())
/// }
/// ```
pub async fn tile_document(config: &TilingConfig) -> Result<TilingOutput, TilerError> {
    PdfTiler::new(config.clone()).run().await
}

/// Synchronous wrapper around [`tile_document`].
pub fn tile_document_sync(config: &TilingConfig) -> Result<TilingOutput, TilerError> {
    PdfTiler::new(config.clone()).run_sync()
}

/// Read PDF metadata without rendering or tiling anything.
///
/// Does not require a tiler executable.
pub async fn inspect(
    path: impl AsRef<Path>,
    source: PdfiumSource,
) -> Result<DocumentMetadata, TilerError> {
    let path = path.as_ref().to_path_buf();
    input::validate_source(&path)?;
    tokio::task::spawn_blocking(move || source.metadata(&path))
        .await
        .map_err(|e| TilerError::Internal(format!("metadata task failed: {e}")))?
}
