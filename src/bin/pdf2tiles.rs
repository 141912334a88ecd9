//! CLI binary for pdf2tiles.
//!
//! A thin shim over the library crate that maps CLI flags
//! to `TilingConfig`, runs the job and prints results.

use anyhow::{Context, Result};
use clap::Parser;
use indicatif::{ProgressBar, ProgressStyle};
use pdf2tiles::{
    inspect, InterruptFlag, OutputLayout, PageRange, PdfTiler, PdfiumSource, ProgressCallback,
    TilerError, TilerLocator, TilingConfig, TilingOutput, TilingProgressCallback, ZoomRange,
};
use std::collections::HashMap;
use std::io;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tracing_subscriber::EnvFilter;

/// Exit status when the run was cancelled with Ctrl-C.
const EXIT_INTERRUPTED: u8 = 130;

// ── ANSI colour helpers (no extra deps) ──────────────────────────────────────

fn green(s: &str) -> String {
    format!("\x1b[32m{s}\x1b[0m")
}
fn red(s: &str) -> String {
    format!("\x1b[31m{s}\x1b[0m")
}
fn dim(s: &str) -> String {
    format!("\x1b[2m{s}\x1b[0m")
}
fn bold(s: &str) -> String {
    format!("\x1b[1m{s}\x1b[0m")
}
fn cyan(s: &str) -> String {
    format!("\x1b[36m{s}\x1b[0m")
}

const SPINNER: &[&str] = &["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏", "⠿"];

// ── CLI progress callback using indicatif ────────────────────────────────────

/// Live progress bar plus one log line per finished page. Pages may finish
/// out of order when `--concurrency` > 1.
struct CliProgressCallback {
    bar: ProgressBar,
    start_times: Mutex<HashMap<usize, Instant>>,
    errors: AtomicUsize,
}

impl CliProgressCallback {
    /// Spinner until `on_job_start` tells us the page count.
    fn new_dynamic() -> Arc<Self> {
        let bar = ProgressBar::new(0);
        let spinner_style = ProgressStyle::with_template("{spinner:.cyan} {prefix:.bold}  {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner())
            .tick_strings(SPINNER);

        bar.set_style(spinner_style);
        bar.set_prefix("Preparing");
        bar.set_message("Opening PDF…");
        bar.enable_steady_tick(Duration::from_millis(80));

        Arc::new(Self {
            bar,
            start_times: Mutex::new(HashMap::new()),
            errors: AtomicUsize::new(0),
        })
    }

    fn activate_bar(&self, total: usize) {
        let progress_style = ProgressStyle::with_template(
            "{spinner:.cyan} {prefix:.bold}  \
             [{bar:42.green/238}] {pos:>3}/{len} pages  \
             ⏱ {elapsed_precise}  ETA {eta_precise}",
        )
        .unwrap_or_else(|_| ProgressStyle::default_bar())
        .progress_chars("█▉▊▋▌▍▎▏  ")
        .tick_strings(SPINNER);

        self.bar.set_length(total as u64);
        self.bar.set_style(progress_style);
        self.bar.set_prefix("Tiling");
        self.bar.reset_eta();
    }

    fn elapsed_secs(&self, page_index: usize) -> f64 {
        self.start_times
            .lock()
            .ok()
            .and_then(|mut m| m.remove(&page_index))
            .map(|t| t.elapsed().as_secs_f64())
            .unwrap_or(0.0)
    }
}

impl TilingProgressCallback for CliProgressCallback {
    fn on_job_start(&self, total_pages: usize) {
        self.activate_bar(total_pages);
        self.bar.println(format!(
            "{} {}",
            cyan("◆"),
            bold(&format!("Tiling {total_pages} pages…"))
        ));
    }

    fn on_page_start(&self, page_index: usize, _total: usize) {
        if let Ok(mut m) = self.start_times.lock() {
            m.insert(page_index, Instant::now());
        }
        self.bar.set_message(format!("page {page_index}"));
    }

    fn on_page_complete(&self, page_index: usize, total: usize) {
        let secs = self.elapsed_secs(page_index);
        self.bar.println(format!(
            "  {} Page {:>3}/{:<3}  {}",
            green("✓"),
            page_index,
            total,
            dim(&format!("{secs:.1}s")),
        ));
        self.bar.inc(1);
    }

    fn on_page_error(&self, page_index: usize, total: usize, error: String) {
        let secs = self.elapsed_secs(page_index);
        self.errors.fetch_add(1, Ordering::SeqCst);

        let msg = if error.chars().count() > 80 {
            format!("{}\u{2026}", error.chars().take(79).collect::<String>())
        } else {
            error
        };

        self.bar.println(format!(
            "  {} Page {:>3}/{:<3}  {}  {}",
            red("✗"),
            page_index,
            total,
            red(&msg),
            dim(&format!("{secs:.1}s")),
        ));
        self.bar.inc(1);
    }

    fn on_job_complete(&self, total_pages: usize, success_count: usize) {
        let failed = total_pages.saturating_sub(success_count);
        self.bar.finish_and_clear();

        if failed == 0 {
            eprintln!(
                "{} {} pages tiled successfully",
                green("✔"),
                bold(&success_count.to_string())
            );
        } else {
            eprintln!(
                "{} {}/{} pages tiled  ({} failed)",
                if failed == total_pages {
                    red("✘")
                } else {
                    cyan("⚠")
                },
                bold(&success_count.to_string()),
                total_pages,
                red(&failed.to_string()),
            );
        }
    }
}

const AFTER_HELP: &str = r#"EXAMPLES:
  # Tile every page, zoom 1-8, via JPEG (defaults)
  pdf2tiles plan.pdf tiles/

  # Zoom 2-6 from PNG intermediates, pages 2, 3 and 4 only
  pdf2tiles --zoom 2-6 --format png --pages 2..5 plan.pdf tiles/

  # Four pages at a time, kill any gdal2tiles that runs over 10 minutes
  pdf2tiles -c 4 --timeout 600 atlas.pdf tiles/

  # Explicit tiler location
  pdf2tiles --tiler /opt/gdal/bin/gdal2tiles.py plan.pdf tiles/

  # Inspect PDF metadata (no tiler needed)
  pdf2tiles --inspect-only plan.pdf

  # JSON summary of every page outcome
  pdf2tiles --json plan.pdf tiles/ > run.json

OUTPUT LAYOUT:
  tiles/page-0000/<z>/<x>/<y>.png   one tree per page (default)
  tiles/<z>/<x>/<y>.png             --shared-output, later pages overwrite

PAGES:
  Page indices are 0-based and half-open: 2..5 means pages 2, 3 and 4.
  Also accepted: 2.. (to the end), ..5, .. or all, and 3 (just page 3).

EXIT STATUS:
  0    every selected page was tiled
  1    at least one page failed, or the run could not start
  130  interrupted with Ctrl-C

ENVIRONMENT VARIABLES:
  PDF2TILES_TILER   Path to gdal2tiles(.py)
  PDFIUM_LIB_PATH   Path to an existing libpdfium
  RUST_LOG          Override log filter (e.g. pdf2tiles=debug)
"#;

/// Rasterise PDF pages and tile each one with gdal2tiles.
#[derive(Parser, Debug)]
#[command(
    name = "pdf2tiles",
    version,
    about = "Rasterise PDF pages and tile each one with gdal2tiles",
    long_about = "Render every selected page of a PDF at high resolution, write it to a temporary \
image, and run gdal2tiles in raster profile on it. Produces one slippy-map tile pyramid per page. \
A page whose tiler fails is reported and the remaining pages are still processed.",
    arg_required_else_help = true,
    color = clap::ColorChoice::Auto,
    after_long_help = AFTER_HELP
)]
struct Cli {
    /// Source PDF file.
    input: PathBuf,

    /// Directory for the tile trees (created if missing).
    #[arg(required_unless_present = "inspect_only")]
    output_dir: Option<PathBuf>,

    /// gdal2tiles executable. Discovered from well-known locations when unset.
    #[arg(long, env = "PDF2TILES_TILER")]
    tiler: Option<PathBuf>,

    /// Zoom levels, inclusive: 2-6, or a single level.
    #[arg(long, env = "PDF2TILES_ZOOM", default_value = "1-8")]
    zoom: ZoomRange,

    /// Pages, 0-based half-open: all, 3, 2..5, 2.., ..5.
    #[arg(long, env = "PDF2TILES_PAGES", default_value = "all")]
    pages: PageRange,

    /// Intermediate image format: jpg, png, tif, bmp.
    #[arg(long, env = "PDF2TILES_FORMAT", default_value = "jpg")]
    format: String,

    /// Rendering DPI.
    #[arg(long, env = "PDF2TILES_DPI", default_value_t = 600,
          value_parser = clap::value_parser!(u32).range(1..=2400))]
    dpi: u32,

    /// Pages encoded and tiled at the same time.
    #[arg(short, long, env = "PDF2TILES_CONCURRENCY", default_value_t = 1)]
    concurrency: usize,

    /// Kill a gdal2tiles run after this many seconds (page is marked failed).
    #[arg(long, env = "PDF2TILES_TIMEOUT")]
    timeout: Option<u64>,

    /// Keep the intermediate page images.
    #[arg(long, env = "PDF2TILES_KEEP_IMAGES")]
    keep_images: bool,

    /// Directory for intermediate page images.
    #[arg(long, env = "PDF2TILES_TEMP_DIR")]
    temp_dir: Option<PathBuf>,

    /// Tile every page into OUTPUT_DIR itself instead of page-NNNN subdirectories.
    #[arg(long, env = "PDF2TILES_SHARED_OUTPUT")]
    shared_output: bool,

    /// PDF user password for encrypted documents.
    #[arg(long, env = "PDF2TILES_PASSWORD")]
    password: Option<String>,

    /// Path to the pdfium shared library.
    #[arg(long, env = "PDFIUM_LIB_PATH")]
    pdfium_lib: Option<PathBuf>,

    /// Print the run result (or metadata) as JSON on stdout.
    #[arg(long, env = "PDF2TILES_JSON")]
    json: bool,

    /// Disable progress bar.
    #[arg(long, env = "PDF2TILES_NO_PROGRESS")]
    no_progress: bool,

    /// Print PDF metadata only, no tiling.
    #[arg(long)]
    inspect_only: bool,

    /// Enable DEBUG-level tracing logs.
    #[arg(short, long, env = "PDF2TILES_VERBOSE")]
    verbose: bool,

    /// Suppress all output except errors.
    #[arg(short, long, env = "PDF2TILES_QUIET")]
    quiet: bool,
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    let cli = Cli::parse();

    // ── Logging setup ────────────────────────────────────────────────────
    // The progress bar replaces INFO-level logs; -v brings them back.
    let show_progress = !cli.quiet && !cli.no_progress && !cli.json && !cli.inspect_only;
    let filter = if cli.verbose {
        "debug"
    } else if cli.quiet || show_progress {
        "error"
    } else {
        "info"
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)),
        )
        .with_writer(io::stderr)
        .init();

    // ── Inspect-only mode ────────────────────────────────────────────────
    if cli.inspect_only {
        let source = PdfiumSource::new(cli.pdfium_lib.clone(), cli.password.clone());
        let meta = inspect(&cli.input, source)
            .await
            .context("Failed to inspect PDF")?;

        if cli.json {
            println!(
                "{}",
                serde_json::to_string_pretty(&meta).context("Failed to serialize metadata")?
            );
        } else {
            println!("File:         {}", cli.input.display());
            if let Some(ref t) = meta.title {
                println!("Title:        {}", t);
            }
            if let Some(ref a) = meta.author {
                println!("Author:       {}", a);
            }
            if let Some(ref s) = meta.subject {
                println!("Subject:      {}", s);
            }
            println!("Pages:        {}", meta.page_count);
            println!("PDF Version:  {}", meta.pdf_version);
            if let Some(ref p) = meta.producer {
                println!("Producer:     {}", p);
            }
            if let Some(ref c) = meta.creator {
                println!("Creator:      {}", c);
            }
        }
        return Ok(ExitCode::SUCCESS);
    }

    // ── Build config ─────────────────────────────────────────────────────
    let progress_cb: Option<ProgressCallback> = if show_progress {
        let cb = CliProgressCallback::new_dynamic();
        Some(cb as Arc<dyn TilingProgressCallback>)
    } else {
        None
    };

    let config = build_config(&cli, progress_cb)?;

    // ── Ctrl-C ───────────────────────────────────────────────────────────
    let interrupt = InterruptFlag::new();
    {
        let interrupt = interrupt.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                tracing::warn!("Interrupt received; stopping after killing running tilers");
                interrupt.interrupt();
            }
        });
    }

    // ── Run ──────────────────────────────────────────────────────────────
    let tiler = PdfTiler::new(config).with_interrupt(interrupt);
    let output = match tiler.run().await {
        Ok(output) => output,
        Err(TilerError::Interrupted { page }) => {
            eprintln!("{} interrupted while processing page {page}", red("✘"));
            return Ok(ExitCode::from(EXIT_INTERRUPTED));
        }
        Err(e) => return Err(e).context("Tiling failed"),
    };

    if cli.json {
        let json = serde_json::to_string_pretty(&output).context("Failed to serialise output")?;
        println!("{json}");
    }

    if !cli.quiet && !show_progress && !cli.json {
        print_summary(&output);
    }

    Ok(if output.success {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    })
}

/// Plain summary for runs without the progress bar.
fn print_summary(output: &TilingOutput) {
    eprintln!(
        "Tiled {}/{} pages in {}ms",
        output.stats.succeeded_pages, output.stats.selected_pages, output.stats.total_duration_ms
    );
    for page in output.pages.iter().filter(|p| !p.succeeded()) {
        if let Some(ref e) = page.error {
            eprintln!("  {} {}", red("✗"), e);
        }
    }
}

/// Map CLI args to `TilingConfig`.
fn build_config(cli: &Cli, progress: Option<ProgressCallback>) -> Result<TilingConfig> {
    let output_dir = cli
        .output_dir
        .clone()
        .context("OUTPUT_DIR is required unless --inspect-only is given")?;

    let tiler = match cli.tiler {
        Some(ref path) => Some(path.clone()),
        None => TilerLocator::default().locate(),
    };

    let mut builder = TilingConfig::builder(&cli.input, output_dir)
        .zoom(cli.zoom)
        .pages(cli.pages)
        .image_format(cli.format.clone())
        .dpi(cli.dpi)
        .concurrency(cli.concurrency)
        .keep_images(cli.keep_images);

    if let Some(path) = tiler {
        builder = builder.tiler_executable(path);
    }
    if let Some(secs) = cli.timeout {
        builder = builder.tiler_timeout_secs(secs);
    }
    if let Some(ref dir) = cli.temp_dir {
        builder = builder.temp_dir(dir);
    }
    if cli.shared_output {
        builder = builder.layout(OutputLayout::Shared);
    }
    if let Some(ref pwd) = cli.password {
        builder = builder.password(pwd);
    }
    if let Some(ref lib) = cli.pdfium_lib {
        builder = builder.pdfium_library(lib);
    }
    if let Some(cb) = progress {
        builder = builder.progress_callback(cb);
    }

    builder.build().context("Invalid configuration")
}
