//! Orchestration tests that run without pdfium or GDAL.
//!
//! An in-memory `PageSource` stands in for the PDF and a recording
//! `ProcessRunner` stands in for gdal2tiles. The unix-only tests at the
//! bottom spawn real shell scripts through `SystemRunner`.

use futures::StreamExt;
use image::{Rgb, RgbImage};
use pdf2tiles::{
    EncoderRegistry, ExitOutcome, InterruptFlag, OutputLayout, PageError, PageRange, PageSink,
    PageSource, PdfTiler, ProcessRunner, RasterImage, RunError, TileInvocation, TilerError,
    TilingConfig, TilingConfigBuilder, TilingProgressCallback, ZoomRange,
};
use std::collections::BTreeSet;
use std::ops::Range;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tracing_subscriber::EnvFilter;

// ── Fakes ────────────────────────────────────────────────────────────────────

/// A document of `pages` blank pages. Rendering `fail_at` fails.
struct FakeDocument {
    pages: usize,
    fail_at: Option<usize>,
    rendered: Mutex<Vec<usize>>,
}

impl FakeDocument {
    fn new(pages: usize) -> Arc<Self> {
        Arc::new(Self {
            pages,
            fail_at: None,
            rendered: Mutex::new(Vec::new()),
        })
    }

    fn failing_at(pages: usize, page: usize) -> Arc<Self> {
        Arc::new(Self {
            pages,
            fail_at: Some(page),
            rendered: Mutex::new(Vec::new()),
        })
    }
}

impl PageSource for FakeDocument {
    fn page_count(&self, _path: &Path) -> Result<usize, TilerError> {
        Ok(self.pages)
    }

    fn render_pages(
        &self,
        _path: &Path,
        pages: Range<usize>,
        dpi: u32,
        sink: &mut PageSink<'_>,
    ) -> Result<(), TilerError> {
        for idx in pages {
            if self.fail_at == Some(idx) {
                return Err(TilerError::PageRenderFailed {
                    page: idx,
                    detail: "corrupt content stream".into(),
                });
            }
            self.rendered.lock().unwrap().push(idx);
            let side = (dpi / 75).max(1);
            sink(RasterImage {
                page_index: idx,
                image: RgbImage::from_pixel(side, side, Rgb([255, 255, 255])),
            })?;
        }
        Ok(())
    }
}

#[derive(Clone, Copy)]
enum Behaviour {
    /// Exit 0 and write a tile per zoom level, unless the page is listed in
    /// `failing_pages`.
    Tile,
    /// Fail to launch.
    Missing,
    /// Report an interrupt.
    Interrupted,
}

/// Records every invocation and pretends to be gdal2tiles.
struct FakeRunner {
    behaviour: Behaviour,
    failing_pages: BTreeSet<String>,
    calls: Mutex<Vec<TileInvocation>>,
    image_existed: Mutex<Vec<bool>>,
}

impl FakeRunner {
    fn ok() -> Arc<Self> {
        Self::failing(&[])
    }

    fn failing(pages: &[usize]) -> Arc<Self> {
        Arc::new(Self {
            behaviour: Behaviour::Tile,
            failing_pages: pages
                .iter()
                .map(|p| pdf2tiles::config::page_dir_name(*p))
                .collect(),
            calls: Mutex::new(Vec::new()),
            image_existed: Mutex::new(Vec::new()),
        })
    }

    fn with_behaviour(behaviour: Behaviour) -> Arc<Self> {
        Arc::new(Self {
            behaviour,
            failing_pages: BTreeSet::new(),
            calls: Mutex::new(Vec::new()),
            image_existed: Mutex::new(Vec::new()),
        })
    }

    fn calls(&self) -> Vec<TileInvocation> {
        self.calls.lock().unwrap().clone()
    }
}

impl ProcessRunner for FakeRunner {
    fn run(
        &self,
        invocation: &TileInvocation,
        _interrupt: &InterruptFlag,
    ) -> Result<ExitOutcome, RunError> {
        self.calls.lock().unwrap().push(invocation.clone());
        self.image_existed
            .lock()
            .unwrap()
            .push(invocation.input.exists());

        match self.behaviour {
            Behaviour::Missing => Err(RunError::Launch(std::io::Error::from(
                std::io::ErrorKind::NotFound,
            ))),
            Behaviour::Interrupted => Err(RunError::Interrupted),
            Behaviour::Tile => {
                let dir_name = invocation
                    .output_dir
                    .file_name()
                    .map(|n| n.to_string_lossy().into_owned())
                    .unwrap_or_default();
                if self.failing_pages.contains(&dir_name) {
                    return Ok(ExitOutcome {
                        code: Some(1),
                        timed_out: false,
                        stderr: "ERROR 4: not a supported file format\n".into(),
                    });
                }
                for z in invocation.zoom.levels() {
                    let dir = invocation.output_dir.join(z.to_string()).join("0");
                    std::fs::create_dir_all(&dir).unwrap();
                    std::fs::write(dir.join("0.png"), b"tile").unwrap();
                }
                Ok(ExitOutcome {
                    code: Some(0),
                    ..ExitOutcome::default()
                })
            }
        }
    }
}

// ── Helpers ──────────────────────────────────────────────────────────────────

struct Fixture {
    _root: tempfile::TempDir,
    source: PathBuf,
    output: PathBuf,
    temp: PathBuf,
}

/// Route pipeline logs through the test harness; `RUST_LOG` picks the level.
fn init_logging() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

fn fixture() -> Fixture {
    init_logging();
    let root = tempfile::tempdir().unwrap();
    let source = root.path().join("plan.pdf");
    std::fs::write(&source, b"%PDF-1.7\n%fake\n").unwrap();
    let temp = root.path().join("tmp");
    std::fs::create_dir_all(&temp).unwrap();
    Fixture {
        source,
        output: root.path().join("tiles"),
        temp,
        _root: root,
    }
}

fn builder(fx: &Fixture) -> TilingConfigBuilder {
    TilingConfig::builder(&fx.source, &fx.output)
        .tiler_executable("/usr/bin/gdal2tiles.py")
        .zoom(ZoomRange::new(2, 6).unwrap())
        .image_format("png")
        .dpi(150)
        .temp_dir(&fx.temp)
}

fn tiler(config: TilingConfig, doc: Arc<FakeDocument>, runner: Arc<FakeRunner>) -> PdfTiler {
    PdfTiler::new(config).with_source(doc).with_runner(runner)
}

/// Every file under `root`, relative to it.
fn file_set(root: &Path) -> BTreeSet<PathBuf> {
    fn walk(dir: &Path, root: &Path, out: &mut BTreeSet<PathBuf>) {
        for entry in std::fs::read_dir(dir).unwrap() {
            let path = entry.unwrap().path();
            if path.is_dir() {
                walk(&path, root, out);
            } else {
                out.insert(path.strip_prefix(root).unwrap().to_path_buf());
            }
        }
    }
    let mut out = BTreeSet::new();
    if root.exists() {
        walk(root, root, &mut out);
    }
    out
}

fn dir_entries(dir: &Path) -> usize {
    std::fs::read_dir(dir).map(|d| d.count()).unwrap_or(0)
}

// ── Happy path ───────────────────────────────────────────────────────────────

#[tokio::test]
async fn ten_pages_all_tile_successfully() {
    let fx = fixture();
    let config = builder(&fx).keep_images(true).build().unwrap();
    let runner = FakeRunner::ok();
    let doc = FakeDocument::new(10);

    let output = tiler(config, doc.clone(), runner.clone()).run().await.unwrap();

    assert!(output.success);
    assert_eq!(output.stats.document_pages, 10);
    assert_eq!(output.stats.selected_pages, 10);
    assert_eq!(output.stats.succeeded_pages, 10);
    assert_eq!(*doc.rendered.lock().unwrap(), (0..10).collect::<Vec<_>>());

    // One kept image per page, each handed to the tiler while it existed.
    assert_eq!(dir_entries(&fx.temp), 10);
    assert!(runner.image_existed.lock().unwrap().iter().all(|e| *e));

    // One tile tree per page, each with levels 2..=6.
    for page in 0..10 {
        let tree = fx.output.join(format!("page-{page:04}"));
        for z in 2..=6 {
            assert!(tree.join(z.to_string()).join("0/0.png").exists());
        }
        assert!(!tree.join("1").exists());
        assert!(!tree.join("7").exists());
    }

    let calls = runner.calls();
    assert_eq!(calls.len(), 10);
    let args: Vec<String> = calls[0]
        .args()
        .into_iter()
        .map(|a| a.to_string_lossy().into_owned())
        .collect();
    assert_eq!(&args[..4], ["-p", "raster", "-z", "2-6"]);
    assert!(args[4].ends_with(".png"));
    assert!(Path::new(&args[4]).is_absolute());
    assert!(args[5].ends_with("page-0000"));
}

#[tokio::test]
async fn failing_page_does_not_stop_later_pages() {
    let fx = fixture();
    let config = builder(&fx).build().unwrap();
    let runner = FakeRunner::failing(&[3]);

    let output = tiler(config, FakeDocument::new(10), runner.clone())
        .run()
        .await
        .unwrap();

    assert!(!output.success);
    assert_eq!(output.failed_pages(), vec![3]);
    assert_eq!(output.stats.succeeded_pages, 9);
    assert_eq!(runner.calls().len(), 10);

    let page3 = &output.pages[3];
    match page3.error.as_ref().unwrap() {
        PageError::TilerFailed {
            page,
            image,
            exit_code,
            stderr,
        } => {
            assert_eq!(*page, 3);
            assert_eq!(Some(image), page3.image_path.as_ref());
            assert!(image.to_string_lossy().ends_with(".png"));
            assert_eq!(*exit_code, Some(1));
            assert!(stderr.contains("ERROR 4"));
        }
        other => panic!("expected TilerFailed, got {other:?}"),
    }
    for (i, page) in output.pages.iter().enumerate() {
        assert_eq!(page.page_index, i);
        assert_eq!(page.succeeded(), i != 3);
    }

    assert!(matches!(
        output.into_result(),
        Err(TilerError::PartialFailure { ref failed_pages, total: 10 }) if failed_pages == &vec![3]
    ));
}

#[tokio::test]
async fn page_range_selects_half_open_span() {
    let fx = fixture();
    let config = builder(&fx).pages(PageRange::new(2, 5)).build().unwrap();
    let runner = FakeRunner::ok();
    let doc = FakeDocument::new(10);

    let output = tiler(config, doc.clone(), runner.clone()).run().await.unwrap();

    let pages: Vec<usize> = output.pages.iter().map(|p| p.page_index).collect();
    assert_eq!(pages, vec![2, 3, 4]);
    assert_eq!(*doc.rendered.lock().unwrap(), vec![2, 3, 4]);
    assert_eq!(output.stats.selected_pages, 3);
    assert_eq!(output.stats.document_pages, 10);

    let dirs: Vec<String> = runner
        .calls()
        .iter()
        .map(|c| c.output_dir.file_name().unwrap().to_string_lossy().into_owned())
        .collect();
    assert_eq!(dirs, ["page-0002", "page-0003", "page-0004"]);
}

#[tokio::test]
async fn empty_range_is_successful_and_tiles_nothing() {
    let fx = fixture();
    let config = builder(&fx).pages(PageRange::new(4, 4)).build().unwrap();
    let runner = FakeRunner::ok();

    let output = tiler(config, FakeDocument::new(10), runner.clone())
        .run()
        .await
        .unwrap();

    assert!(output.success);
    assert!(output.pages.is_empty());
    assert!(runner.calls().is_empty());
}

// ── Page-level failures ──────────────────────────────────────────────────────

#[tokio::test]
async fn unknown_format_fails_every_page_without_running_tiler() {
    let fx = fixture();
    let config = builder(&fx).image_format("webp").build().unwrap();
    let runner = FakeRunner::ok();

    let output = tiler(config, FakeDocument::new(10), runner.clone())
        .run()
        .await
        .unwrap();

    assert!(!output.success);
    assert_eq!(output.pages.len(), 10);
    assert_eq!(output.failed_pages(), (0..10).collect::<Vec<_>>());
    assert!(output.pages.iter().all(|p| matches!(
        p.error,
        Some(PageError::EncoderNotFound { ref format, .. }) if format == "webp"
    )));
    assert!(output.pages.iter().all(|p| p.image_path.is_none()));
    assert!(runner.calls().is_empty());
}

#[tokio::test]
async fn custom_registry_is_used() {
    let fx = fixture();
    let config = builder(&fx).image_format("jpg").build().unwrap();
    let runner = FakeRunner::ok();

    let output = tiler(config, FakeDocument::new(2), runner.clone())
        .with_encoders(EncoderRegistry::new())
        .run()
        .await
        .unwrap();

    assert!(!output.success);
    assert!(runner.calls().is_empty());
}

// ── Fatal failures ───────────────────────────────────────────────────────────

#[tokio::test]
async fn render_failure_is_fatal() {
    let fx = fixture();
    let config = builder(&fx).build().unwrap();

    let err = tiler(config, FakeDocument::failing_at(10, 4), FakeRunner::ok())
        .run()
        .await
        .unwrap_err();

    assert!(
        matches!(err, TilerError::PageRenderFailed { page: 4, .. }),
        "got {err:?}"
    );
}

#[tokio::test]
async fn stream_yields_pages_before_render_failure() {
    let fx = fixture();
    let config = builder(&fx).build().unwrap();

    let items: Vec<_> = tiler(config, FakeDocument::failing_at(10, 4), FakeRunner::ok())
        .stream()
        .await
        .unwrap()
        .collect()
        .await;

    let (last, pages) = items.split_last().unwrap();
    assert!(matches!(last, Err(TilerError::PageRenderFailed { page: 4, .. })));
    let ok: Vec<usize> = pages
        .iter()
        .map(|p| p.as_ref().unwrap().page_index)
        .collect();
    assert_eq!(ok, vec![0, 1, 2, 3]);
}

#[tokio::test]
async fn launch_failure_is_fatal() {
    let fx = fixture();
    let config = builder(&fx).build().unwrap();

    let err = tiler(
        config,
        FakeDocument::new(3),
        FakeRunner::with_behaviour(Behaviour::Missing),
    )
    .run()
    .await
    .unwrap_err();

    match err {
        TilerError::TileProcessLaunch { executable, .. } => {
            assert_eq!(executable, PathBuf::from("/usr/bin/gdal2tiles.py"))
        }
        other => panic!("expected TileProcessLaunch, got {other:?}"),
    }
}

#[tokio::test]
async fn interrupted_tiler_is_fatal() {
    let fx = fixture();
    let config = builder(&fx).build().unwrap();

    let err = tiler(
        config,
        FakeDocument::new(3),
        FakeRunner::with_behaviour(Behaviour::Interrupted),
    )
    .run()
    .await
    .unwrap_err();

    assert!(matches!(err, TilerError::Interrupted { page: 0 }));
}

#[tokio::test]
async fn raised_interrupt_stops_rendering() {
    let fx = fixture();
    let config = builder(&fx).build().unwrap();
    let flag = InterruptFlag::new();
    flag.interrupt();
    let runner = FakeRunner::ok();

    let err = tiler(config, FakeDocument::new(5), runner.clone())
        .with_interrupt(flag)
        .run()
        .await
        .unwrap_err();

    assert!(matches!(err, TilerError::Interrupted { page: 0 }));
    assert!(runner.calls().is_empty());
}

#[tokio::test]
async fn range_beyond_document_is_rejected() {
    let fx = fixture();
    let config = builder(&fx).pages(PageRange::new(8, 12)).build().unwrap();

    let err = tiler(config, FakeDocument::new(10), FakeRunner::ok())
        .run()
        .await
        .unwrap_err();

    assert!(matches!(
        err,
        TilerError::PageRangeOutOfBounds {
            start: 8,
            end: 12,
            page_count: 10
        }
    ));
}

#[tokio::test]
async fn missing_tiler_is_rejected_before_rendering() {
    let fx = fixture();
    let config = TilingConfig::builder(&fx.source, &fx.output).build().unwrap();
    let doc = FakeDocument::new(3);

    let err = tiler(config, doc.clone(), FakeRunner::ok())
        .run()
        .await
        .unwrap_err();

    assert!(matches!(err, TilerError::TilerNotConfigured));
    assert!(doc.rendered.lock().unwrap().is_empty());
}

#[tokio::test]
async fn non_pdf_source_is_rejected() {
    let fx = fixture();
    std::fs::write(&fx.source, b"GIF89a").unwrap();
    let config = builder(&fx).build().unwrap();

    let err = tiler(config, FakeDocument::new(3), FakeRunner::ok())
        .run()
        .await
        .unwrap_err();

    assert!(matches!(err, TilerError::NotAPdf { .. }));
}

#[tokio::test]
async fn config_mutated_after_build_is_revalidated() {
    let fx = fixture();
    let mut config = builder(&fx).build().unwrap();
    config.concurrency = 0;

    let err = tiler(config, FakeDocument::new(3), FakeRunner::ok())
        .run()
        .await
        .unwrap_err();

    assert!(matches!(err, TilerError::InvalidConfig(_)));
}

// ── Concurrency, cleanup, determinism ────────────────────────────────────────

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_run_matches_sequential_result() {
    let fx = fixture();
    let config = builder(&fx).concurrency(4).build().unwrap();
    let runner = FakeRunner::failing(&[3, 7]);

    let output = tiler(config, FakeDocument::new(12), runner.clone())
        .run()
        .await
        .unwrap();

    let order: Vec<usize> = output.pages.iter().map(|p| p.page_index).collect();
    assert_eq!(order, (0..12).collect::<Vec<_>>());
    assert_eq!(output.failed_pages(), vec![3, 7]);
    assert_eq!(runner.calls().len(), 12);

    let images: BTreeSet<PathBuf> = runner.calls().into_iter().map(|c| c.input).collect();
    assert_eq!(images.len(), 12, "every page gets its own image file");
}

#[tokio::test]
async fn intermediate_images_are_deleted_by_default() {
    let fx = fixture();
    let config = builder(&fx).build().unwrap();
    let runner = FakeRunner::failing(&[1]);

    let output = tiler(config, FakeDocument::new(4), runner.clone())
        .run()
        .await
        .unwrap();

    assert!(runner.image_existed.lock().unwrap().iter().all(|e| *e));
    assert_eq!(dir_entries(&fx.temp), 0);
    for page in &output.pages {
        let image = page.image_path.as_ref().unwrap();
        assert!(!image.exists(), "{} should be gone", image.display());
    }
}

#[tokio::test]
async fn repeated_runs_produce_identical_tile_trees() {
    let first = fixture();
    let second = fixture();

    for fx in [&first, &second] {
        let config = builder(fx).build().unwrap();
        tiler(config, FakeDocument::new(5), FakeRunner::ok())
            .run()
            .await
            .unwrap();
    }

    let a = file_set(&first.output);
    assert_eq!(a.len(), 5 * 5);
    assert_eq!(a, file_set(&second.output));
}

#[tokio::test]
async fn shared_layout_tiles_into_output_root() {
    let fx = fixture();
    let config = builder(&fx)
        .layout(OutputLayout::Shared)
        .build()
        .unwrap();
    let runner = FakeRunner::ok();

    let output = tiler(config, FakeDocument::new(3), runner.clone())
        .run()
        .await
        .unwrap();

    assert!(output.success);
    assert!(runner.calls().iter().all(|c| c.output_dir == fx.output));
    assert!(output.pages.iter().all(|p| p.tiles_dir == fx.output));
    assert!(fx.output.join("2/0/0.png").exists());
}

// ── Progress events ──────────────────────────────────────────────────────────

#[derive(Default)]
struct Counting {
    job_total: AtomicUsize,
    started: AtomicUsize,
    completed: AtomicUsize,
    failed: Mutex<Vec<usize>>,
    final_success: AtomicUsize,
}

impl TilingProgressCallback for Counting {
    fn on_job_start(&self, total_pages: usize) {
        self.job_total.store(total_pages, Ordering::SeqCst);
    }
    fn on_page_start(&self, _page_index: usize, _total_pages: usize) {
        self.started.fetch_add(1, Ordering::SeqCst);
    }
    fn on_page_complete(&self, _page_index: usize, _total_pages: usize) {
        self.completed.fetch_add(1, Ordering::SeqCst);
    }
    fn on_page_error(&self, page_index: usize, _total_pages: usize, error: String) {
        assert!(error.contains(&format!("Page {page_index}")));
        self.failed.lock().unwrap().push(page_index);
    }
    fn on_job_complete(&self, _total_pages: usize, success_count: usize) {
        self.final_success.store(success_count, Ordering::SeqCst);
    }
}

#[tokio::test]
async fn progress_callback_sees_every_page() {
    let fx = fixture();
    let counting = Arc::new(Counting::default());
    let config = builder(&fx)
        .pages(PageRange::starting_at(1))
        .progress_callback(counting.clone())
        .build()
        .unwrap();

    tiler(config, FakeDocument::new(6), FakeRunner::failing(&[2]))
        .run()
        .await
        .unwrap();

    assert_eq!(counting.job_total.load(Ordering::SeqCst), 5);
    assert_eq!(counting.started.load(Ordering::SeqCst), 5);
    assert_eq!(counting.completed.load(Ordering::SeqCst), 4);
    assert_eq!(*counting.failed.lock().unwrap(), vec![2]);
    assert_eq!(counting.final_success.load(Ordering::SeqCst), 4);
}

// ── Real processes ───────────────────────────────────────────────────────────

#[cfg(unix)]
mod real_processes {
    use super::*;
    use std::os::unix::fs::PermissionsExt;

    fn script(dir: &Path, name: &str, body: &str) -> PathBuf {
        let path = dir.join(name);
        std::fs::write(&path, format!("#!/bin/sh\n{body}\n")).unwrap();
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
        path
    }

    #[tokio::test]
    async fn zero_exit_means_success() {
        let fx = fixture();
        let ok = script(&fx.temp, "tiler-ok", "exit 0");
        let config = builder(&fx)
            .tiler_executable(ok)
            .temp_dir(fx.output.parent().unwrap())
            .build()
            .unwrap();

        let output = PdfTiler::new(config)
            .with_source(FakeDocument::new(3))
            .run()
            .await
            .unwrap();

        assert!(output.success);
        assert_eq!(output.stats.succeeded_pages, 3);
    }

    #[tokio::test]
    async fn non_zero_exit_marks_page_failed() {
        let fx = fixture();
        let failing = script(&fx.temp, "tiler-fail", "echo boom >&2\nexit 2");
        let config = builder(&fx)
            .tiler_executable(failing)
            .temp_dir(fx.output.parent().unwrap())
            .build()
            .unwrap();

        let output = PdfTiler::new(config)
            .with_source(FakeDocument::new(2))
            .run()
            .await
            .unwrap();

        assert!(!output.success);
        assert_eq!(output.failed_pages(), vec![0, 1]);
        assert!(matches!(
            output.pages[0].error,
            Some(PageError::TilerFailed {
                exit_code: Some(2),
                ref stderr,
                ..
            }) if stderr.contains("boom")
        ));
    }

    #[tokio::test]
    async fn slow_tiler_times_out_as_page_failure() {
        let fx = fixture();
        let slow = script(&fx.temp, "tiler-slow", "exec sleep 30");
        let config = builder(&fx)
            .tiler_executable(slow)
            .tiler_timeout_secs(1)
            .temp_dir(fx.output.parent().unwrap())
            .build()
            .unwrap();

        let output = PdfTiler::new(config)
            .with_source(FakeDocument::new(1))
            .run()
            .await
            .unwrap();

        assert!(!output.success);
        assert!(matches!(
            output.pages[0].error,
            Some(PageError::TilerTimedOut { page: 0, secs: 1, .. })
        ));
    }

    #[tokio::test]
    async fn missing_executable_is_launch_failure() {
        let fx = fixture();
        let config = builder(&fx)
            .tiler_executable(fx.temp.join("no-such-gdal2tiles"))
            .build()
            .unwrap();

        let err = PdfTiler::new(config)
            .with_source(FakeDocument::new(1))
            .run()
            .await
            .unwrap_err();

        assert!(matches!(err, TilerError::TileProcessLaunch { .. }));
    }
}
