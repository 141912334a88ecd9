//! PDF rasterisation: render a page range to RGB bitmaps via pdfium.
//!
//! [`PageSource`] is the seam between the pipeline and the document
//! library. The pipeline asks for the page count, resolves the configured
//! range, then asks for those pages in ascending order. Each bitmap is
//! handed to a sink as soon as it exists, so at 600 DPI only a few pages are
//! ever resident.
//!
//! pdfium is not async-safe and keeps global state, so all calls happen on a
//! single blocking thread (`spawn_blocking` in the orchestrator).

use crate::error::TilerError;
use crate::output::DocumentMetadata;
use image::RgbImage;
use pdfium_render::prelude::*;
use std::ops::Range;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// PDF points per inch; pdfium renders 1 pt = 1 px at scale 1.0.
const POINTS_PER_INCH: f32 = 72.0;

/// One rendered page. Full colour, no alpha: tiles are opaque.
#[derive(Debug, Clone)]
pub struct RasterImage {
    /// 0-based page index in the source document.
    pub page_index: usize,
    pub image: RgbImage,
}

/// Sink receiving rendered pages in order. Returning `Err` stops rendering.
pub type PageSink<'a> = dyn FnMut(RasterImage) -> Result<(), TilerError> + 'a;

/// A paginated document that can be rasterised.
pub trait PageSource: Send + Sync {
    /// Open the document and report how many pages it has.
    fn page_count(&self, path: &Path) -> Result<usize, TilerError>;

    /// Render every page in `pages`, ascending, at `dpi`, handing each image
    /// to `sink` before rendering the next. The first failure aborts.
    fn render_pages(
        &self,
        path: &Path,
        pages: Range<usize>,
        dpi: u32,
        sink: &mut PageSink<'_>,
    ) -> Result<(), TilerError>;
}

/// [`PageSource`] backed by the pdfium library.
#[derive(Debug, Clone, Default)]
pub struct PdfiumSource {
    library: Option<PathBuf>,
    password: Option<String>,
}

impl PdfiumSource {
    /// `library` overrides pdfium discovery; `password` unlocks encrypted PDFs.
    pub fn new(library: Option<PathBuf>, password: Option<String>) -> Self {
        Self { library, password }
    }

    /// Read document metadata without rendering anything.
    pub fn metadata(&self, path: &Path) -> Result<DocumentMetadata, TilerError> {
        let pdfium = bind_pdfium(self.library.as_deref())?;
        let document = self.load(&pdfium, path)?;

        let metadata = document.metadata();
        let get_meta = |tag: PdfDocumentMetadataTagType| -> Option<String> {
            metadata.get(tag).and_then(|t| {
                let v = t.value().to_string();
                if v.is_empty() {
                    None
                } else {
                    Some(v)
                }
            })
        };

        Ok(DocumentMetadata {
            title: get_meta(PdfDocumentMetadataTagType::Title),
            author: get_meta(PdfDocumentMetadataTagType::Author),
            subject: get_meta(PdfDocumentMetadataTagType::Subject),
            creator: get_meta(PdfDocumentMetadataTagType::Creator),
            producer: get_meta(PdfDocumentMetadataTagType::Producer),
            page_count: document.pages().len() as usize,
            pdf_version: format!("{:?}", document.version()),
        })
    }

    fn load<'a>(&'a self, pdfium: &'a Pdfium, path: &Path) -> Result<PdfDocument<'a>, TilerError> {
        let password = self.password.as_deref();
        pdfium.load_pdf_from_file(path, password).map_err(|e| {
            let err_str = format!("{:?}", e);
            if err_str.contains("Password") || err_str.contains("password") {
                if password.is_some() {
                    TilerError::WrongPassword {
                        path: path.to_path_buf(),
                    }
                } else {
                    TilerError::PasswordRequired {
                        path: path.to_path_buf(),
                    }
                }
            } else {
                TilerError::DocumentOpen {
                    path: path.to_path_buf(),
                    detail: err_str,
                }
            }
        })
    }
}

impl PageSource for PdfiumSource {
    fn page_count(&self, path: &Path) -> Result<usize, TilerError> {
        let pdfium = bind_pdfium(self.library.as_deref())?;
        let document = self.load(&pdfium, path)?;
        let total = document.pages().len() as usize;
        info!("PDF loaded: {} pages", total);
        Ok(total)
    }

    fn render_pages(
        &self,
        path: &Path,
        pages: Range<usize>,
        dpi: u32,
        sink: &mut PageSink<'_>,
    ) -> Result<(), TilerError> {
        let pdfium = bind_pdfium(self.library.as_deref())?;
        let document = self.load(&pdfium, path)?;
        let doc_pages = document.pages();

        let render_config =
            PdfRenderConfig::new().scale_page_by_factor(dpi as f32 / POINTS_PER_INCH);

        for idx in pages {
            let page = doc_pages
                .get(idx as u16)
                .map_err(|e| TilerError::PageRenderFailed {
                    page: idx,
                    detail: format!("{:?}", e),
                })?;

            let bitmap = page.render_with_config(&render_config).map_err(|e| {
                TilerError::PageRenderFailed {
                    page: idx,
                    detail: format!("{:?}", e),
                }
            })?;

            let image = bitmap.as_image().into_rgb8();
            debug!(
                "Rendered page {} at {} DPI → {}x{} px",
                idx,
                dpi,
                image.width(),
                image.height()
            );

            sink(RasterImage {
                page_index: idx,
                image,
            })?;
        }

        Ok(())
    }
}

/// Bind pdfium: explicit library first, then `./`, then the system library.
fn bind_pdfium(library: Option<&Path>) -> Result<Pdfium, TilerError> {
    let bindings = match library {
        Some(path) => Pdfium::bind_to_library(path),
        None => Pdfium::bind_to_library(Pdfium::pdfium_platform_library_name_at_path("./"))
            .or_else(|_| Pdfium::bind_to_system_library()),
    }
    .map_err(|e| TilerError::PdfiumBindingFailed(format!("{:?}", e)))?;

    Ok(Pdfium::new(bindings))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn binding_a_missing_library_reports_binding_failure() {
        let dir = tempfile::tempdir().unwrap();
        let bogus = dir.path().join("libpdfium-does-not-exist.so");
        let source = PdfiumSource::new(Some(bogus), None);
        let err = source.page_count(Path::new("whatever.pdf")).unwrap_err();
        assert!(
            matches!(err, TilerError::PdfiumBindingFailed(_)),
            "got {err:?}"
        );
    }

    #[test]
    fn sink_error_type_accepts_closures() {
        let mut seen = Vec::new();
        {
            let sink: &mut PageSink<'_> = &mut |img: RasterImage| {
                seen.push(img.page_index);
                Ok(())
            };
            sink(RasterImage {
                page_index: 4,
                image: RgbImage::new(1, 1),
            })
            .unwrap();
        }
        assert_eq!(seen, vec![4]);
    }
}
