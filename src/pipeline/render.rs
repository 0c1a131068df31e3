//! PDF rasterisation: open a document once and render pages to `DynamicImage`.
//!
//! ## Why a scoped `with_document` instead of returning a handle?
//!
//! A pdfium `PdfDocument` borrows the `Pdfium` binding it was loaded with and
//! the byte slice it was loaded from. Handing the open document to a closure
//! keeps all three on one stack frame, so the handle is closed on every exit
//! path (success, page failure, early abort) simply by returning.
//!
//! ## Why bind per job?
//!
//! Without pdfium-render's `sync` feature a `Pdfium` is neither `Send` nor
//! `Sync`. Binding inside the blocking task lets the rasterizer itself be
//! shared across workers while each job owns its own binding.

use crate::error::ConvertError;
use crate::pipeline::input::SourcePdf;
use image::{DynamicImage, Rgb, RgbImage};
use pdfium_render::prelude::*;
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use tracing::{debug, info};

/// An open PDF, valid for the duration of one [`Rasterizer::with_document`] call.
pub trait RasterDocument {
    fn page_count(&self) -> usize;

    /// Render a zero-based page at a uniform zoom factor.
    fn render_page(&self, page_index: usize, scale: f32) -> Result<DynamicImage, ConvertError>;
}

/// A PDF decoding engine.
pub trait Rasterizer: Send + Sync {
    /// Open `pdf` and run `job` against it. The document is released before
    /// this returns, whatever `job` returned.
    fn with_document(
        &self,
        pdf: &SourcePdf,
        job: &mut dyn FnMut(&dyn RasterDocument) -> Result<(), ConvertError>,
    ) -> Result<(), ConvertError>;
}

/// Open `pdf`, render one page and release the document.
pub fn render_page(
    rasterizer: &dyn Rasterizer,
    pdf: &SourcePdf,
    page_index: usize,
    scale: f32,
) -> Result<DynamicImage, ConvertError> {
    let mut rendered = None;
    rasterizer.with_document(pdf, &mut |doc: &dyn RasterDocument| {
        rendered = Some(doc.render_page(page_index, scale)?);
        Ok(())
    })?;
    rendered.ok_or_else(|| ConvertError::Internal("render produced no image".into()))
}

/// Number of pages in `pdf`.
pub fn page_count(rasterizer: &dyn Rasterizer, pdf: &SourcePdf) -> Result<usize, ConvertError> {
    let mut count = 0;
    rasterizer.with_document(pdf, &mut |doc: &dyn RasterDocument| {
        count = doc.page_count();
        Ok(())
    })?;
    Ok(count)
}

// ── pdfium ───────────────────────────────────────────────────────────────

/// [`Rasterizer`] backed by the pdfium library.
#[derive(Debug, Clone, Default)]
pub struct PdfiumRasterizer {
    library: Option<PathBuf>,
}

impl PdfiumRasterizer {
    /// `library` may name the shared library itself or the directory holding
    /// it. `None` consults `PDFIUM_LIB_PATH`, then the system library.
    pub fn new(library: Option<PathBuf>) -> Self {
        Self { library }
    }

    /// Bind once to fail fast on a missing library.
    pub fn probe(&self) -> Result<(), ConvertError> {
        self.bind().map(|_| ())
    }

    fn bind(&self) -> Result<Pdfium, ConvertError> {
        let explicit = self.library.clone().or_else(|| {
            std::env::var("PDFIUM_LIB_PATH")
                .ok()
                .filter(|p| !p.is_empty())
                .map(PathBuf::from)
        });

        let bindings = match explicit {
            Some(path) => {
                let lib: PathBuf = if path.is_dir() {
                    Pdfium::pdfium_platform_library_name_at_path(&path).into()
                } else {
                    path
                };
                debug!("Binding pdfium from {}", lib.display());
                Pdfium::bind_to_library(&lib)
            }
            None => Pdfium::bind_to_system_library(),
        }
        .map_err(|e| ConvertError::PdfiumBindingFailed(format!("{:?}", e)))?;

        Ok(Pdfium::new(bindings))
    }
}

impl Rasterizer for PdfiumRasterizer {
    fn with_document(
        &self,
        pdf: &SourcePdf,
        job: &mut dyn FnMut(&dyn RasterDocument) -> Result<(), ConvertError>,
    ) -> Result<(), ConvertError> {
        let pdfium = self.bind()?;
        let document = pdfium
            .load_pdf_from_byte_slice(pdf.bytes(), None)
            .map_err(|e| ConvertError::UnreadableDocument {
                path: pdf.path().to_path_buf(),
                detail: format!("{:?}", e),
            })?;

        let page_count = document.pages().len() as usize;
        info!("PDF loaded: {} pages", page_count);

        let doc = PdfiumDocument {
            document,
            page_count,
        };
        job(&doc)
    }
}

struct PdfiumDocument<'a> {
    document: PdfDocument<'a>,
    page_count: usize,
}

impl RasterDocument for PdfiumDocument<'_> {
    fn page_count(&self) -> usize {
        self.page_count
    }

    fn render_page(&self, page_index: usize, scale: f32) -> Result<DynamicImage, ConvertError> {
        if page_index >= self.page_count {
            return Err(ConvertError::InvalidPageIndex {
                index: page_index,
                total: self.page_count,
            });
        }

        let page = self
            .document
            .pages()
            .get(page_index as u16)
            .map_err(|e| ConvertError::EncodingFailure {
                page: page_index + 1,
                detail: format!("{:?}", e),
            })?;

        let config = PdfRenderConfig::new().scale_page_by_factor(scale);
        let bitmap = page
            .render_with_config(&config)
            .map_err(|e| ConvertError::EncodingFailure {
                page: page_index + 1,
                detail: format!("{:?}", e),
            })?;

        let image = bitmap.as_image();
        debug!(
            "Rendered page {} → {}x{} px",
            page_index + 1,
            image.width(),
            image.height()
        );
        Ok(image)
    }
}

// ── synthetic ────────────────────────────────────────────────────────────

/// In-memory [`Rasterizer`] that draws textured pages without pdfium.
///
/// Ignores the PDF content: the page count and failure points are set on
/// the struct. Counters expose how often documents were opened and whether
/// any are still open, which makes handle-release checks possible.
///
/// Test support only; not part of the documented API.
#[doc(hidden)]
#[derive(Debug, Default)]
pub struct SyntheticRasterizer {
    pages: usize,
    base_size: (u32, u32),
    fail_on_page: Option<usize>,
    unreadable: bool,
    opened: AtomicUsize,
    open_now: AtomicUsize,
    renders: AtomicUsize,
}

impl SyntheticRasterizer {
    /// A document of `pages` pages, 200×260 px at scale 1.0.
    pub fn new(pages: usize) -> Self {
        Self {
            pages,
            base_size: (200, 260),
            ..Self::default()
        }
    }

    pub fn with_page_size(mut self, width: u32, height: u32) -> Self {
        self.base_size = (width.max(1), height.max(1));
        self
    }

    /// Rendering the given 1-indexed page fails.
    pub fn failing_on_page(mut self, page_num: usize) -> Self {
        self.fail_on_page = Some(page_num);
        self
    }

    /// Every open fails as if the PDF were corrupt.
    pub fn unreadable(mut self) -> Self {
        self.unreadable = true;
        self
    }

    pub fn times_opened(&self) -> usize {
        self.opened.load(Ordering::SeqCst)
    }

    pub fn documents_open(&self) -> usize {
        self.open_now.load(Ordering::SeqCst)
    }

    pub fn pages_rendered(&self) -> usize {
        self.renders.load(Ordering::SeqCst)
    }
}

impl Rasterizer for SyntheticRasterizer {
    fn with_document(
        &self,
        pdf: &SourcePdf,
        job: &mut dyn FnMut(&dyn RasterDocument) -> Result<(), ConvertError>,
    ) -> Result<(), ConvertError> {
        if self.unreadable {
            return Err(ConvertError::UnreadableDocument {
                path: pdf.path().to_path_buf(),
                detail: "synthetic: corrupt xref".into(),
            });
        }
        self.opened.fetch_add(1, Ordering::SeqCst);
        let doc = SyntheticDocument { owner: self };
        self.open_now.fetch_add(1, Ordering::SeqCst);
        job(&doc)
    }
}

struct SyntheticDocument<'a> {
    owner: &'a SyntheticRasterizer,
}

impl Drop for SyntheticDocument<'_> {
    fn drop(&mut self) {
        self.owner.open_now.fetch_sub(1, Ordering::SeqCst);
    }
}

impl RasterDocument for SyntheticDocument<'_> {
    fn page_count(&self) -> usize {
        self.owner.pages
    }

    fn render_page(&self, page_index: usize, scale: f32) -> Result<DynamicImage, ConvertError> {
        let owner = self.owner;
        if page_index >= owner.pages {
            return Err(ConvertError::InvalidPageIndex {
                index: page_index,
                total: owner.pages,
            });
        }
        if owner.fail_on_page == Some(page_index + 1) {
            return Err(ConvertError::EncodingFailure {
                page: page_index + 1,
                detail: "synthetic: corrupt render buffer".into(),
            });
        }
        owner.renders.fetch_add(1, Ordering::SeqCst);

        let width = ((owner.base_size.0 as f32) * scale).round().max(1.0) as u32;
        let height = ((owner.base_size.1 as f32) * scale).round().max(1.0) as u32;
        let seed = page_index as u32 * 31;
        let img = RgbImage::from_fn(width, height, |x, y| {
            let v = (x.wrapping_mul(7) ^ y.wrapping_mul(13)).wrapping_add(seed);
            let n = (x.wrapping_mul(y) ^ seed.wrapping_mul(97)) % 251;
            Rgb([v as u8, n as u8, (v ^ n) as u8])
        });
        Ok(DynamicImage::ImageRgb8(img))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pdf() -> SourcePdf {
        SourcePdf::from_bytes("synthetic.pdf", b"%PDF-1.7".to_vec()).unwrap()
    }

    #[test]
    fn scale_applies_to_both_axes() {
        let r = SyntheticRasterizer::new(2);
        let img = render_page(&r, &pdf(), 1, 1.5).unwrap();
        assert_eq!((img.width(), img.height()), (300, 390));
    }

    #[test]
    fn out_of_range_index_is_rejected() {
        let r = SyntheticRasterizer::new(2);
        let err = render_page(&r, &pdf(), 2, 1.0).unwrap_err();
        assert!(matches!(
            err,
            ConvertError::InvalidPageIndex { index: 2, total: 2 }
        ));
    }

    #[test]
    fn document_is_released_after_failure() {
        let r = SyntheticRasterizer::new(3).failing_on_page(1);
        assert!(render_page(&r, &pdf(), 0, 1.0).is_err());
        assert_eq!(r.times_opened(), 1);
        assert_eq!(r.documents_open(), 0);
    }

    #[test]
    fn page_count_opens_once() {
        let r = SyntheticRasterizer::new(4);
        assert_eq!(page_count(&r, &pdf()).unwrap(), 4);
        assert_eq!(r.times_opened(), 1);
        assert_eq!(r.pages_rendered(), 0);
    }

    #[test]
    fn unreadable_never_opens() {
        let r = SyntheticRasterizer::new(4).unreadable();
        let err = page_count(&r, &pdf()).unwrap_err();
        assert!(matches!(err, ConvertError::UnreadableDocument { .. }));
        assert_eq!(r.times_opened(), 0);
    }
}
