//! Conversion orchestrator: PDF upload → page JPEGs + thumbnail + catalog update.
//!
//! ## Lifecycle
//!
//! ```text
//! NotConverted ──▶ Converting ──▶ Converted
//!      ▲               │
//!      └── Failed ◀────┘      (retryable: a later run starts over)
//! ```
//!
//! A job renders every page in ascending order and only then writes a
//! non-zero `total_pages`. Any page failure aborts the job and leaves the
//! count untouched, so a half-converted book looks exactly like an
//! unconverted one to the viewer.
//!
//! [`Converter::convert_document`] never returns an error: failures are
//! logged and recorded on the document (`status = Failed`, `last_error`),
//! and creating a document always succeeds regardless of what conversion
//! does afterwards.
//!
//! ## Thumbnails
//!
//! An operator-uploaded thumbnail always wins. Otherwise the job derives one
//! from page 1 (shrunk into the bounding box, low quality). If the document
//! still has none after the main pass, a separate backfill renders page 1
//! again; its failure is logged and changes nothing else.

use crate::catalog::{Catalog, ConversionStatus, Document, DocumentId};
use crate::config::ConversionConfig;
use crate::error::{CatalogError, ConvertError, ThumbnailError};
use crate::pipeline::encode::{encode_jpeg, fit_within};
use crate::pipeline::input::{load_source, SourcePdf};
use crate::pipeline::layout::StorageLayout;
use crate::pipeline::render::{self, PdfiumRasterizer, RasterDocument, Rasterizer};
use crate::pipeline::urls::UrlResolver;
use image::DynamicImage;
use serde::Serialize;
use std::collections::HashMap;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};
use tokio::sync::OwnedMutexGuard;
use tracing::{debug, error, info, warn};

/// Why a conversion request did no work.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case", tag = "reason")]
pub enum SkipReason {
    /// The document already has its page set.
    AlreadyConverted { total_pages: u32 },
    /// No source PDF is attached to the record.
    NoSourcePdf,
    /// The id is not in the catalog.
    NotFound,
}

/// Summary of a successful job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ConversionReport {
    pub id: DocumentId,
    pub total_pages: u32,
    /// Thumbnail reference recorded on the document after the job.
    pub thumbnail: Option<String>,
    /// Whether this job produced the thumbnail.
    pub thumbnail_generated: bool,
    pub duration_ms: u64,
}

/// Result of one [`Converter::convert_document`] call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case", tag = "outcome")]
pub enum ConversionOutcome {
    Skipped(SkipReason),
    Converted(ConversionReport),
    Failed { error: String },
}

impl ConversionOutcome {
    pub fn is_converted(&self) -> bool {
        matches!(self, Self::Converted(_))
    }
}

/// Drives rasterizer → encoder → storage for documents in a catalog.
///
/// Cheap to share behind an `Arc`; concurrent calls for different documents
/// run in parallel, calls for the same document queue on a per-id lock.
pub struct Converter {
    config: ConversionConfig,
    layout: StorageLayout,
    rasterizer: Arc<dyn Rasterizer>,
    catalog: Arc<dyn Catalog>,
    locks: Mutex<HashMap<DocumentId, Arc<tokio::sync::Mutex<()>>>>,
}

impl std::fmt::Debug for Converter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Converter")
            .field("config", &self.config)
            .field("layout", &self.layout)
            .finish_non_exhaustive()
    }
}

impl Converter {
    /// A converter rendering with pdfium.
    pub fn new(config: ConversionConfig, catalog: Arc<dyn Catalog>) -> Self {
        let rasterizer = Arc::new(PdfiumRasterizer::new(config.pdfium_library.clone()));
        Self::with_rasterizer(config, catalog, rasterizer)
    }

    pub fn with_rasterizer(
        config: ConversionConfig,
        catalog: Arc<dyn Catalog>,
        rasterizer: Arc<dyn Rasterizer>,
    ) -> Self {
        Self {
            layout: StorageLayout::new(&config),
            config,
            rasterizer,
            catalog,
            locks: Mutex::new(HashMap::new()),
        }
    }

    pub fn config(&self) -> &ConversionConfig {
        &self.config
    }

    pub fn layout(&self) -> &StorageLayout {
        &self.layout
    }

    pub fn catalog(&self) -> &Arc<dyn Catalog> {
        &self.catalog
    }

    pub fn url_resolver(&self) -> UrlResolver {
        UrlResolver::new(&self.config.media_url).with_books_dir(self.config.books_dir.clone())
    }

    /// Record a newly uploaded document and convert it.
    ///
    /// Only the catalog insert can fail; conversion problems end up in the
    /// returned outcome and on the record.
    pub async fn create_document(&self, doc: Document) -> Result<ConversionOutcome, CatalogError> {
        let id = doc.id.clone();
        self.catalog.insert(doc)?;
        Ok(self.convert_document(&id).await)
    }

    /// Convert `id` unless it is already converted.
    pub async fn convert_document(&self, id: &DocumentId) -> ConversionOutcome {
        let start = Instant::now();
        let guard = self.lock_for(id).lock_owned().await;

        let doc = match self.catalog.get(id) {
            Ok(Some(doc)) => doc,
            Ok(None) => {
                warn!("Conversion requested for unknown document {}", id);
                return ConversionOutcome::Skipped(SkipReason::NotFound);
            }
            Err(e) => {
                error!("Catalog read failed for document {}: {}", id, e);
                return ConversionOutcome::Failed {
                    error: e.to_string(),
                };
            }
        };

        if !doc.needs_conversion() {
            debug!(
                "Document {} already converted ({} pages); skipping",
                id, doc.total_pages
            );
            let total_pages = doc.total_pages;
            if let Err(e) = self.backfill_locked(guard, doc).await {
                warn!("{}", e);
            }
            return ConversionOutcome::Skipped(SkipReason::AlreadyConverted { total_pages });
        }

        if doc.source_pdf.as_os_str().is_empty() {
            debug!("Document {} has no source PDF; skipping", id);
            return ConversionOutcome::Skipped(SkipReason::NoSourcePdf);
        }

        info!("Starting conversion of document {}", id);
        match self.convert_locked(guard, doc, start).await {
            Ok(report) => {
                info!(
                    "Converted document {}: {} pages in {}ms",
                    id, report.total_pages, report.duration_ms
                );
                ConversionOutcome::Converted(report)
            }
            Err(e) => {
                error!("Conversion of document {} failed: {}", id, e);
                if let Some(ref cb) = self.config.progress_callback {
                    cb.on_conversion_failed(id.as_str(), &e.to_string());
                }
                ConversionOutcome::Failed {
                    error: e.to_string(),
                }
            }
        }
    }

    /// Operator reset followed by a conversion.
    pub async fn convert_document_forced(&self, id: &DocumentId) -> ConversionOutcome {
        if let Err(e) = self.reset(id).await {
            error!("Reset of document {} failed: {}", id, e);
            return ConversionOutcome::Failed {
                error: e.to_string(),
            };
        }
        self.convert_document(id).await
    }

    /// Zero the page count so the next conversion runs again.
    ///
    /// Existing page files stay on disk and are overwritten by that run.
    pub async fn reset(&self, id: &DocumentId) -> Result<Document, CatalogError> {
        let _guard = self.lock_for(id).lock_owned().await;
        info!("Resetting conversion state of document {}", id);
        self.catalog.update(id, &mut |d| {
            d.total_pages = 0;
            d.status = ConversionStatus::NotConverted;
            d.last_error = None;
        })
    }

    /// Run only the first-page thumbnail backfill for `id`.
    ///
    /// Returns the new reference, or `None` when the document is not
    /// converted yet or already has a thumbnail.
    pub async fn backfill_thumbnail(
        &self,
        id: &DocumentId,
    ) -> Result<Option<String>, ThumbnailError> {
        let guard = self.lock_for(id).lock_owned().await;
        let doc = match self.catalog.get(id) {
            Ok(Some(doc)) => doc,
            Ok(None) => return Ok(None),
            Err(e) => {
                return Err(ThumbnailError::Write {
                    id: id.to_string(),
                    detail: e.to_string(),
                })
            }
        };
        self.backfill_locked(guard, doc).await
    }

    /// Page count of a PDF without converting it.
    pub async fn inspect(&self, pdf_path: &Path) -> Result<usize, ConvertError> {
        let source = load_source(pdf_path).await?;
        let rasterizer = Arc::clone(&self.rasterizer);
        tokio::task::spawn_blocking(move || render::page_count(rasterizer.as_ref(), &source))
            .await
            .map_err(|e| ConvertError::Internal(format!("Inspect task panicked: {}", e)))?
    }

    // ── Internals ────────────────────────────────────────────────────────

    fn lock_for(&self, id: &DocumentId) -> Arc<tokio::sync::Mutex<()>> {
        let mut locks = self.locks.lock().unwrap_or_else(PoisonError::into_inner);
        // Only the map holds an unused lock; drop those so the map tracks
        // in-flight documents rather than every id ever seen.
        locks.retain(|_, lock| Arc::strong_count(lock) > 1);
        Arc::clone(locks.entry(id.clone()).or_default())
    }

    async fn convert_locked(
        &self,
        guard: OwnedMutexGuard<()>,
        doc: Document,
        start: Instant,
    ) -> Result<ConversionReport, ConvertError> {
        let id = doc.id.clone();
        self.catalog.update(&id, &mut |d| {
            d.status = ConversionStatus::Converting;
            d.last_error = None;
        })?;

        let source = match load_source(&doc.source_pdf).await {
            Ok(source) => source,
            Err(e) => {
                mark_failed(self.catalog.as_ref(), &id, &e);
                return Err(e);
            }
        };

        let cancel = Arc::new(AtomicBool::new(false));
        let clock = Arc::new(PageClock::default());
        let job = PageJob {
            id: id.clone(),
            source,
            keep_first_page: doc.thumbnail.is_none(),
            config: self.config.clone(),
            layout: self.layout.clone(),
            rasterizer: Arc::clone(&self.rasterizer),
            catalog: Arc::clone(&self.catalog),
            cancel: Arc::clone(&cancel),
            clock: Arc::clone(&clock),
        };

        // The guard moves into the blocking task: a job that outlives its
        // timeout still keeps retries of the same document out.
        let handle = tokio::task::spawn_blocking(move || {
            let _guard = guard;
            job.run(start)
        });

        let job_timeout = Duration::from_secs(self.config.job_timeout_secs);
        let page_timeout = Duration::from_secs(self.config.page_timeout_secs);
        tokio::select! {
            joined = handle => match joined {
                Ok(result) => result,
                Err(join_err) => {
                    let e = ConvertError::Internal(format!("Conversion task panicked: {}", join_err));
                    mark_failed(self.catalog.as_ref(), &id, &e);
                    Err(e)
                }
            },
            _ = tokio::time::sleep(job_timeout) => {
                let e = ConvertError::Timeout {
                    secs: self.config.job_timeout_secs,
                    scope: "job".into(),
                };
                self.abandon(id, e, &cancel, start)
            }
            page_num = clock.overdue(page_timeout) => {
                let e = ConvertError::Timeout {
                    secs: self.config.page_timeout_secs,
                    scope: format!("page {page_num}"),
                };
                self.abandon(id, e, &cancel, start)
            }
        }
    }

    /// Give up on a job that is still running on the blocking pool.
    ///
    /// The job sees the cancel flag at its next page boundary. If it already
    /// committed, the commit stands.
    fn abandon(
        &self,
        id: DocumentId,
        e: ConvertError,
        cancel: &AtomicBool,
        start: Instant,
    ) -> Result<ConversionReport, ConvertError> {
        cancel.store(true, Ordering::SeqCst);
        match mark_failed(self.catalog.as_ref(), &id, &e) {
            Some(d) if d.status == ConversionStatus::Converted => Ok(ConversionReport {
                id,
                total_pages: d.total_pages,
                thumbnail: d.thumbnail,
                thumbnail_generated: false,
                duration_ms: start.elapsed().as_millis() as u64,
            }),
            _ => Err(e),
        }
    }

    async fn backfill_locked(
        &self,
        guard: OwnedMutexGuard<()>,
        doc: Document,
    ) -> Result<Option<String>, ThumbnailError> {
        if doc.status != ConversionStatus::Converted || doc.thumbnail.is_some() {
            return Ok(None);
        }
        let source = load_source(&doc.source_pdf)
            .await
            .map_err(|e| ThumbnailError::Render {
                id: doc.id.to_string(),
                detail: e.to_string(),
            })?;

        let id = doc.id.clone();
        let config = self.config.clone();
        let layout = self.layout.clone();
        let rasterizer = Arc::clone(&self.rasterizer);
        let catalog = Arc::clone(&self.catalog);
        tokio::task::spawn_blocking(move || {
            let _guard = guard;
            backfill_blocking(&id, &source, &config, &layout, rasterizer.as_ref(), catalog.as_ref())
        })
        .await
        .map_err(|e| ThumbnailError::Render {
            id: doc.id.to_string(),
            detail: format!("Backfill task panicked: {}", e),
        })?
    }
}

/// Record a failure, but only over a job that is still `Converting`.
///
/// Returns the record as it is after the attempt, or `None` if the catalog
/// could not be updated.
fn mark_failed(catalog: &dyn Catalog, id: &DocumentId, err: &ConvertError) -> Option<Document> {
    let message = err.to_string();
    match catalog.update(id, &mut |d| {
        if d.status == ConversionStatus::Converting {
            d.status = ConversionStatus::Failed;
            d.last_error = Some(message.clone());
        }
    }) {
        Ok(doc) => Some(doc),
        Err(e) => {
            error!("Could not record failure of document {}: {}", id, e);
            None
        }
    }
}

/// Which page the blocking job is on and since when.
#[derive(Default)]
struct PageClock {
    current: Mutex<Option<(usize, Instant)>>,
}

impl PageClock {
    fn start(&self, page_num: usize) {
        *self.current.lock().unwrap_or_else(PoisonError::into_inner) =
            Some((page_num, Instant::now()));
    }

    fn finish(&self) {
        *self.current.lock().unwrap_or_else(PoisonError::into_inner) = None;
    }

    /// Resolves with the page number once one page runs past `limit`.
    async fn overdue(&self, limit: Duration) -> usize {
        let mut tick = tokio::time::interval(PAGE_WATCH_INTERVAL);
        loop {
            tick.tick().await;
            let current = *self.current.lock().unwrap_or_else(PoisonError::into_inner);
            if let Some((page_num, since)) = current {
                if since.elapsed() > limit {
                    return page_num;
                }
            }
        }
    }
}

const PAGE_WATCH_INTERVAL: Duration = Duration::from_millis(100);

/// Everything one blocking conversion needs, owned.
struct PageJob {
    id: DocumentId,
    source: SourcePdf,
    keep_first_page: bool,
    config: ConversionConfig,
    layout: StorageLayout,
    rasterizer: Arc<dyn Rasterizer>,
    catalog: Arc<dyn Catalog>,
    cancel: Arc<AtomicBool>,
    clock: Arc<PageClock>,
}

struct RenderedPages {
    total_pages: usize,
    first_page: Option<DynamicImage>,
}

impl PageJob {
    /// Render, persist and backfill. Runs on the blocking pool.
    fn run(self, start: Instant) -> Result<ConversionReport, ConvertError> {
        let rendered = match self.render_all() {
            Ok(r) => r,
            Err(e) => {
                mark_failed(self.catalog.as_ref(), &self.id, &e);
                return Err(e);
            }
        };

        let derived = rendered
            .first_page
            .as_ref()
            .and_then(|first| match self.derive_thumbnail(first) {
                Ok(reference) => Some(reference),
                Err(e) => {
                    warn!("Thumbnail for document {} not derived: {}", self.id, e);
                    None
                }
            });

        let (doc, mut thumbnail_generated) = match self.commit(rendered.total_pages, derived) {
            Ok(Some(committed)) => committed,
            Ok(None) => {
                return Err(ConvertError::Timeout {
                    secs: self.config.job_timeout_secs,
                    scope: "job".into(),
                })
            }
            Err(e) => {
                mark_failed(self.catalog.as_ref(), &self.id, &e);
                return Err(e);
            }
        };
        let total_pages = doc.total_pages;

        if let Some(ref cb) = self.config.progress_callback {
            cb.on_conversion_complete(self.id.as_str(), rendered.total_pages);
        }

        let mut thumbnail = doc.thumbnail.clone();
        if thumbnail.is_none() {
            match backfill_blocking(
                &self.id,
                &self.source,
                &self.config,
                &self.layout,
                self.rasterizer.as_ref(),
                self.catalog.as_ref(),
            ) {
                Ok(reference) => {
                    thumbnail_generated = reference.is_some();
                    thumbnail = reference;
                }
                Err(e) => warn!("{}", e),
            }
        }

        Ok(ConversionReport {
            id: self.id,
            total_pages,
            thumbnail,
            thumbnail_generated,
            duration_ms: start.elapsed().as_millis() as u64,
        })
    }

    /// Persist the page count, and the derived thumbnail unless one is set.
    ///
    /// `None` means the job lost: the record left `Converting` (a timeout
    /// already failed it) or the job was cancelled.
    fn commit(
        &self,
        total_pages: usize,
        derived: Option<String>,
    ) -> Result<Option<(Document, bool)>, ConvertError> {
        let total_pages = u32::try_from(total_pages)
            .map_err(|_| ConvertError::Internal("page count overflows u32".into()))?;
        let cancelled = &self.cancel;
        let mut committed = false;
        let mut thumbnail_generated = false;
        let doc = self.catalog.update(&self.id, &mut |d| {
            if d.status != ConversionStatus::Converting || cancelled.load(Ordering::SeqCst) {
                return;
            }
            d.total_pages = total_pages;
            d.status = ConversionStatus::Converted;
            d.last_error = None;
            if d.thumbnail.is_none() {
                if let Some(ref reference) = derived {
                    d.thumbnail = Some(reference.clone());
                    thumbnail_generated = true;
                }
            }
            committed = true;
        })?;
        Ok(committed.then_some((doc, thumbnail_generated)))
    }

    /// Open the PDF once and write `page_1.jpg ..= page_N.jpg` in order.
    fn render_all(&self) -> Result<RenderedPages, ConvertError> {
        let mut out = RenderedPages {
            total_pages: 0,
            first_page: None,
        };
        let page_timeout = Duration::from_secs(self.config.page_timeout_secs);

        self.rasterizer
            .with_document(&self.source, &mut |doc: &dyn RasterDocument| {
                let total = doc.page_count();
                if total == 0 {
                    return Err(ConvertError::EmptyDocument {
                        path: self.source.path().to_path_buf(),
                    });
                }
                self.layout.ensure_book_dir(&self.id)?;
                if let Some(ref cb) = self.config.progress_callback {
                    cb.on_conversion_start(self.id.as_str(), total);
                }

                for index in 0..total {
                    if self.cancel.load(Ordering::SeqCst) {
                        return Err(ConvertError::Timeout {
                            secs: self.config.job_timeout_secs,
                            scope: "job".into(),
                        });
                    }
                    let page_num = index + 1;
                    let page_start = Instant::now();
                    self.clock.start(page_num);

                    let image = doc.render_page(index, self.config.page_scale)?;
                    let jpeg = encode_jpeg(&image, self.config.page_quality, page_num)?;
                    self.layout.write_page(&self.id, page_num, &jpeg)?;
                    self.clock.finish();

                    if page_start.elapsed() > page_timeout {
                        return Err(ConvertError::Timeout {
                            secs: self.config.page_timeout_secs,
                            scope: format!("page {page_num}"),
                        });
                    }
                    debug!(
                        "Document {}: page {}/{} → {} bytes",
                        self.id,
                        page_num,
                        total,
                        jpeg.len()
                    );
                    if let Some(ref cb) = self.config.progress_callback {
                        cb.on_page_complete(self.id.as_str(), page_num, total, jpeg.len());
                    }
                    if index == 0 && self.keep_first_page {
                        out.first_page = Some(image);
                    }
                }
                out.total_pages = total;
                Ok(())
            })?;

        Ok(out)
    }

    fn derive_thumbnail(&self, first_page: &DynamicImage) -> Result<String, ConvertError> {
        let (max_w, max_h) = self.config.thumbnail_max;
        let thumb = fit_within(first_page, max_w, max_h);
        let jpeg = encode_jpeg(&thumb, self.config.thumbnail_quality, 0)?;
        self.layout.write_thumbnail(&self.id, &jpeg)
    }
}

/// Render page 1 at the backfill zoom and record it as the thumbnail if the
/// document still has none.
fn backfill_blocking(
    id: &DocumentId,
    source: &SourcePdf,
    config: &ConversionConfig,
    layout: &StorageLayout,
    rasterizer: &dyn Rasterizer,
    catalog: &dyn Catalog,
) -> Result<Option<String>, ThumbnailError> {
    debug!("Backfilling thumbnail for document {}", id);
    let first = render::render_page(rasterizer, source, 0, config.backfill_scale).map_err(|e| {
        ThumbnailError::Render {
            id: id.to_string(),
            detail: e.to_string(),
        }
    })?;

    let (max_w, max_h) = config.thumbnail_max;
    let jpeg = encode_jpeg(&fit_within(&first, max_w, max_h), config.backfill_quality, 0).map_err(
        |e| ThumbnailError::Encode {
            id: id.to_string(),
            detail: e.to_string(),
        },
    )?;

    let write_err = |detail: String| ThumbnailError::Write {
        id: id.to_string(),
        detail,
    };
    let reference = layout
        .write_thumbnail(id, &jpeg)
        .map_err(|e| write_err(e.to_string()))?;

    let mut recorded = false;
    catalog
        .update(id, &mut |d| {
            if d.thumbnail.is_none() {
                d.thumbnail = Some(reference.clone());
                recorded = true;
            }
        })
        .map_err(|e| write_err(e.to_string()))?;

    if recorded {
        info!("Backfilled thumbnail for document {}: {}", id, reference);
        Ok(Some(reference))
    } else {
        Ok(None)
    }
}
