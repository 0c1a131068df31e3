//! Progress-callback trait for per-page conversion events.
//!
//! Inject an [`Arc<dyn ConversionProgressCallback>`] via
//! [`crate::config::ConversionConfigBuilder::progress_callback`] to receive
//! events as a conversion job rasterises each page.
//!
//! Pages are rendered on tokio's blocking pool, so callbacks fire from a
//! non-async thread. Several jobs may run at once under a
//! [`crate::queue::ConversionQueue`]; every event carries the document id.
//!
//! # Example
//!
//! ```rust
//! use flipbook_convert::{ConversionProgressCallback, ConversionConfig};
//! use std::sync::{Arc, atomic::{AtomicUsize, Ordering}};
//!
//! struct CountingCallback {
//!     pages: AtomicUsize,
//! }
//!
//! impl ConversionProgressCallback for CountingCallback {
//!     fn on_page_complete(&self, doc_id: &str, page_num: usize, total_pages: usize, bytes: usize) {
//!         self.pages.fetch_add(1, Ordering::SeqCst);
//!         eprintln!("{doc_id}: page {page_num}/{total_pages} ({bytes} bytes)");
//!     }
//! }
//!
//! let counter = Arc::new(CountingCallback { pages: AtomicUsize::new(0) });
//!
//! let config = ConversionConfig::builder()
//!     .progress_callback(counter as Arc<dyn ConversionProgressCallback>)
//!     .build()
//!     .unwrap();
//! ```

use std::sync::Arc;

/// Called by the conversion orchestrator as a job advances.
///
/// All methods have default no-op implementations so callers only override
/// what they care about.
pub trait ConversionProgressCallback: Send + Sync {
    /// Called once the PDF is open and its page count is known.
    fn on_conversion_start(&self, doc_id: &str, total_pages: usize) {
        let _ = (doc_id, total_pages);
    }

    /// Called after a page image has been written.
    ///
    /// # Arguments
    /// * `page_num`    — 1-indexed page number
    /// * `total_pages` — pages in the document
    /// * `bytes`       — size of the written JPEG
    fn on_page_complete(&self, doc_id: &str, page_num: usize, total_pages: usize, bytes: usize) {
        let _ = (doc_id, page_num, total_pages, bytes);
    }

    /// Called when the job aborts. No further events follow for this job.
    fn on_conversion_failed(&self, doc_id: &str, error: &str) {
        let _ = (doc_id, error);
    }

    /// Called once every page is written and the catalog is updated.
    fn on_conversion_complete(&self, doc_id: &str, total_pages: usize) {
        let _ = (doc_id, total_pages);
    }
}

/// A no-op implementation for callers that don't need progress events.
pub struct NoopProgressCallback;

impl ConversionProgressCallback for NoopProgressCallback {}

/// Convenience alias matching the type stored in [`crate::config::ConversionConfig`].
pub type ProgressCallback = Arc<dyn ConversionProgressCallback>;
