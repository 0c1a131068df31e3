//! Error types for the flipbook-convert library.
//!
//! Two distinct error types reflect two distinct failure modes of a
//! conversion job:
//!
//! * [`ConvertError`] — **Fatal to the job**: the page set cannot be trusted
//!   (unreadable PDF, codec failure, disk full). The orchestrator catches it,
//!   records the document as `Failed` and logs it; it never reaches the
//!   caller that created the document.
//!
//! * [`ThumbnailError`] — **Non-fatal**: the first-page thumbnail backfill
//!   failed. The page set and the `Converted` status are unaffected.
//!
//! [`CatalogError`] and [`ViewError`] cover the persistence collaborator and
//! the viewer gate respectively.

use crate::catalog::DocumentId;
use std::path::PathBuf;
use thiserror::Error;

/// Errors that abort a single conversion job.
#[derive(Debug, Error)]
pub enum ConvertError {
    // ── Input errors ──────────────────────────────────────────────────────
    /// The source PDF could not be read or parsed.
    #[error("PDF '{path}' is unreadable: {detail}")]
    UnreadableDocument { path: PathBuf, detail: String },

    /// The PDF opened fine but contains no pages.
    #[error("PDF '{path}' has no pages")]
    EmptyDocument { path: PathBuf },

    /// A page index past the end of the document was requested.
    #[error("Page index {index} is out of range (document has {total} pages)")]
    InvalidPageIndex { index: usize, total: usize },

    // ── Pipeline errors ───────────────────────────────────────────────────
    /// pdfium or the JPEG codec rejected a page.
    #[error("Encoding failed for page {page}: {detail}")]
    EncodingFailure { page: usize, detail: String },

    /// A page or thumbnail could not be written.
    #[error("Failed to write '{path}': {source}")]
    StorageWriteFailure {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The job or one of its pages ran past its deadline.
    #[error("Conversion timed out after {secs}s ({scope})")]
    Timeout { secs: u64, scope: String },

    // ── Environment errors ────────────────────────────────────────────────
    /// Could not bind to a pdfium library.
    #[error(
        "Failed to bind to pdfium library: {0}\n\
Set PDFIUM_LIB_PATH=/path/to/libpdfium or install pdfium system-wide."
    )]
    PdfiumBindingFailed(String),

    /// Reading or updating the document record failed.
    #[error(transparent)]
    Catalog(#[from] CatalogError),

    /// Builder validation failed.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// Unexpected internal error.
    #[error("Internal error: {0}")]
    Internal(String),
}

/// A failure of the isolated thumbnail backfill pass.
#[derive(Debug, Clone, Error, serde::Serialize, serde::Deserialize)]
pub enum ThumbnailError {
    /// First page could not be rendered.
    #[error("Thumbnail for '{id}': render failed: {detail}")]
    Render { id: String, detail: String },

    /// JPEG encoding of the thumbnail failed.
    #[error("Thumbnail for '{id}': encoding failed: {detail}")]
    Encode { id: String, detail: String },

    /// The thumbnail file or its catalog reference could not be written.
    #[error("Thumbnail for '{id}': write failed: {detail}")]
    Write { id: String, detail: String },
}

/// Errors from a [`crate::catalog::Catalog`] implementation.
#[derive(Debug, Error)]
pub enum CatalogError {
    #[error("Document '{0}' not found")]
    NotFound(DocumentId),

    #[error("Document '{0}' already exists")]
    AlreadyExists(DocumentId),

    /// Identifiers namespace on-disk paths, so they are restricted.
    #[error("Invalid document id '{0}': use 1-64 characters from [A-Za-z0-9_-]")]
    InvalidId(String),

    #[error("Catalog I/O on '{path}': {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Catalog file '{path}' is corrupt: {detail}")]
    Corrupt { path: PathBuf, detail: String },
}

/// Why a viewer payload could not be produced for a user.
#[derive(Debug, Error)]
pub enum ViewError {
    #[error("You do not have access to this booklet")]
    NoAccess,

    #[error("Document '{0}' not found")]
    NotFound(DocumentId),

    #[error("Document '{0}' is not published")]
    NotPublished(DocumentId),

    /// Conversion is pending or running; distinct from a failure.
    #[error("Document '{0}' is still being prepared")]
    NotYetConverted(DocumentId),

    #[error("Document '{id}' could not be converted: {reason}")]
    ConversionFailed { id: DocumentId, reason: String },

    #[error(transparent)]
    Catalog(#[from] CatalogError),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn invalid_page_index_display() {
        let e = ConvertError::InvalidPageIndex { index: 7, total: 5 };
        let msg = e.to_string();
        assert!(msg.contains("7"), "got: {msg}");
        assert!(msg.contains("5 pages"), "got: {msg}");
    }

    #[test]
    fn storage_failure_keeps_source() {
        use std::error::Error as _;
        let e = ConvertError::StorageWriteFailure {
            path: PathBuf::from("/media/books/1/page_1.jpg"),
            source: std::io::Error::new(std::io::ErrorKind::PermissionDenied, "denied"),
        };
        assert!(e.to_string().contains("page_1.jpg"));
        assert!(e.source().is_some());
    }

    #[test]
    fn timeout_display_names_scope() {
        let e = ConvertError::Timeout {
            secs: 30,
            scope: "page 3".into(),
        };
        assert!(e.to_string().contains("30s"));
        assert!(e.to_string().contains("page 3"));
    }

    #[test]
    fn catalog_error_converts_transparently() {
        let id = DocumentId::new("42").expect("valid id");
        let e: ConvertError = CatalogError::NotFound(id).into();
        assert_eq!(e.to_string(), "Document '42' not found");
    }

    #[test]
    fn thumbnail_error_display() {
        let e = ThumbnailError::Render {
            id: "9".into(),
            detail: "bad xref".into(),
        };
        assert!(e.to_string().contains("'9'"));
        assert!(e.to_string().contains("bad xref"));
    }
}
