//! # flipbook-convert
//!
//! Turn uploaded PDF booklets into deliberately low-quality page JPEGs and
//! serve them to a flipbook viewer behind per-user access grants.
//!
//! ## Why degraded images?
//!
//! The viewer never receives the PDF. Every page is rasterised once at a
//! modest zoom and re-encoded at JPEG quality 25: readable on screen, poor
//! for reprinting or text extraction. The original upload stays server-side.
//!
//! ## Pipeline Overview
//!
//! ```text
//! PDF upload
//!  │
//!  ├─ 1. Input    read the file, check the %PDF magic
//!  ├─ 2. Render   rasterise every page via pdfium (spawn_blocking)
//!  ├─ 3. Encode   RGB → JPEG q25
//!  ├─ 4. Store    media/books/<id>/page_<n>.jpg (temp file + rename)
//!  ├─ 5. Thumb    page 1 → media/thumbnails/<id>_thumb.jpg unless uploaded
//!  └─ 6. Commit   total_pages written last; 0 means "not ready"
//! ```
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use flipbook_convert::{
//!     ConversionConfig, Converter, Document, DocumentId, JsonFileCatalog, UrlResolver,
//! };
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = ConversionConfig::builder().media_root("media").build()?;
//!     let catalog = Arc::new(JsonFileCatalog::open("catalog.json")?);
//!     let converter = Converter::new(config, catalog);
//!
//!     let id = DocumentId::from(42u64);
//!     let doc = Document::new(id.clone(), "Annual report", "media/pdfs/annual.pdf");
//!     let outcome = converter.create_document(doc).await?;
//!     eprintln!("{outcome:?}");
//!
//!     let urls = converter.url_resolver().pages(&id, 3);
//!     println!("{}", urls.join("\n"));
//!     Ok(())
//! }
//! ```
//!
//! ## Feature Flags
//!
//! | Feature | Default | Description |
//! |---------|---------|-------------|
//! | `cli`   | on      | Enables the `flipbook` binary (clap + anyhow + indicatif + tracing-subscriber) |
//!
//! Disable `cli` when using only the library:
//! ```toml
//! flipbook-convert = { version = "0.1", default-features = false }
//! ```

// ── Modules ──────────────────────────────────────────────────────────────

pub mod catalog;
pub mod config;
pub mod convert;
pub mod error;
pub mod pipeline;
pub mod progress;
pub mod queue;
pub mod viewer;

// ── Re-exports ───────────────────────────────────────────────────────────

pub use catalog::{
    BookView, Catalog, ConversionStatus, Document, DocumentId, JsonFileCatalog, MemoryCatalog,
};
pub use config::{ConversionConfig, ConversionConfigBuilder};
pub use convert::{ConversionOutcome, ConversionReport, Converter, SkipReason};
pub use error::{CatalogError, ConvertError, ThumbnailError, ViewError};
pub use pipeline::render::{PdfiumRasterizer, Rasterizer};
#[doc(hidden)]
pub use pipeline::render::SyntheticRasterizer;
pub use pipeline::urls::{resolve_pages, UrlResolver};
pub use progress::{ConversionProgressCallback, NoopProgressCallback, ProgressCallback};
pub use queue::{convert_many, ConversionQueue, ConversionTicket, OutcomeStream};
pub use viewer::{viewer_payload, ViewerPayload};
