//! Pipeline stages for turning a PDF into protected page images.
//!
//! Each submodule implements exactly one step. The orchestrator in
//! [`crate::convert`] drives them; none of them touches the catalog.
//!
//! ## Data Flow
//!
//! ```text
//! input ──▶ render ──▶ encode ──▶ layout          urls
//! (bytes)   (pdfium)   (JPEG q25)  (books/<id>/…)  (viewer page list)
//! ```
//!
//! 1. [`input`]  — read the source PDF and check its magic bytes
//! 2. [`render`] — open the document once and rasterise pages at a zoom factor
//! 3. [`encode`] — JPEG-encode a raster; shrink-to-fit for thumbnails
//! 4. [`layout`] — canonical on-disk paths and atomic writes
//! 5. [`urls`]   — pure mapping from `(id, total_pages)` to public URLs

pub mod encode;
pub mod input;
pub mod layout;
pub mod render;
pub mod urls;
