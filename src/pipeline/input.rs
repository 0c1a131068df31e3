//! Source intake: load the uploaded PDF into memory and sanity-check it.
//!
//! The whole file is read once per job so pdfium can open it from a byte
//! slice and the rasterizer never re-reads the upload mid-conversion. The
//! `%PDF` magic check turns an obviously wrong upload into a clean
//! `UnreadableDocument` instead of a pdfium parse error.

use crate::error::ConvertError;
use std::path::{Path, PathBuf};
use tracing::debug;

/// An uploaded PDF held in memory.
#[derive(Debug, Clone)]
pub struct SourcePdf {
    path: PathBuf,
    bytes: Vec<u8>,
}

impl SourcePdf {
    /// Wrap bytes that did not come from disk (tests, uploads in flight).
    pub fn from_bytes(label: impl Into<PathBuf>, bytes: Vec<u8>) -> Result<Self, ConvertError> {
        let path = label.into();
        check_magic(&path, &bytes)?;
        Ok(Self { path, bytes })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }
}

/// Read a PDF from disk, validating its magic bytes.
pub async fn load_source(path: &Path) -> Result<SourcePdf, ConvertError> {
    let bytes = tokio::fs::read(path)
        .await
        .map_err(|e| ConvertError::UnreadableDocument {
            path: path.to_path_buf(),
            detail: e.to_string(),
        })?;
    debug!("Read {} bytes from {}", bytes.len(), path.display());
    SourcePdf::from_bytes(path, bytes)
}

fn check_magic(path: &Path, bytes: &[u8]) -> Result<(), ConvertError> {
    if bytes.len() < 4 || &bytes[..4] != b"%PDF" {
        let mut magic = [0u8; 4];
        let n = bytes.len().min(4);
        magic[..n].copy_from_slice(&bytes[..n]);
        return Err(ConvertError::UnreadableDocument {
            path: path.to_path_buf(),
            detail: format!("not a PDF (first bytes: {magic:?})"),
        });
    }
    Ok(())
}
