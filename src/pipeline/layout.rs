//! On-disk layout of derived images.
//!
//! ```text
//! <media-root>/books/<doc_id>/page_<n>.jpg     n = 1..total_pages
//! <media-root>/thumbnails/<doc_id>_thumb.jpg
//! ```
//!
//! These paths are shared with whatever serves `<media-root>` over HTTP and
//! must not change shape. Writes go through a temp file in the target
//! directory followed by a rename, so a reader never sees a half-written
//! JPEG and a re-run simply replaces the previous file. Nothing here deletes.
//!
//! Temp files start out owner-only; every image is widened to `0o644`
//! before the rename so a web server running as another user can read it.

use crate::catalog::DocumentId;
use crate::config::ConversionConfig;
use crate::error::ConvertError;
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::debug;

/// Canonical paths for a media root.
#[derive(Debug, Clone)]
pub struct StorageLayout {
    media_root: PathBuf,
    books_dir: String,
    thumbnails_dir: String,
}

impl StorageLayout {
    pub fn new(config: &ConversionConfig) -> Self {
        Self {
            media_root: config.media_root.clone(),
            books_dir: config.books_dir.clone(),
            thumbnails_dir: config.thumbnails_dir.clone(),
        }
    }

    pub fn media_root(&self) -> &Path {
        &self.media_root
    }

    /// `<root>/books/<id>`
    pub fn book_dir(&self, id: &DocumentId) -> PathBuf {
        self.media_root.join(&self.books_dir).join(id.as_str())
    }

    /// `<root>/books/<id>/page_<n>.jpg`, `page_num` 1-indexed.
    pub fn page_path(&self, id: &DocumentId, page_num: usize) -> PathBuf {
        self.book_dir(id).join(format!("page_{page_num}.jpg"))
    }

    /// `<root>/thumbnails/<id>_thumb.jpg`
    pub fn thumbnail_path(&self, id: &DocumentId) -> PathBuf {
        self.media_root.join(self.thumbnail_ref(id))
    }

    /// Media-relative reference stored in the catalog: `thumbnails/<id>_thumb.jpg`.
    pub fn thumbnail_ref(&self, id: &DocumentId) -> String {
        format!("{}/{}_thumb.jpg", self.thumbnails_dir, id)
    }

    pub fn ensure_book_dir(&self, id: &DocumentId) -> Result<PathBuf, ConvertError> {
        let dir = self.book_dir(id);
        create_dir(&dir)?;
        Ok(dir)
    }

    pub fn ensure_thumbnail_dir(&self) -> Result<PathBuf, ConvertError> {
        let dir = self.media_root.join(&self.thumbnails_dir);
        create_dir(&dir)?;
        Ok(dir)
    }

    /// Write (or overwrite) one page image.
    pub fn write_page(
        &self,
        id: &DocumentId,
        page_num: usize,
        jpeg: &[u8],
    ) -> Result<PathBuf, ConvertError> {
        let path = self.page_path(id, page_num);
        write_atomic(&path, jpeg)?;
        Ok(path)
    }

    /// Write (or overwrite) the thumbnail; returns its media-relative reference.
    pub fn write_thumbnail(&self, id: &DocumentId, jpeg: &[u8]) -> Result<String, ConvertError> {
        self.ensure_thumbnail_dir()?;
        write_atomic(&self.thumbnail_path(id), jpeg)?;
        Ok(self.thumbnail_ref(id))
    }

    /// Length of the contiguous `page_1.jpg, page_2.jpg, …` run on disk.
    pub fn existing_pages(&self, id: &DocumentId) -> usize {
        let mut n = 0;
        while self.page_path(id, n + 1).is_file() {
            n += 1;
        }
        n
    }
}

/// `create_dir_all` already treats an existing directory as success, which
/// also makes concurrent creation of the same path safe.
fn create_dir(dir: &Path) -> Result<(), ConvertError> {
    std::fs::create_dir_all(dir).map_err(|e| ConvertError::StorageWriteFailure {
        path: dir.to_path_buf(),
        source: e,
    })
}

fn write_atomic(path: &Path, bytes: &[u8]) -> Result<(), ConvertError> {
    let storage_err = |source: std::io::Error| ConvertError::StorageWriteFailure {
        path: path.to_path_buf(),
        source,
    };
    let dir = path
        .parent()
        .ok_or_else(|| ConvertError::Internal(format!("{} has no parent", path.display())))?;

    let mut tmp = tempfile::NamedTempFile::new_in(dir).map_err(storage_err)?;
    tmp.write_all(bytes).map_err(storage_err)?;
    make_world_readable(tmp.as_file()).map_err(storage_err)?;
    tmp.persist(path).map_err(|e| storage_err(e.error))?;

    debug!("Wrote {} ({} bytes)", path.display(), bytes.len());
    Ok(())
}

#[cfg(unix)]
fn make_world_readable(file: &std::fs::File) -> std::io::Result<()> {
    use std::os::unix::fs::PermissionsExt;
    file.set_permissions(std::fs::Permissions::from_mode(PUBLIC_FILE_MODE))
}

#[cfg(not(unix))]
fn make_world_readable(_file: &std::fs::File) -> std::io::Result<()> {
    Ok(())
}

/// `rw-r--r--`, what a plain `create` gives under the usual umask.
#[cfg(unix)]
const PUBLIC_FILE_MODE: u32 = 0o644;
