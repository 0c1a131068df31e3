//! Configuration types for flipbook conversion.
//!
//! All conversion behaviour is controlled through [`ConversionConfig`], built
//! via its [`ConversionConfigBuilder`]. Media paths live here rather than in
//! process-wide settings so that tests can point a converter at a temporary
//! directory.

use crate::error::ConvertError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;

/// Configuration for converting flipbooks.
///
/// Built via [`ConversionConfig::builder()`] or using
/// [`ConversionConfig::default()`].
///
/// # Example
/// ```rust
/// use flipbook_convert::ConversionConfig;
///
/// let config = ConversionConfig::builder()
///     .media_root("/srv/media")
///     .media_url("/media/")
///     .page_quality(25)
///     .build()
///     .unwrap();
/// ```
#[derive(Clone, Serialize, Deserialize)]
pub struct ConversionConfig {
    /// Root directory all derived files live under. Default: `media`.
    pub media_root: PathBuf,

    /// Public URL prefix mapped onto `media_root`. Default: `/media/`.
    pub media_url: String,

    /// Subdirectory of `media_root` holding per-document page directories.
    pub books_dir: String,

    /// Subdirectory of `media_root` holding thumbnails.
    pub thumbnails_dir: String,

    /// Linear zoom applied when rasterising pages. Default: 1.5 (≈108 DPI).
    ///
    /// Legible on screen, too coarse for a useful print.
    pub page_scale: f32,

    /// JPEG quality of page images, 1–100. Default: 25.
    pub page_quality: u8,

    /// JPEG quality of the thumbnail derived during conversion. Default: 25.
    pub thumbnail_quality: u8,

    /// Thumbnail bounding box `(width, height)`. Default: 300×400.
    pub thumbnail_max: (u32, u32),

    /// Zoom used by the first-page thumbnail backfill. Default: 1.67.
    pub backfill_scale: f32,

    /// JPEG quality used by the thumbnail backfill. Default: 100.
    pub backfill_quality: u8,

    /// A single page taking longer than this fails the job, even while the
    /// render is still stuck inside the decoder. Default: 60.
    pub page_timeout_secs: u64,

    /// Whole-job deadline. Default: 600.
    pub job_timeout_secs: u64,

    /// Number of jobs a [`crate::queue::ConversionQueue`] runs at once. Default: 2.
    pub workers: usize,

    /// Explicit pdfium library path; falls back to `PDFIUM_LIB_PATH`, then
    /// the system library.
    pub pdfium_library: Option<PathBuf>,

    /// Optional progress callback. Not serialised.
    #[serde(skip)]
    pub progress_callback: Option<crate::progress::ProgressCallback>,
}

impl Default for ConversionConfig {
    fn default() -> Self {
        Self {
            media_root: PathBuf::from("media"),
            media_url: "/media/".to_string(),
            books_dir: "books".to_string(),
            thumbnails_dir: "thumbnails".to_string(),
            page_scale: 1.5,
            page_quality: 25,
            thumbnail_quality: 25,
            thumbnail_max: (300, 400),
            backfill_scale: 1.67,
            backfill_quality: 100,
            page_timeout_secs: 60,
            job_timeout_secs: 600,
            workers: 2,
            pdfium_library: None,
            progress_callback: None,
        }
    }
}

impl fmt::Debug for ConversionConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConversionConfig")
            .field("media_root", &self.media_root)
            .field("media_url", &self.media_url)
            .field("books_dir", &self.books_dir)
            .field("thumbnails_dir", &self.thumbnails_dir)
            .field("page_scale", &self.page_scale)
            .field("page_quality", &self.page_quality)
            .field("thumbnail_quality", &self.thumbnail_quality)
            .field("thumbnail_max", &self.thumbnail_max)
            .field("backfill_scale", &self.backfill_scale)
            .field("backfill_quality", &self.backfill_quality)
            .field("page_timeout_secs", &self.page_timeout_secs)
            .field("job_timeout_secs", &self.job_timeout_secs)
            .field("workers", &self.workers)
            .field("pdfium_library", &self.pdfium_library)
            .field(
                "progress_callback",
                &self.progress_callback.as_ref().map(|_| "<dyn ConversionProgressCallback>"),
            )
            .finish()
    }
}

impl ConversionConfig {
    /// Create a new builder for `ConversionConfig`.
    pub fn builder() -> ConversionConfigBuilder {
        ConversionConfigBuilder {
            config: Self::default(),
        }
    }
}

/// Builder for [`ConversionConfig`].
#[derive(Debug)]
pub struct ConversionConfigBuilder {
    config: ConversionConfig,
}

impl ConversionConfigBuilder {
    pub fn media_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.config.media_root = root.into();
        self
    }

    pub fn media_url(mut self, url: impl Into<String>) -> Self {
        self.config.media_url = url.into();
        self
    }

    pub fn books_dir(mut self, dir: impl Into<String>) -> Self {
        self.config.books_dir = dir.into();
        self
    }

    pub fn thumbnails_dir(mut self, dir: impl Into<String>) -> Self {
        self.config.thumbnails_dir = dir.into();
        self
    }

    pub fn page_scale(mut self, scale: f32) -> Self {
        self.config.page_scale = scale;
        self
    }

    pub fn page_quality(mut self, q: u8) -> Self {
        self.config.page_quality = q.clamp(1, 100);
        self
    }

    pub fn thumbnail_quality(mut self, q: u8) -> Self {
        self.config.thumbnail_quality = q.clamp(1, 100);
        self
    }

    pub fn thumbnail_max(mut self, width: u32, height: u32) -> Self {
        self.config.thumbnail_max = (width.max(1), height.max(1));
        self
    }

    pub fn backfill_scale(mut self, scale: f32) -> Self {
        self.config.backfill_scale = scale;
        self
    }

    pub fn backfill_quality(mut self, q: u8) -> Self {
        self.config.backfill_quality = q.clamp(1, 100);
        self
    }

    pub fn page_timeout_secs(mut self, secs: u64) -> Self {
        self.config.page_timeout_secs = secs;
        self
    }

    pub fn job_timeout_secs(mut self, secs: u64) -> Self {
        self.config.job_timeout_secs = secs;
        self
    }

    pub fn workers(mut self, n: usize) -> Self {
        self.config.workers = n.max(1);
        self
    }

    pub fn pdfium_library(mut self, path: impl Into<PathBuf>) -> Self {
        self.config.pdfium_library = Some(path.into());
        self
    }

    pub fn progress_callback(mut self, cb: crate::progress::ProgressCallback) -> Self {
        self.config.progress_callback = Some(cb);
        self
    }

    /// Build the configuration, validating constraints.
    pub fn build(self) -> Result<ConversionConfig, ConvertError> {
        let c = &self.config;
        for (name, scale) in [("page_scale", c.page_scale), ("backfill_scale", c.backfill_scale)] {
            if !(scale.is_finite() && scale > 0.0 && scale <= 10.0) {
                return Err(ConvertError::InvalidConfig(format!(
                    "{name} must be in (0, 10], got {scale}"
                )));
            }
        }
        for (name, dir) in [("books_dir", &c.books_dir), ("thumbnails_dir", &c.thumbnails_dir)] {
            if dir.is_empty() || dir.contains("..") || dir.starts_with('/') {
                return Err(ConvertError::InvalidConfig(format!(
                    "{name} must be a relative subdirectory, got '{dir}'"
                )));
            }
        }
        if c.books_dir == c.thumbnails_dir {
            return Err(ConvertError::InvalidConfig(
                "books_dir and thumbnails_dir must differ".into(),
            ));
        }
        if c.page_timeout_secs == 0 || c.job_timeout_secs == 0 {
            return Err(ConvertError::InvalidConfig("Timeouts must be ≥ 1s".into()));
        }
        Ok(self.config)
    }
}
