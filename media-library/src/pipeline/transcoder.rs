//! The transcoding seam.
//!
//! Every media transformation goes through [`MediaTranscoder`], so the
//! watermark pipeline can run against a scripted backend in tests.

use std::path::{Path, PathBuf};

use async_trait::async_trait;

use crate::Result;
use crate::progress::ProgressReporter;

/// Scale a video to a fixed width, height following the aspect ratio.
#[derive(Debug, Clone)]
pub struct VideoResize {
    pub input: PathBuf,
    pub output: PathBuf,
    pub width: u32,
}

/// Composite a still image over a video at a fixed offset.
#[derive(Debug, Clone)]
pub struct VideoOverlay {
    pub input: PathBuf,
    pub overlay: PathBuf,
    pub output: PathBuf,
    pub offset: (u32, u32),
}

/// Downscale and recompress an image.
#[derive(Debug, Clone)]
pub struct ImageCompress {
    pub input: PathBuf,
    pub output: PathBuf,
    pub width: u32,
    /// JPEG quality, 1..=100.
    pub quality: u8,
}

/// Print a line of text onto an image.
#[derive(Debug, Clone)]
pub struct TextOverlay {
    pub input: PathBuf,
    pub output: PathBuf,
    pub text: String,
    pub font_size: u32,
    pub offset: (u32, u32),
    /// JPEG quality of the re-encoded output, 1..=100.
    pub quality: u8,
}

/// Backend performing the actual media transformations.
///
/// Implementations write only to the requested output path and never touch
/// their inputs; cleanup belongs to the caller.
#[async_trait]
pub trait MediaTranscoder: Send + Sync {
    /// Backend name for logs.
    fn name(&self) -> &'static str;

    /// Pixel width of an image.
    async fn probe_width(&self, image: &Path) -> Result<u32>;

    async fn resize_video(&self, job: &VideoResize, progress: &ProgressReporter) -> Result<()>;

    async fn overlay_video(&self, job: &VideoOverlay, progress: &ProgressReporter) -> Result<()>;

    async fn compress_image(&self, job: &ImageCompress) -> Result<()>;

    async fn print_text(&self, job: &TextOverlay) -> Result<()>;
}
