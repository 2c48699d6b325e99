//! Staged watermarking flows.
//!
//! Each flow takes ownership of its upload: on success and on failure the
//! upload is gone afterwards. Every intermediate lives in the staging
//! directory and is removed as soon as the next stage no longer needs it,
//! so a failed flow leaves nothing behind.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use tracing::{debug, info, instrument};

use super::transcoder::{ImageCompress, MediaTranscoder, TextOverlay, VideoOverlay, VideoResize};
use crate::config::PipelineConfig;
use crate::progress::{ProgressReporter, ProgressStage};
use crate::storage::{AssetRef, ContentStore};
use crate::utils::fs::discard;
use crate::{Error, Result};

pub struct WatermarkPipeline {
    transcoder: Arc<dyn MediaTranscoder>,
    store: Arc<ContentStore>,
    config: PipelineConfig,
}

impl WatermarkPipeline {
    pub fn new(
        transcoder: Arc<dyn MediaTranscoder>,
        store: Arc<ContentStore>,
        config: PipelineConfig,
    ) -> Self {
        Self {
            transcoder,
            store,
            config,
        }
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// Move a finished staging file into the tree, as the last stage.
    async fn commit(&self, staged: &Path, target: &AssetRef) -> Result<PathBuf> {
        match self.store.place(staged, target).await {
            Ok(path) => Ok(path),
            Err(e) => {
                discard(staged).await;
                Err(Error::pipeline("commit", e.to_string()))
            }
        }
    }

    /// Resize, overlay the watermark image, then commit as `target`.
    #[instrument(skip(self, progress), fields(transcoder = self.transcoder.name(), id = %target.id))]
    pub async fn watermark_video(
        &self,
        upload: &Path,
        target: &AssetRef,
        progress: &ProgressReporter,
    ) -> Result<PathBuf> {
        let ext = &self.config.video_extension;

        let resized = self.store.staging_path(ext);
        let resize = VideoResize {
            input: upload.to_path_buf(),
            output: resized.clone(),
            width: self.config.video_width,
        };
        let outcome = self.transcoder.resize_video(&resize, progress).await;
        discard(upload).await;
        if let Err(e) = outcome {
            discard(&resized).await;
            return Err(e);
        }

        let overlaid = self.store.staging_path(ext);
        let overlay = VideoOverlay {
            input: resized.clone(),
            overlay: self.config.watermark_image.clone(),
            output: overlaid.clone(),
            offset: self.config.watermark_offset,
        };
        let outcome = self.transcoder.overlay_video(&overlay, progress).await;
        discard(&resized).await;
        if let Err(e) = outcome {
            discard(&overlaid).await;
            return Err(e);
        }

        let path = self.commit(&overlaid, target).await?;
        info!(path = %path.display(), "Video watermarked");
        Ok(path)
    }

    /// Compress to display size, print the watermark text, then commit as
    /// `target`.
    ///
    /// The font size follows the width of the original upload.
    #[instrument(skip(self, progress), fields(transcoder = self.transcoder.name(), id = %target.id))]
    pub async fn watermark_image(
        &self,
        upload: &Path,
        target: &AssetRef,
        progress: &ProgressReporter,
    ) -> Result<PathBuf> {
        let ext = &self.config.image_extension;
        progress.report(ProgressStage::ImageConvert, 0);

        let source_width = match self.transcoder.probe_width(upload).await {
            Ok(w) => w,
            Err(e) => {
                discard(upload).await;
                return Err(e);
            }
        };

        let compressed = self.store.staging_path(ext);
        let compress = ImageCompress {
            input: upload.to_path_buf(),
            output: compressed.clone(),
            width: self.config.display_width,
            quality: self.config.display_quality,
        };
        let outcome = self.transcoder.compress_image(&compress).await;
        discard(upload).await;
        if let Err(e) = outcome {
            discard(&compressed).await;
            return Err(e);
        }
        progress.report(ProgressStage::ImageConvert, 100);

        progress.report(ProgressStage::Watermarking, 0);
        let printed = self.store.staging_path(ext);
        let text = TextOverlay {
            input: compressed.clone(),
            output: printed.clone(),
            text: self.config.watermark_text.clone(),
            font_size: self.config.font_size_for(source_width),
            offset: self.config.watermark_offset,
            quality: self.config.display_quality,
        };
        debug!(source_width, font_size = text.font_size, "Printing watermark text");
        let outcome = self.transcoder.print_text(&text).await;
        discard(&compressed).await;
        if let Err(e) = outcome {
            discard(&printed).await;
            return Err(e);
        }
        progress.report(ProgressStage::Watermarking, 100);

        self.commit(&printed, target).await
    }

    /// Small preview of `source` committed as `target`. The source is left
    /// in place.
    pub async fn thumbnail(&self, source: &Path, target: &AssetRef) -> Result<PathBuf> {
        let staged = self.store.staging_path(&self.config.image_extension);
        let job = ImageCompress {
            input: source.to_path_buf(),
            output: staged.clone(),
            width: self.config.thumbnail_width,
            quality: self.config.thumbnail_quality,
        };
        if let Err(e) = self.transcoder.compress_image(&job).await {
            discard(&staged).await;
            return Err(e);
        }
        self.commit(&staged, target).await
    }
}
