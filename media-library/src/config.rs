//! Library configuration.
//!
//! Values come from built-in defaults, optionally overridden by a `.env`
//! file and `MEDIA_*` environment variables.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::{Error, Result};

/// Default SQLite database URL.
pub const DEFAULT_DATABASE_URL: &str = "sqlite:media-library.db?mode=rwc";

/// Default bound on position-assignment retries.
pub const DEFAULT_POSITION_RETRY_LIMIT: usize = 10;

/// Top-level configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LibraryConfig {
    pub database_url: String,
    pub storage: StorageLayout,
    pub pipeline: PipelineConfig,
    pub position_retry_limit: usize,
    /// Directory for rolling log files; console only when unset.
    pub log_dir: Option<PathBuf>,
}

impl Default for LibraryConfig {
    fn default() -> Self {
        Self {
            database_url: DEFAULT_DATABASE_URL.to_string(),
            storage: StorageLayout::default(),
            pipeline: PipelineConfig::default(),
            position_retry_limit: DEFAULT_POSITION_RETRY_LIMIT,
            log_dir: None,
        }
    }
}

/// On-disk roots for every managed tree.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StorageLayout {
    pub stills: PathBuf,
    pub still_thumbnails: PathBuf,
    pub videos: PathBuf,
    pub video_covers: PathBuf,
    pub tracks: PathBuf,
    pub track_covers: PathBuf,
    /// Staging area for uploads and intermediates; cleared at startup.
    pub temp: PathBuf,
}

impl StorageLayout {
    /// Standard layout rooted at `root`.
    pub fn rooted_at(root: impl AsRef<Path>) -> Self {
        let root = root.as_ref();
        Self {
            stills: root.join("stills"),
            still_thumbnails: root.join("stills").join("thumbnails"),
            videos: root.join("videos").join("videos"),
            video_covers: root.join("videos").join("images"),
            tracks: root.join("music").join("music"),
            track_covers: root.join("music").join("images"),
            temp: root.join("temp"),
        }
    }
}

impl Default for StorageLayout {
    fn default() -> Self {
        Self::rooted_at("assets")
    }
}

/// Transcoding and watermark parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub ffmpeg_path: String,
    pub ffprobe_path: String,
    /// Target width for transcoded videos (height follows aspect ratio).
    pub video_width: u32,
    pub video_extension: String,
    pub image_extension: String,
    pub audio_extension: String,
    /// PNG composited onto every video.
    pub watermark_image: PathBuf,
    pub watermark_offset: (u32, u32),
    /// Text printed onto every still and cover image.
    pub watermark_text: String,
    pub display_width: u32,
    pub display_quality: u8,
    pub thumbnail_width: u32,
    pub thumbnail_quality: u8,
    /// Source images wider than this get `large_font_size`.
    pub font_threshold_width: u32,
    pub large_font_size: u32,
    pub small_font_size: u32,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            ffmpeg_path: "ffmpeg".to_string(),
            ffprobe_path: "ffprobe".to_string(),
            video_width: 1920,
            video_extension: "mp4".to_string(),
            image_extension: "jpg".to_string(),
            audio_extension: "mp3".to_string(),
            watermark_image: PathBuf::from("public/VideoWaterMark.png"),
            watermark_offset: (10, 10),
            watermark_text: "@Christoph  Bärtsch".to_string(),
            display_width: 1080,
            display_quality: 60,
            thumbnail_width: 100,
            thumbnail_quality: 40,
            font_threshold_width: 2000,
            large_font_size: 64,
            small_font_size: 16,
        }
    }
}

impl PipelineConfig {
    /// Font size for a source image of the given width.
    pub fn font_size_for(&self, source_width: u32) -> u32 {
        if source_width > self.font_threshold_width {
            self.large_font_size
        } else {
            self.small_font_size
        }
    }
}

impl LibraryConfig {
    /// Load defaults, then apply `.env` and environment overrides.
    pub fn from_env() -> Result<Self> {
        dotenvy::dotenv().ok();
        let mut config = Self::default();
        config.apply_overrides(|key| std::env::var(key).ok())?;
        Ok(config)
    }

    /// Apply overrides from an arbitrary key lookup.
    pub fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) -> Result<()> {
        if let Some(url) = lookup("MEDIA_DATABASE_URL") {
            self.database_url = url;
        }
        if let Some(root) = lookup("MEDIA_ROOT") {
            self.storage = StorageLayout::rooted_at(root);
        }
        if let Some(temp) = lookup("MEDIA_TEMP_DIR") {
            self.storage.temp = PathBuf::from(temp);
        }
        if let Some(dir) = lookup("MEDIA_LOG_DIR") {
            self.log_dir = Some(PathBuf::from(dir));
        }
        if let Some(path) = lookup("FFMPEG_PATH") {
            self.pipeline.ffmpeg_path = path;
        }
        if let Some(path) = lookup("FFPROBE_PATH") {
            self.pipeline.ffprobe_path = path;
        }
        if let Some(path) = lookup("MEDIA_WATERMARK_IMAGE") {
            self.pipeline.watermark_image = PathBuf::from(path);
        }
        if let Some(text) = lookup("MEDIA_WATERMARK_TEXT") {
            self.pipeline.watermark_text = text;
        }
        if let Some(raw) = lookup("MEDIA_POSITION_RETRY_LIMIT") {
            self.position_retry_limit = raw.parse().map_err(|_| {
                Error::config(format!("MEDIA_POSITION_RETRY_LIMIT is not a number: {raw}"))
            })?;
        }
        self.validate()
    }

    pub fn validate(&self) -> Result<()> {
        if self.database_url.trim().is_empty() {
            return Err(Error::config("database_url must not be empty"));
        }
        if self.position_retry_limit == 0 {
            return Err(Error::config("position_retry_limit must be at least 1"));
        }
        let p = &self.pipeline;
        if p.display_quality == 0 || p.display_quality > 100 {
            return Err(Error::config("display_quality must be within 1..=100"));
        }
        if p.thumbnail_quality == 0 || p.thumbnail_quality > 100 {
            return Err(Error::config("thumbnail_quality must be within 1..=100"));
        }
        if p.video_width == 0 || p.display_width == 0 || p.thumbnail_width == 0 {
            return Err(Error::config("target widths must be non-zero"));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key: &str| map.get(key).cloned()
    }

    #[test]
    fn default_layout_matches_asset_tree() {
        let layout = StorageLayout::default();
        assert_eq!(layout.stills, PathBuf::from("assets/stills"));
        assert_eq!(layout.still_thumbnails, PathBuf::from("assets/stills/thumbnails"));
        assert_eq!(layout.videos, PathBuf::from("assets/videos/videos"));
        assert_eq!(layout.video_covers, PathBuf::from("assets/videos/images"));
        assert_eq!(layout.temp, PathBuf::from("assets/temp"));
    }

    #[test]
    fn overrides_apply() {
        let mut config = LibraryConfig::default();
        config
            .apply_overrides(lookup(&[
                ("MEDIA_ROOT", "/data"),
                ("FFMPEG_PATH", "/opt/ffmpeg"),
                ("MEDIA_POSITION_RETRY_LIMIT", "3"),
            ]))
            .unwrap();
        assert_eq!(config.storage.tracks, PathBuf::from("/data/music/music"));
        assert_eq!(config.storage.temp, PathBuf::from("/data/temp"));
        assert_eq!(config.pipeline.ffmpeg_path, "/opt/ffmpeg");
        assert_eq!(config.position_retry_limit, 3);
    }

    #[test]
    fn invalid_retry_limit_is_rejected() {
        let mut config = LibraryConfig::default();
        let err = config
            .apply_overrides(lookup(&[("MEDIA_POSITION_RETRY_LIMIT", "many")]))
            .unwrap_err();
        assert!(matches!(err, Error::Configuration(_)));

        let err = config
            .apply_overrides(lookup(&[("MEDIA_POSITION_RETRY_LIMIT", "0")]))
            .unwrap_err();
        assert!(matches!(err, Error::Configuration(_)));
    }

    #[test]
    fn font_size_threshold() {
        let p = PipelineConfig::default();
        assert_eq!(p.font_size_for(4000), p.large_font_size);
        assert_eq!(p.font_size_for(p.font_threshold_width), p.small_font_size);
        assert_eq!(p.font_size_for(800), p.small_font_size);
    }

    #[test]
    fn config_deserializes_with_defaults() {
        let config: LibraryConfig =
            serde_json::from_str(r#"{"database_url": "sqlite::memory:"}"#).unwrap();
        assert_eq!(config.database_url, "sqlite::memory:");
        assert_eq!(config.position_retry_limit, DEFAULT_POSITION_RETRY_LIMIT);
        assert_eq!(config.pipeline.video_width, 1920);
    }
}
