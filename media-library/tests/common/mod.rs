//! Shared fixtures for integration tests.
#![allow(dead_code)]

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::atomic::{AtomicU32, Ordering};

use async_trait::async_trait;
use media_library::config::{LibraryConfig, StorageLayout};
use media_library::database::{DbPool, init_pool, run_migrations};
use media_library::ingest::IngestionCoordinator;
use media_library::pipeline::{
    ImageCompress, MediaTranscoder, TextOverlay, VideoOverlay, VideoResize,
};
use media_library::progress::{ProgressReporter, ProgressStage};
use media_library::services::ServiceContainer;
use media_library::{Error, Result};
use tempfile::TempDir;

/// File-backed pool with migrations applied.
pub async fn test_pool(dir: &Path) -> DbPool {
    let url = format!("sqlite:{}?mode=rwc", dir.join("library.db").display());
    let pool = init_pool(&url).await.expect("Failed to create test pool");
    run_migrations(&pool)
        .await
        .expect("Failed to run migrations");
    pool
}

/// Transcoder that copies inputs to outputs and can be told to fail at a
/// named stage. A failing stage leaves a partial output behind, like a
/// real encoder killed halfway.
pub struct ScriptedTranscoder {
    fail_stage: Mutex<Option<&'static str>>,
    width: AtomicU32,
    font_sizes: Mutex<Vec<u32>>,
    text_qualities: Mutex<Vec<u8>>,
}

impl ScriptedTranscoder {
    pub fn new() -> Self {
        Self {
            fail_stage: Mutex::new(None),
            width: AtomicU32::new(1000),
            font_sizes: Mutex::new(Vec::new()),
            text_qualities: Mutex::new(Vec::new()),
        }
    }

    pub fn fail_at(&self, stage: &'static str) {
        *self.fail_stage.lock().unwrap() = Some(stage);
    }

    pub fn set_width(&self, width: u32) {
        self.width.store(width, Ordering::SeqCst);
    }

    pub fn font_sizes(&self) -> Vec<u32> {
        self.font_sizes.lock().unwrap().clone()
    }

    pub fn text_qualities(&self) -> Vec<u8> {
        self.text_qualities.lock().unwrap().clone()
    }

    async fn produce(&self, stage: &'static str, input: &Path, output: &Path) -> Result<()> {
        if *self.fail_stage.lock().unwrap() == Some(stage) {
            tokio::fs::write(output, b"partial").await?;
            return Err(Error::pipeline(stage, "scripted failure"));
        }
        tokio::fs::copy(input, output)
            .await
            .map_err(|e| Error::pipeline(stage, e.to_string()))?;
        Ok(())
    }
}

#[async_trait]
impl MediaTranscoder for ScriptedTranscoder {
    fn name(&self) -> &'static str {
        "scripted"
    }

    async fn probe_width(&self, _image: &Path) -> Result<u32> {
        if *self.fail_stage.lock().unwrap() == Some("probe") {
            return Err(Error::pipeline("probe", "scripted failure"));
        }
        Ok(self.width.load(Ordering::SeqCst))
    }

    async fn resize_video(&self, job: &VideoResize, progress: &ProgressReporter) -> Result<()> {
        progress.report(ProgressStage::VideoConvert, 50);
        self.produce("resize", &job.input, &job.output).await?;
        progress.report(ProgressStage::VideoConvert, 100);
        Ok(())
    }

    async fn overlay_video(&self, job: &VideoOverlay, progress: &ProgressReporter) -> Result<()> {
        progress.report(ProgressStage::Watermarking, 50);
        self.produce("overlay", &job.input, &job.output).await?;
        progress.report(ProgressStage::Watermarking, 100);
        Ok(())
    }

    async fn compress_image(&self, job: &ImageCompress) -> Result<()> {
        self.produce("compress", &job.input, &job.output).await
    }

    async fn print_text(&self, job: &TextOverlay) -> Result<()> {
        self.font_sizes.lock().unwrap().push(job.font_size);
        self.text_qualities.lock().unwrap().push(job.quality);
        self.produce("text-overlay", &job.input, &job.output).await
    }
}

/// A library rooted in a temporary directory.
pub struct Harness {
    pub dir: TempDir,
    pub config: LibraryConfig,
    pub services: ServiceContainer,
    pub transcoder: Arc<ScriptedTranscoder>,
}

impl Harness {
    pub async fn new() -> Self {
        let dir = tempfile::tempdir().unwrap();
        let config = LibraryConfig {
            storage: StorageLayout::rooted_at(dir.path().join("assets")),
            ..LibraryConfig::default()
        };
        let pool = test_pool(dir.path()).await;
        let transcoder = Arc::new(ScriptedTranscoder::new());
        let services = ServiceContainer::with_transcoder(pool, &config, transcoder.clone())
            .await
            .unwrap();
        Self {
            dir,
            config,
            services,
            transcoder,
        }
    }

    pub fn coordinator(&self) -> &IngestionCoordinator {
        &self.services.coordinator
    }

    /// Write an upload outside the managed trees.
    pub fn upload(&self, name: &str, bytes: &[u8]) -> PathBuf {
        let dir = self.dir.path().join("uploads");
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join(name);
        std::fs::write(&path, bytes).unwrap();
        path
    }

    /// Every committed file across all managed trees.
    pub fn stored_files(&self) -> Vec<PathBuf> {
        let layout = &self.config.storage;
        let mut files = Vec::new();
        for root in [
            &layout.stills,
            &layout.still_thumbnails,
            &layout.videos,
            &layout.video_covers,
            &layout.tracks,
            &layout.track_covers,
        ] {
            files.extend(files_in(root));
        }
        files
    }

    pub fn staging_files(&self) -> Vec<PathBuf> {
        files_in(&self.config.storage.temp)
    }
}

fn files_in(dir: &Path) -> Vec<PathBuf> {
    let Ok(entries) = std::fs::read_dir(dir) else {
        return Vec::new();
    };
    entries
        .filter_map(|e| e.ok())
        .map(|e| e.path())
        .filter(|p| p.is_file())
        .collect()
}
