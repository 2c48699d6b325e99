//! Service container for dependency injection.
//!
//! The ServiceContainer owns the database pool, the content store, the
//! progress broker and the ingestion coordinator built on top of them.

use std::sync::Arc;

use sqlx::SqlitePool;
use tracing::info;

use crate::Result;
use crate::config::LibraryConfig;
use crate::database;
use crate::database::models::{StillDbModel, TrackDbModel, VideoDbModel};
use crate::ingest::IngestionCoordinator;
use crate::pipeline::{FfmpegTranscoder, MediaTranscoder, WatermarkPipeline};
use crate::progress::ProgressBroker;
use crate::storage::ContentStore;

/// Service container holding all library services.
pub struct ServiceContainer {
    /// Database connection pool.
    pub pool: SqlitePool,
    /// Managed file trees.
    pub store: Arc<ContentStore>,
    /// Progress channels for running ingestions.
    pub broker: Arc<ProgressBroker>,
    /// Entry point for every mutating operation.
    pub coordinator: Arc<IngestionCoordinator>,
}

impl ServiceContainer {
    /// Open the database, run migrations, prepare storage and wire the
    /// ffmpeg backend.
    pub async fn from_config(config: &LibraryConfig) -> Result<Self> {
        config.validate()?;
        let pool = database::init_pool(&config.database_url).await?;
        database::run_migrations(&pool).await?;
        let transcoder: Arc<dyn MediaTranscoder> =
            Arc::new(FfmpegTranscoder::from_config(&config.pipeline));
        Self::with_transcoder(pool, config, transcoder).await
    }

    /// Build the container on an already-migrated pool with a custom
    /// transcoding backend.
    pub async fn with_transcoder(
        pool: SqlitePool,
        config: &LibraryConfig,
        transcoder: Arc<dyn MediaTranscoder>,
    ) -> Result<Self> {
        info!("Initializing service container");

        let store = Arc::new(ContentStore::new(config.storage.clone(), &config.pipeline));
        store.prepare().await?;

        let broker = Arc::new(ProgressBroker::new());
        let pipeline = Arc::new(WatermarkPipeline::new(
            transcoder,
            store.clone(),
            config.pipeline.clone(),
        ));
        let coordinator = Arc::new(IngestionCoordinator::new(
            pool.clone(),
            store.clone(),
            pipeline,
            broker.clone(),
            config.position_retry_limit,
        ));

        Ok(Self {
            pool,
            store,
            broker,
            coordinator,
        })
    }

    /// Log collection sizes and verify position density.
    pub async fn report(&self) -> Result<()> {
        let stills = self.coordinator.count::<StillDbModel>().await?;
        let videos = self.coordinator.count::<VideoDbModel>().await?;
        let tracks = self.coordinator.count::<TrackDbModel>().await?;
        self.coordinator.audit().await?;
        info!(stills, videos, tracks, "Media library ready");
        Ok(())
    }
}
