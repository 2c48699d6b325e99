//! Ingestion and removal of media items.
//!
//! [`IngestionCoordinator`] ties the pieces together: it fingerprints the
//! upload, rejects duplicates, runs the watermark pipeline, places the
//! resulting files and finally inserts the record through the position
//! ledger. Any failure removes every file the call produced.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{info, instrument, warn};
use uuid::Uuid;

use crate::database::DbPool;
use crate::database::models::{
    MediaItem, MediaKind, MediaRecord, StillDbModel, TrackDbModel, VideoDbModel,
};
use crate::database::repositories::MediaRepository;
use crate::ledger::{PositionLedger, ReplaceEntry};
use crate::pipeline::WatermarkPipeline;
use crate::progress::{ProgressBroker, ProgressReporter, ProgressStage, ProgressToken};
use crate::storage::{AssetClass, AssetRef, ContentStore, hash_file};
use crate::utils::fs::discard;
use crate::{Error, Result};

/// A still image upload.
#[derive(Debug, Clone)]
pub struct StillUpload {
    pub image: PathBuf,
    /// Insert here instead of at the tail.
    pub position: Option<i64>,
}

/// A video upload with its three cover pictures.
#[derive(Debug, Clone)]
pub struct VideoUpload {
    pub video: PathBuf,
    pub covers: [PathBuf; 3],
    pub line1: String,
    pub line2: String,
    pub url: String,
}

/// An audio track upload with its cover picture.
#[derive(Debug, Clone)]
pub struct TrackUpload {
    pub audio: PathBuf,
    pub cover: PathBuf,
    pub url: String,
}

/// Result of a duplicate check.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DuplicateCheck {
    pub hash: String,
    pub exists: bool,
    pub existing_id: Option<String>,
}

/// Files produced by an in-flight ingestion, removed again on failure.
struct Staged<'a> {
    store: &'a ContentStore,
    placed: Vec<AssetRef>,
    uploads: Vec<PathBuf>,
}

impl<'a> Staged<'a> {
    fn new(store: &'a ContentStore, uploads: impl IntoIterator<Item = PathBuf>) -> Self {
        Self {
            store,
            placed: Vec::new(),
            uploads: uploads.into_iter().collect(),
        }
    }

    fn placed(&mut self, asset: AssetRef) {
        self.placed.push(asset);
    }

    async fn rollback(self) {
        self.store.remove_all(&self.placed).await;
        for upload in &self.uploads {
            discard(upload).await;
        }
    }
}

/// Selects the ledger for a record type.
pub trait Collection<R: MediaRecord> {
    fn ledger(&self) -> &PositionLedger<R>;
}

pub struct IngestionCoordinator {
    store: Arc<ContentStore>,
    pipeline: Arc<WatermarkPipeline>,
    broker: Arc<ProgressBroker>,
    stills: PositionLedger<StillDbModel>,
    videos: PositionLedger<VideoDbModel>,
    tracks: PositionLedger<TrackDbModel>,
}

impl Collection<StillDbModel> for IngestionCoordinator {
    fn ledger(&self) -> &PositionLedger<StillDbModel> {
        &self.stills
    }
}

impl Collection<VideoDbModel> for IngestionCoordinator {
    fn ledger(&self) -> &PositionLedger<VideoDbModel> {
        &self.videos
    }
}

impl Collection<TrackDbModel> for IngestionCoordinator {
    fn ledger(&self) -> &PositionLedger<TrackDbModel> {
        &self.tracks
    }
}

impl IngestionCoordinator {
    pub fn new(
        pool: DbPool,
        store: Arc<ContentStore>,
        pipeline: Arc<WatermarkPipeline>,
        broker: Arc<ProgressBroker>,
        position_retry_limit: usize,
    ) -> Self {
        Self {
            stills: PositionLedger::new(pool.clone(), position_retry_limit),
            videos: PositionLedger::new(pool.clone(), position_retry_limit),
            tracks: PositionLedger::new(pool, position_retry_limit),
            store,
            pipeline,
            broker,
        }
    }

    /// Ledger of the collection holding `R`.
    pub fn collection<R: MediaRecord>(&self) -> &PositionLedger<R>
    where
        Self: Collection<R>,
    {
        <Self as Collection<R>>::ledger(self)
    }

    pub fn store(&self) -> &ContentStore {
        &self.store
    }

    pub fn broker(&self) -> &Arc<ProgressBroker> {
        &self.broker
    }

    /// Open a progress channel for an upcoming ingestion.
    pub fn open_progress(&self) -> ProgressToken {
        self.broker.open()
    }

    fn reporter(&self, token: Option<ProgressToken>) -> ProgressReporter {
        ProgressReporter::new(self.broker.clone(), token)
    }

    /// Release the progress channel according to the outcome.
    fn settle<T>(&self, token: Option<ProgressToken>, result: &Result<T>) {
        let Some(token) = token else {
            return;
        };
        match result {
            Ok(_) => self.broker.close(&token),
            Err(_) => self.broker.fail(&token),
        }
    }

    /// Fingerprint `path` and look it up in the collection of `R`.
    pub async fn check_duplicate<R: MediaRecord>(&self, path: &Path) -> Result<DuplicateCheck>
    where
        Self: Collection<R>,
    {
        let hash = hash_file(path).await?;
        let existing = self.collection::<R>().repository().find_by_hash(&hash).await?;
        Ok(DuplicateCheck {
            exists: existing.is_some(),
            existing_id: existing.map(|r: R| r.id().to_string()),
            hash,
        })
    }

    /// Hash the primary upload and fail with `Conflict` if it is known.
    async fn fingerprint<R: MediaRecord>(&self, path: &Path) -> Result<String>
    where
        Self: Collection<R>,
    {
        let check = self.check_duplicate::<R>(path).await?;
        if let Some(existing) = check.existing_id {
            return Err(Error::conflict(format!(
                "{} with identical content already exists ({existing})",
                R::KIND.entity_name()
            )));
        }
        Ok(check.hash)
    }

    #[instrument(skip(self, upload), fields(image = %upload.image.display()))]
    pub async fn create_still(
        &self,
        upload: StillUpload,
        token: Option<ProgressToken>,
    ) -> Result<StillDbModel> {
        let reporter = self.reporter(token);
        let mut staged = Staged::new(&self.store, [upload.image.clone()]);
        let result = self.ingest_still(&upload, &reporter, &mut staged).await;
        if let Err(e) = &result {
            warn!(error = %e, "Still ingestion failed");
            staged.rollback().await;
        }
        self.settle(token, &result);
        result
    }

    async fn ingest_still(
        &self,
        upload: &StillUpload,
        progress: &ProgressReporter,
        staged: &mut Staged<'_>,
    ) -> Result<StillDbModel> {
        let hash = self.fingerprint::<StillDbModel>(&upload.image).await?;
        let id = Uuid::new_v4().to_string();

        let thumb = AssetRef::new(AssetClass::StillThumbnail, &id);
        self.pipeline.thumbnail(&upload.image, &thumb).await?;
        staged.placed(thumb);

        let still = AssetRef::new(AssetClass::Still, &id);
        self.pipeline
            .watermark_image(&upload.image, &still, progress)
            .await?;
        staged.placed(still);

        let record = self
            .stills
            .insert(StillDbModel::new(id, hash), upload.position)
            .await?;
        info!(id = %record.id, position = record.position, "Still created");
        Ok(record)
    }

    #[instrument(skip(self, upload), fields(video = %upload.video.display()))]
    pub async fn create_video(
        &self,
        upload: VideoUpload,
        token: Option<ProgressToken>,
    ) -> Result<VideoDbModel> {
        let reporter = self.reporter(token);
        let mut uploads = vec![upload.video.clone()];
        uploads.extend(upload.covers.iter().cloned());
        let mut staged = Staged::new(&self.store, uploads);
        let result = self.ingest_video(&upload, &reporter, &mut staged).await;
        if let Err(e) = &result {
            warn!(error = %e, "Video ingestion failed");
            staged.rollback().await;
        }
        self.settle(token, &result);
        result
    }

    async fn ingest_video(
        &self,
        upload: &VideoUpload,
        progress: &ProgressReporter,
        staged: &mut Staged<'_>,
    ) -> Result<VideoDbModel> {
        progress.report(ProgressStage::HashingVideo, 0);
        let hash = self.fingerprint::<VideoDbModel>(&upload.video).await?;
        progress.report(ProgressStage::HashingVideo, 100);

        let id = Uuid::new_v4().to_string();
        let video = AssetRef::new(AssetClass::Video, &id);
        self.pipeline
            .watermark_video(&upload.video, &video, progress)
            .await?;
        staged.placed(video);

        let mut picture_ids = Vec::with_capacity(upload.covers.len());
        for cover in &upload.covers {
            let pic_id = Uuid::new_v4().to_string();
            let asset = AssetRef::new(AssetClass::VideoCover, &pic_id);
            self.pipeline.watermark_image(cover, &asset, progress).await?;
            staged.placed(asset);
            picture_ids.push(pic_id);
        }
        let [picture1_id, picture2_id, picture3_id]: [String; 3] = picture_ids
            .try_into()
            .map_err(|_| Error::Other("expected three cover pictures".to_string()))?;

        let now = crate::database::time::now_ms();
        let record = VideoDbModel {
            id,
            hash,
            position: 0,
            picture1_id,
            picture2_id,
            picture3_id,
            line1: upload.line1.clone(),
            line2: upload.line2.clone(),
            url: upload.url.clone(),
            created_at: now,
            updated_at: now,
        };
        let record = self.videos.insert(record, None).await?;
        info!(id = %record.id, position = record.position, "Video created");
        Ok(record)
    }

    #[instrument(skip(self, upload), fields(audio = %upload.audio.display()))]
    pub async fn create_track(
        &self,
        upload: TrackUpload,
        token: Option<ProgressToken>,
    ) -> Result<TrackDbModel> {
        let reporter = self.reporter(token);
        let mut staged = Staged::new(
            &self.store,
            [upload.audio.clone(), upload.cover.clone()],
        );
        let result = self.ingest_track(&upload, &reporter, &mut staged).await;
        if let Err(e) = &result {
            warn!(error = %e, "Track ingestion failed");
            staged.rollback().await;
        }
        self.settle(token, &result);
        result
    }

    async fn ingest_track(
        &self,
        upload: &TrackUpload,
        progress: &ProgressReporter,
        staged: &mut Staged<'_>,
    ) -> Result<TrackDbModel> {
        let hash = self.fingerprint::<TrackDbModel>(&upload.audio).await?;

        // Audio is stored as uploaded.
        let id = Uuid::new_v4().to_string();
        let track = AssetRef::new(AssetClass::Track, &id);
        self.store.place(&upload.audio, &track).await?;
        staged.placed(track);

        let picture_id = Uuid::new_v4().to_string();
        let cover = AssetRef::new(AssetClass::TrackCover, &picture_id);
        self.pipeline
            .watermark_image(&upload.cover, &cover, progress)
            .await?;
        staged.placed(cover);

        let now = crate::database::time::now_ms();
        let record = TrackDbModel {
            id,
            hash,
            position: 0,
            picture_id,
            url: upload.url.clone(),
            created_at: now,
            updated_at: now,
        };
        let record = self.tracks.insert(record, None).await?;
        info!(id = %record.id, position = record.position, "Track created");
        Ok(record)
    }

    /// Remove an item, compact its collection and delete its files.
    ///
    /// File removal happens after the commit; a file that cannot be removed
    /// is logged and left behind.
    #[instrument(skip(self), fields(kind = %R::KIND))]
    pub async fn delete<R: MediaRecord>(&self, id: &str) -> Result<R>
    where
        Self: Collection<R>,
    {
        let record = self.collection::<R>().remove_and_compact(id).await?;
        self.store.remove_all(&record.owned_assets()).await;
        info!(id, "Deleted");
        Ok(record)
    }

    pub async fn relocate<R: MediaRecord>(&self, id: &str, position: i64) -> Result<R>
    where
        Self: Collection<R>,
    {
        self.collection::<R>().relocate(id, position).await
    }

    pub async fn swap<R: MediaRecord>(&self, id_a: &str, id_b: &str) -> Result<(R, R)>
    where
        Self: Collection<R>,
    {
        self.collection::<R>().swap(id_a, id_b).await
    }

    pub async fn replace_all<R: MediaRecord>(
        &self,
        entries: Vec<ReplaceEntry<R::Patch>>,
    ) -> Result<Vec<R>>
    where
        Self: Collection<R>,
    {
        self.collection::<R>().bulk_replace(entries).await
    }

    pub async fn list<R: MediaRecord>(&self) -> Result<Vec<R>>
    where
        Self: Collection<R>,
    {
        self.collection::<R>().repository().get_all().await
    }

    pub async fn list_below<R: MediaRecord>(&self, threshold: i64) -> Result<Vec<R>>
    where
        Self: Collection<R>,
    {
        self.collection::<R>().repository().list_below(threshold).await
    }

    pub async fn list_range<R: MediaRecord>(&self, start: i64, end: i64) -> Result<Vec<R>>
    where
        Self: Collection<R>,
    {
        self.collection::<R>().repository().list_range(start, end).await
    }

    pub async fn count<R: MediaRecord>(&self) -> Result<i64>
    where
        Self: Collection<R>,
    {
        self.collection::<R>().repository().count().await
    }

    pub async fn get<R: MediaRecord>(&self, id: &str) -> Result<R>
    where
        Self: Collection<R>,
    {
        self.collection::<R>().repository().get(id).await
    }

    /// Open the primary file of an item for streaming.
    pub async fn open_primary<R: MediaRecord>(&self, id: &str) -> Result<tokio::fs::File>
    where
        Self: Collection<R>,
    {
        let record = self.get::<R>(id).await?;
        self.store
            .open(&AssetRef::new(R::KIND.primary_class(), record.id()))
            .await
    }

    /// Look up any item by kind and id.
    pub async fn find(&self, kind: MediaKind, id: &str) -> Result<MediaItem> {
        Ok(match kind {
            MediaKind::Still => self.get::<StillDbModel>(id).await?.into(),
            MediaKind::Video => self.get::<VideoDbModel>(id).await?.into(),
            MediaKind::Track => self.get::<TrackDbModel>(id).await?.into(),
        })
    }

    /// Verify position density in every collection.
    pub async fn audit(&self) -> Result<()> {
        self.stills.audit().await?;
        self.videos.audit().await?;
        self.tracks.audit().await
    }
}
