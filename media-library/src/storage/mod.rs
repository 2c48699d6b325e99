//! Managed on-disk storage.
//!
//! Files are addressed by [`AssetRef`] (class + identifier); the path is
//! always computed from the configured [`StorageLayout`] and never stored.
//! Nothing outside [`ContentStore`] builds a final asset path.

pub mod hasher;

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::config::{PipelineConfig, StorageLayout};
use crate::utils::fs::{self, io_error};
use crate::{Error, Result};

pub use hasher::{hash_file, hash_reader};

/// Which managed tree an asset lives in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, strum::Display)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum AssetClass {
    Still,
    StillThumbnail,
    Video,
    VideoCover,
    Track,
    TrackCover,
}

/// Reference to a managed file.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AssetRef {
    pub class: AssetClass,
    pub id: String,
}

impl AssetRef {
    pub fn new(class: AssetClass, id: impl Into<String>) -> Self {
        Self {
            class,
            id: id.into(),
        }
    }
}

/// Places, removes and resolves managed files.
#[derive(Debug, Clone)]
pub struct ContentStore {
    layout: StorageLayout,
    image_extension: String,
    video_extension: String,
    audio_extension: String,
}

impl ContentStore {
    pub fn new(layout: StorageLayout, pipeline: &PipelineConfig) -> Self {
        Self {
            layout,
            image_extension: pipeline.image_extension.clone(),
            video_extension: pipeline.video_extension.clone(),
            audio_extension: pipeline.audio_extension.clone(),
        }
    }

    pub fn layout(&self) -> &StorageLayout {
        &self.layout
    }

    fn root_for(&self, class: AssetClass) -> &Path {
        match class {
            AssetClass::Still => &self.layout.stills,
            AssetClass::StillThumbnail => &self.layout.still_thumbnails,
            AssetClass::Video => &self.layout.videos,
            AssetClass::VideoCover => &self.layout.video_covers,
            AssetClass::Track => &self.layout.tracks,
            AssetClass::TrackCover => &self.layout.track_covers,
        }
    }

    fn extension_for(&self, class: AssetClass) -> &str {
        match class {
            AssetClass::Video => &self.video_extension,
            AssetClass::Track => &self.audio_extension,
            _ => &self.image_extension,
        }
    }

    /// Final location of `asset`.
    pub fn path_for(&self, asset: &AssetRef) -> PathBuf {
        self.root_for(asset.class)
            .join(format!("{}.{}", asset.id, self.extension_for(asset.class)))
    }

    /// Fresh, unused path in the staging directory.
    pub fn staging_path(&self, extension: &str) -> PathBuf {
        self.layout
            .temp
            .join(format!("{}.{}", Uuid::new_v4().simple(), extension))
    }

    /// Create every managed tree and empty the staging directory.
    ///
    /// Called once at process start; anything left in staging belongs to an
    /// operation that did not survive the previous run.
    pub async fn prepare(&self) -> Result<()> {
        for class in [
            AssetClass::Still,
            AssetClass::StillThumbnail,
            AssetClass::Video,
            AssetClass::VideoCover,
            AssetClass::Track,
            AssetClass::TrackCover,
        ] {
            fs::ensure_dir_all(self.root_for(class)).await?;
        }

        let temp = &self.layout.temp;
        match tokio::fs::remove_dir_all(temp).await {
            Ok(()) => info!(path = %temp.display(), "Cleared staging directory"),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(io_error("clearing staging directory", temp, e)),
        }
        fs::ensure_dir_all(temp).await
    }

    /// Move `source` into the managed tree as `asset`.
    ///
    /// Bytes are copied to a hidden temporary name next to the destination
    /// and renamed into place, so readers never observe a partial file.
    /// The source is removed only after the rename succeeds.
    pub async fn place(&self, source: &Path, asset: &AssetRef) -> Result<PathBuf> {
        let destination = self.path_for(asset);
        fs::ensure_parent_dir(&destination).await?;

        let partial = destination.with_file_name(format!(
            ".{}.{}.partial",
            asset.id,
            Uuid::new_v4().simple()
        ));

        if let Err(e) = tokio::fs::copy(source, &partial).await {
            fs::discard(&partial).await;
            return Err(io_error("copying into store", source, e));
        }
        if let Err(e) = tokio::fs::rename(&partial, &destination).await {
            fs::discard(&partial).await;
            return Err(io_error("committing", &destination, e));
        }
        fs::discard(source).await;

        debug!(class = %asset.class, id = %asset.id, "Placed asset");
        Ok(destination)
    }

    /// Remove `asset`; absence is not an error.
    pub async fn remove(&self, asset: &AssetRef) -> Result<()> {
        fs::remove_file_if_exists(&self.path_for(asset)).await?;
        Ok(())
    }

    /// Best-effort removal of several assets; failures are logged.
    pub async fn remove_all(&self, assets: &[AssetRef]) {
        for asset in assets {
            if let Err(e) = self.remove(asset).await {
                warn!(class = %asset.class, id = %asset.id, error = %e, "Failed to remove asset");
            }
        }
    }

    pub async fn exists(&self, asset: &AssetRef) -> bool {
        tokio::fs::try_exists(self.path_for(asset))
            .await
            .unwrap_or(false)
    }

    /// Open a committed asset for streaming to a client.
    pub async fn open(&self, asset: &AssetRef) -> Result<tokio::fs::File> {
        let path = self.path_for(asset);
        match tokio::fs::File::open(&path).await {
            Ok(file) => Ok(file),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(Error::not_found(asset.class.to_string(), asset.id.clone()))
            }
            Err(e) => Err(io_error("opening", &path, e)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store(dir: &tempfile::TempDir) -> ContentStore {
        ContentStore::new(
            StorageLayout::rooted_at(dir.path()),
            &PipelineConfig::default(),
        )
    }

    #[test]
    fn paths_are_computed_per_class() {
        let dir = tempfile::tempdir().unwrap();
        let store = store(&dir);
        assert_eq!(
            store.path_for(&AssetRef::new(AssetClass::Video, "abc")),
            dir.path().join("videos/videos/abc.mp4")
        );
        assert_eq!(
            store.path_for(&AssetRef::new(AssetClass::TrackCover, "p")),
            dir.path().join("music/images/p.jpg")
        );
        assert_eq!(
            store.path_for(&AssetRef::new(AssetClass::Track, "t")),
            dir.path().join("music/music/t.mp3")
        );
    }

    #[tokio::test]
    async fn place_moves_source_into_tree() {
        let dir = tempfile::tempdir().unwrap();
        let store = store(&dir);
        store.prepare().await.unwrap();

        let source = store.staging_path("jpg");
        tokio::fs::write(&source, b"pixels").await.unwrap();
        let asset = AssetRef::new(AssetClass::Still, "s1");

        let placed = store.place(&source, &asset).await.unwrap();
        assert_eq!(placed, store.path_for(&asset));
        assert_eq!(tokio::fs::read(&placed).await.unwrap(), b"pixels");
        assert!(!source.exists());
        assert!(store.exists(&asset).await);

        let leftovers: Vec<_> = std::fs::read_dir(placed.parent().unwrap())
            .unwrap()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_name().to_string_lossy().ends_with(".partial"))
            .collect();
        assert!(leftovers.is_empty());
    }

    #[tokio::test]
    async fn place_missing_source_leaves_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let store = store(&dir);
        store.prepare().await.unwrap();

        let asset = AssetRef::new(AssetClass::Video, "v1");
        let err = store
            .place(&dir.path().join("nope.mp4"), &asset)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::IoPath { .. }));
        assert!(!store.exists(&asset).await);
        assert_eq!(std::fs::read_dir(&store.layout().videos).unwrap().count(), 0);
    }

    #[tokio::test]
    async fn remove_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let store = store(&dir);
        store.prepare().await.unwrap();
        let asset = AssetRef::new(AssetClass::StillThumbnail, "gone");
        store.remove(&asset).await.unwrap();
        store.remove(&asset).await.unwrap();
    }

    #[tokio::test]
    async fn prepare_clears_staging() {
        let dir = tempfile::tempdir().unwrap();
        let store = store(&dir);
        store.prepare().await.unwrap();
        let stale = store.staging_path("mp4");
        tokio::fs::write(&stale, b"old").await.unwrap();

        store.prepare().await.unwrap();
        assert!(!stale.exists());
        assert!(store.layout().temp.is_dir());
    }

    #[tokio::test]
    async fn open_missing_is_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let store = store(&dir);
        let err = store
            .open(&AssetRef::new(AssetClass::Track, "x"))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), crate::ErrorKind::NotFound);
    }
}
