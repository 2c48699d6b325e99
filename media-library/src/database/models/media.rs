//! Media item database models.
//!
//! One model per collection. [`MediaRecord`] is the per-kind mapping (table,
//! columns, owned files) that lets the position ledger and repositories stay
//! generic over the entity type.

use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use sqlx::Sqlite;
use sqlx::sqlite::{SqliteArguments, SqliteRow};

use crate::database::time::now_ms;
use crate::storage::{AssetClass, AssetRef};

/// A bindable SQLite query.
pub type SqliteQuery<'q> = sqlx::query::Query<'q, Sqlite, SqliteArguments<'q>>;

/// The three collections the library manages.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, strum::Display, strum::EnumString,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum MediaKind {
    Still,
    Video,
    Track,
}

impl MediaKind {
    pub fn table(&self) -> &'static str {
        match self {
            Self::Still => "stills",
            Self::Video => "videos",
            Self::Track => "tracks",
        }
    }

    /// Entity name used in `NotFound` errors.
    pub fn entity_name(&self) -> &'static str {
        match self {
            Self::Still => "Still",
            Self::Video => "Video",
            Self::Track => "Track",
        }
    }

    /// Asset class of the primary (hashed) file.
    pub fn primary_class(&self) -> AssetClass {
        match self {
            Self::Still => AssetClass::Still,
            Self::Video => AssetClass::Video,
            Self::Track => AssetClass::Track,
        }
    }
}

/// Per-kind mapping between a model and its table.
pub trait MediaRecord:
    for<'r> FromRow<'r, SqliteRow> + Clone + Send + Sync + Unpin + std::fmt::Debug + 'static
{
    const KIND: MediaKind;

    /// Full INSERT statement; bound by [`MediaRecord::bind_insert`].
    const INSERT_SQL: &'static str;

    /// UPDATE applying a [`MediaRecord::Patch`]; `None` when the kind has no
    /// editable fields.
    const PATCH_SQL: Option<&'static str>;

    /// Kind-specific fields a bulk replace may rewrite.
    type Patch: Clone
        + Send
        + Sync
        + std::fmt::Debug
        + Default
        + Serialize
        + serde::de::DeserializeOwned;

    fn id(&self) -> &str;
    fn hash(&self) -> &str;
    fn position(&self) -> i64;
    fn set_position(&mut self, position: i64);

    /// Every file this record references, primary asset first.
    fn owned_assets(&self) -> Vec<AssetRef>;

    fn bind_insert(&self) -> SqliteQuery<'_>;

    /// Bind patch values followed by `updated_at` and the id.
    fn bind_patch<'q>(query: SqliteQuery<'q>, patch: &'q Self::Patch, id: &'q str)
    -> SqliteQuery<'q>;
}

/// Still image item.
#[derive(Debug, Clone, PartialEq, Eq, FromRow, Serialize, Deserialize)]
pub struct StillDbModel {
    pub id: String,
    pub hash: String,
    pub position: i64,
    pub created_at: i64,
    pub updated_at: i64,
}

impl StillDbModel {
    pub fn new(id: impl Into<String>, hash: impl Into<String>) -> Self {
        let now = now_ms();
        Self {
            id: id.into(),
            hash: hash.into(),
            position: 0,
            created_at: now,
            updated_at: now,
        }
    }
}

/// Stills carry no editable fields beyond their position.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StillPatch {}

impl MediaRecord for StillDbModel {
    const KIND: MediaKind = MediaKind::Still;
    const INSERT_SQL: &'static str = "INSERT INTO stills (id, hash, position, created_at, updated_at) VALUES (?, ?, ?, ?, ?)";
    const PATCH_SQL: Option<&'static str> = None;

    type Patch = StillPatch;

    fn id(&self) -> &str {
        &self.id
    }

    fn hash(&self) -> &str {
        &self.hash
    }

    fn position(&self) -> i64 {
        self.position
    }

    fn set_position(&mut self, position: i64) {
        self.position = position;
    }

    fn owned_assets(&self) -> Vec<AssetRef> {
        vec![
            AssetRef::new(AssetClass::Still, &self.id),
            AssetRef::new(AssetClass::StillThumbnail, &self.id),
        ]
    }

    fn bind_insert(&self) -> SqliteQuery<'_> {
        sqlx::query(Self::INSERT_SQL)
            .bind(&self.id)
            .bind(&self.hash)
            .bind(self.position)
            .bind(self.created_at)
            .bind(self.updated_at)
    }

    fn bind_patch<'q>(
        query: SqliteQuery<'q>,
        _patch: &'q Self::Patch,
        id: &'q str,
    ) -> SqliteQuery<'q> {
        query.bind(now_ms()).bind(id)
    }
}

/// Video item with three cover pictures and descriptive text.
#[derive(Debug, Clone, PartialEq, Eq, FromRow, Serialize, Deserialize)]
pub struct VideoDbModel {
    pub id: String,
    pub hash: String,
    pub position: i64,
    pub picture1_id: String,
    pub picture2_id: String,
    pub picture3_id: String,
    pub line1: String,
    pub line2: String,
    pub url: String,
    pub created_at: i64,
    pub updated_at: i64,
}

/// Editable video fields; `None` leaves the stored value untouched.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct VideoPatch {
    #[serde(default)]
    pub line1: Option<String>,
    #[serde(default)]
    pub line2: Option<String>,
    #[serde(default)]
    pub url: Option<String>,
}

impl VideoDbModel {
    pub fn picture_ids(&self) -> [&str; 3] {
        [&self.picture1_id, &self.picture2_id, &self.picture3_id]
    }
}

impl MediaRecord for VideoDbModel {
    const KIND: MediaKind = MediaKind::Video;
    const INSERT_SQL: &'static str = r#"
        INSERT INTO videos (
            id, hash, position, picture1_id, picture2_id, picture3_id,
            line1, line2, url, created_at, updated_at
        ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
    "#;
    const PATCH_SQL: Option<&'static str> = Some(
        r#"
        UPDATE videos SET
            line1 = COALESCE(?, line1),
            line2 = COALESCE(?, line2),
            url = COALESCE(?, url),
            updated_at = ?
        WHERE id = ?
        "#,
    );

    type Patch = VideoPatch;

    fn id(&self) -> &str {
        &self.id
    }

    fn hash(&self) -> &str {
        &self.hash
    }

    fn position(&self) -> i64 {
        self.position
    }

    fn set_position(&mut self, position: i64) {
        self.position = position;
    }

    fn owned_assets(&self) -> Vec<AssetRef> {
        let mut assets = vec![AssetRef::new(AssetClass::Video, &self.id)];
        assets.extend(
            self.picture_ids()
                .into_iter()
                .map(|pic| AssetRef::new(AssetClass::VideoCover, pic)),
        );
        assets
    }

    fn bind_insert(&self) -> SqliteQuery<'_> {
        sqlx::query(Self::INSERT_SQL)
            .bind(&self.id)
            .bind(&self.hash)
            .bind(self.position)
            .bind(&self.picture1_id)
            .bind(&self.picture2_id)
            .bind(&self.picture3_id)
            .bind(&self.line1)
            .bind(&self.line2)
            .bind(&self.url)
            .bind(self.created_at)
            .bind(self.updated_at)
    }

    fn bind_patch<'q>(
        query: SqliteQuery<'q>,
        patch: &'q Self::Patch,
        id: &'q str,
    ) -> SqliteQuery<'q> {
        query
            .bind(patch.line1.as_deref())
            .bind(patch.line2.as_deref())
            .bind(patch.url.as_deref())
            .bind(now_ms())
            .bind(id)
    }
}

/// Audio track item with one cover picture.
#[derive(Debug, Clone, PartialEq, Eq, FromRow, Serialize, Deserialize)]
pub struct TrackDbModel {
    pub id: String,
    pub hash: String,
    pub position: i64,
    pub picture_id: String,
    pub url: String,
    pub created_at: i64,
    pub updated_at: i64,
}

/// Editable track fields.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrackPatch {
    #[serde(default)]
    pub url: Option<String>,
}

impl MediaRecord for TrackDbModel {
    const KIND: MediaKind = MediaKind::Track;
    const INSERT_SQL: &'static str = r#"
        INSERT INTO tracks (id, hash, position, picture_id, url, created_at, updated_at)
        VALUES (?, ?, ?, ?, ?, ?, ?)
    "#;
    const PATCH_SQL: Option<&'static str> =
        Some("UPDATE tracks SET url = COALESCE(?, url), updated_at = ? WHERE id = ?");

    type Patch = TrackPatch;

    fn id(&self) -> &str {
        &self.id
    }

    fn hash(&self) -> &str {
        &self.hash
    }

    fn position(&self) -> i64 {
        self.position
    }

    fn set_position(&mut self, position: i64) {
        self.position = position;
    }

    fn owned_assets(&self) -> Vec<AssetRef> {
        vec![
            AssetRef::new(AssetClass::Track, &self.id),
            AssetRef::new(AssetClass::TrackCover, &self.picture_id),
        ]
    }

    fn bind_insert(&self) -> SqliteQuery<'_> {
        sqlx::query(Self::INSERT_SQL)
            .bind(&self.id)
            .bind(&self.hash)
            .bind(self.position)
            .bind(&self.picture_id)
            .bind(&self.url)
            .bind(self.created_at)
            .bind(self.updated_at)
    }

    fn bind_patch<'q>(
        query: SqliteQuery<'q>,
        patch: &'q Self::Patch,
        id: &'q str,
    ) -> SqliteQuery<'q> {
        query.bind(patch.url.as_deref()).bind(now_ms()).bind(id)
    }
}

/// A media item of any kind.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum MediaItem {
    Still(StillDbModel),
    Video(VideoDbModel),
    Track(TrackDbModel),
}

impl MediaItem {
    pub fn kind(&self) -> MediaKind {
        match self {
            Self::Still(_) => MediaKind::Still,
            Self::Video(_) => MediaKind::Video,
            Self::Track(_) => MediaKind::Track,
        }
    }

    pub fn id(&self) -> &str {
        match self {
            Self::Still(s) => s.id(),
            Self::Video(v) => v.id(),
            Self::Track(t) => t.id(),
        }
    }

    pub fn position(&self) -> i64 {
        match self {
            Self::Still(s) => s.position(),
            Self::Video(v) => v.position(),
            Self::Track(t) => t.position(),
        }
    }

    pub fn owned_assets(&self) -> Vec<AssetRef> {
        match self {
            Self::Still(s) => s.owned_assets(),
            Self::Video(v) => v.owned_assets(),
            Self::Track(t) => t.owned_assets(),
        }
    }
}

impl From<StillDbModel> for MediaItem {
    fn from(value: StillDbModel) -> Self {
        Self::Still(value)
    }
}

impl From<VideoDbModel> for MediaItem {
    fn from(value: VideoDbModel) -> Self {
        Self::Video(value)
    }
}

impl From<TrackDbModel> for MediaItem {
    fn from(value: TrackDbModel) -> Self {
        Self::Track(value)
    }
}
