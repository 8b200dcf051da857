//! SQLite implementation of the repository layer

use crate::error::{LibraryError, Result};
use crate::models::{Album, Artist, EntityScope, LibraryEntity, Track};
use crate::repositories::{LibrarySession, LibraryStore};
use async_trait::async_trait;
use bridge_traits::provider::EntityKind;
use core_auth::ProviderKind;
use sqlx::types::Json;
use sqlx::{query, query_as, Sqlite, SqlitePool, Transaction};
use std::ops::RangeInclusive;
use tracing::{debug, trace};

fn table_name(kind: EntityKind) -> &'static str {
    match kind {
        EntityKind::Artist => "artists",
        EntityKind::Album => "albums",
        EntityKind::Track => "tracks",
    }
}

fn provider_column(provider: ProviderKind) -> &'static str {
    match provider {
        ProviderKind::Spotify => "spotify_id",
        ProviderKind::Deezer => "deezer_id",
        ProviderKind::MusicBrainz => "musicbrainz_id",
        ProviderKind::Tidal => "tidal_id",
    }
}

/// SQLite `LENGTH` counts chars of TEXT values, matching `str::chars`.
fn sql_bounds(name_len: &RangeInclusive<usize>) -> (i64, i64) {
    let clamp = |len: usize| i64::try_from(len).unwrap_or(i64::MAX);
    (clamp(*name_len.start()), clamp(*name_len.end()))
}

fn invalid(entity: &LibraryEntity, message: String) -> LibraryError {
    LibraryError::InvalidInput {
        field: entity.kind().to_string(),
        message,
    }
}

/// SQLite-backed [`LibraryStore`]
#[derive(Clone)]
pub struct SqliteLibraryStore {
    pool: SqlitePool,
}

impl SqliteLibraryStore {
    /// Create a store over a migrated pool
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}

#[async_trait]
impl LibraryStore for SqliteLibraryStore {
    async fn begin(&self) -> Result<Box<dyn LibrarySession>> {
        let tx = self.pool.begin().await?;
        trace!("Library session opened");
        Ok(Box::new(SqliteLibrarySession { tx }))
    }
}

/// A [`LibrarySession`] holding one SQLite transaction
pub struct SqliteLibrarySession {
    tx: Transaction<'static, Sqlite>,
}

impl SqliteLibrarySession {
    /// Fetch a single row of `kind` where `column = value`.
    async fn fetch_where(
        &mut self,
        kind: EntityKind,
        column: &str,
        value: &str,
    ) -> Result<Option<LibraryEntity>> {
        let sql = format!("SELECT * FROM {} WHERE {} = ?", table_name(kind), column);
        let entity = match kind {
            EntityKind::Artist => query_as::<_, Artist>(&sql)
                .bind(value)
                .fetch_optional(&mut *self.tx)
                .await?
                .map(LibraryEntity::Artist),
            EntityKind::Album => query_as::<_, Album>(&sql)
                .bind(value)
                .fetch_optional(&mut *self.tx)
                .await?
                .map(LibraryEntity::Album),
            EntityKind::Track => query_as::<_, Track>(&sql)
                .bind(value)
                .fetch_optional(&mut *self.tx)
                .await?
                .map(LibraryEntity::Track),
        };
        Ok(entity)
    }
}

#[async_trait]
impl LibrarySession for SqliteLibrarySession {
    async fn find_by_id(&mut self, kind: EntityKind, id: &str) -> Result<Option<LibraryEntity>> {
        self.fetch_where(kind, "id", id).await
    }

    async fn find_by_provider_id(
        &mut self,
        kind: EntityKind,
        provider: ProviderKind,
        provider_id: &str,
    ) -> Result<Option<LibraryEntity>> {
        if provider_id.trim().is_empty() {
            return Ok(None);
        }
        self.fetch_where(kind, provider_column(provider), provider_id)
            .await
    }

    async fn find_by_isrc(&mut self, isrc: &str) -> Result<Option<LibraryEntity>> {
        let isrc = Track::normalize_isrc(isrc);
        if isrc.is_empty() {
            return Ok(None);
        }
        self.fetch_where(EntityKind::Track, "isrc", &isrc).await
    }

    async fn find_fuzzy_pool(
        &mut self,
        kind: EntityKind,
        scope: &EntityScope,
        name_len: RangeInclusive<usize>,
    ) -> Result<Vec<LibraryEntity>> {
        let (shortest, longest) = sql_bounds(&name_len);
        if shortest > longest {
            return Ok(Vec::new());
        }

        let pool = match kind {
            EntityKind::Artist => query_as::<_, Artist>(
                "SELECT * FROM artists WHERE LENGTH(normalized_name) BETWEEN ? AND ? \
                 ORDER BY created_at, id",
            )
            .bind(shortest)
            .bind(longest)
            .fetch_all(&mut *self.tx)
            .await?
            .into_iter()
            .map(LibraryEntity::Artist)
            .collect(),
            EntityKind::Album => match &scope.artist_id {
                Some(artist_id) => query_as::<_, Album>(
                    "SELECT * FROM albums WHERE artist_id = ? \
                     AND LENGTH(normalized_name) BETWEEN ? AND ? ORDER BY created_at, id",
                )
                .bind(artist_id)
                .bind(shortest)
                .bind(longest)
                .fetch_all(&mut *self.tx)
                .await?
                .into_iter()
                .map(LibraryEntity::Album)
                .collect(),
                None => Vec::new(),
            },
            EntityKind::Track => match &scope.album_id {
                Some(album_id) => query_as::<_, Track>(
                    "SELECT * FROM tracks WHERE album_id = ? AND artist_id IS ? \
                     AND LENGTH(normalized_name) BETWEEN ? AND ? ORDER BY created_at, id",
                )
                .bind(album_id)
                .bind(&scope.artist_id)
                .bind(shortest)
                .bind(longest)
                .fetch_all(&mut *self.tx)
                .await?
                .into_iter()
                .map(LibraryEntity::Track)
                .collect(),
                None => Vec::new(),
            },
        };

        debug!(
            kind = %kind,
            size = pool.len(),
            shortest,
            longest,
            "Loaded fuzzy pool"
        );
        Ok(pool)
    }

    async fn create(&mut self, entity: &LibraryEntity) -> Result<()> {
        entity.validate().map_err(|e| invalid(entity, e))?;

        match entity {
            LibraryEntity::Artist(a) => {
                query(
                    r#"
                    INSERT INTO artists (
                        id, name, normalized_name, spotify_id, deezer_id, musicbrainz_id,
                        tidal_id, image_url, genres, popularity, created_at, updated_at
                    )
                    VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
                    "#,
                )
                .bind(&a.id)
                .bind(&a.name)
                .bind(&a.normalized_name)
                .bind(&a.provider_ids.spotify)
                .bind(&a.provider_ids.deezer)
                .bind(&a.provider_ids.musicbrainz)
                .bind(&a.provider_ids.tidal)
                .bind(&a.image_url)
                .bind(Json(&a.genres))
                .bind(a.popularity)
                .bind(a.created_at)
                .bind(a.updated_at)
                .execute(&mut *self.tx)
                .await?;
            }
            LibraryEntity::Album(a) => {
                query(
                    r#"
                    INSERT INTO albums (
                        id, artist_id, name, normalized_name, spotify_id, deezer_id,
                        musicbrainz_id, tidal_id, image_url, release_date, total_tracks,
                        created_at, updated_at
                    )
                    VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
                    "#,
                )
                .bind(&a.id)
                .bind(&a.artist_id)
                .bind(&a.name)
                .bind(&a.normalized_name)
                .bind(&a.provider_ids.spotify)
                .bind(&a.provider_ids.deezer)
                .bind(&a.provider_ids.musicbrainz)
                .bind(&a.provider_ids.tidal)
                .bind(&a.image_url)
                .bind(&a.release_date)
                .bind(a.total_tracks)
                .bind(a.created_at)
                .bind(a.updated_at)
                .execute(&mut *self.tx)
                .await?;
            }
            LibraryEntity::Track(t) => {
                query(
                    r#"
                    INSERT INTO tracks (
                        id, artist_id, album_id, name, normalized_name, spotify_id, deezer_id,
                        musicbrainz_id, tidal_id, isrc, duration_ms, track_number, popularity,
                        created_at, updated_at
                    )
                    VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
                    "#,
                )
                .bind(&t.id)
                .bind(&t.artist_id)
                .bind(&t.album_id)
                .bind(&t.name)
                .bind(&t.normalized_name)
                .bind(&t.provider_ids.spotify)
                .bind(&t.provider_ids.deezer)
                .bind(&t.provider_ids.musicbrainz)
                .bind(&t.provider_ids.tidal)
                .bind(&t.isrc)
                .bind(t.duration_ms)
                .bind(t.track_number)
                .bind(t.popularity)
                .bind(t.created_at)
                .bind(t.updated_at)
                .execute(&mut *self.tx)
                .await?;
            }
        }

        debug!(kind = %entity.kind(), id = entity.id(), "Created entity");
        Ok(())
    }

    async fn update(&mut self, entity: &LibraryEntity) -> Result<()> {
        entity.validate().map_err(|e| invalid(entity, e))?;

        let result = match entity {
            LibraryEntity::Artist(a) => {
                query(
                    r#"
                    UPDATE artists
                    SET name = ?, normalized_name = ?, spotify_id = ?, deezer_id = ?,
                        musicbrainz_id = ?, tidal_id = ?, image_url = ?, genres = ?,
                        popularity = ?, updated_at = ?
                    WHERE id = ?
                    "#,
                )
                .bind(&a.name)
                .bind(&a.normalized_name)
                .bind(&a.provider_ids.spotify)
                .bind(&a.provider_ids.deezer)
                .bind(&a.provider_ids.musicbrainz)
                .bind(&a.provider_ids.tidal)
                .bind(&a.image_url)
                .bind(Json(&a.genres))
                .bind(a.popularity)
                .bind(a.updated_at)
                .bind(&a.id)
                .execute(&mut *self.tx)
                .await?
            }
            LibraryEntity::Album(a) => {
                query(
                    r#"
                    UPDATE albums
                    SET artist_id = ?, name = ?, normalized_name = ?, spotify_id = ?,
                        deezer_id = ?, musicbrainz_id = ?, tidal_id = ?, image_url = ?,
                        release_date = ?, total_tracks = ?, updated_at = ?
                    WHERE id = ?
                    "#,
                )
                .bind(&a.artist_id)
                .bind(&a.name)
                .bind(&a.normalized_name)
                .bind(&a.provider_ids.spotify)
                .bind(&a.provider_ids.deezer)
                .bind(&a.provider_ids.musicbrainz)
                .bind(&a.provider_ids.tidal)
                .bind(&a.image_url)
                .bind(&a.release_date)
                .bind(a.total_tracks)
                .bind(a.updated_at)
                .bind(&a.id)
                .execute(&mut *self.tx)
                .await?
            }
            LibraryEntity::Track(t) => {
                query(
                    r#"
                    UPDATE tracks
                    SET artist_id = ?, album_id = ?, name = ?, normalized_name = ?,
                        spotify_id = ?, deezer_id = ?, musicbrainz_id = ?, tidal_id = ?,
                        isrc = ?, duration_ms = ?, track_number = ?, popularity = ?,
                        updated_at = ?
                    WHERE id = ?
                    "#,
                )
                .bind(&t.artist_id)
                .bind(&t.album_id)
                .bind(&t.name)
                .bind(&t.normalized_name)
                .bind(&t.provider_ids.spotify)
                .bind(&t.provider_ids.deezer)
                .bind(&t.provider_ids.musicbrainz)
                .bind(&t.provider_ids.tidal)
                .bind(&t.isrc)
                .bind(t.duration_ms)
                .bind(t.track_number)
                .bind(t.popularity)
                .bind(t.updated_at)
                .bind(&t.id)
                .execute(&mut *self.tx)
                .await?
            }
        };

        if result.rows_affected() == 0 {
            return Err(LibraryError::NotFound {
                entity_type: entity.kind().to_string(),
                id: entity.id().to_string(),
            });
        }

        debug!(kind = %entity.kind(), id = entity.id(), "Updated entity");
        Ok(())
    }

    async fn commit(self: Box<Self>) -> Result<()> {
        self.tx.commit().await?;
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> Result<()> {
        self.tx.rollback().await?;
        Ok(())
    }
}
