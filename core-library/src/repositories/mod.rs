//! Repository layer for the catalog.
//!
//! Access goes through a [`LibrarySession`], one database transaction opened
//! by [`LibraryStore::begin`]. A session only reads and writes; committing or
//! rolling back is the caller's decision, and dropping an open session rolls
//! it back.
//!
//! ```ignore
//! let mut session = store.begin().await?;
//! if session.find_by_isrc("USRC17607839").await?.is_none() {
//!     session.create(&entity).await?;
//! }
//! session.commit().await?;
//! ```

pub mod store;

pub use store::{SqliteLibrarySession, SqliteLibraryStore};

use crate::error::Result;
use crate::models::{EntityScope, LibraryEntity};
use async_trait::async_trait;
use bridge_traits::provider::EntityKind;
use core_auth::ProviderKind;
use std::ops::RangeInclusive;

/// Opens units of work against the catalog.
#[async_trait]
pub trait LibraryStore: Send + Sync {
    /// Begin a new session backed by its own transaction.
    async fn begin(&self) -> Result<Box<dyn LibrarySession>>;
}

/// One transaction over the catalog.
#[async_trait]
pub trait LibrarySession: Send {
    /// Find an entity by its internal id
    async fn find_by_id(&mut self, kind: EntityKind, id: &str) -> Result<Option<LibraryEntity>>;

    /// Find the entity of `kind` holding `provider_id` in the `provider` slot
    async fn find_by_provider_id(
        &mut self,
        kind: EntityKind,
        provider: ProviderKind,
        provider_id: &str,
    ) -> Result<Option<LibraryEntity>>;

    /// Find the track holding `isrc`. The lookup is case-insensitive.
    async fn find_by_isrc(&mut self, isrc: &str) -> Result<Option<LibraryEntity>>;

    /// Find the entity of `kind` holding the MusicBrainz identifier `mbid`
    async fn find_by_musicbrainz_id(
        &mut self,
        kind: EntityKind,
        mbid: &str,
    ) -> Result<Option<LibraryEntity>> {
        self.find_by_provider_id(kind, ProviderKind::MusicBrainz, mbid)
            .await
    }

    /// Entities sharing the parent relation in `scope` whose normalized name
    /// is `name_len` chars long.
    ///
    /// - Artists: every artist.
    /// - Albums: albums of `scope.artist_id`; empty without one.
    /// - Tracks: tracks of `scope.album_id` under the same artist; empty without an album.
    async fn find_fuzzy_pool(
        &mut self,
        kind: EntityKind,
        scope: &EntityScope,
        name_len: RangeInclusive<usize>,
    ) -> Result<Vec<LibraryEntity>>;

    /// Insert a new entity
    ///
    /// # Errors
    /// - `InvalidInput` if validation fails
    /// - `Conflict` if a provider id or ISRC is already held
    async fn create(&mut self, entity: &LibraryEntity) -> Result<()>;

    /// Update an existing entity
    ///
    /// # Errors
    /// - `NotFound` if no row has the entity's id
    /// - `InvalidInput` if validation fails
    /// - `Conflict` if a provider id or ISRC is already held
    async fn update(&mut self, entity: &LibraryEntity) -> Result<()>;

    async fn commit(self: Box<Self>) -> Result<()>;

    async fn rollback(self: Box<Self>) -> Result<()>;
}
