//! Catalog Provider Abstraction
//!
//! Contract for external music catalogs (Spotify, Deezer, MusicBrainz, Tidal)
//! acting as pure data sources. Adapters translate provider payloads into
//! [`SyncCandidate`]s; the core never sees provider wire formats.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::Result;

/// Kind of library entity a candidate describes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityKind {
    Artist,
    Album,
    Track,
}

impl EntityKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EntityKind::Artist => "artist",
            EntityKind::Album => "album",
            EntityKind::Track => "track",
        }
    }
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A catalog listing as seen by one provider.
///
/// Parent identifiers are the provider's own ids, already translated from the
/// library's internal ids by the caller.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum CatalogOperation {
    FollowedArtists,
    SavedAlbums,
    SavedTracks,
    ArtistAlbums { artist_id: String },
    AlbumTracks { album_id: String },
}

impl CatalogOperation {
    /// Kind of entity the listing yields.
    pub fn entity_kind(&self) -> EntityKind {
        match self {
            CatalogOperation::FollowedArtists => EntityKind::Artist,
            CatalogOperation::SavedAlbums | CatalogOperation::ArtistAlbums { .. } => {
                EntityKind::Album
            }
            CatalogOperation::SavedTracks | CatalogOperation::AlbumTracks { .. } => {
                EntityKind::Track
            }
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            CatalogOperation::FollowedArtists => "followed_artists",
            CatalogOperation::SavedAlbums => "saved_albums",
            CatalogOperation::SavedTracks => "saved_tracks",
            CatalogOperation::ArtistAlbums { .. } => "artist_albums",
            CatalogOperation::AlbumTracks { .. } => "album_tracks",
        }
    }
}

/// Mutable metadata a provider may supply alongside a candidate.
///
/// Fields that do not apply to the candidate's kind stay `None`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CandidateMetadata {
    pub image_url: Option<String>,
    pub genres: Option<Vec<String>>,
    pub popularity: Option<i32>,
    pub release_date: Option<String>,
    pub total_tracks: Option<i32>,
    pub duration_ms: Option<i64>,
    pub track_number: Option<i32>,
}

/// One record returned by a provider, not yet resolved against the library.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncCandidate {
    pub name: String,
    /// The provider's own identifier for this record
    pub provider_id: String,
    pub isrc: Option<String>,
    pub musicbrainz_id: Option<String>,
    #[serde(default)]
    pub metadata: CandidateMetadata,
}

impl SyncCandidate {
    pub fn new(name: impl Into<String>, provider_id: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            provider_id: provider_id.into(),
            isrc: None,
            musicbrainz_id: None,
            metadata: CandidateMetadata::default(),
        }
    }

    pub fn with_isrc(mut self, isrc: impl Into<String>) -> Self {
        self.isrc = Some(isrc.into());
        self
    }

    pub fn with_musicbrainz_id(mut self, mbid: impl Into<String>) -> Self {
        self.musicbrainz_id = Some(mbid.into());
        self
    }

    pub fn with_metadata(mut self, metadata: CandidateMetadata) -> Self {
        self.metadata = metadata;
        self
    }
}

/// A page of candidates plus the cursor for the next page, if any.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CandidatePage {
    pub candidates: Vec<SyncCandidate>,
    pub next_cursor: Option<String>,
}

impl CandidatePage {
    pub fn last(candidates: Vec<SyncCandidate>) -> Self {
        Self {
            candidates,
            next_cursor: None,
        }
    }

    pub fn with_cursor(candidates: Vec<SyncCandidate>, cursor: impl Into<String>) -> Self {
        Self {
            candidates,
            next_cursor: Some(cursor.into()),
        }
    }
}

/// External catalog data source.
///
/// # Example
///
/// ```ignore
/// use bridge_traits::provider::{CatalogOperation, CatalogProvider, CandidatePage};
///
/// async fn count(provider: &dyn CatalogProvider) -> Result<usize> {
///     let op = CatalogOperation::SavedTracks;
///     let mut cursor = None;
///     let mut total = 0;
///     loop {
///         let page = provider.fetch_page(&op, cursor).await?;
///         total += page.candidates.len();
///         match page.next_cursor {
///             Some(next) => cursor = Some(next),
///             None => return Ok(total),
///         }
///     }
/// }
/// ```
#[async_trait]
pub trait CatalogProvider: Send + Sync {
    /// Fetch one page of the listing. `cursor` is `None` for the first page.
    ///
    /// Transport failures should map to [`BridgeError::Network`],
    /// [`BridgeError::RateLimited`] or [`BridgeError::Unavailable`] so callers
    /// can retry; rejected credentials to [`BridgeError::Unauthorized`].
    ///
    /// [`BridgeError::Network`]: crate::error::BridgeError::Network
    /// [`BridgeError::RateLimited`]: crate::error::BridgeError::RateLimited
    /// [`BridgeError::Unavailable`]: crate::error::BridgeError::Unavailable
    /// [`BridgeError::Unauthorized`]: crate::error::BridgeError::Unauthorized
    async fn fetch_page(
        &self,
        operation: &CatalogOperation,
        cursor: Option<String>,
    ) -> Result<CandidatePage>;

    /// Whether this provider can serve the listing at all.
    fn supports(&self, operation: &CatalogOperation) -> bool;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::BridgeError;
    use mockall::mock;
    use mockall::predicate::*;

    mock! {
        Provider {}

        #[async_trait]
        impl CatalogProvider for Provider {
            async fn fetch_page(
                &self,
                operation: &CatalogOperation,
                cursor: Option<String>,
            ) -> Result<CandidatePage>;
            fn supports(&self, operation: &CatalogOperation) -> bool;
        }
    }

    #[test]
    fn test_operation_entity_kind() {
        assert_eq!(
            CatalogOperation::FollowedArtists.entity_kind(),
            EntityKind::Artist
        );
        assert_eq!(
            CatalogOperation::ArtistAlbums {
                artist_id: "a1".into()
            }
            .entity_kind(),
            EntityKind::Album
        );
        assert_eq!(
            CatalogOperation::AlbumTracks {
                album_id: "b1".into()
            }
            .entity_kind(),
            EntityKind::Track
        );
        assert_eq!(CatalogOperation::SavedTracks.name(), "saved_tracks");
    }

    #[test]
    fn test_operation_serde_shape() {
        let op = CatalogOperation::AlbumTracks {
            album_id: "sp-album".into(),
        };
        let json = serde_json::to_value(&op).unwrap();
        assert_eq!(json["kind"], "album_tracks");
        assert_eq!(json["album_id"], "sp-album");

        let back: CatalogOperation = serde_json::from_value(json).unwrap();
        assert_eq!(back, op);
    }

    #[test]
    fn test_candidate_builders() {
        let candidate = SyncCandidate::new("Paranoid Android", "sp-1")
            .with_isrc("GBAYE9700001")
            .with_musicbrainz_id("mb-1");

        assert_eq!(candidate.provider_id, "sp-1");
        assert_eq!(candidate.isrc.as_deref(), Some("GBAYE9700001"));
        assert_eq!(candidate.musicbrainz_id.as_deref(), Some("mb-1"));
        assert_eq!(candidate.metadata, CandidateMetadata::default());
    }

    #[core_async::test]
    async fn test_mock_provider_pagination() {
        let mut provider = MockProvider::new();
        provider
            .expect_fetch_page()
            .with(eq(CatalogOperation::SavedAlbums), eq(None))
            .times(1)
            .returning(|_, _| {
                Ok(CandidatePage::with_cursor(
                    vec![SyncCandidate::new("OK Computer", "sp-okc")],
                    "page-2",
                ))
            });
        provider
            .expect_fetch_page()
            .with(eq(CatalogOperation::SavedAlbums), eq(Some("page-2".to_string())))
            .times(1)
            .returning(|_, _| Err(BridgeError::RateLimited { retry_after_secs: Some(5) }));

        let first = provider
            .fetch_page(&CatalogOperation::SavedAlbums, None)
            .await
            .unwrap();
        assert_eq!(first.candidates.len(), 1);

        let err = provider
            .fetch_page(&CatalogOperation::SavedAlbums, first.next_cursor)
            .await
            .unwrap_err();
        assert!(err.is_recoverable());
    }
}
