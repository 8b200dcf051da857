//! Domain models for the music library
//!
//! Artists, albums and tracks share one shape: an internal id assigned once,
//! a first-established name, one optional identifier slot per provider and a
//! handful of mutable metadata fields that later syncs refresh. Relations
//! point by internal id only.

use bridge_traits::provider::{CandidateMetadata, EntityKind};
use core_auth::ProviderKind;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

/// Normalize a name for comparison: lower-case, keep letters, digits and
/// whitespace only, collapse runs of whitespace.
///
/// ```
/// use core_library::models::normalize_name;
///
/// assert_eq!(normalize_name("  Hail to the Thief! "), "hail to the thief");
/// assert_eq!(normalize_name("AC/DC"), "acdc");
/// ```
pub fn normalize_name(s: &str) -> String {
    let stripped: String = s
        .chars()
        .flat_map(char::to_lowercase)
        .filter(|c| c.is_alphanumeric() || c.is_whitespace())
        .collect();
    stripped.split_whitespace().collect::<Vec<_>>().join(" ")
}

fn now_secs() -> i64 {
    chrono::Utc::now().timestamp()
}

fn new_id() -> String {
    Uuid::new_v4().to_string()
}

// =============================================================================
// Provider identifiers
// =============================================================================

/// One optional identifier per provider.
///
/// The `musicbrainz` slot is also the entity's MBID.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, FromRow)]
pub struct ProviderIds {
    #[sqlx(rename = "spotify_id")]
    pub spotify: Option<String>,
    #[sqlx(rename = "deezer_id")]
    pub deezer: Option<String>,
    #[sqlx(rename = "musicbrainz_id")]
    pub musicbrainz: Option<String>,
    #[sqlx(rename = "tidal_id")]
    pub tidal: Option<String>,
}

impl ProviderIds {
    pub fn get(&self, provider: ProviderKind) -> Option<&str> {
        match provider {
            ProviderKind::Spotify => self.spotify.as_deref(),
            ProviderKind::Deezer => self.deezer.as_deref(),
            ProviderKind::MusicBrainz => self.musicbrainz.as_deref(),
            ProviderKind::Tidal => self.tidal.as_deref(),
        }
    }

    /// Overwrites the slot. Callers decide whether overwriting is allowed.
    pub fn set(&mut self, provider: ProviderKind, id: impl Into<String>) {
        let slot = match provider {
            ProviderKind::Spotify => &mut self.spotify,
            ProviderKind::Deezer => &mut self.deezer,
            ProviderKind::MusicBrainz => &mut self.musicbrainz,
            ProviderKind::Tidal => &mut self.tidal,
        };
        *slot = Some(id.into());
    }

    pub fn with(mut self, provider: ProviderKind, id: impl Into<String>) -> Self {
        self.set(provider, id);
        self
    }

    /// Filled slots in declaration order.
    pub fn iter(&self) -> impl Iterator<Item = (ProviderKind, &str)> + '_ {
        ProviderKind::ALL
            .into_iter()
            .filter_map(move |provider| self.get(provider).map(|id| (provider, id)))
    }

    pub fn is_empty(&self) -> bool {
        self.iter().next().is_none()
    }

    pub fn validate(&self) -> Result<(), String> {
        for provider in ProviderKind::ALL {
            if let Some(id) = self.get(provider) {
                if id.trim().is_empty() {
                    return Err(format!("{} id cannot be empty", provider.display_name()));
                }
            }
        }
        Ok(())
    }
}

/// Parent relation a candidate was listed under.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntityScope {
    pub artist_id: Option<String>,
    pub album_id: Option<String>,
}

impl EntityScope {
    pub fn unscoped() -> Self {
        Self::default()
    }

    pub fn artist(artist_id: impl Into<String>) -> Self {
        Self {
            artist_id: Some(artist_id.into()),
            album_id: None,
        }
    }

    pub fn album(artist_id: Option<String>, album_id: impl Into<String>) -> Self {
        Self {
            artist_id,
            album_id: Some(album_id.into()),
        }
    }
}

// =============================================================================
// Domain Models
// =============================================================================

/// Artist with provider identifiers and refreshable metadata
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow)]
pub struct Artist {
    /// Unique identifier
    pub id: String,
    /// Artist name
    pub name: String,
    /// Normalized name for matching
    pub normalized_name: String,
    #[sqlx(flatten)]
    pub provider_ids: ProviderIds,
    pub image_url: Option<String>,
    #[sqlx(json)]
    pub genres: Vec<String>,
    pub popularity: Option<i32>,
    /// Timestamps (Unix seconds)
    pub created_at: i64,
    pub updated_at: i64,
}

impl Artist {
    /// Create a new artist with normalized name
    pub fn new(name: impl Into<String>) -> Self {
        let name = name.into();
        let now = now_secs();
        Self {
            id: new_id(),
            normalized_name: normalize_name(&name),
            name,
            provider_ids: ProviderIds::default(),
            image_url: None,
            genres: Vec::new(),
            popularity: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Validate artist data
    pub fn validate(&self) -> Result<(), String> {
        if self.name.trim().is_empty() {
            return Err("Artist name cannot be empty".to_string());
        }
        self.provider_ids.validate()
    }
}

/// Album with provider identifiers and refreshable metadata
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, FromRow)]
pub struct Album {
    pub id: String,
    /// Owning artist, when the listing established one
    pub artist_id: Option<String>,
    /// Album title
    pub name: String,
    pub normalized_name: String,
    #[sqlx(flatten)]
    pub provider_ids: ProviderIds,
    pub image_url: Option<String>,
    pub release_date: Option<String>,
    pub total_tracks: Option<i32>,
    pub created_at: i64,
    pub updated_at: i64,
}

impl Album {
    pub fn new(name: impl Into<String>, artist_id: Option<String>) -> Self {
        let name = name.into();
        let now = now_secs();
        Self {
            id: new_id(),
            artist_id,
            normalized_name: normalize_name(&name),
            name,
            provider_ids: ProviderIds::default(),
            image_url: None,
            release_date: None,
            total_tracks: None,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn validate(&self) -> Result<(), String> {
        if self.name.trim().is_empty() {
            return Err("Album title cannot be empty".to_string());
        }
        if let Some(total) = self.total_tracks {
            if total < 0 {
                return Err("Album track count cannot be negative".to_string());
            }
        }
        self.provider_ids.validate()
    }
}

/// Track with provider identifiers, ISRC and refreshable metadata
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, FromRow)]
pub struct Track {
    pub id: String,
    pub artist_id: Option<String>,
    pub album_id: Option<String>,
    /// Track title
    pub name: String,
    pub normalized_name: String,
    #[sqlx(flatten)]
    pub provider_ids: ProviderIds,
    /// International Standard Recording Code, upper-cased
    pub isrc: Option<String>,
    pub duration_ms: Option<i64>,
    pub track_number: Option<i32>,
    pub popularity: Option<i32>,
    pub created_at: i64,
    pub updated_at: i64,
}

impl Track {
    pub fn new(
        name: impl Into<String>,
        artist_id: Option<String>,
        album_id: Option<String>,
    ) -> Self {
        let name = name.into();
        let now = now_secs();
        Self {
            id: new_id(),
            artist_id,
            album_id,
            normalized_name: normalize_name(&name),
            name,
            provider_ids: ProviderIds::default(),
            isrc: None,
            duration_ms: None,
            track_number: None,
            popularity: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Canonical ISRC form: trimmed and upper-cased.
    pub fn normalize_isrc(isrc: &str) -> String {
        isrc.trim().to_uppercase()
    }

    pub fn set_isrc(&mut self, isrc: &str) {
        self.isrc = Some(Self::normalize_isrc(isrc));
    }

    pub fn validate(&self) -> Result<(), String> {
        if self.name.trim().is_empty() {
            return Err("Track title cannot be empty".to_string());
        }
        if let Some(isrc) = &self.isrc {
            if isrc.trim().is_empty() {
                return Err("ISRC cannot be empty".to_string());
            }
        }
        if let Some(duration) = self.duration_ms {
            if duration < 0 {
                return Err("Track duration cannot be negative".to_string());
            }
        }
        self.provider_ids.validate()
    }
}

// =============================================================================
// LibraryEntity
// =============================================================================

/// Any catalog entity the resolver works with.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum LibraryEntity {
    Artist(Artist),
    Album(Album),
    Track(Track),
}

impl LibraryEntity {
    /// Fresh entity of `kind` placed under `scope`.
    pub fn new(kind: EntityKind, name: impl Into<String>, scope: &EntityScope) -> Self {
        match kind {
            EntityKind::Artist => LibraryEntity::Artist(Artist::new(name)),
            EntityKind::Album => {
                LibraryEntity::Album(Album::new(name, scope.artist_id.clone()))
            }
            EntityKind::Track => LibraryEntity::Track(Track::new(
                name,
                scope.artist_id.clone(),
                scope.album_id.clone(),
            )),
        }
    }

    pub fn kind(&self) -> EntityKind {
        match self {
            LibraryEntity::Artist(_) => EntityKind::Artist,
            LibraryEntity::Album(_) => EntityKind::Album,
            LibraryEntity::Track(_) => EntityKind::Track,
        }
    }

    pub fn id(&self) -> &str {
        match self {
            LibraryEntity::Artist(a) => &a.id,
            LibraryEntity::Album(a) => &a.id,
            LibraryEntity::Track(t) => &t.id,
        }
    }

    pub fn name(&self) -> &str {
        match self {
            LibraryEntity::Artist(a) => &a.name,
            LibraryEntity::Album(a) => &a.name,
            LibraryEntity::Track(t) => &t.name,
        }
    }

    pub fn normalized_name(&self) -> &str {
        match self {
            LibraryEntity::Artist(a) => &a.normalized_name,
            LibraryEntity::Album(a) => &a.normalized_name,
            LibraryEntity::Track(t) => &t.normalized_name,
        }
    }

    pub fn provider_ids(&self) -> &ProviderIds {
        match self {
            LibraryEntity::Artist(a) => &a.provider_ids,
            LibraryEntity::Album(a) => &a.provider_ids,
            LibraryEntity::Track(t) => &t.provider_ids,
        }
    }

    pub fn provider_ids_mut(&mut self) -> &mut ProviderIds {
        match self {
            LibraryEntity::Artist(a) => &mut a.provider_ids,
            LibraryEntity::Album(a) => &mut a.provider_ids,
            LibraryEntity::Track(t) => &mut t.provider_ids,
        }
    }

    pub fn musicbrainz_id(&self) -> Option<&str> {
        self.provider_ids().get(ProviderKind::MusicBrainz)
    }

    /// ISRC, for tracks that carry one.
    pub fn isrc(&self) -> Option<&str> {
        match self {
            LibraryEntity::Track(t) => t.isrc.as_deref(),
            _ => None,
        }
    }

    /// Parent artist, for albums and tracks.
    pub fn artist_id(&self) -> Option<&str> {
        match self {
            LibraryEntity::Artist(_) => None,
            LibraryEntity::Album(a) => a.artist_id.as_deref(),
            LibraryEntity::Track(t) => t.artist_id.as_deref(),
        }
    }

    pub fn updated_at(&self) -> i64 {
        match self {
            LibraryEntity::Artist(a) => a.updated_at,
            LibraryEntity::Album(a) => a.updated_at,
            LibraryEntity::Track(t) => t.updated_at,
        }
    }

    pub fn touch(&mut self) {
        let now = now_secs();
        match self {
            LibraryEntity::Artist(a) => a.updated_at = now,
            LibraryEntity::Album(a) => a.updated_at = now,
            LibraryEntity::Track(t) => t.updated_at = now,
        }
    }

    pub fn validate(&self) -> Result<(), String> {
        match self {
            LibraryEntity::Artist(a) => a.validate(),
            LibraryEntity::Album(a) => a.validate(),
            LibraryEntity::Track(t) => t.validate(),
        }
    }

    /// Replace stored metadata with the values a provider supplied.
    ///
    /// Fields the provider left out are kept. Returns whether anything changed.
    pub fn apply_metadata(&mut self, metadata: &CandidateMetadata) -> bool {
        let mut changed = false;
        match self {
            LibraryEntity::Artist(a) => {
                changed |= refresh(&mut a.image_url, &metadata.image_url);
                if let Some(genres) = &metadata.genres {
                    if &a.genres != genres {
                        a.genres = genres.clone();
                        changed = true;
                    }
                }
                changed |= refresh(&mut a.popularity, &metadata.popularity);
            }
            LibraryEntity::Album(a) => {
                changed |= refresh(&mut a.image_url, &metadata.image_url);
                changed |= refresh(&mut a.release_date, &metadata.release_date);
                changed |= refresh(&mut a.total_tracks, &metadata.total_tracks);
            }
            LibraryEntity::Track(t) => {
                changed |= refresh(&mut t.duration_ms, &metadata.duration_ms);
                changed |= refresh(&mut t.track_number, &metadata.track_number);
                changed |= refresh(&mut t.popularity, &metadata.popularity);
            }
        }
        changed
    }
}

fn refresh<T: PartialEq + Clone>(stored: &mut Option<T>, incoming: &Option<T>) -> bool {
    match incoming {
        Some(value) if stored.as_ref() != Some(value) => {
            *stored = Some(value.clone());
            true
        }
        _ => false,
    }
}
