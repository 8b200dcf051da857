//! # Entity Resolver
//!
//! Decides whether a provider candidate is an entity the library already
//! holds.
//!
//! ## Cascade
//!
//! The first step that finds an entity wins:
//!
//! 1. ISRC (tracks only)
//! 2. MusicBrainz identifier
//! 3. The candidate provider's own identifier
//! 4. Normalized-name similarity over the fuzzy pool
//!
//! ## Back-fill
//!
//! A matched entity picks up the candidate's provider id, MBID and ISRC when
//! its slot is empty and no other entity holds that value. Filled slots are
//! never overwritten and the stored name never changes. Provider metadata
//! replaces stored metadata when it differs.
//!
//! The resolver only reads through the session. Callers persist the
//! returned entity.
//!
//! ```ignore
//! let mut session = store.begin().await?;
//! match resolver.resolve(session.as_mut(), EntityKind::Track, &candidate, ProviderKind::Deezer, &scope).await? {
//!     Resolution::Matched { entity, changed: true, .. } => session.update(&entity).await?,
//!     Resolution::Matched { .. } => {}
//!     Resolution::NoMatch => { /* create */ }
//! }
//! session.commit().await?;
//! ```

use crate::error::{Result, SyncError};
use crate::matching::{length_window, similarity};
use bridge_traits::provider::{EntityKind, SyncCandidate};
use core_auth::ProviderKind;
use core_library::models::{normalize_name, EntityScope, LibraryEntity, Track};
use core_library::LibrarySession;
use core_runtime::config::ResolverSettings;
use serde::{Deserialize, Serialize};
use std::fmt;
use tracing::{debug, warn};

/// Tolerance for comparing similarity scores.
const SCORE_EPSILON: f64 = 1e-9;

/// Which cascade step produced a match.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchedBy {
    Isrc,
    MusicBrainzId,
    ProviderId,
    FuzzyName,
}

impl fmt::Display for MatchedBy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            MatchedBy::Isrc => "isrc",
            MatchedBy::MusicBrainzId => "musicbrainz_id",
            MatchedBy::ProviderId => "provider_id",
            MatchedBy::FuzzyName => "fuzzy_name",
        };
        f.write_str(s)
    }
}

/// Outcome of resolving one candidate.
#[derive(Debug, Clone, PartialEq)]
pub enum Resolution {
    /// The candidate is an existing entity. `entity` already carries any
    /// back-filled identifiers and refreshed metadata.
    Matched {
        entity: LibraryEntity,
        matched_by: MatchedBy,
        /// The candidate provider's slot was empty and has been filled
        provider_id_added: bool,
        /// Anything on `entity` differs from what is stored
        changed: bool,
    },
    /// No existing entity; the caller creates one.
    NoMatch,
}

impl Resolution {
    pub fn is_match(&self) -> bool {
        matches!(self, Resolution::Matched { .. })
    }

    pub fn entity(&self) -> Option<&LibraryEntity> {
        match self {
            Resolution::Matched { entity, .. } => Some(entity),
            Resolution::NoMatch => None,
        }
    }
}

/// Identity resolution against the library.
#[derive(Debug, Clone, Default)]
pub struct EntityResolver {
    settings: ResolverSettings,
}

impl EntityResolver {
    pub fn new(settings: ResolverSettings) -> Self {
        Self { settings }
    }

    pub fn settings(&self) -> &ResolverSettings {
        &self.settings
    }

    /// Resolve `candidate`, listed by `provider` under `scope`, to an
    /// existing entity of `kind`.
    ///
    /// # Errors
    ///
    /// - `Validation` if the candidate name or provider id is blank
    /// - storage errors from the session, unchanged
    pub async fn resolve(
        &self,
        session: &mut dyn LibrarySession,
        kind: EntityKind,
        candidate: &SyncCandidate,
        provider: ProviderKind,
        scope: &EntityScope,
    ) -> Result<Resolution> {
        validate_candidate(candidate)?;

        let Some((mut entity, matched_by)) =
            self.find_match(session, kind, candidate, provider, scope).await?
        else {
            debug!(kind = %kind, provider = %provider, candidate = %candidate.name, "No match");
            return Ok(Resolution::NoMatch);
        };

        let mut changed = false;

        let provider_id_added = if entity.provider_ids().get(provider).is_none() {
            backfill_provider_id(session, &mut entity, provider, &candidate.provider_id).await?
        } else {
            false
        };
        changed |= provider_id_added;

        if provider != ProviderKind::MusicBrainz {
            if let Some(mbid) = non_blank(candidate.musicbrainz_id.as_deref()) {
                if entity.musicbrainz_id().is_none() {
                    changed |= backfill_provider_id(
                        session,
                        &mut entity,
                        ProviderKind::MusicBrainz,
                        mbid,
                    )
                    .await?;
                }
            }
        }

        if matches!(entity, LibraryEntity::Track(_)) {
            if let Some(isrc) = non_blank(candidate.isrc.as_deref()) {
                if entity.isrc().is_none() {
                    changed |= backfill_isrc(session, &mut entity, isrc).await?;
                }
            }
        }

        changed |= entity.apply_metadata(&candidate.metadata);

        if changed {
            entity.touch();
        }

        debug!(
            kind = %kind,
            provider = %provider,
            entity_id = entity.id(),
            matched_by = %matched_by,
            provider_id_added,
            changed,
            "Resolved candidate"
        );

        Ok(Resolution::Matched {
            entity,
            matched_by,
            provider_id_added,
            changed,
        })
    }

    async fn find_match(
        &self,
        session: &mut dyn LibrarySession,
        kind: EntityKind,
        candidate: &SyncCandidate,
        provider: ProviderKind,
        scope: &EntityScope,
    ) -> Result<Option<(LibraryEntity, MatchedBy)>> {
        if kind == EntityKind::Track {
            if let Some(isrc) = non_blank(candidate.isrc.as_deref()) {
                if let Some(entity) = session.find_by_isrc(isrc).await? {
                    return Ok(Some((entity, MatchedBy::Isrc)));
                }
            }
        }

        if let Some(mbid) = non_blank(candidate.musicbrainz_id.as_deref()) {
            if let Some(entity) = session.find_by_musicbrainz_id(kind, mbid).await? {
                return Ok(Some((entity, MatchedBy::MusicBrainzId)));
            }
        }

        if let Some(entity) = session
            .find_by_provider_id(kind, provider, &candidate.provider_id)
            .await?
        {
            return Ok(Some((entity, MatchedBy::ProviderId)));
        }

        Ok(self
            .fuzzy_match(session, kind, candidate, provider, scope)
            .await?
            .map(|entity| (entity, MatchedBy::FuzzyName)))
    }

    async fn fuzzy_match(
        &self,
        session: &mut dyn LibrarySession,
        kind: EntityKind,
        candidate: &SyncCandidate,
        provider: ProviderKind,
        scope: &EntityScope,
    ) -> Result<Option<LibraryEntity>> {
        let name = normalize_name(&candidate.name);
        let name_len = name.chars().count();
        if name_len < self.settings.fuzzy_min_name_len {
            return Ok(None);
        }

        let window = length_window(name_len, self.settings.fuzzy_threshold - SCORE_EPSILON);
        let pool = session.find_fuzzy_pool(kind, scope, window).await?;

        let mut best: Option<(LibraryEntity, f64)> = None;
        let mut tied = false;

        for entity in pool {
            if holds_conflicting_identifier(&entity, candidate, provider) {
                continue;
            }

            let score = similarity(&name, entity.normalized_name());
            if score + SCORE_EPSILON < self.settings.fuzzy_threshold {
                continue;
            }

            match &best {
                Some((_, best_score)) if (score - best_score).abs() <= SCORE_EPSILON => {
                    tied = true;
                }
                Some((_, best_score)) if score < *best_score => {}
                _ => {
                    best = Some((entity, score));
                    tied = false;
                }
            }
        }

        if tied {
            debug!(kind = %kind, candidate = %candidate.name, "Fuzzy match tied, treating as no match");
            return Ok(None);
        }

        Ok(best.map(|(entity, score)| {
            debug!(kind = %kind, entity_id = entity.id(), similarity = score, "Fuzzy match");
            entity
        }))
    }
}

fn validate_candidate(candidate: &SyncCandidate) -> Result<()> {
    if candidate.name.trim().is_empty() {
        return Err(SyncError::Validation(
            "Candidate name cannot be empty".to_string(),
        ));
    }
    if candidate.provider_id.trim().is_empty() {
        return Err(SyncError::Validation(format!(
            "Candidate '{}' has an empty provider id",
            candidate.name
        )));
    }
    Ok(())
}

fn non_blank(value: Option<&str>) -> Option<&str> {
    value.filter(|v| !v.trim().is_empty())
}

/// A pool entity that already carries a different id for the same key is a
/// different item, however similar the names.
fn holds_conflicting_identifier(
    entity: &LibraryEntity,
    candidate: &SyncCandidate,
    provider: ProviderKind,
) -> bool {
    if let Some(existing) = entity.provider_ids().get(provider) {
        if existing != candidate.provider_id {
            return true;
        }
    }

    if let (Some(existing), Some(incoming)) = (
        entity.musicbrainz_id(),
        non_blank(candidate.musicbrainz_id.as_deref()),
    ) {
        if existing != incoming {
            return true;
        }
    }

    if let (Some(existing), Some(incoming)) =
        (entity.isrc(), non_blank(candidate.isrc.as_deref()))
    {
        if existing != Track::normalize_isrc(incoming) {
            return true;
        }
    }

    false
}

async fn backfill_provider_id(
    session: &mut dyn LibrarySession,
    entity: &mut LibraryEntity,
    provider: ProviderKind,
    provider_id: &str,
) -> Result<bool> {
    if let Some(holder) = session
        .find_by_provider_id(entity.kind(), provider, provider_id)
        .await?
    {
        if holder.id() != entity.id() {
            warn!(
                kind = %entity.kind(),
                provider = %provider,
                entity_id = entity.id(),
                holder_id = holder.id(),
                "Provider id already held by another entity, skipping back-fill"
            );
            return Ok(false);
        }
    }

    entity.provider_ids_mut().set(provider, provider_id);
    Ok(true)
}

async fn backfill_isrc(
    session: &mut dyn LibrarySession,
    entity: &mut LibraryEntity,
    isrc: &str,
) -> Result<bool> {
    if let Some(holder) = session.find_by_isrc(isrc).await? {
        if holder.id() != entity.id() {
            warn!(
                entity_id = entity.id(),
                holder_id = holder.id(),
                "ISRC already held by another track, skipping back-fill"
            );
            return Ok(false);
        }
    }

    if let LibraryEntity::Track(track) = entity {
        track.set_isrc(isrc);
        return Ok(true);
    }
    Ok(false)
}
