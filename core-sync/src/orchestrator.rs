//! # Sync Orchestrator
//!
//! Runs one catalog operation across providers in priority order.
//!
//! ## Per provider
//!
//! 1. Skip when it is not registered, has no usable credential, lacks the
//!    parent's provider id, does not support the operation, or its circuit
//!    is open.
//! 2. Page through `fetch_page` until the cursor runs out or the page cap.
//!    A page over `page_size` is a provider contract violation.
//! 3. Resolve and persist each candidate in its own unit of work under the
//!    retry controller.
//! 4. Report the provider's health to the circuit breaker.
//!
//! ## Modes
//!
//! - **Fallback**: stop at the first provider that fetched successfully and
//!   returned at least one candidate.
//! - **Aggregate**: query every provider. Deduplication falls out of
//!   resolving every candidate against the same library.
//!
//! Provider failures never abort a run; they are recorded and the loop moves
//! on. Storage failures that survive retrying abort the run with an error.
//!
//! ```ignore
//! let request = SyncRequest::new(SyncOperation::FollowedArtists, vec![ProviderKind::Spotify, ProviderKind::Deezer]);
//! let summary = orchestrator.run_sync(request).await?;
//! println!("{} created, {} updated", summary.created, summary.updated);
//! ```

use crate::circuit_breaker::CircuitBreaker;
use crate::error::{Result, SyncError};
use crate::resolver::{EntityResolver, Resolution};
use crate::retry::RetryController;
use bridge_traits::error::BridgeError;
use bridge_traits::provider::{CatalogOperation, CatalogProvider, EntityKind, SyncCandidate};
use bridge_traits::time::{Clock, SystemClock};
use chrono::{DateTime, Utc};
use core_auth::{ProviderKind, TokenGate};
use core_library::models::{EntityScope, LibraryEntity};
use core_library::LibraryStore;
use core_runtime::config::OrchestratorSettings;
use core_runtime::events::{CoreEvent, EventBus, SyncEvent};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::{Arc, RwLock};
use tracing::{debug, error, info, instrument, warn};

// ============================================================================
// Request Types
// ============================================================================

/// How providers are combined for one run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncMode {
    /// First provider with a non-empty successful result wins
    Fallback,
    /// Every provider contributes
    Aggregate,
}

impl SyncMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            SyncMode::Fallback => "fallback",
            SyncMode::Aggregate => "aggregate",
        }
    }
}

impl fmt::Display for SyncMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A catalog operation addressed by internal library ids.
///
/// Parent-scoped operations are translated into each provider's own
/// identifiers before the provider is called.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SyncOperation {
    FollowedArtists,
    SavedAlbums,
    SavedTracks,
    ArtistAlbums { artist_id: String },
    AlbumTracks { album_id: String },
}

impl SyncOperation {
    pub fn name(&self) -> &'static str {
        match self {
            SyncOperation::FollowedArtists => "followed_artists",
            SyncOperation::SavedAlbums => "saved_albums",
            SyncOperation::SavedTracks => "saved_tracks",
            SyncOperation::ArtistAlbums { .. } => "artist_albums",
            SyncOperation::AlbumTracks { .. } => "album_tracks",
        }
    }

    /// Kind of entity the operation lists
    pub fn entity_kind(&self) -> EntityKind {
        match self {
            SyncOperation::FollowedArtists => EntityKind::Artist,
            SyncOperation::SavedAlbums | SyncOperation::ArtistAlbums { .. } => EntityKind::Album,
            SyncOperation::SavedTracks | SyncOperation::AlbumTracks { .. } => EntityKind::Track,
        }
    }

    /// Library listings aggregate; entity detail falls back.
    pub fn default_mode(&self) -> SyncMode {
        match self {
            SyncOperation::FollowedArtists
            | SyncOperation::SavedAlbums
            | SyncOperation::SavedTracks => SyncMode::Aggregate,
            SyncOperation::ArtistAlbums { .. } | SyncOperation::AlbumTracks { .. } => {
                SyncMode::Fallback
            }
        }
    }

    /// Parent entity the operation is scoped under, if any.
    pub fn parent(&self) -> Option<(EntityKind, &str)> {
        match self {
            SyncOperation::ArtistAlbums { artist_id } => Some((EntityKind::Artist, artist_id)),
            SyncOperation::AlbumTracks { album_id } => Some((EntityKind::Album, album_id)),
            _ => None,
        }
    }

    /// The provider-facing operation, or `None` when the parent holds no id
    /// for `provider`.
    pub fn catalog_operation(
        &self,
        provider: ProviderKind,
        parent: Option<&LibraryEntity>,
    ) -> Option<CatalogOperation> {
        let parent_id = || {
            parent
                .and_then(|p| p.provider_ids().get(provider))
                .map(str::to_string)
        };

        match self {
            SyncOperation::FollowedArtists => Some(CatalogOperation::FollowedArtists),
            SyncOperation::SavedAlbums => Some(CatalogOperation::SavedAlbums),
            SyncOperation::SavedTracks => Some(CatalogOperation::SavedTracks),
            SyncOperation::ArtistAlbums { .. } => {
                parent_id().map(|artist_id| CatalogOperation::ArtistAlbums { artist_id })
            }
            SyncOperation::AlbumTracks { .. } => {
                parent_id().map(|album_id| CatalogOperation::AlbumTracks { album_id })
            }
        }
    }

    /// Parent relation new and fuzzy-matched entities are placed under.
    pub fn scope(&self, parent: Option<&LibraryEntity>) -> EntityScope {
        match self {
            SyncOperation::ArtistAlbums { artist_id } => EntityScope::artist(artist_id.clone()),
            SyncOperation::AlbumTracks { album_id } => EntityScope::album(
                parent.and_then(|p| p.artist_id()).map(str::to_string),
                album_id.clone(),
            ),
            _ => EntityScope::unscoped(),
        }
    }
}

/// One sync run request
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncRequest {
    pub operation: SyncOperation,
    /// Providers in priority order
    pub providers: Vec<ProviderKind>,
    /// Overrides the operation's default mode
    #[serde(default)]
    pub mode: Option<SyncMode>,
}

impl SyncRequest {
    pub fn new(operation: SyncOperation, providers: Vec<ProviderKind>) -> Self {
        Self {
            operation,
            providers,
            mode: None,
        }
    }

    pub fn with_mode(mut self, mode: SyncMode) -> Self {
        self.mode = Some(mode);
        self
    }

    pub fn effective_mode(&self) -> SyncMode {
        self.mode.unwrap_or_else(|| self.operation.default_mode())
    }
}

// ============================================================================
// Summary Types
// ============================================================================

/// Why a provider was not queried
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SkipReason {
    NotRegistered,
    Auth,
    MissingParentId,
    Unsupported,
    CircuitOpen,
}

impl SkipReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            SkipReason::NotRegistered => "not_registered",
            SkipReason::Auth => "auth",
            SkipReason::MissingParentId => "missing_parent_id",
            SkipReason::Unsupported => "unsupported",
            SkipReason::CircuitOpen => "circuit_open",
        }
    }
}

impl fmt::Display for SkipReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProviderSkip {
    pub provider: ProviderKind,
    pub reason: SkipReason,
}

/// A provider failure, or a candidate that could not be stored
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncFailure {
    pub provider: ProviderKind,
    pub message: String,
    pub recoverable: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncOutcome {
    Succeeded,
    PartiallySucceeded,
    Failed,
    Skipped,
}

impl SyncOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            SyncOutcome::Succeeded => "succeeded",
            SyncOutcome::PartiallySucceeded => "partially_succeeded",
            SyncOutcome::Failed => "failed",
            SyncOutcome::Skipped => "skipped",
        }
    }
}

impl fmt::Display for SyncOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Result of one sync run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncSummary {
    pub operation: SyncOperation,
    pub mode: SyncMode,
    pub created: u64,
    pub updated: u64,
    pub unchanged: u64,
    pub skipped: Vec<ProviderSkip>,
    pub errors: Vec<SyncFailure>,
    /// Providers whose pages were all fetched
    pub providers_succeeded: Vec<ProviderKind>,
    /// Fallback mode: the provider whose result was used
    pub source_provider: Option<ProviderKind>,
    /// Distinct entities touched, in first-seen order
    pub entity_ids: Vec<String>,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
}

impl SyncSummary {
    fn new(operation: SyncOperation, mode: SyncMode, started_at: DateTime<Utc>) -> Self {
        Self {
            operation,
            mode,
            created: 0,
            updated: 0,
            unchanged: 0,
            skipped: Vec::new(),
            errors: Vec::new(),
            providers_succeeded: Vec::new(),
            source_provider: None,
            entity_ids: Vec::new(),
            started_at,
            finished_at: None,
        }
    }

    /// Overall verdict.
    ///
    /// In fallback mode, failures of providers tried before the source
    /// provider are absorbed: the run succeeded if the source delivered
    /// cleanly.
    pub fn outcome(&self) -> SyncOutcome {
        if self.providers_succeeded.is_empty() {
            return if self.errors.is_empty() {
                SyncOutcome::Skipped
            } else {
                SyncOutcome::Failed
            };
        }

        let degraded = match (self.mode, self.source_provider) {
            (SyncMode::Fallback, Some(source)) => {
                self.errors.iter().any(|e| e.provider == source)
            }
            _ => !self.errors.is_empty(),
        };

        if degraded {
            SyncOutcome::PartiallySucceeded
        } else {
            SyncOutcome::Succeeded
        }
    }

    pub fn duration_ms(&self) -> u64 {
        self.finished_at
            .map(|end| (end - self.started_at).num_milliseconds().max(0) as u64)
            .unwrap_or(0)
    }

    fn record(&mut self, outcome: UnitOutcome, seen: &mut HashSet<String>) {
        let id = match outcome {
            UnitOutcome::Created(id) => {
                self.created += 1;
                id
            }
            UnitOutcome::Updated(id) => {
                self.updated += 1;
                id
            }
            UnitOutcome::Unchanged(id) => {
                self.unchanged += 1;
                id
            }
        };
        if seen.insert(id.clone()) {
            self.entity_ids.push(id);
        }
    }
}

enum UnitOutcome {
    Created(String),
    Updated(String),
    Unchanged(String),
}

enum ProviderRunError {
    Provider(BridgeError),
    Storage(SyncError),
}

// ============================================================================
// Orchestrator
// ============================================================================

/// Coordinates providers, resolution and persistence for sync runs
pub struct SyncOrchestrator {
    store: Arc<dyn LibraryStore>,
    token_gate: Arc<TokenGate>,
    breaker: Arc<CircuitBreaker>,
    resolver: EntityResolver,
    retry: RetryController,
    settings: OrchestratorSettings,
    providers: RwLock<HashMap<ProviderKind, Arc<dyn CatalogProvider>>>,
    clock: Arc<dyn Clock>,
    event_bus: Option<EventBus>,
}

impl SyncOrchestrator {
    pub fn new(
        store: Arc<dyn LibraryStore>,
        token_gate: Arc<TokenGate>,
        breaker: Arc<CircuitBreaker>,
    ) -> Self {
        Self {
            store,
            token_gate,
            breaker,
            resolver: EntityResolver::default(),
            retry: RetryController::default(),
            settings: OrchestratorSettings::default(),
            providers: RwLock::new(HashMap::new()),
            clock: Arc::new(SystemClock),
            event_bus: None,
        }
    }

    pub fn with_resolver(mut self, resolver: EntityResolver) -> Self {
        self.resolver = resolver;
        self
    }

    pub fn with_retry(mut self, retry: RetryController) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_settings(mut self, settings: OrchestratorSettings) -> Self {
        self.settings = settings;
        self
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn with_event_bus(mut self, event_bus: EventBus) -> Self {
        self.event_bus = Some(event_bus);
        self
    }

    /// Register (or replace) the client for `kind`.
    pub fn register_provider(&self, kind: ProviderKind, provider: Arc<dyn CatalogProvider>) {
        self.providers
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .insert(kind, provider);
        info!(provider = %kind, "Registered catalog provider");
    }

    pub fn unregister_provider(&self, kind: ProviderKind) -> bool {
        self.providers
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .remove(&kind)
            .is_some()
    }

    pub fn registered_providers(&self) -> Vec<ProviderKind> {
        let providers = self.providers.read().unwrap_or_else(|e| e.into_inner());
        ProviderKind::ALL
            .into_iter()
            .filter(|kind| providers.contains_key(kind))
            .collect()
    }

    pub fn breaker(&self) -> &Arc<CircuitBreaker> {
        &self.breaker
    }

    fn provider(&self, kind: ProviderKind) -> Option<Arc<dyn CatalogProvider>> {
        self.providers
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(&kind)
            .cloned()
    }

    fn emit(&self, event: SyncEvent) {
        if let Some(bus) = &self.event_bus {
            bus.emit(CoreEvent::Sync(event)).ok();
        }
    }

    /// Run one sync.
    ///
    /// # Errors
    ///
    /// - `EntityNotFound` if the operation's parent entity does not exist
    /// - storage errors that survived retrying
    ///
    /// Provider failures are reported in the summary, not as errors.
    #[instrument(skip(self, request), fields(operation = request.operation.name()))]
    pub async fn run_sync(&self, request: SyncRequest) -> Result<SyncSummary> {
        let mode = request.effective_mode();
        let operation = request.operation.clone();
        let op_name = operation.name();
        let kind = operation.entity_kind();
        let mut summary = SyncSummary::new(operation.clone(), mode, self.clock.now());

        info!(
            operation = op_name,
            mode = %mode,
            providers = ?request.providers,
            "Starting sync"
        );
        self.emit(SyncEvent::Started {
            operation: op_name.to_string(),
            mode: mode.to_string(),
            providers: request.providers.iter().map(|p| p.to_string()).collect(),
        });

        let parent = self.load_parent(&operation).await?;
        let scope = operation.scope(parent.as_ref());
        let mut seen_entities = HashSet::new();
        let mut visited = HashSet::new();

        for provider in request.providers.iter().copied() {
            if !visited.insert(provider) {
                continue;
            }

            let Some(client) = self.provider(provider) else {
                self.skip(&mut summary, provider, SkipReason::NotRegistered);
                continue;
            };
            if !self.token_gate.has_usable_credential(provider) {
                self.skip(&mut summary, provider, SkipReason::Auth);
                continue;
            }
            let Some(catalog_op) = operation.catalog_operation(provider, parent.as_ref()) else {
                self.skip(&mut summary, provider, SkipReason::MissingParentId);
                continue;
            };
            if !client.supports(&catalog_op) {
                self.skip(&mut summary, provider, SkipReason::Unsupported);
                continue;
            }
            let Some(permit) = self.breaker.acquire(provider) else {
                self.skip(&mut summary, provider, SkipReason::CircuitOpen);
                continue;
            };

            let result = self
                .sync_provider(
                    client.as_ref(),
                    provider,
                    &catalog_op,
                    kind,
                    &scope,
                    &mut summary,
                    &mut seen_entities,
                )
                .await;

            match result {
                Ok(candidates) => {
                    permit.succeed();
                    summary.providers_succeeded.push(provider);
                    debug!(operation = op_name, provider = %provider, candidates, "Provider sync finished");

                    if mode == SyncMode::Fallback && candidates > 0 {
                        summary.source_provider = Some(provider);
                        break;
                    }
                }
                Err(ProviderRunError::Provider(err)) => {
                    let recoverable = err.is_recoverable();
                    if recoverable {
                        permit.fail();
                    } else {
                        drop(permit);
                    }
                    warn!(
                        operation = op_name,
                        provider = %provider,
                        recoverable,
                        error = %err,
                        "Provider fetch failed"
                    );
                    self.emit(SyncEvent::ProviderFailed {
                        operation: op_name.to_string(),
                        provider: provider.to_string(),
                        message: err.to_string(),
                        recoverable,
                    });
                    summary.errors.push(SyncFailure {
                        provider,
                        message: err.to_string(),
                        recoverable,
                    });
                }
                Err(ProviderRunError::Storage(err)) => {
                    drop(permit);
                    error!(
                        operation = op_name,
                        provider = %provider,
                        error = %err,
                        "Storage failure, aborting sync"
                    );
                    return Err(err);
                }
            }
        }

        summary.finished_at = Some(self.clock.now());
        let outcome = summary.outcome();

        info!(
            operation = op_name,
            outcome = %outcome,
            created = summary.created,
            updated = summary.updated,
            unchanged = summary.unchanged,
            errors = summary.errors.len(),
            source_provider = ?summary.source_provider,
            "Sync finished"
        );
        self.emit(SyncEvent::Completed {
            operation: op_name.to_string(),
            outcome: outcome.to_string(),
            created: summary.created,
            updated: summary.updated,
            unchanged: summary.unchanged,
            errors: summary.errors.len() as u64,
            duration_ms: summary.duration_ms(),
        });

        Ok(summary)
    }

    fn skip(&self, summary: &mut SyncSummary, provider: ProviderKind, reason: SkipReason) {
        debug!(
            operation = summary.operation.name(),
            provider = %provider,
            reason = %reason,
            "Skipping provider"
        );
        self.emit(SyncEvent::ProviderSkipped {
            operation: summary.operation.name().to_string(),
            provider: provider.to_string(),
            reason: reason.to_string(),
        });
        summary.skipped.push(ProviderSkip { provider, reason });
    }

    async fn load_parent(&self, operation: &SyncOperation) -> Result<Option<LibraryEntity>> {
        let Some((kind, id)) = operation.parent() else {
            return Ok(None);
        };

        let store = self.store.as_ref();
        let parent = self
            .retry
            .run("load_parent", move || async move {
                let mut session = store.begin().await?;
                let parent = session.find_by_id(kind, id).await?;
                session.rollback().await?;
                Ok::<_, SyncError>(parent)
            })
            .await?;

        parent.map(Some).ok_or_else(|| SyncError::EntityNotFound {
            entity_type: kind.to_string(),
            id: id.to_string(),
        })
    }

    /// Fetch every page from one provider. Returns the number of candidates
    /// seen.
    #[allow(clippy::too_many_arguments)]
    async fn sync_provider(
        &self,
        client: &dyn CatalogProvider,
        provider: ProviderKind,
        operation: &CatalogOperation,
        kind: EntityKind,
        scope: &EntityScope,
        summary: &mut SyncSummary,
        seen_entities: &mut HashSet<String>,
    ) -> std::result::Result<u64, ProviderRunError> {
        let mut cursor: Option<String> = None;
        let mut candidates_seen = 0u64;

        for page_number in 1..=self.settings.max_pages {
            let page = client
                .fetch_page(operation, cursor.take())
                .await
                .map_err(ProviderRunError::Provider)?;

            if page.candidates.len() > self.settings.page_size as usize {
                return Err(ProviderRunError::Provider(BridgeError::InvalidResponse(
                    format!(
                        "{} returned {} candidates on page {}, limit is {}",
                        operation.name(),
                        page.candidates.len(),
                        page_number,
                        self.settings.page_size
                    ),
                )));
            }

            for candidate in &page.candidates {
                candidates_seen += 1;
                match self.persist_candidate(kind, candidate, provider, scope).await {
                    Ok(outcome) => summary.record(outcome, seen_entities),
                    Err(SyncError::Validation(message)) => {
                        warn!(
                            provider = %provider,
                            candidate = %candidate.name,
                            error = %message,
                            "Skipping invalid candidate"
                        );
                        summary.errors.push(SyncFailure {
                            provider,
                            message,
                            recoverable: false,
                        });
                    }
                    Err(err) => return Err(ProviderRunError::Storage(err)),
                }
            }

            match page.next_cursor {
                Some(next) => cursor = Some(next),
                None => return Ok(candidates_seen),
            }

            if page_number == self.settings.max_pages {
                warn!(
                    provider = %provider,
                    operation = operation.name(),
                    max_pages = self.settings.max_pages,
                    "Page cap reached, stopping pagination"
                );
            }
        }

        Ok(candidates_seen)
    }

    /// One unit of work: fresh session, resolve, persist, commit. A lost
    /// uniqueness race is retried and re-resolves against the winner.
    async fn persist_candidate(
        &self,
        kind: EntityKind,
        candidate: &SyncCandidate,
        provider: ProviderKind,
        scope: &EntityScope,
    ) -> Result<UnitOutcome> {
        let store = self.store.as_ref();
        let resolver = &self.resolver;

        self.retry
            .run("persist_candidate", move || async move {
                let mut session = store.begin().await?;
                let resolution = resolver
                    .resolve(session.as_mut(), kind, candidate, provider, scope)
                    .await?;

                let outcome = match resolution {
                    Resolution::NoMatch => {
                        let entity = new_entity(kind, candidate, provider, scope);
                        session.create(&entity).await?;
                        UnitOutcome::Created(entity.id().to_string())
                    }
                    Resolution::Matched {
                        entity,
                        changed: true,
                        ..
                    } => {
                        session.update(&entity).await?;
                        UnitOutcome::Updated(entity.id().to_string())
                    }
                    Resolution::Matched { entity, .. } => {
                        UnitOutcome::Unchanged(entity.id().to_string())
                    }
                };

                session.commit().await?;
                Ok::<_, SyncError>(outcome)
            })
            .await
    }
}

fn new_entity(
    kind: EntityKind,
    candidate: &SyncCandidate,
    provider: ProviderKind,
    scope: &EntityScope,
) -> LibraryEntity {
    let mut entity = LibraryEntity::new(kind, candidate.name.clone(), scope);
    entity
        .provider_ids_mut()
        .set(provider, candidate.provider_id.clone());

    if let Some(mbid) = candidate
        .musicbrainz_id
        .as_deref()
        .filter(|m| !m.trim().is_empty())
    {
        if entity.musicbrainz_id().is_none() {
            entity.provider_ids_mut().set(ProviderKind::MusicBrainz, mbid);
        }
    }

    if let LibraryEntity::Track(track) = &mut entity {
        if let Some(isrc) = candidate.isrc.as_deref().filter(|i| !i.trim().is_empty()) {
            track.set_isrc(isrc);
        }
    }

    entity.apply_metadata(&candidate.metadata);
    entity
}

impl fmt::Debug for SyncOrchestrator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SyncOrchestrator")
            .field("providers", &self.registered_providers())
            .field("settings", &self.settings)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use bridge_traits::provider::CandidatePage;
    use bridge_traits::time::ManualClock;
    use core_auth::ProviderCredential;
    use core_library::db::create_test_pool;
    use core_library::SqliteLibraryStore;
    use crate::circuit_breaker::CircuitState;
    use core_runtime::config::BreakerSettings;
    use mockall::mock;

    mock! {
        Provider {}

        #[async_trait]
        impl CatalogProvider for Provider {
            async fn fetch_page(
                &self,
                operation: &CatalogOperation,
                cursor: Option<String>,
            ) -> bridge_traits::Result<CandidatePage>;
            fn supports(&self, operation: &CatalogOperation) -> bool;
        }
    }

    struct Harness {
        orchestrator: SyncOrchestrator,
        store: Arc<SqliteLibraryStore>,
        gate: Arc<TokenGate>,
    }

    async fn harness() -> Harness {
        let clock: Arc<dyn Clock> = Arc::new(ManualClock::starting_now());
        let store = Arc::new(SqliteLibraryStore::new(create_test_pool().await.unwrap()));
        let gate = Arc::new(TokenGate::new(clock.clone()));
        let breaker = Arc::new(CircuitBreaker::new(BreakerSettings::default(), clock.clone()));
        let orchestrator = SyncOrchestrator::new(store.clone(), gate.clone(), breaker)
            .with_clock(clock);
        Harness {
            orchestrator,
            store,
            gate,
        }
    }

    fn connect(gate: &TokenGate, provider: ProviderKind) {
        gate.set_credential(provider, ProviderCredential::Anonymous)
            .unwrap();
    }

    fn single_page(candidates: Vec<SyncCandidate>) -> MockProvider {
        let mut provider = MockProvider::new();
        provider.expect_supports().return_const(true);
        provider
            .expect_fetch_page()
            .returning(move |_, _| Ok(CandidatePage::last(candidates.clone())));
        provider
    }

    #[test]
    fn test_default_modes() {
        assert_eq!(SyncOperation::FollowedArtists.default_mode(), SyncMode::Aggregate);
        assert_eq!(SyncOperation::SavedTracks.default_mode(), SyncMode::Aggregate);
        assert_eq!(
            SyncOperation::AlbumTracks {
                album_id: "a".into()
            }
            .default_mode(),
            SyncMode::Fallback
        );
        let request = SyncRequest::new(SyncOperation::SavedAlbums, vec![])
            .with_mode(SyncMode::Fallback);
        assert_eq!(request.effective_mode(), SyncMode::Fallback);
    }

    #[test]
    fn test_request_round_trips_as_json() {
        let request = SyncRequest::new(
            SyncOperation::ArtistAlbums {
                artist_id: "artist-1".into(),
            },
            vec![ProviderKind::Deezer, ProviderKind::Spotify],
        );
        let json = serde_json::to_value(&request).unwrap();
        assert_eq!(json["operation"]["kind"], "artist_albums");
        assert_eq!(json["providers"][0], "deezer");
        let back: SyncRequest = serde_json::from_value(json).unwrap();
        assert_eq!(back, request);
    }

    #[test]
    fn test_outcome_rules() {
        let mut summary = SyncSummary::new(
            SyncOperation::FollowedArtists,
            SyncMode::Aggregate,
            Utc::now(),
        );
        assert_eq!(summary.outcome(), SyncOutcome::Skipped);

        summary.errors.push(SyncFailure {
            provider: ProviderKind::Spotify,
            message: "timeout".into(),
            recoverable: true,
        });
        assert_eq!(summary.outcome(), SyncOutcome::Failed);

        summary.providers_succeeded.push(ProviderKind::Deezer);
        assert_eq!(summary.outcome(), SyncOutcome::PartiallySucceeded);

        summary.mode = SyncMode::Fallback;
        summary.source_provider = Some(ProviderKind::Deezer);
        assert_eq!(summary.outcome(), SyncOutcome::Succeeded);
    }

    #[core_async::test]
    async fn test_unregistered_and_unauthenticated_providers_are_skipped() {
        let h = harness().await;
        h.orchestrator
            .register_provider(ProviderKind::Deezer, Arc::new(MockProvider::new()));

        let summary = h
            .orchestrator
            .run_sync(SyncRequest::new(
                SyncOperation::FollowedArtists,
                vec![ProviderKind::Spotify, ProviderKind::Deezer],
            ))
            .await
            .unwrap();

        assert_eq!(
            summary.skipped,
            vec![
                ProviderSkip {
                    provider: ProviderKind::Spotify,
                    reason: SkipReason::NotRegistered
                },
                ProviderSkip {
                    provider: ProviderKind::Deezer,
                    reason: SkipReason::Auth
                },
            ]
        );
        assert_eq!(summary.outcome(), SyncOutcome::Skipped);
    }

    #[core_async::test]
    async fn test_unsupported_provider_is_skipped() {
        let h = harness().await;
        connect(&h.gate, ProviderKind::Tidal);
        let mut provider = MockProvider::new();
        provider.expect_supports().return_const(false);
        provider.expect_fetch_page().never();
        h.orchestrator
            .register_provider(ProviderKind::Tidal, Arc::new(provider));

        let summary = h
            .orchestrator
            .run_sync(SyncRequest::new(
                SyncOperation::SavedTracks,
                vec![ProviderKind::Tidal],
            ))
            .await
            .unwrap();
        assert_eq!(summary.skipped[0].reason, SkipReason::Unsupported);
    }

    #[core_async::test]
    async fn test_open_circuit_is_skipped_without_calling_provider() {
        let h = harness().await;
        connect(&h.gate, ProviderKind::Spotify);
        for _ in 0..3 {
            h.orchestrator.breaker().record_failure(ProviderKind::Spotify);
        }

        let mut provider = MockProvider::new();
        provider.expect_supports().return_const(true);
        provider.expect_fetch_page().never();
        h.orchestrator
            .register_provider(ProviderKind::Spotify, Arc::new(provider));

        let summary = h
            .orchestrator
            .run_sync(SyncRequest::new(
                SyncOperation::FollowedArtists,
                vec![ProviderKind::Spotify],
            ))
            .await
            .unwrap();
        assert_eq!(summary.skipped[0].reason, SkipReason::CircuitOpen);
    }

    #[core_async::test]
    async fn test_pagination_follows_cursor() {
        let h = harness().await;
        connect(&h.gate, ProviderKind::Deezer);

        let mut provider = MockProvider::new();
        provider.expect_supports().return_const(true);
        provider
            .expect_fetch_page()
            .withf(|_, cursor| cursor.is_none())
            .times(1)
            .returning(|_, _| {
                Ok(CandidatePage::with_cursor(
                    vec![SyncCandidate::new("Bjork", "dz-1")],
                    "page-2",
                ))
            });
        provider
            .expect_fetch_page()
            .withf(|_, cursor| cursor.as_deref() == Some("page-2"))
            .times(1)
            .returning(|_, _| {
                Ok(CandidatePage::last(vec![SyncCandidate::new("Sigur Ros", "dz-2")]))
            });
        h.orchestrator
            .register_provider(ProviderKind::Deezer, Arc::new(provider));

        let summary = h
            .orchestrator
            .run_sync(SyncRequest::new(
                SyncOperation::FollowedArtists,
                vec![ProviderKind::Deezer],
            ))
            .await
            .unwrap();

        assert_eq!(summary.created, 2);
        assert_eq!(summary.entity_ids.len(), 2);
        assert_eq!(summary.outcome(), SyncOutcome::Succeeded);
    }

    #[core_async::test]
    async fn test_page_cap_stops_pagination() {
        let h = harness().await;
        let orchestrator = h
            .orchestrator
            .with_settings(OrchestratorSettings::default().with_max_pages(2));
        connect(&h.gate, ProviderKind::Deezer);

        let mut provider = MockProvider::new();
        provider.expect_supports().return_const(true);
        provider.expect_fetch_page().times(2).returning(|_, cursor| {
            let candidate = match cursor {
                None => SyncCandidate::new("Aphex Twin", "dz-aphex"),
                Some(_) => SyncCandidate::new("Boards of Canada", "dz-boc"),
            };
            Ok(CandidatePage::with_cursor(vec![candidate], "more"))
        });
        orchestrator.register_provider(ProviderKind::Deezer, Arc::new(provider));

        let summary = orchestrator
            .run_sync(SyncRequest::new(
                SyncOperation::FollowedArtists,
                vec![ProviderKind::Deezer],
            ))
            .await
            .unwrap();
        assert_eq!(summary.created, 2);
    }

    #[core_async::test]
    async fn test_oversized_page_is_rejected_without_tripping_breaker() {
        let h = harness().await;
        let orchestrator = h.orchestrator.with_settings(
            OrchestratorSettings::default()
                .with_page_size(2)
                .with_max_pages(5),
        );
        connect(&h.gate, ProviderKind::Deezer);

        let mut provider = MockProvider::new();
        provider.expect_supports().return_const(true);
        provider.expect_fetch_page().times(1).returning(|_, _| {
            Ok(CandidatePage::last(vec![
                SyncCandidate::new("Aphex Twin", "dz-aphex"),
                SyncCandidate::new("Boards of Canada", "dz-boc"),
                SyncCandidate::new("Autechre", "dz-ae"),
            ]))
        });
        orchestrator.register_provider(ProviderKind::Deezer, Arc::new(provider));

        let summary = orchestrator
            .run_sync(SyncRequest::new(
                SyncOperation::FollowedArtists,
                vec![ProviderKind::Deezer],
            ))
            .await
            .unwrap();

        assert_eq!(summary.created, 0);
        assert_eq!(summary.errors.len(), 1);
        assert!(!summary.errors[0].recoverable);
        assert!(summary.errors[0].message.contains("limit is 2"));
        assert_eq!(summary.outcome(), SyncOutcome::Failed);

        let circuit = orchestrator.breaker().snapshot(ProviderKind::Deezer);
        assert_eq!(circuit.state, CircuitState::Closed);
        assert_eq!(circuit.consecutive_failures, 0);
        assert!(!circuit.trial_in_flight);
    }

    #[core_async::test]
    async fn test_invalid_candidate_is_recorded_and_skipped() {
        let h = harness().await;
        connect(&h.gate, ProviderKind::Spotify);
        h.orchestrator.register_provider(
            ProviderKind::Spotify,
            Arc::new(single_page(vec![
                SyncCandidate::new("   ", "sp-blank"),
                SyncCandidate::new("Moby", "sp-moby"),
            ])),
        );

        let summary = h
            .orchestrator
            .run_sync(SyncRequest::new(
                SyncOperation::FollowedArtists,
                vec![ProviderKind::Spotify],
            ))
            .await
            .unwrap();

        assert_eq!(summary.created, 1);
        assert_eq!(summary.errors.len(), 1);
        assert!(!summary.errors[0].recoverable);
        assert_eq!(summary.outcome(), SyncOutcome::PartiallySucceeded);
    }

    #[core_async::test]
    async fn test_permanent_provider_error_does_not_trip_breaker() {
        let h = harness().await;
        connect(&h.gate, ProviderKind::Spotify);
        let mut provider = MockProvider::new();
        provider.expect_supports().return_const(true);
        provider
            .expect_fetch_page()
            .returning(|_, _| Err(BridgeError::Unauthorized("token revoked".into())));
        h.orchestrator
            .register_provider(ProviderKind::Spotify, Arc::new(provider));

        let summary = h
            .orchestrator
            .run_sync(SyncRequest::new(
                SyncOperation::SavedTracks,
                vec![ProviderKind::Spotify],
            ))
            .await
            .unwrap();

        assert_eq!(summary.outcome(), SyncOutcome::Failed);
        assert!(!summary.errors[0].recoverable);
        assert_eq!(
            h.orchestrator
                .breaker()
                .snapshot(ProviderKind::Spotify)
                .consecutive_failures,
            0
        );
    }

    #[core_async::test]
    async fn test_missing_parent_is_entity_not_found() {
        let h = harness().await;
        let err = h
            .orchestrator
            .run_sync(SyncRequest::new(
                SyncOperation::AlbumTracks {
                    album_id: "no-such-album".into(),
                },
                vec![ProviderKind::Spotify],
            ))
            .await
            .unwrap_err();
        assert!(matches!(err, SyncError::EntityNotFound { .. }));
    }

    #[core_async::test]
    async fn test_parent_without_provider_id_is_skipped() {
        let h = harness().await;
        connect(&h.gate, ProviderKind::Spotify);
        connect(&h.gate, ProviderKind::Deezer);

        let mut artist = core_library::Artist::new("Daft Punk");
        artist.provider_ids.set(ProviderKind::Deezer, "dz-daft");
        let artist = LibraryEntity::Artist(artist);
        let mut session = h.store.begin().await.unwrap();
        session.create(&artist).await.unwrap();
        session.commit().await.unwrap();

        let mut spotify = MockProvider::new();
        spotify.expect_supports().return_const(true);
        spotify.expect_fetch_page().never();

        let mut deezer = MockProvider::new();
        deezer.expect_supports().return_const(true);
        deezer
            .expect_fetch_page()
            .withf(|op, _| {
                *op == CatalogOperation::ArtistAlbums {
                    artist_id: "dz-daft".into(),
                }
            })
            .returning(|_, _| {
                Ok(CandidatePage::last(vec![SyncCandidate::new("Discovery", "dz-disc")]))
            });

        h.orchestrator
            .register_provider(ProviderKind::Spotify, Arc::new(spotify));
        h.orchestrator
            .register_provider(ProviderKind::Deezer, Arc::new(deezer));

        let summary = h
            .orchestrator
            .run_sync(SyncRequest::new(
                SyncOperation::ArtistAlbums {
                    artist_id: artist.id().to_string(),
                },
                vec![ProviderKind::Spotify, ProviderKind::Deezer],
            ))
            .await
            .unwrap();

        assert_eq!(summary.skipped[0].reason, SkipReason::MissingParentId);
        assert_eq!(summary.source_provider, Some(ProviderKind::Deezer));
        assert_eq!(summary.created, 1);

        let mut session = h.store.begin().await.unwrap();
        let album = session
            .find_by_id(EntityKind::Album, &summary.entity_ids[0])
            .await
            .unwrap()
            .unwrap();
        assert_eq!(album.artist_id(), Some(artist.id()));
    }

    #[core_async::test]
    async fn test_fallback_continues_past_empty_result() {
        let h = harness().await;
        connect(&h.gate, ProviderKind::Spotify);
        connect(&h.gate, ProviderKind::Deezer);
        h.orchestrator
            .register_provider(ProviderKind::Spotify, Arc::new(single_page(vec![])));
        h.orchestrator.register_provider(
            ProviderKind::Deezer,
            Arc::new(single_page(vec![SyncCandidate::new("Homework", "dz-hw")])),
        );

        let summary = h
            .orchestrator
            .run_sync(
                SyncRequest::new(
                    SyncOperation::SavedAlbums,
                    vec![ProviderKind::Spotify, ProviderKind::Deezer],
                )
                .with_mode(SyncMode::Fallback),
            )
            .await
            .unwrap();

        assert_eq!(
            summary.providers_succeeded,
            vec![ProviderKind::Spotify, ProviderKind::Deezer]
        );
        assert_eq!(summary.source_provider, Some(ProviderKind::Deezer));
    }

    #[core_async::test]
    async fn test_events_are_published() {
        let h = harness().await;
        let bus = EventBus::new(32);
        let mut rx = bus.subscribe();
        let orchestrator = h.orchestrator.with_event_bus(bus);

        orchestrator
            .run_sync(SyncRequest::new(
                SyncOperation::FollowedArtists,
                vec![ProviderKind::Tidal],
            ))
            .await
            .unwrap();

        assert!(matches!(
            rx.recv().await.unwrap(),
            CoreEvent::Sync(SyncEvent::Started { .. })
        ));
        assert!(matches!(
            rx.recv().await.unwrap(),
            CoreEvent::Sync(SyncEvent::ProviderSkipped { .. })
        ));
        match rx.recv().await.unwrap() {
            CoreEvent::Sync(SyncEvent::Completed { outcome, .. }) => assert_eq!(outcome, "skipped"),
            other => panic!("unexpected event {:?}", other),
        }
    }
}
