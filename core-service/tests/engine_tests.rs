//! Integration tests for the assembled sync engine
//!
//! Everything goes through the public facade: queued and inline sync runs,
//! malformed payloads, failed runs being retried by the queue, credential
//! events and periodic schedules.

use async_trait::async_trait;
use bridge_traits::error::BridgeError;
use bridge_traits::provider::{
    CandidatePage, CatalogOperation, CatalogProvider, EntityKind, SyncCandidate,
};
use core_runtime::config::{QueueSettings, WorkerSettings};
use core_runtime::events::{CoreEvent, JobEvent, ProviderEvent};
use core_service::{
    EngineConfig, JobId, JobState, JobStatus, ProviderCredential, ProviderKind, SyncEngine,
    SyncMode, SyncOperation, SyncOutcome, SyncRequest, CATALOG_SYNC_JOB,
};
use core_library::{LibrarySession, LibraryStore};
use core_sync::JobRequest;
use serde_json::json;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

// ============================================================================
// Fixtures
// ============================================================================

struct FixedProvider {
    result: Result<Vec<SyncCandidate>, BridgeError>,
    calls: AtomicUsize,
}

impl FixedProvider {
    fn returning(candidates: Vec<SyncCandidate>) -> Arc<Self> {
        Arc::new(Self {
            result: Ok(candidates),
            calls: AtomicUsize::new(0),
        })
    }

    fn failing(error: BridgeError) -> Arc<Self> {
        Arc::new(Self {
            result: Err(error),
            calls: AtomicUsize::new(0),
        })
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl CatalogProvider for FixedProvider {
    async fn fetch_page(
        &self,
        _operation: &CatalogOperation,
        _cursor: Option<String>,
    ) -> bridge_traits::Result<CandidatePage> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.result.clone().map(CandidatePage::last)
    }

    fn supports(&self, _operation: &CatalogOperation) -> bool {
        true
    }
}

fn fast_config() -> EngineConfig {
    EngineConfig::builder()
        .queue(
            QueueSettings::default()
                .with_default_max_attempts(2)
                .with_backoff(Duration::from_millis(10), Duration::from_millis(10))
                .with_poll_interval(Duration::from_millis(5)),
        )
        .worker(WorkerSettings::default().with_startup_delay(Duration::ZERO))
        .build()
        .unwrap()
}

async fn engine(providers: Vec<(ProviderKind, Arc<dyn CatalogProvider>)>) -> SyncEngine {
    let mut builder = SyncEngine::builder(fast_config());
    for (kind, provider) in providers {
        builder = builder.provider(kind, provider);
    }
    let engine = builder.build().await.unwrap();
    for kind in ProviderKind::ALL {
        engine
            .token_gate()
            .set_credential(kind, ProviderCredential::Anonymous)
            .unwrap();
    }
    engine
}

async fn wait_for_terminal(engine: &SyncEngine, job_id: JobId) -> JobStatus {
    for _ in 0..400 {
        let status = engine.job_status(job_id).await.unwrap();
        if status.state.is_terminal() {
            return status;
        }
        core_async::sleep(Duration::from_millis(5)).await;
    }
    panic!("job {} never finished", job_id);
}

// ============================================================================
// Tests
// ============================================================================

#[core_async::test]
async fn queued_aggregate_sync_merges_artist_across_providers() {
    let spotify = FixedProvider::returning(vec![
        SyncCandidate::new("Radiohead", "sp-1").with_musicbrainz_id("M1")
    ]);
    let musicbrainz = FixedProvider::returning(vec![
        SyncCandidate::new("Radiohead", "M1").with_musicbrainz_id("M1")
    ]);
    let engine = engine(vec![
        (ProviderKind::Spotify, spotify.clone() as Arc<dyn CatalogProvider>),
        (ProviderKind::MusicBrainz, musicbrainz.clone() as Arc<dyn CatalogProvider>),
    ])
    .await;

    let request = SyncRequest::new(
        SyncOperation::FollowedArtists,
        vec![ProviderKind::Spotify, ProviderKind::MusicBrainz],
    )
    .with_mode(SyncMode::Aggregate);
    let job_id = engine.enqueue_sync(request).await.unwrap();
    engine.start().await.unwrap();

    let status = wait_for_terminal(&engine, job_id).await;
    engine.stop().await;

    assert_eq!(status.state, JobState::Succeeded);
    assert_eq!(status.attempts, 1);
    assert_eq!(spotify.calls(), 1);
    assert_eq!(musicbrainz.calls(), 1);

    let mut session = engine.store().begin().await.unwrap();
    let artist = session
        .find_by_provider_id(EntityKind::Artist, ProviderKind::Spotify, "sp-1")
        .await
        .unwrap()
        .expect("artist stored");
    assert_eq!(artist.musicbrainz_id(), Some("M1"));
    assert_eq!(
        artist.provider_ids().get(ProviderKind::MusicBrainz),
        Some("M1")
    );
}

#[core_async::test]
async fn run_sync_now_runs_inline_without_a_job() {
    let deezer = FixedProvider::returning(vec![SyncCandidate::new("Kid A", "dz-1")]);
    let engine = engine(vec![(
        ProviderKind::Deezer,
        deezer as Arc<dyn CatalogProvider>,
    )])
    .await;

    let summary = engine
        .run_sync_now(SyncRequest::new(
            SyncOperation::SavedAlbums,
            vec![ProviderKind::Deezer],
        ))
        .await
        .unwrap();

    assert_eq!(summary.outcome(), SyncOutcome::Succeeded);
    assert_eq!(summary.created, 1);
    assert!(engine.queue_stats().await.unwrap().is_idle());
}

#[core_async::test]
async fn run_sync_now_waits_for_a_queue_slot() {
    let deezer = FixedProvider::returning(vec![SyncCandidate::new("Kid A", "dz-1")]);
    let engine = engine(vec![(
        ProviderKind::Deezer,
        deezer.clone() as Arc<dyn CatalogProvider>,
    )])
    .await;
    let request = SyncRequest::new(SyncOperation::SavedAlbums, vec![ProviderKind::Deezer]);

    // the only slot, as a running job would hold it
    let slot = engine.queue().acquire_slot().await.unwrap();
    let blocked =
        core_async::time::timeout(Duration::from_millis(50), engine.run_sync_now(request.clone()))
            .await;
    assert!(blocked.is_err());
    assert_eq!(deezer.calls(), 0);

    drop(slot);
    let summary = engine.run_sync_now(request).await.unwrap();
    assert_eq!(summary.created, 1);
    assert_eq!(deezer.calls(), 1);
}

#[core_async::test]
async fn credential_changes_are_published() {
    let engine = engine(vec![]).await;
    let mut events = engine.subscribe();

    assert!(engine.token_gate().revoke(ProviderKind::Tidal));
    engine
        .token_gate()
        .set_credential(ProviderKind::Spotify, ProviderCredential::Anonymous)
        .unwrap();

    let mut changes = Vec::new();
    while let Ok(event) = events.try_recv() {
        if let CoreEvent::Provider(ProviderEvent::CredentialChanged { provider, connected }) = event
        {
            changes.push((provider, connected));
        }
    }
    assert_eq!(
        changes,
        vec![("tidal".to_string(), false), ("spotify".to_string(), true)]
    );
}

#[core_async::test]
async fn malformed_payload_fails_without_retry() {
    let engine = engine(vec![]).await;
    let mut events = engine.subscribe();

    let job_id = engine
        .queue()
        .enqueue(JobRequest::new(CATALOG_SYNC_JOB, json!({ "operation": 5 })))
        .await
        .unwrap();
    engine.start().await.unwrap();

    let status = wait_for_terminal(&engine, job_id).await;
    engine.stop().await;

    assert_eq!(status.state, JobState::Failed);
    assert_eq!(status.attempts, 1);
    assert!(status.last_error.unwrap().contains("invalid catalog_sync payload"));

    let mut saw_retry = false;
    while let Ok(event) = events.try_recv() {
        if let CoreEvent::Job(JobEvent::Retrying { .. }) = event {
            saw_retry = true;
        }
    }
    assert!(!saw_retry);
}

#[core_async::test]
async fn failed_run_is_retried_until_attempts_run_out() {
    let tidal = FixedProvider::failing(BridgeError::Unavailable("maintenance".to_string()));
    let engine = engine(vec![(
        ProviderKind::Tidal,
        tidal.clone() as Arc<dyn CatalogProvider>,
    )])
    .await;

    let job_id = engine
        .enqueue_sync(SyncRequest::new(
            SyncOperation::SavedTracks,
            vec![ProviderKind::Tidal],
        ))
        .await
        .unwrap();
    engine.start().await.unwrap();

    let status = wait_for_terminal(&engine, job_id).await;
    engine.stop().await;

    assert_eq!(status.state, JobState::Failed);
    assert_eq!(status.attempts, 2);
    assert_eq!(tidal.calls(), 2);
    assert!(status.last_error.unwrap().contains("maintenance"));
    assert_eq!(engine.circuit_state(ProviderKind::Tidal).consecutive_failures, 2);
}

#[core_async::test]
async fn periodic_schedule_enqueues_sync_jobs() {
    let musicbrainz = FixedProvider::returning(vec![
        SyncCandidate::new("Boards of Canada", "M2").with_musicbrainz_id("M2")
    ]);
    let engine = engine(vec![(
        ProviderKind::MusicBrainz,
        musicbrainz.clone() as Arc<dyn CatalogProvider>,
    )])
    .await;

    engine
        .schedule_periodic(
            "followed_artists",
            SyncRequest::new(SyncOperation::FollowedArtists, vec![ProviderKind::MusicBrainz]),
            Duration::from_secs(3600),
        )
        .await
        .unwrap();
    engine.start().await.unwrap();

    for _ in 0..400 {
        if engine.queue_stats().await.unwrap().succeeded >= 1 {
            break;
        }
        core_async::sleep(Duration::from_millis(5)).await;
    }
    engine.stop().await;

    let stats = engine.queue_stats().await.unwrap();
    assert_eq!(stats.succeeded, 1);
    assert_eq!(musicbrainz.calls(), 1);

    let status = engine
        .worker_statuses()
        .into_iter()
        .find(|s| s.name == "followed_artists")
        .unwrap();
    assert_eq!(status.total_runs, 1);
    assert_eq!(status.consecutive_errors, 0);
    assert!(!status.running);
}
