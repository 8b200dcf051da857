//! # Sync Engine
//!
//! Wires configuration, storage, provider health, the orchestrator, the job
//! queue and the worker runtime into one handle.
//!
//! ```ignore
//! let gate = Arc::new(TokenGate::new(Arc::new(SystemClock)));
//! gate.set_credential(ProviderKind::MusicBrainz, ProviderCredential::Anonymous)?;
//!
//! let engine = SyncEngine::builder(EngineConfig::builder().database_path("library.db").build()?)
//!     .token_gate(gate)
//!     .provider(ProviderKind::MusicBrainz, Arc::new(musicbrainz_client))
//!     .build()
//!     .await?;
//!
//! engine
//!     .schedule_periodic(
//!         "followed_artists",
//!         SyncRequest::new(SyncOperation::FollowedArtists, vec![ProviderKind::MusicBrainz]),
//!         Duration::from_secs(6 * 60 * 60),
//!     )
//!     .await?;
//! engine.start().await?;
//! ```

use crate::error::{CoreError, Result};
use crate::handlers::{sync_job, validate_request, CatalogSyncHandler, EnqueueSyncTask, CATALOG_SYNC_JOB};
use bridge_traits::provider::CatalogProvider;
use bridge_traits::time::{Clock, SystemClock};
use core_async::sync::broadcast::Receiver;
use core_auth::{ProviderKind, TokenGate};
use core_library::db::{create_pool, DatabaseConfig};
use core_library::SqliteLibraryStore;
use core_runtime::config::EngineConfig;
use core_runtime::events::{CoreEvent, EventBus};
use core_sync::{
    CircuitBreaker, CircuitSnapshot, EntityResolver, JobId, JobQueue, JobStatus, JobWorker,
    LoopWorker, QueueStats, RetryController, RetryPolicy, SyncOrchestrator, SyncRequest,
    SyncSummary, WorkerRuntime, WorkerStatus, PRIORITY_NORMAL,
};
use sqlx::SqlitePool;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

/// Builder for [`SyncEngine`]
pub struct SyncEngineBuilder {
    config: EngineConfig,
    token_gate: Option<Arc<TokenGate>>,
    providers: Vec<(ProviderKind, Arc<dyn CatalogProvider>)>,
    clock: Arc<dyn Clock>,
    pool: Option<SqlitePool>,
}

impl SyncEngineBuilder {
    /// Credentials consulted before every provider call. Without one, no
    /// provider is usable until credentials are set on
    /// [`SyncEngine::token_gate`].
    ///
    /// The default gate publishes credential changes on the engine's event
    /// bus. A gate passed here keeps whatever bus it was built with.
    pub fn token_gate(mut self, token_gate: Arc<TokenGate>) -> Self {
        self.token_gate = Some(token_gate);
        self
    }

    pub fn provider(mut self, kind: ProviderKind, provider: Arc<dyn CatalogProvider>) -> Self {
        self.providers.push((kind, provider));
        self
    }

    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Use an existing pool instead of opening `config.database_path`.
    pub fn pool(mut self, pool: SqlitePool) -> Self {
        self.pool = Some(pool);
        self
    }

    pub async fn build(self) -> Result<SyncEngine> {
        self.config.validate()?;
        let config = self.config;

        let pool = match self.pool {
            Some(pool) => pool,
            None => create_pool(DatabaseConfig::from_path(config.database_path.as_deref())).await?,
        };

        let event_bus = EventBus::new(config.event_buffer_size);
        let clock = self.clock;
        let token_gate = self.token_gate.unwrap_or_else(|| {
            Arc::new(TokenGate::new(clock.clone()).with_event_bus(event_bus.clone()))
        });

        let store = Arc::new(SqliteLibraryStore::new(pool.clone()));
        let breaker = Arc::new(
            CircuitBreaker::new(config.breaker.clone(), clock.clone())
                .with_event_bus(event_bus.clone()),
        );
        let orchestrator = Arc::new(
            SyncOrchestrator::new(store.clone(), token_gate.clone(), breaker.clone())
                .with_resolver(EntityResolver::new(config.resolver.clone()))
                .with_retry(RetryController::new(RetryPolicy::from_settings(&config.retry)))
                .with_settings(config.orchestrator.clone())
                .with_clock(clock.clone())
                .with_event_bus(event_bus.clone()),
        );
        for (kind, provider) in self.providers {
            orchestrator.register_provider(kind, provider);
        }

        let queue = Arc::new(
            JobQueue::new(pool.clone(), config.queue.clone())
                .await?
                .with_clock(clock.clone())
                .with_retry_settings(&config.retry)
                .with_event_bus(event_bus.clone()),
        );
        let runtime = WorkerRuntime::new(queue.clone());
        runtime.add_job_worker(
            JobWorker::new("catalog_sync_worker").handle(
                CATALOG_SYNC_JOB,
                Arc::new(CatalogSyncHandler::new(orchestrator.clone())),
            ),
        )?;

        info!(
            database = ?config.database_path,
            providers = ?orchestrator.registered_providers(),
            "Sync engine initialized"
        );

        Ok(SyncEngine {
            config,
            pool,
            store,
            token_gate,
            breaker,
            orchestrator,
            queue,
            runtime,
            event_bus,
            clock,
        })
    }
}

/// Facade over the whole sync stack.
pub struct SyncEngine {
    config: EngineConfig,
    pool: SqlitePool,
    store: Arc<SqliteLibraryStore>,
    token_gate: Arc<TokenGate>,
    breaker: Arc<CircuitBreaker>,
    orchestrator: Arc<SyncOrchestrator>,
    queue: Arc<JobQueue>,
    runtime: WorkerRuntime,
    event_bus: EventBus,
    clock: Arc<dyn Clock>,
}

impl SyncEngine {
    pub fn builder(config: EngineConfig) -> SyncEngineBuilder {
        SyncEngineBuilder {
            config,
            token_gate: None,
            providers: Vec::new(),
            clock: Arc::new(SystemClock),
            pool: None,
        }
    }

    // ------------------------------------------------------------------------
    // Lifecycle
    // ------------------------------------------------------------------------

    /// Start the job dispatcher and every scheduled loop worker.
    pub async fn start(&self) -> Result<()> {
        self.runtime.start().await?;
        Ok(())
    }

    /// Stop loop workers, then wait for running jobs to finish.
    pub async fn stop(&self) {
        self.runtime.stop().await;
    }

    pub fn is_running(&self) -> bool {
        self.runtime.is_running()
    }

    // ------------------------------------------------------------------------
    // Providers & Credentials
    // ------------------------------------------------------------------------

    pub fn register_provider(&self, kind: ProviderKind, provider: Arc<dyn CatalogProvider>) {
        self.orchestrator.register_provider(kind, provider);
    }

    pub fn token_gate(&self) -> &Arc<TokenGate> {
        &self.token_gate
    }

    pub fn circuit_state(&self, provider: ProviderKind) -> CircuitSnapshot {
        self.breaker.snapshot(provider)
    }

    pub fn reset_circuit(&self, provider: ProviderKind) {
        self.breaker.reset(provider);
    }

    // ------------------------------------------------------------------------
    // Sync
    // ------------------------------------------------------------------------

    /// Run a sync inline instead of as a job. The run occupies one of the
    /// queue's concurrency slots, so it waits behind running jobs.
    pub async fn run_sync_now(&self, request: SyncRequest) -> Result<SyncSummary> {
        validate_request(&request)?;
        let _slot = self.queue.acquire_slot().await?;
        Ok(self.orchestrator.run_sync(request).await?)
    }

    /// Queue a sync run at normal priority.
    pub async fn enqueue_sync(&self, request: SyncRequest) -> Result<JobId> {
        self.enqueue_sync_with_priority(request, PRIORITY_NORMAL).await
    }

    pub async fn enqueue_sync_with_priority(
        &self,
        request: SyncRequest,
        priority: i32,
    ) -> Result<JobId> {
        Ok(self.queue.enqueue(sync_job(&request, priority)?).await?)
    }

    /// Add a loop worker that enqueues `request` every `interval`, after the
    /// configured startup delay.
    pub async fn schedule_periodic(
        &self,
        name: impl Into<String>,
        request: SyncRequest,
        interval: Duration,
    ) -> Result<()> {
        validate_request(&request)?;
        let name = name.into();
        if self.runtime.status(&name).is_some() {
            return Err(CoreError::InitializationFailed(format!(
                "a worker named {} already exists",
                name
            )));
        }

        let settings = self.config.worker.clone().with_interval(interval);
        settings.validate()?;

        let task = EnqueueSyncTask::new(self.queue.clone(), request, PRIORITY_NORMAL);
        let worker = LoopWorker::new(name, Arc::new(task), settings)
            .with_clock(self.clock.clone())
            .with_event_bus(self.event_bus.clone());
        self.runtime.add_loop_worker(worker).await;
        Ok(())
    }

    // ------------------------------------------------------------------------
    // Status
    // ------------------------------------------------------------------------

    pub async fn job_status(&self, job_id: JobId) -> Result<JobStatus> {
        Ok(self.queue.get_job(job_id).await?)
    }

    pub async fn queue_stats(&self) -> Result<QueueStats> {
        Ok(self.queue.get_stats().await?)
    }

    /// Delete finished jobs older than `older_than`.
    pub async fn purge_finished_jobs(&self, older_than: Duration) -> Result<u64> {
        Ok(self.queue.purge_finished(older_than).await?)
    }

    pub fn worker_statuses(&self) -> Vec<WorkerStatus> {
        self.runtime.statuses()
    }

    pub fn subscribe(&self) -> Receiver<CoreEvent> {
        self.event_bus.subscribe()
    }

    // ------------------------------------------------------------------------
    // Accessors
    // ------------------------------------------------------------------------

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    pub fn store(&self) -> &Arc<SqliteLibraryStore> {
        &self.store
    }

    pub fn queue(&self) -> &Arc<JobQueue> {
        &self.queue
    }

    pub fn orchestrator(&self) -> &Arc<SyncOrchestrator> {
        &self.orchestrator
    }
}

impl std::fmt::Debug for SyncEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SyncEngine")
            .field("config", &self.config)
            .field("orchestrator", &self.orchestrator)
            .finish()
    }
}
