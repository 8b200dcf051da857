//! # Sync Engine
//!
//! Resolves provider catalog data into the local library and schedules that
//! work durably.
//!
//! ## Overview
//!
//! - Fetching catalog pages from every connected `CatalogProvider`
//! - Matching each candidate to an existing artist, album or track, or
//!   creating one
//! - Isolating unhealthy providers behind per-provider circuit breakers
//! - Retrying storage contention with capped exponential backoff
//! - Running syncs as queued jobs and periodic workers
//!
//! ## Components
//!
//! - **Entity Resolver** (`resolver`, `matching`): identifier cascade plus guarded fuzzy matching
//! - **Sync Orchestrator** (`orchestrator`): fallback and aggregate runs across providers
//! - **Circuit Breaker** (`circuit_breaker`): closed / open / half-open per provider
//! - **Retry Controller** (`retry`): transient-error retry with backoff
//! - **Job Queue** (`job`, `job_queue`): durable priority queue with bounded concurrency
//! - **Workers** (`worker`): loop workers, job workers and their supervisor

pub mod circuit_breaker;
pub mod error;
pub mod job;
pub mod job_queue;
pub mod matching;
pub mod orchestrator;
pub mod resolver;
pub mod retry;
pub mod worker;

pub use circuit_breaker::{CircuitBreaker, CircuitPermit, CircuitSnapshot, CircuitState};
pub use error::{Result, SyncError};
pub use job::{
    Job, JobId, JobRepository, JobRequest, JobState, JobStatus, SqliteJobRepository,
    DEFAULT_MAX_ATTEMPTS, PRIORITY_HIGH, PRIORITY_LOW, PRIORITY_NORMAL,
};
pub use job_queue::{JobQueue, QueueStats};
pub use matching::similarity;
pub use orchestrator::{
    ProviderSkip, SkipReason, SyncFailure, SyncMode, SyncOperation, SyncOrchestrator,
    SyncOutcome, SyncRequest, SyncSummary,
};
pub use resolver::{EntityResolver, MatchedBy, Resolution};
pub use retry::{RetryController, RetryPolicy, TransientError};
pub use worker::{
    JobHandler, JobWorker, LoopWorker, PeriodicTask, WorkerKind, WorkerRuntime, WorkerStatus,
};
