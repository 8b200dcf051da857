//! Core service façade.
//!
//! Builds the whole sync stack from one [`EngineConfig`] and exposes it as a
//! [`SyncEngine`]: provider registration, immediate and queued sync runs,
//! periodic scheduling, and queue/worker/circuit status.
//!
//! Host applications register one [`CatalogProvider`] per [`ProviderKind`]
//! and credentials on the engine's [`TokenGate`]; everything else is internal.

pub mod engine;
pub mod error;
pub mod handlers;

pub use engine::{SyncEngine, SyncEngineBuilder};
pub use error::{CoreError, Result};
pub use handlers::{CatalogSyncHandler, EnqueueSyncTask, CATALOG_SYNC_JOB};

pub use bridge_traits::provider::CatalogProvider;
pub use core_auth::{ProviderCredential, ProviderKind, TokenGate};
pub use core_runtime::config::EngineConfig;
pub use core_sync::{
    JobId, JobState, JobStatus, QueueStats, SyncMode, SyncOperation, SyncOutcome, SyncRequest,
    SyncSummary, WorkerStatus,
};
