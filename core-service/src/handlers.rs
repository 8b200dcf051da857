//! Job handlers and periodic tasks that connect the queue to the
//! orchestrator.

use async_trait::async_trait;
use core_sync::{
    Job, JobHandler, JobQueue, JobRequest, PeriodicTask, SyncError, SyncOrchestrator,
    SyncOutcome, SyncRequest,
};
use std::sync::Arc;
use tracing::{debug, info};

/// Job type tag for queued sync runs
pub const CATALOG_SYNC_JOB: &str = "catalog_sync";

/// Decode a `catalog_sync` payload.
pub fn decode_request(payload: &serde_json::Value) -> core_sync::Result<SyncRequest> {
    let request: SyncRequest = serde_json::from_value(payload.clone())
        .map_err(|e| SyncError::Validation(format!("invalid catalog_sync payload: {}", e)))?;
    validate_request(&request)?;
    Ok(request)
}

pub fn validate_request(request: &SyncRequest) -> core_sync::Result<()> {
    if request.providers.is_empty() {
        return Err(SyncError::Validation(
            "sync request names no providers".to_string(),
        ));
    }
    Ok(())
}

/// Build the queue request for a sync run.
pub fn sync_job(request: &SyncRequest, priority: i32) -> core_sync::Result<JobRequest> {
    validate_request(request)?;
    Ok(JobRequest::new(CATALOG_SYNC_JOB, serde_json::to_value(request)?).with_priority(priority))
}

/// Runs queued sync requests.
///
/// A run that ends `Failed` (every provider errored) fails the attempt so
/// the queue retries it later.
pub struct CatalogSyncHandler {
    orchestrator: Arc<SyncOrchestrator>,
}

impl CatalogSyncHandler {
    pub fn new(orchestrator: Arc<SyncOrchestrator>) -> Self {
        Self { orchestrator }
    }
}

#[async_trait]
impl JobHandler for CatalogSyncHandler {
    async fn handle(&self, job: &Job) -> core_sync::Result<()> {
        let request = decode_request(&job.payload)?;
        let summary = self.orchestrator.run_sync(request).await?;

        let outcome = summary.outcome();
        debug!(job_id = %job.id, outcome = %outcome, "Catalog sync job finished");

        match (outcome, summary.errors.first()) {
            (SyncOutcome::Failed, Some(first)) => Err(SyncError::Provider {
                provider: first.provider,
                message: summary
                    .errors
                    .iter()
                    .map(|e| format!("{}: {}", e.provider, e.message))
                    .collect::<Vec<_>>()
                    .join("; "),
                recoverable: summary.errors.iter().any(|e| e.recoverable),
            }),
            _ => Ok(()),
        }
    }
}

/// Loop worker task that enqueues the same sync request on every tick.
pub struct EnqueueSyncTask {
    queue: Arc<JobQueue>,
    request: SyncRequest,
    priority: i32,
}

impl EnqueueSyncTask {
    pub fn new(queue: Arc<JobQueue>, request: SyncRequest, priority: i32) -> Self {
        Self {
            queue,
            request,
            priority,
        }
    }
}

#[async_trait]
impl PeriodicTask for EnqueueSyncTask {
    async fn run_once(&self) -> core_sync::Result<()> {
        let job_id = self
            .queue
            .enqueue(sync_job(&self.request, self.priority)?)
            .await?;
        info!(
            job_id = %job_id,
            operation = self.request.operation.name(),
            "Scheduled sync enqueued"
        );
        Ok(())
    }
}
