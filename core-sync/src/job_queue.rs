//! # Job Queue
//!
//! Durable, priority-ordered queue with bounded concurrency and retry
//! bookkeeping.
//!
//! ## Features
//!
//! - **Persistence**: jobs live in the `jobs` table and survive restarts
//! - **Ordering**: `priority DESC, enqueued_at ASC`, gated by `next_run_at`
//! - **Bounded concurrency**: the queue's semaphore is the only limit; a
//!   permit is held for as long as a job runs
//! - **Retry**: exponential backoff between attempts, capped
//! - **Storage hiccups**: queue writes retry transient storage errors; a job
//!   whose outcome cannot be written is handed back to `pending`
//! - **Isolation**: handler errors and panics become job outcomes, never
//!   dispatcher failures
//!
//! ## Usage
//!
//! ```ignore
//! let queue = Arc::new(JobQueue::new(pool, QueueSettings::default()).await?);
//! queue.register_worker(JobWorker::new("catalog").handle("catalog_sync", handler))?;
//! queue.start().await?;
//!
//! let job_id = queue
//!     .enqueue(JobRequest::new("catalog_sync", payload).with_priority(PRIORITY_HIGH))
//!     .await?;
//! let status = queue.get_job(job_id).await?;
//! ```

use crate::error::{Result, SyncError};
use crate::job::{Job, JobId, JobRepository, JobRequest, JobState, JobStatus, SqliteJobRepository};
use crate::retry::{RetryController, RetryPolicy};
use crate::worker::{JobHandler, JobWorker, StatusCell, WorkerStatus};
use bridge_traits::time::{Clock, SystemClock};
use core_async::sync::{
    CancellationToken, Mutex as AsyncMutex, Notify, OwnedSemaphorePermit, Semaphore,
};
use core_async::task::{panic_message, JoinHandle};
use core_runtime::config::{QueueSettings, RetrySettings};
use core_runtime::events::{CoreEvent, EventBus, JobEvent};
use serde::{Deserialize, Serialize};
use sqlx::SqlitePool;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock};
use std::time::Duration;
use tracing::{debug, error, info, warn};

/// Queue statistics
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueStats {
    pub pending: u64,
    pub running: u64,
    pub succeeded: u64,
    pub failed: u64,
    /// Permits not held by running jobs
    pub available_slots: usize,
    pub max_concurrent: usize,
}

impl QueueStats {
    pub fn total(&self) -> u64 {
        self.pending + self.running + self.succeeded + self.failed
    }

    /// No job is waiting or running.
    pub fn is_idle(&self) -> bool {
        self.pending == 0 && self.running == 0
    }
}

struct Binding {
    handler: Arc<dyn JobHandler>,
    worker: String,
    status: Arc<StatusCell>,
}

/// State shared between the queue handle, the dispatcher and job tasks
struct QueueShared {
    repository: Arc<dyn JobRepository>,
    settings: QueueSettings,
    semaphore: Arc<Semaphore>,
    bindings: RwLock<HashMap<String, Binding>>,
    workers: RwLock<Vec<Arc<StatusCell>>>,
    running: AtomicBool,
    notify: Notify,
    clock: Arc<dyn Clock>,
    event_bus: Option<EventBus>,
    /// Single-row reads and writes
    retry: RetryController,
    /// Statements touching many rows
    batch_retry: RetryController,
}

struct Dispatcher {
    cancel: CancellationToken,
    handle: JoinHandle<()>,
}

/// Durable job queue
pub struct JobQueue {
    shared: Arc<QueueShared>,
    dispatcher: AsyncMutex<Option<Dispatcher>>,
}

impl JobQueue {
    /// Create a queue over `pool`, creating the jobs table if needed.
    pub async fn new(pool: SqlitePool, settings: QueueSettings) -> Result<Self> {
        let repository = SqliteJobRepository::new(pool);
        repository.initialize().await?;
        Ok(Self::with_repository(Arc::new(repository), settings))
    }

    /// Create a queue over a custom repository
    pub fn with_repository(repository: Arc<dyn JobRepository>, settings: QueueSettings) -> Self {
        let semaphore = Arc::new(Semaphore::new(settings.max_concurrent));
        Self {
            shared: Arc::new(QueueShared {
                repository,
                settings,
                semaphore,
                bindings: RwLock::new(HashMap::new()),
                workers: RwLock::new(Vec::new()),
                running: AtomicBool::new(false),
                notify: Notify::new(),
                clock: Arc::new(SystemClock),
                event_bus: None,
                retry: RetryController::new(RetryPolicy::default()),
                batch_retry: RetryController::new(RetryPolicy::batch()),
            }),
            dispatcher: AsyncMutex::new(None),
        }
    }

    fn shared_mut(&mut self) -> Option<&mut QueueShared> {
        Arc::get_mut(&mut self.shared)
    }

    /// Replace the clock. Only effective before the queue is shared.
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        if let Some(shared) = self.shared_mut() {
            shared.clock = clock;
        }
        self
    }

    /// Publish job events on `event_bus`. Only effective before the queue is
    /// shared.
    pub fn with_event_bus(mut self, event_bus: EventBus) -> Self {
        if let Some(shared) = self.shared_mut() {
            shared.event_bus = Some(event_bus);
        }
        self
    }

    /// Retry schedule for storage calls. Only effective before the queue is
    /// shared.
    pub fn with_retry_settings(mut self, settings: &RetrySettings) -> Self {
        if let Some(shared) = self.shared_mut() {
            shared.retry = RetryController::new(RetryPolicy::from_settings(settings));
            shared.batch_retry = RetryController::new(RetryPolicy::batch_from_settings(settings));
        }
        self
    }

    pub fn settings(&self) -> &QueueSettings {
        &self.shared.settings
    }

    // ------------------------------------------------------------------------
    // Registration
    // ------------------------------------------------------------------------

    /// Bind every job type of `worker` to its handler.
    ///
    /// # Errors
    ///
    /// `Validation` if one of the job types is already bound; nothing is
    /// registered in that case.
    pub fn register_worker(&self, worker: JobWorker) -> Result<()> {
        let (name, bindings, status) = worker.into_parts();
        let mut table = self
            .shared
            .bindings
            .write()
            .unwrap_or_else(|e| e.into_inner());

        if let Some((job_type, owner)) = bindings
            .iter()
            .find_map(|(job_type, _)| table.get(job_type).map(|b| (job_type, &b.worker)))
        {
            return Err(SyncError::Validation(format!(
                "job type {} is already handled by worker {}",
                job_type, owner
            )));
        }

        for (job_type, handler) in bindings {
            info!(worker = %name, job_type = %job_type, "Registered job handler");
            table.insert(
                job_type,
                Binding {
                    handler,
                    worker: name.clone(),
                    status: status.clone(),
                },
            );
        }
        drop(table);

        status.set_running(self.shared.running.load(Ordering::SeqCst));
        self.shared
            .workers
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .push(status);
        Ok(())
    }

    pub fn worker_statuses(&self) -> Vec<WorkerStatus> {
        self.shared
            .workers
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .iter()
            .map(|s| s.snapshot())
            .collect()
    }

    // ------------------------------------------------------------------------
    // Queue Operations
    // ------------------------------------------------------------------------

    /// Persist a new pending job and wake the dispatcher.
    pub async fn enqueue(&self, request: JobRequest) -> Result<JobId> {
        let now = self.shared.now();
        let job = Job::from_request(request, self.shared.settings.default_max_attempts, now)?;

        self.shared.repository.insert(&job).await?;
        info!(
            job_id = %job.id,
            job_type = %job.job_type,
            priority = job.priority,
            max_attempts = job.max_attempts,
            "Enqueued job"
        );
        self.shared.emit(JobEvent::Enqueued {
            job_id: job.id.to_string(),
            job_type: job.job_type.clone(),
            priority: job.priority,
        });

        self.shared.notify.notify_one();
        Ok(job.id)
    }

    /// Claim the best eligible job, marking it running.
    pub async fn dequeue_next(&self) -> Result<Option<Job>> {
        self.shared.dequeue_next().await
    }

    /// Take one of the queue's concurrency slots for work that runs outside
    /// the queue. Waits while every slot is held by a running job.
    pub async fn acquire_slot(&self) -> Result<OwnedSemaphorePermit> {
        self.shared
            .semaphore
            .clone()
            .acquire_owned()
            .await
            .map_err(|err| SyncError::Internal(format!("job queue closed: {}", err)))
    }

    /// Record the outcome of a running job's attempt.
    pub async fn report_result(&self, job_id: JobId, outcome: Result<()>) -> Result<Job> {
        self.shared.report_result(job_id, outcome).await
    }

    pub async fn get_job(&self, job_id: JobId) -> Result<JobStatus> {
        self.find_job(job_id)
            .await?
            .map(|job| job.status())
            .ok_or_else(|| SyncError::JobNotFound {
                job_id: job_id.to_string(),
            })
    }

    pub async fn find_job(&self, job_id: JobId) -> Result<Option<Job>> {
        self.shared.repository.find_by_id(job_id).await
    }

    pub async fn get_stats(&self) -> Result<QueueStats> {
        let repository = &self.shared.repository;
        Ok(QueueStats {
            pending: repository.count_by_state(JobState::Pending).await?,
            running: repository.count_by_state(JobState::Running).await?,
            succeeded: repository.count_by_state(JobState::Succeeded).await?,
            failed: repository.count_by_state(JobState::Failed).await?,
            available_slots: self.shared.semaphore.available_permits(),
            max_concurrent: self.shared.settings.max_concurrent,
        })
    }

    /// Jobs that failed terminally, most recent first
    pub async fn failed_jobs(&self) -> Result<Vec<Job>> {
        self.shared.repository.find_by_state(JobState::Failed).await
    }

    /// Return jobs left `running` by a previous process to `pending`.
    pub async fn recover_interrupted(&self) -> Result<u64> {
        let repository = self.shared.repository.as_ref();
        let now = self.shared.now();
        let recovered = self
            .shared
            .batch_retry
            .run("reset_running_jobs", move || repository.reset_running(now))
            .await?;
        if recovered > 0 {
            warn!(recovered, "Recovered interrupted jobs");
        }
        Ok(recovered)
    }

    /// Delete terminal jobs that finished more than `older_than` ago.
    pub async fn purge_finished(&self, older_than: Duration) -> Result<u64> {
        let cutoff = self.shared.now() - older_than.as_millis() as i64;
        let repository = self.shared.repository.as_ref();
        let deleted = self
            .shared
            .batch_retry
            .run("purge_finished_jobs", move || repository.delete_finished(cutoff))
            .await?;
        info!(deleted, "Purged finished jobs");
        Ok(deleted)
    }

    // ------------------------------------------------------------------------
    // Lifecycle
    // ------------------------------------------------------------------------

    pub async fn is_running(&self) -> bool {
        self.dispatcher.lock().await.is_some()
    }

    /// Recover interrupted jobs and spawn the dispatcher. Idempotent.
    pub async fn start(&self) -> Result<()> {
        let mut dispatcher = self.dispatcher.lock().await;
        if dispatcher.is_some() {
            return Ok(());
        }

        self.recover_interrupted().await?;

        let cancel = CancellationToken::new();
        let handle = core_async::spawn(dispatch_loop(self.shared.clone(), cancel.clone()));
        *dispatcher = Some(Dispatcher { cancel, handle });
        self.shared.set_workers_running(true);

        info!(
            max_concurrent = self.shared.settings.max_concurrent,
            "Job queue started"
        );
        Ok(())
    }

    /// Stop pulling new jobs and wait for running ones to finish. Idempotent.
    pub async fn stop(&self) {
        let Some(Dispatcher { cancel, handle }) = self.dispatcher.lock().await.take() else {
            return;
        };

        cancel.cancel();
        if let Err(err) = handle.await {
            error!(error = %panic_message(err), "Job dispatcher ended abnormally");
        }

        // Every permit back means every job task has reported.
        let max = self.shared.settings.max_concurrent as u32;
        match self.shared.semaphore.acquire_many(max).await {
            Ok(permits) => drop(permits),
            Err(err) => warn!(error = %err, "Job semaphore closed while draining"),
        }

        self.shared.set_workers_running(false);
        info!("Job queue stopped");
    }
}

impl QueueShared {
    fn now(&self) -> i64 {
        self.clock.unix_timestamp_millis()
    }

    fn emit(&self, event: JobEvent) {
        if let Some(bus) = &self.event_bus {
            bus.emit(CoreEvent::Job(event)).ok();
        }
    }

    fn set_workers_running(&self, running: bool) {
        self.running.store(running, Ordering::SeqCst);
        for status in self.workers.read().unwrap_or_else(|e| e.into_inner()).iter() {
            status.set_running(running);
        }
    }

    fn binding(&self, job_type: &str) -> Option<(Arc<dyn JobHandler>, Arc<StatusCell>)> {
        self.bindings
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(job_type)
            .map(|b| (b.handler.clone(), b.status.clone()))
    }

    /// `min(base * 2^(attempts - 1), max)`
    fn backoff(&self, attempts: u32) -> Duration {
        let exponent = attempts.saturating_sub(1).min(31);
        self.settings
            .backoff_base
            .checked_mul(1u32 << exponent)
            .unwrap_or(self.settings.backoff_max)
            .min(self.settings.backoff_max)
    }

    async fn dequeue_next(&self) -> Result<Option<Job>> {
        let repository = self.repository.as_ref();
        let now = self.now();
        let job = self
            .retry
            .run("claim_next_job", move || repository.claim_next(now))
            .await?;
        if let Some(job) = &job {
            debug!(
                job_id = %job.id,
                job_type = %job.job_type,
                attempt = job.attempts + 1,
                "Dequeued job"
            );
        }
        Ok(job)
    }

    async fn write(&self, job: &Job) -> Result<()> {
        let repository = self.repository.as_ref();
        self.retry
            .run("update_job", move || repository.update(job))
            .await
    }

    async fn report_result(&self, job_id: JobId, outcome: Result<()>) -> Result<Job> {
        let repository = self.repository.as_ref();
        let mut job = self
            .retry
            .run("load_job", move || repository.find_by_id(job_id))
            .await?
            .ok_or_else(|| SyncError::JobNotFound {
                job_id: job_id.to_string(),
            })?;

        if job.state != JobState::Running {
            return Err(SyncError::InvalidStatus(format!(
                "job {} is {}, not running",
                job_id, job.state
            )));
        }

        let now = self.now();
        match outcome {
            Ok(()) => {
                job.succeed(now);
                self.write(&job).await?;
                info!(job_id = %job.id, job_type = %job.job_type, attempts = job.attempts, "Job succeeded");
                self.emit(JobEvent::Succeeded {
                    job_id: job.id.to_string(),
                    job_type: job.job_type.clone(),
                    attempts: job.attempts,
                });
            }
            Err(err) => {
                let retryable = err.is_retryable_job_failure();
                let backoff = self.backoff(job.attempts + 1);
                let message = err.to_string();

                if job.fail(message.clone(), retryable, backoff, now) {
                    self.write(&job).await?;
                    warn!(
                        job_id = %job.id,
                        job_type = %job.job_type,
                        attempts = job.attempts,
                        max_attempts = job.max_attempts,
                        backoff_ms = backoff.as_millis() as u64,
                        error = %message,
                        "Job failed, will retry"
                    );
                    self.emit(JobEvent::Retrying {
                        job_id: job.id.to_string(),
                        job_type: job.job_type.clone(),
                        attempts: job.attempts,
                        next_run_at: job.next_run_at,
                        message,
                    });
                } else {
                    self.write(&job).await?;
                    error!(
                        job_id = %job.id,
                        job_type = %job.job_type,
                        attempts = job.attempts,
                        retryable,
                        error = %message,
                        "Job failed permanently"
                    );
                    self.emit(JobEvent::Failed {
                        job_id: job.id.to_string(),
                        job_type: job.job_type.clone(),
                        attempts: job.attempts,
                        message,
                    });
                }
            }
        }

        Ok(job)
    }

    /// Run one claimed job to completion while holding `_permit`.
    async fn execute(self: Arc<Self>, job: Job, _permit: OwnedSemaphorePermit) {
        let job_id = job.id;
        self.emit(JobEvent::Started {
            job_id: job_id.to_string(),
            job_type: job.job_type.clone(),
            attempt: job.attempts + 1,
        });

        let binding = self.binding(&job.job_type);
        let outcome = match &binding {
            None => Err(SyncError::HandlerNotRegistered(job.job_type.clone())),
            Some((handler, _)) => {
                let handler = handler.clone();
                let job = job.clone();
                match core_async::spawn(async move { handler.handle(&job).await }).await {
                    Ok(result) => result,
                    Err(join_err) => Err(SyncError::Internal(format!(
                        "job handler panicked: {}",
                        panic_message(join_err)
                    ))),
                }
            }
        };

        if let Some((_, status)) = &binding {
            let now = self.clock.now();
            match &outcome {
                Ok(()) => status.record_success(now),
                Err(err) => status.record_failure(now, err.to_string()),
            }
        }

        if let Err(err) = self.report_result(job_id, outcome).await {
            error!(job_id = %job_id, error = %err, "Failed to record job outcome");
            self.hand_back(job_id).await;
        }
    }

    /// Return a job whose outcome was lost to `pending` so it runs again.
    /// Whatever is still `running` after this is picked up by the next
    /// `recover_interrupted`.
    async fn hand_back(&self, job_id: JobId) {
        let repository = self.repository.as_ref();
        let now = self.now();
        match self
            .retry
            .run("release_job", move || repository.release_running(job_id, now))
            .await
        {
            Ok(true) => {
                warn!(job_id = %job_id, "Job returned to pending after its outcome was lost");
                self.notify.notify_one();
            }
            Ok(false) => {}
            Err(err) => {
                error!(job_id = %job_id, error = %err, "Job left running until the next recovery");
            }
        }
    }
}

async fn dispatch_loop(shared: Arc<QueueShared>, cancel: CancellationToken) {
    debug!("Job dispatcher running");

    loop {
        let permit = core_async::select! {
            _ = cancel.cancelled() => break,
            permit = shared.semaphore.clone().acquire_owned() => match permit {
                Ok(permit) => permit,
                Err(_) => break,
            },
        };

        if cancel.is_cancelled() {
            break;
        }

        match shared.dequeue_next().await {
            Ok(Some(job)) => {
                core_async::spawn(shared.clone().execute(job, permit));
                continue;
            }
            Ok(None) => drop(permit),
            Err(err) => {
                drop(permit);
                warn!(error = %err, "Failed to claim next job");
            }
        }

        core_async::select! {
            _ = cancel.cancelled() => break,
            _ = shared.notify.notified() => {}
            _ = core_async::sleep(shared.settings.poll_interval) => {}
        }
    }

    debug!("Job dispatcher stopped");
}

impl std::fmt::Debug for JobQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JobQueue")
            .field("settings", &self.shared.settings)
            .finish()
    }
}
