//! # Worker Runtime
//!
//! Two supervised worker shapes:
//!
//! - [`LoopWorker`]: owns a timer. After a startup delay it runs one unit of
//!   work per interval until stopped.
//! - [`JobWorker`]: a named set of `job_type → handler` bindings. It owns no
//!   timer; the [`JobQueue`](crate::job_queue::JobQueue) dispatcher drives it.
//!
//! Every unit of work runs in its own task, so an error or a panic is
//! recorded on the worker's status and never ends the loop. Both shapes
//! report through the same [`WorkerStatus`].
//!
//! ```ignore
//! let runtime = WorkerRuntime::new(queue.clone());
//! runtime
//!     .add_loop_worker(LoopWorker::new("refresh_followed", task, settings))
//!     .await;
//! runtime.start().await?;
//! // ...
//! runtime.stop().await;
//! ```

use crate::error::Result;
use crate::job::Job;
use crate::job_queue::JobQueue;
use async_trait::async_trait;
use bridge_traits::time::{Clock, SystemClock};
use chrono::{DateTime, Utc};
use core_async::sync::{CancellationToken, Mutex as AsyncMutex};
use core_async::task::{panic_message, JoinHandle};
use core_runtime::config::WorkerSettings;
use core_runtime::events::{CoreEvent, EventBus, WorkerEvent};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing::{debug, info, warn};

// ============================================================================
// Work Traits
// ============================================================================

/// One unit of periodic work.
#[async_trait]
pub trait PeriodicTask: Send + Sync {
    async fn run_once(&self) -> Result<()>;
}

/// Executes jobs of the types it is bound to.
///
/// Return `SyncError::Validation` for a payload that can never succeed; any
/// other error is retried by the queue while attempts remain.
#[async_trait]
pub trait JobHandler: Send + Sync {
    async fn handle(&self, job: &Job) -> Result<()>;
}

// ============================================================================
// Status
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkerKind {
    Loop,
    Job,
}

/// Uniform status snapshot for monitoring surfaces
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkerStatus {
    pub name: String,
    pub kind: WorkerKind,
    pub running: bool,
    pub last_run: Option<DateTime<Utc>>,
    pub last_success: Option<DateTime<Utc>>,
    pub consecutive_errors: u32,
    pub total_runs: u64,
    pub total_failures: u64,
    pub last_error: Option<String>,
}

impl WorkerStatus {
    fn new(name: String, kind: WorkerKind) -> Self {
        Self {
            name,
            kind,
            running: false,
            last_run: None,
            last_success: None,
            consecutive_errors: 0,
            total_runs: 0,
            total_failures: 0,
            last_error: None,
        }
    }
}

/// Shared, lock-protected status record
#[derive(Debug)]
pub(crate) struct StatusCell {
    status: Mutex<WorkerStatus>,
}

impl StatusCell {
    pub(crate) fn new(name: &str, kind: WorkerKind) -> Self {
        Self {
            status: Mutex::new(WorkerStatus::new(name.to_string(), kind)),
        }
    }

    fn with<R>(&self, f: impl FnOnce(&mut WorkerStatus) -> R) -> R {
        let mut status = self.status.lock().unwrap_or_else(|e| e.into_inner());
        f(&mut status)
    }

    pub(crate) fn set_running(&self, running: bool) {
        self.with(|s| s.running = running);
    }

    pub(crate) fn record_success(&self, at: DateTime<Utc>) {
        self.with(|s| {
            s.last_run = Some(at);
            s.last_success = Some(at);
            s.total_runs += 1;
            s.consecutive_errors = 0;
        });
    }

    pub(crate) fn record_failure(&self, at: DateTime<Utc>, message: String) {
        self.with(|s| {
            s.last_run = Some(at);
            s.total_runs += 1;
            s.total_failures += 1;
            s.consecutive_errors += 1;
            s.last_error = Some(message);
        });
    }

    pub(crate) fn snapshot(&self) -> WorkerStatus {
        self.with(|s| s.clone())
    }
}

// ============================================================================
// Job Worker
// ============================================================================

/// Named group of job handler bindings.
pub struct JobWorker {
    name: String,
    bindings: Vec<(String, Arc<dyn JobHandler>)>,
    status: Arc<StatusCell>,
}

impl JobWorker {
    pub fn new(name: impl Into<String>) -> Self {
        let name = name.into();
        let status = Arc::new(StatusCell::new(&name, WorkerKind::Job));
        Self {
            name,
            bindings: Vec::new(),
            status,
        }
    }

    /// Bind `job_type` to `handler`.
    pub fn handle(mut self, job_type: impl Into<String>, handler: Arc<dyn JobHandler>) -> Self {
        self.bindings.push((job_type.into(), handler));
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn job_types(&self) -> impl Iterator<Item = &str> {
        self.bindings.iter().map(|(job_type, _)| job_type.as_str())
    }

    pub fn status(&self) -> WorkerStatus {
        self.status.snapshot()
    }

    pub(crate) fn into_parts(self) -> (String, Vec<(String, Arc<dyn JobHandler>)>, Arc<StatusCell>) {
        (self.name, self.bindings, self.status)
    }
}

// ============================================================================
// Loop Worker
// ============================================================================

struct RunningLoop {
    cancel: CancellationToken,
    handle: JoinHandle<()>,
}

/// Self-scheduling periodic worker.
pub struct LoopWorker {
    name: String,
    startup_delay: Duration,
    interval: Duration,
    task: Arc<dyn PeriodicTask>,
    status: Arc<StatusCell>,
    clock: Arc<dyn Clock>,
    event_bus: Option<EventBus>,
    running: AsyncMutex<Option<RunningLoop>>,
}

impl LoopWorker {
    pub fn new(name: impl Into<String>, task: Arc<dyn PeriodicTask>, settings: WorkerSettings) -> Self {
        let name = name.into();
        let status = Arc::new(StatusCell::new(&name, WorkerKind::Loop));
        Self {
            name,
            startup_delay: settings.startup_delay,
            interval: settings.interval,
            task,
            status,
            clock: Arc::new(SystemClock),
            event_bus: None,
            running: AsyncMutex::new(None),
        }
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn with_event_bus(mut self, event_bus: EventBus) -> Self {
        self.event_bus = Some(event_bus);
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn status(&self) -> WorkerStatus {
        self.status.snapshot()
    }

    pub async fn is_running(&self) -> bool {
        self.running.lock().await.is_some()
    }

    /// Spawn the loop. Calling it on a running worker does nothing.
    pub async fn start(&self) {
        let mut running = self.running.lock().await;
        if running.is_some() {
            debug!(worker = %self.name, "Worker already running");
            return;
        }

        let cancel = CancellationToken::new();
        let context = LoopContext {
            name: self.name.clone(),
            startup_delay: self.startup_delay,
            interval: self.interval,
            task: self.task.clone(),
            status: self.status.clone(),
            clock: self.clock.clone(),
            event_bus: self.event_bus.clone(),
        };
        let handle = core_async::spawn(context.run(cancel.clone()));

        self.status.set_running(true);
        *running = Some(RunningLoop { cancel, handle });

        info!(
            worker = %self.name,
            interval_ms = self.interval.as_millis() as u64,
            "Loop worker started"
        );
        self.emit(WorkerEvent::Started {
            worker: self.name.clone(),
        });
    }

    /// Cancel the sleep and wait for the in-flight unit to finish. Calling
    /// it on a stopped worker does nothing.
    pub async fn stop(&self) {
        let Some(RunningLoop { cancel, handle }) = self.running.lock().await.take() else {
            return;
        };

        cancel.cancel();
        if let Err(err) = handle.await {
            warn!(worker = %self.name, error = %panic_message(err), "Worker loop ended abnormally");
        }

        self.status.set_running(false);
        info!(worker = %self.name, "Loop worker stopped");
        self.emit(WorkerEvent::Stopped {
            worker: self.name.clone(),
        });
    }

    fn emit(&self, event: WorkerEvent) {
        if let Some(bus) = &self.event_bus {
            bus.emit(CoreEvent::Worker(event)).ok();
        }
    }
}

impl std::fmt::Debug for LoopWorker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LoopWorker")
            .field("name", &self.name)
            .field("startup_delay", &self.startup_delay)
            .field("interval", &self.interval)
            .finish()
    }
}

struct LoopContext {
    name: String,
    startup_delay: Duration,
    interval: Duration,
    task: Arc<dyn PeriodicTask>,
    status: Arc<StatusCell>,
    clock: Arc<dyn Clock>,
    event_bus: Option<EventBus>,
}

impl LoopContext {
    async fn run(self, cancel: CancellationToken) {
        core_async::select! {
            _ = cancel.cancelled() => return,
            _ = core_async::sleep(self.startup_delay) => {}
        }

        loop {
            if cancel.is_cancelled() {
                break;
            }

            self.tick().await;

            core_async::select! {
                _ = cancel.cancelled() => break,
                _ = core_async::sleep(self.interval) => {}
            }
        }
    }

    async fn tick(&self) {
        let task = self.task.clone();
        let outcome = match core_async::spawn(async move { task.run_once().await }).await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(err)) => Err(err.to_string()),
            Err(join_err) => Err(format!("unit of work panicked: {}", panic_message(join_err))),
        };

        let now = self.clock.now();
        match outcome {
            Ok(()) => {
                self.status.record_success(now);
                debug!(worker = %self.name, "Worker tick succeeded");
            }
            Err(message) => {
                warn!(worker = %self.name, error = %message, "Worker tick failed");
                self.status.record_failure(now, message.clone());
                if let Some(bus) = &self.event_bus {
                    bus.emit(CoreEvent::Worker(WorkerEvent::TickFailed {
                        worker: self.name.clone(),
                        message,
                    }))
                    .ok();
                }
            }
        }
    }
}

// ============================================================================
// Supervisor
// ============================================================================

/// Owns the loop workers and the job queue, starting and stopping them
/// together.
pub struct WorkerRuntime {
    queue: Arc<JobQueue>,
    loop_workers: Mutex<Vec<Arc<LoopWorker>>>,
    running: AtomicBool,
}

impl WorkerRuntime {
    pub fn new(queue: Arc<JobQueue>) -> Self {
        Self {
            queue,
            loop_workers: Mutex::new(Vec::new()),
            running: AtomicBool::new(false),
        }
    }

    pub fn queue(&self) -> &Arc<JobQueue> {
        &self.queue
    }

    /// Add a loop worker; it starts right away if the runtime is running.
    pub async fn add_loop_worker(&self, worker: LoopWorker) -> Arc<LoopWorker> {
        let worker = Arc::new(worker);
        self.loop_workers
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(worker.clone());

        if self.is_running() {
            worker.start().await;
        }
        worker
    }

    /// Register a job worker's bindings with the queue.
    pub fn add_job_worker(&self, worker: JobWorker) -> Result<()> {
        self.queue.register_worker(worker)
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    fn loop_workers(&self) -> Vec<Arc<LoopWorker>> {
        self.loop_workers
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    /// Start the queue dispatcher and every loop worker.
    pub async fn start(&self) -> Result<()> {
        if self.running.swap(true, Ordering::SeqCst) {
            return Ok(());
        }

        if let Err(err) = self.queue.start().await {
            self.running.store(false, Ordering::SeqCst);
            return Err(err);
        }
        for worker in self.loop_workers() {
            worker.start().await;
        }

        info!("Worker runtime started");
        Ok(())
    }

    /// Stop loop workers first so nothing new is enqueued, then drain the
    /// queue.
    pub async fn stop(&self) {
        if !self.running.swap(false, Ordering::SeqCst) {
            return;
        }

        for worker in self.loop_workers() {
            worker.stop().await;
        }
        self.queue.stop().await;

        info!("Worker runtime stopped");
    }

    /// Status of every loop and job worker.
    pub fn statuses(&self) -> Vec<WorkerStatus> {
        let mut statuses: Vec<WorkerStatus> =
            self.loop_workers().iter().map(|w| w.status()).collect();
        statuses.extend(self.queue.worker_statuses());
        statuses
    }

    pub fn status(&self, name: &str) -> Option<WorkerStatus> {
        self.statuses().into_iter().find(|s| s.name == name)
    }
}
