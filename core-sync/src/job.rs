//! # Jobs
//!
//! Persisted units of scheduled work and their SQLite repository.
//!
//! ## State Machine
//!
//! ```text
//! Pending → Running → Succeeded
//!    ↑         │
//!    └─────────┤ (retryable failure, attempts remain)
//!              ↓
//!            Failed
//! ```
//!
//! The payload is opaque JSON; only the handler bound to `job_type`
//! interprets it.

use crate::error::{Result, SyncError};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};
use std::str::FromStr;
use std::time::Duration;
use uuid::Uuid;

/// Default number of attempts before a job fails terminally
pub const DEFAULT_MAX_ATTEMPTS: u32 = 3;

pub const PRIORITY_LOW: i32 = -10;
pub const PRIORITY_NORMAL: i32 = 0;
pub const PRIORITY_HIGH: i32 = 10;

// ============================================================================
// ID Types
// ============================================================================

/// Unique identifier for a job
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct JobId(Uuid);

impl JobId {
    /// Create a new random job ID
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Parse a job ID from a string
    ///
    /// # Errors
    ///
    /// Returns an error if the string is not a valid UUID
    pub fn from_string(s: &str) -> Result<Self> {
        Uuid::parse_str(s)
            .map(Self)
            .map_err(|e| SyncError::InvalidJobId(e.to_string()))
    }

    /// Get the string representation of this ID
    pub fn as_str(&self) -> String {
        self.0.to_string()
    }
}

impl Default for JobId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for JobId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for JobId {
    type Err = SyncError;

    fn from_str(s: &str) -> Result<Self> {
        Self::from_string(s)
    }
}

// ============================================================================
// State Types
// ============================================================================

/// Lifecycle state of a job
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobState {
    /// Waiting for `next_run_at`
    Pending,
    /// Claimed by the dispatcher
    Running,
    Succeeded,
    /// Terminal failure; never dispatched again
    Failed,
}

impl JobState {
    pub const ALL: [JobState; 4] = [
        JobState::Pending,
        JobState::Running,
        JobState::Succeeded,
        JobState::Failed,
    ];

    pub fn is_terminal(&self) -> bool {
        matches!(self, JobState::Succeeded | JobState::Failed)
    }

    pub fn is_active(&self) -> bool {
        matches!(self, JobState::Pending | JobState::Running)
    }

    /// Get the string representation for database storage
    pub fn as_str(&self) -> &'static str {
        match self {
            JobState::Pending => "pending",
            JobState::Running => "running",
            JobState::Succeeded => "succeeded",
            JobState::Failed => "failed",
        }
    }
}

impl FromStr for JobState {
    type Err = SyncError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "pending" => Ok(JobState::Pending),
            "running" => Ok(JobState::Running),
            "succeeded" => Ok(JobState::Succeeded),
            "failed" => Ok(JobState::Failed),
            _ => Err(SyncError::InvalidStatus(s.to_string())),
        }
    }
}

impl std::fmt::Display for JobState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

// ============================================================================
// Job
// ============================================================================

/// What a caller hands to `enqueue`.
#[derive(Debug, Clone, PartialEq)]
pub struct JobRequest {
    pub job_type: String,
    pub payload: serde_json::Value,
    pub priority: i32,
    /// Falls back to the queue's configured default
    pub max_attempts: Option<u32>,
}

impl JobRequest {
    pub fn new(job_type: impl Into<String>, payload: serde_json::Value) -> Self {
        Self {
            job_type: job_type.into(),
            payload,
            priority: PRIORITY_NORMAL,
            max_attempts: None,
        }
    }

    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = Some(max_attempts);
        self
    }
}

/// A persisted job. Timestamps are Unix milliseconds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Job {
    pub id: JobId,
    pub job_type: String,
    pub payload: serde_json::Value,
    /// Higher runs first
    pub priority: i32,
    /// Completed attempts
    pub attempts: u32,
    pub max_attempts: u32,
    pub state: JobState,
    pub last_error: Option<String>,
    pub enqueued_at: i64,
    /// Not dispatched before this instant
    pub next_run_at: i64,
    pub started_at: Option<i64>,
    pub finished_at: Option<i64>,
    pub updated_at: i64,
}

impl Job {
    /// Build a pending job, eligible immediately.
    ///
    /// # Errors
    ///
    /// `Validation` for a blank job type or zero attempts.
    pub fn from_request(request: JobRequest, default_max_attempts: u32, now: i64) -> Result<Self> {
        if request.job_type.trim().is_empty() {
            return Err(SyncError::Validation("job type must not be empty".to_string()));
        }

        let max_attempts = request.max_attempts.unwrap_or(default_max_attempts);
        if max_attempts == 0 {
            return Err(SyncError::Validation(
                "max_attempts must be at least 1".to_string(),
            ));
        }

        Ok(Self {
            id: JobId::new(),
            job_type: request.job_type,
            payload: request.payload,
            priority: request.priority,
            attempts: 0,
            max_attempts,
            state: JobState::Pending,
            last_error: None,
            enqueued_at: now,
            next_run_at: now,
            started_at: None,
            finished_at: None,
            updated_at: now,
        })
    }

    pub fn can_retry(&self) -> bool {
        self.attempts < self.max_attempts
    }

    /// Record a successful attempt.
    pub fn succeed(&mut self, now: i64) {
        self.attempts += 1;
        self.state = JobState::Succeeded;
        self.last_error = None;
        self.finished_at = Some(now);
        self.updated_at = now;
    }

    /// Record a failed attempt.
    ///
    /// Returns `true` when the job was rescheduled after `backoff`, `false`
    /// when it failed terminally.
    pub fn fail(&mut self, error: String, retryable: bool, backoff: Duration, now: i64) -> bool {
        self.attempts += 1;
        self.last_error = Some(error);
        self.updated_at = now;

        if retryable && self.can_retry() {
            self.state = JobState::Pending;
            self.next_run_at = now.saturating_add(backoff.as_millis() as i64);
            true
        } else {
            self.state = JobState::Failed;
            self.finished_at = Some(now);
            false
        }
    }

    pub fn status(&self) -> JobStatus {
        JobStatus::from(self)
    }
}

/// Externally visible view of a job
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobStatus {
    pub id: JobId,
    pub job_type: String,
    pub state: JobState,
    pub attempts: u32,
    pub max_attempts: u32,
    pub last_error: Option<String>,
    pub next_run_at: i64,
}

impl From<&Job> for JobStatus {
    fn from(job: &Job) -> Self {
        Self {
            id: job.id,
            job_type: job.job_type.clone(),
            state: job.state,
            attempts: job.attempts,
            max_attempts: job.max_attempts,
            last_error: job.last_error.clone(),
            next_run_at: job.next_run_at,
        }
    }
}

// ============================================================================
// Repository
// ============================================================================

/// Repository trait for persisting jobs
#[async_trait]
pub trait JobRepository: Send + Sync {
    async fn insert(&self, job: &Job) -> Result<()>;

    /// Persist the mutable fields of `job`
    async fn update(&self, job: &Job) -> Result<()>;

    async fn find_by_id(&self, id: JobId) -> Result<Option<Job>>;

    /// Atomically move the best eligible pending job to `running`.
    async fn claim_next(&self, now: i64) -> Result<Option<Job>>;

    async fn count_by_state(&self, state: JobState) -> Result<u64>;

    /// Return `running` jobs to `pending`; used after a crash.
    async fn reset_running(&self, now: i64) -> Result<u64>;

    /// Return one `running` job to `pending` without touching its attempt
    /// count. `false` if the job was not running.
    async fn release_running(&self, id: JobId, now: i64) -> Result<bool>;

    /// Delete terminal jobs finished before `before`.
    async fn delete_finished(&self, before: i64) -> Result<u64>;

    async fn find_by_state(&self, state: JobState) -> Result<Vec<Job>>;
}

const JOB_COLUMNS: &str = "id, job_type, payload, priority, attempts, max_attempts, state, \
     last_error, enqueued_at, next_run_at, started_at, finished_at, updated_at";

/// SQLite implementation of the job repository
pub struct SqliteJobRepository {
    pool: SqlitePool,
}

impl SqliteJobRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Initialize the jobs table if it doesn't exist
    pub async fn initialize(&self) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS jobs (
                seq INTEGER PRIMARY KEY AUTOINCREMENT,
                id TEXT NOT NULL UNIQUE,
                job_type TEXT NOT NULL,
                payload TEXT NOT NULL,
                priority INTEGER NOT NULL DEFAULT 0,
                attempts INTEGER NOT NULL DEFAULT 0,
                max_attempts INTEGER NOT NULL DEFAULT 3,
                state TEXT NOT NULL,
                last_error TEXT,
                enqueued_at INTEGER NOT NULL,
                next_run_at INTEGER NOT NULL,
                started_at INTEGER,
                finished_at INTEGER,
                updated_at INTEGER NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE INDEX IF NOT EXISTS idx_jobs_dispatch
            ON jobs(state, priority DESC, enqueued_at ASC, seq ASC)
            "#,
        )
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    fn row_to_job(row: &SqliteRow) -> Result<Job> {
        let payload: String = row.get("payload");
        Ok(Job {
            id: JobId::from_string(&row.get::<String, _>("id"))?,
            job_type: row.get("job_type"),
            payload: serde_json::from_str(&payload)?,
            priority: row.get::<i64, _>("priority") as i32,
            attempts: row.get::<i64, _>("attempts") as u32,
            max_attempts: row.get::<i64, _>("max_attempts") as u32,
            state: row.get::<String, _>("state").parse()?,
            last_error: row.get("last_error"),
            enqueued_at: row.get("enqueued_at"),
            next_run_at: row.get("next_run_at"),
            started_at: row.get("started_at"),
            finished_at: row.get("finished_at"),
            updated_at: row.get("updated_at"),
        })
    }
}

#[async_trait]
impl JobRepository for SqliteJobRepository {
    async fn insert(&self, job: &Job) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO jobs (
                id, job_type, payload, priority, attempts, max_attempts, state,
                last_error, enqueued_at, next_run_at, started_at, finished_at, updated_at
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(job.id.as_str())
        .bind(&job.job_type)
        .bind(serde_json::to_string(&job.payload)?)
        .bind(job.priority as i64)
        .bind(job.attempts as i64)
        .bind(job.max_attempts as i64)
        .bind(job.state.as_str())
        .bind(&job.last_error)
        .bind(job.enqueued_at)
        .bind(job.next_run_at)
        .bind(job.started_at)
        .bind(job.finished_at)
        .bind(job.updated_at)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn update(&self, job: &Job) -> Result<()> {
        let result = sqlx::query(
            r#"
            UPDATE jobs SET
                attempts = ?,
                state = ?,
                last_error = ?,
                next_run_at = ?,
                started_at = ?,
                finished_at = ?,
                updated_at = ?
            WHERE id = ?
            "#,
        )
        .bind(job.attempts as i64)
        .bind(job.state.as_str())
        .bind(&job.last_error)
        .bind(job.next_run_at)
        .bind(job.started_at)
        .bind(job.finished_at)
        .bind(job.updated_at)
        .bind(job.id.as_str())
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(SyncError::JobNotFound {
                job_id: job.id.to_string(),
            });
        }
        Ok(())
    }

    async fn find_by_id(&self, id: JobId) -> Result<Option<Job>> {
        let sql = format!("SELECT {} FROM jobs WHERE id = ?", JOB_COLUMNS);
        let row = sqlx::query(&sql)
            .bind(id.as_str())
            .fetch_optional(&self.pool)
            .await?;

        row.as_ref().map(Self::row_to_job).transpose()
    }

    async fn claim_next(&self, now: i64) -> Result<Option<Job>> {
        let sql = format!(
            r#"
            UPDATE jobs SET state = 'running', started_at = ?, updated_at = ?
            WHERE seq = (
                SELECT seq FROM jobs
                WHERE state = 'pending' AND next_run_at <= ?
                ORDER BY priority DESC, enqueued_at ASC, seq ASC
                LIMIT 1
            )
            RETURNING {}
            "#,
            JOB_COLUMNS
        );

        let row = sqlx::query(&sql)
            .bind(now)
            .bind(now)
            .bind(now)
            .fetch_optional(&self.pool)
            .await?;

        row.as_ref().map(Self::row_to_job).transpose()
    }

    async fn count_by_state(&self, state: JobState) -> Result<u64> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM jobs WHERE state = ?")
            .bind(state.as_str())
            .fetch_one(&self.pool)
            .await?;

        Ok(count as u64)
    }

    async fn reset_running(&self, now: i64) -> Result<u64> {
        let result = sqlx::query(
            "UPDATE jobs SET state = 'pending', next_run_at = ?, updated_at = ? WHERE state = 'running'",
        )
        .bind(now)
        .bind(now)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected())
    }

    async fn release_running(&self, id: JobId, now: i64) -> Result<bool> {
        let result = sqlx::query(
            "UPDATE jobs SET state = 'pending', started_at = NULL, next_run_at = ?, updated_at = ? \
             WHERE id = ? AND state = 'running'",
        )
        .bind(now)
        .bind(now)
        .bind(id.as_str())
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    async fn delete_finished(&self, before: i64) -> Result<u64> {
        let result = sqlx::query(
            "DELETE FROM jobs WHERE state IN ('succeeded', 'failed') AND finished_at < ?",
        )
        .bind(before)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected())
    }

    async fn find_by_state(&self, state: JobState) -> Result<Vec<Job>> {
        let sql = format!(
            "SELECT {} FROM jobs WHERE state = ? ORDER BY updated_at DESC, seq DESC",
            JOB_COLUMNS
        );
        let rows = sqlx::query(&sql)
            .bind(state.as_str())
            .fetch_all(&self.pool)
            .await?;

        rows.iter().map(Self::row_to_job).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use core_library::db::create_test_pool;
    use serde_json::json;

    async fn repository() -> SqliteJobRepository {
        let repo = SqliteJobRepository::new(create_test_pool().await.unwrap());
        repo.initialize().await.unwrap();
        repo
    }

    fn job(job_type: &str, priority: i32, now: i64) -> Job {
        Job::from_request(
            JobRequest::new(job_type, json!({ "n": priority })).with_priority(priority),
            DEFAULT_MAX_ATTEMPTS,
            now,
        )
        .unwrap()
    }

    #[test]
    fn test_job_id_round_trip() {
        let id = JobId::new();
        assert_eq!(JobId::from_string(&id.as_str()).unwrap(), id);
        assert!(matches!(
            "not-a-uuid".parse::<JobId>(),
            Err(SyncError::InvalidJobId(_))
        ));
    }

    #[test]
    fn test_job_state() {
        for state in JobState::ALL {
            assert_eq!(state.as_str().parse::<JobState>().unwrap(), state);
        }
        assert!(JobState::Succeeded.is_terminal());
        assert!(JobState::Failed.is_terminal());
        assert!(JobState::Running.is_active());
        assert!("done".parse::<JobState>().is_err());
    }

    #[test]
    fn test_request_validation() {
        let blank = Job::from_request(JobRequest::new("  ", json!(null)), 3, 0);
        assert!(matches!(blank, Err(SyncError::Validation(_))));

        let zero = Job::from_request(JobRequest::new("sync", json!(null)).with_max_attempts(0), 3, 0);
        assert!(matches!(zero, Err(SyncError::Validation(_))));

        let defaulted = Job::from_request(JobRequest::new("sync", json!(null)), 7, 1_000).unwrap();
        assert_eq!(defaulted.max_attempts, 7);
        assert_eq!(defaulted.next_run_at, 1_000);
        assert_eq!(defaulted.priority, PRIORITY_NORMAL);
    }

    #[test]
    fn test_failure_reschedules_until_exhausted() {
        let mut job = job("sync", 0, 0);
        let backoff = Duration::from_millis(500);

        assert!(job.fail("boom".into(), true, backoff, 1_000));
        assert_eq!(job.state, JobState::Pending);
        assert_eq!(job.next_run_at, 1_500);

        assert!(job.fail("boom".into(), true, backoff, 2_000));
        assert!(!job.fail("boom".into(), true, backoff, 3_000));
        assert_eq!(job.state, JobState::Failed);
        assert_eq!(job.attempts, 3);
        assert_eq!(job.finished_at, Some(3_000));
    }

    #[test]
    fn test_non_retryable_failure_is_terminal() {
        let mut job = job("sync", 0, 0);
        assert!(!job.fail("bad payload".into(), false, Duration::ZERO, 10));
        assert_eq!(job.state, JobState::Failed);
        assert_eq!(job.attempts, 1);
        assert_eq!(job.status().last_error.as_deref(), Some("bad payload"));
    }

    #[core_async::test]
    async fn test_insert_and_find() {
        let repo = repository().await;
        let job = job("catalog_sync", 5, 100);
        repo.insert(&job).await.unwrap();

        let found = repo.find_by_id(job.id).await.unwrap().unwrap();
        assert_eq!(found, job);
        assert!(repo.find_by_id(JobId::new()).await.unwrap().is_none());
    }

    #[core_async::test]
    async fn test_claim_orders_by_priority_then_fifo() {
        let repo = repository().await;
        let first_normal = job("a", PRIORITY_NORMAL, 100);
        let second_normal = job("b", PRIORITY_NORMAL, 100);
        let high = job("c", PRIORITY_HIGH, 200);
        let low = job("d", PRIORITY_LOW, 50);
        for j in [&first_normal, &second_normal, &high, &low] {
            repo.insert(j).await.unwrap();
        }

        let order: Vec<String> = {
            let mut order = Vec::new();
            while let Some(claimed) = repo.claim_next(1_000).await.unwrap() {
                assert_eq!(claimed.state, JobState::Running);
                assert_eq!(claimed.started_at, Some(1_000));
                order.push(claimed.job_type);
            }
            order
        };
        assert_eq!(order, vec!["c", "a", "b", "d"]);
    }

    #[core_async::test]
    async fn test_claim_respects_next_run_at() {
        let repo = repository().await;
        let mut later = job("later", PRIORITY_HIGH, 0);
        later.next_run_at = 5_000;
        repo.insert(&later).await.unwrap();

        assert!(repo.claim_next(4_999).await.unwrap().is_none());
        assert_eq!(repo.claim_next(5_000).await.unwrap().unwrap().id, later.id);
    }

    #[core_async::test]
    async fn test_update_and_counts() {
        let repo = repository().await;
        let mut j = job("sync", 0, 0);
        repo.insert(&j).await.unwrap();

        j.succeed(10);
        repo.update(&j).await.unwrap();
        assert_eq!(repo.count_by_state(JobState::Succeeded).await.unwrap(), 1);
        assert_eq!(repo.count_by_state(JobState::Pending).await.unwrap(), 0);

        let missing = job("ghost", 0, 0);
        assert!(matches!(
            repo.update(&missing).await,
            Err(SyncError::JobNotFound { .. })
        ));
    }

    #[core_async::test]
    async fn test_reset_running_and_purge() {
        let repo = repository().await;
        let a = job("a", 0, 0);
        let b = job("b", 0, 0);
        repo.insert(&a).await.unwrap();
        repo.insert(&b).await.unwrap();

        repo.claim_next(10).await.unwrap().unwrap();
        assert_eq!(repo.reset_running(20).await.unwrap(), 1);
        assert_eq!(repo.count_by_state(JobState::Pending).await.unwrap(), 2);

        let mut done = repo.claim_next(30).await.unwrap().unwrap();
        done.fail("nope".into(), false, Duration::ZERO, 40);
        repo.update(&done).await.unwrap();

        assert_eq!(repo.find_by_state(JobState::Failed).await.unwrap().len(), 1);
        assert_eq!(repo.delete_finished(40).await.unwrap(), 0);
        assert_eq!(repo.delete_finished(41).await.unwrap(), 1);
        assert_eq!(repo.count_by_state(JobState::Failed).await.unwrap(), 0);
    }

    #[core_async::test]
    async fn test_release_running_targets_one_job() {
        let repo = repository().await;
        let a = job("a", PRIORITY_HIGH, 0);
        let b = job("b", 0, 0);
        repo.insert(&a).await.unwrap();
        repo.insert(&b).await.unwrap();
        repo.claim_next(10).await.unwrap().unwrap();
        repo.claim_next(10).await.unwrap().unwrap();

        assert!(repo.release_running(a.id, 20).await.unwrap());
        assert!(!repo.release_running(a.id, 30).await.unwrap());

        let released = repo.find_by_id(a.id).await.unwrap().unwrap();
        assert_eq!(released.state, JobState::Pending);
        assert_eq!(released.attempts, 0);
        assert_eq!(released.next_run_at, 20);
        assert_eq!(released.started_at, None);
        assert_eq!(
            repo.find_by_id(b.id).await.unwrap().unwrap().state,
            JobState::Running
        );
    }
}
