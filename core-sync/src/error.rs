use core_auth::ProviderKind;
use core_library::LibraryError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum SyncError {
    /// Malformed input; never retried
    #[error("Validation error: {0}")]
    Validation(String),

    /// Storage was busy or locked; retrying may succeed
    #[error("Transient storage error: {0}")]
    TransientStorage(String),

    /// A uniqueness constraint lost a race with another writer
    #[error("Uniqueness conflict: {0}")]
    Conflict(String),

    #[error("Provider {provider} failed: {message}")]
    Provider {
        provider: ProviderKind,
        message: String,
        recoverable: bool,
    },

    #[error("{entity_type} {id} not found")]
    EntityNotFound { entity_type: String, id: String },

    /// Permanent storage failure
    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Job {job_id} not found")]
    JobNotFound { job_id: String },

    #[error("Invalid job ID: {0}")]
    InvalidJobId(String),

    #[error("Invalid job state: {0}")]
    InvalidStatus(String),

    #[error("No handler registered for job type {0}")]
    HandlerNotRegistered(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl SyncError {
    /// Whether retrying the same unit of work may succeed.
    pub fn is_transient(&self) -> bool {
        match self {
            SyncError::TransientStorage(_) | SyncError::Conflict(_) => true,
            SyncError::Provider { recoverable, .. } => *recoverable,
            _ => false,
        }
    }

    /// Whether a job that failed with this error should be scheduled again.
    ///
    /// Malformed input, unknown job types and missing entities fail the job
    /// immediately; everything else is retried until attempts run out.
    pub fn is_retryable_job_failure(&self) -> bool {
        !matches!(
            self,
            SyncError::Validation(_)
                | SyncError::HandlerNotRegistered(_)
                | SyncError::EntityNotFound { .. }
                | SyncError::Serialization(_)
        )
    }
}

impl From<LibraryError> for SyncError {
    fn from(err: LibraryError) -> Self {
        match err {
            LibraryError::Busy(message) => SyncError::TransientStorage(message),
            LibraryError::Conflict(message) => SyncError::Conflict(message),
            LibraryError::NotFound { entity_type, id } => {
                SyncError::EntityNotFound { entity_type, id }
            }
            LibraryError::InvalidInput { field, message } => {
                SyncError::Validation(format!("{}: {}", field, message))
            }
            other => SyncError::Storage(other.to_string()),
        }
    }
}

impl From<sqlx::Error> for SyncError {
    fn from(err: sqlx::Error) -> Self {
        LibraryError::from(err).into()
    }
}

impl From<serde_json::Error> for SyncError {
    fn from(err: serde_json::Error) -> Self {
        SyncError::Serialization(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, SyncError>;
