use thiserror::Error;

/// SQLite result codes meaning "another writer holds the lock, try again":
/// SQLITE_BUSY, SQLITE_LOCKED, SQLITE_BUSY_RECOVERY, SQLITE_LOCKED_SHAREDCACHE,
/// SQLITE_BUSY_SNAPSHOT.
const SQLITE_BUSY_CODES: &[&str] = &["5", "6", "261", "262", "517"];

#[derive(Error, Debug)]
pub enum LibraryError {
    #[error("Database error: {0}")]
    Database(sqlx::Error),

    /// The database was locked by another writer
    #[error("Database busy: {0}")]
    Busy(String),

    /// A uniqueness constraint rejected the write
    #[error("Uniqueness conflict: {0}")]
    Conflict(String),

    #[error("Entity not found: {entity_type} with id {id}")]
    NotFound { entity_type: String, id: String },

    #[error("Invalid input: {field} - {message}")]
    InvalidInput { field: String, message: String },

    #[error("Migration failed: {0}")]
    Migration(String),
}

impl LibraryError {
    /// Whether the same statement may succeed if retried.
    pub fn is_busy(&self) -> bool {
        matches!(self, LibraryError::Busy(_))
    }

    pub fn is_conflict(&self) -> bool {
        matches!(self, LibraryError::Conflict(_))
    }
}

/// Returns true for SQLite result codes that signal lock contention.
pub fn is_busy_code(code: &str) -> bool {
    SQLITE_BUSY_CODES.contains(&code)
}

// Every sqlx error crosses into the library through here, so lock contention
// and uniqueness races are classified exactly once.
impl From<sqlx::Error> for LibraryError {
    fn from(err: sqlx::Error) -> Self {
        match &err {
            sqlx::Error::Database(db_err) => {
                if db_err.is_unique_violation() {
                    return LibraryError::Conflict(db_err.message().to_string());
                }
                if db_err.code().is_some_and(|code| is_busy_code(code.as_ref())) {
                    return LibraryError::Busy(db_err.message().to_string());
                }
                LibraryError::Database(err)
            }
            sqlx::Error::PoolTimedOut => LibraryError::Busy(err.to_string()),
            _ => LibraryError::Database(err),
        }
    }
}

pub type Result<T> = std::result::Result<T, LibraryError>;
