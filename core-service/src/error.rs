use thiserror::Error;

#[derive(Error, Debug)]
pub enum CoreError {
    #[error("Engine initialization failed: {0}")]
    InitializationFailed(String),

    #[error("Configuration error: {0}")]
    Config(#[from] core_runtime::Error),

    #[error("Authentication error: {0}")]
    Auth(#[from] core_auth::AuthError),

    #[error("Sync error: {0}")]
    Sync(#[from] core_sync::SyncError),

    #[error("Library error: {0}")]
    Library(#[from] core_library::LibraryError),
}

impl CoreError {
    /// Whether the underlying failure was a rejected input.
    pub fn is_validation(&self) -> bool {
        matches!(self, CoreError::Sync(core_sync::SyncError::Validation(_)))
    }
}

pub type Result<T> = std::result::Result<T, CoreError>;
