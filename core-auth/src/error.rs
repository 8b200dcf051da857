use thiserror::Error;

#[derive(Error, Debug)]
pub enum AuthError {
    #[error("Invalid provider: {0}")]
    InvalidProvider(String),

    #[error("Invalid credential for {provider}: {reason}")]
    InvalidCredential { provider: String, reason: String },

    #[error("Not authenticated with {0}")]
    NotAuthenticated(String),
}

pub type Result<T> = std::result::Result<T, AuthError>;
