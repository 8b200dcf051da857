use thiserror::Error;

/// Errors raised by external collaborators (catalog providers and other
/// host bridges).
///
/// Adapters map their transport failures onto these variants so the core can
/// tell transient trouble (worth retrying and counted by circuit breakers)
/// from permanent rejections.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum BridgeError {
    #[error("Network error: {0}")]
    Network(String),

    #[error("Rate limited by provider (retry after {retry_after_secs:?}s)")]
    RateLimited { retry_after_secs: Option<u64> },

    #[error("Service unavailable: {0}")]
    Unavailable(String),

    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    #[error("Bridge capability not available: {0}")]
    NotAvailable(String),
}

impl BridgeError {
    /// Whether the failure is expected to clear up on its own
    /// (network trouble, throttling, outages).
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            Self::Network(_) | Self::RateLimited { .. } | Self::Unavailable(_)
        )
    }
}

pub type Result<T> = std::result::Result<T, BridgeError>;
