//! Errors raised while putting the engine runtime together: validating
//! settings and installing the tracing subscriber.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    /// A settings value is out of range
    #[error("Invalid {section} settings: {message}")]
    InvalidSettings {
        /// Settings group, e.g. `queue` or `breaker`
        section: &'static str,
        message: String,
    },

    #[error("Invalid log filter: {0}")]
    LogFilter(String),

    /// Another global subscriber is already installed
    #[error("Logging already initialized: {0}")]
    LoggingInit(String),
}

impl Error {
    pub(crate) fn invalid(section: &'static str, message: impl Into<String>) -> Self {
        Error::InvalidSettings {
            section,
            message: message.into(),
        }
    }

    /// The settings group an invalid-settings error points at.
    pub fn section(&self) -> Option<&'static str> {
        match self {
            Error::InvalidSettings { section, .. } => Some(*section),
            _ => None,
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
