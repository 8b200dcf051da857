//! Multi-provider catalog sync engine.
//!
//! Host applications depend on this crate alone: it re-exports the
//! [`SyncEngine`] facade and the logging setup.
//!
//! ```ignore
//! use mpc_sync_engine::{init_logging, EngineConfig, LoggingConfig, SyncEngine};
//!
//! init_logging(LoggingConfig::default())?;
//! let engine = SyncEngine::builder(EngineConfig::default()).build().await?;
//! engine.start().await?;
//! ```

pub use core_runtime::logging::{init_logging, LogFormat, LoggingConfig};
pub use core_service::*;
