//! Runtime facade for the sync engine crates.
//!
//! Every `core-*` crate depends on this crate instead of naming Tokio directly,
//! so the executor, timers and synchronization primitives are chosen in one
//! place.
//!
//! # Modules
//!
//! - `task`: task spawning and join handles
//! - `time`: sleeping, timeouts, instants
//! - `sync`: async locks, channels, semaphores and cancellation tokens
//! - `runtime`: building and blocking on a runtime (tests, binaries)
//!
//! # Examples
//!
//! ```rust
//! use core_async::sync::CancellationToken;
//! use core_async::time::{sleep, Duration};
//!
//! async fn wait_or_stop(token: CancellationToken) -> bool {
//!     core_async::select! {
//!         _ = token.cancelled() => false,
//!         _ = sleep(Duration::from_millis(10)) => true,
//!     }
//! }
//! ```

// Entry-point/test attribute macros so downstream crates never depend on Tokio.
pub use core_async_macros::{main, test};

pub mod runtime;
pub mod sync;
pub mod task;
pub mod time;

pub use task::spawn;
pub use time::{sleep, Duration, Instant};

/// Waits on several futures and runs the branch of the first to complete.
pub use tokio::select;
