//! Task spawning and execution.
//!
//! Thin wrappers over `tokio::task`. Spawned tasks may run on any worker
//! thread, so futures must be `Send + 'static`.
//!
//! A panic inside a spawned task surfaces as a [`JoinError`] whose
//! `is_panic()` is `true`; supervisors rely on this to isolate crashing work.
//!
//! ```rust
//! use core_async::task;
//!
//! async fn example() {
//!     let handle = task::spawn(async { 42 });
//!     assert_eq!(handle.await.unwrap(), 42);
//! }
//! ```

pub use tokio::task::{spawn_blocking, yield_now, JoinError, JoinHandle, JoinSet};

/// Spawns a new asynchronous task on the current runtime.
pub fn spawn<F>(future: F) -> JoinHandle<F::Output>
where
    F: std::future::Future + Send + 'static,
    F::Output: Send + 'static,
{
    tokio::task::spawn(future)
}

/// Extracts a readable message from a task's panic payload.
pub fn panic_message(err: JoinError) -> String {
    if !err.is_panic() {
        return err.to_string();
    }

    let payload = err.into_panic();
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "task panicked".to_string()
    }
}

/// Result type for task operations.
pub type Result<T> = std::result::Result<T, JoinError>;
