//! Synchronization primitives.
//!
//! Async-aware locks and channels from `tokio::sync`, plus the cooperative
//! [`CancellationToken`] used by long-running loops (dispatchers, periodic
//! workers) to observe stop requests at their suspension points.
//!
//! # Examples
//!
//! ```rust
//! use core_async::sync::{Mutex, Semaphore};
//! use std::sync::Arc;
//!
//! async fn example() {
//!     let slots = Arc::new(Semaphore::new(2));
//!     let permit = slots.clone().acquire_owned().await.unwrap();
//!     assert_eq!(slots.available_permits(), 1);
//!     drop(permit);
//!
//!     let counter = Mutex::new(0);
//!     *counter.lock().await += 1;
//! }
//! ```

pub use tokio::sync::{
    broadcast, mpsc, oneshot, watch, AcquireError, Mutex, MutexGuard, Notify, OwnedSemaphorePermit,
    RwLock, RwLockReadGuard, RwLockWriteGuard, Semaphore, SemaphorePermit,
};

pub use tokio_util::sync::CancellationToken;
