//! Time-related abstractions.
//!
//! Timers come from `tokio::time`; `Duration`/`Instant` are the std types.
//! Wall-clock time used for persisted timestamps should come from an injected
//! `bridge_traits::time::Clock` instead of these helpers, so state machines
//! stay testable.

pub use tokio::time::{interval, sleep, sleep_until, timeout, Interval, Sleep, Timeout};

pub use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

/// Error returned by [`timeout`] when the deadline elapses first.
pub use tokio::time::error::Elapsed;

/// Returns the current time as milliseconds since `UNIX_EPOCH`.
///
/// Falls back to `0` if the system clock is set before the epoch.
pub fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}
