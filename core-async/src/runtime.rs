//! Runtime utilities that abstract over the underlying executor.

pub use tokio::runtime::{Builder, Handle, Runtime};

/// Runs the provided future to completion on a fresh current-thread runtime.
///
/// Used by the `#[core_async::test]` and `#[core_async::main]` expansions.
pub fn block_on<F>(future: F) -> F::Output
where
    F: std::future::Future,
{
    Builder::new_current_thread()
        .enable_all()
        .build()
        .expect("core_async::runtime::block_on: failed to build Tokio runtime")
        .block_on(future)
}

/// Returns `true` when called from inside a running runtime.
pub fn in_runtime() -> bool {
    Handle::try_current().is_ok()
}
