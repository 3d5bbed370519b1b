//! Bounded execution of probe and remediation futures.

use std::future::Future;
use std::time::Duration;

use tokio::task::AbortHandle;

/// Result of running a future under [`run_bounded`].
#[derive(Debug)]
pub enum Bounded<T> {
    Done(T),
    TimedOut,
    /// The task panicked or was cancelled.
    Faulted(String),
}

/// Aborts the wrapped task when dropped, so a cancelled caller never
/// leaves its child running.
struct AbortOnDrop(AbortHandle);

impl Drop for AbortOnDrop {
    fn drop(&mut self) {
        self.0.abort();
    }
}

/// Run `fut` on its own task with a deadline. Panics inside `fut` are
/// reported as [`Bounded::Faulted`] instead of unwinding into the caller.
pub async fn run_bounded<F, T>(timeout: Duration, fut: F) -> Bounded<T>
where
    F: Future<Output = T> + Send + 'static,
    T: Send + 'static,
{
    let handle = tokio::spawn(fut);
    let _guard = AbortOnDrop(handle.abort_handle());

    match tokio::time::timeout(timeout, handle).await {
        Ok(Ok(value)) => Bounded::Done(value),
        Ok(Err(e)) if e.is_panic() => Bounded::Faulted("task panicked".to_string()),
        Ok(Err(e)) => Bounded::Faulted(e.to_string()),
        Err(_) => Bounded::TimedOut,
    }
}
