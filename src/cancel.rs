//! Caller-side cancellation for requests going through the rotation layer.

use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::Notify;
use tokio::time::Instant;

use crate::error::{ProxyRotationError, Result};

#[derive(Debug, Default)]
struct Inner {
    cancelled: AtomicBool,
    notify: Notify,
}

/// Cancellation handle a caller attaches to a request's extensions.
///
/// Fires on [`CancellationSignal::cancel`] or once the optional deadline
/// passes. After it fires the rotation layer stops: no retry on another
/// proxy and no hand-off to the next stage.
///
/// ```no_run
/// # use reqwest_middleware::{ClientWithMiddleware, Result};
/// # async fn run(client: ClientWithMiddleware) -> Result<()> {
/// use reqwest_proxy_rotation::CancellationSignal;
/// use std::time::Duration;
///
/// let signal = CancellationSignal::with_timeout(Duration::from_secs(5));
/// client.get("https://api.example.com/status").with_extension(signal).send().await?;
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone, Default)]
pub struct CancellationSignal {
    inner: Arc<Inner>,
    deadline: Option<Instant>,
}

impl CancellationSignal {
    pub fn new() -> Self {
        Self::default()
    }

    /// A signal that also fires at `deadline`.
    pub fn with_deadline(deadline: Instant) -> Self {
        Self {
            inner: Arc::default(),
            deadline: Some(deadline),
        }
    }

    pub fn with_timeout(timeout: std::time::Duration) -> Self {
        Self::with_deadline(Instant::now() + timeout)
    }

    /// Fire the signal for every clone.
    pub fn cancel(&self) {
        self.inner.cancelled.store(true, Ordering::SeqCst);
        self.inner.notify.notify_waiters();
    }

    pub fn is_cancelled(&self) -> bool {
        self.inner.cancelled.load(Ordering::SeqCst)
            || self.deadline.is_some_and(|d| Instant::now() >= d)
    }

    /// Resolves once the signal fires.
    pub async fn cancelled(&self) {
        loop {
            let notified = self.inner.notify.notified();
            if self.is_cancelled() {
                return;
            }
            match self.deadline {
                Some(deadline) => tokio::select! {
                    _ = notified => {}
                    _ = tokio::time::sleep_until(deadline) => return,
                },
                None => notified.await,
            }
        }
    }

    /// Run `operation` unless the signal fires first.
    pub async fn guard<F: Future>(&self, operation: F) -> Result<F::Output> {
        tokio::select! {
            biased;
            _ = self.cancelled() => Err(ProxyRotationError::Cancelled),
            output = operation => Ok(output),
        }
    }
}

/// Like [`CancellationSignal::guard`], passing through when no signal is set.
pub(crate) async fn guarded<F: Future>(
    signal: Option<&CancellationSignal>,
    operation: F,
) -> Result<F::Output> {
    match signal {
        Some(signal) => signal.guard(operation).await,
        None => Ok(operation.await),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn cancel_wakes_waiters() {
        let signal = CancellationSignal::new();
        let waiter = {
            let signal = signal.clone();
            tokio::spawn(async move { signal.cancelled().await })
        };
        tokio::task::yield_now().await;
        signal.cancel();
        tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .expect("waiter woke up")
            .unwrap();
        assert!(signal.is_cancelled());
    }

    #[tokio::test(start_paused = true)]
    async fn deadline_fires() {
        let signal = CancellationSignal::with_timeout(Duration::from_millis(100));
        assert!(!signal.is_cancelled());
        let result = signal.guard(tokio::time::sleep(Duration::from_secs(10))).await;
        assert!(matches!(result, Err(ProxyRotationError::Cancelled)));
        assert!(signal.is_cancelled());
    }

    #[tokio::test]
    async fn guard_passes_output_through() {
        let signal = CancellationSignal::new();
        assert_eq!(signal.guard(async { 7 }).await.unwrap(), 7);
        assert_eq!(guarded(None, async { 8 }).await.unwrap(), 8);
    }

    #[tokio::test]
    async fn already_cancelled_short_circuits() {
        let signal = CancellationSignal::new();
        signal.cancel();
        let result = guarded(Some(&signal), std::future::pending::<()>()).await;
        assert!(matches!(result, Err(ProxyRotationError::Cancelled)));
    }
}
