//! Deferred computations with explicit start and resolution points.
//!
//! A [`Promise`] wraps an async computation that does nothing until it is
//! started. Callers decide when work begins ([`Promise::run`]) and when
//! they block on its result ([`Promise::resolve`]), which lets the staging
//! pipeline fan out independent steps and then join them in a fixed order.
//!
//! There is deliberately no cancellation: a promise that has been started
//! and then abandoned keeps running on the runtime until it finishes on
//! its own. Sibling steps therefore always run to completion even when an
//! earlier step in resolve order has already failed.

use std::fmt;
use std::future::Future;

use futures::future::BoxFuture;
use tokio::task::{JoinError, JoinHandle};

use crate::errors::StagingError;

enum Inner<T> {
    Idle(BoxFuture<'static, Result<T, StagingError>>),
    Running(JoinHandle<Result<T, StagingError>>),
}

/// A deferred async computation producing a `Result<T, StagingError>`.
///
/// ```rust,ignore
/// let mut download = Promise::new(async { fetch_archive().await });
/// download.run();                     // starts now
/// let archive = download.resolve().await?;  // blocks for the result
/// ```
pub struct Promise<T> {
    inner: Option<Inner<T>>,
}

impl<T: Send + 'static> Promise<T> {
    /// Creates a promise from a future without starting it.
    ///
    /// The future is held untouched until [`Promise::run`] or
    /// [`Promise::resolve`] is called.
    #[must_use]
    pub fn new<F>(future: F) -> Self
    where
        F: Future<Output = Result<T, StagingError>> + Send + 'static,
    {
        Self {
            inner: Some(Inner::Idle(Box::pin(future))),
        }
    }

    /// Creates a promise that is already settled with the given result.
    #[must_use]
    pub fn ready(result: Result<T, StagingError>) -> Self {
        Self::new(async move { result })
    }

    /// Starts the computation on the current Tokio runtime.
    ///
    /// Calling `run` more than once has no effect. Must be called from
    /// within a Tokio runtime.
    pub fn run(&mut self) {
        match self.inner.take() {
            Some(Inner::Idle(future)) => {
                self.inner = Some(Inner::Running(tokio::spawn(future)));
            }
            other => self.inner = other,
        }
    }

    /// Waits for the result, starting the computation first if needed.
    ///
    /// Consumes the promise: a promise can settle exactly once. A panic
    /// inside the computation surfaces as [`StagingError::Internal`] with
    /// the panic message preserved.
    pub async fn resolve(mut self) -> Result<T, StagingError> {
        self.run();
        match self.inner.take() {
            Some(Inner::Running(handle)) => match handle.await {
                Ok(result) => result,
                Err(join_err) => Err(describe_join_error(join_err)),
            },
            _ => Err(StagingError::internal("promise had no pending computation")),
        }
    }

    /// Returns `true` if the computation has been started.
    #[must_use]
    pub fn is_started(&self) -> bool {
        matches!(self.inner, Some(Inner::Running(_)))
    }
}

impl<T> fmt::Debug for Promise<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = match &self.inner {
            Some(Inner::Idle(_)) => "idle",
            Some(Inner::Running(_)) => "running",
            None => "resolved",
        };
        f.debug_struct("Promise").field("state", &state).finish()
    }
}

fn describe_join_error(err: JoinError) -> StagingError {
    if err.is_panic() {
        let payload = err.into_panic();
        let message = payload
            .downcast_ref::<&str>()
            .map(|s| (*s).to_string())
            .or_else(|| payload.downcast_ref::<String>().cloned())
            .unwrap_or_else(|| "unknown panic".to_string());
        StagingError::internal(format!("promise panicked: {message}"))
    } else {
        StagingError::internal(format!("promise was aborted: {err}"))
    }
}

/// Starts both promises, then resolves them left to right.
///
/// Returns both values, or the first error in resolve order. When the
/// left promise fails, the right one is abandoned but keeps running to
/// completion in the background.
pub async fn resolve_both<A, B>(
    mut left: Promise<A>,
    mut right: Promise<B>,
) -> Result<(A, B), StagingError>
where
    A: Send + 'static,
    B: Send + 'static,
{
    left.run();
    right.run();
    let left_value = left.resolve().await?;
    let right_value = right.resolve().await?;
    Ok((left_value, right_value))
}

/// Starts every promise, then resolves them in order.
///
/// All computations run concurrently. The returned error, if any, is the
/// first in resolve order rather than the first in wall-clock time, and
/// later promises keep running to completion in the background.
pub async fn resolve_all<T>(promises: Vec<Promise<T>>) -> Result<Vec<T>, StagingError>
where
    T: Send + 'static,
{
    let mut running = promises;
    for promise in &mut running {
        promise.run();
    }
    let mut values = Vec::with_capacity(running.len());
    for promise in running {
        values.push(promise.resolve().await?);
    }
    Ok(values)
}

/// Resolves promises one at a time, stopping at the first failure.
///
/// Unlike [`resolve_all`], later promises are never started: after a
/// failure the remaining computations are dropped without having run.
pub async fn resolve_in_sequence<T>(promises: Vec<Promise<T>>) -> Result<Vec<T>, StagingError>
where
    T: Send + 'static,
{
    let mut values = Vec::with_capacity(promises.len());
    for promise in promises {
        values.push(promise.resolve().await?);
    }
    Ok(values)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::time::Duration;

    #[tokio::test]
    async fn test_new_does_not_execute() {
        let executed = Arc::new(AtomicBool::new(false));
        let flag = executed.clone();
        let promise = Promise::new(async move {
            flag.store(true, Ordering::SeqCst);
            Ok(())
        });

        assert!(!promise.is_started());
        assert!(!executed.load(Ordering::SeqCst));

        promise.resolve().await.unwrap();
        assert!(executed.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn test_run_is_idempotent() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        let mut promise = Promise::new(async move {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(7)
        });

        promise.run();
        promise.run();
        assert!(promise.is_started());

        let value = promise.resolve().await.unwrap();
        assert_eq!(value, 7);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_ready_resolves_immediately() {
        let promise = Promise::ready(Ok("done"));
        assert_eq!(promise.resolve().await.unwrap(), "done");

        let promise: Promise<()> = Promise::ready(Err(StagingError::transport("no route")));
        let err = promise.resolve().await.unwrap_err();
        assert!(matches!(err, StagingError::Transport(_)));
    }

    #[tokio::test]
    async fn test_resolve_both_runs_concurrently() {
        let barrier = Arc::new(tokio::sync::Barrier::new(2));

        let left_barrier = barrier.clone();
        let left = Promise::new(async move {
            left_barrier.wait().await;
            Ok(1)
        });
        let right_barrier = barrier.clone();
        let right = Promise::new(async move {
            right_barrier.wait().await;
            Ok(2)
        });

        // Both sides must reach the barrier, which only happens if they
        // run concurrently rather than back to back.
        let joined = tokio::time::timeout(Duration::from_secs(5), resolve_both(left, right))
            .await
            .expect("resolve_both deadlocked");
        assert_eq!(joined.unwrap(), (1, 2));
    }

    #[tokio::test]
    async fn test_resolve_both_first_failure_wins_and_sibling_survives() {
        let (release_tx, release_rx) = tokio::sync::oneshot::channel::<()>();
        let sibling_finished = Arc::new(AtomicBool::new(false));

        let left: Promise<()> = Promise::new(async { Err(StagingError::transport("boom")) });
        let finished = sibling_finished.clone();
        let right = Promise::new(async move {
            release_rx.await.ok();
            finished.store(true, Ordering::SeqCst);
            Ok(())
        });

        let err = resolve_both(left, right).await.unwrap_err();
        assert!(matches!(err, StagingError::Transport(_)));
        assert!(!sibling_finished.load(Ordering::SeqCst));

        // The abandoned sibling is still running and completes on its own.
        release_tx.send(()).ok();
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(sibling_finished.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn test_resolve_all_collects_values_in_order() {
        let promises = vec![
            Promise::new(async {
                tokio::time::sleep(Duration::from_millis(20)).await;
                Ok(1)
            }),
            Promise::new(async { Ok(2) }),
            Promise::new(async { Ok(3) }),
        ];

        let values = resolve_all(promises).await.unwrap();
        assert_eq!(values, vec![1, 2, 3]);
    }

    #[tokio::test]
    async fn test_resolve_all_reports_first_failure_in_resolve_order() {
        let promises: Vec<Promise<u32>> = vec![
            Promise::new(async { Ok(0) }),
            Promise::new(async {
                tokio::time::sleep(Duration::from_millis(30)).await;
                Err(StagingError::container("second"))
            }),
            Promise::new(async { Err(StagingError::container("third")) }),
        ];

        // The third promise fails first in wall-clock time, but the error
        // reported is the second promise's because it comes first in
        // resolve order.
        let err = resolve_all(promises).await.unwrap_err();
        assert_eq!(err.to_string(), "Container error: second");
    }

    #[tokio::test]
    async fn test_resolve_in_sequence_never_starts_later_steps_after_failure() {
        let started = Arc::new(AtomicBool::new(false));
        let flag = started.clone();

        let promises: Vec<Promise<()>> = vec![
            Promise::new(async { Ok(()) }),
            Promise::new(async { Err(StagingError::build("stage", 1)) }),
            Promise::new(async move {
                flag.store(true, Ordering::SeqCst);
                Ok(())
            }),
        ];

        let err = resolve_in_sequence(promises).await.unwrap_err();
        assert!(err.is_build_failure());

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(!started.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn test_panic_surfaces_as_internal_error() {
        let promise: Promise<()> = Promise::new(async { panic!("kaboom") });
        let err = promise.resolve().await.unwrap_err();

        match err {
            StagingError::Internal(message) => {
                assert!(message.contains("kaboom"), "message was: {message}");
            }
            other => panic!("expected internal error, got {other:?}"),
        }
    }
}
