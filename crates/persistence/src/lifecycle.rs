//! Scope guard that completes a unit of work exactly once.
//!
//! Prefer [`UnitOfWorkScope::run`] or an explicit [`UnitOfWorkScope::finish`].
//! A scope dropped without finishing (early return, `?`, panic) spawns the
//! completion on the current tokio runtime since `Drop` cannot await.

use std::future::Future;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;

use async_trait::async_trait;
use futures::FutureExt;

use common::StoreResult;

#[cfg(any(test, feature = "test-utils"))]
use mockall::automock;

/// Something that can be completed at the end of a scope.
#[cfg_attr(any(test, feature = "test-utils"), automock)]
#[async_trait]
pub trait Completable: Send + Sync {
    /// Flush outstanding work and release resources
    async fn complete(&self) -> StoreResult<()>;
}

/// Completes the wrapped unit when the scope ends.
pub struct UnitOfWorkScope<U: Completable + ?Sized + 'static> {
    unit: Arc<U>,
    completed: bool,
}

impl<U: Completable + ?Sized + 'static> UnitOfWorkScope<U> {
    /// Open a scope around `unit`.
    pub fn begin(unit: Arc<U>) -> Self {
        Self {
            unit,
            completed: false,
        }
    }

    pub fn unit(&self) -> &Arc<U> {
        &self.unit
    }

    /// End the scope, completing the unit.
    pub async fn finish(mut self) -> StoreResult<()> {
        self.completed = true;
        self.unit.complete().await
    }

    /// Run `body` inside a scope.
    ///
    /// The unit is completed exactly once whether the body succeeds, fails
    /// or panics. A body error is returned in preference to a completion
    /// error; a panic is resumed after completion.
    pub async fn run<T, F, Fut>(unit: Arc<U>, body: F) -> StoreResult<T>
    where
        F: FnOnce(Arc<U>) -> Fut,
        Fut: Future<Output = StoreResult<T>>,
    {
        let scope = Self::begin(unit);
        let outcome = AssertUnwindSafe(body(Arc::clone(&scope.unit)))
            .catch_unwind()
            .await;
        let completion = scope.finish().await;

        match outcome {
            Ok(Ok(value)) => completion.map(|_| value),
            Ok(Err(e)) => {
                if let Err(completion_err) = completion {
                    tracing::error!(error = %completion_err, "Completing unit of work failed");
                }
                Err(e)
            }
            Err(payload) => {
                if let Err(completion_err) = completion {
                    tracing::error!(error = %completion_err, "Completing unit of work failed");
                }
                panic::resume_unwind(payload)
            }
        }
    }
}

impl<U: Completable + ?Sized + 'static> Drop for UnitOfWorkScope<U> {
    fn drop(&mut self) {
        if self.completed {
            return;
        }
        self.completed = true;

        let unit = Arc::clone(&self.unit);
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                tracing::warn!("Unit of work scope dropped without finish, completing in background");
                handle.spawn(async move {
                    if let Err(e) = unit.complete().await {
                        tracing::error!(error = %e, "Failed to complete unit of work on drop");
                    }
                });
            }
            Err(_) => {
                tracing::error!("Unit of work scope dropped outside a runtime, not completed");
            }
        }
    }
}
