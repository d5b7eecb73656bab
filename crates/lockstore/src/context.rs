//! Cancellation and deadlines for storage calls.

use std::future::Future;
use std::time::Duration;

use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::error::{StorageError, StorageResult};

/// Execution context carried by every storage and lock call.
///
/// A context ends when its cancellation token fires or its deadline passes,
/// whichever comes first. Cloned contexts share the same token.
#[derive(Clone, Debug, Default)]
pub struct Context {
    token: CancellationToken,
    deadline: Option<Instant>,
}

impl Context {
    /// A context that never ends on its own.
    pub fn background() -> Self {
        Self::default()
    }

    pub fn with_timeout(timeout: Duration) -> Self {
        Self::with_deadline(Instant::now() + timeout)
    }

    pub fn with_deadline(deadline: Instant) -> Self {
        Self {
            token: CancellationToken::new(),
            deadline: Some(deadline),
        }
    }

    /// Wrap a caller-owned token.
    pub fn with_cancellation(token: CancellationToken) -> Self {
        Self {
            token,
            deadline: None,
        }
    }

    /// A child context that ends when `self` ends or after `timeout`.
    /// Cancelling the child does not cancel the parent.
    pub fn child_with_timeout(&self, timeout: Duration) -> Self {
        let child_deadline = Instant::now() + timeout;
        Self {
            token: self.token.child_token(),
            deadline: Some(self.deadline.map_or(child_deadline, |d| d.min(child_deadline))),
        }
    }

    pub fn cancel(&self) {
        self.token.cancel();
    }

    pub fn cancellation_token(&self) -> CancellationToken {
        self.token.clone()
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// The reason this context ended, or `None` while it is live.
    pub fn err(&self) -> Option<StorageError> {
        if self.token.is_cancelled() {
            return Some(StorageError::Cancelled);
        }
        match self.deadline {
            Some(deadline) if Instant::now() >= deadline => Some(StorageError::DeadlineExceeded),
            _ => None,
        }
    }

    pub fn check(&self) -> StorageResult<()> {
        match self.err() {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    /// Resolves once the context ends, yielding the reason.
    pub async fn done(&self) -> StorageError {
        match self.deadline {
            Some(deadline) => tokio::select! {
                _ = self.token.cancelled() => StorageError::Cancelled,
                _ = tokio::time::sleep_until(deadline) => StorageError::DeadlineExceeded,
            },
            None => {
                self.token.cancelled().await;
                StorageError::Cancelled
            }
        }
    }

    /// Drive `fut` unless the context ends first. A future that completes in
    /// the same poll as the context ends wins.
    pub async fn race<F, T>(&self, fut: F) -> StorageResult<T>
    where
        F: Future<Output = T>,
    {
        self.check()?;
        tokio::select! {
            biased;
            out = fut => Ok(out),
            err = self.done() => Err(err),
        }
    }

    /// Like [`Context::race`] for fallible futures.
    pub async fn run<F, T, E>(&self, fut: F) -> StorageResult<T>
    where
        F: Future<Output = Result<T, E>>,
        E: Into<StorageError>,
    {
        self.race(fut).await?.map_err(Into::into)
    }

    /// Sleep for `duration` unless the context ends first.
    pub async fn sleep(&self, duration: Duration) -> StorageResult<()> {
        self.race(tokio::time::sleep(duration)).await
    }
}
