//! Store-side session backing a lock manager's locks.

use std::sync::Arc;
use std::time::Duration;

use lockstore_backend::{BackendError, BackendResult, KvBackend, SessionSpec};
use lockstore_types::SessionId;
use tokio::time::Instant;
use tokio_util::sync::{CancellationToken, DropGuard};
use tracing::{debug, info, warn};

/// A live session plus the task that keeps it alive.
///
/// The renewal task renews every `ttl / 2`. It stops when the session is
/// torn down or this value is dropped; dropping does not destroy the
/// session, which then expires in the store after its TTL.
pub(crate) struct LockSession {
    id: SessionId,
    lost: CancellationToken,
    _renewal: DropGuard,
}

impl LockSession {
    pub(crate) async fn create(
        backend: Arc<dyn KvBackend>,
        spec: &SessionSpec,
    ) -> BackendResult<Self> {
        let id = backend.create_session(spec).await?;
        info!(session = %id, ttl_ms = spec.ttl.as_millis() as u64, "lock session created");

        let stop = CancellationToken::new();
        let lost = CancellationToken::new();
        tokio::spawn(renew_loop(
            backend,
            id.clone(),
            renew_interval(spec.ttl),
            stop.clone(),
            lost.clone(),
        ));

        Ok(Self {
            id,
            lost,
            _renewal: stop.drop_guard(),
        })
    }

    pub(crate) fn id(&self) -> &SessionId {
        &self.id
    }

    /// `true` once the store reported the session gone.
    pub(crate) fn is_lost(&self) -> bool {
        self.lost.is_cancelled()
    }

    /// Token cancelled when the session is lost.
    pub(crate) fn lost_token(&self) -> CancellationToken {
        self.lost.clone()
    }

    /// Stop renewing and destroy the session, releasing every record bound
    /// to it.
    pub(crate) async fn destroy(self, backend: &dyn KvBackend) -> BackendResult<()> {
        let id = self.id.clone();
        // Stops the renewal task before the session goes away.
        drop(self);
        backend.destroy_session(&id).await?;
        info!(session = %id, "lock session destroyed");
        Ok(())
    }
}

impl std::fmt::Debug for LockSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LockSession")
            .field("id", &self.id)
            .field("lost", &self.is_lost())
            .finish()
    }
}

fn renew_interval(ttl: Duration) -> Duration {
    (ttl / 2).max(Duration::from_millis(1))
}

async fn renew_loop(
    backend: Arc<dyn KvBackend>,
    id: SessionId,
    interval: Duration,
    stop: CancellationToken,
    lost: CancellationToken,
) {
    let mut ticker = tokio::time::interval_at(Instant::now() + interval, interval);
    loop {
        tokio::select! {
            _ = stop.cancelled() => return,
            _ = ticker.tick() => {}
        }
        let renewed = tokio::select! {
            _ = stop.cancelled() => return,
            res = backend.renew_session(&id) => res,
        };
        match renewed {
            Ok(()) => debug!(session = %id, "session renewed"),
            Err(BackendError::SessionNotFound(_)) => {
                warn!(session = %id, "session expired in the store, locks bound to it are lost");
                lost.cancel();
                return;
            }
            Err(e) => warn!(session = %id, error = %e, "session renewal failed, retrying next tick"),
        }
    }
}

#[cfg(test)]
mod tests {
    use lockstore_backend::InMemoryBackend;

    use super::*;

    fn spec(ttl: Duration) -> SessionSpec {
        SessionSpec {
            name: "test".into(),
            ttl,
            lock_delay: Duration::ZERO,
        }
    }

    #[tokio::test(start_paused = true)]
    async fn renewal_keeps_session_alive() {
        let backend = Arc::new(InMemoryBackend::new());
        let session = LockSession::create(backend.clone(), &spec(Duration::from_secs(10)))
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_secs(60)).await;
        assert_eq!(backend.session_count(), 1);
        assert!(!session.is_lost());
    }

    #[tokio::test(start_paused = true)]
    async fn dropped_session_expires_after_ttl() {
        let backend = Arc::new(InMemoryBackend::new());
        let session = LockSession::create(backend.clone(), &spec(Duration::from_secs(10)))
            .await
            .unwrap();
        drop(session);
        tokio::time::sleep(Duration::from_secs(9)).await;
        assert_eq!(backend.session_count(), 1);
        tokio::time::sleep(Duration::from_secs(2)).await;
        assert_eq!(backend.session_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn outage_longer_than_ttl_marks_session_lost() {
        let backend = Arc::new(InMemoryBackend::new());
        let session = LockSession::create(backend.clone(), &spec(Duration::from_secs(10)))
            .await
            .unwrap();
        backend.set_available(false);
        tokio::time::sleep(Duration::from_secs(12)).await;
        backend.set_available(true);
        tokio::time::sleep(Duration::from_secs(5)).await;
        assert!(session.is_lost());
    }

    #[tokio::test(start_paused = true)]
    async fn destroy_removes_session() {
        let backend = Arc::new(InMemoryBackend::new());
        let session = LockSession::create(backend.clone(), &spec(Duration::from_secs(10)))
            .await
            .unwrap();
        session.destroy(backend.as_ref()).await.unwrap();
        assert_eq!(backend.session_count(), 0);
    }
}
